//! Common utilities used across the crate.
//!
//! Parallelism configuration, thread pool setup, and the small unsafe helper
//! that lets parallel loops scatter into disjoint slots of one output buffer.

use std::marker::PhantomData;

use rayon::prelude::*;

use crate::error::Result;

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// Passed through every quantization component. When `Parallel`, components
/// may use `rayon` parallel iterators; when `Sequential`, they must not.
///
/// The actual thread pool is set up at the entry points via `n_threads`.
/// Components don't manage thread pools - they just respect this flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if rayon pool has multiple threads, sequential otherwise)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Fallible `for_each`. Stops at the first error (in parallel mode, other
    /// workers stop picking up new items once an error is observed).
    #[inline]
    pub fn maybe_par_try_for_each<T, I, F>(self, iter: I, f: F) -> Result<()>
    where
        T: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> Result<()> + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().try_for_each(f)
        } else {
            iter.into_iter().try_for_each(f)
        }
    }

    #[inline]
    pub fn maybe_par_map<T, B, I, F>(self, iter: I, f: F) -> Vec<B>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> B + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }

    /// Fallible map that collects into a `Vec`, preserving input order.
    #[inline]
    pub fn maybe_par_try_map<T, B, I, F>(self, iter: I, f: F) -> Result<Vec<B>>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> Result<B> + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }

    /// Fill a slice with one value.
    #[inline]
    pub fn maybe_par_fill<T: Copy + Send + Sync>(self, dst: &mut [T], value: T) {
        const BLOCK_SIZE: usize = 1 << 16;

        if self.is_parallel() && dst.len() > BLOCK_SIZE {
            dst.par_chunks_mut(BLOCK_SIZE).for_each(|chunk| chunk.fill(value));
        } else {
            dst.fill(value);
        }
    }
}

// =============================================================================
// Thread Pool Setup
// =============================================================================

/// Run a closure with the appropriate thread pool.
///
/// Thread count semantics:
/// - `0` = auto (use all available cores)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = use exactly `n` threads
///
/// # Example
///
/// ```
/// use quantpool::run_with_threads;
///
/// let sum = run_with_threads(2, |_parallelism| 1 + 1).unwrap();
/// assert_eq!(sum, 2);
/// ```
#[inline]
pub fn run_with_threads<T: Send>(
    n_threads: usize,
    f: impl FnOnce(Parallelism) -> T + Send,
) -> Result<T> {
    let parallelism = Parallelism::from_threads(n_threads);

    match parallelism {
        Parallelism::Sequential => Ok(f(Parallelism::Sequential)),
        Parallelism::Parallel => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build()?;
            Ok(pool.install(|| f(Parallelism::Parallel)))
        }
    }
}

// =============================================================================
// Disjoint Writes
// =============================================================================

/// Shared handle to a mutable slice for parallel scatter writes.
///
/// Every index must be written by at most one task at a time. The quantization
/// passes satisfy this because each object index appears once per column and
/// parts of one aggregate are processed one after another.
pub(crate) struct DisjointSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// Writers only touch disjoint indices (see type docs).
unsafe impl<T: Send> Sync for DisjointSlice<'_, T> {}
unsafe impl<T: Send> Send for DisjointSlice<'_, T> {}

impl<'a, T> DisjointSlice<'a, T> {
    pub(crate) fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    /// Apply `f` to the slot at `idx`.
    ///
    /// # Safety
    /// No other thread may access `idx` concurrently.
    #[inline]
    pub(crate) unsafe fn update(&self, idx: usize, f: impl FnOnce(&mut T)) {
        assert!(idx < self.len, "index {idx} out of bounds ({})", self.len);
        // Safety: in bounds (checked above) and exclusive per caller contract.
        let slot = unsafe { &mut *self.ptr.add(idx) };
        f(slot);
    }
}
