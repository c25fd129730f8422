//! Resource-constrained task execution.
//!
//! Tasks carry an estimated byte cost. They run in rounds: each round admits
//! the largest pending tasks that still fit into the free quota, runs them in
//! parallel and waits for all of them. The quota is the RAM limit minus the
//! resident set size measured when the executor is created.

use tracing::{trace, warn};

use crate::error::{QuantizationError, Result};
use crate::utils::Parallelism;

type Task<'a, T> = Box<dyn FnOnce() -> Result<T> + Send + 'a>;

/// Resident set size of this process, if the platform exposes it.
pub fn current_rss_bytes() -> Option<u64> {
    #[cfg(unix)]
    {
        let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
        // Safety: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return None;
        }
        Some(resident_pages.saturating_mul(page_size as u64))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Executor for independent tasks under a shared resource quota.
///
/// Results are returned in submission order.
pub struct ResourceConstrainedExecutor<'a, T> {
    resource: String,
    quota: u64,
    lenient: bool,
    tasks: Vec<(u64, Task<'a, T>)>,
}

impl<'a, T: Send> ResourceConstrainedExecutor<'a, T> {
    /// Executor limited to `limit` bytes of resident memory.
    ///
    /// In lenient mode a task larger than the free quota runs alone instead
    /// of failing.
    pub fn new(resource: impl Into<String>, limit: u64, lenient: bool) -> Self {
        let resource = resource.into();
        let rss = current_rss_bytes().unwrap_or(0);
        if rss > limit {
            warn!(
                resource = %resource,
                rss,
                limit,
                "current memory usage already exceeds the limit"
            );
        }
        Self::with_quota(resource, limit - rss.min(limit), lenient)
    }

    /// Executor with an explicit free quota.
    pub fn with_quota(resource: impl Into<String>, quota: u64, lenient: bool) -> Self {
        Self {
            resource: resource.into(),
            quota,
            lenient,
            tasks: Vec::new(),
        }
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queue a task with its estimated cost.
    pub fn add(&mut self, cost: u64, task: impl FnOnce() -> Result<T> + Send + 'a) {
        self.tasks.push((cost, Box::new(task)));
    }

    /// Run every queued task; stops at the first failing round.
    pub fn exec_tasks(self, parallelism: Parallelism) -> Result<Vec<T>> {
        let task_count = self.tasks.len();
        let mut pending: Vec<(u64, usize, Task<'a, T>)> = self
            .tasks
            .into_iter()
            .enumerate()
            .map(|(seq, (cost, task))| (cost, seq, task))
            .collect();
        // largest first, submission order among equal costs
        pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut results: Vec<Option<T>> =
            std::iter::repeat_with(|| None).take(task_count).collect();
        let mut round = 0usize;

        while !pending.is_empty() {
            let mut free = self.quota;
            let mut batch = Vec::new();
            let mut rest = Vec::with_capacity(pending.len());
            for (cost, seq, task) in pending {
                if cost <= free {
                    free -= cost;
                    batch.push((seq, task));
                } else {
                    rest.push((cost, seq, task));
                }
            }
            pending = rest;

            if batch.is_empty() {
                let (cost, seq, task) = pending.remove(0);
                if !self.lenient {
                    return Err(QuantizationError::Scheduler {
                        resource: self.resource,
                        required: cost,
                        available: self.quota,
                    });
                }
                warn!(
                    resource = %self.resource,
                    required = cost,
                    available = self.quota,
                    "task requires more than the available quota; running it alone"
                );
                batch.push((seq, task));
            }

            trace!(round, tasks = batch.len(), "executing scheduler round");
            let done = parallelism
                .maybe_par_try_map(batch, |(seq, task)| task().map(|result| (seq, result)))?;
            for (seq, result) in done {
                results[seq] = Some(result);
            }
            round += 1;
        }

        results
            .into_iter()
            .map(|result| {
                result.ok_or_else(|| {
                    QuantizationError::internal("scheduler task produced no result")
                })
            })
            .collect()
    }
}
