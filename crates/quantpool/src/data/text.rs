//! Text features are not quantized: they are tokenized and digitized by an
//! external dictionary and passed through as token id sequences.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::utils::Parallelism;

/// Converts one text value into token ids.
///
/// Dictionary building lives outside this crate; implementations only look
/// tokens up.
pub trait TextDigitizer: Send + Sync + Debug {
    fn digitize(&self, text: &str) -> Vec<u32>;
}

/// Whitespace tokenizer over a fixed dictionary. Unknown tokens are skipped.
#[derive(Clone, Debug, Default)]
pub struct DictionaryDigitizer {
    token_ids: HashMap<String, u32>,
    lowercase: bool,
}

impl DictionaryDigitizer {
    /// Dictionary assigning ids in the order of `tokens`.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut token_ids = HashMap::new();
        for token in tokens {
            let next_id = token_ids.len() as u32;
            token_ids.entry(token.into()).or_insert(next_id);
        }
        Self {
            token_ids,
            lowercase: false,
        }
    }

    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

impl TextDigitizer for DictionaryDigitizer {
    fn digitize(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .filter_map(|token| {
                if self.lowercase {
                    self.token_ids.get(&token.to_lowercase()).copied()
                } else {
                    self.token_ids.get(token).copied()
                }
            })
            .collect()
    }
}

/// Digitized text column: one token id sequence per object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenizedTextColumn {
    pub tokens: Vec<Vec<u32>>,
}

impl TokenizedTextColumn {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Digitize every value of a text column.
pub fn digitize_column(
    texts: &[String],
    digitizer: &dyn TextDigitizer,
    parallelism: Parallelism,
) -> TokenizedTextColumn {
    TokenizedTextColumn {
        tokens: parallelism.maybe_par_map(texts, |text| digitizer.digitize(text)),
    }
}
