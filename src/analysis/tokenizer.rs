use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use stop_words::{get, LANGUAGE};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::AnalysisConfig;

/// One token with its position and byte offsets in the source text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub position: u32,
    pub start: u32,
    pub end: u32,
}

/// Text tokenizer with optional stemming and stopword removal
pub struct Tokenizer {
    config: AnalysisConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Create a new tokenizer from configuration
    pub fn new(config: &AnalysisConfig) -> Self {
        let stemmer = if config.stem {
            Some(Stemmer::create(algorithm_for(&config.language)))
        } else {
            None
        };

        let stopwords = if config.remove_stopwords {
            get(LANGUAGE::English)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect()
        } else {
            HashSet::new()
        };

        Self {
            config: config.clone(),
            stemmer,
            stopwords,
        }
    }

    /// Tokenize text into terms, dropping positions
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokens(text).into_iter().map(|t| t.term).collect()
    }

    /// Tokenize and keep positions and byte offsets.
    ///
    /// Filtered words (stopwords, out-of-range lengths) still consume a
    /// position so phrase distances stay faithful to the source text.
    pub fn tokens(&self, text: &str) -> Vec<Token> {
        let mut out = Vec::new();
        let mut pos = 0u32;

        for (start, word) in text.unicode_word_indices() {
            let position = pos;
            pos += 1;

            let mut term = if self.config.lowercase {
                word.to_lowercase()
            } else {
                word.to_string()
            };

            let len = term.chars().count();
            if len < self.config.min_token_length || len > self.config.max_token_length {
                continue;
            }
            if self.stopwords.contains(&term) {
                continue;
            }
            if let Some(stemmer) = &self.stemmer {
                term = stemmer.stem(&term).to_string();
            }

            out.push(Token {
                term,
                position,
                start: start as u32,
                end: (start + word.len()) as u32,
            });
        }

        out
    }
}

fn algorithm_for(language: &str) -> Algorithm {
    match language {
        "french" => Algorithm::French,
        "german" => Algorithm::German,
        "spanish" => Algorithm::Spanish,
        "italian" => Algorithm::Italian,
        "portuguese" => Algorithm::Portuguese,
        "dutch" => Algorithm::Dutch,
        _ => Algorithm::English,
    }
}
