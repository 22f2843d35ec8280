//! Document analysis: tokenization, per-field term frequencies and the
//! worker pool batches are analyzed on.

mod analyzer;
mod queue;
mod tokenizer;

pub use analyzer::{Analyzer, StandardAnalyzer};
pub use queue::AnalysisQueue;
pub use tokenizer::{Token, Tokenizer};
