//! Language models used to generate proverbs.
//!
//! - Word-level tokenizer (`Tokenizer`)
//! - Fixed-order n-gram tables (`NGramModel`) and their states (`State`)
//! - The trained multi-order model (`MultiGramModel`)
//! - The `LanguageModel` boundary seen by the decoder

use self::tokenizer::{TokenId, Tokenizer};

/// Multi-order n-gram model, trained from a corpus and cached on disk.
pub mod multigram_model;

/// Fixed-order n-gram model (`n >= 2`).
pub mod ngram_model;

/// Internal representation of a single n-gram state (context).
mod state;

/// Word-level tokenizer and special token ids.
pub mod tokenizer;

/// A pretrained causal language model.
///
/// The decoder only sees next-token distributions; how they are computed
/// is up to the implementation.
pub trait LanguageModel: Send + Sync {
	/// Tokenizer matching the ids produced by the model.
	fn tokenizer(&self) -> &Tokenizer;

	/// Log-probabilities of the tokens that may follow `context`.
	///
	/// An empty result means the model cannot continue.
	fn next_log_probs(&self, context: &[TokenId]) -> Vec<(TokenId, f32)>;

	/// Distributions for `context` from the most to the least specific one.
	///
	/// The decoder falls back on the next one when filtering empties a distribution.
	fn backoff_log_probs(&self, context: &[TokenId]) -> Vec<Vec<(TokenId, f32)>> {
		vec![self.next_log_probs(context)]
	}

	/// Whether `sentence` (framed with `<s>`/`</s>`) appears verbatim in the training data.
	fn is_known(&self, _sentence: &[TokenId]) -> bool {
		false
	}
}
