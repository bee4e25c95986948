use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::tokenizer::TokenId;

/// Represents a state in an n-gram model.
///
/// A `State` corresponds to a fixed (n-1)-token context (`key`) and stores
/// all observed transitions from this context to the next token.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by their number of observations.
///
/// ## Invariants
/// - All transitions belong to the same `key`
/// - Each transition occurrence count is strictly positive
/// - `total` is the sum of all occurrence counts
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct State {
	/// Context of the state (n-1 tokens, empty for the unigram state).
	key: Vec<TokenId>,
	/// Outgoing transitions indexed by the next token.
	transitions: HashMap<TokenId, usize>,
	total: usize,
}

impl State {
	/// Creates a new empty state for the given context.
	pub fn new(key: &[TokenId]) -> Self {
		Self {
			key: key.to_vec(),
			transitions: HashMap::new(),
			total: 0,
		}
	}

	/// Records an occurrence of a transition toward `next`.
	pub fn add_transition(&mut self, next: TokenId) {
		*self.transitions.entry(next).or_insert(0) += 1;
		self.total += 1;
	}

	pub fn is_empty(&self) -> bool {
		self.total == 0
	}

	/// How many times `next` followed this context.
	pub fn occurrences(&self, next: TokenId) -> usize {
		self.transitions.get(&next).copied().unwrap_or(0)
	}

	/// Maximum-likelihood log-probabilities of every observed next token.
	///
	/// Returns an empty vector if the state has no transitions.
	pub fn log_probs(&self) -> Vec<(TokenId, f32)> {
		if self.total == 0 {
			return Vec::new();
		}
		let total = self.total as f32;
		self.transitions
			.iter()
			.map(|(next, occurrence)| (*next, (*occurrence as f32 / total).ln()))
			.collect()
	}

	/// Merges another state into this one.
	///
	/// Both states must represent the same context (`key`).
	/// Transition occurrence counts are summed.
	///
	/// # Errors
	/// Returns an error if the state keys do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.key != other.key {
			return Err("Key mismatch".to_owned());
		}

		for (next, occurrence) in &other.transitions {
			*self.transitions.entry(*next).or_insert(0) += *occurrence;
		}
		self.total += other.total;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_probs_follow_counts() {
		let mut state = State::new(&[7]);
		state.add_transition(1);
		state.add_transition(1);
		state.add_transition(2);
		let mut probs = state.log_probs();
		probs.sort_by_key(|(id, _)| *id);
		assert!((probs[0].1.exp() - 2.0 / 3.0).abs() < 1e-6);
		assert!((probs[1].1.exp() - 1.0 / 3.0).abs() < 1e-6);
	}

	#[test]
	fn merge_requires_same_key() {
		let mut a = State::new(&[1]);
		a.add_transition(3);
		let mut b = State::new(&[1]);
		b.add_transition(3);
		a.merge(&b).unwrap();
		assert_eq!(a.occurrences(3), 2);
		assert!(a.merge(&State::new(&[2])).is_err());
	}
}
