use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::state::State;
use super::tokenizer::TokenId;

/// Represents an n-gram model over token ids.
///
/// The `NGramModel` stores states for contexts of length `n-1`
/// and gives the distribution of the next token for a known context.
///
/// # Invariants
/// - `n` is always >= 2
/// - Each state in `states` corresponds to a unique context of length `n-1`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NGramModel {
	/// The order of the model (number of tokens in the n-gram)
	n: usize,

	/// Mapping from a context (length n-1) to its corresponding state
	states: HashMap<Vec<TokenId>, State>,
}

impl NGramModel {
	/// Creates a new n-gram model of order `n`.
	///
	/// # Errors
	/// Returns an error if `n < 2`.
	pub fn new(n: usize) -> Result<Self, String> {
		if n < 2 {
			return Err("n must be >= 2".to_owned());
		}
		Ok(Self { n, states: HashMap::new() })
	}

	pub fn order(&self) -> usize {
		self.n
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	/// Adds an encoded proverb to the model.
	///
	/// Sequences shorter than `n` produce no n-gram.
	pub fn add_sequence(&mut self, ids: &[TokenId]) {
		for window in ids.windows(self.n) {
			let (context, next) = window.split_at(self.n - 1);
			self.states
				.entry(context.to_vec())
				.or_insert_with(|| State::new(context))
				.add_transition(next[0]);
		}
	}

	/// State for the last `n-1` tokens of `context`.
	///
	/// Returns `None` if the context is too short or was never observed.
	pub fn state(&self, context: &[TokenId]) -> Option<&State> {
		let width = self.n - 1;
		if context.len() < width {
			return None;
		}
		self.states.get(&context[context.len() - width..]).filter(|state| !state.is_empty())
	}

	/// Merges another n-gram model into this one.
	///
	/// # Errors
	/// Returns an error if the model orders do not match.
	pub fn merge(&mut self, other: &Self) -> Result<(), String> {
		if self.n != other.n {
			return Err("N mismatch".to_owned());
		}

		for (key, state) in &other.states {
			if let Some(existing) = self.states.get_mut(key) {
				existing.merge(state)?;
			} else {
				self.states.insert(key.clone(), state.clone());
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn order_below_two_is_rejected() {
		assert!(NGramModel::new(1).is_err());
	}

	#[test]
	fn state_uses_trailing_context() {
		let mut model = NGramModel::new(3).unwrap();
		model.add_sequence(&[1, 5, 6, 7, 2]);
		let state = model.state(&[9, 9, 5, 6]).unwrap();
		assert_eq!(state.occurrences(7), 1);
		assert!(model.state(&[6]).is_none());
		assert!(model.state(&[8, 8]).is_none());
	}

	#[test]
	fn merge_sums_counts() {
		let mut a = NGramModel::new(2).unwrap();
		a.add_sequence(&[1, 4, 2]);
		let mut b = NGramModel::new(2).unwrap();
		b.add_sequence(&[1, 4, 4, 2]);
		a.merge(&b).unwrap();
		assert_eq!(a.state(&[1]).unwrap().occurrences(4), 2);
		assert_eq!(a.state(&[4]).unwrap().occurrences(4), 1);
		assert!(a.merge(&NGramModel::new(3).unwrap()).is_err());
	}
}
