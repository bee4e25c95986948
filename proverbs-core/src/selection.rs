use crate::error::{Error, Result};

/// Proverbs picked by the user at the moment generation is requested.
///
/// Order follows the result list; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
	proverbs: Vec<String>,
}

impl Selection {
	/// Builds a selection from the checked entries of a result list.
	///
	/// `checked[i]` tells whether `results[i]` is selected; missing flags count as unchecked.
	pub fn from_checked<S: AsRef<str>>(results: &[S], checked: &[bool]) -> Self {
		let mut selection = Self::default();
		for (result, _) in results.iter().zip(checked).filter(|(_, c)| **c) {
			selection.push(result.as_ref());
		}
		selection
	}

	pub fn push(&mut self, proverb: &str) {
		let proverb = proverb.trim();
		if !proverb.is_empty() && !self.proverbs.iter().any(|p| p == proverb) {
			self.proverbs.push(proverb.to_owned());
		}
	}

	pub fn is_empty(&self) -> bool {
		self.proverbs.is_empty()
	}

	pub fn len(&self) -> usize {
		self.proverbs.len()
	}

	pub fn proverbs(&self) -> &[String] {
		&self.proverbs
	}

	/// Joins the selected proverbs with newlines.
	///
	/// # Errors
	/// Returns `Error::EmptySelection` if nothing is selected.
	pub fn prompt(&self) -> Result<String> {
		if self.is_empty() {
			return Err(Error::EmptySelection);
		}
		Ok(self.proverbs.join("\n"))
	}
}

impl<S: AsRef<str>> FromIterator<S> for Selection {
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		let mut selection = Self::default();
		for proverb in iter {
			selection.push(proverb.as_ref());
		}
		selection
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prompt_joins_checked_results() {
		let results = ["first", "second", "third"];
		let selection = Selection::from_checked(&results, &[true, false, true]);
		assert_eq!(selection.prompt().unwrap(), "first\nthird");
	}

	#[test]
	fn empty_selection_is_rejected() {
		let selection = Selection::from_checked(&["only"], &[false]);
		assert!(matches!(selection.prompt(), Err(Error::EmptySelection)));
	}

	#[test]
	fn duplicates_and_blanks_are_ignored() {
		let selection: Selection = ["a", " a ", "", "b"].into_iter().collect();
		assert_eq!(selection.proverbs(), &["a", "b"]);
	}
}
