use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;

use crate::collection::ProverbCollection;
use crate::decoding::Progress;
use crate::error::{Error, Result};
use crate::io::write_text;
use crate::selection::Selection;

/// What the front-end should currently tell the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Status {
	#[default]
	Idle,
	NoDatabase,
	DatabaseSelected(PathBuf),
	LoadFailed(String),
	Matches(Vec<String>),
	NoMatches,
	NothingSelected,
	Generating(Progress),
	Generated,
	GenerationFailed(String),
	Cancelled,
	Saved(PathBuf),
	SaveFailed(String),
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Idle => write!(f, "Select a database file to start."),
			Self::NoDatabase => write!(f, "Please select a database file."),
			Self::DatabaseSelected(path) => write!(f, "Database selected: {}", path.display()),
			Self::LoadFailed(cause) => write!(f, "Error loading database: {cause}"),
			Self::Matches(results) => {
				write!(f, "Matching proverbs:")?;
				for (i, proverb) in results.iter().enumerate() {
					write!(f, "\n{}. {}", i + 1, proverb)?;
				}
				Ok(())
			}
			Self::NoMatches => write!(f, "No matching proverbs found."),
			Self::NothingSelected => write!(f, "Select at least one proverb."),
			Self::Generating(progress) => write!(f, "Generating... {:.0}%", progress.fraction() * 100.0),
			Self::Generated => write!(f, "Proverb generated."),
			Self::GenerationFailed(cause) => write!(f, "Generation failed: {cause}"),
			Self::Cancelled => write!(f, "Generation cancelled."),
			Self::Saved(path) => write!(f, "Saved to {}", path.display()),
			Self::SaveFailed(cause) => write!(f, "Error saving file: {cause}"),
		}
	}
}

/// State behind the proverb window, independent of any UI toolkit.
///
/// # Invariants
/// - `collection` is `None` until a file loads successfully
/// - `checked.len() == results.len()`
#[derive(Debug, Default)]
pub struct Session {
	collection: Option<ProverbCollection>,
	results: Vec<String>,
	checked: Vec<bool>,
	generated: Option<String>,
	status: Status,
}

impl Session {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn status(&self) -> &Status {
		&self.status
	}

	pub fn set_status(&mut self, status: Status) {
		self.status = status;
	}

	pub fn collection(&self) -> Option<&ProverbCollection> {
		self.collection.as_ref()
	}

	/// Loads a database file, replacing the current one on success.
	///
	/// On failure the previous database stays loaded.
	pub fn load_database<P: AsRef<Path>>(&mut self, path: P) -> Result<&ProverbCollection> {
		let path = path.as_ref();
		match ProverbCollection::load(path) {
			Ok(collection) => {
				self.results.clear();
				self.checked.clear();
				self.set_status(Status::DatabaseSelected(path.to_owned()));
				Ok(self.collection.insert(collection))
			}
			Err(e) => {
				warn!("error loading database {}: {e}", path.display());
				self.set_status(Status::LoadFailed(e.to_string()));
				Err(e)
			}
		}
	}

	/// Searches the loaded database and resets the checkboxes.
	///
	/// A missing or empty database yields `Status::NoDatabase`.
	pub fn search(&mut self, query: &str) -> &Status {
		self.results.clear();
		self.checked.clear();

		let status = match self.collection.as_ref().filter(|c| !c.is_empty()) {
			None => Status::NoDatabase,
			Some(collection) => {
				self.results = collection.search(query);
				self.checked = vec![false; self.results.len()];
				if self.results.is_empty() { Status::NoMatches } else { Status::Matches(self.results.clone()) }
			}
		};
		self.set_status(status);
		self.status()
	}

	pub fn results(&self) -> &[String] {
		&self.results
	}

	pub fn is_checked(&self, index: usize) -> bool {
		self.checked.get(index).copied().unwrap_or(false)
	}

	/// Checks or unchecks a result; out-of-range indices are ignored.
	pub fn set_checked(&mut self, index: usize, checked: bool) {
		if let Some(flag) = self.checked.get_mut(index) {
			*flag = checked;
		}
	}

	pub fn toggle(&mut self, index: usize) {
		let checked = self.is_checked(index);
		self.set_checked(index, !checked);
	}

	/// Proverbs checked right now.
	pub fn selection(&self) -> Selection {
		Selection::from_checked(&self.results, &self.checked)
	}

	/// Whether "Generate" makes sense: a database, results, and something checked.
	pub fn can_generate(&self) -> bool {
		self.collection.is_some() && self.checked.iter().any(|c| *c)
	}

	/// Prompt for the checked proverbs.
	///
	/// # Errors
	/// - `Error::NoDatabase` if nothing is loaded
	/// - `Error::EmptySelection` if no result is checked
	pub fn prompt(&mut self) -> Result<String> {
		if self.collection.is_none() {
			self.set_status(Status::NoDatabase);
			return Err(Error::NoDatabase);
		}
		self.selection().prompt().inspect_err(|_| self.set_status(Status::NothingSelected))
	}

	pub fn generated(&self) -> Option<&str> {
		self.generated.as_deref()
	}

	pub fn set_generated(&mut self, text: String) {
		self.generated = Some(text);
		self.set_status(Status::Generated);
	}

	/// Writes the generated text verbatim to `path`.
	///
	/// # Errors
	/// - `Error::NothingToSave` if nothing was generated yet
	/// - `Error::Io` if the file cannot be written
	pub fn save_generated<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
		let path = path.as_ref();
		let Some(text) = self.generated.as_deref() else {
			self.set_status(Status::SaveFailed(Error::NothingToSave.to_string()));
			return Err(Error::NothingToSave);
		};
		match write_text(path, text) {
			Ok(()) => {
				self.set_status(Status::Saved(path.to_owned()));
				Ok(())
			}
			Err(e) => {
				self.set_status(Status::SaveFailed(e.to_string()));
				Err(e)
			}
		}
	}
}
