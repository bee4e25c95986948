use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::Result;
use crate::io::read_lines;

/// Maximum number of results returned by a search.
pub const MAX_RESULTS: usize = 10;

/// In-memory proverb database loaded from a text file.
///
/// One proverb per line. Every line is lower-cased on load and keeps its
/// line terminator, so `contents()` gives back the original file modulo case.
///
/// # Invariants
/// - The collection is replaced wholesale on each load, never patched
#[derive(Debug, Clone)]
pub struct ProverbCollection {
	source: PathBuf,
	lines: Vec<String>,
}

impl ProverbCollection {
	/// Loads and lower-cases every line of `path`.
	///
	/// # Errors
	/// - `Error::Io` if the file cannot be read
	/// - `Error::Decode` if the file is not UTF-8
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let lines = read_lines(path)?.iter().map(|line| line.to_lowercase()).collect::<Vec<_>>();
		info!("loaded {} proverbs from {}", lines.len(), path.display());
		Ok(Self { source: path.to_owned(), lines })
	}

	/// Builds a collection from already available lines (lower-cased here).
	pub fn from_lines<I, S>(source: impl Into<PathBuf>, lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self {
			source: source.into(),
			lines: lines.into_iter().map(|l| l.as_ref().to_lowercase()).collect(),
		}
	}

	pub fn source(&self) -> &Path {
		&self.source
	}

	pub fn lines(&self) -> &[String] {
		&self.lines
	}

	pub fn len(&self) -> usize {
		self.lines.len()
	}

	pub fn is_empty(&self) -> bool {
		self.lines.is_empty()
	}

	/// Whole collection as text, line terminators included.
	pub fn contents(&self) -> String {
		self.lines.concat()
	}

	/// Case-insensitive substring search, see [`search`].
	pub fn search(&self, query: &str) -> Vec<String> {
		search(query, &self.lines)
	}
}

/// Returns at most [`MAX_RESULTS`] distinct lines containing `query`.
///
/// - The query is lower-cased, lines are expected to be already
/// - Line terminators are stripped from the results
/// - Results keep the order of first occurrence
/// - An empty query matches every line
pub fn search<S: AsRef<str>>(query: &str, lines: &[S]) -> Vec<String> {
	let query = query.to_lowercase();
	let mut seen = HashSet::new();

	let results: Vec<String> = lines
		.iter()
		.map(|line| line.as_ref().trim_end_matches(['\n', '\r']))
		.filter(|line| line.contains(query.as_str()))
		.filter(|line| seen.insert(*line))
		.take(MAX_RESULTS)
		.map(str::to_owned)
		.collect();

	debug!("search {:?}: {} result(s)", query, results.len());
	results
}
