use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, mpsc};
use std::thread;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::LanguageModel;
use super::ngram_model::NGramModel;
use super::state::State;
use super::tokenizer::{BOS, TokenId, Tokenizer};
use crate::error::{Error, Result};
use crate::io::{build_output_path, read_lines};

/// Default highest n-gram order.
pub const DEFAULT_MAX_ORDER: usize = 4;

/// First bytes of every model cache.
const CACHE_MAGIC: [u8; 16] = *b"PROVERBS-NGRAM\x00\x01";

/// Counting tables shared by the full model and the partial models of parallel training.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct Tables {
	ngrams: HashMap<usize, NGramModel>,
	unigrams: State,
	sentences: HashSet<Vec<TokenId>>,
}

impl Tables {
	fn new(max_order: usize) -> Self {
		let mut ngrams = HashMap::new();
		for n in 2..=max_order {
			// n >= 2 here, cannot fail
			if let Ok(model) = NGramModel::new(n) {
				ngrams.insert(n, model);
			}
		}
		Self { ngrams, unigrams: State::new(&[]), sentences: HashSet::new() }
	}

	/// Counts one framed proverb (`<s> ... </s>`).
	fn add_sentence(&mut self, ids: &[TokenId]) {
		// Avoid duplicates
		if !self.sentences.insert(ids.to_vec()) {
			return;
		}
		for &id in ids.iter().filter(|id| **id != BOS) {
			self.unigrams.add_transition(id);
		}
		for model in self.ngrams.values_mut() {
			model.add_sequence(ids);
		}
	}

	fn merge(&mut self, other: &Self) -> std::result::Result<(), String> {
		for (k, t) in &other.ngrams {
			if let Some(existing) = self.ngrams.get_mut(k) {
				existing.merge(t)?;
			} else {
				self.ngrams.insert(*k, t.clone());
			}
		}
		self.unigrams.merge(&other.unigrams)?;
		self.sentences.extend(other.sentences.iter().cloned());
		Ok(())
	}
}

/// Word-level language model made of several n-gram orders.
///
/// The next-token distribution comes from the longest context the model has
/// seen (orders `max_order` down to 2), then from unigram frequencies.
/// Trained models are cached next to their corpus with `postcard`.
///
/// # Invariants
/// - `max_order >= 2`
/// - Every id stored in `tables` is known by `tokenizer`
#[derive(Serialize, Deserialize, Debug)]
pub struct MultiGramModel {
	name: String,
	max_order: usize,
	tokenizer: Tokenizer,
	tables: Tables,
}

impl MultiGramModel {
	/// Loads the model of a corpus from its binary cache if it is up to date,
	/// otherwise trains it from the corpus and writes the cache.
	///
	/// - `corpus` is a text file, one proverb per line
	/// - the cache is `<corpus stem>.bin` in the same folder
	pub fn new<P: AsRef<Path>>(corpus: P, max_order: usize) -> Result<Self> {
		let corpus = corpus.as_ref();
		let cache_path = build_output_path(corpus, "bin")?;

		if cache_is_fresh(corpus, &cache_path) {
			match Self::read_cache(&cache_path) {
				Ok(model) if model.max_order == max_order => {
					info!("loaded model {} from {}", model.name, cache_path.display());
					return Ok(model);
				}
				Ok(model) => debug!("cached model has order {}, retraining with {}", model.max_order, max_order),
				Err(e) => warn!("ignoring unreadable model cache {}: {e}", cache_path.display()),
			}
		}

		let model = Self::train_corpus(corpus, max_order)?;
		if let Err(e) = model.write_cache(&cache_path) {
			warn!("could not write model cache {}: {e}", cache_path.display());
		}
		Ok(model)
	}

	/// Trains the model of a corpus even if a cache exists, then rewrites the cache.
	///
	/// # Errors
	/// Unlike [`MultiGramModel::new`], failing to write the cache is an error,
	/// including `Error::ForeignCache` when the cache path holds another file.
	pub fn retrain<P: AsRef<Path>>(corpus: P, max_order: usize) -> Result<Self> {
		let corpus = corpus.as_ref();
		let cache_path = build_output_path(corpus, "bin")?;
		let model = Self::train_corpus(corpus, max_order)?;
		model.write_cache(&cache_path)?;
		info!("model cache written to {}", cache_path.display());
		Ok(model)
	}

	fn train_corpus(corpus: &Path, max_order: usize) -> Result<Self> {
		let lines = read_lines(corpus)?;
		let name = corpus.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
		Self::train(name, lines.as_slice(), max_order)
	}

	/// Trains a model from in-memory proverbs.
	///
	/// # Behavior
	/// - Builds the vocabulary sequentially
	/// - Splits lines into chunks (based on CPU cores * factor)
	/// - Spawns threads to count n-grams for each chunk, merges the partial tables
	///
	/// # Errors
	/// - `Error::InvalidConfig` if `max_order < 2`
	/// - `Error::Model` if the corpus has no non-blank line
	pub fn train<S: AsRef<str>>(name: impl Into<String>, lines: &[S], max_order: usize) -> Result<Self> {
		if max_order < 2 {
			return Err(Error::InvalidConfig(format!("max_order must be >= 2, got {max_order}")));
		}

		// Duplicates are dropped before chunking so each proverb is counted once
		let mut seen = HashSet::new();
		let sentences: Vec<String> = lines
			.iter()
			.map(|line| line.as_ref().trim().to_lowercase())
			.filter(|line| !line.is_empty() && seen.insert(line.clone()))
			.collect();
		if sentences.is_empty() {
			return Err(Error::model("cannot train on an empty corpus"));
		}

		let mut tokenizer = Tokenizer::new();
		for sentence in &sentences {
			tokenizer.learn(sentence);
		}
		let tokenizer = Arc::new(tokenizer);

		let cpus = num_cpus::get();
		let factor = 8;
		let chunks = cpus * factor;
		let chunk_size = sentences.len().div_ceil(chunks).max(1);

		let (tx, rx) = mpsc::channel();
		for chunk in sentences.chunks(chunk_size) {
			let tx = tx.clone();
			let chunk: Vec<String> = chunk.to_vec();
			let tokenizer = Arc::clone(&tokenizer);

			thread::spawn(move || {
				let mut partial = Tables::new(max_order);
				for sentence in chunk {
					partial.add_sentence(&tokenizer.encode_sentence(&sentence));
				}
				// The receiver only goes away if training already failed
				let _ = tx.send(partial);
			});
		}
		drop(tx);

		let mut tables = Tables::new(max_order);
		for partial in rx.iter() {
			tables.merge(&partial).map_err(Error::Model)?;
		}

		let tokenizer = Arc::try_unwrap(tokenizer).unwrap_or_else(|shared| (*shared).clone());
		let model = Self { name: name.into(), max_order, tokenizer, tables };
		info!(
			"trained model {} on {} proverbs, vocabulary of {} tokens",
			model.name,
			model.tables.sentences.len(),
			model.tokenizer.vocab_size()
		);
		Ok(model)
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn max_order(&self) -> usize {
		self.max_order
	}

	/// Number of distinct proverbs the model was trained on.
	pub fn sentence_count(&self) -> usize {
		self.tables.sentences.len()
	}

	/// Known states for `context`, longest order first, unigrams last.
	fn states<'a>(&'a self, context: &'a [TokenId]) -> impl Iterator<Item = &'a State> + 'a {
		(2..=self.max_order)
			.rev()
			.filter_map(move |n| self.tables.ngrams.get(&n).and_then(|model| model.state(context)))
			.chain(std::iter::once(&self.tables.unigrams).filter(|state| !state.is_empty()))
	}

	fn read_cache(path: &Path) -> Result<Self> {
		let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
		let payload = bytes
			.strip_prefix(&CACHE_MAGIC)
			.ok_or_else(|| Error::ForeignCache { path: path.to_owned() })?;
		Ok(postcard::from_bytes(payload)?)
	}

	/// Serializes the model with `postcard`, behind a header identifying model caches.
	///
	/// # Errors
	/// Returns `Error::ForeignCache` instead of overwriting an existing file
	/// that is not a model cache.
	pub fn write_cache(&self, path: &Path) -> Result<()> {
		if path.exists() && !has_cache_header(path) {
			return Err(Error::ForeignCache { path: path.to_owned() });
		}
		let mut bytes = CACHE_MAGIC.to_vec();
		bytes.extend(postcard::to_stdvec(self)?);
		fs::write(path, bytes).map_err(|e| Error::io(path, e))
	}
}

fn has_cache_header(path: &Path) -> bool {
	let mut header = [0u8; CACHE_MAGIC.len()];
	File::open(path).and_then(|mut file| file.read_exact(&mut header)).is_ok() && header == CACHE_MAGIC
}

/// The cache is usable if it exists and is not older than its corpus.
fn cache_is_fresh(corpus: &Path, cache: &Path) -> bool {
	let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
	match (modified(corpus), modified(cache)) {
		(Some(corpus), Some(cache)) => cache >= corpus,
		(None, Some(_)) => true,
		_ => false,
	}
}

impl LanguageModel for MultiGramModel {
	fn tokenizer(&self) -> &Tokenizer {
		&self.tokenizer
	}

	fn next_log_probs(&self, context: &[TokenId]) -> Vec<(TokenId, f32)> {
		self.states(context).next().map(State::log_probs).unwrap_or_default()
	}

	fn backoff_log_probs(&self, context: &[TokenId]) -> Vec<Vec<(TokenId, f32)>> {
		self.states(context).map(State::log_probs).collect()
	}

	fn is_known(&self, sentence: &[TokenId]) -> bool {
		self.tables.sentences.contains(sentence)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::tokenizer::EOS;

	fn corpus() -> Vec<&'static str> {
		vec![
			"kto rano wstaje, temu pan bóg daje.",
			"kto pyta, nie błądzi.",
			"kto pyta, nie błądzi.",
			"",
			"co nagle, to po diable.",
		]
	}

	#[test]
	fn training_skips_blanks_and_duplicates() {
		let model = MultiGramModel::train("pl", &corpus(), 3).unwrap();
		assert_eq!(model.sentence_count(), 3);
		let known = model.tokenizer().encode_sentence("kto pyta, nie błądzi.");
		assert!(model.is_known(&known));
	}

	#[test]
	fn longest_context_wins() {
		let model = MultiGramModel::train("pl", &corpus(), 3).unwrap();
		let tokenizer = model.tokenizer();
		let mut context = vec![BOS];
		context.extend(tokenizer.encode("kto pyta"));
		let probs = model.next_log_probs(&context);
		let comma = tokenizer.encode(",")[0];
		assert_eq!(probs.len(), 1);
		assert_eq!(probs[0].0, comma);
	}

	#[test]
	fn unknown_context_backs_off_to_unigrams() {
		let model = MultiGramModel::train("pl", &corpus(), 3).unwrap();
		let probs = model.next_log_probs(&[999, 998]);
		assert!(probs.iter().any(|(id, _)| *id == EOS));
		assert!(probs.iter().all(|(id, _)| *id != BOS));
		let total: f32 = probs.iter().map(|(_, lp)| lp.exp()).sum();
		assert!((total - 1.0).abs() < 1e-4);
	}

	#[test]
	fn empty_corpus_is_rejected() {
		assert!(matches!(MultiGramModel::train("x", &["", "  "], 3), Err(Error::Model(_))));
		assert!(matches!(MultiGramModel::train("x", &["a"], 1), Err(Error::InvalidConfig(_))));
	}

	#[test]
	fn model_is_cached_next_to_corpus() {
		let dir = tempfile::tempdir().unwrap();
		let corpus_path = dir.path().join("proverbs.txt");
		fs::write(&corpus_path, corpus().join("\n")).unwrap();

		let trained = MultiGramModel::new(&corpus_path, 3).unwrap();
		let cache = dir.path().join("proverbs.bin");
		assert!(cache.exists());

		let cached = MultiGramModel::new(&corpus_path, 3).unwrap();
		assert_eq!(cached.name(), "proverbs");
		assert_eq!(cached.sentence_count(), trained.sentence_count());
	}

	#[test]
	fn unrelated_file_at_cache_path_is_left_alone() {
		let dir = tempfile::tempdir().unwrap();
		let corpus_path = dir.path().join("notes.txt");
		let foreign = dir.path().join("notes.bin");
		fs::write(&corpus_path, corpus().join("\n")).unwrap();
		fs::write(&foreign, b"my own binary notes").unwrap();

		let model = MultiGramModel::new(&corpus_path, 3).unwrap();
		assert_eq!(model.sentence_count(), 3);
		assert_eq!(fs::read(&foreign).unwrap(), b"my own binary notes");

		let err = MultiGramModel::retrain(&corpus_path, 3).unwrap_err();
		assert!(matches!(err, Error::ForeignCache { .. }));
		assert_eq!(fs::read(&foreign).unwrap(), b"my own binary notes");
	}

	#[test]
	fn retrain_replaces_its_own_cache() {
		let dir = tempfile::tempdir().unwrap();
		let corpus_path = dir.path().join("proverbs.txt");
		fs::write(&corpus_path, "kto pyta, nie błądzi.\n").unwrap();
		MultiGramModel::new(&corpus_path, 3).unwrap();

		fs::write(&corpus_path, corpus().join("\n")).unwrap();
		let retrained = MultiGramModel::retrain(&corpus_path, 3).unwrap();
		assert_eq!(retrained.sentence_count(), 3);

		let cached = MultiGramModel::read_cache(&dir.path().join("proverbs.bin")).unwrap();
		assert_eq!(cached.sentence_count(), 3);
	}

	#[test]
	fn backoff_goes_from_longest_context_to_unigrams() {
		let model = MultiGramModel::train("pl", &corpus(), 3).unwrap();
		let tokenizer = model.tokenizer();
		let mut context = vec![BOS];
		context.extend(tokenizer.encode("kto pyta"));

		let distributions = model.backoff_log_probs(&context);
		// trigram (kto pyta), bigram (pyta), unigrams
		assert_eq!(distributions.len(), 3);
		assert_eq!(distributions[0], model.next_log_probs(&context));
		assert!(distributions[2].iter().any(|(id, _)| *id == EOS));
	}
}
