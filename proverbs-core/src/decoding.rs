//! Beam search decoding over a [`LanguageModel`].

use std::collections::HashSet;
use std::ops::ControlFlow;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::LanguageModel;
use crate::model::tokenizer::{BOS, EOS, TokenId, Tokenizer};

/// Decoding parameters.
///
/// Defaults are the fixed parameter set of the proverb generator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
	/// Maximum number of tokens, prompt included.
	pub max_length: usize,
	pub num_beams: usize,
	/// Size of the n-grams that may not appear twice (0 disables the check).
	pub no_repeat_ngram_size: usize,
	/// Keep only the `top_k` most likely tokens (0 disables the filter).
	pub top_k: usize,
	/// Nucleus filter: keep the smallest set of tokens whose mass reaches `top_p`.
	pub top_p: f32,
	pub temperature: f32,
	/// Sample beam candidates instead of taking the most likely ones.
	pub do_sample: bool,
	/// Decoding steps between two progress reports.
	pub chunk_size: usize,
	/// Prefer hypotheses that are not copies of a training proverb.
	pub avoid_existing: bool,
	/// Fixed RNG seed, random when absent.
	pub seed: Option<u64>,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			max_length: 1000,
			num_beams: 5,
			no_repeat_ngram_size: 2,
			top_k: 50,
			top_p: 0.95,
			temperature: 0.7,
			do_sample: true,
			chunk_size: 50,
			avoid_existing: true,
			seed: None,
		}
	}
}

impl GenerationConfig {
	/// # Errors
	/// Returns `Error::InvalidConfig` for out-of-range values.
	pub fn validate(&self) -> Result<()> {
		let invalid = |message: &str| Err(Error::InvalidConfig(message.to_owned()));
		if self.max_length == 0 {
			return invalid("max_length must be > 0");
		}
		if self.num_beams == 0 {
			return invalid("num_beams must be > 0");
		}
		if self.chunk_size == 0 {
			return invalid("chunk_size must be > 0");
		}
		if !(self.temperature > 0.0) {
			return invalid("temperature must be > 0");
		}
		if !(self.top_p > 0.0 && self.top_p <= 1.0) {
			return invalid("top_p must be in (0, 1]");
		}
		Ok(())
	}
}

/// Progress of a running generation, in decoding steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
	pub step: usize,
	pub total: usize,
}

impl Progress {
	pub fn fraction(&self) -> f32 {
		if self.total == 0 { 1.0 } else { self.step as f32 / self.total as f32 }
	}
}

/// Result of a generation request.
#[derive(Clone, Debug, PartialEq)]
pub struct Generation {
	/// Prompt the model was fed.
	pub prompt: String,
	/// Generated continuation only.
	pub text: String,
	/// Number of generated tokens.
	pub tokens: usize,
	/// Length-normalised log-probability of the chosen hypothesis.
	pub score: f32,
	/// Whether the hypothesis ended with `</s>` rather than hitting a limit.
	pub finished: bool,
}

#[derive(Clone, Debug)]
struct Hypothesis {
	tokens: Vec<TokenId>,
	score: f32,
}

impl Hypothesis {
	fn normalized_score(&self) -> f32 {
		// Length penalty 1.0, the end token counts
		self.score / (self.tokens.len() + 1) as f32
	}
}

/// Incremental beam search.
///
/// Beams survive between calls to [`BeamSearch::advance`], so decoding can be
/// cut into chunks.
pub struct BeamSearch<'a, M: LanguageModel + ?Sized> {
	model: &'a M,
	config: &'a GenerationConfig,
	prompt: Vec<TokenId>,
	beams: Vec<Hypothesis>,
	/// Hypotheses that ended with `</s>`.
	completed: Vec<Hypothesis>,
	/// Beams left without any allowed token, kept only as a last resort.
	stalled: Vec<Hypothesis>,
	step: usize,
	max_steps: usize,
	rng: StdRng,
}

impl<'a, M: LanguageModel + ?Sized> BeamSearch<'a, M> {
	/// # Errors
	/// - `Error::InvalidConfig` if the configuration does not validate
	/// - `Error::PromptTooLong` if `prompt` already reaches `max_length`
	pub fn new(model: &'a M, config: &'a GenerationConfig, prompt: Vec<TokenId>) -> Result<Self> {
		config.validate()?;
		if prompt.len() >= config.max_length {
			return Err(Error::PromptTooLong { length: prompt.len(), max_length: config.max_length });
		}
		let rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::seed_from_u64(rand::random()),
		};
		Ok(Self {
			model,
			config,
			max_steps: config.max_length - prompt.len(),
			prompt,
			beams: vec![Hypothesis { tokens: Vec::new(), score: 0.0 }],
			completed: Vec::new(),
			stalled: Vec::new(),
			step: 0,
			rng,
		})
	}

	pub fn progress(&self) -> Progress {
		Progress { step: self.step, total: self.max_steps }
	}

	pub fn is_done(&self) -> bool {
		self.beams.is_empty() || self.step >= self.max_steps || self.completed.len() >= self.config.num_beams
	}

	/// Runs up to `steps` decoding steps; returns `true` while more work remains.
	pub fn advance(&mut self, steps: usize) -> bool {
		for _ in 0..steps {
			if self.is_done() {
				break;
			}
			self.step();
		}
		!self.is_done()
	}

	fn step(&mut self) {
		let num_beams = self.config.num_beams;
		let mut candidates: Vec<(Hypothesis, bool)> = Vec::new();
		let beams = std::mem::take(&mut self.beams);

		for beam in beams {
			let mut context = Vec::with_capacity(self.prompt.len() + beam.tokens.len());
			context.extend_from_slice(&self.prompt);
			context.extend_from_slice(&beam.tokens);

			// The longest context whose distribution survives the ban wins
			let banned = banned_tokens(&context, self.config.no_repeat_ngram_size);
			let scores = self
				.model
				.backoff_log_probs(&context)
				.into_iter()
				.map(|distribution| {
					distribution
						.into_iter()
						.filter(|(id, lp)| *id != BOS && lp.is_finite() && !banned.contains(id))
						.collect::<Vec<_>>()
				})
				.find(|distribution| !distribution.is_empty());

			let Some(scores) = scores else {
				self.stalled.push(beam);
				continue;
			};

			let picked = if self.config.do_sample {
				sample_candidates(filter_distribution(scores, self.config), num_beams, &mut self.rng)
			} else {
				best_candidates(scores, num_beams)
			};

			for (id, lp) in picked {
				let mut tokens = beam.tokens.clone();
				let finished = id == EOS;
				if !finished {
					tokens.push(id);
				}
				candidates.push((Hypothesis { tokens, score: beam.score + lp }, finished));
			}
		}

		candidates.sort_by(|a, b| b.0.score.total_cmp(&a.0.score));
		for (hypothesis, finished) in candidates {
			if finished {
				self.completed.push(hypothesis);
			} else if self.beams.len() < num_beams {
				self.beams.push(hypothesis);
			}
		}
		self.step += 1;
	}

	/// Best hypothesis so far, and whether it ended with `</s>`.
	///
	/// Hypotheses ended by `</s>` win over live beams, which win over stalled
	/// ones. With `avoid_existing`, copies of training proverbs are only used
	/// when nothing else exists in the pool.
	pub fn best(&self) -> Option<(Vec<TokenId>, f32, bool)> {
		let (mut ranked, finished) = [(&self.completed, true), (&self.beams, false), (&self.stalled, false)]
			.into_iter()
			.map(|(pool, finished)| (pool.iter().filter(|h| !h.tokens.is_empty()).collect::<Vec<_>>(), finished))
			.find(|(ranked, _)| !ranked.is_empty())?;
		ranked.sort_by(|a, b| b.normalized_score().total_cmp(&a.normalized_score()));

		let known = |h: &Hypothesis| {
			let mut framed = Vec::with_capacity(h.tokens.len() + 2);
			framed.push(BOS);
			framed.extend_from_slice(&h.tokens);
			framed.push(EOS);
			self.model.is_known(&framed)
		};

		let chosen = if self.config.avoid_existing {
			ranked.iter().find(|h| !known(**h)).or(ranked.first())
		} else {
			ranked.first()
		};
		chosen.map(|h| (h.tokens.clone(), h.normalized_score(), finished))
	}
}

/// Tokens that would complete an n-gram already present in `context`.
///
/// N-grams touching `<s>`/`</s>` are not tracked, so proverb boundaries stay free.
fn banned_tokens(context: &[TokenId], size: usize) -> HashSet<TokenId> {
	let mut banned = HashSet::new();
	if size == 0 || context.len() < size {
		return banned;
	}
	let prefix = &context[context.len() - (size - 1)..];
	if prefix.iter().any(|id| Tokenizer::is_special(*id)) {
		return banned;
	}
	for window in context.windows(size) {
		let (head, last) = window.split_at(size - 1);
		if head == prefix && !Tokenizer::is_special(last[0]) {
			banned.insert(last[0]);
		}
	}
	banned
}

/// Applies temperature, top-k and top-p; returns renormalised probabilities.
fn filter_distribution(mut scores: Vec<(TokenId, f32)>, config: &GenerationConfig) -> Vec<(TokenId, f32)> {
	scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
	if config.top_k > 0 {
		scores.truncate(config.top_k);
	}

	// Softmax of log-probabilities scaled by temperature
	let max = scores.first().map(|(_, lp)| lp / config.temperature).unwrap_or(0.0);
	let mut probs: Vec<(TokenId, f32)> = scores
		.into_iter()
		.map(|(id, lp)| (id, (lp / config.temperature - max).exp()))
		.collect();
	let sum: f32 = probs.iter().map(|(_, p)| p).sum();
	for (_, p) in probs.iter_mut() {
		*p /= sum;
	}

	let mut cumulative = 0.0f32;
	let mut keep = probs.len();
	for (i, (_, p)) in probs.iter().enumerate() {
		cumulative += *p;
		if cumulative >= config.top_p {
			keep = i + 1;
			break;
		}
	}
	probs.truncate(keep.max(1));

	let sum: f32 = probs.iter().map(|(_, p)| p).sum();
	probs.into_iter().map(|(id, p)| (id, p / sum)).collect()
}

/// Draws up to `count` distinct tokens; scores are log-probabilities of the filtered distribution.
fn sample_candidates(mut probs: Vec<(TokenId, f32)>, count: usize, rng: &mut StdRng) -> Vec<(TokenId, f32)> {
	let mut picked = Vec::with_capacity(count.min(probs.len()));
	while picked.len() < count && !probs.is_empty() {
		let total: f32 = probs.iter().map(|(_, p)| p).sum();
		let mut r = rng.random::<f32>() * total;
		let mut index = probs.len() - 1;
		for (i, (_, p)) in probs.iter().enumerate() {
			if r < *p {
				index = i;
				break;
			}
			r -= p;
		}
		let (id, p) = probs.swap_remove(index);
		picked.push((id, p.ln()));
	}
	picked
}

fn best_candidates(mut scores: Vec<(TokenId, f32)>, count: usize) -> Vec<(TokenId, f32)> {
	scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
	scores.truncate(count);
	scores
}

/// Generates proverbs from a prompt with a fixed decoding configuration.
pub struct Generator<'a, M: LanguageModel + ?Sized> {
	model: &'a M,
	config: GenerationConfig,
}

impl<'a, M: LanguageModel + ?Sized> Generator<'a, M> {
	pub fn new(model: &'a M, config: GenerationConfig) -> Self {
		Self { model, config }
	}

	pub fn config(&self) -> &GenerationConfig {
		&self.config
	}

	/// Encodes a prompt: one framed proverb per line, then `<s>` to open the new one.
	pub fn encode_prompt(&self, prompt: &str) -> Vec<TokenId> {
		let tokenizer = self.model.tokenizer();
		let mut ids: Vec<TokenId> = prompt
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.flat_map(|line| tokenizer.encode_sentence(&line.to_lowercase()))
			.collect();
		ids.push(BOS);
		ids
	}

	/// Generates without progress reports.
	pub fn generate(&self, prompt: &str) -> Result<Generation> {
		self.generate_with(prompt, |_| ControlFlow::Continue(()))?
			.ok_or_else(|| Error::model("generation stopped"))
	}

	/// Generates in chunks of `chunk_size` steps, calling `on_chunk` after each one.
	///
	/// Returns `Ok(None)` if `on_chunk` breaks.
	///
	/// # Errors
	/// - `Error::PromptTooLong`, `Error::InvalidConfig` from [`BeamSearch::new`]
	/// - `Error::Model` if the model produced no token at all
	pub fn generate_with<F>(&self, prompt: &str, mut on_chunk: F) -> Result<Option<Generation>>
	where
		F: FnMut(Progress) -> ControlFlow<()>,
	{
		let ids = self.encode_prompt(prompt);
		let mut search = BeamSearch::new(self.model, &self.config, ids)?;

		while search.advance(self.config.chunk_size) {
			debug!("decoded {}/{} steps", search.progress().step, search.progress().total);
			if on_chunk(search.progress()).is_break() {
				return Ok(None);
			}
		}

		let (tokens, score, finished) = search.best().ok_or_else(|| Error::model("the model produced no token"))?;
		if !finished {
			debug!("no hypothesis reached </s>, keeping an unfinished one");
		}
		let text = self.model.tokenizer().decode(&tokens, true);
		Ok(Some(Generation { prompt: prompt.to_owned(), text, tokens: tokens.len(), score, finished }))
	}
}
