use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::decoding::{GenerationConfig, Generation, Generator, Progress};
use crate::error::Error;
use crate::model::LanguageModel;
use crate::model::multigram_model::MultiGramModel;

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

/// Where the worker gets its model from.
#[derive(Clone)]
pub enum ModelSource {
	/// A model already in memory.
	Loaded(Arc<dyn LanguageModel>),
	/// A corpus to load (or train) on the worker thread.
	Corpus { path: PathBuf, max_order: usize },
}

/// Messages sent by a running generation.
pub enum GenerationEvent {
	/// The model was loaded from its corpus; keep it to skip loading next time.
	ModelLoaded(Arc<dyn LanguageModel>),
	Progress(Progress),
	Finished(Generation),
	Failed(Error),
	Cancelled,
}

impl GenerationEvent {
	/// Whether no event follows this one.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Finished(_) | Self::Failed(_) | Self::Cancelled)
	}
}

type Notify = Arc<dyn Fn() + Send + Sync>;

/// Runs generation on a background thread.
///
/// The caller polls the returned [`GenerationHandle`]; nothing blocks the caller's thread.
pub struct GenerationWorker {
	source: ModelSource,
	config: GenerationConfig,
	notify: Option<Notify>,
}

impl GenerationWorker {
	pub fn new(source: ModelSource, config: GenerationConfig) -> Self {
		Self { source, config, notify: None }
	}

	/// Called after every event is sent (ex. to wake up a UI).
	pub fn on_event<F: Fn() + Send + Sync + 'static>(mut self, notify: F) -> Self {
		self.notify = Some(Arc::new(notify));
		self
	}

	pub fn spawn(self, prompt: String) -> GenerationHandle {
		let (tx, rx) = mpsc::channel();
		let cancel = CancelToken::new();
		let token = cancel.clone();

		let thread = thread::spawn(move || {
			let emitter = Emitter { tx, notify: self.notify };
			run(self.source, &self.config, &prompt, &token, &emitter);
		});

		GenerationHandle { events: rx, cancel, thread: Some(thread), ended: false }
	}
}

struct Emitter {
	tx: Sender<GenerationEvent>,
	notify: Option<Notify>,
}

impl Emitter {
	fn send(&self, event: GenerationEvent) {
		// A dropped handle means nobody is listening anymore
		let _ = self.tx.send(event);
		if let Some(notify) = &self.notify {
			notify();
		}
	}
}

fn run(source: ModelSource, config: &GenerationConfig, prompt: &str, cancel: &CancelToken, emitter: &Emitter) {
	let model: Arc<dyn LanguageModel> = match source {
		ModelSource::Loaded(model) => model,
		ModelSource::Corpus { path, max_order } => match MultiGramModel::new(&path, max_order) {
			Ok(model) => {
				let model: Arc<dyn LanguageModel> = Arc::new(model);
				emitter.send(GenerationEvent::ModelLoaded(Arc::clone(&model)));
				model
			}
			Err(e) => {
				warn!("model loading failed: {e}");
				emitter.send(GenerationEvent::Failed(e));
				return;
			}
		},
	};

	if cancel.is_cancelled() {
		emitter.send(GenerationEvent::Cancelled);
		return;
	}

	let generator = Generator::new(model.as_ref(), config.clone());
	let outcome = generator.generate_with(prompt, |progress| {
		emitter.send(GenerationEvent::Progress(progress));
		if cancel.is_cancelled() { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
	});

	match outcome {
		Ok(Some(generation)) => {
			info!("generated {} token(s)", generation.tokens);
			emitter.send(GenerationEvent::Finished(generation));
		}
		Ok(None) => {
			info!("generation cancelled");
			emitter.send(GenerationEvent::Cancelled);
		}
		Err(e) => {
			warn!("generation failed: {e}");
			emitter.send(GenerationEvent::Failed(e));
		}
	}
}

/// Handle on a running generation.
pub struct GenerationHandle {
	events: Receiver<GenerationEvent>,
	cancel: CancelToken,
	thread: Option<JoinHandle<()>>,
	/// Set once a terminal event was handed out.
	ended: bool,
}

fn worker_stopped() -> GenerationEvent {
	GenerationEvent::Failed(Error::model("generation worker stopped unexpectedly"))
}

impl GenerationHandle {
	/// Asks the worker to stop at the next chunk boundary.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn cancel_token(&self) -> CancelToken {
		self.cancel.clone()
	}

	/// Next pending event, without blocking.
	///
	/// A worker that went away without a terminal event shows up as
	/// `GenerationEvent::Failed`. Returns `None` after the terminal event.
	pub fn try_recv(&mut self) -> Option<GenerationEvent> {
		if self.ended {
			return None;
		}
		let event = match self.events.try_recv() {
			Ok(event) => event,
			Err(TryRecvError::Empty) => return None,
			Err(TryRecvError::Disconnected) => worker_stopped(),
		};
		self.ended = event.is_terminal();
		Some(event)
	}

	/// Blocks until the next event; `None` after the terminal event.
	pub fn recv(&mut self) -> Option<GenerationEvent> {
		if self.ended {
			return None;
		}
		let event = self.events.recv().unwrap_or_else(|_| worker_stopped());
		self.ended = event.is_terminal();
		Some(event)
	}

	/// Blocks until the generation ends and returns the terminal event.
	pub fn wait(mut self) -> GenerationEvent {
		let terminal = loop {
			match self.recv() {
				Some(event) if event.is_terminal() => break event,
				Some(_) => continue,
				None => break worker_stopped(),
			}
		};
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
		terminal
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn model() -> Arc<dyn LanguageModel> {
		let lines = ["a rolling stone gathers no moss.", "a friend in need is a friend indeed."];
		Arc::new(MultiGramModel::train("en", &lines, 3).unwrap())
	}

	fn config() -> GenerationConfig {
		GenerationConfig { seed: Some(11), ..GenerationConfig::default() }
	}

	#[test]
	fn finishes_in_background() {
		let handle = GenerationWorker::new(ModelSource::Loaded(model()), config()).spawn("a rolling stone gathers no moss.".into());
		match handle.wait() {
			GenerationEvent::Finished(generation) => assert!(!generation.text.is_empty()),
			_ => panic!("expected a finished generation"),
		}
	}

	#[test]
	fn cancelled_before_start() {
		let worker = GenerationWorker::new(ModelSource::Loaded(model()), config());
		let (tx, rx) = mpsc::channel();
		let token = CancelToken::new();
		token.cancel();
		run(worker.source, &worker.config, "a friend in need", &token, &Emitter { tx, notify: None });
		assert!(matches!(rx.recv().unwrap(), GenerationEvent::Cancelled));
	}

	#[test]
	fn loads_corpus_on_worker_thread() {
		let dir = tempfile::tempdir().unwrap();
		let corpus = dir.path().join("proverbs.txt");
		std::fs::write(&corpus, "a rolling stone gathers no moss.\nno pain, no gain.\n").unwrap();

		let source = ModelSource::Corpus { path: corpus, max_order: 3 };
		let mut handle = GenerationWorker::new(source, config()).spawn("no pain, no gain.".into());
		let first = handle.recv().unwrap();
		assert!(matches!(first, GenerationEvent::ModelLoaded(_)));
		assert!(matches!(handle.wait(), GenerationEvent::Finished(_)));
	}

	#[test]
	fn missing_corpus_fails_with_io_error() {
		let source = ModelSource::Corpus { path: PathBuf::from("/nonexistent/proverbs.txt"), max_order: 3 };
		let handle = GenerationWorker::new(source, config()).spawn("x".into());
		assert!(matches!(handle.wait(), GenerationEvent::Failed(Error::Io { .. })));
	}

	fn generation() -> Generation {
		Generation { prompt: "p".into(), text: "t".into(), tokens: 1, score: -1.0, finished: true }
	}

	#[test]
	fn vanished_worker_is_reported_once() {
		let (tx, rx) = mpsc::channel::<GenerationEvent>();
		let mut handle = GenerationHandle { events: rx, cancel: CancelToken::new(), thread: None, ended: false };
		assert!(handle.try_recv().is_none());

		tx.send(GenerationEvent::Progress(Progress { step: 1, total: 2 })).unwrap();
		drop(tx);
		assert!(matches!(handle.try_recv(), Some(GenerationEvent::Progress(_))));
		assert!(matches!(handle.try_recv(), Some(GenerationEvent::Failed(Error::Model(_)))));
		assert!(handle.try_recv().is_none());
	}

	#[test]
	fn nothing_follows_the_terminal_event() {
		let (tx, rx) = mpsc::channel();
		let mut handle = GenerationHandle { events: rx, cancel: CancelToken::new(), thread: None, ended: false };
		tx.send(GenerationEvent::Finished(generation())).unwrap();
		drop(tx);
		assert!(matches!(handle.try_recv(), Some(GenerationEvent::Finished(_))));
		assert!(handle.try_recv().is_none());
		assert!(handle.recv().is_none());
	}

	#[test]
	fn notify_is_called() {
		let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let handle = GenerationWorker::new(ModelSource::Loaded(model()), config())
			.on_event(move || {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.spawn("a friend in need is a friend indeed.".into());
		handle.wait();
		assert!(calls.load(Ordering::SeqCst) >= 1);
	}
}
