//! Proverb search and generation library.
//!
//! This crate provides everything behind the proverb front-ends:
//! - Loading a proverb database and case-insensitive substring search
//! - Selecting search results and building a generation prompt
//! - A word-level n-gram language model, trained from a corpus and cached on disk
//! - Beam search / beam sampling decoding with a fixed parameter set
//! - A background worker reporting progress and accepting cancellation
//! - A toolkit-independent session state, configuration and errors

/// Proverb database and search.
pub mod collection;

/// Application configuration (TOML).
pub mod config;

/// Decoding configuration, beam search and the high-level generator.
pub mod decoding;

/// Error categories.
pub mod error;

/// Language models and tokenizer.
pub mod model;

/// Selected proverbs and prompt building.
pub mod selection;

/// Front-end state: database, results, checkboxes, generated text, status.
pub mod session;

/// Background generation.
pub mod worker;

/// File helpers.
pub mod io;

pub use collection::{MAX_RESULTS, ProverbCollection, search};
pub use config::AppConfig;
pub use decoding::{Generation, GenerationConfig, Generator, Progress};
pub use error::{Error, Result};
pub use model::LanguageModel;
pub use model::multigram_model::MultiGramModel;
pub use selection::Selection;
pub use session::{Session, Status};
pub use worker::{CancelToken, GenerationEvent, GenerationHandle, GenerationWorker, ModelSource};
