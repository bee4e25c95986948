use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::decoding::GenerationConfig;
use crate::error::{Error, Result};
use crate::io::read_text;
use crate::model::multigram_model::DEFAULT_MAX_ORDER;
use crate::worker::ModelSource;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "proverbs.toml";

/// Where the language model comes from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
	/// Corpus of the pretrained model. When absent, the loaded database is the corpus.
	pub corpus: Option<PathBuf>,
	/// Highest n-gram order (>= 2).
	pub max_order: usize,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self { corpus: None, max_order: DEFAULT_MAX_ORDER }
	}
}

impl ModelConfig {
	/// Model source for a session whose database is `database`.
	///
	/// Returns `None` if neither a corpus nor a database is available.
	pub fn source(&self, database: Option<&Path>) -> Option<ModelSource> {
		let path = self.corpus.as_deref().or(database)?;
		Some(ModelSource::Corpus { path: path.to_owned(), max_order: self.max_order })
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self { host: "127.0.0.1".to_owned(), port: 5000 }
	}
}

/// Whole application configuration; every field has a default.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
	pub model: ModelConfig,
	pub generation: GenerationConfig,
	pub server: ServerConfig,
}

impl AppConfig {
	/// Parses a TOML configuration file.
	///
	/// # Errors
	/// - `Error::Io` / `Error::Decode` if the file cannot be read
	/// - `Error::Config` if it is not valid TOML for this structure
	/// - `Error::InvalidConfig` if a value is out of range
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let config = Self::parse(&read_text(path)?).map_err(|e| match e {
			Error::Config { source, .. } => Error::Config { path: path.to_owned(), source },
			other => other,
		})?;
		debug!("configuration loaded from {}", path.display());
		Ok(config)
	}

	/// Like [`AppConfig::load`], but a missing file gives the defaults.
	pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		if path.exists() { Self::load(path) } else { Ok(Self::default()) }
	}

	pub fn parse(text: &str) -> Result<Self> {
		let config: Self = toml::from_str(text).map_err(|source| Error::Config { path: PathBuf::new(), source })?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.model.max_order < 2 {
			return Err(Error::InvalidConfig(format!("model.max_order must be >= 2, got {}", self.model.max_order)));
		}
		self.generation.validate()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_gives_defaults() {
		let config = AppConfig::parse("").unwrap();
		assert_eq!(config, AppConfig::default());
		assert_eq!(config.server.port, 5000);
		assert_eq!(config.generation.num_beams, 5);
	}

	#[test]
	fn partial_sections_keep_other_defaults() {
		let config = AppConfig::parse(
			r#"
			[model]
			corpus = "data/przyslowia.txt"

			[generation]
			max_length = 200
			seed = 9
			"#,
		)
		.unwrap();
		assert_eq!(config.model.corpus.as_deref(), Some(Path::new("data/przyslowia.txt")));
		assert_eq!(config.model.max_order, DEFAULT_MAX_ORDER);
		assert_eq!(config.generation.max_length, 200);
		assert_eq!(config.generation.seed, Some(9));
		assert_eq!(config.generation.top_k, 50);
	}

	#[test]
	fn out_of_range_values_are_rejected() {
		assert!(matches!(AppConfig::parse("[generation]\ntop_p = 2.0"), Err(Error::InvalidConfig(_))));
		assert!(matches!(AppConfig::parse("[model]\nmax_order = 1"), Err(Error::InvalidConfig(_))));
		assert!(matches!(AppConfig::parse("[server]\nport = \"x\""), Err(Error::Config { .. })));
	}

	#[test]
	fn missing_file_falls_back_to_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let config = AppConfig::load_or_default(dir.path().join(CONFIG_FILE)).unwrap();
		assert_eq!(config, AppConfig::default());
	}

	#[test]
	fn configured_corpus_wins_over_database() {
		let model = ModelConfig { corpus: Some("corpus.txt".into()), max_order: 3 };
		match model.source(Some(Path::new("db.txt"))) {
			Some(ModelSource::Corpus { path, max_order }) => {
				assert_eq!(path, PathBuf::from("corpus.txt"));
				assert_eq!(max_order, 3);
			}
			_ => panic!("expected a corpus source"),
		}
		assert!(ModelConfig::default().source(None).is_none());
	}
}
