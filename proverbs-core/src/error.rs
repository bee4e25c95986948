use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::{fmt, io};

/// Errors produced by the proverb toolkit.
///
/// Each failure keeps its own category so front-ends can report
/// "file not found" differently from "not a text file" or "the model failed".
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The file could not be opened, read or written.
	#[error("I/O error on {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// The file was read but is not valid UTF-8.
	#[error("{} is not valid UTF-8: {source}", path.display())]
	Decode {
		path: PathBuf,
		#[source]
		source: FromUtf8Error,
	},

	/// The language model could not produce a continuation.
	#[error("model error: {0}")]
	Model(String),

	/// The prompt alone already reaches the configured maximum length.
	#[error("prompt is {length} tokens long, maximum length is {max_length}")]
	PromptTooLong { length: usize, max_length: usize },

	/// A generation or model parameter is out of range.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// An operation needed a loaded proverb collection.
	#[error("no database loaded")]
	NoDatabase,

	/// Generation was requested without any checked result.
	#[error("no proverb selected")]
	EmptySelection,

	/// Save was requested before anything was generated.
	#[error("nothing to save")]
	NothingToSave,

	/// The cached model could not be (de)serialized.
	#[error("model cache error: {0}")]
	Cache(#[from] postcard::Error),

	/// The model cache path holds a file this toolkit did not write.
	#[error("{} exists and is not a model cache, leaving it untouched", path.display())]
	ForeignCache { path: PathBuf },

	/// The configuration file is not valid TOML for `AppConfig`.
	#[error("invalid configuration file {}: {source}", path.display())]
	Config {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

impl Error {
	pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		Self::Io { path: path.into(), source }
	}

	pub(crate) fn model(message: impl fmt::Display) -> Self {
		Self::Model(message.to_string())
	}

	/// Short category name, used in logs and HTTP responses.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Io { .. } => "io",
			Self::Decode { .. } => "decode",
			Self::Model(_) | Self::PromptTooLong { .. } => "model",
			Self::InvalidConfig(_) | Self::Config { .. } => "config",
			Self::NoDatabase => "no_database",
			Self::EmptySelection => "empty_selection",
			Self::NothingToSave => "nothing_to_save",
			Self::Cache(_) | Self::ForeignCache { .. } => "cache",
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn categories_are_distinct() {
		let not_found = Error::io("a.txt", io::Error::new(io::ErrorKind::NotFound, "missing"));
		let decode = Error::Decode {
			path: "a.txt".into(),
			source: String::from_utf8(vec![0xff]).unwrap_err(),
		};
		assert_eq!(not_found.kind(), "io");
		assert_eq!(decode.kind(), "decode");
		assert_eq!(Error::model("boom").kind(), "model");
		assert!(not_found.to_string().contains("a.txt"));
	}
}
