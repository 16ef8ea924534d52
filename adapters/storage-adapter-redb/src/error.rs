//! Leaf error type for the redb storage extension.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
	#[error("database error: {0}")]
	Db(String),

	#[error("I/O error: {0}")]
	Io(String),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<Error> for collab_types::error::Error {
	fn from(err: Error) -> Self {
		collab_types::error::Error::Storage(err.to_string())
	}
}

// vim: ts=4
