//! Error handling subsystem. Implements a custom Error type.

use crate::close::CloseCode;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Protocol / framing
	Protocol(String), // malformed frame, bad varstring/varuint
	UnknownMessageType(u64),

	// Handshake / authorization
	Unauthorized,
	PermissionDenied(String),
	HookRejected { code: CloseCode, reason: String },

	// Document lifecycle
	DocumentLoadFailed(String),
	DocumentNotAttached,

	// Transport
	TransportClosed,
	TransportWrite(String),

	// Storage (only surfaced for afterStoreDocument failures; onStoreDocument
	// failures are swallowed unless they carry a message, see onStoreDocument docs)
	Storage(String),

	// Configuration
	ConfigError(String),

	// Internal invariant violations, never expected outside debug builds
	Internal(String),

	// externals
	Io(std::io::Error),
	Serde(serde_json::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("serde error: {}", err);
		Self::Serde(err)
	}
}

impl Error {
	/// Reduce this error to the close code/reason pair sent on the wire,
	/// falling back to `Forbidden` for anything without a natural mapping.
	pub fn as_close(&self) -> (CloseCode, &str) {
		match self {
			Error::Unauthorized => (CloseCode::Unauthorized, "unauthorized"),
			Error::PermissionDenied(reason) => (CloseCode::Forbidden, reason.as_str()),
			Error::HookRejected { code, reason } => (*code, reason.as_str()),
			Error::Protocol(_) | Error::UnknownMessageType(_) => {
				(CloseCode::Unauthorized, "protocol error")
			}
			_ => (CloseCode::Forbidden, "forbidden"),
		}
	}
}

// vim: ts=4
