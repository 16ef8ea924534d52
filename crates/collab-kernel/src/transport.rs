//! Transport abstraction. The kernel never speaks WebSocket/axum directly;
//! the `server` binary crate adapts an upgraded socket to this trait and to
//! a `Stream<Item = Vec<u8>>` of inbound frames.

use async_trait::async_trait;
use collab_types::close::CloseEvent;
use collab_types::error::ClResult;
use std::fmt::Debug;

#[async_trait]
pub trait Transport: Debug + Send + Sync {
	/// Best-effort write. Implementations should treat a write after close
	/// as a silent no-op rather than an error.
	async fn send(&self, bytes: Vec<u8>) -> ClResult<()>;

	/// Send a close frame and tear down the underlying socket. Idempotent.
	async fn close(&self, event: CloseEvent) -> ClResult<()>;

	fn is_closed(&self) -> bool;
}

// vim: ts=4
