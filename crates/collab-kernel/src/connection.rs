//! One attached transport on one document.
//!
//! `Connection` only owns what's needed to address and gate a single
//! transport — the CRDT/document side of fan-out lives on [`crate::document::Document`],
//! which holds connections by `Arc` so `Connection` itself never needs a
//! back-reference to its `Document` (avoiding a reference cycle).

use crate::transport::Transport;
use collab_core::debug_sink::{DebugSink, Direction};
use collab_protocol::codec::encode_frame_prefix;
use collab_types::close::CloseEvent;
use collab_types::message::MessageType;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type CloseCallback = Box<dyn Fn(CloseEvent) + Send + Sync>;

pub struct Connection {
	socket_id: Uuid,
	transport: Arc<dyn Transport>,
	read_only: bool,
	closed: AtomicBool,
	close_callbacks: Mutex<Vec<CloseCallback>>,
	debug_sink: Arc<DebugSink>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("socket_id", &self.socket_id)
			.field("read_only", &self.read_only)
			.field("closed", &self.closed.load(Ordering::Relaxed))
			.finish()
	}
}

impl Connection {
	pub fn new(
		socket_id: Uuid,
		transport: Arc<dyn Transport>,
		read_only: bool,
		debug_sink: Arc<DebugSink>,
	) -> Arc<Self> {
		Arc::new(Connection {
			socket_id,
			transport,
			read_only,
			closed: AtomicBool::new(false),
			close_callbacks: Mutex::new(Vec::new()),
			debug_sink,
		})
	}

	pub fn socket_id(&self) -> Uuid {
		self.socket_id
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Relaxed) || self.transport.is_closed()
	}

	/// Register a callback invoked exactly once when this connection closes.
	pub fn on_close(&self, cb: impl Fn(CloseEvent) + Send + Sync + 'static) {
		self.close_callbacks.lock().push(Box::new(cb));
	}

	/// Best-effort framed write; silently dropped once the transport is closed.
	pub async fn send_frame(&self, document_name: &str, message_type: MessageType, body: &[u8]) {
		if self.is_closed() {
			return;
		}
		let mut frame = encode_frame_prefix(document_name, message_type.wire_value());
		frame.extend_from_slice(body);
		self.debug_sink.record(document_name, message_type.wire_value(), frame.len(), Direction::Outbound);
		if let Err(err) = self.transport.send(frame).await {
			tracing::debug!(socket_id = %self.socket_id, error = %err, "write failed, closing connection");
			self.close(CloseEvent::new(1011, "write failed")).await;
		}
	}

	/// Sends a close frame, tears down the transport, then runs close
	/// callbacks exactly once. Idempotent.
	pub async fn close(&self, event: CloseEvent) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		let _ = self.transport.close(event.clone()).await;
		for cb in self.close_callbacks.lock().drain(..) {
			cb(event.clone());
		}
	}
}

// vim: ts=4
