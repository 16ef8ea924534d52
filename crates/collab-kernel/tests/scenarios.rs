//! End-to-end scenarios driven straight against `Kernel`, swapping a mock
//! `Transport` and an in-memory frame channel in for a real socket.

use async_trait::async_trait;
use collab_core::config::ConfigurationBuilder;
use collab_core::hooks::{
	AuthenticatePayload, Extension, HookError, HookResult, LoadDocumentPayload, LoadOutcome,
	RequestHeaders, StoreDocumentPayload,
};
use collab_kernel::kernel::Kernel;
use collab_kernel::transport::Transport;
use collab_types::close::{CloseCode, CloseEvent};
use collab_types::error::ClResult;
use collab_types::message::MessageType;
use collab_protocol::codec::{decode_frame, encode_frame_prefix};
use collab_protocol::sync::{decode_sync_update_payload, encode_raw_state, encode_sync_update};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use yrs::{Doc, GetString, Text, Transact, Update};

#[derive(Debug, Default)]
struct MockTransport {
	sent: Mutex<Vec<Vec<u8>>>,
	closed: AtomicBool,
}

impl MockTransport {
	fn new() -> Arc<Self> {
		Arc::new(MockTransport::default())
	}

	fn sent_frames(&self) -> Vec<Vec<u8>> {
		self.sent.lock().clone()
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send(&self, bytes: Vec<u8>) -> ClResult<()> {
		self.sent.lock().push(bytes);
		Ok(())
	}

	async fn close(&self, _event: CloseEvent) -> ClResult<()> {
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

struct ChannelStream(mpsc::UnboundedReceiver<Vec<u8>>);

impl futures::Stream for ChannelStream {
	type Item = Vec<u8>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Vec<u8>>> {
		self.0.poll_recv(cx)
	}
}

fn channel() -> (mpsc::UnboundedSender<Vec<u8>>, ChannelStream) {
	let (tx, rx) = mpsc::unbounded_channel();
	(tx, ChannelStream(rx))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
	for _ in 0..200 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition was not met in time");
}

fn decoded_message_types(frames: &[Vec<u8>]) -> Vec<u64> {
	frames.iter().map(|f| decode_frame(f).unwrap().message_type).collect()
}

/// A dummy text update, wrapped as a ready-to-send `Sync` payload.
fn text_update_payload(content: &str) -> Vec<u8> {
	let doc = Doc::new();
	let text = doc.get_or_insert_text("body");
	{
		let mut txn = doc.transact_mut();
		text.push(&mut txn, content);
	}
	encode_sync_update(&encode_raw_state(&doc))
}

#[derive(Debug, Default)]
struct RequireAuthExtension;

#[async_trait]
impl Extension for RequireAuthExtension {
	fn requires_authentication(&self) -> bool {
		true
	}

	async fn on_authenticate(
		&self,
		payload: &AuthenticatePayload,
	) -> HookResult<collab_core::hooks::Context> {
		if payload.token == "secret-token" {
			Ok(collab_core::hooks::Context::new())
		} else {
			Err(HookError::new(CloseCode::Unauthorized, "bad-token"))
		}
	}
}

#[derive(Debug, Default)]
struct FlakyLoadExtension {
	has_failed_once: AtomicBool,
}

#[async_trait]
impl Extension for FlakyLoadExtension {
	async fn on_load_document(&self, _payload: &LoadDocumentPayload) -> HookResult<LoadOutcome> {
		if !self.has_failed_once.swap(true, Ordering::SeqCst) {
			Err(HookError::new(CloseCode::Forbidden, "load-failed"))
		} else {
			Ok(LoadOutcome::None)
		}
	}
}

#[derive(Debug, Default)]
struct RecordingStoreExtension {
	store_calls: AtomicUsize,
}

#[async_trait]
impl Extension for RecordingStoreExtension {
	async fn on_store_document(&self, _payload: &StoreDocumentPayload) -> HookResult<()> {
		self.store_calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

fn headers() -> RequestHeaders {
	RequestHeaders::default()
}

#[tokio::test]
async fn unauthenticated_attach_receives_full_sync_on_connect() {
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true);
	let kernel = Kernel::new(builder.build());

	let transport = MockTransport::new();
	let (tx, stream) = channel();

	let handle = {
		let kernel = Arc::clone(&kernel);
		let transport: Arc<dyn Transport> = transport.clone();
		tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
	};

	let trigger = encode_frame_prefix("doc-a", MessageType::QueryAwareness.wire_value());
	tx.send(trigger).unwrap();

	// The attach trigger itself is re-routed once attached, so the new
	// connection sees the full-sync greeting followed by the awareness
	// reply to its own query.
	wait_until(|| transport.sent_frames().len() >= 2).await;
	assert_eq!(
		decoded_message_types(&transport.sent_frames()),
		vec![MessageType::Sync.wire_value(), MessageType::Awareness.wire_value()]
	);

	drop(tx);
	handle.await.unwrap();
}

#[tokio::test]
async fn authenticated_attach_requires_a_valid_token() {
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true).extension(Arc::new(RequireAuthExtension));
	let kernel = Kernel::new(builder.build());

	// Wrong token: rejected and closed.
	{
		let transport = MockTransport::new();
		let (tx, stream) = channel();
		let handle = {
			let kernel = Arc::clone(&kernel);
			let transport: Arc<dyn Transport> = transport.clone();
			tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
		};

		let mut frame = encode_frame_prefix("doc-b", MessageType::Auth.wire_value());
		frame.extend_from_slice(b"wrong-token");
		tx.send(frame).unwrap();

		wait_until(|| transport.is_closed()).await;
		assert_eq!(
			decoded_message_types(&transport.sent_frames()),
			vec![MessageType::PermissionDenied.wire_value()]
		);
		drop(tx);
		let _ = handle.await;
	}

	// Correct token: authenticated, then attached.
	{
		let transport = MockTransport::new();
		let (tx, stream) = channel();
		let handle = {
			let kernel = Arc::clone(&kernel);
			let transport: Arc<dyn Transport> = transport.clone();
			tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
		};

		let mut frame = encode_frame_prefix("doc-b", MessageType::Auth.wire_value());
		frame.extend_from_slice(b"secret-token");
		tx.send(frame).unwrap();

		wait_until(|| transport.sent_frames().len() >= 2).await;
		assert_eq!(
			decoded_message_types(&transport.sent_frames()),
			vec![MessageType::Authenticated.wire_value(), MessageType::Sync.wire_value()]
		);

		drop(tx);
		handle.await.unwrap();
	}
}

#[tokio::test]
async fn sync_updates_fan_out_to_other_attached_connections() {
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true);
	let kernel = Kernel::new(builder.build());

	let transport1 = MockTransport::new();
	let (tx1, stream1) = channel();
	let handle1 = {
		let kernel = Arc::clone(&kernel);
		let transport: Arc<dyn Transport> = transport1.clone();
		tokio::spawn(async move { kernel.handle_transport(transport, stream1, headers()).await })
	};

	let transport2 = MockTransport::new();
	let (tx2, stream2) = channel();
	let handle2 = {
		let kernel = Arc::clone(&kernel);
		let transport: Arc<dyn Transport> = transport2.clone();
		tokio::spawn(async move { kernel.handle_transport(transport, stream2, headers()).await })
	};

	// Attach both connections to the same document first; each attach trigger
	// yields a full-sync greeting followed by its own awareness reply.
	tx1.send(encode_frame_prefix("doc-c", MessageType::QueryAwareness.wire_value())).unwrap();
	wait_until(|| transport1.sent_frames().len() >= 2).await;
	tx2.send(encode_frame_prefix("doc-c", MessageType::QueryAwareness.wire_value())).unwrap();
	wait_until(|| transport2.sent_frames().len() >= 2).await;

	// Connection 1 sends a real content update.
	let mut frame = encode_frame_prefix("doc-c", MessageType::Sync.wire_value());
	frame.extend_from_slice(&text_update_payload("hello"));
	tx1.send(frame).unwrap();

	wait_until(|| transport2.sent_frames().len() >= 3).await;

	let fan_out = transport2.sent_frames().into_iter().nth(2).unwrap();
	let header = decode_frame(&fan_out).unwrap();
	assert_eq!(header.message_type, MessageType::Sync.wire_value());
	let raw_update = decode_sync_update_payload(header.rest).unwrap();

	let verify_doc = Doc::new();
	{
		let update = Update::decode_v1(&raw_update).unwrap();
		let mut txn = verify_doc.transact_mut();
		txn.apply_update(update).unwrap();
	}
	let text = verify_doc.get_or_insert_text("body");
	let txn = verify_doc.transact();
	assert_eq!(text.get_string(&txn), "hello");

	// Connection 1 must not receive its own update echoed back.
	assert_eq!(transport1.sent_frames().len(), 2);

	drop(tx1);
	drop(tx2);
	handle1.await.unwrap();
	handle2.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn storage_hook_runs_once_after_debounce_window() {
	let extension = Arc::new(RecordingStoreExtension::default());
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true).debounce_ms(200).max_debounce_ms(2000).extension(Arc::clone(&extension) as Arc<dyn Extension>);
	let kernel = Kernel::new(builder.build());

	let transport = MockTransport::new();
	let (tx, stream) = channel();
	let handle = {
		let kernel = Arc::clone(&kernel);
		let transport: Arc<dyn Transport> = transport.clone();
		tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
	};

	tx.send(encode_frame_prefix("doc-d", MessageType::QueryAwareness.wire_value())).unwrap();
	wait_until(|| !transport.sent_frames().is_empty()).await;

	let mut frame = encode_frame_prefix("doc-d", MessageType::Sync.wire_value());
	frame.extend_from_slice(&text_update_payload("debounced"));
	tx.send(frame).unwrap();
	wait_until(|| transport.sent_frames().len() >= 2).await;

	assert_eq!(extension.store_calls.load(Ordering::SeqCst), 0);
	tokio::time::advance(Duration::from_millis(250)).await;
	assert_eq!(extension.store_calls.load(Ordering::SeqCst), 1);

	drop(tx);
	handle.await.unwrap();
}

#[tokio::test]
async fn last_disconnect_flushes_pending_store_immediately() {
	let extension = Arc::new(RecordingStoreExtension::default());
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true).debounce_ms(60_000).max_debounce_ms(120_000).extension(Arc::clone(&extension) as Arc<dyn Extension>);
	let kernel = Kernel::new(builder.build());

	let transport = MockTransport::new();
	let (tx, stream) = channel();
	let handle = {
		let kernel = Arc::clone(&kernel);
		let transport: Arc<dyn Transport> = transport.clone();
		tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
	};

	tx.send(encode_frame_prefix("doc-e", MessageType::QueryAwareness.wire_value())).unwrap();
	wait_until(|| !transport.sent_frames().is_empty()).await;

	let mut frame = encode_frame_prefix("doc-e", MessageType::Sync.wire_value());
	frame.extend_from_slice(&text_update_payload("flush-me"));
	tx.send(frame).unwrap();
	wait_until(|| transport.sent_frames().len() >= 2).await;

	assert_eq!(extension.store_calls.load(Ordering::SeqCst), 0);

	// Closing the only transport drops the last connection on the document,
	// which must flush the debounced store immediately rather than waiting
	// out the (very long) debounce window configured above.
	drop(tx);
	handle.await.unwrap();

	wait_until(|| extension.store_calls.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn failed_load_is_retried_from_scratch_on_the_next_attach() {
	let extension = Arc::new(FlakyLoadExtension::default());
	let mut builder = ConfigurationBuilder::new();
	builder.quiet(true).extension(Arc::clone(&extension) as Arc<dyn Extension>);
	let kernel = Kernel::new(builder.build());

	// First attach: the extension fails onLoadDocument, the transport is closed.
	{
		let transport = MockTransport::new();
		let (tx, stream) = channel();
		let handle = {
			let kernel = Arc::clone(&kernel);
			let transport: Arc<dyn Transport> = transport.clone();
			tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
		};

		tx.send(encode_frame_prefix("doc-f", MessageType::QueryAwareness.wire_value())).unwrap();
		wait_until(|| transport.is_closed()).await;
		assert!(transport.sent_frames().is_empty());

		drop(tx);
		let _ = handle.await;
	}

	// Second attach against the same kernel/document name succeeds, proving
	// the half-created document was dropped rather than left poisoned.
	{
		let transport = MockTransport::new();
		let (tx, stream) = channel();
		let handle = {
			let kernel = Arc::clone(&kernel);
			let transport: Arc<dyn Transport> = transport.clone();
			tokio::spawn(async move { kernel.handle_transport(transport, stream, headers()).await })
		};

		tx.send(encode_frame_prefix("doc-f", MessageType::QueryAwareness.wire_value())).unwrap();
		wait_until(|| !transport.sent_frames().is_empty()).await;
		assert!(!transport.is_closed());

		drop(tx);
		handle.await.unwrap();
	}
}

// vim: ts=4
