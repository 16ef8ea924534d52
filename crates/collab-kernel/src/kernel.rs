//! Server kernel: accepts transports, drives the per-transport handshake
//! state machine, creates and reuses [`Document`]s, and dispatches hooks.

use crate::connection::Connection;
use crate::document::Document;
use crate::transport::Transport;
use collab_core::config::Configuration;
use collab_core::debug_sink::{DebugSink, Direction};
use collab_core::hooks::{
	AuthenticatePayload, BeforeHandleMessagePayload, ConnectPayload, Context, DisconnectPayload, HookResult,
	HttpResponse, RequestHeaders, RequestParameters, RequestPayload, UpgradePayload,
};
use collab_protocol::codec::{decode_frame, encode_frame_prefix};
use collab_types::close::{CloseCode, CloseEvent};
use collab_types::error::{ClResult, Error};
use collab_types::message::MessageType;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-transport handshake state. One transport may attach to several
/// documents over its lifetime; `context` is shared across all of them.
#[derive(Default)]
struct TransportSession {
	queued: HashMap<String, Vec<Vec<u8>>>,
	establishing: HashMap<String, bool>,
	attached: HashMap<String, Arc<Connection>>,
	documents: HashMap<String, Arc<Document>>,
	context: Context,
}

pub struct Kernel {
	config: Configuration,
	documents: tokio::sync::Mutex<HashMap<String, Arc<Document>>>,
	debouncer: Arc<collab_core::debounce::Debouncer>,
	debug_sink: Arc<DebugSink>,
}

impl Kernel {
	pub fn new(config: Configuration) -> Arc<Self> {
		let quiet = config.quiet;
		let debouncer = collab_core::debounce::Debouncer::new(config.debounce_ms, config.max_debounce_ms);
		Arc::new(Kernel {
			config,
			documents: tokio::sync::Mutex::new(HashMap::new()),
			debouncer,
			debug_sink: Arc::new(DebugSink::new(1024, quiet)),
		})
	}

	pub async fn configure(self: &Arc<Self>) -> ClResult<()> {
		self.config.hooks.on_configure().await.map_err(Error::from)
	}

	pub async fn on_listen(self: &Arc<Self>) -> ClResult<()> {
		self.config.hooks.on_listen(self.config.port).await.map_err(Error::from)
	}

	/// Runs the `onUpgrade` hook chain ahead of a WebSocket upgrade. An
	/// `Err` here means some extension rejected the upgrade; the caller
	/// must abort it and never call `handle_transport`.
	pub async fn on_upgrade(self: &Arc<Self>, payload: &UpgradePayload) -> HookResult<()> {
		self.config.hooks.on_upgrade(payload).await
	}

	/// Runs the `onRequest` hook chain for a non-upgrade HTTP request.
	/// `Ok(None)` means no extension wrote a response.
	pub async fn on_request(self: &Arc<Self>, payload: &RequestPayload) -> HookResult<Option<HttpResponse>> {
		self.config.hooks.on_request(payload).await
	}

	/// Drives one accepted transport end to end: handshake, attach, message
	/// multiplexing, and teardown. Returns once the transport's inbound
	/// stream ends or a fatal protocol error closes it.
	pub async fn handle_transport<S>(
		self: &Arc<Self>,
		transport: Arc<dyn Transport>,
		mut inbound: S,
		headers: RequestHeaders,
	) where
		S: Stream<Item = Vec<u8>> + Unpin,
	{
		let socket_id = Uuid::new_v4();
		let mut session = TransportSession::default();
		let idle_sleep = tokio::time::sleep(Duration::from_millis(self.config.timeout_ms));
		tokio::pin!(idle_sleep);

		loop {
			tokio::select! {
				biased;
				frame = inbound.next() => {
					match frame {
						Some(bytes) => {
							if let Err(err) = self
								.handle_inbound_message(&transport, socket_id, &headers, &mut session, bytes)
								.await
							{
								let (code, reason) = err.as_close();
								let _ = transport.close(CloseEvent::new(code.code(), reason)).await;
								break;
							}
						}
						None => break,
					}
				}
				() = &mut idle_sleep, if session.attached.is_empty() => {
					let _ = transport.close(CloseEvent::from(CloseCode::Unauthorized)).await;
					break;
				}
			}
		}

		self.teardown_session(session).await;
	}

	async fn handle_inbound_message(
		self: &Arc<Self>,
		transport: &Arc<dyn Transport>,
		socket_id: Uuid,
		headers: &RequestHeaders,
		session: &mut TransportSession,
		bytes: Vec<u8>,
	) -> ClResult<()> {
		let header = decode_frame(&bytes)?;
		let document_name = header.document_name.clone();
		self.debug_sink.record(&document_name, header.message_type, bytes.len(), Direction::Inbound);

		if let Some(conn) = session.attached.get(&document_name).cloned() {
			let document = session.documents.get(&document_name).cloned().ok_or(Error::DocumentNotAttached)?;
			return self.route_attached_message(&document, &conn, header.message_type, header.rest).await;
		}

		let message_type = MessageType::from_wire_value(header.message_type);

		if !session.queued.contains_key(&document_name) {
			session.queued.insert(document_name.clone(), Vec::new());
			let connect_payload = ConnectPayload {
				socket_id,
				document_name: document_name.clone(),
				request_headers: headers.clone(),
				request_parameters: RequestParameters::default(),
			};
			let patch = self.config.hooks.on_connect(&connect_payload).await.map_err(Error::from)?;
			session.context.extend(patch);

			if !self.config.requires_authentication {
				self.setup_new_connection(transport, socket_id, headers, session, &document_name).await?;
				if let Some(conn) = session.attached.get(&document_name).cloned() {
					let document =
						session.documents.get(&document_name).cloned().ok_or(Error::DocumentNotAttached)?;
					return self
						.route_attached_message(&document, &conn, header.message_type, header.rest)
						.await;
				}
			}
		}

		if message_type == Some(MessageType::Auth)
			&& !session.establishing.get(&document_name).copied().unwrap_or(false)
		{
			return self
				.handle_auth_message(transport, socket_id, headers, session, &document_name, header.rest)
				.await;
		}

		session.queued.entry(document_name).or_default().push(bytes);
		Ok(())
	}

	async fn handle_auth_message(
		self: &Arc<Self>,
		transport: &Arc<dyn Transport>,
		socket_id: Uuid,
		headers: &RequestHeaders,
		session: &mut TransportSession,
		document_name: &str,
		body: &[u8],
	) -> ClResult<()> {
		session.establishing.insert(document_name.to_string(), true);
		let token = String::from_utf8(body.to_vec())
			.map_err(|_| Error::Protocol("invalid auth token encoding".into()))?;

		let auth_payload = AuthenticatePayload {
			socket_id,
			document_name: document_name.to_string(),
			token,
			context: session.context.clone(),
		};

		match self.config.hooks.on_authenticate(&auth_payload).await {
			Ok(patch) => {
				session.context.extend(patch);
				let frame = encode_frame_prefix(document_name, MessageType::Authenticated.wire_value());
				self.debug_sink.record(
					document_name,
					MessageType::Authenticated.wire_value(),
					frame.len(),
					Direction::Outbound,
				);
				let _ = transport.send(frame).await;
				self.setup_new_connection(transport, socket_id, headers, session, document_name).await
			}
			Err(hook_err) => {
				let mut frame = encode_frame_prefix(document_name, MessageType::PermissionDenied.wire_value());
				let reason = if hook_err.reason.is_empty() { "permission-denied" } else { hook_err.reason.as_str() };
				frame.extend_from_slice(reason.as_bytes());
				self.debug_sink.record(
					document_name,
					MessageType::PermissionDenied.wire_value(),
					frame.len(),
					Direction::Outbound,
				);
				let _ = transport.send(frame).await;
				let err = Error::from(hook_err);
				let (code, close_reason) = err.as_close();
				let _ = transport.close(CloseEvent::new(code.code(), close_reason)).await;
				Err(err)
			}
		}
	}

	async fn setup_new_connection(
		self: &Arc<Self>,
		transport: &Arc<dyn Transport>,
		socket_id: Uuid,
		headers: &RequestHeaders,
		session: &mut TransportSession,
		document_name: &str,
	) -> ClResult<()> {
		let document = self.get_or_create_document(document_name).await;
		session.documents.insert(document_name.to_string(), Arc::clone(&document));

		if let Err(err) = document.ensure_loaded(&session.context).await {
			self.documents.lock().await.remove(document_name);
			session.documents.remove(document_name);
			let (code, reason) = err.as_close();
			let _ = transport.close(CloseEvent::new(code.code(), reason)).await;
			return Err(err);
		}

		let read_only = session
			.context
			.get("readOnly")
			.and_then(serde_json::Value::as_bool)
			.unwrap_or(false);
		let conn = Connection::new(socket_id, Arc::clone(transport), read_only, Arc::clone(&self.debug_sink));
		document.add_connection(Arc::clone(&conn));
		session.attached.insert(document_name.to_string(), Arc::clone(&conn));

		conn.send_frame(document_name, MessageType::Sync, &document.full_sync_payload()).await;

		if let Some(queued) = session.queued.remove(document_name) {
			for queued_bytes in queued {
				if let Ok(queued_header) = decode_frame(&queued_bytes) {
					let _ = self
						.route_attached_message(&document, &conn, queued_header.message_type, queued_header.rest)
						.await;
				}
			}
		}

		let connect_payload = ConnectPayload {
			socket_id,
			document_name: document_name.to_string(),
			request_headers: headers.clone(),
			request_parameters: RequestParameters::default(),
		};
		if let Err(err) = self.config.hooks.connected(&connect_payload).await {
			tracing::warn!(document = document_name, reason = %err.reason, "connected hook failed");
		}

		Ok(())
	}

	async fn route_attached_message(
		self: &Arc<Self>,
		document: &Arc<Document>,
		conn: &Arc<Connection>,
		message_type_raw: u64,
		rest: &[u8],
	) -> ClResult<()> {
		let Some(message_type) = MessageType::from_wire_value(message_type_raw) else {
			tracing::debug!(document = %document.name, message_type_raw, "dropping unknown message type");
			return Ok(());
		};

		let before_payload = BeforeHandleMessagePayload {
			document_name: document.name.to_string(),
			socket_id: conn.socket_id(),
			update: rest.to_vec(),
		};
		self.config.hooks.before_handle_message(&before_payload).await.map_err(Error::from)?;

		match message_type {
			MessageType::Sync => {
				if conn.is_read_only() {
					return Ok(());
				}
				let update = collab_protocol::sync::decode_sync_update_payload(rest)?;
				document.apply_sync_update(conn.socket_id(), &update).await?;
			}
			MessageType::Awareness => {
				document.apply_awareness_update(conn.socket_id(), rest).await?;
			}
			MessageType::QueryAwareness => {
				let payload = document.encode_awareness()?;
				conn.send_frame(&document.name, MessageType::Awareness, &payload).await;
			}
			MessageType::Stateless => {
				document.receive_stateless(rest.to_vec()).await?;
			}
			MessageType::BroadcastStateless => {
				document.broadcast_stateless(conn.socket_id(), rest.to_vec()).await?;
			}
			MessageType::Auth
			| MessageType::Authenticated
			| MessageType::PermissionDenied
			| MessageType::SyncStatus
			| MessageType::SyncReply => {
				// Not expected once attached; tolerated as a no-op.
			}
		}
		Ok(())
	}

	async fn get_or_create_document(self: &Arc<Self>, name: &str) -> Arc<Document> {
		let mut docs = self.documents.lock().await;
		if let Some(doc) = docs.get(name) {
			return Arc::clone(doc);
		}
		let doc = Document::new(name, self.config.hooks.clone(), Arc::clone(&self.debouncer));
		docs.insert(name.to_string(), Arc::clone(&doc));
		doc
	}

	async fn teardown_session(self: &Arc<Self>, session: TransportSession) {
		for (name, conn) in session.attached {
			conn.close(CloseEvent::from(CloseCode::ResetConnection)).await;
			if let Some(document) = session.documents.get(&name) {
				self.handle_disconnect(Arc::clone(document), conn.socket_id()).await;
			}
		}
	}

	async fn handle_disconnect(self: &Arc<Self>, document: Arc<Document>, socket_id: Uuid) {
		let remaining = document.remove_connection(socket_id);
		self.config
			.hooks
			.on_disconnect(&DisconnectPayload {
				document_name: document.name.to_string(),
				socket_id,
				clients_count: remaining,
			})
			.await;

		if remaining != 0 {
			return;
		}

		if document.is_loading() {
			self.documents.lock().await.remove(&*document.name);
			return;
		}

		document.flush_store().await;

		let mut docs = self.documents.lock().await;
		if docs.get(&*document.name).map(|doc| doc.connection_count()).unwrap_or(0) == 0 {
			docs.remove(&*document.name);
		}
	}

	pub async fn destroy(self: &Arc<Self>) {
		self.documents.lock().await.clear();
		let drained = self.debug_sink.drain();
		if !self.config.quiet {
			tracing::info!(count = drained.len(), "shutting down, debug sink drained");
		}
		self.config.hooks.on_destroy().await;
	}
}

// vim: ts=4
