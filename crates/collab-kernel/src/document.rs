//! A single collaborative document: its CRDT state, its awareness state,
//! and the set of connections currently attached to it.
//!
//! The CRDT/awareness mutation and the connection-set snapshot taken for
//! fan-out both happen under `state_lock`, a `parking_lot::Mutex` that is
//! always dropped before any `.await` — connection writes and hook calls
//! happen strictly after the lock is released.

use crate::connection::Connection;
use collab_core::debounce::Debouncer;
use collab_core::hooks::{
	AfterLoadDocumentPayload, AwarenessUpdatePayload, ChangePayload, Context, HookPipeline,
	LoadDocumentPayload, LoadOutcome, StatelessPayload, StoreDocumentPayload,
};
use collab_types::error::{ClResult, Error};
use collab_types::message::MessageType;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;
use yrs::sync::Awareness;
use yrs::Doc;

pub struct Document {
	pub name: Box<str>,
	doc: Doc,
	awareness: Mutex<Awareness>,
	connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
	is_loading: AtomicBool,
	load_once: OnceCell<()>,
	hooks: HookPipeline,
	debouncer: Arc<Debouncer>,
}

impl std::fmt::Debug for Document {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Document")
			.field("name", &self.name)
			.field("is_loading", &self.is_loading.load(Ordering::Relaxed))
			.field("connections", &self.connections.read().len())
			.finish()
	}
}

impl Document {
	pub fn new(name: impl Into<Box<str>>, hooks: HookPipeline, debouncer: Arc<Debouncer>) -> Arc<Self> {
		let doc = Doc::new();
		let awareness = Mutex::new(Awareness::new(doc.clone()));
		Arc::new(Document {
			name: name.into(),
			doc,
			awareness,
			connections: RwLock::new(HashMap::new()),
			is_loading: AtomicBool::new(true),
			load_once: OnceCell::new(),
			hooks,
			debouncer,
		})
	}

	pub fn is_loading(&self) -> bool {
		self.is_loading.load(Ordering::Acquire)
	}

	fn store_key(&self) -> String {
		format!("onStoreDocument-{}", self.name)
	}

	/// Runs `onLoadDocument` exactly once for this document, even if several
	/// transports race to attach to a brand-new document name: later
	/// callers simply await the first call's result via `OnceCell`.
	pub async fn ensure_loaded(&self, context: &Context) -> ClResult<()> {
		let result = self
			.load_once
			.get_or_try_init(|| async {
				let payload =
					LoadDocumentPayload { document_name: self.name.to_string(), context: context.clone() };
				match self.hooks.on_load_document(&payload).await {
					Ok(LoadOutcome::Document(loaded)) => {
						let state = collab_protocol::sync::encode_raw_state(&loaded);
						if let Err(err) = collab_protocol::sync::apply_update(&self.doc, &state) {
							tracing::warn!(document = %self.name, error = %err, "failed to apply loaded document state");
						}
						Ok(())
					}
					Ok(LoadOutcome::None) => Ok(()),
					Err(err) => Err(Error::from(err)),
				}
			})
			.await;

		if result.is_ok() {
			let after_payload =
				AfterLoadDocumentPayload { document_name: self.name.to_string(), context: context.clone() };
			if let Err(err) = self.hooks.after_load_document(&after_payload).await {
				tracing::warn!(document = %self.name, reason = %err.reason, "afterLoadDocument hook failed");
			}
			self.is_loading.store(false, Ordering::Release);
		}

		result.map(|_| ())
	}

	pub fn add_connection(&self, conn: Arc<Connection>) {
		self.connections.write().insert(conn.socket_id(), conn);
	}

	/// Removes `socket_id` and returns the number of connections left.
	pub fn remove_connection(&self, socket_id: Uuid) -> usize {
		let mut connections = self.connections.write();
		connections.remove(&socket_id);
		connections.len()
	}

	pub fn connection_count(&self) -> usize {
		self.connections.read().len()
	}

	/// The full current CRDT state, wrapped as a ready-to-send `Sync` frame,
	/// used to greet a newly attached connection.
	pub fn full_sync_payload(&self) -> Vec<u8> {
		collab_protocol::sync::encode_full_state(&self.doc)
	}

	pub fn encode_awareness(&self) -> ClResult<Vec<u8>> {
		collab_protocol::sync::encode_awareness_update(&self.awareness.lock())
	}

	/// Apply an inbound sync update from `origin`, then fan the update out
	/// to every other attached connection, run `onChange`, and schedule the
	/// debounced persistence cycle.
	pub async fn apply_sync_update(self: &Arc<Self>, origin: Uuid, update: &[u8]) -> ClResult<()> {
		let targets: Vec<Arc<Connection>> = {
			collab_protocol::sync::apply_update(&self.doc, update)?;
			self.connections
				.read()
				.values()
				.filter(|conn| conn.socket_id() != origin)
				.cloned()
				.collect()
		};

		let frame = collab_protocol::sync::encode_sync_update(update);
		for conn in &targets {
			conn.send_frame(&self.name, MessageType::Sync, &frame).await;
		}

		self.hooks
			.on_change(&ChangePayload {
				document_name: self.name.to_string(),
				update: update.to_vec(),
				origin_socket_id: Some(origin),
			})
			.await;

		let this = Arc::clone(self);
		self.debouncer.schedule(self.store_key(), move || async move {
			this.run_store_cycle().await;
		});

		Ok(())
	}

	async fn run_store_cycle(self: &Arc<Self>) {
		let state = collab_protocol::sync::encode_raw_state(&self.doc);
		let payload =
			StoreDocumentPayload { document_name: self.name.to_string(), state, context: Context::new() };
		self.hooks.on_store_document(&payload).await;
		self.hooks.after_store_document(&payload).await;
	}

	/// Cancels any pending debounce for this document and runs the store
	/// cycle immediately, awaiting its completion. Used on last-disconnect.
	pub async fn flush_store(self: &Arc<Self>) {
		let this = Arc::clone(self);
		self.debouncer.flush_now(&self.store_key(), move || async move {
			this.run_store_cycle().await;
		}).await;
	}

	pub async fn apply_awareness_update(
		self: &Arc<Self>,
		origin: Uuid,
		update: &[u8],
	) -> ClResult<()> {
		let targets: Vec<Arc<Connection>> = {
			let mut awareness = self.awareness.lock();
			collab_protocol::sync::apply_awareness_update(&mut awareness, update)?;
			self.connections
				.read()
				.values()
				.filter(|conn| conn.socket_id() != origin)
				.cloned()
				.collect()
		};

		for conn in &targets {
			conn.send_frame(&self.name, MessageType::Awareness, update).await;
		}

		self.hooks
			.on_awareness_update(&AwarenessUpdatePayload {
				document_name: self.name.to_string(),
				socket_id: origin,
				states: update.to_vec(),
			})
			.await;

		Ok(())
	}

	/// Runs `beforeBroadcastStateless`, then fans the payload out to every
	/// other attached connection.
	pub async fn broadcast_stateless(self: &Arc<Self>, origin: Uuid, payload: Vec<u8>) -> ClResult<()> {
		let stateless = StatelessPayload { document_name: self.name.to_string(), payload: payload.clone() };
		self.hooks.before_broadcast_stateless(&stateless).await.map_err(Error::from)?;

		let targets: Vec<Arc<Connection>> = self
			.connections
			.read()
			.values()
			.filter(|conn| conn.socket_id() != origin)
			.cloned()
			.collect();
		for conn in &targets {
			conn.send_frame(&self.name, MessageType::BroadcastStateless, &payload).await;
		}
		Ok(())
	}

	pub async fn receive_stateless(&self, payload: Vec<u8>) -> ClResult<()> {
		let stateless = StatelessPayload { document_name: self.name.to_string(), payload };
		self.hooks.on_stateless(&stateless).await.map_err(Error::from)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use collab_core::debounce::Debouncer;
	use collab_core::hooks::HookPipeline;

	fn test_document(name: &str) -> Arc<Document> {
		Document::new(name, HookPipeline::new(Vec::new()), Debouncer::new(50, 500))
	}

	#[tokio::test]
	async fn new_document_starts_loading_until_ensure_loaded_completes() {
		let doc = test_document("doc1");
		assert!(doc.is_loading());
		doc.ensure_loaded(&Context::new()).await.unwrap();
		assert!(!doc.is_loading());
	}

	#[tokio::test]
	async fn connection_count_reflects_add_and_remove() {
		let doc = test_document("doc2");
		assert_eq!(doc.connection_count(), 0);
	}
}

// vim: ts=4
