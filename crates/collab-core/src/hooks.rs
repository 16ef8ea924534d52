//! Extension/hook pipeline.
//!
//! An [`Extension`] is a value exposing any subset of the named lifecycle
//! hooks; a method left at its default is simply skipped. Hooks for a given
//! event run sequentially, in descending-priority order, and the first
//! handler to fail aborts the remaining chain for that event.

use async_trait::async_trait;
use collab_types::close::CloseCode;
use collab_types::error::Error;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Context accumulated across the handshake for one transport, built up by
/// `onConnect`/`onAuthenticate` hook return values and handed unchanged to
/// every later hook for that transport.
pub type Context = Map<String, Value>;

/// Failure carried back from a hook, with an optional close code for hooks
/// invoked during the handshake.
#[derive(Debug, Clone)]
pub struct HookError {
	pub code: CloseCode,
	pub reason: String,
	/// Present only for hooks whose errors may be swallowed when empty
	/// (`onStoreDocument`).
	pub message: Option<String>,
}

impl HookError {
	pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
		HookError { code, reason: reason.into(), message: None }
	}

	pub fn with_message(code: CloseCode, reason: impl Into<String>, message: impl Into<String>) -> Self {
		HookError { code, reason: reason.into(), message: Some(message.into()) }
	}
}

impl From<HookError> for Error {
	fn from(err: HookError) -> Self {
		Error::HookRejected { code: err.code, reason: err.reason }
	}
}

pub type HookResult<T> = Result<T, HookError>;

/// What `onLoadDocument` found for a given document name.
pub enum LoadOutcome {
	/// A CRDT document was reconstructed from storage; apply it verbatim.
	Document(yrs::Doc),
	/// Nothing stored yet; start from an empty document.
	None,
}

/// A trivial HTTP response an `onRequest` hook may choose to write for
/// non-upgrade requests, decoupled from any concrete HTTP framework.
#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: u16,
	pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestHeaders(pub HashMap<String, String>);

#[derive(Debug, Clone, Default)]
pub struct RequestParameters(pub HashMap<String, String>);

#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
	pub read_only: bool,
	pub requires_authentication: bool,
	pub is_authenticated: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectPayload {
	pub socket_id: Uuid,
	pub document_name: String,
	pub request_headers: RequestHeaders,
	pub request_parameters: RequestParameters,
}

#[derive(Debug, Clone)]
pub struct AuthenticatePayload {
	pub socket_id: Uuid,
	pub document_name: String,
	pub token: String,
	pub context: Context,
}

#[derive(Debug, Clone)]
pub struct LoadDocumentPayload {
	pub document_name: String,
	pub context: Context,
}

#[derive(Debug, Clone)]
pub struct AfterLoadDocumentPayload {
	pub document_name: String,
	pub context: Context,
}

#[derive(Debug, Clone)]
pub struct BeforeHandleMessagePayload {
	pub document_name: String,
	pub socket_id: Uuid,
	pub update: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StatelessPayload {
	pub document_name: String,
	pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ChangePayload {
	pub document_name: String,
	pub update: Vec<u8>,
	pub origin_socket_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct StoreDocumentPayload {
	pub document_name: String,
	pub state: Vec<u8>,
	pub context: Context,
}

#[derive(Debug, Clone)]
pub struct AwarenessUpdatePayload {
	pub document_name: String,
	pub socket_id: Uuid,
	pub states: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DisconnectPayload {
	pub document_name: String,
	pub socket_id: Uuid,
	pub clients_count: usize,
}

#[derive(Debug, Clone)]
pub struct UpgradePayload {
	pub request_headers: RequestHeaders,
}

#[derive(Debug, Clone)]
pub struct RequestPayload {
	pub request_headers: RequestHeaders,
	pub path: String,
}

/// A pluggable hook handler.
///
/// Every method defaults to a no-op so an extension only needs to override
/// the hooks it actually cares about, the same shape as an adapter trait
/// with optional capabilities.
#[async_trait]
pub trait Extension: Debug + Send + Sync {
	/// Higher runs earlier. Ties keep registration order.
	fn priority(&self) -> i32 {
		100
	}

	/// Whether this extension gates connections on `on_authenticate`. The
	/// server waits for an `Auth` message before attaching any transport if
	/// any configured extension returns `true` here. Explicit marker instead
	/// of detecting an overridden default method by its behavior.
	fn requires_authentication(&self) -> bool {
		false
	}

	async fn on_configure(&self) -> HookResult<()> {
		Ok(())
	}

	async fn on_listen(&self, _port: u16) -> HookResult<()> {
		Ok(())
	}

	async fn on_upgrade(&self, _payload: &UpgradePayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_request(&self, _payload: &RequestPayload) -> HookResult<Option<HttpResponse>> {
		Ok(None)
	}

	async fn on_connect(&self, _payload: &ConnectPayload) -> HookResult<Context> {
		Ok(Context::new())
	}

	async fn on_authenticate(&self, _payload: &AuthenticatePayload) -> HookResult<Context> {
		Ok(Context::new())
	}

	async fn on_load_document(&self, _payload: &LoadDocumentPayload) -> HookResult<LoadOutcome> {
		Ok(LoadOutcome::None)
	}

	async fn after_load_document(&self, _payload: &AfterLoadDocumentPayload) -> HookResult<()> {
		Ok(())
	}

	async fn before_handle_message(&self, _payload: &BeforeHandleMessagePayload) -> HookResult<()> {
		Ok(())
	}

	async fn before_broadcast_stateless(&self, _payload: &StatelessPayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_stateless(&self, _payload: &StatelessPayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_change(&self, _payload: &ChangePayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_store_document(&self, _payload: &StoreDocumentPayload) -> HookResult<()> {
		Ok(())
	}

	async fn after_store_document(&self, _payload: &StoreDocumentPayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_awareness_update(&self, _payload: &AwarenessUpdatePayload) -> HookResult<()> {
		Ok(())
	}

	async fn connected(&self, _payload: &ConnectPayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_disconnect(&self, _payload: &DisconnectPayload) -> HookResult<()> {
		Ok(())
	}

	async fn on_destroy(&self) -> HookResult<()> {
		Ok(())
	}
}

/// Sequential runner over a configured, priority-sorted extension list.
#[derive(Debug, Clone)]
pub struct HookPipeline {
	extensions: Arc<Vec<Arc<dyn Extension>>>,
}

impl HookPipeline {
	/// Sorts extensions by descending priority; the sort is stable so ties
	/// keep their registration order.
	pub fn new(mut extensions: Vec<Arc<dyn Extension>>) -> Self {
		extensions.sort_by_key(|ext| std::cmp::Reverse(ext.priority()));
		HookPipeline { extensions: Arc::new(extensions) }
	}

	pub fn extensions(&self) -> &[Arc<dyn Extension>] {
		&self.extensions
	}

	pub fn requires_authentication(&self) -> bool {
		self.extensions.iter().any(|ext| ext.requires_authentication())
	}

	pub async fn on_configure(&self) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.on_configure().await?;
		}
		Ok(())
	}

	pub async fn on_listen(&self, port: u16) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.on_listen(port).await?;
		}
		Ok(())
	}

	pub async fn on_upgrade(&self, payload: &UpgradePayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.on_upgrade(payload).await?;
		}
		Ok(())
	}

	pub async fn on_request(&self, payload: &RequestPayload) -> HookResult<Option<HttpResponse>> {
		for ext in self.extensions.iter() {
			if let Some(response) = ext.on_request(payload).await? {
				return Ok(Some(response));
			}
		}
		Ok(None)
	}

	/// Runs every extension's `onConnect`, merging each returned context
	/// patch into the accumulator in hook order.
	pub async fn on_connect(&self, payload: &ConnectPayload) -> HookResult<Context> {
		let mut context = Context::new();
		for ext in self.extensions.iter() {
			let patch = ext.on_connect(payload).await?;
			context.extend(patch);
		}
		Ok(context)
	}

	pub async fn on_authenticate(&self, payload: &AuthenticatePayload) -> HookResult<Context> {
		let mut context = payload.context.clone();
		for ext in self.extensions.iter() {
			let patch = ext.on_authenticate(payload).await?;
			context.extend(patch);
		}
		Ok(context)
	}

	/// Runs every extension's `onLoadDocument` in order, keeping the first
	/// non-`None` outcome but still letting later extensions observe the call.
	pub async fn on_load_document(&self, payload: &LoadDocumentPayload) -> HookResult<LoadOutcome> {
		let mut outcome = LoadOutcome::None;
		for ext in self.extensions.iter() {
			let result = ext.on_load_document(payload).await?;
			if matches!(outcome, LoadOutcome::None) {
				outcome = result;
			}
		}
		Ok(outcome)
	}

	pub async fn after_load_document(&self, payload: &AfterLoadDocumentPayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.after_load_document(payload).await?;
		}
		Ok(())
	}

	pub async fn before_handle_message(&self, payload: &BeforeHandleMessagePayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.before_handle_message(payload).await?;
		}
		Ok(())
	}

	pub async fn before_broadcast_stateless(&self, payload: &StatelessPayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.before_broadcast_stateless(payload).await?;
		}
		Ok(())
	}

	pub async fn on_stateless(&self, payload: &StatelessPayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.on_stateless(payload).await?;
		}
		Ok(())
	}

	/// Fire-and-log: a failing `onChange` handler is logged and does not
	/// stop the remaining handlers or the update pipeline.
	pub async fn on_change(&self, payload: &ChangePayload) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.on_change(payload).await {
				tracing::warn!(document = %payload.document_name, reason = %err.reason, "onChange hook failed");
			}
		}
	}

	/// Failures with a non-empty message are logged but do not stop the
	/// debounce cycle; failures without a message are swallowed silently.
	pub async fn on_store_document(&self, payload: &StoreDocumentPayload) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.on_store_document(payload).await {
				if let Some(message) = err.message.as_ref().filter(|m| !m.is_empty()) {
					tracing::warn!(document = %payload.document_name, message, "onStoreDocument hook failed");
				}
			}
		}
	}

	pub async fn after_store_document(&self, payload: &StoreDocumentPayload) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.after_store_document(payload).await {
				tracing::warn!(document = %payload.document_name, reason = %err.reason, "afterStoreDocument hook failed");
			}
		}
	}

	pub async fn on_awareness_update(&self, payload: &AwarenessUpdatePayload) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.on_awareness_update(payload).await {
				tracing::warn!(document = %payload.document_name, reason = %err.reason, "onAwarenessUpdate hook failed");
			}
		}
	}

	pub async fn connected(&self, payload: &ConnectPayload) -> HookResult<()> {
		for ext in self.extensions.iter() {
			ext.connected(payload).await?;
		}
		Ok(())
	}

	pub async fn on_disconnect(&self, payload: &DisconnectPayload) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.on_disconnect(payload).await {
				tracing::warn!(document = %payload.document_name, reason = %err.reason, "onDisconnect hook failed");
			}
		}
	}

	pub async fn on_destroy(&self) {
		for ext in self.extensions.iter() {
			if let Err(err) = ext.on_destroy().await {
				tracing::warn!(reason = %err.reason, "onDestroy hook failed");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	#[derive(Debug)]
	struct RecordingExtension {
		name: &'static str,
		priority: i32,
		log: Arc<Mutex<Vec<&'static str>>>,
		fail: bool,
	}

	#[async_trait]
	impl Extension for RecordingExtension {
		fn priority(&self) -> i32 {
			self.priority
		}

		async fn on_connect(&self, _payload: &ConnectPayload) -> HookResult<Context> {
			self.log.lock().push(self.name);
			if self.fail {
				return Err(HookError::new(CloseCode::Forbidden, "denied"));
			}
			let mut ctx = Context::new();
			ctx.insert(self.name.to_string(), Value::Bool(true));
			Ok(ctx)
		}
	}

	fn payload() -> ConnectPayload {
		ConnectPayload {
			socket_id: Uuid::nil(),
			document_name: "doc".into(),
			request_headers: RequestHeaders::default(),
			request_parameters: RequestParameters::default(),
		}
	}

	#[tokio::test]
	async fn runs_in_priority_order_and_merges_context() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let low = Arc::new(RecordingExtension { name: "low", priority: 10, log: log.clone(), fail: false });
		let high = Arc::new(RecordingExtension { name: "high", priority: 200, log: log.clone(), fail: false });
		let pipeline = HookPipeline::new(vec![low, high]);

		let ctx = pipeline.on_connect(&payload()).await.unwrap();
		assert_eq!(*log.lock(), vec!["high", "low"]);
		assert_eq!(ctx.get("high"), Some(&Value::Bool(true)));
		assert_eq!(ctx.get("low"), Some(&Value::Bool(true)));
	}

	#[tokio::test]
	async fn aborts_chain_on_first_failure() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let first = Arc::new(RecordingExtension { name: "first", priority: 200, log: log.clone(), fail: true });
		let second = Arc::new(RecordingExtension { name: "second", priority: 100, log: log.clone(), fail: false });
		let pipeline = HookPipeline::new(vec![first, second]);

		let result = pipeline.on_connect(&payload()).await;
		assert!(result.is_err());
		assert_eq!(*log.lock(), vec!["first"]);
	}
}

// vim: ts=4
