//! Server configuration, built with a chainable `&mut Self` builder the way
//! the rest of this codebase configures long-lived services.

use crate::hooks::{
	AfterLoadDocumentPayload, AuthenticatePayload, AwarenessUpdatePayload, BeforeHandleMessagePayload,
	ChangePayload, ConnectPayload, Context, DisconnectPayload, Extension, HookPipeline, HookResult,
	HttpResponse, LoadDocumentPayload, LoadOutcome, RequestPayload, StatelessPayload, StoreDocumentPayload,
	UpgradePayload,
};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Configuration {
	pub name: Box<str>,
	pub address: Box<str>,
	pub port: u16,
	/// Pre-attach idle close, and per-connection ping deadline, in milliseconds.
	pub timeout_ms: u64,
	/// Persistence debounce interval, in milliseconds.
	pub debounce_ms: u64,
	/// Maximum persistence debounce stall, in milliseconds.
	pub max_debounce_ms: u64,
	/// Suppress the startup banner and per-message debug trace.
	pub quiet: bool,
	pub hooks: HookPipeline,
	/// Whether any configured extension defines `onAuthenticate`; derived at
	/// configure time so the handshake knows to wait for an `Auth` message.
	pub requires_authentication: bool,
}

type Handler<P, R> = Box<dyn Fn(&P) -> HookResult<R> + Send + Sync>;
type Handler0<R> = Box<dyn Fn() -> HookResult<R> + Send + Sync>;

/// Closures registered directly on a [`ConfigurationBuilder`], collected
/// into a single synthetic [`Extension`] appended after every extension
/// passed to [`ConfigurationBuilder::extension`].
#[derive(Default)]
struct InlineExtension {
	on_configure: Option<Handler0<()>>,
	on_listen: Option<Box<dyn Fn(u16) -> HookResult<()> + Send + Sync>>,
	on_upgrade: Option<Handler<UpgradePayload, ()>>,
	on_request: Option<Handler<RequestPayload, Option<HttpResponse>>>,
	on_connect: Option<Handler<ConnectPayload, Context>>,
	on_authenticate: Option<Handler<AuthenticatePayload, Context>>,
	on_load_document: Option<Handler<LoadDocumentPayload, LoadOutcome>>,
	after_load_document: Option<Handler<AfterLoadDocumentPayload, ()>>,
	before_handle_message: Option<Handler<BeforeHandleMessagePayload, ()>>,
	before_broadcast_stateless: Option<Handler<StatelessPayload, ()>>,
	on_stateless: Option<Handler<StatelessPayload, ()>>,
	on_change: Option<Handler<ChangePayload, ()>>,
	on_store_document: Option<Handler<StoreDocumentPayload, ()>>,
	after_store_document: Option<Handler<StoreDocumentPayload, ()>>,
	on_awareness_update: Option<Handler<AwarenessUpdatePayload, ()>>,
	connected: Option<Handler<ConnectPayload, ()>>,
	on_disconnect: Option<Handler<DisconnectPayload, ()>>,
	on_destroy: Option<Handler0<()>>,
	requires_authentication: bool,
}

impl std::fmt::Debug for InlineExtension {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InlineExtension").finish_non_exhaustive()
	}
}

impl InlineExtension {
	fn is_empty(&self) -> bool {
		self.on_configure.is_none()
			&& self.on_listen.is_none()
			&& self.on_upgrade.is_none()
			&& self.on_request.is_none()
			&& self.on_connect.is_none()
			&& self.on_authenticate.is_none()
			&& self.on_load_document.is_none()
			&& self.after_load_document.is_none()
			&& self.before_handle_message.is_none()
			&& self.before_broadcast_stateless.is_none()
			&& self.on_stateless.is_none()
			&& self.on_change.is_none()
			&& self.on_store_document.is_none()
			&& self.after_store_document.is_none()
			&& self.on_awareness_update.is_none()
			&& self.connected.is_none()
			&& self.on_disconnect.is_none()
			&& self.on_destroy.is_none()
	}
}

#[async_trait]
impl Extension for InlineExtension {
	/// Runs after every extension passed via `ConfigurationBuilder::extension`.
	fn priority(&self) -> i32 {
		i32::MIN
	}

	fn requires_authentication(&self) -> bool {
		self.requires_authentication || self.on_authenticate.is_some()
	}

	async fn on_configure(&self) -> HookResult<()> {
		self.on_configure.as_ref().map_or(Ok(()), |f| f())
	}

	async fn on_listen(&self, port: u16) -> HookResult<()> {
		self.on_listen.as_ref().map_or(Ok(()), |f| f(port))
	}

	async fn on_upgrade(&self, payload: &UpgradePayload) -> HookResult<()> {
		self.on_upgrade.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_request(&self, payload: &RequestPayload) -> HookResult<Option<HttpResponse>> {
		self.on_request.as_ref().map_or(Ok(None), |f| f(payload))
	}

	async fn on_connect(&self, payload: &ConnectPayload) -> HookResult<Context> {
		self.on_connect.as_ref().map_or(Ok(Context::new()), |f| f(payload))
	}

	async fn on_authenticate(&self, payload: &AuthenticatePayload) -> HookResult<Context> {
		self.on_authenticate.as_ref().map_or(Ok(Context::new()), |f| f(payload))
	}

	async fn on_load_document(&self, payload: &LoadDocumentPayload) -> HookResult<LoadOutcome> {
		self.on_load_document.as_ref().map_or(Ok(LoadOutcome::None), |f| f(payload))
	}

	async fn after_load_document(&self, payload: &AfterLoadDocumentPayload) -> HookResult<()> {
		self.after_load_document.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn before_handle_message(&self, payload: &BeforeHandleMessagePayload) -> HookResult<()> {
		self.before_handle_message.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn before_broadcast_stateless(&self, payload: &StatelessPayload) -> HookResult<()> {
		self.before_broadcast_stateless.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_stateless(&self, payload: &StatelessPayload) -> HookResult<()> {
		self.on_stateless.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_change(&self, payload: &ChangePayload) -> HookResult<()> {
		self.on_change.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_store_document(&self, payload: &StoreDocumentPayload) -> HookResult<()> {
		self.on_store_document.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn after_store_document(&self, payload: &StoreDocumentPayload) -> HookResult<()> {
		self.after_store_document.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_awareness_update(&self, payload: &AwarenessUpdatePayload) -> HookResult<()> {
		self.on_awareness_update.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn connected(&self, payload: &ConnectPayload) -> HookResult<()> {
		self.connected.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_disconnect(&self, payload: &DisconnectPayload) -> HookResult<()> {
		self.on_disconnect.as_ref().map_or(Ok(()), |f| f(payload))
	}

	async fn on_destroy(&self) -> HookResult<()> {
		self.on_destroy.as_ref().map_or(Ok(()), |f| f())
	}
}

pub struct ConfigurationBuilder {
	name: Box<str>,
	address: Box<str>,
	port: u16,
	timeout_ms: u64,
	debounce_ms: u64,
	max_debounce_ms: u64,
	quiet: bool,
	extensions: Vec<Arc<dyn Extension>>,
	inline: InlineExtension,
}

impl ConfigurationBuilder {
	pub fn new() -> Self {
		ConfigurationBuilder {
			name: "collab-server".into(),
			address: "127.0.0.1".into(),
			port: 8080,
			timeout_ms: 30_000,
			debounce_ms: 2_000,
			max_debounce_ms: 10_000,
			quiet: false,
			extensions: Vec::new(),
			inline: InlineExtension::default(),
		}
	}

	pub fn name(&mut self, name: impl Into<Box<str>>) -> &mut Self {
		self.name = name.into();
		self
	}

	pub fn address(&mut self, address: impl Into<Box<str>>) -> &mut Self {
		self.address = address.into();
		self
	}

	pub fn port(&mut self, port: u16) -> &mut Self {
		self.port = port;
		self
	}

	pub fn timeout_ms(&mut self, timeout_ms: u64) -> &mut Self {
		self.timeout_ms = timeout_ms;
		self
	}

	pub fn debounce_ms(&mut self, debounce_ms: u64) -> &mut Self {
		self.debounce_ms = debounce_ms;
		self
	}

	pub fn max_debounce_ms(&mut self, max_debounce_ms: u64) -> &mut Self {
		self.max_debounce_ms = max_debounce_ms;
		self
	}

	pub fn quiet(&mut self, quiet: bool) -> &mut Self {
		self.quiet = quiet;
		self
	}

	pub fn extension(&mut self, extension: Arc<dyn Extension>) -> &mut Self {
		self.extensions.push(extension);
		self
	}

	pub fn on_configure(&mut self, handler: impl Fn() -> HookResult<()> + Send + Sync + 'static) -> &mut Self {
		self.inline.on_configure = Some(Box::new(handler));
		self
	}

	pub fn on_listen(&mut self, handler: impl Fn(u16) -> HookResult<()> + Send + Sync + 'static) -> &mut Self {
		self.inline.on_listen = Some(Box::new(handler));
		self
	}

	pub fn on_upgrade(
		&mut self,
		handler: impl Fn(&UpgradePayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_upgrade = Some(Box::new(handler));
		self
	}

	pub fn on_request(
		&mut self,
		handler: impl Fn(&RequestPayload) -> HookResult<Option<HttpResponse>> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_request = Some(Box::new(handler));
		self
	}

	pub fn on_connect(
		&mut self,
		handler: impl Fn(&ConnectPayload) -> HookResult<Context> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_connect = Some(Box::new(handler));
		self
	}

	/// Registering an inline `onAuthenticate` handler makes the server
	/// require authentication, the same as registering an extension that
	/// overrides the method.
	pub fn on_authenticate(
		&mut self,
		handler: impl Fn(&AuthenticatePayload) -> HookResult<Context> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_authenticate = Some(Box::new(handler));
		self.inline.requires_authentication = true;
		self
	}

	pub fn on_load_document(
		&mut self,
		handler: impl Fn(&LoadDocumentPayload) -> HookResult<LoadOutcome> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_load_document = Some(Box::new(handler));
		self
	}

	pub fn after_load_document(
		&mut self,
		handler: impl Fn(&AfterLoadDocumentPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.after_load_document = Some(Box::new(handler));
		self
	}

	pub fn before_handle_message(
		&mut self,
		handler: impl Fn(&BeforeHandleMessagePayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.before_handle_message = Some(Box::new(handler));
		self
	}

	pub fn before_broadcast_stateless(
		&mut self,
		handler: impl Fn(&StatelessPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.before_broadcast_stateless = Some(Box::new(handler));
		self
	}

	pub fn on_stateless(
		&mut self,
		handler: impl Fn(&StatelessPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_stateless = Some(Box::new(handler));
		self
	}

	pub fn on_change(
		&mut self,
		handler: impl Fn(&ChangePayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_change = Some(Box::new(handler));
		self
	}

	pub fn on_store_document(
		&mut self,
		handler: impl Fn(&StoreDocumentPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_store_document = Some(Box::new(handler));
		self
	}

	pub fn after_store_document(
		&mut self,
		handler: impl Fn(&StoreDocumentPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.after_store_document = Some(Box::new(handler));
		self
	}

	pub fn on_awareness_update(
		&mut self,
		handler: impl Fn(&AwarenessUpdatePayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_awareness_update = Some(Box::new(handler));
		self
	}

	pub fn connected(
		&mut self,
		handler: impl Fn(&ConnectPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.connected = Some(Box::new(handler));
		self
	}

	pub fn on_disconnect(
		&mut self,
		handler: impl Fn(&DisconnectPayload) -> HookResult<()> + Send + Sync + 'static,
	) -> &mut Self {
		self.inline.on_disconnect = Some(Box::new(handler));
		self
	}

	pub fn on_destroy(&mut self, handler: impl Fn() -> HookResult<()> + Send + Sync + 'static) -> &mut Self {
		self.inline.on_destroy = Some(Box::new(handler));
		self
	}

	pub fn build(&mut self) -> Configuration {
		let mut extensions = std::mem::take(&mut self.extensions);
		let inline = std::mem::take(&mut self.inline);
		if !inline.is_empty() {
			extensions.push(Arc::new(inline));
		}

		let hooks = HookPipeline::new(extensions);
		let requires_authentication = hooks.requires_authentication();

		Configuration {
			name: self.name.clone(),
			address: self.address.clone(),
			port: self.port,
			timeout_ms: self.timeout_ms,
			debounce_ms: self.debounce_ms,
			max_debounce_ms: self.max_debounce_ms,
			quiet: self.quiet,
			hooks,
			requires_authentication,
		}
	}
}

impl Default for ConfigurationBuilder {
	fn default() -> Self {
		Self::new()
	}
}

// vim: ts=4
