//! Collaborative document editing server binary: wires the axum transport
//! adapter, the redb storage extension, and the kernel together.

mod http;
mod ws;

use axum::routing::get;
use axum::Router;
use collab_core::config::ConfigurationBuilder;
use collab_kernel::kernel::Kernel;
use collab_storage_adapter_redb::RedbStorageExtension;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
	kernel: Arc<Kernel>,
}

struct Config {
	address: Box<str>,
	port: u16,
	timeout_ms: u64,
	debounce_ms: u64,
	max_debounce_ms: u64,
	storage_dir: PathBuf,
	quiet: bool,
}

fn load_config() -> Config {
	Config {
		address: env::var("ADDRESS").unwrap_or_else(|_| "127.0.0.1".into()).into(),
		port: env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080),
		timeout_ms: env::var("TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(30_000),
		debounce_ms: env::var("DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(2_000),
		max_debounce_ms: env::var("MAX_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000),
		storage_dir: env::var("STORAGE_DIR").unwrap_or_else(|_| "./data".into()).into(),
		quiet: env::var("QUIET").map(|v| v != "0" && !v.is_empty()).unwrap_or(false),
	}
}

#[tokio::main]
async fn main() {
	collab_core::logging::init_logging();
	let config = load_config();

	let storage = RedbStorageExtension::open(config.storage_dir.join("collab.redb"))
		.expect("failed to open storage directory");

	let mut builder = ConfigurationBuilder::new();
	builder
		.address(config.address.clone())
		.port(config.port)
		.timeout_ms(config.timeout_ms)
		.debounce_ms(config.debounce_ms)
		.max_debounce_ms(config.max_debounce_ms)
		.quiet(config.quiet)
		.extension(Arc::new(storage));
	let configuration = builder.build();

	let kernel = Kernel::new(configuration);
	kernel.configure().await.expect("extension onConfigure failed");
	kernel.on_listen().await.expect("extension onListen failed");

	let state = AppState { kernel: Arc::clone(&kernel) };
	let app = Router::new()
		.route("/ws", get(ws::upgrade))
		.fallback(http::fallback)
		.with_state(state);

	let bind_addr = format!("{}:{}", config.address, config.port);
	if !config.quiet {
		tracing::info!(address = %bind_addr, "collab-server listening");
	}
	let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind listener");

	axum::serve(listener, app).await.expect("server loop failed");

	kernel.destroy().await;
}

// vim: ts=4
