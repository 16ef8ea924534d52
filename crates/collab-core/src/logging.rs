//! Structured logging bootstrap, shared by the server binary and by tests
//! that want log output.

/// Installs a `tracing_subscriber` formatter honoring `RUST_LOG`. Safe to
/// call more than once; later calls are no-ops if a subscriber is already
/// installed.
pub fn init_logging() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.try_init();
}

// vim: ts=4
