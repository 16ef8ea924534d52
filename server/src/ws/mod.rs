pub mod transport;

use crate::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use collab_core::hooks::{HookError, RequestHeaders, UpgradePayload};
use collab_types::close::CloseCode;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use transport::{AxumTransport, InboundFrames};

fn collect_headers(headers: &HeaderMap) -> RequestHeaders {
	let mut map = HashMap::new();
	for (name, value) in headers {
		if let Ok(value) = value.to_str() {
			map.insert(name.as_str().to_string(), value.to_string());
		}
	}
	RequestHeaders(map)
}

fn close_code_status(code: CloseCode) -> StatusCode {
	match code {
		CloseCode::Unauthorized => StatusCode::UNAUTHORIZED,
		CloseCode::Forbidden => StatusCode::FORBIDDEN,
		CloseCode::ResetConnection => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

fn rejection_response(err: HookError) -> Response {
	(close_code_status(err.code), err.reason).into_response()
}

/// Entry point for `GET /ws`; runs the `onUpgrade` hook, then upgrades the
/// connection and hands the resulting socket to the kernel's
/// transport-driving loop. A hook rejection aborts the upgrade entirely.
pub async fn upgrade(
	State(state): State<AppState>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	let request_headers = collect_headers(&headers);
	let upgrade_payload = UpgradePayload { request_headers: request_headers.clone() };

	if let Err(err) = state.kernel.on_upgrade(&upgrade_payload).await {
		return rejection_response(err);
	}

	ws.on_upgrade(move |socket| async move {
		let (sink, stream) = socket.split();
		let transport: Arc<dyn collab_kernel::transport::Transport> = Arc::new(AxumTransport::new(sink));
		let inbound = InboundFrames::new(stream);
		state.kernel.handle_transport(transport, inbound, request_headers).await;
	})
}

// vim: ts=4
