//! Fallback route for any request that isn't a WebSocket upgrade on `/ws`.
//!
//! Runs the `onRequest` hook chain; if no extension writes a response, the
//! default is a bare `200 OK` with body `OK`.

use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use collab_core::hooks::RequestPayload;
use std::collections::HashMap;

fn collect_headers(headers: &HeaderMap) -> collab_core::hooks::RequestHeaders {
	let mut map = HashMap::new();
	for (name, value) in headers {
		if let Ok(value) = value.to_str() {
			map.insert(name.as_str().to_string(), value.to_string());
		}
	}
	collab_core::hooks::RequestHeaders(map)
}

pub async fn fallback(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
	let payload = RequestPayload { request_headers: collect_headers(&headers), path: uri.path().to_string() };

	match state.kernel.on_request(&payload).await {
		Ok(Some(response)) => {
			let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
			(status, response.body).into_response()
		}
		Ok(None) => (StatusCode::OK, "OK").into_response(),
		Err(err) => {
			let status = match err.code {
				collab_types::close::CloseCode::Unauthorized => StatusCode::UNAUTHORIZED,
				collab_types::close::CloseCode::Forbidden => StatusCode::FORBIDDEN,
				collab_types::close::CloseCode::ResetConnection => StatusCode::INTERNAL_SERVER_ERROR,
			};
			(status, err.reason).into_response()
		}
	}
}

// vim: ts=4
