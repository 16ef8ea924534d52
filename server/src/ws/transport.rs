//! Adapts an axum WebSocket to the kernel's `Transport` trait and to a
//! `Stream<Item = Vec<u8>>` of inbound binary frames.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use collab_types::close::CloseEvent;
use collab_types::error::{ClResult, Error};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct AxumTransport {
	sink: Mutex<SplitSink<WebSocket, Message>>,
	closed: AtomicBool,
}

impl AxumTransport {
	pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
		AxumTransport { sink: Mutex::new(sink), closed: AtomicBool::new(false) }
	}
}

#[async_trait]
impl collab_kernel::transport::Transport for AxumTransport {
	async fn send(&self, bytes: Vec<u8>) -> ClResult<()> {
		if self.closed.load(Ordering::Relaxed) {
			return Ok(());
		}
		self.sink
			.lock()
			.await
			.send(Message::Binary(bytes.into()))
			.await
			.map_err(|e| Error::TransportWrite(e.to_string()))
	}

	async fn close(&self, event: CloseEvent) -> ClResult<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let frame = CloseFrame { code: event.code, reason: String::from(event.reason).into() };
		let mut sink = self.sink.lock().await;
		let _ = sink.send(Message::Close(Some(frame))).await;
		let _ = sink.close().await;
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Relaxed)
	}
}

/// Filters an axum WebSocket's inbound stream down to binary frame payloads;
/// text, ping/pong, and close frames are dropped rather than surfaced as
/// kernel-level messages.
pub struct InboundFrames {
	inner: SplitStream<WebSocket>,
}

impl InboundFrames {
	pub fn new(inner: SplitStream<WebSocket>) -> Self {
		InboundFrames { inner }
	}
}

impl Stream for InboundFrames {
	type Item = Vec<u8>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		loop {
			return match Pin::new(&mut self.inner).poll_next(cx) {
				Poll::Ready(Some(Ok(Message::Binary(bytes)))) => Poll::Ready(Some(bytes.to_vec())),
				Poll::Ready(Some(Ok(_))) => continue,
				Poll::Ready(Some(Err(err))) => {
					tracing::debug!(error = %err, "websocket read error");
					Poll::Ready(None)
				}
				Poll::Ready(None) => Poll::Ready(None),
				Poll::Pending => Poll::Pending,
			};
		}
	}
}

// vim: ts=4
