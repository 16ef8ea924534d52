//! Per-key coalescing timer with a maximum stall bound.
//!
//! Repeated [`Debouncer::schedule`] calls for the same key postpone the
//! callback, but never indefinitely: the original `start` timestamp is kept
//! across reschedules, and once `maxDebounce` has elapsed since that first
//! call the pending callback runs immediately instead of being pushed out
//! again.

use collab_types::timestamp::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct PendingEntry {
	start: Timestamp,
	handle: JoinHandle<()>,
}

pub struct Debouncer {
	entries: Mutex<HashMap<String, PendingEntry>>,
	debounce_ms: i64,
	max_debounce_ms: i64,
}

impl Debouncer {
	pub fn new(debounce_ms: u64, max_debounce_ms: u64) -> Arc<Self> {
		Arc::new(Debouncer {
			entries: Mutex::new(HashMap::new()),
			debounce_ms: debounce_ms as i64,
			max_debounce_ms: max_debounce_ms as i64,
		})
	}

	/// Schedule `f` to run for `id`. If a call is already pending for `id`,
	/// it is rescheduled but keeps its original `start`; once `start` is
	/// more than `maxDebounce` in the past, `f` runs immediately instead.
	pub fn schedule<F, Fut>(self: &Arc<Self>, id: impl Into<String>, f: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let id = id.into();
		let now = Timestamp::now();

		let start = {
			let mut entries = self.entries.lock();
			match entries.remove(&id) {
				Some(entry) => {
					entry.handle.abort();
					entry.start
				}
				None => now,
			}
		};

		if now.0 - start.0 >= self.max_debounce_ms {
			tokio::spawn(f());
			return;
		}

		let this = Arc::clone(self);
		let id_for_task = id.clone();
		let delay_ms = self.debounce_ms.max(0) as u64;
		let handle = tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
			this.entries.lock().remove(&id_for_task);
			f().await;
		});

		self.entries.lock().insert(id, PendingEntry { start, handle });
	}

	/// Cancel any pending timer for `id` and run `f` immediately, awaiting
	/// its completion before returning.
	pub async fn flush_now<F, Fut>(&self, id: &str, f: F)
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = ()>,
	{
		self.cancel(id);
		f().await;
	}

	/// Cancel any pending timer for `id` without running its callback.
	pub fn cancel(&self, id: &str) {
		if let Some(entry) = self.entries.lock().remove(id) {
			entry.handle.abort();
		}
	}

	pub fn has_pending(&self, id: &str) -> bool {
		self.entries.lock().contains_key(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	#[tokio::test(start_paused = true)]
	async fn coalesces_bursts_into_one_call() {
		let debouncer = Debouncer::new(200, 2000);
		let calls = Arc::new(AtomicU32::new(0));

		for _ in 0..5 {
			let calls = calls.clone();
			debouncer.schedule("doc", move || async move {
				calls.fetch_add(1, Ordering::SeqCst);
			});
			tokio::time::advance(Duration::from_millis(50)).await;
		}

		assert_eq!(calls.load(Ordering::SeqCst), 0);
		tokio::time::advance(Duration::from_millis(250)).await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn fires_at_max_debounce_under_continuous_load() {
		let debouncer = Debouncer::new(200, 1000);
		let calls = Arc::new(AtomicU32::new(0));

		for _ in 0..20 {
			let calls = calls.clone();
			debouncer.schedule("doc", move || async move {
				calls.fetch_add(1, Ordering::SeqCst);
			});
			tokio::time::advance(Duration::from_millis(100)).await;
		}

		assert!(calls.load(Ordering::SeqCst) >= 1);
	}

	#[tokio::test(start_paused = true)]
	async fn flush_now_cancels_pending_and_runs_immediately() {
		let debouncer = Debouncer::new(2000, 10_000);
		let calls = Arc::new(AtomicU32::new(0));

		{
			let calls = calls.clone();
			debouncer.schedule("doc", move || async move {
				calls.fetch_add(1, Ordering::SeqCst);
			});
		}

		debouncer.flush_now("doc", {
			let calls = calls.clone();
			move || async move {
				calls.fetch_add(10, Ordering::SeqCst);
			}
		}).await;

		assert_eq!(calls.load(Ordering::SeqCst), 10);
		assert!(!debouncer.has_pending("doc"));

		tokio::time::advance(Duration::from_millis(2500)).await;
		assert_eq!(calls.load(Ordering::SeqCst), 10);
	}
}

// vim: ts=4
