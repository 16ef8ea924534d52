//! Bounded in-memory log of inbound/outbound messages, drained at shutdown.

use collab_types::timestamp::Timestamp;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Inbound,
	Outbound,
}

#[derive(Debug, Clone)]
pub struct DebugEntry {
	pub at: Timestamp,
	pub document_name: Box<str>,
	pub message_type: u64,
	pub byte_len: usize,
	pub direction: Direction,
}

pub struct DebugSink {
	capacity: usize,
	entries: Mutex<VecDeque<DebugEntry>>,
	quiet: bool,
}

impl DebugSink {
	pub fn new(capacity: usize, quiet: bool) -> Self {
		DebugSink { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)), quiet }
	}

	pub fn record(
		&self,
		document_name: &str,
		message_type: u64,
		byte_len: usize,
		direction: Direction,
	) {
		if !self.quiet {
			tracing::trace!(document = document_name, message_type, byte_len, ?direction, "message");
		}

		let mut entries = self.entries.lock();
		if entries.len() == self.capacity {
			entries.pop_front();
		}
		entries.push_back(DebugEntry {
			at: Timestamp::now(),
			document_name: document_name.into(),
			message_type,
			byte_len,
			direction,
		});
	}

	/// Drain and print the buffered entries; called once from `destroy()`.
	pub fn drain(&self) -> Vec<DebugEntry> {
		self.entries.lock().drain(..).collect()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drops_oldest_entry_past_capacity() {
		let sink = DebugSink::new(2, true);
		sink.record("doc", 0, 1, Direction::Inbound);
		sink.record("doc", 1, 2, Direction::Inbound);
		sink.record("doc", 2, 3, Direction::Inbound);

		let drained = sink.drain();
		assert_eq!(drained.len(), 2);
		assert_eq!(drained[0].message_type, 1);
		assert_eq!(drained[1].message_type, 2);
	}
}

// vim: ts=4
