//! Glue around `yrs`'s bundled sync/awareness sub-protocol.
//!
//! The kernel never constructs `yrs::sync::Message` frames by hand; it asks
//! this module to encode a full document state or a single update as a
//! ready-to-send `Sync` payload, and to decode/apply whatever the peer sends
//! back.

use crate::codec::FrameReader;
use collab_types::error::Error;
use yrs::encoding::write::Write as YWrite;
use yrs::sync::protocol::{MSG_SYNC, MSG_SYNC_UPDATE};
use yrs::sync::{Awareness, AwarenessUpdate};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::{Encode, Encoder, EncoderV1};
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Encode the full current state of `doc` as a `Sync`/`SyncUpdate` payload.
pub fn encode_full_state(doc: &Doc) -> Vec<u8> {
	let bin = {
		let txn = doc.transact();
		txn.encode_state_as_update_v1(&StateVector::default())
	};
	encode_sync_update(&bin)
}

/// Wrap a raw update byte buffer as a `Sync`/`SyncUpdate` payload.
pub fn encode_sync_update(update: &[u8]) -> Vec<u8> {
	let mut enc = EncoderV1::new();
	enc.write_var(MSG_SYNC);
	enc.write_var(MSG_SYNC_UPDATE);
	enc.write_buf(update);
	enc.to_vec()
}

/// Apply a raw `yrs` update (already stripped of the sync envelope) to `doc`.
pub fn apply_update(doc: &Doc, update: &[u8]) -> Result<(), Error> {
	let update = Update::decode_v1(update).map_err(|e| Error::Protocol(e.to_string()))?;
	let mut txn = doc.transact_mut();
	txn.apply_update(update).map_err(|e| Error::Protocol(e.to_string()))
}

/// Encode the raw CRDT state (no sync envelope), suitable for handing to a
/// storage hook.
pub fn encode_raw_state(doc: &Doc) -> Vec<u8> {
	let txn = doc.transact();
	txn.encode_state_as_update_v1(&StateVector::default())
}

/// Apply an awareness protocol update to the shared awareness state.
pub fn apply_awareness_update(awareness: &mut Awareness, bytes: &[u8]) -> Result<(), Error> {
	let update = AwarenessUpdate::decode_v1(bytes).map_err(|e| Error::Protocol(e.to_string()))?;
	awareness.apply_update(update).map_err(|e| Error::Protocol(e.to_string()))
}

/// Encode the full current awareness state.
pub fn encode_awareness_update(awareness: &Awareness) -> Result<Vec<u8>, Error> {
	let update = awareness.update().map_err(|e| Error::Protocol(e.to_string()))?;
	Ok(update.encode_v1())
}

/// Strip the `Sync`/`SyncUpdate` envelope written by [`encode_sync_update`]
/// and return the raw update bytes it carries.
pub fn decode_sync_update_payload(payload: &[u8]) -> Result<Vec<u8>, Error> {
	let mut reader = FrameReader::new(payload);
	let sync_tag = reader.read_var_u64()?;
	let update_tag = reader.read_var_u64()?;
	if sync_tag != u64::from(MSG_SYNC) || update_tag != u64::from(MSG_SYNC_UPDATE) {
		return Err(Error::Protocol("not a sync-update payload".into()));
	}
	reader.read_var_buf()
}

#[cfg(test)]
mod tests {
	use super::*;
	use yrs::{GetString, Text};

	#[test]
	fn full_state_round_trips_through_apply() {
		let doc_a = Doc::new();
		let text_a = doc_a.get_or_insert_text("content");
		{
			let mut txn = doc_a.transact_mut();
			text_a.push(&mut txn, "hello");
		}

		let full = encode_full_state(&doc_a);
		let raw_update = decode_sync_update_payload(&full).unwrap();

		let doc_b = Doc::new();
		apply_update(&doc_b, &raw_update).unwrap();
		let text_b = doc_b.get_or_insert_text("content");
		let txn = doc_b.transact();
		assert_eq!(text_b.get_string(&txn), "hello");
	}
}

// vim: ts=4
