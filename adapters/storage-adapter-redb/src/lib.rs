//! Redb-backed storage extension.
//!
//! Implements the `onLoadDocument`/`afterLoadDocument`/`onStoreDocument`/
//! `afterStoreDocument` hooks against `redb`, the reference persistence
//! backend for a collaborative document server.
//!
//! # Storage layout
//!
//! One `redb::Database` file under `storage_path`, with two tables:
//! - `snapshots` — `document_name -> raw yrs update bytes` (the full current
//!   CRDT state, overwritten on every store cycle; the kernel always hands
//!   `onStoreDocument` the complete state rather than an incremental delta,
//!   so there is no update log to append to)
//! - `metadata` — `document_name -> metadata JSON` (`updated_at`, `size_bytes`)

use async_trait::async_trait;
use collab_core::hooks::{
	AfterLoadDocumentPayload, Extension, HookError, HookResult, LoadDocumentPayload, LoadOutcome,
	StoreDocumentPayload,
};
use collab_types::close::CloseCode;
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, Transact, Update};

mod error;
pub use error::Error;

mod tables {
	use redb::TableDefinition;

	pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
	pub const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMetadata {
	updated_at: i64,
	size_bytes: usize,
}

/// A reference `Extension` persisting documents to a single `redb` file.
pub struct RedbStorageExtension {
	db: Arc<redb::Database>,
}

impl std::fmt::Debug for RedbStorageExtension {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedbStorageExtension").finish_non_exhaustive()
	}
}

impl RedbStorageExtension {
	/// Opens (creating if necessary) `storage_path`, ensures its tables
	/// exist, and returns an extension ready to register with a
	/// `ConfigurationBuilder`.
	pub fn open(storage_path: impl AsRef<Path>) -> Result<Self, Error> {
		let path: PathBuf = storage_path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
		}

		let db = redb::Database::create(&path).map_err(|e| Error::Db(e.to_string()))?;
		let tx = db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		let _ = tx.open_table(tables::SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
		let _ = tx.open_table(tables::METADATA).map_err(|e| Error::Db(e.to_string()))?;
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;

		Ok(RedbStorageExtension { db: Arc::new(db) })
	}

	fn load_snapshot(&self, document_name: &str) -> Result<Option<Vec<u8>>, Error> {
		let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
		let table = tx.open_table(tables::SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
		Ok(table.get(document_name).map_err(|e| Error::Db(e.to_string()))?.map(|v| v.value().to_vec()))
	}

	fn write_snapshot(&self, document_name: &str, state: &[u8], meta: &DocumentMetadata) -> Result<(), Error> {
		let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
		{
			let mut snapshots = tx.open_table(tables::SNAPSHOTS).map_err(|e| Error::Db(e.to_string()))?;
			snapshots.insert(document_name, state).map_err(|e| Error::Db(e.to_string()))?;

			let mut metadata = tx.open_table(tables::METADATA).map_err(|e| Error::Db(e.to_string()))?;
			let meta_json = serde_json::to_string(meta)?;
			metadata.insert(document_name, meta_json.as_str()).map_err(|e| Error::Db(e.to_string()))?;
		}
		tx.commit().map_err(|e| Error::Db(e.to_string()))?;
		Ok(())
	}
}

fn hook_error(err: Error) -> HookError {
	HookError::with_message(CloseCode::Forbidden, "storage-error", err.to_string())
}

#[async_trait]
impl Extension for RedbStorageExtension {
	fn priority(&self) -> i32 {
		50
	}

	async fn on_load_document(&self, payload: &LoadDocumentPayload) -> HookResult<LoadOutcome> {
		let snapshot = self.load_snapshot(&payload.document_name).map_err(hook_error)?;
		let Some(bytes) = snapshot else {
			return Ok(LoadOutcome::None);
		};

		let doc = Doc::new();
		let update = Update::decode_v1(&bytes).map_err(|e| {
			HookError::with_message(CloseCode::Forbidden, "load-failed", e.to_string())
		})?;
		{
			let mut txn = doc.transact_mut();
			txn.apply_update(update).map_err(|e| {
				HookError::with_message(CloseCode::Forbidden, "load-failed", e.to_string())
			})?;
		}

		tracing::debug!(document = %payload.document_name, bytes = bytes.len(), "loaded document snapshot");
		Ok(LoadOutcome::Document(doc))
	}

	async fn after_load_document(&self, payload: &AfterLoadDocumentPayload) -> HookResult<()> {
		tracing::trace!(document = %payload.document_name, "afterLoadDocument");
		Ok(())
	}

	async fn on_store_document(&self, payload: &StoreDocumentPayload) -> HookResult<()> {
		let meta = DocumentMetadata {
			updated_at: collab_types::timestamp::Timestamp::now().0,
			size_bytes: payload.state.len(),
		};
		self.write_snapshot(&payload.document_name, &payload.state, &meta).map_err(hook_error)?;
		tracing::trace!(document = %payload.document_name, bytes = payload.state.len(), "stored document snapshot");
		Ok(())
	}

	async fn after_store_document(&self, _payload: &StoreDocumentPayload) -> HookResult<()> {
		Ok(())
	}
}

// vim: ts=4
