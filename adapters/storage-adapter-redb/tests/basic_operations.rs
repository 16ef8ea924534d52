//! Exercises the redb storage extension's load/store hooks directly,
//! without going through the kernel.

use collab_core::hooks::{Context, Extension, LoadDocumentPayload, LoadOutcome, StoreDocumentPayload};
use collab_storage_adapter_redb::RedbStorageExtension;
use tempfile::TempDir;
use yrs::{GetString, ReadTxn, StateVector, Text, Transact};

fn open_extension() -> (RedbStorageExtension, TempDir) {
	let dir = TempDir::new().expect("temp dir");
	let extension = RedbStorageExtension::open(dir.path().join("collab.redb")).expect("open extension");
	(extension, dir)
}

fn encode(doc: &yrs::Doc) -> Vec<u8> {
	let txn = doc.transact();
	txn.encode_state_as_update_v1(&StateVector::default())
}

#[tokio::test]
async fn loading_an_unknown_document_returns_none() {
	let (extension, _dir) = open_extension();
	let payload = LoadDocumentPayload { document_name: "missing".into(), context: Context::new() };

	let outcome = extension.on_load_document(&payload).await.expect("load hook");
	assert!(matches!(outcome, LoadOutcome::None));
}

#[tokio::test]
async fn stored_snapshot_round_trips_through_load() {
	let (extension, _dir) = open_extension();

	let doc = yrs::Doc::new();
	let text = doc.get_or_insert_text("body");
	{
		let mut txn = doc.transact_mut();
		text.push(&mut txn, "hello world");
	}
	let state = encode(&doc);

	let store_payload =
		StoreDocumentPayload { document_name: "doc1".into(), state: state.clone(), context: Context::new() };
	extension.on_store_document(&store_payload).await.expect("store hook");

	let load_payload = LoadDocumentPayload { document_name: "doc1".into(), context: Context::new() };
	let outcome = extension.on_load_document(&load_payload).await.expect("load hook");

	let LoadOutcome::Document(loaded) = outcome else {
		panic!("expected a reconstructed document");
	};
	let loaded_text = loaded.get_or_insert_text("body");
	let txn = loaded.transact();
	assert_eq!(loaded_text.get_string(&txn), "hello world");
}

#[tokio::test]
async fn later_store_overwrites_earlier_snapshot() {
	let (extension, _dir) = open_extension();

	for word in ["first", "second"] {
		let doc = yrs::Doc::new();
		let text = doc.get_or_insert_text("body");
		{
			let mut txn = doc.transact_mut();
			text.push(&mut txn, word);
		}
		let state = encode(&doc);
		let payload =
			StoreDocumentPayload { document_name: "doc2".into(), state, context: Context::new() };
		extension.on_store_document(&payload).await.expect("store hook");
	}

	let load_payload = LoadDocumentPayload { document_name: "doc2".into(), context: Context::new() };
	let outcome = extension.on_load_document(&load_payload).await.expect("load hook");
	let LoadOutcome::Document(loaded) = outcome else {
		panic!("expected a reconstructed document");
	};
	let loaded_text = loaded.get_or_insert_text("body");
	let txn = loaded.transact();
	assert_eq!(loaded_text.get_string(&txn), "second");
}

#[tokio::test]
async fn documents_with_different_names_are_independent() {
	let (extension, _dir) = open_extension();

	let doc_a = yrs::Doc::new();
	doc_a.get_or_insert_text("body");
	let payload_a =
		StoreDocumentPayload { document_name: "alpha".into(), state: encode(&doc_a), context: Context::new() };
	extension.on_store_document(&payload_a).await.expect("store hook");

	let load_payload = LoadDocumentPayload { document_name: "beta".into(), context: Context::new() };
	let outcome = extension.on_load_document(&load_payload).await.expect("load hook");
	assert!(matches!(outcome, LoadOutcome::None));
}
