// End-to-end scenarios through DocumentService on the embedded store.

use docstore_core::document::PayloadCodec;
use docstore_core::{
    BucketPartitioner, DocError, Document, DocumentService, FanoutStatus, HistoricalRepository,
    Identifier, Index, ScalarValue, Session, StoreConfig, Table, View, WideColumnStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// ─── Helpers ────────────────────────────────────────────

async fn service() -> DocumentService {
    docstore_core::logging::init_test();
    DocumentService::open(&StoreConfig::default()).await.unwrap()
}

async fn uuid_table(service: &DocumentService) -> Table {
    let table = Table::new("acme", "users", "id:uuid");
    service.create_table(&table).await.unwrap();
    table
}

fn uuid_doc(id: Uuid, content: serde_json::Value) -> Document {
    Document::from_json(Identifier::of(id), &content).unwrap()
}

// ═══════════════════════════════════════════════════════════
// Document lifecycle
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn create_then_read_returns_same_payload() {
    let service = service().await;
    let table = uuid_table(&service).await;
    let id = Uuid::new_v4();

    let outcome = service
        .create(&table.id(), &uuid_doc(id, json!({"a": 1})))
        .await
        .unwrap();
    assert_eq!(outcome.document.created_at, outcome.document.updated_at);

    let read = service.read(&table.id(), &Identifier::of(id)).await.unwrap();
    assert_eq!(read.content().unwrap(), Some(json!({"a": 1})));
    assert_eq!(read.created_at, outcome.document.created_at);
    assert!(service.exists(&table.id(), &Identifier::of(id)).await.unwrap());
}

#[tokio::test]
async fn second_create_is_duplicate() {
    let service = service().await;
    let table = uuid_table(&service).await;
    let doc = uuid_doc(Uuid::new_v4(), json!({"a": 1}));

    service.create(&table.id(), &doc).await.unwrap();
    let err = service.create(&table.id(), &doc).await.unwrap_err();
    assert!(err.is_duplicate());
}

#[tokio::test]
async fn update_of_missing_document_is_not_found() {
    let service = service().await;
    let table = uuid_table(&service).await;
    let err = service
        .update(&table.id(), &uuid_doc(Uuid::new_v4(), json!({"a": 2})))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn wrong_identifier_type_is_rejected() {
    let service = service().await;
    let table = Table::new("acme", "events", "id:timestamp");
    service.create_table(&table).await.unwrap();

    let err = service
        .create(&table.id(), &uuid_doc(Uuid::new_v4(), json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, DocError::InvalidIdentifier { .. }));
    assert!(err.is_precondition());
}

#[tokio::test]
async fn update_replaces_payload_and_keeps_created_at() {
    let service = service().await;
    let table = uuid_table(&service).await;
    let id = Uuid::new_v4();
    let created = service
        .create(&table.id(), &uuid_doc(id, json!({"v": 1})))
        .await
        .unwrap();
    service
        .update(&table.id(), &uuid_doc(id, json!({"v": 2})))
        .await
        .unwrap();

    let read = service.read(&table.id(), &Identifier::of(id)).await.unwrap();
    assert_eq!(read.content().unwrap(), Some(json!({"v": 2})));
    assert_eq!(read.created_at, created.document.created_at);
    assert!(read.updated_at >= created.document.updated_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_admit_exactly_one() {
    let service = Arc::new(service().await);
    let table = uuid_table(&service).await;
    let id = Uuid::new_v4();

    let mut handles = Vec::new();
    for n in 0..16 {
        let service = Arc::clone(&service);
        let table = table.id();
        handles.push(tokio::spawn(async move {
            service
                .create(&table, &uuid_doc(id, json!({"writer": n})))
                .await
        }));
    }
    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(e) => assert!(e.is_duplicate(), "unexpected error: {e}"),
        }
    }
    assert_eq!(applied, 1);
}

// ═══════════════════════════════════════════════════════════
// Views and indexes
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn view_row_appears_under_its_own_key() {
    let service = service().await;
    let table = uuid_table(&service).await;
    service
        .create_view(&View::new("acme", "users", "by_created", "createdAt:timestamp"))
        .await
        .unwrap();

    let content = json!({"createdAt": "2026-03-01T10:00:00Z", "name": "Ann"});
    let outcome = service
        .create(&table.id(), &uuid_doc(Uuid::new_v4(), content.clone()))
        .await
        .unwrap();
    let FanoutStatus::Written(view_id) = &outcome.views[0].status else {
        panic!("view write not applied: {:?}", outcome.views);
    };

    let expected = Identifier::new([ScalarValue::timestamp_millis(1_772_359_200_000).unwrap()]);
    assert_eq!(view_id, &expected);
    let row = service
        .read_view(&table.id(), "by_created", &expected)
        .await
        .unwrap();
    assert_eq!(row.content().unwrap(), Some(content));
}

#[tokio::test]
async fn case_insensitive_index_lookup() {
    let service = service().await;
    let table = uuid_table(&service).await;
    service
        .create_index(
            &Index::new("acme", "users", "by_email", ["email:text"])
                .unique()
                .case_insensitive(),
        )
        .await
        .unwrap();

    let id = Uuid::new_v4();
    service
        .create(&table.id(), &uuid_doc(id, json!({"email": "Ann@Example.com"})))
        .await
        .unwrap();

    let found = service
        .find_by_index(&table.id(), "by_email", &[ScalarValue::from("ann@example.COM")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].identifier, Identifier::of(id));
    assert_eq!(
        found[0].content().unwrap(),
        Some(json!({"email": "Ann@Example.com"}))
    );

    // same owner re-writing its own entry is not a conflict
    let again = service
        .upsert(&table.id(), &uuid_doc(id, json!({"email": "ANN@example.com"})))
        .await
        .unwrap();
    assert!(again.is_complete());
}

#[tokio::test]
async fn schema_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let partitioner = Arc::new(BucketPartitioner::default());
    let id = Uuid::new_v4();
    {
        let store = Arc::new(WideColumnStore::open(dir.path()).unwrap());
        let service =
            DocumentService::new(Arc::clone(&store) as Arc<dyn Session>, "ks", Arc::clone(&partitioner))
                .unwrap();
        service.bootstrap().await.unwrap();
        let table = uuid_table(&service).await;
        service
            .create(&table.id(), &uuid_doc(id, json!({"kept": true})))
            .await
            .unwrap();
        store.flush().unwrap();
    }
    let store = Arc::new(WideColumnStore::open(dir.path()).unwrap());
    let service = DocumentService::new(store, "ks", partitioner).unwrap();
    service.bootstrap().await.unwrap();
    let tables = service.catalog().tables().list("acme").await.unwrap();
    assert_eq!(tables.len(), 1);
    let read = service
        .read(&tables[0].id(), &Identifier::of(id))
        .await
        .unwrap();
    assert_eq!(read.content().unwrap(), Some(json!({"kept": true})));
}

// ═══════════════════════════════════════════════════════════
// Historical tables
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn historical_versions_and_tombstone() {
    let session: Arc<dyn Session> = Arc::new(WideColumnStore::open_temporary().unwrap());
    let repo = HistoricalRepository::from_dsl(session, "ks", "audit", "id:int").unwrap();
    repo.create_table().await.unwrap();

    for v in 1..=3 {
        let doc = Document::from_json(Identifier::of(7), &json!({ "v": v })).unwrap();
        repo.upsert(&doc).await.unwrap();
    }
    let latest = repo.read(&Identifier::of(7)).await.unwrap();
    assert_eq!(latest.content().unwrap(), Some(json!({"v": 3})));

    assert!(repo.delete(&Identifier::of(7)).await.unwrap());
    assert!(!repo.exists(&Identifier::of(7)).await.unwrap());
    let history = repo.read_history(&Identifier::of(7)).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history[0].deleted);
    assert!(history[1..].iter().all(|h| !h.deleted));

    let doc = Document::from_json(Identifier::of(7), &json!({})).unwrap();
    assert!(matches!(
        repo.create(&doc).await,
        Err(DocError::Unsupported { .. })
    ));
}

// ═══════════════════════════════════════════════════════════
// Buckets
// ═══════════════════════════════════════════════════════════

#[test]
fn bucket_distribution_is_bounded() {
    let partitioner = BucketPartitioner::new(100).unwrap();
    let mut rng = StdRng::seed_from_u64(0x00d0_c570);
    let mut counts = [0u32; 100];
    for _ in 0..10_000 {
        let key = ScalarValue::from(Uuid::from_bytes(rng.r#gen()));
        let bucket = partitioner.bucket_for(&key);
        assert!((0..100).contains(&bucket));
        counts[bucket as usize] += 1;
    }
    let mean = 10_000 / 100;
    assert!(counts.iter().all(|c| *c <= 3 * mean), "{counts:?}");
}

#[test]
fn payload_codec_is_self_describing() {
    let value = json!({"nested": {"list": [1, 2.5, "x"]}, "flag": true});
    let bytes = PayloadCodec::encode(&value).unwrap();
    assert_eq!(PayloadCodec::decode(&bytes).unwrap(), value);
}
