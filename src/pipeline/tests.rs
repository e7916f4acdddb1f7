//! Stage-by-stage tests for [`Orchestrator::handle`].

use std::{sync::Arc, time::UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use rstest::rstest;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::*;
use crate::{
    catalog::{CatalogStore, MemoryCatalog, MockCatalogStore},
    clock::MockClock,
    kv::MemoryKv,
    object_store::{MemoryObjectStore, MockObjectStore, ObjectStoreError},
    publish::ChannelPublisher,
};

const BUCKET: &str = "thermo-raw";
const EPOCH_SECS: u64 = 1_700_000_000;

struct Rig {
    kv: Arc<MemoryKv>,
    objects: Arc<MemoryObjectStore>,
    catalog: Arc<MemoryCatalog>,
    events: mpsc::Receiver<ProcessedEvent>,
    orchestrator: Orchestrator,
}

fn backends(
    kv: Arc<MemoryKv>,
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
) -> Backends {
    let clock = Arc::new(MockClock::with_time(
        UNIX_EPOCH + Duration::from_secs(EPOCH_SECS),
    ));
    Backends {
        kv,
        clock,
        objects,
        catalog,
        publisher,
    }
}

async fn rig() -> Rig {
    let kv = Arc::new(MemoryKv::new());
    let objects = Arc::new(MemoryObjectStore::new());
    objects.ensure_bucket(BUCKET).await.expect("bucket");
    let catalog = Arc::new(MemoryCatalog::new());
    let (publisher, events) = ChannelPublisher::new(16);
    let orchestrator = Orchestrator::new(
        &IngestConfig::default(),
        backends(
            kv.clone(),
            objects.clone(),
            catalog.clone(),
            Some(Arc::new(publisher)),
        ),
    );
    Rig {
        kv,
        objects,
        catalog,
        events,
        orchestrator,
    }
}

fn rig_with(objects: Arc<dyn ObjectStore>, catalog: Arc<dyn CatalogStore>) -> (Arc<MemoryKv>, Orchestrator) {
    let kv = Arc::new(MemoryKv::new());
    let orchestrator = Orchestrator::new(
        &IngestConfig::default(),
        backends(kv.clone(), objects, catalog, None),
    );
    (kv, orchestrator)
}

fn fragment(source: &str, item: Option<&str>, index: i64, total: i64, chunk: &[u8]) -> BusMessage {
    let mut body = serde_json::json!({
        "index": index,
        "total": total,
        "data": STANDARD.encode(chunk),
    });
    if let Some(item) = item {
        body["image_id"] = serde_json::Value::from(item);
    }
    BusMessage::new(
        format!("camera/{source}/image_json"),
        serde_json::to_vec(&body).expect("encode body"),
    )
}

async fn deliver_all(orchestrator: &Orchestrator, source: &str, item: Option<&str>, chunks: &[&[u8]]) -> Outcome {
    let total = i64::try_from(chunks.len()).expect("fits");
    let mut last = None;
    for (index, chunk) in (0_i64..).zip(chunks) {
        last = Some(orchestrator.handle(fragment(source, item, index, total, chunk)).await);
    }
    last.expect("at least one chunk")
}

#[tokio::test]
async fn incomplete_item_reports_progress() {
    let rig = rig().await;
    let outcome = rig
        .orchestrator
        .handle(fragment("cam-1", Some("img-1"), 0, 3, b"abc"))
        .await;
    assert!(matches!(
        outcome,
        Outcome::Stored {
            received: 1,
            expected: 3,
            ..
        }
    ));
    assert_eq!(rig.objects.upload_count(), 0);
}

#[tokio::test]
async fn complete_item_is_uploaded_catalogued_and_announced() {
    let mut rig = rig().await;
    let outcome = deliver_all(&rig.orchestrator, "cam-1", Some("img-1"), &[b"hello ", b"world"]).await;

    let Outcome::Persisted(persisted) = outcome else {
        panic!("expected persisted outcome, got {outcome:?}");
    };
    assert_eq!(persisted.object_name, "cam-1/img-1-1700000000.jpg");
    assert_eq!(persisted.size, 11);
    assert_eq!(persisted.checksum, hex::encode(Sha256::digest(b"hello world")));

    let stored = rig.objects.get(BUCKET, "cam-1/img-1-1700000000.jpg").expect("object stored");
    assert_eq!(stored.body, Bytes::from_static(b"hello world"));
    assert_eq!(stored.content_type, CONTENT_TYPE);

    let row = rig
        .catalog
        .find_image(BUCKET, "cam-1/img-1-1700000000.jpg")
        .await
        .expect("query")
        .expect("row exists");
    assert_eq!(Some(row.id), persisted.catalog_id);
    assert_eq!(row.fields.checksum, persisted.checksum);
    assert_eq!(row.fields.image_type, ImageType::Raw);
    assert_eq!(row.fields.status, ObjectStatus::Pending);
    assert_eq!(
        row.fields.metadata,
        serde_json::json!({"source_topic": "camera/cam-1/image_json"})
    );

    let event = rig.events.try_recv().expect("event published");
    assert_eq!(event.id, row.id);
    assert_eq!(event.processed_object, "cam-1/img-1-1700000000.jpg");

    let item = ItemId::new("img-1");
    assert!(rig
        .orchestrator
        .fragments()
        .already_processed(&item)
        .await
        .expect("query"));
    assert_eq!(rig.orchestrator.fragments().progress(&item).await.expect("query"), None);
    assert!(!rig.kv.exists("lock:assemble:img-1").await.expect("query"));
}

#[tokio::test]
async fn resend_after_success_is_dropped_before_storage() {
    let rig = rig().await;
    deliver_all(&rig.orchestrator, "cam-1", Some("img-2"), &[b"a", b"b"]).await;

    for index in 0..2 {
        let outcome = rig
            .orchestrator
            .handle(fragment("cam-1", Some("img-2"), index, 2, b"x"))
            .await;
        assert!(matches!(outcome, Outcome::AlreadyProcessed { .. }));
    }
    assert_eq!(rig.objects.upload_count(), 1);
    assert_eq!(rig.catalog.image_count(), 1);
    assert!(!rig.kv.exists("fragments:img-2").await.expect("query"));
}

#[rstest]
#[case::not_json(b"{oops".as_slice())]
#[case::missing_total(br#"{"index":0,"data":"AA=="}"#.as_slice())]
#[tokio::test]
async fn malformed_message_is_dropped(#[case] payload: &[u8]) {
    let rig = rig().await;
    let outcome = rig
        .orchestrator
        .handle(BusMessage::new("camera/cam-1/image_json", payload.to_vec()))
        .await;
    assert!(matches!(outcome, Outcome::Malformed(_)));
    assert!(rig.kv.is_empty());
}

#[tokio::test]
async fn session_items_get_fresh_ids_after_persist() {
    let rig = rig().await;
    let first = deliver_all(&rig.orchestrator, "cam-9", None, &[b"one"]).await;
    let second = deliver_all(&rig.orchestrator, "cam-9", None, &[b"two"]).await;

    let first = first.persisted().expect("first persisted").clone();
    let second = second.persisted().expect("second persisted").clone();
    assert_ne!(first.item, second.item);
    assert!(first.object_name.starts_with("cam-9/"));
    assert_eq!(rig.objects.len(), 2);
}

#[tokio::test]
async fn session_fragments_share_one_item() {
    let rig = rig().await;
    let outcome = deliver_all(&rig.orchestrator, "cam-5", None, &[b"ab", b"cd", b"ef"]).await;
    let persisted = outcome.persisted().expect("persisted");
    let stored = rig
        .objects
        .get(BUCKET, &persisted.object_name)
        .expect("object stored");
    assert_eq!(stored.body, Bytes::from_static(b"abcdef"));
}

#[tokio::test]
async fn explicit_ids_leave_the_source_session_alone() {
    let rig = rig().await;
    let source = SourceId::from("cam-3");
    let bound = rig
        .orchestrator
        .sessions()
        .get_or_create(&source)
        .await
        .expect("bind");

    deliver_all(&rig.orchestrator, "cam-3", Some("explicit"), &[b"z"]).await;

    let still = rig
        .orchestrator
        .sessions()
        .get_or_create(&source)
        .await
        .expect("lookup");
    assert_eq!(bound, still);
}

#[tokio::test]
async fn held_lock_drops_completing_fragment() {
    let rig = rig().await;
    rig.kv
        .set_nx("lock:assemble:img-l", Bytes::from_static(b"1"), None)
        .await
        .expect("pre-lock");

    let outcome = deliver_all(&rig.orchestrator, "cam-1", Some("img-l"), &[b"a"]).await;
    assert!(matches!(outcome, Outcome::LockContended { .. }));
    assert_eq!(rig.objects.upload_count(), 0);
    assert!(!rig
        .orchestrator
        .fragments()
        .already_processed(&ItemId::new("img-l"))
        .await
        .expect("query"));
}

#[tokio::test]
async fn undecodable_fragment_fails_assembly_and_releases_lock() {
    let rig = rig().await;
    let bad = BusMessage::new(
        "camera/cam-1/image_json",
        r#"{"image_id":"img-bad","index":0,"total":1,"data":"%%%"}"#,
    );
    let outcome = rig.orchestrator.handle(bad).await;

    let Outcome::AssemblyFailed(error) = outcome else {
        panic!("expected assembly failure, got {outcome:?}");
    };
    assert_eq!(error.kind(), "decode_error");
    assert!(!rig.kv.exists("lock:assemble:img-bad").await.expect("query"));
    assert!(!rig.kv.exists("completed:img-bad").await.expect("query"));
    assert!(rig.kv.exists("fragments:img-bad").await.expect("query"));
}

#[tokio::test]
async fn upload_failure_leaves_item_unmarked() {
    let mut objects = MockObjectStore::new();
    objects
        .expect_put()
        .times(1)
        .returning(|_, _, _, _| Err(ObjectStoreError::Unavailable("timeout".into())));
    let mut catalog = MockCatalogStore::new();
    catalog.expect_get_or_create_device().never();
    catalog.expect_insert_image().never();

    let (kv, orchestrator) = rig_with(Arc::new(objects), Arc::new(catalog));
    let outcome = deliver_all(&orchestrator, "cam-1", Some("img-u"), &[b"a"]).await;

    assert!(matches!(outcome, Outcome::UploadFailed { .. }));
    assert!(!kv.exists("completed:img-u").await.expect("query"));
    assert!(!kv.exists("lock:assemble:img-u").await.expect("query"));
}

#[tokio::test]
async fn catalog_failure_leaves_item_unmarked() {
    let objects = Arc::new(MemoryObjectStore::new());
    objects.ensure_bucket(BUCKET).await.expect("bucket");
    let mut catalog = MockCatalogStore::new();
    catalog
        .expect_get_or_create_device()
        .returning(|_| Err(CatalogError::Unavailable("connection reset".into())));

    let (kv, orchestrator) = rig_with(objects.clone(), Arc::new(catalog));
    let outcome = deliver_all(&orchestrator, "cam-1", Some("img-c"), &[b"a"]).await;

    assert!(matches!(outcome, Outcome::CatalogFailed { .. }));
    assert_eq!(objects.upload_count(), 1);
    assert!(!kv.exists("completed:img-c").await.expect("query"));
}

#[tokio::test]
async fn duplicate_catalog_row_is_treated_as_success() {
    let mut rig = rig().await;
    let device = rig
        .catalog
        .get_or_create_device("cam-1")
        .await
        .expect("device");
    let existing = rig
        .catalog
        .insert_image(NewImageObject {
            device_id: device.id,
            recorded_at: Utc::now(),
            bucket: BUCKET.into(),
            object_name: "cam-1/img-d-1700000000.jpg".into(),
            object_version: None,
            checksum: "earlier".into(),
            image_type: ImageType::Raw,
            status: ObjectStatus::Pending,
            metadata: serde_json::json!({}),
        })
        .await
        .expect("seed row");

    let outcome = deliver_all(&rig.orchestrator, "cam-1", Some("img-d"), &[b"a"]).await;

    let Outcome::DuplicatePersist(persisted) = outcome else {
        panic!("expected duplicate persist, got {outcome:?}");
    };
    assert_eq!(persisted.catalog_id, Some(existing.id));
    assert!(rig.events.try_recv().is_err(), "duplicates must not be announced");
    assert!(rig.kv.exists("completed:img-d").await.expect("query"));
}

#[tokio::test]
async fn panic_in_critical_section_is_contained_and_unlocks() {
    let mut objects = MockObjectStore::new();
    objects
        .expect_put()
        .returning(|_, _, _, _| panic!("disk on fire"));
    let (kv, orchestrator) = rig_with(Arc::new(objects), Arc::new(MemoryCatalog::new()));

    let outcome = deliver_all(&orchestrator, "cam-1", Some("img-p"), &[b"a"]).await;

    let Outcome::Panicked { message, .. } = outcome else {
        panic!("expected contained panic, got {outcome:?}");
    };
    assert_eq!(message, "disk on fire");
    assert!(!kv.exists("lock:assemble:img-p").await.expect("query"));
    assert!(!kv.exists("completed:img-p").await.expect("query"));
}

#[rstest]
#[case("cam-1", "abc", 1_700_000_000, "cam-1/abc-1700000000.jpg")]
#[case("7", "7-1", 0, "7/7-1-0.jpg")]
fn object_names_carry_the_persist_time(
    #[case] source: &str,
    #[case] item: &str,
    #[case] secs: i64,
    #[case] expected: &str,
) {
    assert_eq!(object_name(&SourceId::from(source), &ItemId::new(item), secs), expected);
}
