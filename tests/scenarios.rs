//! End-to-end reassembly scenarios over in-memory backends.
//!
//! Each test drives one or more [`Orchestrator`](ingestor::Orchestrator)
//! instances sharing the same key-value store, object store, and catalog,
//! the way independent workers share production backends.

use std::time::Duration;

use ingestor::{
    GarbageCollector,
    ItemId,
    catalog::{CatalogStore, ObjectStatus},
    pipeline::{Outcome, object_name},
};
use ingestor_testing::{BUCKET, EPOCH_SECS, Harness, fragment, sample_image, split_fragments};
use rstest::rstest;
use sha2::{Digest, Sha256};

#[tokio::test]
async fn out_of_order_delivery_persists_original_bytes() {
    let mut harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let blob = sample_image(300);
    let parts = split_fragments("cam-1", Some("img-a"), &blob, 3);

    let outcomes = [
        pipeline.handle(parts[2].clone()).await,
        pipeline.handle(parts[0].clone()).await,
        pipeline.handle(parts[1].clone()).await,
    ];

    assert!(matches!(
        outcomes[0],
        Outcome::Stored {
            received: 1,
            expected: 3,
            ..
        }
    ));
    assert!(matches!(
        outcomes[1],
        Outcome::Stored {
            received: 2,
            expected: 3,
            ..
        }
    ));
    let Outcome::Persisted(persisted) = &outcomes[2] else {
        panic!("expected persist, got {:?}", outcomes[2]);
    };
    let stored = harness
        .objects
        .get(BUCKET, &persisted.object_name)
        .expect("object uploaded");
    assert_eq!(
        Sha256::digest(&stored.body),
        Sha256::digest(&blob),
        "reassembled bytes differ from the source blob"
    );
    assert_eq!(persisted.checksum, hex::encode(Sha256::digest(&blob)));

    let row = harness
        .catalog
        .find_image(BUCKET, &persisted.object_name)
        .await
        .expect("catalog read")
        .expect("catalog row");
    assert_eq!(row.fields.status, ObjectStatus::Pending);
    assert_eq!(row.fields.checksum, persisted.checksum);

    let events = harness.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, row.id);
    assert_eq!(events[0].processed_object, persisted.object_name);
}

#[tokio::test]
async fn stray_index_never_completes_until_collected() {
    let harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let item = ItemId::from("img-b");

    let first = pipeline
        .handle(fragment("cam-1", Some("img-b"), 0, 3, b"head"))
        .await;
    let stray = pipeline
        .handle(fragment("cam-1", Some("img-b"), 5, 3, b"tail"))
        .await;

    assert!(matches!(first, Outcome::Stored { received: 1, .. }));
    assert!(matches!(
        stray,
        Outcome::Stored {
            received: 2,
            expected: 3,
            ..
        }
    ));
    assert_eq!(harness.objects.upload_count(), 0);

    let gc = GarbageCollector::new(
        pipeline.fragments().clone(),
        harness.clock.clone(),
        Duration::from_secs(120),
    );
    harness.clock.advance(Duration::from_secs(120));
    assert!(gc.sweep().await.expect("sweep").evicted.is_empty());
    harness.clock.advance(Duration::from_secs(1));
    assert_eq!(gc.sweep().await.expect("sweep").evicted, vec![item.clone()]);
    assert!(
        pipeline
            .fragments()
            .progress(&item)
            .await
            .expect("progress")
            .is_none()
    );
}

#[rstest]
#[case::last_fragment_races(1)]
#[case::every_fragment_races(3)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_persist_exactly_once(#[case] contested: usize) {
    let mut harness = Harness::start().await;
    let first = harness.orchestrator();
    let second = harness.orchestrator();
    let blob = sample_image(900);
    let parts = split_fragments("cam-7", Some("img-c"), &blob, 3);
    let (settled, raced) = parts.split_at(parts.len() - contested);

    for msg in settled {
        first.handle(msg.clone()).await;
    }
    let run = |pipeline: ingestor::Orchestrator, msgs: Vec<ingestor::BusMessage>| {
        tokio::spawn(async move {
            let mut outcomes = Vec::new();
            for msg in msgs {
                outcomes.push(pipeline.handle(msg).await);
            }
            outcomes
        })
    };
    let (a, b) = tokio::join!(run(first, raced.to_vec()), run(second, raced.to_vec()));
    let outcomes: Vec<Outcome> = a
        .expect("first worker")
        .into_iter()
        .chain(b.expect("second worker"))
        .collect();

    let persisted = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Persisted(_)))
        .count();
    assert_eq!(persisted, 1, "outcomes: {outcomes:?}");
    assert!(
        !outcomes
            .iter()
            .any(|o| matches!(o, Outcome::DuplicatePersist(_))),
        "outcomes: {outcomes:?}"
    );
    assert_eq!(harness.objects.upload_count(), 1);
    assert_eq!(harness.catalog.image_count(), 1);
    assert_eq!(harness.drain_events().len(), 1);
}

#[tokio::test]
async fn collected_item_restarts_from_zero() {
    let harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let item = ItemId::from("img-d");
    pipeline
        .handle(fragment("cam-2", Some("img-d"), 0, 4, b"aa"))
        .await;
    pipeline
        .handle(fragment("cam-2", Some("img-d"), 1, 4, b"bb"))
        .await;

    let gc = GarbageCollector::new(
        pipeline.fragments().clone(),
        harness.clock.clone(),
        Duration::from_secs(60),
    );
    harness.clock.advance(Duration::from_secs(90));
    let report = gc.sweep().await.expect("sweep");
    assert_eq!(report.evicted, vec![item.clone()]);

    let outcome = pipeline
        .handle(fragment("cam-2", Some("img-d"), 2, 4, b"cc"))
        .await;
    assert!(
        matches!(
            outcome,
            Outcome::Stored {
                received: 1,
                expected: 4,
                ..
            }
        ),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn resend_within_completion_window_is_suppressed() {
    let harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let parts = split_fragments("cam-3", Some("img-e"), &sample_image(40), 2);
    for msg in &parts {
        pipeline.handle(msg.clone()).await;
    }

    for msg in &parts {
        let outcome = pipeline.handle(msg.clone()).await;
        assert!(
            matches!(outcome, Outcome::AlreadyProcessed { .. }),
            "{outcome:?}"
        );
    }
    assert_eq!(harness.objects.upload_count(), 1);
}

async fn persist_all(pipeline: &ingestor::Orchestrator, parts: &[ingestor::BusMessage]) -> Outcome {
    let mut last = None;
    for msg in parts {
        last = Some(pipeline.handle(msg.clone()).await);
    }
    last.expect("at least one fragment")
}

#[tokio::test]
async fn reused_id_after_completion_window_keeps_the_earlier_object() {
    let harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let original = vec![0x01_u8; 40];
    let replacement = vec![0x02_u8; 40];

    let first = persist_all(&pipeline, &split_fragments("cam-3", Some("img-x"), &original, 2)).await;
    let Outcome::Persisted(first) = first else {
        panic!("first send did not persist: {first:?}");
    };
    harness
        .clock
        .advance(harness.config.completion_ttl() + Duration::from_secs(1));
    let second =
        persist_all(&pipeline, &split_fragments("cam-3", Some("img-x"), &replacement, 2)).await;
    let Outcome::Persisted(second) = second else {
        panic!("reused id did not persist as a new object: {second:?}");
    };
    assert_ne!(first.object_name, second.object_name);

    for (persisted, blob) in [(&first, &original), (&second, &replacement)] {
        let stored = harness
            .objects
            .get(BUCKET, &persisted.object_name)
            .expect("object kept");
        let row = harness
            .catalog
            .find_image(BUCKET, &persisted.object_name)
            .await
            .expect("query")
            .expect("row exists");
        let digest = hex::encode(Sha256::digest(&stored.body));
        assert_eq!(digest, row.fields.checksum, "object bytes drifted from their row");
        assert_eq!(digest, hex::encode(Sha256::digest(blob)));
    }
    assert_eq!(harness.objects.len(), 2);
    assert_eq!(harness.catalog.image_count(), 2);
}

#[tokio::test]
async fn session_items_are_split_by_completion() {
    let harness = Harness::start().await;
    let pipeline = harness.orchestrator();
    let mut names = Vec::new();
    let epoch = i64::try_from(EPOCH_SECS).expect("epoch fits");

    for round in 0..2_u8 {
        let blob = vec![round; 10];
        let mut last = None;
        for msg in split_fragments("cam-9", None, &blob, 2) {
            last = Some(pipeline.handle(msg).await);
        }
        let Some(Outcome::Persisted(persisted)) = last else {
            panic!("round {round} did not persist: {last:?}");
        };
        assert_eq!(
            persisted.object_name,
            object_name(&persisted.source, &persisted.item, epoch)
        );
        names.push(persisted.object_name);
    }

    assert_ne!(names[0], names[1], "session id was reused after persist");
    assert_eq!(harness.catalog.device_count(), 1);
}
