//! Tests for fragment storage, completion detection, and assembly.

use std::{
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use proptest::prelude::*;
use rstest::{fixture, rstest};
use sha2::{Digest, Sha256};

use crate::{
    clock::MockClock,
    fragment::{AssemblyError, FragmentIndex, FragmentStatus, FragmentStore, ItemId},
    kv::{KvStore, MemoryKv},
    marker::CompletionMarker,
};

struct Harness {
    clock: Arc<MockClock>,
    kv: Arc<MemoryKv>,
    store: FragmentStore,
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(MockClock::with_time(UNIX_EPOCH + Duration::from_secs(10_000)));
    let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
    let marker = CompletionMarker::new(kv.clone(), CompletionMarker::DEFAULT_TTL);
    let store = FragmentStore::new(kv.clone(), clock.clone(), FragmentStore::DEFAULT_TTL, marker);
    Harness { clock, kv, store }
}

fn total(n: u32) -> NonZeroU32 { NonZeroU32::new(n).expect("non-zero total") }

fn encoded_chunks(blob: &[u8], parts: usize) -> Vec<String> {
    let size = blob.len().div_ceil(parts);
    blob.chunks(size).map(|chunk| STANDARD.encode(chunk)).collect()
}

#[rstest]
#[tokio::test]
async fn out_of_order_fragments_reassemble_byte_exact(harness: Harness) {
    let blob: Vec<u8> = (0..300_u16).map(|i| (i % 251) as u8).collect();
    let chunks = encoded_chunks(&blob, 3);
    let item = ItemId::new("scenario-a");

    let mut last = None;
    for index in [2_usize, 0, 1] {
        last = Some(
            harness
                .store
                .add_fragment(
                    &item,
                    FragmentIndex::try_from(index).expect("index fits"),
                    total(3),
                    &chunks[index],
                )
                .await
                .expect("store fragment"),
        );
    }
    assert_eq!(last, Some(FragmentStatus::Complete { expected: 3 }));

    let assembled = harness.store.assemble(&item).await.expect("assemble");
    assert_eq!(assembled.len(), 300);
    assert_eq!(Sha256::digest(&assembled), Sha256::digest(&blob));
}

#[rstest]
#[tokio::test]
async fn duplicate_index_overwrites_without_moving_threshold(harness: Harness) {
    let item = ItemId::new("dup");
    let store = &harness.store;

    let first = store
        .add_fragment(&item, FragmentIndex::zero(), total(2), &STANDARD.encode(b"old"))
        .await
        .expect("store");
    let again = store
        .add_fragment(&item, FragmentIndex::zero(), total(2), &STANDARD.encode(b"new"))
        .await
        .expect("store");
    assert_eq!(first, FragmentStatus::Incomplete {
        received: 1,
        expected: 2
    });
    assert_eq!(again, first);

    let done = store
        .add_fragment(&item, FragmentIndex::new(1), total(2), &STANDARD.encode(b"!"))
        .await
        .expect("store");
    assert!(done.is_complete());
    assert_eq!(store.assemble(&item).await.expect("assemble"), b"new!");
}

#[rstest]
#[tokio::test]
async fn first_declared_total_wins(harness: Harness) {
    let item = ItemId::new("mismatch");
    let store = &harness.store;

    store
        .add_fragment(&item, FragmentIndex::zero(), total(3), "AA==")
        .await
        .expect("store");
    let status = store
        .add_fragment(&item, FragmentIndex::new(1), total(2), "AA==")
        .await
        .expect("store");

    assert_eq!(status, FragmentStatus::Incomplete {
        received: 2,
        expected: 3
    });
    let progress = store.progress(&item).await.expect("progress").expect("exists");
    assert_eq!(progress.expected, 3);
}

#[rstest]
#[tokio::test]
async fn stray_index_leaves_item_incomplete(harness: Harness) {
    let item = ItemId::new("scenario-b");
    let store = &harness.store;

    store
        .add_fragment(&item, FragmentIndex::zero(), total(3), "AA==")
        .await
        .expect("store");
    let status = store
        .add_fragment(&item, FragmentIndex::new(5), total(3), "AA==")
        .await
        .expect("store");

    assert_eq!(status, FragmentStatus::Incomplete {
        received: 2,
        expected: 3
    });
    let err = store.assemble(&item).await.expect_err("must not assemble");
    assert!(matches!(
        err,
        AssemblyError::Incomplete {
            received: 2,
            expected: 3,
            ..
        }
    ));
}

#[rstest]
#[tokio::test]
async fn gap_in_expected_range_is_detected(harness: Harness) {
    let item = ItemId::new("gap");
    let store = &harness.store;

    for index in [0_u32, 1, 7] {
        store
            .add_fragment(&item, FragmentIndex::new(index), total(3), "AA==")
            .await
            .expect("store");
    }

    let err = store.assemble(&item).await.expect_err("gap must be reported");
    match err {
        AssemblyError::GapDetected { missing, .. } => {
            assert_eq!(missing, vec![FragmentIndex::new(2)]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[tokio::test]
async fn undecodable_payload_is_rejected(harness: Harness) {
    let item = ItemId::new("bad-b64");
    let store = &harness.store;
    store
        .add_fragment(&item, FragmentIndex::zero(), total(2), "AA==")
        .await
        .expect("store");
    store
        .add_fragment(&item, FragmentIndex::new(1), total(2), "not base64!")
        .await
        .expect("store");

    let err = store.assemble(&item).await.expect_err("decode must fail");
    assert!(matches!(
        err,
        AssemblyError::Decode { index, .. } if index == FragmentIndex::new(1)
    ));
}

#[rstest]
#[tokio::test]
async fn assemble_unknown_item_reports_missing_metadata(harness: Harness) {
    let err = harness
        .store
        .assemble(&ItemId::new("ghost"))
        .await
        .expect_err("unknown item");
    assert!(matches!(err, AssemblyError::NoMetadata { .. }));
    assert_eq!(err.kind(), "no_metadata");
}

#[rstest]
#[tokio::test]
async fn mark_processed_sets_marker_and_evicts(harness: Harness) {
    let item = ItemId::new("done");
    let store = &harness.store;
    store
        .add_fragment(&item, FragmentIndex::zero(), total(1), "AA==")
        .await
        .expect("store");

    store.mark_processed(&item).await.expect("mark");

    assert!(store.already_processed(&item).await.expect("query"));
    assert_eq!(store.progress(&item).await.expect("progress"), None);
    assert!(store.active_items().await.expect("scan").is_empty());

    harness.clock.advance(CompletionMarker::DEFAULT_TTL);
    assert!(!store.already_processed(&item).await.expect("query"));
}

#[rstest]
#[tokio::test]
async fn records_expire_after_inactivity(harness: Harness) {
    let item = ItemId::new("stale");
    let store = &harness.store;
    store
        .add_fragment(&item, FragmentIndex::zero(), total(2), "AA==")
        .await
        .expect("store");

    harness.clock.advance(Duration::from_secs(200));
    store
        .add_fragment(&item, FragmentIndex::new(1), total(2), "AA==")
        .await
        .expect("store refreshes ttl");
    harness.clock.advance(Duration::from_secs(200));
    assert!(store.progress(&item).await.expect("progress").is_some());

    harness.clock.advance(FragmentStore::DEFAULT_TTL);
    assert_eq!(store.progress(&item).await.expect("progress"), None);
    assert!(!harness.kv.exists("fragments:stale").await.expect("exists"));
}

#[rstest]
#[tokio::test]
async fn progress_tracks_last_activity(harness: Harness) {
    let item = ItemId::new("activity");
    let store = &harness.store;
    store
        .add_fragment(&item, FragmentIndex::zero(), total(4), "AA==")
        .await
        .expect("store");
    harness.clock.advance(Duration::from_secs(30));
    store
        .add_fragment(&item, FragmentIndex::new(3), total(4), "AA==")
        .await
        .expect("store");

    let progress = store.progress(&item).await.expect("progress").expect("exists");
    assert_eq!(progress.received, 2);
    assert_eq!(progress.last_activity, 10_030);
    assert_eq!(store.active_items().await.expect("scan"), vec![item]);
}

proptest! {
    #[test]
    fn any_delivery_order_reassembles_in_index_order(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12),
        seed in any::<u64>(),
    ) {
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        let mut state = seed;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = usize::try_from(state >> 33).expect("fits usize") % (i + 1);
            order.swap(i, j);
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let Harness { store, .. } = harness();
        let item = ItemId::new("prop");
        let expected_total = NonZeroU32::new(u32::try_from(chunks.len()).expect("fits"))
            .expect("non-zero");

        let assembled = rt.block_on(async {
            let mut status = None;
            for &index in &order {
                status = Some(
                    store
                        .add_fragment(
                            &item,
                            FragmentIndex::try_from(index).expect("fits"),
                            expected_total,
                            &STANDARD.encode(&chunks[index]),
                        )
                        .await
                        .expect("store"),
                );
            }
            assert!(status.is_some_and(FragmentStatus::is_complete));
            store.assemble(&item).await.expect("assemble")
        });

        prop_assert_eq!(assembled, chunks.concat());
    }
}
