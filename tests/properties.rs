//! Property-based tests for the universal properties in §8: chronological
//! monotonicity, read inversion, round-trip, and idempotent open.

use proptest::prelude::*;
use rothko_core::cache::FileCache;
use rothko_core::metric::Metric;
use std::sync::Arc;
use tempfile::tempdir;

const BLOCK_SIZE: usize = 512;
const NUM_BLOCKS: u32 = 9;
const MAX_SEALED: u32 = 3;

fn open_metric(dir: &std::path::Path) -> Metric {
    let cache = Arc::new(FileCache::new(8, 8, BLOCK_SIZE));
    Metric::open(
        dir.to_owned(),
        "m".into(),
        MAX_SEALED,
        BLOCK_SIZE,
        NUM_BLOCKS,
        cache,
        false,
    )
    .unwrap()
}

fn small_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chronological_monotonicity(
        deltas in proptest::collection::vec(1i64..1000, 1..80),
        payload in small_payload(),
    ) {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path());

        let mut cursor = 0i64;
        let mut last_accepted_end = None::<i64>;
        for d in deltas {
            let start = cursor;
            let end = start + d;
            cursor = end;
            let ok = metric.write(start, end, &payload).unwrap();
            if ok {
                if let Some(prev) = last_accepted_end {
                    prop_assert!(start >= prev);
                }
                last_accepted_end = Some(end);
            }
        }
    }

    #[test]
    fn read_inversion(
        count in 1usize..40,
        payload in small_payload(),
    ) {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path());
        for i in 0..count as i64 {
            metric.write(i * 10, i * 10 + 5, &payload).unwrap();
        }
        let mut ends = Vec::new();
        metric.read(i64::MAX, |_, end, _| {
            ends.push(end);
            Ok(true)
        }).unwrap();
        prop_assert!(ends.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn round_trip_of_most_recent_write(payload in small_payload()) {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path());
        prop_assume!(metric.write(100, 200, &payload).unwrap());
        let (start, end, data) = metric.read_last().unwrap();
        prop_assert_eq!((start, end), (100, 200));
        prop_assert_eq!(data, payload);
    }
}

#[test]
fn idempotent_open_reports_identical_last_record() {
    let dir = tempdir().unwrap();
    let first;
    {
        let metric = open_metric(dir.path());
        metric.write(0, 5, b"a").unwrap();
        metric.write(5, 15, b"bb").unwrap();
        first = metric.read_last().unwrap();
    }
    let second = {
        let metric = open_metric(dir.path());
        metric.read_last().unwrap()
    };
    assert_eq!(first, second);
}

#[test]
fn ring_never_exceeds_configured_file_count() {
    let dir = tempdir().unwrap();
    let metric = open_metric(dir.path());
    for i in 0..500i64 {
        metric.write(i, i + 1, &[0u8; 8]).unwrap();
    }
    let count = std::fs::read_dir(dir.path()).unwrap().count();
    assert!(count as u32 <= MAX_SEALED + 1);
}
