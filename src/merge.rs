//! `ColumnMerger` — the consumer contract for `Disk::query` (§4.7).
//!
//! `Disk`/`Metric`/`File` never interpret payload bytes; a `ColumnMerger`
//! is where the registry tag byte finally gets decoded. This crate ships
//! one reference implementation, `BucketMerger`, so the contract has a
//! concrete, testable consumer — a real duration/width/sample-driven
//! merger is out of scope.

use crate::error::Result;
use crate::registry::{DistributionRegistry, SummaryDist};

/// One rendered time-bucket. Opaque beyond what a graph frontend would
/// need: the bucket's time range and a summary of everything pushed into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

pub trait ColumnMerger {
    /// Called once per logical record visited by `Disk::query`, in the
    /// decreasing-`end` order `query` produces.
    fn push(&mut self, start: i64, end: i64, payload: &[u8]) -> Result<()>;

    /// Called once after iteration completes (or is cut short); produces
    /// the rendered column array, oldest-to-newest.
    fn finish(self: Box<Self>) -> Vec<Column>;
}

/// Buckets pushed records into fixed-width time buckets (keyed by
/// `start / bucket_width`) and merges same-bucket summaries by
/// count-weighted mean.
pub struct BucketMerger {
    bucket_width: i64,
    registry: DistributionRegistry,
    buckets: Vec<(i64, SummaryDist)>,
}

impl BucketMerger {
    pub fn new(bucket_width: i64, registry: DistributionRegistry) -> Self {
        assert!(bucket_width > 0, "bucket_width must be positive");
        BucketMerger {
            bucket_width,
            registry,
            buckets: Vec::new(),
        }
    }

    fn bucket_index(&self, start: i64) -> i64 {
        start.div_euclid(self.bucket_width)
    }

    fn bucket_mut(&mut self, index: i64) -> &mut SummaryDist {
        if let Some(pos) = self.buckets.iter().position(|(i, _)| *i == index) {
            &mut self.buckets[pos].1
        } else {
            self.buckets.push((index, SummaryDist::new()));
            let last = self.buckets.len() - 1;
            &mut self.buckets[last].1
        }
    }
}

fn merge_summary(into: &mut SummaryDist, other: &SummaryDist) {
    if other.count == 0 {
        return;
    }
    let total = into.count + other.count;
    let weighted_mean = if total == 0 {
        0.0
    } else {
        (into.mean * into.count as f64 + other.mean * other.count as f64) / total as f64
    };
    into.min = into.min.min(other.min);
    into.max = into.max.max(other.max);
    into.mean = weighted_mean;
    into.count = total;
}

impl ColumnMerger for BucketMerger {
    fn push(&mut self, start: i64, _end: i64, payload: &[u8]) -> Result<()> {
        let decoded = self.registry.decode(payload)?;
        let as_summary = SummaryDist::unmarshal(&decoded.marshal())?;
        let index = self.bucket_index(start);
        let slot = self.bucket_mut(index);
        merge_summary(slot, &as_summary);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<Column> {
        let mut buckets = self.buckets;
        buckets.sort_by_key(|(index, _)| *index);
        buckets
            .into_iter()
            .map(|(index, summary)| Column {
                bucket_start: index * self.bucket_width,
                bucket_end: (index + 1) * self.bucket_width,
                count: summary.count,
                min: summary.min,
                max: summary.max,
                mean: summary.mean,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(value: f64) -> Vec<u8> {
        let mut d = SummaryDist::new();
        d.observe(value);
        DistributionRegistry::marshal(&d)
    }

    #[test]
    fn one_column_per_populated_bucket_oldest_to_newest() {
        let mut merger = Box::new(BucketMerger::new(
            100,
            DistributionRegistry::with_reference_distribution(),
        ));
        // Pushed in decreasing-end order, as `query` would deliver them.
        merger.push(250, 251, &sample_payload(9.0)).unwrap();
        merger.push(120, 121, &sample_payload(5.0)).unwrap();
        merger.push(10, 11, &sample_payload(1.0)).unwrap();

        let columns = merger.finish();
        assert_eq!(columns.len(), 3);
        assert!(columns.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
        assert_eq!(columns[0].bucket_start, 0);
        assert_eq!(columns[2].bucket_start, 200);
    }

    #[test]
    fn same_bucket_records_merge_by_weighted_mean() {
        let mut merger = Box::new(BucketMerger::new(
            1000,
            DistributionRegistry::with_reference_distribution(),
        ));
        merger.push(0, 1, &sample_payload(10.0)).unwrap();
        merger.push(1, 2, &sample_payload(20.0)).unwrap();

        let columns = merger.finish();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].count, 2);
        assert!((columns[0].mean - 15.0).abs() < 1e-9);
    }
}
