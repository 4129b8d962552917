//! Distribution registry — `{tag -> constructor}`, replacing the source
//! system's process-global init-hook registration with an explicit value
//! passed to the `Writer`/`Merger` at construction (§9 Design Notes).
//!
//! Payload bytes are opaque to `File`/`Metric`/`Disk`; only code holding a
//! `DistributionRegistry` (the `Writer` and a `ColumnMerger`) interprets the
//! leading tag byte.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// A live, observable distribution. `kind_tag()` is the one-byte
/// discriminant written as the first byte of every marshaled payload.
pub trait Distribution: Send {
    fn kind_tag(&self) -> u8;
    fn observe(&mut self, value: f64);
    fn marshal(&self) -> Vec<u8>;
    fn is_empty(&self) -> bool;
}

/// Per-kind construction parameters. The reference `SummaryDist` has none,
/// but the trait exists so a real t-digest's `(compression, ...)` knobs
/// have somewhere to live without changing the registry's shape.
pub trait DistributionParams: Send + Sync {
    fn new_distribution(&self) -> Box<dyn Distribution>;
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Distribution>>;
}

pub struct DistributionRegistry {
    constructors: HashMap<u8, Box<dyn DistributionParams>>,
    default_tag: u8,
}

impl DistributionRegistry {
    pub fn new() -> Self {
        DistributionRegistry {
            constructors: HashMap::new(),
            default_tag: SummaryDistParams::TAG,
        }
    }

    /// The registry shipped by default: the `SummaryDist` reference kind
    /// registered as both the only and the default entry.
    pub fn with_reference_distribution() -> Self {
        let mut registry = Self::new();
        registry.register(SummaryDistParams::TAG, Box::new(SummaryDistParams));
        registry
    }

    pub fn register(&mut self, tag: u8, params: Box<dyn DistributionParams>) {
        self.constructors.insert(tag, params);
    }

    pub fn set_default_tag(&mut self, tag: u8) {
        self.default_tag = tag;
    }

    pub fn new_default(&self) -> Result<Box<dyn Distribution>> {
        self.new_for_tag(self.default_tag)
    }

    pub fn new_for_tag(&self, tag: u8) -> Result<Box<dyn Distribution>> {
        self.constructors
            .get(&tag)
            .map(|p| p.new_distribution())
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown distribution tag {tag}")))
    }

    /// Marshal a live distribution with its tag prefixed, per §4.6.
    pub fn marshal(dist: &dyn Distribution) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32);
        out.push(dist.kind_tag());
        out.extend_from_slice(&dist.marshal());
        out
    }

    /// Inverse of `marshal`: dispatch on the leading tag byte to the
    /// matching decoder.
    pub fn decode(&self, payload: &[u8]) -> Result<Box<dyn Distribution>> {
        let (tag, rest) = payload.split_first().ok_or_else(|| EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: "empty distribution payload".into(),
        })?;
        let params = self.constructors.get(tag).ok_or_else(|| EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: format!("unknown distribution tag {tag}"),
        })?;
        params.decode(rest)
    }
}

impl Default for DistributionRegistry {
    fn default() -> Self {
        Self::with_reference_distribution()
    }
}

/// Reference distribution: a running min/max/count/mean summary. Explicitly
/// not a faithful t-digest — it exists so the `Writer`, CLI, and
/// `BucketMerger` have one concrete, testable kind to exercise (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryDist {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SummaryDist {
    pub const TAG: u8 = 1;

    pub fn new() -> Self {
        SummaryDist {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
        }
    }
}

impl Default for SummaryDist {
    fn default() -> Self {
        Self::new()
    }
}

impl Distribution for SummaryDist {
    fn kind_tag(&self) -> u8 {
        Self::TAG
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean += (value - self.mean) / self.count as f64;
    }

    fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.min.to_be_bytes());
        out.extend_from_slice(&self.max.to_be_bytes());
        out.extend_from_slice(&self.mean.to_be_bytes());
        out
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl SummaryDist {
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(EngineError::Corrupt {
                path: Default::default(),
                block: 0,
                reason: format!("summary dist payload has {} bytes, want 32", bytes.len()),
            });
        }
        let take = |slice: &[u8]| -> [u8; 8] { slice.try_into().unwrap() };
        Ok(SummaryDist {
            count: u64::from_be_bytes(take(&bytes[0..8])),
            min: f64::from_be_bytes(take(&bytes[8..16])),
            max: f64::from_be_bytes(take(&bytes[16..24])),
            mean: f64::from_be_bytes(take(&bytes[24..32])),
        })
    }
}

pub struct SummaryDistParams;

impl SummaryDistParams {
    pub const TAG: u8 = SummaryDist::TAG;
}

impl DistributionParams for SummaryDistParams {
    fn new_distribution(&self) -> Box<dyn Distribution> {
        Box::new(SummaryDist::new())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Distribution>> {
        Ok(Box::new(SummaryDist::unmarshal(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_dist_tracks_min_max_mean() {
        let mut d = SummaryDist::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            d.observe(v);
        }
        assert_eq!(d.count, 4);
        assert_eq!(d.min, 1.0);
        assert_eq!(d.max, 4.0);
        assert!((d.mean - 2.5).abs() < 1e-9);
    }

    #[test]
    fn marshal_unmarshal_roundtrip() {
        let mut d = SummaryDist::new();
        d.observe(5.0);
        d.observe(10.0);
        let bytes = d.marshal();
        let back = SummaryDist::unmarshal(&bytes).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn registry_decodes_tagged_payload() {
        let registry = DistributionRegistry::with_reference_distribution();
        let mut d = SummaryDist::new();
        d.observe(42.0);
        let tagged = DistributionRegistry::marshal(&d);
        let decoded = registry.decode(&tagged).unwrap();
        assert_eq!(decoded.kind_tag(), SummaryDist::TAG);
    }

    #[test]
    fn unknown_tag_rejected() {
        let registry = DistributionRegistry::with_reference_distribution();
        let err = registry.decode(&[99, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, EngineError::Corrupt { .. }));
    }
}
