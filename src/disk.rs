//! `Disk` — a directory of metrics, the top-level handle applications hold
//! (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::FileCache;
use crate::config::DiskConfig;
use crate::error::{EngineError, Result};
use crate::metric::Metric;

pub struct Disk {
    config: DiskConfig,
    cache: Arc<FileCache>,
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
}

impl Disk {
    pub fn open(config: DiskConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root_dir).map_err(|e| EngineError::io(&config.root_dir, e))?;
        let cache = Arc::new(FileCache::new(
            config.handle_cache_size,
            config.buffer_cache_size,
            config.block_size,
        ));
        Ok(Disk {
            config,
            cache,
            metrics: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    fn metric_dir(&self, name: &str) -> std::path::PathBuf {
        self.config.root_dir.join(name)
    }

    /// Resolve a metric by name, opening (and registering) it if this is
    /// the first time this `Disk` has seen it this process.
    fn resolve(&self, name: &str, create_if_missing: bool) -> Result<Arc<Metric>> {
        if let Some(metric) = self.metrics.read().get(name) {
            return Ok(Arc::clone(metric));
        }

        let dir = self.metric_dir(name);
        let read_only = !create_if_missing && !dir.exists();

        let mut table = self.metrics.write();
        // Re-check: another thread may have opened it while we waited for
        // the write lock.
        if let Some(metric) = table.get(name) {
            return Ok(Arc::clone(metric));
        }

        let metric = Arc::new(Metric::open(
            dir,
            name.to_owned(),
            self.config.files_per_metric.saturating_sub(1),
            self.config.block_size,
            self.config.num_blocks,
            Arc::clone(&self.cache),
            read_only,
        )?);
        table.insert(name.to_owned(), Arc::clone(&metric));
        Ok(metric)
    }

    /// Append one record to `metric`, creating it if necessary. Writes to
    /// one metric are serialized by that `Metric`'s own mutex; distinct
    /// metrics proceed independently.
    pub fn queue(&self, metric: &str, start: i64, end: i64, payload: &[u8]) -> Result<bool> {
        if metric.is_empty() {
            return Err(EngineError::InvalidArgument("metric name is empty".into()));
        }
        if start > end {
            return Err(EngineError::InvalidArgument(format!(
                "start ({start}) > end ({end})"
            )));
        }
        let m = self.resolve(metric, true)?;
        let written = m.write(start, end, payload)?;
        debug!(metric, start, end, written, "disk.queue");
        Ok(written)
    }

    /// Visit `metric`'s records backward from `end_hint`. `NotFound` if the
    /// metric has never been queued or discovered by `populate_metrics`.
    pub fn query(
        &self,
        metric: &str,
        end_hint: i64,
        visit: impl FnMut(i64, i64, &[u8]) -> Result<bool>,
    ) -> Result<()> {
        let m = self
            .metrics
            .read()
            .get(metric)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(metric.to_owned()))?;
        m.read(end_hint, visit)
    }

    pub fn read_last(&self, metric: &str) -> Result<(i64, i64, Vec<u8>)> {
        let m = self
            .metrics
            .read()
            .get(metric)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(metric.to_owned()))?;
        m.read_last()
    }

    /// Enumerate known metric names: the union of names seen via `queue`
    /// and names discovered by `populate_metrics`.
    pub fn metrics(&self, mut visit: impl FnMut(&str) -> Result<bool>) -> Result<()> {
        let names: Vec<String> = self.metrics.read().keys().cloned().collect();
        for name in names {
            if !visit(&name)? {
                break;
            }
        }
        Ok(())
    }

    /// Scan `root_dir` for subdirectories holding at least one valid file
    /// and register them, per §9 Open Question (a): advisory prefetch, safe
    /// to call concurrently with writes.
    pub fn populate_metrics(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.config.root_dir)
            .map_err(|e| EngineError::io(&self.config.root_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(&self.config.root_dir, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let has_file = std::fs::read_dir(entry.path())
                .map(|mut it| it.next().is_some())
                .unwrap_or(false);
            if !has_file {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Err(e) = self.resolve(&name, false) {
                warn!(metric = name, error = %e, "populate_metrics: failed to open metric");
            }
        }
        Ok(())
    }

    /// Close the shared file cache and drop the in-memory metric table.
    /// Pending writes have already been durably applied by `queue` itself
    /// (there is no separate write-behind buffer to flush).
    pub fn close(&self) {
        self.cache.close();
        self.metrics.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> DiskConfig {
        DiskConfig {
            root_dir: dir.to_owned(),
            block_size: 256,
            num_blocks: 8,
            files_per_metric: 3,
            handle_cache_size: 16,
            buffer_cache_size: 16,
        }
    }

    #[test]
    fn queue_then_query_roundtrips() {
        let dir = tempdir().unwrap();
        let disk = Disk::open(test_config(dir.path())).unwrap();
        assert!(disk.queue("cpu.load", 0, 10, b"abc").unwrap());
        let (s, e, data) = disk.read_last("cpu.load").unwrap();
        assert_eq!((s, e), (0, 10));
        assert_eq!(data, b"abc");
    }

    #[test]
    fn query_unknown_metric_not_found() {
        let dir = tempdir().unwrap();
        let disk = Disk::open(test_config(dir.path())).unwrap();
        let err = disk.query("ghost", 100, |_, _, _| Ok(true)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn metrics_lists_queued_names() {
        let dir = tempdir().unwrap();
        let disk = Disk::open(test_config(dir.path())).unwrap();
        disk.queue("a", 0, 1, b"x").unwrap();
        disk.queue("b", 0, 1, b"y").unwrap();
        let mut seen = Vec::new();
        disk.metrics(|name| {
            seen.push(name.to_owned());
            Ok(true)
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn populate_metrics_discovers_prior_run_directories() {
        let dir = tempdir().unwrap();
        {
            let disk = Disk::open(test_config(dir.path())).unwrap();
            disk.queue("persisted", 0, 1, b"x").unwrap();
            disk.close();
        }
        let disk = Disk::open(test_config(dir.path())).unwrap();
        disk.populate_metrics().unwrap();
        let mut seen = Vec::new();
        disk.metrics(|name| {
            seen.push(name.to_owned());
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec!["persisted".to_string()]);
    }
}
