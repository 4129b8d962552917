//! `Writer` — the sample-queuing front-end that sits between producers
//! (Graphite/Storj listeners, or any direct caller) and `Disk` (§4.6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::cancel::Cancel;
use crate::disk::Disk;
use crate::error::{EngineError, Result};
use crate::registry::{Distribution, DistributionRegistry};

struct WriterState {
    live: HashMap<String, Box<dyn Distribution>>,
    tick_start: i64,
    /// Metrics that have already logged a `RecordTooLarge` once this
    /// process, so a misconfigured block size does not spam the log on
    /// every tick (§4.6 failure semantics).
    warned_too_large: HashSet<String>,
}

pub struct Writer {
    registry: DistributionRegistry,
    flush_interval: Duration,
    disk: Arc<Disk>,
    state: Mutex<WriterState>,
}

impl Writer {
    pub fn new(disk: Arc<Disk>, registry: DistributionRegistry, flush_interval: Duration) -> Self {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        Writer {
            registry,
            flush_interval,
            disk,
            state: Mutex::new(WriterState {
                live: HashMap::new(),
                tick_start: now,
                warned_too_large: HashSet::new(),
            }),
        }
    }

    /// Accumulate one sample into `metric`'s live distribution, lazily
    /// constructing it (via the registry's default kind) on first use.
    /// `label` is accepted for parity with producer interfaces but is not
    /// interpreted by the reference `SummaryDist`.
    pub fn add(&self, metric: &str, value: f64, _label: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.live.contains_key(metric) {
            let fresh = self.registry.new_default()?;
            state.live.insert(metric.to_owned(), fresh);
        }
        state
            .live
            .get_mut(metric)
            .expect("just inserted above if absent")
            .observe(value);
        Ok(())
    }

    /// Flush every metric with a non-empty live distribution into `disk`,
    /// replacing each with a fresh one. Returns the number of metrics
    /// flushed. A failure on one metric is logged and does not prevent the
    /// others from flushing.
    pub fn tick_once(&self) -> Result<usize> {
        let tick_end = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let mut state = self.state.lock();
        let tick_start = state.tick_start;
        if tick_end <= tick_start {
            return Ok(0);
        }

        let names: Vec<String> = state
            .live
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(k, _)| k.clone())
            .collect();

        let mut flushed = 0;
        for name in &names {
            let dist = state.live.remove(name).expect("name came from live map");
            let payload = DistributionRegistry::marshal(dist.as_ref());
            match self.disk.queue(name, tick_start, tick_end, &payload) {
                Ok(true) => {
                    flushed += 1;
                    info!(metric = %name, tick_start, tick_end, "writer flushed sample window");
                    state.warned_too_large.remove(name);
                }
                Ok(false) => {
                    warn!(metric = %name, tick_start, tick_end, "writer flush rejected: out of order");
                }
                Err(EngineError::RecordTooLarge { .. }) => {
                    if state.warned_too_large.insert(name.clone()) {
                        error!(metric = %name, "writer flush failed: record too large for configured block size");
                    }
                }
                Err(e) => {
                    warn!(metric = %name, error = %e, "writer flush failed");
                }
            }
            let fresh = self.registry.new_default()?;
            state.live.insert(name.clone(), fresh);
        }

        state.tick_start = tick_end;
        Ok(flushed)
    }

    /// Flush on every tick of `flush_interval` until `cancel` is observed.
    pub fn run(&self, cancel: &Cancel) {
        while !cancel.is_cancelled() {
            std::thread::sleep(self.flush_interval);
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick_once() {
                error!(error = %e, "writer tick failed");
            }
        }
    }
}
