//! `Metric` — a named, append-only ring of fixed-size `File`s (§4.4).
//!
//! At any moment exactly one file in the ring is *active* (append target);
//! the rest are *sealed*. When the active file fills and the ring already
//! holds `max_files + 1` files, the file with the smallest generation is
//! truncated and reset in place, becoming the new active file with a fresh
//! generation past the current maximum — an overwrite-in-place ring, never
//! unbounded growth.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::cache::{CreateHint, FileCache, Handle};
use crate::error::{EngineError, Result};
use crate::file::File;
use crate::record::{self, HEADER_SIZE};

#[derive(Debug, Clone, Copy)]
struct FileSummary {
    file_number: u32,
    generation: u64,
    smallest: i64,
    largest: i64,
    head: u32,
}

impl FileSummary {
    fn sealed(&self, num_blocks: u32) -> bool {
        self.head >= num_blocks
    }
}

struct MetricState {
    files: Vec<FileSummary>,
    active_file_number: Option<u32>,
    last_end: i64,
}

pub struct Metric {
    dir: PathBuf,
    #[allow(dead_code)]
    name: String,
    max_files: u32,
    block_size: usize,
    num_blocks: u32,
    cache: std::sync::Arc<FileCache>,
    read_only: bool,
    state: Mutex<MetricState>,
}

impl Metric {
    fn file_path(dir: &Path, file_number: u32) -> PathBuf {
        dir.join(format!("{file_number:06}"))
    }

    /// Scan `dir` for numbered files, recover/repair as needed, and
    /// identify (or create) the active file. See §4.4 constructor steps.
    pub fn open(
        dir: PathBuf,
        name: String,
        max_files: u32,
        block_size: usize,
        num_blocks: u32,
        cache: std::sync::Arc<FileCache>,
        read_only: bool,
    ) -> Result<Self> {
        if !dir.exists() {
            if read_only {
                return Err(EngineError::NotFound(name));
            }
            std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        }

        let mut summaries = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| EngineError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(&dir, e))?;
            let fname = entry.file_name();
            let Some(fname) = fname.to_str() else {
                continue;
            };
            let Ok(file_number) = fname.parse::<u32>() else {
                continue;
            };
            let path = Self::file_path(&dir, file_number);
            match File::open(&path, block_size, num_blocks, read_only) {
                Ok(file) => summaries.push(FileSummary {
                    file_number,
                    generation: file.meta.generation,
                    smallest: file.meta.smallest,
                    largest: file.meta.largest,
                    head: file.meta.head,
                }),
                Err(EngineError::Corrupt { .. }) => {
                    if read_only {
                        return Err(EngineError::Corrupt {
                            path,
                            block: 0,
                            reason: "read-only metric cannot repair torn block 0".into(),
                        });
                    }
                    let next_gen = summaries.iter().map(|s| s.generation).max().map_or(0, |g| g + 1);
                    File::repair(&path, block_size, num_blocks, next_gen)?;
                    summaries.push(FileSummary {
                        file_number,
                        generation: next_gen,
                        smallest: i64::MAX,
                        largest: i64::MIN,
                        head: 1,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        summaries.sort_by_key(|s| s.generation);

        if summaries.is_empty() && read_only {
            return Err(EngineError::NotFound(name));
        }

        let active_file_number = if let Some(newest) = summaries.last() {
            if !newest.sealed(num_blocks) {
                Some(newest.file_number)
            } else {
                None
            }
        } else {
            None
        };

        let mut metric = Metric {
            dir,
            name,
            max_files,
            block_size,
            num_blocks,
            cache,
            read_only,
            state: Mutex::new(MetricState {
                last_end: summaries.iter().map(|s| s.largest).max().unwrap_or(0).max(0),
                files: summaries,
                active_file_number,
            }),
        };

        if metric.state.get_mut().active_file_number.is_none() && !read_only {
            let mut state = metric.state.lock();
            metric.promote_active(&mut state)?;
        }

        Ok(metric)
    }

    fn whole_file_capacity(&self) -> usize {
        (self.num_blocks as usize - 1) * (self.block_size - HEADER_SIZE)
    }

    /// Bring up a new active file: create a fresh slot if the ring has not
    /// yet reached `max_files + 1` members, otherwise recycle the
    /// smallest-generation (oldest) member in place.
    fn promote_active(&self, state: &mut MetricState) -> Result<()> {
        let capacity = self.max_files as usize + 1;
        let max_generation = state.files.iter().map(|f| f.generation).max();
        let next_generation = max_generation.map_or(0, |g| g + 1);

        if state.files.len() < capacity {
            let used: std::collections::HashSet<u32> =
                state.files.iter().map(|f| f.file_number).collect();
            let file_number = (0..capacity as u32)
                .find(|n| !used.contains(n))
                .expect("ring not yet at capacity implies a free slot exists");
            let path = Self::file_path(&self.dir, file_number);
            let handle = self.cache.acquire(
                &path,
                CreateHint::CreateNew {
                    num_blocks: self.num_blocks,
                    generation: next_generation,
                },
                self.block_size,
                None,
            )?;
            self.cache.release(handle);
            state.files.push(FileSummary {
                file_number,
                generation: next_generation,
                smallest: i64::MAX,
                largest: i64::MIN,
                head: 1,
            });
        } else {
            let oldest_idx = state
                .files
                .iter()
                .enumerate()
                .min_by_key(|(_, f)| f.generation)
                .map(|(i, _)| i)
                .expect("ring at capacity implies at least one file");
            let file_number = state.files[oldest_idx].file_number;
            let path = Self::file_path(&self.dir, file_number);
            let Handle { path, mut file, buf } = self.cache.acquire(
                &path,
                CreateHint::MustExist {
                    num_blocks: self.num_blocks,
                },
                self.block_size,
                None,
            )?;
            file.reset(next_generation)?;
            self.cache.release(Handle { path, file, buf });
            state.files[oldest_idx] = FileSummary {
                file_number,
                generation: next_generation,
                smallest: i64::MAX,
                largest: i64::MIN,
                head: 1,
            };
        }
        state.files.sort_by_key(|f| f.generation);
        state.active_file_number = Some(
            state
                .files
                .iter()
                .max_by_key(|f| f.generation)
                .unwrap()
                .file_number,
        );
        Ok(())
    }

    /// Append one sample. Returns `Ok(false)` (no error) if `start` would
    /// violate chronology; `Ok(true)` on success.
    pub fn write(&self, start: i64, end: i64, payload: &[u8]) -> Result<bool> {
        if self.read_only {
            return Err(EngineError::InvalidArgument(
                "metric opened read-only".into(),
            ));
        }
        let mut state = self.state.lock();
        if start < state.last_end {
            return Ok(false);
        }

        let framed_len = record::frame_logical(start, end, payload).len();
        if framed_len > self.whole_file_capacity() {
            return Err(EngineError::RecordTooLarge {
                size: framed_len,
                capacity: self.whole_file_capacity(),
            });
        }

        let active_number = match state.active_file_number {
            Some(n) => n,
            None => {
                self.promote_active(&mut state)?;
                state.active_file_number.unwrap()
            }
        };

        match self.append_to(&mut state, active_number, start, end, payload)? {
            true => {}
            false => {
                self.seal(&mut state, active_number);
                self.promote_active(&mut state)?;
                let new_active = state.active_file_number.unwrap();
                let ok = self.append_to(&mut state, new_active, start, end, payload)?;
                if !ok {
                    return Err(EngineError::RecordTooLarge {
                        size: framed_len,
                        capacity: self.whole_file_capacity(),
                    });
                }
            }
        }
        state.last_end = end;
        Ok(true)
    }

    fn seal(&self, state: &mut MetricState, file_number: u32) {
        if let Some(summary) = state
            .files
            .iter_mut()
            .find(|f| f.file_number == file_number)
        {
            summary.head = self.num_blocks;
        }
    }

    /// Try to append into `file_number`; `Ok(false)` means `NoSpace` (full,
    /// caller should rotate), any other error propagates.
    fn append_to(
        &self,
        state: &mut MetricState,
        file_number: u32,
        start: i64,
        end: i64,
        payload: &[u8],
    ) -> Result<bool> {
        let path = Self::file_path(&self.dir, file_number);
        let Handle { path, mut file, buf } = self.cache.acquire(
            &path,
            CreateHint::MustExist {
                num_blocks: self.num_blocks,
            },
            self.block_size,
            None,
        )?;
        let result = file.append_record(start, end, payload);
        let (head, smallest, largest) = (file.meta.head, file.meta.smallest, file.meta.largest);
        self.cache.release(Handle { path, file, buf });

        match result {
            Ok(()) => {
                if let Some(summary) = state
                    .files
                    .iter_mut()
                    .find(|f| f.file_number == file_number)
                {
                    summary.head = head;
                    summary.smallest = smallest;
                    summary.largest = largest;
                }
                Ok(true)
            }
            Err(EngineError::NoSpace { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Visit records from the newest file whose range could contain
    /// `end_hint`, backward, continuing into older files until the visitor
    /// returns `false` or the ring is exhausted.
    pub fn read(
        &self,
        end_hint: i64,
        mut visit: impl FnMut(i64, i64, &[u8]) -> Result<bool>,
    ) -> Result<()> {
        let files = {
            let state = self.state.lock();
            state.files.clone()
        };
        let Some(mut pos) = files
            .iter()
            .enumerate()
            .rev()
            .find(|(_, f)| f.smallest <= end_hint)
            .map(|(i, _)| i)
        else {
            return Ok(());
        };

        loop {
            let file_number = files[pos].file_number;
            let path = Self::file_path(&self.dir, file_number);
            let Handle { path, mut file, buf } = self.cache.acquire(
                &path,
                CreateHint::MustExist {
                    num_blocks: self.num_blocks,
                },
                self.block_size,
                None,
            )?;

            let mut started = false;
            let mut stop = false;
            let iter_result = file.iter_backward(|s, e, d| {
                if !started {
                    if e > end_hint {
                        return Ok(true);
                    }
                    started = true;
                }
                let keep_going = visit(s, e, d)?;
                if !keep_going {
                    stop = true;
                }
                Ok(keep_going)
            });
            self.cache.release(Handle { path, file, buf });
            iter_result?;

            if stop || pos == 0 {
                return Ok(());
            }
            pos -= 1;
        }
    }

    /// Return the last logical record written to the metric, or
    /// `(0, 0, vec![])` if it holds no records at all.
    pub fn read_last(&self) -> Result<(i64, i64, Vec<u8>)> {
        let files = {
            let state = self.state.lock();
            state.files.clone()
        };
        let Some(newest) = files.iter().max_by_key(|f| f.generation) else {
            return Ok((0, 0, Vec::new()));
        };
        if newest.head <= 1 {
            return Ok((0, 0, Vec::new()));
        }
        let path = Self::file_path(&self.dir, newest.file_number);
        let Handle { path, mut file, buf } = self.cache.acquire(
            &path,
            CreateHint::MustExist {
                num_blocks: self.num_blocks,
            },
            self.block_size,
            None,
        )?;
        let result = file.read_last();
        self.cache.release(Handle { path, file, buf });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_metric(dir: &Path, max_files: u32, block_size: usize, num_blocks: u32) -> Metric {
        let cache = std::sync::Arc::new(FileCache::new(8, 8, block_size));
        Metric::open(
            dir.to_owned(),
            "m".into(),
            max_files,
            block_size,
            num_blocks,
            cache,
            false,
        )
        .unwrap()
    }

    #[test]
    fn write_then_read_last() {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path(), 2, 64, 8);
        assert!(metric.write(0, 10, b"abc").unwrap());
        let (s, e, data) = metric.read_last().unwrap();
        assert_eq!((s, e), (0, 10));
        assert_eq!(data, b"abc");
    }

    #[test]
    fn chronology_violation_rejected_without_error() {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path(), 2, 64, 8);
        assert!(metric.write(100, 110, b"a").unwrap());
        assert!(!metric.write(50, 60, b"b").unwrap());
    }

    #[test]
    fn empty_metric_read_last_is_zero() {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path(), 2, 64, 8);
        assert_eq!(metric.read_last().unwrap(), (0, 0, Vec::new()));
    }

    #[test]
    fn ring_wraparound_recycles_oldest_file() {
        let dir = tempdir().unwrap();
        // max_files=1 -> ring capacity 2; small block/num_blocks forces
        // rotation after a handful of writes.
        let metric = open_metric(dir.path(), 1, 48, 4);
        for i in 0..40i64 {
            let ok = metric.write(i * 10, i * 10 + 5, &[i as u8]).unwrap();
            assert!(ok, "write {i} should have succeeded or rotated");
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(entries.len() <= 2, "ring should never exceed max_files + 1 files");
    }

    #[test]
    fn read_visits_records_in_decreasing_end_order() {
        let dir = tempdir().unwrap();
        let metric = open_metric(dir.path(), 2, 64, 8);
        for i in 0..3i64 {
            metric.write(i * 10, i * 10 + 5, &[i as u8]).unwrap();
        }
        let mut seen = Vec::new();
        metric
            .read(1000, |s, e, d| {
                seen.push((s, e, d.to_vec()));
                Ok(true)
            })
            .unwrap();
        let mut ends: Vec<i64> = seen.iter().map(|(_, e, _)| *e).collect();
        let mut sorted = ends.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ends, sorted);
        ends.dedup();
    }
}
