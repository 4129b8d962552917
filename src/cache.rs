//! Bounded LRU cache of open `File` handles plus a small pool of reusable
//! scratch buffers (§4.3).
//!
//! Two independent bounds: `handles` caps the number of simultaneously open
//! OS file handles (leased-out + idle-cached); `buffer_cache_size` caps how
//! many scratch `Vec<u8>` buffers are kept warm for reuse. Acquiring a
//! handle beyond the `handles` bound blocks on a condition variable rather
//! than failing — callers that want a bound should race `acquire` against
//! a `Cancel`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::cancel::Cancel;
use crate::error::{EngineError, Result};
use crate::file::File;

struct Inner {
    idle: LruCache<PathBuf, File>,
    leased: HashSet<PathBuf>,
    handles: usize,
    buffers: Vec<Vec<u8>>,
    buffer_cap: usize,
    block_size: usize,
    closed: bool,
}

pub struct FileCache {
    inner: Mutex<Inner>,
    released: Condvar,
}

/// A leased file plus scratch buffer. Must be returned via
/// `FileCache::release`; dropping it without releasing leaks the lease
/// (the handle is simply never reusable again, it is not a safety issue).
pub struct Handle {
    pub path: PathBuf,
    pub file: File,
    pub buf: Vec<u8>,
}

/// What to do if `acquire`'s path does not exist on disk yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateHint {
    MustExist { num_blocks: u32 },
    CreateNew { num_blocks: u32, generation: u64 },
}

impl FileCache {
    pub fn new(handles: usize, buffer_cache_size: usize, block_size: usize) -> Self {
        FileCache {
            inner: Mutex::new(Inner {
                idle: LruCache::unbounded(),
                leased: HashSet::new(),
                handles: handles.max(1),
                buffers: Vec::new(),
                buffer_cap: buffer_cache_size,
                block_size,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquire the handle for `path`, opening or creating it as directed by
    /// `hint` if it is not already cached. Blocks (uninterruptibly, unless
    /// `cancel` is supplied) while the cache is at its `handles` bound and
    /// every handle is leased elsewhere.
    pub fn acquire(
        &self,
        path: &Path,
        hint: CreateHint,
        block_size: usize,
        cancel: Option<&Cancel>,
    ) -> Result<Handle> {
        let mut guard = self.inner.lock();
        loop {
            if guard.closed {
                return Err(EngineError::Closed);
            }
            if let Some(cancel) = cancel {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
            }

            if guard.leased.contains(path) {
                // Already checked out elsewhere; wait for its release.
                self.released.wait_for(&mut guard, std::time::Duration::from_millis(50));
                continue;
            }

            if let Some(file) = guard.idle.pop(path) {
                guard.leased.insert(path.to_owned());
                let buf = take_buffer(&mut guard, block_size);
                return Ok(Handle {
                    path: path.to_owned(),
                    file,
                    buf,
                });
            }

            let total_open = guard.idle.len() + guard.leased.len();
            if total_open < guard.handles {
                let file = open_or_create(path, hint, block_size)?;
                guard.leased.insert(path.to_owned());
                let buf = take_buffer(&mut guard, block_size);
                return Ok(Handle {
                    path: path.to_owned(),
                    file,
                    buf,
                });
            }

            if guard.idle.pop_lru().is_some() {
                // Evicted the least-recently-used idle handle; room freed,
                // loop back around to open the requested path.
                continue;
            }

            // Every slot is leased out and nothing idle to evict: block.
            self.released.wait_for(&mut guard, std::time::Duration::from_millis(50));
        }
    }

    /// Return a leased handle to the idle cache, waking any waiters.
    pub fn release(&self, handle: Handle) {
        let mut guard = self.inner.lock();
        guard.leased.remove(&handle.path);
        if !guard.closed {
            guard.idle.put(handle.path, handle.file);
        }
        if guard.buffers.len() < guard.buffer_cap {
            guard.buffers.push(handle.buf);
        }
        self.released.notify_all();
    }

    /// Close every cached (idle) handle; `acquire` fails `Closed` from then
    /// on. Leased-out handles are unaffected until released, at which point
    /// they are dropped rather than re-cached.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        guard.closed = true;
        guard.idle.clear();
        guard.buffers.clear();
        self.released.notify_all();
    }

    pub fn block_size(&self) -> usize {
        self.inner.lock().block_size
    }
}

fn take_buffer(guard: &mut Inner, block_size: usize) -> Vec<u8> {
    guard
        .buffers
        .pop()
        .unwrap_or_else(|| vec![0u8; block_size])
}

fn open_or_create(path: &Path, hint: CreateHint, block_size: usize) -> Result<File> {
    match hint {
        CreateHint::MustExist { num_blocks } => File::open(path, block_size, num_blocks, false),
        CreateHint::CreateNew {
            num_blocks,
            generation,
        } => {
            if path.exists() {
                File::open(path, block_size, num_blocks, false)
            } else {
                File::create(path, block_size, num_blocks, generation)
            }
        }
    }
}
