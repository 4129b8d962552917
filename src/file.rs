//! `File` — an append-only, fixed-size, block-structured container.
//!
//! Block 0 holds a `FileMetadata` record (version, head, smallest/largest
//! timestamp, generation). Blocks `1..num_blocks` each carry one framed
//! `record` (see `record.rs`). A logical record `(start, end, payload)` is
//! either one `Complete` block or a `Begin` block followed by one or more
//! `Continue` blocks — see `append_record`/`iter_forward`/`iter_backward`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::record::{self, RecordKind, HEADER_SIZE};

const METADATA_MAGIC: &[u8; 4] = b"RTKM";
const METADATA_VERSION: u8 = 0;
/// magic(4) + version(1) + head(4) + smallest(8) + largest(8) + generation(8)
const METADATA_BODY_SIZE: usize = 4 + 1 + 4 + 8 + 8 + 8;
/// + trailing crc32(4), detects a torn write to block 0 independent of the
/// record codec's own framing.
pub(crate) const METADATA_SIZE: usize = METADATA_BODY_SIZE + 4;

#[derive(Debug, Clone, Copy)]
pub struct FileMetadata {
    pub head: u32,
    pub smallest: i64,
    pub largest: i64,
    pub generation: u64,
}

impl FileMetadata {
    fn fresh() -> Self {
        FileMetadata {
            head: 1,
            smallest: i64::MAX,
            largest: i64::MIN,
            generation: 0,
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut body = Vec::with_capacity(METADATA_SIZE);
        body.extend_from_slice(METADATA_MAGIC);
        body.write_u8(METADATA_VERSION).unwrap();
        body.write_u32::<BigEndian>(self.head).unwrap();
        body.write_i64::<BigEndian>(self.smallest).unwrap();
        body.write_i64::<BigEndian>(self.largest).unwrap();
        body.write_u64::<BigEndian>(self.generation).unwrap();
        debug_assert_eq!(body.len(), METADATA_BODY_SIZE);

        let mut crc = crc32fast::Hasher::new();
        crc.update(&body);
        body.write_u32::<BigEndian>(crc.finalize()).unwrap();
        body
    }

    fn from_bytes(buf: &[u8], path: &Path) -> Result<Self> {
        if buf.len() < METADATA_SIZE {
            return Err(EngineError::Corrupt {
                path: path.to_owned(),
                block: 0,
                reason: "metadata record shorter than expected".into(),
            });
        }
        let crc_pos = METADATA_BODY_SIZE;
        let mut crc = crc32fast::Hasher::new();
        crc.update(&buf[..crc_pos]);
        let expected = crc.finalize();
        let stored = (&buf[crc_pos..crc_pos + 4]).read_u32::<BigEndian>()?;
        if stored != expected {
            return Err(EngineError::Corrupt {
                path: path.to_owned(),
                block: 0,
                reason: "metadata crc32 mismatch".into(),
            });
        }

        let mut r = &buf[..];
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != METADATA_MAGIC {
            return Err(EngineError::Corrupt {
                path: path.to_owned(),
                block: 0,
                reason: "bad metadata magic".into(),
            });
        }
        let version = r.read_u8()?;
        if version != METADATA_VERSION {
            return Err(EngineError::Corrupt {
                path: path.to_owned(),
                block: 0,
                reason: format!("unsupported metadata version {version}"),
            });
        }
        let head = r.read_u32::<BigEndian>()?;
        let smallest = r.read_i64::<BigEndian>()?;
        let largest = r.read_i64::<BigEndian>()?;
        let generation = r.read_u64::<BigEndian>()?;

        Ok(FileMetadata {
            head,
            smallest,
            largest,
            generation,
        })
    }
}

/// A single fixed-size, block-structured file backing one generation of a
/// metric's ring.
pub struct File {
    handle: std::fs::File,
    path: PathBuf,
    block_size: usize,
    num_blocks: u32,
    read_only: bool,
    pub meta: FileMetadata,
}

impl File {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_full(&self) -> bool {
        self.meta.head >= self.num_blocks
    }

    pub fn is_empty(&self) -> bool {
        self.meta.head <= 1
    }

    /// Preallocate a new fixed-size file and write the initial metadata
    /// block. Fails `AlreadyExists` if `path` already exists.
    pub fn create(path: &Path, block_size: usize, num_blocks: u32, generation: u64) -> Result<Self> {
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    EngineError::AlreadyExists {
                        path: path.to_owned(),
                    }
                } else {
                    EngineError::io(path, e)
                }
            })?;
        handle
            .set_len((block_size as u64) * (num_blocks as u64))
            .map_err(|e| EngineError::io(path, e))?;

        let mut file = File {
            handle,
            path: path.to_owned(),
            block_size,
            num_blocks,
            read_only: false,
            meta: FileMetadata {
                generation,
                ..FileMetadata::fresh()
            },
        };
        file.write_metadata()?;
        Ok(file)
    }

    /// Open an existing file, parsing and validating block 0.
    pub fn open(path: &Path, block_size: usize, num_blocks: u32, read_only: bool) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::NotFound(path.display().to_string()));
        }
        let handle = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| EngineError::io(path, e))?;

        let expected_len = (block_size as u64) * (num_blocks as u64);
        let actual_len = handle
            .metadata()
            .map_err(|e| EngineError::io(path, e))?
            .len();
        if actual_len != expected_len {
            return Err(EngineError::Corrupt {
                path: path.to_owned(),
                block: 0,
                reason: format!("file length {actual_len} != expected {expected_len}"),
            });
        }

        let mut file = File {
            handle,
            path: path.to_owned(),
            block_size,
            num_blocks,
            read_only,
            meta: FileMetadata::fresh(),
        };
        file.meta = file.read_metadata()?;
        Ok(file)
    }

    /// Open a file whose block 0 could not be parsed (torn write) and
    /// immediately reset it, giving up on whatever data blocks it held.
    /// Resizes the file to `block_size * num_blocks` first in case the
    /// crash also left the length inconsistent.
    pub fn repair(path: &Path, block_size: usize, num_blocks: u32, generation: u64) -> Result<Self> {
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EngineError::io(path, e))?;
        handle
            .set_len((block_size as u64) * (num_blocks as u64))
            .map_err(|e| EngineError::io(path, e))?;

        let mut file = File {
            handle,
            path: path.to_owned(),
            block_size,
            num_blocks,
            read_only: false,
            meta: FileMetadata::fresh(),
        };
        file.reset(generation)?;
        Ok(file)
    }

    /// Reset an existing on-disk file in place: truncate its logical
    /// content back to empty and bump `generation`. Used both for ring
    /// wraparound (§4.4 step 4) and crash-recovery resets (§4.2).
    pub fn reset(&mut self, generation: u64) -> Result<()> {
        self.meta = FileMetadata {
            generation,
            ..FileMetadata::fresh()
        };
        self.write_metadata()
    }

    fn block_offset(&self, index: u32) -> u64 {
        index as u64 * self.block_size as u64
    }

    fn read_block(&mut self, index: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        self.handle
            .seek(SeekFrom::Start(self.block_offset(index)))
            .map_err(|e| EngineError::io(&self.path, e))?;
        self.handle
            .read_exact(buf)
            .map_err(|e| EngineError::io(&self.path, e))
    }

    fn write_block(&mut self, index: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        self.handle
            .seek(SeekFrom::Start(self.block_offset(index)))
            .map_err(|e| EngineError::io(&self.path, e))?;
        self.handle
            .write_all(buf)
            .map_err(|e| EngineError::io(&self.path, e))
    }

    fn read_metadata(&mut self) -> Result<FileMetadata> {
        let mut buf = vec![0u8; self.block_size];
        self.read_block(0, &mut buf)?;
        let (kind, payload) = record::decode(&buf).map_err(|_| EngineError::Corrupt {
            path: self.path.clone(),
            block: 0,
            reason: "block 0 is not a well-formed record".into(),
        })?;
        if kind != RecordKind::Complete {
            return Err(EngineError::Corrupt {
                path: self.path.clone(),
                block: 0,
                reason: "block 0 has unexpected record kind".into(),
            });
        }
        FileMetadata::from_bytes(payload, &self.path)
    }

    fn write_metadata(&mut self) -> Result<()> {
        let payload = self.meta.to_bytes();
        let mut buf = vec![0u8; self.block_size];
        record::encode(&mut buf, RecordKind::Complete, &payload)?;
        self.write_block(0, &buf)?;
        // Durability ordering (§5): block 0 is the single source of truth
        // for which data blocks are committed, so its write is flushed to
        // the OS/disk after (never before) the payload blocks it anchors.
        let _ = self.handle.sync_data();
        Ok(())
    }

    /// Append one logical record. Returns `NoSpace` if the active file does
    /// not have enough free blocks; the caller (Metric) is responsible for
    /// rotation and the single retry.
    pub fn append_record(&mut self, start: i64, end: i64, payload: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(EngineError::InvalidArgument(
                "cannot append to a read-only file".into(),
            ));
        }
        let framed = record::frame_logical(start, end, payload);
        // A chunk becomes one block's payload, framed with a 2-byte size
        // field (see `record.rs`), so no chunk may exceed `u16::MAX`.
        let chunk_cap = (self.block_size - HEADER_SIZE).min(u16::MAX as usize);
        let chunks: Vec<&[u8]> = framed.chunks(chunk_cap.max(1)).collect();
        let k = chunks.len().max(1);

        if self.meta.head as usize + k > self.num_blocks as usize {
            return Err(EngineError::NoSpace { needed: k });
        }

        let mut buf = vec![0u8; self.block_size];
        for (i, chunk) in chunks.iter().enumerate() {
            let kind = if k == 1 {
                RecordKind::Complete
            } else if i == 0 {
                RecordKind::Begin
            } else {
                RecordKind::Continue
            };
            buf.iter_mut().for_each(|b| *b = 0);
            record::encode(&mut buf, kind, chunk)?;
            self.write_block(self.meta.head + i as u32, &buf)?;
        }

        self.meta.head += k as u32;
        self.meta.smallest = self.meta.smallest.min(start);
        self.meta.largest = self.meta.largest.max(end);
        self.write_metadata()
    }

    /// Reassemble and visit every logical record from `from_block` (must be
    /// `>= 1`) up to `head`, in forward order. `visit` returning `Ok(false)`
    /// stops iteration early.
    pub fn iter_forward(
        &mut self,
        from_block: u32,
        mut visit: impl FnMut(i64, i64, &[u8]) -> Result<bool>,
    ) -> Result<()> {
        let mut pos = from_block.max(1);
        let mut buf = vec![0u8; self.block_size];
        while pos < self.meta.head {
            self.read_block(pos, &mut buf)?;
            let (kind, first_payload) =
                record::decode(&buf).map_err(|_| corrupt_err(&self.path, pos))?;
            let mut combined;
            let data: &[u8] = match kind {
                RecordKind::Complete => {
                    pos += 1;
                    first_payload
                }
                RecordKind::Begin => {
                    combined = first_payload.to_vec();
                    let mut next = pos + 1;
                    loop {
                        if next >= self.meta.head {
                            return Err(corrupt_err(&self.path, pos));
                        }
                        self.read_block(next, &mut buf)?;
                        let (k2, p2) =
                            record::decode(&buf).map_err(|_| corrupt_err(&self.path, next))?;
                        match k2 {
                            RecordKind::Continue => {
                                combined.extend_from_slice(p2);
                                next += 1;
                                if next < self.meta.head {
                                    self.read_block(next, &mut buf)?;
                                    let (peek_kind, _) = record::decode(&buf)
                                        .map_err(|_| corrupt_err(&self.path, next))?;
                                    if peek_kind != RecordKind::Continue {
                                        pos = next;
                                        break;
                                    }
                                } else {
                                    pos = next;
                                    break;
                                }
                            }
                            _ => return Err(corrupt_err(&self.path, next)),
                        }
                    }
                    &combined[..]
                }
                RecordKind::Continue => return Err(corrupt_err(&self.path, pos)),
            };

            let (start, end, user_bytes) = record::split_logical(data)?;
            let keep_going = visit(start, end, user_bytes)?;
            if !keep_going {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Reassemble and visit logical records from `head-1` backwards. `visit`
    /// returning `Ok(false)` stops iteration early.
    pub fn iter_backward(
        &mut self,
        mut visit: impl FnMut(i64, i64, &[u8]) -> Result<bool>,
    ) -> Result<()> {
        if self.meta.head <= 1 {
            return Ok(());
        }
        let mut pos = self.meta.head - 1;
        let mut buf = vec![0u8; self.block_size];
        loop {
            self.read_block(pos, &mut buf)?;
            let (kind, payload) = record::decode(&buf).map_err(|_| corrupt_err(&self.path, pos))?;

            let (data, begin_pos): (Vec<u8>, u32) = match kind {
                RecordKind::Complete => (payload.to_vec(), pos),
                RecordKind::Continue => {
                    // Scan backward to find the `Begin` that starts this
                    // logical record, accumulating payload in order.
                    let end_pos = pos;
                    let mut parts: Vec<Vec<u8>> = vec![payload.to_vec()];
                    let mut cursor = pos;
                    let begin = loop {
                        if cursor == 1 {
                            return Err(corrupt_err(&self.path, pos));
                        }
                        cursor -= 1;
                        self.read_block(cursor, &mut buf)?;
                        let (k2, p2) =
                            record::decode(&buf).map_err(|_| corrupt_err(&self.path, cursor))?;
                        match k2 {
                            RecordKind::Continue => parts.push(p2.to_vec()),
                            RecordKind::Begin => {
                                parts.push(p2.to_vec());
                                break cursor;
                            }
                            RecordKind::Complete => return Err(corrupt_err(&self.path, cursor)),
                        }
                    };
                    parts.reverse();
                    let combined: Vec<u8> = parts.concat();
                    let _ = end_pos;
                    (combined, begin)
                }
                RecordKind::Begin => return Err(corrupt_err(&self.path, pos)),
            };

            let (start, end, user_bytes) = record::split_logical(&data)?;
            let keep_going = visit(start, end, user_bytes)?;
            if !keep_going || begin_pos <= 1 {
                return Ok(());
            }
            pos = begin_pos - 1;
        }
    }

    /// Return the last logical record written, or `(0, 0, vec![])` if the
    /// file has no data blocks yet.
    pub fn read_last(&mut self) -> Result<(i64, i64, Vec<u8>)> {
        let mut found: Option<(i64, i64, Vec<u8>)> = None;
        self.iter_backward(|start, end, data| {
            found = Some((start, end, data.to_vec()));
            Ok(false)
        })?;
        Ok(found.unwrap_or((0, 0, Vec::new())))
    }
}

fn corrupt_err(path: &Path, block: u32) -> EngineError {
    EngineError::Corrupt {
        path: path.to_owned(),
        block,
        reason: "malformed record encountered during reassembly".into(),
    }
}
