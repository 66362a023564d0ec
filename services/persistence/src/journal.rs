//! Journal Writer: Append-only record journal with checksums
//!
//! Every durable structure in this crate (the event log's streams and
//! consumer groups, the vote store, the candidate list) is an in-memory
//! index rebuilt from one of these journals on open.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len: u32]
//! [sequence: u64]
//! [timestamp: i64]
//! [kind_len: u8][kind: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]  // CRC32C over sequence+timestamp+kind+payload
//! ```
//!
//! A writer never appends to a segment it did not create: `open` always
//! starts a fresh segment, so a torn tail left by a crash stays isolated at
//! the end of an older segment where the reader skips it.
//!
//! A failed append is rolled back: the segment is truncated to the last
//! complete record before the error is returned, so a failed record never
//! shows up on replay. When the truncation itself fails the writer refuses
//! every later append.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record kind too long: {0} bytes")]
    KindTooLong(usize),

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },

    #[error("Journal unusable after a failed write could not be rolled back: {0}")]
    Poisoned(String),
}

/// Fixed bytes in a body besides kind and payload: seq + ts + kind_len + payload_len + crc.
const FIXED_BODY_LEN: usize = 8 + 8 + 1 + 4 + 4;

/// Bodies larger than this are treated as corruption.
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

// ── Journal Entry ───────────────────────────────────────────────────

/// A single checksummed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic sequence within one journal directory
    pub sequence: u64,
    /// Unix millisecond timestamp at append time
    pub timestamp: i64,
    /// Short record kind tag, e.g. `append` or `ack`
    pub kind: String,
    /// Bincode-serialized record
    pub payload: Vec<u8>,
    /// CRC32C over (sequence ++ timestamp ++ kind ++ payload)
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    /// Decode the payload as a bincode record.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, JournalError> {
        bincode::deserialize(&self.payload).map_err(|e| JournalError::Serialization(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let kind = self.kind.as_bytes();
        let kind_len = u8::try_from(kind.len()).map_err(|_| JournalError::KindTooLong(kind.len()))?;
        let body_len = FIXED_BODY_LEN + kind.len() + self.payload.len();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(kind_len);
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        Ok(buf)
    }

    /// Decode one entry from the front of `data`.
    ///
    /// Returns `(entry, bytes_consumed)`. The checksum is not verified here.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let mut header = ByteCursor::new(data);
        let body_len = header.u32()? as usize;
        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "implausible body length {body_len}"
            )));
        }
        if body_len < FIXED_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "body too small: {body_len} bytes, minimum is {FIXED_BODY_LEN}"
            )));
        }

        let body = header.take(body_len)?;
        let mut cur = ByteCursor::new(body);
        let sequence = cur.u64()?;
        let timestamp = cur.i64()?;
        let kind_len = cur.u8()? as usize;
        let kind = String::from_utf8(cur.take(kind_len)?.to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        let payload_len = cur.u32()? as usize;
        let payload = cur.take(payload_len)?.to_vec();
        let checksum = cur.u32()?;

        Ok((
            Self {
                sequence,
                timestamp,
                kind,
                payload,
                checksum,
            },
            4 + body_len,
        ))
    }
}

/// Bounds-checked little-endian reader over a byte slice.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], JournalError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(JournalError::Serialization(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            ))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JournalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, JournalError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, JournalError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, JournalError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, JournalError> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

// ── Fsync Policy ────────────────────────────────────────────────────

/// Controls when `fsync` (durable write) is called. Data is always flushed
/// to the OS after each append.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Fsync only on segment rotation and explicit `sync`.
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal segments.
    pub dir: PathBuf,
    /// Maximum segment size in bytes before rotation (default 64 MiB).
    pub max_file_size: u64,
    /// Maximum total journal size in bytes (0 = unlimited).
    pub max_total_size: u64,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with checksums, rotation, and fsync control.
///
/// Each record is encoded in full and written with a single `write_all`, so
/// no bytes of a failed record linger in a userspace buffer.
pub struct JournalWriter {
    config: JournalConfig,
    file: File,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: Option<String>,
}

impl JournalWriter {
    /// Open a writer on a fresh segment after the latest existing one.
    ///
    /// `next_sequence` continues the sequence recovered by the reader.
    pub fn open(config: JournalConfig, next_sequence: u64) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = latest_index(&config.dir)?.map_or(0, |i| i + 1);
        let current_file = segment_path(&config.dir, file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let total_size = compute_total_size(&config.dir)?;

        info!(
            dir = %config.dir.display(),
            segment = file_index,
            next_sequence,
            "Journal opened"
        );

        Ok(Self {
            config,
            file,
            current_file,
            current_file_size: 0,
            next_sequence,
            writes_since_fsync: 0,
            file_index,
            total_size,
            poisoned: None,
        })
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append one record, assigning it the next sequence number.
    pub fn append<T: Serialize>(
        &mut self,
        timestamp: i64,
        kind: &str,
        record: &T,
    ) -> Result<u64, JournalError> {
        let payload =
            bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let entry = JournalEntry::new(self.next_sequence, timestamp, kind, payload);
        self.append_entry(&entry)?;
        Ok(entry.sequence)
    }

    fn append_entry(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if let Some(reason) = &self.poisoned {
            return Err(JournalError::Poisoned(reason.clone()));
        }

        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = entry.to_bytes()?;
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync + 1 >= n,
            FsyncPolicy::OnRotation => false,
        };

        if let Err(e) = self.write_record(&bytes, should_fsync) {
            warn!(
                sequence = entry.sequence,
                segment = self.file_index,
                error = %e,
                "Journal append failed, rolling back"
            );
            self.roll_back()?;
            return Err(e.into());
        }

        let written = bytes.len() as u64;
        self.current_file_size += written;
        self.total_size += written;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_fsync = if should_fsync { 0 } else { self.writes_since_fsync + 1 };
        Ok(())
    }

    fn write_record(&mut self, bytes: &[u8], fsync: bool) -> Result<(), io::Error> {
        self.file.write_all(bytes)?;
        if fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the current segment back to its last complete record and reopen
    /// it for appending.
    fn roll_back(&mut self) -> Result<(), JournalError> {
        let restored = OpenOptions::new()
            .write(true)
            .open(&self.current_file)
            .and_then(|f| {
                f.set_len(self.current_file_size)?;
                f.sync_data()
            })
            .and_then(|_| OpenOptions::new().append(true).open(&self.current_file));

        match restored {
            Ok(file) => {
                self.file = file;
                debug!(
                    segment = self.file_index,
                    len = self.current_file_size,
                    "Journal segment rolled back"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    segment = self.file_index,
                    error = %e,
                    "Journal rollback failed, refusing further appends"
                );
                let reason = e.to_string();
                self.poisoned = Some(reason.clone());
                Err(JournalError::Poisoned(reason))
            }
        }
    }

    /// Force fsync (used before shutdown / rotation).
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.writes_since_fsync = 0;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = segment_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;

        debug!(segment = self.file_index, "Journal segment rotated");
        self.file = file;
        self.current_file_size = 0;
        Ok(())
    }
}

// ── Segment Files ───────────────────────────────────────────────────

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("journal-{:06}.bin", index))
}

pub(crate) fn segment_index(name: &str) -> Option<u64> {
    name.strip_prefix("journal-")?
        .strip_suffix(".bin")?
        .parse::<u64>()
        .ok()
}

/// All segment files in `dir`, sorted by index.
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, io::Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let idx = segment_index(&e.file_name().to_string_lossy())?;
            Some((idx, e.path()))
        })
        .collect();
    segments.sort_by_key(|(idx, _)| *idx);
    Ok(segments)
}

fn latest_index(dir: &Path) -> Result<Option<u64>, io::Error> {
    Ok(list_segments(dir)?.last().map(|(idx, _)| *idx))
}

fn compute_total_size(dir: &Path) -> Result<u64, io::Error> {
    let mut total = 0u64;
    for (_, path) in list_segments(dir)? {
        total += fs::metadata(path)?.len();
    }
    Ok(total)
}

// ── Tests ───────────────────────────────────────────────────────────
