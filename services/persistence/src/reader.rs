//! Journal Reader: Sequential replay with corruption detection
//!
//! Reads every segment of a journal directory in order and returns the
//! valid entries. Damage is handled per segment:
//! - a truncated or undecodable tail (crash mid-write) ends that segment,
//!   reading continues with the next one
//! - a checksum mismatch skips that one entry, its framing is still trusted
//!
//! Every skipped region is reported as a [`CorruptionRecord`].

use crate::journal::{list_segments, JournalEntry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

// ── Corruption Log Entry ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedTail,
}

/// Structured corruption log entry for diagnostics.
#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    pub segment: PathBuf,
    /// Byte offset within the segment.
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

/// Result of replaying a journal directory.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<JournalEntry>,
    pub corruption: Vec<CorruptionRecord>,
}

impl Replay {
    /// Sequence the next writer should continue from.
    pub fn next_sequence(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.sequence + 1)
    }
}

// ── Journal Reader ──────────────────────────────────────────────────

/// Read all valid entries from the journal in `dir`.
///
/// A missing directory is an empty journal.
pub fn replay_dir(dir: &Path) -> Result<Replay, io::Error> {
    let mut replay = Replay::default();
    for (_, path) in list_segments(dir)? {
        let data = fs::read(&path)?;
        read_segment(&path, &data, &mut replay);
    }
    for record in &replay.corruption {
        warn!(
            segment = %record.segment.display(),
            offset = record.byte_offset,
            kind = ?record.kind,
            detail = %record.detail,
            "Skipped corrupted journal region"
        );
    }
    Ok(replay)
}

fn read_segment(path: &Path, data: &[u8], replay: &mut Replay) {
    let mut pos = 0usize;
    while pos < data.len() {
        match JournalEntry::from_bytes(&data[pos..]) {
            Ok((entry, consumed)) => {
                if entry.verify_checksum() {
                    replay.entries.push(entry);
                } else {
                    replay.corruption.push(CorruptionRecord {
                        segment: path.to_path_buf(),
                        byte_offset: pos as u64,
                        kind: CorruptionKind::ChecksumMismatch,
                        detail: format!(
                            "CRC32C mismatch for seq={}, stored={:#010x}",
                            entry.sequence, entry.checksum
                        ),
                    });
                }
                pos += consumed;
            }
            Err(e) => {
                replay.corruption.push(CorruptionRecord {
                    segment: path.to_path_buf(),
                    byte_offset: pos as u64,
                    kind: CorruptionKind::TruncatedTail,
                    detail: format!("{} bytes unreadable: {}", data.len() - pos, e),
                });
                return;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{segment_path, JournalConfig, JournalWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_records(dir: &Path, start: u64, values: &[u32]) {
        let mut writer = JournalWriter::open(JournalConfig::new(dir), start).unwrap();
        for v in values {
            writer.append(0, "append", v).unwrap();
        }
    }

    fn values(replay: &Replay) -> Vec<u32> {
        replay.entries.iter().map(|e| e.decode::<u32>().unwrap()).collect()
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let replay = replay_dir(&tmp.path().join("nope")).unwrap();
        assert!(replay.entries.is_empty());
        assert_eq!(replay.next_sequence(), 0);
    }

    #[test]
    fn test_reads_across_segments_in_order() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), 0, &[1, 2]);
        write_records(tmp.path(), 2, &[3]);

        let replay = replay_dir(tmp.path()).unwrap();
        assert_eq!(values(&replay), vec![1, 2, 3]);
        assert_eq!(replay.next_sequence(), 3);
        assert!(replay.corruption.is_empty());
    }

    #[test]
    fn test_truncated_tail_keeps_valid_prefix() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), 0, &[1, 2]);

        // Simulate a torn write at the end of segment 0
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_path(tmp.path(), 0))
            .unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        // The next writer starts a fresh segment, so its records survive
        write_records(tmp.path(), 2, &[3]);

        let replay = replay_dir(tmp.path()).unwrap();
        assert_eq!(values(&replay), vec![1, 2, 3]);
        assert_eq!(replay.corruption.len(), 1);
        assert_eq!(replay.corruption[0].kind, CorruptionKind::TruncatedTail);
    }

    #[test]
    fn test_checksum_mismatch_skips_one_entry() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), 0, &[1, 2, 3]);

        let path = segment_path(tmp.path(), 0);
        let mut data = fs::read(&path).unwrap();
        let first_len = JournalEntry::from_bytes(&data).unwrap().1;
        // Flip a payload byte of the second entry (last 8 bytes = payload tail + crc)
        let (_, second_len) = JournalEntry::from_bytes(&data[first_len..]).unwrap();
        data[first_len + second_len - 5] ^= 0xFF;
        fs::write(&path, data).unwrap();

        let replay = replay_dir(tmp.path()).unwrap();
        assert_eq!(values(&replay), vec![1, 3]);
        assert_eq!(replay.corruption[0].kind, CorruptionKind::ChecksumMismatch);
    }
}
