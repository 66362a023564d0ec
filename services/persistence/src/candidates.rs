//! Durable candidate list
//!
//! Candidates are immutable once created, so the journal is append-only
//! with no updates; replay yields them in creation order.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use vote_types::clock::Clock;
use vote_types::vote::Candidate;

use crate::journal::{JournalConfig, JournalError, JournalWriter};
use crate::reader::replay_dir;

pub struct CandidateJournal {
    journal: Mutex<JournalWriter>,
    clock: Arc<dyn Clock>,
}

impl CandidateJournal {
    /// Open the journal, returning it with every previously recorded
    /// candidate. Undecodable records are skipped and counted.
    pub fn open(
        config: JournalConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, Vec<Candidate>), JournalError> {
        let replay = replay_dir(&config.dir)?;
        let mut candidates = Vec::with_capacity(replay.entries.len());
        let mut skipped = 0usize;
        for entry in &replay.entries {
            match entry.decode::<Candidate>() {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    skipped += 1;
                    warn!(sequence = entry.sequence, error = %e, "Undecodable candidate record skipped");
                }
            }
        }
        info!(
            dir = %config.dir.display(),
            candidates = candidates.len(),
            skipped,
            "Candidate journal recovered"
        );

        let journal = JournalWriter::open(config, replay.next_sequence())?;
        Ok((
            Self {
                journal: Mutex::new(journal),
                clock,
            },
            candidates,
        ))
    }

    pub fn record(&self, candidate: &Candidate) -> Result<(), JournalError> {
        let now = self.clock.now_millis();
        self.journal
            .lock()
            .map_err(|_| JournalError::Serialization("candidate journal lock poisoned".into()))?
            .append(now, "candidate", candidate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vote_types::clock::ManualClock;
    use vote_types::ids::CandidateId;

    // 2025-12-18T12:34:56Z
    const NOW: i64 = 1_766_061_296_000;

    fn open(dir: &std::path::Path) -> (CandidateJournal, Vec<Candidate>) {
        CandidateJournal::open(JournalConfig::new(dir), Arc::new(ManualClock::new(NOW))).unwrap()
    }

    #[test]
    fn test_candidates_replay_in_creation_order() {
        let tmp = TempDir::new().unwrap();
        let alice = Candidate {
            id: CandidateId::new(),
            name: "Alice".to_string(),
        };
        let bob = Candidate {
            id: CandidateId::new(),
            name: "Bob".to_string(),
        };
        {
            let (journal, existing) = open(tmp.path());
            assert!(existing.is_empty());
            journal.record(&alice).unwrap();
            journal.record(&bob).unwrap();
        }

        let (_, existing) = open(tmp.path());
        assert_eq!(existing, vec![alice, bob]);
    }

    #[test]
    fn test_undecodable_record_does_not_block_startup() {
        let tmp = TempDir::new().unwrap();
        let alice = Candidate {
            id: CandidateId::new(),
            name: "Alice".to_string(),
        };
        {
            let mut journal = JournalWriter::open(JournalConfig::new(tmp.path()), 0).unwrap();
            journal.append(NOW, "candidate", &0u8).unwrap();
            journal.append(NOW, "candidate", &alice).unwrap();
        }

        let (journal, existing) = open(tmp.path());
        assert_eq!(existing, vec![alice]);

        let bob = Candidate {
            id: CandidateId::new(),
            name: "Bob".to_string(),
        };
        journal.record(&bob).unwrap();
        let replay = replay_dir(tmp.path()).unwrap();
        assert_eq!(replay.entries.last().unwrap().timestamp, NOW);
    }
}
