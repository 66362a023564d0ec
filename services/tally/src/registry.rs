//! Candidate registry and display-name lookup
//!
//! Candidates are created here and never change afterwards. The publisher
//! only reads from the registry, to turn candidate ids into display names
//! when it builds totals.

use dashmap::DashMap;
use persistence::candidates::CandidateJournal;
use persistence::journal::JournalError;
use thiserror::Error;
use tracing::info;
use vote_types::errors::ValidationFailure;
use vote_types::ids::CandidateId;
use vote_types::vote::Candidate;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Validation failure: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Candidate could not be persisted: {0}")]
    Journal(#[from] JournalError),
}

pub struct CandidateRegistry {
    candidates: DashMap<CandidateId, Candidate>,
    journal: Option<CandidateJournal>,
}

impl CandidateRegistry {
    /// Registry without persistence.
    pub fn new() -> Self {
        Self {
            candidates: DashMap::new(),
            journal: None,
        }
    }

    /// Registry persisting new candidates to `journal`, seeded with the
    /// candidates recovered from it.
    pub fn with_journal(journal: CandidateJournal, existing: Vec<Candidate>) -> Self {
        let registry = Self {
            candidates: DashMap::new(),
            journal: Some(journal),
        };
        for candidate in existing {
            registry.candidates.insert(candidate.id, candidate);
        }
        registry
    }

    /// Register a new candidate under a fresh id.
    pub fn create(&self, name: &str) -> Result<Candidate, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationFailure::EmptyName.into());
        }

        let candidate = Candidate {
            id: CandidateId::new(),
            name: name.to_string(),
        };
        if let Some(journal) = &self.journal {
            journal.record(&candidate)?;
        }
        self.candidates.insert(candidate.id, candidate.clone());

        info!(candidate_id = %candidate.id, name = %candidate.name, "Candidate registered");
        Ok(candidate)
    }

    pub fn get(&self, id: CandidateId) -> Option<Candidate> {
        self.candidates.get(&id).map(|c| c.value().clone())
    }

    /// All candidates ordered by name, then id.
    pub fn list(&self) -> Vec<Candidate> {
        let mut all: Vec<Candidate> = self.candidates.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }

    pub fn display_name(&self, id: CandidateId) -> Option<String> {
        self.candidates.get(&id).map(|c| c.name.clone())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl Default for CandidateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
