use serde::{Deserialize, Serialize};
use vote_types::ids::{CandidateId, VoteId};
use vote_types::vote::{Candidate, VoteEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCandidateRequest {
    pub nome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateResponse {
    pub id: CandidateId,
    pub nome: String,
}

impl From<Candidate> for CandidateResponse {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            nome: candidate.name,
        }
    }
}

/// The candidate id stays a string so a malformed id is reported as a
/// validation failure rather than a generic body rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitVoteRequest {
    pub candidato_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteResponse {
    pub id_voto: VoteId,
    pub candidato_id: CandidateId,
    pub hora: String,
}

impl From<VoteEvent> for VoteResponse {
    fn from(vote: VoteEvent) -> Self {
        Self {
            id_voto: vote.vote_id,
            candidato_id: vote.candidate_id,
            hora: vote.time_bucket.to_string(),
        }
    }
}
