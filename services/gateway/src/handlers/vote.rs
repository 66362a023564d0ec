use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::{SubmitVoteRequest, VoteResponse};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use vote_types::errors::ValidationFailure;
use vote_types::ids::CandidateId;

/// Accept a vote. Answers once the vote is in the event log; the durable row
/// is written later by the reconciler.
pub async fn submit_vote(
    State(state): State<AppState>,
    payload: Result<Json<SubmitVoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<VoteResponse>), AppError> {
    let Json(payload) = payload.map_err(|e| ValidationFailure::MalformedBody {
        reason: e.body_text(),
    })?;

    let candidate_id: CandidateId =
        payload
            .candidato_id
            .trim()
            .parse()
            .map_err(|_| ValidationFailure::InvalidCandidateId {
                value: payload.candidato_id.clone(),
            })?;

    if state.registry.get(candidate_id).is_none() {
        return Err(AppError::NotFound(format!("Candidate {candidate_id} not found")));
    }

    let vote = state.publisher.submit_vote(candidate_id).await?;
    Ok((StatusCode::ACCEPTED, Json(vote.into())))
}

pub async fn get_totals(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.publisher.current_totals())
}
