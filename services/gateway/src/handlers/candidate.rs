use crate::error::AppError;
use crate::models::{CandidateResponse, CreateCandidateRequest};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use vote_types::errors::ValidationFailure;
use vote_types::ids::CandidateId;

pub async fn create_candidate(
    State(state): State<AppState>,
    payload: Result<Json<CreateCandidateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CandidateResponse>), AppError> {
    let Json(payload) = payload.map_err(|e| ValidationFailure::MalformedBody {
        reason: e.body_text(),
    })?;

    // Creation journals the candidate, which may fsync
    let registry = state.registry.clone();
    let candidate = tokio::task::spawn_blocking(move || registry.create(&payload.nome))
        .await
        .map_err(|e| AppError::InternalError(e.into()))??;
    Ok((StatusCode::CREATED, Json(candidate.into())))
}

pub async fn list_candidates(State(state): State<AppState>) -> Json<Vec<CandidateResponse>> {
    Json(state.registry.list().into_iter().map(Into::into).collect())
}

pub async fn get_candidate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CandidateResponse>, AppError> {
    let candidate_id: CandidateId = id
        .parse()
        .map_err(|_| ValidationFailure::InvalidCandidateId { value: id.clone() })?;

    state
        .registry
        .get(candidate_id)
        .map(|c| Json(c.into()))
        .ok_or_else(|| AppError::NotFound(format!("Candidate {candidate_id} not found")))
}
