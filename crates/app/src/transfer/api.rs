use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use collections_core::{ErrorKind, JobId, TransferJob, TransferRequest};

use super::TransferError;
use crate::collections::parse_collection_id;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::telemetry;

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub job_id: JobId,
    pub message: String,
    pub total_companies: u64,
}

/// `POST /collections/{id}/transfer`: validates and schedules, then returns
/// without waiting for any batch to run.
pub async fn start_transfer(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), ProblemResponse> {
    let source_id = parse_collection_id(&source_id)?;
    let started = state
        .transfers()
        .start_transfer(source_id, &request)
        .await
        .map_err(|err| {
            telemetry::record_api_request("transfer", err.kind().as_str());
            ProblemResponse::from(err)
        })?;

    telemetry::record_api_request("transfer", "accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(TransferResponse {
            job_id: started.job_id,
            message: "Transfer job started".to_string(),
            total_companies: started.total,
        }),
    ))
}

/// `GET /collections/transfer-status/{job_id}`.
pub async fn transfer_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TransferJob>, ProblemResponse> {
    let job = state.transfers().status(&job_id)?;
    Ok(Json(job))
}

impl From<TransferError> for ProblemResponse {
    fn from(err: TransferError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            error!(stage = "transfer", error = %err, "transfer request failed");
        }
        ProblemResponse::from_kind(kind, err.problem_type(), err.to_string())
    }
}
