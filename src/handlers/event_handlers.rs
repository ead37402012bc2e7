//! Trigger delivery entry point.
//!
//! `POST /events` takes a storage "object finalized" descriptor and runs the
//! pipeline to completion before answering, so the status code can drive the
//! deliverer's retry policy: 200 for completed, partial or skipped runs and
//! 500 when every rendition failed.

use crate::{
    errors::AppError,
    models::event::StorageEvent,
    services::coordinator::PipelineError,
    state::AppState,
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn receive_event(
    State(state): State<AppState>,
    Json(event): Json<StorageEvent>,
) -> Result<Response, AppError> {
    match state.pipeline.handle_event(event).await {
        Ok(report) => Ok((StatusCode::OK, Json(report)).into_response()),
        Err(PipelineError::RunFailed(report)) => {
            Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(*report)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}
