//! Upload handler for the local object store.
//!
//! Streams the request body into storage without buffering it, then emits the
//! finalized-object event to the pipeline in the background, the way a bucket
//! notification would.

use crate::{
    errors::AppError,
    models::{event::StorageEvent, object::ObjectLocation},
    services::object_store::{ByteStream, ObjectStore},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tracing::{info, warn};

/// Upload an object to `/{bucket}/{*key}`.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );

    let location = ObjectLocation::new(&bucket, &key);
    let object = state
        .store
        .write_stream(&location, stream, content_type.as_deref())
        .await?;

    let event = StorageEvent {
        bucket,
        name: key,
        content_type,
        size: object.size_bytes,
        generation: Some(object.etag.clone()),
    };
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let object = format!("{}/{}", event.bucket, event.name);
        match pipeline.handle_event(event).await {
            Ok(report) => info!(%object, status = ?report.status, "upload processed"),
            Err(err) => warn!(%object, error = %err, "upload processing failed"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}
