use super::{ApiError, AppState, record};
use crate::errors::{Dependency, InvalidInput};
use crate::id::{JobId, TimeRange};
use crate::queuer::JobDescriptor;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

pub async fn produce(
    State(state): State<AppState>,
    Path((topic, event)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    tracing::debug!(%topic, %event, "Produce callback");
    record("produce", produce_digest(&state, &body).await.into_response())
}

/// Builds the digest for a queued job, stores it and clears the marker.
///
/// Any failure leaves the marker in place. The dispatch appliance is told to
/// retry through the 500 response.
async fn produce_digest(state: &AppState, body: &[u8]) -> Result<StatusCode, ApiError> {
    let descriptor: JobDescriptor = serde_json::from_slice(body)
        .map_err(|e| InvalidInput(format!("invalid payload: {e}")))?;

    let id = JobId::from_external(descriptor.id)?;
    let range = TimeRange::parse(&descriptor.start, &descriptor.stop)?;

    let derived = range.id();
    if derived != id {
        tracing::warn!(%id, %derived, "Produce id does not match its time range");
    }

    let digest = state
        .producer
        .produce(range)
        .await
        .map_err(|e| ApiError::dependency(Dependency::Pipeline, e))?;
    let objects = digest.objects();

    state.storage.store(&id, digest.into_bytes()).await?;
    state.marker.unmark(&id).await?;

    tracing::info!(%id, objects, "Produced digest");
    Ok(StatusCode::NO_CONTENT)
}
