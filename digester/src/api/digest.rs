use super::{ApiError, AppState, record};
use crate::errors::{Dependency, InvalidInput};
use crate::id::TimeRange;
use crate::storage::StorageError;
use axum::{
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct RangeParams {
    start: Option<String>,
    stop: Option<String>,
}

impl RangeParams {
    fn range(&self) -> Result<TimeRange, InvalidInput> {
        let start = self
            .start
            .as_deref()
            .ok_or_else(|| InvalidInput("missing start".into()))?;
        let stop = self
            .stop
            .as_deref()
            .ok_or_else(|| InvalidInput("missing stop".into()))?;
        TimeRange::parse(start, stop)
    }
}

pub async fn accept(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Response {
    let response = match params {
        Ok(Query(params)) => accept_digest(&state, &params).await.into_response(),
        Err(rejection) => ApiError::from(rejection).into_response(),
    };
    record("accept", response)
}

pub async fn status(
    State(state): State<AppState>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> Response {
    let response = match params {
        Ok(Query(params)) => digest_status(&state, &params).await.into_response(),
        Err(rejection) => ApiError::from(rejection).into_response(),
    };
    record("status", response)
}

/// Queues production of a digest unless it exists or is already underway.
///
/// The marker is written before the job is queued so that the produce call
/// can never finish ahead of it. The existence check and the mark are not
/// atomic: two concurrent requests for the same window may both be
/// accepted, in which case the digest is produced twice.
///
/// If queueing fails and removing the marker fails as well, the job stays
/// in progress with nothing queued to finish it. Every later request for
/// the window gets a conflict until the marker is deleted by hand.
async fn accept_digest(state: &AppState, params: &RangeParams) -> Result<StatusCode, ApiError> {
    let range = params.range()?;
    let id = range.id();

    if state.storage.exists(&id).await? {
        return Err(ApiError::Conflict(format!("digest {id} already exists")));
    }

    state.marker.mark(&id).await?;

    if let Err(error) = state.queuer.queue(&id, range.start, range.stop).await {
        if let Err(unmark_error) = state.marker.unmark(&id).await {
            tracing::error!(
                %id,
                dependency = Dependency::Marker.as_str(),
                error = %unmark_error,
                "Could not release marker of unqueued job"
            );
        }
        return Err(ApiError::dependency(Dependency::Queuer, error));
    }

    tracing::info!(%id, start = %range.start, stop = %range.stop, "Accepted digest job");
    Ok(StatusCode::ACCEPTED)
}

async fn digest_status(state: &AppState, params: &RangeParams) -> Result<Response, ApiError> {
    let range = params.range()?;
    let id = range.id();

    match state.storage.get(&id).await {
        Ok(stream) => {
            tracing::info!(%id, status = 200, "Serving digest");
            Ok((
                [(header::CONTENT_TYPE, "application/octet-stream")],
                Body::from_stream(stream),
            )
                .into_response())
        }
        Err(StorageError::InProgress(_)) => {
            tracing::info!(%id, status = 204, "Digest still in progress");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(error) => Err(error.into()),
    }
}
