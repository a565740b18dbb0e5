//! HTTP surface of the digester.
//!
//! `POST /` accepts a digest job, `GET /` reports its state or streams the
//! finished digest, and `POST /{topic}/{event}` is called back by the
//! dispatch appliance to actually produce it.

mod digest;
mod produce;

use crate::counter;
use crate::errors::{Dependency, ErrorKind, InvalidInput};
use crate::metrics_defs::REQUESTS;
use crate::pipeline::Producer;
use crate::queuer::Queuer;
use crate::storage::{Marker, Storage, StorageError};
use axum::{
    Json, Router,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use std::sync::Arc;

const INTERNAL_ERROR_MESSAGE: &str = "internal error";

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub marker: Arc<dyn Marker>,
    pub queuer: Arc<dyn Queuer>,
    pub producer: Arc<dyn Producer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(digest::accept).get(digest::status))
        .route("/{topic}/{event}", post(produce::produce))
        .with_state(state)
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{dependency} failure: {reason}")]
    Dependency {
        dependency: Dependency,
        reason: String,
    },
}

impl ApiError {
    pub fn dependency(dependency: Dependency, error: impl std::fmt::Display) -> Self {
        ApiError::Dependency {
            dependency,
            reason: error.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidInput(_) => ErrorKind::InvalidInput,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Dependency { .. } => ErrorKind::Dependency,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidInput(InvalidInput(rejection.body_text()))
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error.kind() {
            ErrorKind::InProgress | ErrorKind::Conflict => ApiError::Conflict(error.to_string()),
            ErrorKind::NotFound => ApiError::NotFound(error.to_string()),
            ErrorKind::InvalidInput | ErrorKind::Dependency => {
                ApiError::dependency(error.dependency(), &error)
            }
        }
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict | ErrorKind::InProgress => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Dependency => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            ApiError::Dependency { dependency, reason } => {
                tracing::error!(dependency = dependency.as_str(), %reason, "Request failed");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            other => {
                tracing::info!(status = status.as_u16(), error = %other, "Request rejected");
                other.to_string()
            }
        };

        (status, Json(ApiErrorResponse { message })).into_response()
    }
}

/// Counts the response under its handler and status.
fn record(handler: &'static str, response: Response) -> Response {
    counter!(
        REQUESTS,
        "handler" => handler,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
