//! HTTP surface: dashboard page, live board stream and enqueue commands.

pub mod handlers;
pub mod rest;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core::engine::EngineHandle;
use crate::core::error::{EngineError, ProducerError};
use crate::core::publisher::Producer;

/// Shared state of every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub producer: Producer,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler error mapped onto a status code and `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Producer(ProducerError),
    Engine(EngineError),
    /// Body missing, not JSON, or fields of the wrong type.
    Body(JsonRejection),
}

impl From<ProducerError> for ApiError {
    fn from(e: ProducerError) -> Self {
        ApiError::Producer(e)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Body(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Producer(e) if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Producer(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Engine(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            ApiError::Body(e) => (StatusCode::BAD_REQUEST, e.body_text()),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}
