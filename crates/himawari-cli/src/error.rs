use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use himawari_core::domain::{ErrorKind, IngestError, ReadError, StoreError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Read(#[from] ReadError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Read(ReadError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Read(ReadError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Read(ReadError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Read(err) => kind_status(err.kind()),
            ApiError::Ingest(err) => kind_status(err.kind()),
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

fn kind_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infrastructure => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::warn!(error = %self, status = code.as_u16(), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
