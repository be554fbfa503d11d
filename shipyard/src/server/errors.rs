//! Mapping of daemon errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::ApiResponse;
use tracing::error;

use crate::errors::{ErrorKind, ShipyardError};

/// Error returned by handlers, rendered as a failure envelope
#[derive(Debug)]
pub struct ApiError(pub ShipyardError);

impl From<ShipyardError> for ApiError {
    fn from(err: ShipyardError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFoundError => StatusCode::NOT_FOUND,
        ErrorKind::ConflictError => StatusCode::CONFLICT,
        ErrorKind::ConnectionError | ErrorKind::ExecutionError | ErrorKind::HealthCheckError => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body: ApiResponse<()> = ApiResponse::failure(self.0.to_string(), kind.as_str());
        (status, Json(body)).into_response()
    }
}
