//! The single error type spanning the whole crate. Every variant knows how
//! to render itself as an Anthropic-shaped error body and the matching HTTP
//! status code — this surface never speaks OpenAI's error envelope to its
//! caller.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::types::{ErrorDetails, ErrorResponse};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Taxonomy of failures this proxy can surface to its caller.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    /// The incoming request was malformed in some way the router or
    /// translator could detect before ever contacting an upstream.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The upstream call failed, either at the transport level or with an
    /// error status the upstream returned.
    #[error("upstream error: {message}")]
    Upstream {
        /// Upstream HTTP status, when one was received.
        status: Option<StatusCode>,
        /// Detail captured from the upstream's error body or the transport
        /// failure.
        message: String,
    },

    /// A bug in request/response translation produced an inconsistent
    /// state; this should never happen for well-formed input.
    #[error("translation error: {0}")]
    Translation(String),
}

impl RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Translation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::Upstream { status, .. } if matches!(status.map(StatusCode::as_u16), Some(429)) => {
                "rate_limit_error"
            }
            Self::Upstream { .. } => "api_error",
            Self::Translation(_) => "api_error",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            status: err
                .status()
                .map(|s| StatusCode::from_u16(s.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("relay error: {self}");
        } else {
            log::warn!("relay error: {self}");
        }

        let body = ErrorResponse {
            response_type: "error".to_string(),
            error: ErrorDetails {
                error_type: self.error_type().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_400() {
        let err = RelayError::Validation("missing max_tokens".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");
    }

    #[test]
    fn upstream_error_without_status_falls_back_to_500() {
        let err = RelayError::Upstream {
            status: None,
            message: "connection reset".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_429_maps_to_rate_limit_error_type() {
        let err = RelayError::Upstream {
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            message: "slow down".to_string(),
        };
        assert_eq!(err.error_type(), "rate_limit_error");
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn translation_error_maps_to_500() {
        let err = RelayError::Translation("unreachable branch".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
