//! Request-level error taxonomy and its mapping to client responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors that end a proxied request before response headers are sent.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing or wrong proxy credentials.
    #[error("proxy authorization failed")]
    Unauthorized,

    /// The request names no host to forward to.
    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    /// The client's request body could not be read.
    #[error("client body error: {0}")]
    ClientBody(String),

    /// The upstream did not answer within the effective timeout.
    #[error("upstream timed out")]
    UpstreamTimeout,

    /// The upstream (or tunnel target) refused or dropped the connection.
    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    /// The upstream answered with something that is not valid HTTP.
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Status code reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidTarget(_) | ProxyError::ClientBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamConnect(_) | ProxyError::UpstreamProtocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::UpstreamTimeout
        } else if e.is_connect() {
            ProxyError::UpstreamConnect(e.to_string())
        } else if e.is_builder() {
            ProxyError::InvalidTarget(e.to_string())
        } else {
            ProxyError::UpstreamProtocol(e.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match &self {
            ProxyError::Unauthorized => "Not Authorized",
            ProxyError::InvalidTarget(_) => "Invalid request target",
            ProxyError::ClientBody(_) => "Unreadable request body",
            ProxyError::UpstreamTimeout => "Upstream timed out",
            ProxyError::UpstreamConnect(_) | ProxyError::UpstreamProtocol(_) => {
                "Upstream request failed"
            }
            ProxyError::Internal(_) => "Internal proxy error",
        };
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_most_specific_status() {
        assert_eq!(ProxyError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ProxyError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ProxyError::UpstreamConnect("refused".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamProtocol("bad header".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Internal("oops".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_carries_status() {
        let response = ProxyError::UpstreamTimeout.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
