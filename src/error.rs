use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Unified error type for the rotator
#[derive(Error, Debug)]
pub enum RotatorError {
    // Provisioning errors
    #[error("Provisioning failed in {region}: {message}")]
    ProvisionError { region: String, message: String },

    #[error("Gateway in {region} not ready after {waited:?}")]
    ProvisionTimeout { region: String, waited: Duration },

    #[error("No regions could be provisioned")]
    NoRegionsAvailable,

    #[error("Failed to delete gateway {id} in {region}: {message}")]
    DeleteError {
        region: String,
        id: String,
        message: String,
    },

    #[error("{remaining} gateways from the last shutdown are still waiting for deletion")]
    PendingDeletion { remaining: usize },

    // Dispatch errors
    #[error("Request targets {actual}, rotator is configured for {expected}")]
    SiteMismatch { expected: String, actual: String },

    #[error("No endpoints available")]
    NoEndpointsAvailable,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timeout")]
    RequestTimeout,

    // HTTP execution errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Configuration errors
    #[error("Missing AWS credentials (set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY)")]
    MissingCredentials,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rotator operations
pub type Result<T> = std::result::Result<T, RotatorError>;

impl RotatorError {
    /// Get the HTTP status code the local listener answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RotatorError::SiteMismatch { .. }
            | RotatorError::InvalidRequest(_)
            | RotatorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            RotatorError::ProvisionError { .. }
            | RotatorError::DeleteError { .. }
            | RotatorError::PendingDeletion { .. }
            | RotatorError::Http(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RotatorError::NoRegionsAvailable | RotatorError::NoEndpointsAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            RotatorError::ProvisionTimeout { .. } | RotatorError::RequestTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 Internal Server Error
            RotatorError::MissingCredentials
            | RotatorError::MissingEnvVar(_)
            | RotatorError::Io(_)
            | RotatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<reqwest::Error> for RotatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RotatorError::RequestTimeout
        } else {
            RotatorError::Http(err.to_string())
        }
    }
}

impl From<http::Error> for RotatorError {
    fn from(err: http::Error) -> Self {
        RotatorError::InvalidRequest(err.to_string())
    }
}

impl From<url::ParseError> for RotatorError {
    fn from(err: url::ParseError) -> Self {
        RotatorError::InvalidConfig(err.to_string())
    }
}
