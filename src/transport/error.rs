//! Transport failure taxonomy and the user-facing texts derived from it.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// Errors produced by backend calls.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend rejected the bearer credential (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// A service behind the backend is down (HTTP 503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any other non-success status.
    #[error("server error: status {status}")]
    Server { status: u16, body: String },

    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be deserialized.
    #[error("response parse failed: {0}")]
    Decode(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),

    /// An upload payload was rejected before sending.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
}

/// Which user action a failure belongs to; a few texts differ per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureContext {
    General,
    Image,
}

impl TransportError {
    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => Self::Unauthorized,
            503 => Self::ServiceUnavailable(body),
            _ => Self::Server { status, body },
        }
    }

    pub(crate) fn from_send(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            Self::ClientBuild(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Chat text shown when an exchange fails.
    #[must_use]
    pub fn user_message(&self, context: FailureContext) -> String {
        match (self, context) {
            (Self::Unauthorized, _) => "Authentication failed. Please log in again.".to_owned(),
            (Self::ServiceUnavailable(_), FailureContext::General) => {
                "A required service is unavailable. Please try again later.".to_owned()
            }
            (Self::ServiceUnavailable(_), FailureContext::Image) => {
                "An image processing service is unavailable. Please try again later.".to_owned()
            }
            (Self::Server { status, .. }, FailureContext::General) => {
                format!("Server error: {status}. Please try again.")
            }
            (Self::Server { status, .. }, FailureContext::Image) => {
                format!("Server error: {status}. Failed to process image.")
            }
            (Self::Network(_), _) => "Network error. Could not connect to the server.".to_owned(),
            (Self::Decode(_) | Self::ClientBuild(_) | Self::InvalidUpload(_), FailureContext::General) => {
                "An unexpected error occurred. Please try again.".to_owned()
            }
            (Self::Decode(_) | Self::ClientBuild(_) | Self::InvalidUpload(_), FailureContext::Image) => {
                "An unexpected error occurred while uploading the image.".to_owned()
            }
        }
    }
}
