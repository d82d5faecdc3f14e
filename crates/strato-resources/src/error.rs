//! Error type for the resource wrappers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Failures raised by the resource layer itself, plus everything the
/// dispatcher can return.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Propagated dispatcher, transport, or API failure.
    #[error(transparent)]
    Client(#[from] strato_client::Error),

    /// A request was rejected locally before any network traffic.
    #[error("{0}")]
    Validation(String),

    /// The service catalog holds no endpoint for the named service.
    #[error("no {service} endpoint in the service catalog")]
    NoEndpoint { service: &'static str },

    /// A response was missing a field the API documents as present.
    #[error("missing {field} in {context} response")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },
}

impl ResourceError {
    /// True when retrying the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResourceError::Client(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
