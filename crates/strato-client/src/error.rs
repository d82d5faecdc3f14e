//! Error taxonomy for the resilient request layer.
//!
//! Every error derived from an HTTP exchange keeps the original status
//! code and raw body so callers can log or re-render the upstream
//! diagnostic. Classification of application-level error codes is
//! table-driven: adding a new code is a data change, not a dispatch
//! change.
//!
//! # Example
//!
//! ```rust
//! use strato_client::Error;
//!
//! fn handle_error(err: Error) {
//!     if err.is_not_found() {
//!         println!("Resource not found");
//!     } else if err.is_retryable() {
//!         println!("Temporary error, can retry");
//!     }
//! }
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classified error carrying the original protocol-level diagnostic.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Login exchange rejected or the auth endpoint was unreachable
    #[error("authentication failed (HTTP {status}): {body}")]
    AuthenticationFailed { status: u16, body: String },

    /// Transport exhausted its retries, or reauthentication was disabled
    /// while the token had expired
    #[error("{message}")]
    Connection { message: String },

    /// Internal signal raised on HTTP 401. Consumed by the dispatcher's
    /// reauthentication path; never surfaced past it.
    #[error("authentication token expired")]
    ExpiredAuthToken,

    /// HTTP 500
    #[error("server fault (HTTP {status}): {body}")]
    ServerFault { status: u16, body: String },

    /// HTTP 503
    #[error("service unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16, body: String },

    /// HTTP 413
    #[error("over limit (HTTP {status})")]
    OverLimit { status: u16, body: String },

    /// HTTP 404
    #[error("{message}")]
    NotFound {
        message: String,
        status: u16,
        body: String,
    },

    /// HTTP 400, message aggregates the server's validation errors
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        status: u16,
        body: String,
    },

    /// Application code 422: the resource is not ready for the operation
    #[error("not ready: {message}")]
    NotReady {
        message: String,
        status: u16,
        body: String,
    },

    /// Application code 409: an equivalent object already exists
    #[error("duplicate object: {message}")]
    DuplicateObject {
        message: String,
        status: u16,
        body: String,
    },

    /// An async job reached its Failed state; wraps the classified
    /// sub-error plus the raw details body
    #[error("asynchronous request failure: {source}")]
    JobFailure { source: Box<Error>, details: String },

    /// Any unclassified non-2xx status
    #[error("unexpected response (HTTP {status}): {body}")]
    Other { status: u16, body: String },

    /// The server broke the documented envelope (missing job id,
    /// unparseable required payload, unknown job status value)
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// The HTTP status this error was derived from, if any
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::AuthenticationFailed { status, .. }
            | Error::ServerFault { status, .. }
            | Error::ServiceUnavailable { status, .. }
            | Error::OverLimit { status, .. }
            | Error::NotFound { status, .. }
            | Error::BadRequest { status, .. }
            | Error::NotReady { status, .. }
            | Error::DuplicateObject { status, .. }
            | Error::Other { status, .. } => Some(*status),
            Error::JobFailure { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// The raw response body this error was derived from, if any
    #[must_use]
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Error::AuthenticationFailed { body, .. }
            | Error::ServerFault { body, .. }
            | Error::ServiceUnavailable { body, .. }
            | Error::OverLimit { body, .. }
            | Error::NotFound { body, .. }
            | Error::BadRequest { body, .. }
            | Error::NotReady { body, .. }
            | Error::DuplicateObject { body, .. }
            | Error::Other { body, .. } => Some(body),
            Error::JobFailure { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Returns true if this is a "not found" error (404)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if this is an authentication error
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed { .. } | Error::ExpiredAuthToken
        )
    }

    /// Returns true if this is a bad request error (400)
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest { .. })
    }

    /// Returns true if this error is potentially retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::ServerFault { .. }
                | Error::ServiceUnavailable { .. }
                | Error::OverLimit { .. }
                | Error::NotReady { .. }
        )
    }
}

/// Application-level error codes with a dedicated kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppCode {
    NotReady,
    DuplicateObject,
}

/// Code-to-kind table. Open for extension: new entries are data, the
/// classification below never changes.
const CODE_MAP: &[(u64, AppCode)] = &[(422, AppCode::NotReady), (409, AppCode::DuplicateObject)];

fn lookup_code(code: u64) -> Option<AppCode> {
    CODE_MAP
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
}

fn build(kind: AppCode, message: String, status: u16, body: String) -> Error {
    match kind {
        AppCode::NotReady => Error::NotReady {
            message,
            status,
            body,
        },
        AppCode::DuplicateObject => Error::DuplicateObject {
            message,
            status,
            body,
        },
    }
}

/// Classify a non-2xx response into an error kind.
///
/// If the body carries a top-level `code` field listed in the
/// application code table, the dedicated kind is produced; anything
/// else becomes [`Error::Other`] with the literal status and body.
#[must_use]
pub fn classify(status: u16, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body).into_owned();
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    if let Some(data) = &parsed {
        if let Some(kind) = data.get("code").and_then(Value::as_u64).and_then(lookup_code) {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return build(kind, message, status, text);
        }
    }

    Error::Other { status, body: text }
}

/// Classify the details body of a failed async job.
///
/// Job failure details arrive as `{"error": {"code", "message", ...}}`;
/// the code inside the envelope drives the same table as [`classify`].
#[must_use]
pub fn classify_job_detail(status: u16, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body).into_owned();
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|d| d.get("error")) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(kind) = error.get("code").and_then(Value::as_u64).and_then(lookup_code) {
            return build(kind, message, status, error.to_string());
        }
        return Error::Other {
            status,
            body: error.to_string(),
        };
    }

    Error::Other { status, body: text }
}

/// Build a [`Error::BadRequest`] from a 400 response body.
///
/// Prefers the server's `validationErrors.messages` list joined with
/// commas; otherwise stringifies every top-level key so the caller
/// still sees what the server objected to.
#[must_use]
pub fn classify_bad_request(status: u16, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body).into_owned();
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    let message = match &parsed {
        Some(Value::Object(map)) => {
            let messages = map
                .get("validationErrors")
                .and_then(|v| v.get("messages"))
                .and_then(Value::as_array);
            match messages {
                Some(list) => list
                    .iter()
                    .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                    .collect::<Vec<_>>()
                    .join(","),
                None => map
                    .iter()
                    .map(|(k, v)| format!("{k} => {v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            }
        }
        _ => text.clone(),
    };

    Error::BadRequest {
        message,
        status,
        body: text,
    }
}
