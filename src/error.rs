//! Stable error codes and retry classification shared across every component.
//!
//! `CoreError` carries a `&'static str` code plus a human-readable message
//! and an optional source, keeping a stable code separate from the prose
//! message so logs and dashboards can key off the former without parsing
//! the latter. `ErrorCategory` is the thing callers actually branch on: it
//! maps 1:1 onto the HTTP status a typed error is framed with on the wire
//! (see `envelope.rs`).

use std::fmt;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Retry/placement classification for a `CoreError`.
///
/// Every variant corresponds to exactly one HTTP status family so the wire
/// encoding (`ErrorCategory::http_status`) and the in-process branching
/// (`Registration::request`, `WorkerPool` remote dispatch) share one source
/// of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient transport or encoding failure; retry allowed at a higher layer.
    Warning,
    /// Malformed envelope, bad path, missing id, failed signature verification.
    NotAcceptable,
    /// No endpoint, no matching registration, or all matching peers unavailable.
    NotFound,
    /// Decoding a payload failed.
    BadRequest,
    /// Handler-originated failure.
    ServiceError,
    /// Deadline exceeded on an outbound call.
    Timeout,
    /// Peer advertises back-pressure.
    Unavailable,
}

impl ErrorCategory {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCategory::Warning => 500,
            ErrorCategory::NotAcceptable => 406,
            ErrorCategory::NotFound => 404,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::ServiceError => 500,
            ErrorCategory::Timeout => 504,
            ErrorCategory::Unavailable => 503,
        }
    }

    /// Whether a caller in non-exact mode should try the next registration
    /// in the ring rather than surfacing this error immediately.
    pub fn is_failover_eligible(self) -> bool {
        matches!(self, ErrorCategory::Warning | ErrorCategory::Unavailable)
    }

    fn from_http_status(status: u16) -> Self {
        match status {
            503 => ErrorCategory::Unavailable,
            406 => ErrorCategory::NotAcceptable,
            404 => ErrorCategory::NotFound,
            400 => ErrorCategory::BadRequest,
            504 => ErrorCategory::Timeout,
            _ => ErrorCategory::ServiceError,
        }
    }
}

/// The typed error that flows through `Result` instead of a language-level
/// exception. Serialises to the `data` field of a `ResponseEnvelope` on the
/// wire; the HTTP status carries `category.http_status()`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoreError {
    // Stored owned rather than `&'static str`: the wire format round-trips
    // this struct through `serde_json`, and a borrowed-forever string can't
    // be deserialised out of an arbitrary byte buffer. Callers still
    // construct it from a `&'static str` literal (`CoreError::new`), so the
    // stable-code-as-literal ergonomics at call sites are unchanged.
    code: String,
    message: String,
    category: ErrorCategory,
    #[serde(skip)]
    source_display: Option<String>,
}

impl CoreError {
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            category,
            source_display: None,
        }
    }

    pub fn with_source(mut self, source: impl fmt::Display) -> Self {
        self.source_display = Some(source.to_string());
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new("mesh.warning", ErrorCategory::Warning, message)
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new("mesh.not_acceptable", ErrorCategory::NotAcceptable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("mesh.not_found", ErrorCategory::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("mesh.bad_request", ErrorCategory::BadRequest, message)
    }

    pub fn service_error(message: impl Into<String>) -> Self {
        Self::new("mesh.service_error", ErrorCategory::ServiceError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("mesh.timeout", ErrorCategory::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("mesh.unavailable", ErrorCategory::Unavailable, message)
    }

    /// Reconstructs a `CoreError` from a non-2xx HTTP response whose body
    /// either decodes as a `CoreError` already, or is opaque text.
    pub fn from_wire(status: u16, body: &[u8]) -> Self {
        if let Ok(err) = serde_json::from_slice::<CoreError>(body) {
            return err;
        }
        let message = String::from_utf8_lossy(body).into_owned();
        Self::new(
            "mesh.upstream",
            ErrorCategory::from_http_status(status),
            message,
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(source) = &self.source_display {
            write!(f, " (caused by: {source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::bad_request(format!("payload decode failed: {err}")).with_source(err)
    }
}
