use serde::Serialize;

/// Structured error body returned by the HTTP surface.
/// Carries enough context for an agent (or a person) to see what went wrong
/// and how to recover.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about how to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
}
