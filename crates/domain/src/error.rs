//! Shared error type used across all crates in this workspace.

/// Errors surfaced at the various boundaries described by the orchestration
/// contract. Each variant maps to one of the error codes enumerated by the
/// error-handling design: admission errors, LLM errors, planner errors, tool
/// errors, and storage errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    // ── Admission errors ────────────────────────────────────────────
    #[error("rate limited")]
    RateLimited { retry_after_s: u64 },

    #[error("busy")]
    Busy,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // ── LLM errors ──────────────────────────────────────────────────
    #[error("LLM unreachable: {0}")]
    LlmUnreachable(String),

    #[error("no choices in LLM response")]
    NoChoices,

    #[error("invalid LLM response: {0}")]
    InvalidLlmResponse(String),

    #[error("LLM exception: {0}")]
    LlmException(String),

    // ── Planner errors ──────────────────────────────────────────────
    #[error("unsupported plan format")]
    UnsupportedPlanFormat,

    #[error("invalid steps: {0}")]
    InvalidSteps(String),

    #[error("too many steps")]
    TooManySteps,

    #[error("plan normalize failed: {0}")]
    PlanNormalizeFailed(String),

    // ── Tool errors ─────────────────────────────────────────────────
    #[error("invalid tool call")]
    InvalidToolCall,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool exception: {kind}: {message}")]
    ToolException { kind: String, message: String },

    #[error("LAN host not allowlisted: {0}")]
    LanHostNotAllowlisted(String),

    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),

    #[error("executable not allowed: {0}")]
    ExecutableNotAllowed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // ── Storage errors ──────────────────────────────────────────────
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The stable string error code surfaced in API responses, matching the
    /// code names enumerated in the error-handling design.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Busy => "BUSY",
            Error::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Error::InvalidSchema(_) => "INVALID_SCHEMA",
            Error::LlmUnreachable(_) => "LLM_UNREACHABLE",
            Error::NoChoices => "NO_CHOICES",
            Error::InvalidLlmResponse(_) => "INVALID_LLM_RESPONSE",
            Error::LlmException(_) => "LLM_EXCEPTION",
            Error::UnsupportedPlanFormat => "UNSUPPORTED_PLAN_FORMAT",
            Error::InvalidSteps(_) => "INVALID_STEPS",
            Error::TooManySteps => "TOO_MANY_STEPS",
            Error::PlanNormalizeFailed(_) => "PLAN_NORMALIZE_FAILED",
            Error::InvalidToolCall => "INVALID_TOOL_CALL",
            Error::UnknownTool(_) => "UNKNOWN_TOOL",
            Error::ToolException { .. } => "TOOL_EXCEPTION",
            Error::LanHostNotAllowlisted(_) => "LAN_HOST_NOT_ALLOWLISTED",
            Error::DnsResolutionFailed(_) => "DNS_RESOLUTION_FAILED",
            Error::ExecutableNotAllowed(_) => "EXECUTABLE_NOT_ALLOWED",
            Error::PermissionDenied(_) => "PermissionError",
            Error::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Other(_) => "OTHER",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
