//! Error types for second-opinion.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Every error carries a stable machine-readable
//! code that is surfaced in the JSON-RPC `error.data` payload.

use thiserror::Error;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Parameters missing or ill-typed. Carries every problem found so the
    /// caller can fix all of them in one round-trip.
    #[error("Invalid parameters: {}", issues.join("; "))]
    Validation { issues: Vec<String> },

    #[error("Path security error: {0}")]
    PathSecurity(#[from] crate::security::SecurityError),

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session is busy: {session_id}")]
    SessionBusy { session_id: String },

    #[error("Session already finalized: {session_id}")]
    SessionFinalized { session_id: String },

    #[error("Session transcript is full: {session_id} ({turns} turns, {bytes} bytes)")]
    SessionFull {
        session_id: String,
        turns: usize,
        bytes: usize,
    },

    #[error("Analysis budget exhausted: {what}")]
    BudgetExhausted { what: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderChainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors produced by the provider orchestration layer.
#[derive(Error, Debug)]
pub enum ProviderChainError {
    /// A specific provider is cooling down after repeated failures.
    #[error("Circuit open for provider '{provider}', retry after {retry_after_secs}s")]
    CircuitOpen {
        provider: String,
        retry_after_secs: u64,
    },

    /// Every provider in the chain failed terminally.
    #[error("All providers unavailable: {}", failures.iter().map(|(p, e)| format!("{p}: {e}")).collect::<Vec<_>>().join("; "))]
    AllUnavailable { failures: Vec<(String, String)> },

    /// The provider rejected the request as malformed. Not provider-swappable:
    /// a different vendor would reject it too.
    #[error("Provider '{provider}' rejected request: {message}")]
    InvalidRequest { provider: String, message: String },

    /// Unrecoverable adapter fault (bad credentials, unsupported model).
    #[error("Provider '{provider}' fatal error: {message}")]
    Fatal { provider: String, message: String },
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::PathSecurity(e) => e.code(),
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::SessionBusy { .. } => "SESSION_BUSY",
            Self::SessionFinalized { .. } => "SESSION_FINALIZED",
            Self::SessionFull { .. } => "SESSION_FULL",
            Self::BudgetExhausted { .. } => "BUDGET_EXHAUSTED",
            Self::Provider(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix this error by changing its input or
    /// retrying later. Client-fixable errors are returned on the tool-result
    /// channel (visible to the LLM); server faults go down the protocol
    /// error channel.
    #[must_use]
    pub fn is_client_fixable(&self) -> bool {
        match self {
            Self::Validation { .. }
            | Self::PathSecurity(_)
            | Self::SessionNotFound { .. }
            | Self::SessionBusy { .. }
            | Self::SessionFinalized { .. }
            | Self::SessionFull { .. }
            | Self::BudgetExhausted { .. } => true,
            Self::Provider(e) => e.is_client_fixable(),
            Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Internal(_) => false,
        }
    }

    /// Structured detail for the JSON-RPC `error.data` field.
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::Validation { issues } => serde_json::json!({
                "code": self.code(),
                "issues": issues,
            }),
            Self::Provider(ProviderChainError::CircuitOpen {
                provider,
                retry_after_secs,
            }) => serde_json::json!({
                "code": self.code(),
                "provider": provider,
                "retry_after_secs": retry_after_secs,
            }),
            Self::Provider(ProviderChainError::AllUnavailable { failures }) => serde_json::json!({
                "code": self.code(),
                "failures": failures.iter().map(|(p, e)| serde_json::json!({
                    "provider": p,
                    "error": e,
                })).collect::<Vec<_>>(),
            }),
            _ => serde_json::json!({ "code": self.code() }),
        }
    }

    /// Convenience constructor for a single-issue validation error.
    #[must_use]
    pub fn invalid(issue: impl Into<String>) -> Self {
        Self::Validation {
            issues: vec![issue.into()],
        }
    }
}

impl ProviderChainError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::AllUnavailable { .. } => "ALL_PROVIDERS_UNAVAILABLE",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Fatal { .. } => "PROVIDER_FATAL",
        }
    }

    /// Circuit-open and chain-exhaustion resolve themselves with time;
    /// invalid requests need a changed prompt; fatal faults need an operator.
    #[must_use]
    pub fn is_client_fixable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::AllUnavailable { .. } | Self::InvalidRequest { .. }
        )
    }
}

// Conversion to rmcp protocol errors (server-fault channel).
impl From<ServerError> for rmcp::ErrorData {
    fn from(err: ServerError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), Some(err.data()))
    }
}
