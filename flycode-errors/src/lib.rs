//! Shared error taxonomy for the FlyCode core pipeline.
//!
//! Every gate (policy, sandbox, file service, write manager, process
//! runner, confirmation center, dispatcher) raises a single [`AppError`]
//! variant. The dispatcher is the only place that maps it onto the wire.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Handled by the transport; never raised by the core itself, but kept
    /// in the taxonomy so the JSON-RPC mapping table is exhaustive.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("write confirmation required: {0}")]
    WriteConfirmationRequired(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Stable string code, as in `spec.md` §7.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::PolicyBlocked(_) => "POLICY_BLOCKED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::Conflict(_) => "CONFLICT",
            AppError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            AppError::NotSupported(_) => "NOT_SUPPORTED",
            AppError::WriteConfirmationRequired(_) => "WRITE_CONFIRMATION_REQUIRED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status code, used only for logging/audit context — the
    /// core has no HTTP transport of its own.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Unauthorized(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::PolicyBlocked(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::InvalidInput(_) => 400,
            AppError::Conflict(_) => 409,
            AppError::LimitExceeded(_) => 413,
            AppError::NotSupported(_) => 501,
            AppError::WriteConfirmationRequired(_) => 409,
            AppError::Internal(_) => 500,
        }
    }

    /// JSON-RPC error code per `spec.md` §4.J.5.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            AppError::Unauthorized(_) => -32001,
            AppError::Forbidden(_) => -32003,
            AppError::NotFound(_) => -32004,
            AppError::InvalidInput(_) => -32602,
            _ => -32000,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// `data` payload accompanying a mapped JSON-RPC error: `{app_code, status_code}`.
    pub fn jsonrpc_data(&self) -> ErrorData {
        ErrorData {
            app_code: self.code(),
            status_code: self.status_code(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub app_code: &'static str,
    pub status_code: u16,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn jsonrpc_mapping_matches_spec_table() {
        assert_eq!(AppError::Forbidden("x".into()).jsonrpc_code(), -32003);
        assert_eq!(AppError::NotFound("x".into()).jsonrpc_code(), -32004);
        assert_eq!(AppError::InvalidInput("x".into()).jsonrpc_code(), -32602);
        assert_eq!(AppError::PolicyBlocked("x".into()).jsonrpc_code(), -32000);
        assert_eq!(AppError::Conflict("x".into()).jsonrpc_code(), -32000);
        assert_eq!(AppError::Internal("x".into()).jsonrpc_code(), -32000);
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(AppError::LimitExceeded("x".into()).code(), "LIMIT_EXCEEDED");
        assert_eq!(
            AppError::WriteConfirmationRequired("x".into()).code(),
            "WRITE_CONFIRMATION_REQUIRED"
        );
    }
}
