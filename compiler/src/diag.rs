// diag.rs - Error model for the transformer
//
// Two kinds of failure leave a pass: internal/consistency errors (a bug in
// the transformer or a malformed input tree) and user-reportable
// configuration errors carrying a stable code and substitution text.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use thiserror::Error;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable error code for user-reportable configuration errors.
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// A parallel region resolved to a width below 1.
    pub const INVALID_PARALLEL_WIDTH: DiagCode = DiagCode("L2P0001");
    /// An operator-driven consistent region ended up with several start operators.
    pub const TOO_MANY_START_OPERATORS: DiagCode = DiagCode("L2P0002");
}

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("{message}")]
    Config {
        code: DiagCode,
        substitution: String,
        message: String,
    },

    #[error("Internal error: submission expression '{text}': {message}")]
    Expression { text: String, message: String },

    #[error("{message}")]
    Conversion { message: String },
}

impl TransformError {
    pub fn internal(message: impl Into<String>) -> Self {
        TransformError::Internal {
            message: message.into(),
        }
    }

    pub fn invalid_parallel_width(region: u64, width: i64) -> Self {
        TransformError::Config {
            code: codes::INVALID_PARALLEL_WIDTH,
            substitution: width.to_string(),
            message: format!("parallel region {} has invalid width {}", region, width),
        }
    }

    pub fn too_many_start_operators(logical_index: u64, count: usize) -> Self {
        TransformError::Config {
            code: codes::TOO_MANY_START_OPERATORS,
            substitution: logical_index.to_string(),
            message: format!(
                "operator-driven consistent region {} has {} start operators; at most one is allowed",
                logical_index, count
            ),
        }
    }

    /// Stable code, for configuration errors only.
    pub fn code(&self) -> Option<DiagCode> {
        match self {
            TransformError::Config { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TransformError::Internal { .. } | TransformError::Expression { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_display_is_prefixed() {
        let e = TransformError::internal("could not find model operator 7");
        assert_eq!(e.to_string(), "Internal error: could not find model operator 7");
        assert!(e.is_internal());
        assert_eq!(e.code(), None);
    }

    #[test]
    fn config_errors_carry_code_and_substitution() {
        let e = TransformError::invalid_parallel_width(2, 0);
        assert_eq!(e.code(), Some(codes::INVALID_PARALLEL_WIDTH));
        match &e {
            TransformError::Config { substitution, .. } => assert_eq!(substitution, "0"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!e.is_internal());

        let e = TransformError::too_many_start_operators(4, 2);
        assert_eq!(e.code(), Some(codes::TOO_MANY_START_OPERATORS));
    }
}
