//! Error types shared across Cutroom crates.

use std::path::PathBuf;

/// Top-level error type for Cutroom render operations.
#[derive(Debug, thiserror::Error)]
pub enum CutroomError {
    /// Unsupported engine/feature combination. Rejected before any work.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A backend, service, or codec is not usable on this host.
    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    #[error("Render service version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Project error: {message}")]
    Project { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Render cancelled")]
    Cancelled,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CutroomError.
pub type CutroomResult<T> = Result<T, CutroomError>;

/// How the backend chain reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stop the chain, never fall back.
    Configuration,
    /// Try the next backend unless the user pinned this one.
    Unavailable,
    /// Fatal to the strategy that raised it.
    Fatal,
    /// Silent teardown, not a failure.
    Cancelled,
}

impl CutroomError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project {
            message: msg.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config { .. } | Self::Project { .. } => ErrorClass::Configuration,
            Self::Unavailable { .. } | Self::VersionMismatch { .. } | Self::Network { .. } => {
                ErrorClass::Unavailable
            }
            Self::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            CutroomError::config("python + crop").class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            CutroomError::unavailable("no encoder").class(),
            ErrorClass::Unavailable
        );
        assert_eq!(
            CutroomError::VersionMismatch {
                expected: "a".into(),
                found: "b".into()
            }
            .class(),
            ErrorClass::Unavailable
        );
        assert_eq!(CutroomError::decode("bad nal").class(), ErrorClass::Fatal);
        assert_eq!(CutroomError::Cancelled.class(), ErrorClass::Cancelled);
        assert!(CutroomError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_io_errors_are_fatal() {
        let err: CutroomError = std::io::Error::other("disk").into();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_version_mismatch_message_names_both_versions() {
        let err = CutroomError::VersionMismatch {
            expected: "2026-02-19-concat-v1".into(),
            found: "2025-01-01".into(),
        };
        let text = err.to_string();
        assert!(text.contains("2026-02-19-concat-v1"));
        assert!(text.contains("2025-01-01"));
    }
}
