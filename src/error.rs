//! Collaborator failure taxonomy.
//!
//! Data-quality problems (bad model output, unresolvable references) never
//! reach this module; they are absorbed by validation and fusion. What is
//! left are infrastructure failures, which abort the analysis of one image
//! and are reported to the caller by category.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// User-facing failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    AccessDenied,
    TimedOut,
    Unexpected,
}

impl FailureKind {
    pub fn status_code(self) -> u16 {
        match self {
            FailureKind::NotFound => 404,
            FailureKind::AccessDenied => 403,
            FailureKind::TimedOut => 504,
            FailureKind::Unexpected => 500,
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::NotFound => "画像が見つかりませんでした",
            FailureKind::AccessDenied => "アクセスが拒否されました",
            FailureKind::TimedOut => "分析がタイムアウトしました",
            FailureKind::Unexpected => "予期しないエラーが発生しました",
        }
    }
}

/// External collaborator that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collaborator {
    ImageSource,
    Detector,
    Model,
    Storage,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::ImageSource => "image source",
            Collaborator::Detector => "object detector",
            Collaborator::Model => "vision model",
            Collaborator::Storage => "result store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{collaborator} failed ({kind:?}): {message}")]
pub struct CollaboratorError {
    pub collaborator: Collaborator,
    pub kind: FailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: Collaborator, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            kind,
            message: message.into(),
        }
    }

    pub fn unexpected(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::new(collaborator, FailureKind::Unexpected, message)
    }

    /// Classify a filesystem error.
    pub fn from_io(collaborator: Collaborator, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => FailureKind::NotFound,
            std::io::ErrorKind::PermissionDenied => FailureKind::AccessDenied,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FailureKind::TimedOut,
            _ => FailureKind::Unexpected,
        };
        Self::new(collaborator, kind, err.to_string())
    }

    /// Classify an HTTP client error.
    pub fn from_http(collaborator: Collaborator, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => {
                Self::new(collaborator, kind_for_status(code), format!("http status {code}"))
            }
            ureq::Error::Transport(transport) => {
                let timed_out = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<std::io::Error>())
                    .map(|io| {
                        matches!(
                            io.kind(),
                            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                        )
                    })
                    .unwrap_or(false);
                let kind = if timed_out {
                    FailureKind::TimedOut
                } else {
                    FailureKind::Unexpected
                };
                Self::new(collaborator, kind, transport.to_string())
            }
        }
    }
}

/// Map an HTTP status from a collaborator to a failure category.
pub fn kind_for_status(code: u16) -> FailureKind {
    match code {
        404 => FailureKind::NotFound,
        401 | 403 => FailureKind::AccessDenied,
        408 | 504 => FailureKind::TimedOut,
        _ => FailureKind::Unexpected,
    }
}

/// Reason an analysis could not complete.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("internal fault: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Collaborator(err) => err.kind,
            PipelineError::Internal(_) => FailureKind::Unexpected,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_distinguishes_categories() {
        assert_eq!(kind_for_status(404), FailureKind::NotFound);
        assert_eq!(kind_for_status(403), FailureKind::AccessDenied);
        assert_eq!(kind_for_status(401), FailureKind::AccessDenied);
        assert_eq!(kind_for_status(504), FailureKind::TimedOut);
        assert_eq!(kind_for_status(502), FailureKind::Unexpected);
    }

    #[test]
    fn io_errors_are_classified() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let classified = CollaboratorError::from_io(Collaborator::ImageSource, &err);
        assert_eq!(classified.kind, FailureKind::NotFound);

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let classified = CollaboratorError::from_io(Collaborator::ImageSource, &err);
        assert_eq!(classified.kind, FailureKind::AccessDenied);
    }

    #[test]
    fn internal_faults_are_unexpected() {
        let err = PipelineError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.kind(), FailureKind::Unexpected);
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn user_messages_are_japanese() {
        assert_eq!(FailureKind::NotFound.user_message(), "画像が見つかりませんでした");
        assert_eq!(FailureKind::AccessDenied.user_message(), "アクセスが拒否されました");
        assert_eq!(FailureKind::TimedOut.user_message(), "分析がタイムアウトしました");
        assert_eq!(FailureKind::Unexpected.user_message(), "予期しないエラーが発生しました");
    }
}
