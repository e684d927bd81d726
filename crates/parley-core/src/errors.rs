use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("join failed: {0}")]
    Join(String),
    #[error("media error: {0}")]
    Media(String),
    #[error("teardown failed: {0}")]
    Teardown(String),
    #[error("{operation} is not allowed while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("a camera start/stop is already in flight")]
    Busy,
    #[error("interrupted by leave")]
    Interrupted,
    #[error("no active session data")]
    NoActiveSession,
}

impl ParleyError {
    /// The user-visible category of this error, if it is ever shown to the user.
    ///
    /// Teardown failures are logged only, and guard rejections (wrong state,
    /// busy, interrupted) are not errors from the user's point of view.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Credential(_) | Self::Initialization(_) | Self::Join(_) => {
                Some(ErrorCategory::Session)
            }
            Self::Media(_) => Some(ErrorCategory::Media),
            Self::Teardown(_)
            | Self::InvalidState { .. }
            | Self::Busy
            | Self::Interrupted
            | Self::NoActiveSession => None,
        }
    }

    /// Whether this error moves the session to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), Some(ErrorCategory::Session))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("missing secret material: {0}")]
    MissingSecret(&'static str),
    #[error("room name is empty")]
    EmptyRoom,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid credential: {0}")]
    Invalid(String),
}

/// Failure reported by the conferencing capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: {reason}")]
pub struct CapabilityError {
    pub operation: &'static str,
    pub reason: String,
}

impl CapabilityError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential, initialization and join failures.
    Session,
    /// Audio/video hardware and rendering failures.
    Media,
}

/// The single message currently shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    pub category: ErrorCategory,
    pub message: String,
}

impl UserError {
    pub fn from_error(err: &ParleyError) -> Option<Self> {
        err.category().map(|category| Self {
            category,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_are_fatal() {
        assert!(ParleyError::Join("refused".into()).is_fatal());
        assert!(ParleyError::Initialization("no webgl".into()).is_fatal());
        assert!(ParleyError::from(CredentialError::MissingSecret("app secret")).is_fatal());
        assert!(!ParleyError::Media("camera busy".into()).is_fatal());
    }

    #[test]
    fn teardown_and_guards_are_not_user_visible() {
        assert!(UserError::from_error(&ParleyError::Teardown("socket".into())).is_none());
        assert!(UserError::from_error(&ParleyError::Busy).is_none());
        assert!(UserError::from_error(&ParleyError::Interrupted).is_none());
    }

    #[test]
    fn media_error_message_is_kept() {
        let err = ParleyError::Media(CapabilityError::new("start_audio", "denied").to_string());
        let user = UserError::from_error(&err).unwrap();
        assert_eq!(user.category, ErrorCategory::Media);
        assert_eq!(user.message, "media error: start_audio: denied");
    }
}
