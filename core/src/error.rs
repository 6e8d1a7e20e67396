use thiserror::Error;

/// Error taxonomy for the setup flow. Nothing here is fatal to the process:
/// every variant leaves the user able to retry by reopening the invitation
/// link or resubmitting the form.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No session could be established, or a token exchange failed.
    #[error("{0}")]
    Session(String),

    /// Invitation metadata is missing or does not match the flow.
    #[error("{0}")]
    Invitation(String),

    /// Password or confirmation rules unmet. Resolved locally; never sent
    /// to the backend.
    #[error("{0}")]
    Validation(String),

    /// A password or profile-activation write failed, possibly after a
    /// refresh-and-retry. Carries the backend's status and message when the
    /// response had them.
    #[error("{message}")]
    Write {
        status: Option<u16>,
        message: String,
    },

    /// The local persistence port failed.
    #[error("{0}")]
    Storage(String),
}

/// Machine-readable error codes, one per taxonomy class.
pub mod codes {
    pub const SESSION_ERROR: &str = "session_error";
    pub const INVITATION_ERROR: &str = "invitation_error";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const WRITE_FAILED: &str = "write_failed";
    pub const STORAGE_ERROR: &str = "storage_error";
}

impl SetupError {
    pub fn write(status: Option<u16>, message: impl Into<String>) -> Self {
        SetupError::Write {
            status,
            message: message.into(),
        }
    }

    /// True for 401/403 write rejections — the trigger for the single
    /// refresh-and-retry pass. Anything else propagates unchanged.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            SetupError::Write {
                status: Some(401 | 403),
                ..
            }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            SetupError::Session(_) => codes::SESSION_ERROR,
            SetupError::Invitation(_) => codes::INVITATION_ERROR,
            SetupError::Validation(_) => codes::VALIDATION_FAILED,
            SetupError::Write { .. } => codes::WRITE_FAILED,
            SetupError::Storage(_) => codes::STORAGE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_only_for_unauthorized_writes() {
        assert!(SetupError::write(Some(401), "jwt expired").is_auth_rejection());
        assert!(SetupError::write(Some(403), "forbidden").is_auth_rejection());
        assert!(!SetupError::write(Some(500), "boom").is_auth_rejection());
        assert!(!SetupError::write(None, "connection reset").is_auth_rejection());
        assert!(!SetupError::Session("401".into()).is_auth_rejection());
    }
}
