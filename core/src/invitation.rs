use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SetupError;

/// Which setup flow an invitation belongs to. Each setup page accepts
/// exactly one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Psychologist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Psychologist => "psychologist",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "psychologist" => Some(Role::Psychologist),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity as reported by the identity service. The
/// invitation state rides in the profile attributes, set when the
/// administrator issued the invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub invitation_pending: bool,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Setup may only proceed while the invitation is still pending and its role
/// matches the flow the link was opened on. Failures name the mismatch.
pub fn verify_invitation(identity: &Identity, expected: Role) -> Result<(), SetupError> {
    match identity.role {
        None => Err(SetupError::Invitation(format!(
            "no invitation metadata on the account for {}",
            identity.email
        ))),
        Some(role) if role != expected => Err(SetupError::Invitation(format!(
            "this invitation is for a {role} account, not the {expected} setup flow"
        ))),
        Some(_) if !identity.invitation_pending => Err(SetupError::Invitation(
            "invitation already completed for this account".into(),
        )),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: Option<Role>, pending: bool) -> Identity {
        Identity {
            id: Uuid::now_v7(),
            email: "dr.lund@example.org".into(),
            role,
            invitation_pending: pending,
            full_name: Some("Dr. Lund".into()),
        }
    }

    #[test]
    fn pending_invitation_with_matching_role_passes() {
        let id = identity(Some(Role::Admin), true);
        assert!(verify_invitation(&id, Role::Admin).is_ok());
    }

    #[test]
    fn role_mismatch_names_both_roles() {
        let id = identity(Some(Role::Psychologist), true);
        let err = verify_invitation(&id, Role::Admin).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("psychologist"));
        assert!(msg.contains("admin"));
    }

    #[test]
    fn missing_metadata_is_rejected() {
        let id = identity(None, true);
        assert!(verify_invitation(&id, Role::Admin).is_err());
    }

    #[test]
    fn completed_invitation_is_rejected() {
        let id = identity(Some(Role::Admin), false);
        let err = verify_invitation(&id, Role::Admin).unwrap_err();
        assert!(err.to_string().contains("already completed"));
    }

    #[test]
    fn role_parses_its_string_forms() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("psychologist"), Some(Role::Psychologist));
        assert_eq!(Role::parse("patient"), None);
    }
}
