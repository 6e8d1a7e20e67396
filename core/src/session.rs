use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::token::TokenBundle;

/// The typed form of the web portal's local-storage keys (`setupEmail`,
/// `setupAccessToken`, `setupRefreshToken`, `setupExpiresAt`). Mirrored into
/// persistent storage so the flow survives a reload between steps; removed
/// on completion or abandonment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupSession {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SetupSession {
    pub fn from_tokens(email: impl Into<String>, tokens: &TokenBundle) -> Self {
        Self {
            email: email.into(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at,
        }
    }

    pub fn token_bundle(&self) -> TokenBundle {
        TokenBundle {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Swap in a refreshed token pair, keeping the email.
    pub fn apply(&mut self, tokens: &TokenBundle) {
        self.access_token = tokens.access_token.clone();
        self.refresh_token = tokens.refresh_token.clone();
        self.expires_at = tokens.expires_at;
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Persistence port for the setup flow state. Adapters decide where the
/// values actually live (local storage in the web portal, a state file
/// here), and the reconciler stays testable without a real backend.
pub trait SetupStorage {
    fn load(&self) -> Result<Option<SetupSession>, SetupError>;
    fn save(&mut self, session: &SetupSession) -> Result<(), SetupError>;
    fn clear(&mut self) -> Result<(), SetupError>;

    /// Email the last successful early password write applied to (the
    /// `passwordUpdated`/`passwordUpdatedFor` pair). Invariant: cleared on
    /// both success and abandonment, or a future attempt would skip a write
    /// it still needs.
    fn password_marker(&self) -> Result<Option<String>, SetupError>;
    fn set_password_marker(&mut self, email: &str) -> Result<(), SetupError>;
    fn clear_password_marker(&mut self) -> Result<(), SetupError>;

    /// Marker held while a setup flow is in progress; removed when the flow
    /// ends, successfully or not.
    fn flow_marker(&self) -> Result<bool, SetupError>;
    fn set_flow_marker(&mut self) -> Result<(), SetupError>;
    fn clear_flow_marker(&mut self) -> Result<(), SetupError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_round_trips_through_token_bundle() {
        let tokens = TokenBundle::new("AAA", "BBB");
        let session = SetupSession::from_tokens("dr.lund@example.org", &tokens);
        assert_eq!(session.token_bundle(), tokens);
    }

    #[test]
    fn apply_keeps_email_and_swaps_tokens() {
        let mut session =
            SetupSession::from_tokens("dr.lund@example.org", &TokenBundle::new("AAA", "BBB"));
        session.apply(&TokenBundle::new("CCC", "DDD"));
        assert_eq!(session.email, "dr.lund@example.org");
        assert_eq!(session.access_token, "CCC");
        assert_eq!(session.refresh_token, "DDD");
    }

    #[test]
    fn expiry_check() {
        let mut session =
            SetupSession::from_tokens("a@b.se", &TokenBundle::new("AAA", "BBB"));
        assert!(!session.is_expired()); // no expiry recorded
        session.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(session.is_expired());
        session.expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(!session.is_expired());
    }
}
