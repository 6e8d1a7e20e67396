use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SetupError;
use crate::invitation::Identity;
use crate::token::TokenBundle;

/// Row in the `professionals` table. Created inactive by an administrator
/// when the invitation is issued; linked to an account and activated exactly
/// once by the setup flow; never deleted by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfessionalProfile {
    pub id: Uuid,
    pub email: String,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An established session: the identity plus the token pair backing it. The
/// bundle may differ from the inbound one when establishment had to refresh
/// a stale access token.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    pub identity: Identity,
    pub tokens: TokenBundle,
}

/// Identity-service operations the reconciler depends on.
#[allow(async_fn_in_trait)]
pub trait IdentityApi {
    /// Exchange a fragment or stored token pair for a live session.
    async fn session_from_tokens(
        &self,
        tokens: &TokenBundle,
    ) -> Result<EstablishedSession, SetupError>;

    /// Set a new password for the identity behind the access token.
    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<(), SetupError>;

    /// Exchange a refresh token for a fresh bundle via the token endpoint.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, SetupError>;
}

/// `professionals`-table operations the reconciler depends on.
#[allow(async_fn_in_trait)]
pub trait ProfileApi {
    async fn find_by_email(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<Option<ProfessionalProfile>, SetupError>;

    /// Link the profile to `user_id` and mark it active. Re-activating a
    /// profile already linked to the same account must succeed.
    async fn activate(
        &self,
        access_token: &str,
        email: &str,
        user_id: Uuid,
    ) -> Result<ProfessionalProfile, SetupError>;
}
