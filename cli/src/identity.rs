use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use menta_core::error::SetupError;
use menta_core::invitation::{Identity, Role};
use menta_core::ports::{EstablishedSession, IdentityApi};
use menta_core::token::TokenBundle;

/// Client for the hosted identity service's REST surface. Every call carries
/// the public `apikey` header plus the caller's bearer token. Unlike the web
/// portal there is no SDK session cache to lose, so one client covers both
/// the primary path and the raw-HTTP fallback.
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct UserResponse {
    id: uuid::Uuid,
    email: String,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl IdentityClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.base_url)
    }

    /// Pull the status and the backend's own message out of a failed
    /// response; errors are surfaced verbatim when the body carries one.
    async fn failure(resp: reqwest::Response) -> (u16, String) {
        let status = resp.status().as_u16();
        let message = match resp.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("msg")
                .or_else(|| body.get("message"))
                .or_else(|| body.get("error_description"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("identity service returned {status}")),
            Err(_) => format!("identity service returned {status}"),
        };
        (status, message)
    }

    async fn get_user(&self, access_token: &str) -> Result<UserResponse, (Option<u16>, String)> {
        let resp = self
            .http
            .get(self.endpoint("/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| (None, e.to_string()))?;

        if !resp.status().is_success() {
            let (status, message) = Self::failure(resp).await;
            return Err((Some(status), message));
        }
        resp.json::<UserResponse>()
            .await
            .map_err(|e| (None, format!("malformed user response: {e}")))
    }

    /// Invitation metadata rides in the identity's profile attributes.
    fn identity_from(user: UserResponse) -> Identity {
        let meta = &user.user_metadata;
        Identity {
            id: user.id,
            email: user.email,
            role: meta
                .get("role")
                .and_then(|v| v.as_str())
                .and_then(Role::parse),
            invitation_pending: meta
                .get("invitation_pending")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            full_name: meta
                .get("full_name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

impl IdentityApi for IdentityClient {
    /// Validate the pair against the user endpoint. Magic links sit in
    /// inboxes; when the access token has already expired, fall back to one
    /// refresh before giving up on the pair.
    async fn session_from_tokens(
        &self,
        tokens: &TokenBundle,
    ) -> Result<EstablishedSession, SetupError> {
        match self.get_user(&tokens.access_token).await {
            Ok(user) => Ok(EstablishedSession {
                identity: Self::identity_from(user),
                tokens: tokens.clone(),
            }),
            Err((Some(401 | 403), message)) => {
                debug!(%message, "access token stale, refreshing before establishment");
                let fresh = self.refresh(&tokens.refresh_token).await?;
                let user = self
                    .get_user(&fresh.access_token)
                    .await
                    .map_err(|(_, message)| {
                        SetupError::Session(format!("could not establish session: {message}"))
                    })?;
                Ok(EstablishedSession {
                    identity: Self::identity_from(user),
                    tokens: fresh,
                })
            }
            Err((_, message)) => Err(SetupError::Session(format!(
                "could not establish session: {message}"
            ))),
        }
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<(), SetupError> {
        let resp = self
            .http
            .put(self.endpoint("/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(|e| SetupError::write(None, format!("password update failed: {e}")))?;

        if resp.status().is_success() {
            debug!("password updated");
            return Ok(());
        }
        let (status, message) = Self::failure(resp).await;
        Err(SetupError::write(Some(status), message))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, SetupError> {
        let resp = self
            .http
            .post(format!("{}?grant_type=refresh_token", self.endpoint("/token")))
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| SetupError::Session(format!("token refresh failed: {e}")))?;

        if !resp.status().is_success() {
            let (status, message) = Self::failure(resp).await;
            return Err(SetupError::Session(format!(
                "token refresh failed ({status}): {message}"
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SetupError::Session(format!("malformed token response: {e}")))?;
        Ok(
            TokenBundle::new(body.access_token, body.refresh_token)
                .with_expiry(body.expires_at, body.expires_in),
        )
    }
}
