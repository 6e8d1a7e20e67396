use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use menta_core::error::SetupError;
use menta_core::ports::{ProfessionalProfile, ProfileApi};

/// Client for the `professionals` table on the relational table API. Raw
/// REST with the `apikey` header and the session's bearer token; row access
/// is enforced server-side.
pub struct ProfileClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl ProfileClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/professionals", self.base_url)
    }

    async fn failure(resp: reqwest::Response) -> SetupError {
        let status = resp.status().as_u16();
        let message = match resp.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("message")
                .or_else(|| body.get("msg"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("table API returned {status}")),
            Err(_) => format!("table API returned {status}"),
        };
        SetupError::write(Some(status), message)
    }
}

impl ProfileApi for ProfileClient {
    async fn find_by_email(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<Option<ProfessionalProfile>, SetupError> {
        let resp = self
            .http
            .get(self.endpoint())
            .query(&[
                ("email", format!("eq.{email}")),
                ("select", "id,email,user_id,is_active,updated_at".into()),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| SetupError::write(None, format!("profile lookup failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }

        let mut rows: Vec<ProfessionalProfile> = resp
            .json()
            .await
            .map_err(|e| SetupError::write(None, format!("malformed profile response: {e}")))?;
        // Email is unique until activation links the row to an account.
        Ok(rows.pop())
    }

    async fn activate(
        &self,
        access_token: &str,
        email: &str,
        user_id: Uuid,
    ) -> Result<ProfessionalProfile, SetupError> {
        let resp = self
            .http
            .patch(self.endpoint())
            .query(&[("email", format!("eq.{email}"))])
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=representation")
            .bearer_auth(access_token)
            .json(&json!({
                "user_id": user_id,
                "is_active": true,
                "updated_at": Utc::now(),
            }))
            .send()
            .await
            .map_err(|e| SetupError::write(None, format!("profile activation failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }

        let mut rows: Vec<ProfessionalProfile> = resp
            .json()
            .await
            .map_err(|e| SetupError::write(None, format!("malformed profile response: {e}")))?;
        let profile = rows.pop().ok_or_else(|| {
            SetupError::write(Some(404), format!("no professional profile for {email}"))
        })?;
        debug!(profile_id = %profile.id, "profile activated");
        Ok(profile)
    }
}
