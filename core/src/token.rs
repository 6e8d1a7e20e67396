use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::SetupError;
use crate::invitation::Role;

/// Access/refresh token pair lifted from a magic-link redirect fragment or
/// returned by the identity service's token endpoint. Ephemeral: mirrored
/// into local storage for reload recovery and deleted once setup completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenBundle {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    /// Derive the expiry from whichever field the service provided: an
    /// absolute unix timestamp, or a seconds-from-now window.
    pub fn with_expiry(mut self, expires_at: Option<i64>, expires_in: Option<i64>) -> Self {
        self.expires_at = expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));
        self
    }
}

/// Parse the fragment of a magic-link redirect
/// (`#access_token=...&refresh_token=...&expires_in=...`).
///
/// Returns `None` when no access token is present or the fragment is not
/// query-string shaped. Pure; never fails.
pub fn extract_tokens(fragment: &str) -> Option<TokenBundle> {
    let fragment = fragment.trim_start_matches('#');

    let mut access = None;
    let mut refresh = None;
    let mut expires_at = None;
    let mut expires_in = None;

    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "access_token" => access = Some(value.into_owned()),
            "refresh_token" => refresh = Some(value.into_owned()),
            "expires_at" => expires_at = value.parse::<i64>().ok(),
            "expires_in" => expires_in = value.parse::<i64>().ok(),
            _ => {}
        }
    }

    let access_token = access.filter(|t| !t.is_empty())?;
    Some(
        TokenBundle::new(access_token, refresh.unwrap_or_default())
            .with_expiry(expires_at, expires_in),
    )
}

/// Everything a setup page reads off its inbound URL: the query parameters
/// and, when the magic-link redirect carried one, the token fragment.
#[derive(Debug, Clone, Default)]
pub struct SetupLink {
    pub email: Option<String>,
    pub psychologist_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub source: Option<String>,
    pub flow: Option<String>,
    pub tokens: Option<TokenBundle>,
}

impl SetupLink {
    pub fn parse(raw: &str) -> Result<Self, SetupError> {
        let url = Url::parse(raw)
            .map_err(|e| SetupError::Session(format!("invalid setup link: {e}")))?;

        let mut link = SetupLink::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "email" => link.email = Some(value.into_owned()),
                "psychologist_id" => link.psychologist_id = Uuid::parse_str(&value).ok(),
                "admin_id" => link.admin_id = Uuid::parse_str(&value).ok(),
                "source" => link.source = Some(value.into_owned()),
                "flow" => link.flow = Some(value.into_owned()),
                _ => {}
            }
        }
        link.tokens = url.fragment().and_then(extract_tokens);
        Ok(link)
    }

    /// The role the link itself claims, when its `flow` parameter names one.
    /// Unknown values read as no claim rather than an error.
    pub fn flow_role(&self) -> Option<Role> {
        self.flow.as_deref().and_then(Role::parse)
    }

    /// The profile the invitation was issued for, per the link's id
    /// parameter for `role`.
    pub fn invited_profile_id(&self, role: Role) -> Option<Uuid> {
        match role {
            Role::Admin => self.admin_id,
            Role::Psychologist => self.psychologist_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_pair_from_fragment() {
        let bundle = extract_tokens("access_token=AAA&refresh_token=BBB").unwrap();
        assert_eq!(bundle.access_token, "AAA");
        assert_eq!(bundle.refresh_token, "BBB");
        assert_eq!(bundle.expires_at, None);
    }

    #[test]
    fn leading_hash_is_tolerated() {
        let bundle = extract_tokens("#access_token=AAA&refresh_token=BBB").unwrap();
        assert_eq!(bundle.access_token, "AAA");
    }

    #[test]
    fn fragment_without_access_token_yields_none() {
        assert!(extract_tokens("refresh_token=BBB&type=magiclink").is_none());
        assert!(extract_tokens("").is_none());
        assert!(extract_tokens("not a query string at all").is_none());
        assert!(extract_tokens("access_token=").is_none());
    }

    #[test]
    fn expiry_from_absolute_timestamp() {
        let bundle =
            extract_tokens("access_token=AAA&refresh_token=BBB&expires_at=1756200000").unwrap();
        assert_eq!(
            bundle.expires_at,
            Utc.timestamp_opt(1_756_200_000, 0).single()
        );
    }

    #[test]
    fn expiry_from_relative_window() {
        let before = Utc::now();
        let bundle =
            extract_tokens("access_token=AAA&refresh_token=BBB&expires_in=3600").unwrap();
        let expires = bundle.expires_at.unwrap();
        assert!(expires >= before + Duration::seconds(3599));
        assert!(expires <= Utc::now() + Duration::seconds(3601));
    }

    #[test]
    fn parses_full_setup_link() {
        let link = SetupLink::parse(
            "https://portal.example.org/setup?email=dr.lund%40example.org&source=invite&flow=psychologist#access_token=AAA&refresh_token=BBB",
        )
        .unwrap();
        assert_eq!(link.email.as_deref(), Some("dr.lund@example.org"));
        assert_eq!(link.source.as_deref(), Some("invite"));
        assert_eq!(link.flow.as_deref(), Some("psychologist"));
        assert_eq!(link.tokens.unwrap().access_token, "AAA");
    }

    #[test]
    fn link_without_fragment_has_no_tokens() {
        let link = SetupLink::parse("https://portal.example.org/setup?email=a%40b.se").unwrap();
        assert!(link.tokens.is_none());
    }

    #[test]
    fn flow_parameter_maps_to_a_role_claim() {
        let link =
            SetupLink::parse("https://portal.example.org/setup?flow=admin").unwrap();
        assert_eq!(link.flow_role(), Some(Role::Admin));

        let link =
            SetupLink::parse("https://portal.example.org/setup?flow=intake").unwrap();
        assert_eq!(link.flow_role(), None);

        let link = SetupLink::parse("https://portal.example.org/setup").unwrap();
        assert_eq!(link.flow_role(), None);
    }

    #[test]
    fn invited_profile_id_follows_the_role() {
        let psych = Uuid::now_v7();
        let link = SetupLink::parse(&format!(
            "https://portal.example.org/setup?psychologist_id={psych}"
        ))
        .unwrap();
        assert_eq!(link.invited_profile_id(Role::Psychologist), Some(psych));
        assert_eq!(link.invited_profile_id(Role::Admin), None);
    }
}
