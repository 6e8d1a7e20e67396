use tracing::{debug, info, warn};

use crate::error::SetupError;
use crate::invitation::{self, Identity, Role};
use crate::password;
use crate::ports::{EstablishedSession, IdentityApi, ProfessionalProfile, ProfileApi};
use crate::session::{SetupSession, SetupStorage};
use crate::token::SetupLink;

/// How long the portal shows the success state before redirecting to the
/// login entry point.
pub const REDIRECT_DELAY_MS: u64 = 2500;

/// Observable states of the setup flow, in the order the happy path visits
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Init,
    TokenFound,
    NoToken,
    SessionEstablished,
    SessionMissing,
    InvitationValid,
    AwaitingInput,
    Submitting,
    Success,
    Failure,
}

/// Outcome of the session-establishment step. A missing session is
/// recoverable when an email address is still known (the user can ask for a
/// fresh link); without one the attempt is terminal.
#[derive(Debug)]
pub enum SessionOutcome {
    Established { email: String },
    Missing { cached_email: Option<String> },
}

/// The invitation details surfaced to the form once verified. The email is
/// read-only from here on.
#[derive(Debug, Clone)]
pub struct VerifiedInvitation {
    pub email: String,
    pub full_name: Option<String>,
}

/// Result of a completed submission.
#[derive(Debug)]
pub struct SetupComplete {
    pub profile: ProfessionalProfile,
    /// True when the early pre-submit write already covered phase one and no
    /// second password-update call was issued.
    pub password_write_skipped: bool,
}

/// Reconciles an inbound magic link, persisted state, and the identity
/// service into one valid session, then drives the two-phase setup write:
/// password update, then profile activation. Both phases are idempotent and
/// phase-one completion is recorded, so a partial failure is retried safely
/// by running the flow again.
///
/// Generic over its ports; tests run the whole machine against in-memory
/// doubles.
pub struct Reconciler<I, P, S> {
    identity_api: I,
    profile_api: P,
    storage: S,
    expected_role: Role,
    state: SetupState,
    session: Option<SetupSession>,
    identity: Option<Identity>,
}

impl<I, P, S> Reconciler<I, P, S>
where
    I: IdentityApi,
    P: ProfileApi,
    S: SetupStorage,
{
    pub fn new(identity_api: I, profile_api: P, storage: S, expected_role: Role) -> Self {
        Self {
            identity_api,
            profile_api,
            storage,
            expected_role,
            state: SetupState::Init,
            session: None,
            identity: None,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn session(&self) -> Option<&SetupSession> {
        self.session.as_ref()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn transition(&mut self, next: SetupState) {
        debug!(from = ?self.state, to = ?next, "setup state transition");
        self.state = next;
    }

    /// Establish a session, in priority order: fresh fragment tokens, then a
    /// previously persisted session. Each candidate is verified against the
    /// identity service before it is accepted; a candidate that no longer
    /// works falls through to the next instead of failing the flow.
    pub async fn establish(&mut self, link: &SetupLink) -> Result<SessionOutcome, SetupError> {
        self.transition(SetupState::Init);

        // A link that names the other flow is a wrong-door error; refuse it
        // before spending any tokens on establishment.
        if let Some(link_role) = link.flow_role() {
            if link_role != self.expected_role {
                self.transition(SetupState::Failure);
                return Err(SetupError::Invitation(format!(
                    "this link belongs to the {link_role} setup flow, not {}",
                    self.expected_role
                )));
            }
        }

        let stored = self.storage.load()?;

        if let Some(tokens) = &link.tokens {
            self.transition(SetupState::TokenFound);
            match self.identity_api.session_from_tokens(tokens).await {
                Ok(established) => return self.accept_session(established),
                Err(err) => {
                    warn!(error = %err, "fragment token exchange failed, trying stored session");
                }
            }
        } else {
            self.transition(SetupState::NoToken);
        }

        if let Some(persisted) = &stored {
            match self
                .identity_api
                .session_from_tokens(&persisted.token_bundle())
                .await
            {
                Ok(established) => return self.accept_session(established),
                Err(err) => warn!(error = %err, "stored setup session no longer valid"),
            }
        }

        let cached_email = link.email.clone().or(stored.map(|s| s.email));
        if cached_email.is_some() {
            // Recoverable: the user can request a fresh link for this email.
            self.transition(SetupState::SessionMissing);
        } else {
            self.transition(SetupState::Failure);
        }
        Ok(SessionOutcome::Missing { cached_email })
    }

    fn accept_session(
        &mut self,
        established: EstablishedSession,
    ) -> Result<SessionOutcome, SetupError> {
        let email = established.identity.email.clone();
        let session = SetupSession::from_tokens(email.clone(), &established.tokens);
        self.storage.save(&session)?;
        self.storage.set_flow_marker()?;
        self.session = Some(session);
        self.identity = Some(established.identity);
        self.transition(SetupState::SessionEstablished);
        info!(%email, "setup session established");
        Ok(SessionOutcome::Established { email })
    }

    /// Gate on the invitation metadata: setup proceeds only for a pending
    /// invitation whose role matches this flow. On success the form is
    /// populated with the verified email and the machine waits for input.
    pub fn verify_invitation(&mut self) -> Result<VerifiedInvitation, SetupError> {
        let Some(identity) = self.identity.clone() else {
            return Err(SetupError::Session(
                "no established session; open the invitation link again".into(),
            ));
        };

        if let Err(err) = invitation::verify_invitation(&identity, self.expected_role) {
            self.transition(SetupState::Failure);
            return Err(err);
        }

        self.transition(SetupState::InvitationValid);
        self.transition(SetupState::AwaitingInput);
        Ok(VerifiedInvitation {
            email: identity.email,
            full_name: identity.full_name,
        })
    }

    /// Opportunistic pre-submit password write: fires once the candidate is
    /// long enough and a session exists, not gated on full validity. Success
    /// records the marker that lets `submit` skip the redundant write; failure
    /// is swallowed (the only swallowed error in the flow) and the write is
    /// retried at submit time.
    pub async fn prime_password(&mut self, candidate: &str) {
        if !password::ready_to_prime(candidate) {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };

        match self
            .identity_api
            .update_password(&session.access_token, candidate)
            .await
        {
            Ok(()) => {
                debug!("early password write succeeded");
                if let Err(err) = self.storage.set_password_marker(&session.email) {
                    warn!(error = %err, "could not record early password write");
                }
            }
            Err(err) => {
                debug!(error = %err, "early password write failed, will retry at submit");
            }
        }
    }

    /// The two-phase write: password update, then profile activation, then
    /// cleanup. The awaits are strictly sequential; activation must not run
    /// against a session whose password update is unconfirmed. A failure
    /// leaves completed phases as-is (no rollback) and the flow retryable.
    pub async fn submit(
        &mut self,
        candidate: &str,
        confirmation: &str,
    ) -> Result<SetupComplete, SetupError> {
        password::validate_submission(candidate, confirmation)?;

        let Some(mut session) = self.session.clone() else {
            return Err(SetupError::Session(
                "no established session; open the invitation link again".into(),
            ));
        };
        let Some(identity) = self.identity.clone() else {
            return Err(SetupError::Session(
                "no established session; open the invitation link again".into(),
            ));
        };
        self.transition(SetupState::Submitting);

        // Phase one: password. Skipped when the early write already landed
        // for this email.
        let skipped = self.storage.password_marker()?.as_deref() == Some(session.email.as_str());
        if !skipped {
            let result = with_refresh_retry(
                &self.identity_api,
                &mut self.storage,
                &mut session,
                async |token| self.identity_api.update_password(token, candidate).await,
            )
            .await;
            // The helper may have rotated the pair whether or not the write
            // landed; keep the in-memory session in step with storage.
            self.session = Some(session.clone());
            match result {
                Ok(()) => {
                    // Phase-one completion marker: a retried run after a
                    // later failure skips straight to activation.
                    self.storage.set_password_marker(&session.email)?;
                }
                Err(err) => {
                    self.transition(SetupState::Failure);
                    return Err(err);
                }
            }
        } else {
            debug!("password already updated for this email, skipping phase one");
        }

        // Phase two: profile activation, through the same refresh-and-retry
        // path. A profile already active under a different account is a
        // conflict, not a candidate for re-linking.
        let email = session.email.clone();
        let user_id = identity.id;
        let result = with_refresh_retry(
            &self.identity_api,
            &mut self.storage,
            &mut session,
            async |token| match self.profile_api.find_by_email(token, &email).await? {
                None => Err(SetupError::write(
                    Some(404),
                    format!("no professional profile found for {email}"),
                )),
                Some(existing)
                    if existing.is_active
                        && existing.user_id.is_some_and(|linked| linked != user_id) =>
                {
                    Err(SetupError::write(
                        Some(409),
                        "profile already activated by a different account",
                    ))
                }
                Some(_) => self.profile_api.activate(token, &email, user_id).await,
            },
        )
        .await;
        self.session = Some(session.clone());

        let profile = match result {
            Ok(profile) => profile,
            Err(err) => {
                self.transition(SetupState::Failure);
                return Err(err);
            }
        };

        // Phase three: stored tokens and transient flags must not survive a
        // completed setup.
        self.storage.clear()?;
        self.storage.clear_password_marker()?;
        self.storage.clear_flow_marker()?;
        self.session = None;

        self.transition(SetupState::Success);
        info!(email = %profile.email, profile_id = %profile.id, "account setup complete");
        Ok(SetupComplete {
            profile,
            password_write_skipped: skipped,
        })
    }

    /// Abandon the flow: stored tokens and both markers are cleared so a
    /// future attempt starts clean. Safe to call in any state.
    pub fn abandon(&mut self) -> Result<(), SetupError> {
        self.storage.clear()?;
        self.storage.clear_password_marker()?;
        self.storage.clear_flow_marker()?;
        self.session = None;
        self.identity = None;
        self.transition(SetupState::Init);
        Ok(())
    }
}

/// The single refresh-and-retry pass shared by both write phases: try the
/// operation with the current access token; on a 401/403 rejection exchange
/// the refresh token exactly once, persist the fresh pair, and retry the
/// operation once. Refresh failure, or a second rejection, is fatal for the
/// attempt.
///
/// The exchange rotates the refresh token, so the fresh pair is saved before
/// the retry: even when the retry fails, the stored session must hold tokens
/// the next run can still use.
async fn with_refresh_retry<I, S, T, F>(
    identity_api: &I,
    storage: &mut S,
    session: &mut SetupSession,
    mut op: F,
) -> Result<T, SetupError>
where
    I: IdentityApi,
    S: SetupStorage,
    F: AsyncFnMut(&str) -> Result<T, SetupError>,
{
    match op(&session.access_token).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_auth_rejection() => {
            debug!(error = %err, "write rejected, refreshing access token and retrying once");
            let fresh = identity_api.refresh(&session.refresh_token).await?;
            session.apply(&fresh);
            storage.save(session)?;
            op(&session.access_token).await
        }
        Err(err) => Err(err),
    }
}
