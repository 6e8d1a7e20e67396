use serde_json::json;
use tracing::{info, warn};

use menta_core::invitation::Role;
use menta_core::password;
use menta_core::reconciler::{REDIRECT_DELAY_MS, Reconciler, SessionOutcome};
use menta_core::token::SetupLink;

use crate::identity::IdentityClient;
use crate::profile::ProfileClient;
use crate::storage::FileStorage;

pub async fn run(
    api_url: &str,
    anon_key: &str,
    raw_link: &str,
    role: Role,
    password_arg: &str,
    confirm: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Validation errors are resolved locally and rendered per rule; they
    // never produce a backend call.
    let report = password::check_password(password_arg);
    if !report.is_valid() {
        let err = json!({
            "error": "validation_failed",
            "message": "the password does not satisfy the rules",
            "rules": report,
        });
        eprintln!("{}", serde_json::to_string_pretty(&err)?);
        std::process::exit(1);
    }

    let link = SetupLink::parse(raw_link)?;
    let mut reconciler = Reconciler::new(
        IdentityClient::new(api_url, anon_key),
        ProfileClient::new(api_url, anon_key),
        FileStorage::new(),
        role,
    );

    match reconciler.establish(&link).await? {
        SessionOutcome::Established { email } => {
            info!(%email, "session established");
        }
        SessionOutcome::Missing { cached_email } => {
            let hint = match cached_email {
                Some(email) => {
                    format!("Ask for a fresh invitation link for {email} and try again.")
                }
                None => "Open the invitation link from your email again.".to_string(),
            };
            return Err(format!("No setup session could be established. {hint}").into());
        }
    }

    let invitation = reconciler.verify_invitation()?;
    info!(email = %invitation.email, flow = %role, "invitation verified");

    // The web portal fires this while the user is still typing; here it
    // lands just before submission and lets submit() skip the redundant
    // write.
    reconciler.prime_password(password_arg).await;

    let confirmation = confirm.unwrap_or(password_arg);
    let complete = reconciler.submit(password_arg, confirmation).await?;

    // Invitation links carry the id of the profile they were issued for;
    // activation resolves by email, so a divergence is worth surfacing.
    if let Some(link_id) = link.invited_profile_id(role) {
        if link_id != complete.profile.id {
            warn!(
                %link_id,
                profile_id = %complete.profile.id,
                "activated profile differs from the one named on the link"
            );
        }
    }

    let output = json!({
        "status": "setup_complete",
        "email": complete.profile.email,
        "profile_id": complete.profile.id,
        "user_id": complete.profile.user_id,
        "full_name": invitation.full_name,
        "password_write_skipped": complete.password_write_skipped,
        "next": "sign in at the portal login page with your new password",
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    // The web portal shows the success state briefly before redirecting to
    // login; keep the same beat before returning the shell.
    tokio::time::sleep(std::time::Duration::from_millis(REDIRECT_DELAY_MS)).await;
    Ok(())
}
