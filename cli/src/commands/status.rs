use serde_json::json;

use crate::storage::FileStorage;
use crate::util::state_path;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let storage = FileStorage::new();
    let state = storage.snapshot()?;

    let session = state.session.map(|s| {
        json!({
            "email": s.email,
            "expires_at": s.expires_at,
            "expired": s.is_expired(),
        })
    });

    let output = json!({
        "state_path": state_path().to_string_lossy(),
        "session": session,
        "password_updated_for": state.password_updated_for,
        "flow_active": state.flow_active,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
