use serde_json::json;

use menta_core::session::SetupStorage;

use crate::storage::FileStorage;
use crate::util::state_path;

/// Abandoning the flow must clear the stored tokens and both markers, or a
/// stale password marker would skip a write a future attempt still needs.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut storage = FileStorage::new();
    storage.clear()?;
    storage.clear_password_marker()?;
    storage.clear_flow_marker()?;

    let output = json!({
        "status": "cleared",
        "state_path": state_path().to_string_lossy(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
