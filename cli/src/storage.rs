use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use menta_core::error::SetupError;
use menta_core::session::{SetupSession, SetupStorage};

use crate::util::state_path;

/// On-disk layout of the setup state: one JSON document standing in for the
/// web portal's individual local-storage keys.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SetupSession>,
    /// Email the last successful early password write applied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_updated_for: Option<String>,
    #[serde(default)]
    pub flow_active: bool,
}

/// File-backed implementation of the setup persistence port. Holds tokens,
/// so the file is written with restricted permissions like a credentials
/// file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new() -> Self {
        Self { path: state_path() }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn snapshot(&self) -> Result<StateFile, SetupError> {
        self.read()
    }

    fn read(&self) -> Result<StateFile, SetupError> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| SetupError::Storage(format!("corrupt state file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => Err(SetupError::Storage(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write(&self, state: &StateFile) -> Result<(), SetupError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SetupError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let data = serde_json::to_string_pretty(state)
            .map_err(|e| SetupError::Storage(format!("serialize state: {e}")))?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|e| SetupError::Storage(format!("open {}: {e}", self.path.display())))?;
        file.write_all(data.as_bytes())
            .map_err(|e| SetupError::Storage(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }

    fn update(&mut self, apply: impl FnOnce(&mut StateFile)) -> Result<(), SetupError> {
        let mut state = self.read()?;
        apply(&mut state);
        self.write(&state)
    }
}

impl SetupStorage for FileStorage {
    fn load(&self) -> Result<Option<SetupSession>, SetupError> {
        Ok(self.read()?.session)
    }

    fn save(&mut self, session: &SetupSession) -> Result<(), SetupError> {
        let session = session.clone();
        self.update(|state| state.session = Some(session))
    }

    fn clear(&mut self) -> Result<(), SetupError> {
        self.update(|state| state.session = None)
    }

    fn password_marker(&self) -> Result<Option<String>, SetupError> {
        Ok(self.read()?.password_updated_for)
    }

    fn set_password_marker(&mut self, email: &str) -> Result<(), SetupError> {
        let email = email.to_string();
        self.update(|state| state.password_updated_for = Some(email))
    }

    fn clear_password_marker(&mut self) -> Result<(), SetupError> {
        self.update(|state| state.password_updated_for = None)
    }

    fn flow_marker(&self) -> Result<bool, SetupError> {
        Ok(self.read()?.flow_active)
    }

    fn set_flow_marker(&mut self) -> Result<(), SetupError> {
        self.update(|state| state.flow_active = true)
    }

    fn clear_flow_marker(&mut self) -> Result<(), SetupError> {
        self.update(|state| state.flow_active = false)
    }
}

// Unix-specific imports for file permissions
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

// No-op on non-unix (won't compile for Windows without this)
#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use menta_core::token::TokenBundle;

    fn temp_storage() -> FileStorage {
        let path = std::env::temp_dir()
            .join(format!("menta-storage-test-{}", uuid::Uuid::now_v7()))
            .join("setup-state.json");
        FileStorage::at(path)
    }

    #[test]
    fn session_round_trips_through_the_file() {
        let mut storage = temp_storage();
        assert_eq!(storage.load().unwrap(), None);

        let session =
            SetupSession::from_tokens("dr.lund@example.org", &TokenBundle::new("AAA", "BBB"));
        storage.save(&session).unwrap();
        assert_eq!(storage.load().unwrap(), Some(session));

        storage.clear().unwrap();
        assert_eq!(storage.load().unwrap(), None);
    }

    #[test]
    fn markers_are_independent_of_the_session() {
        let mut storage = temp_storage();
        storage.set_password_marker("dr.lund@example.org").unwrap();
        storage.set_flow_marker().unwrap();

        assert_eq!(
            storage.password_marker().unwrap().as_deref(),
            Some("dr.lund@example.org")
        );
        assert!(storage.flow_marker().unwrap());
        assert_eq!(storage.load().unwrap(), None);

        storage.clear_password_marker().unwrap();
        storage.clear_flow_marker().unwrap();
        assert_eq!(storage.password_marker().unwrap(), None);
        assert!(!storage.flow_marker().unwrap());
    }

    #[test]
    fn missing_file_reads_as_empty_state() {
        let storage = temp_storage();
        let state = storage.snapshot().unwrap();
        assert!(state.session.is_none());
        assert!(state.password_updated_for.is_none());
        assert!(!state.flow_active);
    }
}
