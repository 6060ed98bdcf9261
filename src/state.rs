//! Install → teardown hand-off
//!
//! Install and teardown run as separate processes within one CI job. What
//! teardown must undo is recorded in a small JSON file in the runner temp
//! directory.

use crate::config::KeychainMode;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain_mode: Option<KeychainMode>,

    /// Keychain the certificate was imported into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain_path: Option<PathBuf>,

    /// Set only for temp keychains; teardown deletes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_keychain_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_sha1: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// Load the state file, or `None` if nothing was recorded.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the state file, replacing it atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load (or start empty), apply `change`, and save.
    pub async fn update(path: &Path, change: impl FnOnce(&mut Self)) -> Result<Self> {
        let mut state = Self::load(path).await?.unwrap_or_default();
        change(&mut state);
        state.updated_at = Some(Utc::now());
        state.save(path).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_state_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(JobState::load(&dir.path().join("state.json")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn updates_merge_with_existing_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        JobState::update(&path, |s| {
            s.keychain_mode = Some(KeychainMode::Temp);
            s.temp_keychain_path = Some(PathBuf::from("/tmp/ios_signing_temp.keychain"));
        })
        .await
        .unwrap();
        JobState::update(&path, |s| s.profile_uuid = Some("ABCD-1234".to_string()))
            .await
            .unwrap();

        let state = JobState::load(&path).await.unwrap().unwrap();
        assert_eq!(state.keychain_mode, Some(KeychainMode::Temp));
        assert_eq!(
            state.temp_keychain_path,
            Some(PathBuf::from("/tmp/ios_signing_temp.keychain"))
        );
        assert_eq!(state.profile_uuid.as_deref(), Some("ABCD-1234"));
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn corrupt_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JobState::load(&path).await.is_err());
    }
}
