//! Post-job cleanup
//!
//! Undoes what install recorded in the job state. Every failure is reported as
//! a warning; teardown never fails the job.

use crate::config::{CleanupConfig, HostEnvironment, KeychainMode};
use crate::keychain::KeychainManager;
use crate::profile::ProfileStore;
use crate::state::JobState;
use crate::tool::ToolRunner;
use std::path::PathBuf;

/// What teardown did.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Temp keychain that was deleted
    pub deleted_keychain: Option<PathBuf>,
    /// Whether the certificate was removed from a default/custom keychain
    pub deleted_certificate: bool,
    /// Number of provisioning profile files removed
    pub removed_profiles: usize,
    pub warnings: Vec<String>,
}

impl TeardownReport {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Remove the temp keychain and, on request, the certificate and profile
/// recorded at install time.
///
/// Off macOS this does nothing.
pub async fn teardown<R: ToolRunner>(
    runner: &R,
    host: &HostEnvironment,
    profiles: Option<&ProfileStore>,
    config: &CleanupConfig,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    if !host.is_macos() {
        debug!("Not running on macOS, nothing to clean up");
        return report;
    }

    let state = match JobState::load(&host.state_file).await {
        Ok(state) => state.unwrap_or_default(),
        Err(e) => {
            report.warn(format!(
                "Could not read job state {}: {e}",
                host.state_file.display()
            ));
            JobState::default()
        }
    };
    let manager = KeychainManager::new(runner);

    if let Some(path) = config.keychain_path.clone().or(state.temp_keychain_path.clone()) {
        match manager.delete(&path).await {
            Ok(true) => report.deleted_keychain = Some(path),
            Ok(false) => debug!("Temp keychain {} already gone", path.display()),
            Err(e) => report.warn(format!(
                "Failed to delete temp keychain {}: {e}",
                path.display()
            )),
        }
    }

    if config.delete_certificate {
        match (state.keychain_mode, &state.keychain_path, &state.certificate_sha1) {
            (Some(KeychainMode::Default | KeychainMode::Custom), Some(path), Some(sha1)) => {
                match manager.delete_certificate(path, sha1).await {
                    Ok(()) => report.deleted_certificate = true,
                    Err(e) => report.warn(format!(
                        "Failed to delete certificate {sha1} from {}: {e}",
                        path.display()
                    )),
                }
            }
            (Some(KeychainMode::Temp), ..) => {
                debug!("Certificate went away with the temp keychain");
            }
            _ => debug!("No installed certificate recorded"),
        }
    }

    if config.remove_profile {
        match (&state.profile_uuid, profiles) {
            (Some(uuid), Some(store)) => match store.delete(uuid).await {
                Ok(count) => report.removed_profiles = count,
                Err(e) => report.warn(format!("Failed to remove provisioning profile {uuid}: {e}")),
            },
            (Some(uuid), None) => report.warn(format!(
                "Provisioning profile {uuid} not removed: profile directory unknown"
            )),
            (None, _) => debug!("No provisioning profile recorded"),
        }
    }

    crate::cleanup_path(&host.state_file, "job state").await;
    report
}
