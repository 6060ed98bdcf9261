//! Apple signing certificate installation and keychain lifecycle for CI jobs

#[macro_use]
pub mod console;

pub mod certificate;
pub mod config;
pub mod error;
pub mod extract;
pub mod installer;
pub mod keychain;
pub mod outputs;
pub mod profile;
pub mod state;
pub mod teardown;
pub mod tool;

// Re-export common types
pub use config::{CleanupConfig, HostEnvironment, InstallConfig, KeychainMode};
pub use error::{ErrorKind, KeychainError, Result};
pub use installer::{CertificateInstaller, InstallReport};
pub use keychain::{KeychainManager, Provisioning, UnlockedKeychain};
pub use teardown::{TeardownReport, teardown};
pub use tool::{SystemToolRunner, ToolRunner};

/// Attempt to remove a file or directory, logging warnings on failure.
///
/// Best-effort cleanup:
/// - Succeeds silently when cleanup works or the path is already gone
/// - Logs a warning when removal fails
/// - Never returns errors
pub async fn cleanup_path<P: AsRef<std::path::Path>>(path: P, description: &str) {
    let path = path.as_ref();

    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return;
    }

    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    if let Err(e) = result {
        // NotFound is OK - race where the file was already removed
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to cleanup {description}");
            info!("   Path: {}", path.display());
            info!("   Error: {e}");
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                info!(
                    "   Suggestion: Check file permissions or try: sudo rm -rf {}",
                    path.display()
                );
            }
        } else {
            debug!("{description} already removed: {}", path.display());
        }
    } else {
        debug!("Removed {description}: {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_removes_files_and_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("certificate.p12");
        let nested = dir.path().join("scratch");
        std::fs::write(&file, b"p12").unwrap();
        std::fs::create_dir_all(nested.join("inner")).unwrap();

        cleanup_path(&file, "certificate").await;
        cleanup_path(&nested, "scratch directory").await;
        cleanup_path(dir.path().join("never-existed"), "nothing").await;

        assert!(!file.exists());
        assert!(!nested.exists());
    }
}
