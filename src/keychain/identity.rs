//! Signing identities held in a keychain

use super::KeychainManager;
use crate::error::{KeychainError, Result};
use crate::extract::first_quoted;
use crate::tool::{SECURITY, ToolRunner, path_arg};
use std::path::Path;

impl<R: ToolRunner> KeychainManager<'_, R> {
    /// First valid code-signing identity in the keychain at `path`.
    ///
    /// Output format: `  1) BB2683C6... "Apple Development: Name (TEAM)"`
    pub async fn find_signing_identity(&self, path: &Path) -> Result<String> {
        let output = self
            .runner()
            .run(
                SECURITY,
                &["find-identity", "-v", "-p", "codesigning", path_arg(path)?],
            )
            .await?;

        output
            .stdout
            .lines()
            .find_map(first_quoted)
            .map(str::to_string)
            .ok_or_else(|| KeychainError::SigningIdentityNotFound(path.display().to_string()))
    }

    /// Remove the certificate with the given SHA-1 from the keychain at `path`.
    pub async fn delete_certificate(&self, path: &Path, sha1: &str) -> Result<()> {
        self.runner()
            .run(SECURITY, &["delete-certificate", "-Z", sha1, path_arg(path)?])
            .await?;
        crate::debug!("Deleted certificate {sha1} from {}", path.display());
        Ok(())
    }
}
