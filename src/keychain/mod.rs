//! Keychain lifecycle on the build host
//!
//! A keychain moves through four states:
//!
//! ```text
//! ABSENT ──create──▶ EXISTS_LOCKED ──unlock──▶ EXISTS_UNLOCKED ──register──▶ IN_SEARCH_PATH
//!    ▲                                                                             │
//!    └──────────────────────────────── delete ─────────────────────────────────────┘
//! ```
//!
//! [`KeychainManager::ensure`] is the only way to obtain an [`UnlockedKeychain`],
//! and imports take one, so a certificate can never be imported into a locked
//! keychain. Whether the keychain was created or reused is carried by
//! [`Provisioning`] so that callers decide explicitly whether a partition-list
//! grant is needed.

mod identity;
mod search_list;

use crate::error::{KeychainError, Result};
use crate::tool::{SECURITY, Stream, ToolRunner, path_arg};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Auto-lock timeout for freshly created keychains: 6 hours, the longest a
/// paid hosted-runner job may run.
pub const LOCK_TIMEOUT_SECS: u32 = 21_600;

/// Partitions the private key must allow so `codesign` never prompts.
pub const SIGNING_PARTITIONS: &str = "apple-tool:,apple:";

/// How [`KeychainManager::ensure`] obtained the keychain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    /// Created (after deleting any stale copy) during this call.
    Created,
    /// Already existed and was only unlocked.
    Reused,
}

/// A keychain that has been unlocked and is ready for import.
pub struct UnlockedKeychain {
    path: PathBuf,
    password: Zeroizing<String>,
    provisioning: Provisioning,
}

impl UnlockedKeychain {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn provisioning(&self) -> Provisioning {
        self.provisioning
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for UnlockedKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKeychain")
            .field("path", &self.path)
            .field("password", &"<hidden>")
            .field("provisioning", &self.provisioning)
            .finish()
    }
}

/// Keychain operations over a [`ToolRunner`].
pub struct KeychainManager<'a, R> {
    runner: &'a R,
}

impl<'a, R: ToolRunner> KeychainManager<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    pub(crate) fn runner(&self) -> &'a R {
        self.runner
    }

    /// Whether a keychain file exists at `path`.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Bring the keychain at `path` to the unlocked state.
    ///
    /// With `reuse_if_exists` an existing keychain is kept as is. Otherwise
    /// any existing keychain is deleted and a new one created with
    /// `password` and a [`LOCK_TIMEOUT_SECS`] auto-lock. The keychain is
    /// unlocked in both cases.
    pub async fn ensure(
        &self,
        path: &Path,
        password: &str,
        reuse_if_exists: bool,
    ) -> Result<UnlockedKeychain> {
        let provisioning = if reuse_if_exists && self.exists(path).await {
            crate::debug!("Reusing existing keychain {}", path.display());
            Provisioning::Reused
        } else {
            self.delete(path).await?;
            self.create(path, password).await?;
            Provisioning::Created
        };

        self.unlock(path, password).await?;

        Ok(UnlockedKeychain {
            path: path.to_path_buf(),
            password: Zeroizing::new(password.to_string()),
            provisioning,
        })
    }

    async fn create(&self, path: &Path, password: &str) -> Result<()> {
        let keychain = path_arg(path)?;
        self.runner
            .run(SECURITY, &["create-keychain", "-p", password, keychain])
            .await?;

        let timeout = LOCK_TIMEOUT_SECS.to_string();
        self.runner
            .run(
                SECURITY,
                &["set-keychain-settings", "-lut", &timeout, keychain],
            )
            .await?;

        crate::debug!("Created keychain {}", path.display());
        Ok(())
    }

    async fn unlock(&self, path: &Path, password: &str) -> Result<()> {
        self.runner
            .run(
                SECURITY,
                &["unlock-keychain", "-p", password, path_arg(path)?],
            )
            .await?;
        Ok(())
    }

    /// Import a PKCS#12 bundle's certificate and private key.
    ///
    /// An empty `cert_password` is passed as an explicit empty `-P` value.
    pub async fn import_certificate(
        &self,
        keychain: &UnlockedKeychain,
        certificate: &Path,
        cert_password: &str,
    ) -> Result<()> {
        self.runner
            .run(
                SECURITY,
                &[
                    "import",
                    path_arg(certificate)?,
                    "-P",
                    cert_password,
                    "-A",
                    "-t",
                    "cert",
                    "-f",
                    "pkcs12",
                    "-k",
                    path_arg(keychain.path())?,
                ],
            )
            .await?;
        Ok(())
    }

    /// Allow `apple-tool:` and `apple:` to use the named private key.
    ///
    /// Only reused keychains need this; for a freshly created keychain this
    /// is a no-op. Returns whether the partition list was changed. Hosts whose
    /// `security` predates `set-key-partition-list` report an unknown command,
    /// which is treated as success.
    pub async fn grant_partition_access_if_reused(
        &self,
        keychain: &UnlockedKeychain,
        private_key_name: &str,
    ) -> Result<bool> {
        if keychain.provisioning() == Provisioning::Created {
            return Ok(false);
        }

        let mut unknown_command = false;
        let result = self
            .runner
            .run_streaming(
                SECURITY,
                &[
                    "set-key-partition-list",
                    "-S",
                    SIGNING_PARTITIONS,
                    "-s",
                    "-l",
                    private_key_name,
                    "-k",
                    keychain.password(),
                    path_arg(keychain.path())?,
                ],
                &mut |line| {
                    if line.stream == Stream::Stderr && line.text.contains("unknown command") {
                        unknown_command = true;
                    }
                },
            )
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(_) if unknown_command => {
                crate::debug!("set-key-partition-list unsupported on this host, skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the keychain at `path` if it exists. Returns whether anything
    /// was deleted.
    pub async fn delete(&self, path: &Path) -> Result<bool> {
        if !self.exists(path).await {
            return Ok(false);
        }

        self.runner
            .run(SECURITY, &["delete-keychain", path_arg(path)?])
            .await?;
        crate::debug!("Deleted keychain {}", path.display());
        Ok(true)
    }

    /// Path of the user's current default keychain.
    pub async fn default_keychain_path(&self) -> Result<PathBuf> {
        let output = self.runner.run(SECURITY, &["default-keychain"]).await?;
        crate::extract::keychain_list(&output.stdout)
            .into_iter()
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| {
                KeychainError::ConsistencyCheck(
                    "security default-keychain reported no keychain".to_string(),
                )
            })
    }
}
