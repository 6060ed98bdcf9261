//! Certificate installation
//!
//! Decodes the PKCS#12 secret, validates the certificate, and imports it into
//! the keychain selected by [`KeychainMode`]. Scratch files live in a
//! job-unique directory under the runner temp dir and are removed whether or
//! not the install succeeds.

use crate::certificate::{self, CertificateBundle, CertificateProperties};
use crate::config::{HostEnvironment, InstallConfig, KeychainMode};
use crate::error::{KeychainError, Result};
use crate::keychain::{KeychainManager, Provisioning};
use crate::outputs::InstallOutputs;
use crate::state::JobState;
use crate::tool::ToolRunner;
use chrono::Utc;
use rand::distr::{Alphanumeric, SampleString};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Length of the generated temp keychain password
const TEMP_PASSWORD_LEN: usize = 32;

/// Result of a successful install.
#[derive(Debug)]
pub struct InstallReport {
    pub mode: KeychainMode,
    pub properties: CertificateProperties,
    pub keychain_path: PathBuf,
    pub provisioning: Provisioning,
    /// Whether the private key's partition list was updated
    pub partition_granted: bool,
    pub outputs: InstallOutputs,
}

/// Keychain path and password chosen for an install.
struct TargetKeychain {
    path: PathBuf,
    password: Zeroizing<String>,
    /// Exported to later steps; only ever a password this tool generated
    exported_password: Option<Zeroizing<String>>,
}

pub struct CertificateInstaller<'a, R> {
    runner: &'a R,
    host: &'a HostEnvironment,
}

impl<'a, R: ToolRunner> CertificateInstaller<'a, R> {
    pub fn new(runner: &'a R, host: &'a HostEnvironment) -> Self {
        Self { runner, host }
    }

    /// Install the configured certificate.
    pub async fn install(&self, config: &InstallConfig) -> Result<InstallReport> {
        self.host.require_macos()?;

        if config.encoded_certificate.trim().is_empty() {
            return Err(KeychainError::MissingInput(
                "encoded-certificate (APPLE_CERTIFICATE) is empty".to_string(),
            ));
        }
        let mode = config.keychain_mode()?;

        let scratch = tempfile::Builder::new()
            .prefix("kodegen-certificate-")
            .tempdir_in(&self.host.temp_dir)?;
        let scratch_path = scratch.path().to_path_buf();

        let result = self.install_in(config, mode, &scratch_path).await;

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory {}: {e}", scratch_path.display());
        }
        result
    }

    async fn install_in(
        &self,
        config: &InstallConfig,
        mode: KeychainMode,
        scratch: &Path,
    ) -> Result<InstallReport> {
        if let Some(message) = certificate_password_warning(&config.certificate_password) {
            warn!("{message}");
        }

        let bundle = CertificateBundle::decode(
            &config.encoded_certificate,
            &config.certificate_password,
            scratch,
        )
        .await?;
        let result = self.import_bundle(config, mode, &bundle, scratch).await;
        crate::cleanup_path(bundle.path(), "decoded certificate").await;
        result
    }

    async fn import_bundle(
        &self,
        config: &InstallConfig,
        mode: KeychainMode,
        bundle: &CertificateBundle,
        scratch: &Path,
    ) -> Result<InstallReport> {
        let properties = certificate::read_properties(self.runner, bundle, scratch)
            .await?
            .with_common_name_override(config.signing_identity.as_deref());
        properties.validate(Utc::now())?;
        debug!(
            "Certificate {} ({}) valid until {}",
            properties.common_name,
            properties.fingerprint,
            properties
                .not_after
                .map(|d| d.to_rfc3339())
                .unwrap_or_default()
        );

        let manager = KeychainManager::new(self.runner);
        let target = self.resolve_keychain(&manager, config, mode).await?;

        // Recorded before creation so teardown finds it even if a later step fails
        if mode == KeychainMode::Temp {
            JobState::update(&self.host.state_file, |state| {
                state.keychain_mode = Some(mode);
                state.temp_keychain_path = Some(target.path.clone());
            })
            .await?;
        }

        let keychain = manager.ensure(&target.path, &target.password, true).await?;
        manager
            .import_certificate(&keychain, bundle.path(), bundle.password())
            .await?;

        let partition_granted = match keychain.provisioning() {
            Provisioning::Created => false,
            Provisioning::Reused => {
                let key_name = certificate::private_key_name(self.runner, bundle).await?;
                manager
                    .grant_partition_access_if_reused(&keychain, &key_name)
                    .await?
            }
        };

        manager.register_in_search_path(&target.path).await?;

        JobState::update(&self.host.state_file, |state| {
            state.keychain_mode = Some(mode);
            state.keychain_path = Some(target.path.clone());
            state.temp_keychain_path = (mode == KeychainMode::Temp).then(|| target.path.clone());
            state.certificate_sha1 = Some(properties.fingerprint.clone());
        })
        .await?;

        let outputs = InstallOutputs {
            sha1: properties.fingerprint.clone(),
            signing_identity: properties.common_name.clone(),
            keychain_path: target.path.clone(),
            keychain_password: target.exported_password,
        };

        Ok(InstallReport {
            mode,
            properties,
            keychain_path: target.path,
            provisioning: keychain.provisioning(),
            partition_granted,
            outputs,
        })
    }

    async fn resolve_keychain(
        &self,
        manager: &KeychainManager<'a, R>,
        config: &InstallConfig,
        mode: KeychainMode,
    ) -> Result<TargetKeychain> {
        match mode {
            KeychainMode::Temp => {
                if config.keychain_password().is_some() {
                    debug!("Ignoring keychain password for the temp keychain");
                }
                let path = self.host.temp_keychain_path();
                // A leftover from an aborted job can't be unlocked with a new password
                if manager.delete(&path).await? {
                    warn!("Removed stale temp keychain {}", path.display());
                }
                let password =
                    Zeroizing::new(Alphanumeric.sample_string(&mut rand::rng(), TEMP_PASSWORD_LEN));
                Ok(TargetKeychain {
                    path,
                    exported_password: Some(password.clone()),
                    password,
                })
            }
            KeychainMode::Default => {
                let path = manager.default_keychain_path().await?;
                let password = match config.keychain_password() {
                    Some(password) => password.to_string(),
                    None => {
                        warn!("No keychain password supplied for the default keychain");
                        String::new()
                    }
                };
                Ok(TargetKeychain {
                    path,
                    password: Zeroizing::new(password),
                    exported_password: None,
                })
            }
            KeychainMode::Custom => {
                let path = config.custom_keychain_path()?.ok_or_else(|| {
                    KeychainError::MissingInput(
                        "custom-keychain-path (APPLE_CUSTOM_KEYCHAIN_PATH) is required for a custom keychain"
                            .to_string(),
                    )
                })?;
                let password = config.keychain_password().ok_or_else(|| {
                    KeychainError::MissingInput(
                        "keychain-password (APPLE_KEYCHAIN_PASSWORD) is required for a custom keychain"
                            .to_string(),
                    )
                })?;
                Ok(TargetKeychain {
                    path,
                    password: Zeroizing::new(password.to_string()),
                    exported_password: None,
                })
            }
        }
    }
}

/// Warning shown when the P12 password is empty; the import decides whether
/// that is actually a problem.
fn certificate_password_warning(password: &str) -> Option<&'static str> {
    password.is_empty().then_some(
        "No certificate password supplied. If the P12 is password protected the import will fail.",
    )
}
