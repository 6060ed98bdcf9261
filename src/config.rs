//! Installer inputs and host environment.

use crate::error::{KeychainError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the temporary keychain inside the runner temp directory
pub const TEMP_KEYCHAIN_NAME: &str = "ios_signing_temp.keychain";

/// File name of the install → teardown hand-off record
pub const STATE_FILE_NAME: &str = "kodegen-keychain-state.json";

/// Default keychain mode when none is configured
pub const DEFAULT_KEYCHAIN_MODE: &str = "temp";

/// Operating system the installer runs on
pub const REQUIRED_OS: &str = "macos";

/// Which keychain receives the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainMode {
    /// Per-job keychain in the runner temp directory, deleted at teardown
    Temp,
    /// The user's current default keychain
    Default,
    /// A caller-supplied keychain path and password
    Custom,
}

impl KeychainMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temp => "temp",
            Self::Default => "default",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for KeychainMode {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temp" => Ok(Self::Temp),
            "default" => Ok(Self::Default),
            "custom" => Ok(Self::Custom),
            other => Err(KeychainError::InvalidConfig(format!(
                "unknown keychain '{other}' (expected temp, default or custom)"
            ))),
        }
    }
}

impl std::fmt::Display for KeychainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for installing a certificate.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallConfig {
    /// BASE64 PKCS#12 bundle
    #[serde(default)]
    pub encoded_certificate: String,

    /// PKCS#12 password; may be empty
    #[serde(default)]
    pub certificate_password: String,

    /// `temp`, `default` or `custom`
    #[serde(default = "default_keychain_mode")]
    pub keychain: String,

    /// Unlock password for default/custom keychains
    #[serde(default)]
    pub keychain_password: Option<String>,

    /// Keychain path for the custom mode
    #[serde(default)]
    pub custom_keychain_path: Option<String>,

    /// Replaces the common name read from the certificate
    #[serde(default)]
    pub signing_identity: Option<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            encoded_certificate: String::new(),
            certificate_password: String::new(),
            keychain: default_keychain_mode(),
            keychain_password: None,
            custom_keychain_path: None,
            signing_identity: None,
        }
    }
}

impl InstallConfig {
    /// Load from a TOML file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }

    pub fn keychain_mode(&self) -> Result<KeychainMode> {
        self.keychain.parse()
    }

    /// Custom keychain path with `~` expanded.
    pub fn custom_keychain_path(&self) -> Result<Option<PathBuf>> {
        self.custom_keychain_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| expand_tilde_path(p).map(PathBuf::from))
            .transpose()
    }

    /// Keychain password, treating blank as absent.
    #[must_use]
    pub fn keychain_password(&self) -> Option<&str> {
        self.keychain_password.as_deref().filter(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for InstallConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallConfig")
            .field("encoded_certificate", &"<hidden>")
            .field("certificate_password", &"<hidden>")
            .field("keychain", &self.keychain)
            .field("keychain_password", &self.keychain_password.as_ref().map(|_| "<hidden>"))
            .field("custom_keychain_path", &self.custom_keychain_path)
            .field("signing_identity", &self.signing_identity)
            .finish()
    }
}

/// Inputs for the teardown step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CleanupConfig {
    /// Also delete the provisioning profile recorded at install time
    #[serde(default)]
    pub remove_profile: bool,

    /// Also delete the certificate from a default/custom keychain
    #[serde(default)]
    pub delete_certificate: bool,

    /// Temp keychain to delete when no state file was recorded
    #[serde(default)]
    pub keychain_path: Option<PathBuf>,
}

/// Facts about the machine the job runs on.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    /// `std::env::consts::OS` of the host
    pub os: String,
    /// Runner temp directory; holds the temp keychain and scratch files
    pub temp_dir: PathBuf,
    /// Where install records what teardown must undo
    pub state_file: PathBuf,
}

impl HostEnvironment {
    /// Detect from the process environment.
    ///
    /// The temp directory is `RUNNER_TEMP` (GitHub Actions), then
    /// `AGENT_TEMPDIRECTORY` (Azure Pipelines), then the OS temp dir.
    #[must_use]
    pub fn detect() -> Self {
        let temp_dir = ["RUNNER_TEMP", "AGENT_TEMPDIRECTORY"]
            .iter()
            .filter_map(|name| std::env::var_os(name))
            .map(PathBuf::from)
            .find(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(std::env::temp_dir);

        Self::new(std::env::consts::OS, temp_dir)
    }

    #[must_use]
    pub fn new(os: &str, temp_dir: PathBuf) -> Self {
        let state_file = temp_dir.join(STATE_FILE_NAME);
        Self {
            os: os.to_string(),
            temp_dir,
            state_file,
        }
    }

    #[must_use]
    pub fn with_state_file(mut self, state_file: PathBuf) -> Self {
        self.state_file = state_file;
        self
    }

    #[must_use]
    pub fn is_macos(&self) -> bool {
        self.os == REQUIRED_OS
    }

    /// Fail with [`KeychainError::UnsupportedPlatform`] off macOS.
    pub fn require_macos(&self) -> Result<()> {
        if self.is_macos() {
            Ok(())
        } else {
            Err(KeychainError::UnsupportedPlatform(format!(
                "keychain installation requires macOS, this host is {}",
                self.os
            )))
        }
    }

    #[must_use]
    pub fn temp_keychain_path(&self) -> PathBuf {
        self.temp_dir.join(TEMP_KEYCHAIN_NAME)
    }
}

/// Expand tilde in path, returning error if HOME is not set
pub fn expand_tilde_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path).to_string();

    // When HOME is unset, shellexpand leaves ~ unchanged
    if path.starts_with('~') && expanded.starts_with('~') {
        return Err(KeychainError::InvalidConfig(format!(
            "Could not expand ~ in {path} (HOME environment variable not set). \
             Please use an absolute path instead."
        )));
    }

    Ok(expanded)
}

fn default_keychain_mode() -> String {
    DEFAULT_KEYCHAIN_MODE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keychain_mode_parses_known_values() {
        assert_eq!("temp".parse::<KeychainMode>().unwrap(), KeychainMode::Temp);
        assert_eq!(" Default ".parse::<KeychainMode>().unwrap(), KeychainMode::Default);
        assert_eq!("custom".parse::<KeychainMode>().unwrap(), KeychainMode::Custom);
        assert!(matches!(
            "login".parse::<KeychainMode>(),
            Err(KeychainError::InvalidConfig(_))
        ));
    }

    #[test]
    fn toml_config_uses_kebab_case_and_defaults() {
        let config: InstallConfig = toml::from_str(
            r#"
            encoded-certificate = "cDEy"
            certificate-password = "pw"
            custom-keychain-path = "/tmp/ci.keychain"
            "#,
        )
        .unwrap();
        assert_eq!(config.keychain, "temp");
        assert_eq!(config.encoded_certificate, "cDEy");
        assert_eq!(
            config.custom_keychain_path().unwrap(),
            Some(PathBuf::from("/tmp/ci.keychain"))
        );
        assert_eq!(config.keychain_password(), None);
    }

    #[test]
    fn debug_hides_secrets() {
        let config = InstallConfig {
            encoded_certificate: "c2VjcmV0".to_string(),
            certificate_password: "p12-secret".to_string(),
            keychain_password: Some("kc-secret".to_string()),
            ..InstallConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(!rendered.contains("p12-secret"));
        assert!(!rendered.contains("kc-secret"));
    }

    #[test]
    fn host_paths_live_in_temp_dir() {
        let host = HostEnvironment::new("macos", PathBuf::from("/runner/tmp"));
        assert!(host.is_macos());
        assert_eq!(
            host.temp_keychain_path(),
            PathBuf::from("/runner/tmp/ios_signing_temp.keychain")
        );
        assert_eq!(
            host.state_file,
            PathBuf::from("/runner/tmp/kodegen-keychain-state.json")
        );
    }

    #[test]
    fn wrong_platform_is_reported() {
        let host = HostEnvironment::new("linux", PathBuf::from("/tmp"));
        assert!(matches!(
            host.require_macos(),
            Err(KeychainError::UnsupportedPlatform(_))
        ));
    }
}
