//! Provisioning profile inspection and installation
//!
//! Profiles are CMS-signed property lists. `security cms -D` strips the
//! signature and `PlistBuddy` reads individual keys from the decoded plist.

use crate::config::HostEnvironment;
use crate::error::{KeychainError, Result};
use crate::extract::plist_bool;
use crate::state::JobState;
use crate::tool::{PLIST_BUDDY, SECURITY, ToolRunner, path_arg};
use std::path::{Path, PathBuf};

const PROFILES_SUBDIR: &str = "Library/MobileDevice/Provisioning Profiles";

/// Platform a profile targets, decided by its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePlatform {
    Ios,
    MacOs,
}

impl ProfilePlatform {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("mobileprovision") => Ok(Self::Ios),
            Some("provisionprofile") => Ok(Self::MacOs),
            _ => Err(KeychainError::InvalidConfig(format!(
                "{} is not a .mobileprovision or .provisionprofile file",
                path.display()
            ))),
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ios => "mobileprovision",
            Self::MacOs => "provisionprofile",
        }
    }
}

/// Distribution method a profile allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Development,
    AdHoc,
    AppStore,
    Enterprise,
    DeveloperId,
}

impl ProfileType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::AdHoc => "ad-hoc",
            Self::AppStore => "app-store",
            Self::Enterprise => "enterprise",
            Self::DeveloperId => "developer-id",
        }
    }

    /// Whether the profile is used for distribution builds.
    #[must_use]
    pub fn is_distribution(&self) -> bool {
        matches!(self, Self::AppStore | Self::Enterprise | Self::DeveloperId)
    }
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// iCloud container environment a build must request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudEnvironment {
    Development,
    Production,
}

/// Raw plist facts used for classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileFlags {
    pub provisions_all_devices: bool,
    pub get_task_allow: bool,
    pub has_provisioned_devices: bool,
    pub has_cloud_container_environment: bool,
}

impl ProfileFlags {
    #[must_use]
    pub fn classify(&self, platform: ProfilePlatform) -> ProfileType {
        match platform {
            ProfilePlatform::Ios if self.provisions_all_devices => ProfileType::Enterprise,
            ProfilePlatform::Ios if self.get_task_allow => ProfileType::Development,
            ProfilePlatform::Ios if self.has_provisioned_devices => ProfileType::AdHoc,
            ProfilePlatform::Ios => ProfileType::AppStore,
            ProfilePlatform::MacOs if self.provisions_all_devices => ProfileType::DeveloperId,
            ProfilePlatform::MacOs if self.has_provisioned_devices => ProfileType::Development,
            ProfilePlatform::MacOs => ProfileType::AppStore,
        }
    }

    #[must_use]
    pub fn cloud_environment(&self, profile_type: ProfileType) -> Option<CloudEnvironment> {
        if !self.has_cloud_container_environment {
            return None;
        }
        Some(if profile_type.is_distribution() {
            CloudEnvironment::Production
        } else {
            CloudEnvironment::Development
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningProfile {
    pub path: PathBuf,
    pub uuid: String,
    pub name: Option<String>,
    pub platform: ProfilePlatform,
    pub profile_type: ProfileType,
    pub cloud_environment: Option<CloudEnvironment>,
}

/// Decode the profile at `path` and read its identifying fields.
///
/// The decoded plist is written to `scratch` and removed afterwards.
pub async fn inspect<R: ToolRunner>(
    runner: &R,
    path: &Path,
    scratch: &Path,
) -> Result<ProvisioningProfile> {
    let platform = ProfilePlatform::from_path(path)?;
    let plist = scratch.join("profile.plist");

    let result = async {
        let decoded = runner
            .run(SECURITY, &["cms", "-D", "-i", path_arg(path)?])
            .await?;
        tokio::fs::write(&plist, decoded.stdout.as_bytes()).await?;

        let uuid = print_key(runner, &plist, "UUID")
            .await?
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| {
                KeychainError::InvalidConfig(format!("{} has no UUID", path.display()))
            })?;
        let name = print_key(runner, &plist, "Name").await?;

        let flags = ProfileFlags {
            provisions_all_devices: print_key(runner, &plist, "ProvisionsAllDevices")
                .await?
                .is_some_and(|v| plist_bool(&v)),
            get_task_allow: print_key(runner, &plist, "Entitlements:get-task-allow")
                .await?
                .is_some_and(|v| plist_bool(&v)),
            has_provisioned_devices: print_key(runner, &plist, "ProvisionedDevices")
                .await?
                .is_some(),
            has_cloud_container_environment: print_key(
                runner,
                &plist,
                "Entitlements:com.apple.developer.icloud-container-environment",
            )
            .await?
            .is_some(),
        };
        let profile_type = flags.classify(platform);

        Ok::<_, KeychainError>(ProvisioningProfile {
            path: path.to_path_buf(),
            uuid,
            name,
            platform,
            profile_type,
            cloud_environment: flags.cloud_environment(profile_type),
        })
    }
    .await;

    crate::cleanup_path(&plist, "decoded profile").await;
    result
}

/// `PlistBuddy -c 'Print <key>'`; a missing key reads as `None`.
async fn print_key<R: ToolRunner>(runner: &R, plist: &Path, key: &str) -> Result<Option<String>> {
    let command = format!("Print {key}");
    match runner
        .run(PLIST_BUDDY, &["-c", &command, path_arg(plist)?])
        .await
    {
        Ok(output) => Ok(Some(output.stdout.trim().to_string())),
        Err(KeychainError::ToolFailed { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Directory Xcode reads installed profiles from.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// `~/Library/MobileDevice/Provisioning Profiles`
    pub fn user_default() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            KeychainError::InvalidConfig("could not determine home directory".to_string())
        })?;
        Ok(Self::new(home.join(PROFILES_SUBDIR)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy the profile in as `<UUID>.<ext>`, replacing any earlier copy.
    pub async fn install(&self, profile: &ProvisioningProfile) -> Result<PathBuf> {
        validate_uuid(&profile.uuid)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self
            .dir
            .join(format!("{}.{}", profile.uuid, profile.platform.extension()));
        tokio::fs::copy(&profile.path, &target).await?;
        crate::debug!("Installed profile {} at {}", profile.uuid, target.display());
        Ok(target)
    }

    /// Remove every installed file whose name starts with `uuid`.
    pub async fn delete(&self, uuid: &str) -> Result<usize> {
        validate_uuid(uuid)?;
        let pattern = format!(
            "{}/{uuid}*",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let matches = glob::glob(&pattern)
            .map_err(|e| KeychainError::InvalidConfig(format!("bad profile pattern: {e}")))?;

        let mut removed = 0;
        for entry in matches {
            let path = entry.map_err(|e| KeychainError::Io(e.into_error()))?;
            tokio::fs::remove_file(&path).await?;
            crate::debug!("Removed profile {}", path.display());
            removed += 1;
        }
        Ok(removed)
    }
}

fn validate_uuid(uuid: &str) -> Result<()> {
    if uuid.is_empty() || !uuid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(KeychainError::InvalidConfig(format!(
            "'{uuid}' is not a provisioning profile UUID"
        )));
    }
    Ok(())
}

/// Inspect and install a profile, recording its UUID for teardown.
pub async fn install_profile<R: ToolRunner>(
    runner: &R,
    host: &HostEnvironment,
    store: &ProfileStore,
    path: &Path,
) -> Result<ProvisioningProfile> {
    host.require_macos()?;

    let scratch = tempfile::Builder::new()
        .prefix("kodegen-profile-")
        .tempdir_in(&host.temp_dir)?;
    let profile = inspect(runner, path, scratch.path()).await?;
    store.install(&profile).await?;

    JobState::update(&host.state_file, |state| {
        state.profile_uuid = Some(profile.uuid.clone());
    })
    .await?;

    Ok(profile)
}
