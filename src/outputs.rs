//! Publishing results to later CI steps
//!
//! GitHub Actions reads step-to-step variables from the file named by
//! `GITHUB_ENV`; Azure Pipelines parses `##vso[...]` commands from stdout.
//! Elsewhere variables are printed as `NAME=value` lines.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

pub const SHA1_VAR: &str = "APPLE_CERTIFICATE_SHA1HASH";
pub const SIGNING_IDENTITY_VAR: &str = "APPLE_CERTIFICATE_SIGNING_IDENTITY";
pub const KEYCHAIN_VAR: &str = "APPLE_CERTIFICATE_KEYCHAIN";
pub const LEGACY_SIGNING_IDENTITY_VAR: &str = "signingIdentity";
pub const LEGACY_KEYCHAIN_VAR: &str = "keychainPath";
pub const KEYCHAIN_PASSWORD_VAR: &str = "keychainPassword";
pub const PROFILE_UUID_VAR: &str = "APPLE_PROV_PROFILE_UUID";
pub const PROFILE_NAME_VAR: &str = "APPLE_PROV_PROFILE_NAME";

/// CI system the process runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiHost {
    GitHubActions { env_file: Option<PathBuf> },
    AzurePipelines,
    Generic,
}

impl CiHost {
    #[must_use]
    pub fn detect() -> Self {
        if std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true") {
            return Self::GitHubActions {
                env_file: std::env::var_os("GITHUB_ENV").map(PathBuf::from),
            };
        }
        if std::env::var("TF_BUILD").is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
            return Self::AzurePipelines;
        }
        Self::Generic
    }
}

/// A variable exported for later steps.
#[derive(Clone)]
pub struct ExportedVariable {
    pub name: &'static str,
    pub value: Zeroizing<String>,
    pub secret: bool,
}

impl ExportedVariable {
    fn new(name: &'static str, value: &str, secret: bool) -> Self {
        Self {
            name,
            value: Zeroizing::new(value.to_string()),
            secret,
        }
    }
}

impl std::fmt::Debug for ExportedVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value: &str = if self.secret { "<hidden>" } else { &self.value };
        f.debug_struct("ExportedVariable")
            .field("name", &self.name)
            .field("value", &value)
            .field("secret", &self.secret)
            .finish()
    }
}

/// What a successful install hands to later steps.
#[derive(Clone)]
pub struct InstallOutputs {
    pub sha1: String,
    pub signing_identity: String,
    pub keychain_path: PathBuf,
    /// Only set for temp keychains; a caller-supplied password is never echoed
    pub keychain_password: Option<Zeroizing<String>>,
}

impl InstallOutputs {
    #[must_use]
    pub fn variables(&self) -> Vec<ExportedVariable> {
        let keychain = self.keychain_path.to_string_lossy();
        let mut vars = vec![
            ExportedVariable::new(SHA1_VAR, &self.sha1, false),
            ExportedVariable::new(SIGNING_IDENTITY_VAR, &self.signing_identity, false),
            ExportedVariable::new(KEYCHAIN_VAR, &keychain, false),
            ExportedVariable::new(LEGACY_SIGNING_IDENTITY_VAR, &self.signing_identity, false),
            ExportedVariable::new(LEGACY_KEYCHAIN_VAR, &keychain, false),
        ];
        if let Some(password) = &self.keychain_password {
            vars.push(ExportedVariable::new(KEYCHAIN_PASSWORD_VAR, password, true));
        }
        vars
    }
}

impl std::fmt::Debug for InstallOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallOutputs")
            .field("sha1", &self.sha1)
            .field("signing_identity", &self.signing_identity)
            .field("keychain_path", &self.keychain_path)
            .field("keychain_password", &self.keychain_password.as_ref().map(|_| "<hidden>"))
            .finish()
    }
}

/// Variables describing an installed provisioning profile.
#[must_use]
pub fn profile_variables(uuid: &str, name: Option<&str>) -> Vec<ExportedVariable> {
    let mut vars = vec![ExportedVariable::new(PROFILE_UUID_VAR, uuid, false)];
    if let Some(name) = name {
        vars.push(ExportedVariable::new(PROFILE_NAME_VAR, name, false));
    }
    vars
}

/// Publish `vars` for later steps, writing log commands to `out`.
pub fn publish<W: Write>(host: &CiHost, vars: &[ExportedVariable], out: &mut W) -> Result<()> {
    match host {
        CiHost::GitHubActions { env_file } => {
            for var in vars.iter().filter(|v| v.secret) {
                writeln!(out, "::add-mask::{}", var.value.as_str())?;
            }
            match env_file {
                Some(path) => append_env_file(path, vars)?,
                None => write_plain(vars, out)?,
            }
        }
        CiHost::AzurePipelines => {
            for var in vars {
                let secret = if var.secret { ";issecret=true" } else { "" };
                writeln!(
                    out,
                    "##vso[task.setvariable variable={}{secret}]{}",
                    var.name,
                    var.value.as_str()
                )?;
            }
        }
        CiHost::Generic => write_plain(vars, out)?,
    }
    Ok(())
}

/// Mark the CI task failed with `message`.
pub fn report_failure<W: Write>(host: &CiHost, message: &str, out: &mut W) -> Result<()> {
    let message = message.replace('\n', " ");
    match host {
        CiHost::GitHubActions { .. } => writeln!(out, "::error::{message}")?,
        CiHost::AzurePipelines => {
            writeln!(out, "##vso[task.logissue type=error]{message}")?;
            writeln!(out, "##vso[task.complete result=Failed;]{message}")?;
        }
        CiHost::Generic => {}
    }
    Ok(())
}

/// Report a non-fatal problem in the CI host's warning format.
pub fn report_warning<W: Write>(host: &CiHost, message: &str, out: &mut W) -> Result<()> {
    let message = message.replace('\n', " ");
    match host {
        CiHost::GitHubActions { .. } => writeln!(out, "::warning::{message}")?,
        CiHost::AzurePipelines => writeln!(out, "##vso[task.logissue type=warning]{message}")?,
        CiHost::Generic => {}
    }
    Ok(())
}

fn append_env_file(path: &Path, vars: &[ExportedVariable]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for var in vars {
        writeln!(file, "{}={}", var.name, var.value.as_str())?;
    }
    Ok(())
}

fn write_plain<W: Write>(vars: &[ExportedVariable], out: &mut W) -> Result<()> {
    for var in vars {
        if var.secret {
            writeln!(out, "{}=<hidden>", var.name)?;
        } else {
            writeln!(out, "{}={}", var.name, var.value.as_str())?;
        }
    }
    Ok(())
}
