//! PKCS#12 bundle decoding and X.509 inspection via `openssl`

use crate::error::{KeychainError, Result};
use crate::extract;
use crate::tool::{OPENSSL, Stream, ToolRunner, path_arg};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// A decoded PKCS#12 file on scratch storage.
pub struct CertificateBundle {
    path: PathBuf,
    password: Zeroizing<String>,
}

impl CertificateBundle {
    /// Decode a BASE64 PKCS#12 secret into `dir/certificate.p12`.
    ///
    /// Whitespace inside the payload (line-wrapped secrets) is ignored.
    pub async fn decode(encoded: &str, password: &str, dir: &Path) -> Result<Self> {
        let compact: Zeroizing<String> =
            Zeroizing::new(encoded.chars().filter(|c| !c.is_whitespace()).collect());
        let bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?,
        );
        if bytes.is_empty() {
            return Err(KeychainError::InvalidCertificate(
                "decoded certificate is empty".to_string(),
            ));
        }

        let path = dir.join("certificate.p12");
        tokio::fs::write(&path, bytes.as_slice()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(Self::from_file(path, password))
    }

    /// Wrap an existing PKCS#12 file.
    #[must_use]
    pub fn from_file(path: PathBuf, password: &str) -> Self {
        Self {
            path,
            password: Zeroizing::new(password.to_string()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    fn passin(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("pass:{}", self.password.as_str()))
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("path", &self.path)
            .field("password", &"<hidden>")
            .finish()
    }
}

/// Facts read from the bundle's certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateProperties {
    /// SHA-1 fingerprint, hex without separators
    pub fingerprint: String,
    pub common_name: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl CertificateProperties {
    /// Parse `openssl x509 -noout -fingerprint -subject -dates` output.
    #[must_use]
    pub fn parse(x509_output: &str) -> Self {
        let mut props = Self::default();
        for line in x509_output.lines() {
            let Some((key, value)) = extract::split_key_value(line) else {
                continue;
            };
            match key.trim() {
                k if k.eq_ignore_ascii_case("sha1 fingerprint") => {
                    props.fingerprint = extract::normalize_fingerprint(value);
                }
                "subject" => props.common_name = extract::common_name(value).unwrap_or_default(),
                "notBefore" => props.not_before = extract::parse_date(value),
                "notAfter" => props.not_after = extract::parse_date(value),
                _ => {}
            }
        }
        props
    }

    /// Replace the extracted common name when an override is supplied.
    #[must_use]
    pub fn with_common_name_override(mut self, common_name: Option<&str>) -> Self {
        if let Some(cn) = common_name.map(str::trim).filter(|cn| !cn.is_empty()) {
            self.common_name = cn.to_string();
        }
        self
    }

    /// Require a fingerprint, a common name, and `now` inside the validity window.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.fingerprint.is_empty() || self.common_name.is_empty() {
            return Err(KeychainError::InvalidCertificate(
                "SHA-1 fingerprint or common name could not be read from the certificate"
                    .to_string(),
            ));
        }

        let (Some(not_before), Some(not_after)) = (self.not_before, self.not_after) else {
            return Err(KeychainError::CertificateDates(
                "validity dates could not be parsed".to_string(),
            ));
        };

        if now < not_before {
            return Err(KeychainError::CertificateDates(format!(
                "certificate is not valid before {not_before}"
            )));
        }
        if now > not_after {
            return Err(KeychainError::CertificateDates(format!(
                "certificate expired on {not_after}"
            )));
        }

        Ok(())
    }
}

/// Read fingerprint, subject and validity window from the bundle.
///
/// The intermediate PEM is written to `scratch` and removed afterwards.
pub async fn read_properties<R: ToolRunner>(
    runner: &R,
    bundle: &CertificateBundle,
    scratch: &Path,
) -> Result<CertificateProperties> {
    let pem = scratch.join("certificate.pem");
    let passin = bundle.passin();

    let result = async {
        runner
            .run(
                OPENSSL,
                &[
                    "pkcs12",
                    "-in",
                    path_arg(bundle.path())?,
                    "-out",
                    path_arg(&pem)?,
                    "-nokeys",
                    "-passin",
                    passin.as_str(),
                ],
            )
            .await?;

        let output = runner
            .run(
                OPENSSL,
                &[
                    "x509",
                    "-in",
                    path_arg(&pem)?,
                    "-noout",
                    "-fingerprint",
                    "-subject",
                    "-dates",
                ],
            )
            .await?;

        Ok::<_, KeychainError>(CertificateProperties::parse(&output.stdout))
    }
    .await;

    crate::cleanup_path(&pem, "certificate PEM").await;
    result
}

/// Friendly name of the bundle's private key.
///
/// The key itself is streamed past and never buffered; only `friendlyName`
/// lines are inspected.
pub async fn private_key_name<R: ToolRunner>(
    runner: &R,
    bundle: &CertificateBundle,
) -> Result<String> {
    let passin = bundle.passin();
    let passout = Zeroizing::new(format!(
        "pass:{}",
        Alphanumeric.sample_string(&mut rand::rng(), 32)
    ));

    let mut name = None;
    runner
        .run_streaming(
            OPENSSL,
            &[
                "pkcs12",
                "-in",
                path_arg(bundle.path())?,
                "-nocerts",
                "-passin",
                passin.as_str(),
                "-passout",
                passout.as_str(),
            ],
            &mut |line| {
                if name.is_none() && line.stream == Stream::Stdout {
                    name = extract::friendly_name(line.text);
                }
            },
        )
        .await?;

    name.ok_or_else(|| {
        KeychainError::InvalidCertificate("private key friendly name not found".to_string())
    })
}
