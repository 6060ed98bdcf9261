//! Native tool invocation
//!
//! Every interaction with `security`, `openssl` and `PlistBuddy` goes through
//! [`ToolRunner`]. The production implementation spawns real processes; tests
//! substitute a scripted fake.

use crate::error::{KeychainError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[cfg(test)]
pub(crate) mod fake;

/// macOS certificate and keychain utility
pub const SECURITY: &str = "security";

/// TLS toolkit used to inspect PKCS#12 bundles
pub const OPENSSL: &str = "openssl";

/// Property list editor shipped with macOS
pub const PLIST_BUDDY: &str = "/usr/libexec/PlistBuddy";

/// Arguments following any of these flags are secrets and never logged.
const SECRET_FLAGS: [&str; 3] = ["-p", "-P", "-k"];

/// Captured output of a finished tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

/// Which stream a streamed line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A single line delivered to a streaming sink.
#[derive(Debug, Clone, Copy)]
pub struct OutputLine<'a> {
    pub stream: Stream,
    pub text: &'a str,
}

#[trait_variant::make(Send)]
pub trait ToolRunner: Send + Sync {
    /// Run `tool` to completion, buffering stdout and stderr.
    ///
    /// A non-zero exit is returned as [`KeychainError::ToolFailed`].
    async fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput>;

    /// Run `tool`, delivering each stdout/stderr line to `sink` as it arrives.
    ///
    /// Nothing is buffered apart from stderr, which is kept so that a
    /// non-zero exit can still report it.
    async fn run_streaming(
        &self,
        tool: &str,
        args: &[&str],
        sink: &mut (dyn FnMut(OutputLine<'_>) + Send),
    ) -> Result<()>;
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Locate `tool` on `PATH` (or verify it when given as an absolute path).
    pub fn locate(tool: &str) -> Result<PathBuf> {
        which::which(tool).map_err(|e| KeychainError::ToolNotFound(format!("{tool}: {e}")))
    }

    fn command(tool: &str, args: &[&str]) -> Result<tokio::process::Command> {
        let program = Self::locate(tool)?;
        crate::debug!("{} {}", tool, display_args(args));

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl ToolRunner for SystemToolRunner {
    async fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput> {
        let output = Self::command(tool, args)?
            .output()
            .await
            .map_err(|e| spawn_error(tool, e))?;

        let result = ToolOutput {
            stdout: decode_output(&output.stdout),
            stderr: decode_output(&output.stderr),
            code: output.status.code(),
        };

        if !output.status.success() {
            return Err(tool_failed(tool, args, &result.stderr));
        }

        Ok(result)
    }

    async fn run_streaming(
        &self,
        tool: &str,
        args: &[&str],
        sink: &mut (dyn FnMut(OutputLine<'_>) + Send),
    ) -> Result<()> {
        let mut child = Self::command(tool, args)?
            .spawn()
            .map_err(|e| spawn_error(tool, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KeychainError::Other(anyhow::anyhow!("{tool}: stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KeychainError::Other(anyhow::anyhow!("{tool}: stderr not captured")))?;

        let mut out_reader = BufReader::new(stdout);
        let mut err_reader = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_done = false;
        let mut err_done = false;
        let mut captured_stderr = String::new();

        while !(out_done && err_done) {
            tokio::select! {
                line = next_line(&mut out_reader, &mut out_buf), if !out_done => match line? {
                    Some(text) => sink(OutputLine { stream: Stream::Stdout, text: &text }),
                    None => out_done = true,
                },
                line = next_line(&mut err_reader, &mut err_buf), if !err_done => match line? {
                    Some(text) => {
                        sink(OutputLine { stream: Stream::Stderr, text: &text });
                        captured_stderr.push_str(&text);
                        captured_stderr.push('\n');
                    }
                    None => err_done = true,
                },
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(tool_failed(tool, args, &captured_stderr));
        }

        Ok(())
    }
}

/// Read one line into `buf`, returning it decoded without its line ending.
///
/// Bytes stay in `buf` until a full line (or EOF) arrives, so a read
/// interrupted by `select!` resumes where it stopped.
async fn next_line<B: AsyncBufRead + Unpin>(
    reader: &mut B,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    reader.read_until(b'\n', buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }
    let mut line = decode_output(buf);
    buf.clear();
    while line.ends_with(['\n', '\r']) {
        line.pop();
    }
    Ok(Some(line))
}

/// Decode tool output, reading non-UTF-8 bytes as Latin-1.
///
/// LibreSSL prints BMPString attributes such as `friendlyName` as raw
/// Latin-1 bytes.
fn decode_output(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Convert a path into a tool argument.
pub fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        KeychainError::InvalidConfig(format!("Path is not valid UTF-8: {}", path.display()))
    })
}

/// Render an argument list for logs with secret values masked.
#[must_use]
pub fn display_args(args: &[&str]) -> String {
    let mut rendered = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            rendered.push("***".to_string());
            mask_next = false;
        } else if arg.starts_with("pass:") {
            rendered.push("pass:***".to_string());
        } else {
            mask_next = SECRET_FLAGS.contains(arg);
            rendered.push((*arg).to_string());
        }
    }
    rendered.join(" ")
}

pub(crate) fn tool_failed(tool: &str, args: &[&str], stderr: &str) -> KeychainError {
    KeychainError::ToolFailed {
        tool: tool.to_string(),
        command: args.first().copied().unwrap_or_default().to_string(),
        stderr: stderr.trim().to_string(),
    }
}

fn spawn_error(tool: &str, e: std::io::Error) -> KeychainError {
    if e.kind() == std::io::ErrorKind::NotFound {
        KeychainError::ToolNotFound(tool.to_string())
    } else {
        KeychainError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked_in_logged_args() {
        let args = [
            "import",
            "/tmp/cert.p12",
            "-P",
            "hunter2",
            "-A",
            "-k",
            "/tmp/ios_signing_temp.keychain",
        ];
        assert_eq!(
            display_args(&args),
            "import /tmp/cert.p12 -P *** -A -k ***"
        );
        assert_eq!(
            display_args(&["pkcs12", "-passin", "pass:secret"]),
            "pkcs12 -passin pass:***"
        );
    }

    #[test]
    fn missing_tool_is_distinguishable() {
        let err = SystemToolRunner::locate("kodegen-definitely-not-a-real-tool").unwrap_err();
        assert!(matches!(err, KeychainError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_stdout_and_reports_failures() {
        let runner = SystemToolRunner::new();
        let out = runner.run("sh", &["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.code, Some(0));

        let err = runner
            .run("sh", &["-c", "echo nope >&2; exit 3"])
            .await
            .unwrap_err();
        assert_eq!(err.tool_stderr(), Some("nope"));
    }

    #[test]
    fn latin1_output_is_decoded() {
        assert_eq!(decode_output(b"friendlyName: Jos\xe9"), "friendlyName: José");
        assert_eq!(decode_output("José".as_bytes()), "José");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_survives_non_utf8_lines() {
        let runner = SystemToolRunner::new();
        let mut lines = Vec::new();
        runner
            .run_streaming(
                "sh",
                &["-c", "printf 'Bag Attributes\\n    friendlyName: Jos\\351\\n'"],
                &mut |line| lines.push(line.text.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(lines, ["Bag Attributes", "    friendlyName: José"]);
        assert_eq!(
            crate::extract::friendly_name(&lines[1]).as_deref(),
            Some("José")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_keeps_final_line_without_newline() {
        let runner = SystemToolRunner::new();
        let mut lines = Vec::new();
        runner
            .run_streaming("sh", &["-c", "printf 'a\\r\\nb'"], &mut |line| {
                lines.push(line.text.to_string())
            })
            .await
            .unwrap();
        assert_eq!(lines, ["a", "b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_delivers_lines_per_stream() {
        let runner = SystemToolRunner::new();
        let mut seen = Vec::new();
        runner
            .run_streaming("sh", &["-c", "echo one; echo two >&2; echo three"], &mut |line| {
                seen.push((line.stream, line.text.to_string()));
            })
            .await
            .unwrap();

        let stdout: Vec<_> = seen
            .iter()
            .filter(|(s, _)| *s == Stream::Stdout)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(stdout, ["one", "three"]);
        assert!(seen.contains(&(Stream::Stderr, "two".to_string())));
    }
}
