//! Field extraction from `openssl`, `security` and `PlistBuddy` output
//!
//! These parsers are deliberately lenient: a missing field yields `None`
//! and the caller decides whether that is fatal.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static COMMON_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CN=([^/]+)").unwrap_or_else(|e| panic!("invalid CN pattern: {e}"))
});

// OpenSSL 1.1+ default subject format: `UID = X, CN = Name, OU = Y`
static COMMON_NAME_RFC2253: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|,)\s*CN\s*=\s*([^,]+)").unwrap_or_else(|e| panic!("invalid CN pattern: {e}"))
});

static FRIENDLY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"friendlyName: (.*)")
        .unwrap_or_else(|e| panic!("invalid friendlyName pattern: {e}"))
});

/// Date layouts printed by `openssl x509 -dates` once the zone suffix is removed.
const OPENSSL_DATE_FORMATS: [&str; 2] = ["%b %d %H:%M:%S %Y", "%b %d %H:%M:%S%.f %Y"];

/// Split `key=value` at the first `=` only.
///
/// Values such as certificate subjects (`/CN=.../OU=...`) contain further
/// `=` characters that belong to the value. Lines without `=` yield `None`;
/// a line starting with `=` yields an empty key.
#[must_use]
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
}

/// Strip colon separators and surrounding whitespace from a fingerprint.
#[must_use]
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint.trim().replace(':', "")
}

/// Extract the `CN` component of a subject distinguished name.
#[must_use]
pub fn common_name(subject: &str) -> Option<String> {
    COMMON_NAME
        .captures(subject)
        .or_else(|| COMMON_NAME_RFC2253.captures(subject))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|cn| !cn.is_empty())
}

/// Parse a `notBefore`/`notAfter` style timestamp.
///
/// Accepts OpenSSL's `Nov 13 03:37:42 2018 GMT`, numeric offsets and
/// RFC 2822/3339. Anything else yields `None`.
#[must_use]
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&text, "%b %d %H:%M:%S %Y %z") {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = text
        .strip_suffix(" GMT")
        .or_else(|| text.strip_suffix(" UTC"))
        .or_else(|| text.strip_suffix('Z'))?;
    OPENSSL_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Extract the private key's friendly name from an `openssl pkcs12` bag line.
#[must_use]
pub fn friendly_name(line: &str) -> Option<String> {
    FRIENDLY_NAME
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Interpret a `PlistBuddy -c 'Print <Key>'` result as a boolean.
#[must_use]
pub fn plist_bool(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("true")
}

/// Return the first double-quoted string on a line.
#[must_use]
pub fn first_quoted(line: &str) -> Option<&str> {
    let start = line.find('"')?;
    let rest = &line[start + 1..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Parse `security list-keychains` / `default-keychain` output.
///
/// Entries are separated by newlines (or other control characters); each is
/// trimmed and stripped of its surrounding quotes. Paths may contain spaces.
#[must_use]
pub fn keychain_list(output: &str) -> Vec<String> {
    output
        .split(char::is_control)
        .map(|entry| entry.trim().replace('"', ""))
        .filter(|entry| !entry.is_empty())
        .collect()
}
