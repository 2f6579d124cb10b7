//! Sanitization, validation and redaction applied wherever untrusted text
//! crosses into or out of an agent session.
//!
//! Every function here is infallible: bad input degrades to a safe value
//! (a fallback name, `false`, an empty findings list) instead of an error.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Replacement written in place of every detected secret.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Appended to text cut by [`check_size_limit`]. Its own bytes are not
/// counted against the budget.
pub const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED: exceeded size limit]";

const MAX_FILENAME_CHARS: usize = 255;

// ── Filenames ─────────────────────────────────────────────────────────────

/// Turn an externally supplied attachment name into a single safe path
/// component.
///
/// Traversal sequences, drive prefixes, separators and control characters
/// are removed. If nothing meaningful survives, the result is
/// `attachment_<12 hex>` derived from a SHA-256 of the unsanitized name, so the
/// same hostile name always maps to the same file.
pub fn sanitize_filename(name: &str) -> String {
    let mut s = name.to_string();
    while s.contains("../") || s.contains("..\\") {
        s = s.replace("../", "").replace("..\\", "");
    }

    let flattened: String = s
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && !is_control(*c))
        .collect();
    // Stacked prefixes such as `C:\C:\x` are now `C:C:x`.
    let mut rest = flattened.as_str();
    while let Some(stripped) = strip_drive_prefix(rest) {
        rest = stripped;
    }

    let mut sanitized: String = rest.chars().take(MAX_FILENAME_CHARS).collect();
    if sanitized.chars().all(|c| c == '.') {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        sanitized = format!("attachment_{}", &digest[..12]);
    }
    sanitized
}

fn strip_drive_prefix(s: &str) -> Option<&str> {
    let b = s.as_bytes();
    (b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':').then(|| &s[2..])
}

fn is_control(c: char) -> bool {
    c < '\u{20}' || c == '\u{7f}'
}

// ── Task content ──────────────────────────────────────────────────────────

/// Strip control characters from ticket text before it reaches a prompt.
/// Newline, carriage return and tab are kept; everything printable,
/// including multi-byte scripts, passes through untouched.
pub fn sanitize_task_content(text: &str) -> String {
    text.chars()
        .filter(|c| matches!(c, '\n' | '\r' | '\t') || !is_control(*c))
        .collect()
}

/// A task identifier is 5 to 25 ASCII digits and nothing else.
pub fn validate_task_id(task_id: &str) -> bool {
    (5..=25).contains(&task_id.len()) && task_id.bytes().all(|b| b.is_ascii_digit())
}

// ── Secrets ───────────────────────────────────────────────────────────────

/// Classification attached to a [`SecretFinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    AwsAccessKey,
    SlackToken,
    GithubToken,
    GithubPat,
    PrivateKey,
    Jwt,
    ConnectionString,
    GenericKey,
    GenericToken,
    GenericSecret,
}

impl SecretKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::AwsAccessKey => "aws_access_key",
            Self::SlackToken => "slack_token",
            Self::GithubToken => "github_token",
            Self::GithubPat => "github_pat",
            Self::PrivateKey => "private_key",
            Self::Jwt => "jwt",
            Self::ConnectionString => "connection_string",
            Self::GenericKey => "generic_key",
            Self::GenericToken => "generic_token",
            Self::GenericSecret => "generic_secret",
        }
    }
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One secret-shaped substring found by [`scan_for_secrets`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretFinding {
    pub kind: SecretKind,
    pub matched: String,
    /// Byte offset of the match in the scanned text.
    pub offset: usize,
}

static SECRET_PATTERNS: LazyLock<Vec<(SecretKind, Regex)>> = LazyLock::new(|| {
    [
        (SecretKind::AwsAccessKey, r"AKIA[0-9A-Z]{16}"),
        (SecretKind::SlackToken, r"xox[bpas]-[0-9a-zA-Z-]+"),
        (SecretKind::GithubToken, r"gh[ps]_[a-zA-Z0-9]{36,}"),
        (SecretKind::GithubPat, r"github_pat_[a-zA-Z0-9_]{20,}"),
        (
            SecretKind::PrivateKey,
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
        ),
        (
            SecretKind::Jwt,
            r"eyJ[a-zA-Z0-9_-]{10,}\.eyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}",
        ),
        (
            SecretKind::ConnectionString,
            r"(?:mongodb(?:\+srv)?|postgres(?:ql)?|mysql|redis)://\S+",
        ),
        (
            SecretKind::GenericKey,
            r#"(?i)(?:api[_-]?key|api[_-]?secret|access[_-]?key)\s*[=:]\s*['"]?[a-zA-Z0-9_-]{20,}"#,
        ),
        (
            SecretKind::GenericToken,
            r#"(?i)(?:token|bearer)\s*[=:]\s*['"]?[a-zA-Z0-9_.-]{20,}"#,
        ),
        (
            SecretKind::GenericSecret,
            r#"(?i)(?:secret|password|passwd)\s*[=:]\s*['"]?[^\s'"]{8,}"#,
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| match Regex::new(pattern) {
        Ok(re) => Some((kind, re)),
        Err(e) => {
            warn!(kind = %kind, "secret pattern failed to compile: {e}");
            None
        }
    })
    .collect()
});

/// Scan `text` with every secret pattern independently.
///
/// Matches of different classes may overlap and are all reported. The result
/// is ordered by byte offset, then by pattern order for ties.
pub fn scan_for_secrets(text: &str) -> Vec<SecretFinding> {
    let mut findings: Vec<SecretFinding> = SECRET_PATTERNS
        .iter()
        .flat_map(|(kind, re)| {
            re.find_iter(text).map(move |m| SecretFinding {
                kind: *kind,
                matched: m.as_str().to_string(),
                offset: m.start(),
            })
        })
        .collect();
    findings.sort_by_key(|f| f.offset);
    findings
}

/// Replace every detected secret with [`REDACTION_MARKER`].
///
/// Overlapping matches are merged into one span before replacement, so each
/// byte of every original match is covered exactly once. Returns the input
/// borrowed when nothing was found. Logs a single aggregated warning.
pub fn redact_secrets(text: &str) -> Cow<'_, str> {
    let findings = scan_for_secrets(text);
    if findings.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut spans: Vec<(usize, usize)> = findings
        .iter()
        .map(|f| (f.offset, f.offset + f.matched.len()))
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut redacted = text.to_string();
    for (start, end) in merged.into_iter().rev() {
        redacted.replace_range(start..end, REDACTION_MARKER);
    }

    let kinds: BTreeSet<&str> = findings.iter().map(|f| f.kind.label()).collect();
    let kinds = kinds.into_iter().collect::<Vec<_>>().join(", ");
    warn!(
        count = findings.len(),
        "Redacted {} secret(s) of types: {}",
        findings.len(),
        kinds
    );

    Cow::Owned(redacted)
}

// ── Size ──────────────────────────────────────────────────────────────────

/// Cap `text` at `max_bytes` of UTF-8. Text within budget is returned as is;
/// longer text is cut back to the nearest character boundary and gets
/// [`TRUNCATION_MARKER`] appended.
pub fn check_size_limit(text: &str, max_bytes: usize) -> Cow<'_, str> {
    if text.len() <= max_bytes {
        return Cow::Borrowed(text);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + TRUNCATION_MARKER.len());
    out.push_str(&text[..end]);
    out.push_str(TRUNCATION_MARKER);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_prefix_is_letter_and_colon() {
        assert_eq!(strip_drive_prefix("C:x"), Some("x"));
        assert_eq!(strip_drive_prefix("d:"), Some(""));
        assert_eq!(strip_drive_prefix("1:x"), None);
        assert_eq!(strip_drive_prefix("x"), None);
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(SECRET_PATTERNS.len(), 10);
    }

    #[test]
    fn size_limit_never_splits_a_character() {
        // "é" is two bytes; a budget of 3 lands inside the second one.
        let out = check_size_limit("éé", 3);
        assert_eq!(out, format!("é{TRUNCATION_MARKER}"));
    }
}
