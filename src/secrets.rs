//! C3 — Secret Scanner & Redactor.
//!
//! A fixed table of named credential patterns, each compiled once into a
//! static `regex::Regex` rather than built ad hoc per scan.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

pub const SNIPPET_MAX_LEN: usize = 25;

/// Fallback cap used when a caller has no configured `max_file_size_bytes`
/// (e.g. direct unit-test calls).
pub const DEFAULT_SCAN_SIZE_BYTES: u64 = 1024 * 1024;

struct SecretPattern {
    name: &'static str,
    regex: &'static str,
}

const SECRET_PATTERNS: &[SecretPattern] = &[
    SecretPattern { name: "AWS_ACCESS_KEY", regex: r"\bAKIA[0-9A-Z]{16,}\b" },
    SecretPattern {
        name: "AWS_SECRET_KEY",
        regex: r#"(?i)aws_secret_access_key\s*[=:]\s*["']?([A-Za-z0-9/+=]{40})["']?"#,
    },
    SecretPattern { name: "GITHUB_TOKEN", regex: r"\bghp_[a-zA-Z0-9]{36}\b" },
    SecretPattern { name: "GITHUB_OAUTH", regex: r"\bgho_[a-zA-Z0-9]{36}\b" },
    SecretPattern { name: "GITHUB_APP", regex: r"\b(ghu|ghs)_[a-zA-Z0-9]{36}\b" },
    SecretPattern {
        name: "JWT_TOKEN",
        regex: r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
    },
    SecretPattern {
        name: "SLACK_TOKEN",
        regex: r"\bxox[pbar]-[0-9]{12}-[0-9]{12}-[0-9]{12}-[a-z0-9]{32}",
    },
    SecretPattern { name: "BASIC_AUTH", regex: r"://[^\s]+:[^\s]+@" },
    SecretPattern {
        name: "PASSWORD_ASSIGNMENT",
        regex: r#"password\s*[=:]\s*["'][^"']+["']"#,
    },
    SecretPattern {
        name: "API_KEY_ASSIGNMENT",
        regex: r#"["']?(api[_-]?key|token|secret|private[_-]?key)["']?\s*[=:]\s*["']([a-zA-Z0-9_\-]{16,})["']"#,
    },
    SecretPattern { name: "PRIVATE_KEY_HEADER", regex: r"-----BEGIN [A-Z]+ PRIVATE KEY-----" },
    SecretPattern {
        name: "BEARER_TOKEN",
        regex: r#"["']?Bearer\s+["']?([a-zA-Z0-9_\-.]{20,})["']?"#,
    },
    SecretPattern {
        name: "HEROKU_API_KEY",
        regex: r"[hH][eE][rR][oO][kK][uU]\s*-\s*[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}",
    },
    SecretPattern { name: "FIREBASE_TOKEN", regex: r"\b[0-9]+/[0-9A-Za-z_-]{20,}" },
    SecretPattern { name: "STRIPE_KEY", regex: r"\bsk_(live|test)_[0-9A-Za-z]{24,}\b" },
    SecretPattern {
        name: "SENDGRID_KEY",
        regex: r"\bSG\.[a-zA-Z0-9_-]{20,}\.[a-zA-Z0-9_-]{20,}\b",
    },
    SecretPattern { name: "TWILIO_KEY", regex: r"\bSK[0-9a-fA-F]{32}\b" },
    SecretPattern { name: "MAILGUN_KEY", regex: r"[a-zA-Z0-9_-]{32,}.*mailgun\.com" },
    SecretPattern { name: "DOCKER_AUTH", regex: r"'[a-z0-9]{32,}'" },
];

static COMPILED: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SECRET_PATTERNS
        .iter()
        .map(|p| {
            let re = RegexBuilder::new(p.regex)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("invalid secret pattern {}: {e}", p.name));
            (p.name, re)
        })
        .collect()
});

#[derive(Debug, Clone, Serialize)]
pub struct SecretDetection {
    pub secret_type: &'static str,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SecretScanResult {
    pub has_secrets: bool,
    pub detections: Vec<SecretDetection>,
    pub total_count: usize,
}

/// Non-printable high-bit bytes in the first 1024 bytes flag content as
/// binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    window.iter().any(|&b| b == 0 || (b >= 0x80 && b < 0xA0))
}

/// Truncates to at most `SNIPPET_MAX_LEN` characters total, including the
/// `...` tail when truncated.
fn snippet_of(matched: &str) -> String {
    if matched.chars().count() <= SNIPPET_MAX_LEN {
        return matched.to_string();
    }
    let head: String = matched.chars().take(SNIPPET_MAX_LEN - 3).collect();
    format!("{head}...")
}

/// Scan content line-by-line. Files larger than `max_bytes` or detected as
/// binary are skipped and return an empty, `has_secrets=false` result.
pub fn scan(content: &str, max_bytes: u64) -> SecretScanResult {
    if content.len() as u64 > max_bytes || looks_binary(content.as_bytes()) {
        return SecretScanResult::default();
    }

    let mut detections = Vec::new();
    for (line_idx, line) in content.split('\n').enumerate() {
        for (name, regex) in COMPILED.iter() {
            for m in regex.find_iter(line) {
                detections.push(SecretDetection {
                    secret_type: name,
                    line: line_idx + 1,
                    column: m.start() + 1,
                    snippet: snippet_of(m.as_str()),
                });
            }
        }
    }

    let total_count = detections.len();
    SecretScanResult { has_secrets: total_count > 0, detections, total_count }
}

/// Content-preserving redaction: line count and all non-match bytes are
/// unchanged. Returns the redacted content and the (pre-redaction) scan
/// result so callers can fold the count into `secrets_detected`.
pub fn redact(content: &str, max_bytes: u64) -> (String, SecretScanResult) {
    let result = scan(content, max_bytes);
    if result.total_count == 0 {
        return (content.to_string(), result);
    }

    let mut redacted_lines: Vec<String> = Vec::new();
    for line in content.split('\n') {
        let mut redacted_line = line.to_string();
        for (name, regex) in COMPILED.iter() {
            let placeholder = format!("[REDACTED_{name}]");
            redacted_line = regex.replace_all(&redacted_line, placeholder.as_str()).into_owned();
        }
        redacted_lines.push(redacted_line);
    }

    (redacted_lines.join("\n"), result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_aws_access_key() {
        let result = scan("AWS_KEY=AKIA1234567890ABCDEF\n", DEFAULT_SCAN_SIZE_BYTES);
        assert!(result.has_secrets);
        assert!(result.detections.iter().any(|d| d.secret_type == "AWS_ACCESS_KEY"));
    }

    #[test]
    fn redaction_preserves_line_count() {
        let content = "line one\nAWS_KEY=AKIA1234567890ABCDEF\nline three\n";
        let (redacted, _) = redact(content, DEFAULT_SCAN_SIZE_BYTES);
        assert_eq!(content.split('\n').count(), redacted.split('\n').count());
        assert!(redacted.contains("[REDACTED_AWS_ACCESS_KEY]"));
        assert!(!redacted.contains("AKIA1234567890ABCDEF"));
    }

    #[test]
    fn clean_content_has_no_detections() {
        let result = scan("def hello():\n    return 42\n", DEFAULT_SCAN_SIZE_BYTES);
        assert!(!result.has_secrets);
        assert_eq!(result.total_count, 0);
    }

    #[test]
    fn binary_content_is_skipped() {
        let bytes: Vec<u8> = vec![0u8; 64];
        assert!(looks_binary(&bytes));
    }

    #[test]
    fn oversized_file_is_skipped() {
        let huge = "x".repeat((DEFAULT_SCAN_SIZE_BYTES as usize) + 1);
        let result = scan(&huge, DEFAULT_SCAN_SIZE_BYTES);
        assert_eq!(result.total_count, 0);
    }

    #[test]
    fn snippet_never_exceeds_max_len() {
        let long_match = format!("AKIA{}", "A".repeat(40));
        let snippet = snippet_of(&long_match);
        assert!(snippet.chars().count() <= SNIPPET_MAX_LEN);
        assert!(snippet.ends_with("..."));
    }
}
