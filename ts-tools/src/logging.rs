//! Logging initialization shared by both daemons.
//!
//! Built on `env_logger` the way the teacher's binaries initialize
//! `log`-backed output, with one addition the original system carried that
//! `env_logger` does not: masking credential-shaped substrings before they
//! reach a handler. `UserCreatedPayload.password_hash` and storage-node
//! `api_key` values pass through debug-level logging of gossiped operations,
//! so the masking matters even though credential issuance itself is out of
//! scope here.

use std::io::Write;
use std::sync::OnceLock;

use regex::Regex;

static MASK_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn mask_patterns() -> &'static [Regex] {
    MASK_PATTERNS.get_or_init(|| {
        [
            r#"(?i)(password["']?\s*[:=]\s*["']?)([^"'}\s,]+)"#,
            r#"(?i)(api[_-]?key["']?\s*[:=]\s*["']?)([^"'}\s,]+)"#,
            r#"(?i)(token["']?\s*[:=]\s*["']?)([^"'}\s,]+)"#,
            r#"(?i)(authorization["']?\s*[:=]\s*["']?)([^"'}\s,]+)"#,
            r#"(?i)(bearer\s+)([^\s,}'"]+)"#,
            r#"(?i)(secret["']?\s*[:=]\s*["']?)([^"'}\s,]+)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static mask pattern is valid"))
        .collect()
    })
}

/// Replaces the value half of any `password=...`, `api_key: ...`,
/// `Bearer ...`-shaped substring with `***MASKED***`.
pub fn mask_sensitive(message: &str) -> String {
    let mut masked = message.to_string();
    for pattern in mask_patterns() {
        masked = pattern.replace_all(&masked, "${1}***MASKED***").into_owned();
    }
    masked
}

/// Initializes the global logger for a node process. Reads `RUST_LOG`
/// (defaulting to `info`) the way `env_logger` normally does, but routes
/// every record's message through [`mask_sensitive`] first.
pub fn init(component: &str) {
    let component = component.to_string();
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(move |buf, record| {
        let masked = mask_sensitive(&record.args().to_string());
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            component,
            masked
        )
    });
    // `env_logger` panics if a global logger is already installed; tests in
    // this workspace call `init` at most once per process via `try_init`.
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_field() {
        let masked = mask_sensitive(r#"creating user password="hunter2" ok"#);
        assert!(masked.contains("***MASKED***"));
        assert!(!masked.contains("hunter2"));
    }

    #[test]
    fn masks_bearer_token() {
        let masked = mask_sensitive("Authorization: Bearer abc123.def456");
        assert!(!masked.contains("abc123.def456"));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let masked = mask_sensitive("file report.pdf created with 3 tags");
        assert_eq!(masked, "file report.pdf created with 3 tags");
    }
}
