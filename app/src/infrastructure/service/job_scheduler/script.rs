use std::collections::BTreeMap;
use std::fmt::Write;

use domain::service::escape_for_shell;

/// `HH:MM:SS`, hours are not wrapped into days.
pub fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = duration % 3600 / 60;
    let seconds = duration % 60;

    format!("{hours:0>2}:{minutes:0>2}:{seconds:0>2}")
}

/// Keep `[A-Za-z0-9._-]`, make sure the name starts with an alphanumeric
/// character, and cut it to `max_len`.
pub fn sanitize_job_name(name: &str, max_len: usize) -> String {
    let mut sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if !sanitized.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        sanitized.insert(0, 'j');
    }
    sanitized.truncate(max_len);
    sanitized
}

/// `export` lines for the job environment between marker comments. Empty if
/// there is nothing to export.
pub fn environment_block(environment: &BTreeMap<String, String>) -> String {
    if environment.is_empty() {
        return String::new();
    }

    let mut block = String::from("# ENVIRONMENT VARIABLES BEGIN ###\n");
    for (key, value) in environment {
        if !is_env_key(key) {
            tracing::warn!(key, "Skipping environment variable with an invalid name");
            continue;
        }
        let _ = writeln!(block, "export {key}={}", escape_for_shell(value));
    }
    block.push_str("# ENVIRONMENT VARIABLES  END  ###\n");
    block
}

fn is_env_key(key: &str) -> bool {
    key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
