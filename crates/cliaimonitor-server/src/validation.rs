//! Request validation (spec §4.K): body-size cap, origin whitelist,
//! agent-id regex, answer-text length + unsafe-content screen.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;
pub const MAX_AGENT_ID_LEN: usize = 100;
pub const MAX_ANSWER_LEN: usize = 10_000;
pub const MAX_CONFIG_NAME_LEN: usize = 50;
pub const MAX_TASK_LEN: usize = 5_000;

static AGENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

const UNSAFE_PATTERNS: &[&str] = &["<script", "javascript:", "eval(", "onerror=", "onclick=", "onload="];

pub fn validate_agent_id(agent_id: &str) -> Result<(), String> {
    if agent_id.is_empty() || agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(format!(
            "agent_id must be 1..={MAX_AGENT_ID_LEN} characters"
        ));
    }
    if !AGENT_ID_RE.is_match(agent_id) {
        return Err("agent_id contains invalid characters".into());
    }
    Ok(())
}

/// Rejects `<script`, `javascript:`, inline event handlers, and `eval(`
/// (spec §4.K). Case-insensitive — the point is to catch the common
/// cases, not to be a full HTML sanitizer.
pub fn validate_answer_text(text: &str) -> Result<(), String> {
    if text.is_empty() || text.len() > MAX_ANSWER_LEN {
        return Err(format!("answer must be 1..={MAX_ANSWER_LEN} characters"));
    }
    let lower = text.to_lowercase();
    if UNSAFE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err("answer contains unsafe content".into());
    }
    Ok(())
}

pub fn validate_config_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_CONFIG_NAME_LEN {
        return Err(format!(
            "config_name must be 1..={MAX_CONFIG_NAME_LEN} characters"
        ));
    }
    Ok(())
}

pub fn validate_task(task: &str) -> Result<(), String> {
    if task.len() > MAX_TASK_LEN {
        return Err(format!("task must be ≤{MAX_TASK_LEN} characters"));
    }
    Ok(())
}

/// `project_path` must exist on disk and contain no `..` traversal
/// segments (spec §6).
pub fn validate_project_path(path: &str) -> Result<(), String> {
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err("project_path must not contain '..'".into());
    }
    if !std::path::Path::new(path).exists() {
        return Err("project_path does not exist".into());
    }
    Ok(())
}

/// Builds the effective origin whitelist: localhost defaults plus the
/// comma-separated `CLIAIMONITOR_ALLOWED_ORIGINS` list (spec §6).
pub fn allowed_origins(extra: &str) -> Vec<String> {
    let mut origins = vec![
        "http://localhost".to_string(),
        "http://127.0.0.1".to_string(),
    ];
    origins.extend(
        extra
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    origins
}

/// An origin is allowed if it equals a whitelist entry exactly, or is
/// that entry followed immediately by a port (`:`) or path (`/`)
/// separator. A bare prefix match would let `http://localhost.attacker.com`
/// or `http://localhostevil.com` pass for an allowed `http://localhost`
/// entry, so the character right after the match must be a real
/// boundary, not a host-name continuation.
pub fn origin_is_allowed(origin: &str, whitelist: &[String]) -> bool {
    whitelist.iter().any(|allowed| {
        origin == allowed.as_str()
            || origin
                .strip_prefix(allowed.as_str())
                .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('/'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_script_tags_and_event_handlers() {
        assert!(validate_answer_text("<script>alert(1)</script>").is_err());
        assert!(validate_answer_text("onclick=alert(1)").is_err());
        assert!(validate_answer_text("javascript:alert(1)").is_err());
        assert!(validate_answer_text("eval(x)").is_err());
        assert!(validate_answer_text("a normal answer").is_ok());
    }

    #[test]
    fn agent_id_regex_rejects_empty_and_oversized() {
        assert!(validate_agent_id("").is_err());
        assert!(validate_agent_id(&"a".repeat(101)).is_err());
        assert!(validate_agent_id("agent-01").is_ok());
    }

    #[test]
    fn localhost_is_always_allowed() {
        let whitelist = allowed_origins("");
        assert!(origin_is_allowed("http://localhost:3000", &whitelist));
        assert!(!origin_is_allowed("http://evil.example", &whitelist));
    }

    #[test]
    fn configured_origins_are_appended() {
        let whitelist = allowed_origins("https://dashboard.internal, https://ops.internal");
        assert!(origin_is_allowed("https://dashboard.internal", &whitelist));
        assert!(origin_is_allowed("https://ops.internal", &whitelist));
    }

    #[test]
    fn suffix_and_subdomain_spoofed_origins_are_rejected() {
        let whitelist = allowed_origins("");
        assert!(!origin_is_allowed("http://localhost.attacker.com", &whitelist));
        assert!(!origin_is_allowed("http://localhostevil.com", &whitelist));
        assert!(!origin_is_allowed("http://127.0.0.1evil.com", &whitelist));
        assert!(origin_is_allowed("http://localhost", &whitelist));
        assert!(origin_is_allowed("http://localhost:8080", &whitelist));
    }
}
