// Log sanitization for values that originate outside the service.
//
// Shop domains, webhook topics and upstream error bodies are attacker- or
// merchant-controlled. They are stripped of line breaks, ANSI escapes and
// control characters and truncated before they reach a log line. Access
// tokens are never logged in full.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum number of characters of external input kept in a log line.
const MAX_LOG_LENGTH: usize = 200;

static ANSI_ESCAPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("static regex is valid"));

/// Make external input safe to embed in a single log line.
///
/// ```
/// use shoplytics::utils::log_sanitizer::sanitize_for_log;
///
/// assert_eq!(sanitize_for_log("shop\nINFO forged"), "shop INFO forged");
/// assert_eq!(sanitize_for_log("test\x1b[31mred\x1b[0m"), "testred");
/// ```
pub fn sanitize_for_log(input: &str) -> String {
    let no_ansi = ANSI_ESCAPE_REGEX.replace_all(input, "");

    let cleaned: String = no_ansi
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    match cleaned.char_indices().nth(MAX_LOG_LENGTH) {
        Some((cut, _)) => format!("{}...", &cleaned[..cut]),
        None => cleaned,
    }
}

/// Show only the first four characters of a credential.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    if token.chars().count() <= 8 {
        format!("[REDACTED-{}]", token.len())
    } else {
        format!("{}…[REDACTED-{}]", prefix, token.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_removes_line_breaks() {
        let result = sanitize_for_log("acme.myshopify.com\r\n[INFO] forged entry");
        assert!(!result.contains('\n'));
        assert!(!result.contains('\r'));
        assert!(result.contains("forged entry"));
    }

    #[test]
    fn test_sanitize_removes_control_chars() {
        assert_eq!(sanitize_for_log("test\x00\x01\x02data"), "testdata");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundaries() {
        let long_input = "é".repeat(300);
        let result = sanitize_for_log(&long_input);
        assert!(result.ends_with("..."));
        assert_eq!(result.chars().count(), MAX_LOG_LENGTH + 3);
    }

    #[test]
    fn test_sanitize_preserves_normal_text() {
        assert_eq!(sanitize_for_log("orders/create"), "orders/create");
    }

    #[test]
    fn test_mask_token_hides_secret() {
        let masked = mask_token("shpat_0123456789abcdef");
        assert!(masked.starts_with("shpa"));
        assert!(!masked.contains("0123456789"));
        assert!(masked.contains("22]"));

        assert_eq!(mask_token("short"), "[REDACTED-5]");
    }
}
