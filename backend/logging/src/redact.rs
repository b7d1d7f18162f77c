//! Log Redaction Layer
//!
//! Scrubs API keys, access tokens, and phone numbers from strings prior to logging.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TELEPHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b")
        .expect("static phone regex")
});
static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9_\-]{20,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)")
        .expect("static api key regex")
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]");
    TELEPHONE_RE
        .replace_all(&redacted, "[REDACTED_PHONE]")
        .into_owned()
}

/// Redacts every string inside a JSON value, keys untouched.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_sensitive_data(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let raw = "Sending to +1-555-123-4567 with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("+1-555-123-4567"));
        assert!(!clean.contains("Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let raw = "ls -la returned 42 entries";
        assert_eq!(redact_sensitive_data(raw), raw);
    }

    #[test]
    fn test_redact_json_nested() {
        let value = serde_json::json!({
            "command": "curl -H 'Authorization: Bearer abc.def' x",
            "args": ["sk-abcdefghijklmnopqrstuvwxyz123456"],
            "count": 3
        });
        let clean = redact_json(&value);
        assert!(!clean.to_string().contains("abc.def"));
        assert_eq!(clean["args"][0], "[REDACTED_TOKEN]");
        assert_eq!(clean["count"], 3);
    }
}
