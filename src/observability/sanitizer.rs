//! Redaction of secret-shaped values before they reach the audit log.

use serde_json::{Map, Value};

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pass",
    "pwd",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "csrf_token",
    "_token",
    "api_key",
    "apikey",
    "key",
    "authorization",
    "auth_header",
    "cookie",
];

const REDACTED: &str = "***redacted***";

/// Return a copy of `context` with every sensitive value masked.
///
/// Keys are matched case-insensitively at any depth. Strings that look like a
/// bearer credential are masked wherever they appear.
pub fn sanitize_context(context: &Value) -> Value {
    match context {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let masked = if is_sensitive_key(key) {
                    mask_value(value)
                } else {
                    sanitize_context(value)
                };
                out.insert(key.clone(), masked);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_context).collect()),
        Value::String(s) if looks_like_bearer(s) => mask_value(context),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&lower.as_str())
}

fn looks_like_bearer(value: &str) -> bool {
    value.len() > 7
        && value
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
}

fn mask_value(value: &Value) -> Value {
    let s = match value {
        Value::String(s) => s,
        _ => return Value::String(REDACTED.to_string()),
    };

    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return Value::String(REDACTED.to_string());
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    Value::String(format!("{}...{} (redacted)", prefix, suffix))
}
