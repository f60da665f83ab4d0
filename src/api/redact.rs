use serde_json::{Map, Value};

/// Keys whose values never reach the logs.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "hashedpassword",
    "token",
    "authorization",
    "apikey",
    "activationtoken",
    "resettoken",
];

/// Longer strings are assumed to be photo payloads and truncated.
const MAX_LOGGED_STRING: usize = 120;

/// Copy of `value` that is safe to log: credentials replaced by `[REDACTED]`,
/// base64 photos cut down to a short prefix.
pub fn redact_for_log(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lowered = k.to_ascii_lowercase();
                    let redacted = if SENSITIVE_KEYS.contains(&lowered.as_str()) {
                        Value::String("[REDACTED]".into())
                    } else {
                        redact_for_log(v)
                    };
                    (k.clone(), redacted)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_for_log).collect()),
        Value::String(s) if s.len() > MAX_LOGGED_STRING || s.starts_with("data:image/") => {
            let head: String = s.chars().take(32).collect();
            Value::String(format!("{}…[{} bytes]", head, s.len()))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_are_redacted() {
        let out = redact_for_log(&json!({
            "email": "a@b.c",
            "hashedPassword": "abc123",
            "nested": {"resetToken": "t", "apiKey": "k"},
        }));
        assert_eq!(out["email"], "a@b.c");
        assert_eq!(out["hashedPassword"], "[REDACTED]");
        assert_eq!(out["nested"]["resetToken"], "[REDACTED]");
        assert_eq!(out["nested"]["apiKey"], "[REDACTED]");
    }

    #[test]
    fn test_photos_are_truncated() {
        let photo = format!("data:image/jpeg;base64,{}", "A".repeat(5000));
        let out = redact_for_log(&json!({"checkInPhoto": photo}));
        let logged = out["checkInPhoto"].as_str().unwrap();
        assert!(logged.len() < 64);
        assert!(logged.ends_with("[5023 bytes]"));
    }
}
