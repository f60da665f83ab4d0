//! Request shaping for the spreadsheet backend.
//!
//! The backend speaks two dialects: mutations are `POST` with a JSON body of
//! `{action, data}`, reads are `GET` with everything flattened into the query
//! string. Photos travel as raw base64 and timestamps as ISO-8601 UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Actions the backend only accepts as `POST` + JSON body.
pub const MUTATING_ACTIONS: &[&str] = &[
    "login",
    "register",
    "forgotPassword",
    "resetPassword",
    "submitCheckIn",
    "submitCheckOut",
    "submitForm",
    "submitDelivery",
    "submitExpenses",
    "deleteFile",
];

/// Payload fields that carry photo uploads.
pub const IMAGE_FIELDS: &[&str] = &[
    "checkInPhoto",
    "checkOutPhoto",
    "receiptPhoto",
    "deliveryCheckinPhoto",
    "deliveryPhoto",
    "paymentPhoto",
];

/// Payload fields that carry timestamps.
pub const TIMESTAMP_FIELDS: &[&str] = &["deliveryTime", "checkInTime", "checkOutTime", "date"];

static DATA_URL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/[A-Za-z0-9.+-]+;base64,").unwrap());

pub fn is_mutating(action: &str) -> bool {
    MUTATING_ACTIONS.contains(&action)
}

/// Strip a leading `data:image/...;base64,` prefix, leaving raw base64.
pub fn strip_data_url_prefix(raw: &str) -> &str {
    match DATA_URL_PREFIX.find(raw) {
        Some(m) => &raw[m.end()..],
        None => raw,
    }
}

/// Build the `{action, data}` body for a mutating action, with photo fields
/// reduced to raw base64 and timestamp fields normalized to UTC.
pub fn mutation_body(action: &str, payload: Value) -> Value {
    let data = match payload {
        Value::Object(mut map) => {
            normalize_fields(&mut map);
            Value::Object(map)
        }
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    json!({ "action": action, "data": data })
}

fn normalize_fields(map: &mut Map<String, Value>) {
    for field in IMAGE_FIELDS {
        if let Some(Value::String(photo)) = map.get_mut(*field) {
            let stripped = strip_data_url_prefix(photo).to_string();
            *photo = stripped;
        }
    }
    for field in TIMESTAMP_FIELDS {
        if let Some(Value::String(raw)) = map.get_mut(*field) {
            if let Some(ts) = parse_timestamp(raw) {
                *raw = to_iso_utc(&ts);
            }
        }
    }
}

/// Flatten a read payload into query parameters. `action` comes first; empty,
/// null and `false` values are omitted; arrays (notably `range`) are joined
/// with a comma into a single parameter.
pub fn query_pairs(action: &str, payload: &Value) -> Vec<(String, String)> {
    let mut pairs = vec![("action".to_string(), action.to_string())];
    let Some(map) = payload.as_object() else {
        return pairs;
    };
    for (key, value) in map {
        let rendered = match value {
            Value::Null | Value::Bool(false) => continue,
            Value::String(s) if s.is_empty() => continue,
            Value::String(s) => s.clone(),
            Value::Bool(true) => "true".to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => value.to_string(),
        };
        pairs.push((key.clone(), rendered));
    }
    pairs
}

/// Parse the timestamp shapes the web client and the backend produce.
/// Zone-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

pub fn to_iso_utc(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// `M/D/YYYY`, the date convention of the spreadsheet backend.
pub fn to_display_date(ts: &DateTime<Utc>) -> String {
    format!("{}/{}/{}", ts.month(), ts.day(), ts.year())
}

/// Convert a client `YYYY-MM-DD` date into the backend's `M/D/YYYY`.
pub fn upstream_date(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|ts| to_display_date(&ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_allow_list() {
        assert!(is_mutating("submitCheckIn"));
        assert!(is_mutating("login"));
        assert!(!is_mutating("getBranchConfig"));
        assert!(!is_mutating("activateAccount"));
    }

    #[test]
    fn test_strip_data_url_prefix() {
        assert_eq!(strip_data_url_prefix("data:image/jpeg;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url_prefix("data:image/svg+xml;base64,PHN2"), "PHN2");
        assert_eq!(strip_data_url_prefix("AAAA"), "AAAA");
        assert_eq!(
            strip_data_url_prefix("data:text/plain;base64,AAAA"),
            "data:text/plain;base64,AAAA"
        );
    }

    #[test]
    fn test_mutation_body_normalizes_photos_and_times() {
        let body = mutation_body(
            "submitCheckIn",
            json!({
                "vehicleNumber": "B 1234 XY",
                "checkInPhoto": "data:image/png;base64,iVBORw0KGgo=",
                "checkInTime": "2024-01-02T15:30:00+07:00",
            }),
        );
        assert_eq!(body["action"], "submitCheckIn");
        assert_eq!(body["data"]["checkInPhoto"], "iVBORw0KGgo=");
        assert_eq!(body["data"]["checkInTime"], "2024-01-02T08:30:00Z");
        assert_eq!(body["data"]["vehicleNumber"], "B 1234 XY");
    }

    #[test]
    fn test_query_pairs_join_range_and_skip_empty() {
        let pairs = query_pairs(
            "getDeliveries",
            &json!({
                "branch": "JKT",
                "range": ["2024-01-01", "2024-01-07"],
                "category": null,
                "context": "",
            }),
        );
        assert_eq!(pairs[0], ("action".to_string(), "getDeliveries".to_string()));
        assert!(pairs.contains(&("branch".to_string(), "JKT".to_string())));
        assert!(pairs.contains(&("range".to_string(), "2024-01-01,2024-01-07".to_string())));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        assert!(parse_timestamp("2024-01-02T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-01-02T10:00").is_some());
        assert!(parse_timestamp("2024-01-02").is_some());
        assert!(parse_timestamp("1/2/2024").is_some());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_upstream_date_drops_leading_zeros() {
        assert_eq!(upstream_date("2024-01-02").as_deref(), Some("1/2/2024"));
        assert_eq!(upstream_date("2024-12-31").as_deref(), Some("12/31/2024"));
        assert_eq!(upstream_date("2024-13-45"), None);
    }
}
