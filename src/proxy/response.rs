//! Normalization of the backend's heterogeneous responses.
//!
//! The backend answers with JSON envelopes most of the time, with plain text
//! for a few legacy actions, and with an HTML error page when a script throws.
//! Everything is folded into [`UpstreamResult`] here, including the
//! classification of failure messages into a [`FailureKind`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::transform::{parse_timestamp, to_display_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Validation,
    Conflict,
    Authentication,
    Timeout,
    Upstream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Extra data the backend attached to the failure (e.g. geofence distances).
    pub context: Option<Value>,
}

impl UpstreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// A failure reported by the backend itself, classified by its message.
    pub fn reported(message: impl Into<String>, context: Option<Value>) -> Self {
        let message = message.into();
        Self {
            kind: classify_message(&message),
            message,
            context,
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub type UpstreamResult = Result<Value, UpstreamFailure>;

/// Raw body shapes the backend produces.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResponse {
    Json(Value),
    PlainText(String),
    HtmlError(String),
}

impl UpstreamResponse {
    pub fn classify(raw: &str) -> Self {
        let head: String = raw.chars().take(512).collect::<String>().to_lowercase();
        if head.contains("<!doctype html") || raw.contains("<!DOCTYPE html") {
            return UpstreamResponse::HtmlError(raw.to_string());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => UpstreamResponse::Json(value),
            Err(_) => UpstreamResponse::PlainText(raw.trim().to_string()),
        }
    }
}

/// Legacy actions that answer with a bare text message instead of JSON.
const PLAIN_TEXT_ACTIONS: &[&str] = &["activateAccount", "resetPassword"];

const PLAIN_TEXT_SUCCESS: &[&str] = &["berhasil", "success"];
const PLAIN_TEXT_FAILURE: &[&str] = &["tidak valid", "gagal", "error", "invalid", "expired"];

/// Known backend failure phrases, checked in order.
const MESSAGE_KINDS: &[(&str, FailureKind)] = &[
    ("tidak ditemukan", FailureKind::NotFound),
    ("not found", FailureKind::NotFound),
    ("sedang dalam perjalanan", FailureKind::Conflict),
    ("sudah selesai", FailureKind::Conflict),
    ("harus lebih besar", FailureKind::Conflict),
    ("terlalu jauh", FailureKind::Conflict),
    ("already in use", FailureKind::Conflict),
    ("already closed", FailureKind::Conflict),
    ("tidak lengkap", FailureKind::Validation),
    ("tidak valid", FailureKind::Validation),
    ("sudah terdaftar", FailureKind::Validation),
    ("diperlukan", FailureKind::Validation),
    ("password salah", FailureKind::Authentication),
    ("belum diaktivasi", FailureKind::Authentication),
];

pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    MESSAGE_KINDS
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Upstream)
}

static HTML_EXCEPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:TypeError|ReferenceError|RangeError|SyntaxError|Exception):\s*([^<(\n]+)")
        .unwrap()
});

/// Pull the exception message out of a backend error page, if recognizable.
pub fn extract_html_error(body: &str) -> Option<String> {
    HTML_EXCEPTION
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Fold one backend response into the single result contract.
pub fn normalize(action: &str, status: u16, response: UpstreamResponse) -> UpstreamResult {
    let ok_status = (200..300).contains(&status);
    match response {
        UpstreamResponse::HtmlError(body) => Err(UpstreamFailure::new(
            FailureKind::Upstream,
            extract_html_error(&body)
                .unwrap_or_else(|| "upstream returned an error page".to_string()),
        )),
        UpstreamResponse::Json(value) => normalize_json(status, ok_status, value),
        UpstreamResponse::PlainText(text) => {
            if PLAIN_TEXT_ACTIONS.contains(&action) {
                plain_text_outcome(&text)
            } else if !ok_status {
                Err(UpstreamFailure::new(
                    FailureKind::Upstream,
                    format!("upstream returned HTTP {}", status),
                ))
            } else {
                Err(UpstreamFailure::new(
                    FailureKind::Upstream,
                    "invalid JSON response from upstream",
                ))
            }
        }
    }
}

fn normalize_json(status: u16, ok_status: bool, value: Value) -> UpstreamResult {
    let map = match value {
        Value::Object(map) => map,
        other if ok_status => return Ok(other),
        _ => {
            return Err(UpstreamFailure::new(
                FailureKind::Upstream,
                format!("upstream returned HTTP {}", status),
            ))
        }
    };

    let explicit = map.get("success").and_then(Value::as_bool);
    let message = map
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| map.get("error").and_then(Value::as_str))
        .map(str::to_string);
    let data = map.get("data").filter(|d| !d.is_null()).cloned();

    match explicit {
        Some(false) => Err(UpstreamFailure::reported(
            message.unwrap_or_else(|| "upstream request failed".to_string()),
            data,
        )),
        None if !ok_status => Err(UpstreamFailure::reported(
            message.unwrap_or_else(|| format!("upstream returned HTTP {}", status)),
            data,
        )),
        _ => Ok(data.unwrap_or(Value::Object(map))),
    }
}

fn plain_text_outcome(text: &str) -> UpstreamResult {
    let lower = text.to_lowercase();
    if PLAIN_TEXT_FAILURE.iter().any(|p| lower.contains(p)) {
        return Err(UpstreamFailure::reported(text, None));
    }
    if PLAIN_TEXT_SUCCESS.iter().any(|p| lower.contains(p)) {
        return Ok(json!({ "message": text }));
    }
    Err(UpstreamFailure::new(
        FailureKind::Upstream,
        format!("unrecognized upstream response: {}", truncate(text, 200)),
    ))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Action-specific cleanup of returned records: numeric strings to numbers,
/// dates to `M/D/YYYY`, stray escapes out of file URLs.
pub fn post_process(action: &str, data: &mut Value) {
    if action.starts_with("get") && action.contains("Expenses") {
        for_each_record(data, "expenses", |record| {
            numeric_field(record, "amount");
            display_date_field(record, "date");
            clean_url_fields(record);
        });
    } else if action.starts_with("getDeliver") {
        for_each_record(data, "deliveries", |record| {
            numeric_field(record, "invoiceAmount");
            clean_url_fields(record);
        });
    } else if action.contains("Invoice") {
        for_each_record(data, "invoices", |record| {
            numeric_field(record, "amount");
        });
    }
}

/// Apply `f` to every record under `data[list_key]`, to every element when
/// `data` is itself a list, or to `data` when it is a single record.
fn for_each_record(data: &mut Value, list_key: &str, mut f: impl FnMut(&mut Value)) {
    if let Some(Value::Array(items)) = data.get_mut(list_key) {
        items.iter_mut().for_each(&mut f);
        return;
    }
    match data {
        Value::Array(items) => items.iter_mut().for_each(&mut f),
        record @ Value::Object(_) => f(record),
        _ => {}
    }
}

fn numeric_field(record: &mut Value, field: &str) {
    let Some(slot) = record.get_mut(field) else {
        return;
    };
    if let Value::String(raw) = slot {
        let cleaned = raw.trim().replace(',', "");
        if let Some(n) = cleaned
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            *slot = Value::Number(n);
        }
    }
}

fn display_date_field(record: &mut Value, field: &str) {
    if let Some(Value::String(raw)) = record.get_mut(field) {
        if let Some(ts) = parse_timestamp(raw) {
            *raw = to_display_date(&ts);
        }
    }
}

fn clean_url_fields(record: &mut Value) {
    let Value::Object(map) = record else {
        return;
    };
    for (key, value) in map.iter_mut() {
        if key.ends_with("Url") {
            if let Value::String(url) = value {
                if url.contains('\\') {
                    *url = url.replace('\\', "");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_type_error_is_extracted() {
        let body =
            r#"<!DOCTYPE html><html><body><div>TypeError: X is not a function</div></body></html>"#;
        let resp = UpstreamResponse::classify(body);
        assert!(matches!(resp, UpstreamResponse::HtmlError(_)));

        let err = normalize("getInvoiceList", 200, resp).unwrap_err();
        assert_eq!(err.kind, FailureKind::Upstream);
        assert_eq!(err.message, "X is not a function");
    }

    #[test]
    fn test_html_with_line_info_is_trimmed() {
        let body = concat!(
            "<!DOCTYPE html><p>TypeError: sheet.getRange is not a function ",
            "(line 42, file \"Code\")</p>"
        );
        assert_eq!(
            extract_html_error(body).as_deref(),
            Some("sheet.getRange is not a function")
        );
    }

    #[test]
    fn test_html_without_pattern_gets_generic_message() {
        let resp = UpstreamResponse::classify("<!DOCTYPE html><html><title>Oops</title></html>");
        let err = normalize("getBranchConfig", 500, resp).unwrap_err();
        assert_eq!(err.message, "upstream returned an error page");
    }

    #[test]
    fn test_json_failure_keeps_context_and_kind() {
        let resp = UpstreamResponse::classify(concat!(
            r#"{"success":false,"message":"Lokasi terlalu jauh dari cabang","#,
            r#""data":{"distance":250,"maxDistance":100}}"#,
        ));
        let err = normalize("submitCheckIn", 200, resp).unwrap_err();
        assert_eq!(err.kind, FailureKind::Conflict);
        assert_eq!(err.context, Some(json!({"distance": 250, "maxDistance": 100})));
    }

    #[test]
    fn test_json_success_unwraps_data() {
        let resp = UpstreamResponse::classify(r#"{"success":true,"data":{"branches":[]}}"#);
        assert_eq!(normalize("getBranchConfig", 200, resp).unwrap(), json!({"branches": []}));

        let implicit = UpstreamResponse::classify(r#"{"vehicles":["B 1"]}"#);
        assert_eq!(
            normalize("getVehicleData", 200, implicit).unwrap(),
            json!({"vehicles": ["B 1"]})
        );
    }

    #[test]
    fn test_json_error_on_non_2xx_without_flag() {
        let resp = UpstreamResponse::classify(r#"{"error":"quota exceeded"}"#);
        let err = normalize("getBranchConfig", 503, resp).unwrap_err();
        assert_eq!(err.kind, FailureKind::Upstream);
        assert_eq!(err.message, "quota exceeded");
    }

    #[test]
    fn test_plain_text_legacy_action() {
        let ok = normalize(
            "activateAccount",
            200,
            UpstreamResponse::classify("Akun berhasil diaktivasi. Silakan login."),
        )
        .unwrap();
        assert_eq!(ok["message"], "Akun berhasil diaktivasi. Silakan login.");

        let bad = normalize(
            "activateAccount",
            200,
            UpstreamResponse::classify("Token aktivasi tidak valid"),
        )
        .unwrap_err();
        assert_eq!(bad.kind, FailureKind::Validation);
    }

    #[test]
    fn test_plain_text_for_json_action_is_failure() {
        let err = normalize("getBranchConfig", 200, UpstreamResponse::classify("OK")).unwrap_err();
        assert_eq!(err.kind, FailureKind::Upstream);
    }

    #[test]
    fn test_classify_message_table() {
        assert_eq!(classify_message("Session tidak ditemukan"), FailureKind::NotFound);
        assert_eq!(
            classify_message("Kendaraan sedang dalam perjalanan"),
            FailureKind::Conflict
        );
        assert_eq!(
            classify_message("Odometer akhir harus lebih besar dari odometer awal"),
            FailureKind::Conflict
        );
        assert_eq!(classify_message("Email atau password salah"), FailureKind::Authentication);
        assert_eq!(classify_message("Data tidak lengkap"), FailureKind::Validation);
        assert_eq!(classify_message("Invalid API Key"), FailureKind::Upstream);
    }

    #[test]
    fn test_post_process_expenses() {
        let mut data = json!({
            "expenses": [{
                "amount": "150000",
                "date": "2024-03-05T00:00:00.000Z",
                "receiptPhotoUrl": "https:\\/\\/drive.example.com\\/file"
            }]
        });
        post_process("getExpenses", &mut data);
        let expense = &data["expenses"][0];
        assert_eq!(expense["amount"], json!(150000.0));
        assert_eq!(expense["date"], "3/5/2024");
        assert_eq!(expense["receiptPhotoUrl"], "https://drive.example.com/file");
    }

    #[test]
    fn test_post_process_single_delivery() {
        let mut data = json!({"id": "d1", "invoiceAmount": "2500.5", "checkinPhotoUrl": "a\\b"});
        post_process("getDelivery", &mut data);
        assert_eq!(data["invoiceAmount"], json!(2500.5));
        assert_eq!(data["checkinPhotoUrl"], "ab");
    }
}
