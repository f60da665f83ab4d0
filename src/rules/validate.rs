//! Field-level checks over a parsed request body.

use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::proxy::transform::parse_timestamp;

/// Accepted `paymentType` values, matched exactly.
pub const PAYMENT_TYPES: &[&str] = &["TUNAI", "TRANSFER", "CEK", "GIRO", "TANDA TERIMA FAKTUR"];

/// A reported GPS position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Absent, null, `false` and empty strings count as missing.
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn require_fields(data: &Map<String, Value>, fields: &[&str]) -> Result<(), AppError> {
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|f| is_missing(data.get(*f)))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "Data tidak lengkap. Field yang diperlukan: {}",
        missing.join(", ")
    )))
}

/// The field must be a JSON number greater than zero.
pub fn positive_number(
    data: &Map<String, Value>,
    field: &str,
    message: &str,
) -> Result<f64, AppError> {
    match data.get(field).and_then(Value::as_f64) {
        Some(n) if n > 0.0 && n.is_finite() => Ok(n),
        _ => Err(AppError::Validation(message.to_string())),
    }
}

pub fn timestamp(data: &Map<String, Value>, field: &str, message: &str) -> Result<(), AppError> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|_| ())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

pub fn payment_type(data: &Map<String, Value>) -> Result<(), AppError> {
    let value = data.get("paymentType").and_then(Value::as_str).unwrap_or_default();
    if PAYMENT_TYPES.contains(&value) {
        Ok(())
    } else {
        Err(AppError::Validation("Tipe pembayaran tidak valid".into()))
    }
}

/// A photo upload must be a `data:image/...` URL with a non-empty, decodable
/// base64 payload after the comma.
pub fn image_upload(data: &Map<String, Value>, field: &str) -> Result<(), AppError> {
    let Some(raw) = data.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return Err(AppError::Validation(format!("{} diperlukan", field)));
    };
    if !raw.starts_with("data:image/") {
        return Err(AppError::Validation(format!(
            "Format {} tidak valid. Gunakan base64 image dengan data URL",
            field
        )));
    }
    let payload = raw.split_once(',').map(|(_, b64)| b64.trim()).unwrap_or_default();
    if payload.is_empty() {
        return Err(AppError::Validation(format!(
            "Format {} tidak valid. Data base64 tidak ditemukan",
            field
        )));
    }
    if general_purpose::STANDARD.decode(payload).is_err() {
        return Err(AppError::Validation(format!(
            "Format {} tidak valid. Data base64 rusak",
            field
        )));
    }
    Ok(())
}

/// Validate only when the client sent the field.
pub fn optional_image_upload(data: &Map<String, Value>, field: &str) -> Result<(), AppError> {
    if is_missing(data.get(field)) {
        return Ok(());
    }
    image_upload(data, field)
}

pub fn location(data: &Map<String, Value>) -> Result<Location, AppError> {
    let Some(loc) = data.get("location").and_then(Value::as_object) else {
        return Err(AppError::Validation("Data lokasi tidak lengkap".into()));
    };
    if is_missing(loc.get("latitude")) || is_missing(loc.get("longitude")) {
        return Err(AppError::Validation("Data lokasi tidak lengkap".into()));
    }
    match (
        loc.get("latitude").and_then(Value::as_f64),
        loc.get("longitude").and_then(Value::as_f64),
    ) {
        (Some(latitude), Some(longitude))
            if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) =>
        {
            Ok(Location {
                latitude,
                longitude,
            })
        }
        _ => Err(AppError::Validation("Format lokasi tidak valid".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_require_fields_lists_every_missing_field() {
        let data = obj(json!({"branch": "JKT", "storeName": "", "invoiceAmount": 0}));
        let err = require_fields(&data, &["branch", "storeName", "helperName", "invoiceAmount"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Data tidak lengkap. Field yang diperlukan: storeName, helperName"
        );
    }

    #[test]
    fn test_positive_number_rejects_strings_and_zero() {
        let data = obj(json!({"a": 12.5, "b": "12", "c": 0, "d": -3}));
        assert_eq!(positive_number(&data, "a", "bad").unwrap(), 12.5);
        assert!(positive_number(&data, "b", "bad").is_err());
        assert!(positive_number(&data, "c", "bad").is_err());
        assert!(positive_number(&data, "d", "bad").is_err());
    }

    #[test]
    fn test_payment_type_is_exact() {
        assert!(payment_type(&obj(json!({"paymentType": "TANDA TERIMA FAKTUR"}))).is_ok());
        assert!(payment_type(&obj(json!({"paymentType": "tunai"}))).is_err());
        assert!(payment_type(&obj(json!({"paymentType": "CASH"}))).is_err());
    }

    #[test]
    fn test_image_upload_shapes() {
        let ok = obj(json!({"photo": "data:image/jpeg;base64,QUJD"}));
        assert!(image_upload(&ok, "photo").is_ok());

        let raw = obj(json!({"photo": "QUJD"}));
        assert!(image_upload(&raw, "photo").is_err());

        let empty = obj(json!({"photo": "data:image/jpeg;base64,"}));
        let err = image_upload(&empty, "photo").unwrap_err();
        assert!(err.to_string().contains("base64 tidak ditemukan"));

        let garbage = obj(json!({"photo": "data:image/png;base64,@@@"}));
        assert!(image_upload(&garbage, "photo").is_err());

        assert!(image_upload(&obj(json!({})), "photo").is_err());
        assert!(optional_image_upload(&obj(json!({})), "photo").is_ok());
    }

    #[test]
    fn test_location_requires_numbers() {
        let loc =
            location(&obj(json!({"location": {"latitude": 0, "longitude": 0.0009}}))).unwrap();
        assert_eq!(loc.longitude, 0.0009);

        let quoted = json!({"location": {"latitude": "-6.2", "longitude": 106.8}});
        assert!(location(&obj(quoted)).is_err());
        assert!(location(&obj(json!({"location": {"latitude": -6.2}}))).is_err());
        assert!(location(&obj(json!({}))).is_err());
    }

    #[test]
    fn test_timestamp_check() {
        let data = obj(json!({"t": "2024-01-02T10:00:00Z", "u": "yesterday"}));
        assert!(timestamp(&data, "t", "bad").is_ok());
        assert!(timestamp(&data, "u", "bad").is_err());
        assert!(timestamp(&data, "missing", "bad").is_err());
    }
}
