//! Vehicle session rules.
//!
//! Vehicle exclusivity needs the open-session ledger, which only the upstream
//! store holds; its "in use" / "already closed" failures are relayed through
//! [`crate::proxy::FailureKind::Conflict`]. The odometer rule is local.

use serde_json::{json, Map, Value};

use crate::errors::AppError;

/// A check-out's final reading must exceed the check-in's initial one.
/// Only evaluated when both readings are numbers.
pub fn check_odometer(data: &Map<String, Value>) -> Result<(), AppError> {
    let initial = data.get("initialOdometer").and_then(Value::as_f64);
    let last = data.get("finalOdometer").and_then(Value::as_f64);
    match (initial, last) {
        (Some(initial), Some(last)) if last <= initial => Err(AppError::conflict(
            "Odometer akhir harus lebih besar dari odometer awal",
            Some(json!({
                "initialOdometer": initial,
                "finalOdometer": last,
            })),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_final_must_exceed_initial() {
        for (initial, last) in [(1000, 1000), (1000, 999), (5, 0)] {
            let err = check_odometer(&body(json!({
                "initialOdometer": initial,
                "finalOdometer": last,
            })))
            .unwrap_err();
            assert!(matches!(err, AppError::Conflict { .. }));
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_increasing_or_unknown_readings_pass() {
        assert!(check_odometer(&body(json!({"initialOdometer": 10, "finalOdometer": 11}))).is_ok());
        assert!(check_odometer(&body(json!({"finalOdometer": 11}))).is_ok());
        let textual = body(json!({"initialOdometer": "10", "finalOdometer": 5}));
        assert!(check_odometer(&textual).is_ok());
    }
}
