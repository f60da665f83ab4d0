//! Geofence: distance between a reported location and its branch.

use serde::Serialize;
use serde_json::{json, Value};

use super::validate::Location;
use crate::errors::AppError;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres.
pub fn haversine_distance(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceCheck {
    pub distance: f64,
    pub max_distance: f64,
    pub is_within: bool,
}

impl GeofenceCheck {
    pub fn evaluate(branch: Location, reported: Location, max_distance: f64) -> Self {
        let distance = haversine_distance(branch, reported);
        Self {
            distance,
            max_distance,
            is_within: distance <= max_distance,
        }
    }

    /// Conflict carrying `{distance, maxDistance, isWithin}` when outside.
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.is_within {
            return Ok(self);
        }
        let distance = self.distance.round();
        let max_distance = self.max_distance.round();
        Err(AppError::conflict(
            format!(
                "Lokasi terlalu jauh dari cabang ({} meter, maksimal {} meter)",
                distance, max_distance
            ),
            Some(json!({
                "distance": distance,
                "maxDistance": max_distance,
                "isWithin": false,
            })),
        ))
    }
}

/// Registered coordinates of `branch` in a `getBranchConfig` payload,
/// matched on `branchId` or `branchName`, case-insensitively.
pub fn branch_coordinates(branches: &Value, branch: &str) -> Option<Location> {
    let list = branches
        .get("branches")
        .unwrap_or(branches)
        .as_array()?;
    let record = list.iter().find(|b| {
        ["branchId", "branchName"].iter().any(|field| {
            b.get(*field)
                .and_then(Value::as_str)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(branch.trim()))
        })
    })?;
    let coords = record.get("coordinates")?;
    Some(Location {
        latitude: coordinate(coords.get("lat")?)?,
        longitude: coordinate(coords.get("long")?)?,
    })
}

// Sheet cells arrive as numbers or as numeric strings.
fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(latitude: f64, longitude: f64) -> Location {
        Location {
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_boundary_distance_is_about_100m() {
        let check = GeofenceCheck::evaluate(at(0.0, 0.0), at(0.0, 0.0009), 100.0);
        assert!((check.distance - 100.0).abs() < 1.0, "got {}", check.distance);
        assert_eq!(check.is_within, check.distance <= 100.0);
    }

    #[test]
    fn test_outside_radius_is_rejected_with_context() {
        let check = GeofenceCheck::evaluate(at(0.0, 0.0), at(0.0, 0.002), 100.0);
        assert!(!check.is_within);
        assert!((check.distance - 222.0).abs() < 5.0, "got {}", check.distance);

        match check.into_result().unwrap_err() {
            AppError::Conflict { context, .. } => {
                let ctx = context.unwrap();
                assert_eq!(ctx["isWithin"], false);
                assert_eq!(ctx["maxDistance"], 100.0);
                let distance = ctx["distance"].as_f64().unwrap();
                assert!((distance - 222.0).abs() < 5.0);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_inside_radius_passes() {
        let check = GeofenceCheck::evaluate(at(-6.2, 106.8), at(-6.2001, 106.8001), 100.0);
        assert!(check.into_result().is_ok());
    }

    #[test]
    fn test_branch_coordinates_lookup() {
        let payload = json!({"branches": [
            {
                "branchId": "JKT",
                "branchName": "Jakarta",
                "coordinates": {"lat": "-6.2", "long": 106.8},
            },
            {"branchId": "BDG", "branchName": "Bandung", "coordinates": {"lat": "", "long": ""}},
        ]});
        assert_eq!(branch_coordinates(&payload, "jkt"), Some(at(-6.2, 106.8)));
        assert_eq!(branch_coordinates(&payload, "Jakarta"), Some(at(-6.2, 106.8)));
        assert_eq!(branch_coordinates(&payload, "BDG"), None);
        assert_eq!(branch_coordinates(&payload, "SBY"), None);
    }
}
