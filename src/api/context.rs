use std::collections::HashMap;

use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};

use crate::auth::Claims;
use crate::errors::AppError;

/// Mount points the web client has used over time. Only the first path
/// segment after one of these selects the route.
const PATH_PREFIXES: &[&str] = &["/.netlify/functions/api/", "/api/"];

/// Everything a route handler needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Verified claims, when a valid credential was presented.
    pub identity: Option<Claims>,
    /// The raw credential, kept so logout can revoke it.
    pub token: Option<String>,
    pub route: String,
    pub method: Method,
    pub query: HashMap<String, String>,
    /// The mutation payload, already unwrapped from its `{"data": ...}` envelope.
    pub body: Map<String, Value>,
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            identity: None,
            token: None,
            route: route_segment(uri.path()).to_string(),
            method,
            query: parse_query(uri.query()),
            body: Map::new(),
            origin: headers
                .get(axum::http::header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    /// A non-empty query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require_param(&self, key: &str, message: &str) -> Result<&str, AppError> {
        self.param(key)
            .ok_or_else(|| AppError::Validation(message.to_string()))
    }

    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Every branch the request names, in the query string or in the body.
    pub fn branches(&self) -> Vec<&str> {
        [self.param("branch"), self.body_str("branch")]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn identity(&self) -> Result<&Claims, AppError> {
        self.identity
            .as_ref()
            .ok_or_else(|| AppError::Unauthenticated("Authentication required".into()))
    }
}

/// First path segment after any known mount prefix.
pub fn route_segment(path: &str) -> &str {
    let rest = PATH_PREFIXES
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .unwrap_or(path);
    rest.trim_start_matches('/').split('/').next().unwrap_or_default()
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Accepts `{"data": {...}}` or a bare object. An empty body is an empty object.
pub fn parse_body(raw: &[u8]) -> Result<Map<String, Value>, AppError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?;
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                map.insert("data".into(), other);
                Ok(map)
            }
            None => Ok(map),
        },
        _ => Err(AppError::Validation("Request body must be a JSON object".into())),
    }
}
