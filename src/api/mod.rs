use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::auth::extract_token;
use crate::config::Config;
use crate::errors::AppError;
use crate::AppState;

pub mod context;
pub mod handlers;
pub mod redact;
pub mod registry;

pub use context::RequestContext;
pub use redact::redact_for_log;

/// Enough for a form carrying three base64 photos.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

static ROUTES: Lazy<registry::Registry> = Lazy::new(registry::Registry::standard);

/// Build the gateway router. Every path except `/healthz` goes through
/// [`dispatch`] and the route registry.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback(dispatch)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state, cors_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let mut ctx = RequestContext::new(method, &uri, &headers);
    let route = ctx.route.clone();
    let method = ctx.method.clone();

    let result = match prepare(&state, &mut ctx, &headers, &body) {
        Ok(spec) => (spec.handler)(state.clone(), ctx).await,
        Err(e) => Err(e),
    };

    let response = match result {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            match e.status() {
                s if s.is_server_error() => {
                    tracing::error!(route = %route, method = %method, error = %e, "request failed")
                }
                _ => {
                    tracing::warn!(route = %route, method = %method, error = %e, "request rejected")
                }
            }
            e.to_response(state.config.is_development())
        }
    };

    tracing::info!(
        route = %route,
        method = %method,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

/// Everything that must pass before a handler runs: route lookup,
/// authentication, branch authorization, and form validation.
fn prepare(
    state: &AppState,
    ctx: &mut RequestContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<&'static registry::RouteSpec, AppError> {
    let spec = ROUTES.resolve(&ctx.route, &ctx.method)?;

    ctx.token = extract_token(headers);
    ctx.identity = ctx.token.as_deref().and_then(|t| state.tokens.verify(t));
    if spec.protected {
        match (&ctx.token, &ctx.identity) {
            (None, _) => return Err(AppError::Unauthenticated("Authentication required".into())),
            (Some(_), None) => {
                return Err(AppError::Unauthenticated("Invalid or expired token".into()))
            }
            _ => {}
        }
    }

    if ctx.method == Method::POST {
        ctx.body = context::parse_body(body)?;
        tracing::debug!(
            route = %ctx.route,
            body = %redact_for_log(&serde_json::Value::Object(ctx.body.clone())),
            "request body"
        );
    }

    if spec.branch_scoped {
        authorize_branch(ctx)?;
    }

    if let Some(schema) = spec.schema {
        schema.validate(&ctx.body)?;
    }

    if spec.protected && ctx.method == Method::POST {
        if let Some(identity) = ctx.identity.as_ref() {
            ctx.body
                .insert("username".into(), Value::String(identity.email.clone()));
        }
    }

    Ok(spec)
}

/// A credential's branch must match every branch the request names.
fn authorize_branch(ctx: &RequestContext) -> Result<(), AppError> {
    let Some(identity) = ctx.identity.as_ref() else {
        return Ok(());
    };
    let claimed = identity.branch.trim();
    if claimed.is_empty() {
        return Ok(());
    }
    match ctx
        .branches()
        .into_iter()
        .find(|requested| !requested.eq_ignore_ascii_case(claimed))
    {
        Some(requested) => {
            tracing::warn!(
                email = %identity.email,
                claimed = %claimed,
                requested = %requested,
                "branch mismatch"
            );
            Err(AppError::Forbidden(
                "Akses ditolak: cabang tidak sesuai dengan akun".into(),
            ))
        }
        None => Ok(()),
    }
}

/// `Access-Control-Allow-Origin` value for a request from `origin`.
/// Development echoes any origin; otherwise only allow-listed origins pass.
fn allowed_origin(config: &Config, origin: Option<&str>) -> Option<String> {
    match origin {
        Some(o) if config.is_development() => Some(o.to_string()),
        None if config.is_development() => Some("*".to_string()),
        Some(o) if config.allowed_origins.iter().any(|a| a == o) => Some(o.to_string()),
        _ => None,
    }
}

/// Middleware: answers preflights with 204 and attaches CORS headers to
/// every response.
async fn cors_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = resp.headers_mut();
    if let Some(allowed) = allowed_origin(&state.config, origin.as_deref())
        .and_then(|o| HeaderValue::from_str(&o).ok())
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, X-API-Key"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    resp
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static("x-request-id"), val);
    }
    resp
}

async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    // Responses carry per-user data.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.remove(header::SERVER);

    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[test]
    fn test_allowed_origin_by_environment() {
        let mut config = Config::for_tests(None);
        assert_eq!(
            allowed_origin(&config, Some("http://anything.test")).as_deref(),
            Some("http://anything.test")
        );
        assert_eq!(allowed_origin(&config, None).as_deref(), Some("*"));

        config.env = Environment::Production;
        config.allowed_origins = vec!["https://app.example.com".into()];
        assert_eq!(
            allowed_origin(&config, Some("https://app.example.com")).as_deref(),
            Some("https://app.example.com")
        );
        assert_eq!(allowed_origin(&config, Some("https://evil.test")), None);
        assert_eq!(allowed_origin(&config, None), None);
    }
}
