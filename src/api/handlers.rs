use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use super::context::RequestContext;
use crate::auth::{auth_cookie, clear_auth_cookie, UserProfile};
use crate::cache::{branch_pattern, CacheParams, ResourceType};
use crate::errors::AppError;
use crate::proxy::transform::upstream_date;
use crate::rules::{branch_coordinates, validate, GeofenceCheck, Location};
use crate::AppState;

/// A successful handler result, rendered as `{success: true, data}`.
#[derive(Debug)]
pub struct Reply {
    pub data: Value,
    pub set_cookie: Option<String>,
}

impl Reply {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            set_cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: String) -> Self {
        self.set_cookie = Some(cookie);
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut resp = (
            StatusCode::OK,
            Json(json!({ "success": true, "data": self.data })),
        )
            .into_response();
        if let Some(cookie) = self.set_cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
            resp.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        resp
    }
}

// -- Reference data ---------------------------------------------------------

async fn fetch_branches(state: &AppState) -> Result<Value, AppError> {
    let data = state
        .cache
        .get_or_fetch(ResourceType::Branch, &CacheParams::new(), || {
            state.upstream.execute("getBranchConfig", json!({}))
        })
        .await?;
    Ok(data)
}

pub async fn list_branches(state: Arc<AppState>, _ctx: RequestContext) -> Result<Reply, AppError> {
    fetch_branches(&state).await.map(Reply::data)
}

pub async fn list_vehicles(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let branch = ctx.require_param("branch", "Parameter branch diperlukan")?;
    let params = CacheParams::new().with("branch", branch);
    let data = state
        .cache
        .get_or_fetch(ResourceType::Vehicle, &params, || {
            state
                .upstream
                .execute("getVehicleData", json!({ "branch": branch }))
        })
        .await?;
    Ok(Reply::data(data))
}

/// `date` arrives as `YYYY-MM-DD` and is forwarded as `M/D/YYYY`;
/// `ranged=true` selects the trailing 7-day list.
pub async fn list_invoices(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let (Some(branch), Some(raw_date)) = (ctx.param("branch"), ctx.param("date")) else {
        return Err(AppError::Validation(
            "Branch dan date parameter diperlukan".into(),
        ));
    };
    let date = upstream_date(raw_date).ok_or_else(|| {
        AppError::Validation("Format tanggal tidak valid. Gunakan format YYYY-MM-DD".into())
    })?;
    let ranged = ctx.param("ranged") == Some("true");
    let action = if ranged {
        "getRangedInvoiceList"
    } else {
        "getInvoiceList"
    };

    let params = CacheParams::new()
        .with("branch", branch)
        .with("date", date.clone())
        .with("ranged", ranged.to_string());
    let data = state
        .cache
        .get_or_fetch(ResourceType::Invoice, &params, || {
            state
                .upstream
                .execute(action, json!({ "branch": branch, "date": date }))
        })
        .await?;
    Ok(Reply::data(data))
}

// -- Deliveries and expenses ------------------------------------------------

pub async fn list_deliveries(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    // Single record lookups are not cached: they carry no branch to
    // invalidate by.
    if let Some(id) = ctx.param("id") {
        let data = state
            .upstream
            .execute("getDelivery", json!({ "id": id }))
            .await?;
        return Ok(Reply::data(data));
    }

    let branch = ctx.require_param("branch", "Parameter branch diperlukan")?;
    let context = ctx.param("context");
    let range = ctx.param("range");
    let (action, payload) = match context {
        Some(context) => (
            "getDeliveriesContext",
            json!({ "context": context, "branch": branch, "range": range }),
        ),
        None => ("getDeliveries", json!({ "branch": branch, "range": range })),
    };

    let params = CacheParams::new()
        .with("branch", branch)
        .with_opt("context", context)
        .with_opt("range", range);
    let data = state
        .cache
        .get_or_fetch(ResourceType::Delivery, &params, || {
            state.upstream.execute(action, payload)
        })
        .await?;
    Ok(Reply::data(data))
}

pub async fn submit_delivery(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let branch = ctx.body_str("branch").unwrap_or_default().to_string();
    let data = submit(&state, "submitDelivery", ctx.body).await?;

    let invoices = state
        .cache
        .invalidate_by_pattern(&branch_pattern(ResourceType::Invoice, &branch));
    let deliveries = state
        .cache
        .invalidate_by_pattern(&branch_pattern(ResourceType::Delivery, &branch));
    tracing::debug!(
        branch = %branch,
        invoices,
        deliveries,
        "invalidated cached reads after delivery"
    );
    Ok(Reply::data(data))
}

/// `context` queries span branches and are not cached.
pub async fn list_expenses(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let range = ctx.param("range");
    if let Some(context) = ctx.param("context") {
        let data = state
            .upstream
            .execute(
                "getFilteredExpenses",
                json!({ "context": context, "range": range }),
            )
            .await?;
        return Ok(Reply::data(data));
    }

    let branch = ctx.require_param("branch", "Parameter branch diperlukan")?;
    let category = ctx.param("category");
    let params = CacheParams::new()
        .with("branch", branch)
        .with_opt("category", category)
        .with_opt("range", range);
    let data = state
        .cache
        .get_or_fetch(ResourceType::Expense, &params, || {
            state.upstream.execute(
                "getExpenses",
                json!({ "branch": branch, "category": category, "range": range }),
            )
        })
        .await?;
    Ok(Reply::data(data))
}

pub async fn submit_expense(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let branch = ctx.body_str("branch").unwrap_or_default().to_string();
    let data = submit(&state, "submitExpenses", ctx.body).await?;
    state
        .cache
        .invalidate_by_pattern(&branch_pattern(ResourceType::Expense, &branch));
    Ok(Reply::data(data))
}

// -- Vehicle sessions -------------------------------------------------------

pub async fn check_in(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    enforce_geofence(&state, &ctx).await?;
    let data = submit(&state, "submitCheckIn", ctx.body).await?;
    Ok(Reply::data(data))
}

/// Check-out carries a session id rather than a branch; the geofence is only
/// evaluated locally when the client also sends the branch.
pub async fn check_out(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    enforce_geofence(&state, &ctx).await?;
    let data = submit(&state, "submitCheckOut", ctx.body).await?;
    Ok(Reply::data(data))
}

async fn enforce_geofence(state: &AppState, ctx: &RequestContext) -> Result<(), AppError> {
    let Some(branch) = ctx.body_str("branch") else {
        return Ok(());
    };
    let reported: Location = validate::location(&ctx.body)?;

    let branches = match fetch_branches(state).await {
        Ok(branches) => branches,
        Err(e) => {
            tracing::warn!(
                branch = %branch,
                "skipping local geofence, branch list unavailable: {}",
                e
            );
            return Ok(());
        }
    };
    let Some(registered) = branch_coordinates(&branches, branch) else {
        tracing::debug!(branch = %branch, "branch has no registered coordinates");
        return Ok(());
    };

    let check = GeofenceCheck::evaluate(
        registered,
        reported,
        state.config.geofence_max_distance_m,
    );
    tracing::debug!(
        branch = %branch,
        distance = check.distance,
        max_distance = check.max_distance,
        "geofence evaluated"
    );
    check.into_result().map(|_| ())
}

/// Forward a mutation. When it fails after files were already stored, ask the
/// backend to delete them before surfacing the failure.
async fn submit(
    state: &AppState,
    action: &str,
    data: Map<String, Value>,
) -> Result<Value, AppError> {
    match state.upstream.execute(action, Value::Object(data)).await {
        Ok(data) => Ok(data),
        Err(failure) => {
            if let Some(context) = failure.context.as_ref() {
                cleanup_uploads(state, action, context).await;
            }
            Err(failure.into())
        }
    }
}

async fn cleanup_uploads(state: &AppState, action: &str, context: &Value) {
    let Some(fields) = context.as_object() else {
        return;
    };
    let urls = fields
        .iter()
        .filter(|(key, _)| key.ends_with("PhotoUrl"))
        .filter_map(|(_, value)| value.as_str())
        .filter(|url| !url.is_empty());

    for url in urls {
        match state.upstream.execute("deleteFile", json!({ "url": url })).await {
            Ok(_) => tracing::info!(action = action, url = url, "removed orphaned upload"),
            Err(e) => tracing::warn!(
                action = action,
                url = url,
                "failed to remove orphaned upload: {}",
                e
            ),
        }
    }
}

// -- Accounts ---------------------------------------------------------------

pub async fn login(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let email = ctx.body_str("email").unwrap_or_default().to_string();
    let payload = json!({
        "email": email,
        "hashedPassword": ctx.body.get("hashedPassword").cloned().unwrap_or(Value::Null),
    });
    let data = state.upstream.execute("login", payload).await?;

    let record = data.get("user").unwrap_or(&data).clone();
    let profile: UserProfile = serde_json::from_value(record).map_err(|e| {
        AppError::Internal(anyhow::anyhow!("login response is missing the user profile: {}", e))
    })?;

    let token = state.tokens.issue(&profile)?;
    tracing::info!(email = %profile.email, branch = %profile.branch, "user logged in");
    let cookie = auth_cookie(&token);
    Ok(Reply::data(json!({
        "email": profile.email,
        "fullName": profile.full_name,
        "role": profile.role,
        "branch": profile.branch,
        "token": token,
    }))
    .with_cookie(cookie))
}

pub async fn register(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let mut data = ctx.body;
    if validate::is_missing(data.get("activationToken")) {
        data.insert(
            "activationToken".into(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    let result = state.upstream.execute("register", Value::Object(data)).await?;
    Ok(Reply::data(result))
}

pub async fn activate(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let token = ctx.require_param("token", "Token aktivasi diperlukan")?;
    let result = state
        .upstream
        .execute("activateAccount", json!({ "token": token }))
        .await?;
    Ok(Reply::data(result))
}

/// Idempotent: succeeds with or without a credential.
pub async fn logout(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    if let Some(token) = ctx.token.as_deref() {
        if !state.tokens.revoke(token) {
            tracing::debug!("logout presented a token we did not sign");
        }
    }
    if let Some(identity) = ctx.identity.as_ref() {
        tracing::info!(email = %identity.email, "user logged out");
    }
    Ok(Reply::data(json!({ "message": "Logged out" })).with_cookie(clear_auth_cookie()))
}

pub async fn forgot_password(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let payload = json!({
        "email": ctx.body_str("email"),
        "resetToken": uuid::Uuid::new_v4().to_string(),
    });
    let result = state.upstream.execute("forgotPassword", payload).await?;
    Ok(Reply::data(result))
}

pub async fn reset_password(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let payload = json!({
        "token": ctx.body_str("token"),
        "hashedPassword": ctx.body.get("hashedPassword").cloned().unwrap_or(Value::Null),
    });
    let result = state.upstream.execute("resetPassword", payload).await?;
    Ok(Reply::data(result))
}

// -- Operations -------------------------------------------------------------

/// `action=stats` or `action=clear[&pattern=...]`. Admin role only.
pub async fn cache_admin(state: Arc<AppState>, ctx: RequestContext) -> Result<Reply, AppError> {
    let identity = ctx.identity()?;
    if !identity.is_admin() {
        tracing::warn!(email = %identity.email, "non-admin attempted cache administration");
        return Err(AppError::Forbidden("Admin role required".into()));
    }

    match ctx.param("action").unwrap_or("stats") {
        "stats" => {
            let stats = serde_json::to_value(state.cache.stats())
                .map_err(|e| AppError::Internal(e.into()))?;
            Ok(Reply::data(stats))
        }
        "clear" => {
            let deleted = match ctx.param("pattern") {
                Some(pattern) => state.cache.invalidate_by_pattern(pattern),
                None => state.cache.clear(),
            };
            tracing::info!(email = %identity.email, deleted, "cache cleared");
            Ok(Reply::data(json!({ "deleted": deleted })))
        }
        other => Err(AppError::Validation(format!("Unknown cache action: {}", other))),
    }
}
