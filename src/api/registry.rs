//! Route table: `(route, method)` → handler plus its declared policy.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::context::RequestContext;
use super::handlers::{self, Reply};
use crate::errors::AppError;
use crate::rules::{self, FormSchema};
use crate::AppState;

pub type HandlerFuture = BoxFuture<'static, Result<Reply, AppError>>;
pub type Handler = fn(Arc<AppState>, RequestContext) -> HandlerFuture;

macro_rules! handler {
    ($f:path) => {
        |state, ctx| $f(state, ctx).boxed()
    };
}

pub struct RouteSpec {
    /// Requires a valid credential.
    pub protected: bool,
    /// Any branch the request names must match the credential's branch.
    pub branch_scoped: bool,
    pub schema: Option<&'static FormSchema>,
    pub handler: Handler,
}

impl RouteSpec {
    fn public(handler: Handler) -> Self {
        Self {
            protected: false,
            branch_scoped: false,
            schema: None,
            handler,
        }
    }

    fn protected(handler: Handler) -> Self {
        Self {
            protected: true,
            ..Self::public(handler)
        }
    }

    fn branch_scoped(mut self) -> Self {
        self.branch_scoped = true;
        self
    }

    fn schema(mut self, schema: &'static FormSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}

pub struct Registry {
    routes: HashMap<(&'static str, Method), RouteSpec>,
}

impl Registry {
    pub fn standard() -> Self {
        Self {
            routes: HashMap::new(),
        }
        .add("branches", Method::GET, RouteSpec::public(handler!(handlers::list_branches)))
        .add(
            "vehicles",
            Method::GET,
            RouteSpec::public(handler!(handlers::list_vehicles)).branch_scoped(),
        )
        .add(
            "invoices",
            Method::GET,
            RouteSpec::public(handler!(handlers::list_invoices)).branch_scoped(),
        )
        .add(
            "delivery",
            Method::GET,
            RouteSpec::protected(handler!(handlers::list_deliveries)).branch_scoped(),
        )
        .add(
            "delivery",
            Method::POST,
            RouteSpec::protected(handler!(handlers::submit_delivery))
                .branch_scoped()
                .schema(&rules::DELIVERY),
        )
        .add(
            "expenses",
            Method::GET,
            RouteSpec::protected(handler!(handlers::list_expenses)).branch_scoped(),
        )
        .add(
            "expenses",
            Method::POST,
            RouteSpec::protected(handler!(handlers::submit_expense))
                .branch_scoped()
                .schema(&rules::EXPENSE),
        )
        .add(
            "checkin",
            Method::POST,
            RouteSpec::protected(handler!(handlers::check_in))
                .branch_scoped()
                .schema(&rules::CHECK_IN),
        )
        .add(
            "checkout",
            Method::POST,
            RouteSpec::protected(handler!(handlers::check_out))
                .branch_scoped()
                .schema(&rules::CHECK_OUT),
        )
        .add(
            "login",
            Method::POST,
            RouteSpec::public(handler!(handlers::login)).schema(&rules::LOGIN),
        )
        .add(
            "register",
            Method::POST,
            RouteSpec::public(handler!(handlers::register)).schema(&rules::REGISTER),
        )
        .add("activate", Method::GET, RouteSpec::public(handler!(handlers::activate)))
        .add("logout", Method::POST, RouteSpec::public(handler!(handlers::logout)))
        .add(
            "forgot-password",
            Method::POST,
            RouteSpec::public(handler!(handlers::forgot_password))
                .schema(&rules::FORGOT_PASSWORD),
        )
        .add(
            "reset-password",
            Method::POST,
            RouteSpec::public(handler!(handlers::reset_password))
                .schema(&rules::RESET_PASSWORD),
        )
        .add("cache", Method::GET, RouteSpec::protected(handler!(handlers::cache_admin)))
    }

    fn add(mut self, route: &'static str, method: Method, spec: RouteSpec) -> Self {
        self.routes.insert((route, method), spec);
        self
    }

    /// 404 for an unknown route, 405 for a known route with another method.
    pub fn resolve(&self, route: &str, method: &Method) -> Result<&RouteSpec, AppError> {
        let known = self
            .routes
            .iter()
            .find(|((r, m), _)| *r == route && m == method)
            .map(|(_, spec)| spec);
        if let Some(spec) = known {
            return Ok(spec);
        }
        if self.routes.keys().any(|(r, _)| *r == route) {
            Err(AppError::MethodNotAllowed)
        } else {
            Err(AppError::NotFound("Not found".into()))
        }
    }
}
