//! Logiss gateway: authenticated API gateway in front of the delivery
//! spreadsheet backend.
//!
//! The binary in `main.rs` is the composition root; integration tests in
//! `tests/` build the same router through [`AppState`] and [`api::router`].

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod proxy;
pub mod rules;

use auth::TokenService;
use cache::CacheStore;
use config::Config;
use proxy::{UpstreamClient, UpstreamStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub cache: CacheStore,
    pub tokens: TokenService,
    pub upstream: Arc<dyn UpstreamStore>,
}

impl AppState {
    /// Wire the state around an explicit upstream (a fake one in tests).
    pub fn new(config: Config, upstream: Arc<dyn UpstreamStore>) -> anyhow::Result<Self> {
        let cache = if config.cache_enabled {
            CacheStore::new(config.cache_policy)
        } else {
            CacheStore::disabled(config.cache_policy)
        };
        let tokens = TokenService::new(&config.jwt_secret)?;
        Ok(Self {
            config,
            cache,
            tokens,
            upstream,
        })
    }

    /// Wire the state around the real HTTP client for the configured backend.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let client = UpstreamClient::new(
            config.upstream_url.as_deref(),
            config.upstream_api_key.clone(),
            config.upstream_timeout,
        )?;
        Self::new(config, Arc::new(client))
    }
}
