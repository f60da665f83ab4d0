use std::time::Duration;

use crate::cache::CachePolicy;

const INSECURE_JWT_PLACEHOLDER: &str = "CHANGE_ME_DEV_ONLY_JWT_SECRET";

/// Deployment environment. Controls CORS strictness, error detail and log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: Environment,
    pub port: u16,
    /// Spreadsheet backend endpoint. `None` is only tolerated in development.
    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub jwt_secret: String,
    /// Origins allowed to call the gateway with credentials outside development.
    pub allowed_origins: Vec<String>,
    pub upstream_timeout: Duration,
    /// Maximum distance in metres between a reported location and its branch.
    pub geofence_max_distance_m: f64,
    pub cache_enabled: bool,
    pub cache_policy: CachePolicy,
}

impl Config {
    pub fn is_development(&self) -> bool {
        self.env.is_development()
    }

    /// A config suitable for tests: development mode, fixed secret, no upstream.
    pub fn for_tests(upstream_url: Option<String>) -> Self {
        Self {
            env: Environment::Development,
            port: 0,
            upstream_url,
            upstream_api_key: Some("test-api-key".into()),
            jwt_secret: "test-secret-that-is-long-enough-for-hmac".into(),
            allowed_origins: Vec::new(),
            upstream_timeout: Duration::from_secs(5),
            geofence_max_distance_m: 100.0,
            cache_enabled: true,
            cache_policy: CachePolicy::default(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env = Environment::parse(
        &std::env::var("APP_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .unwrap_or_default(),
    );

    let upstream_url = non_empty_var("GAS_URL");
    let upstream_api_key = non_empty_var("GAS_API_KEY");
    if !env.is_development() {
        if upstream_url.is_none() {
            anyhow::bail!("GAS_URL is not configured");
        }
        if upstream_api_key.is_none() {
            anyhow::bail!("GAS_API_KEY is not configured");
        }
    }

    let jwt_secret = match non_empty_var("JWT_SECRET") {
        Some(secret) => secret,
        None if env.is_development() => {
            tracing::warn!("JWT_SECRET is not set, using an insecure development placeholder");
            INSECURE_JWT_PLACEHOLDER.to_string()
        }
        None => anyhow::bail!("JWT_SECRET is not configured"),
    };

    let defaults = CachePolicy::default();
    let cache_policy = CachePolicy {
        branch: secs_var("CACHE_TTL_BRANCH_SECS").unwrap_or(defaults.branch),
        vehicle: secs_var("CACHE_TTL_VEHICLE_SECS").unwrap_or(defaults.vehicle),
        invoice: secs_var("CACHE_TTL_INVOICE_SECS").unwrap_or(defaults.invoice),
        delivery: secs_var("CACHE_TTL_DELIVERY_SECS").unwrap_or(defaults.delivery),
        expense: secs_var("CACHE_TTL_EXPENSE_SECS").unwrap_or(defaults.expense),
    };

    Ok(Config {
        env,
        port: std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8888),
        upstream_url,
        upstream_api_key,
        jwt_secret,
        allowed_origins: parse_origins(&std::env::var("ALLOWED_ORIGINS").unwrap_or_default()),
        upstream_timeout: secs_var("UPSTREAM_TIMEOUT_SECS").unwrap_or(Duration::from_secs(30)),
        geofence_max_distance_m: std::env::var("GEOFENCE_MAX_DISTANCE_M")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100.0),
        cache_enabled: std::env::var("CACHE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true),
        cache_policy,
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn secs_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse(" Staging "), Environment::Staging);
        assert_eq!(Environment::parse(""), Environment::Development);
        assert_eq!(Environment::parse("dev"), Environment::Development);
    }

    #[test]
    fn test_parse_origins_trims_and_drops_empty() {
        let origins = parse_origins(" https://app.example.com/ ,, http://localhost:3000");
        assert_eq!(
            origins,
            vec!["https://app.example.com", "http://localhost:3000"]
        );
        assert!(parse_origins("").is_empty());
    }
}
