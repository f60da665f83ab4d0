//! Bearer credential lifecycle: issue, verify, revoke, extract.
//!
//! Tokens are HS256-signed JWTs carrying the user's profile. Verification is
//! stateless except for the revocation set, which is process-local and is
//! lost on restart.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Token lifetime and cookie max-age.
pub const TOKEN_LIFETIME_SECS: i64 = 24 * 3600;

pub const TOKEN_COOKIE: &str = "token";

/// Profile fields a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub branch: String,
}

/// JWT claims embedded in every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's email.
    pub sub: String,
    pub email: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub role: String,
    pub branch: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role.clone(),
            branch: self.branch.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    /// Revoked token → its own expiry, so the sweeper can forget it later.
    revoked: DashMap<String, i64>,
}

impl TokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.trim().is_empty() {
            anyhow::bail!("token signing secret must not be empty");
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            revoked: DashMap::new(),
        })
    }

    pub fn issue(&self, profile: &UserProfile) -> Result<String, AppError> {
        self.issue_at(profile, Utc::now())
    }

    /// Issue a token as if at `issued_at`; expiry is 24h later.
    pub fn issue_at(
        &self,
        profile: &UserProfile,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let iat = issued_at.timestamp();
        let claims = Claims {
            sub: profile.email.clone(),
            email: profile.email.clone(),
            full_name: profile.full_name.clone(),
            role: profile.role.clone(),
            branch: profile.branch.clone(),
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {}", e)))
    }

    /// Claims of a valid, unexpired, unrevoked token. Any failure is `None`.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        if self.is_revoked(token) {
            tracing::debug!("rejected revoked token");
            return None;
        }
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!("token verification failed: {}", e);
                None
            }
        }
    }

    /// Add `token` to the revocation set. Idempotent. Strings that do not
    /// carry our signature are ignored and `false` is returned.
    pub fn revoke(&self, token: &str) -> bool {
        match self.signed_expiry(token) {
            Some(expires_at) => {
                self.revoked.insert(token.to_string(), expires_at);
                true
            }
            None => false,
        }
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains_key(token)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    /// Forget revoked tokens that would be rejected for expiry anyway.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut removed = 0;
        self.revoked.retain(|_, exp| {
            let keep = *exp > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Expiry of a token signed by us, whether or not it has expired yet.
    fn signed_expiry(&self, token: &str) -> Option<i64> {
        let mut lenient = self.validation.clone();
        lenient.validate_exp = false;
        decode::<Claims>(token, &self.decoding, &lenient)
            .ok()
            .map(|data| data.claims.exp)
    }
}

/// Read the credential from `Authorization: Bearer <token>`, else from the
/// `token` cookie. No other location is consulted.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| cookie_value(raw, TOKEN_COOKIE))
        .map(str::to_string)
}

fn cookie_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}

pub fn auth_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Strict",
        TOKEN_COOKIE, token, TOKEN_LIFETIME_SECS
    )
}

pub fn clear_auth_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=Strict",
        TOKEN_COOKIE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;

    fn service() -> TokenService {
        TokenService::new("test-secret-that-is-long-enough-for-hmac").unwrap()
    }

    fn profile() -> UserProfile {
        UserProfile {
            email: "driver@example.com".into(),
            full_name: "Budi Santoso".into(),
            role: "driver".into(),
            branch: "JKT".into(),
        }
    }

    #[test]
    fn test_issue_verify_round_trip() {
        let tokens = service();
        let token = tokens.issue(&profile()).unwrap();
        let claims = tokens.verify(&token).expect("fresh token verifies");
        assert_eq!(claims.profile(), profile());
        assert_eq!(claims.sub, "driver@example.com");
        assert_eq!(claims.exp - claims.iat, TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let tokens = service();
        let token = tokens
            .issue_at(&profile(), Utc::now() - Duration::hours(25))
            .unwrap();
        assert!(tokens.verify(&token).is_none());
    }

    #[test]
    fn test_revoked_token_is_invalid() {
        let tokens = service();
        let token = tokens.issue(&profile()).unwrap();
        tokens.revoke(&token);
        tokens.revoke(&token);
        assert!(tokens.verify(&token).is_none());
        assert_eq!(tokens.revoked_count(), 1);
    }

    #[test]
    fn test_foreign_signature_is_invalid() {
        let other = TokenService::new("some-other-secret").unwrap();
        let token = other.issue(&profile()).unwrap();
        assert!(service().verify(&token).is_none());
        assert!(service().verify("not.a.jwt").is_none());
    }

    #[test]
    fn test_revoke_ignores_unsigned_strings() {
        let tokens = service();
        for i in 0..100 {
            assert!(!tokens.revoke(&format!("garbage-{}", i)));
        }
        let other = TokenService::new("some-other-secret").unwrap();
        assert!(!tokens.revoke(&other.issue(&profile()).unwrap()));
        assert_eq!(tokens.revoked_count(), 0);
    }

    #[test]
    fn test_purge_drops_only_expired_revocations() {
        let tokens = service();
        let stale = tokens
            .issue_at(&profile(), Utc::now() - Duration::hours(30))
            .unwrap();
        let live = tokens.issue(&profile()).unwrap();
        tokens.revoke(&stale);
        tokens.revoke(&live);

        assert_eq!(tokens.purge_expired(), 1);
        assert!(tokens.is_revoked(&live));
        assert!(!tokens.is_revoked(&stale));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(TokenService::new("  ").is_err());
    }

    #[test]
    fn test_extract_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        headers.insert("cookie", HeaderValue::from_static("token=from-cookie"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_extract_falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("theme=dark; token=xyz; other=1"));
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(extract_token(&basic), None);
    }

    #[test]
    fn test_cookie_strings() {
        let set = auth_cookie("abc");
        assert!(set.starts_with("token=abc;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("SameSite=Strict"));
        assert!(set.contains("Max-Age=86400"));
        assert!(clear_auth_cookie().contains("Max-Age=0"));
    }
}
