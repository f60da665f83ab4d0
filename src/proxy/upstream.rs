/// HTTP client for the spreadsheet backend.
/// Reads go through reqwest-middleware with transient retries; mutations are
/// sent exactly once. Every call is bounded by a timeout.
use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use url::Url;

use super::response::{self, FailureKind, UpstreamFailure, UpstreamResponse, UpstreamResult};
use super::transform;

/// The single call contract the rest of the gateway sees.
#[async_trait]
pub trait UpstreamStore: Send + Sync {
    async fn execute(&self, action: &str, payload: Value) -> UpstreamResult;
}

pub struct UpstreamClient {
    read_client: ClientWithMiddleware,
    write_client: ClientWithMiddleware,
    base_url: Option<Url>,
    api_key: Option<String>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.map(Url::parse).transpose()?;

        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        // Retries: 2, exponential backoff. Only safe for reads.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let read_client = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let write_client = ClientBuilder::new(reqwest_client).build();

        Ok(Self {
            read_client,
            write_client,
            base_url,
            api_key,
            timeout,
        })
    }

    async fn send(
        &self,
        base: &Url,
        key: &str,
        action: &str,
        payload: Value,
    ) -> Result<(u16, String), UpstreamFailure> {
        let mut url = base.clone();
        url.query_pairs_mut().append_pair("key", key);

        let request = if transform::is_mutating(action) {
            let body = serde_json::to_vec(&transform::mutation_body(action, payload))
                .map_err(|e| UpstreamFailure::new(FailureKind::Upstream, e.to_string()))?;
            self.write_client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
        } else {
            {
                let mut query = url.query_pairs_mut();
                for (k, v) in transform::query_pairs(action, &payload) {
                    query.append_pair(&k, &v);
                }
            }
            self.read_client.get(url.clone())
        };

        // The query string carries the API key; log the endpoint only.
        tracing::debug!(
            action = action,
            host = base.host_str().unwrap_or_default(),
            path = base.path(),
            "upstream request"
        );

        let resp = request.send().await.map_err(|e| {
            tracing::warn!(action = action, error = %describe(e), "upstream request failed");
            UpstreamFailure::new(FailureKind::Upstream, "upstream request failed")
        })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            tracing::warn!(action = action, error = %e.without_url(), "upstream body unreadable");
            UpstreamFailure::new(FailureKind::Upstream, "failed to read upstream response")
        })?;
        Ok((status, text))
    }
}

/// Transport error text with the request URL (and so the key) removed.
fn describe(err: reqwest_middleware::Error) -> String {
    match err {
        reqwest_middleware::Error::Reqwest(e) => e.without_url().to_string(),
        reqwest_middleware::Error::Middleware(_) => "retries exhausted".to_string(),
    }
}

#[async_trait]
impl UpstreamStore for UpstreamClient {
    #[tracing::instrument(skip(self, payload))]
    async fn execute(&self, action: &str, payload: Value) -> UpstreamResult {
        let (Some(base), Some(key)) = (self.base_url.as_ref(), self.api_key.as_deref()) else {
            tracing::error!("upstream URL or API key is not configured");
            return Err(UpstreamFailure::new(
                FailureKind::Upstream,
                "upstream is not configured",
            ));
        };

        let (status, text) =
            match tokio::time::timeout(self.timeout, self.send(base, key, action, payload)).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::error!(
                        timeout_secs = self.timeout.as_secs(),
                        "upstream call timed out"
                    );
                    return Err(UpstreamFailure::new(
                        FailureKind::Timeout,
                        "upstream did not respond in time",
                    ));
                }
            };

        let shape = UpstreamResponse::classify(&text);
        if let UpstreamResponse::HtmlError(_) = shape {
            tracing::error!(status = status, "upstream returned an HTML error page");
        }

        let mut data = response::normalize(action, status, shape).map_err(|failure| {
            tracing::warn!(status = status, error = %failure, "upstream reported failure");
            failure
        })?;
        response::post_process(action, &mut data);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout: Duration) -> UpstreamClient {
        UpstreamClient::new(
            Some(&format!("{}/exec", server.uri())),
            Some("secret-key".into()),
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_action_uses_get_with_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("key", "secret-key"))
            .and(query_param("action", "getDeliveries"))
            .and(query_param("branch", "JKT"))
            .and(query_param("range", "2024-01-01,2024-01-07"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":true,"data":{"deliveries":[]}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let data = client
            .execute(
                "getDeliveries",
                json!({"branch": "JKT", "range": ["2024-01-01", "2024-01-07"]}),
            )
            .await
            .unwrap();
        assert_eq!(data, json!({"deliveries": []}));
    }

    #[tokio::test]
    async fn test_mutation_uses_post_with_stripped_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("key", "secret-key"))
            .and(body_partial_json(json!({
                "action": "submitExpenses",
                "data": {"receiptPhoto": "QUJD"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":true,"data":{"id":"e1"}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let data = client
            .execute(
                "submitExpenses",
                json!({"receiptPhoto": "data:image/jpeg;base64,QUJD"}),
            )
            .await
            .unwrap();
        assert_eq!(data["id"], "e1");
    }

    #[tokio::test]
    async fn test_mutation_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client.execute("submitCheckIn", json!({})).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Upstream);
    }

    #[tokio::test]
    async fn test_html_error_page_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<!DOCTYPE html><html><body>TypeError: X is not a function</body></html>",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client.execute("getBranchConfig", json!({})).await.unwrap_err();
        assert_eq!(err.message, "X is not a function");
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":true,"data":[]}"#)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_millis(50));
        let err = client.execute("getBranchConfig", json!({})).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_carry_the_key() {
        let key = "SUPER+SECRET/KEY=";
        let client = UpstreamClient::new(
            Some("http://127.0.0.1:9/exec"),
            Some(key.into()),
            Duration::from_secs(5),
        )
        .unwrap();

        for action in ["submitCheckIn", "login"] {
            let err = client.execute(action, json!({})).await.unwrap_err();
            assert_eq!(err.kind, FailureKind::Upstream);
            assert_eq!(err.message, "upstream request failed");
            assert!(!err.message.contains("SECRET"));
            assert!(!err.message.contains("127.0.0.1"));
        }
    }

    #[tokio::test]
    async fn test_unconfigured_upstream_fails_without_network() {
        let client = UpstreamClient::new(None, None, Duration::from_secs(1)).unwrap();
        let err = client.execute("getBranchConfig", json!({})).await.unwrap_err();
        assert_eq!(err.message, "upstream is not configured");
    }
}
