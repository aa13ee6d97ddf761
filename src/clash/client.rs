use std::{num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::keys::{DEFAULT_PORTAL_URL, KeyManager};
use super::metrics::RequestMetrics;
use super::types::ApiErrorBody;
use crate::config::{ClashCredentials, Config};
use crate::error::AppError;

/// Reason sent by the API when the key is bound to another IP.
const INVALID_IP_REASON: &str = "accessDenied.invalidIp";

/// A response body together with the `Cache-Control: max-age` it was sent with.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub max_age: Option<u64>,
}

pub struct ClashClient {
    client: reqwest::Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    key: RwLock<String>,
    key_manager: Option<KeyManager>,
    base_url: String,
    metrics: Arc<RequestMetrics>,
}

impl std::fmt::Debug for ClashClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClashClient")
            .field("base_url", &self.base_url)
            .field("key_manager", &self.key_manager)
            .finish_non_exhaustive()
    }
}

impl ClashClient {
    pub fn new(
        base_url: impl Into<String>,
        key: String,
        per_second: NonZeroU32,
        metrics: Arc<RequestMetrics>,
    ) -> Self {
        let quota = Quota::per_second(per_second).allow_burst(per_second);

        Self {
            client: reqwest::Client::new(),
            limiter: RateLimiter::direct(quota),
            key: RwLock::new(key),
            key_manager: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics,
        }
    }

    pub fn with_key_manager(mut self, key_manager: KeyManager) -> Self {
        self.key_manager = Some(key_manager);
        self
    }

    /// Builds the client from the configured credentials, creating a portal key if needed.
    pub async fn from_config(config: &Config, metrics: Arc<RequestMetrics>) -> Result<Self, AppError> {
        match &config.clash_credentials {
            ClashCredentials::Token(token) => Ok(Self::new(
                config.clash_base_url.clone(),
                token.clone(),
                config.clash_rate_limit_per_second,
                metrics,
            )),
            ClashCredentials::Login {
                email,
                password,
                key_name,
            } => {
                let manager = KeyManager::new(DEFAULT_PORTAL_URL, email, password, key_name)?;
                let key = manager.obtain_key().await?;
                Ok(Self::new(
                    config.clash_base_url.clone(),
                    key,
                    config.clash_rate_limit_per_second,
                    metrics,
                )
                .with_key_manager(manager))
            }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> Arc<RequestMetrics> {
        self.metrics.clone()
    }

    /// GET a JSON resource. Retries once with a fresh key if the current one
    /// is bound to another IP.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Fetched<T>, AppError> {
        let mut refreshed = false;
        loop {
            self.limiter.until_ready().await;
            self.metrics.inc();

            let key = self.key.read().await.clone();
            let res = self.client.get(url).bearer_auth(key).send().await?;
            let status = res.status();

            if status.is_success() {
                let max_age = max_age(res.headers());
                let data = res.json::<T>().await?;
                debug!(url, max_age, "Clash API request succeeded");
                return Ok(Fetched { data, max_age });
            }

            self.metrics.inc_failure();
            let body = res.json::<ApiErrorBody>().await.unwrap_or_default();

            if status == StatusCode::FORBIDDEN && body.reason == INVALID_IP_REASON && !refreshed {
                if let Some(manager) = &self.key_manager {
                    warn!("🔑 API key rejected for this IP, refreshing");
                    let new_key = manager.obtain_key().await?;
                    *self.key.write().await = new_key;
                    refreshed = true;
                    continue;
                }
            }

            return Err(status_error(url, status, body));
        }
    }
}

fn status_error(url: &str, status: StatusCode, body: ApiErrorBody) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound {
            query: url.to_string(),
        },
        StatusCode::SERVICE_UNAVAILABLE => AppError::Maintenance,
        _ => AppError::ClashApi {
            status: status.as_u16(),
            reason: body.reason,
            message: body.message.unwrap_or_default(),
        },
    }
}

/// Extracts `max-age` from a `Cache-Control` header such as `public max-age=600`.
fn max_age(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    value
        .split([',', ' '])
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.parse().ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;
    use nonzero_ext::nonzero;
    use serde_json::json;

    pub(crate) fn test_client(base_url: &str) -> ClashClient {
        ClashClient::new(
            base_url,
            "test-key".into(),
            nonzero!(100_u32),
            RequestMetrics::new("test"),
        )
    }

    #[test]
    fn max_age_is_parsed_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, "public max-age=600".parse().unwrap());
        assert_eq!(max_age(&headers), Some(600));

        headers.insert(reqwest::header::CACHE_CONTROL, "no-cache".parse().unwrap());
        assert_eq!(max_age(&headers), None);
        assert_eq!(max_age(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn request_propagates_reqwest_error() {
        let client = test_client("ht!tp://invalid-url");
        let res: Result<Fetched<()>, AppError> = client.get("ht!tp://invalid-url/players").await;
        assert!(matches!(res, Err(AppError::Http(_))));
    }

    #[tokio::test]
    async fn statuses_map_to_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404).json_body(json!({"reason": "notFound"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/maintenance");
                then.status(503).json_body(json!({"reason": "inMaintenance"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/throttled");
                then.status(429)
                    .json_body(json!({"reason": "requestThrottled", "message": "slow down"}));
            })
            .await;

        let client = test_client(&server.base_url());
        let get = |path: &str| format!("{}{path}", server.base_url());

        let missing = client.get::<serde_json::Value>(&get("/missing")).await;
        assert!(matches!(missing, Err(AppError::NotFound { .. })));
        let maintenance = client.get::<serde_json::Value>(&get("/maintenance")).await;
        assert!(matches!(maintenance, Err(AppError::Maintenance)));
        let throttled = client.get::<serde_json::Value>(&get("/throttled")).await;
        match throttled {
            Err(AppError::ClashApi {
                status,
                reason,
                message,
            }) => {
                assert_eq!(status, 429);
                assert_eq!(reason, "requestThrottled");
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(client.metrics().total(), 3);
    }

    #[tokio::test]
    async fn invalid_ip_refreshes_key_once() {
        let api = MockServer::start_async().await;
        let portal = MockServer::start_async().await;

        let rejected = api
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/players")
                    .header("authorization", "Bearer test-key");
                then.status(403).json_body(json!({"reason": INVALID_IP_REASON}));
            })
            .await;
        let accepted = api
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/players")
                    .header("authorization", "Bearer fresh-key");
                then.status(200).json_body(json!({"ok": true}));
            })
            .await;
        portal
            .mock_async(|when, then| {
                when.method(POST).path("/login");
                then.status(200).json_body(json!({
                    "temporaryAPIToken": crate::clash::keys::tests::session_token("9.9.9.9")
                }));
            })
            .await;
        portal
            .mock_async(|when, then| {
                when.method(POST).path("/apikey/list");
                then.status(200).json_body(json!({"keys": [
                    {"id": "k", "name": "clashtrack", "key": "fresh-key", "cidrRanges": ["9.9.9.9"]}
                ]}));
            })
            .await;

        let manager = KeyManager::new(portal.base_url(), "me@example.com", "pw", "clashtrack").unwrap();
        let client = test_client(&api.base_url()).with_key_manager(manager);

        let res = client
            .get::<serde_json::Value>(&format!("{}/players", api.base_url()))
            .await
            .unwrap();
        assert_eq!(res.data["ok"], true);
        rejected.assert_hits_async(1).await;
        accepted.assert_hits_async(1).await;
    }
}
