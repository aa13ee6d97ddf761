//! API key management through the Clash of Clans developer portal.
//!
//! Keys are bound to the caller's IP address. When the bot runs without a
//! static token, it logs into the portal, reuses a key created for the current
//! IP or replaces stale keys with a fresh one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_PORTAL_URL: &str = "https://developer.clashofclans.com/api";

/// The portal refuses to create more keys than this per account.
const MAX_KEYS: usize = 10;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "temporaryAPIToken")]
    temporary_api_token: String,
}

#[derive(Debug, Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<PortalKey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalKey {
    id: String,
    name: String,
    key: String,
    #[serde(default)]
    cidr_ranges: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedKey {
    key: PortalKey,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewKey<'a> {
    name: &'a str,
    description: String,
    cidr_ranges: Vec<String>,
    scopes: [&'a str; 1],
}

pub struct KeyManager {
    client: reqwest::Client,
    portal_url: String,
    email: String,
    password: String,
    key_name: String,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("portal_url", &self.portal_url)
            .field("email", &self.email)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(
        portal_url: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            portal_url: portal_url.into(),
            email: email.into(),
            password: password.into(),
            key_name: key_name.into(),
        })
    }

    /// Returns a key usable from the current IP, creating one when needed.
    pub async fn obtain_key(&self) -> Result<String, AppError> {
        let token = self.login().await?;
        let ip = ip_from_token(&token)?;

        let keys = self.list_keys().await?;
        let mut remaining = keys.len();
        for key in keys.iter().filter(|k| k.name == self.key_name) {
            if key.cidr_ranges.iter().any(|range| range_matches(range, &ip)) {
                info!(ip = %ip, "🔑 Reusing existing API key");
                return Ok(key.key.clone());
            }
            self.revoke_key(&key.id).await?;
            remaining -= 1;
        }

        if remaining >= MAX_KEYS {
            return Err(AppError::Config(format!(
                "The developer account already has {MAX_KEYS} keys; none is named `{}` and matches {ip}",
                self.key_name
            )));
        }

        let key = self.create_key(&ip).await?;
        info!(ip = %ip, "🔑 Created new API key");
        Ok(key)
    }

    async fn login(&self) -> Result<String, AppError> {
        let res = self
            .client
            .post(format!("{}/login", self.portal_url))
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;
        let res = check_status(res).await?;
        let login: LoginResponse = res.json().await?;
        Ok(login.temporary_api_token)
    }

    async fn list_keys(&self) -> Result<Vec<PortalKey>, AppError> {
        let res = self
            .client
            .post(format!("{}/apikey/list", self.portal_url))
            .send()
            .await?;
        let list: KeyList = check_status(res).await?.json().await?;
        Ok(list.keys)
    }

    async fn revoke_key(&self, id: &str) -> Result<(), AppError> {
        let res = self
            .client
            .post(format!("{}/apikey/revoke", self.portal_url))
            .json(&json!({ "id": id }))
            .send()
            .await?;
        check_status(res).await?;
        warn!(key_id = id, "🔑 Revoked API key bound to another IP");
        Ok(())
    }

    async fn create_key(&self, ip: &str) -> Result<String, AppError> {
        let body = NewKey {
            name: &self.key_name,
            description: format!("Created at {}", chrono::Utc::now().format("%Y-%m-%d %H:%M")),
            cidr_ranges: vec![ip.to_string()],
            scopes: ["clash"],
        };
        let res = self
            .client
            .post(format!("{}/apikey/create", self.portal_url))
            .json(&body)
            .send()
            .await?;
        let created: CreatedKey = check_status(res).await?.json().await?;
        Ok(created.key.key)
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let message = res.text().await.unwrap_or_default();
    Err(AppError::ClashApi {
        status: status.as_u16(),
        reason: "developerPortal".into(),
        message,
    })
}

/// Reads the caller's IP from the `limits` claim of the portal session token.
fn ip_from_token(token: &str) -> Result<String, AppError> {
    let invalid = || AppError::Config("Developer portal returned an unreadable session token".into());

    let payload = token.split('.').nth(1).ok_or_else(invalid)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid())?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded)?;

    claims["limits"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|limit| limit["cidrs"].as_array())
        .flatten()
        .filter_map(|cidr| cidr.as_str())
        .map(|cidr| cidr.split('/').next().unwrap_or(cidr).to_string())
        .next()
        .ok_or_else(invalid)
}

fn range_matches(range: &str, ip: &str) -> bool {
    range.split('/').next() == Some(ip)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;

    pub(crate) fn session_token(ip: &str) -> String {
        let payload = json!({
            "iss": "supercell",
            "limits": [
                {"tier": "developer/bronze", "type": "throttling"},
                {"cidrs": [format!("{ip}/32")], "type": "client"}
            ]
        });
        format!(
            "e30.{}.signature",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn ip_is_read_from_session_token() {
        assert_eq!(ip_from_token(&session_token("1.2.3.4")).unwrap(), "1.2.3.4");
        assert!(matches!(ip_from_token("garbage"), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn stale_keys_are_revoked_and_replaced() {
        let server = MockServer::start_async().await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/login");
                then.status(200)
                    .json_body(json!({"temporaryAPIToken": session_token("5.6.7.8")}));
            })
            .await;
        let list = server
            .mock_async(|when, then| {
                when.method(POST).path("/apikey/list");
                then.status(200).json_body(json!({"keys": [
                    {"id": "old", "name": "clashtrack", "key": "old-key", "cidrRanges": ["1.2.3.4"]},
                    {"id": "other", "name": "someone-else", "key": "x", "cidrRanges": ["5.6.7.8"]}
                ]}));
            })
            .await;
        let revoke = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/apikey/revoke")
                    .json_body(json!({"id": "old"}));
                then.status(200).json_body(json!({}));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/apikey/create");
                then.status(200).json_body(json!({"key": {
                    "id": "new", "name": "clashtrack", "key": "new-key", "cidrRanges": ["5.6.7.8"]
                }}));
            })
            .await;

        let manager = KeyManager::new(server.base_url(), "me@example.com", "pw", "clashtrack").unwrap();
        let key = manager.obtain_key().await.unwrap();

        assert_eq!(key, "new-key");
        login.assert_async().await;
        list.assert_async().await;
        revoke.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn matching_key_is_reused() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/login");
                then.status(200)
                    .json_body(json!({"temporaryAPIToken": session_token("1.2.3.4")}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/apikey/list");
                then.status(200).json_body(json!({"keys": [
                    {"id": "k", "name": "clashtrack", "key": "current", "cidrRanges": ["1.2.3.4"]}
                ]}));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/apikey/create");
                then.status(200);
            })
            .await;

        let manager = KeyManager::new(server.base_url(), "me@example.com", "pw", "clashtrack").unwrap();
        assert_eq!(manager.obtain_key().await.unwrap(), "current");
        create.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn rejected_login_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/login");
                then.status(403).body("invalid credentials");
            })
            .await;

        let manager = KeyManager::new(server.base_url(), "me@example.com", "bad", "clashtrack").unwrap();
        let err = manager.obtain_key().await.unwrap_err();
        assert!(matches!(err, AppError::ClashApi { status: 403, .. }));
    }
}
