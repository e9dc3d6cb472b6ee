//! HTTP client for a ledger gateway.
//!
//! Routes:
//! - `GET  {base}/app_config`            -> `{"account_factory":"0x.."}`
//! - `GET  {base}/code_hash/{type}`      -> `{"code_hash":"<hex>"}`
//! - `POST {base}/register_user`         <- `RegisterUser` JSON

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{AccountType, AppConfig, LedgerClient, RegisterUser};
use crate::config::LedgerConfig;
use crate::error::AuthError;
use crate::identity::Hash256;

#[derive(Deserialize)]
struct CodeHashResponse {
    code_hash: Hash256,
}

pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// A client for the configured ledger gateway.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(&config.base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Ledger(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Ledger(format!(
                "GET {} returned status {}: {}",
                url, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::SerializationError(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn app_config(&self) -> Result<AppConfig, AuthError> {
        self.get_json("/app_config").await
    }

    async fn account_type_code_hash(&self, account_type: AccountType) -> Result<Hash256, AuthError> {
        let response: CodeHashResponse = self
            .get_json(&format!("/code_hash/{}", account_type.as_str()))
            .await?;
        Ok(response.code_hash)
    }

    async fn register_user(&self, registration: &RegisterUser) -> Result<(), AuthError> {
        let url = format!("{}/register_user", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(registration)
            .send()
            .await
            .map_err(|e| AuthError::Ledger(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Ledger(format!(
                "registration of {} rejected with status {}: {}",
                registration.username, status, body
            )));
        }

        log::debug!("Registered {} with key hash {}", registration.username, registration.key_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{SaltInput, Username};
    use crate::credential::Signature;
    use crate::identity::{Key, KeyHash};

    #[tokio::test]
    async fn test_app_config_and_code_hash() {
        let mut mock_server = mockito::Server::new_async().await;

        mock_server
            .mock("GET", "/app_config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"account_factory":"0x{}"}}"#, "aa".repeat(20)))
            .create_async()
            .await;
        mock_server
            .mock("GET", "/code_hash/spot")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"code_hash":"{}"}}"#, "BB".repeat(32)))
            .create_async()
            .await;

        let client = HttpLedgerClient::new(&format!("{}/", mock_server.url()));
        let config = client.app_config().await.unwrap();
        assert_eq!(config.account_factory.as_bytes(), &[0xaa; 20]);

        let code_hash = client.account_type_code_hash(AccountType::Spot).await.unwrap();
        assert_eq!(code_hash, Hash256::from_array([0xbb; 32]));
    }

    #[tokio::test]
    async fn test_client_follows_ledger_url_override() {
        let mut mock_server = mockito::Server::new_async().await;
        let mock = mock_server
            .mock("GET", "/app_config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"account_factory":"0x{}"}}"#, "cc".repeat(20)))
            .create_async()
            .await;

        let url = mock_server.url();
        let mut config = crate::config::AuthConfig::default();
        config.apply_overrides(|name| (name == crate::config::ENV_LEDGER_URL).then(|| url.clone()));

        let client = HttpLedgerClient::from_config(&config.ledger);
        assert_eq!(client.base_url(), url);
        let app = client.app_config().await.unwrap();
        assert_eq!(app.account_factory.as_bytes(), &[0xcc; 20]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_surfaces_status() {
        let mut mock_server = mockito::Server::new_async().await;

        mock_server
            .mock("GET", "/code_hash/margin")
            .with_status(404)
            .with_body(r#"{"error":"unknown account type"}"#)
            .create_async()
            .await;

        let client = HttpLedgerClient::new(&mock_server.url());
        let err = client
            .account_type_code_hash(AccountType::Margin)
            .await
            .unwrap_err();
        match err {
            AuthError::Ledger(msg) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("unknown account type"));
            }
            other => panic!("Expected Ledger error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_user_posts_json() {
        let mut mock_server = mockito::Server::new_async().await;

        let key = Key::Ethereum([0x5e; 20]);
        let registration = RegisterUser {
            key,
            key_hash: KeyHash::of_key(&key).unwrap(),
            salt_input: SaltInput::Seed(0),
            username: Username::new("alice").unwrap(),
            signature: Signature::Eip191([0x01; 65]),
        };

        let mock = mock_server
            .mock("POST", "/register_user")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "username": "alice",
                "salt_input": { "seed": 0 },
            })))
            .with_status(200)
            .create_async()
            .await;

        let client = HttpLedgerClient::new(&mock_server.url());
        client.register_user(&registration).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_user_rejection() {
        let mut mock_server = mockito::Server::new_async().await;
        mock_server
            .mock("POST", "/register_user")
            .with_status(409)
            .with_body("username taken")
            .create_async()
            .await;

        let key = Key::Ethereum([0x5e; 20]);
        let registration = RegisterUser {
            key,
            key_hash: KeyHash::of_key(&key).unwrap(),
            salt_input: SaltInput::Seed(1),
            username: Username::new("bob").unwrap(),
            signature: Signature::Eip191([0x02; 65]),
        };

        let client = HttpLedgerClient::new(&mock_server.url());
        let err = client.register_user(&registration).await.unwrap_err();
        assert!(err.to_string().contains("username taken"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Unknown);
    }
}
