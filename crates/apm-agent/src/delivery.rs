// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of records to the collector.
//!
//! One POST per record, JSON encoded, single attempt. Outcomes are returned to
//! the caller; the agent fans them out on a broadcast channel.

use std::time::Instant;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::Config;
use crate::errors::ErrorRecord;
use crate::http::get_client;
use crate::traces::TransactionSnapshot;

pub const ERRORS_ENDPOINT: &str = "errors/";
pub const TRANSACTIONS_ENDPOINT: &str = "transactions/";
pub const RELEASES_ENDPOINT: &str = "releases/";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("failed to serialize payload: {0}")]
    Serialization(String),
    #[error("failed to reach collector: {0}")]
    Transport(String),
    #[error("collector responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("delivery could not run: {0}")]
    Runtime(String),
}

/// Where the collector filed a delivered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub url: String,
}

/// Outcome notifications, one per delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Logged { url: String },
    Failed { error: DeliveryError },
}

impl From<&Result<Receipt, DeliveryError>> for DeliveryEvent {
    fn from(outcome: &Result<Receipt, DeliveryError>) -> Self {
        match outcome {
            Ok(receipt) => DeliveryEvent::Logged {
                url: receipt.url.clone(),
            },
            Err(error) => DeliveryEvent::Failed {
                error: error.clone(),
            },
        }
    }
}

/// Release notification posted to `releases/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub status: String,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Deployment {
    pub fn new(rev: impl Into<String>) -> Self {
        Self {
            status: "completed".to_string(),
            rev: rev.into(),
            branch: None,
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

#[derive(Deserialize)]
struct CollectorResponse {
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    client: reqwest::Client,
    base_url: String,
    secret_token: String,
}

impl Reporter {
    /// `None` unless the config is active and fully credentialed.
    #[must_use]
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.is_reportable() {
            return None;
        }
        Some(Self::new(
            get_client(config),
            &config.api_host,
            config.organization_id.as_deref()?,
            config.app_id.as_deref()?,
            config.secret_token.as_deref()?,
        ))
    }

    #[must_use]
    pub fn new(
        client: reqwest::Client,
        api_host: &str,
        organization_id: &str,
        app_id: &str,
        secret_token: &str,
    ) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/api/v1/organizations/{organization_id}/apps/{app_id}/",
                api_host.trim_end_matches('/')
            ),
            secret_token: secret_token.to_string(),
        }
    }

    #[must_use]
    pub fn endpoint(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    pub async fn send_error(&self, record: &ErrorRecord) -> Result<Receipt, DeliveryError> {
        self.post(ERRORS_ENDPOINT, record).await
    }

    pub async fn send_transaction(
        &self,
        transaction: &TransactionSnapshot,
    ) -> Result<Receipt, DeliveryError> {
        self.post(TRANSACTIONS_ENDPOINT, transaction).await
    }

    pub async fn send_deployment(&self, deployment: &Deployment) -> Result<Receipt, DeliveryError> {
        self.post(RELEASES_ENDPOINT, deployment).await
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        payload: &T,
    ) -> Result<Receipt, DeliveryError> {
        let url = self.endpoint(endpoint);
        let body =
            serde_json::to_vec(payload).map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        let time = Instant::now();
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_token))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let elapsed = time.elapsed();

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(
            "Delivered {endpoint} payload in {} ms with status {status}",
            elapsed.as_millis()
        );

        let url = location
            .or_else(|| {
                serde_json::from_str::<CollectorResponse>(&body)
                    .ok()
                    .and_then(|response| response.url)
            })
            .unwrap_or(url);
        Ok(Receipt { url })
    }
}

/// Completion of a fire-and-forget delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    receiver: oneshot::Receiver<Result<Receipt, DeliveryError>>,
}

impl DeliveryHandle {
    pub(crate) fn channel() -> (oneshot::Sender<Result<Receipt, DeliveryError>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    pub async fn outcome(self) -> Result<Receipt, DeliveryError> {
        self.receiver.await.unwrap_or_else(|_| {
            Err(DeliveryError::Runtime(
                "delivery task ended without an outcome".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::Transaction;
    use mockito::Matcher;
    use serde_json::json;

    fn reporter(host: &str) -> Reporter {
        Reporter::new(reqwest::Client::new(), host, "org-1", "app-1", "secret")
    }

    #[test]
    fn test_endpoints() {
        let reporter = reporter("https://collector.example.com/");
        assert_eq!(
            reporter.endpoint(ERRORS_ENDPOINT),
            "https://collector.example.com/api/v1/organizations/org-1/apps/app-1/errors/"
        );
    }

    #[test]
    fn test_from_config_requires_credentials() {
        assert!(Reporter::from_config(&Config::default()).is_none());
        let config = Config {
            app_id: Some("app".to_string()),
            organization_id: Some("org".to_string()),
            secret_token: Some("secret".to_string()),
            ..Config::default()
        };
        assert!(Reporter::from_config(&config).is_some());
        let inactive = Config {
            active: false,
            ..config
        };
        assert!(Reporter::from_config(&inactive).is_none());
    }

    #[tokio::test]
    async fn test_receipt_from_location_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/organizations/org-1/apps/app-1/releases/")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({"status": "completed", "rev": "abc123"})))
            .with_status(202)
            .with_header("location", "https://collector.example.com/releases/9")
            .create_async()
            .await;

        let receipt = reporter(&server.url())
            .send_deployment(&Deployment::new("abc123"))
            .await
            .unwrap();
        assert_eq!(receipt.url, "https://collector.example.com/releases/9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_receipt_from_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/organizations/org-1/apps/app-1/transactions/")
            .with_status(201)
            .with_body(r#"{"url": "https://collector.example.com/tx/1"}"#)
            .create_async()
            .await;

        let transaction = Transaction::new("GET /", "request");
        transaction.end(Some(200));
        let receipt = reporter(&server.url())
            .send_transaction(&transaction.snapshot())
            .await
            .unwrap();
        assert_eq!(receipt.url, "https://collector.example.com/tx/1");
    }

    #[tokio::test]
    async fn test_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(401)
            .with_body("bad token")
            .create_async()
            .await;

        let error = reporter(&server.url())
            .send_deployment(&Deployment::new("abc"))
            .await
            .unwrap_err();
        assert_eq!(
            error,
            DeliveryError::Status {
                status: 401,
                body: "bad token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_transport_error() {
        let error = reporter("http://127.0.0.1:1")
            .send_deployment(&Deployment::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(error, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_handle_without_outcome() {
        let (sender, handle) = DeliveryHandle::channel();
        drop(sender);
        assert!(matches!(
            handle.outcome().await,
            Err(DeliveryError::Runtime(_))
        ));
    }
}
