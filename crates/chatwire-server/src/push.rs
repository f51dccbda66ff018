//! Push gateways.
//!
//! `log` writes notifications to the log; `fcm` posts them to the Firebase
//! Cloud Messaging v1 `messages:send` endpoint.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chatwire_core::store::{PushError, PushGateway};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{PushBackend, PushConfig};

/// Build the configured gateway.
///
/// # Errors
///
/// Returns an error if the FCM gateway is selected without a project id or
/// access token, or its HTTP client cannot be built.
pub fn build(config: &PushConfig) -> Result<Arc<dyn PushGateway>> {
    match config.backend {
        PushBackend::Log => {
            info!("Push notifications are logged only");
            Ok(Arc::new(LogPushGateway))
        }
        PushBackend::Fcm => {
            if config.project_id.is_empty() {
                bail!("push.project_id is required for the fcm backend");
            }
            let Ok(token) = std::env::var(&config.access_token_env) else {
                bail!("{} is not set", config.access_token_env);
            };
            let gateway = FcmPushGateway::new(
                &config.endpoint,
                &config.project_id,
                token,
                config.timeout(),
            )?;
            info!(project = %config.project_id, "Using FCM push gateway");
            Ok(Arc::new(gateway))
        }
    }
}

/// Gateway that only logs notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        info!(token = %redact(token), title, body_len = body.len(), "Push notification");
        Ok(())
    }
}

/// Firebase Cloud Messaging v1 gateway.
pub struct FcmPushGateway {
    client: Client,
    url: String,
    access_token: String,
}

impl FcmPushGateway {
    /// Create a gateway for `project_id` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        project_id: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            access_token,
        })
    }
}

#[async_trait]
impl PushGateway for FcmPushGateway {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        let payload = json!({
            "message": {
                "token": token,
                "notification": {
                    "title": title,
                    "body": body,
                }
            }
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PushError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(token = %redact(token), "Push accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(token = %redact(token), status = %status, body = %body, "Push refused");
        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                Err(PushError::Rejected(redact(token)))
            }
            _ => Err(PushError::Unavailable(format!(
                "HTTP {} - {}",
                status,
                body.chars().take(200).collect::<String>()
            ))),
        }
    }
}

/// Shorten a device token for logs.
fn redact(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> FcmPushGateway {
        FcmPushGateway::new(
            &server.uri(),
            "demo",
            "secret".to_string(),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fcm_send() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "message": {
                    "token": "device-token",
                    "notification": {"title": "Message from alice", "body": "hi"}
                }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "projects/demo/messages/1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server)
            .send("device-token", "Message from alice", "hi")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fcm_unregistered_token_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("UNREGISTERED"))
            .mount(&server)
            .await;

        let err = gateway(&server).send("stale-token", "t", "b").await.unwrap_err();
        assert!(matches!(err, PushError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_fcm_server_error_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .mount(&server)
            .await;

        let err = gateway(&server).send("token", "t", "b").await.unwrap_err();
        match err {
            PushError::Unavailable(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_log_gateway_accepts() {
        LogPushGateway.send("abcdefghij", "t", "b").await.unwrap();
    }

    #[test]
    fn test_build_requires_project() {
        let config = PushConfig {
            backend: PushBackend::Fcm,
            ..Default::default()
        };
        assert!(build(&config).is_err());
        assert!(build(&PushConfig::default()).is_ok());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abcdefghij"), "...efghij");
        assert_eq!(redact("abc"), "...abc");
    }
}
