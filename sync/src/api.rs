//! Network client for applying mutations to the remote service.
//!
//! Stateless: every call builds a fresh request from the then-current
//! collapsed mutation and classifies the response into one of three
//! outcomes. Retry policy lives entirely in the scheduler.

use async_trait::async_trait;
use loft_engine::MutationOp;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::store::PendingSnapshot;

/// Classification of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx: the mutation was applied.
    Success,
    /// Transport error, timeout, 429, or 5xx: retry with backoff.
    Retryable(String),
    /// Any other 4xx: the request is malformed or the identifier is
    /// invalid; retrying cannot help.
    Unrecoverable(String),
}

/// Seam between the scheduler and the network.
///
/// A send must observe `cancel` and return promptly when it flips to
/// `true`; a cancelled attempt is reported as retryable and must not
/// leave any local state behind.
#[async_trait]
pub trait MutationApi: Send + Sync {
    async fn send(&self, snapshot: &PendingSnapshot, cancel: watch::Receiver<bool>) -> Outcome;
}

/// Wire shape of one "apply mutation" request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationRequest<'a> {
    identifier: &'a str,
    operations: &'a [MutationOp],
    idempotency_token: String,
}

/// HTTP implementation of [`MutationApi`].
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client from config. Fails only on an invalid TLS or
    /// builder setup, which is a programming error surfaced early.
    pub fn new(config: &SyncConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classify(result: Result<reqwest::Response, reqwest::Error>) -> Outcome {
        match result {
            // Transport errors and timeouts are always retryable
            Err(err) => Outcome::Retryable(err.to_string()),
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Outcome::Success
                } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    Outcome::Retryable(format!("status {status}"))
                } else {
                    Outcome::Unrecoverable(format!("status {status}"))
                }
            }
        }
    }
}

#[async_trait]
impl MutationApi for ApiClient {
    async fn send(&self, snapshot: &PendingSnapshot, mut cancel: watch::Receiver<bool>) -> Outcome {
        let url = format!("{}/api/v1/mutations/{}", self.base_url, snapshot.identifier);
        let body = MutationRequest {
            identifier: &snapshot.identifier,
            operations: &snapshot.mutation.ops,
            idempotency_token: snapshot.idempotency_token(),
        };

        let request = self.http.put(&url).json(&body).send();

        tokio::select! {
            result = request => {
                let outcome = Self::classify(result);
                tracing::debug!(identifier = %snapshot.identifier, seq = snapshot.seq, ?outcome, "sync attempt finished");
                outcome
            }
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                tracing::debug!(identifier = %snapshot.identifier, "sync attempt cancelled");
                Outcome::Retryable("cancelled".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_statuses() {
        // Build minimal responses via http::Response conversion
        let ok = http::Response::builder().status(200).body("").unwrap();
        assert_eq!(
            ApiClient::classify(Ok(reqwest::Response::from(ok))),
            Outcome::Success
        );

        let throttled = http::Response::builder().status(429).body("").unwrap();
        assert!(matches!(
            ApiClient::classify(Ok(reqwest::Response::from(throttled))),
            Outcome::Retryable(_)
        ));

        let unavailable = http::Response::builder().status(503).body("").unwrap();
        assert!(matches!(
            ApiClient::classify(Ok(reqwest::Response::from(unavailable))),
            Outcome::Retryable(_)
        ));

        let bad_request = http::Response::builder().status(400).body("").unwrap();
        assert!(matches!(
            ApiClient::classify(Ok(reqwest::Response::from(bad_request))),
            Outcome::Unrecoverable(_)
        ));

        let forbidden = http::Response::builder().status(403).body("").unwrap();
        assert!(matches!(
            ApiClient::classify(Ok(reqwest::Response::from(forbidden))),
            Outcome::Unrecoverable(_)
        ));
    }

    #[test]
    fn request_body_shape() {
        use loft_engine::{collapse, Mutation};
        use serde_json::json;

        let snapshot = PendingSnapshot {
            identifier: "u1".into(),
            mutation: collapse(None, &Mutation::new(1000).set_attribute("color", json!("red"))),
            seq: 7,
        };
        let body = MutationRequest {
            identifier: &snapshot.identifier,
            operations: &snapshot.mutation.ops,
            idempotency_token: snapshot.idempotency_token(),
        };

        let encoded = serde_json::to_value(&body).unwrap();
        assert_eq!(encoded["identifier"], "u1");
        assert_eq!(encoded["idempotencyToken"], "u1:7");
        assert_eq!(encoded["operations"][0]["type"], "setAttribute");
    }
}
