// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Credential retrieval with bounded, linear backoff.
//!
//! Each attempt is a single `GET https://{endpoint}/role-aliases/{role}/credentials`.
//! Failures are classified by [`AppError::is_retryable`]: retryable failures
//! are repeated up to the configured attempt count, sleeping `base_delay * i`
//! after the i-th failure; terminal failures are returned immediately.

use std::time::Duration;

use crate::constants::MAX_ERROR_BODY_CHARS;
use crate::errors::{AppError, error_chain};
use crate::models::{CredentialRecord, CredentialsEnvelope, RetrievalAttempt};

/// A source of credentials that can be asked once per attempt.
#[allow(async_fn_in_trait)]
pub trait CredentialEndpoint {
    async fn fetch(&self) -> Result<CredentialRecord, AppError>;
}

/// The role-alias credentials endpoint reached over a mutual-TLS client.
#[derive(Debug, Clone)]
pub struct HttpsEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpsEndpoint {
    pub fn new(client: reqwest::Client, endpoint: &str, role_alias: &str) -> Self {
        Self {
            client,
            url: credentials_url(endpoint, role_alias),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CredentialEndpoint for HttpsEndpoint {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<CredentialRecord, AppError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        decode_response(status, &body)
    }
}

pub fn credentials_url(endpoint: &str, role_alias: &str) -> String {
    format!("https://{endpoint}/role-aliases/{role_alias}/credentials")
}

/// Turns a raw HTTP status and body into a credential record.
pub fn decode_response(status: u16, body: &[u8]) -> Result<CredentialRecord, AppError> {
    if status != 200 {
        let text: String = String::from_utf8_lossy(body)
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        return Err(AppError::ProtocolError {
            status: Some(status),
            message: format!("request failed: {}", text.trim()),
        });
    }

    let envelope: CredentialsEnvelope =
        serde_json::from_slice(body).map_err(|err| AppError::ProtocolError {
            status: None,
            message: format!("failed to parse credentials response: {err}"),
        })?;

    Ok(envelope.credentials)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self, AppError> {
        if max_attempts == 0 {
            return Err(AppError::ConfigError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep applied after the `attempt`-th failure (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

pub struct CredentialRetriever<E> {
    endpoint: E,
    policy: RetryPolicy,
}

impl<E: CredentialEndpoint> CredentialRetriever<E> {
    pub fn new(endpoint: E, policy: RetryPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub async fn retrieve(&self) -> Result<CredentialRecord, AppError> {
        self.retrieve_with_history().await.0
    }

    /// Runs the retry loop and also returns what happened on each attempt.
    ///
    /// # Errors
    ///
    /// - a terminal failure, as returned by the endpoint
    /// - [`AppError::RetrievalExhausted`] wrapping the last retryable failure
    pub async fn retrieve_with_history(
        &self,
    ) -> (Result<CredentialRecord, AppError>, Vec<RetrievalAttempt>) {
        let max_attempts = self.policy.max_attempts();
        let mut history = Vec::with_capacity(max_attempts as usize);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.endpoint.fetch().await {
                Ok(record) => {
                    tracing::debug!("[retriever] credentials received on attempt {}", attempt);
                    history.push(RetrievalAttempt {
                        attempt,
                        error: None,
                        delay: None,
                    });
                    return (Ok(record), history);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::error!(attempt, error = %error_chain(&err), "[retriever] terminal failure");
                history.push(RetrievalAttempt {
                    attempt,
                    error: Some(err.clone()),
                    delay: None,
                });
                return (Err(err), history);
            }

            if attempt >= max_attempts {
                tracing::error!(attempt, error = %error_chain(&err), "[retriever] retries exhausted");
                history.push(RetrievalAttempt {
                    attempt,
                    error: Some(err.clone()),
                    delay: None,
                });
                let exhausted = AppError::RetrievalExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                };
                return (Err(exhausted), history);
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error_chain(&err),
                "[retriever] attempt failed, retrying"
            );
            history.push(RetrievalAttempt {
                attempt,
                error: Some(err),
                delay: Some(delay),
            });
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record() -> CredentialRecord {
        CredentialRecord {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: "2026-10-19T12:00:00Z".to_string(),
        }
    }

    /// Replays scripted outcomes, then repeats the fallback forever.
    struct ScriptedEndpoint {
        script: Mutex<VecDeque<Result<CredentialRecord, AppError>>>,
        fallback: AppError,
        calls: AtomicU32,
    }

    impl ScriptedEndpoint {
        fn new(script: Vec<Result<CredentialRecord, AppError>>, fallback: AppError) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn always(err: AppError) -> Self {
            Self::new(Vec::new(), err)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialEndpoint for ScriptedEndpoint {
        async fn fetch(&self) -> Result<CredentialRecord, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(self.fallback.clone()))
        }
    }

    fn unavailable() -> AppError {
        AppError::ProtocolError {
            status: Some(503),
            message: "request failed: unavailable".to_string(),
        }
    }

    fn assert_elapsed(start: tokio::time::Instant, expected_ms: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_millis(expected_ms);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    fn policy(max_attempts: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(base_ms)).unwrap()
    }

    // ==================== URL and Decoding Tests ====================

    #[test]
    fn test_credentials_url() {
        assert_eq!(
            credentials_url("abc123.credentials.iot.us-east-1.amazonaws.com", "edge-role"),
            "https://abc123.credentials.iot.us-east-1.amazonaws.com/role-aliases/edge-role/credentials"
        );
    }

    #[test]
    fn test_decode_response_success() {
        let body = br#"{"credentials":{"accessKeyId":"ASIAEXAMPLE","secretAccessKey":"secret","sessionToken":"token","expiration":"2026-10-19T12:00:00Z"}}"#;
        assert_eq!(decode_response(200, body).unwrap(), record());
    }

    #[test]
    fn test_decode_response_non_200() {
        let err = decode_response(403, b"{\"message\":\"Forbidden\"}").unwrap_err();
        assert_eq!(
            err,
            AppError::ProtocolError {
                status: Some(403),
                message: "request failed: {\"message\":\"Forbidden\"}".to_string(),
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_response_truncates_large_bodies() {
        let body = vec![b'x'; MAX_ERROR_BODY_CHARS * 4];
        match decode_response(500, &body) {
            Err(AppError::ProtocolError { message, .. }) => {
                assert!(message.len() <= MAX_ERROR_BODY_CHARS + "request failed: ".len());
            }
            other => panic!("expected ProtocolError, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_malformed_body_is_retryable() {
        let err = decode_response(200, b"<html>").unwrap_err();
        assert!(matches!(err, AppError::ProtocolError { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_response_missing_fields() {
        let err = decode_response(200, br#"{"credentials":{"accessKeyId":"A"}}"#).unwrap_err();
        assert!(matches!(err, AppError::ProtocolError { status: None, .. }));
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_policy_rejects_zero_attempts() {
        assert!(matches!(
            RetryPolicy::new(0, Duration::from_millis(10)),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_policy_linear_delays() {
        let policy = policy(4, 250);
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(2), Duration::from_millis(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(750));
    }

    #[test]
    fn test_policy_zero_delay() {
        assert_eq!(policy(3, 0).delay_after(3), Duration::ZERO);
    }

    // ==================== Retry Loop Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let retriever = CredentialRetriever::new(
            ScriptedEndpoint::new(vec![Ok(record())], unavailable()),
            policy(3, 100),
        );
        let (result, history) = retriever.retrieve_with_history().await;

        assert_eq!(result.unwrap(), record());
        assert_eq!(retriever.endpoint().calls(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let endpoint = ScriptedEndpoint::new(
            vec![
                Err(AppError::NetworkError("connection reset".to_string())),
                Err(unavailable()),
                Ok(record()),
            ],
            unavailable(),
        );
        let retriever = CredentialRetriever::new(endpoint, policy(5, 100));
        let start = tokio::time::Instant::now();

        let (result, history) = retriever.retrieve_with_history().await;

        assert_eq!(result.unwrap(), record());
        assert_eq!(retriever.endpoint().calls(), 3);
        let delays: Vec<_> = history.iter().map(|a| a.delay).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                None
            ]
        );
        assert_elapsed(start, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_exactly_n_attempts() {
        let retriever = CredentialRetriever::new(ScriptedEndpoint::always(unavailable()), policy(4, 50));
        let start = tokio::time::Instant::now();

        let (result, history) = retriever.retrieve_with_history().await;

        assert_eq!(retriever.endpoint().calls(), 4);
        assert_eq!(
            result.unwrap_err(),
            AppError::RetrievalExhausted {
                attempts: 4,
                source: Box::new(unavailable()),
            }
        );
        let attempts: Vec<u32> = history.iter().map(|a| a.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
        let delays: Vec<_> = history.iter().map(|a| a.delay).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(50)),
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(150)),
                None
            ]
        );
        // no sleep after the final attempt
        assert_elapsed(start, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let retriever = CredentialRetriever::new(
            ScriptedEndpoint::always(AppError::NetworkError("timed out".to_string())),
            policy(1, 1000),
        );
        let start = tokio::time::Instant::now();

        let result = retriever.retrieve().await;

        assert!(matches!(
            result,
            Err(AppError::RetrievalExhausted { attempts: 1, .. })
        ));
        assert_eq!(retriever.endpoint().calls(), 1);
        assert_elapsed(start, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_status_is_retried_until_exhausted() {
        let forbidden = AppError::ProtocolError {
            status: Some(403),
            message: "request failed: invalid role alias".to_string(),
        };
        let retriever = CredentialRetriever::new(ScriptedEndpoint::always(forbidden.clone()), policy(3, 10));
        let start = tokio::time::Instant::now();

        let (result, history) = retriever.retrieve_with_history().await;

        assert_eq!(retriever.endpoint().calls(), 3);
        assert_eq!(
            result.unwrap_err(),
            AppError::RetrievalExhausted {
                attempts: 3,
                source: Box::new(forbidden),
            }
        );
        assert_eq!(history.len(), 3);
        assert_elapsed(start, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_stops_immediately() {
        let invalid = AppError::ValidationError("credentials missing SessionToken".to_string());
        let retriever = CredentialRetriever::new(ScriptedEndpoint::always(invalid.clone()), policy(5, 100));

        let (result, history) = retriever.retrieve_with_history().await;

        assert_eq!(result.unwrap_err(), invalid);
        assert_eq!(retriever.endpoint().calls(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delay, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_after_retryable_one() {
        let invalid = AppError::ValidationError("invalid expiration".to_string());
        let endpoint = ScriptedEndpoint::new(vec![Err(unavailable())], invalid.clone());
        let retriever = CredentialRetriever::new(endpoint, policy(5, 100));

        let result = retriever.retrieve().await;

        assert_eq!(result.unwrap_err(), invalid);
        assert_eq!(retriever.endpoint().calls(), 2);
    }
}
