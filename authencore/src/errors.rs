// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::error::Error as StdError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("network error: {0}")]
    NetworkError(String),
    /// `status` is `None` when a 200 response carried an undecodable body.
    #[error("protocol error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ProtocolError { status: Option<u16>, message: String },
    #[error("credential retrieval failed after {attempts} attempts: {source}")]
    RetrievalExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },
    #[error("cache error: {0}")]
    CacheError(String),
    #[error("output error: {0}")]
    OutputError(String),
}

impl AppError {
    /// Whether a failed credential request is worth repeating.
    ///
    /// Transport failures and every endpoint response other than a usable
    /// 200 (any status, or an undecodable body) are retried. Errors raised
    /// before or after the request (configuration, validation, cache) are
    /// terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::ProtocolError { .. })
    }

    /// Process exit status reported for a fatal error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ConfigError(_) => 2,
            Self::ValidationError(_) => 3,
            Self::NetworkError(_) | Self::ProtocolError { .. } | Self::RetrievalExhausted { .. } => 4,
            Self::CacheError(_) => 5,
            Self::OutputError(_) => 1,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        AppError::OutputError(source.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(source: serde_yaml::Error) -> Self {
        AppError::ConfigError(source.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(source: validator::ValidationErrors) -> Self {
        AppError::ConfigError(source.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(source: reqwest::Error) -> Self {
        AppError::NetworkError(error_chain(&source))
    }
}

/// Flattens an error and its sources into one line.
///
/// `reqwest` and `rustls` keep the useful part (handshake alerts, refused
/// connections) in the source chain rather than the top-level message.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(status: Option<u16>) -> AppError {
        AppError::ProtocolError {
            status,
            message: "boom".to_string(),
        }
    }

    // ==================== Retry Classification Tests ====================

    #[test]
    fn test_network_error_is_retryable() {
        assert!(AppError::NetworkError("connection refused".to_string()).is_retryable());
    }

    #[test]
    fn test_undecodable_body_is_retryable() {
        assert!(protocol(None).is_retryable());
    }

    #[test]
    fn test_every_status_is_retryable() {
        for status in [400, 401, 403, 404, 408, 429, 500, 502, 503, 504] {
            assert!(protocol(Some(status)).is_retryable(), "status {status}");
        }
    }

    #[test]
    fn test_non_transport_errors_are_terminal() {
        assert!(!AppError::ConfigError("bad ca".to_string()).is_retryable());
        assert!(!AppError::ValidationError("empty".to_string()).is_retryable());
        assert!(!AppError::CacheError("denied".to_string()).is_retryable());
        let exhausted = AppError::RetrievalExhausted {
            attempts: 3,
            source: Box::new(AppError::NetworkError("reset".to_string())),
        };
        assert!(!exhausted.is_retryable());
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_protocol_error_display_includes_status() {
        assert_eq!(
            protocol(Some(403)).to_string(),
            "protocol error (HTTP 403): boom"
        );
        assert_eq!(protocol(None).to_string(), "protocol error: boom");
    }

    #[test]
    fn test_exhausted_display_wraps_last_cause() {
        let err = AppError::RetrievalExhausted {
            attempts: 2,
            source: Box::new(protocol(Some(503))),
        };
        assert_eq!(
            err.to_string(),
            "credential retrieval failed after 2 attempts: protocol error (HTTP 503): boom"
        );
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errors = [
            AppError::ConfigError(String::new()),
            AppError::ValidationError(String::new()),
            AppError::NetworkError(String::new()),
            protocol(None),
            AppError::CacheError(String::new()),
            AppError::OutputError(String::new()),
        ];
        for err in errors {
            assert_ne!(err.exit_code(), 0);
        }
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let inner = std::io::Error::other("handshake failure");
        let outer = AppError::RetrievalExhausted {
            attempts: 1,
            source: Box::new(AppError::NetworkError(inner.to_string())),
        };
        let chained = error_chain(&outer);
        assert!(chained.starts_with("credential retrieval failed after 1 attempts"));
        assert!(chained.contains("handshake failure"));
    }
}
