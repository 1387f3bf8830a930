// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::constants::CREDENTIAL_PROCESS_VERSION;
use crate::errors::AppError;

/// Temporary credentials issued by the role-alias endpoint.
///
/// Field names follow the endpoint's camelCase wire format, which is also the
/// shape persisted in the cache file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// RFC 3339 timestamp, kept verbatim as received.
    pub expiration: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl CredentialRecord {
    /// Parses the `expiration` field as an RFC 3339 timestamp.
    pub fn expires_at(&self) -> Result<DateTime<Utc>, AppError> {
        DateTime::parse_from_rfc3339(&self.expiration)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| {
                AppError::ValidationError(format!(
                    "invalid expiration {:?} (must be RFC 3339): {err}",
                    self.expiration
                ))
            })
    }

    /// Checks that every field is populated and the expiration parses.
    pub fn validate(&self) -> Result<(), AppError> {
        let missing: Vec<&str> = [
            ("AccessKeyId", &self.access_key_id),
            ("SecretAccessKey", &self.secret_access_key),
            ("SessionToken", &self.session_token),
            ("Expiration", &self.expiration),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::ValidationError(format!(
                "credentials missing {}",
                missing.join(", ")
            )));
        }

        self.expires_at().map(|_| ())
    }
}

/// Response body of `GET /role-aliases/{role}/credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsEnvelope {
    pub credentials: CredentialRecord,
}

/// On-disk cache representation.
///
/// A placeholder entry (seeded on the first read) carries neither
/// `credentials` nor `expiration` and is never usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    pub cache_created_at: DateTime<Utc>,
    pub session_duration: u64,
}

impl CacheEntry {
    pub fn placeholder(created_at: DateTime<Utc>, session_duration: u64) -> Self {
        Self {
            credentials: None,
            expiration: None,
            cache_created_at: created_at,
            session_duration,
        }
    }

    /// Builds an entry for `record`, rejecting an unparseable expiration.
    pub fn new(
        record: &CredentialRecord,
        created_at: DateTime<Utc>,
        session_duration: u64,
    ) -> Result<Self, AppError> {
        let expiration = record.expires_at()?;
        Ok(Self {
            credentials: Some(record.clone()),
            expiration: Some(expiration),
            cache_created_at: created_at,
            session_duration,
        })
    }
}

/// Document written to standard output for a credential-process caller.
#[derive(Serialize, ZeroizeOnDrop)]
pub struct CredentialProcessOutput {
    #[serde(rename = "Version")]
    pub version: u8,

    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "SessionToken")]
    pub session_token: String,

    #[serde(rename = "Expiration")]
    pub expiration: String,
}

impl fmt::Debug for CredentialProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProcessOutput")
            .field("version", &self.version)
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl From<&CredentialRecord> for CredentialProcessOutput {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            version: CREDENTIAL_PROCESS_VERSION,
            access_key_id: record.access_key_id.clone(),
            secret_access_key: record.secret_access_key.clone(),
            session_token: record.session_token.clone(),
            expiration: record.expiration.clone(),
        }
    }
}

/// One iteration of the retrieval loop. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalAttempt {
    /// 1-indexed.
    pub attempt: u32,
    pub error: Option<AppError>,
    /// Sleep applied before the next attempt, if one follows.
    pub delay: Option<Duration>,
}
