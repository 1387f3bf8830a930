// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::io::Write;

use crate::cache::CredentialCache;
use crate::configuration::EnvConfig;
use crate::errors::AppError;
use crate::models::{CredentialProcessOutput, CredentialRecord};
use crate::retriever::{CredentialEndpoint, CredentialRetriever, HttpsEndpoint, RetryPolicy};
use crate::tls;

/// One credential-process invocation for a resolved environment.
///
/// Without a cache every run takes the network path and nothing is written
/// back.
pub struct Application {
    settings: EnvConfig,
    cache: Option<CredentialCache>,
}

impl Application {
    pub fn new(settings: EnvConfig, cache: CredentialCache) -> Self {
        Self {
            settings,
            cache: Some(cache),
        }
    }

    pub fn without_cache(settings: EnvConfig) -> Self {
        Self {
            settings,
            cache: None,
        }
    }

    /// Uses the cache at `location`, or runs uncached if it could not be
    /// determined.
    pub fn from_cache_location(
        settings: EnvConfig,
        location: Result<CredentialCache, AppError>,
    ) -> Self {
        match location {
            Ok(cache) => Self::new(settings, cache),
            Err(err) => {
                tracing::warn!("[application] running without cache: {}", err);
                Self::without_cache(settings)
            }
        }
    }

    pub fn settings(&self) -> &EnvConfig {
        &self.settings
    }

    pub fn cache(&self) -> Option<&CredentialCache> {
        self.cache.as_ref()
    }

    /// Resolves credentials and writes them to `out` as one JSON document.
    pub async fn run<W: Write>(&self, out: W) -> Result<(), AppError> {
        let record = self.resolve_credentials(|| self.connect()).await?;
        emit_credentials(&record, out)
    }

    /// Builds the mutual-TLS endpoint for the configured role alias.
    pub fn connect(&self) -> Result<HttpsEndpoint, AppError> {
        let client = tls::build_client(&self.settings.tls_material())?;
        Ok(HttpsEndpoint::new(
            client,
            &self.settings.iot_endpoint,
            &self.settings.role_alias,
        ))
    }

    /// Cache first; on a miss, `connect` is called and the endpoint queried.
    ///
    /// A freshly retrieved record is validated before it is cached or
    /// returned. Failing to cache it is logged and does not fail the call.
    #[tracing::instrument(skip_all, fields(role_alias = %self.settings.role_alias))]
    pub async fn resolve_credentials<E, F>(&self, connect: F) -> Result<CredentialRecord, AppError>
    where
        E: CredentialEndpoint,
        F: FnOnce() -> Result<E, AppError>,
    {
        if let Some(cache) = &self.cache {
            let lookup = cache.read(
                self.settings.cache_buffer_minutes,
                self.settings.session_duration_sec,
            );
            tracing::debug!("[application] cache lookup: {:?}", lookup.status);
            if let Some(record) = lookup.into_fresh() {
                return Ok(record);
            }
        }

        let policy = RetryPolicy::new(self.settings.max_retries, self.settings.retry_delay())?;
        let retriever = CredentialRetriever::new(connect()?, policy);
        let record = retriever.retrieve().await?;
        record.validate()?;

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.write(&record, self.settings.session_duration_sec) {
                tracing::warn!("[application] failed to write cache: {}", err);
            }
        }

        Ok(record)
    }
}

/// Writes `record` in the credential-process output shape.
///
/// Nothing is written unless the record is complete.
pub fn emit_credentials<W: Write>(record: &CredentialRecord, mut out: W) -> Result<(), AppError> {
    record.validate()?;

    let output = CredentialProcessOutput::from(record);
    let mut payload = serde_json::to_vec(&output)?;
    payload.push(b'\n');

    let result = out.write_all(&payload).and_then(|()| out.flush());
    zeroize::Zeroize::zeroize(&mut payload);

    result.map_err(|err| AppError::OutputError(format!("failed to write credentials: {err}")))
}
