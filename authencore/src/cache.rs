// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! On-disk credential cache.
//!
//! The cache file is shared by every invocation of the helper. A read never
//! fails the run: an absent, unreadable or corrupt file is a miss. Writes go
//! to a temporary file in the same directory that is renamed over the cache
//! file, so readers see either the old or the new entry. There is no
//! cross-process lock; concurrent writers race and the last rename wins.
//!
//! Freshness is anchored on when the entry was written, not on the
//! credential's own expiration:
//!
//! ```text
//! fresh  <=>  now + buffer_minutes  <  cache_created_at + session_duration
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};

use crate::constants::{APP_NAME, CACHE_FILE_NAME};
use crate::errors::AppError;
use crate::models::{CacheEntry, CredentialRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No usable entry: absent, corrupt, placeholder or incomplete.
    Miss,
    /// The entry was written under a different session duration.
    StaleConfig,
    Expired,
    Fresh,
}

/// Outcome of [`CredentialCache::read`]. The record is only present when fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub status: CacheStatus,
    pub record: Option<CredentialRecord>,
}

impl CacheLookup {
    fn unusable(status: CacheStatus) -> Self {
        Self {
            status,
            record: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == CacheStatus::Fresh && self.record.is_some()
    }

    pub fn into_fresh(self) -> Option<CredentialRecord> {
        match self.status {
            CacheStatus::Fresh => self.record,
            _ => None,
        }
    }
}

/// `now + buffer_minutes < created_at + session_duration_secs`.
///
/// Arithmetic overflow counts as not fresh.
pub fn is_fresh(
    created_at: DateTime<Utc>,
    session_duration_secs: u64,
    buffer_minutes: u32,
    now: DateTime<Utc>,
) -> bool {
    let session_expiration = i64::try_from(session_duration_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|duration| created_at.checked_add_signed(duration));
    let buffer_time = TimeDelta::try_minutes(i64::from(buffer_minutes))
        .and_then(|buffer| now.checked_add_signed(buffer));

    match (buffer_time, session_expiration) {
        (Some(buffer_time), Some(session_expiration)) => buffer_time < session_expiration,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCache {
    path: PathBuf,
}

impl CredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<user cache dir>/authencore/cache.json`.
    pub fn at_default_location() -> Result<Self, AppError> {
        let base = dirs::cache_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| AppError::CacheError("could not determine cache directory".to_string()))?;

        Ok(Self::new(base.join(APP_NAME).join(CACHE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, buffer_minutes: u32, session_duration_secs: u64) -> CacheLookup {
        self.read_at(Utc::now(), buffer_minutes, session_duration_secs)
    }

    /// [`read`](Self::read) against an explicit clock.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read_at(
        &self,
        now: DateTime<Utc>,
        buffer_minutes: u32,
        session_duration_secs: u64,
    ) -> CacheLookup {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!("[cache] no cache file, seeding placeholder");
                let placeholder = CacheEntry::placeholder(now, session_duration_secs);
                if let Err(err) = self.persist(&placeholder) {
                    tracing::warn!("[cache] failed to seed placeholder: {}", err);
                }
                return CacheLookup::unusable(CacheStatus::Miss);
            }
            Err(err) => {
                tracing::warn!("[cache] failed to read cache file: {}", err);
                return CacheLookup::unusable(CacheStatus::Miss);
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&contents) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("[cache] failed to decode cache file: {}", err);
                return CacheLookup::unusable(CacheStatus::Miss);
            }
        };

        if entry.session_duration != session_duration_secs {
            tracing::info!(
                "[cache] session duration changed from {} to {}, invalidating cache",
                entry.session_duration,
                session_duration_secs
            );
            return CacheLookup::unusable(CacheStatus::StaleConfig);
        }

        if !is_fresh(
            entry.cache_created_at,
            session_duration_secs,
            buffer_minutes,
            now,
        ) {
            tracing::debug!("[cache] entry created at {} has expired", entry.cache_created_at);
            return CacheLookup::unusable(CacheStatus::Expired);
        }

        match entry.credentials {
            Some(record) if record.validate().is_ok() => CacheLookup {
                status: CacheStatus::Fresh,
                record: Some(record),
            },
            _ => {
                tracing::debug!("[cache] entry holds no usable credentials");
                CacheLookup::unusable(CacheStatus::Miss)
            }
        }
    }

    pub fn write(&self, record: &CredentialRecord, session_duration_secs: u64) -> Result<(), AppError> {
        self.write_at(Utc::now(), record, session_duration_secs)
    }

    /// [`write`](Self::write) against an explicit clock.
    ///
    /// # Errors
    ///
    /// - [`AppError::ValidationError`] if the expiration is not RFC 3339; the
    ///   existing cache file is left untouched
    /// - [`AppError::CacheError`] if the file cannot be written or its
    ///   permissions cannot be restricted
    #[tracing::instrument(skip(self, record), fields(path = %self.path.display()))]
    pub fn write_at(
        &self,
        now: DateTime<Utc>,
        record: &CredentialRecord,
        session_duration_secs: u64,
    ) -> Result<(), AppError> {
        let entry = CacheEntry::new(record, now, session_duration_secs)?;
        self.persist(&entry)?;
        tracing::debug!("[cache] wrote credentials expiring at {}", record.expiration);
        Ok(())
    }

    fn persist(&self, entry: &CacheEntry) -> Result<(), AppError> {
        let payload = serde_json::to_vec(entry)
            .map_err(|err| AppError::CacheError(format!("failed to encode cache entry: {err}")))?;

        self.ensure_parent_dir()?;
        write_atomic(&self.path, &payload)?;
        restrict_permissions(&self.path)
    }

    fn ensure_parent_dir(&self) -> Result<(), AppError> {
        let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
            return Ok(());
        };

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(crate::constants::CACHE_DIR_MODE);
        }
        builder.create(dir).map_err(|err| {
            AppError::CacheError(format!("failed to create {}: {err}", dir.display()))
        })
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), AppError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| CACHE_FILE_NAME.to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.{:08x}.tmp", fastrand::u32(..)));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(crate::constants::CACHE_FILE_MODE);
    }

    let result = options
        .open(&temp_path)
        .and_then(|mut file| {
            file.write_all(payload)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, path));

    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(AppError::CacheError(format!(
            "failed to write {}: {err}",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(
        path,
        fs::Permissions::from_mode(crate::constants::CACHE_FILE_MODE),
    )
    .map_err(|err| {
        AppError::CacheError(format!(
            "failed to restrict permissions on {}: {err}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AppError> {
    Ok(())
}
