// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const APP_NAME: &str = "authencore";
pub const CACHE_FILE_NAME: &str = "cache.json";
pub const DEFAULT_CONFIG_FILE: &str = "authencore.yml";
pub const SYSTEM_CONFIG_DIR: &str = "/etc/authencore";

/// Bounds any single HTTP call made by the credential client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// `Version` field expected by credential-process callers.
pub const CREDENTIAL_PROCESS_VERSION: u8 = 1;

pub const CACHE_FILE_MODE: u32 = 0o600;
pub const CACHE_DIR_MODE: u32 = 0o700;

// Per-environment defaults when the config file omits a value
pub const DEFAULT_CACHE_BUFFER_MINUTES: u32 = 5;
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 3600; // 1 hour
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Non-200 response bodies are cut to this many characters in error messages.
pub const MAX_ERROR_BODY_CHARS: usize = 512;
