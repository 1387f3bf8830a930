// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Authencore
//!
//! A credential-process helper that exchanges a device certificate for
//! temporary cloud credentials.
//!
//! ## Architecture
//!
//! ```text
//! caller -> authencore -> cache file (fast path)
//!                |
//!                +-> mutual TLS -> role-alias credentials endpoint
//! ```
//!
//! Each invocation is a short-lived process:
//!
//! 1. **Configuration**: the active environment is selected from a YAML file
//! 2. **Cache**: a fresh cached record is emitted without touching the network
//! 3. **Retrieval**: otherwise a mutual-TLS client requests new credentials,
//!    retrying transient failures with linear backoff
//! 4. **Write-back**: the new record is cached (owner read/write only)
//! 5. **Output**: one JSON document on standard output
//!
//! ## Modules
//!
//! - [`application`]: Orchestration of cache, retrieval and output
//! - [`cache`]: On-disk credential cache with freshness rules
//! - [`configuration`]: CLI options and YAML config discovery
//! - [`constants`]: Configuration constants for the application
//! - [`errors`]: Application error types, retry classification, exit codes
//! - [`models`]: Credential, cache entry and output types
//! - [`retriever`]: Credential request with bounded retries
//! - [`tls`]: Mutual-TLS HTTPS client construction
//!
//! ## Usage
//!
//! ```bash
//! authencore --config /etc/authencore/authencore.yml --environment prod
//! ```
//!
//! ## Security Considerations
//!
//! - Credential data is zeroized on drop and redacted from debug output
//! - The cache file is created with mode 0600 in a 0700 directory
//! - TLS is restricted to AES-256-GCM suites with X25519/P-384 key exchange
//! - Nothing is written to standard output unless the record is complete

pub mod application;
pub mod cache;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod models;
pub mod retriever;
pub mod tls;
