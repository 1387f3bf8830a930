// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use authencore::application::Application;
use authencore::cache::CredentialCache;
use authencore::configuration::{HelperOptions, load_env_config};
use authencore::errors::AppError;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Where log events are written.
#[derive(Debug)]
enum LogDestination {
    Stderr,
    File(File),
    /// The requested file could not be opened; logs go to stderr.
    Fallback(String),
}

impl LogDestination {
    fn open(log_file: Option<&Path>) -> Self {
        match log_file {
            Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Self::File(file),
                Err(err) => {
                    Self::Fallback(format!("failed to open log file {}: {err}", path.display()))
                }
            },
            None => Self::Stderr,
        }
    }

    /// Fatal errors are echoed as plain text only when the logs themselves
    /// are not already on stderr.
    fn echo_errors(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// Standard output carries the credentials, so logs go to standard error or
/// to `log_file`. Returns whether fatal errors need a separate stderr line.
fn init_tracing(log_file: Option<&Path>) -> bool {
    let destination = LogDestination::open(log_file);
    let echo_errors = destination.echo_errors();

    let (writer, fallback_reason) = match destination {
        LogDestination::File(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
        LogDestination::Stderr => (BoxMakeWriter::new(std::io::stderr), None),
        LogDestination::Fallback(reason) => (BoxMakeWriter::new(std::io::stderr), Some(reason)),
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with_writer(writer)
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        .with_ansi(false)
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    if let Some(reason) = fallback_reason {
        tracing::warn!("[authencore] {}, logging to stderr", reason);
    }
    echo_errors
}

async fn run(options: HelperOptions) -> Result<()> {
    let settings = load_env_config(&options)
        .with_context(|| format!("failed to load config from {}", options.config.display()))?;

    let cache = match options.cache_path {
        Some(path) => Ok(CredentialCache::new(path)),
        None => CredentialCache::at_default_location(),
    };

    tracing::debug!(
        "[authencore] endpoint: {}, role alias: {}",
        settings.iot_endpoint,
        settings.role_alias
    );

    let application = Application::from_cache_location(settings, cache);
    application
        .run(std::io::stdout().lock())
        .await
        .context("failed to provide credentials")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // get configuration options from arguments and environment variables
    let options = HelperOptions::parse();

    let echo_errors = init_tracing(options.log_file.as_deref());

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("[authencore] {:#}", err);
            if echo_errors {
                eprintln!("authencore: {err:#}");
            }
            let code = err.downcast_ref::<AppError>().map_or(1, AppError::exit_code);
            ExitCode::from(code)
        }
    }
}
