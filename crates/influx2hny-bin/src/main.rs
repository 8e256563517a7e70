// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use influx2hny::{
    config::{Config, DEFAULT_MAX_BUFFER_SIZE},
    honeycomb::{HoneycombConfig, HoneycombEmitter, DEFAULT_API_HOST, DEFAULT_DATASET},
    pipeline::Pipeline,
    projection::UnprefixedTags,
};

/// Sends influx line protocol from stdin to Honeycomb, merging samples that
/// share a timestamp into wide events.
#[derive(Debug, Parser)]
#[command(name = "influx2hny", version, about)]
struct Args {
    /// Honeycomb API key.
    #[arg(short = 'k', long, env = "HONEYCOMB_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Honeycomb dataset to send events to.
    #[arg(short = 'd', long, env = "HONEYCOMB_DATASET", default_value = DEFAULT_DATASET)]
    dataset: String,

    #[arg(long, env = "HONEYCOMB_API_HOST", default_value = DEFAULT_API_HOST, hide = true)]
    api_host: String,

    /// Tag keys to send without the measurement name prefix. `host` is always unprefixed.
    #[arg(short = 't', long, value_delimiter = ',')]
    unprefixed_tags: Vec<String>,

    /// How often buffered samples are flushed.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    flush_interval: Duration,

    /// Number of buffered samples that triggers an immediate flush.
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    max_buffer_size: usize,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Log filter, e.g. `info` or `influx2hny=trace`.
    #[arg(long, env = "INFLUX2HNY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug".to_string()
    } else {
        args.log_level.to_lowercase()
    };
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level {log_level:?}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = Config {
        flush_interval: args.flush_interval,
        max_buffer_size: args.max_buffer_size,
        unprefixed_tags: UnprefixedTags::new(&args.unprefixed_tags),
        ..Config::default()
    };
    let emitter = match HoneycombEmitter::new(HoneycombConfig {
        dataset: args.dataset,
        api_host: args.api_host,
        ..HoneycombConfig::new(args.api_key)
    }) {
        Ok(emitter) => Arc::new(emitter),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let pipeline = match Pipeline::new(config, emitter) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel_token.clone()));

    info!("Reading line protocol from stdin");
    match pipeline.process(tokio::io::stdin(), cancel_token).await {
        Ok(()) => {
            debug!("Shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn cancel_on_shutdown_signal(cancel_token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = cancel_token.cancelled() => return,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {e}");
                return;
            }
        }
        () = terminate => {}
    }
    info!("Shutdown signal received, flushing");
    cancel_token.cancel();
}
