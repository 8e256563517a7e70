// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the pipeline.
//!
//! Only [`Run`] ever escapes a pipeline run. Everything else is recoverable
//! and is surfaced through an [`ErrorHook`] as a [`Recoverable`].

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{error, warn};

/// Failure to decode one line of input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("missing measurement name")]
    MissingName,
    #[error("missing field set")]
    MissingFields,
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("duplicate tag key: {0}")]
    DuplicateTag(String),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("unterminated string field value")]
    UnterminatedString,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("unexpected data after timestamp: {0}")]
    TrailingData(String),
}

/// Failure to add a single projected field to an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field {key} has a non-finite value")]
    NonFinite { key: String },
    #[error("field {key} is already set to a different value")]
    Collision { key: String },
}

/// Failure to hand events to, or flush, the transmission layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmitError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("error shipping events ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),
    #[error("{rejected} of {total} events rejected: {reason}")]
    Rejected {
        rejected: usize,
        total: usize,
        reason: String,
    },
    #[error("pending event queue is full ({0} events), event dropped")]
    Overflow(usize),
}

impl EmitError {
    /// Authentication failures will never succeed on a later flush.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Destination(Some(status), _)
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

/// Anything that is reported and skipped instead of stopping the pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Recoverable {
    #[error("failed to parse line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to add field to event: {0}")]
    Field(#[from] FieldError),
    #[error("failed to emit events: {0}")]
    Emit(#[from] EmitError),
}

/// Fatal outcome of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Run {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("fatal emitter error: {0}")]
    Emit(EmitError),
    #[error("pipeline task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Observer for recoverable errors. Called inline, must not block.
pub type ErrorHook = Arc<dyn Fn(&Recoverable) + Send + Sync>;

/// Hook used when none is injected: reports through `tracing`.
#[must_use]
pub fn log_errors() -> ErrorHook {
    Arc::new(|err: &Recoverable| match err {
        Recoverable::Decode { .. } | Recoverable::Field(_) => warn!("{err}"),
        Recoverable::Emit(_) => error!("{err}"),
    })
}
