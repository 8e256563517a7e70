// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::Aggregator;
use crate::buffer::SampleBuffer;
use crate::config::Config;
use crate::emitter::EventEmitter;
use crate::errors::{log_errors, ConfigError, ErrorHook, Run};
use crate::flusher::{Flusher, FlusherConfig};
use crate::line_protocol::{LineParser, LineProtocolParser};
use crate::reader::SampleReader;
use crate::scheduler::FlushScheduler;

/// Wires a reader and a flush scheduler around one emitter.
pub struct Pipeline<P = LineProtocolParser> {
    config: Config,
    parser: P,
    emitter: Arc<dyn EventEmitter>,
    on_error: ErrorHook,
}

impl Pipeline<LineProtocolParser> {
    pub fn new(config: Config, emitter: Arc<dyn EventEmitter>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            parser: LineProtocolParser::new(),
            emitter,
            on_error: log_errors(),
        })
    }
}

impl<P> Pipeline<P>
where
    P: LineParser + Clone,
{
    pub fn with_parser<Q: LineParser + Clone>(self, parser: Q) -> Pipeline<Q> {
        Pipeline {
            config: self.config,
            parser,
            emitter: self.emitter,
            on_error: self.on_error,
        }
    }

    #[must_use]
    pub fn with_error_hook(mut self, on_error: ErrorHook) -> Self {
        self.on_error = on_error;
        self
    }

    /// Reads `input` to the end, or until `cancel_token` fires, flushing
    /// along the way. Returns once the last flush has been handed to the
    /// emitter.
    pub async fn process<R>(&self, input: R, cancel_token: CancellationToken) -> Result<(), Run>
    where
        R: AsyncRead + Unpin,
    {
        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity);

        let aggregator = Aggregator::new(
            self.config.unprefixed_tags.clone(),
            Arc::clone(&self.on_error),
        )
        .drop_empty_events(self.config.drop_empty_events);
        let flusher = Flusher::new(FlusherConfig {
            buffer: SampleBuffer::with_capacity(self.config.max_buffer_size),
            aggregator: Arc::new(aggregator),
            emitter: Arc::clone(&self.emitter),
            on_error: Arc::clone(&self.on_error),
        });
        let scheduler = FlushScheduler::new(
            intake_rx,
            flusher,
            self.config.flush_interval,
            self.config.max_buffer_size,
            cancel_token.clone(),
        );
        let scheduler_handle = tokio::spawn(scheduler.run());

        let reader = SampleReader::new(self.parser.clone(), Arc::clone(&self.on_error));
        // Dropping the sender at the end of `read` lets the scheduler see end of input.
        let read_result = reader.read(input, intake_tx, &cancel_token).await;
        if let Err(err) = &read_result {
            error!("Failed to read input: {err}");
            cancel_token.cancel();
        }

        let scheduler_result = match scheduler_handle.await {
            Ok(result) => result,
            Err(err) => Err(Run::Task(err.to_string())),
        };
        read_result?;
        debug!("Pipeline finished");
        scheduler_result
    }
}
