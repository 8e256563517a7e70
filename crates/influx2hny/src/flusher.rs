// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::{debug, error};

use crate::aggregator::Aggregator;
use crate::buffer::SampleBuffer;
use crate::emitter::EventEmitter;
use crate::errors::{EmitError, ErrorHook, Recoverable};

#[derive(Clone)]
pub struct Flusher {
    buffer: SampleBuffer,
    aggregator: Arc<Aggregator>,
    emitter: Arc<dyn EventEmitter>,
    on_error: ErrorHook,
}

pub struct FlusherConfig {
    pub buffer: SampleBuffer,
    pub aggregator: Arc<Aggregator>,
    pub emitter: Arc<dyn EventEmitter>,
    pub on_error: ErrorHook,
}

/// What a single flush handed to the emitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub samples: usize,
    pub events: usize,
    pub failed: usize,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Self {
        Flusher {
            buffer: config.buffer,
            aggregator: config.aggregator,
            emitter: config.emitter,
            on_error: config.on_error,
        }
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Drain the buffer, aggregate it and hand the events to the emitter.
    ///
    /// Per-event and flush failures go to the error hook. Only a fatal
    /// emitter error is returned.
    pub async fn flush(&self) -> Result<FlushSummary, EmitError> {
        let samples = self.buffer.drain();
        let mut summary = FlushSummary {
            samples: samples.len(),
            ..FlushSummary::default()
        };
        // An empty buffer still flushes the emitter, which may hold earlier events.
        if !samples.is_empty() {
            let events = self.aggregator.aggregate(samples);
            summary.events = events.len();
            debug!(
                "Flushing {} samples as {} events",
                summary.samples, summary.events
            );

            for event in events {
                if let Err(err) = self.emitter.send(event).await {
                    summary.failed += 1;
                    (self.on_error)(&Recoverable::Emit(err));
                }
            }
        }

        if let Err(err) = self.emitter.flush().await {
            if err.is_fatal() {
                error!("Giving up on flush: {err}");
                return Err(err);
            }
            (self.on_error)(&Recoverable::Emit(err));
        }

        Ok(summary)
    }
}
