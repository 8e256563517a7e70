// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control loop that moves samples from the intake queue into the buffer and
//! decides when to flush.
//!
//! ```text
//!            first sample          buffer full / timer
//!   Idle ─────────────────▶ Accumulating ─────────────▶ Flushing ──▶ Idle
//!                                 │                         ▲
//!                                 └─ cancel / end of input ─┘──▶ Stopped
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::Run;
use crate::flusher::Flusher;
use crate::sample::Sample;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum SchedulerState {
    #[display("idle")]
    Idle,
    #[display("accumulating")]
    Accumulating,
    #[display("flushing")]
    Flushing,
    #[display("stopped")]
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
enum FlushTrigger {
    #[display("buffer full")]
    BufferFull,
    #[display("timer")]
    Timer,
    #[display("cancellation")]
    Cancelled,
    #[display("end of input")]
    IntakeClosed,
}

pub struct FlushScheduler {
    intake: mpsc::Receiver<Sample>,
    flusher: Flusher,
    flush_interval: Duration,
    max_buffer_size: usize,
    cancel_token: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl FlushScheduler {
    pub fn new(
        intake: mpsc::Receiver<Sample>,
        flusher: Flusher,
        flush_interval: Duration,
        max_buffer_size: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            intake,
            flusher,
            // `interval_at` panics on a zero period.
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            max_buffer_size: max_buffer_size.max(1),
            cancel_token,
            state,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Handle for flushing from outside the loop. Shares the buffer lock.
    pub fn flusher(&self) -> Flusher {
        self.flusher.clone()
    }

    /// Runs until cancellation, end of input or a fatal emitter error.
    pub async fn run(mut self) -> Result<(), Run> {
        // The first tick of a plain `interval` is immediate, start one period out instead.
        let mut timer = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    return self.stop(FlushTrigger::Cancelled).await;
                }
                sample = self.intake.recv() => match sample {
                    Some(sample) => {
                        self.state.send_if_modified(|state| {
                            if *state == SchedulerState::Idle {
                                *state = SchedulerState::Accumulating;
                                true
                            } else {
                                false
                            }
                        });
                        if self.flusher.buffer().push(sample) >= self.max_buffer_size {
                            self.flush(FlushTrigger::BufferFull).await?;
                        }
                    }
                    None => return self.stop(FlushTrigger::IntakeClosed).await,
                },
                _ = timer.tick() => {
                    self.flush(FlushTrigger::Timer).await?;
                }
            }
        }
    }

    async fn flush(&self, trigger: FlushTrigger) -> Result<(), Run> {
        self.state.send_replace(SchedulerState::Flushing);
        debug!("Flushing buffer on {trigger}");

        match self.flusher.flush().await {
            Ok(summary) => {
                debug!(
                    "Flushed {} samples as {} events ({} failed)",
                    summary.samples, summary.events, summary.failed
                );
                self.state.send_replace(SchedulerState::Idle);
                Ok(())
            }
            Err(err) => {
                error!("Stopping after fatal emitter error: {err}");
                self.state.send_replace(SchedulerState::Stopped);
                self.cancel_token.cancel();
                Err(Run::Emit(err))
            }
        }
    }

    async fn stop(&self, trigger: FlushTrigger) -> Result<(), Run> {
        self.flush(trigger).await?;
        self.state.send_replace(SchedulerState::Stopped);
        debug!("Flush scheduler stopped on {trigger}");
        Ok(())
    }
}
