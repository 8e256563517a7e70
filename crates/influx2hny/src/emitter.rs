// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::EmitError;
use crate::event::Event;

/// Transmission layer that events are handed to after aggregation.
///
/// `send` is best effort and may fail per event. `flush` pushes whatever has
/// been sent so far towards the destination. Callers never retry a failed
/// `send`; retrying is up to the implementation.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn send(&self, event: Event) -> Result<(), EmitError>;

    async fn flush(&self) -> Result<(), EmitError>;
}
