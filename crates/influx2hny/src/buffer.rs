// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use crate::sample::Sample;

/// Samples accumulated since the last flush.
///
/// Only the scheduler appends, but a forced flush from another task drains
/// through the same lock, so a drain never interleaves with an append.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }

    /// Appends a sample and returns the new length.
    pub fn push(&self, sample: Sample) -> usize {
        #[allow(clippy::expect_used)]
        let mut samples = self.samples.lock().expect("lock poisoned");
        samples.push(sample);
        samples.len()
    }

    /// Takes every buffered sample, leaving the buffer empty.
    pub fn drain(&self) -> Vec<Sample> {
        #[allow(clippy::expect_used)]
        let mut samples = self.samples.lock().expect("lock poisoned");
        let capacity = samples.capacity();
        std::mem::replace(&mut *samples, Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let samples = self.samples.lock().expect("lock poisoned");
        samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
