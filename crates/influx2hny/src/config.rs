// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::errors::ConfigError;
use crate::projection::UnprefixedTags;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_INTAKE_CAPACITY: usize = 1000;

/// Settings for the buffering and aggregation pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Period of the timer-triggered flush.
    pub flush_interval: Duration,
    /// Buffer length that triggers an immediate flush.
    pub max_buffer_size: usize,
    /// Tag keys sent as-is instead of `<name>.<key>`. `host` is always one.
    pub unprefixed_tags: UnprefixedTags,
    /// Samples the reader may queue ahead of the scheduler.
    pub intake_capacity: usize,
    /// Skip flat events that ended up with no fields.
    pub drop_empty_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            unprefixed_tags: UnprefixedTags::default(),
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            drop_empty_events: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if self.max_buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max buffer size must be greater than 0".to_string(),
            ));
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "intake capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
