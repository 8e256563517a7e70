// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod buffer;
pub mod config;
pub mod emitter;
pub mod errors;
pub mod event;
pub mod flusher;
pub mod honeycomb;
pub mod line_protocol;
pub mod pipeline;
pub mod projection;
pub mod reader;
pub mod sample;
pub mod scheduler;
