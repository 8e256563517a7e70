// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{ErrorHook, ParseError, Recoverable};
use crate::line_protocol::LineParser;
use crate::sample::Sample;

/// Decodes newline-delimited records into samples and queues them for the
/// scheduler.
pub struct SampleReader<P> {
    parser: P,
    on_error: ErrorHook,
}

impl<P: LineParser> SampleReader<P> {
    pub fn new(parser: P, on_error: ErrorHook) -> Self {
        Self { parser, on_error }
    }

    /// Reads until end of input, cancellation, or the scheduler going away.
    ///
    /// Only an I/O error on the input is returned. Lines that fail to decode
    /// are reported and skipped.
    pub async fn read<R>(
        &self,
        input: R,
        intake: mpsc::Sender<Sample>,
        cancel_token: &CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut input = BufReader::new(input);
        let mut buf = Vec::new();
        let mut n_lines: u64 = 0;

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                () = cancel_token.cancelled() => {
                    debug!("Reader cancelled after {n_lines} lines");
                    return Ok(());
                }
                read = input.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                debug!("Reached end of input after {n_lines} lines");
                return Ok(());
            }
            n_lines += 1;

            let Some(sample) = self.decode(&buf) else {
                continue;
            };

            tokio::select! {
                biased;
                () = cancel_token.cancelled() => {
                    debug!("Reader cancelled after {n_lines} lines");
                    return Ok(());
                }
                sent = intake.send(sample) => {
                    if sent.is_err() {
                        debug!("Intake queue closed, stopping reader");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn decode(&self, raw: &[u8]) -> Option<Sample> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(_) => {
                (self.on_error)(&Recoverable::Decode {
                    line: String::from_utf8_lossy(raw).trim().to_string(),
                    source: ParseError::InvalidUtf8,
                });
                return None;
            }
        };
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        match self.parser.parse_line(line) {
            Ok(sample) => Some(sample),
            Err(source) => {
                (self.on_error)(&Recoverable::Decode {
                    line: line.to_string(),
                    source,
                });
                None
            }
        }
    }
}
