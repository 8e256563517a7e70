// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB line protocol decoding.
//!
//! ```text
//! measurement[,tag_key=tag_value...] field_key=field_value[,field_key=field_value...] [timestamp]
//! ```
//!
//! Commas, equals signs and spaces in names, keys and tag values are escaped
//! with a backslash. String field values are double quoted and may contain
//! escaped quotes and backslashes.

use chrono::{DateTime, Utc};
use ustr::Ustr;

use crate::errors::ParseError;
use crate::sample::{Field, FieldValue, Sample, Tag};

/// Turns one line of text into a [`Sample`].
pub trait LineParser: Send + Sync {
    fn parse_line(&self, line: &str) -> Result<Sample, ParseError>;
}

/// Unit of the trailing integer timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl Precision {
    fn nanos_per_unit(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LineProtocolParser {
    precision: Precision,
}

impl LineProtocolParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, ParseError> {
        let invalid = || ParseError::InvalidTimestamp(raw.to_string());
        let value: i64 = raw.parse().map_err(|_| invalid())?;
        let nanos = value
            .checked_mul(self.precision.nanos_per_unit())
            .ok_or_else(invalid)?;
        Ok(DateTime::from_timestamp_nanos(nanos))
    }
}

impl LineParser for LineProtocolParser {
    fn parse_line(&self, line: &str) -> Result<Sample, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (series, field_set, timestamp) = split_sections(line)?;

        let mut series_parts = split_unescaped(series, b',').into_iter();
        let name = series_parts
            .next()
            .map(unescape)
            .filter(|name| !name.is_empty())
            .ok_or(ParseError::MissingName)?;

        let mut tags: Vec<Tag> = Vec::new();
        for raw_tag in series_parts {
            let (key, value) = split_once_unescaped(raw_tag, b'=')
                .filter(|(key, value)| !key.is_empty() && !value.is_empty())
                .ok_or_else(|| ParseError::InvalidTag(raw_tag.to_string()))?;
            let key = Ustr::from(&unescape(key));
            if tags.iter().any(|tag| tag.key == key) {
                return Err(ParseError::DuplicateTag(key.to_string()));
            }
            tags.push(Tag {
                key,
                value: Ustr::from(&unescape(value)),
            });
        }
        // Match the telegraf decoder, which always hands out tags sorted by key.
        tags.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));

        let mut fields: Vec<Field> = Vec::new();
        for raw_field in split_fields(field_set) {
            let (key, value) = split_once_unescaped(raw_field, b'=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| ParseError::InvalidField(raw_field.to_string()))?;
            let key = Ustr::from(&unescape(key));
            let value = parse_field_value(value)
                .ok_or_else(|| ParseError::InvalidField(raw_field.to_string()))?;
            match fields.iter_mut().find(|field| field.key == key) {
                Some(field) => field.value = value,
                None => fields.push(Field { key, value }),
            }
        }
        if fields.is_empty() {
            return Err(ParseError::MissingFields);
        }

        let timestamp = match timestamp {
            Some(raw) => self.parse_timestamp(raw)?,
            None => Utc::now(),
        };

        Ok(Sample {
            name: Ustr::from(&name),
            timestamp,
            tags,
            fields,
        })
    }
}

/// Splits a line on its unescaped, unquoted spaces into series, field set and
/// optional timestamp.
fn split_sections(line: &str) -> Result<(&str, &str, Option<&str>), ParseError> {
    let bytes = line.as_bytes();
    let mut boundaries: Vec<usize> = Vec::with_capacity(2);
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            // Quotes only delimit strings inside the field set.
            b'"' if boundaries.len() == 1 => in_quotes = !in_quotes,
            b' ' if !in_quotes => {
                if boundaries.len() == 2 {
                    return Err(ParseError::TrailingData(line[i..].trim().to_string()));
                }
                boundaries.push(i);
            }
            _ => {}
        }
        i += 1;
    }
    if in_quotes {
        return Err(ParseError::UnterminatedString);
    }

    match (boundaries.first(), boundaries.get(1)) {
        (None, _) if line.is_empty() => Err(ParseError::MissingName),
        (None, _) => Err(ParseError::MissingFields),
        (Some(&fields_at), None) => Ok((&line[..fields_at], &line[fields_at + 1..], None)),
        (Some(&fields_at), Some(&timestamp_at)) => Ok((
            &line[..fields_at],
            &line[fields_at + 1..timestamp_at],
            Some(&line[timestamp_at + 1..]),
        )),
    }
}

fn split_unescaped(input: &str, separator: u8) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == separator {
            parts.push(&input[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&input[start.min(input.len())..]);
    parts
}

/// Like [`split_unescaped`] on commas, but commas inside quoted strings are kept.
fn split_fields(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&input[start.min(input.len())..]);
    parts
}

fn split_once_unescaped(input: &str, separator: u8) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == separator {
            return Some((&input[..i], &input[i + 1..]));
        }
        i += 1;
    }
    None
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '=' | ' ' | '"' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn parse_field_value(raw: &str) -> Option<FieldValue> {
    if let Some(quoted) = raw.strip_prefix('"') {
        let inner = quoted.strip_suffix('"')?;
        return Some(FieldValue::String(unescape(inner)));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Some(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Some(FieldValue::Boolean(false)),
        _ => {}
    }
    if let Some(integer) = raw.strip_suffix('i') {
        return integer.parse().ok().map(FieldValue::Integer);
    }
    if let Some(unsigned) = raw.strip_suffix('u') {
        return unsigned.parse().ok().map(FieldValue::UInteger);
    }
    // `f64::from_str` accepts "inf" and "NaN", which the protocol does not.
    if !raw.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
        return None;
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(FieldValue::Float)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Sample, ParseError> {
        LineProtocolParser::new().parse_line(line)
    }

    #[test]
    fn test_parse_full_line() {
        let sample = parse("cpu,host=kafka-01,cpu=cpu0 usage_idle=99,usage_busy=1 1656581409000000000")
            .unwrap();

        assert_eq!(sample.name.as_str(), "cpu");
        assert_eq!(sample.timestamp.timestamp(), 1_656_581_409);
        assert_eq!(sample.tag("host"), Some("kafka-01"));
        assert_eq!(sample.tag("cpu"), Some("cpu0"));
        assert_eq!(sample.field("usage_idle"), Some(&FieldValue::Float(99.0)));
        assert_eq!(sample.field("usage_busy"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_tags_are_sorted_by_key() {
        let sample = parse("cpu,role=kafka,host=kafka-01,az=b usage=1 0").unwrap();
        let keys: Vec<&str> = sample.tags.iter().map(|tag| tag.key.as_str()).collect();
        assert_eq!(keys, vec!["az", "host", "role"]);
    }

    #[test]
    fn test_field_value_types() {
        let sample =
            parse(r#"proc count=3i,total=18446744073709551615u,ok=t,down=FALSE,state="running",load=-0.5 0"#)
                .unwrap();

        assert_eq!(sample.field("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(sample.field("total"), Some(&FieldValue::UInteger(u64::MAX)));
        assert_eq!(sample.field("ok"), Some(&FieldValue::Boolean(true)));
        assert_eq!(sample.field("down"), Some(&FieldValue::Boolean(false)));
        assert_eq!(
            sample.field("state"),
            Some(&FieldValue::String("running".to_string()))
        );
        assert_eq!(sample.field("load"), Some(&FieldValue::Float(-0.5)));
    }

    #[test]
    fn test_escapes() {
        let sample = parse(
            r#"disk\ io,path=C:\\data,mount\,point=/a\ b used\=pct=1,msg="say \"hi\", then go" 0"#,
        )
        .unwrap();

        assert_eq!(sample.name.as_str(), "disk io");
        assert_eq!(sample.tag("path"), Some(r"C:\data"));
        assert_eq!(sample.tag("mount,point"), Some("/a b"));
        assert_eq!(sample.field("used=pct"), Some(&FieldValue::Float(1.0)));
        assert_eq!(
            sample.field("msg"),
            Some(&FieldValue::String(r#"say "hi", then go"#.to_string()))
        );
    }

    #[test]
    fn test_missing_timestamp_uses_current_time() {
        let before = Utc::now();
        let sample = parse("mem free=1").unwrap();
        assert!(sample.timestamp >= before);
        assert!(sample.timestamp <= Utc::now());
    }

    #[test]
    fn test_precision() {
        let parser = LineProtocolParser::new().with_precision(Precision::Seconds);
        let sample = parser.parse_line("mem free=1 1656581409").unwrap();
        assert_eq!(sample.timestamp.timestamp(), 1_656_581_409);

        let parser = LineProtocolParser::new().with_precision(Precision::Milliseconds);
        let sample = parser.parse_line("mem free=1 1656581409123").unwrap();
        assert_eq!(sample.timestamp.timestamp_millis(), 1_656_581_409_123);
    }

    #[test]
    fn test_duplicate_fields_last_wins() {
        let sample = parse("mem free=1,free=2 0").unwrap();
        assert_eq!(sample.fields.len(), 1);
        assert_eq!(sample.field("free"), Some(&FieldValue::Float(2.0)));
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        let sample = parse("mem free=1 0\r\n").unwrap();
        assert_eq!(sample.timestamp, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse(""), Err(ParseError::MissingName));
        assert_eq!(parse(",host=a free=1"), Err(ParseError::MissingName));
        assert_eq!(parse("mem"), Err(ParseError::MissingFields));
        assert_eq!(
            parse("mem,host free=1"),
            Err(ParseError::InvalidTag("host".to_string()))
        );
        assert_eq!(
            parse("mem,host=a,host=b free=1"),
            Err(ParseError::DuplicateTag("host".to_string()))
        );
        assert_eq!(
            parse("mem free=abc"),
            Err(ParseError::InvalidField("free=abc".to_string()))
        );
        assert_eq!(
            parse("mem free=NaN"),
            Err(ParseError::InvalidField("free=NaN".to_string()))
        );
        assert_eq!(
            parse("mem free=1.5i"),
            Err(ParseError::InvalidField("free=1.5i".to_string()))
        );
        assert_eq!(
            parse(r#"mem msg="open"#),
            Err(ParseError::UnterminatedString)
        );
        assert_eq!(
            parse("mem free=1 yesterday"),
            Err(ParseError::InvalidTimestamp("yesterday".to_string()))
        );
        assert_eq!(
            parse("mem free=1 0 extra"),
            Err(ParseError::TrailingData("extra".to_string()))
        );
    }

    #[test]
    fn test_timestamp_overflow_is_rejected() {
        let parser = LineProtocolParser::new().with_precision(Precision::Seconds);
        assert_eq!(
            parser.parse_line("mem free=1 9223372036854775807"),
            Err(ParseError::InvalidTimestamp(
                "9223372036854775807".to_string()
            ))
        );
    }
}
