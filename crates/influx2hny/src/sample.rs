// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::Serialize;
use ustr::Ustr;

/// A single field value as carried by the line protocol.
#[derive(Clone, Debug, Display, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[display("{_0}")]
    Float(f64),
    #[display("{_0}i")]
    Integer(i64),
    #[display("{_0}u")]
    UInteger(u64),
    #[display("{_0}")]
    Boolean(bool),
    #[display("{_0:?}")]
    String(String),
}

impl FieldValue {
    /// JSON has no representation for NaN or infinities.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            _ => true,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::UInteger(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: Ustr,
    pub value: Ustr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub key: Ustr,
    pub value: FieldValue,
}

/// One decoded measurement.
///
/// Tag order is significant: two samples only merge when their tag lists are
/// equal position by position.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: Ustr,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<Tag>,
    pub fields: Vec<Field>,
}

impl Sample {
    pub fn new(name: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: Ustr::from(name),
            timestamp,
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Appends a tag, replacing the value in place if the key is already present.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        let key = Ustr::from(key);
        let value = Ustr::from(value);
        match self.tags.iter_mut().find(|tag| tag.key == key) {
            Some(tag) => tag.value = value,
            None => self.tags.push(Tag { key, value }),
        }
        self
    }

    /// Adds a field; a repeated key overwrites the earlier value.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        let key = Ustr::from(key);
        let value = value.into();
        match self.fields.iter_mut().find(|field| field.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { key, value }),
        }
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key.as_str() == key)
            .map(|tag| tag.value.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|field| field.key.as_str() == key)
            .map(|field| &field.value)
    }
}
