// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::errors::FieldError;
use crate::sample::FieldValue;

/// One outbound telemetry record.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Sets one field. Re-adding an identical value is a no-op; a different
    /// value for an existing key is rejected and the stored value is kept.
    pub fn add_field(&mut self, key: String, value: FieldValue) -> Result<(), FieldError> {
        if !value.is_finite() {
            return Err(FieldError::NonFinite { key });
        }
        match self.fields.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
            Entry::Occupied(entry) if *entry.get() == value => Ok(()),
            Entry::Occupied(entry) => Err(FieldError::Collision {
                key: entry.key().clone(),
            }),
        }
    }

    /// Adds every field it can and returns the ones it could not.
    pub fn add<I>(&mut self, data: I) -> Vec<FieldError>
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        data.into_iter()
            .filter_map(|(key, value)| self.add_field(key, value).err())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
