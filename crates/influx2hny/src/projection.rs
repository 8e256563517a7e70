// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Naming rule that maps a sample's tags and fields onto flat event keys.
//!
//! A sample `disk,device=sda free=232827793` becomes the two event fields
//! `disk.device` and `disk.free`. Tags listed in [`UnprefixedTags`] keep their
//! bare key; `host` is always treated as listed.

use fnv::FnvBuildHasher;
use ustr::Ustr;

use crate::sample::{FieldValue, Sample};

pub const HOST_TAG: &str = "host";

pub type FnvHashMap<K, V> = hashbrown::HashMap<K, V, FnvBuildHasher>;
pub type FnvHashSet<K> = hashbrown::HashSet<K, FnvBuildHasher>;

/// Event fields derived from a single sample.
pub type ProjectedFields = FnvHashMap<String, FieldValue>;

/// Tag keys sent without the measurement-name prefix.
#[derive(Clone, Debug, Default)]
pub struct UnprefixedTags {
    keys: FnvHashSet<Ustr>,
}

impl UnprefixedTags {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|key| key.as_ref().trim().to_string())
                .filter(|key| !key.is_empty())
                .map(|key| Ustr::from(&key))
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, key: Ustr) -> bool {
        key.as_str() == HOST_TAG || self.keys.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Event key for a field (or prefixed tag) of the named measurement.
#[must_use]
pub fn prefixed_key(name: &str, key: &str) -> String {
    format!("{name}.{key}")
}

/// Projects every tag and field of `sample` onto event keys.
///
/// Tags go first so a field can never be shadowed by a tag of the same key.
#[must_use]
pub fn project(sample: &Sample, unprefixed: &UnprefixedTags) -> ProjectedFields {
    let mut data = ProjectedFields::with_capacity_and_hasher(
        sample.tags.len() + sample.fields.len(),
        FnvBuildHasher::default(),
    );

    for tag in &sample.tags {
        let key = if unprefixed.contains(tag.key) {
            tag.key.to_string()
        } else {
            prefixed_key(&sample.name, &tag.key)
        };
        data.insert(key, FieldValue::String(tag.value.to_string()));
    }

    for field in &sample.fields {
        data.insert(prefixed_key(&sample.name, &field.key), field.value.clone());
    }

    data
}
