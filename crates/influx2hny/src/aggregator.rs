// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups samples into as few events as possible per timestamp.
//!
//! Every sample's fields are prefixed with its measurement name, so samples
//! with different names can always share an event. Samples with the same
//! name can only share one when their tags are identical and their fields
//! are disjoint; otherwise each is sent as its own event.
//!
//! ```text
//!   samples ──> timestamp ──> name ──> [Sample]
//!                   │                     │
//!                   │         one sample or mergeable?
//!                   │            yes │        │ no
//!                   v                v        v
//!              flat event  <── merge    standalone event per sample
//! ```

use chrono::{DateTime, Utc};
use fnv::FnvBuildHasher;
use tracing::{debug, trace};
use ustr::Ustr;

use crate::errors::{ErrorHook, Recoverable};
use crate::event::Event;
use crate::projection::{project, FnvHashMap, FnvHashSet, UnprefixedTags};
use crate::sample::Sample;

/// Samples bucketed by exact timestamp, then by name, in arrival order.
pub type TimestampGroup = FnvHashMap<DateTime<Utc>, FnvHashMap<Ustr, Vec<Sample>>>;

pub fn group_by_timestamp_and_name(samples: Vec<Sample>) -> TimestampGroup {
    let mut groups = TimestampGroup::default();
    for sample in samples {
        groups
            .entry(sample.timestamp)
            .or_default()
            .entry(sample.name)
            .or_default()
            .push(sample);
    }
    groups
}

/// Returns true if the samples, which all share a name, can be merged into
/// one event without losing information.
///
/// The first sample's tags are canonical and every other sample must match
/// them position by position. Tag order is not normalised here; decoded
/// samples arrive with their tags sorted by key.
pub fn mergeable(samples: &[Sample]) -> bool {
    let Some(canonical) = samples.first() else {
        return true;
    };
    let mut seen = FnvHashSet::with_capacity_and_hasher(
        samples.iter().map(|sample| sample.fields.len()).sum(),
        FnvBuildHasher::default(),
    );

    for (i, sample) in samples.iter().enumerate() {
        if i > 0 && sample.tags != canonical.tags {
            return false;
        }
        for field in &sample.fields {
            if !seen.insert((sample.name, field.key)) {
                return false;
            }
        }
    }

    true
}

pub struct Aggregator {
    unprefixed_tags: UnprefixedTags,
    on_error: ErrorHook,
    drop_empty_events: bool,
}

impl Aggregator {
    pub fn new(unprefixed_tags: UnprefixedTags, on_error: ErrorHook) -> Self {
        Self {
            unprefixed_tags,
            on_error,
            drop_empty_events: false,
        }
    }

    /// Skip the per-timestamp flat event when nothing was merged into it.
    #[must_use]
    pub fn drop_empty_events(mut self, drop: bool) -> Self {
        self.drop_empty_events = drop;
        self
    }

    /// Folds samples into events. Events for different timestamps, and
    /// standalone versus flat events, come out in no particular order.
    pub fn aggregate(&self, samples: Vec<Sample>) -> Vec<Event> {
        let n_samples = samples.len();
        let mut events = Vec::new();

        for (timestamp, samples_by_name) in group_by_timestamp_and_name(samples) {
            let mut flat_event = Event::new(timestamp);

            for (name, samples) in samples_by_name {
                if samples.len() == 1 || mergeable(&samples) {
                    for sample in &samples {
                        self.merge_into(&mut flat_event, sample);
                    }
                } else {
                    trace!(
                        "{} samples of {name} at {timestamp} are not mergeable",
                        samples.len()
                    );
                    for sample in &samples {
                        let mut event = Event::new(timestamp);
                        self.merge_into(&mut event, sample);
                        events.push(event);
                    }
                }
            }

            if self.drop_empty_events && flat_event.is_empty() {
                continue;
            }
            events.push(flat_event);
        }

        debug!("Aggregated {n_samples} samples into {} events", events.len());
        events
    }

    fn merge_into(&self, event: &mut Event, sample: &Sample) {
        for err in event.add(project(sample, &self.unprefixed_tags)) {
            (self.on_error)(&Recoverable::Field(err));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::FieldError;
    use crate::sample::FieldValue;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(UnprefixedTags::default(), Arc::new(|_: &Recoverable| {}))
    }

    fn recording_aggregator() -> (Aggregator, Arc<Mutex<Vec<Recoverable>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let aggregator = Aggregator::new(
            UnprefixedTags::default(),
            Arc::new(move |err: &Recoverable| sink.lock().unwrap().push(err.clone())),
        );
        (aggregator, seen)
    }

    fn cpu(ts: DateTime<Utc>) -> Sample {
        Sample::new("cpu", ts)
            .with_field("usage_idle", 99.0)
            .with_field("usage_busy", 1.0)
    }

    /// The flat event is the one that is not a standalone copy of a sample.
    fn split(events: Vec<Event>, standalone: usize) -> (Vec<Event>, Event) {
        assert_eq!(events.len(), standalone + 1);
        let (mut flat, singles): (Vec<Event>, Vec<Event>) = events
            .into_iter()
            .partition(|event| !event.fields.keys().any(|k| k == "cpu.usage_idle"));
        assert_eq!(flat.len(), 1, "expected exactly one flat event");
        (singles, flat.remove(0))
    }

    #[test]
    fn test_mergeable_empty_and_single() {
        assert!(mergeable(&[]));
        assert!(mergeable(&[cpu(at(0)).with_tag("host", "a")]));
    }

    #[test]
    fn test_mergeable_disjoint_fields_same_tags() {
        let samples = vec![
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("free", 1.0),
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("used", 1.0),
        ];
        assert!(mergeable(&samples));
    }

    #[test]
    fn test_mergeable_rejects_field_collision() {
        let samples = vec![
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("free", 1.0),
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("free", 2.0),
        ];
        assert!(!mergeable(&samples));
    }

    #[test]
    fn test_mergeable_compares_tags_by_position() {
        let ab = Sample::new("disk", at(0))
            .with_tag("a", "1")
            .with_tag("b", "2")
            .with_field("free", 1.0);
        let ba = Sample::new("disk", at(0))
            .with_tag("b", "2")
            .with_tag("a", "1")
            .with_field("used", 1.0);
        assert!(!mergeable(&[ab, ba]));
    }

    #[test]
    fn test_mergeable_rejects_different_tag_counts_in_either_order() {
        let short = cpu(at(0)).with_tag("host", "kafka-01");
        let long = Sample::new("cpu", at(0))
            .with_tag("host", "kafka-01")
            .with_tag("role", "kafka")
            .with_field("usage_steal", 0.0);

        assert!(!mergeable(&[short.clone(), long.clone()]));
        assert!(!mergeable(&[long, short]));
    }

    #[test]
    fn test_mergeable_rejects_different_tag_values() {
        let a = Sample::new("disk", at(0))
            .with_tag("device", "sda")
            .with_field("free", 1.0);
        let b = Sample::new("disk", at(0))
            .with_tag("device", "sdb")
            .with_field("used", 1.0);
        assert!(!mergeable(&[a, b]));
    }

    #[test]
    fn test_distinct_names_share_one_event() {
        let samples = vec![
            cpu(at(10)).with_tag("host", "web-1"),
            Sample::new("mem", at(10))
                .with_tag("host", "web-1")
                .with_field("free", 512i64),
            Sample::new("disk", at(10))
                .with_tag("host", "web-1")
                .with_tag("device", "sda")
                .with_field("used", 0.5),
        ];

        let events = aggregator().aggregate(samples);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.timestamp, at(10));
        assert_eq!(event.len(), 6);
        assert_eq!(event.get("host"), Some(&FieldValue::String("web-1".into())));
        assert_eq!(event.get("cpu.usage_idle"), Some(&FieldValue::Float(99.0)));
        assert_eq!(event.get("mem.free"), Some(&FieldValue::Integer(512)));
        assert_eq!(event.get("disk.used"), Some(&FieldValue::Float(0.5)));
        assert_eq!(
            event.get("disk.device"),
            Some(&FieldValue::String("sda".into()))
        );
    }

    #[test]
    fn test_extra_tag_splits_into_standalone_events() {
        let samples = vec![
            cpu(at(0)).with_tag("host", "kafka-01"),
            cpu(at(0))
                .with_tag("host", "kafka-01")
                .with_tag("role", "kafka"),
        ];

        let events = aggregator().aggregate(samples);
        let (singles, flat) = split(events, 2);

        assert!(flat.is_empty());
        assert_eq!(flat.timestamp, at(0));
        for event in &singles {
            assert_eq!(event.timestamp, at(0));
            assert_eq!(event.get("cpu.usage_idle"), Some(&FieldValue::Float(99.0)));
            assert_eq!(event.get("cpu.usage_busy"), Some(&FieldValue::Float(1.0)));
            assert_eq!(
                event.get("host"),
                Some(&FieldValue::String("kafka-01".into()))
            );
        }
        let with_role = singles
            .iter()
            .filter(|event| event.get("cpu.role").is_some())
            .count();
        assert_eq!(with_role, 1);
    }

    #[test]
    fn test_disjoint_fields_merge_into_flat_event() {
        let samples = vec![
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("free", 1.0),
            Sample::new("disk", at(0))
                .with_tag("host", "x")
                .with_field("used", 1.0),
        ];

        let events = aggregator().aggregate(samples);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.len(), 3);
        assert_eq!(event.get("disk.free"), Some(&FieldValue::Float(1.0)));
        assert_eq!(event.get("disk.used"), Some(&FieldValue::Float(1.0)));
        assert_eq!(event.get("host"), Some(&FieldValue::String("x".into())));
    }

    #[test]
    fn test_non_mergeable_bucket_leaves_others_in_flat_event() {
        let samples = vec![
            cpu(at(0)).with_tag("cpu", "cpu0"),
            cpu(at(0)).with_tag("cpu", "cpu1"),
            Sample::new("mem", at(0)).with_field("free", 1.0),
        ];

        let events = aggregator().aggregate(samples);
        let (singles, flat) = split(events, 2);

        assert_eq!(singles.len(), 2);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("mem.free"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn test_each_timestamp_gets_its_own_flat_event() {
        let samples = vec![
            Sample::new("mem", at(0)).with_field("free", 1.0),
            Sample::new("mem", at(10)).with_field("free", 2.0),
            Sample::new("cpu", at(10)).with_field("usage_idle", 3.0),
        ];

        let mut events = aggregator().aggregate(samples);
        events.sort_by_key(|event| event.timestamp);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, at(0));
        assert_eq!(events[0].len(), 1);
        assert_eq!(events[1].timestamp, at(10));
        assert_eq!(events[1].len(), 2);
    }

    #[test]
    fn test_empty_input_produces_no_events() {
        assert!(aggregator().aggregate(Vec::new()).is_empty());
    }

    #[test]
    fn test_drop_empty_events() {
        let samples = vec![
            cpu(at(0)).with_tag("cpu", "cpu0"),
            cpu(at(0)).with_tag("cpu", "cpu1"),
        ];

        let events = aggregator().drop_empty_events(true).aggregate(samples);

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| !event.is_empty()));
    }

    #[test]
    fn test_field_errors_are_reported_and_skipped() {
        let (aggregator, seen) = recording_aggregator();
        let samples = vec![
            Sample::new("cpu", at(0))
                .with_tag("host", "a")
                .with_field("usage_idle", f64::NAN)
                .with_field("usage_busy", 1.0),
            Sample::new("mem", at(0))
                .with_tag("host", "b")
                .with_field("free", 1.0),
        ];

        let events = aggregator.aggregate(samples);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.get("cpu.usage_idle").is_none());
        assert_eq!(event.get("cpu.usage_busy"), Some(&FieldValue::Float(1.0)));
        assert_eq!(event.get("mem.free"), Some(&FieldValue::Float(1.0)));
        assert!(event.get("host").is_some());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|err| matches!(
            err,
            Recoverable::Field(FieldError::NonFinite { key }) if key == "cpu.usage_idle"
        )));
        assert!(seen.iter().any(|err| matches!(
            err,
            Recoverable::Field(FieldError::Collision { key }) if key == "host"
        )));
    }

    #[test]
    fn test_unprefixed_tags_apply_to_flat_event() {
        let aggregator = Aggregator::new(
            UnprefixedTags::new(["dc"]),
            Arc::new(|_: &Recoverable| {}),
        );
        let samples = vec![
            Sample::new("mem", at(0))
                .with_tag("dc", "east")
                .with_field("free", 1.0),
            Sample::new("swap", at(0))
                .with_tag("dc", "east")
                .with_field("free", 0.0),
        ];

        let events = aggregator.aggregate(samples);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("dc"), Some(&FieldValue::String("east".into())));
        assert!(events[0].get("mem.dc").is_none());
    }

    proptest! {
        #[test]
        fn distinct_names_always_flatten(
            names in prop::collection::hash_set("[a-z]{1,8}", 1..12),
            ts in 0i64..1_000_000,
        ) {
            let samples: Vec<Sample> = names
                .iter()
                .map(|name| {
                    Sample::new(name, at(ts))
                        .with_tag("host", "h")
                        .with_tag("device", name)
                        .with_field("value", 1.0)
                })
                .collect();

            let events = aggregator().aggregate(samples);

            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].len(), 1 + 2 * names.len());
            for name in &names {
                let value_key = format!("{name}.value");
                let device_key = format!("{name}.device");
                prop_assert!(events[0].get(&value_key).is_some());
                prop_assert!(events[0].get(&device_key).is_some());
            }
        }
    }
}
