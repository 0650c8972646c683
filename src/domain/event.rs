// Event domain models: labeled, predicted and manual events
use super::telemetry::TimeWindow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GOOD_EVENT_TYPE_ID: i32 = 0;
pub const NO_DATA_EVENT_TYPE_ID: i32 = 5;
pub const MANUAL_LABEL: &str = "Manual";

/// Labeled event types used when the store does not provide its own table.
pub fn default_event_types() -> BTreeMap<i32, String> {
    [
        (0, "Good"),
        (1, "Machine stop"),
        (2, "Pre event"),
        (3, "Short cycle"),
        (4, "Long cycle"),
        (5, "No data"),
        (6, "Defective parts"),
    ]
    .into_iter()
    .map(|(id, name)| (id, name.to_string()))
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Labeled,
    Predicted,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEventInfo {
    pub username: String,
    pub insert_timestamp: Option<NaiveDateTime>,
    pub pipelines_configurations: String,
    pub is_deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventDetails {
    Labeled { event_type_id: i32 },
    Predicted { num_anomalies: usize, anomaly_ids: Vec<i64> },
    Manual(ManualEventInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub machine_id: i64,
    pub start_timestamp: NaiveDateTime,
    pub end_timestamp: NaiveDateTime,
    pub label_name: String,
    pub source_table: String,
    /// Channels attached to the event row (manual tags, uploaded predictions).
    pub data_source_ids: Vec<i64>,
    pub details: EventDetails,
}

impl Event {
    pub fn event_type_id(&self) -> Option<i32> {
        match self.details {
            EventDetails::Labeled { event_type_id } => Some(event_type_id),
            _ => None,
        }
    }

    pub fn manual(&self) -> Option<&ManualEventInfo> {
        match &self.details {
            EventDetails::Manual(info) => Some(info),
            _ => None,
        }
    }

    pub fn anomaly_ids(&self) -> Option<&[i64]> {
        match &self.details {
            EventDetails::Predicted { anomaly_ids, .. } => Some(anomaly_ids),
            _ => None,
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.manual().is_some_and(|m| m.is_deprecated)
    }

    pub fn overlaps(&self, other: &Event) -> bool {
        self.start_timestamp <= other.end_timestamp && other.start_timestamp <= self.end_timestamp
    }

    /// Event span widened by the session paddings.
    pub fn padded_window(&self, padding: &TimePadding) -> TimeWindow {
        TimeWindow::new(self.start_timestamp, self.end_timestamp).widened(padding.before_hours, padding.after_hours)
    }
}

/// Hours shown around an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePadding {
    pub before_hours: f64,
    pub after_hours: f64,
}

impl Default for TimePadding {
    fn default() -> Self {
        Self {
            before_hours: 3.0,
            after_hours: 1.0,
        }
    }
}

/// Largest padding, in hours, accepted on either side of an event.
pub const MAX_PADDING_HOURS: f64 = 24.0 * 365.0;

impl TimePadding {
    /// Finite, non-negative and at most `MAX_PADDING_HOURS`.
    pub fn is_valid_hours(value: f64) -> bool {
        value.is_finite() && (0.0..=MAX_PADDING_HOURS).contains(&value)
    }
}

/// Events of one kind for one machine, sorted by start timestamp.
///
/// The position of an event in this table is its internal event id, which is
/// what navigation moves over. It is unrelated to `Event::event_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventTable {
    events: Vec<Event>,
}

impl EventTable {
    pub fn new(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.start_timestamp);
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, internal_id: usize) -> Option<&Event> {
        self.events.get(internal_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn filter(&self, predicate: impl Fn(&Event) -> bool) -> Self {
        Self {
            events: self.events.iter().filter(|e| predicate(e)).cloned().collect(),
        }
    }

    /// Clamps a requested position: anything outside `0..len` falls back to 0.
    pub fn clamp_index(&self, requested: i64) -> usize {
        if requested >= 0 && (requested as usize) < self.events.len() {
            requested as usize
        } else {
            0
        }
    }

    /// Label shown next to the event number input.
    pub fn id_label(&self) -> String {
        format!("/{}:", self.events.len())
    }

    pub fn describe(&self, internal_id: usize) -> String {
        let Some(event) = self.events.get(internal_id) else {
            return "No events to show".to_string();
        };
        match &event.details {
            EventDetails::Manual(info) => {
                let mut text = format!("  Type - {}; Tagger - {}; ", event.label_name, info.username);
                if info.is_deprecated {
                    text.push_str("Deprecated");
                }
                text
            }
            EventDetails::Labeled { .. } => format!("  Type - {}", event.label_name),
            EventDetails::Predicted { num_anomalies, .. } => {
                format!("   Total num anomalies - {}", num_anomalies)
            }
        }
    }
}

/// Labeled events of one machine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LabeledEventSet {
    pub full: EventTable,
    /// Everything except "Good" events.
    pub filtered: EventTable,
    pub per_data_source: Vec<Event>,
}

impl LabeledEventSet {
    pub fn new(events: Vec<Event>, per_data_source: Vec<Event>) -> Self {
        let full = EventTable::new(events);
        let filtered = full.filter(|e| e.event_type_id() != Some(GOOD_EVENT_TYPE_ID));
        Self {
            full,
            filtered,
            per_data_source,
        }
    }

    /// Placeholder used when a machine has no labeled events at all.
    pub fn no_data(machine_id: i64, range: TimeWindow) -> Self {
        Self::new(
            vec![Event {
                event_id: 1,
                machine_id,
                start_timestamp: range.start,
                end_timestamp: range.end,
                label_name: "No data".to_string(),
                source_table: "generated".to_string(),
                data_source_ids: Vec::new(),
                details: EventDetails::Labeled {
                    event_type_id: NO_DATA_EVENT_TYPE_ID,
                },
            }],
            Vec::new(),
        )
    }
}

/// Keeps predicted events that overlap at least one of `labeled`.
pub fn overlapping_labeled(predicted: &EventTable, labeled: &EventTable) -> EventTable {
    predicted.filter(|p| labeled.iter().any(|l| p.overlaps(l)))
}

/// Machine health summary: labeled hours per label name.
pub fn label_durations(events: &EventTable, include_good: bool) -> Vec<(String, f64)> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for event in events.iter() {
        if !include_good && event.event_type_id() == Some(GOOD_EVENT_TYPE_ID) {
            continue;
        }
        let hours = (event.end_timestamp - event.start_timestamp).num_seconds() as f64 / 3600.0;
        *totals.entry(event.label_name.clone()).or_default() += hours;
    }
    totals.into_iter().collect()
}

/// Number of labeled events per label name.
pub fn label_counts(events: &EventTable, include_good: bool) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in events.iter() {
        if !include_good && event.event_type_id() == Some(GOOD_EVENT_TYPE_ID) {
            continue;
        }
        *counts.entry(event.label_name.clone()).or_default() += 1;
    }
    counts.into_iter().collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    pub(crate) fn labeled(event_id: i64, start: NaiveDateTime, end: NaiveDateTime, type_id: i32) -> Event {
        Event {
            event_id,
            machine_id: 2,
            start_timestamp: start,
            end_timestamp: end,
            label_name: default_event_types()[&type_id].clone(),
            source_table: "events.merged_calculated_labeled_events".to_string(),
            data_source_ids: Vec::new(),
            details: EventDetails::Labeled { event_type_id: type_id },
        }
    }

    #[test]
    fn test_table_sorts_by_start() {
        let table = EventTable::new(vec![
            labeled(7, ts(3, 0), ts(3, 1), 1),
            labeled(9, ts(1, 0), ts(1, 1), 1),
            labeled(8, ts(2, 0), ts(2, 1), 1),
        ]);

        let ids: Vec<i64> = table.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![9, 8, 7]);
    }

    #[test]
    fn test_clamp_index_out_of_range_is_zero() {
        let table = EventTable::new(vec![labeled(1, ts(1, 0), ts(1, 1), 1), labeled(2, ts(2, 0), ts(2, 1), 1)]);
        assert_eq!(table.clamp_index(1), 1);
        assert_eq!(table.clamp_index(2), 0);
        assert_eq!(table.clamp_index(-1), 0);
    }

    #[test]
    fn test_filtered_drops_good_events() {
        let set = LabeledEventSet::new(
            vec![labeled(1, ts(1, 0), ts(1, 1), 0), labeled(2, ts(2, 0), ts(2, 1), 3)],
            Vec::new(),
        );
        assert_eq!(set.full.len(), 2);
        assert_eq!(set.filtered.len(), 1);
        assert_eq!(set.filtered.get(0).unwrap().label_name, "Short cycle");
    }

    #[test]
    fn test_describe_strings() {
        let manual = Event {
            event_id: 3,
            machine_id: 2,
            start_timestamp: ts(1, 0),
            end_timestamp: ts(1, 1),
            label_name: MANUAL_LABEL.to_string(),
            source_table: "algo.manually_tagged_events".to_string(),
            data_source_ids: vec![14],
            details: EventDetails::Manual(ManualEventInfo {
                username: "Eri".to_string(),
                insert_timestamp: None,
                pipelines_configurations: "{}".to_string(),
                is_deprecated: true,
            }),
        };
        let table = EventTable::new(vec![manual]);

        assert_eq!(table.describe(0), "  Type - Manual; Tagger - Eri; Deprecated");
        assert_eq!(table.id_label(), "/1:");
        assert_eq!(EventTable::default().describe(0), "No events to show");
    }

    #[test]
    fn test_padded_window() {
        let event = labeled(1, ts(2, 5), ts(2, 6), 1);
        let window = event.padded_window(&TimePadding::default());
        assert_eq!(window, TimeWindow::new(ts(2, 2), ts(2, 7)));
    }

    #[test]
    fn test_padding_bounds() {
        assert!(TimePadding::is_valid_hours(0.0));
        assert!(TimePadding::is_valid_hours(2.5));
        assert!(!TimePadding::is_valid_hours(-1.0));
        assert!(!TimePadding::is_valid_hours(f64::NAN));
        assert!(!TimePadding::is_valid_hours(f64::INFINITY));
        assert!(!TimePadding::is_valid_hours(1e12));
    }

    #[test]
    fn test_overlapping_labeled_filters_predictions() {
        let predicted = EventTable::new(vec![
            labeled(1, ts(1, 0), ts(1, 2), 1),
            labeled(2, ts(5, 0), ts(5, 2), 1),
        ]);
        let labeled_events = EventTable::new(vec![labeled(10, ts(1, 1), ts(1, 3), 2)]);

        let kept = overlapping_labeled(&predicted, &labeled_events);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get(0).unwrap().event_id, 1);
    }

    #[test]
    fn test_label_durations() {
        let table = EventTable::new(vec![
            labeled(1, ts(1, 0), ts(1, 2), 0),
            labeled(2, ts(1, 2), ts(1, 3), 1),
            labeled(3, ts(1, 4), ts(1, 6), 1),
        ]);
        assert_eq!(label_durations(&table, false), vec![("Machine stop".to_string(), 3.0)]);
        assert_eq!(label_durations(&table, true).len(), 2);
        assert_eq!(label_counts(&table, false), vec![("Machine stop".to_string(), 2)]);
    }
}
