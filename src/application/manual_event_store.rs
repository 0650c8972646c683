// Store traits for manual tags and analyst-uploaded pipeline results
use crate::domain::anomaly::AnomalyRecord;
use crate::domain::event::Event;
use crate::domain::telemetry::TimeWindow;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;

/// A manual tag about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewManualEvent {
    pub machine_id: i64,
    pub data_source_ids: Vec<i64>,
    pub window: TimeWindow,
    pub username: String,
    pub insert_timestamp: NaiveDateTime,
    /// JSON snapshot of the pipeline versions active when tagging.
    pub pipelines_configurations: String,
}

/// Identifies the rows an untag targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualEventKey {
    pub event_id: i64,
    pub machine_id: i64,
    pub username: String,
    pub start_timestamp: NaiveDateTime,
    pub end_timestamp: NaiveDateTime,
}

impl ManualEventKey {
    pub fn of(event: &Event) -> Option<Self> {
        let info = event.manual()?;
        Some(Self {
            event_id: event.event_id,
            machine_id: event.machine_id,
            username: info.username.clone(),
            start_timestamp: event.start_timestamp,
            end_timestamp: event.end_timestamp,
        })
    }

    pub fn matches(&self, machine_id: i64, username: &str, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.machine_id == machine_id && self.username == username && self.start_timestamp == start && self.end_timestamp == end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntagOutcome {
    Deprecated,
    /// Nothing changed because the key matched this many rows.
    Aborted(usize),
}

#[async_trait]
pub trait ManualEventStore: Send + Sync {
    /// Manual events of every machine. Deprecated rows only when asked for.
    async fn load(&self, include_deprecated: bool) -> anyhow::Result<Vec<Event>>;

    async fn append(&self, event: &NewManualEvent) -> anyhow::Result<()>;

    /// Soft-deletes the row matching `key`, only when exactly one row matches.
    async fn deprecate(&self, key: &ManualEventKey) -> anyhow::Result<UntagOutcome>;
}

/// Database and flat-file manual stores; `use_db` picks one per call.
#[derive(Clone)]
pub struct ManualStores {
    pub database: Arc<dyn ManualEventStore>,
    pub files: Arc<dyn ManualEventStore>,
}

impl ManualStores {
    pub fn select(&self, use_db: bool) -> &Arc<dyn ManualEventStore> {
        if use_db { &self.database } else { &self.files }
    }
}

/// Flat-file home of pipeline results uploaded by the analyst.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn predicted_anomalies(
        &self,
        machine_id: i64,
        anomaly_ids: Option<&[i64]>,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<AnomalyRecord>>;

    async fn save_predicted_anomalies(&self, anomalies: &[AnomalyRecord]) -> anyhow::Result<()>;

    async fn remove_predicted_anomalies(&self) -> anyhow::Result<()>;

    async fn save_predicted_events(&self, events: &[Event]) -> anyhow::Result<()>;

    async fn save_reconstruction(&self, rows: &[ReconstructionRow]) -> anyhow::Result<()>;
}

/// One sample of an uploaded reconstruction series.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionRow {
    pub data_source_id: i64,
    pub algorithm: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

pub(crate) fn outcome_for(matches: usize) -> UntagOutcome {
    if matches == 1 {
        UntagOutcome::Deprecated
    } else {
        UntagOutcome::Aborted(matches)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::tests::ts;
    use crate::domain::event::{EventDetails, ManualEventInfo, MANUAL_LABEL};

    #[test]
    fn test_key_only_for_manual_events() {
        let event = Event {
            event_id: 4,
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
                is_deprecated: false,
            }),
        };
        let key = ManualEventKey::of(&event).unwrap();
        assert!(key.matches(2, "Eri", ts(1, 0), ts(1, 1)));
        assert!(!key.matches(2, "Dana", ts(1, 0), ts(1, 1)));

        let labeled = crate::domain::event::tests::labeled(1, ts(1, 0), ts(1, 1), 1);
        assert!(ManualEventKey::of(&labeled).is_none());
    }

    #[test]
    fn test_outcome_requires_single_match() {
        assert_eq!(outcome_for(1), UntagOutcome::Deprecated);
        assert_eq!(outcome_for(0), UntagOutcome::Aborted(0));
        assert_eq!(outcome_for(2), UntagOutcome::Aborted(2));
    }
}
