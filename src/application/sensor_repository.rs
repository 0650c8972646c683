// Repository trait for sensor, event and pipeline data access
use crate::domain::anomaly::{AnomalyRecord, SeverityRecord};
use crate::domain::event::Event;
use crate::domain::machine::{ChannelConnection, ChannelStatistics, DataSource, IngestionRate, Machine};
use crate::domain::pipeline::TrainingRun;
use crate::domain::session::ReconstructionSeries;
use crate::domain::telemetry::{TimeSeriesPoint, TimeWindow};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

/// A labeled event row before label names are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEventRow {
    pub event_id: i64,
    pub machine_id: i64,
    pub start_timestamp: NaiveDateTime,
    pub end_timestamp: NaiveDateTime,
    pub event_type_id: i32,
    /// Set for per-data-source rows.
    pub data_source_id: Option<i64>,
}

#[async_trait]
pub trait SensorRepository: Send + Sync {
    async fn list_machines(&self) -> anyhow::Result<Vec<Machine>>;

    /// Data sources of a machine that carry values
    async fn data_sources(&self, machine_id: i64) -> anyhow::Result<Vec<DataSource>>;

    async fn channel_statistics(&self, machine_id: i64, statistics_run_id: i64) -> anyhow::Result<Vec<ChannelStatistics>>;

    /// Raw values per data source inside `window`. Data sources without values are absent.
    async fn values(&self, data_source_ids: &[i64], window: TimeWindow) -> anyhow::Result<HashMap<i64, Vec<TimeSeriesPoint>>>;

    async fn channel_connections(&self) -> anyhow::Result<Vec<ChannelConnection>>;

    async fn ingestion_rates(&self, machine_id: i64) -> anyhow::Result<Vec<IngestionRate>>;

    async fn labeled_event_types(&self) -> anyhow::Result<BTreeMap<i32, String>>;

    async fn labeled_events(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<LabeledEventRow>>;

    async fn labeled_events_per_data_source(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<LabeledEventRow>>;

    async fn predicted_events(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<Event>>;

    /// Anomalies of a predicted-events run inside `window`, optionally restricted to `anomaly_ids`.
    async fn predicted_anomalies(
        &self,
        machine_id: i64,
        run_id: i64,
        anomaly_ids: Option<&[i64]>,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<AnomalyRecord>>;

    async fn severities(&self, event_id: i64) -> anyhow::Result<Vec<SeverityRecord>>;

    async fn reconstruction(
        &self,
        experiment_slug: &str,
        data_source_ids: &[i64],
        window: TimeWindow,
    ) -> anyhow::Result<ReconstructionSeries>;

    async fn statistics_run_ids(&self) -> anyhow::Result<Vec<i64>>;

    async fn labeled_events_run_ids(&self) -> anyhow::Result<Vec<i64>>;

    /// TRAIN runs of the training pipeline
    async fn training_runs(&self) -> anyhow::Result<Vec<TrainingRun>>;

    /// Experiment slugs that have an events-detection run
    async fn experiment_slugs_with_events(&self) -> anyhow::Result<Vec<String>>;

    async fn events_run_ids(&self, experiment_slug: &str) -> anyhow::Result<Vec<i64>>;
}
