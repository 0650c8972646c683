// Flat-file store: manual events and uploaded pipeline results as CSV files
use crate::application::manual_event_store::{
    outcome_for, ManualEventKey, ManualEventStore, NewManualEvent, ReconstructionRow, UntagOutcome, UploadStore,
};
use crate::application::sensor_repository::LabeledEventRow;
use crate::domain::anomaly::AnomalyRecord;
use crate::domain::event::{Event, EventDetails, ManualEventInfo, MANUAL_LABEL};
use crate::domain::telemetry::TimeWindow;
use crate::infrastructure::timestamps::{parse_timestamp, TimestampError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANUAL_EVENTS_FILE: &str = "manual_events.csv";
pub const ANOMALIES_FILE: &str = "anomalies_manual.csv";
pub const EVENTS_FILE: &str = "events_manual.csv";
pub const RECONSTRUCTION_FILE: &str = "reconstruction_manual.csv";

const MANUAL_SOURCE: &str = "temporary_data/manual_events.csv";
const UPLOADED_SOURCE: &str = "temporary_data/events_manual.csv";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("invalid id list '{0}'")]
    IdList(String),
}

/// `"[14, 15]"` (or the database's `"{14,15}"`) -> `[14, 15]`. Empty brackets or an empty cell give no ids.
pub fn parse_id_list(text: &str) -> Result<Vec<i64>, ParseError> {
    let inner = text.trim().trim_start_matches(['[', '{']).trim_end_matches([']', '}']);
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<i64>().map_err(|_| ParseError::IdList(text.to_string())))
        .collect()
}

pub fn format_id_list(ids: &[i64]) -> String {
    let parts: Vec<String> = ids.iter().map(i64::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn parse_flag(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("true")
}

fn flag(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn read_rows<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, ParseError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManualEventCsvRow {
    label_name: String,
    machine_id: i64,
    data_sources_list: String,
    start_timestamp: String,
    end_timestamp: String,
    username: String,
    #[serde(default)]
    insert_timestamp: String,
    #[serde(default)]
    pipelines_configurations: String,
    #[serde(default)]
    is_deprecated: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnomalyCsvRow {
    anomaly_id: i64,
    machine_id: i64,
    data_source_id: i64,
    model_type: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct LabeledEventCsvRow {
    #[serde(default)]
    event_id: Option<i64>,
    machine_id: i64,
    start_timestamp: String,
    end_timestamp: String,
    event_type_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PredictedEventCsvRow {
    event_id: i64,
    machine_id: i64,
    start_timestamp: String,
    end_timestamp: String,
    num_anomalies: usize,
    anomaly_id_list: String,
    #[serde(default)]
    data_sources_list: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReconstructionCsvRow {
    data_source_id: i64,
    timestamp: String,
    algorithm: String,
    value: f64,
}

/// Uploaded labeled events. Rows without an `event_id` are numbered from 1.
pub fn parse_labeled_events(bytes: &[u8], timezone: Tz) -> Result<Vec<LabeledEventRow>, ParseError> {
    read_rows::<LabeledEventCsvRow>(bytes)?
        .into_iter()
        .enumerate()
        .map(|(index, row)| -> Result<_, ParseError> {
            Ok(LabeledEventRow {
                event_id: row.event_id.unwrap_or(index as i64 + 1),
                machine_id: row.machine_id,
                start_timestamp: parse_timestamp(&row.start_timestamp, timezone)?,
                end_timestamp: parse_timestamp(&row.end_timestamp, timezone)?,
                event_type_id: row.event_type_id,
                data_source_id: None,
            })
        })
        .collect()
}

pub fn parse_anomalies(bytes: &[u8], timezone: Tz) -> Result<Vec<AnomalyRecord>, ParseError> {
    read_rows::<AnomalyCsvRow>(bytes)?
        .into_iter()
        .map(|row| -> Result<_, ParseError> {
            Ok(AnomalyRecord {
                anomaly_id: row.anomaly_id,
                machine_id: row.machine_id,
                data_source_id: row.data_source_id,
                model_type: row.model_type,
                timestamp: parse_timestamp(&row.timestamp, timezone)?,
            })
        })
        .collect()
}

pub fn parse_predicted_events(bytes: &[u8], timezone: Tz) -> Result<Vec<Event>, ParseError> {
    read_rows::<PredictedEventCsvRow>(bytes)?
        .into_iter()
        .map(|row| -> Result<_, ParseError> {
            Ok(Event {
                event_id: row.event_id,
                machine_id: row.machine_id,
                start_timestamp: parse_timestamp(&row.start_timestamp, timezone)?,
                end_timestamp: parse_timestamp(&row.end_timestamp, timezone)?,
                label_name: "Predicted".to_string(),
                source_table: UPLOADED_SOURCE.to_string(),
                data_source_ids: parse_id_list(&row.data_sources_list)?,
                details: EventDetails::Predicted {
                    num_anomalies: row.num_anomalies,
                    anomaly_ids: parse_id_list(&row.anomaly_id_list)?,
                },
            })
        })
        .collect()
}

pub fn parse_reconstruction(bytes: &[u8], timezone: Tz) -> Result<Vec<ReconstructionRow>, ParseError> {
    read_rows::<ReconstructionCsvRow>(bytes)?
        .into_iter()
        .map(|row| -> Result<_, ParseError> {
            Ok(ReconstructionRow {
                data_source_id: row.data_source_id,
                algorithm: row.algorithm,
                timestamp: parse_timestamp(&row.timestamp, timezone)?,
                value: row.value,
            })
        })
        .collect()
}

/// CSV files under one working directory. Every write rewrites the whole file.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
    datetime_format: String,
    timezone: Tz,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>, datetime_format: impl Into<String>, timezone: Tz) -> Self {
        Self {
            dir: dir.into(),
            datetime_format: datetime_format.into(),
            timezone,
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn format(&self, timestamp: NaiveDateTime) -> String {
        timestamp.format(&self.datetime_format).to_string()
    }

    fn parse(&self, text: &str) -> Result<NaiveDateTime, TimestampError> {
        NaiveDateTime::parse_from_str(text.trim(), &self.datetime_format)
            .or_else(|_| parse_timestamp(text, self.timezone))
    }

    /// Rows of `file`; a missing file reads as empty.
    fn read_file<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<Vec<T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&path).with_context(|| format!("Failed reading {}", path.display()))?;
        read_rows(&bytes).with_context(|| format!("Failed parsing {}", path.display()))
    }

    fn write_file<T: Serialize>(&self, file: &str, rows: &[T]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed creating {}", self.dir.display()))?;
        let path = self.path(file);
        let mut writer = csv::Writer::from_path(&path).with_context(|| format!("Failed opening {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn manual_event(&self, index: usize, row: &ManualEventCsvRow) -> anyhow::Result<Event> {
        let insert_timestamp = match row.insert_timestamp.trim() {
            "" => None,
            text => Some(self.parse(text)?),
        };
        Ok(Event {
            event_id: index as i64 + 1,
            machine_id: row.machine_id,
            start_timestamp: self.parse(&row.start_timestamp)?,
            end_timestamp: self.parse(&row.end_timestamp)?,
            label_name: row.label_name.clone(),
            source_table: MANUAL_SOURCE.to_string(),
            data_source_ids: parse_id_list(&row.data_sources_list)?,
            details: EventDetails::Manual(ManualEventInfo {
                username: row.username.clone(),
                insert_timestamp,
                pipelines_configurations: row.pipelines_configurations.clone(),
                is_deprecated: parse_flag(&row.is_deprecated),
            }),
        })
    }

    fn key_matches(&self, key: &ManualEventKey, row: &ManualEventCsvRow) -> bool {
        match (self.parse(&row.start_timestamp), self.parse(&row.end_timestamp)) {
            (Ok(start), Ok(end)) => key.matches(row.machine_id, &row.username, start, end),
            _ => false,
        }
    }
}

#[async_trait]
impl ManualEventStore for CsvStore {
    async fn load(&self, include_deprecated: bool) -> anyhow::Result<Vec<Event>> {
        let rows: Vec<ManualEventCsvRow> = self.read_file(MANUAL_EVENTS_FILE)?;
        let mut events = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let event = self.manual_event(index, row)?;
            if include_deprecated || !event.is_deprecated() {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn append(&self, event: &NewManualEvent) -> anyhow::Result<()> {
        let mut rows: Vec<ManualEventCsvRow> = self.read_file(MANUAL_EVENTS_FILE)?;
        rows.push(ManualEventCsvRow {
            label_name: MANUAL_LABEL.to_string(),
            machine_id: event.machine_id,
            data_sources_list: format_id_list(&event.data_source_ids),
            start_timestamp: self.format(event.window.start),
            end_timestamp: self.format(event.window.end),
            username: event.username.clone(),
            insert_timestamp: self.format(event.insert_timestamp),
            pipelines_configurations: event.pipelines_configurations.clone(),
            is_deprecated: flag(false).to_string(),
        });
        self.write_file(MANUAL_EVENTS_FILE, &rows)
    }

    async fn deprecate(&self, key: &ManualEventKey) -> anyhow::Result<UntagOutcome> {
        let mut rows: Vec<ManualEventCsvRow> = self.read_file(MANUAL_EVENTS_FILE)?;
        let matching: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| self.key_matches(key, row))
            .map(|(index, _)| index)
            .collect();

        let outcome = outcome_for(matching.len());
        if let (UntagOutcome::Deprecated, Some(index)) = (outcome, matching.first()) {
            rows[*index].is_deprecated = flag(true).to_string();
            self.write_file(MANUAL_EVENTS_FILE, &rows)?;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl UploadStore for CsvStore {
    async fn predicted_anomalies(
        &self,
        machine_id: i64,
        anomaly_ids: Option<&[i64]>,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<AnomalyRecord>> {
        let rows: Vec<AnomalyCsvRow> = self.read_file(ANOMALIES_FILE)?;
        let mut anomalies = Vec::new();
        for row in rows {
            if row.machine_id != machine_id || anomaly_ids.is_some_and(|ids| !ids.contains(&row.anomaly_id)) {
                continue;
            }
            let timestamp = self.parse(&row.timestamp)?;
            if window.contains(timestamp) {
                anomalies.push(AnomalyRecord {
                    anomaly_id: row.anomaly_id,
                    machine_id: row.machine_id,
                    data_source_id: row.data_source_id,
                    model_type: row.model_type,
                    timestamp,
                });
            }
        }
        Ok(anomalies)
    }

    async fn save_predicted_anomalies(&self, anomalies: &[AnomalyRecord]) -> anyhow::Result<()> {
        let rows: Vec<AnomalyCsvRow> = anomalies
            .iter()
            .map(|a| AnomalyCsvRow {
                anomaly_id: a.anomaly_id,
                machine_id: a.machine_id,
                data_source_id: a.data_source_id,
                model_type: a.model_type.clone(),
                timestamp: self.format(a.timestamp),
            })
            .collect();
        self.write_file(ANOMALIES_FILE, &rows)
    }

    async fn remove_predicted_anomalies(&self) -> anyhow::Result<()> {
        remove_if_present(&self.path(ANOMALIES_FILE))
    }

    async fn save_predicted_events(&self, events: &[Event]) -> anyhow::Result<()> {
        let rows: Vec<PredictedEventCsvRow> = events
            .iter()
            .map(|e| PredictedEventCsvRow {
                event_id: e.event_id,
                machine_id: e.machine_id,
                start_timestamp: self.format(e.start_timestamp),
                end_timestamp: self.format(e.end_timestamp),
                num_anomalies: match &e.details {
                    EventDetails::Predicted { num_anomalies, .. } => *num_anomalies,
                    _ => 0,
                },
                anomaly_id_list: format_id_list(e.anomaly_ids().unwrap_or_default()),
                data_sources_list: format_id_list(&e.data_source_ids),
            })
            .collect();
        self.write_file(EVENTS_FILE, &rows)
    }

    async fn save_reconstruction(&self, rows: &[ReconstructionRow]) -> anyhow::Result<()> {
        let rows: Vec<ReconstructionCsvRow> = rows
            .iter()
            .map(|r| ReconstructionCsvRow {
                data_source_id: r.data_source_id,
                timestamp: self.format(r.timestamp),
                algorithm: r.algorithm.clone(),
                value: r.value,
            })
            .collect();
        self.write_file(RECONSTRUCTION_FILE, &rows)
    }
}

fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed removing {}", path.display())),
    }
}
