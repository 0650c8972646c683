// Upload service - Analyst-provided CSV files standing in for pipeline results
use crate::application::manual_event_store::{ReconstructionRow, UploadStore};
use crate::application::sensor_repository::LabeledEventRow;
use crate::application::session_loader::labeled_event;
use crate::domain::anomaly::PredictedEventSet;
use crate::domain::event::{default_event_types, EventTable, LabeledEventSet};
use crate::domain::session::{ReconstructionSeries, SessionState};
use crate::domain::telemetry::TimeSeriesPoint;
use crate::infrastructure::csv_store::{
    parse_anomalies, parse_labeled_events, parse_predicted_events, parse_reconstruction, ParseError,
};
use base64::Engine;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("There is no implementation for extension {0}")]
    UnsupportedExtension(String),
    #[error("could not decode upload contents: {0}")]
    Decode(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    LabeledEvents,
    PredictedAnomalies,
    PredictedEvents,
    Reconstruction,
}

/// A file as the browser sends it: name plus `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub contents: String,
}

impl UploadedFile {
    /// CSV bytes of the file.
    pub fn decode(&self) -> Result<Vec<u8>, UploadError> {
        let extension = Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !extension.eq_ignore_ascii_case("csv") {
            return Err(UploadError::UnsupportedExtension(format!(".{}", extension)));
        }
        let payload = match self.contents.split_once(',') {
            Some((_, payload)) => payload,
            None => self.contents.as_str(),
        };
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| UploadError::Decode(e.to_string()))
    }
}

/// "Files were uploaded for machine 2" / "... machines 2,3" / "No files were uploaded".
pub fn machines_status(machines: &BTreeSet<i64>) -> String {
    let joined = machines.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    match machines.len() {
        0 => "No files were uploaded".to_string(),
        1 => format!("Files were uploaded for machine {}", joined),
        _ => format!("Files were uploaded for machines {}", joined),
    }
}

#[derive(Clone)]
pub struct UploadService {
    uploads: Arc<dyn UploadStore>,
    timezone: Tz,
}

impl UploadService {
    pub fn new(uploads: Arc<dyn UploadStore>, timezone: Tz) -> Self {
        Self { uploads, timezone }
    }

    /// Parses every file, skipping the ones that fail, and installs the result.
    /// Returns the status line shown under the upload control.
    pub async fn upload(&self, session: &mut SessionState, kind: UploadKind, files: &[UploadedFile]) -> String {
        match kind {
            UploadKind::LabeledEvents => {
                let rows = self.parse_all(files, parse_labeled_events);
                self.install_labeled(session, rows)
            }
            UploadKind::PredictedAnomalies => {
                let anomalies = self.parse_all(files, parse_anomalies);
                if let Err(e) = self.uploads.save_predicted_anomalies(&anomalies).await {
                    tracing::error!("Could not store uploaded anomalies: {}", e);
                    return "No files were uploaded".to_string();
                }
                machines_status(&anomalies.iter().map(|a| a.machine_id).collect())
            }
            UploadKind::PredictedEvents => {
                let events = self.parse_all(files, parse_predicted_events);
                if let Err(e) = self.uploads.save_predicted_events(&events).await {
                    tracing::warn!("Could not store uploaded predicted events: {}", e);
                }
                let machines: BTreeSet<i64> = events.iter().map(|e| e.machine_id).collect();
                session.caches.predicted = machines
                    .iter()
                    .map(|machine_id| {
                        let of_machine = events.iter().filter(|e| e.machine_id == *machine_id).cloned().collect();
                        (*machine_id, PredictedEventSet::new(EventTable::new(of_machine)))
                    })
                    .collect();
                machines_status(&machines)
            }
            UploadKind::Reconstruction => {
                let rows = self.parse_all(files, parse_reconstruction);
                if let Err(e) = self.uploads.save_reconstruction(&rows).await {
                    tracing::warn!("Could not store uploaded reconstruction: {}", e);
                }
                let data_sources: BTreeSet<i64> = rows.iter().map(|r| r.data_source_id).collect();
                session.caches.uploaded_reconstruction = reconstruction_series(rows);
                if data_sources.is_empty() {
                    return "No files were uploaded".to_string();
                }
                let joined = data_sources.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
                format!("Reconstruction files were uploaded for {}", joined)
            }
        }
    }

    fn parse_all<T>(&self, files: &[UploadedFile], parse: impl Fn(&[u8], Tz) -> Result<Vec<T>, ParseError>) -> Vec<T> {
        let mut parsed = Vec::new();
        for file in files {
            let result = file.decode().and_then(|bytes| Ok(parse(&bytes, self.timezone)?));
            match result {
                Ok(rows) => {
                    tracing::info!(filename = %file.filename, rows = rows.len(), "upload parsed");
                    parsed.extend(rows);
                }
                Err(e) => tracing::warn!(filename = %file.filename, "Skipping uploaded file: {}", e),
            }
        }
        parsed
    }

    /// Replaces labeled events of every catalog machine with the uploaded ones.
    fn install_labeled(&self, session: &mut SessionState, rows: Vec<LabeledEventRow>) -> String {
        let event_types = default_event_types();
        let mut with_data = BTreeSet::new();
        session.caches.labeled = session
            .machines
            .ids()
            .into_iter()
            .map(|machine_id| {
                let events: Vec<_> = rows
                    .iter()
                    .filter(|row| row.machine_id == machine_id)
                    .map(|row| labeled_event(row, &event_types, "upload"))
                    .collect();
                if !events.is_empty() {
                    with_data.insert(machine_id);
                }
                (machine_id, LabeledEventSet::new(events, Vec::new()))
            })
            .collect();
        machines_status(&with_data)
    }
}

fn reconstruction_series(rows: Vec<ReconstructionRow>) -> ReconstructionSeries {
    let mut series: ReconstructionSeries = HashMap::new();
    for row in rows {
        series
            .entry(row.data_source_id)
            .or_default()
            .entry(row.algorithm)
            .or_default()
            .push(TimeSeriesPoint::at(row.timestamp, row.value));
    }
    for algorithms in series.values_mut() {
        for points in algorithms.values_mut() {
            points.sort_by_key(|p| p.time_ms);
        }
    }
    series
}
