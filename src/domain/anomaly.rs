// Predicted anomalies, severities and channel ranking
use super::event::EventTable;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_id: i64,
    pub machine_id: i64,
    pub data_source_id: i64,
    pub model_type: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityRecord {
    pub event_id: i64,
    pub data_source_id: i64,
    pub severity: f64,
}

/// Predicted events of one machine plus the anomalies fetched per event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictedEventSet {
    pub events: EventTable,
    pub anomalies: HashMap<i64, Vec<AnomalyRecord>>,
    pub severity_events: Option<Vec<SeverityRecord>>,
}

impl PredictedEventSet {
    pub fn new(events: EventTable) -> Self {
        Self {
            events,
            anomalies: HashMap::new(),
            severity_events: None,
        }
    }
}

/// How default channels are picked for the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFilter {
    /// Use the channel list stored on the event row.
    NoFilter,
    /// Rank by the number of distinct anomaly timestamps per channel.
    StartTimestamp,
    /// Rank by the number of anomaly rows per channel.
    Count,
}

/// Channels ordered by their contribution to `anomalies`, strongest first.
/// Ties are broken by data source id so the order is stable.
pub fn rank_channels(anomalies: &[AnomalyRecord], filter: ChannelFilter) -> Vec<i64> {
    let mut scores: HashMap<i64, usize> = HashMap::new();
    match filter {
        ChannelFilter::NoFilter => return Vec::new(),
        ChannelFilter::Count => {
            for anomaly in anomalies {
                *scores.entry(anomaly.data_source_id).or_default() += 1;
            }
        }
        ChannelFilter::StartTimestamp => {
            let mut seen: HashMap<i64, HashSet<NaiveDateTime>> = HashMap::new();
            for anomaly in anomalies {
                seen.entry(anomaly.data_source_id)
                    .or_default()
                    .insert(anomaly.timestamp);
            }
            scores = seen.into_iter().map(|(id, stamps)| (id, stamps.len())).collect();
        }
    }

    let mut ranked: Vec<(i64, usize)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// Model types that flagged each channel, in order of first appearance.
pub fn models_per_channel(anomalies: &[AnomalyRecord]) -> BTreeMap<i64, Vec<String>> {
    let mut models: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for anomaly in anomalies {
        let entry = models.entry(anomaly.data_source_id).or_default();
        if !entry.contains(&anomaly.model_type) {
            entry.push(anomaly.model_type.clone());
        }
    }
    models
}
