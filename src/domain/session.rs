// Session state aggregate: configuration, caches and the event cursor
use super::anomaly::{AnomalyRecord, PredictedEventSet, SeverityRecord};
use super::event::{Event, EventKind, EventTable, LabeledEventSet, TimePadding};
use super::figure::{DisplayOptions, Figure};
use super::machine::{ChannelCatalog, ChannelConnection, ChannelStatistics, IngestionRate, MachineCatalog};
use super::pipeline::PipelineSelection;
use super::telemetry::{TimeSeriesPoint, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    pub max_data_sources_to_show: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_data_sources_to_show: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualTaggingConfig {
    pub username: String,
    pub use_db: bool,
    pub show_deprecated: bool,
    pub enable_untagging: bool,
}

impl Default for ManualTaggingConfig {
    fn default() -> Self {
        Self {
            username: "Unknown".to_string(),
            use_db: true,
            show_deprecated: false,
            enable_untagging: false,
        }
    }
}

impl ManualTaggingConfig {
    /// Changes the tagging identity. Untagging stays enabled only for allowed users.
    pub fn set_username(&mut self, username: &str, untag_allow_list: &[String]) {
        self.username = username.to_string();
        if !self.may_untag(untag_allow_list) {
            self.enable_untagging = false;
        }
    }

    pub fn may_untag(&self, untag_allow_list: &[String]) -> bool {
        untag_allow_list.iter().any(|user| user == &self.username)
    }

    pub fn untagging_active(&self, untag_allow_list: &[String]) -> bool {
        self.enable_untagging && self.may_untag(untag_allow_list)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub pipeline: PipelineSelection,
    pub time: TimePadding,
    pub events: EventsConfig,
    pub manual_tagging: ManualTaggingConfig,
    pub read_files_multi: bool,
    /// Render the figure on every next / previous event.
    pub navigate_fast: bool,
    /// Render the figure on every next / previous date range.
    pub navigate_dates_fast: bool,
}

impl SessionConfig {
    pub fn new(pipeline: PipelineSelection, read_files_multi: bool) -> Self {
        Self {
            pipeline,
            time: TimePadding::default(),
            events: EventsConfig::default(),
            manual_tagging: ManualTaggingConfig::default(),
            read_files_multi,
            navigate_fast: false,
            navigate_dates_fast: false,
        }
    }
}

/// Reconstruction series: channel -> algorithm -> points.
pub type ReconstructionSeries = HashMap<i64, BTreeMap<String, Vec<TimeSeriesPoint>>>;

#[derive(Debug, Clone, Default)]
pub struct SessionCaches {
    pub channels: HashMap<i64, ChannelCatalog>,
    pub channel_statistics: HashMap<i64, Vec<ChannelStatistics>>,
    pub labeled: HashMap<i64, LabeledEventSet>,
    pub predicted: HashMap<i64, PredictedEventSet>,
    pub manual: Vec<Event>,
    pub connections: Vec<ChannelConnection>,
    pub ingestion_rates: HashMap<i64, Vec<IngestionRate>>,
    /// Series from uploaded reconstruction files.
    pub uploaded_reconstruction: ReconstructionSeries,
    /// Most recent detail figure; replaced on every render.
    pub last_figure: Option<Figure>,
}

/// Navigation position over the events of one kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventCursor {
    pub kind: Option<EventKind>,
    pub events: EventTable,
    /// Position asked for by the last navigation, before clamping.
    pub requested_index: i64,
    pub selected_event_internal: usize,
    pub selected_event: Option<i64>,
    pub selected_event_type: Option<String>,
    pub window: Option<TimeWindow>,
    pub anomaly_ids: Option<Vec<i64>>,
    pub anomalies: Vec<AnomalyRecord>,
    pub severities: Option<Vec<SeverityRecord>>,
    pub anomaly_models: Option<BTreeMap<i64, Vec<String>>>,
}

impl EventCursor {
    pub fn current(&self) -> Option<&Event> {
        self.events.get(self.selected_event_internal)
    }

    pub fn clear_selection(&mut self) {
        *self = Self::default();
    }
}

/// What the analyst currently looks at, outside the event cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewMode {
    pub selected_machine: Option<i64>,
    pub load_by_dates: bool,
    pub selected_channels: Vec<String>,
    /// Date picker range.
    pub window: Option<TimeWindow>,
    pub filter_predicted: bool,
    pub display: DisplayOptions,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub machines: MachineCatalog,
    pub config: SessionConfig,
    pub caches: SessionCaches,
    pub cursor: EventCursor,
    pub view: ViewMode,
    pub only_manual_mode: bool,
}

impl SessionState {
    pub fn new(machines: MachineCatalog, config: SessionConfig, only_manual_mode: bool) -> Self {
        Self {
            machines,
            config,
            caches: SessionCaches::default(),
            cursor: EventCursor::default(),
            view: ViewMode::default(),
            only_manual_mode,
        }
    }

    /// Manual-only session used when the store is unreachable.
    pub fn fallback(read_files_multi: bool) -> Self {
        Self::new(
            MachineCatalog::fallback(),
            SessionConfig::new(PipelineSelection::manual_only(), read_files_multi),
            true,
        )
    }

    /// Drops everything loaded from the store, keeping configuration.
    pub fn reset_caches(&mut self) {
        self.caches = SessionCaches::default();
        self.cursor.clear_selection();
    }

    pub fn manual_events_of(&self, machine_id: i64) -> Vec<Event> {
        self.caches
            .manual
            .iter()
            .filter(|e| e.machine_id == machine_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagging_requires_allow_listed_user() {
        let allow = vec!["Eri".to_string()];
        let mut tagging = ManualTaggingConfig::default();
        tagging.set_username("Eri", &allow);
        tagging.enable_untagging = true;
        assert!(tagging.untagging_active(&allow));

        tagging.set_username("Dana", &allow);
        assert!(!tagging.enable_untagging);
        assert!(!tagging.untagging_active(&allow));
    }

    #[test]
    fn test_fallback_session_is_manual_only() {
        let session = SessionState::fallback(false);
        assert!(session.only_manual_mode);
        assert_eq!(session.config.pipeline.versions.training, "manual");
        assert_eq!(session.config.time.before_hours, 3.0);
        assert_eq!(session.config.events.max_data_sources_to_show, 5);
        assert_eq!(session.config.manual_tagging.username, "Unknown");
    }
}
