// Session loader - Builds the session from catalog queries and refills its caches
use crate::application::pipeline_service::PipelineService;
use crate::application::sensor_repository::{LabeledEventRow, SensorRepository};
use crate::application::tagging_service::TaggingService;
use crate::domain::anomaly::PredictedEventSet;
use crate::domain::event::{default_event_types, Event, EventDetails, EventTable, LabeledEventSet};
use crate::domain::machine::{rank_statistics, ChannelCatalog, MachineCatalog};
use crate::domain::pipeline::{PipelineSelection, PipelineStage};
use crate::domain::session::{SessionConfig, SessionState};
use crate::domain::telemetry::TimeWindow;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct SessionLoader {
    repository: Arc<dyn SensorRepository>,
    pipelines: PipelineService,
    tagging: TaggingService,
    /// Span of the synthetic "No data" event.
    full_range: TimeWindow,
}

impl SessionLoader {
    pub fn new(
        repository: Arc<dyn SensorRepository>,
        pipelines: PipelineService,
        tagging: TaggingService,
        full_range: TimeWindow,
    ) -> Self {
        Self {
            repository,
            pipelines,
            tagging,
            full_range,
        }
    }

    pub fn full_range(&self) -> TimeWindow {
        self.full_range
    }

    /// Session for a fresh start. An unreachable store gives the manual-only fallback.
    pub async fn bootstrap(&self, read_files_multi: bool) -> SessionState {
        let catalog = async {
            let machines = self.repository.list_machines().await?;
            let options = self.pipelines.load_options().await?;
            anyhow::Ok((machines, options))
        };

        let mut session = match catalog.await {
            Ok((machines, options)) => {
                let config = SessionConfig::new(PipelineSelection::from_options(options), read_files_multi);
                SessionState::new(MachineCatalog::new(machines), config, false)
            }
            Err(e) => {
                tracing::error!("[SWITCHING TO MANUAL AND DEFAULTS ONLY] Please verify DB connection: {}", e);
                SessionState::fallback(read_files_multi)
            }
        };
        self.initialize(&mut session).await;
        session
    }

    /// Refills every cache for the selected pipeline versions.
    pub async fn initialize(&self, session: &mut SessionState) {
        self.tagging.reload(session).await;
        if session.only_manual_mode {
            tracing::warn!("Only manual mode is set");
            return;
        }

        let versions = session.config.pipeline.versions.clone();
        let statistics_run = versions.get(PipelineStage::Statistics).parse::<i64>().ok();
        let labeled_run = versions.get(PipelineStage::LabeledEvents).parse::<i64>().ok();
        let predicted_run = versions.get(PipelineStage::PredictedEvents).parse::<i64>().ok();

        let event_types = self.repository.labeled_event_types().await.unwrap_or_else(|e| {
            tracing::warn!("Could not load labeled event types, using defaults: {}", e);
            default_event_types()
        });

        for machine_id in session.machines.ids() {
            self.ensure_channels(session, machine_id).await;

            if let Some(run_id) = statistics_run {
                match self.repository.channel_statistics(machine_id, run_id).await {
                    Ok(stats) => {
                        session.caches.channel_statistics.insert(machine_id, rank_statistics(stats));
                    }
                    Err(e) => tracing::warn!(machine_id, "Could not load channel statistics: {}", e),
                }
            }

            match self.repository.ingestion_rates(machine_id).await {
                Ok(rates) => {
                    session.caches.ingestion_rates.insert(machine_id, rates);
                }
                Err(e) => tracing::warn!(machine_id, "Could not load ingestion rates: {}", e),
            }

            if let Some(run_id) = labeled_run {
                let set = self.labeled_events(machine_id, run_id, &event_types).await;
                session.caches.labeled.insert(machine_id, set);
            }

            if let Some(run_id) = predicted_run {
                let events = self.repository.predicted_events(machine_id, run_id).await.unwrap_or_else(|e| {
                    tracing::warn!(machine_id, "Could not load predicted events: {}", e);
                    Vec::new()
                });
                session
                    .caches
                    .predicted
                    .insert(machine_id, PredictedEventSet::new(EventTable::new(events)));
            }
        }

        session.caches.connections = self.repository.channel_connections().await.unwrap_or_else(|e| {
            tracing::warn!("Could not load channel connections: {}", e);
            Vec::new()
        });

        tracing::info!(
            machines = session.machines.ids().len(),
            labeled = session.caches.labeled.len(),
            predicted = session.caches.predicted.len(),
            manual = session.caches.manual.len(),
            "session initialized"
        );
    }

    /// Loads the channel catalog of a machine unless it is cached already.
    pub async fn ensure_channels(&self, session: &mut SessionState, machine_id: i64) {
        if session.caches.channels.contains_key(&machine_id) {
            return;
        }
        match self.repository.data_sources(machine_id).await {
            Ok(sources) => {
                let catalog = ChannelCatalog::new(&sources);
                if catalog.is_empty() {
                    tracing::warn!(machine_id, "machine has no data sources");
                } else {
                    tracing::debug!(machine_id, channels = catalog.len(), "channel catalog loaded");
                }
                session.caches.channels.insert(machine_id, catalog);
            }
            Err(e) => tracing::warn!(machine_id, "Could not load data sources: {}", e),
        }
    }

    async fn labeled_events(&self, machine_id: i64, run_id: i64, event_types: &BTreeMap<i32, String>) -> LabeledEventSet {
        let rows = self.repository.labeled_events(machine_id, run_id).await.unwrap_or_else(|e| {
            tracing::warn!(machine_id, "Could not load labeled events: {}", e);
            Vec::new()
        });
        if rows.is_empty() {
            return LabeledEventSet::no_data(machine_id, self.full_range);
        }
        let per_data_source = self
            .repository
            .labeled_events_per_data_source(machine_id, run_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(machine_id, "Could not load labeled events per data source: {}", e);
                Vec::new()
            });

        LabeledEventSet::new(
            rows.iter().map(|row| labeled_event(row, event_types, "events.merged_calculated_labeled_events")).collect(),
            per_data_source
                .iter()
                .map(|row| labeled_event(row, event_types, "events.calculated_labeled_events_per_data_source"))
                .collect(),
        )
    }
}

/// Attaches the label name to a labeled row.
pub fn labeled_event(row: &LabeledEventRow, event_types: &BTreeMap<i32, String>, source_table: &str) -> Event {
    Event {
        event_id: row.event_id,
        machine_id: row.machine_id,
        start_timestamp: row.start_timestamp,
        end_timestamp: row.end_timestamp,
        label_name: event_types
            .get(&row.event_type_id)
            .cloned()
            .unwrap_or_else(|| row.event_type_id.to_string()),
        source_table: source_table.to_string(),
        data_source_ids: row.data_source_id.into_iter().collect(),
        details: EventDetails::Labeled {
            event_type_id: row.event_type_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manual_event_store::fake::{MemoryManualStore, MemoryUploads};
    use crate::application::manual_event_store::ManualStores;
    use crate::application::sensor_repository::fake::{predicted_event, FakeRepository};
    use crate::domain::event::tests::ts;
    use crate::domain::event::NO_DATA_EVENT_TYPE_ID;
    use crate::domain::machine::{DataSource, Machine};

    fn row(event_id: i64, machine_id: i64, day: u32, type_id: i32, data_source_id: Option<i64>) -> LabeledEventRow {
        LabeledEventRow {
            event_id,
            machine_id,
            start_timestamp: ts(day, 1),
            end_timestamp: ts(day, 2),
            event_type_id: type_id,
            data_source_id,
        }
    }

    fn loader(repository: FakeRepository) -> SessionLoader {
        let repository: Arc<dyn SensorRepository> = Arc::new(repository);
        let pipelines = PipelineService::new(repository.clone(), Arc::new(MemoryUploads::default()));
        let manual = ManualStores {
            database: Arc::new(MemoryManualStore::default()),
            files: Arc::new(MemoryManualStore::default()),
        };
        let tagging = TaggingService::new(manual, chrono_tz::Asia::Jerusalem);
        SessionLoader::new(repository, pipelines, tagging, TimeWindow::new(ts(1, 0), ts(28, 0)))
    }

    fn live_repository() -> FakeRepository {
        FakeRepository {
            machines: vec![Machine::new(2, "10051164"), Machine::new(3, "10051167")],
            data_sources: vec![DataSource {
                data_source_id: 14,
                machine_id: 2,
                short_name: Some("PressureA".into()),
                customer_data_source_id: "P-1".into(),
                data_source_name: None,
            }],
            labeled: vec![row(1, 2, 3, 0, None), row(2, 2, 4, 1, None), row(3, 2, 4, 1, Some(14))],
            predicted: vec![predicted_event(9, ts(4, 1), ts(4, 3), vec![1])],
            statistics_runs: vec![7],
            labeled_runs: vec![7],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_falls_back_when_store_is_down() {
        let session = loader(FakeRepository {
            offline: true,
            ..Default::default()
        })
        .bootstrap(false)
        .await;

        assert!(session.only_manual_mode);
        assert_eq!(session.machines.names()[0], "1-10051158");
        assert!(session.caches.labeled.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_loads_labeled_sets_per_machine() {
        let session = loader(live_repository()).bootstrap(false).await;

        assert!(!session.only_manual_mode);
        let labeled = &session.caches.labeled[&2];
        assert_eq!(labeled.full.len(), 2);
        assert_eq!(labeled.filtered.len(), 1);
        assert_eq!(labeled.filtered.get(0).unwrap().label_name, "Machine stop");
        assert_eq!(labeled.per_data_source[0].data_source_ids, vec![14]);
        assert_eq!(session.caches.channels[&2].name_of(14).as_deref(), Some("14-PressureA"));

        // no rows for machine 3: a single "No data" event over the full range
        let empty = &session.caches.labeled[&3];
        assert_eq!(empty.full.len(), 1);
        assert_eq!(empty.full.get(0).unwrap().event_type_id(), Some(NO_DATA_EVENT_TYPE_ID));
        assert_eq!(empty.full.get(0).unwrap().start_timestamp, ts(1, 0));
    }

    #[tokio::test]
    async fn test_manual_versions_skip_store_loaders() {
        let loader = loader(live_repository());
        let mut session = loader.bootstrap(false).await;
        session.config.pipeline = PipelineSelection::manual_only();
        session.reset_caches();
        loader.initialize(&mut session).await;

        assert!(session.caches.labeled.is_empty());
        assert!(session.caches.predicted.is_empty());
        assert!(session.caches.channel_statistics.is_empty());
        assert!(session.caches.channels.contains_key(&2));
    }

    #[test]
    fn test_unknown_event_type_keeps_numeric_label() {
        let event = labeled_event(&row(1, 2, 1, 42, None), &default_event_types(), "t");
        assert_eq!(event.label_name, "42");
    }
}
