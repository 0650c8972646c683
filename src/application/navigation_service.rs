// Navigation service - Event cursor, anomaly scoping and default channels
use crate::application::manual_event_store::UploadStore;
use crate::application::sensor_repository::SensorRepository;
use crate::domain::anomaly::{models_per_channel, rank_channels, AnomalyRecord, ChannelFilter, SeverityRecord};
use crate::domain::event::{overlapping_labeled, EventKind, EventTable};
use crate::domain::machine::NameError;
use crate::domain::pipeline::{PipelineStage, MANUAL_VERSION};
use crate::domain::session::SessionState;
use crate::domain::telemetry::TimeWindow;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NavigationError {
    #[error("No events to show")]
    NoEvents,
    #[error("machine {0} is not part of the catalog")]
    UnknownMachine(i64),
    #[error("no machine is selected")]
    NoMachineSelected,
    #[error(transparent)]
    InvalidName(#[from] NameError),
}

#[derive(Clone)]
pub struct NavigationService {
    repository: Arc<dyn SensorRepository>,
    uploads: Arc<dyn UploadStore>,
}

impl NavigationService {
    pub fn new(repository: Arc<dyn SensorRepository>, uploads: Arc<dyn UploadStore>) -> Self {
        Self { repository, uploads }
    }

    /// Events of `kind` for a machine, sorted by start timestamp.
    pub fn machine_events(session: &SessionState, kind: EventKind, machine_id: i64, filter_predicted: bool) -> EventTable {
        match kind {
            EventKind::Labeled => session
                .caches
                .labeled
                .get(&machine_id)
                .map(|set| set.filtered.clone())
                .unwrap_or_default(),
            EventKind::Predicted => {
                let Some(set) = session.caches.predicted.get(&machine_id).filter(|set| !set.events.is_empty()) else {
                    tracing::info!(machine_id, "No predicted events to show for machine");
                    return EventTable::default();
                };
                if !filter_predicted {
                    return set.events.clone();
                }
                match session.caches.labeled.get(&machine_id) {
                    Some(labeled) => overlapping_labeled(&set.events, &labeled.filtered),
                    None => EventTable::default(),
                }
            }
            EventKind::Manual => EventTable::new(session.manual_events_of(machine_id)),
        }
    }

    /// Moves the cursor to `new_index` of `events` and returns the padded window around it.
    ///
    /// Indices outside the table fall back to the first event. Anomalies are
    /// re-fetched for the new window every time.
    pub async fn advance_cursor(
        &self,
        session: &mut SessionState,
        kind: EventKind,
        machine_id: i64,
        new_index: i64,
        events: EventTable,
    ) -> Result<TimeWindow, NavigationError> {
        let internal = events.clamp_index(new_index);
        let event = events.get(internal).cloned().ok_or(NavigationError::NoEvents)?;
        let window = event.padded_window(&session.config.time);
        let events_version = session.config.pipeline.version(PipelineStage::PredictedEvents).to_string();

        if kind == EventKind::Predicted {
            let anomaly_ids = event.anomaly_ids().map(<[i64]>::to_vec).unwrap_or_default();
            let anomalies = self
                .window_anomalies(machine_id, &events_version, Some(&anomaly_ids), window)
                .await;
            let severities = if events_version == MANUAL_VERSION {
                None
            } else {
                Some(self.event_severities(event.event_id).await)
            };

            if let Some(set) = session.caches.predicted.get_mut(&machine_id) {
                if !anomalies.is_empty() {
                    set.anomalies.insert(event.event_id, anomalies.clone());
                }
                set.severity_events = severities.clone();
            }

            let cursor = &mut session.cursor;
            cursor.anomaly_ids = Some(anomaly_ids);
            cursor.anomaly_models = (!anomalies.is_empty()).then(|| models_per_channel(&anomalies));
            cursor.severities = severities;
            cursor.anomalies = anomalies;
        } else {
            let anomalies = self.window_anomalies(machine_id, &events_version, None, window).await;
            let cursor = &mut session.cursor;
            cursor.anomaly_ids = None;
            cursor.severities = None;
            cursor.anomaly_models = None;
            cursor.anomalies = anomalies;
        }

        let cursor = &mut session.cursor;
        cursor.kind = Some(kind);
        cursor.requested_index = new_index;
        cursor.selected_event_internal = internal;
        cursor.selected_event = Some(event.event_id);
        cursor.selected_event_type = Some(event.label_name.clone());
        cursor.window = Some(window);
        cursor.events = events;

        tracing::debug!(machine_id, internal, event_id = event.event_id, %window, "cursor moved");
        Ok(window)
    }

    /// Default channels for the current event, as catalog names.
    pub fn choose_channels(session: &SessionState, machine_id: i64, filter: ChannelFilter) -> Vec<String> {
        let mut ids = match filter {
            ChannelFilter::NoFilter => session
                .cursor
                .current()
                .map(|event| event.data_source_ids.clone())
                .unwrap_or_default(),
            ranking => rank_channels(&session.cursor.anomalies, ranking),
        };
        ids.truncate(session.config.events.max_data_sources_to_show);

        match session.caches.channels.get(&machine_id) {
            Some(catalog) => catalog.names(&ids),
            None => {
                tracing::warn!(machine_id, "channel catalog is not loaded");
                Vec::new()
            }
        }
    }

    /// Anomalies of the selected predicted-events version in `window`.
    /// Uploaded anomalies are used when that version is `manual`.
    pub async fn window_anomalies(
        &self,
        machine_id: i64,
        events_version: &str,
        anomaly_ids: Option<&[i64]>,
        window: TimeWindow,
    ) -> Vec<AnomalyRecord> {
        let result = if events_version == MANUAL_VERSION {
            self.uploads.predicted_anomalies(machine_id, anomaly_ids, window).await
        } else {
            match events_version.parse::<i64>() {
                Ok(run_id) => {
                    self.repository
                        .predicted_anomalies(machine_id, run_id, anomaly_ids, window)
                        .await
                }
                Err(_) => {
                    tracing::warn!(events_version, "predicted-events version is not a run id");
                    Ok(Vec::new())
                }
            }
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(machine_id, "Could not load predicted anomalies: {}", e);
            Vec::new()
        })
    }

    async fn event_severities(&self, event_id: i64) -> Vec<SeverityRecord> {
        self.repository.severities(event_id).await.unwrap_or_else(|e| {
            tracing::warn!(event_id, "Could not load severities: {}", e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manual_event_store::fake::MemoryUploads;
    use crate::application::sensor_repository::fake::{predicted_event, FakeRepository};
    use crate::domain::anomaly::{PredictedEventSet, SeverityRecord};
    use crate::domain::event::tests::{labeled, ts};
    use crate::domain::event::LabeledEventSet;
    use crate::domain::machine::{ChannelCatalog, DataSource};
    use crate::domain::pipeline::{PipelineSelection, PipelineVersionOptions};
    use crate::domain::session::SessionConfig;
    use crate::domain::telemetry::hours;

    fn anomaly(anomaly_id: i64, data_source_id: i64, hour: u32, minute: u32) -> AnomalyRecord {
        AnomalyRecord {
            anomaly_id,
            machine_id: 2,
            data_source_id,
            model_type: "ae".to_string(),
            timestamp: ts(1, hour) + chrono::Duration::minutes(minute as i64),
        }
    }

    fn catalog() -> ChannelCatalog {
        let source = |id: i64, name: &str| DataSource {
            data_source_id: id,
            machine_id: 2,
            short_name: Some(name.to_string()),
            customer_data_source_id: name.to_string(),
            data_source_name: None,
        };
        ChannelCatalog::new(&[source(14, "PressureA"), source(15, "PressureB"), source(16, "Temp")])
    }

    fn session_with_run(events_version: &str) -> SessionState {
        let mut options = PipelineVersionOptions::manual_only();
        options.predicted_events = vec![events_version.to_string(), "manual".to_string()];
        let mut session = SessionState::fallback(false);
        session.config = SessionConfig::new(PipelineSelection::from_options(options), false);
        session.caches.channels.insert(2, catalog());
        session
    }

    fn service(repository: FakeRepository) -> NavigationService {
        NavigationService::new(Arc::new(repository), Arc::new(MemoryUploads::default()))
    }

    #[tokio::test]
    async fn test_advance_selects_ith_event_and_pads_window() {
        let mut session = session_with_run("manual");
        let events = EventTable::new(vec![
            labeled(30, ts(3, 5), ts(3, 6), 1),
            labeled(10, ts(1, 5), ts(1, 6), 1),
            labeled(20, ts(2, 5), ts(2, 6), 2),
        ]);
        let navigation = service(FakeRepository::default());

        let window = navigation
            .advance_cursor(&mut session, EventKind::Labeled, 2, 1, events.clone())
            .await
            .unwrap();
        assert_eq!(session.cursor.selected_event, Some(20));
        assert_eq!(window, TimeWindow::new(ts(2, 5) - hours(3.0), ts(2, 6) + hours(1.0)));
        assert_eq!(session.cursor.selected_event_type.as_deref(), Some("Pre event"));

        navigation
            .advance_cursor(&mut session, EventKind::Labeled, 2, 3, events.clone())
            .await
            .unwrap();
        assert_eq!(session.cursor.selected_event_internal, 0);
        assert_eq!(session.cursor.selected_event, Some(10));
        assert_eq!(session.cursor.requested_index, 3);

        navigation
            .advance_cursor(&mut session, EventKind::Labeled, 2, -1, events)
            .await
            .unwrap();
        assert_eq!(session.cursor.selected_event, Some(10));
    }

    #[tokio::test]
    async fn test_padding_follows_configuration() {
        let mut session = session_with_run("manual");
        session.config.time.before_hours = 0.5;
        session.config.time.after_hours = 2.0;
        let events = EventTable::new(vec![labeled(1, ts(1, 5), ts(1, 6), 1)]);

        let window = service(FakeRepository::default())
            .advance_cursor(&mut session, EventKind::Labeled, 2, 0, events)
            .await
            .unwrap();
        assert_eq!(window, TimeWindow::new(ts(1, 4) + chrono::Duration::minutes(30), ts(1, 8)));
    }

    #[tokio::test]
    async fn test_empty_table_is_rejected() {
        let mut session = session_with_run("manual");
        let result = service(FakeRepository::default())
            .advance_cursor(&mut session, EventKind::Manual, 2, 0, EventTable::default())
            .await;
        assert_eq!(result, Err(NavigationError::NoEvents));
    }

    #[tokio::test]
    async fn test_predicted_event_fetches_scoped_anomalies_and_severities() {
        let mut session = session_with_run("12");
        let event = predicted_event(7, ts(1, 5), ts(1, 6), vec![1, 2, 3]);
        session
            .caches
            .predicted
            .insert(2, PredictedEventSet::new(EventTable::new(vec![event.clone()])));

        let repository = FakeRepository {
            anomalies: vec![
                anomaly(1, 15, 5, 0),
                anomaly(2, 15, 5, 10),
                anomaly(3, 14, 5, 10),
                anomaly(9, 16, 5, 20),
            ],
            severities: vec![SeverityRecord {
                event_id: 7,
                data_source_id: 15,
                severity: 0.8,
            }],
            ..Default::default()
        };
        let navigation = service(repository);
        navigation
            .advance_cursor(&mut session, EventKind::Predicted, 2, 0, EventTable::new(vec![event]))
            .await
            .unwrap();

        assert_eq!(session.cursor.anomalies.len(), 3);
        assert_eq!(session.cursor.anomaly_ids, Some(vec![1, 2, 3]));
        assert_eq!(session.cursor.severities.as_ref().map(Vec::len), Some(1));
        assert_eq!(session.caches.predicted[&2].anomalies[&7].len(), 3);

        let channels = NavigationService::choose_channels(&session, 2, ChannelFilter::StartTimestamp);
        assert_eq!(channels, vec!["15-PressureB", "14-PressureA"]);
    }

    #[tokio::test]
    async fn test_other_kinds_clear_predicted_details() {
        let mut session = session_with_run("12");
        session.cursor.anomaly_ids = Some(vec![1]);
        session.cursor.anomaly_models = Some(Default::default());
        let events = EventTable::new(vec![labeled(1, ts(1, 5), ts(1, 6), 1)]);

        let repository = FakeRepository {
            anomalies: vec![anomaly(1, 14, 4, 0), anomaly(2, 14, 23, 0)],
            ..Default::default()
        };
        service(repository)
            .advance_cursor(&mut session, EventKind::Labeled, 2, 0, events)
            .await
            .unwrap();

        assert_eq!(session.cursor.anomaly_ids, None);
        assert_eq!(session.cursor.anomaly_models, None);
        assert_eq!(session.cursor.severities, None);
        assert_eq!(session.cursor.anomalies.len(), 1);
    }

    #[test]
    fn test_choose_channels_truncates_and_keeps_event_order() {
        let mut session = session_with_run("manual");
        session.config.events.max_data_sources_to_show = 2;
        let mut event = labeled(1, ts(1, 5), ts(1, 6), 1);
        event.data_source_ids = vec![16, 14, 15];
        session.cursor.events = EventTable::new(vec![event]);

        let channels = NavigationService::choose_channels(&session, 2, ChannelFilter::NoFilter);
        assert_eq!(channels, vec!["16-Temp", "14-PressureA"]);
    }

    #[test]
    fn test_machine_events_filters_predicted_by_labels() {
        let mut session = session_with_run("12");
        session.caches.labeled.insert(
            2,
            LabeledEventSet::new(vec![labeled(1, ts(1, 0), ts(1, 2), 1), labeled(2, ts(4, 0), ts(4, 2), 0)], Vec::new()),
        );
        session.caches.predicted.insert(
            2,
            PredictedEventSet::new(EventTable::new(vec![
                predicted_event(5, ts(1, 1), ts(1, 3), vec![]),
                predicted_event(6, ts(4, 0), ts(4, 1), vec![]),
            ])),
        );

        let all = NavigationService::machine_events(&session, EventKind::Predicted, 2, false);
        let filtered = NavigationService::machine_events(&session, EventKind::Predicted, 2, true);
        assert_eq!(all.len(), 2);
        // the overlapping labeled event on day 4 is "Good", which the filtered view drops
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get(0).unwrap().event_id, 5);

        assert!(NavigationService::machine_events(&session, EventKind::Predicted, 3, false).is_empty());
        assert_eq!(NavigationService::machine_events(&session, EventKind::Labeled, 2, false).len(), 1);
    }
}
