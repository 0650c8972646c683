// Explorer controller - One transition function for every analyst action
use crate::application::figure_service::{FigureService, RenderedFigure};
use crate::application::manual_event_store::{ManualStores, UntagOutcome, UploadStore};
use crate::application::navigation_service::{NavigationError, NavigationService};
use crate::application::pipeline_service::PipelineService;
use crate::application::sensor_repository::SensorRepository;
use crate::application::session_loader::SessionLoader;
use crate::application::tagging_service::TaggingService;
use crate::application::upload_service::{UploadKind, UploadService, UploadedFile};
use crate::domain::anomaly::ChannelFilter;
use crate::domain::event::{EventKind, EventTable, TimePadding};
use crate::domain::figure::{DisplayOptions, ViewParams};
use crate::domain::machine::machine_id_from_name;
use crate::domain::pipeline::{PipelineSelection, PipelineStage, PipelineVersions};
use crate::domain::session::SessionState;
use crate::domain::telemetry::TimeWindow;
use crate::infrastructure::config::ExplorerSettings;
use crate::infrastructure::timestamps::parse_timestamp;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NO_EVENTS: &str = "No events to show";
const UNTAG_ONLY_MANUAL: &str = "Deleting manual events is possible only from Manual Events configuration";

/// Configuration form submitted by the analyst. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigurationUpdate {
    pub versions: Option<PipelineVersions>,
    pub before_hours: Option<f64>,
    pub after_hours: Option<f64>,
    pub max_data_sources_to_show: Option<usize>,
    pub username: Option<String>,
    pub use_db: Option<bool>,
    pub show_deprecated: Option<bool>,
    pub enable_untagging: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SelectMachine {
        machine: String,
    },
    LoadEvents,
    LoadByDates,
    SelectEventKind {
        kind: EventKind,
    },
    /// 1-based, as shown next to the event counter.
    JumpToEvent {
        index: i64,
    },
    NextEvent,
    PreviousEvent,
    FilterPredicted {
        enabled: bool,
    },
    NextDates,
    PreviousDates,
    ShowData {
        channels: Vec<String>,
        start: String,
        end: String,
        #[serde(default)]
        display: DisplayOptions,
    },
    SelectPipelineVersion {
        stage: PipelineStage,
        version: String,
    },
    ApplyConfiguration(ConfigurationUpdate),
    RefreshPipelineVersions,
    SetUsername {
        username: String,
    },
    Upload {
        kind: UploadKind,
        files: Vec<UploadedFile>,
    },
    Tag {
        #[serde(default)]
        channels: Vec<String>,
    },
    Untag,
    /// Re-render the figure on every event step (`events`) or date step (`dates`).
    SetFastNavigation {
        #[serde(default)]
        events: bool,
        #[serde(default)]
        dates: bool,
    },
}

/// Controls to refresh after an action. Absent fields stay as they are.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type_label: Option<String>,
    /// 1-based position of the selected event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub untag_visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_predicted_visible: Option<bool>,
    /// Rendered separately by the HTTP layer.
    #[serde(skip)]
    pub figure: Option<RenderedFigure>,
}

impl ViewUpdate {
    fn status(message: impl Into<String>) -> Self {
        Self {
            status: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ExplorerController {
    navigation: NavigationService,
    pipelines: PipelineService,
    loader: SessionLoader,
    figures: FigureService,
    tagging: TaggingService,
    uploads: UploadService,
    untag_allow_list: Vec<String>,
    timezone: Tz,
}

impl ExplorerController {
    pub fn new(
        repository: Arc<dyn SensorRepository>,
        manual: ManualStores,
        upload_store: Arc<dyn UploadStore>,
        settings: &ExplorerSettings,
    ) -> anyhow::Result<Self> {
        let timezone = settings.timezone()?;
        let navigation = NavigationService::new(repository.clone(), upload_store.clone());
        let pipelines = PipelineService::new(repository.clone(), upload_store.clone());
        let tagging = TaggingService::new(manual, timezone);
        let loader = SessionLoader::new(repository.clone(), pipelines.clone(), tagging.clone(), settings.full_range());
        let figures = FigureService::new(repository, navigation.clone(), settings.overview_max_points);
        let uploads = UploadService::new(upload_store, timezone);

        Ok(Self {
            navigation,
            pipelines,
            loader,
            figures,
            tagging,
            uploads,
            untag_allow_list: settings.untag_allow_list.clone(),
            timezone,
        })
    }

    pub fn loader(&self) -> &SessionLoader {
        &self.loader
    }

    pub async fn dispatch(&self, session: &mut SessionState, action: Action) -> anyhow::Result<ViewUpdate> {
        tracing::debug!(?action, "dispatching action");
        let update = match action {
            Action::SelectMachine { machine } => self.select_machine(session, &machine).await?,
            Action::LoadEvents => {
                session.view.load_by_dates = false;
                let machine_id = selected_machine(session)?;
                let events = NavigationService::machine_events(session, EventKind::Labeled, machine_id, false);
                let channels = session.view.selected_channels.clone();
                self.navigate(session, EventKind::Labeled, 0, events, Some(channels)).await?
            }
            Action::LoadByDates => {
                session.view.load_by_dates = true;
                let window = self.loader.full_range();
                session.view.window = Some(window);
                ViewUpdate {
                    window: Some(window),
                    filter_predicted_visible: Some(false),
                    untag_visible: Some(false),
                    ..Default::default()
                }
            }
            Action::SelectEventKind { kind } => self.select_kind(session, kind).await?,
            Action::JumpToEvent { index } => self.move_cursor(session, |_| index - 1).await?,
            Action::NextEvent => self.step_event(session, 1).await?,
            Action::PreviousEvent => self.step_event(session, -1).await?,
            Action::FilterPredicted { enabled } => {
                session.view.filter_predicted = enabled;
                if session.cursor.kind != Some(EventKind::Predicted) {
                    return Ok(ViewUpdate::default());
                }
                let machine_id = selected_machine(session)?;
                let events = NavigationService::machine_events(session, EventKind::Predicted, machine_id, enabled);
                let index = session.cursor.requested_index;
                self.navigate(session, EventKind::Predicted, index, events, None).await?
            }
            Action::NextDates => self.shift_dates(session, TimeWindow::next).await?,
            Action::PreviousDates => self.shift_dates(session, TimeWindow::previous).await?,
            Action::ShowData {
                channels,
                start,
                end,
                display,
            } => self.show_data(session, channels, &start, &end, display).await?,
            Action::SelectPipelineVersion { stage, version } => {
                self.pipelines.select(&mut session.config.pipeline, stage, &version).await;
                ViewUpdate {
                    pipeline: Some(session.config.pipeline.clone()),
                    ..Default::default()
                }
            }
            Action::ApplyConfiguration(update) => self.apply_configuration(session, update).await,
            Action::RefreshPipelineVersions => {
                session.config.pipeline = self.pipelines.refresh().await;
                ViewUpdate {
                    pipeline: Some(session.config.pipeline.clone()),
                    ..Default::default()
                }
            }
            Action::SetUsername { username } => {
                session
                    .config
                    .manual_tagging
                    .set_username(&username, &self.untag_allow_list);
                ViewUpdate {
                    untag_visible: Some(self.untag_visible(session)),
                    ..Default::default()
                }
            }
            Action::Upload { kind, files } => ViewUpdate::status(self.uploads.upload(session, kind, &files).await),
            Action::Tag { channels } => self.tag(session, channels).await?,
            Action::Untag => self.untag(session).await?,
            Action::SetFastNavigation { events, dates } => {
                session.config.navigate_fast = events;
                session.config.navigate_dates_fast = dates;
                ViewUpdate::default()
            }
        };
        Ok(update)
    }

    async fn select_machine(&self, session: &mut SessionState, name: &str) -> anyhow::Result<ViewUpdate> {
        let machine_id = machine_id_from_name(name).map_err(NavigationError::from)?;
        if session.machines.get(machine_id).is_none() {
            return Err(NavigationError::UnknownMachine(machine_id).into());
        }
        self.loader.ensure_channels(session, machine_id).await;
        session.view.selected_machine = Some(machine_id);
        session.view.selected_channels.clear();
        session.cursor.clear_selection();
        tracing::info!(machine_id, "machine selected");

        let kind = if session.only_manual_mode {
            EventKind::Manual
        } else {
            EventKind::Labeled
        };
        let mut update = self.select_kind(session, kind).await?;
        update.machine = Some(name.to_string());
        Ok(update)
    }

    async fn select_kind(&self, session: &mut SessionState, kind: EventKind) -> anyhow::Result<ViewUpdate> {
        let machine_id = selected_machine(session)?;
        session.view.load_by_dates = false;
        let events = NavigationService::machine_events(session, kind, machine_id, session.view.filter_predicted);
        let channels = match kind {
            EventKind::Labeled => Some(Vec::new()),
            _ => None,
        };
        self.navigate(session, kind, 0, events, channels).await
    }

    /// Moves within the current table; `target` maps the selected position to the new one.
    async fn move_cursor(&self, session: &mut SessionState, target: impl Fn(i64) -> i64) -> anyhow::Result<ViewUpdate> {
        let Some(kind) = session.cursor.kind else {
            return Ok(ViewUpdate::status(NO_EVENTS));
        };
        let new_index = target(session.cursor.selected_event_internal as i64);
        let events = session.cursor.events.clone();
        let channels = match kind {
            EventKind::Labeled => Some(session.view.selected_channels.clone()),
            _ => None,
        };
        self.navigate(session, kind, new_index, events, channels).await
    }

    /// Advances the cursor and describes the result. `channels` overrides the
    /// default channel choice of the kind.
    async fn navigate(
        &self,
        session: &mut SessionState,
        kind: EventKind,
        new_index: i64,
        events: EventTable,
        channels: Option<Vec<String>>,
    ) -> anyhow::Result<ViewUpdate> {
        let machine_id = selected_machine(session)?;
        let window = match self
            .navigation
            .advance_cursor(session, kind, machine_id, new_index, events)
            .await
        {
            Ok(window) => window,
            Err(NavigationError::NoEvents) => {
                session.cursor.clear_selection();
                session.cursor.kind = Some(kind);
                return Ok(ViewUpdate {
                    status: Some(NO_EVENTS.to_string()),
                    event_id_label: Some(session.cursor.events.id_label()),
                    event_type_label: Some(NO_EVENTS.to_string()),
                    untag_visible: Some(false),
                    filter_predicted_visible: Some(kind == EventKind::Predicted),
                    ..Default::default()
                });
            }
            Err(e) => return Err(e.into()),
        };

        let channels = channels.unwrap_or_else(|| {
            let filter = match kind {
                EventKind::Manual => ChannelFilter::NoFilter,
                EventKind::Predicted if session.config.pipeline.versions.is_manual(PipelineStage::PredictedEvents) => {
                    ChannelFilter::NoFilter
                }
                _ => ChannelFilter::StartTimestamp,
            };
            NavigationService::choose_channels(session, machine_id, filter)
        });
        session.view.window = Some(window);
        session.view.selected_channels = channels.clone();

        let cursor = &session.cursor;
        Ok(ViewUpdate {
            channels: Some(channels),
            window: Some(window),
            event_id_label: Some(cursor.events.id_label()),
            event_type_label: Some(cursor.events.describe(cursor.selected_event_internal)),
            event_index: Some(cursor.selected_event_internal + 1),
            untag_visible: Some(kind == EventKind::Manual && self.untag_visible(session)),
            filter_predicted_visible: Some(kind == EventKind::Predicted),
            ..Default::default()
        })
    }

    async fn step_event(&self, session: &mut SessionState, step: i64) -> anyhow::Result<ViewUpdate> {
        let mut update = self.move_cursor(session, |internal| internal + step).await?;
        if session.config.navigate_fast && update.event_index.is_some() {
            update.figure = self.render_view(session).await?;
        }
        Ok(update)
    }

    async fn shift_dates(&self, session: &mut SessionState, shift: fn(&TimeWindow) -> TimeWindow) -> anyhow::Result<ViewUpdate> {
        let Some(window) = session.view.window else {
            anyhow::bail!("no date range is selected");
        };
        let shifted = shift(&window);
        session.view.window = Some(shifted);
        let mut update = ViewUpdate {
            window: Some(shifted),
            ..Default::default()
        };
        if session.config.navigate_dates_fast {
            update.figure = self.render_view(session).await?;
        }
        Ok(update)
    }

    /// Figure of the current window and channels; nothing when no channel is selected.
    async fn render_view(&self, session: &mut SessionState) -> anyhow::Result<Option<RenderedFigure>> {
        let (Some(machine_id), Some(window)) = (session.view.selected_machine, session.view.window) else {
            return Ok(None);
        };
        if session.view.selected_channels.is_empty() {
            return Ok(None);
        }
        let params = ViewParams {
            machine_id,
            window,
            channels: session.view.selected_channels.clone(),
            display: session.view.display.clone(),
        };
        self.figures.build_figure(session, &params).await
    }

    async fn show_data(
        &self,
        session: &mut SessionState,
        channels: Vec<String>,
        start: &str,
        end: &str,
        display: DisplayOptions,
    ) -> anyhow::Result<ViewUpdate> {
        let machine_id = selected_machine(session)?;
        let window = TimeWindow::new(parse_timestamp(start, self.timezone)?, parse_timestamp(end, self.timezone)?);
        session.view.window = Some(window);
        session.view.selected_channels = channels.clone();
        session.view.display = display.clone();

        let params = ViewParams {
            machine_id,
            window,
            channels,
            display,
        };
        match self.figures.build_figure(session, &params).await? {
            Some(figure) => Ok(ViewUpdate {
                figure: Some(figure),
                ..Default::default()
            }),
            None => Ok(ViewUpdate::status("No data to show")),
        }
    }

    async fn apply_configuration(&self, session: &mut SessionState, update: ConfigurationUpdate) -> ViewUpdate {
        if let Some(versions) = update.versions {
            self.pipelines.apply(&mut session.config.pipeline, &versions).await;
        }
        let config = &mut session.config;
        if let Some(max) = update.max_data_sources_to_show {
            config.events.max_data_sources_to_show = max;
        }
        for (requested, slot, side) in [
            (update.before_hours, &mut config.time.before_hours, "before"),
            (update.after_hours, &mut config.time.after_hours, "after"),
        ] {
            match requested {
                Some(value) if TimePadding::is_valid_hours(value) => *slot = value,
                Some(value) => tracing::warn!(side, value, kept = *slot, "padding rejected"),
                None => {}
            }
        }
        let tagging = &mut config.manual_tagging;
        if let Some(use_db) = update.use_db {
            tagging.use_db = use_db;
        }
        if let Some(show_deprecated) = update.show_deprecated {
            tagging.show_deprecated = show_deprecated;
        }
        if let Some(enable) = update.enable_untagging {
            tagging.enable_untagging = enable;
        }
        let username = update.username.unwrap_or_else(|| tagging.username.clone());
        tagging.set_username(&username, &self.untag_allow_list);

        tracing::info!(versions = %config.pipeline.versions.snapshot_json(), "configuration applied");
        session.only_manual_mode = false;
        session.reset_caches();
        self.loader.initialize(session).await;

        ViewUpdate {
            status: Some("Configuration applied".to_string()),
            pipeline: Some(session.config.pipeline.clone()),
            untag_visible: Some(self.untag_visible(session)),
            ..Default::default()
        }
    }

    async fn tag(&self, session: &mut SessionState, channels: Vec<String>) -> anyhow::Result<ViewUpdate> {
        let machine_id = selected_machine(session)?;
        let window = session
            .caches
            .last_figure
            .as_ref()
            .map(|figure| figure.window)
            .or(session.view.window);
        let Some(window) = window else {
            return Ok(ViewUpdate::status("Nothing to tag, select a time window first"));
        };
        let channels = if channels.is_empty() {
            session.view.selected_channels.clone()
        } else {
            channels
        };

        let Some(event) = self.tagging.tag(session, machine_id, &channels, window).await? else {
            return Ok(ViewUpdate::status("Tagged event could not be read back"));
        };
        if session.cursor.kind == Some(EventKind::Manual) {
            let events = NavigationService::machine_events(session, EventKind::Manual, machine_id, false);
            let index = session.cursor.requested_index;
            let mut update = self.navigate(session, EventKind::Manual, index, events, None).await?;
            update.status = Some(format!("Tagged event {}", event.event_id));
            return Ok(update);
        }
        Ok(ViewUpdate::status(format!("Tagged event {}", event.event_id)))
    }

    async fn untag(&self, session: &mut SessionState) -> anyhow::Result<ViewUpdate> {
        if session.cursor.kind != Some(EventKind::Manual) {
            tracing::warn!("{}", UNTAG_ONLY_MANUAL);
            return Ok(ViewUpdate::status(UNTAG_ONLY_MANUAL));
        }
        if !self.untag_visible(session) {
            return Ok(ViewUpdate::status(format!(
                "Untagging is not enabled for {}",
                session.config.manual_tagging.username
            )));
        }
        let Some(event) = session.cursor.current().cloned() else {
            return Ok(ViewUpdate::status(NO_EVENTS));
        };

        match self.tagging.untag(session, &event).await? {
            UntagOutcome::Deprecated => {
                let machine_id = selected_machine(session)?;
                let events = NavigationService::machine_events(session, EventKind::Manual, machine_id, false);
                let index = session.cursor.requested_index;
                let mut update = self.navigate(session, EventKind::Manual, index, events, None).await?;
                update.status = Some(format!("Event {} was untagged", event.event_id));
                Ok(update)
            }
            UntagOutcome::Aborted(_) => Ok(ViewUpdate::status(format!(
                "Too much data is fitting the conditions, aborting untagging of event {}",
                event.event_id
            ))),
        }
    }

    fn untag_visible(&self, session: &SessionState) -> bool {
        session
            .config
            .manual_tagging
            .untagging_active(&self.untag_allow_list)
    }
}

fn selected_machine(session: &SessionState) -> Result<i64, NavigationError> {
    session.view.selected_machine.ok_or(NavigationError::NoMachineSelected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::manual_event_store::fake::{MemoryManualStore, MemoryUploads};
    use crate::application::manual_event_store::ManualEventStore;
    use crate::application::sensor_repository::fake::FakeRepository;
    use crate::application::sensor_repository::LabeledEventRow;
    use crate::domain::event::tests::ts;
    use crate::domain::machine::{DataSource, Machine};
    use crate::domain::telemetry::TimeSeriesPoint;
    use crate::infrastructure::csv_store::CsvStore;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn settings(dir: &str) -> ExplorerSettings {
        ExplorerSettings {
            datetime_format: "%Y-%m-%d %H:%M:%S%.f".to_string(),
            target_timezone: "Asia/Jerusalem".to_string(),
            temporary_data_dir: dir.to_string(),
            untag_allow_list: vec!["Eri".to_string()],
            full_range_start: ts(1, 0),
            full_range_end: ts(28, 0),
            overview_max_points: 100,
            plotly_js_path: format!("{}/plotly.min.js", dir).into(),
        }
    }

    fn action(json: serde_json::Value) -> Action {
        serde_json::from_value(json).unwrap()
    }

    fn labeled_row(event_id: i64, day: u32, type_id: i32) -> LabeledEventRow {
        LabeledEventRow {
            event_id,
            machine_id: 2,
            start_timestamp: ts(day, 5),
            end_timestamp: ts(day, 6),
            event_type_id: type_id,
            data_source_id: None,
        }
    }

    async fn live_session() -> (ExplorerController, SessionState) {
        let repository = FakeRepository {
            machines: vec![Machine::new(2, "10051164")],
            data_sources: vec![DataSource {
                data_source_id: 14,
                machine_id: 2,
                short_name: Some("PressureA".into()),
                customer_data_source_id: "P-1".into(),
                data_source_name: None,
            }],
            values: HashMap::from([(14, (1..=4).map(|day| TimeSeriesPoint::at(ts(day, 5), day as f64)).collect())]),
            labeled: vec![labeled_row(1, 3, 1), labeled_row(2, 1, 2), labeled_row(3, 2, 0), labeled_row(4, 4, 3)],
            statistics_runs: vec![7],
            labeled_runs: vec![7],
            ..Default::default()
        };
        let manual = ManualStores {
            database: Arc::new(MemoryManualStore::default()),
            files: Arc::new(MemoryManualStore::default()),
        };
        let controller = ExplorerController::new(
            Arc::new(repository),
            manual,
            Arc::new(MemoryUploads::default()),
            &settings("temporary_data"),
        )
        .unwrap();
        let session = controller.loader().bootstrap(false).await;
        (controller, session)
    }

    #[test]
    fn test_actions_deserialize_from_tagged_json() {
        let jump = action(serde_json::json!({"action": "jump_to_event", "index": 3}));
        assert!(matches!(jump, Action::JumpToEvent { index: 3 }));

        let apply = action(serde_json::json!({"action": "apply_configuration", "before_hours": 0.5}));
        assert!(matches!(apply, Action::ApplyConfiguration(ConfigurationUpdate { before_hours: Some(b), .. }) if b == 0.5));

        let kind = action(serde_json::json!({"action": "select_event_kind", "kind": "predicted"}));
        assert!(matches!(kind, Action::SelectEventKind { kind: EventKind::Predicted }));
    }

    #[tokio::test]
    async fn test_navigation_walks_filtered_labeled_events() {
        let (controller, mut session) = live_session().await;

        let update = controller
            .dispatch(&mut session, action(serde_json::json!({"action": "select_machine", "machine": "2-10051164"})))
            .await
            .unwrap();
        assert_eq!(update.machine.as_deref(), Some("2-10051164"));
        // "Good" is filtered out: three events, first one on day 1
        assert_eq!(update.event_id_label.as_deref(), Some("/3:"));
        assert_eq!(update.event_type_label.as_deref(), Some("  Type - Pre event"));
        assert_eq!(update.event_index, Some(1));
        assert_eq!(update.channels, Some(Vec::new()));
        assert_eq!(update.window, Some(TimeWindow::new(ts(1, 2), ts(1, 7))));

        let update = controller.dispatch(&mut session, Action::NextEvent).await.unwrap();
        assert_eq!(update.event_index, Some(2));
        assert_eq!(session.cursor.selected_event, Some(1));

        let update = controller.dispatch(&mut session, Action::JumpToEvent { index: 3 }).await.unwrap();
        assert_eq!(update.event_type_label.as_deref(), Some("  Type - Short cycle"));

        // past the end clamps back to the first event
        let update = controller.dispatch(&mut session, Action::NextEvent).await.unwrap();
        assert_eq!(update.event_index, Some(1));

        let update = controller.dispatch(&mut session, Action::PreviousEvent).await.unwrap();
        assert_eq!(update.event_index, Some(1));

        let before = session.view.window.unwrap();
        controller.dispatch(&mut session, Action::NextDates).await.unwrap();
        assert_eq!(session.view.window, Some(before.next()));
        controller.dispatch(&mut session, Action::PreviousDates).await.unwrap();
        assert_eq!(session.view.window, Some(before));
    }

    fn show_day_one() -> Action {
        Action::ShowData {
            channels: vec!["14-PressureA".to_string()],
            start: "2023-01-01T02:00:00".to_string(),
            end: "2023-01-01T07:00:00".to_string(),
            display: DisplayOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_fast_navigation_renders_each_step() {
        let (controller, mut session) = live_session().await;
        controller
            .dispatch(&mut session, Action::SelectMachine { machine: "2-10051164".into() })
            .await
            .unwrap();
        let update = controller.dispatch(&mut session, show_day_one()).await.unwrap();
        assert!(update.figure.is_some());
        let first = session.caches.last_figure.as_ref().unwrap().window;

        let update = controller.dispatch(&mut session, Action::NextEvent).await.unwrap();
        assert!(update.figure.is_none());
        assert_eq!(session.caches.last_figure.as_ref().unwrap().window, first);

        controller
            .dispatch(&mut session, Action::SetFastNavigation { events: true, dates: false })
            .await
            .unwrap();
        let update = controller.dispatch(&mut session, Action::NextEvent).await.unwrap();
        assert_eq!(update.event_index, Some(3));
        assert!(update.figure.is_some());
        // event on day 4, 05:00-06:00, padded once for the cursor and once for display
        assert_eq!(
            session.caches.last_figure.as_ref().unwrap().window,
            TimeWindow::new(ts(3, 23), ts(4, 8))
        );

        let update = controller.dispatch(&mut session, Action::NextDates).await.unwrap();
        assert!(update.figure.is_none());
        controller
            .dispatch(&mut session, Action::SetFastNavigation { events: false, dates: true })
            .await
            .unwrap();
        let update = controller.dispatch(&mut session, Action::PreviousDates).await.unwrap();
        assert!(update.figure.is_some());
    }

    #[tokio::test]
    async fn test_apply_configuration_rejects_out_of_range_paddings() {
        let (controller, mut session) = live_session().await;
        let configure = ConfigurationUpdate {
            before_hours: Some(1e12),
            after_hours: Some(f64::NAN),
            ..Default::default()
        };
        controller
            .dispatch(&mut session, Action::ApplyConfiguration(configure))
            .await
            .unwrap();
        assert_eq!(session.config.time, TimePadding::default());

        let update = controller
            .dispatch(&mut session, Action::SelectMachine { machine: "2-10051164".into() })
            .await
            .unwrap();
        assert_eq!(update.window, Some(TimeWindow::new(ts(1, 2), ts(1, 7))));

        let configure = ConfigurationUpdate {
            before_hours: Some(-2.0),
            after_hours: Some(0.5),
            ..Default::default()
        };
        controller
            .dispatch(&mut session, Action::ApplyConfiguration(configure))
            .await
            .unwrap();
        assert_eq!(session.config.time.before_hours, 3.0);
        assert_eq!(session.config.time.after_hours, 0.5);
    }

    #[tokio::test]
    async fn test_apply_configuration_runs_the_version_cascade() {
        let (controller, mut session) = live_session().await;
        assert_eq!(session.config.pipeline.options.labeled_events, vec!["7", "manual"]);

        let configure = ConfigurationUpdate {
            versions: Some(PipelineVersions {
                statistics: "7".to_string(),
                labeled_events: "manual".to_string(),
                training: "exp-x: 2023-01-01".to_string(),
                predicted_events: "31".to_string(),
            }),
            ..Default::default()
        };
        let update = controller
            .dispatch(&mut session, Action::ApplyConfiguration(configure))
            .await
            .unwrap();

        let pipeline = update.pipeline.unwrap();
        assert_eq!(pipeline.version(PipelineStage::LabeledEvents), "manual");
        assert_eq!(pipeline.options.training, vec!["manual"]);
        assert_eq!(pipeline.version(PipelineStage::Training), "manual");
        assert_eq!(pipeline.version(PipelineStage::PredictedEvents), "manual");
    }

    #[tokio::test]
    async fn test_empty_kind_reports_no_events() {
        let (controller, mut session) = live_session().await;
        controller
            .dispatch(&mut session, Action::SelectMachine { machine: "2-10051164".into() })
            .await
            .unwrap();

        let update = controller
            .dispatch(&mut session, Action::SelectEventKind { kind: EventKind::Predicted })
            .await
            .unwrap();
        assert_eq!(update.status.as_deref(), Some("No events to show"));
        assert_eq!(update.filter_predicted_visible, Some(true));
        assert_eq!(session.cursor.kind, Some(EventKind::Predicted));
    }

    #[tokio::test]
    async fn test_unknown_machine_is_rejected() {
        let (controller, mut session) = live_session().await;
        let result = controller
            .dispatch(&mut session, Action::SelectMachine { machine: "9-000".into() })
            .await;
        assert!(result.is_err());
        assert!(controller.dispatch(&mut session, Action::LoadEvents).await.is_err());
    }

    #[tokio::test]
    async fn test_load_by_dates_uses_full_range() {
        let (controller, mut session) = live_session().await;
        let update = controller.dispatch(&mut session, Action::LoadByDates).await.unwrap();
        assert!(session.view.load_by_dates);
        assert_eq!(update.window, Some(TimeWindow::new(ts(1, 0), ts(28, 0))));
    }

    #[tokio::test]
    async fn test_untag_requires_manual_kind_and_allowed_user() {
        let (controller, mut session) = live_session().await;
        controller
            .dispatch(&mut session, Action::SelectMachine { machine: "2-10051164".into() })
            .await
            .unwrap();

        let update = controller.dispatch(&mut session, Action::Untag).await.unwrap();
        assert_eq!(update.status.as_deref(), Some(UNTAG_ONLY_MANUAL));

        controller
            .dispatch(&mut session, Action::SelectEventKind { kind: EventKind::Manual })
            .await
            .unwrap();
        let update = controller.dispatch(&mut session, Action::Untag).await.unwrap();
        assert_eq!(update.status.as_deref(), Some("Untagging is not enabled for Unknown"));
    }

    #[tokio::test]
    async fn test_tag_untag_example_with_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        let dir_name = dir.path().to_string_lossy().to_string();
        let settings = settings(&dir_name);
        let files = Arc::new(CsvStore::new(dir.path(), settings.datetime_format.clone(), chrono_tz::Asia::Jerusalem));
        let manual = ManualStores {
            database: Arc::new(MemoryManualStore::default()),
            files: files.clone(),
        };
        let controller = ExplorerController::new(
            Arc::new(FakeRepository {
                offline: true,
                ..Default::default()
            }),
            manual,
            files.clone(),
            &settings,
        )
        .unwrap();
        let mut session = controller.loader().bootstrap(false).await;
        assert!(session.only_manual_mode);

        let configure = ConfigurationUpdate {
            username: Some("Eri".to_string()),
            use_db: Some(false),
            enable_untagging: Some(true),
            ..Default::default()
        };
        let update = controller
            .dispatch(&mut session, Action::ApplyConfiguration(configure))
            .await
            .unwrap();
        assert_eq!(update.untag_visible, Some(true));
        assert!(!session.only_manual_mode);

        controller
            .dispatch(&mut session, Action::SelectMachine { machine: "2-10051164".into() })
            .await
            .unwrap();
        let update = controller
            .dispatch(
                &mut session,
                Action::ShowData {
                    channels: vec!["14-PressureA".to_string()],
                    start: "2023-01-01T00:00:00".to_string(),
                    end: "2023-01-01T01:00:00".to_string(),
                    display: DisplayOptions::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(update.status.as_deref(), Some("No data to show"));

        let update = controller.dispatch(&mut session, Action::Tag { channels: Vec::new() }).await.unwrap();
        assert_eq!(update.status.as_deref(), Some("Tagged event 1"));

        let window_start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let stored = files.load(false).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].start_timestamp, window_start);
        assert_eq!(stored[0].data_source_ids, vec![14]);
        assert!(!stored[0].is_deprecated());

        let update = controller
            .dispatch(&mut session, Action::SelectEventKind { kind: EventKind::Manual })
            .await
            .unwrap();
        assert_eq!(update.untag_visible, Some(true));
        assert_eq!(update.event_type_label.as_deref(), Some("  Type - Manual; Tagger - Eri; "));

        let update = controller.dispatch(&mut session, Action::Untag).await.unwrap();
        assert_eq!(update.status.as_deref(), Some("Event 1 was untagged"));
        assert_eq!(update.event_type_label.as_deref(), Some("No events to show"));
        assert!(files.load(false).await.unwrap().is_empty());
        assert_eq!(files.load(true).await.unwrap().len(), 1);
    }
}
