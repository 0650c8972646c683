// Figure service - Assembles detail and overview figures for the current view
use crate::application::navigation_service::NavigationService;
use crate::application::sensor_repository::SensorRepository;
use crate::domain::anomaly::AnomalyRecord;
use crate::domain::event::{EventKind, TimePadding};
use crate::domain::figure::{
    Figure, Shade, Shape, Trace, TraceKind, ViewParams, EVENT_OPACITY, MANUAL_EVENT_COLOR,
    OUT_OF_SCOPE_MANUAL_EVENT_COLOR, OUT_OF_SCOPE_PREDICTED_EVENT_COLOR, PREDICTED_EVENT_COLOR,
};
use crate::domain::machine::{companions_of, data_source_id_from_name};
use crate::domain::pipeline::{training_slug, PipelineStage};
use crate::domain::session::{ReconstructionSeries, SessionState};
use crate::domain::telemetry::{TimeSeriesPoint, TimeWindow};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Detail and overview figures of one render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedFigure {
    pub detail: Figure,
    pub overview: Figure,
    pub subplot_names: Vec<String>,
}

#[derive(Clone)]
pub struct FigureService {
    repository: Arc<dyn SensorRepository>,
    navigation: NavigationService,
    overview_max_points: usize,
}

/// Display range: the requested window widened by the session paddings.
pub fn display_window(window: TimeWindow, padding: &TimePadding) -> TimeWindow {
    window.widened(padding.before_hours, padding.after_hours)
}

impl FigureService {
    pub fn new(repository: Arc<dyn SensorRepository>, navigation: NavigationService, overview_max_points: usize) -> Self {
        Self {
            repository,
            navigation,
            overview_max_points,
        }
    }

    /// Builds the figures for `params` and keeps the detail figure in the session.
    ///
    /// `Ok(None)` means none of the channels has values in the window.
    pub async fn build_figure(
        &self,
        session: &mut SessionState,
        params: &ViewParams,
    ) -> anyhow::Result<Option<RenderedFigure>> {
        let machine_id = params.machine_id;
        let padded = display_window(params.window, &session.config.time);
        let ids = params
            .channels
            .iter()
            .map(|name| data_source_id_from_name(name))
            .collect::<Result<Vec<i64>, _>>()?;

        let companions: Vec<(i64, Option<i64>, Option<i64>)> = ids
            .iter()
            .map(|id| match companions_of(&session.caches.connections, machine_id, *id) {
                Some(c) => (*id, c.nominal, c.standby),
                None => (*id, None, None),
            })
            .collect();
        let mut requested: Vec<i64> = ids.clone();
        for (_, nominal, standby) in &companions {
            requested.extend(nominal.iter().chain(standby.iter()));
        }
        requested.sort_unstable();
        requested.dedup();

        let values = self.repository.values(&requested, padded).await.unwrap_or_else(|e| {
            tracing::warn!(machine_id, "Could not load values: {}", e);
            HashMap::new()
        });
        if ids.iter().all(|id| values.get(id).is_none_or(Vec::is_empty)) {
            tracing::info!(machine_id, %padded, "No data to show for the selected channels");
            return Ok(None);
        }

        let mut figure = Figure::new(params.channels.clone(), padded);
        for (subplot, (id, nominal, standby)) in companions.iter().enumerate() {
            if let Some(points) = values.get(id) {
                figure.add_trace(Trace::new(params.channels[subplot].clone(), TraceKind::Raw, subplot, points.clone()));
            }
            for (companion, kind, label) in [(nominal, TraceKind::Nominal, "nominal"), (standby, TraceKind::Standby, "standby")] {
                if let Some(points) = companion.and_then(|c| values.get(&c)) {
                    figure.add_trace(Trace::new(format!("{}-{}", id, label), kind, subplot, points.clone()));
                }
            }
        }

        if params.display.show_reconstruction {
            let series = self.reconstruction(session, &ids, padded).await;
            if series.values().all(|algorithms| algorithms.values().all(Vec::is_empty)) {
                tracing::info!(machine_id, "No reconstruction results, reconstruction is disabled");
            }
            for (subplot, id) in ids.iter().enumerate() {
                for (algorithm, points) in series.get(id).into_iter().flatten() {
                    if !points.is_empty() {
                        figure.add_trace(Trace::new(algorithm.clone(), TraceKind::Reconstruction, subplot, points.clone()));
                    }
                }
            }
        }

        if params.display.draw_predicted_anomalies {
            let anomalies = if session.view.load_by_dates {
                let version = session.config.pipeline.version(PipelineStage::PredictedEvents).to_string();
                self.navigation.window_anomalies(machine_id, &version, None, padded).await
            } else {
                session.cursor.anomalies.clone()
            };
            add_anomaly_markers(&mut figure, &ids, &values, &anomalies);
        }

        shade_layers(&mut figure, session, params, &ids, padded);

        let overview = figure.overview(self.overview_max_points);
        let subplot_names = figure.subplot_names.clone();
        session.caches.last_figure = Some(figure.clone());
        Ok(Some(RenderedFigure {
            detail: figure,
            overview,
            subplot_names,
        }))
    }

    async fn reconstruction(&self, session: &SessionState, ids: &[i64], window: TimeWindow) -> ReconstructionSeries {
        let training = session.config.pipeline.version(PipelineStage::Training);
        if session.config.pipeline.versions.is_manual(PipelineStage::Training) {
            return uploaded_reconstruction(&session.caches.uploaded_reconstruction, ids, window);
        }

        let slug = training_slug(training);
        let result = if session.config.read_files_multi {
            let mut series = ReconstructionSeries::new();
            let mut failure = None;
            for id in ids {
                match self.repository.reconstruction(slug, std::slice::from_ref(id), window).await {
                    Ok(part) => series.extend(part),
                    Err(e) => failure = Some(e),
                }
            }
            match failure {
                Some(e) if series.is_empty() => Err(e),
                _ => Ok(series),
            }
        } else {
            self.repository.reconstruction(slug, ids, window).await
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(slug, "Could not load reconstruction results: {}", e);
            ReconstructionSeries::new()
        })
    }
}

/// Uploaded series restricted to the displayed channels and window.
fn uploaded_reconstruction(uploaded: &ReconstructionSeries, ids: &[i64], window: TimeWindow) -> ReconstructionSeries {
    ids.iter()
        .filter_map(|id| {
            let algorithms: BTreeMap<String, Vec<TimeSeriesPoint>> = uploaded
                .get(id)?
                .iter()
                .map(|(algorithm, points)| {
                    let inside = points
                        .iter()
                        .filter(|p| p.timestamp().is_some_and(|t| window.contains(t)))
                        .cloned()
                        .collect();
                    (algorithm.clone(), inside)
                })
                .collect();
            Some((*id, algorithms))
        })
        .collect()
}

/// Raw value closest in time to `time_ms`. Points are sorted by time.
fn nearest_value(points: &[TimeSeriesPoint], time_ms: i64) -> Option<f64> {
    let after = points.partition_point(|p| p.time_ms < time_ms);
    let candidates = [after.checked_sub(1), Some(after)];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|i| points.get(i))
        .min_by_key(|p| (p.time_ms - time_ms).abs())
        .map(|p| p.value)
}

/// One marker trace per channel and model, placed on the raw series.
fn add_anomaly_markers(
    figure: &mut Figure,
    ids: &[i64],
    values: &HashMap<i64, Vec<TimeSeriesPoint>>,
    anomalies: &[AnomalyRecord],
) {
    let mut markers: BTreeMap<(usize, String), Vec<TimeSeriesPoint>> = BTreeMap::new();
    for anomaly in anomalies {
        let Some(subplot) = ids.iter().position(|id| *id == anomaly.data_source_id) else {
            continue;
        };
        let time_ms = anomaly.timestamp.and_utc().timestamp_millis();
        let Some(value) = values.get(&anomaly.data_source_id).and_then(|points| nearest_value(points, time_ms)) else {
            continue;
        };
        markers
            .entry((subplot, anomaly.model_type.clone()))
            .or_default()
            .push(TimeSeriesPoint::new(time_ms, value));
    }

    for ((subplot, model), mut points) in markers {
        points.sort_by_key(|p| p.time_ms);
        figure.add_trace(
            Trace::new(format!("{} anomalies", model), TraceKind::Anomaly, subplot, points)
                .with_color(PREDICTED_EVENT_COLOR),
        );
    }
}

fn shade_layers(figure: &mut Figure, session: &SessionState, params: &ViewParams, ids: &[i64], padded: TimeWindow) {
    let machine_id = params.machine_id;
    let display = &params.display;
    let window = params.window;

    if display.draw_predicted_events {
        if let Some(set) = session.caches.predicted.get(&machine_id) {
            if session.view.load_by_dates {
                figure.shade_events(set.events.iter(), window, None, Shade::Fixed(PREDICTED_EVENT_COLOR), EVENT_OPACITY);
            } else {
                let passes = [
                    (TimeWindow::new(padded.start, window.start), OUT_OF_SCOPE_PREDICTED_EVENT_COLOR),
                    (window, PREDICTED_EVENT_COLOR),
                    (TimeWindow::new(window.end, padded.end), OUT_OF_SCOPE_PREDICTED_EVENT_COLOR),
                ];
                for (range, color) in passes {
                    figure.shade_events(set.events.iter(), range, None, Shade::Fixed(color), EVENT_OPACITY);
                }
            }
        }

        if !session.view.load_by_dates && session.cursor.kind == Some(EventKind::Predicted) {
            for severity in session.cursor.severities.iter().flatten() {
                if let Some(subplot) = figure.subplot_of(severity.data_source_id) {
                    figure.shapes.push(Shape {
                        subplot,
                        window,
                        color: PREDICTED_EVENT_COLOR.to_string(),
                        opacity: EVENT_OPACITY * severity.severity.clamp(0.0, 1.0),
                        label: format!("severity {:.2}", severity.severity),
                        severity: Some(severity.severity),
                    });
                }
            }
        }
    }

    if display.draw_labeled_events {
        if let Some(set) = session.caches.labeled.get(&machine_id) {
            let selected = &display.selected_labeled_events_types;
            let chosen: Vec<_> = set.filtered.iter().filter(|e| selected.contains(&e.label_name)).collect();
            figure.shade_events(chosen, padded, None, Shade::ByLabel, EVENT_OPACITY);

            for event in set.per_data_source.iter().filter(|e| selected.contains(&e.label_name)) {
                let Some(subplot) = event.data_source_ids.first().and_then(|id| figure.subplot_of(*id)) else {
                    continue;
                };
                figure.shade_events([event], padded, Some(&[subplot]), Shade::ByLabel, EVENT_OPACITY);
            }
        }
    }

    if display.draw_manual_events {
        let username = &session.config.manual_tagging.username;
        let manual: Vec<_> = session
            .caches
            .manual
            .iter()
            .filter(|e| e.machine_id == machine_id && e.data_source_ids == ids)
            .collect();
        let (own, others): (Vec<_>, Vec<_>) = manual
            .into_iter()
            .partition(|e| e.manual().is_some_and(|info| &info.username == username));
        figure.shade_events(own, padded, None, Shade::Fixed(MANUAL_EVENT_COLOR), EVENT_OPACITY);
        figure.shade_events(others, padded, None, Shade::Fixed(OUT_OF_SCOPE_MANUAL_EVENT_COLOR), EVENT_OPACITY);
    }
}
