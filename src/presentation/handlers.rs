// HTTP request handlers
use crate::application::controller::{Action, ViewUpdate};
use crate::domain::event::{label_counts, label_durations, EventKind};
use crate::domain::pipeline::PipelineSelection;
use crate::domain::session::{SessionConfig, SessionState, ViewMode};
use crate::domain::telemetry::TimeWindow;
use crate::infrastructure::html_export::{export_filename, render_html};
use crate::infrastructure::http_response::{accepts_brotli, html_attachment, json_response};
use crate::infrastructure::plotly_mapper::rendered_to_plotly;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct TimeframeQuery {
    pub include_good: Option<bool>,
    /// "time" (hours, default) or "count"
    pub by: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MachineEntry {
    pub machine_id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TimeframeEntry {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct CursorSummary {
    pub kind: Option<EventKind>,
    pub event_count: usize,
    /// 1-based
    pub event_index: Option<usize>,
    pub selected_event: Option<i64>,
    pub selected_event_type: Option<String>,
    pub window: Option<TimeWindow>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary<'a> {
    pub only_manual_mode: bool,
    pub machines: Vec<String>,
    pub config: &'a SessionConfig,
    pub pipeline: &'a PipelineSelection,
    pub view: &'a ViewMode,
    pub cursor: CursorSummary,
    pub has_figure: bool,
}

#[derive(Serialize)]
struct ActionResponse {
    #[serde(flatten)]
    update: ViewUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    figure: Option<serde_json::Value>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(%status, "{}", message);
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn respond<T: Serialize>(data: &T, headers: &HeaderMap) -> Response {
    match json_response(data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

pub fn session_summary(session: &SessionState) -> SessionSummary<'_> {
    let cursor = &session.cursor;
    SessionSummary {
        only_manual_mode: session.only_manual_mode,
        machines: session.machines.names(),
        config: &session.config,
        pipeline: &session.config.pipeline,
        view: &session.view,
        cursor: CursorSummary {
            kind: cursor.kind,
            event_count: cursor.events.len(),
            event_index: cursor.selected_event.map(|_| cursor.selected_event_internal + 1),
            selected_event: cursor.selected_event,
            selected_event_type: cursor.selected_event_type.clone(),
            window: cursor.window,
        },
        has_figure: session.caches.last_figure.is_some(),
    }
}

/// Labeled hours (or event counts) per label name; `None` for machines without labeled events loaded.
pub fn timeframe_summary(
    session: &SessionState,
    machine_id: i64,
    by_count: bool,
    include_good: bool,
) -> Option<Vec<TimeframeEntry>> {
    let events = &session.caches.labeled.get(&machine_id)?.full;
    let entries = if by_count {
        label_counts(events, include_good)
            .into_iter()
            .map(|(label, count)| TimeframeEntry {
                label,
                value: count as f64,
            })
            .collect()
    } else {
        label_durations(events, include_good)
            .into_iter()
            .map(|(label, value)| TimeframeEntry { label, value })
            .collect()
    };
    Some(entries)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List the machine catalog
pub async fn list_machines(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let machines: Vec<MachineEntry> = {
        let session = state.session.lock().await;
        session
            .machines
            .iter()
            .map(|machine| MachineEntry {
                machine_id: machine.machine_id,
                name: machine.display_name(),
            })
            .collect()
    };
    respond(&machines, &headers).await
}

pub async fn get_session(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().await;
    respond(&session_summary(&session), &headers).await
}

/// Run one analyst action against the session
pub async fn post_action(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(action): Json<Action>,
) -> Response {
    let mut session = state.session.lock().await;
    match state.controller.dispatch(&mut session, action).await {
        Ok(mut update) => {
            let figure = update.figure.take().map(|rendered| rendered_to_plotly(&rendered));
            respond(&ActionResponse { update, figure }, &headers).await
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub async fn machine_statistics(
    Path(machine_id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session = state.session.lock().await;
    if session.machines.get(machine_id).is_none() {
        return error_response(StatusCode::NOT_FOUND, format!("machine {} is not part of the catalog", machine_id));
    }
    let statistics = session
        .caches
        .channel_statistics
        .get(&machine_id)
        .cloned()
        .unwrap_or_default();
    respond(&statistics, &headers).await
}

pub async fn machine_timeframes(
    Path(machine_id): Path<i64>,
    Query(query): Query<TimeframeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let by_count = match query.by.as_deref() {
        None | Some("time") => false,
        Some("count") => true,
        Some(other) => return error_response(StatusCode::BAD_REQUEST, format!("unknown summary '{}'", other)),
    };
    let session = state.session.lock().await;
    match timeframe_summary(&session, machine_id, by_count, query.include_good.unwrap_or(true)) {
        Some(entries) => respond(&entries, &headers).await,
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no labeled events are loaded for machine {}", machine_id),
        ),
    }
}

pub async fn machine_ingestion(
    Path(machine_id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session = state.session.lock().await;
    let rates = session.caches.ingestion_rates.get(&machine_id).cloned().unwrap_or_default();
    respond(&rates, &headers).await
}

/// Download the current detail figure as a standalone HTML page
pub async fn export_figure(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let (filename, html) = {
        let session = state.session.lock().await;
        let Some(figure) = session.caches.last_figure.as_ref() else {
            return error_response(StatusCode::NOT_FOUND, "No figure to export, show data first");
        };
        let machine_name = session
            .view
            .selected_machine
            .and_then(|id| session.machines.get(id))
            .map(|machine| machine.display_name())
            .unwrap_or_else(|| "unknown".to_string());
        let filename = export_filename(&machine_name, figure.window);
        let html = render_html(&filename, figure, &state.plotly);
        (filename, html)
    };
    tracing::info!(%filename, "exporting figure");

    match html_attachment(&filename, html, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::tests::{labeled, ts};
    use crate::domain::event::LabeledEventSet;

    fn session_with_labels() -> SessionState {
        let mut session = SessionState::fallback(false);
        session.caches.labeled.insert(
            2,
            LabeledEventSet::new(
                vec![
                    labeled(1, ts(1, 0), ts(1, 2), 0),
                    labeled(2, ts(1, 3), ts(1, 4), 1),
                    labeled(3, ts(2, 0), ts(2, 3), 1),
                ],
                Vec::new(),
            ),
        );
        session
    }

    #[test]
    fn test_timeframes_by_time_and_count() {
        let session = session_with_labels();

        let by_time = timeframe_summary(&session, 2, false, true).unwrap();
        assert_eq!(
            by_time,
            vec![
                TimeframeEntry { label: "Good".into(), value: 2.0 },
                TimeframeEntry { label: "Machine stop".into(), value: 4.0 },
            ]
        );

        let by_count = timeframe_summary(&session, 2, true, false).unwrap();
        assert_eq!(by_count, vec![TimeframeEntry { label: "Machine stop".into(), value: 2.0 }]);

        assert!(timeframe_summary(&session, 3, false, true).is_none());
    }

    #[test]
    fn test_session_summary_serializes() {
        let session = session_with_labels();
        let summary = serde_json::to_value(session_summary(&session)).unwrap();
        assert_eq!(summary["only_manual_mode"], true);
        assert_eq!(summary["machines"][1], "2-10051164");
        assert_eq!(summary["pipeline"]["versions"]["training_pipe_version"], "manual");
        assert!(summary["cursor"]["event_index"].is_null());
        assert_eq!(summary["has_figure"], false);
    }
}
