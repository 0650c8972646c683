// Figure domain models: subplots, traces and event shading
use super::event::Event;
use super::telemetry::{downsample_points, TimeSeriesPoint, TimeWindow};
use serde::{Deserialize, Serialize};

pub const EVENT_OPACITY: f64 = 0.3;
pub const PREDICTED_EVENT_COLOR: &str = "#d62728";
pub const OUT_OF_SCOPE_PREDICTED_EVENT_COLOR: &str = "#ff9896";
pub const MANUAL_EVENT_COLOR: &str = "#2ca02c";
pub const OUT_OF_SCOPE_MANUAL_EVENT_COLOR: &str = "#98df8a";
pub const OVERVIEW_MAX_POINTS: usize = 1000;

const LABEL_PALETTE: [&str; 7] = [
    "#7f7f7f", "#1f77b4", "#ff7f0e", "#9467bd", "#8c564b", "#bcbd22", "#e377c2",
];

/// Shading color of a labeled event type.
pub fn label_color(event_type_id: i32) -> &'static str {
    LABEL_PALETTE[event_type_id.rem_euclid(LABEL_PALETTE.len() as i32) as usize]
}

/// Layers the analyst toggled on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayOptions {
    #[serde(default)]
    pub draw_labeled_events: bool,
    #[serde(default)]
    pub selected_labeled_events_types: Vec<String>,
    #[serde(default)]
    pub draw_predicted_anomalies: bool,
    #[serde(default)]
    pub draw_predicted_events: bool,
    #[serde(default)]
    pub draw_manual_events: bool,
    #[serde(default)]
    pub show_reconstruction: bool,
}

/// What the analyst asked to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewParams {
    pub machine_id: i64,
    /// Strict window; the session paddings are added when the figure is built.
    pub window: TimeWindow,
    pub channels: Vec<String>,
    pub display: DisplayOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Raw,
    Nominal,
    Standby,
    Reconstruction,
    Anomaly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub kind: TraceKind,
    /// Zero-based subplot row.
    pub subplot: usize,
    pub points: Vec<TimeSeriesPoint>,
    pub color: Option<String>,
}

impl Trace {
    pub fn new(name: impl Into<String>, kind: TraceKind, subplot: usize, points: Vec<TimeSeriesPoint>) -> Self {
        Self {
            name: name.into(),
            kind,
            subplot,
            points,
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// A shaded time range on one subplot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shape {
    pub subplot: usize,
    pub window: TimeWindow,
    pub color: String,
    pub opacity: f64,
    pub label: String,
    pub severity: Option<f64>,
}

/// Color choice for a shading pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shade<'a> {
    Fixed(&'a str),
    /// Color by labeled event type.
    ByLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub subplot_names: Vec<String>,
    pub window: TimeWindow,
    pub traces: Vec<Trace>,
    pub shapes: Vec<Shape>,
}

impl Figure {
    pub fn new(subplot_names: Vec<String>, window: TimeWindow) -> Self {
        Self {
            subplot_names,
            window,
            traces: Vec::new(),
            shapes: Vec::new(),
        }
    }

    pub fn num_plots(&self) -> usize {
        self.subplot_names.len()
    }

    /// Subplot showing the given data source (names are `"{id}-{label}"`).
    pub fn subplot_of(&self, data_source_id: i64) -> Option<usize> {
        let prefix = format!("{}-", data_source_id);
        self.subplot_names.iter().position(|name| name.starts_with(&prefix))
    }

    pub fn add_trace(&mut self, trace: Trace) {
        self.traces.push(trace);
    }

    /// Shades every event overlapping `range`, clipped to it, on the given subplots
    /// (all subplots when `subplots` is `None`).
    pub fn shade_events<'e>(
        &mut self,
        events: impl IntoIterator<Item = &'e Event>,
        range: TimeWindow,
        subplots: Option<&[usize]>,
        shade: Shade<'_>,
        opacity: f64,
    ) -> usize {
        let targets: Vec<usize> = match subplots {
            Some(subplots) => subplots.to_vec(),
            None => (0..self.num_plots()).collect(),
        };
        let mut added = 0;
        for event in events {
            if !range.overlaps(event.start_timestamp, event.end_timestamp) || range.start >= range.end {
                continue;
            }
            let clipped = TimeWindow::new(
                event.start_timestamp.max(range.start),
                event.end_timestamp.min(range.end),
            );
            let color = match shade {
                Shade::Fixed(color) => color,
                Shade::ByLabel => label_color(event.event_type_id().unwrap_or_default()),
            };
            for subplot in &targets {
                self.shapes.push(Shape {
                    subplot: *subplot,
                    window: clipped,
                    color: color.to_string(),
                    opacity,
                    label: event.label_name.clone(),
                    severity: None,
                });
                added += 1;
            }
        }
        added
    }

    pub fn raw_traces(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter().filter(|t| t.kind == TraceKind::Raw)
    }

    /// Coarse companion figure: raw traces only, bucket-averaged.
    pub fn overview(&self, max_points: usize) -> Figure {
        let mut overview = Figure::new(self.subplot_names.clone(), self.window);
        for trace in self.raw_traces() {
            let mut coarse = trace.clone();
            coarse.points = downsample_points(&trace.points, max_points);
            overview.add_trace(coarse);
        }
        overview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::tests::{labeled, ts};

    #[test]
    fn test_subplot_lookup_by_id_prefix() {
        let figure = Figure::new(
            vec!["14-PressureA".to_string(), "140-Temp".to_string()],
            TimeWindow::new(ts(1, 0), ts(1, 5)),
        );
        assert_eq!(figure.subplot_of(14), Some(0));
        assert_eq!(figure.subplot_of(140), Some(1));
        assert_eq!(figure.subplot_of(4), None);
    }

    #[test]
    fn test_shading_clips_to_range() {
        let mut figure = Figure::new(
            vec!["14-PressureA".to_string(), "15-PressureB".to_string()],
            TimeWindow::new(ts(1, 0), ts(1, 10)),
        );
        let events = vec![labeled(1, ts(1, 2), ts(1, 12), 1), labeled(2, ts(2, 0), ts(2, 1), 1)];

        let added = figure.shade_events(&events, figure.window, None, Shade::ByLabel, EVENT_OPACITY);
        assert_eq!(added, 2);
        assert_eq!(figure.shapes[0].window, TimeWindow::new(ts(1, 2), ts(1, 10)));
        assert_eq!(figure.shapes[0].color, label_color(1));

        let added = figure.shade_events(&events, figure.window, Some(&[1]), Shade::Fixed("#000"), 0.5);
        assert_eq!(added, 1);
        assert_eq!(figure.shapes[2].subplot, 1);
    }

    #[test]
    fn test_overview_keeps_only_raw_traces() {
        let mut figure = Figure::new(vec!["14-PressureA".to_string()], TimeWindow::new(ts(1, 0), ts(1, 1)));
        let points: Vec<TimeSeriesPoint> = (0..100).map(|i| TimeSeriesPoint::new(i, 1.0)).collect();
        figure.add_trace(Trace::new("14-PressureA", TraceKind::Raw, 0, points.clone()));
        figure.add_trace(Trace::new("ae", TraceKind::Reconstruction, 0, points));

        let overview = figure.overview(10);
        assert_eq!(overview.traces.len(), 1);
        assert_eq!(overview.traces[0].points.len(), 10);
        assert!(overview.shapes.is_empty());
    }
}
