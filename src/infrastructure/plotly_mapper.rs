// Mapper to convert figures to Plotly JSON
use crate::application::figure_service::RenderedFigure;
use crate::domain::figure::{Figure, Shape, Trace, TraceKind};
use crate::domain::telemetry::TimeSeriesPoint;
use chrono::NaiveDateTime;
use serde_json::{json, Value};

const PLOTLY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const DETAIL_ROW_HEIGHT: usize = 250;
const OVERVIEW_ROW_HEIGHT: usize = 120;

fn plotly_time(timestamp: NaiveDateTime) -> String {
    timestamp.format(PLOTLY_TIME_FORMAT).to_string()
}

/// Axis id suffix of a zero-based subplot: "", "2", "3", ...
fn axis_suffix(subplot: usize) -> String {
    if subplot == 0 {
        String::new()
    } else {
        (subplot + 1).to_string()
    }
}

pub fn rendered_to_plotly(rendered: &RenderedFigure) -> Value {
    json!({
        "detail": figure_to_plotly(&rendered.detail, DETAIL_ROW_HEIGHT),
        "overview": figure_to_plotly(&rendered.overview, OVERVIEW_ROW_HEIGHT),
        "subplot_names": rendered.subplot_names,
    })
}

/// One stacked row per subplot, all rows sharing the time axis.
pub fn figure_to_plotly(figure: &Figure, row_height: usize) -> Value {
    let rows = figure.num_plots().max(1);
    let data: Vec<Value> = figure.traces.iter().map(trace_to_plotly).collect();
    let shapes: Vec<Value> = figure.shapes.iter().map(shape_to_plotly).collect();

    let mut layout = json!({
        "height": rows * row_height,
        "showlegend": true,
        "hovermode": "x unified",
        "grid": { "rows": rows, "columns": 1, "pattern": "coupled" },
        "xaxis": {
            "type": "date",
            "range": [plotly_time(figure.window.start), plotly_time(figure.window.end)],
        },
        "shapes": shapes,
    });
    for (subplot, name) in figure.subplot_names.iter().enumerate() {
        layout[format!("yaxis{}", axis_suffix(subplot))] = json!({ "title": { "text": name } });
    }

    json!({ "data": data, "layout": layout })
}

fn trace_to_plotly(trace: &Trace) -> Value {
    let (x, y): (Vec<String>, Vec<Option<f64>>) = trace
        .points
        .iter()
        .filter_map(|point: &TimeSeriesPoint| {
            let value = point.value.is_finite().then_some(point.value);
            point.timestamp().map(|t| (plotly_time(t), value))
        })
        .unzip();

    let (mode, line_dash) = match trace.kind {
        TraceKind::Raw | TraceKind::Reconstruction => ("lines", "solid"),
        TraceKind::Nominal => ("lines", "dash"),
        TraceKind::Standby => ("lines", "dot"),
        TraceKind::Anomaly => ("markers", "solid"),
    };

    let mut value = json!({
        "type": "scattergl",
        "name": trace.name,
        "mode": mode,
        "x": x,
        "y": y,
        "xaxis": "x",
        "yaxis": format!("y{}", axis_suffix(trace.subplot)),
        "line": { "dash": line_dash },
    });
    if let Some(color) = &trace.color {
        value["line"]["color"] = json!(color);
        value["marker"] = json!({ "color": color, "size": 8 });
    }
    value
}

fn shape_to_plotly(shape: &Shape) -> Value {
    let mut value = json!({
        "type": "rect",
        "xref": "x",
        "yref": format!("y{} domain", axis_suffix(shape.subplot)),
        "x0": plotly_time(shape.window.start),
        "x1": plotly_time(shape.window.end),
        "y0": 0,
        "y1": 1,
        "fillcolor": shape.color,
        "opacity": shape.opacity,
        "layer": "below",
        "line": { "width": 0 },
        "name": shape.label,
    });
    if let Some(severity) = shape.severity {
        value["label"] = json!({ "text": format!("{:.2}", severity), "textposition": "top center" });
    }
    value
}
