// HTML export - Self-contained page for the current detail figure
use crate::domain::figure::Figure;
use crate::domain::telemetry::TimeWindow;
use crate::infrastructure::plotly_mapper::figure_to_plotly;
use crate::infrastructure::timestamps::format_export;
use std::path::Path;
use std::sync::Arc;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.27.0.min.js";
const EXPORT_ROW_HEIGHT: usize = 300;

/// Where an exported page gets plotly.js from.
#[derive(Debug, Clone)]
pub enum PlotlyScript {
    /// Bundle embedded in the page, so it renders offline.
    Inline(Arc<str>),
    Cdn,
}

impl PlotlyScript {
    /// Embeds the bundle at `path`; the CDN is used only when it cannot be read.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(bundle) => {
                tracing::info!(path = %path.display(), bytes = bundle.len(), "plotly.js bundle loaded for exports");
                Self::Inline(bundle.into())
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read plotly.js bundle at {}, exports will load it from {}: {}",
                    path.display(),
                    PLOTLY_CDN,
                    e
                );
                Self::Cdn
            }
        }
    }

    fn script_tag(&self) -> String {
        match self {
            Self::Inline(bundle) => format!("<script type=\"text/javascript\">{}</script>", bundle),
            Self::Cdn => format!("<script src=\"{}\"></script>", PLOTLY_CDN),
        }
    }
}

/// `{machine}_{start}_{end}_exploration.html`
pub fn export_filename(machine_name: &str, window: TimeWindow) -> String {
    format!(
        "{}_{}_{}_exploration.html",
        machine_name,
        format_export(window.start),
        format_export(window.end)
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_html(title: &str, figure: &Figure, plotly: &PlotlyScript) -> String {
    // "</" would end the script element early
    let figure_json = figure_to_plotly(figure, EXPORT_ROW_HEIGHT)
        .to_string()
        .replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
{plotly}
</head>
<body>
<div id="figure"></div>
<script>
const figure = {figure_json};
Plotly.newPlot("figure", figure.data, figure.layout);
</script>
</body>
</html>
"#,
        title = escape_html(title),
        plotly = plotly.script_tag(),
        figure_json = figure_json,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::tests::ts;

    #[test]
    fn test_export_filename() {
        let window = TimeWindow::new(ts(1, 0), ts(1, 1));
        assert_eq!(
            export_filename("2-10051164", window),
            "2-10051164_2023-01-01_00-00-00_2023-01-01_01-00-00_exploration.html"
        );
    }

    #[test]
    fn test_document_embeds_figure() {
        let figure = Figure::new(vec!["14-</script>".to_string()], TimeWindow::new(ts(1, 0), ts(1, 1)));
        let html = render_html("2-10051164 <exported>", &figure, &PlotlyScript::Cdn);
        assert!(html.contains("<title>2-10051164 &lt;exported&gt;</title>"));
        assert!(html.contains(PLOTLY_CDN));
        assert!(html.contains("14-<\\/script>"));
        assert_eq!(html.matches("</script>").count(), 2);
    }

    #[test]
    fn test_bundle_is_inlined_when_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plotly.min.js");
        std::fs::write(&path, "window.Plotly={newPlot:function(){}};").unwrap();

        let plotly = PlotlyScript::load(&path);
        assert!(matches!(plotly, PlotlyScript::Inline(_)));

        let figure = Figure::new(vec!["14-PressureA".to_string()], TimeWindow::new(ts(1, 0), ts(1, 1)));
        let html = render_html("export", &figure, &plotly);
        assert!(html.contains("window.Plotly={newPlot:function(){}};"));
        assert!(!html.contains(PLOTLY_CDN));
        assert!(!html.contains("<script src="));
    }

    #[test]
    fn test_missing_bundle_falls_back_to_cdn() {
        let dir = tempfile::tempdir().unwrap();
        let plotly = PlotlyScript::load(&dir.path().join("missing.js"));
        assert!(matches!(plotly, PlotlyScript::Cdn));
    }
}
