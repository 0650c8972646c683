// Application state for HTTP handlers
use crate::application::controller::ExplorerController;
use crate::domain::session::SessionState;
use crate::infrastructure::html_export::PlotlyScript;
use tokio::sync::Mutex;

/// One analyst session; the lock runs actions one at a time.
pub struct AppState {
    pub session: Mutex<SessionState>,
    pub controller: ExplorerController,
    pub plotly: PlotlyScript,
}
