// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::controller::{Action, ExplorerController};
use crate::application::manual_event_store::ManualStores;
use crate::infrastructure::config::{load_database_settings, load_explorer_config};
use crate::infrastructure::csv_store::CsvStore;
use crate::infrastructure::html_export::PlotlyScript;
use crate::infrastructure::postgres_repository::PostgresRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    export_figure, get_session, health_check, list_machines, machine_ingestion, machine_statistics,
    machine_timeframes, post_action,
};

#[derive(Parser, Debug)]
#[command(version, about = "Interactive explorer for machine sensor telemetry and events")]
struct Args {
    #[arg(long, default_value = "Keter")]
    customer: String,

    /// Machine preselected at startup
    #[arg(long, default_value = "2-10051164")]
    test_machine: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    #[arg(long)]
    debug: bool,

    /// Read reconstruction results with one query per channel instead of one query for all channels
    #[arg(long)]
    read_files_multi: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load configuration
    let explorer_config = load_explorer_config()?;
    let settings = explorer_config.explorer;
    let database = load_database_settings()?;
    if !database.is_complete() {
        tracing::warn!("DB_HOST, DB_NAME or DB_USER is not set, the database will be unreachable");
    }

    // Stores (infrastructure layer)
    let repository = Arc::new(PostgresRepository::new(&database));
    let csv_store = Arc::new(CsvStore::new(
        &settings.temporary_data_dir,
        settings.datetime_format.clone(),
        settings.timezone()?,
    ));
    let manual = ManualStores {
        database: repository.clone(),
        files: csv_store.clone(),
    };

    // Controller and session (application layer)
    let controller = ExplorerController::new(repository, manual, csv_store, &settings)?;
    let mut session = controller.loader().bootstrap(args.read_files_multi).await;
    tracing::info!(
        customer = %args.customer,
        machines = session.machines.names().len(),
        only_manual_mode = session.only_manual_mode,
        "session ready"
    );

    let preselect = Action::SelectMachine {
        machine: args.test_machine.clone(),
    };
    if let Err(e) = controller.dispatch(&mut session, preselect).await {
        tracing::warn!("Could not preselect machine {}: {}", args.test_machine, e);
    }

    let state = Arc::new(AppState {
        session: tokio::sync::Mutex::new(session),
        controller,
        plotly: PlotlyScript::load(&settings.plotly_js_path),
    });

    // Build router (presentation layer)
    // Compression happens in the response builders, so no CompressionLayer here
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/machines", get(list_machines))
        .route("/machines/:id/statistics", get(machine_statistics))
        .route("/machines/:id/timeframes", get(machine_timeframes))
        .route("/machines/:id/ingestion", get(machine_ingestion))
        .route("/session", get(get_session))
        .route("/actions", post(post_action))
        .route("/export", get(export_figure))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!("Starting sensor-explorer service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
