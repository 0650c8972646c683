// Pipeline service - Version option catalogs and the selection cascade
use crate::application::manual_event_store::UploadStore;
use crate::application::sensor_repository::SensorRepository;
use crate::domain::pipeline::{
    labeled_events_options, predicted_events_options, statistics_options, training_options, training_slug,
    PipelineSelection, PipelineStage, PipelineVersionOptions, PipelineVersions, MANUAL_VERSION,
};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone)]
pub struct PipelineService {
    repository: Arc<dyn SensorRepository>,
    uploads: Arc<dyn UploadStore>,
}

impl PipelineService {
    pub fn new(repository: Arc<dyn SensorRepository>, uploads: Arc<dyn UploadStore>) -> Self {
        Self { repository, uploads }
    }

    /// Option catalogs for all four selectors, each defaulting to its first entry.
    ///
    /// Fails when the run catalogs cannot be read at all; derived catalogs
    /// degrade to `manual` instead.
    pub async fn load_options(&self) -> anyhow::Result<PipelineVersionOptions> {
        let statistics = statistics_options(self.repository.statistics_run_ids().await?);
        let labeled_events = labeled_events_options(self.repository.labeled_events_run_ids().await?);

        let mut options = PipelineVersionOptions {
            statistics,
            labeled_events,
            training: vec![MANUAL_VERSION.to_string()],
            predicted_events: vec![MANUAL_VERSION.to_string()],
        };
        let mut selection = PipelineSelection::from_options(options.clone());
        options.training = self.options_for(&selection, PipelineStage::Training).await;
        selection.replace_options(PipelineStage::Training, options.training.clone());
        options.predicted_events = self.options_for(&selection, PipelineStage::PredictedEvents).await;

        tracing::info!(
            statistics = options.statistics.len(),
            labeled_events = options.labeled_events.len(),
            training = options.training.len(),
            predicted_events = options.predicted_events.len(),
            "pipeline options loaded"
        );
        Ok(options)
    }

    /// Like `load_options`, but an unreachable store yields the manual-only catalog.
    pub async fn options_or_manual(&self) -> PipelineVersionOptions {
        self.load_options().await.unwrap_or_else(|e| {
            tracing::error!("[SWITCHING TO MANUAL AND DEFAULTS ONLY] Please verify DB connection: {}", e);
            PipelineVersionOptions::manual_only()
        })
    }

    /// Recomputed option list of a derived selector given its upstream selections.
    pub async fn options_for(&self, selection: &PipelineSelection, stage: PipelineStage) -> Vec<String> {
        let manual = || vec![MANUAL_VERSION.to_string()];
        if selection.upstream_is_manual(stage) {
            return manual();
        }

        match stage {
            PipelineStage::Statistics => selection.options.statistics.clone(),
            PipelineStage::LabeledEvents => selection.options.labeled_events.clone(),
            PipelineStage::Training => {
                let runs = self.repository.training_runs().await;
                let slugs = self.repository.experiment_slugs_with_events().await;
                match (runs, slugs) {
                    (Ok(runs), Ok(slugs)) => training_options(
                        selection.version(PipelineStage::Statistics),
                        selection.version(PipelineStage::LabeledEvents),
                        &runs,
                        &slugs,
                    ),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!("Could not load training versions: {}", e);
                        manual()
                    }
                }
            }
            PipelineStage::PredictedEvents => {
                let slug = training_slug(selection.version(PipelineStage::Training));
                match self.repository.events_run_ids(slug).await {
                    Ok(run_ids) => predicted_events_options(run_ids),
                    Err(e) => {
                        tracing::warn!(slug, "Could not load predicted-events versions: {}", e);
                        manual()
                    }
                }
            }
        }
    }

    /// Selects `value` for `stage` and recomputes every downstream selector.
    ///
    /// Returns false, touching nothing, when `value` is already selected.
    pub async fn select(&self, selection: &mut PipelineSelection, stage: PipelineStage, value: &str) -> bool {
        if !selection.set_version(stage, value) {
            return false;
        }
        tracing::info!(?stage, value, "pipeline version selected");

        let mut pending: VecDeque<PipelineStage> = stage.dependents().iter().copied().collect();
        while let Some(dependent) = pending.pop_front() {
            let options = self.options_for(selection, dependent).await;
            selection.replace_options(dependent, options);
            pending.extend(dependent.dependents().iter().copied());
        }
        true
    }

    /// Applies a whole set of versions, upstream stages first, so each
    /// derived catalog is recomputed before its own value is checked.
    /// Values a stage does not offer are skipped, keeping the cascade's choice.
    pub async fn apply(&self, selection: &mut PipelineSelection, versions: &PipelineVersions) {
        for stage in PipelineStage::ALL {
            let value = versions.get(stage);
            if !selection.options.get(stage).iter().any(|option| option == value) {
                tracing::warn!(?stage, value, kept = selection.version(stage), "version is not offered");
                continue;
            }
            self.select(selection, stage, value).await;
        }
    }

    /// Reloads all catalogs and forgets uploaded anomalies.
    pub async fn refresh(&self) -> PipelineSelection {
        if let Err(e) = self.uploads.remove_predicted_anomalies().await {
            tracing::warn!("Could not remove uploaded anomalies: {}", e);
        }
        PipelineSelection::from_options(self.options_or_manual().await)
    }
}
