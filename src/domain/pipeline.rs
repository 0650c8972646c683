// Pipeline version selection and its dependency cascade
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Sentinel version meaning "use analyst-uploaded files instead of the store".
pub const MANUAL_VERSION: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Statistics,
    LabeledEvents,
    Training,
    PredictedEvents,
}

impl PipelineStage {
    /// Upstream stages first.
    pub const ALL: [PipelineStage; 4] = [
        Self::Statistics,
        Self::LabeledEvents,
        Self::Training,
        Self::PredictedEvents,
    ];

    /// Stages whose options are derived from this one.
    pub fn dependents(self) -> &'static [PipelineStage] {
        match self {
            Self::Statistics | Self::LabeledEvents => &[Self::Training],
            Self::Training => &[Self::PredictedEvents],
            Self::PredictedEvents => &[],
        }
    }

    /// Stages this one's options are derived from.
    pub fn upstream(self) -> &'static [PipelineStage] {
        match self {
            Self::Statistics | Self::LabeledEvents => &[],
            Self::Training => &[Self::Statistics, Self::LabeledEvents],
            Self::PredictedEvents => &[Self::Training],
        }
    }
}

/// The four selected versions. Field names match the provenance snapshot
/// stored with manual events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVersions {
    #[serde(rename = "stats_pipe_version")]
    pub statistics: String,
    #[serde(rename = "labeled_events_pipe_version")]
    pub labeled_events: String,
    #[serde(rename = "training_pipe_version")]
    pub training: String,
    #[serde(rename = "events_pipe_version")]
    pub predicted_events: String,
}

impl PipelineVersions {
    pub fn get(&self, stage: PipelineStage) -> &str {
        match stage {
            PipelineStage::Statistics => &self.statistics,
            PipelineStage::LabeledEvents => &self.labeled_events,
            PipelineStage::Training => &self.training,
            PipelineStage::PredictedEvents => &self.predicted_events,
        }
    }

    fn slot(&mut self, stage: PipelineStage) -> &mut String {
        match stage {
            PipelineStage::Statistics => &mut self.statistics,
            PipelineStage::LabeledEvents => &mut self.labeled_events,
            PipelineStage::Training => &mut self.training,
            PipelineStage::PredictedEvents => &mut self.predicted_events,
        }
    }

    pub fn is_manual(&self, stage: PipelineStage) -> bool {
        self.get(stage) == MANUAL_VERSION
    }

    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVersionOptions {
    #[serde(rename = "stats_pipe_options")]
    pub statistics: Vec<String>,
    #[serde(rename = "labeled_events_pipe_options")]
    pub labeled_events: Vec<String>,
    #[serde(rename = "training_pipe_options")]
    pub training: Vec<String>,
    #[serde(rename = "events_pipe_options")]
    pub predicted_events: Vec<String>,
}

impl PipelineVersionOptions {
    pub fn manual_only() -> Self {
        let manual = vec![MANUAL_VERSION.to_string()];
        Self {
            statistics: manual.clone(),
            labeled_events: manual.clone(),
            training: manual.clone(),
            predicted_events: manual,
        }
    }

    pub fn get(&self, stage: PipelineStage) -> &[String] {
        match stage {
            PipelineStage::Statistics => &self.statistics,
            PipelineStage::LabeledEvents => &self.labeled_events,
            PipelineStage::Training => &self.training,
            PipelineStage::PredictedEvents => &self.predicted_events,
        }
    }

    fn slot(&mut self, stage: PipelineStage) -> &mut Vec<String> {
        match stage {
            PipelineStage::Statistics => &mut self.statistics,
            PipelineStage::LabeledEvents => &mut self.labeled_events,
            PipelineStage::Training => &mut self.training,
            PipelineStage::PredictedEvents => &mut self.predicted_events,
        }
    }

    /// First option of each catalog.
    pub fn defaults(&self) -> PipelineVersions {
        let first = |options: &[String]| {
            options
                .first()
                .cloned()
                .unwrap_or_else(|| MANUAL_VERSION.to_string())
        };
        PipelineVersions {
            statistics: first(&self.statistics),
            labeled_events: first(&self.labeled_events),
            training: first(&self.training),
            predicted_events: first(&self.predicted_events),
        }
    }
}

/// Selected versions together with the options each selector offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSelection {
    pub versions: PipelineVersions,
    pub options: PipelineVersionOptions,
}

impl PipelineSelection {
    pub fn from_options(options: PipelineVersionOptions) -> Self {
        Self {
            versions: options.defaults(),
            options,
        }
    }

    pub fn manual_only() -> Self {
        Self::from_options(PipelineVersionOptions::manual_only())
    }

    pub fn version(&self, stage: PipelineStage) -> &str {
        self.versions.get(stage)
    }

    /// Returns whether the selected value changed.
    pub fn set_version(&mut self, stage: PipelineStage, value: &str) -> bool {
        let slot = self.versions.slot(stage);
        if slot == value {
            return false;
        }
        *slot = value.to_string();
        true
    }

    /// Installs a recomputed option list and selects its first entry.
    pub fn replace_options(&mut self, stage: PipelineStage, options: Vec<String>) {
        let options = if options.is_empty() {
            vec![MANUAL_VERSION.to_string()]
        } else {
            options
        };
        *self.versions.slot(stage) = options[0].clone();
        *self.options.slot(stage) = options;
    }

    pub fn upstream_is_manual(&self, stage: PipelineStage) -> bool {
        stage.upstream().iter().any(|up| self.versions.is_manual(*up))
    }
}

/// A TRAIN run of the training pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    pub main_experiment_slug: String,
    /// Labeled-events run the training consumed, when it can be determined.
    pub labeled_events_version: Option<i64>,
    pub start_timestamp: NaiveDateTime,
}

impl TrainingRun {
    pub fn presented_name(&self) -> String {
        format!("{}: {}", self.main_experiment_slug, self.start_timestamp.date())
    }
}

/// Experiment slug out of a presented training name (`"slug: date"`).
pub fn training_slug(training_version: &str) -> &str {
    training_version
        .split(": ")
        .next()
        .unwrap_or(training_version)
}

fn with_manual(mut options: Vec<String>) -> Vec<String> {
    options.push(MANUAL_VERSION.to_string());
    options
}

fn newest_first(mut run_ids: Vec<i64>) -> Vec<String> {
    run_ids.sort_unstable_by(|a, b| b.cmp(a));
    run_ids.dedup();
    run_ids.into_iter().map(|id| id.to_string()).collect()
}

/// Statistics runs, newest first. No uploaded alternative exists for statistics.
pub fn statistics_options(run_ids: Vec<i64>) -> Vec<String> {
    let options = newest_first(run_ids);
    if options.is_empty() {
        return vec![MANUAL_VERSION.to_string()];
    }
    options
}

pub fn labeled_events_options(run_ids: Vec<i64>) -> Vec<String> {
    with_manual(newest_first(run_ids))
}

pub fn predicted_events_options(run_ids: Vec<i64>) -> Vec<String> {
    with_manual(newest_first(run_ids))
}

/// Training versions usable with the given statistics / labeled-events runs.
///
/// Training currently consumes statistics and labels from the same run, so
/// differing versions leave only the uploaded alternative.
pub fn training_options(
    statistics_version: &str,
    labeled_events_version: &str,
    runs: &[TrainingRun],
    slugs_with_events: &[String],
) -> Vec<String> {
    if statistics_version != labeled_events_version {
        return vec![MANUAL_VERSION.to_string()];
    }
    let Ok(labeled) = labeled_events_version.parse::<i64>() else {
        return vec![MANUAL_VERSION.to_string()];
    };

    let mut matching: Vec<&TrainingRun> = runs
        .iter()
        .filter(|run| run.labeled_events_version == Some(labeled))
        .filter(|run| slugs_with_events.contains(&run.main_experiment_slug))
        .collect();
    matching.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));

    let mut names: Vec<String> = Vec::new();
    for run in matching {
        let name = run.presented_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    with_manual(names)
}
