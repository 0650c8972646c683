use crate::domain::figure::OVERVIEW_MAX_POINTS;
use crate::domain::telemetry::TimeWindow;
use anyhow::Context;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerConfig {
    pub explorer: ExplorerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerSettings {
    /// chrono format of timestamps written to the flat files
    pub datetime_format: String,
    pub target_timezone: String,
    pub temporary_data_dir: String,
    #[serde(default = "default_untag_allow_list")]
    pub untag_allow_list: Vec<String>,
    pub full_range_start: NaiveDateTime,
    pub full_range_end: NaiveDateTime,
    #[serde(default = "default_overview_max_points")]
    pub overview_max_points: usize,
    /// plotly.js bundle embedded in exported pages
    #[serde(default = "default_plotly_js_path")]
    pub plotly_js_path: PathBuf,
}

impl ExplorerSettings {
    /// Whole period the stores hold data for.
    pub fn full_range(&self) -> TimeWindow {
        TimeWindow::new(self.full_range_start, self.full_range_end)
    }

    pub fn timezone(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.target_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid target_timezone '{}': {}", self.target_timezone, e))
    }
}

fn default_untag_allow_list() -> Vec<String> {
    vec!["Eri".to_string()]
}

fn default_overview_max_points() -> usize {
    OVERVIEW_MAX_POINTS
}

fn default_plotly_js_path() -> PathBuf {
    PathBuf::from("assets/plotly.min.js")
}

/// Connection settings, read from `DB_HOST`, `DB_NAME`, `DB_USER`, `DB_PASSWORD` and `DB_PORT`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub port: Option<u16>,
}

impl DatabaseSettings {
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.name.is_empty() && !self.user.is_empty()
    }
}

pub fn load_explorer_config() -> anyhow::Result<ExplorerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/settings"))
        .build()?;

    settings
        .try_deserialize()
        .context("config/settings is missing explorer settings")
}

pub fn load_database_settings() -> anyhow::Result<DatabaseSettings> {
    let settings = config::Config::builder()
        .add_source(config::Environment::with_prefix("DB").try_parsing(true))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_settings_deserialize() {
        let toml = r#"
            [explorer]
            datetime_format = "%Y-%m-%d %H:%M:%S%.f"
            target_timezone = "Asia/Jerusalem"
            temporary_data_dir = "temporary_data"
            full_range_start = "2022-06-01T00:00:00"
            full_range_end = "2023-06-01T00:00:00"
        "#;
        let config: ExplorerConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.explorer.untag_allow_list, vec!["Eri".to_string()]);
        assert_eq!(config.explorer.overview_max_points, 1000);
        assert_eq!(config.explorer.plotly_js_path, PathBuf::from("assets/plotly.min.js"));
        assert_eq!(config.explorer.timezone().unwrap(), chrono_tz::Asia::Jerusalem);
        assert!(config.explorer.full_range().start < config.explorer.full_range().end);
    }

    #[test]
    fn test_database_settings_completeness() {
        let mut db = DatabaseSettings::default();
        assert!(!db.is_complete());
        db.host = "localhost".into();
        db.name = "sensors".into();
        db.user = "analyst".into();
        assert!(db.is_complete());
    }
}
