// Postgres repository - One connection per call, closed when the call returns
use crate::application::manual_event_store::{outcome_for, ManualEventKey, ManualEventStore, NewManualEvent, UntagOutcome};
use crate::application::sensor_repository::{LabeledEventRow, SensorRepository};
use crate::domain::anomaly::{AnomalyRecord, SeverityRecord};
use crate::domain::event::{Event, EventDetails, ManualEventInfo, MANUAL_LABEL};
use crate::domain::machine::{ChannelConnection, ChannelStatistics, DataSource, IngestionRate, Machine};
use crate::domain::pipeline::TrainingRun;
use crate::domain::session::ReconstructionSeries;
use crate::domain::telemetry::{TimeSeriesPoint, TimeWindow};
use crate::infrastructure::config::DatabaseSettings;
use crate::infrastructure::csv_store::parse_id_list;
use crate::infrastructure::error::{DataAccessError, Source};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Connection, Row};
use std::collections::{BTreeMap, HashMap};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

const MACHINES: Source = Source::new(
    "preprocessed_raw_data",
    "machines",
    &["machine_id", "machine_name", "machine_type", "description", "local_timezone", "customer_machine_id"],
);
const DATA_SOURCES: Source = Source::new(
    "preprocessed_raw_data",
    "data_sources",
    &["data_source_id", "short_name", "customer_data_source_id", "data_source_name"],
);
const STATISTICS: Source = Source::new(
    "statistics_calculation",
    "data_sources_statistics_mv",
    &[
        "data_source_id",
        "is_periodic",
        "has_modes_separation",
        "mode_count",
        "count_val",
        "mean_val",
        "std_val",
        "cov_val",
        "entropy",
        "overall_rank",
    ],
);
const STATISTICS_RUNS: Source = Source::new("statistics_calculation", "data_sources_statistics_mv", &["run_id"]);
const VALUE_TYPES: Source = Source::new(
    "preprocessed_raw_data",
    "data_source_value_types",
    &["data_source_id", "value_type_id", "table_name", "column_name"],
);
const VALUES: Source = Source::new("preprocessed_raw_data", "<value table>", &["data_source_id", "timestamp", "value"]);
const CONNECTIONS: Source = Source::new(
    "preprocessed_raw_data",
    "data_sources_connections_v",
    &[
        "data_source_actual_value",
        "data_source_nominal_value",
        "data_source_standby_value",
        "machine_id",
    ],
);
const INGESTION: Source = Source::new(
    "dashboards",
    "data_sources_with_data_per_hour",
    &["timestamp", "num_data_sources"],
);
const EVENT_TYPES: Source = Source::new("events", "labeled_event_types", &["event_type_id", "event_type_name"]);
const LABELED: Source = Source::new(
    "events",
    "merged_calculated_labeled_events",
    &["event_id", "start_timestamp", "end_timestamp", "event_type_id"],
);
const LABELED_RUNS: Source = Source::new("events", "merged_calculated_labeled_events", &["run_id"]);
const LABELED_PER_DATA_SOURCE: Source = Source::new(
    "events",
    "calculated_labeled_events_per_data_source",
    &["event_id", "start_timestamp", "end_timestamp", "event_type_id", "data_source_id"],
);
const PREDICTED_EVENTS: Source = Source::new(
    "events",
    "predicted_events",
    &["event_id", "machine_id", "start_timestamp", "end_timestamp", "num_anomalies", "anomaly_id_list"],
);
const PREDICTED_ANOMALIES: Source = Source::new(
    "events",
    "predicted_anomalies",
    &["anomaly_id", "machine_id", "data_source_id", "model_type", "timestamp"],
);
const SEVERITIES: Source = Source::new("events", "predicted_events_severity", &["event_id", "data_source_id", "severity"]);
const RECONSTRUCTION: Source = Source::new(
    "algo",
    "reconstruction_results",
    &["data_source_id", "alg_name", "timestamp", "value"],
);
const TRAINING_RUNS: Source = Source::new(
    "algo",
    "metadata_pipeline_3",
    &["main_experiment_slug", "configuration_json", "start_timestamp"],
);
const PIPELINE_RUNS: Source = Source::new("pipelines_runs", "runs", &["arguments"]);
const EVENTS_RUNS: Source = Source::new("events", "events_detection_metadata_view", &["run_id"]);
const MANUAL_EVENTS: Source = Source::new(
    "algo",
    "manually_tagged_events",
    &[
        "event_id",
        "label_name",
        "machine_id",
        "data_sources_list",
        "start_timestamp",
        "end_timestamp",
        "username",
        "insert_timestamp",
        "pipelines_configurations",
        "is_deprecated",
    ],
);

/// Pipeline id of the events-detection runs.
const EVENTS_DETECTION_PIPELINE: i32 = 4;

/// Table and column names taken from the value-type catalog end up in SQL text.
fn checked_identifier(name: &str) -> anyhow::Result<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        anyhow::bail!("refusing to query unsafe identifier '{}'", name)
    }
}

/// Labeled-events run a training consumed: `param_grid[0].pipeline_2_hash[0]` is `"<prefix>_<run>"`.
fn labeled_version_of(configuration: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(configuration).ok()?;
    let hash = value.get("param_grid")?.get(0)?.get("pipeline_2_hash")?.get(0)?.as_str()?;
    hash.split('_').nth(1)?.parse().ok()
}

fn experiment_slug_of(arguments: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(arguments).ok()?;
    value.get("cnvrg_main_exp_slug")?.as_str().map(str::to_string)
}

fn decode<T>(
    source: &Source,
    rows: &[PgRow],
    map: impl Fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, DataAccessError> {
    rows.iter()
        .map(map)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| source.fetch_failed(e))
}

/// Id array selected as text, e.g. `{14,15}`.
fn id_list(row: &PgRow, column: &str) -> Result<Vec<i64>, sqlx::Error> {
    let text: Option<String> = row.try_get(column)?;
    parse_id_list(text.as_deref().unwrap_or_default()).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn labeled_row(row: &PgRow, with_data_source: bool) -> Result<LabeledEventRow, sqlx::Error> {
    Ok(LabeledEventRow {
        event_id: row.try_get("event_id")?,
        machine_id: row.try_get("machine_id")?,
        start_timestamp: row.try_get("start_timestamp")?,
        end_timestamp: row.try_get("end_timestamp")?,
        event_type_id: row.try_get("event_type_id")?,
        data_source_id: if with_data_source {
            row.try_get("data_source_id")?
        } else {
            None
        },
    })
}

pub struct PostgresRepository {
    options: PgConnectOptions,
}

impl PostgresRepository {
    pub fn new(settings: &DatabaseSettings) -> Self {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .database(&settings.name)
            .username(&settings.user)
            .password(&settings.password)
            .port(settings.port.unwrap_or(5432));
        Self { options }
    }

    async fn connect(&self, source: &Source) -> Result<PgConnection, DataAccessError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| source.connect_failed(e))
    }

    async fn fetch(&self, source: &Source, query: PgQuery<'_>) -> Result<Vec<PgRow>, DataAccessError> {
        let mut conn = self.connect(source).await?;
        let rows = query.fetch_all(&mut conn).await.map_err(|e| source.fetch_failed(e));
        if let Err(e) = conn.close().await {
            tracing::debug!("Closing connection to {} failed: {}", source.qualified(), e);
        }
        rows
    }

    async fn run_ids(&self, source: &Source, query: PgQuery<'_>) -> anyhow::Result<Vec<i64>> {
        let rows = self.fetch(source, query).await?;
        Ok(decode(source, &rows, |row| row.try_get::<i64, _>("run_id"))?)
    }
}

#[async_trait]
impl SensorRepository for PostgresRepository {
    async fn list_machines(&self) -> anyhow::Result<Vec<Machine>> {
        let query = sqlx::query(
            r#"
            SELECT machine_id::bigint AS machine_id, machine_name::text AS machine_name,
                   machine_type::text AS machine_type, description::text AS description,
                   local_timezone::text AS local_timezone, customer_machine_id::text AS customer_machine_id
            FROM preprocessed_raw_data.machines
            ORDER BY machine_id
            "#,
        );
        let rows = self.fetch(&MACHINES, query).await?;
        Ok(decode(&MACHINES, &rows, |row| {
            Ok(Machine {
                machine_id: row.try_get("machine_id")?,
                customer_machine_id: row.try_get::<Option<String>, _>("customer_machine_id")?.unwrap_or_default(),
                machine_name: row.try_get("machine_name")?,
                machine_type: row.try_get("machine_type")?,
                description: row.try_get("description")?,
                local_timezone: row.try_get("local_timezone")?,
            })
        })?)
    }

    async fn data_sources(&self, machine_id: i64) -> anyhow::Result<Vec<DataSource>> {
        let query = sqlx::query(
            r#"
            SELECT data_source_id::bigint AS data_source_id, short_name::text AS short_name,
                   customer_data_source_id::text AS customer_data_source_id,
                   data_source_name::text AS data_source_name
            FROM preprocessed_raw_data.data_sources
            WHERE machine_id = $1 AND has_value = True
            ORDER BY data_source_id
            "#,
        )
        .bind(machine_id);
        let rows = self.fetch(&DATA_SOURCES, query).await?;
        Ok(decode(&DATA_SOURCES, &rows, |row| {
            Ok(DataSource {
                data_source_id: row.try_get("data_source_id")?,
                machine_id,
                short_name: row.try_get("short_name")?,
                customer_data_source_id: row
                    .try_get::<Option<String>, _>("customer_data_source_id")?
                    .unwrap_or_default(),
                data_source_name: row.try_get("data_source_name")?,
            })
        })?)
    }

    async fn channel_statistics(&self, machine_id: i64, statistics_run_id: i64) -> anyhow::Result<Vec<ChannelStatistics>> {
        let query = sqlx::query(
            r#"
            SELECT d.data_source_id::bigint AS data_source_id, d.short_name::text AS short_name,
                   d.customer_data_source_id::text AS customer_data_source_id,
                   s.overall_rank::float8 AS overall_rank, s.is_periodic, s.has_modes_separation,
                   s.mode_count::float8 AS mode_count, s.count_val::float8 AS count_val,
                   s.mean_val::float8 AS mean_val, s.std_val::float8 AS std_val,
                   s.cov_val::float8 AS cov_val, s.entropy::float8 AS entropy
            FROM preprocessed_raw_data.data_sources d
            JOIN statistics_calculation.data_sources_statistics_mv s ON s.data_source_id = d.data_source_id
            WHERE d.machine_id = $1 AND d.has_value = True AND s.run_id = $2
            "#,
        )
        .bind(machine_id)
        .bind(statistics_run_id);
        let rows = self.fetch(&STATISTICS, query).await?;
        Ok(decode(&STATISTICS, &rows, |row| {
            Ok(ChannelStatistics {
                data_source_id: row.try_get("data_source_id")?,
                short_name: row.try_get("short_name")?,
                customer_data_source_id: row
                    .try_get::<Option<String>, _>("customer_data_source_id")?
                    .unwrap_or_default(),
                overall_rank: row.try_get("overall_rank")?,
                is_periodic: row.try_get("is_periodic")?,
                has_modes_separation: row.try_get("has_modes_separation")?,
                mode_count: row.try_get("mode_count")?,
                count_val: row.try_get("count_val")?,
                mean_val: row.try_get("mean_val")?,
                std_val: row.try_get("std_val")?,
                cov_val: row.try_get("cov_val")?,
                entropy: row.try_get("entropy")?,
            })
        })?)
    }

    async fn values(&self, data_source_ids: &[i64], window: TimeWindow) -> anyhow::Result<HashMap<i64, Vec<TimeSeriesPoint>>> {
        if data_source_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = sqlx::query(
            r#"
            SELECT n.data_source_id::bigint AS data_source_id, nvt.table_name::text AS table_name,
                   nvt.column_name::text AS column_name
            FROM preprocessed_raw_data.data_sources n
            JOIN preprocessed_raw_data.data_source_value_types nvt ON n.value_type_id = nvt.value_type_id
            WHERE n.has_value = True AND n.data_source_id = ANY($1)
            "#,
        )
        .bind(data_source_ids);
        let rows = self.fetch(&VALUE_TYPES, query).await?;
        let mappings = decode(&VALUE_TYPES, &rows, |row| {
            Ok((
                row.try_get::<String, _>("table_name")?,
                row.try_get::<String, _>("column_name")?,
                row.try_get::<i64, _>("data_source_id")?,
            ))
        })?;

        let mut per_table: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
        for (table, column, data_source_id) in mappings {
            per_table.entry((table, column)).or_default().push(data_source_id);
        }

        let mut values: HashMap<i64, Vec<TimeSeriesPoint>> = HashMap::new();
        for ((table, column), ids) in &per_table {
            let sql = format!(
                "SELECT data_source_id::bigint AS data_source_id, timestamp, {column}::float8 AS value \
                 FROM preprocessed_raw_data.{table} \
                 WHERE data_source_id = ANY($1) AND timestamp BETWEEN $2 AND $3 \
                 ORDER BY timestamp",
                column = checked_identifier(column)?,
                table = checked_identifier(table)?,
            );
            let query = sqlx::query(&sql).bind(ids.as_slice()).bind(window.start).bind(window.end);
            let rows = self.fetch(&VALUES, query).await?;
            tracing::debug!(table = %table, rows = rows.len(), "values fetched");
            for (data_source_id, point) in decode(&VALUES, &rows, |row| {
                let value: Option<f64> = row.try_get("value")?;
                Ok((
                    row.try_get::<i64, _>("data_source_id")?,
                    TimeSeriesPoint::at(row.try_get("timestamp")?, value.unwrap_or(f64::NAN)),
                ))
            })? {
                values.entry(data_source_id).or_default().push(point);
            }
        }
        Ok(values)
    }

    async fn channel_connections(&self) -> anyhow::Result<Vec<ChannelConnection>> {
        let query = sqlx::query(
            r#"
            SELECT machine_id::bigint AS machine_id,
                   data_source_actual_value::bigint AS actual,
                   data_source_nominal_value::bigint AS nominal,
                   data_source_standby_value::bigint AS standby
            FROM preprocessed_raw_data.data_sources_connections_v
            "#,
        );
        let rows = self.fetch(&CONNECTIONS, query).await?;
        Ok(decode(&CONNECTIONS, &rows, |row| {
            Ok(ChannelConnection {
                machine_id: row.try_get("machine_id")?,
                actual: row.try_get("actual")?,
                nominal: row.try_get("nominal")?,
                standby: row.try_get("standby")?,
            })
        })?)
    }

    async fn ingestion_rates(&self, machine_id: i64) -> anyhow::Result<Vec<IngestionRate>> {
        let query = sqlx::query(
            r#"
            SELECT timestamp, num_data_sources::bigint AS num_data_sources
            FROM dashboards.data_sources_with_data_per_hour
            WHERE machine_id = $1
            ORDER BY timestamp
            "#,
        )
        .bind(machine_id);
        let rows = self.fetch(&INGESTION, query).await?;
        Ok(decode(&INGESTION, &rows, |row| {
            Ok(IngestionRate {
                timestamp: row.try_get("timestamp")?,
                num_data_sources: row.try_get("num_data_sources")?,
            })
        })?)
    }

    async fn labeled_event_types(&self) -> anyhow::Result<BTreeMap<i32, String>> {
        let query = sqlx::query(
            r#"
            SELECT event_type_id::int4 AS event_type_id, event_type_name::text AS event_type_name
            FROM events.labeled_event_types
            "#,
        );
        let rows = self.fetch(&EVENT_TYPES, query).await?;
        let types = decode(&EVENT_TYPES, &rows, |row| {
            Ok((row.try_get::<i32, _>("event_type_id")?, row.try_get::<String, _>("event_type_name")?))
        })?;
        Ok(types.into_iter().collect())
    }

    async fn labeled_events(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<LabeledEventRow>> {
        let query = sqlx::query(
            r#"
            SELECT event_id::bigint AS event_id, machine_id::bigint AS machine_id,
                   start_timestamp, end_timestamp, event_type_id::int4 AS event_type_id
            FROM events.merged_calculated_labeled_events
            WHERE machine_id = $1 AND run_id = $2
            "#,
        )
        .bind(machine_id)
        .bind(run_id);
        let rows = self.fetch(&LABELED, query).await?;
        Ok(decode(&LABELED, &rows, |row| labeled_row(row, false))?)
    }

    async fn labeled_events_per_data_source(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<LabeledEventRow>> {
        let query = sqlx::query(
            r#"
            SELECT event_id::bigint AS event_id, machine_id::bigint AS machine_id,
                   start_timestamp, end_timestamp, event_type_id::int4 AS event_type_id,
                   data_source_id::bigint AS data_source_id
            FROM events.calculated_labeled_events_per_data_source
            WHERE machine_id = $1 AND run_id = $2
            "#,
        )
        .bind(machine_id)
        .bind(run_id);
        let rows = self.fetch(&LABELED_PER_DATA_SOURCE, query).await?;
        Ok(decode(&LABELED_PER_DATA_SOURCE, &rows, |row| labeled_row(row, true))?)
    }

    async fn predicted_events(&self, machine_id: i64, run_id: i64) -> anyhow::Result<Vec<Event>> {
        let query = sqlx::query(
            r#"
            SELECT event_id::bigint AS event_id, start_timestamp, end_timestamp,
                   num_anomalies::bigint AS num_anomalies, anomaly_id_list::text AS anomaly_id_list
            FROM events.predicted_events
            WHERE machine_id = $1 AND run_id = $2
            "#,
        )
        .bind(machine_id)
        .bind(run_id);
        let rows = self.fetch(&PREDICTED_EVENTS, query).await?;
        Ok(decode(&PREDICTED_EVENTS, &rows, |row| {
            let anomaly_ids = id_list(row, "anomaly_id_list")?;
            let num_anomalies: Option<i64> = row.try_get("num_anomalies")?;
            Ok(Event {
                event_id: row.try_get("event_id")?,
                machine_id,
                start_timestamp: row.try_get("start_timestamp")?,
                end_timestamp: row.try_get("end_timestamp")?,
                label_name: "Predicted".to_string(),
                source_table: PREDICTED_EVENTS.qualified(),
                data_source_ids: Vec::new(),
                details: EventDetails::Predicted {
                    num_anomalies: num_anomalies.map_or(anomaly_ids.len(), |n| usize::try_from(n).unwrap_or_default()),
                    anomaly_ids,
                },
            })
        })?)
    }

    async fn predicted_anomalies(
        &self,
        machine_id: i64,
        run_id: i64,
        anomaly_ids: Option<&[i64]>,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<AnomalyRecord>> {
        let query = sqlx::query(
            r#"
            SELECT anomaly_id::bigint AS anomaly_id, data_source_id::bigint AS data_source_id,
                   model_type::text AS model_type, timestamp
            FROM events.predicted_anomalies
            WHERE machine_id = $1 AND run_id = $2
              AND timestamp BETWEEN $3 AND $4
              AND ($5::bigint[] IS NULL OR anomaly_id = ANY($5))
            ORDER BY timestamp
            "#,
        )
        .bind(machine_id)
        .bind(run_id)
        .bind(window.start)
        .bind(window.end)
        .bind(anomaly_ids);
        let rows = self.fetch(&PREDICTED_ANOMALIES, query).await?;
        Ok(decode(&PREDICTED_ANOMALIES, &rows, |row| {
            Ok(AnomalyRecord {
                anomaly_id: row.try_get("anomaly_id")?,
                machine_id,
                data_source_id: row.try_get("data_source_id")?,
                model_type: row.try_get::<Option<String>, _>("model_type")?.unwrap_or_default(),
                timestamp: row.try_get("timestamp")?,
            })
        })?)
    }

    async fn severities(&self, event_id: i64) -> anyhow::Result<Vec<SeverityRecord>> {
        let query = sqlx::query(
            r#"
            SELECT data_source_id::bigint AS data_source_id, severity::float8 AS severity
            FROM events.predicted_events_severity
            WHERE event_id = $1
            ORDER BY severity DESC
            "#,
        )
        .bind(event_id);
        let rows = self.fetch(&SEVERITIES, query).await?;
        Ok(decode(&SEVERITIES, &rows, |row| {
            Ok(SeverityRecord {
                event_id,
                data_source_id: row.try_get("data_source_id")?,
                severity: row.try_get("severity")?,
            })
        })?)
    }

    async fn reconstruction(
        &self,
        experiment_slug: &str,
        data_source_ids: &[i64],
        window: TimeWindow,
    ) -> anyhow::Result<ReconstructionSeries> {
        let query = sqlx::query(
            r#"
            SELECT data_source_id::bigint AS data_source_id, alg_name::text AS alg_name,
                   timestamp, value::float8 AS value
            FROM algo.reconstruction_results
            WHERE meta_experiment_slug = $1 AND data_source_id = ANY($2)
              AND timestamp BETWEEN $3 AND $4
            ORDER BY timestamp
            "#,
        )
        .bind(experiment_slug)
        .bind(data_source_ids)
        .bind(window.start)
        .bind(window.end);
        let rows = self.fetch(&RECONSTRUCTION, query).await?;
        let samples = decode(&RECONSTRUCTION, &rows, |row| {
            Ok((
                row.try_get::<i64, _>("data_source_id")?,
                row.try_get::<String, _>("alg_name")?,
                TimeSeriesPoint::at(row.try_get("timestamp")?, row.try_get("value")?),
            ))
        })?;

        let mut series = ReconstructionSeries::new();
        for (data_source_id, algorithm, point) in samples {
            series
                .entry(data_source_id)
                .or_default()
                .entry(algorithm)
                .or_default()
                .push(point);
        }
        Ok(series)
    }

    async fn statistics_run_ids(&self) -> anyhow::Result<Vec<i64>> {
        let query = sqlx::query(
            r#"
            SELECT DISTINCT run_id::bigint AS run_id
            FROM statistics_calculation.data_sources_statistics_mv
            ORDER BY run_id DESC
            "#,
        );
        self.run_ids(&STATISTICS_RUNS, query).await
    }

    async fn labeled_events_run_ids(&self) -> anyhow::Result<Vec<i64>> {
        let query = sqlx::query(
            r#"
            SELECT DISTINCT run_id::bigint AS run_id
            FROM events.merged_calculated_labeled_events
            ORDER BY run_id DESC
            "#,
        );
        self.run_ids(&LABELED_RUNS, query).await
    }

    async fn training_runs(&self) -> anyhow::Result<Vec<TrainingRun>> {
        let query = sqlx::query(
            r#"
            SELECT main_experiment_slug::text AS main_experiment_slug,
                   configuration_json::text AS configuration_json, start_timestamp
            FROM algo.metadata_pipeline_3
            WHERE pipeline_3_type = 'TRAIN'
            "#,
        );
        let rows = self.fetch(&TRAINING_RUNS, query).await?;
        Ok(decode(&TRAINING_RUNS, &rows, |row| {
            let configuration: Option<String> = row.try_get("configuration_json")?;
            Ok(TrainingRun {
                main_experiment_slug: row.try_get("main_experiment_slug")?,
                labeled_events_version: configuration.as_deref().and_then(labeled_version_of),
                start_timestamp: row.try_get("start_timestamp")?,
            })
        })?)
    }

    async fn experiment_slugs_with_events(&self) -> anyhow::Result<Vec<String>> {
        let query = sqlx::query(
            r#"
            SELECT arguments::text AS arguments
            FROM pipelines_runs.runs
            WHERE pipeline_id = $1
            "#,
        )
        .bind(EVENTS_DETECTION_PIPELINE);
        let rows = self.fetch(&PIPELINE_RUNS, query).await?;
        let arguments = decode(&PIPELINE_RUNS, &rows, |row| row.try_get::<Option<String>, _>("arguments"))?;

        let mut slugs: Vec<String> = arguments.iter().flatten().filter_map(|a| experiment_slug_of(a)).collect();
        slugs.sort();
        slugs.dedup();
        Ok(slugs)
    }

    async fn events_run_ids(&self, experiment_slug: &str) -> anyhow::Result<Vec<i64>> {
        let query = sqlx::query(
            r#"
            SELECT DISTINCT run_id::bigint AS run_id
            FROM events.events_detection_metadata_view
            WHERE meta_experiment_slug = $1
            ORDER BY run_id DESC
            "#,
        )
        .bind(experiment_slug);
        self.run_ids(&EVENTS_RUNS, query).await
    }
}

#[async_trait]
impl ManualEventStore for PostgresRepository {
    async fn load(&self, include_deprecated: bool) -> anyhow::Result<Vec<Event>> {
        let query = sqlx::query(
            r#"
            SELECT event_id::bigint AS event_id, label_name::text AS label_name,
                   machine_id::bigint AS machine_id, data_sources_list::text AS data_sources_list,
                   start_timestamp, end_timestamp, username::text AS username, insert_timestamp,
                   pipelines_configurations::text AS pipelines_configurations, is_deprecated
            FROM algo.manually_tagged_events
            WHERE $1 OR is_deprecated = False
            ORDER BY event_id
            "#,
        )
        .bind(include_deprecated);
        let rows = self.fetch(&MANUAL_EVENTS, query).await?;
        Ok(decode(&MANUAL_EVENTS, &rows, |row| {
            Ok(Event {
                event_id: row.try_get("event_id")?,
                machine_id: row.try_get("machine_id")?,
                start_timestamp: row.try_get("start_timestamp")?,
                end_timestamp: row.try_get("end_timestamp")?,
                label_name: row
                    .try_get::<Option<String>, _>("label_name")?
                    .unwrap_or_else(|| MANUAL_LABEL.to_string()),
                source_table: MANUAL_EVENTS.qualified(),
                data_source_ids: id_list(row, "data_sources_list")?,
                details: EventDetails::Manual(ManualEventInfo {
                    username: row.try_get::<Option<String>, _>("username")?.unwrap_or_default(),
                    insert_timestamp: row.try_get("insert_timestamp")?,
                    pipelines_configurations: row
                        .try_get::<Option<String>, _>("pipelines_configurations")?
                        .unwrap_or_default(),
                    is_deprecated: row.try_get::<Option<bool>, _>("is_deprecated")?.unwrap_or(false),
                }),
            })
        })?)
    }

    async fn append(&self, event: &NewManualEvent) -> anyhow::Result<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO algo.manually_tagged_events
                (label_name, machine_id, data_sources_list, start_timestamp, end_timestamp,
                 username, insert_timestamp, pipelines_configurations, is_deprecated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::json, False)
            "#,
        )
        .bind(MANUAL_LABEL)
        .bind(event.machine_id)
        .bind(event.data_source_ids.as_slice())
        .bind(event.window.start)
        .bind(event.window.end)
        .bind(&event.username)
        .bind(event.insert_timestamp)
        .bind(&event.pipelines_configurations);

        let mut conn = self.connect(&MANUAL_EVENTS).await?;
        let result = query.execute(&mut conn).await;
        if let Err(e) = conn.close().await {
            tracing::debug!("Closing connection to {} failed: {}", MANUAL_EVENTS.qualified(), e);
        }
        result.map_err(|e| MANUAL_EVENTS.write_failed(e))?;
        Ok(())
    }

    async fn deprecate(&self, key: &ManualEventKey) -> anyhow::Result<UntagOutcome> {
        tracing::info!("Manually tagged event {} will be marked as deprecated", key.event_id);
        let mut conn = self.connect(&MANUAL_EVENTS).await?;

        let matches: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM algo.manually_tagged_events
            WHERE machine_id = $1 AND start_timestamp = $2 AND end_timestamp = $3 AND username = $4
            "#,
        )
        .bind(key.machine_id)
        .bind(key.start_timestamp)
        .bind(key.end_timestamp)
        .bind(&key.username)
        .fetch_one(&mut conn)
        .await
        .map_err(|e| MANUAL_EVENTS.fetch_failed(e))?;

        let outcome = outcome_for(usize::try_from(matches).unwrap_or_default());
        if outcome == UntagOutcome::Deprecated {
            sqlx::query(
                r#"
                UPDATE algo.manually_tagged_events
                SET is_deprecated = True
                WHERE machine_id = $1 AND start_timestamp = $2 AND end_timestamp = $3 AND username = $4
                "#,
            )
            .bind(key.machine_id)
            .bind(key.start_timestamp)
            .bind(key.end_timestamp)
            .bind(&key.username)
            .execute(&mut conn)
            .await
            .map_err(|e| MANUAL_EVENTS.write_failed(e))?;
        }

        if let Err(e) = conn.close().await {
            tracing::debug!("Closing connection to {} failed: {}", MANUAL_EVENTS.qualified(), e);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_checked_before_interpolation() {
        assert_eq!(checked_identifier("float_values").unwrap(), "float_values");
        assert_eq!(checked_identifier("value2").unwrap(), "value2");
        assert!(checked_identifier("values; DROP TABLE machines").is_err());
        assert!(checked_identifier("public.values").is_err());
        assert!(checked_identifier("").is_err());
    }

    #[test]
    fn test_training_configuration_parsing() {
        let configuration = r#"{"param_grid": [{"pipeline_2_hash": ["hash_42_x"]}]}"#;
        assert_eq!(labeled_version_of(configuration), Some(42));
        assert_eq!(labeled_version_of(r#"{"param_grid": []}"#), None);
        assert_eq!(labeled_version_of("not json"), None);

        assert_eq!(
            experiment_slug_of(r#"{"cnvrg_main_exp_slug": "exp-a", "other": 1}"#).as_deref(),
            Some("exp-a")
        );
        assert_eq!(experiment_slug_of("{}"), None);
    }
}
