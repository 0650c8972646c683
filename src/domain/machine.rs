// Machine and data-source (sensor channel) domain models
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NameError {
    #[error("'{0}' is not a valid '<id>-<label>' name")]
    Invalid(String),
}

/// Parses the numeric id in front of a `"<id>-<label>"` display name.
fn id_from_name(name: &str) -> Result<i64, NameError> {
    name.split('-')
        .next()
        .and_then(|id| id.trim().parse::<i64>().ok())
        .ok_or_else(|| NameError::Invalid(name.to_string()))
}

pub fn machine_id_from_name(name: &str) -> Result<i64, NameError> {
    id_from_name(name)
}

pub fn data_source_id_from_name(name: &str) -> Result<i64, NameError> {
    id_from_name(name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: i64,
    pub customer_machine_id: String,
    pub machine_name: Option<String>,
    pub machine_type: Option<String>,
    pub description: Option<String>,
    pub local_timezone: Option<String>,
}

impl Machine {
    pub fn new(machine_id: i64, customer_machine_id: impl Into<String>) -> Self {
        Self {
            machine_id,
            customer_machine_id: customer_machine_id.into(),
            machine_name: None,
            machine_type: None,
            description: None,
            local_timezone: None,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{}-{}", self.machine_id, self.customer_machine_id)
    }
}

/// Static machine catalog, loaded once per session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MachineCatalog {
    machines: BTreeMap<i64, Machine>,
}

impl MachineCatalog {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self {
            machines: machines.into_iter().map(|m| (m.machine_id, m)).collect(),
        }
    }

    /// Machines used when the store cannot be reached.
    pub fn fallback() -> Self {
        Self::new(vec![
            Machine::new(1, "10051158"),
            Machine::new(2, "10051164"),
            Machine::new(3, "10051167"),
            Machine::new(4, "10051173"),
            Machine::new(5, "10052000"),
        ])
    }

    pub fn get(&self, machine_id: i64) -> Option<&Machine> {
        self.machines.get(&machine_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.machines.keys().copied().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.machines.values().map(Machine::display_name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub data_source_id: i64,
    pub machine_id: i64,
    pub short_name: Option<String>,
    pub customer_data_source_id: String,
    pub data_source_name: Option<String>,
}

impl DataSource {
    /// Short name unless it is blank or the literal "None".
    pub fn display_label(&self) -> &str {
        match self.short_name.as_deref() {
            Some(name) if !name.is_empty() && name != "None" => name,
            _ => &self.customer_data_source_id,
        }
    }
}

/// Channels of one machine, keyed by data source id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelCatalog {
    labels: BTreeMap<i64, String>,
}

impl ChannelCatalog {
    pub fn new(data_sources: &[DataSource]) -> Self {
        Self {
            labels: data_sources
                .iter()
                .map(|ds| (ds.data_source_id, ds.display_label().to_string()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn name_of(&self, data_source_id: i64) -> Option<String> {
        self.labels
            .get(&data_source_id)
            .map(|label| format!("{}-{}", data_source_id, label))
    }

    /// Names for `ids`, in the order given. Ids missing from the catalog are dropped.
    pub fn names(&self, ids: &[i64]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| {
                let name = self.name_of(*id);
                if name.is_none() {
                    tracing::warn!(data_source_id = id, "channel is not part of the machine catalog");
                }
                name
            })
            .collect()
    }
}

/// Companion channels (nominal / standby) of an "actual value" channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConnection {
    pub machine_id: i64,
    pub actual: i64,
    pub nominal: Option<i64>,
    pub standby: Option<i64>,
}

pub fn companions_of(connections: &[ChannelConnection], machine_id: i64, actual: i64) -> Option<&ChannelConnection> {
    connections
        .iter()
        .find(|c| c.machine_id == machine_id && c.actual == actual)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub data_source_id: i64,
    pub short_name: Option<String>,
    pub customer_data_source_id: String,
    pub overall_rank: Option<f64>,
    pub is_periodic: Option<bool>,
    pub has_modes_separation: Option<bool>,
    pub mode_count: Option<f64>,
    pub count_val: Option<f64>,
    pub mean_val: Option<f64>,
    pub std_val: Option<f64>,
    pub cov_val: Option<f64>,
    pub entropy: Option<f64>,
}

fn round2(value: Option<f64>) -> Option<f64> {
    value.map(|v| (v * 100.0).round() / 100.0)
}

/// Rounds to two decimals and orders by cov, std and entropy, all descending.
pub fn rank_statistics(mut stats: Vec<ChannelStatistics>) -> Vec<ChannelStatistics> {
    for s in stats.iter_mut() {
        s.overall_rank = round2(s.overall_rank);
        s.mode_count = round2(s.mode_count);
        s.count_val = round2(s.count_val);
        s.mean_val = round2(s.mean_val);
        s.std_val = round2(s.std_val);
        s.cov_val = round2(s.cov_val);
        s.entropy = round2(s.entropy);
    }
    let key = |s: &ChannelStatistics| {
        (
            s.cov_val.unwrap_or(f64::NEG_INFINITY),
            s.std_val.unwrap_or(f64::NEG_INFINITY),
            s.entropy.unwrap_or(f64::NEG_INFINITY),
        )
    };
    stats.sort_by(|a, b| {
        let (a, b) = (key(a), key(b));
        b.0.total_cmp(&a.0)
            .then(b.1.total_cmp(&a.1))
            .then(b.2.total_cmp(&a.2))
    });
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRate {
    pub timestamp: chrono::NaiveDateTime,
    pub num_data_sources: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_source(id: i64, short_name: Option<&str>, customer: &str) -> DataSource {
        DataSource {
            data_source_id: id,
            machine_id: 2,
            short_name: short_name.map(str::to_string),
            customer_data_source_id: customer.to_string(),
            data_source_name: None,
        }
    }

    #[test]
    fn test_names_parse_leading_id() {
        assert_eq!(machine_id_from_name("2-10051164"), Ok(2));
        assert_eq!(data_source_id_from_name("14-PressureA"), Ok(14));
        assert!(machine_id_from_name("PressureA").is_err());
    }

    #[test]
    fn test_display_label_falls_back_to_customer_id() {
        let catalog = ChannelCatalog::new(&[
            data_source(14, Some("PressureA"), "P-1"),
            data_source(15, Some(""), "P-2"),
            data_source(16, Some("None"), "P-3"),
            data_source(17, None, "P-4"),
        ]);
        assert_eq!(catalog.names(&[14, 15, 16, 17]), vec!["14-PressureA", "15-P-2", "16-P-3", "17-P-4"]);
    }

    #[test]
    fn test_catalog_names_keep_requested_order() {
        let catalog = ChannelCatalog::new(&[
            data_source(14, Some("PressureA"), "x"),
            data_source(15, Some("PressureB"), "y"),
        ]);

        assert_eq!(catalog.names(&[15, 99, 14]), vec!["15-PressureB", "14-PressureA"]);
    }

    #[test]
    fn test_fallback_machine_names() {
        let catalog = MachineCatalog::fallback();
        assert_eq!(catalog.names()[1], "2-10051164");
        assert_eq!(catalog.ids(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rank_statistics_orders_by_cov_then_std() {
        let stat = |id, cov, std| ChannelStatistics {
            data_source_id: id,
            short_name: None,
            customer_data_source_id: id.to_string(),
            overall_rank: None,
            is_periodic: None,
            has_modes_separation: None,
            mode_count: None,
            count_val: None,
            mean_val: None,
            std_val: Some(std),
            cov_val: Some(cov),
            entropy: None,
        };
        let ranked = rank_statistics(vec![stat(1, 0.5, 1.0), stat(2, 0.912, 1.0), stat(3, 0.5, 2.0)]);

        let ids: Vec<i64> = ranked.iter().map(|s| s.data_source_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(ranked[0].cov_val, Some(0.91));
    }
}
