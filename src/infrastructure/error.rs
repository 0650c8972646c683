// Data access error shared by the store adapters
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The one error kind data access surfaces, naming what was being read or written.
#[derive(Debug, Error)]
pub enum DataAccessError {
    /// The connection itself could not be opened.
    #[error("Failed fetching from {schema}.{table} columns [{columns}] due to: {source}")]
    Connect {
        schema: String,
        table: String,
        columns: String,
        source: BoxError,
    },
    #[error("Failed fetching from {schema}.{table} columns [{columns}] due to: {source}")]
    Fetch {
        schema: String,
        table: String,
        columns: String,
        source: BoxError,
    },
    #[error("Failed writing to {schema}.{table} columns [{columns}] due to: {source}")]
    Write {
        schema: String,
        table: String,
        columns: String,
        source: BoxError,
    },
}

/// A schema.table with the columns an operation touches.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub schema: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl Source {
    pub const fn new(schema: &'static str, table: &'static str, columns: &'static [&'static str]) -> Self {
        Self { schema, table, columns }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn connect_failed(&self, source: impl Into<BoxError>) -> DataAccessError {
        let error = DataAccessError::Connect {
            schema: self.schema.to_string(),
            table: self.table.to_string(),
            columns: self.columns.join(", "),
            source: source.into(),
        };
        tracing::error!("{}", error);
        error
    }

    pub fn fetch_failed(&self, source: impl Into<BoxError>) -> DataAccessError {
        let error = DataAccessError::Fetch {
            schema: self.schema.to_string(),
            table: self.table.to_string(),
            columns: self.columns.join(", "),
            source: source.into(),
        };
        tracing::error!("{}", error);
        error
    }

    pub fn write_failed(&self, source: impl Into<BoxError>) -> DataAccessError {
        let error = DataAccessError::Write {
            schema: self.schema.to_string(),
            table: self.table.to_string(),
            columns: self.columns.join(", "),
            source: source.into(),
        };
        tracing::error!("{}", error);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_schema_table_and_columns() {
        let source = Source::new("preprocessed_raw_data", "machines", &["machine_id", "customer_machine_id"]);
        let error = source.fetch_failed("connection refused");
        assert_eq!(
            error.to_string(),
            "Failed fetching from preprocessed_raw_data.machines columns [machine_id, customer_machine_id] due to: connection refused"
        );
        assert!(matches!(source.connect_failed("timeout"), DataAccessError::Connect { .. }));
        assert!(source.write_failed("read only").to_string().starts_with("Failed writing to preprocessed_raw_data.machines"));
    }
}
