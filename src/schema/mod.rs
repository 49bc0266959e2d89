//! Raw-layer table schemas
//!
//! Everything ingested into the raw layer lands as STRING columns with two
//! audit columns appended. This module holds the schema model shared by the
//! warehouse path and the artifact generator, plus:
//! - `inference`: header names -> normalized `TableSchema`
//! - `advisor`: partition / clustering / expiration recommendations

pub mod advisor;
pub mod inference;

pub use advisor::{OptimizationAdvisor, Recommendation};
pub use inference::SchemaInference;

use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Dataset and table names accepted by the warehouse
pub static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,1023}$").expect("static regex"));

pub fn validate_identifier(kind: &str, value: &str) -> Result<(), AppError> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{} name '{}' must start with a letter or underscore and contain only letters, digits and underscores",
            kind, value
        )))
    }
}

/// Column types the raw layer can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }
}

/// One source column as discovered in the landing file header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub raw_name: String,
    pub normalized_name: String,
    pub inferred_type: ColumnType,
    /// 1-based position in the source header
    pub ordinal_position: usize,
}

/// Fixed lineage column appended to every raw table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditColumn {
    pub name: &'static str,
    pub data_type: ColumnType,
    pub default_expression: &'static str,
    pub description: &'static str,
}

pub const BATCH_DATE: &str = "batch_date";
pub const PROCESSED_AT: &str = "db_prcsd_dttm";

/// Audit columns, always last and in this order.
pub const AUDIT_COLUMNS: [AuditColumn; 2] = [
    AuditColumn {
        name: BATCH_DATE,
        data_type: ColumnType::Date,
        default_expression: "DATE '9999-12-31'",
        description: "Business date of the ingestion batch",
    },
    AuditColumn {
        name: PROCESSED_AT,
        data_type: ColumnType::Timestamp,
        default_expression: "CURRENT_TIMESTAMP",
        description: "Timestamp the row was processed into the raw layer",
    },
];

pub fn is_audit_column(name: &str) -> bool {
    AUDIT_COLUMNS.iter().any(|c| c.name == name)
}

/// `dataset.table` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionGranularity {
    Day,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    pub column: String,
    pub column_type: ColumnType,
    pub granularity: PartitionGranularity,
}

/// Physical layout the caller approved (either the advisor's or an override)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPlan {
    pub partition_column: Option<String>,
    #[serde(default)]
    pub cluster_columns: Vec<String>,
    pub expiration_days: Option<u32>,
}

/// A raw-layer table definition
///
/// The same value feeds `Warehouse::create_table` and the artifact renderers,
/// so the executed table and the generated DDL can never diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub dataset: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    audit_columns: &'static [AuditColumn],
    pub partition: Option<PartitionSpec>,
    pub cluster_columns: Vec<String>,
    pub expiration_days: Option<u32>,
}

impl TableSchema {
    pub(crate) fn new(
        dataset: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
            columns,
            audit_columns: &AUDIT_COLUMNS,
            partition: None,
            cluster_columns: Vec::new(),
            expiration_days: None,
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.dataset, &self.table)
    }

    pub fn audit_columns(&self) -> &'static [AuditColumn] {
        self.audit_columns
    }

    /// Every physical column in order: source columns, then audit columns.
    pub fn all_columns(&self) -> Vec<(&str, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.normalized_name.as_str(), c.inferred_type))
            .chain(self.audit_columns.iter().map(|a| (a.name, a.data_type)))
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.all_columns()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Apply an approved layout.
    ///
    /// A source column chosen as partition key is promoted from STRING to
    /// DATE (TIMESTAMP for time-like names) so the key is always temporal.
    pub fn apply_layout(&mut self, layout: &LayoutPlan, max_cluster_columns: usize) -> Result<(), AppError> {
        let partition = match &layout.partition_column {
            Some(name) => Some(self.resolve_partition(name)?),
            None => None,
        };

        if layout.expiration_days.is_some() && partition.is_none() {
            return Err(AppError::Validation(
                "Partition expiration requires a partition column".to_string(),
            ));
        }
        if layout.expiration_days == Some(0) {
            return Err(AppError::Validation(
                "Partition expiration must be at least one day".to_string(),
            ));
        }
        if layout.cluster_columns.len() > max_cluster_columns {
            return Err(AppError::Validation(format!(
                "At most {} clustering columns are allowed, got {}",
                max_cluster_columns,
                layout.cluster_columns.len()
            )));
        }

        let mut seen = HashSet::new();
        for name in &layout.cluster_columns {
            if is_audit_column(name) {
                return Err(AppError::Validation(format!(
                    "Audit column '{}' cannot be a clustering column",
                    name
                )));
            }
            if !self.columns.iter().any(|c| &c.normalized_name == name) {
                return Err(AppError::Validation(format!(
                    "Clustering column '{}' is not in {}",
                    name,
                    self.table_ref()
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(AppError::Validation(format!(
                    "Clustering column '{}' listed twice",
                    name
                )));
            }
        }

        if let Some(spec) = &partition {
            if let Some(col) = self
                .columns
                .iter_mut()
                .find(|c| c.normalized_name == spec.column)
            {
                col.inferred_type = spec.column_type;
            }
        }
        self.partition = partition;
        self.cluster_columns = layout.cluster_columns.clone();
        self.expiration_days = layout.expiration_days;
        Ok(())
    }

    fn resolve_partition(&self, name: &str) -> Result<PartitionSpec, AppError> {
        if let Some(audit) = self.audit_columns.iter().find(|a| a.name == name) {
            return Ok(PartitionSpec {
                column: audit.name.to_string(),
                column_type: audit.data_type,
                granularity: PartitionGranularity::Day,
            });
        }

        let column = self
            .columns
            .iter()
            .find(|c| c.normalized_name == name)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Partition column '{}' is not in {}",
                    name,
                    self.table_ref()
                ))
            })?;

        let column_type = if column.inferred_type.is_temporal() {
            column.inferred_type
        } else {
            advisor::temporal_type_for(&column.raw_name).ok_or_else(|| {
                AppError::Validation(format!(
                    "Column '{}' does not look like a date or timestamp and cannot partition the table",
                    name
                ))
            })?
        };

        Ok(PartitionSpec {
            column: column.normalized_name.clone(),
            column_type,
            granularity: PartitionGranularity::Day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        SchemaInference::infer("sales", "sales_raw", &["Txn Date", "Customer ID", "Amount"])
            .unwrap()
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("table", "sales_raw").is_ok());
        assert!(validate_identifier("dataset", "_staging2").is_ok());
        assert!(validate_identifier("table", "2sales").is_err());
        assert!(validate_identifier("table", "sales-raw").is_err());
        assert!(validate_identifier("table", "").is_err());
    }

    #[test]
    fn test_audit_columns_are_last() {
        let schema = schema();
        let cols = schema.all_columns();
        assert_eq!(cols.len(), 5);
        assert_eq!(cols[3], (BATCH_DATE, ColumnType::Date));
        assert_eq!(cols[4], (PROCESSED_AT, ColumnType::Timestamp));
    }

    #[test]
    fn test_apply_layout_promotes_partition_column() {
        let mut schema = schema();
        let layout = LayoutPlan {
            partition_column: Some("txn_date".to_string()),
            cluster_columns: vec!["customer_id".to_string()],
            expiration_days: Some(30),
        };
        schema.apply_layout(&layout, 4).unwrap();

        let partition = schema.partition.as_ref().unwrap();
        assert_eq!(partition.column, "txn_date");
        assert_eq!(partition.column_type, ColumnType::Date);
        assert_eq!(schema.columns[0].inferred_type, ColumnType::Date);
        assert_eq!(schema.columns[1].inferred_type, ColumnType::String);
    }

    #[test]
    fn test_apply_layout_accepts_audit_partition() {
        let mut schema = schema();
        let layout = LayoutPlan {
            partition_column: Some(BATCH_DATE.to_string()),
            ..LayoutPlan::default()
        };
        schema.apply_layout(&layout, 4).unwrap();
        assert_eq!(schema.partition.unwrap().column_type, ColumnType::Date);
    }

    #[test]
    fn test_apply_layout_rejects_non_temporal_partition() {
        let mut schema = schema();
        let layout = LayoutPlan {
            partition_column: Some("amount".to_string()),
            ..LayoutPlan::default()
        };
        assert!(schema.apply_layout(&layout, 4).is_err());
        assert!(schema.partition.is_none());
    }

    #[test]
    fn test_apply_layout_rejects_audit_clustering() {
        let mut schema = schema();
        let layout = LayoutPlan {
            cluster_columns: vec![PROCESSED_AT.to_string()],
            ..LayoutPlan::default()
        };
        assert!(schema.apply_layout(&layout, 4).is_err());
    }

    #[test]
    fn test_apply_layout_enforces_cluster_cap() {
        let mut schema = schema();
        let layout = LayoutPlan {
            cluster_columns: vec!["customer_id".to_string(), "amount".to_string()],
            ..LayoutPlan::default()
        };
        assert!(schema.apply_layout(&layout, 1).is_err());
    }
}
