//! Optimization Advisor
//!
//! Suggests a physical layout from column-name heuristics. The advisor only
//! recommends: it never touches a schema. The orchestrator applies a layout
//! after the caller accepts or overrides it.

use crate::schema::inference::normalize_name;
use crate::schema::{
    ColumnType, LayoutPlan, PartitionGranularity, TableSchema, BATCH_DATE,
};
use serde::Serialize;

const TEMPORAL_TOKENS: &[&str] = &["date", "dt", "dttm", "time", "timestamp", "ts", "datetime"];
const TIME_LIKE_TOKENS: &[&str] = &["time", "timestamp", "ts", "dttm", "datetime"];
const IDENTIFIER_TOKENS: &[&str] = &["id", "key", "uuid", "guid", "code", "country"];

fn tokens(raw_name: &str) -> Vec<String> {
    normalize_name(raw_name)
        .split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_temporal_token(token: &str) -> bool {
    TEMPORAL_TOKENS.contains(&token)
        || (token.ends_with("date") && !token.ends_with("update"))
        || token.ends_with("dttm")
        || token.ends_with("timestamp")
}

/// Temporal type a column name suggests, if any.
pub fn temporal_type_for(raw_name: &str) -> Option<ColumnType> {
    let tokens = tokens(raw_name);
    if !tokens.iter().any(|t| is_temporal_token(t)) {
        return None;
    }
    let time_like = tokens
        .iter()
        .any(|t| TIME_LIKE_TOKENS.contains(&t.as_str()) || t.ends_with("dttm") || t.ends_with("timestamp"));
    Some(if time_like {
        ColumnType::Timestamp
    } else {
        ColumnType::Date
    })
}

pub fn looks_like_identifier(raw_name: &str) -> bool {
    tokens(raw_name)
        .iter()
        .any(|t| IDENTIFIER_TOKENS.contains(&t.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionAdvice {
    pub column: String,
    pub column_type: ColumnType,
    pub granularity: PartitionGranularity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationPolicy {
    pub partition_expiration_days: u32,
}

/// Layout recommendation presented for approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub partition: Option<PartitionAdvice>,
    pub cluster_columns: Vec<String>,
    pub expiration: Option<ExpirationPolicy>,
    /// Every column flagged as a partition candidate, in header order
    pub partition_candidates: Vec<String>,
    /// Every column flagged as a clustering candidate, in header order
    pub cluster_candidates: Vec<String>,
    pub notes: Vec<String>,
}

impl Recommendation {
    pub fn to_layout(&self) -> LayoutPlan {
        LayoutPlan {
            partition_column: self.partition.as_ref().map(|p| p.column.clone()),
            cluster_columns: self.cluster_columns.clone(),
            expiration_days: self.expiration.as_ref().map(|e| e.partition_expiration_days),
        }
    }
}

pub struct OptimizationAdvisor {
    max_cluster_columns: usize,
    expiration_days: u32,
}

impl OptimizationAdvisor {
    pub fn new(max_cluster_columns: usize, expiration_days: u32) -> Self {
        Self {
            max_cluster_columns,
            expiration_days,
        }
    }

    /// Inspect the source columns (audit columns excluded) of a schema.
    pub fn recommend(&self, schema: &TableSchema) -> Recommendation {
        let mut partition_candidates = Vec::new();
        let mut cluster_candidates = Vec::new();
        let mut partition: Option<PartitionAdvice> = None;

        for column in &schema.columns {
            if let Some(column_type) = temporal_type_for(&column.raw_name) {
                partition_candidates.push(column.normalized_name.clone());
                if partition.is_none() {
                    partition = Some(PartitionAdvice {
                        column: column.normalized_name.clone(),
                        column_type,
                        granularity: PartitionGranularity::Day,
                    });
                }
            }
        }

        let partition_column = partition.as_ref().map(|p| p.column.as_str());
        for column in &schema.columns {
            if Some(column.normalized_name.as_str()) == partition_column {
                continue;
            }
            if looks_like_identifier(&column.raw_name) {
                cluster_candidates.push(column.normalized_name.clone());
            }
        }

        let cluster_columns: Vec<String> = cluster_candidates
            .iter()
            .take(self.max_cluster_columns)
            .cloned()
            .collect();

        let mut notes = Vec::new();
        match &partition {
            Some(p) => notes.push(format!(
                "Partition by {} (DAY) with {}-day partition expiration",
                p.column, self.expiration_days
            )),
            None => notes.push(format!(
                "No date-like source column; {} is available as an ingestion partition key",
                BATCH_DATE
            )),
        }
        if cluster_candidates.len() > cluster_columns.len() {
            notes.push(format!(
                "{} clustering candidates found, keeping the first {}",
                cluster_candidates.len(),
                self.max_cluster_columns
            ));
        }

        let expiration = partition.as_ref().map(|_| ExpirationPolicy {
            partition_expiration_days: self.expiration_days,
        });

        Recommendation {
            partition,
            cluster_columns,
            expiration,
            partition_candidates,
            cluster_candidates,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInference;
    use pretty_assertions::assert_eq;

    fn recommend(header: &[&str], max_cluster: usize) -> Recommendation {
        let schema = SchemaInference::infer("d", "t", header).unwrap();
        OptimizationAdvisor::new(max_cluster, 365).recommend(&schema)
    }

    #[test]
    fn test_scenario_recommendation() {
        let rec = recommend(&["Txn Date", "Customer ID", "Amount"], 4);
        let partition = rec.partition.clone().unwrap();
        assert_eq!(partition.column, "txn_date");
        assert_eq!(partition.column_type, ColumnType::Date);
        assert_eq!(rec.cluster_columns, vec!["customer_id"]);
        assert_eq!(rec.expiration.as_ref().unwrap().partition_expiration_days, 365);
    }

    #[test]
    fn test_camel_case_header_recommendation() {
        let rec = recommend(&["TxnDate", "CustomerID", "userId", "Amount"], 4);
        let partition = rec.partition.clone().unwrap();
        assert_eq!(partition.column, "txn_date");
        assert_eq!(partition.column_type, ColumnType::Date);
        assert_eq!(rec.cluster_columns, vec!["customer_id", "user_id"]);
    }

    #[test]
    fn test_first_temporal_column_wins() {
        let rec = recommend(&["Event Time", "Load DT", "value"], 4);
        assert_eq!(rec.partition.as_ref().unwrap().column, "event_time");
        assert_eq!(rec.partition.as_ref().unwrap().column_type, ColumnType::Timestamp);
        assert_eq!(rec.partition_candidates, vec!["event_time", "load_dt"]);
    }

    #[test]
    fn test_clustering_is_capped_in_header_order() {
        let rec = recommend(&["a_id", "b_key", "c_uuid", "d_code", "e_id"], 2);
        assert_eq!(rec.cluster_columns, vec!["a_id", "b_key"]);
        assert_eq!(rec.cluster_candidates.len(), 5);
    }

    #[test]
    fn test_partition_column_is_not_clustered() {
        // "date_key" matches both patterns; it is used for partitioning only
        let rec = recommend(&["Date Key", "Store ID"], 4);
        assert_eq!(rec.partition.as_ref().unwrap().column, "date_key");
        assert_eq!(rec.cluster_columns, vec!["store_id"]);
    }

    #[test]
    fn test_no_candidates() {
        let rec = recommend(&["Amount", "Paid", "Updated By"], 4);
        assert!(rec.partition.is_none());
        assert!(rec.expiration.is_none());
        assert!(rec.cluster_columns.is_empty());
    }

    #[test]
    fn test_advisor_does_not_mutate_schema() {
        let schema = SchemaInference::infer("d", "t", &["Txn Date", "Customer ID"]).unwrap();
        let before = schema.clone();
        let rec = OptimizationAdvisor::new(4, 30).recommend(&schema);
        assert_eq!(schema, before);

        let layout = rec.to_layout();
        assert_eq!(layout.partition_column.as_deref(), Some("txn_date"));
        assert_eq!(layout.expiration_days, Some(30));
    }
}
