//! Schema Inference - header names to a raw-layer table schema
//!
//! Pure and deterministic: the same header always yields the same schema,
//! which is what lets the execute path and the artifact path agree.

use crate::error::AppError;
use crate::schema::{is_audit_column, ColumnDescriptor, ColumnType, TableSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
static ACRONYM_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("static regex"));
static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"));

/// Normalize a header field to snake_case.
///
/// Splits camelCase and acronym boundaries (`CustomerID`, `HTTPStatus`),
/// lowercases, collapses every run of non-alphanumerics into one underscore
/// and trims underscores at both ends. May return an empty string.
pub fn normalize_name(raw: &str) -> String {
    let split = ACRONYM_BOUNDARY.replace_all(raw.trim(), "${1}_${2}");
    let split = CAMEL_BOUNDARY.replace_all(&split, "${1}_${2}");
    let lowered = split.to_lowercase();
    NON_ALNUM
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

pub struct SchemaInference;

impl SchemaInference {
    /// Build the raw-layer schema for `dataset.table` from header fields.
    pub fn infer<S: AsRef<str>>(dataset: &str, table: &str, header: &[S]) -> Result<TableSchema, AppError> {
        let normalized: Vec<String> = header.iter().map(|h| normalize_name(h.as_ref())).collect();
        if normalized.iter().all(|n| n.is_empty()) {
            return Err(AppError::NoColumns(format!("{}.{}", dataset, table)));
        }

        let mut taken: HashSet<String> = HashSet::new();
        let mut columns = Vec::with_capacity(header.len());

        for (index, (raw, base)) in header.iter().zip(normalized).enumerate() {
            let ordinal_position = index + 1;
            let base = if base.is_empty() {
                format!("column_{}", ordinal_position)
            } else if base.starts_with(|c: char| c.is_ascii_digit()) {
                format!("col_{}", base)
            } else {
                base
            };

            let name = Self::disambiguate(&base, &taken);
            taken.insert(name.clone());

            columns.push(ColumnDescriptor {
                raw_name: raw.as_ref().to_string(),
                normalized_name: name,
                inferred_type: ColumnType::String,
                ordinal_position,
            });
        }

        Ok(TableSchema::new(dataset, table, columns))
    }

    /// First free name among `base`, `base_2`, `base_3`, ...
    /// Audit column names are never free.
    fn disambiguate(base: &str, taken: &HashSet<String>) -> String {
        let is_free = |candidate: &str| !taken.contains(candidate) && !is_audit_column(candidate);
        if is_free(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| is_free(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BATCH_DATE, PROCESSED_AT};
    use pretty_assertions::assert_eq;

    fn names(schema: &TableSchema) -> Vec<String> {
        schema.column_names()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Txn Date"), "txn_date");
        assert_eq!(normalize_name("  Customer--ID!! "), "customer_id");
        assert_eq!(normalize_name("__Amount (USD)__"), "amount_usd");
        assert_eq!(normalize_name("%%%"), "");
    }

    #[test]
    fn test_normalize_splits_camel_case() {
        assert_eq!(normalize_name("TxnDate"), "txn_date");
        assert_eq!(normalize_name("CustomerID"), "customer_id");
        assert_eq!(normalize_name("userId"), "user_id");
        assert_eq!(normalize_name("HTTPStatusCode"), "http_status_code");
        assert_eq!(normalize_name("line2Total"), "line2_total");
        assert_eq!(normalize_name("ORDER_ID"), "order_id");
    }

    #[test]
    fn test_scenario_header() {
        let schema = SchemaInference::infer("sales", "sales_raw", &["Txn Date", "Customer ID", "Amount"]).unwrap();
        assert_eq!(
            names(&schema),
            vec!["txn_date", "customer_id", "amount", BATCH_DATE, PROCESSED_AT]
        );
        assert!(schema.columns.iter().all(|c| c.inferred_type == ColumnType::String));
        assert_eq!(schema.columns[2].ordinal_position, 3);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let header = ["Order-ID", "order id", "Order_Id", "Ship Date"];
        let first = SchemaInference::infer("d", "t", &header).unwrap();
        let second = SchemaInference::infer("d", "t", &header).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_collisions_are_suffixed_not_dropped() {
        let schema = SchemaInference::infer("d", "t", &["Order-ID", "order id", "Order_Id"]).unwrap();
        assert_eq!(
            names(&schema)[..3].to_vec(),
            vec!["order_id", "order_id_2", "order_id_3"]
        );
    }

    #[test]
    fn test_audit_names_in_header_cannot_replace_audit_columns() {
        let schema = SchemaInference::infer("d", "t", &["Batch Date", "db_prcsd_dttm", "value"]).unwrap();
        assert_eq!(
            names(&schema),
            vec!["batch_date_2", "db_prcsd_dttm_2", "value", BATCH_DATE, PROCESSED_AT]
        );
        assert_eq!(schema.columns[0].raw_name, "Batch Date");
    }

    #[test]
    fn test_suffix_skips_names_already_present() {
        let schema = SchemaInference::infer("d", "t", &["id_2", "id", "ID"]).unwrap();
        assert_eq!(names(&schema)[..3].to_vec(), vec!["id_2", "id", "id_3"]);
    }

    #[test]
    fn test_blank_and_numeric_fields_get_stable_names() {
        let schema = SchemaInference::infer("d", "t", &["name", "", "2024 total"]).unwrap();
        assert_eq!(names(&schema)[..3].to_vec(), vec!["name", "column_2", "col_2024_total"]);
    }

    #[test]
    fn test_empty_header_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            SchemaInference::infer("d", "t", &empty),
            Err(AppError::NoColumns(_))
        ));
        assert!(matches!(
            SchemaInference::infer("d", "t", &["", "  ", "--"]),
            Err(AppError::NoColumns(_))
        ));
    }
}
