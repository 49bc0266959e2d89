//! Artifact Generator
//!
//! Pure renderers for everything the core writes to the object store:
//! CREATE TABLE DDL, the JSON table document consumed by IaC pipelines,
//! and the tombstone written before a dataset is deleted. Output is
//! byte-stable for identical input.

use crate::schema::{ColumnType, TableRef, TableSchema};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Ddl,
    JsonSchema,
    DatasetTombstone,
    BackupExport,
}

/// A rendered artifact, owned by the orchestrator until it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub location: String,
    pub content: String,
}

impl Artifact {
    pub fn checksum(&self) -> String {
        sha256_hex(self.content.as_bytes())
    }
}

/// Proof that an artifact is durably stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReceipt {
    pub kind: ArtifactKind,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    pub written_at: DateTime<Utc>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// =============================================================================
// PATH CONVENTIONS
// =============================================================================

pub fn ddl_path(table: &str) -> String {
    format!("table_generation/DDL/{}.sql", table)
}

pub fn json_schema_path(table: &str) -> String {
    format!("table_generation/json/{}.json", table)
}

pub fn tombstone_path(dataset: &str) -> String {
    format!("dataset_generation/json/{}.json", dataset)
}

pub fn backup_export_path(table: &TableRef, at: DateTime<Utc>) -> String {
    format!(
        "backup/bq_table/{}/{}/{}.{}.csv",
        table.table,
        at.format("%Y%m%dT%H%M%SZ"),
        table.dataset,
        table.table
    )
}

// =============================================================================
// TABLE DOCUMENT (BigQuery table resource shape)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDocument {
    pub table_reference: TableReference,
    pub schema: FieldList,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_partitioning: Option<TimePartitioning>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clustering: Option<FieldNames>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldList {
    pub fields: Vec<FieldDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: ColumnType,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_value_expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePartitioning {
    #[serde(rename = "type")]
    pub partition_type: String,
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration_ms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNames {
    pub fields: Vec<String>,
}

// =============================================================================
// DATASET TOMBSTONE
// =============================================================================

/// What is known about a dataset right before it is deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetTombstone {
    pub project_id: String,
    pub dataset_id: String,
    pub tables: Vec<String>,
    pub table_count: usize,
    pub captured_at: String,
    pub reason: String,
}

// =============================================================================
// GENERATOR
// =============================================================================

pub struct ArtifactGenerator {
    project_id: String,
}

impl ArtifactGenerator {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    pub fn qualified_name(&self, schema: &TableSchema) -> String {
        format!("`{}.{}.{}`", self.project_id, schema.dataset, schema.table)
    }

    /// Render `CREATE TABLE` DDL for the warehouse.
    pub fn render_ddl(&self, schema: &TableSchema) -> String {
        let mut lines: Vec<String> = schema
            .columns
            .iter()
            .map(|c| {
                format!(
                    "  `{}` {} OPTIONS(description=\"{}\")",
                    c.normalized_name,
                    c.inferred_type.as_sql(),
                    escape_description(&c.raw_name)
                )
            })
            .collect();
        lines.extend(schema.audit_columns().iter().map(|a| {
            format!(
                "  `{}` {} DEFAULT {} OPTIONS(description=\"{}\")",
                a.name,
                a.data_type.as_sql(),
                a.default_expression,
                a.description
            )
        }));

        let mut sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            self.qualified_name(schema),
            lines.join(",\n")
        );

        if let Some(partition) = &schema.partition {
            match partition.column_type {
                ColumnType::Timestamp => sql.push_str(&format!(
                    "\nPARTITION BY TIMESTAMP_TRUNC(`{}`, DAY)",
                    partition.column
                )),
                _ => sql.push_str(&format!("\nPARTITION BY `{}`", partition.column)),
            }
        }

        if !schema.cluster_columns.is_empty() {
            let cols: Vec<String> = schema
                .cluster_columns
                .iter()
                .map(|c| format!("`{}`", c))
                .collect();
            sql.push_str(&format!("\nCLUSTER BY {}", cols.join(", ")));
        }

        if let Some(days) = schema.expiration_days {
            sql.push_str(&format!("\nOPTIONS(partition_expiration_days={})", days));
        }

        sql.push_str(";\n");
        sql
    }

    pub fn table_document(&self, schema: &TableSchema) -> TableDocument {
        let mut fields: Vec<FieldDocument> = schema
            .columns
            .iter()
            .map(|c| FieldDocument {
                name: c.normalized_name.clone(),
                field_type: c.inferred_type,
                mode: "NULLABLE".to_string(),
                description: Some(c.raw_name.clone()),
                default_value_expression: None,
            })
            .collect();
        fields.extend(schema.audit_columns().iter().map(|a| FieldDocument {
            name: a.name.to_string(),
            field_type: a.data_type,
            mode: "NULLABLE".to_string(),
            description: Some(a.description.to_string()),
            default_value_expression: Some(a.default_expression.to_string()),
        }));

        TableDocument {
            table_reference: TableReference {
                project_id: self.project_id.clone(),
                dataset_id: schema.dataset.clone(),
                table_id: schema.table.clone(),
            },
            schema: FieldList { fields },
            time_partitioning: schema.partition.as_ref().map(|p| TimePartitioning {
                partition_type: "DAY".to_string(),
                field: p.column.clone(),
                expiration_ms: schema
                    .expiration_days
                    .map(|days| (u64::from(days) * 86_400_000).to_string()),
            }),
            clustering: if schema.cluster_columns.is_empty() {
                None
            } else {
                Some(FieldNames {
                    fields: schema.cluster_columns.clone(),
                })
            },
        }
    }

    /// Render the JSON table document.
    pub fn render_json_schema(&self, schema: &TableSchema) -> String {
        let mut json = serde_json::to_string_pretty(&self.table_document(schema))
            .unwrap_or_else(|_| "{}".to_string());
        json.push('\n');
        json
    }

    pub fn render_tombstone(&self, dataset: &str, tables: &[String], captured_at: DateTime<Utc>) -> String {
        let tombstone = DatasetTombstone {
            project_id: self.project_id.clone(),
            dataset_id: dataset.to_string(),
            tables: tables.to_vec(),
            table_count: tables.len(),
            captured_at: captured_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            reason: "Pre-deletion record of dataset contents".to_string(),
        };
        let mut json = serde_json::to_string_pretty(&tombstone).unwrap_or_else(|_| "{}".to_string());
        json.push('\n');
        json
    }

    /// DDL and JSON artifacts for IaC mode, at their fixed locations.
    pub fn table_artifacts(&self, schema: &TableSchema) -> [Artifact; 2] {
        [
            Artifact {
                kind: ArtifactKind::Ddl,
                location: ddl_path(&schema.table),
                content: self.render_ddl(schema),
            },
            Artifact {
                kind: ArtifactKind::JsonSchema,
                location: json_schema_path(&schema.table),
                content: self.render_json_schema(schema),
            },
        ]
    }

    pub fn tombstone_artifact(&self, dataset: &str, tables: &[String], captured_at: DateTime<Utc>) -> Artifact {
        Artifact {
            kind: ArtifactKind::DatasetTombstone,
            location: tombstone_path(dataset),
            content: self.render_tombstone(dataset, tables, captured_at),
        }
    }
}

/// Render a raw header as the body of a double-quoted SQL string literal
fn escape_description(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}
