//! In-process object store + warehouse
//!
//! Backs the binary in local mode and every lifecycle test. Tables hold
//! CSV-shaped rows, exports write CSV objects and loads parse them back, so a
//! full export -> drop -> recreate -> reload cycle behaves like the real thing.
//! Faults can be injected per operation to exercise the failure paths.

use crate::cloud::{CloudError, CloudResult, ExportReceipt, ObjectStore, Warehouse};
use crate::schema::{TableRef, TableSchema, BATCH_DATE, PROCESSED_AT};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

/// Operations the simulator records and can fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOp {
    ReadPrefix,
    WriteObject,
    ExportTable,
    List,
    CreateDataset,
    DatasetExists,
    ListDatasets,
    CreateTable,
    DropTable,
    DropDataset,
    ListTables,
    LoadFromObject,
    CountRows,
    SnapshotTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCall {
    pub op: CloudOp,
    pub target: String,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(String),
    Hang,
}

struct SimTable {
    schema: TableSchema,
    /// Values aligned with `schema.column_names()`
    rows: Vec<Vec<String>>,
}

struct SimDataset {
    #[allow(dead_code)]
    region: String,
    tables: BTreeMap<String, SimTable>,
}

#[derive(Default)]
struct CloudState {
    objects: BTreeMap<String, Vec<u8>>,
    datasets: BTreeMap<String, SimDataset>,
}

#[derive(Default)]
pub struct SimulatedCloud {
    state: RwLock<CloudState>,
    faults: Mutex<HashMap<CloudOp, Fault>>,
    /// Rows silently lost by every subsequent load
    lossy_loads: Mutex<u64>,
    calls: Mutex<Vec<CloudCall>>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // FAULT INJECTION & INSPECTION
    // =========================================================================

    /// Make every call of `op` fail until healed.
    pub fn fail(&self, op: CloudOp, message: impl Into<String>) {
        lock(&self.faults).insert(op, Fault::Fail(message.into()));
    }

    /// Make every call of `op` block forever until healed.
    pub fn hang(&self, op: CloudOp) {
        lock(&self.faults).insert(op, Fault::Hang);
    }

    pub fn heal(&self, op: CloudOp) {
        lock(&self.faults).remove(&op);
    }

    /// Drop `rows` rows from every later load, to simulate a lossy reload.
    pub fn lose_rows_on_load(&self, rows: u64) {
        *lock(&self.lossy_loads) = rows;
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_of(&self, op: CloudOp) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Position of the first call of `op` in the call log
    pub fn first_call(&self, op: CloudOp) -> Option<usize> {
        lock(&self.calls).iter().position(|c| c.op == op)
    }

    pub async fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.read().await.objects.get(path).cloned()
    }

    pub async fn table_exists(&self, table: &TableRef) -> bool {
        self.state
            .read()
            .await
            .datasets
            .get(&table.dataset)
            .map_or(false, |d| d.tables.contains_key(&table.table))
    }

    pub async fn table_schema(&self, table: &TableRef) -> Option<TableSchema> {
        self.state
            .read()
            .await
            .datasets
            .get(&table.dataset)?
            .tables
            .get(&table.table)
            .map(|t| t.schema.clone())
    }

    pub async fn table_rows(&self, table: &TableRef) -> Option<Vec<Vec<String>>> {
        self.state
            .read()
            .await
            .datasets
            .get(&table.dataset)?
            .tables
            .get(&table.table)
            .map(|t| t.rows.clone())
    }

    // =========================================================================
    // SEEDING
    // =========================================================================

    pub async fn put_object(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.state
            .write()
            .await
            .objects
            .insert(path.to_string(), content.into());
    }

    pub async fn put_dataset(&self, dataset: &str) {
        self.state
            .write()
            .await
            .datasets
            .entry(dataset.to_string())
            .or_insert_with(|| SimDataset {
                region: "US".to_string(),
                tables: BTreeMap::new(),
            });
    }

    /// Create (or replace) a table with rows of source values.
    /// Rows shorter than the physical width get audit defaults appended.
    pub async fn put_table(&self, schema: TableSchema, rows: Vec<Vec<String>>) {
        let width = schema.column_names().len();
        let processed_at = Utc::now().to_rfc3339();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.len() + 2 == width {
                    row.push("9999-12-31".to_string());
                    row.push(processed_at.clone());
                }
                row
            })
            .collect();

        self.put_dataset(&schema.dataset).await;
        let mut state = self.state.write().await;
        if let Some(dataset) = state.datasets.get_mut(&schema.dataset) {
            dataset
                .tables
                .insert(schema.table.clone(), SimTable { schema, rows });
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn enter(&self, op: CloudOp, target: impl Into<String>) -> CloudResult<()> {
        let target = target.into();
        debug!(?op, %target, "simulated cloud call");
        lock(&self.calls).push(CloudCall {
            op,
            target: target.clone(),
        });

        let fault = lock(&self.faults).get(&op).cloned();
        match fault {
            Some(Fault::Fail(message)) => Err(CloudError::Unavailable(format!("{}: {}", target, message))),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn missing_table(table: &TableRef) -> CloudError {
    CloudError::NotFound(format!("table {}", table))
}

fn rows_to_csv(header: &[String], rows: &[Vec<String>]) -> CloudResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|e| CloudError::Rejected(e.to_string()))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| CloudError::Rejected(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| CloudError::Rejected(e.to_string()))
}

/// Parse a CSV export and project it onto `columns` by header name.
fn csv_to_rows(content: &[u8], columns: &[String]) -> CloudResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content);
    let header = reader
        .headers()
        .map_err(|e| CloudError::Rejected(format!("unreadable export header: {}", e)))?
        .clone();

    let positions: Vec<Option<usize>> = columns
        .iter()
        .map(|name| header.iter().position(|h| h == name))
        .collect();
    let processed_at = Utc::now().to_rfc3339();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| CloudError::Rejected(format!("malformed export row: {}", e)))?;
        let row = columns
            .iter()
            .zip(&positions)
            .map(|(name, position)| match position.and_then(|i| record.get(i)) {
                Some(value) => value.to_string(),
                None if name == BATCH_DATE => "9999-12-31".to_string(),
                None if name == PROCESSED_AT => processed_at.clone(),
                None => String::new(),
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[async_trait]
impl ObjectStore for SimulatedCloud {
    async fn read_prefix(&self, path: &str, max_bytes: usize) -> CloudResult<Vec<u8>> {
        self.enter(CloudOp::ReadPrefix, path).await?;
        let state = self.state.read().await;
        let content = state
            .objects
            .get(path)
            .ok_or_else(|| CloudError::NotFound(format!("object {}", path)))?;
        Ok(content[..content.len().min(max_bytes)].to_vec())
    }

    async fn write_object(&self, path: &str, content: &[u8]) -> CloudResult<()> {
        self.enter(CloudOp::WriteObject, path).await?;
        self.state
            .write()
            .await
            .objects
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn export_table(&self, table: &TableRef, path: &str) -> CloudResult<ExportReceipt> {
        self.enter(CloudOp::ExportTable, format!("{} -> {}", table, path)).await?;
        let mut state = self.state.write().await;
        let content = {
            let sim = state
                .datasets
                .get(&table.dataset)
                .and_then(|d| d.tables.get(&table.table))
                .ok_or_else(|| missing_table(table))?;
            let content = rows_to_csv(&sim.schema.column_names(), &sim.rows)?;
            (content, sim.rows.len() as u64)
        };
        state.objects.insert(path.to_string(), content.0);
        Ok(ExportReceipt {
            path: path.to_string(),
            row_count: content.1,
        })
    }

    async fn list(&self, prefix: &str) -> CloudResult<Vec<String>> {
        self.enter(CloudOp::List, prefix).await?;
        let state = self.state.read().await;
        Ok(state
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Warehouse for SimulatedCloud {
    async fn create_dataset(&self, dataset: &str, region: &str) -> CloudResult<()> {
        self.enter(CloudOp::CreateDataset, dataset).await?;
        let mut state = self.state.write().await;
        if state.datasets.contains_key(dataset) {
            return Err(CloudError::AlreadyExists(format!("dataset {}", dataset)));
        }
        state.datasets.insert(
            dataset.to_string(),
            SimDataset {
                region: region.to_string(),
                tables: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn dataset_exists(&self, dataset: &str) -> CloudResult<bool> {
        self.enter(CloudOp::DatasetExists, dataset).await?;
        Ok(self.state.read().await.datasets.contains_key(dataset))
    }

    async fn list_datasets(&self) -> CloudResult<Vec<String>> {
        self.enter(CloudOp::ListDatasets, "*").await?;
        Ok(self.state.read().await.datasets.keys().cloned().collect())
    }

    async fn create_table(&self, schema: &TableSchema) -> CloudResult<()> {
        let table = schema.table_ref();
        self.enter(CloudOp::CreateTable, table.to_string()).await?;
        let mut state = self.state.write().await;
        let dataset = state
            .datasets
            .get_mut(&table.dataset)
            .ok_or_else(|| CloudError::NotFound(format!("dataset {}", table.dataset)))?;
        if dataset.tables.contains_key(&table.table) {
            return Err(CloudError::AlreadyExists(format!("table {}", table)));
        }
        dataset.tables.insert(
            table.table.clone(),
            SimTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> CloudResult<()> {
        self.enter(CloudOp::DropTable, table.to_string()).await?;
        let mut state = self.state.write().await;
        state
            .datasets
            .get_mut(&table.dataset)
            .and_then(|d| d.tables.remove(&table.table))
            .map(|_| ())
            .ok_or_else(|| missing_table(table))
    }

    async fn drop_dataset(&self, dataset: &str, cascade: bool) -> CloudResult<()> {
        self.enter(CloudOp::DropDataset, format!("{} cascade={}", dataset, cascade))
            .await?;
        let mut state = self.state.write().await;
        let existing = state
            .datasets
            .get(dataset)
            .ok_or_else(|| CloudError::NotFound(format!("dataset {}", dataset)))?;
        if !cascade && !existing.tables.is_empty() {
            return Err(CloudError::Rejected(format!(
                "dataset {} still contains {} tables",
                dataset,
                existing.tables.len()
            )));
        }
        state.datasets.remove(dataset);
        Ok(())
    }

    async fn list_tables(&self, dataset: &str) -> CloudResult<Vec<String>> {
        self.enter(CloudOp::ListTables, dataset).await?;
        let state = self.state.read().await;
        state
            .datasets
            .get(dataset)
            .map(|d| d.tables.keys().cloned().collect())
            .ok_or_else(|| CloudError::NotFound(format!("dataset {}", dataset)))
    }

    async fn load_from_object(&self, table: &TableRef, path: &str) -> CloudResult<u64> {
        self.enter(CloudOp::LoadFromObject, format!("{} <- {}", path, table))
            .await?;
        let lost = *lock(&self.lossy_loads);
        let mut state = self.state.write().await;
        let content = state
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("object {}", path)))?;
        let sim = state
            .datasets
            .get_mut(&table.dataset)
            .and_then(|d| d.tables.get_mut(&table.table))
            .ok_or_else(|| missing_table(table))?;

        let mut rows = csv_to_rows(&content, &sim.schema.column_names())?;
        let keep = rows.len().saturating_sub(lost as usize);
        rows.truncate(keep);
        let loaded = rows.len() as u64;
        sim.rows.extend(rows);
        Ok(loaded)
    }

    async fn count_rows(&self, table: &TableRef) -> CloudResult<u64> {
        self.enter(CloudOp::CountRows, table.to_string()).await?;
        let state = self.state.read().await;
        state
            .datasets
            .get(&table.dataset)
            .and_then(|d| d.tables.get(&table.table))
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| missing_table(table))
    }

    async fn snapshot_table(&self, source: &TableRef, snapshot: &TableRef) -> CloudResult<()> {
        self.enter(CloudOp::SnapshotTable, format!("{} -> {}", source, snapshot))
            .await?;
        let mut state = self.state.write().await;
        let (mut schema, rows) = state
            .datasets
            .get(&source.dataset)
            .and_then(|d| d.tables.get(&source.table))
            .map(|t| (t.schema.clone(), t.rows.clone()))
            .ok_or_else(|| missing_table(source))?;
        schema.dataset = snapshot.dataset.clone();
        schema.table = snapshot.table.clone();

        let dataset = state
            .datasets
            .get_mut(&snapshot.dataset)
            .ok_or_else(|| CloudError::NotFound(format!("dataset {}", snapshot.dataset)))?;
        if dataset.tables.contains_key(&snapshot.table) {
            return Err(CloudError::AlreadyExists(format!("table {}", snapshot)));
        }
        dataset
            .tables
            .insert(snapshot.table.clone(), SimTable { schema, rows });
        Ok(())
    }
}
