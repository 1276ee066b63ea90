//! Entity tables addressed by `(partition_key, row_key)`, used for quota counters.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::lock::{rw_read, rw_write};
use crate::config::{StorageBackend, StorageSettings};

const SOURCE: &str = "infra::tables";

type Rows = BTreeMap<String, Map<String, Value>>;
type Partitions = BTreeMap<String, Rows>;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid table name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("table file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.properties.get(name).and_then(Value::as_u64)
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, TableError>;

    /// Insert or fully replace the entity's properties.
    async fn upsert_entity(&self, table: &str, entity: TableEntity) -> Result<(), TableError>;

    /// Upsert `entity`, then drop rows of its partition whose string `field`
    /// sorts before `floor`. Rows without the field are kept. Returns the
    /// number of rows dropped.
    async fn upsert_pruning(
        &self,
        table: &str,
        entity: TableEntity,
        field: &str,
        floor: &str,
    ) -> Result<usize, TableError>;
}

fn prune_rows(rows: &mut Rows, field: &str, floor: &str) -> usize {
    let before = rows.len();
    rows.retain(|_, properties| {
        properties
            .get(field)
            .and_then(Value::as_str)
            .is_none_or(|value| value >= floor)
    });
    before - rows.len()
}

/// Tables follow the blob backend: files under `tables_dir`, or process memory.
pub fn build_table_store(settings: &StorageSettings) -> Result<Arc<dyn TableStore>, TableError> {
    match settings.backend {
        StorageBackend::Local => {
            info!(dir = %settings.tables_dir.display(), "Using local table storage");
            Ok(Arc::new(LocalTableStore::new(settings.tables_dir.clone())?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory table storage");
            Ok(Arc::new(MemoryTableStore::new()))
        }
    }
}

/// One JSON document per table under a directory, shaped `{partition: {row: properties}}`.
#[derive(Debug)]
pub struct LocalTableStore {
    dir: PathBuf,
    writes: Mutex<()>,
}

impl LocalTableStore {
    pub fn new(dir: PathBuf) -> Result<Self, TableError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writes: Mutex::new(()),
        })
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, TableError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(TableError::InvalidName(table.to_string()));
        }
        Ok(self.dir.join(format!("{table}.json")))
    }

    async fn load(&self, table: &str) -> Result<Partitions, TableError> {
        let path = self.table_path(table)?;
        match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Partitions::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Partitions::new()),
            Err(err) => Err(TableError::Io(err)),
        }
    }

    async fn rewrite(
        &self,
        table: &str,
        entity: TableEntity,
        prune: Option<(&str, &str)>,
    ) -> Result<usize, TableError> {
        let _guard = self.writes.lock().await;
        let path = self.table_path(table)?;
        let mut partitions = self.load(table).await?;
        let rows = partitions.entry(entity.partition_key.clone()).or_default();
        rows.insert(entity.row_key.clone(), entity.properties);
        let pruned = prune.map_or(0, |(field, floor)| prune_rows(rows, field, floor));

        let rendered = serde_json::to_vec_pretty(&partitions)?;
        let staging = self
            .dir
            .join(format!(".{table}-{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staging, rendered).await?;
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(TableError::Io(err));
        }

        debug!(
            table,
            partition_key = %entity.partition_key,
            row_key = %entity.row_key,
            pruned,
            "Upserted table entity"
        );
        Ok(pruned)
    }
}

#[async_trait]
impl TableStore for LocalTableStore {
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, TableError> {
        let partitions = self.load(table).await?;
        Ok(partitions
            .get(partition_key)
            .and_then(|rows| rows.get(row_key))
            .map(|properties| TableEntity {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
                properties: properties.clone(),
            }))
    }

    async fn upsert_entity(&self, table: &str, entity: TableEntity) -> Result<(), TableError> {
        self.rewrite(table, entity, None).await.map(|_| ())
    }

    async fn upsert_pruning(
        &self,
        table: &str,
        entity: TableEntity,
        field: &str,
        floor: &str,
    ) -> Result<usize, TableError> {
        self.rewrite(table, entity, Some((field, floor))).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, Partitions>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TableEntity>, TableError> {
        let tables = rw_read(&self.tables, SOURCE, "get_entity");
        Ok(tables
            .get(table)
            .and_then(|partitions| partitions.get(partition_key))
            .and_then(|rows| rows.get(row_key))
            .map(|properties| TableEntity {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
                properties: properties.clone(),
            }))
    }

    async fn upsert_entity(&self, table: &str, entity: TableEntity) -> Result<(), TableError> {
        rw_write(&self.tables, SOURCE, "upsert_entity")
            .entry(table.to_string())
            .or_default()
            .entry(entity.partition_key)
            .or_default()
            .insert(entity.row_key, entity.properties);
        Ok(())
    }

    async fn upsert_pruning(
        &self,
        table: &str,
        entity: TableEntity,
        field: &str,
        floor: &str,
    ) -> Result<usize, TableError> {
        let mut tables = rw_write(&self.tables, SOURCE, "upsert_pruning");
        let rows = tables
            .entry(table.to_string())
            .or_default()
            .entry(entity.partition_key)
            .or_default();
        rows.insert(entity.row_key, entity.properties);
        Ok(prune_rows(rows, field, floor))
    }
}
