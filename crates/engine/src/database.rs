//! Database: table registry, provisioning, commit dispatch
//!
//! A `Database` is an explicitly owned handle: it holds the storage
//! environment, the metadata store, and the map of open tables. There are
//! no process-global registries; two `Database` values are two independent
//! databases.
//!
//! Table declaration is idempotent. The first declaration allocates a
//! stable numeric id from a persisted high-water counter (ids are never
//! reused, even after a drop) and persists the schema; later declarations
//! reopen, and any newly requested indexed attribute starts a background
//! backfill.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tessera_core::{Error, Result, Source, StoreKey, TableId, Value};
use tessera_storage::{Env, StagedWrite, Store};
use tessera_txn::{CommitOutcome, Transaction};
use tracing::{debug, info};

use crate::schema::{TableDefinition, TableSchema};
use crate::table::{SourceBinding, Table};

/// Name of the per-database metadata store
const META_STORE: &str = "__meta";

/// Metadata key of the table-id high-water counter
fn id_counter_key() -> StoreKey {
    StoreKey::single(Value::String("last_table_id".to_string()))
}

/// Database-level options
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    /// Whether this worker runs TTL reaper threads
    ///
    /// In a multi-worker deployment exactly one worker should; the others
    /// leave `set_ttl_expiration` a no-op so every worker can configure
    /// tables identically.
    pub run_ttl_reaper: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            run_ttl_reaper: true,
        }
    }
}

/// One embedded database
pub struct Database {
    env: Arc<Env>,
    meta: Arc<Store>,
    tables: DashMap<String, Arc<Table>>,
    tables_by_id: DashMap<TableId, Arc<Table>>,
    // Serializes declaration, reopen and drop
    provision: Mutex<()>,
    options: DatabaseOptions,
}

impl Database {
    /// Open an empty in-memory database with default options
    pub fn new() -> Self {
        Self::with_options(DatabaseOptions::default())
    }

    /// Open an empty in-memory database
    pub fn with_options(options: DatabaseOptions) -> Self {
        let env = Arc::new(Env::new());
        let meta = env.store(META_STORE);
        Self {
            env,
            meta,
            tables: DashMap::new(),
            tables_by_id: DashMap::new(),
            provision: Mutex::new(()),
            options,
        }
    }

    /// The underlying storage environment
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Start a transaction against this database
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.env))
    }

    /// Commit a transaction and dispatch its audit entries to subscribers
    pub fn commit(&self, txn: &mut Transaction) -> Result<CommitOutcome> {
        let outcome = txn.commit()?;
        for entry in &outcome.audit {
            if let Some(table) = self.tables_by_id.get(&entry.table_id) {
                table.notify_commit(entry);
            }
        }
        Ok(outcome)
    }

    /// Declare or reopen a table
    pub fn table(&self, definition: &TableDefinition) -> Result<Arc<Table>> {
        self.open_table(definition, None)
    }

    /// Declare or reopen a cache-style table backed by a source
    ///
    /// `freshness` bounds how long a cached record is served without
    /// consulting the source again; `None` means cached records never
    /// expire on read.
    pub fn table_with_source(
        &self,
        definition: &TableDefinition,
        provider: Arc<dyn Source>,
        freshness: Option<Duration>,
    ) -> Result<Arc<Table>> {
        self.open_table(
            definition,
            Some(SourceBinding {
                provider,
                freshness,
            }),
        )
    }

    fn open_table(
        &self,
        definition: &TableDefinition,
        source: Option<SourceBinding>,
    ) -> Result<Arc<Table>> {
        let _guard = self.provision.lock();

        if let Some(open) = self.tables.get(&definition.name) {
            let table = Arc::clone(open.value());
            drop(open);
            if table.schema().primary_key != definition.primary_key {
                return Err(Error::validation(format!(
                    "table '{}' is already declared with primary key '{}'",
                    definition.name,
                    table.schema().primary_key
                )));
            }
            let mut added = Vec::new();
            for attribute in &definition.indexed {
                if table.index_for(attribute).is_none() {
                    table.declare_index(attribute);
                    added.push(attribute.clone());
                }
            }
            if !added.is_empty() {
                let mut schema = table.schema().clone();
                for attribute in added {
                    if !schema.indexed.contains(&attribute) {
                        schema.indexed.push(attribute);
                    }
                }
                self.persist_schema(&schema)?;
            }
            return Ok(table);
        }

        let meta_key = TableSchema::meta_key(&definition.name);
        let persisted = self
            .meta
            .get(&meta_key)
            .map(|entry| TableSchema::from_value(&entry.value))
            .transpose()?;

        let (mut schema, built_indexes) = match persisted {
            Some(schema) => {
                if schema.primary_key != definition.primary_key {
                    return Err(Error::validation(format!(
                        "table '{}' is already declared with primary key '{}'",
                        definition.name, schema.primary_key
                    )));
                }
                let built = schema.indexed.clone();
                (schema, built)
            }
            None => {
                let id = self.allocate_table_id()?;
                info!(table = %definition.name, %id, "provisioning table");
                (TableSchema::from_definition(id, definition), Vec::new())
            }
        };
        for attribute in &definition.indexed {
            if !schema.indexed.contains(attribute) {
                schema.indexed.push(attribute.clone());
            }
        }
        self.persist_schema(&schema)?;

        let table = Table::open(
            schema.clone(),
            Arc::clone(&self.env),
            source,
            self.options.run_ttl_reaper,
        );
        for attribute in &schema.indexed {
            if built_indexes.contains(attribute) {
                table.attach_ready_index(attribute);
            } else {
                debug!(table = %schema.name, attribute = %attribute, "declaring index");
                table.declare_index(attribute);
            }
        }
        self.tables.insert(schema.name.clone(), Arc::clone(&table));
        self.tables_by_id.insert(schema.id, Arc::clone(&table));
        Ok(table)
    }

    /// Drop a table: its stores, indexes, and metadata registration
    ///
    /// Irreversible. The table's id stays burned; a re-declaration under
    /// the same name gets a fresh one.
    pub fn drop_table(&self, name: &str) -> Result<bool> {
        let _guard = self.provision.lock();
        if let Some((_, table)) = self.tables.remove(name) {
            self.tables_by_id.remove(&table.id());
            table.stop_background_work();
        }
        let meta_key = TableSchema::meta_key(name);
        let Some(entry) = self.meta.get(&meta_key) else {
            return Ok(false);
        };
        let schema = TableSchema::from_value(&entry.value)?;
        self.env
            .commit_exclusive(&[StagedWrite::remove(Arc::clone(&self.meta), meta_key)])?;
        self.env.remove_store(&schema.primary_store_name());
        for attribute in &schema.indexed {
            self.env.remove_store(&schema.index_store_name(attribute));
        }
        info!(table = name, "table dropped");
        Ok(true)
    }

    // Caller holds the provision lock.
    fn allocate_table_id(&self) -> Result<TableId> {
        let key = id_counter_key();
        let last = self
            .meta
            .get(&key)
            .and_then(|entry| entry.value.as_int())
            .unwrap_or(0);
        let next = last + 1;
        self.env.commit_exclusive(&[StagedWrite::put(
            Arc::clone(&self.meta),
            key,
            Value::Int(next),
        )])?;
        Ok(TableId::from_u32(next as u32))
    }

    fn persist_schema(&self, schema: &TableSchema) -> Result<()> {
        self.env.commit_exclusive(&[StagedWrite::put(
            Arc::clone(&self.meta),
            TableSchema::meta_key(&schema.name),
            schema.to_value(),
        )])?;
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.tables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscribe::{Notification, SubscribeOptions};
    use crate::table::WriteOptions;

    #[test]
    fn test_declaration_is_idempotent() {
        let db = Database::new();
        let first = db.table(&TableDefinition::new("weather")).unwrap();
        let again = db.table(&TableDefinition::new("weather")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.id(), again.id());
    }

    #[test]
    fn test_table_ids_are_sequential_and_never_reused() {
        let db = Database::new();
        let a = db.table(&TableDefinition::new("a")).unwrap();
        let b = db.table(&TableDefinition::new("b")).unwrap();
        assert_ne!(a.id(), b.id());

        db.drop_table("a").unwrap();
        let reborn = db.table(&TableDefinition::new("a")).unwrap();
        assert_ne!(reborn.id(), a.id(), "dropped ids stay burned");
        assert!(reborn.id() > b.id());
    }

    #[test]
    fn test_redeclaration_adds_index_with_backfill() {
        let db = Database::new();
        let table = db.table(&TableDefinition::new("weather")).unwrap();
        let mut txn = db.begin();
        table
            .put(
                Value::object([("id", Value::Int(7)), ("state", "CO".into())]),
                &WriteOptions::default(),
                &mut txn,
            )
            .unwrap();
        db.commit(&mut txn).unwrap();

        let table = db
            .table(&TableDefinition::new("weather").index("state"))
            .unwrap();
        table.wait_for_index("state");
        let index = table.index_for("state").unwrap();
        assert!(index.is_ready());
        assert_eq!(index.store().count_prefix(&"CO".into()), 1);
    }

    #[test]
    fn test_commit_dispatches_to_subscribers() {
        let db = Database::new();
        let table = db.table(&TableDefinition::new("weather")).unwrap();
        let sub = table.subscribe(Some(Value::Int(7)), SubscribeOptions::default());

        let mut txn = db.begin();
        table
            .put(
                Value::object([("id", Value::Int(7)), ("state", "CO".into())]),
                &WriteOptions::default(),
                &mut txn,
            )
            .unwrap();
        db.commit(&mut txn).unwrap();

        let Some(Notification::Commit(entry)) = sub.try_recv() else {
            panic!("expected a commit notification");
        };
        assert_eq!(entry.key, Value::Int(7));
    }

    #[test]
    fn test_drop_table_removes_state() {
        let db = Database::new();
        let table = db
            .table(&TableDefinition::new("weather").index("state"))
            .unwrap();
        table.wait_for_index("state");
        let mut txn = db.begin();
        table
            .put(
                Value::object([("id", Value::Int(7)), ("state", "CO".into())]),
                &WriteOptions::default(),
                &mut txn,
            )
            .unwrap();
        db.commit(&mut txn).unwrap();

        assert!(db.drop_table("weather").unwrap());
        assert!(!db.drop_table("weather").unwrap());
        assert!(!db.env().has_store("table:weather:primary"));
        assert!(!db.env().has_store("table:weather:index:state"));

        // A fresh declaration starts empty
        let reborn = db.table(&TableDefinition::new("weather")).unwrap();
        assert!(reborn.primary().is_empty());
    }

    #[test]
    fn test_conflicting_primary_key_rejected() {
        let db = Database::new();
        db.table(&TableDefinition::new("weather")).unwrap();
        let err = db
            .table(&TableDefinition::new("weather").primary_key("station"))
            .unwrap_err();
        assert!(err.is_validation());
    }
}
