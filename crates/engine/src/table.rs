//! Table operations
//!
//! A `Table` binds a schema to its primary store, its secondary indexes,
//! its subscriber registry, and (for cache-style tables) a backing source.
//! All mutations are staged into a caller-supplied `Transaction`; the only
//! direct commits a table performs itself are source-fallback resolution
//! and TTL reaping, both of which are version-conditioned so they can never
//! clobber a concurrent writer.
//!
//! Invariants maintained here:
//!
//! - a record's index entries exactly mirror its latest committed indexed
//!   values: old entries are removed and new ones inserted in the same
//!   commit as the primary write
//! - committed records are never mutated in place; every put stages a
//!   whole-record replacement conditioned on the observed version

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tessera_core::{
    AuditEntry, AuditOperation, Availability, Error, Record, Result, SearchOptions, SearchQuery,
    Source, StoreKey, TableId, Timestamp, Value, Version,
};
use tessera_storage::{AuditSpec, CommitResult, Entry, Env, Expected, StagedWrite, Store};
use tessera_txn::{Transaction, WritableRecord};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::index::{indexable_values, spawn_backfill, BackfillHandle, IndexState, SecondaryIndex};
use crate::schema::TableSchema;
use crate::search;
use crate::subscribe::{
    Notification, SubscribeOptions, SubscriberRegistry, Subscription, SubscriptionId,
};
use crate::ttl::TtlReaper;

/// Per-call options for put/delete/publish
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Caller identity recorded in the audit log
    pub actor: Option<String>,
}

impl WriteOptions {
    /// Options carrying an actor name
    pub fn actor(name: impl Into<String>) -> Self {
        Self {
            actor: Some(name.into()),
        }
    }
}

/// What happened to a put
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The write was staged
    Applied {
        /// Primary key, generated when the record omitted it
        key: Value,
    },
    /// The record's update-time was strictly older than the stored one;
    /// dropped without error for convergent multi-writer replication
    StaleDropped {
        /// Primary key of the dropped write
        key: Value,
    },
}

impl PutOutcome {
    /// The primary key the put addressed
    pub fn key(&self) -> &Value {
        match self {
            PutOutcome::Applied { key } | PutOutcome::StaleDropped { key } => key,
        }
    }

    /// Whether the write was staged
    pub fn was_applied(&self) -> bool {
        matches!(self, PutOutcome::Applied { .. })
    }
}

/// Backing source attached to a cache-style table
pub(crate) struct SourceBinding {
    /// Consulted on miss, invalidation, and freshness lapse
    pub provider: Arc<dyn Source>,
    /// How long a cached record stays fresh; `None` means forever
    pub freshness: Option<Duration>,
}

/// One table of a database
pub struct Table {
    schema: TableSchema,
    env: Arc<Env>,
    primary: Arc<Store>,
    indexes: RwLock<Vec<Arc<SecondaryIndex>>>,
    backfills: Mutex<HashMap<String, Arc<BackfillHandle>>>,
    subscribers: SubscriberRegistry,
    source: Option<SourceBinding>,
    reaper: Mutex<Option<TtlReaper>>,
    reaper_allowed: bool,
    // Index cardinality estimates for search cost ordering. Estimates only;
    // never invalidated.
    cardinality: Mutex<BTreeMap<(String, StoreKey), usize>>,
}

impl Table {
    pub(crate) fn open(
        schema: TableSchema,
        env: Arc<Env>,
        source: Option<SourceBinding>,
        reaper_allowed: bool,
    ) -> Arc<Self> {
        let primary = env.store(&schema.primary_store_name());
        Arc::new(Self {
            schema,
            env,
            primary,
            indexes: RwLock::new(Vec::new()),
            backfills: Mutex::new(HashMap::new()),
            subscribers: SubscriberRegistry::new(),
            source,
            reaper: Mutex::new(None),
            reaper_allowed,
            cardinality: Mutex::new(BTreeMap::new()),
        })
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Stable table id
    pub fn id(&self) -> TableId {
        self.schema.id
    }

    /// The persisted schema this table was opened with
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub(crate) fn primary(&self) -> &Arc<Store> {
        &self.primary
    }

    pub(crate) fn index_for(&self, attribute: &str) -> Option<Arc<SecondaryIndex>> {
        self.indexes
            .read()
            .iter()
            .find(|i| i.attribute() == attribute)
            .cloned()
    }

    pub(crate) fn index_cardinality(&self, attribute: &str, value: &Value) -> usize {
        let cache_key = (attribute.to_string(), StoreKey::single(value.clone()));
        if let Some(&cached) = self.cardinality.lock().get(&cache_key) {
            return cached;
        }
        let count = self
            .index_for(attribute)
            .map(|index| index.store().count_prefix(value))
            .unwrap_or(0);
        self.cardinality.lock().insert(cache_key, count);
        count
    }

    // ===== Index provisioning =====

    /// Open an already-built index (table reopen)
    pub(crate) fn attach_ready_index(&self, attribute: &str) {
        let store = self.env.store(&self.schema.index_store_name(attribute));
        self.indexes.write().push(Arc::new(SecondaryIndex::new(
            attribute,
            store,
            IndexState::Ready,
        )));
    }

    /// Declare a new index and start its background backfill
    pub(crate) fn declare_index(&self, attribute: &str) -> Arc<BackfillHandle> {
        let store = self.env.store(&self.schema.index_store_name(attribute));
        let index = Arc::new(SecondaryIndex::new(
            attribute,
            store,
            IndexState::Backfilling,
        ));
        self.indexes.write().push(Arc::clone(&index));
        let handle = Arc::new(spawn_backfill(
            Arc::clone(&self.env),
            Arc::clone(&self.primary),
            index,
        ));
        self.backfills
            .lock()
            .insert(attribute.to_string(), Arc::clone(&handle));
        handle
    }

    /// Block until the named index has finished backfilling
    ///
    /// Returns immediately when the index was never backfilling in this
    /// process.
    pub fn wait_for_index(&self, attribute: &str) {
        let handle = self.backfills.lock().get(attribute).cloned();
        if let Some(handle) = handle {
            handle.wait();
        }
    }

    // ===== Reads =====

    /// Read one record through the transaction's snapshot
    ///
    /// On a cache-style table, a miss, an `Invalidated` entry, or an entry
    /// older than the freshness window resolves through the source. A
    /// `Resolving` entry returns the stored copy so a miss storm collapses
    /// onto the one in-flight fetch.
    pub fn get(&self, key: &Value, txn: &mut Transaction) -> Result<Option<Record>> {
        let Some(entry) = txn.read(&self.primary, &StoreKey::single(key.clone())) else {
            return match &self.source {
                Some(_) => self.get_from_source(key),
                None => Ok(None),
            };
        };
        match entry.availability {
            Availability::Resolving => Ok(record_from_entry(&entry)),
            Availability::Invalidated if self.source.is_some() => self.get_from_source(key),
            _ if self.is_stale(&entry) => self.get_from_source(key),
            _ => Ok(record_from_entry(&entry)),
        }
    }

    fn is_stale(&self, entry: &Entry) -> bool {
        let Some(binding) = &self.source else {
            return false;
        };
        let Some(freshness) = binding.freshness else {
            return false;
        };
        Timestamp::now()
            .duration_since(entry.version.as_timestamp())
            .is_some_and(|age| age > freshness)
    }

    /// Resolve one key through the backing source
    ///
    /// Writes a `Resolving` placeholder conditioned on the observed version
    /// before fetching; losing either that race or the write-back race
    /// returns whatever is stored, which is newer. Source attributes are
    /// shallow-merged over the local ones. A source `None` removes the local
    /// copy: upstream is authoritative.
    pub fn get_from_source(&self, key: &Value) -> Result<Option<Record>> {
        let binding = self.source.as_ref().ok_or_else(|| {
            Error::InvalidOperation(format!("table '{}' has no source", self.schema.name))
        })?;
        let pk_key = StoreKey::single(key.clone());

        let before = self.primary.get(&pk_key);
        let observed = before.as_ref().map(|e| e.version);
        let local_attrs = before
            .as_ref()
            .and_then(|e| e.value.as_object().cloned())
            .unwrap_or_else(|| {
                let mut attrs = BTreeMap::new();
                attrs.insert(self.schema.primary_key.clone(), key.clone());
                attrs
            });

        // No audit spec: availability flaps are not subscriber-visible.
        let placeholder =
            StagedWrite::put(Arc::clone(&self.primary), pk_key.clone(), Value::Object(local_attrs.clone()))
                .availability(Availability::Resolving)
                .expecting(Expected::from_observed(observed));
        let placeholder_version =
            match self.env.commit_conditional(std::slice::from_ref(&placeholder))? {
                CommitResult::Committed(receipt) => receipt.version,
                CommitResult::Conflict(_) => {
                    // Another reader or writer got there first; its state wins.
                    trace!(table = %self.schema.name, key = %key, "source resolution race lost");
                    return Ok(self.primary.get(&pk_key).as_ref().and_then(record_from_entry));
                }
            };

        let fetched = match binding.provider.get(key) {
            Ok(fetched) => fetched,
            Err(err) => {
                self.restore_after_placeholder(&pk_key, before, placeholder_version)?;
                return Err(err);
            }
        };

        match fetched {
            None => {
                let remove = StagedWrite::remove(Arc::clone(&self.primary), pk_key)
                    .expecting(Expected::At(placeholder_version));
                self.env.commit_conditional(std::slice::from_ref(&remove))?;
                Ok(None)
            }
            Some(source_record) => {
                if let Some(modified) = source_record.modified {
                    // Locally issued versions must order after the source's.
                    self.env
                        .clock()
                        .observe(Version::from_u64(modified.as_micros()));
                }
                let mut merged = local_attrs;
                for (name, value) in source_record.attributes {
                    merged.insert(name, value);
                }
                merged
                    .entry(self.schema.primary_key.clone())
                    .or_insert_with(|| key.clone());

                let mut writes =
                    self.index_diff(before.as_ref().and_then(|e| e.value.as_object()), Some(&merged), key);
                writes.push(
                    StagedWrite::put(Arc::clone(&self.primary), pk_key.clone(), Value::Object(merged))
                        .expecting(Expected::At(placeholder_version))
                        .audited(self.audit_spec(AuditOperation::Put, &WriteOptions::default(), false)),
                );
                if let CommitResult::Committed(receipt) = self.env.commit_conditional(&writes)? {
                    for entry in &receipt.audit {
                        self.notify_commit(entry);
                    }
                }
                // Committed or lost the write-back race: stored is current.
                Ok(self.primary.get(&pk_key).as_ref().and_then(record_from_entry))
            }
        }
    }

    fn restore_after_placeholder(
        &self,
        pk_key: &StoreKey,
        before: Option<Entry>,
        placeholder_version: Version,
    ) -> Result<()> {
        let write = match before {
            Some(entry) => StagedWrite::put(Arc::clone(&self.primary), pk_key.clone(), entry.value)
                .availability(entry.availability)
                .expecting(Expected::At(placeholder_version)),
            None => StagedWrite::remove(Arc::clone(&self.primary), pk_key.clone())
                .expecting(Expected::At(placeholder_version)),
        };
        self.env.commit_conditional(std::slice::from_ref(&write))?;
        Ok(())
    }

    // ===== Writes =====

    /// Stage a whole-record write
    ///
    /// The record must be an object; a missing or null primary key gets a
    /// generated uuid. When the table has an update-time attribute and the
    /// incoming value is strictly older than the stored one, the write is
    /// dropped silently (`StaleDropped`).
    ///
    /// Staging re-runs on every commit attempt, so the derived index
    /// writes and the version expectation always reflect the freshest
    /// committed state even when the commit retries past a conflict.
    pub fn put(
        self: &Arc<Self>,
        record: Value,
        options: &WriteOptions,
        txn: &mut Transaction,
    ) -> Result<PutOutcome> {
        let mut attrs = record
            .into_object()
            .ok_or_else(|| Error::validation("record must be an object"))?;
        let pk = match attrs.get(&self.schema.primary_key) {
            None | Some(Value::Null) => {
                let generated = Value::String(Uuid::new_v4().to_string());
                attrs.insert(self.schema.primary_key.clone(), generated.clone());
                generated
            }
            Some(Value::Array(_)) | Some(Value::Object(_)) => {
                return Err(Error::validation(format!(
                    "primary key '{}' must be a scalar",
                    self.schema.primary_key
                )));
            }
            Some(existing) => existing.clone(),
        };

        // Decide the outcome against the transaction's read view so the
        // caller learns about a dropped write now; staging re-checks at
        // commit time.
        let current = txn.read(&self.primary, &StoreKey::single(pk.clone()));
        if self.is_stale_put(current.as_ref(), &attrs) {
            debug!(table = %self.schema.name, key = %pk, "stale write dropped");
            return Ok(PutOutcome::StaleDropped { key: pk });
        }

        let table = Arc::clone(self);
        let options = options.clone();
        let staged_pk = pk.clone();
        txn.stage(Box::new(move |txn| {
            table.stage_record_put(&staged_pk, &attrs, &options, txn)
        }));
        Ok(PutOutcome::Applied { key: pk })
    }

    // One commit attempt's worth of writes for a whole-record put: derived
    // index writes and the version expectation come from the attempt's
    // fresh snapshot, and the update-time check re-runs so a write that
    // became stale mid-flight still converges to the newest copy.
    fn stage_record_put(
        &self,
        pk: &Value,
        attrs: &BTreeMap<String, Value>,
        options: &WriteOptions,
        txn: &mut Transaction,
    ) -> Result<()> {
        let pk_key = StoreKey::single(pk.clone());
        let current = txn.read(&self.primary, &pk_key);
        if self.is_stale_put(current.as_ref(), attrs) {
            debug!(table = %self.schema.name, key = %pk, "stale write dropped at commit");
            return Ok(());
        }

        // Index writes are derived data: unconditioned, same commit.
        for write in self.index_diff(
            current.as_ref().and_then(|e| e.value.as_object()),
            Some(attrs),
            pk,
        ) {
            txn.add_write(write);
        }
        txn.add_write(
            StagedWrite::put(Arc::clone(&self.primary), pk_key, Value::Object(attrs.clone()))
                .expecting(Expected::from_observed(current.map(|e| e.version)))
                .audited(self.audit_spec(AuditOperation::Put, options, false)),
        );
        Ok(())
    }

    fn is_stale_put(&self, current: Option<&Entry>, attrs: &BTreeMap<String, Value>) -> bool {
        let Some(lww_attr) = &self.schema.update_time_attribute else {
            return false;
        };
        let (Some(current), Some(incoming)) = (current, attrs.get(lww_attr)) else {
            return false;
        };
        let Some(stored) = current.value.get_attr(lww_attr) else {
            return false;
        };
        incoming.total_cmp(stored) == std::cmp::Ordering::Less
    }

    /// Stage removal of one record and its index entries
    ///
    /// Returns `false` without staging anything when no record exists in
    /// the transaction's read view.
    pub fn delete(
        self: &Arc<Self>,
        key: &Value,
        options: &WriteOptions,
        txn: &mut Transaction,
    ) -> Result<bool> {
        if txn
            .read(&self.primary, &StoreKey::single(key.clone()))
            .is_none()
        {
            return Ok(false);
        }
        let table = Arc::clone(self);
        let options = options.clone();
        let key = key.clone();
        txn.stage(Box::new(move |txn| {
            let pk_key = StoreKey::single(key.clone());
            let Some(current) = txn.read(&table.primary, &pk_key) else {
                // Gone since staging; nothing left to remove.
                return Ok(());
            };
            for write in table.index_diff(current.value.as_object(), None, &key) {
                txn.add_write(write);
            }
            txn.add_write(
                StagedWrite::remove(Arc::clone(&table.primary), pk_key)
                    .expecting(Expected::At(current.version))
                    .audited(table.audit_spec(AuditOperation::Delete, &options, false)),
            );
            Ok(())
        }));
        Ok(true)
    }

    /// Open a record for copy-on-write mutation
    ///
    /// The returned handle accumulates attribute changes; they fold into a
    /// regular put when the transaction commits. An untouched handle stages
    /// nothing.
    pub fn update(
        self: &Arc<Self>,
        key: &Value,
        txn: &mut Transaction,
    ) -> Result<Arc<Mutex<WritableRecord>>> {
        let record = self.get(key, txn)?.ok_or_else(|| {
            Error::validation(format!("no record under key {key} to update"))
        })?;
        let writable = Arc::new(Mutex::new(WritableRecord::new(record)));
        let table = Arc::clone(self);
        let handle = Arc::clone(&writable);
        txn.stage(Box::new(move |txn| {
            let writable = handle.lock();
            if !writable.is_dirty() {
                return Ok(());
            }
            let Some(attrs) = writable.merged_value().into_object() else {
                return Ok(());
            };
            let Some(pk) = attrs.get(&table.schema.primary_key).cloned() else {
                return Ok(());
            };
            table.stage_record_put(&pk, &attrs, &WriteOptions::default(), txn)
        }));
        Ok(writable)
    }

    /// Re-mark a stored record `Invalidated` so the next sourced read
    /// re-fetches
    pub fn invalidate(
        self: &Arc<Self>,
        key: &Value,
        options: &WriteOptions,
        txn: &mut Transaction,
    ) -> Result<bool> {
        if txn
            .read(&self.primary, &StoreKey::single(key.clone()))
            .is_none()
        {
            return Ok(false);
        }
        let table = Arc::clone(self);
        let options = options.clone();
        let key = key.clone();
        txn.stage(Box::new(move |txn| {
            let pk_key = StoreKey::single(key.clone());
            let Some(current) = txn.read(&table.primary, &pk_key) else {
                return Ok(());
            };
            txn.add_write(
                StagedWrite::put(Arc::clone(&table.primary), pk_key, current.value)
                    .availability(Availability::Invalidated)
                    .expecting(Expected::At(current.version))
                    .audited(table.audit_spec(AuditOperation::Put, &options, true)),
            );
            Ok(())
        }));
        Ok(true)
    }

    /// Stage a message publication
    ///
    /// Nothing is written to the primary store; the commit appends an audit
    /// entry carrying the payload and subscribers on the key receive it.
    pub fn publish(
        &self,
        key: &Value,
        message: Value,
        options: &WriteOptions,
        txn: &mut Transaction,
    ) -> Result<()> {
        txn.add_write(
            StagedWrite::message(Arc::clone(&self.primary), StoreKey::single(key.clone()), message)
                .audited(self.audit_spec(AuditOperation::Message, options, false)),
        );
        Ok(())
    }

    fn audit_spec(
        &self,
        operation: AuditOperation,
        options: &WriteOptions,
        invalidated: bool,
    ) -> AuditSpec {
        AuditSpec {
            table_id: self.schema.id,
            operation,
            actor: options.actor.clone(),
            invalidated,
        }
    }

    fn index_diff(
        &self,
        old: Option<&BTreeMap<String, Value>>,
        new: Option<&BTreeMap<String, Value>>,
        pk: &Value,
    ) -> Vec<StagedWrite> {
        use std::cmp::Ordering;
        let mut writes = Vec::new();
        for index in self.indexes.read().iter() {
            let old_values = indexable_values(old.and_then(|m| m.get(index.attribute())));
            let new_values = indexable_values(new.and_then(|m| m.get(index.attribute())));
            for value in &old_values {
                if !new_values
                    .iter()
                    .any(|v| v.total_cmp(value) == Ordering::Equal)
                {
                    writes.push(StagedWrite::remove(
                        Arc::clone(index.store()),
                        StoreKey::pair(value.clone(), pk.clone()),
                    ));
                }
            }
            for value in new_values {
                if !old_values
                    .iter()
                    .any(|v| v.total_cmp(&value) == Ordering::Equal)
                {
                    writes.push(StagedWrite::put(
                        Arc::clone(index.store()),
                        StoreKey::pair(value, pk.clone()),
                        pk.clone(),
                    ));
                }
            }
        }
        writes
    }

    // ===== Search =====

    /// Evaluate a condition-list query against the transaction's snapshots
    pub fn search(
        &self,
        query: &SearchQuery,
        options: &SearchOptions,
        txn: &mut Transaction,
    ) -> Result<Vec<Record>> {
        search::execute(self, query, options, txn)
    }

    // ===== Subscriptions =====

    /// Subscribe to one key, or the whole table with `None`
    ///
    /// With `retain`, the currently stored value (or, for a wildcard, every
    /// stored value) is delivered before live notifications.
    pub fn subscribe(&self, key: Option<Value>, options: SubscribeOptions) -> Subscription {
        let subscription = self.subscribers.subscribe(key.clone());
        if options.retain {
            match key {
                Some(key) => {
                    if let Some(entry) = self.primary.get(&StoreKey::single(key.clone())) {
                        self.subscribers.send_to(
                            subscription.id(),
                            Notification::Retained {
                                key,
                                value: entry.value,
                                version: entry.version,
                            },
                        );
                    }
                }
                None => {
                    for (store_key, entry) in self.primary.scan() {
                        let Some(key) = store_key.first() else { continue };
                        self.subscribers.send_to(
                            subscription.id(),
                            Notification::Retained {
                                key: key.clone(),
                                value: entry.value,
                                version: entry.version,
                            },
                        );
                    }
                }
            }
        }
        subscription
    }

    /// Drop one subscription
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    pub(crate) fn notify_commit(&self, entry: &AuditEntry) {
        self.subscribers.notify(entry);
    }

    // ===== TTL =====

    /// Start (or restart) periodic TTL expiration for this table
    ///
    /// Only the designated reaper worker actually runs the thread; on other
    /// workers this is a no-op, so every worker can call it unconditionally.
    pub fn set_ttl_expiration(self: &Arc<Self>, ttl: Duration) {
        if !self.reaper_allowed {
            debug!(table = %self.schema.name, "ttl reaper not designated on this worker");
            return;
        }
        let interval = (ttl / 4).clamp(Duration::from_millis(25), Duration::from_secs(1));
        let reaper = TtlReaper::spawn(Arc::downgrade(self), ttl, interval);
        *self.reaper.lock() = Some(reaper);
    }

    /// Stop periodic TTL expiration
    pub fn clear_ttl_expiration(&self) {
        self.reaper.lock().take();
    }

    /// Remove every record older than `ttl`
    ///
    /// One conditional commit per record: a record updated after the scan
    /// observed it fails its version check and survives.
    pub fn reap_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Timestamp::now().saturating_sub(ttl);
        let mut removed = 0;
        for (store_key, entry) in self.primary.scan() {
            if entry.version.as_timestamp() >= cutoff {
                continue;
            }
            let Some(pk) = store_key.first().cloned() else {
                continue;
            };
            let mut writes = self.index_diff(entry.value.as_object(), None, &pk);
            writes.push(
                StagedWrite::remove(Arc::clone(&self.primary), store_key)
                    .expecting(Expected::At(entry.version))
                    .audited(self.audit_spec(
                        AuditOperation::Delete,
                        &WriteOptions::default(),
                        false,
                    )),
            );
            if let CommitResult::Committed(receipt) = self.env.commit_conditional(&writes)? {
                for entry in &receipt.audit {
                    self.notify_commit(entry);
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub(crate) fn stop_background_work(&self) {
        self.clear_ttl_expiration();
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.schema.name)
            .field("id", &self.schema.id)
            .field("indexes", &self.indexes.read().len())
            .field("sourced", &self.source.is_some())
            .finish()
    }
}

/// Decode a stored entry back into a record
pub(crate) fn record_from_entry(entry: &Entry) -> Option<Record> {
    entry
        .value
        .as_object()
        .map(|attrs| Record::with_system(attrs.clone(), entry.version, entry.availability))
}
