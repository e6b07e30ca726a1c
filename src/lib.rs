//! Tessera: an embedded transactional table engine
//!
//! Tessera stores versioned records in ordered key-value stores and layers
//! tables on top: secondary indexes with online backfill, a cost-ordered
//! condition-list search evaluator, change subscriptions, TTL expiration,
//! and read-through fallback to a backing source for cache-style tables.
//! Commits are optimistic with transparent conflict retry, escalating to a
//! serializing exclusive commit for large or repeatedly conflicting
//! batches.
//!
//! # Example
//!
//! ```
//! use tessera::{Condition, Database, SearchOptions, SearchQuery, TableDefinition, Value, WriteOptions};
//!
//! # fn main() -> tessera::Result<()> {
//! let db = Database::new();
//! let weather = db.table(&TableDefinition::new("weather").index("state"))?;
//! weather.wait_for_index("state");
//!
//! let mut txn = db.begin();
//! weather.put(
//!     Value::object([("id", Value::Int(7)), ("state", "CO".into())]),
//!     &WriteOptions::default(),
//!     &mut txn,
//! )?;
//! db.commit(&mut txn)?;
//!
//! let hits = weather.search(
//!     &SearchQuery::all(vec![Condition::equals("state", "CO")]),
//!     &SearchOptions::default(),
//!     &mut txn,
//! )?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

pub use tessera_core::{
    AuditEntry, AuditOperation, Availability, Condition, ConditionKind, Error, Operator, Record,
    Result, SearchOptions, SearchQuery, Source, SourceRecord, StoreKey, TableId, Timestamp, Value,
    Version,
};
pub use tessera_engine::{
    BackfillHandle, Database, DatabaseOptions, IndexState, Notification, PutOutcome,
    SubscribeOptions, Subscription, SubscriptionId, Table, TableDefinition, TableSchema,
    WriteOptions,
};
pub use tessera_storage::{CommitReceipt, CommitResult, Env, Store, StoreSnapshot};
pub use tessera_txn::{CommitOutcome, Transaction, WritableRecord};
