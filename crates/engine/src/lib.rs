//! Table engine for Tessera
//!
//! The top layer of the stack: `Database` owns the storage environment and
//! the open-table registry; `Table` implements record CRUD with secondary
//! index maintenance, source fallback for cache-style tables, change
//! subscriptions, message publication, and TTL expiration; the search
//! module evaluates cost-ordered condition-list queries.

pub mod database;
pub mod index;
pub mod schema;
mod search;
pub mod subscribe;
pub mod table;
pub mod ttl;

pub use database::{Database, DatabaseOptions};
pub use index::{BackfillHandle, IndexState, SecondaryIndex};
pub use schema::{TableDefinition, TableSchema};
pub use subscribe::{Notification, SubscribeOptions, Subscription, SubscriptionId};
pub use table::{PutOutcome, Table, WriteOptions};
pub use ttl::TtlReaper;
