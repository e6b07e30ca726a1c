//! Core types for the Tessera table engine
//!
//! This crate defines the contract types shared by the storage, transaction
//! and table layers: the value model and store key comparator, frozen
//! records with their system fields, monotonic versions, audit log entries,
//! the search condition types, the error taxonomy, and the `Source`
//! capability trait.

pub mod audit;
pub mod error;
pub mod key;
pub mod record;
pub mod search;
pub mod timestamp;
pub mod traits;
pub mod types;
pub mod value;
pub mod version;

pub use audit::{AuditEntry, AuditOperation};
pub use error::{Error, Result};
pub use key::StoreKey;
pub use record::{Availability, Record};
pub use search::{Condition, ConditionKind, Operator, SearchOptions, SearchQuery};
pub use timestamp::Timestamp;
pub use traits::{Source, SourceRecord};
pub use types::TableId;
pub use value::Value;
pub use version::{LogicalClock, Version};
