//! Audit log entries
//!
//! Every committed mutation that carries an operation appends one
//! `AuditEntry` to the database's append-only audit store, keyed by
//! `(version, table id, primary key)`. Replication catch-up and durable
//! subscriptions read this log in version order; entries are never
//! updated.

use crate::error::{Error, Result};
use crate::types::TableId;
use crate::value::Value;
use crate::version::Version;
use serde::{Deserialize, Serialize};

/// The kind of committed mutation an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOperation {
    /// A primary record was written
    Put,
    /// A primary record was removed
    Delete,
    /// A message was published; the primary record is untouched
    Message,
}

impl AuditOperation {
    /// Stable string form used in the stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Put => "put",
            AuditOperation::Delete => "delete",
            AuditOperation::Message => "message",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "put" => Some(AuditOperation::Put),
            "delete" => Some(AuditOperation::Delete),
            "message" => Some(AuditOperation::Message),
            _ => None,
        }
    }
}

/// One committed mutation in the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Commit version shared by every write in the transaction
    pub version: Version,
    /// Table the mutation applied to
    pub table_id: TableId,
    /// Primary key of the affected record
    pub key: Value,
    /// What happened
    pub operation: AuditOperation,
    /// Version the record had before this commit, if it existed
    pub previous_version: Option<Version>,
    /// Caller identity, when supplied
    pub actor: Option<String>,
    /// Whether the write marked the record invalidated
    pub invalidated: bool,
    /// Published payload, for `Message` entries only
    pub payload: Option<Value>,
}

impl AuditEntry {
    /// Encode for the audit store
    pub fn to_value(&self) -> Value {
        let mut pairs: Vec<(&str, Value)> = vec![
            ("version", Value::Int(self.version.as_u64() as i64)),
            ("table", Value::Int(self.table_id.as_u32() as i64)),
            ("key", self.key.clone()),
            ("operation", Value::String(self.operation.as_str().to_string())),
            ("invalidated", Value::Bool(self.invalidated)),
        ];
        if let Some(prev) = self.previous_version {
            pairs.push(("previous", Value::Int(prev.as_u64() as i64)));
        }
        if let Some(actor) = &self.actor {
            pairs.push(("actor", Value::String(actor.clone())));
        }
        if let Some(payload) = &self.payload {
            pairs.push(("payload", payload.clone()));
        }
        Value::object(pairs)
    }

    /// Decode from the audit store
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Storage("audit entry is not an object".to_string()))?;
        let int_field = |name: &str| -> Result<i64> {
            map.get(name)
                .and_then(Value::as_int)
                .ok_or_else(|| Error::Storage(format!("audit entry missing field '{name}'")))
        };
        let operation = map
            .get("operation")
            .and_then(Value::as_str)
            .and_then(AuditOperation::parse)
            .ok_or_else(|| Error::Storage("audit entry has no valid operation".to_string()))?;
        Ok(AuditEntry {
            version: Version::from_u64(int_field("version")? as u64),
            table_id: TableId::from_u32(int_field("table")? as u32),
            key: map
                .get("key")
                .cloned()
                .ok_or_else(|| Error::Storage("audit entry missing field 'key'".to_string()))?,
            operation,
            previous_version: map
                .get("previous")
                .and_then(Value::as_int)
                .map(|v| Version::from_u64(v as u64)),
            actor: map.get("actor").and_then(Value::as_str).map(str::to_string),
            invalidated: matches!(map.get("invalidated"), Some(Value::Bool(true))),
            payload: map.get("payload").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEntry {
        AuditEntry {
            version: Version::from_u64(1000),
            table_id: TableId::from_u32(3),
            key: Value::Int(7),
            operation: AuditOperation::Put,
            previous_version: Some(Version::from_u64(900)),
            actor: Some("ingest".to_string()),
            invalidated: false,
            payload: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let entry = sample();
        let restored = AuditEntry::from_value(&entry.to_value()).unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_round_trip_message_with_payload() {
        let entry = AuditEntry {
            operation: AuditOperation::Message,
            previous_version: None,
            actor: None,
            payload: Some(Value::object([("level", Value::String("warn".into()))])),
            ..sample()
        };
        let restored = AuditEntry::from_value(&entry.to_value()).unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(AuditEntry::from_value(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_from_value_rejects_missing_operation() {
        let mut value = sample().to_value().into_object().unwrap();
        value.remove("operation");
        assert!(AuditEntry::from_value(&Value::Object(value)).is_err());
    }
}
