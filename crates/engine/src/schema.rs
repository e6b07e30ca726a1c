//! Table definitions and persisted schemas
//!
//! A `TableDefinition` is what a caller declares; a `TableSchema` is the
//! persisted form with the assigned table id. Schemas live in the metadata
//! store under `("table", name)` keys, encoded as object values, so a
//! database can enumerate and reopen its tables.

use tessera_core::{Error, Result, StoreKey, TableId, Value};

/// Caller-side table declaration
///
/// Declaration is idempotent at the database level: the first declaration
/// provisions, later ones reopen. Newly added indexed attributes trigger a
/// background backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name, unique within the database
    pub name: String,
    /// Primary key attribute; generated (uuid v4) when a put omits it
    pub primary_key: String,
    /// Attributes to maintain secondary indexes for
    pub indexed: Vec<String>,
    /// Attribute holding the record's upstream modification time; when set,
    /// a put strictly older than the stored record is silently dropped
    pub update_time_attribute: Option<String>,
}

impl TableDefinition {
    /// Definition with the default `"id"` primary key and no indexes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            indexed: Vec::new(),
            update_time_attribute: None,
        }
    }

    /// Use a different primary key attribute
    pub fn primary_key(mut self, attribute: impl Into<String>) -> Self {
        self.primary_key = attribute.into();
        self
    }

    /// Declare a secondary index
    pub fn index(mut self, attribute: impl Into<String>) -> Self {
        self.indexed.push(attribute.into());
        self
    }

    /// Enable last-write-wins conflict dropping keyed on this attribute
    pub fn update_time(mut self, attribute: impl Into<String>) -> Self {
        self.update_time_attribute = Some(attribute.into());
        self
    }
}

/// Persisted table schema: a definition plus its assigned id
///
/// Ids are assigned once at first declaration and never reused, even after
/// a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Stable numeric id, assigned at first declaration
    pub id: TableId,
    /// Table name
    pub name: String,
    /// Primary key attribute
    pub primary_key: String,
    /// Indexed attributes
    pub indexed: Vec<String>,
    /// Last-write-wins attribute, if configured
    pub update_time_attribute: Option<String>,
}

impl TableSchema {
    /// Bind a definition to its assigned id
    pub fn from_definition(id: TableId, definition: &TableDefinition) -> Self {
        Self {
            id,
            name: definition.name.clone(),
            primary_key: definition.primary_key.clone(),
            indexed: definition.indexed.clone(),
            update_time_attribute: definition.update_time_attribute.clone(),
        }
    }

    /// Metadata store key for this table's schema
    pub fn meta_key(name: &str) -> StoreKey {
        StoreKey::pair(Value::String("table".to_string()), Value::String(name.to_string()))
    }

    /// Name of the table's primary store
    pub fn primary_store_name(&self) -> String {
        format!("table:{}:primary", self.name)
    }

    /// Name of one of the table's index stores
    pub fn index_store_name(&self, attribute: &str) -> String {
        format!("table:{}:index:{}", self.name, attribute)
    }

    /// Encode for the metadata store
    pub fn to_value(&self) -> Value {
        let mut pairs: Vec<(&str, Value)> = vec![
            ("id", Value::Int(self.id.as_u32() as i64)),
            ("name", Value::String(self.name.clone())),
            ("primary_key", Value::String(self.primary_key.clone())),
            (
                "indexed",
                Value::Array(
                    self.indexed
                        .iter()
                        .map(|a| Value::String(a.clone()))
                        .collect(),
                ),
            ),
        ];
        if let Some(attr) = &self.update_time_attribute {
            pairs.push(("update_time", Value::String(attr.clone())));
        }
        Value::object(pairs)
    }

    /// Decode from the metadata store
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Storage("table schema is not an object".to_string()))?;
        let string_field = |name: &str| -> Result<String> {
            map.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Storage(format!("table schema missing field '{name}'")))
        };
        let id = map
            .get("id")
            .and_then(Value::as_int)
            .ok_or_else(|| Error::Storage("table schema missing field 'id'".to_string()))?;
        let indexed = match map.get("indexed") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::Storage("indexed attribute is not a string".to_string()))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };
        Ok(Self {
            id: TableId::from_u32(id as u32),
            name: string_field("name")?,
            primary_key: string_field("primary_key")?,
            indexed,
            update_time_attribute: map.get("update_time").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableSchema {
        TableSchema::from_definition(
            TableId::from_u32(3),
            &TableDefinition::new("weather")
                .index("state")
                .index("temperature")
                .update_time("observed_at"),
        )
    }

    #[test]
    fn test_definition_builder() {
        let def = TableDefinition::new("weather").primary_key("station").index("state");
        assert_eq!(def.name, "weather");
        assert_eq!(def.primary_key, "station");
        assert_eq!(def.indexed, vec!["state".to_string()]);
        assert!(def.update_time_attribute.is_none());
    }

    #[test]
    fn test_store_names() {
        let schema = sample();
        assert_eq!(schema.primary_store_name(), "table:weather:primary");
        assert_eq!(schema.index_store_name("state"), "table:weather:index:state");
    }

    #[test]
    fn test_schema_round_trip() {
        let schema = sample();
        let restored = TableSchema::from_value(&schema.to_value()).unwrap();
        assert_eq!(restored, schema);
    }

    #[test]
    fn test_round_trip_without_update_time() {
        let schema = TableSchema::from_definition(
            TableId::from_u32(1),
            &TableDefinition::new("plain"),
        );
        let restored = TableSchema::from_value(&schema.to_value()).unwrap();
        assert_eq!(restored, schema);
        assert!(restored.update_time_attribute.is_none());
    }

    #[test]
    fn test_from_value_rejects_malformed() {
        assert!(TableSchema::from_value(&Value::Int(1)).is_err());
        assert!(TableSchema::from_value(&Value::object([("name", Value::String("x".into()))])).is_err());
    }
}
