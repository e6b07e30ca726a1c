//! Copy-on-write mutation wrapper over a frozen record
//!
//! A `WritableRecord` lets a caller read and write arbitrary attributes of
//! a record under mutation without eagerly deep-cloning the (possibly
//! large) original. It holds the frozen original plus an overlay of
//! changed attributes:
//!
//! - reads return the overlay value when present, else the original's
//! - a nested Object/Array original is deep-copied into the overlay
//!   lazily on first *read*, so unread nested structures are never copied
//! - writes always go to the overlay only
//!
//! Serialization for commit is "original attributes overridden by overlay
//! attributes" - a shallow merge. Instances are cheap and short-lived: one
//! per in-flight update, folded into a put when the owning transaction
//! commits.

use std::collections::BTreeMap;
use tessera_core::{Record, Value};

/// A record under copy-on-write mutation
#[derive(Debug)]
pub struct WritableRecord {
    original: Record,
    overlay: BTreeMap<String, Value>,
}

impl WritableRecord {
    /// Wrap a frozen record; nothing is copied until first use
    pub fn new(original: Record) -> Self {
        Self {
            original,
            overlay: BTreeMap::new(),
        }
    }

    /// The frozen record this writable wraps
    pub fn original(&self) -> &Record {
        &self.original
    }

    /// Read an attribute
    ///
    /// Nested Object/Array values are copied into the overlay on first
    /// read so later mutation through `get_mut` cannot alias the frozen
    /// original.
    pub fn get(&mut self, attribute: &str) -> Option<&Value> {
        if self.overlay.contains_key(attribute) {
            return self.overlay.get(attribute);
        }
        match self.original.get(attribute) {
            Some(value @ (Value::Object(_) | Value::Array(_))) => {
                let copied = value.clone();
                self.overlay.insert(attribute.to_string(), copied);
                self.overlay.get(attribute)
            }
            other => other,
        }
    }

    /// Read an attribute without triggering the copy-on-read
    pub fn peek(&self, attribute: &str) -> Option<&Value> {
        self.overlay
            .get(attribute)
            .or_else(|| self.original.get(attribute))
    }

    /// Mutably access an attribute, copying it into the overlay if needed
    pub fn get_mut(&mut self, attribute: &str) -> Option<&mut Value> {
        if !self.overlay.contains_key(attribute) {
            let copied = self.original.get(attribute)?.clone();
            self.overlay.insert(attribute.to_string(), copied);
        }
        self.overlay.get_mut(attribute)
    }

    /// Write an attribute into the overlay
    pub fn set(&mut self, attribute: impl Into<String>, value: Value) {
        self.overlay.insert(attribute.into(), value);
    }

    /// Whether any attribute has been written or copied
    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// The shallow merge of original and overlay, as a record payload
    pub fn merged_value(&self) -> Value {
        let mut attributes = self.original.attributes().clone();
        for (name, value) in &self.overlay {
            attributes.insert(name.clone(), value.clone());
        }
        Value::Object(attributes)
    }

    /// Consume into the merged frozen record
    ///
    /// The result keeps the original's system fields; commit assigns the
    /// new version.
    pub fn into_record(self) -> Record {
        let version = self.original.version();
        let availability = self.original.availability();
        let mut attributes = self.original.into_attributes();
        attributes.extend(self.overlay);
        Record::with_system(attributes, version, availability)
    }
}
