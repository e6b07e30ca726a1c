//! Cost-ordered condition-list search evaluator
//!
//! Execution plan, in order:
//!
//! 1. Validate: every condition's attribute must be the primary key or a
//!    `Ready` index; malformed conditions fail before anything runs.
//! 2. Annotate each condition with a cost: primary-key equality is 1,
//!    index equality is the (cached) index cardinality, range-capable
//!    comparisons a fixed large constant, `contains`/`endsWith` unbounded.
//! 3. Sort ascending and drive candidates from the cheapest stream.
//!
//! AND fetches candidate records from the cheapest condition's store range
//! and filters them through every predicate in memory; OR walks each
//! condition's stream in cost order with a seen-set for de-duplication, so
//! result order is deterministic for a given store state but not specified.
//! All reads go through the transaction's snapshots.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use tessera_core::{
    Condition, ConditionKind, Error, Operator, Record, Result, SearchOptions, SearchQuery,
    StoreKey, Value,
};
use tessera_storage::{Store, StoreSnapshot};
use tessera_txn::Transaction;
use tracing::trace;

use crate::table::{record_from_entry, Table};

// Cost tiers for conditions without a cardinality estimate.
const COST_RANGE: u64 = 1 << 32;
const COST_UNBOUNDED: u64 = u64::MAX;

struct Planned<'a> {
    condition: &'a Condition,
    // Primary store for primary-key conditions, index store otherwise
    store: Arc<Store>,
    cost: u64,
}

/// Evaluate one query against the transaction's snapshots
pub(crate) fn execute(
    table: &Table,
    query: &SearchQuery,
    options: &SearchOptions,
    txn: &mut Transaction,
) -> Result<Vec<Record>> {
    let planned = plan(table, &query.conditions)?;
    trace!(
        table = table.name(),
        conditions = planned.len(),
        operator = ?query.operator,
        "search"
    );
    let records = if planned.is_empty() {
        scan_filtered(txn.snapshot_of(table.primary()), &[])
    } else {
        match query.operator {
            Operator::And => execute_and(table, txn, &planned)?,
            Operator::Or => execute_or(table, txn, &planned)?,
        }
    };
    let paged = records.into_iter().skip(options.offset);
    Ok(match options.limit {
        Some(limit) => paged.take(limit).collect(),
        None => paged.collect(),
    })
}

fn plan<'a>(table: &Table, conditions: &'a [Condition]) -> Result<Vec<Planned<'a>>> {
    let mut planned = Vec::with_capacity(conditions.len());
    for condition in conditions {
        if let ConditionKind::Between(low, high) = &condition.kind {
            if low.total_cmp(high) == Ordering::Greater {
                return Err(Error::validation(format!(
                    "between bounds on '{}' are out of order",
                    condition.attribute
                )));
            }
        }
        let on_primary_key = condition.attribute == table.schema().primary_key;
        let store = if on_primary_key {
            Arc::clone(table.primary())
        } else {
            let index = table.index_for(&condition.attribute).ok_or_else(|| {
                Error::validation(format!(
                    "attribute '{}' is neither the primary key nor indexed",
                    condition.attribute
                ))
            })?;
            if !index.is_ready() {
                return Err(Error::validation(format!(
                    "attribute '{}' is not indexed yet",
                    condition.attribute
                )));
            }
            Arc::clone(index.store())
        };
        let cost = match &condition.kind {
            ConditionKind::Equals(value) => {
                if on_primary_key {
                    1
                } else {
                    table.index_cardinality(&condition.attribute, value) as u64
                }
            }
            ConditionKind::Contains(_) | ConditionKind::EndsWith(_) => COST_UNBOUNDED,
            _ => COST_RANGE,
        };
        planned.push(Planned {
            condition,
            store,
            cost,
        });
    }
    // Stable: equal costs keep declaration order
    planned.sort_by_key(|p| p.cost);
    Ok(planned)
}

fn execute_and(table: &Table, txn: &mut Transaction, planned: &[Planned]) -> Result<Vec<Record>> {
    let conditions: Vec<&Condition> = planned.iter().map(|p| p.condition).collect();
    let cheapest = &planned[0];
    if cheapest.cost == COST_UNBOUNDED {
        // No condition can drive an index range; scan once
        return Ok(scan_filtered(txn.snapshot_of(table.primary()), &conditions));
    }
    let candidates = candidate_keys(txn, cheapest);
    let mut records = Vec::new();
    for key in candidates {
        let Some(entry) = txn.read(table.primary(), &StoreKey::single(key)) else {
            continue;
        };
        let Some(record) = record_from_entry(&entry) else {
            continue;
        };
        // The stream only proposes; the record itself decides
        if conditions
            .iter()
            .all(|c| matches(record.get(&c.attribute), &c.kind))
        {
            records.push(record);
        }
    }
    Ok(records)
}

fn execute_or(table: &Table, txn: &mut Transaction, planned: &[Planned]) -> Result<Vec<Record>> {
    let mut seen: BTreeSet<StoreKey> = BTreeSet::new();
    let mut records = Vec::new();
    for p in planned {
        if p.cost == COST_UNBOUNDED {
            let matched: Vec<(StoreKey, Record)> = txn
                .snapshot_of(table.primary())
                .scan()
                .filter_map(|(k, e)| record_from_entry(e).map(|r| (k.clone(), r)))
                .filter(|(_, r)| matches(r.get(&p.condition.attribute), &p.condition.kind))
                .collect();
            for (pk_key, record) in matched {
                if seen.insert(pk_key) {
                    records.push(record);
                }
            }
            continue;
        }
        for key in candidate_keys(txn, p) {
            let pk_key = StoreKey::single(key);
            if seen.contains(&pk_key) {
                continue;
            }
            let Some(entry) = txn.read(table.primary(), &pk_key) else {
                continue;
            };
            let Some(record) = record_from_entry(&entry) else {
                continue;
            };
            if matches(record.get(&p.condition.attribute), &p.condition.kind) {
                seen.insert(pk_key);
                records.push(record);
            }
        }
    }
    Ok(records)
}

// Candidate primary keys from one condition's store range. Works for both
// store layouts because a primary key is the last part of `[pk]` and of
// `[indexed value, pk]` alike. Never called for unbounded conditions.
fn candidate_keys(txn: &mut Transaction, planned: &Planned) -> Vec<Value> {
    let snapshot = txn.snapshot_of(&planned.store);
    match &planned.condition.kind {
        ConditionKind::Equals(value) => snapshot
            .scan_prefix(value)
            .filter_map(|(k, _)| k.last().cloned())
            .collect(),
        ConditionKind::Between(low, high) => {
            last_parts(snapshot.range_by_first(Bound::Included(low), Bound::Included(high)))
        }
        ConditionKind::GreaterThan(value) => {
            last_parts(snapshot.range_by_first(Bound::Excluded(value), Bound::Unbounded))
        }
        ConditionKind::GreaterThanOrEqual(value) => {
            last_parts(snapshot.range_by_first(Bound::Included(value), Bound::Unbounded))
        }
        ConditionKind::LessThan(value) => {
            last_parts(snapshot.range_by_first(Bound::Unbounded, Bound::Excluded(value)))
        }
        ConditionKind::LessThanOrEqual(value) => {
            last_parts(snapshot.range_by_first(Bound::Unbounded, Bound::Included(value)))
        }
        ConditionKind::StartsWith(prefix) => {
            let start = Value::String(prefix.clone());
            snapshot
                .range_by_first(Bound::Included(&start), Bound::Unbounded)
                .take_while(|(k, _)| {
                    k.first()
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.starts_with(prefix.as_str()))
                })
                .filter_map(|(k, _)| k.last().cloned())
                .collect()
        }
        ConditionKind::Contains(_) | ConditionKind::EndsWith(_) => Vec::new(),
    }
}

fn last_parts<'a>(iter: impl Iterator<Item = (&'a StoreKey, &'a tessera_storage::Entry)>) -> Vec<Value> {
    iter.filter_map(|(k, _)| k.last().cloned()).collect()
}

fn scan_filtered(snapshot: &StoreSnapshot, conditions: &[&Condition]) -> Vec<Record> {
    snapshot
        .scan()
        .filter_map(|(_, e)| record_from_entry(e))
        .filter(|r| {
            conditions
                .iter()
                .all(|c| matches(r.get(&c.attribute), &c.kind))
        })
        .collect()
}

/// Whether one stored attribute value satisfies a condition
///
/// Array values match when any element does, mirroring per-element
/// indexing. String conditions never match non-string values; ordered
/// comparisons use the store key comparator.
fn matches(value: Option<&Value>, kind: &ConditionKind) -> bool {
    let Some(value) = value else { return false };
    if let Value::Array(items) = value {
        return items.iter().any(|item| matches(Some(item), kind));
    }
    match kind {
        ConditionKind::Equals(target) => value == target,
        ConditionKind::Contains(needle) => {
            value.as_str().is_some_and(|s| s.contains(needle.as_str()))
        }
        ConditionKind::StartsWith(prefix) => {
            value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
        }
        ConditionKind::EndsWith(suffix) => {
            value.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
        }
        ConditionKind::Between(low, high) => {
            value.total_cmp(low) != Ordering::Less && value.total_cmp(high) != Ordering::Greater
        }
        ConditionKind::GreaterThan(target) => value.total_cmp(target) == Ordering::Greater,
        ConditionKind::GreaterThanOrEqual(target) => value.total_cmp(target) != Ordering::Less,
        ConditionKind::LessThan(target) => value.total_cmp(target) == Ordering::Less,
        ConditionKind::LessThanOrEqual(target) => value.total_cmp(target) != Ordering::Greater,
    }
}
