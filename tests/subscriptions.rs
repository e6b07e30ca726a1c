//! Change subscriptions end to end: keyed and wildcard delivery, retained
//! values, delete notifications, and teardown.

use std::time::Duration;

use tessera::{
    AuditOperation, Database, Notification, SubscribeOptions, TableDefinition, Value, WriteOptions,
};

const WAIT: Duration = Duration::from_millis(500);

fn record(id: i64, state: &str) -> Value {
    Value::object([("id", Value::Int(id)), ("state", state.into())])
}

#[test]
fn keyed_subscription_receives_only_its_key() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let sub = table.subscribe(Some(Value::Int(7)), SubscribeOptions::default());

    let mut txn = db.begin();
    table.put(record(9, "AZ"), &WriteOptions::default(), &mut txn).unwrap();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let Some(Notification::Commit(entry)) = sub.recv_timeout(WAIT) else {
        panic!("expected a commit notification");
    };
    assert_eq!(entry.key, Value::Int(7));
    assert_eq!(entry.operation, AuditOperation::Put);
    assert!(sub.try_recv().is_none());
}

#[test]
fn wildcard_subscription_receives_every_commit() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let sub = table.subscribe(None, SubscribeOptions::default());

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    table.put(record(9, "AZ"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let mut keys = Vec::new();
    for _ in 0..2 {
        let Some(Notification::Commit(entry)) = sub.recv_timeout(WAIT) else {
            panic!("expected two commit notifications");
        };
        keys.push(entry.key);
    }
    keys.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(keys, vec![Value::Int(7), Value::Int(9)]);
}

#[test]
fn retained_delivery_precedes_live_commits() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let sub = table.subscribe(Some(Value::Int(7)), SubscribeOptions::retained());
    let Some(Notification::Retained { key, value, .. }) = sub.recv_timeout(WAIT) else {
        panic!("expected the retained value first");
    };
    assert_eq!(key, Value::Int(7));
    assert_eq!(value.get_attr("state"), Some(&Value::String("CO".into())));

    table.put(record(7, "NY"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();
    assert!(matches!(
        sub.recv_timeout(WAIT),
        Some(Notification::Commit(entry)) if entry.key == Value::Int(7)
    ));
}

#[test]
fn wildcard_retained_delivery_covers_the_table() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    table.put(record(9, "AZ"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let sub = table.subscribe(None, SubscribeOptions::retained());
    let mut keys = Vec::new();
    for _ in 0..2 {
        let Some(Notification::Retained { key, .. }) = sub.recv_timeout(WAIT) else {
            panic!("expected retained values for every stored record");
        };
        keys.push(key);
    }
    keys.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(keys, vec![Value::Int(7), Value::Int(9)]);
    assert!(sub.try_recv().is_none());
}

#[test]
fn retained_subscription_on_missing_key_starts_empty() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let sub = table.subscribe(Some(Value::Int(404)), SubscribeOptions::retained());
    assert!(sub.try_recv().is_none());
}

#[test]
fn deletes_notify_with_the_delete_operation() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let sub = table.subscribe(Some(Value::Int(7)), SubscribeOptions::default());
    table.delete(&Value::Int(7), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let Some(Notification::Commit(entry)) = sub.recv_timeout(WAIT) else {
        panic!("expected a delete notification");
    };
    assert_eq!(entry.operation, AuditOperation::Delete);
    assert!(entry.previous_version.is_some());
}

#[test]
fn dropped_subscription_does_not_block_commits() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let gone = table.subscribe(None, SubscribeOptions::default());
    let live = table.subscribe(None, SubscribeOptions::default());
    drop(gone);

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();
    assert!(live.recv_timeout(WAIT).is_some());
}

#[test]
fn unsubscribe_stops_delivery() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let sub = table.subscribe(None, SubscribeOptions::default());
    table.unsubscribe(sub.id());

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();
    assert!(sub.try_recv().is_none());
}
