//! TTL expiration: aged records are reaped, recently written or updated
//! records survive, and the reaper role flag gates the background thread.

use std::time::Duration;

use tessera::{Database, DatabaseOptions, TableDefinition, Value, WriteOptions};

fn record(id: i64, state: &str) -> Value {
    Value::object([("id", Value::Int(id)), ("state", state.into())])
}

#[test]
fn reap_removes_aged_records_and_their_index_entries() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather").index("state")).unwrap();
    table.wait_for_index("state");

    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    table.put(record(23, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    // Both age past the ttl; refreshing one must spare it
    std::thread::sleep(Duration::from_millis(80));
    table.put(record(23, "NY"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    let removed = table.reap_expired(Duration::from_millis(40)).unwrap();
    assert_eq!(removed, 1);
    assert!(table.get(&Value::Int(7), &mut txn).unwrap().is_none());
    let survivor = table.get(&Value::Int(23), &mut txn).unwrap().unwrap();
    assert_eq!(survivor.get("state"), Some(&Value::String("NY".into())));

    // The reaped record's index entries went in the same commit
    let hits = table
        .search(
            &tessera::SearchQuery::all(vec![tessera::Condition::equals("state", "CO")]),
            &tessera::SearchOptions::default(),
            &mut txn,
        )
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn reap_is_a_noop_for_fresh_records() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("weather")).unwrap();
    let mut txn = db.begin();
    table.put(record(7, "CO"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    assert_eq!(table.reap_expired(Duration::from_secs(60)).unwrap(), 0);
    assert!(table.get(&Value::Int(7), &mut txn).unwrap().is_some());
}

#[test]
fn background_reaper_expires_records() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("sessions")).unwrap();
    let mut txn = db.begin();
    table.put(record(1, "open"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    table.set_ttl_expiration(Duration::from_millis(60));
    // A few reaper intervals; the record ages out without any caller help
    std::thread::sleep(Duration::from_millis(300));
    table.clear_ttl_expiration();

    assert!(table.get(&Value::Int(1), &mut txn).unwrap().is_none());
}

#[test]
fn non_designated_worker_runs_no_reaper() {
    let db = Database::with_options(DatabaseOptions {
        run_ttl_reaper: false,
    });
    let table = db.table(&TableDefinition::new("sessions")).unwrap();
    let mut txn = db.begin();
    table.put(record(1, "open"), &WriteOptions::default(), &mut txn).unwrap();
    db.commit(&mut txn).unwrap();

    table.set_ttl_expiration(Duration::from_millis(40));
    std::thread::sleep(Duration::from_millis(200));
    // set_ttl_expiration was a no-op on this worker
    assert!(table.get(&Value::Int(1), &mut txn).unwrap().is_some());
}
