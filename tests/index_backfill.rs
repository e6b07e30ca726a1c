//! Index declaration on a populated table: search gating while the
//! backfill runs, full results once it completes.

use tessera::{
    Condition, Database, SearchOptions, SearchQuery, TableDefinition, Value, WriteOptions,
};

const ROWS: i64 = 5_000;

#[test]
fn late_declared_index_gates_then_serves() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("readings")).unwrap();

    let mut txn = db.begin();
    for id in 0..ROWS {
        table
            .put(
                Value::object([
                    ("id", Value::Int(id)),
                    ("bucket", Value::Int(id % 10)),
                ]),
                &WriteOptions::default(),
                &mut txn,
            )
            .unwrap();
        if id % 500 == 499 {
            db.commit(&mut txn).unwrap();
        }
    }
    db.commit(&mut txn).unwrap();

    // Before any declaration the attribute is simply not searchable
    let err = table
        .search(
            &SearchQuery::all(vec![Condition::equals("bucket", 3i64)]),
            &SearchOptions::default(),
            &mut txn,
        )
        .unwrap_err();
    assert!(err.is_validation());

    // Re-declare with the index; the backfill scans in the background
    let table = db
        .table(&TableDefinition::new("readings").index("bucket"))
        .unwrap();
    let early = table.search(
        &SearchQuery::all(vec![Condition::equals("bucket", 3i64)]),
        &SearchOptions::default(),
        &mut txn,
    );
    match early {
        // Queried while still backfilling: fail fast with the gating error
        Err(err) => {
            assert!(err.is_validation());
            assert!(err.to_string().contains("not indexed yet"));
        }
        // The scan can finish first on a fast machine; then results must
        // already be complete
        Ok(records) => assert_eq!(records.len(), (ROWS / 10) as usize),
    }

    table.wait_for_index("bucket");
    let mut txn = db.begin();
    let records = table
        .search(
            &SearchQuery::all(vec![Condition::equals("bucket", 3i64)]),
            &SearchOptions::default(),
            &mut txn,
        )
        .unwrap();
    assert_eq!(records.len(), (ROWS / 10) as usize);
    assert!(records
        .iter()
        .all(|r| r.get("bucket") == Some(&Value::Int(3))));
}

#[test]
fn writes_during_backfill_are_indexed() {
    let db = Database::new();
    let table = db.table(&TableDefinition::new("readings")).unwrap();
    let mut txn = db.begin();
    for id in 0..ROWS {
        table
            .put(
                Value::object([("id", Value::Int(id)), ("bucket", Value::Int(1))]),
                &WriteOptions::default(),
                &mut txn,
            )
            .unwrap();
        if id % 500 == 499 {
            db.commit(&mut txn).unwrap();
        }
    }
    db.commit(&mut txn).unwrap();

    let table = db
        .table(&TableDefinition::new("readings").index("bucket"))
        .unwrap();
    // Write while the backfill scan may still be running
    table
        .put(
            Value::object([("id", Value::Int(ROWS)), ("bucket", Value::Int(2))]),
            &WriteOptions::default(),
            &mut txn,
        )
        .unwrap();
    db.commit(&mut txn).unwrap();
    table.wait_for_index("bucket");

    let mut txn = db.begin();
    let fresh = table
        .search(
            &SearchQuery::all(vec![Condition::equals("bucket", 2i64)]),
            &SearchOptions::default(),
            &mut txn,
        )
        .unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].get("id"), Some(&Value::Int(ROWS)));
}
