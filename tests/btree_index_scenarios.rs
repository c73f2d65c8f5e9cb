//! End-to-end scenarios exercising the B-link tree index manager
//! together with the transaction manager and crash recovery (spec
//! Section 8, "End-to-end scenarios").

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use simpledbm_rss::{
    BTreeIndex, BufferManager, BytesKey, Config, ErrorKind, LockManager, LogManager, RowLocation, TransactionManager,
};

fn key(s: &str) -> BytesKey {
    BytesKey::from_bytes(s.as_bytes().to_vec())
}

fn config(dir: &std::path::Path) -> Config {
    Config {
        control_files: vec![dir.join("a.ctl"), dir.join("b.ctl")],
        groups: vec![simpledbm_rss::config::LogGroupConfig { path: dir.join("group0") }],
        files_per_group: 4,
        file_size: 1 << 20,
        buffer_size: 8192,
        buffer_limit: 256,
        flush_interval_secs: 3600,
        archive_path: dir.join("archive"),
        storage_base_path: dir.join("data"),
    }
}

struct Harness {
    index: Arc<BTreeIndex>,
    txn: Arc<TransactionManager>,
}

fn open(dir: &std::path::Path, container_id: u32, unique: bool) -> Harness {
    let cfg = config(dir);
    let log = LogManager::open(cfg.clone()).unwrap();
    let buffer = Arc::new(BufferManager::new(cfg, Arc::clone(&log), 256));
    let locks = Arc::new(LockManager::new());
    let txn = TransactionManager::new(log, Arc::clone(&buffer), Arc::clone(&locks));
    let index = BTreeIndex::create(buffer, txn.clone(), locks, container_id, container_id, unique).unwrap();
    txn.set_recovery_handler(index.clone());
    Harness { index, txn }
}

const PAIRS: &[(&str, u16)] = &[
    ("a1", 10), ("a2", 11), ("b1", 21), ("b2", 22), ("b3", 23), ("b4", 24),
    ("c1", 31), ("c2", 32), ("d1", 41), ("d2", 42), ("d3", 43), ("d4", 44),
    ("e1", 51), ("e2", 52), ("e3", 53), ("e4", 54), ("f1", 61), ("f2", 62),
    ("f3", 63), ("f4", 64), ("g1", 71), ("g2", 72), ("h1", 81), ("h2", 82),
    ("h3", 83), ("h4", 84), ("i1", 91), ("i2", 92), ("j1", 101), ("j2", 102),
    ("j3", 103), ("j4", 104), ("k1", 111), ("k2", 112),
];

#[test]
fn insert_in_order_then_full_scan() {
    let dir = tempfile::tempdir().unwrap();
    let h = open(dir.path(), 1, true);

    for (k, loc) in PAIRS {
        let tx = h.txn.begin().unwrap();
        h.index.insert(tx.id, key(k), RowLocation::new(1, *loc)).unwrap();
        h.txn.commit(tx.id).unwrap();
    }

    let scan_tx = h.txn.begin().unwrap();
    let mut scan = h.index.scan(scan_tx.id, Some(key("a1")));
    for (k, loc) in PAIRS {
        let (found_key, found_loc) = scan.fetch_next().unwrap().expect("expected a pair");
        assert_eq!(found_key, key(k));
        assert_eq!(found_loc, RowLocation::new(1, *loc));
    }
    assert!(scan.fetch_next().unwrap().is_none(), "scan must stop at the INFINITY sentinel");
    h.txn.commit(scan_tx.id).unwrap();
}

#[test]
fn split_survives_commit_abort_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let h = open(dir.path(), 1, true);

    // Fill the root leaf until it is full enough that the next insert
    // forces a split.
    let mut i = 0u32;
    loop {
        let tx = h.txn.begin().unwrap();
        let k = format!("k{:05}", i);
        let before = h.index.get(&key(&k)).unwrap();
        if before.is_some() {
            h.txn.commit(tx.id).unwrap();
            break;
        }
        let result = h.index.insert(tx.id, key(&k), RowLocation::new(1, i as u16));
        match result {
            Ok(()) => {
                h.txn.commit(tx.id).unwrap();
                i += 1;
                if i > 500 {
                    panic!("root never split");
                }
            }
            Err(_) => {
                h.txn.abort(tx.id).unwrap();
                break;
            }
        }
    }

    let tx1 = h.txn.begin().unwrap();
    h.index.insert(tx1.id, key("da"), RowLocation::new(1, 8)).unwrap();
    h.txn.commit(tx1.id).unwrap();
    assert_eq!(h.index.get(&key("da")).unwrap(), Some(RowLocation::new(1, 8)));

    let tx2 = h.txn.begin().unwrap();
    h.index.insert(tx2.id, key("b1"), RowLocation::new(1, 9)).unwrap();
    h.txn.abort(tx2.id).unwrap();

    assert_eq!(h.index.get(&key("da")).unwrap(), Some(RowLocation::new(1, 8)), "split must survive the later abort");
    assert_eq!(h.index.get(&key("b1")).unwrap(), None, "aborted insert must not be visible");
}

#[test]
fn unique_violation_then_retry_after_abort() {
    let dir = tempfile::tempdir().unwrap();
    let h = open(dir.path(), 1, true);

    let tx0 = h.txn.begin().unwrap();
    h.index.insert(tx0.id, key("a1"), RowLocation::new(1, 10)).unwrap();
    // Left uncommitted so the retry below still sees the key present.

    let tx1 = h.txn.begin().unwrap();
    let err = h.index.insert(tx1.id, key("a1"), RowLocation::new(1, 10)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);
    h.txn.abort(tx1.id).unwrap();

    h.txn.abort(tx0.id).unwrap();

    let tx2 = h.txn.begin().unwrap();
    h.index.insert(tx2.id, key("a1"), RowLocation::new(1, 10)).unwrap();
    h.txn.commit(tx2.id).unwrap();
    assert_eq!(h.index.get(&key("a1")).unwrap(), Some(RowLocation::new(1, 10)));
}

// Scenario 4 ("Delete/insert serialisation"): T2's insert blocks on
// T1's key lock regardless of outcome. What differs is what T2 finds
// once it's unblocked — delete() removes the physical entry right
// away, so a *committed* delete leaves the key gone (T2's insert
// succeeds) while an *aborted* delete's logical undo puts it back
// (T2's unique check sees a duplicate).

#[test]
fn delete_insert_commit_lets_the_insert_through() {
    let dir = tempfile::tempdir().unwrap();
    let h = Arc::new(open(dir.path(), 1, true));

    let tx1 = h.txn.begin().unwrap();
    h.index.insert(tx1.id, key("a1"), RowLocation::new(1, 10)).unwrap();
    h.txn.commit(tx1.id).unwrap();

    let t1 = h.txn.begin().unwrap();
    h.index.delete(t1.id, &key("a1")).unwrap();

    let h2 = Arc::clone(&h);
    let handle = thread::spawn(move || {
        let t2 = h2.txn.begin().unwrap();
        let result = h2.index.insert(t2.id, key("a1"), RowLocation::new(1, 99));
        if result.is_ok() {
            h2.txn.commit(t2.id).unwrap();
        }
        result
    });

    thread::sleep(Duration::from_millis(100));
    h.txn.commit(t1.id).unwrap();

    let result = handle.join().unwrap();
    assert!(result.is_ok(), "T1's delete committed, so the key is gone and T2's insert should succeed");
    assert_eq!(h.index.get(&key("a1")).unwrap(), Some(RowLocation::new(1, 99)));
}

#[test]
fn delete_insert_abort_undoes_the_delete_first() {
    let dir = tempfile::tempdir().unwrap();
    let h = Arc::new(open(dir.path(), 1, true));

    let tx1 = h.txn.begin().unwrap();
    h.index.insert(tx1.id, key("a1"), RowLocation::new(1, 10)).unwrap();
    h.txn.commit(tx1.id).unwrap();

    let t1 = h.txn.begin().unwrap();
    h.index.delete(t1.id, &key("a1")).unwrap();

    let h2 = Arc::clone(&h);
    let handle = thread::spawn(move || {
        let t2 = h2.txn.begin().unwrap();
        let result = h2.index.insert(t2.id, key("a1"), RowLocation::new(1, 10));
        (t2, result)
    });

    thread::sleep(Duration::from_millis(100));
    h.txn.abort(t1.id).unwrap();

    let (t2, result) = handle.join().unwrap();
    assert_eq!(
        result.unwrap_err().kind(),
        ErrorKind::UniqueConstraintViolation,
        "T1's abort put (a1,10) back, so T2 must see a duplicate"
    );
    h.txn.abort(t2.id).unwrap();
}

#[test]
fn scan_vs_delete_commit_observes_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let h = Arc::new(open(dir.path(), 1, true));

    for (k, loc) in PAIRS {
        let tx = h.txn.begin().unwrap();
        h.index.insert(tx.id, key(k), RowLocation::new(1, *loc)).unwrap();
        h.txn.commit(tx.id).unwrap();
    }

    let t1 = h.txn.begin().unwrap();
    h.index.delete(t1.id, &key("f3")).unwrap();

    let h2 = Arc::clone(&h);
    let handle = thread::spawn(move || {
        let t2 = h2.txn.begin().unwrap();
        let mut scan = h2.index.scan(t2.id, Some(key("a1")));
        let mut seen = Vec::new();
        while let Some(pair) = scan.fetch_next().unwrap() {
            seen.push(pair);
        }
        h2.txn.commit(t2.id).unwrap();
        seen
    });

    thread::sleep(Duration::from_millis(100));
    h.txn.commit(t1.id).unwrap();

    let seen = handle.join().unwrap();
    assert!(!seen.iter().any(|(k, _)| *k == key("f3")), "committed delete must be observed by the blocked scanner");
    assert_eq!(seen.len(), PAIRS.len() - 1);
}

#[test]
fn scan_vs_delete_abort_preserves_original_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let h = Arc::new(open(dir.path(), 1, true));

    for (k, loc) in PAIRS {
        let tx = h.txn.begin().unwrap();
        h.index.insert(tx.id, key(k), RowLocation::new(1, *loc)).unwrap();
        h.txn.commit(tx.id).unwrap();
    }

    let t1 = h.txn.begin().unwrap();
    h.index.delete(t1.id, &key("f3")).unwrap();

    let h2 = Arc::clone(&h);
    let handle = thread::spawn(move || {
        let t2 = h2.txn.begin().unwrap();
        let mut scan = h2.index.scan(t2.id, Some(key("a1")));
        let mut seen = Vec::new();
        while let Some(pair) = scan.fetch_next().unwrap() {
            seen.push(pair);
        }
        h2.txn.commit(t2.id).unwrap();
        seen
    });

    thread::sleep(Duration::from_millis(100));
    h.txn.abort(t1.id).unwrap();

    let seen = handle.join().unwrap();
    let expected: Vec<_> = PAIRS.iter().map(|(k, loc)| (key(k), RowLocation::new(1, *loc))).collect();
    assert_eq!(seen, expected, "an aborted delete must leave the scan's result identical to the pre-delete sequence");
}

#[test]
fn crash_and_restart_rolls_back_in_flight_transaction() {
    let dir = tempfile::tempdir().unwrap();

    {
        let h = open(dir.path(), 1, true);
        for (k, loc) in PAIRS {
            let tx = h.txn.begin().unwrap();
            h.index.insert(tx.id, key(k), RowLocation::new(1, *loc)).unwrap();
            h.txn.commit(tx.id).unwrap();
        }

        // Scan-and-delete every key without ever committing or aborting,
        // then drop every handle to simulate a process kill mid-transaction.
        let tx = h.txn.begin().unwrap();
        let mut scan = h.index.scan(tx.id, Some(key("a1")));
        let mut to_delete = Vec::new();
        while let Some((k, _)) = scan.fetch_next().unwrap() {
            to_delete.push(k);
        }
        for k in to_delete {
            h.index.delete(tx.id, &k).unwrap();
        }
    }

    // Re-open against the same on-disk files and run recovery.
    let cfg = config(dir.path());
    let log = LogManager::open(cfg.clone()).unwrap();
    let buffer = Arc::new(BufferManager::new(cfg, Arc::clone(&log), 256));
    let locks = Arc::new(LockManager::new());
    let txn = TransactionManager::new(Arc::clone(&log), Arc::clone(&buffer), Arc::clone(&locks));
    let index = BTreeIndex::open(Arc::clone(&buffer), txn.clone(), locks, 1, 1, true);
    let index = Arc::new(index);
    txn.set_recovery_handler(index.clone());

    let recovery = simpledbm_rss::txn::Recovery::new(log, buffer, txn.clone());
    recovery.run().unwrap();

    let scan_tx = txn.begin().unwrap();
    let mut scan = index.scan(scan_tx.id, Some(key("a1")));
    let mut seen = Vec::new();
    while let Some(pair) = scan.fetch_next().unwrap() {
        seen.push(pair);
    }
    txn.commit(scan_tx.id).unwrap();

    let expected: Vec<_> = PAIRS.iter().map(|(k, loc)| (key(k), RowLocation::new(1, *loc))).collect();
    assert_eq!(seen, expected, "recovery must roll back the never-committed delete transaction");
}

// The scenario above never forces anything to disk: with a 34-row
// dataset and no checkpoint, every one of the in-flight transaction's
// deletes lives only in the log manager's in-memory append buffer and
// never gets flushed, so the "data survives a restart" assertion holds
// even if redo/undo did nothing at all. This variant calls
// `checkpoint()` partway through the deletes — which flushes the log
// up to the checkpoint record and flushes every dirty buffer page —
// so some of the deletes are genuinely durable on disk before the
// simulated crash, and only logical undo during recovery can explain
// the original rows reappearing.
#[test]
fn crash_and_restart_rolls_back_in_flight_transaction_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();

    {
        let h = open(dir.path(), 1, true);
        for (k, loc) in PAIRS {
            let tx = h.txn.begin().unwrap();
            h.index.insert(tx.id, key(k), RowLocation::new(1, *loc)).unwrap();
            h.txn.commit(tx.id).unwrap();
        }

        let tx = h.txn.begin().unwrap();
        let mut scan = h.index.scan(tx.id, Some(key("a1")));
        let mut to_delete = Vec::new();
        while let Some((k, _)) = scan.fetch_next().unwrap() {
            to_delete.push(k);
        }

        let half = to_delete.len() / 2;
        for k in &to_delete[..half] {
            h.index.delete(tx.id, k).unwrap();
        }

        // Forces the deletes so far onto disk: a fuzzy checkpoint
        // flushes every dirty buffer page in addition to writing the
        // checkpoint log record.
        h.txn.checkpoint().unwrap();

        for k in &to_delete[half..] {
            h.index.delete(tx.id, k).unwrap();
        }
        // Dropped without commit or abort to simulate a process kill.
    }

    let cfg = config(dir.path());
    let log = LogManager::open(cfg.clone()).unwrap();
    let buffer = Arc::new(BufferManager::new(cfg, Arc::clone(&log), 256));
    let locks = Arc::new(LockManager::new());
    let txn = TransactionManager::new(Arc::clone(&log), Arc::clone(&buffer), Arc::clone(&locks));
    let index = BTreeIndex::open(Arc::clone(&buffer), txn.clone(), locks, 1, 1, true);
    let index = Arc::new(index);
    txn.set_recovery_handler(index.clone());

    let recovery = simpledbm_rss::txn::Recovery::new(log, buffer, txn.clone());
    recovery.run().unwrap();

    let scan_tx = txn.begin().unwrap();
    let mut scan = index.scan(scan_tx.id, Some(key("a1")));
    let mut seen = Vec::new();
    while let Some(pair) = scan.fetch_next().unwrap() {
        seen.push(pair);
    }
    txn.commit(scan_tx.id).unwrap();

    let expected: Vec<_> = PAIRS.iter().map(|(k, loc)| (key(k), RowLocation::new(1, *loc))).collect();
    assert_eq!(
        seen, expected,
        "recovery must undo deletes that reached disk before the checkpoint, not just ones still buffered in memory"
    );
}
