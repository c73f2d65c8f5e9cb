//! Transaction lifecycle: begin/commit/abort, logical undo via
//! compensation log records (spec Section 4.D).
//!
//! Grounded on the teacher's `transaction/tx.rs` (begin writes a start
//! record and registers the transaction; commit flushes dirty pages
//! then writes a commit record and releases latches; abort rolls back
//! before writing its own record) and `transaction/log_aries.rs`'s
//! `rollback` (walking the transaction's own record chain backward).
//! Unlike the teacher, which rolls back by restoring whole-page before
//! images, undo here is logical: the B-tree registers a
//! [`RecoveryHandler`] that knows how to invert one operation (e.g. a
//! delete undoes an insert) without needing the entire before-image,
//! per the spec's logical-undo requirement for B-link trees (a page
//! may have split between the original update and the abort).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer::BufferManager;
use crate::error::RssError;
use crate::lock::LockManager;
use crate::log::{LogManager, LogPayload, LogRecord, UpdateRecord};
use crate::lsn::Lsn;
use crate::types::{RssResult, VoidResult};

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
}

/// A handle returned by [`TransactionManager::begin`]. Cheap to clone;
/// all state lives in the owning manager's transaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
}

/// Module-specific logical undo/redo, implemented by whatever owns the
/// page format the update touched (the B-tree index manager, the space
/// map). The log manager and transaction manager never interpret
/// `UpdateRecord::data` themselves.
pub trait RecoveryHandler: Send + Sync {
    /// Reapply `record`'s effect during the redo phase. Must be
    /// idempotent: the handler is responsible for checking the target
    /// page's `page_lsn` against `lsn` and skipping pages that already
    /// reflect this update.
    fn redo(&self, buffer: &BufferManager, record: &UpdateRecord, lsn: Lsn) -> VoidResult;

    /// Apply the logical inverse of `record` to the current tree state
    /// and return an `(op_code, data)` pair describing the compensating
    /// action, to be logged as a CLR.
    fn undo(&self, buffer: &BufferManager, record: &UpdateRecord) -> RssResult<(u8, Vec<u8>)>;
}

struct TxEntry {
    status: TransactionStatus,
    last_lsn: Lsn,
}

pub struct TransactionManager {
    log: Arc<LogManager>,
    buffer: Arc<BufferManager>,
    locks: Arc<LockManager>,
    next_id: AtomicU64,
    table: Mutex<HashMap<TransactionId, TxEntry>>,
    recovery_handler: RwLock<Option<Arc<dyn RecoveryHandler>>>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogManager>, buffer: Arc<BufferManager>, locks: Arc<LockManager>) -> Arc<Self> {
        Arc::new(Self {
            log,
            buffer,
            locks,
            next_id: AtomicU64::new(1),
            table: Mutex::new(HashMap::new()),
            recovery_handler: RwLock::new(None),
        })
    }

    /// The B-tree index manager calls this once at startup, after the
    /// manager itself exists but before any transaction runs, so
    /// `commit`/`abort` redo/undo has somewhere to delegate to.
    pub fn set_recovery_handler(&self, handler: Arc<dyn RecoveryHandler>) {
        *self.recovery_handler.write().unwrap() = Some(handler);
    }

    pub fn begin(&self) -> RssResult<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn: Lsn::NULL,
            tx_id: id,
            payload: LogPayload::Begin,
        };
        let lsn = self.log.insert(&record.encode_body())?;
        self.table.lock().unwrap().insert(
            id,
            TxEntry {
                status: TransactionStatus::Active,
                last_lsn: lsn,
            },
        );
        Ok(Transaction { id })
    }

    fn last_lsn(&self, tx: TransactionId) -> RssResult<Lsn> {
        self.table
            .lock()
            .unwrap()
            .get(&tx)
            .map(|e| e.last_lsn)
            .ok_or_else(|| RssError::invalid_state(format!("unknown transaction {}", tx)))
    }

    fn set_last_lsn(&self, tx: TransactionId, lsn: Lsn) {
        if let Some(entry) = self.table.lock().unwrap().get_mut(&tx) {
            entry.last_lsn = lsn;
        }
    }

    /// Append an `UPDATE` record for `tx`, chaining it onto the
    /// transaction's prior LSN. Returns the assigned LSN so the caller
    /// can stamp it onto the page(s) it just modified.
    pub fn log_update(&self, tx: TransactionId, update: UpdateRecord) -> RssResult<Lsn> {
        let prev_lsn = self.last_lsn(tx)?;
        let record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn,
            tx_id: tx,
            payload: LogPayload::Update(update),
        };
        let lsn = self.log.insert(&record.encode_body())?;
        self.set_last_lsn(tx, lsn);
        Ok(lsn)
    }

    /// `commit(tx)` (spec Section 4.D): ARIES no-force/steal — dirty
    /// pages need not be flushed before the commit record, only the log
    /// up to it. Locks are released after the commit record is durable
    /// so no other transaction can observe an uncommitted effect as
    /// final.
    pub fn commit(&self, tx: TransactionId) -> VoidResult {
        let prev_lsn = self.last_lsn(tx)?;
        let commit_record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn,
            tx_id: tx,
            payload: LogPayload::Commit,
        };
        let commit_lsn = self.log.insert(&commit_record.encode_body())?;
        self.log.flush(Some(commit_lsn))?;

        self.locks.release_all(tx);

        let end_record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn: commit_lsn,
            tx_id: tx,
            payload: LogPayload::End,
        };
        self.log.insert(&end_record.encode_body())?;

        if let Some(entry) = self.table.lock().unwrap().get_mut(&tx) {
            entry.status = TransactionStatus::Committed;
        }
        Ok(())
    }

    /// `abort(tx)` (spec Section 4.D): logical rollback via CLRs, then
    /// an `ABORT` record, then lock release, mirroring `commit`'s
    /// ordering (log before memory state, memory state before
    /// visibility to other transactions).
    pub fn abort(&self, tx: TransactionId) -> VoidResult {
        self.rollback(tx)?;

        let prev_lsn = self.last_lsn(tx)?;
        let abort_record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn,
            tx_id: tx,
            payload: LogPayload::Abort,
        };
        let abort_lsn = self.log.insert(&abort_record.encode_body())?;
        self.log.flush(Some(abort_lsn))?;

        self.locks.release_all(tx);

        let end_record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn: abort_lsn,
            tx_id: tx,
            payload: LogPayload::End,
        };
        self.log.insert(&end_record.encode_body())?;

        if let Some(entry) = self.table.lock().unwrap().get_mut(&tx) {
            entry.status = TransactionStatus::Aborted;
        }
        Ok(())
    }

    /// Walk `tx`'s record chain backward, undoing every undoable,
    /// non-compensation `UPDATE` and logging a CLR for it. A CLR's
    /// `undo_next_lsn` lets the walk skip straight past the record(s)
    /// it already compensates for, so a crash partway through undo
    /// never re-undoes the same operation twice (spec Section 5,
    /// "Undo phase is itself logged and repeatable").
    fn rollback(&self, tx: TransactionId) -> VoidResult {
        self.rollback_until(tx, Lsn::NULL)
    }

    /// Shared backward walk used by both [`Self::rollback`] (stops at
    /// the null LSN) and [`Self::rollback_to`] (stops at a savepoint).
    fn rollback_until(&self, tx: TransactionId, stop_at: Lsn) -> VoidResult {
        let handler = self
            .recovery_handler
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| RssError::invalid_state("no recovery handler registered"))?;

        let mut cursor = self.last_lsn(tx)?;
        while !cursor.is_null() && cursor != stop_at {
            let record = self.log.read(cursor)?;
            match &record.payload {
                LogPayload::Update(update) if update.compensation => {
                    cursor = update.undo_next_lsn.unwrap_or(Lsn::NULL);
                }
                LogPayload::Update(update) if update.undoable => {
                    let (op_code, data) = handler.undo(&self.buffer, update)?;
                    let clr = UpdateRecord {
                        undoable: false,
                        logical_undo: update.logical_undo,
                        compensation: true,
                        undo_next_lsn: Some(record.prev_lsn),
                        page_ids: update.page_ids.clone(),
                        op_code,
                        data,
                    };
                    self.log_update(tx, clr)?;
                    cursor = record.prev_lsn;
                }
                _ => cursor = record.prev_lsn,
            }
        }
        Ok(())
    }

    /// Returns the LSN a nested top action should compensate back to:
    /// the transaction's current chain tip, taken before the first
    /// record of the action is logged (spec Section 4.D, "nested top
    /// action"). Pass the result to [`Self::end_nested_top_action`]
    /// once the action's own updates have all been logged.
    pub fn begin_nested_top_action(&self, tx: TransactionId) -> RssResult<Lsn> {
        self.last_lsn(tx)
    }

    /// Close a nested top action by logging a single CLR whose
    /// `undo_next_lsn` points at `return_lsn` — the LSN from
    /// [`Self::begin_nested_top_action`]. A rollback that reaches this
    /// CLR skips every record the action logged in between, so an SMO
    /// (split, merge, redistribute, ...) is undone as one atomic unit
    /// even though it is itself logged as several ordinary updates
    /// (spec Section 4.E, "SMOs are half-atomic").
    pub fn end_nested_top_action(
        &self,
        tx: TransactionId,
        return_lsn: Lsn,
        page_ids: Vec<crate::page_id::PageId>,
        op_code: u8,
        data: Vec<u8>,
    ) -> RssResult<Lsn> {
        let clr = UpdateRecord {
            undoable: false,
            logical_undo: false,
            compensation: true,
            undo_next_lsn: Some(return_lsn),
            page_ids,
            op_code,
            data,
        };
        self.log_update(tx, clr)
    }

    /// A named point in `tx`'s chain that [`Self::rollback_to`] can
    /// unwind to without aborting the whole transaction (spec Section
    /// 4.D, "savepoints").
    pub fn savepoint(&self, tx: TransactionId) -> RssResult<Lsn> {
        self.last_lsn(tx)
    }

    /// Undo every undoable update logged after `savepoint`, leaving the
    /// transaction active with its chain tip reset to `savepoint`. Same
    /// CLR-emitting walk as [`Self::abort`]'s rollback, just bounded
    /// instead of running to the null LSN.
    pub fn rollback_to(&self, tx: TransactionId, savepoint: Lsn) -> VoidResult {
        self.rollback_until(tx, savepoint)?;
        self.set_last_lsn(tx, savepoint);
        Ok(())
    }

    /// `checkpoint()` (spec Section 4.D / 5): snapshot the active
    /// transaction table and the buffer manager's dirty page table,
    /// then tell the log manager it may discard anything before the
    /// oldest entry either references. A fuzzy checkpoint only: dirty
    /// pages are flushed after the checkpoint record is written, not
    /// before, so the dirty page table recorded in the log may list
    /// pages that are already clean by the time recovery reads it —
    /// harmless, since redo re-checks each page's actual LSN anyway.
    pub fn checkpoint(&self) -> VoidResult {
        let active_transactions: Vec<(u64, Lsn)> = {
            let table = self.table.lock().unwrap();
            table
                .iter()
                .filter(|(_, e)| e.status == TransactionStatus::Active)
                .map(|(tid, e)| (*tid, e.last_lsn))
                .collect()
        };
        let dirty_pages = self.buffer.dirty_pages();

        let checkpoint_record = LogRecord {
            lsn: Lsn::NULL,
            prev_lsn: Lsn::NULL,
            tx_id: 0,
            payload: LogPayload::Checkpoint {
                active_transactions: active_transactions.clone(),
                dirty_pages: dirty_pages.clone(),
            },
        };
        let checkpoint_lsn = self.log.insert(&checkpoint_record.encode_body())?;
        self.log.flush(Some(checkpoint_lsn))?;

        let oldest_interesting = active_transactions
            .iter()
            .map(|(_, lsn)| *lsn)
            .chain(dirty_pages.iter().map(|(_, lsn)| *lsn))
            .min()
            .unwrap_or(checkpoint_lsn);

        self.log.set_checkpoint_lsn(checkpoint_lsn, oldest_interesting);

        self.buffer.flush_all()?;
        self.log
            .cleanup_archives_before(oldest_interesting.file_index as i64)?;
        Ok(())
    }

    /// Used only by [`crate::txn::Recovery`] to re-seat a transaction
    /// found active-at-crash (a "loser") into the table before running
    /// the normal `abort` path against it.
    pub(crate) fn register_recovered(&self, tx: TransactionId, last_lsn: Lsn) {
        self.table.lock().unwrap().insert(
            tx,
            TxEntry {
                status: TransactionStatus::Active,
                last_lsn,
            },
        );
    }

    pub fn status(&self, tx: TransactionId) -> Option<TransactionStatus> {
        self.table.lock().unwrap().get(&tx).map(|e| e.status)
    }

    /// Used only by [`crate::txn::Recovery`]'s redo phase.
    pub(crate) fn recovery_handler_for_redo(&self) -> Option<Arc<dyn RecoveryHandler>> {
        self.recovery_handler.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LogGroupConfig};
    use crate::page_id::PageId;
    use std::sync::atomic::AtomicUsize;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            control_files: vec![dir.join("a.ctl"), dir.join("b.ctl")],
            groups: vec![LogGroupConfig {
                path: dir.join("group0"),
            }],
            files_per_group: 3,
            file_size: 4096,
            buffer_size: 1024,
            buffer_limit: 64,
            flush_interval_secs: 3600,
            archive_path: dir.join("archive"),
            storage_base_path: dir.join("data"),
        }
    }

    /// Records every call it receives; undo is a no-op so these tests
    /// exercise the manager's bookkeeping without needing a real index.
    struct CountingHandler {
        undo_calls: AtomicUsize,
        redo_calls: AtomicUsize,
    }

    impl RecoveryHandler for CountingHandler {
        fn redo(&self, _buffer: &BufferManager, _record: &UpdateRecord, _lsn: Lsn) -> VoidResult {
            self.redo_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn undo(&self, _buffer: &BufferManager, record: &UpdateRecord) -> RssResult<(u8, Vec<u8>)> {
            self.undo_calls.fetch_add(1, Ordering::Relaxed);
            Ok((record.op_code, Vec::new()))
        }
    }

    fn test_manager(dir: &std::path::Path) -> Arc<TransactionManager> {
        let log = LogManager::open(test_config(dir)).unwrap();
        let buffer = Arc::new(BufferManager::new(test_config(dir), Arc::clone(&log), 16));
        let locks = Arc::new(LockManager::new());
        TransactionManager::new(log, buffer, locks)
    }

    #[test]
    fn commit_releases_locks_and_marks_status() {
        let dir = tempfile::tempdir().unwrap();
        let txn = test_manager(dir.path());
        let tx = txn.begin().unwrap();
        txn.commit(tx.id).unwrap();
        assert_eq!(txn.status(tx.id), Some(TransactionStatus::Committed));
    }

    #[test]
    fn abort_undoes_updates_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let txn = test_manager(dir.path());
        let handler = Arc::new(CountingHandler {
            undo_calls: AtomicUsize::new(0),
            redo_calls: AtomicUsize::new(0),
        });
        txn.set_recovery_handler(handler.clone());

        let tx = txn.begin().unwrap();
        let pid = PageId::new(1, 2);
        txn.log_update(
            tx.id,
            UpdateRecord {
                undoable: true,
                logical_undo: true,
                compensation: false,
                undo_next_lsn: None,
                page_ids: vec![pid],
                op_code: 1,
                data: vec![1],
            },
        )
        .unwrap();
        txn.log_update(
            tx.id,
            UpdateRecord {
                undoable: true,
                logical_undo: true,
                compensation: false,
                undo_next_lsn: None,
                page_ids: vec![pid],
                op_code: 2,
                data: vec![2],
            },
        )
        .unwrap();

        txn.abort(tx.id).unwrap();
        assert_eq!(handler.undo_calls.load(Ordering::Relaxed), 2);
        assert_eq!(txn.status(tx.id), Some(TransactionStatus::Aborted));
    }

    #[test]
    fn checkpoint_records_no_active_transactions_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let txn = test_manager(dir.path());
        txn.checkpoint().unwrap();
    }
}
