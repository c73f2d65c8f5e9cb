//! Error taxonomy for the storage subsystem.
//!
//! Grounded on the teacher repo's `error.rs` (`SimpleError`/`MyError`):
//! a hand-rolled error type implementing `std::error::Error`, extended
//! here into the named taxonomy of spec Section 7 so callers can match
//! on `kind()` instead of parsing messages.

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O failure on log or page file.
    Storage,
    /// Checksum or LSN mismatch during log read.
    Corrupt,
    /// No online file available and archive queue stalled.
    LogFull,
    /// Latch wait exceeded bound.
    LatchTimeout,
    /// Lock wait exceeded bound.
    LockTimeout,
    /// Deadlock detected by the lock manager's wait-for graph.
    Deadlock,
    /// Duplicate key on unique index.
    UniqueConstraintViolation,
    /// Delete target absent.
    KeyNotFound,
    /// Log record exceeds buffer or file minus headers.
    RecordTooLarge,
    /// API misuse: operation on an EOF scan, a closed log, etc.
    InvalidState,
    /// The log (or a dependent background task) is permanently errored.
    LogClosed,
}

#[derive(Debug)]
pub struct RssError {
    kind: ErrorKind,
    details: String,
}

impl RssError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            details: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, msg)
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupt, msg)
    }

    pub fn log_full(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LogFull, msg)
    }

    pub fn latch_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LatchTimeout, msg)
    }

    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LockTimeout, msg)
    }

    pub fn deadlock(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deadlock, msg)
    }

    pub fn unique_violation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UniqueConstraintViolation, msg)
    }

    pub fn key_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyNotFound, msg)
    }

    pub fn record_too_large(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RecordTooLarge, msg)
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, msg)
    }

    pub fn log_closed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LogClosed, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Dump a backtrace to stderr; used at the point an error is first
    /// raised so bugs in latch/lock protocol violations are easy to spot
    /// in test output.
    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        eprintln!("{:?}: {}\n{:?}", self.kind, self.details, bt);
    }
}

impl fmt::Display for RssError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)
    }
}

impl Error for RssError {}

impl From<std::io::Error> for RssError {
    fn from(e: std::io::Error) -> Self {
        RssError::storage(e.to_string())
    }
}
