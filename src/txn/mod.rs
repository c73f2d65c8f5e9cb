//! Transaction Manager and ARIES-style crash recovery (spec Section
//! 4.D "Transaction Manager" and Section 5 "Recovery").

mod manager;
mod recovery;

pub use manager::{RecoveryHandler, Transaction, TransactionId, TransactionManager, TransactionStatus};
pub use recovery::Recovery;
