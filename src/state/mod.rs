//! Persistent record of which items have been durably backed up.
//!
//! The ledger is the single authority for "done": an id present in it means
//! the artifact exists, is non-empty and needs no further network work.

pub mod error;
pub mod ledger;

pub use error::LedgerError;
pub use ledger::{CompletionLedger, LedgerEntry, VerifyReport};
