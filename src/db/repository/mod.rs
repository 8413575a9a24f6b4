//! Repository layer: table-scoped database operations.
//!
//! Functions take a borrowed `Connection` so callers decide the transaction
//! scope. None of them opens a transaction except `claim_pending`.

mod aggregate;
mod categorized_lab;
mod raw_record;
mod terminology;

pub use aggregate::*;
pub use categorized_lab::*;
pub use raw_record::*;
pub use terminology::*;
