//! Consistent-hash ring for ringkv.
//!
//! [`RingEntry`] describes one storage node; [`HashRing`] keeps entries
//! sorted by MD5 position and answers the neighbour, routing and
//! ping fan-out queries that the rest of the system is built on.

pub mod entry;
pub mod table;

pub use entry::RingEntry;
pub use table::{HashRing, PoppedEntry};

/// Errors from ring construction and queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring has no entries")]
    Empty,
    #[error("entry {0} is not on the ring")]
    NotMember(String),
    #[error("an entry for {0} is already on the ring")]
    Duplicate(String),
    #[error("malformed ring entry: {0}")]
    BadEntry(String),
    #[error("cannot take {requested} entries from a ring of {available}")]
    NotEnough { requested: usize, available: usize },
}
