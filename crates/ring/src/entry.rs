//! A single member of the hash ring.

use ringkv_common::{hash_key, RingHash};
use std::fmt;

use crate::RingError;

/// Descriptor for a storage node on the ring.
///
/// Equality and hashing use `(name, address, port)`. Ring order uses
/// `position` only; see [`crate::HashRing`].
#[derive(Clone)]
pub struct RingEntry {
    /// Operator-facing node name (first roster column).
    pub name: String,
    /// Host name or IP the node listens on.
    pub address: String,
    /// TCP port the node listens on.
    pub port: u16,
    /// Position on the ring, `md5("address:port")` unless overridden.
    pub position: RingHash,
}

impl RingEntry {
    /// Create an entry positioned at the hash of `"address:port"`.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let position = hash_key(&format!("{}:{}", address, port));
        Self {
            name: name.into(),
            address,
            port,
            position,
        }
    }

    /// Create an entry at an explicit ring position.
    pub fn with_position(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        position: RingHash,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            position,
        }
    }

    /// `"address:port"`, suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// The `"name address port"` line used on the wire and in the roster.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.name, self.address, self.port)
    }

    /// Parse a `"name address port"` line. Fields are split on any run of
    /// whitespace and exactly three are required.
    pub fn parse_line(line: &str) -> Result<Self, RingError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(RingError::BadEntry(format!(
                "expected 3 whitespace-separated fields, got {} in {:?}",
                fields.len(),
                line
            )));
        }
        let port: u16 = fields[2]
            .parse()
            .map_err(|e| RingError::BadEntry(format!("bad port {:?}: {}", fields[2], e)))?;
        Ok(Self::new(fields[0], fields[1], port))
    }
}

impl PartialEq for RingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address && self.port == other.port
    }
}

impl Eq for RingEntry {}

impl std::hash::Hash for RingEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Debug for RingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} {:?}", self.name, self.address, self.port, self.position)
    }
}

impl fmt::Display for RingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.address, self.port)
    }
}
