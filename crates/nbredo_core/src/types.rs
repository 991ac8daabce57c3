//! Core type definitions.

use std::fmt;

/// Block number within a relation file.
pub type BlockNumber = u32;

/// 1-based line pointer number within a page.
pub type OffsetNumber = u16;

/// "No sibling" marker in B-tree sibling links. Block 0 is always the
/// metapage, so it can never be a sibling.
pub const P_NONE: BlockNumber = 0;

/// Block number of the B-tree metapage.
pub const BTREE_METAPAGE: BlockNumber = 0;

/// Block number that never refers to a real block.
pub const INVALID_BLOCK: BlockNumber = u32::MAX;

/// First valid offset number.
pub const FIRST_OFFSET: OffsetNumber = 1;

/// Offset of the high key on a page that is not rightmost.
pub const P_HIKEY: OffsetNumber = 1;

/// Offset of the first data key on a page that has a high key.
pub const P_FIRSTKEY: OffsetNumber = 2;

/// Log sequence number.
///
/// LSNs are totally ordered. A page stores the LSN of the last record
/// applied to it; a record is applied only if its LSN is greater.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The invalid LSN, older than every record.
    pub const INVALID: Lsn = Lsn(0);

    /// Creates a new LSN.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true unless this is [`Lsn::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:08X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

/// 32-bit transaction id with wraparound-aware comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u32);

impl TransactionId {
    /// The invalid transaction id.
    pub const INVALID: TransactionId = TransactionId(0);

    /// First id handed out to ordinary transactions. Ids below this are
    /// special and compare by plain integer order.
    pub const FIRST_NORMAL: TransactionId = TransactionId(3);

    /// Creates a new transaction id.
    #[must_use]
    pub const fn new(xid: u32) -> Self {
        Self(xid)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true unless this is [`TransactionId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns true if `self` is a normal (non-special) id.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 >= Self::FIRST_NORMAL.0
    }

    /// Returns true if `self` is logically later than `other`.
    ///
    /// Normal ids are compared modulo 2^32; if either side is special the
    /// comparison is a plain integer one.
    #[must_use]
    pub fn follows(self, other: TransactionId) -> bool {
        if !self.is_normal() || !other.is_normal() {
            return self.0 > other.0;
        }
        (self.0.wrapping_sub(other.0) as i32) > 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical identity of a relation file: tablespace, database, relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelFileId {
    /// Tablespace id.
    pub spc: u32,
    /// Database id.
    pub db: u32,
    /// Relation file number.
    pub rel: u32,
}

impl RelFileId {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 12;

    /// Creates a new relation identity.
    #[must_use]
    pub const fn new(spc: u32, db: u32, rel: u32) -> Self {
        Self { spc, db, rel }
    }

    /// Appends the little-endian encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.spc.to_le_bytes());
        buf.extend_from_slice(&self.db.to_le_bytes());
        buf.extend_from_slice(&self.rel.to_le_bytes());
    }

    /// Decodes from exactly [`Self::ENCODED_LEN`] bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            spc: word(0),
            db: word(4),
            rel: word(8),
        }
    }

    /// File name used by directory-backed page stores.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}", self.spc, self.db, self.rel)
    }

    /// Parses a name produced by [`Self::file_name`].
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let mut parts = name.split('_').map(str::parse::<u32>);
        let spc = parts.next()?.ok()?;
        let db = parts.next()?.ok()?;
        let rel = parts.next()?.ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { spc, db, rel })
    }
}

impl fmt::Display for RelFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.spc, self.db, self.rel)
    }
}
