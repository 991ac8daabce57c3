//! B-tree WAL record types and payload serialization.

use crate::btree::MetaSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::types::{BlockNumber, Lsn, OffsetNumber, RelFileId, TransactionId};
use crate::wal::backup::BackupBlock;

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"NBWL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Most full-page images a single record may carry.
pub const MAX_BACKUP_BLOCKS: usize = 4;

/// Operation code of a B-tree record, as stored in the envelope's info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Add an item to a leaf page.
    InsertLeaf = 0x00,
    /// Add a downlink to an internal page.
    InsertUpper = 0x10,
    /// Same as `InsertUpper`, plus a metapage rewrite.
    InsertMeta = 0x20,
    /// Split; the new item went to the left half.
    SplitLeft = 0x30,
    /// Split; the new item went to the right half.
    SplitRight = 0x40,
    /// As `SplitLeft`, for a root page.
    SplitLeftRoot = 0x50,
    /// As `SplitRight`, for a root page.
    SplitRightRoot = 0x60,
    /// Remove dead items from one page.
    Delete = 0x70,
    /// Unlink and delete a page.
    DeletePage = 0x80,
    /// Same as `DeletePage`, plus a metapage rewrite.
    DeletePageMeta = 0x90,
    /// Create a new root page.
    NewRoot = 0xA0,
    /// Same as `DeletePage`; the parent becomes half-dead.
    DeletePageHalf = 0xB0,
    /// Bulk removal of items by vacuum.
    Vacuum = 0xC0,
    /// Conflict point for recycling a deleted page.
    ReusePage = 0xD0,
}

impl RecordKind {
    /// Converts an info byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::InsertLeaf,
            0x10 => Self::InsertUpper,
            0x20 => Self::InsertMeta,
            0x30 => Self::SplitLeft,
            0x40 => Self::SplitRight,
            0x50 => Self::SplitLeftRoot,
            0x60 => Self::SplitRightRoot,
            0x70 => Self::Delete,
            0x80 => Self::DeletePage,
            0x90 => Self::DeletePageMeta,
            0xA0 => Self::NewRoot,
            0xB0 => Self::DeletePageHalf,
            0xC0 => Self::Vacuum,
            0xD0 => Self::ReusePage,
            _ => return None,
        })
    }

    /// Converts the record kind to its info byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short name used by the diagnostic renderer.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InsertLeaf => "insert",
            Self::InsertUpper => "insert_upper",
            Self::InsertMeta => "insert_meta",
            Self::SplitLeft => "split_l",
            Self::SplitRight => "split_r",
            Self::SplitLeftRoot => "split_l_root",
            Self::SplitRightRoot => "split_r_root",
            Self::Delete => "delete",
            Self::DeletePage | Self::DeletePageMeta | Self::DeletePageHalf => "delete_page",
            Self::NewRoot => "newroot",
            Self::Vacuum => "vacuum",
            Self::ReusePage => "reuse_page",
        }
    }
}

/// Which flavor of insert a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertKind {
    /// Plain leaf insert.
    Leaf,
    /// Internal-page insert completing the split whose right half is
    /// `downlink`.
    Upper {
        /// Right half of the split being completed.
        downlink: BlockNumber,
    },
    /// Internal-page insert that also rewrites the metapage.
    Meta {
        /// Right half of the split being completed.
        downlink: BlockNumber,
        /// New metapage contents.
        meta: MetaSnapshot,
    },
}

/// Insert one item at a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// Target page.
    pub block: BlockNumber,
    /// Offset of the new item.
    pub offset: OffsetNumber,
    /// Insert flavor.
    pub kind: InsertKind,
    /// Item bytes; absent when block 0 is covered by a full-page image.
    pub item: Option<Vec<u8>>,
}

/// Split of one page into two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// The original page, which keeps the lower half.
    pub left: BlockNumber,
    /// The new right half.
    pub right: BlockNumber,
    /// The original page's right sibling before the split, or `P_NONE`.
    pub rnext: BlockNumber,
    /// Tree level (0 for leaves).
    pub level: u32,
    /// First offset (in the original page) moved to the right half.
    pub first_right: OffsetNumber,
    /// True if the split page was the root.
    pub is_root: bool,
    /// Offset of the new item in the original page numbering; present iff
    /// the new item went left.
    pub new_item_offset: Option<OffsetNumber>,
    /// Right half of a lower-level split this insert completes; present iff
    /// `level > 0`.
    pub downlink: Option<BlockNumber>,
    /// Left page's new high key; present iff `level > 0` and block 0 has no
    /// full-page image. On leaves the high key is the right page's first key.
    pub left_hikey: Option<Vec<u8>>,
    /// The new item; present iff it went left and block 0 has no image.
    pub new_item: Option<Vec<u8>>,
    /// Every item of the right page in offset order, high key first when
    /// `rnext` is not `P_NONE`.
    pub right_items: Vec<Vec<u8>>,
}

impl SplitRecord {
    /// True if the new item went to the left half.
    #[must_use]
    pub const fn on_left(&self) -> bool {
        self.new_item_offset.is_some()
    }

    /// The record kind this split is logged as.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match (self.on_left(), self.is_root) {
            (true, false) => RecordKind::SplitLeft,
            (false, false) => RecordKind::SplitRight,
            (true, true) => RecordKind::SplitLeftRoot,
            (false, true) => RecordKind::SplitRightRoot,
        }
    }
}

/// Vacuum removal of items from one leaf page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// Page being cleaned.
    pub block: BlockNumber,
    /// Previous block this vacuum pass logged, used for the unpin barrier.
    pub last_block_vacuumed: BlockNumber,
    /// Offsets to remove, ascending.
    pub offsets: Vec<OffsetNumber>,
}

/// Removal of dead items from one page outside vacuum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// Heap relation the removed tuples point into.
    pub heap_rel: RelFileId,
    /// Page being cleaned.
    pub block: BlockNumber,
    /// Offsets to remove, ascending.
    pub offsets: Vec<OffsetNumber>,
}

/// Which flavor of page deletion a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePageKind {
    /// Plain deletion.
    Plain,
    /// Deletion that also rewrites the metapage.
    Meta(MetaSnapshot),
    /// Deletion that leaves the parent half-dead.
    HalfDead,
}

/// Unlinking and deletion of an empty page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePageRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// Parent page holding the downlink to `dead`.
    pub parent: BlockNumber,
    /// Offset of that downlink in the parent.
    pub parent_offset: OffsetNumber,
    /// Page being deleted.
    pub dead: BlockNumber,
    /// Left sibling of `dead`, or `P_NONE`.
    pub left: BlockNumber,
    /// Right sibling of `dead`.
    pub right: BlockNumber,
    /// Transaction stamped on the deleted page.
    pub xact: TransactionId,
    /// Deletion flavor.
    pub kind: DeletePageKind,
}

/// Creation of a new root page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRootRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// The new root page.
    pub root: BlockNumber,
    /// Level of the new root.
    pub level: u32,
    /// Items of the new root in offset order (empty for a fresh index).
    pub items: Vec<Vec<u8>>,
}

/// Conflict point emitted before a deleted page is recycled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReusePageRecord {
    /// Index relation.
    pub rel: RelFileId,
    /// Page being recycled.
    pub block: BlockNumber,
    /// Newest transaction that may still see the page.
    pub latest_removed_xid: TransactionId,
}

/// A decoded B-tree record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtreeRecord {
    /// Item insertion.
    Insert(InsertRecord),
    /// Page split.
    Split(SplitRecord),
    /// Vacuum item removal.
    Vacuum(VacuumRecord),
    /// Dead item removal.
    Delete(DeleteRecord),
    /// Page deletion.
    DeletePage(DeletePageRecord),
    /// New root.
    NewRoot(NewRootRecord),
    /// Page reuse conflict point.
    ReusePage(ReusePageRecord),
}

impl BtreeRecord {
    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Insert(rec) => match rec.kind {
                InsertKind::Leaf => RecordKind::InsertLeaf,
                InsertKind::Upper { .. } => RecordKind::InsertUpper,
                InsertKind::Meta { .. } => RecordKind::InsertMeta,
            },
            Self::Split(rec) => rec.kind(),
            Self::Vacuum(_) => RecordKind::Vacuum,
            Self::Delete(_) => RecordKind::Delete,
            Self::DeletePage(rec) => match rec.kind {
                DeletePageKind::Plain => RecordKind::DeletePage,
                DeletePageKind::Meta(_) => RecordKind::DeletePageMeta,
                DeletePageKind::HalfDead => RecordKind::DeletePageHalf,
            },
            Self::NewRoot(_) => RecordKind::NewRoot,
            Self::ReusePage(_) => RecordKind::ReusePage,
        }
    }

    /// Index relation the record applies to.
    #[must_use]
    pub fn rel(&self) -> RelFileId {
        match self {
            Self::Insert(rec) => rec.rel,
            Self::Split(rec) => rec.rel,
            Self::Vacuum(rec) => rec.rel,
            Self::Delete(rec) => rec.rel,
            Self::DeletePage(rec) => rec.rel,
            Self::NewRoot(rec) => rec.rel,
            Self::ReusePage(rec) => rec.rel,
        }
    }

    /// Serializes the main payload. Fields whose presence depends on a
    /// full-page image are written only when `bkp_mask` says that image is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a field the format requires is missing
    /// or a field exceeds its encoded width.
    pub fn encode_payload(&self, bkp_mask: u8) -> CoreResult<Vec<u8>> {
        let block0_image = bkp_mask & 1 != 0;
        let mut buf = Vec::new();

        match self {
            Self::Insert(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.block);
                put_u16(&mut buf, rec.offset);
                match rec.kind {
                    InsertKind::Leaf => {}
                    InsertKind::Upper { downlink } => put_u32(&mut buf, downlink),
                    InsertKind::Meta { downlink, meta } => {
                        put_u32(&mut buf, downlink);
                        meta.encode_into(&mut buf);
                    }
                }
                if !block0_image {
                    let item = required(rec.item.as_deref(), "insert item")?;
                    buf.extend_from_slice(item);
                }
            }

            Self::Split(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.left);
                put_u32(&mut buf, rec.right);
                put_u32(&mut buf, rec.rnext);
                put_u32(&mut buf, rec.level);
                put_u16(&mut buf, rec.first_right);
                if rec.level > 0 {
                    put_u32(&mut buf, required(rec.downlink, "split downlink")?);
                    if !block0_image {
                        put_item(&mut buf, required(rec.left_hikey.as_deref(), "left high key")?)?;
                    }
                }
                if let Some(offset) = rec.new_item_offset {
                    put_u16(&mut buf, offset);
                    if !block0_image {
                        put_item(&mut buf, required(rec.new_item.as_deref(), "new item")?)?;
                    }
                }
                put_items(&mut buf, &rec.right_items)?;
            }

            Self::Vacuum(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.block);
                put_u32(&mut buf, rec.last_block_vacuumed);
                put_offsets(&mut buf, &rec.offsets)?;
            }

            Self::Delete(rec) => {
                rec.rel.encode_into(&mut buf);
                rec.heap_rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.block);
                put_offsets(&mut buf, &rec.offsets)?;
            }

            Self::DeletePage(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.parent);
                put_u16(&mut buf, rec.parent_offset);
                put_u32(&mut buf, rec.dead);
                put_u32(&mut buf, rec.left);
                put_u32(&mut buf, rec.right);
                put_u32(&mut buf, rec.xact.as_u32());
                if let DeletePageKind::Meta(meta) = rec.kind {
                    meta.encode_into(&mut buf);
                }
            }

            Self::NewRoot(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.root);
                put_u32(&mut buf, rec.level);
                put_items(&mut buf, &rec.items)?;
            }

            Self::ReusePage(rec) => {
                rec.rel.encode_into(&mut buf);
                put_u32(&mut buf, rec.block);
                put_u32(&mut buf, rec.latest_removed_xid.as_u32());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its kind, image mask and payload.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption` if the payload is truncated or has trailing
    /// bytes.
    pub fn decode_payload(kind: RecordKind, bkp_mask: u8, payload: &[u8]) -> CoreResult<Self> {
        let block0_image = bkp_mask & 1 != 0;
        let mut r = PayloadReader::new(payload);

        let record = match kind {
            RecordKind::InsertLeaf | RecordKind::InsertUpper | RecordKind::InsertMeta => {
                let rel = r.rel()?;
                let block = r.u32()?;
                let offset = r.u16()?;
                let kind = match kind {
                    RecordKind::InsertLeaf => InsertKind::Leaf,
                    RecordKind::InsertUpper => InsertKind::Upper { downlink: r.u32()? },
                    _ => InsertKind::Meta {
                        downlink: r.u32()?,
                        meta: r.meta()?,
                    },
                };
                let item = if block0_image {
                    None
                } else {
                    Some(r.rest().to_vec())
                };
                Self::Insert(InsertRecord {
                    rel,
                    block,
                    offset,
                    kind,
                    item,
                })
            }

            RecordKind::SplitLeft
            | RecordKind::SplitRight
            | RecordKind::SplitLeftRoot
            | RecordKind::SplitRightRoot => {
                let on_left = matches!(kind, RecordKind::SplitLeft | RecordKind::SplitLeftRoot);
                let is_root = matches!(
                    kind,
                    RecordKind::SplitLeftRoot | RecordKind::SplitRightRoot
                );
                let rel = r.rel()?;
                let left = r.u32()?;
                let right = r.u32()?;
                let rnext = r.u32()?;
                let level = r.u32()?;
                let first_right = r.u16()?;

                let mut downlink = None;
                let mut left_hikey = None;
                if level > 0 {
                    downlink = Some(r.u32()?);
                    if !block0_image {
                        left_hikey = Some(r.item()?);
                    }
                }
                let mut new_item_offset = None;
                let mut new_item = None;
                if on_left {
                    new_item_offset = Some(r.u16()?);
                    if !block0_image {
                        new_item = Some(r.item()?);
                    }
                }
                let right_items = r.items()?;

                Self::Split(SplitRecord {
                    rel,
                    left,
                    right,
                    rnext,
                    level,
                    first_right,
                    is_root,
                    new_item_offset,
                    downlink,
                    left_hikey,
                    new_item,
                    right_items,
                })
            }

            RecordKind::Vacuum => Self::Vacuum(VacuumRecord {
                rel: r.rel()?,
                block: r.u32()?,
                last_block_vacuumed: r.u32()?,
                offsets: r.offsets()?,
            }),

            RecordKind::Delete => Self::Delete(DeleteRecord {
                rel: r.rel()?,
                heap_rel: r.rel()?,
                block: r.u32()?,
                offsets: r.offsets()?,
            }),

            RecordKind::DeletePage | RecordKind::DeletePageMeta | RecordKind::DeletePageHalf => {
                let rel = r.rel()?;
                let parent = r.u32()?;
                let parent_offset = r.u16()?;
                let dead = r.u32()?;
                let left = r.u32()?;
                let right = r.u32()?;
                let xact = TransactionId::new(r.u32()?);
                let kind = match kind {
                    RecordKind::DeletePageMeta => DeletePageKind::Meta(r.meta()?),
                    RecordKind::DeletePageHalf => DeletePageKind::HalfDead,
                    _ => DeletePageKind::Plain,
                };
                Self::DeletePage(DeletePageRecord {
                    rel,
                    parent,
                    parent_offset,
                    dead,
                    left,
                    right,
                    xact,
                    kind,
                })
            }

            RecordKind::NewRoot => Self::NewRoot(NewRootRecord {
                rel: r.rel()?,
                root: r.u32()?,
                level: r.u32()?,
                items: r.items()?,
            }),

            RecordKind::ReusePage => Self::ReusePage(ReusePageRecord {
                rel: r.rel()?,
                block: r.u32()?,
                latest_removed_xid: TransactionId::new(r.u32()?),
            }),
        };

        r.finish(kind)?;
        Ok(record)
    }
}

/// A B-tree record together with its position in the log and any full-page
/// images it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// End position of the record in the log.
    pub lsn: Lsn,
    /// The logical change.
    pub record: BtreeRecord,
    /// Full-page images, at most one per slot.
    pub backups: Vec<BackupBlock>,
}

impl WalRecord {
    /// Wraps a record without full-page images.
    #[must_use]
    pub fn new(lsn: Lsn, record: BtreeRecord) -> Self {
        Self {
            lsn,
            record,
            backups: Vec::new(),
        }
    }

    /// Adds a full-page image.
    #[must_use]
    pub fn with_backup(mut self, backup: BackupBlock) -> Self {
        self.backups.push(backup);
        self.backups.sort_by_key(|b| b.slot);
        self
    }

    /// Bit mask of the image slots present.
    #[must_use]
    pub fn bkp_mask(&self) -> u8 {
        self.backups.iter().fold(0, |mask, b| mask | (1 << b.slot))
    }

    /// True if block slot `slot` was restored from a full-page image.
    #[must_use]
    pub fn has_backup(&self, slot: u8) -> bool {
        self.bkp_mask() & (1 << slot) != 0
    }

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.record.kind()
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

fn required<T>(value: Option<T>, what: &str) -> CoreResult<T> {
    value.ok_or_else(|| CoreError::invalid_operation(format!("record is missing its {what}")))
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_item(buf: &mut Vec<u8>, item: &[u8]) -> CoreResult<()> {
    let len = u16::try_from(item.len())
        .map_err(|_| CoreError::invalid_operation("item larger than 64 KiB"))?;
    put_u16(buf, len);
    buf.extend_from_slice(item);
    Ok(())
}

fn put_items(buf: &mut Vec<u8>, items: &[Vec<u8>]) -> CoreResult<()> {
    let count = u16::try_from(items.len())
        .map_err(|_| CoreError::invalid_operation("too many items in record"))?;
    put_u16(buf, count);
    for item in items {
        put_item(buf, item)?;
    }
    Ok(())
}

fn put_offsets(buf: &mut Vec<u8>, offsets: &[OffsetNumber]) -> CoreResult<()> {
    let count = u16::try_from(offsets.len())
        .map_err(|_| CoreError::invalid_operation("too many offsets in record"))?;
    put_u16(buf, count);
    for &off in offsets {
        put_u16(buf, off);
    }
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.pos + n > self.payload.len() {
            return Err(CoreError::wal_corruption(format!(
                "unexpected end of payload: need {n} bytes at {}, have {}",
                self.pos,
                self.payload.len()
            )));
        }
        let bytes = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rel(&mut self) -> CoreResult<RelFileId> {
        let b = self.take(RelFileId::ENCODED_LEN)?;
        let mut bytes = [0u8; RelFileId::ENCODED_LEN];
        bytes.copy_from_slice(b);
        Ok(RelFileId::from_bytes(bytes))
    }

    fn meta(&mut self) -> CoreResult<MetaSnapshot> {
        Ok(MetaSnapshot {
            root: self.u32()?,
            level: self.u32()?,
            fastroot: self.u32()?,
            fastlevel: self.u32()?,
        })
    }

    fn item(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn items(&mut self) -> CoreResult<Vec<Vec<u8>>> {
        let count = self.u16()?;
        (0..count).map(|_| self.item()).collect()
    }

    fn offsets(&mut self) -> CoreResult<Vec<OffsetNumber>> {
        let count = self.u16()?;
        (0..count).map(|_| self.u16()).collect()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.payload[self.pos..];
        self.pos = self.payload.len();
        rest
    }

    fn finish(&self, kind: RecordKind) -> CoreResult<()> {
        if self.pos != self.payload.len() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {} record: expected {} bytes, got {}",
                kind.name(),
                self.pos,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REL: RelFileId = RelFileId::new(1663, 1, 16384);

    fn split(level: u32, on_left: bool) -> SplitRecord {
        SplitRecord {
            rel: REL,
            left: 10,
            right: 11,
            rnext: 12,
            level,
            first_right: 5,
            is_root: false,
            new_item_offset: on_left.then_some(3),
            downlink: (level > 0).then_some(40),
            left_hikey: (level > 0).then(|| b"hikey".to_vec()),
            new_item: on_left.then(|| b"new".to_vec()),
            right_items: vec![b"a".to_vec(), b"bb".to_vec()],
        }
    }

    #[test]
    fn kind_byte_roundtrip() {
        for b in (0x00..=0xD0).step_by(0x10) {
            let kind = RecordKind::from_byte(b).unwrap();
            assert_eq!(kind.as_byte(), b);
        }
        assert_eq!(RecordKind::from_byte(0xE0), None);
        assert_eq!(RecordKind::from_byte(0x05), None);
    }

    #[test]
    fn leaf_insert_omits_item_under_image() {
        let rec = BtreeRecord::Insert(InsertRecord {
            rel: REL,
            block: 10,
            offset: 3,
            kind: InsertKind::Leaf,
            item: Some(b"X".to_vec()),
        });
        let full = rec.encode_payload(0).unwrap();
        let bare = rec.encode_payload(1).unwrap();
        assert_eq!(full.len(), bare.len() + 1);

        let decoded = BtreeRecord::decode_payload(RecordKind::InsertLeaf, 1, &bare).unwrap();
        let BtreeRecord::Insert(ins) = decoded else {
            panic!("expected insert");
        };
        assert_eq!(ins.item, None);
    }

    #[test]
    fn meta_insert_carries_downlink_and_meta() {
        let meta = MetaSnapshot {
            root: 3,
            level: 1,
            fastroot: 3,
            fastlevel: 1,
        };
        let rec = BtreeRecord::Insert(InsertRecord {
            rel: REL,
            block: 3,
            offset: 2,
            kind: InsertKind::Meta { downlink: 7, meta },
            item: Some(vec![1, 2, 3]),
        });
        assert_eq!(rec.kind(), RecordKind::InsertMeta);
        let payload = rec.encode_payload(0).unwrap();
        assert_eq!(
            BtreeRecord::decode_payload(RecordKind::InsertMeta, 0, &payload).unwrap(),
            rec
        );
    }

    #[test]
    fn split_field_presence_follows_level_side_and_image() {
        for (level, on_left) in [(0, true), (0, false), (1, true), (2, false)] {
            let rec = split(level, on_left);
            let kind = rec.kind();
            let payload = BtreeRecord::Split(rec.clone()).encode_payload(0).unwrap();
            let decoded = BtreeRecord::decode_payload(kind, 0, &payload).unwrap();
            assert_eq!(decoded, BtreeRecord::Split(rec));
        }

        let rec = split(1, true);
        let payload = BtreeRecord::Split(rec.clone()).encode_payload(1).unwrap();
        let BtreeRecord::Split(decoded) =
            BtreeRecord::decode_payload(rec.kind(), 1, &payload).unwrap()
        else {
            panic!("expected split");
        };
        assert_eq!(decoded.downlink, Some(40));
        assert_eq!(decoded.new_item_offset, Some(3));
        assert_eq!(decoded.left_hikey, None);
        assert_eq!(decoded.new_item, None);
        assert_eq!(decoded.right_items, rec.right_items);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut rec = split(1, false);
        rec.downlink = None;
        assert!(matches!(
            BtreeRecord::Split(rec).encode_payload(0),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn delete_page_meta_variant() {
        let rec = BtreeRecord::DeletePage(DeletePageRecord {
            rel: REL,
            parent: 4,
            parent_offset: 2,
            dead: 30,
            left: 29,
            right: 31,
            xact: TransactionId::new(900),
            kind: DeletePageKind::Meta(MetaSnapshot {
                root: 4,
                level: 1,
                fastroot: 4,
                fastlevel: 1,
            }),
        });
        assert_eq!(rec.kind(), RecordKind::DeletePageMeta);
        let payload = rec.encode_payload(0).unwrap();
        assert_eq!(
            BtreeRecord::decode_payload(RecordKind::DeletePageMeta, 0, &payload).unwrap(),
            rec
        );
        // The same bytes are too long for the plain variant.
        assert!(BtreeRecord::decode_payload(RecordKind::DeletePage, 0, &payload).is_err());
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let rec = BtreeRecord::Vacuum(VacuumRecord {
            rel: REL,
            block: 20,
            last_block_vacuumed: 17,
            offsets: vec![2, 4],
        });
        let payload = rec.encode_payload(0).unwrap();
        let err = BtreeRecord::decode_payload(RecordKind::Vacuum, 0, &payload[..payload.len() - 1])
            .unwrap_err();
        assert!(matches!(err, CoreError::WalCorruption { .. }));
    }

    #[test]
    fn bkp_mask_tracks_slots() {
        let rec = WalRecord::new(
            Lsn::new(100),
            BtreeRecord::ReusePage(ReusePageRecord {
                rel: REL,
                block: 5,
                latest_removed_xid: TransactionId::new(10),
            }),
        );
        assert_eq!(rec.bkp_mask(), 0);
        let page = crate::page::Page::initialized(16);
        let rec = rec.with_backup(BackupBlock::from_page(2, REL, 7, &page));
        assert_eq!(rec.bkp_mask(), 0b100);
        assert!(rec.has_backup(2));
        assert!(!rec.has_backup(0));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
