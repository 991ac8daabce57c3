//! Slotted pages.
//!
//! ## Layout
//!
//! ```text
//! | header (24) | line pointers -> ... free ... <- items | special |
//!               ^lower                         ^upper    ^special
//! ```
//!
//! Header fields, little-endian:
//!
//! ```text
//! | lsn (8) | checksum (2) | flags (2) | lower (2) | upper (2) |
//! | special (2) | version (2) | prune_xid (4) |
//! ```
//!
//! Items are addressed by 1-based offset numbers through the line pointer
//! array. The logical mapping offset -> item is the contract; where item
//! bytes physically sit between `upper` and `special` is not.

mod heap;
mod item;

pub use heap::{HeapTupleHeader, HEAP_TUPLE_HEADER_SIZE};
pub use item::{ItemId, LpFlags, ITEM_ID_SIZE};

use crate::error::{CoreError, CoreResult};
use crate::types::{BlockNumber, Lsn, OffsetNumber, TransactionId, FIRST_OFFSET};
use crate::wal::compute_crc32;
use std::fmt;

/// Page size in bytes.
pub const BLCKSZ: usize = 8192;

/// Size of the page header.
pub const PAGE_HEADER_SIZE: usize = 24;

/// Current page layout version.
pub const PAGE_LAYOUT_VERSION: u16 = 4;

/// Hint: there are unused line pointers before `lower`.
pub const PD_HAS_FREE_LINES: u16 = 0x0001;
/// Hint: not enough free space for a new tuple.
pub const PD_PAGE_FULL: u16 = 0x0002;
/// Hint: all tuples visible to everyone.
pub const PD_ALL_VISIBLE: u16 = 0x0004;

const LSN_OFF: usize = 0;
const CHECKSUM_OFF: usize = 8;
const FLAGS_OFF: usize = 10;
const LOWER_OFF: usize = 12;
const UPPER_OFF: usize = 14;
const SPECIAL_OFF: usize = 16;
const VERSION_OFF: usize = 18;
const PRUNE_XID_OFF: usize = 20;

/// Rounds `len` up to the 8-byte item alignment.
#[must_use]
pub const fn maxalign(len: usize) -> usize {
    (len + 7) & !7
}

/// A fixed-size page image.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("lsn", &self.lsn())
            .field("lower", &self.lower())
            .field("upper", &self.upper())
            .field("special", &self.special_offset())
            .field("max_offset", &self.max_offset())
            .finish()
    }
}

impl Page {
    /// Creates an all-zero page (a "new" page).
    #[must_use]
    pub fn new_zeroed() -> Self {
        Self {
            data: vec![0u8; BLCKSZ].into_boxed_slice(),
        }
    }

    /// Creates an initialized empty page with `special_size` bytes of
    /// special space.
    #[must_use]
    pub fn initialized(special_size: usize) -> Self {
        let mut page = Self::new_zeroed();
        page.init(special_size);
        page
    }

    /// Wraps a page image.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if `bytes` is not exactly [`BLCKSZ`] long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != BLCKSZ {
            return Err(CoreError::page_corruption(format!(
                "page image is {} bytes, expected {BLCKSZ}",
                bytes.len()
            )));
        }
        Ok(Self {
            data: bytes.to_vec().into_boxed_slice(),
        })
    }

    /// Raw page bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw page bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reinitializes the page as empty, discarding all content.
    pub fn init(&mut self, special_size: usize) {
        self.data.fill(0);
        let special = (BLCKSZ - maxalign(special_size)) as u16;
        self.set_lower(PAGE_HEADER_SIZE as u16);
        self.set_upper(special);
        self.put_u16(SPECIAL_OFF, special);
        self.put_u16(VERSION_OFF, PAGE_LAYOUT_VERSION);
    }

    /// Returns true for a page that was never initialized.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.upper() == 0
    }

    fn get_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.data[at], self.data[at + 1]])
    }

    fn put_u16(&mut self, at: usize, value: u16) {
        self.data[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// LSN of the last record applied to this page.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[LSN_OFF..LSN_OFF + 8]);
        Lsn(u64::from_le_bytes(bytes))
    }

    /// Stamps the page LSN.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[LSN_OFF..LSN_OFF + 8].copy_from_slice(&lsn.0.to_le_bytes());
    }

    /// Stored checksum.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        self.get_u16(CHECKSUM_OFF)
    }

    /// Sets the stored checksum.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.put_u16(CHECKSUM_OFF, checksum);
    }

    /// Header hint flags.
    #[must_use]
    pub fn flags(&self) -> u16 {
        self.get_u16(FLAGS_OFF)
    }

    /// Sets header hint flags.
    pub fn set_flags(&mut self, flags: u16) {
        self.put_u16(FLAGS_OFF, flags);
    }

    /// Start of free space.
    #[must_use]
    pub fn lower(&self) -> usize {
        self.get_u16(LOWER_OFF) as usize
    }

    /// End of free space.
    #[must_use]
    pub fn upper(&self) -> usize {
        self.get_u16(UPPER_OFF) as usize
    }

    /// Sets the start of free space.
    pub fn set_lower(&mut self, lower: u16) {
        self.put_u16(LOWER_OFF, lower);
    }

    /// Sets the end of free space.
    pub fn set_upper(&mut self, upper: u16) {
        self.put_u16(UPPER_OFF, upper);
    }

    /// Start of the special area.
    #[must_use]
    pub fn special_offset(&self) -> usize {
        self.get_u16(SPECIAL_OFF) as usize
    }

    /// Oldest prunable xid hint.
    #[must_use]
    pub fn prune_xid(&self) -> TransactionId {
        let bytes = &self.data[PRUNE_XID_OFF..PRUNE_XID_OFF + 4];
        TransactionId(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Sets the prunable xid hint.
    pub fn set_prune_xid(&mut self, xid: TransactionId) {
        self.data[PRUNE_XID_OFF..PRUNE_XID_OFF + 4].copy_from_slice(&xid.0.to_le_bytes());
    }

    /// Special area bytes.
    #[must_use]
    pub fn special(&self) -> &[u8] {
        let start = self.special_offset().min(BLCKSZ);
        &self.data[start..]
    }

    /// Mutable special area bytes.
    pub fn special_mut(&mut self) -> &mut [u8] {
        let start = self.special_offset().min(BLCKSZ);
        &mut self.data[start..]
    }

    /// Highest line pointer number in use (0 for an empty page).
    #[must_use]
    pub fn max_offset(&self) -> OffsetNumber {
        let lower = self.lower();
        if lower <= PAGE_HEADER_SIZE {
            return 0;
        }
        ((lower - PAGE_HEADER_SIZE) / ITEM_ID_SIZE) as OffsetNumber
    }

    /// Free bytes available for one more item, net of its line pointer.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.upper()
            .saturating_sub(self.lower())
            .saturating_sub(ITEM_ID_SIZE)
    }

    fn lp_pos(offset: OffsetNumber) -> usize {
        PAGE_HEADER_SIZE + (offset as usize - 1) * ITEM_ID_SIZE
    }

    /// Line pointer at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is 0 or beyond [`Page::max_offset`].
    #[must_use]
    pub fn item_id(&self, offset: OffsetNumber) -> ItemId {
        assert!(
            offset >= FIRST_OFFSET && offset <= self.max_offset(),
            "offset {offset} out of range"
        );
        let pos = Self::lp_pos(offset);
        ItemId::from_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ])
    }

    /// Overwrites the line pointer at `offset`.
    pub fn set_item_id(&mut self, offset: OffsetNumber, id: ItemId) {
        let pos = Self::lp_pos(offset);
        self.data[pos..pos + ITEM_ID_SIZE].copy_from_slice(&id.to_bytes());
    }

    /// Item bytes at `offset`, or `None` if out of range or without storage.
    #[must_use]
    pub fn get_item(&self, offset: OffsetNumber) -> Option<&[u8]> {
        if offset < FIRST_OFFSET || offset > self.max_offset() {
            return None;
        }
        let id = self.item_id(offset);
        if !id.has_storage() || id.offset() + id.len() > BLCKSZ {
            return None;
        }
        Some(&self.data[id.offset()..id.offset() + id.len()])
    }

    /// Item bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if there is no item with storage there.
    pub fn item(&self, offset: OffsetNumber) -> CoreResult<&[u8]> {
        self.get_item(offset).ok_or_else(|| {
            CoreError::page_corruption(format!(
                "no item at offset {offset} (max offset {})",
                self.max_offset()
            ))
        })
    }

    /// Mutable item bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if there is no item with storage there.
    pub fn item_mut(&mut self, offset: OffsetNumber) -> CoreResult<&mut [u8]> {
        self.item(offset)?;
        let id = self.item_id(offset);
        Ok(&mut self.data[id.offset()..id.offset() + id.len()])
    }

    /// Iterates over `(offset, item)` for every line pointer with storage.
    pub fn items(&self) -> impl Iterator<Item = (OffsetNumber, &[u8])> + '_ {
        (FIRST_OFFSET..=self.max_offset())
            .filter_map(move |off| self.get_item(off).map(|item| (off, item)))
    }

    /// Adds an item at `offset`, shifting later line pointers up by one.
    ///
    /// An `offset` of 0 appends after the last line pointer. Returns the
    /// offset used, or `None` if the offset is past `max_offset() + 1` or the
    /// item does not fit.
    pub fn add_item(&mut self, item: &[u8], offset: OffsetNumber) -> Option<OffsetNumber> {
        if self.is_new() {
            return None;
        }
        let max = self.max_offset();
        let offset = if offset == 0 { max + 1 } else { offset };
        if offset > max + 1 || item.is_empty() {
            return None;
        }

        let lower = self.lower() + ITEM_ID_SIZE;
        let aligned = maxalign(item.len());
        let upper = self.upper().checked_sub(aligned)?;
        if lower > upper {
            return None;
        }

        if offset <= max {
            let from = Self::lp_pos(offset);
            let to = Self::lp_pos(max + 1);
            self.data.copy_within(from..to, from + ITEM_ID_SIZE);
        }

        self.data[upper..upper + item.len()].copy_from_slice(item);
        self.set_item_id(
            offset,
            ItemId::new(upper as u16, LpFlags::Normal, item.len() as u16),
        );
        self.set_lower(lower as u16);
        self.set_upper(upper as u16);
        Some(offset)
    }

    /// Removes the line pointers at `offsets` and their storage in one pass,
    /// renumbering the survivors and compacting item space.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if any offset is out of range.
    pub fn remove_items(&mut self, offsets: &[OffsetNumber]) -> CoreResult<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let max = self.max_offset();
        let mut doomed = vec![false; max as usize + 1];
        for &off in offsets {
            if off < FIRST_OFFSET || off > max {
                return Err(CoreError::page_corruption(format!(
                    "cannot remove offset {off}: max offset is {max}"
                )));
            }
            doomed[off as usize] = true;
        }

        let survivors: Vec<(ItemId, Vec<u8>)> = (FIRST_OFFSET..=max)
            .filter(|off| !doomed[*off as usize])
            .map(|off| {
                let id = self.item_id(off);
                let bytes = self.get_item(off).map(<[u8]>::to_vec).unwrap_or_default();
                (id, bytes)
            })
            .collect();

        self.rebuild(survivors);
        Ok(())
    }

    /// Removes the single item at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the offset is out of range.
    pub fn delete_item(&mut self, offset: OffsetNumber) -> CoreResult<()> {
        self.remove_items(&[offset])
    }

    fn rebuild(&mut self, survivors: Vec<(ItemId, Vec<u8>)>) {
        let special = self.special_offset();
        self.data[PAGE_HEADER_SIZE..special].fill(0);

        let mut upper = special;
        for (index, (id, bytes)) in survivors.iter().enumerate() {
            let offset = (index + 1) as OffsetNumber;
            let new_id = if bytes.is_empty() {
                *id
            } else {
                upper -= maxalign(bytes.len());
                self.data[upper..upper + bytes.len()].copy_from_slice(bytes);
                ItemId::new(upper as u16, id.flags(), bytes.len() as u16)
            };
            self.set_item_id(offset, new_id);
        }
        self.set_lower((PAGE_HEADER_SIZE + survivors.len() * ITEM_ID_SIZE) as u16);
        self.set_upper(upper as u16);
    }

    /// Computes the page checksum for `block`.
    ///
    /// CRC32 over the image with the checksum field zeroed, mixed with the
    /// block number so a page written to the wrong block fails verification.
    #[must_use]
    pub fn compute_checksum(&self, block: BlockNumber) -> u16 {
        let mut image = self.data.to_vec();
        image[CHECKSUM_OFF..CHECKSUM_OFF + 2].fill(0);
        let crc = compute_crc32(&image) ^ block;
        let folded = ((crc >> 16) ^ (crc & 0xFFFF)) as u16;
        // 0 means "no checksum"; never produce it.
        folded.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(items: &[&[u8]]) -> Page {
        let mut page = Page::initialized(16);
        for item in items {
            page.add_item(item, 0).unwrap();
        }
        page
    }

    fn contents(page: &Page) -> Vec<Vec<u8>> {
        page.items().map(|(_, item)| item.to_vec()).collect()
    }

    #[test]
    fn init_sets_bounds() {
        let page = Page::initialized(16);
        assert!(!page.is_new());
        assert_eq!(page.lower(), PAGE_HEADER_SIZE);
        assert_eq!(page.upper(), BLCKSZ - 16);
        assert_eq!(page.special().len(), 16);
        assert_eq!(page.max_offset(), 0);
    }

    #[test]
    fn zeroed_page_is_new_and_rejects_items() {
        let mut page = Page::new_zeroed();
        assert!(page.is_new());
        assert_eq!(page.add_item(b"x", 0), None);
    }

    #[test]
    fn add_item_in_middle_shifts_later_offsets() {
        let mut page = page_with(&[b"a", b"c"]);
        assert_eq!(page.add_item(b"b", 2), Some(2));
        assert_eq!(contents(&page), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn add_item_past_end_fails() {
        let mut page = page_with(&[b"a"]);
        assert_eq!(page.add_item(b"z", 3), None);
        assert_eq!(page.max_offset(), 1);
    }

    #[test]
    fn add_item_fails_when_full() {
        let mut page = Page::initialized(16);
        let big = vec![7u8; 4000];
        assert!(page.add_item(&big, 0).is_some());
        assert!(page.add_item(&big, 0).is_some());
        assert_eq!(page.add_item(&big, 0), None);
    }

    #[test]
    fn remove_items_renumbers_survivors() {
        let mut page = page_with(&[b"a", b"b", b"c", b"d", b"e"]);
        let free_before = page.free_space();
        page.remove_items(&[4, 2]).unwrap();
        assert_eq!(contents(&page), vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]);
        assert!(page.free_space() > free_before);
    }

    #[test]
    fn remove_out_of_range_is_corruption() {
        let mut page = page_with(&[b"a"]);
        assert!(matches!(
            page.remove_items(&[2]),
            Err(CoreError::PageCorruption { .. })
        ));
    }

    #[test]
    fn remove_keeps_storage_less_line_pointers() {
        let mut page = page_with(&[b"a", b"b", b"c"]);
        page.set_item_id(2, ItemId::redirect(3));
        page.remove_items(&[1]).unwrap();
        assert!(page.item_id(1).is_redirected());
        assert_eq!(page.item(2).unwrap(), b"c");
    }

    #[test]
    fn item_mut_edits_in_place() {
        let mut page = page_with(&[b"abc"]);
        page.item_mut(1).unwrap()[0] = b'x';
        assert_eq!(page.item(1).unwrap(), b"xbc");
    }

    #[test]
    fn checksum_depends_on_block_and_content() {
        let mut page = page_with(&[b"a"]);
        let sum = page.compute_checksum(5);
        assert_ne!(sum, 0);
        assert_ne!(sum, page.compute_checksum(6));
        page.set_checksum(sum);
        assert_eq!(page.compute_checksum(5), sum);
        page.set_lsn(Lsn::new(9));
        assert_ne!(page.compute_checksum(5), sum);
    }

    #[test]
    fn from_bytes_checks_length() {
        assert!(Page::from_bytes(&[0u8; 10]).is_err());
        let page = page_with(&[b"q"]);
        assert_eq!(Page::from_bytes(page.as_bytes()).unwrap(), page);
    }
}
