//! Line pointers.

use crate::types::OffsetNumber;

/// Size of an encoded line pointer.
pub const ITEM_ID_SIZE: usize = 4;

/// State of a line pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LpFlags {
    /// Unused; should always have length 0.
    Unused = 0,
    /// In use; always has storage.
    Normal = 1,
    /// Redirects to another line pointer; no storage.
    Redirect = 2,
    /// Dead; may or may not have storage.
    Dead = 3,
}

impl LpFlags {
    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Unused,
            1 => Self::Normal,
            2 => Self::Redirect,
            _ => Self::Dead,
        }
    }
}

/// A line pointer: `offset:15 | flags:2 | length:15`, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemId(u32);

impl ItemId {
    const MASK_15: u32 = 0x7FFF;

    /// Creates a line pointer.
    #[must_use]
    pub const fn new(offset: u16, flags: LpFlags, length: u16) -> Self {
        Self(
            (offset as u32 & Self::MASK_15)
                | ((flags as u32) << 15)
                | ((length as u32 & Self::MASK_15) << 17),
        )
    }

    /// Creates a redirect to `target`.
    #[must_use]
    pub const fn redirect(target: OffsetNumber) -> Self {
        Self::new(target, LpFlags::Redirect, 0)
    }

    /// Decodes from page bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; ITEM_ID_SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Encodes for page bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; ITEM_ID_SIZE] {
        self.0.to_le_bytes()
    }

    /// Byte offset of the item within the page.
    #[must_use]
    pub const fn offset(self) -> usize {
        (self.0 & Self::MASK_15) as usize
    }

    /// Item length in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        ((self.0 >> 17) & Self::MASK_15) as usize
    }

    /// Returns true if the item has no storage.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Line pointer state.
    #[must_use]
    pub const fn flags(self) -> LpFlags {
        LpFlags::from_bits(self.0 >> 15)
    }

    /// Returns a copy with different state, keeping offset and length.
    #[must_use]
    pub const fn with_flags(self, flags: LpFlags) -> Self {
        Self((self.0 & !(0b11 << 15)) | ((flags as u32) << 15))
    }

    /// Returns true unless unused.
    #[must_use]
    pub fn is_used(self) -> bool {
        self.flags() != LpFlags::Unused
    }

    /// Returns true for a redirect.
    #[must_use]
    pub fn is_redirected(self) -> bool {
        self.flags() == LpFlags::Redirect
    }

    /// Returns true for a dead line pointer.
    #[must_use]
    pub fn is_dead(self) -> bool {
        self.flags() == LpFlags::Dead
    }

    /// Returns true if the item bytes can be read.
    #[must_use]
    pub const fn has_storage(self) -> bool {
        !self.is_empty()
    }

    /// Target of a redirect.
    #[must_use]
    pub const fn redirect_target(self) -> OffsetNumber {
        self.offset() as OffsetNumber
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_independent() {
        let id = ItemId::new(8000, LpFlags::Normal, 24);
        assert_eq!(id.offset(), 8000);
        assert_eq!(id.len(), 24);
        assert_eq!(id.flags(), LpFlags::Normal);

        let dead = id.with_flags(LpFlags::Dead);
        assert_eq!(dead.offset(), 8000);
        assert_eq!(dead.len(), 24);
        assert!(dead.is_dead());
        assert!(dead.has_storage());
    }

    #[test]
    fn redirect_has_no_storage() {
        let id = ItemId::redirect(7);
        assert!(id.is_redirected());
        assert!(!id.has_storage());
        assert_eq!(id.redirect_target(), 7);
    }

    #[test]
    fn byte_encoding_roundtrip() {
        let id = ItemId::new(0x7FFF, LpFlags::Redirect, 0x7FFF);
        assert_eq!(ItemId::from_bytes(id.to_bytes()), id);
    }
}
