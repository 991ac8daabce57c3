//! The metapage (block 0).

use crate::btree::opaque::{BtPageOpaque, BTP_META};
use crate::btree::init_page;
use crate::error::{CoreError, CoreResult};
use crate::page::{Page, PAGE_HEADER_SIZE};
use crate::types::BlockNumber;

/// Magic number stored in every metapage.
pub const BTREE_MAGIC: u32 = 0x0005_3162;

/// Metapage format version.
pub const BTREE_VERSION: u32 = 2;

const META_SIZE: usize = 24;

/// Root pointers carried by meta-updating WAL records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaSnapshot {
    /// True root block.
    pub root: BlockNumber,
    /// Level of the true root.
    pub level: u32,
    /// "Fast" root: the lowest single-page level.
    pub fastroot: BlockNumber,
    /// Level of the fast root.
    pub fastlevel: u32,
}

impl MetaSnapshot {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 16;

    /// Appends the little-endian encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.root.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        buf.extend_from_slice(&self.fastroot.to_le_bytes());
        buf.extend_from_slice(&self.fastlevel.to_le_bytes());
    }
}

/// Decoded contents of the metapage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    /// Must equal [`BTREE_MAGIC`].
    pub magic: u32,
    /// Must equal [`BTREE_VERSION`].
    pub version: u32,
    /// Root pointers.
    pub roots: MetaSnapshot,
}

impl MetaPage {
    /// Reads and validates the metapage.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the page is not a metapage or its magic
    /// or version is wrong.
    pub fn read(page: &Page) -> CoreResult<Self> {
        let opaque = BtPageOpaque::read(page)?;
        if !opaque.is_meta() {
            return Err(CoreError::page_corruption("page is not a btree metapage"));
        }
        let bytes = &page.as_bytes()[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + META_SIZE];
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let meta = Self {
            magic: word(0),
            version: word(4),
            roots: MetaSnapshot {
                root: word(8),
                level: word(12),
                fastroot: word(16),
                fastlevel: word(20),
            },
        };
        if meta.magic != BTREE_MAGIC {
            return Err(CoreError::page_corruption(format!(
                "bad metapage magic {:#x}",
                meta.magic
            )));
        }
        if meta.version != BTREE_VERSION {
            return Err(CoreError::page_corruption(format!(
                "unsupported metapage version {}",
                meta.version
            )));
        }
        Ok(meta)
    }

    /// Rewrites `page` from scratch as a metapage holding `roots`.
    ///
    /// This is a full overwrite, so replaying it any number of times yields
    /// the same page.
    ///
    /// # Errors
    ///
    /// Returns `PageCorruption` if the opaque cannot be written.
    pub fn write(page: &mut Page, roots: &MetaSnapshot) -> CoreResult<()> {
        init_page(page);

        let mut body = Vec::with_capacity(META_SIZE);
        body.extend_from_slice(&BTREE_MAGIC.to_le_bytes());
        body.extend_from_slice(&BTREE_VERSION.to_le_bytes());
        roots.encode_into(&mut body);
        page.as_bytes_mut()[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + META_SIZE].copy_from_slice(&body);

        BtPageOpaque {
            flags: BTP_META,
            ..Default::default()
        }
        .write(page)?;

        // lower covers the metadata, so masking never treats it as free space.
        page.set_lower((PAGE_HEADER_SIZE + META_SIZE) as u16);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut page = Page::new_zeroed();
        let roots = MetaSnapshot {
            root: 7,
            level: 2,
            fastroot: 5,
            fastlevel: 1,
        };
        MetaPage::write(&mut page, &roots).unwrap();
        let meta = MetaPage::read(&page).unwrap();
        assert_eq!(meta.roots, roots);
        assert_eq!(meta.magic, BTREE_MAGIC);
        assert_eq!(page.lower(), PAGE_HEADER_SIZE + META_SIZE);
    }

    #[test]
    fn ordinary_page_is_not_meta() {
        let mut page = Page::new_zeroed();
        init_page(&mut page);
        assert!(MetaPage::read(&page).is_err());
    }
}
