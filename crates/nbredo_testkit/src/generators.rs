//! Property-based test generators using proptest.
//!
//! Workloads are sequences of primary-side index operations; applying one to
//! a [`PrimaryIndex`] produces a WAL to replay.

use crate::fixtures::PrimaryIndex;
use nbredo_core::CoreResult;
use proptest::prelude::*;

/// Largest key a generated workload inserts.
pub const MAX_KEY: u16 = 2000;

/// One primary-side index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// Insert a key.
    Insert(u16),
    /// Vacuum every other item off a leaf.
    Vacuum {
        /// Leaf ordinal, taken modulo the number of leaves.
        leaf: u8,
    },
    /// Delete one item from a leaf.
    Delete {
        /// Leaf ordinal, taken modulo the number of leaves.
        leaf: u8,
        /// Item ordinal, taken modulo the leaf's item count.
        item: u8,
    },
}

impl IndexOp {
    /// Applies the operation to `primary`.
    pub fn apply(self, primary: &mut PrimaryIndex) -> CoreResult<()> {
        match self {
            Self::Insert(key) => primary.insert(u32::from(key)).map(drop),
            Self::Vacuum { leaf } => primary.vacuum_leaf(usize::from(leaf)).map(drop),
            Self::Delete { leaf, item } => primary
                .delete_from_leaf(usize::from(leaf), usize::from(item))
                .map(drop),
        }
    }
}

/// Strategy for generating index operations, mostly inserts.
pub fn index_op_strategy() -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        12 => (0..MAX_KEY).prop_map(IndexOp::Insert),
        1 => any::<u8>().prop_map(|leaf| IndexOp::Vacuum { leaf }),
        2 => (any::<u8>(), any::<u8>()).prop_map(|(leaf, item)| IndexOp::Delete { leaf, item }),
    ]
}

/// Strategy for generating a workload.
pub fn workload_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<IndexOp>> {
    prop::collection::vec(index_op_strategy(), min_ops..max_ops)
}

/// Runs `ops` against a fresh in-memory primary.
pub fn build_primary(ops: &[IndexOp]) -> CoreResult<PrimaryIndex> {
    let mut primary = PrimaryIndex::in_memory();
    for op in ops {
        op.apply(&mut primary)?;
    }
    Ok(primary)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
