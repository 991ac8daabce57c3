//! Multi-record structural operations still waiting for their last record.

use crate::types::{BlockNumber, RelFileId};
use tracing::warn;

/// A structural change whose completion record has not been replayed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteAction {
    /// A split whose right half has no downlink in the parent yet.
    Split {
        /// Index relation.
        rel: RelFileId,
        /// Left half.
        left: BlockNumber,
        /// Right half.
        right: BlockNumber,
        /// The split page was the root.
        is_root: bool,
    },
    /// A half-dead page that still has to be unlinked and deleted.
    Deletion {
        /// Index relation.
        rel: RelFileId,
        /// The half-dead page.
        block: BlockNumber,
    },
}

/// Ordered list of [`IncompleteAction`]s owned by one recovery session.
#[derive(Debug, Clone, Default)]
pub struct PendingActions {
    actions: Vec<IncompleteAction>,
}

impl PendingActions {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a split that awaits its parent downlink.
    pub fn log_split(&mut self, rel: RelFileId, left: BlockNumber, right: BlockNumber, is_root: bool) {
        self.actions.push(IncompleteAction::Split {
            rel,
            left,
            right,
            is_root,
        });
    }

    /// Removes the split whose right half is `downlink`, if any.
    ///
    /// A root-flag mismatch is suspicious but not fatal: it is logged and the
    /// entry is removed anyway. Returns true if an entry was removed.
    pub fn forget_split(&mut self, rel: RelFileId, downlink: BlockNumber, is_root: bool) -> bool {
        let found = self.actions.iter().position(|action| {
            matches!(action, IncompleteAction::Split { rel: r, right, .. }
                if *r == rel && *right == downlink)
        });
        let Some(index) = found else {
            return false;
        };
        if let IncompleteAction::Split {
            is_root: expected, ..
        } = self.actions.remove(index)
        {
            if expected != is_root {
                warn!(
                    %rel,
                    downlink,
                    expected,
                    got = is_root,
                    "split completion with mismatched root flag"
                );
            }
        }
        true
    }

    /// Records a half-dead page that awaits deletion.
    pub fn log_deletion(&mut self, rel: RelFileId, block: BlockNumber) {
        self.actions.push(IncompleteAction::Deletion { rel, block });
    }

    /// Removes the pending deletion of `block`, if any. Returns true if an
    /// entry was removed.
    pub fn forget_deletion(&mut self, rel: RelFileId, block: BlockNumber) -> bool {
        let found = self.actions.iter().position(|action| {
            *action == IncompleteAction::Deletion { rel, block }
        });
        found.map(|index| self.actions.remove(index)).is_some()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Pending actions in the order they were logged.
    pub fn iter(&self) -> impl Iterator<Item = &IncompleteAction> {
        self.actions.iter()
    }

    /// Drops every pending action.
    pub fn clear(&mut self) {
        self.actions.clear();
    }
}
