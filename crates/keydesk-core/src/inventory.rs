//! The fixed set of lendable keys.

use std::collections::BTreeSet;

use crate::KeyId;

/// Card numbers handed out at the front desk.
pub const STANDARD_KEYS: [&str; 3] = ["13", "14", "15"];

/// Fixed, ordered set of key identifiers the ledger accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInventory {
    keys: BTreeSet<KeyId>,
}

impl KeyInventory {
    /// The standard inventory: cards 13, 14 and 15.
    pub fn standard() -> Self {
        Self::from_keys(STANDARD_KEYS.iter().copied().map(KeyId::from))
    }

    /// Builds an inventory from arbitrary identifiers. Duplicates collapse.
    pub fn from_keys(keys: impl IntoIterator<Item = KeyId>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Returns true if `key` may be borrowed.
    pub fn contains(&self, key: &KeyId) -> bool {
        self.keys.contains(key)
    }

    /// Iterates keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyId> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for KeyInventory {
    fn default() -> Self {
        Self::standard()
    }
}
