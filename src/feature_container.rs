//! Per unit of work store of resource key to transaction object.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::transaction::TransactionObject;

/// A transaction stored under one resource key.
#[derive(Debug, Clone)]
pub struct Enlistment {
    pub transaction: Arc<TransactionObject>,
    /// False when the transaction belongs to an ancestor unit of work and was
    /// only borrowed through provider reuse.
    pub owned: bool,
}

#[derive(Default)]
struct Entries {
    index: HashMap<String, usize>,
    slots: Vec<(String, Enlistment)>,
}

/// Keyed store enforcing at most one transaction per resource.
///
/// Keys are write-once: `get_or_add` never replaces an existing entry.
/// Several keys may alias the same transaction object.
pub struct TransactionFeatureContainer {
    suppressed: bool,
    entries: RwLock<Entries>,
}

impl TransactionFeatureContainer {
    pub fn new() -> Self {
        Self {
            suppressed: false,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// A container that rejects provider-driven transaction creation.
    pub fn suppressed() -> Self {
        Self {
            suppressed: true,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn get(&self, key: &str) -> Option<Enlistment> {
        let entries = self.entries.read();
        entries
            .index
            .get(key)
            .map(|slot| entries.slots[*slot].1.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().index.contains_key(key)
    }

    /// Stores `enlistment` under `key` unless the key is taken. Returns the
    /// enlistment that ends up under the key and whether it was inserted.
    /// A suppressed container never stores anything.
    pub fn get_or_add(&self, key: &str, enlistment: Enlistment) -> Option<(Enlistment, bool)> {
        if self.suppressed {
            return None;
        }
        let mut entries = self.entries.write();
        if let Some(slot) = entries.index.get(key) {
            return Some((entries.slots[*slot].1.clone(), false));
        }
        let slot = entries.slots.len();
        entries.index.insert(key.to_string(), slot);
        entries.slots.push((key.to_string(), enlistment.clone()));
        Some((enlistment, true))
    }

    /// Keys in first-insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .slots
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Distinct transactions in the order their first key was inserted.
    /// A transaction counts as owned if any of its keys owns it.
    pub fn distinct(&self) -> Vec<Enlistment> {
        let entries = self.entries.read();
        let mut seen: HashMap<Uuid, usize> = HashMap::new();
        let mut distinct: Vec<Enlistment> = Vec::new();
        for (_, enlistment) in &entries.slots {
            match seen.get(&enlistment.transaction.id()) {
                Some(position) => distinct[*position].owned |= enlistment.owned,
                None => {
                    seen.insert(enlistment.transaction.id(), distinct.len());
                    distinct.push(enlistment.clone());
                }
            }
        }
        distinct
    }

    /// Distinct transaction objects, owned or not.
    pub fn transactions(&self) -> Vec<Arc<TransactionObject>> {
        self.distinct()
            .into_iter()
            .map(|enlistment| enlistment.transaction)
            .collect()
    }

    pub fn contains_transaction(&self, id: Uuid) -> bool {
        self.entries
            .read()
            .slots
            .iter()
            .any(|(_, enlistment)| enlistment.transaction.id() == id)
    }

    /// True when some key holds `id` as an owned enlistment.
    pub fn is_owned(&self, id: Uuid) -> bool {
        self.entries
            .read()
            .slots
            .iter()
            .any(|(_, enlistment)| enlistment.owned && enlistment.transaction.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().slots.is_empty()
    }
}

impl Default for TransactionFeatureContainer {
    fn default() -> Self {
        Self::new()
    }
}
