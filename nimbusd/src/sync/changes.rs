use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::items::{ItemIdentifier, ProviderItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeScope {
    Container,
    WorkingSet,
}

#[derive(Debug, Default)]
struct Ledger {
    deletions: HashSet<ItemIdentifier>,
    updates: HashMap<ItemIdentifier, ProviderItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainedChanges {
    pub deleted: Vec<ItemIdentifier>,
    pub updated: Vec<ProviderItem>,
}

impl DrainedChanges {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty()
    }
}

// Writers take the ledger's write lock; a drain reads and clears under one
// write lock so a signal can never land between the report and the clear.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    container: RwLock<Ledger>,
    working_set: RwLock<Ledger>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, scope: ChangeScope) -> &RwLock<Ledger> {
        match scope {
            ChangeScope::Container => &self.container,
            ChangeScope::WorkingSet => &self.working_set,
        }
    }

    pub fn signal_delete(&self, scope: ChangeScope, identifier: ItemIdentifier) {
        let mut ledger = self.ledger(scope).write();
        ledger.updates.remove(&identifier);
        ledger.deletions.insert(identifier);
    }

    pub fn signal_update(&self, scope: ChangeScope, item: ProviderItem) {
        let mut ledger = self.ledger(scope).write();
        ledger.deletions.remove(&item.identifier);
        ledger.updates.insert(item.identifier.clone(), item);
    }

    pub fn drain(&self, scope: ChangeScope, active_account: &str) -> DrainedChanges {
        let ledger = std::mem::take(&mut *self.ledger(scope).write());

        let mut deleted: Vec<ItemIdentifier> = ledger.deletions.into_iter().collect();
        let mut updated = Vec::with_capacity(ledger.updates.len());
        for (identifier, item) in ledger.updates {
            if identifier.account() == Some(active_account) {
                updated.push(item);
            } else {
                deleted.push(identifier);
            }
        }
        deleted.sort();
        updated.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        DrainedChanges { deleted, updated }
    }

    pub fn pending_len(&self, scope: ChangeScope) -> usize {
        let ledger = self.ledger(scope).read();
        ledger.deletions.len() + ledger.updates.len()
    }

    pub fn is_pending(&self, scope: ChangeScope, identifier: &ItemIdentifier) -> bool {
        let ledger = self.ledger(scope).read();
        ledger.deletions.contains(identifier) || ledger.updates.contains_key(identifier)
    }
}
