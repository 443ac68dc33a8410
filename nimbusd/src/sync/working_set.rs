use std::collections::{BTreeMap, HashMap};

use super::index::ItemRecord;
use super::items::ItemIdentifier;

pub fn merge_working_set(tagged: Vec<ItemRecord>, favorites: Vec<ItemRecord>) -> Vec<ItemRecord> {
    let mut by_identifier: BTreeMap<ItemIdentifier, ItemRecord> = BTreeMap::new();
    for record in tagged.into_iter().chain(favorites) {
        by_identifier.insert(record.identifier(), record);
    }
    by_identifier.into_values().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteDiff {
    pub changed: Vec<ItemIdentifier>,
    pub removed: Vec<ItemIdentifier>,
}

impl FavoriteDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_favorites(
    previous: &HashMap<ItemIdentifier, i64>,
    current: &HashMap<ItemIdentifier, i64>,
) -> FavoriteDiff {
    let mut changed: Vec<ItemIdentifier> = current
        .iter()
        .filter(|(identifier, rank)| previous.get(*identifier) != Some(*rank))
        .map(|(identifier, _)| identifier.clone())
        .collect();
    let mut removed: Vec<ItemIdentifier> = previous
        .keys()
        .filter(|identifier| !current.contains_key(*identifier))
        .cloned()
        .collect();
    changed.sort();
    removed.sort();
    FavoriteDiff { changed, removed }
}
