use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;
use url::form_urlencoded;

use super::index::{IndexError, IndexStore, ItemRecord, ItemStatus, ItemType};

const ROOT_CONTAINER_ID: &str = ".root";
const WORKING_SET_ID: &str = ".working-set";

// Session names of the two background transfer sessions; any other session
// marks an item as owned by a foreground transfer.
pub const BACKGROUND_DOWNLOAD_SESSION: &str = "nimbus.background-download";
pub const BACKGROUND_UPLOAD_SESSION: &str = "nimbus.background-upload";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier has no path component: {0}")]
    MissingPath(String),
    #[error("identifier has no account component: {0}")]
    MissingAccount(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemIdentifier {
    RootContainer,
    WorkingSet,
    Item { account: String, path: String },
}

impl ItemIdentifier {
    pub fn item(account: &str, path: &str) -> Self {
        ItemIdentifier::Item {
            account: account.to_string(),
            path: path.to_string(),
        }
    }

    pub fn account(&self) -> Option<&str> {
        match self {
            ItemIdentifier::Item { account, .. } => Some(account),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            ItemIdentifier::Item { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ItemIdentifier::RootContainer => ROOT_CONTAINER_ID.to_string(),
            ItemIdentifier::WorkingSet => WORKING_SET_ID.to_string(),
            ItemIdentifier::Item { account, path } => {
                let account: String = form_urlencoded::byte_serialize(account.as_bytes()).collect();
                format!("{account}{path}")
            }
        }
    }

    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        match value {
            "" => Err(IdentifierError::Empty),
            ROOT_CONTAINER_ID => Ok(ItemIdentifier::RootContainer),
            WORKING_SET_ID => Ok(ItemIdentifier::WorkingSet),
            other => {
                // The encoded account never contains '/', paths always start with it.
                let split = other
                    .find('/')
                    .ok_or_else(|| IdentifierError::MissingPath(other.to_string()))?;
                let (encoded, path) = other.split_at(split);
                let account: String = form_urlencoded::parse(encoded.as_bytes())
                    .map(|(key, _)| key.into_owned())
                    .next()
                    .unwrap_or_default();
                if account.is_empty() {
                    return Err(IdentifierError::MissingAccount(other.to_string()));
                }
                Ok(ItemIdentifier::Item {
                    account,
                    path: path.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for ItemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for ItemIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderItem {
    pub identifier: ItemIdentifier,
    pub parent: ItemIdentifier,
    pub filename: String,
    pub item_type: ItemType,
    pub etag: Option<String>,
    pub size: Option<i64>,
    pub modified: Option<i64>,
    pub status: ItemStatus,
    pub favorite_rank: Option<i64>,
    pub tags: Vec<String>,
}

impl ProviderItem {
    pub fn from_record(
        record: &ItemRecord,
        parent: ItemIdentifier,
        favorite_rank: Option<i64>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            identifier: record.identifier(),
            parent,
            filename: record.name.clone(),
            item_type: record.item_type,
            etag: record.etag.clone(),
            size: record.size,
            modified: record.modified,
            status: record.status,
            favorite_rank,
            tags,
        }
    }
}

pub fn is_enumerable(record: &ItemRecord) -> bool {
    if record.encrypted || record.status == ItemStatus::Hide {
        return false;
    }
    match record.session.as_deref() {
        None | Some("") => true,
        Some(session) => {
            session == BACKGROUND_DOWNLOAD_SESSION || session == BACKGROUND_UPLOAD_SESSION
        }
    }
}

pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

pub struct ParentResolver<'a> {
    index: &'a IndexStore,
    account: &'a str,
    home_path: &'a str,
    resolved: HashMap<String, Option<ItemIdentifier>>,
}

impl<'a> ParentResolver<'a> {
    pub fn new(index: &'a IndexStore, account: &'a str, home_path: &'a str) -> Self {
        Self {
            index,
            account,
            home_path,
            resolved: HashMap::new(),
        }
    }

    pub async fn resolve(
        &mut self,
        parent_path: &str,
    ) -> Result<Option<ItemIdentifier>, IndexError> {
        if parent_path == self.home_path {
            return Ok(Some(ItemIdentifier::RootContainer));
        }
        if let Some(known) = self.resolved.get(parent_path) {
            return Ok(known.clone());
        }
        let parent = self
            .index
            .get_item(self.account, parent_path)
            .await?
            .filter(|record| record.item_type == ItemType::Dir)
            .map(|record| record.identifier());
        self.resolved
            .insert(parent_path.to_string(), parent.clone());
        Ok(parent)
    }
}
