use std::collections::HashMap;
use std::sync::Arc;

use nimbus_core::{AccountReply, DirectoryListing, Entry, EntryType, NimbusClient};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::anchor::{AnchorManager, SyncAnchor};
use super::changes::{ChangeScope, ChangeTracker};
use super::index::{
    DirectoryState, IndexError, IndexStore, ItemInput, ItemRecord, ItemStatus, ItemType,
    ListingReplacement,
};
use super::items::{ItemIdentifier, ParentResolver, ProviderItem, is_enumerable};
use super::paging::{self, PageToken, TokenError};
use super::working_set::{diff_favorites, merge_working_set};
use crate::config::EngineConfig;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("item not found for path: {0}")]
    MissingItem(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerScope {
    Directory(String),
    WorkingSet,
}

impl ContainerScope {
    pub fn change_scope(&self) -> ChangeScope {
        match self {
            ContainerScope::Directory(_) => ChangeScope::Container,
            ContainerScope::WorkingSet => ChangeScope::WorkingSet,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumerationPage {
    pub items: Vec<ProviderItem>,
    pub next_page: Option<PageToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport {
    pub deleted: Vec<ItemIdentifier>,
    pub updated: Vec<ProviderItem>,
    pub anchor: SyncAnchor,
    pub more_coming: bool,
}

// How a first-page refresh ended. Anything but `Refreshed` serves the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Refreshed,
    AccountMismatch,
    RemoteFailed,
    StoreFailed,
    TimedOut,
}

pub struct SyncEngine {
    client: RwLock<NimbusClient>,
    account: RwLock<String>,
    index: IndexStore,
    tracker: ChangeTracker,
    anchors: AnchorManager,
    favorites: Mutex<HashMap<ItemIdentifier, i64>>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(client: NimbusClient, index: IndexStore, config: EngineConfig) -> Self {
        let account = client.account().to_string();
        Self {
            client: RwLock::new(client),
            account: RwLock::new(account),
            index,
            tracker: ChangeTracker::new(),
            anchors: AnchorManager::default(),
            favorites: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn active_account(&self) -> String {
        self.account.read().clone()
    }

    pub fn current_anchor(&self) -> SyncAnchor {
        self.anchors.current()
    }

    pub fn observe_anchor(&self, seen: SyncAnchor) -> SyncAnchor {
        self.anchors.observe(seen)
    }

    pub fn switch_account(&self, client: NimbusClient) {
        let account = client.account().to_string();
        info!(account = %account, "switching active account");
        *self.client.write() = client;
        *self.account.write() = account;
        self.favorites.lock().clear();
    }

    pub async fn list_container(
        self: &Arc<Self>,
        scope: &ContainerScope,
        token: PageToken,
        cancel: &CancellationToken,
    ) -> Result<EnumerationPage, EngineError> {
        match scope {
            ContainerScope::WorkingSet => self.list_working_set().await,
            ContainerScope::Directory(path) if token.is_initial() => {
                self.list_first_page(path, cancel).await
            }
            // Mid-pagination pages never go to the network.
            ContainerScope::Directory(path) => self.serve_page(path, token.page_index()).await,
        }
    }

    pub fn drain_changes(&self, scope: ChangeScope) -> ChangeReport {
        let drained = self.tracker.drain(scope, &self.active_account());
        ChangeReport {
            deleted: drained.deleted,
            updated: drained.updated,
            anchor: self.anchors.current(),
            more_coming: false,
        }
    }

    async fn list_working_set(&self) -> Result<EnumerationPage, EngineError> {
        let account = self.active_account();
        let tagged = self.index.tagged_items(&account).await?;
        let favorites = self.index.favorite_items(&account).await?;
        let merged = merge_working_set(tagged, favorites);
        let visible: Vec<&ItemRecord> = merged.iter().filter(|r| is_enumerable(r)).collect();
        let items = self.provider_items(&account, visible).await?;
        debug!(count = items.len(), "enumerated working set");
        Ok(EnumerationPage {
            items,
            next_page: None,
        })
    }

    async fn serve_page(&self, path: &str, page: usize) -> Result<EnumerationPage, EngineError> {
        let account = self.active_account();
        let records = self.index.list_children(&account, path).await?;
        self.build_page(&account, &records, page).await
    }

    async fn list_first_page(
        self: &Arc<Self>,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<EnumerationPage, EngineError> {
        if cancel.is_cancelled() {
            return Ok(EnumerationPage::default());
        }
        self.refresh_favorites().await?;

        let account = self.active_account();
        let cached = self.index.list_children(&account, path).await?;
        let task = {
            let engine = Arc::clone(self);
            let account = account.clone();
            let path = path.to_string();
            let has_cache = !cached.is_empty();
            tokio::spawn(async move { engine.refresh_directory(&account, &path, has_cache).await })
        };

        // Dropping the join handle detaches the task; it still commits its result.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(path, "session invalidated while refreshing");
                return Ok(EnumerationPage::default());
            }
            joined = tokio::time::timeout(self.config.refresh_timeout, task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!(path, error = %err, "refresh task aborted");
                    RefreshOutcome::StoreFailed
                }
                Err(_) => {
                    warn!(path, timeout = ?self.config.refresh_timeout, "refresh timed out; serving cache");
                    RefreshOutcome::TimedOut
                }
            }
        };

        let records = if outcome == RefreshOutcome::Refreshed {
            self.index.list_children(&account, path).await?
        } else {
            cached
        };
        self.build_page(&account, &records, 0).await
    }

    pub async fn refresh_directory(
        &self,
        account: &str,
        path: &str,
        has_cache: bool,
    ) -> RefreshOutcome {
        match self.try_refresh_directory(account, path, has_cache).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(path, error = %err, "failed to store refreshed listing");
                RefreshOutcome::StoreFailed
            }
        }
    }

    async fn try_refresh_directory(
        &self,
        account: &str,
        path: &str,
        has_cache: bool,
    ) -> Result<RefreshOutcome, EngineError> {
        let client = self.client.read().clone();

        let entry = match client.read_entry(path).await {
            Ok(reply) => match self.accept_reply(account, path, reply) {
                Some(entry) => entry,
                None => return Ok(RefreshOutcome::AccountMismatch),
            },
            Err(err) => {
                warn!(path, code = err.code(), error = %err, "entry read failed; serving cache");
                return Ok(RefreshOutcome::RemoteFailed);
            }
        };

        let cached_etag = self
            .index
            .get_directory_state(account, path)
            .await?
            .and_then(|state| state.etag);
        if has_cache && cached_etag.is_some() && cached_etag == entry.etag {
            debug!(path, etag = ?entry.etag, "directory etag unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let listing = match client.read_directory(path, 1).await {
            Ok(reply) => match self.accept_reply(account, path, reply) {
                Some(listing) => listing,
                None => return Ok(RefreshOutcome::AccountMismatch),
            },
            Err(err) => {
                warn!(path, code = err.code(), error = %err, "directory read failed; serving cache");
                return Ok(RefreshOutcome::RemoteFailed);
            }
        };

        let replacement = self.apply_listing(account, path, listing).await?;
        info!(
            path,
            stored = replacement.stored,
            preserved = replacement.preserved,
            removed = replacement.removed.len(),
            "directory refreshed"
        );
        Ok(RefreshOutcome::Refreshed)
    }

    fn accept_reply<T>(&self, account: &str, path: &str, reply: AccountReply<T>) -> Option<T> {
        if reply.account == account && reply.account == *self.account.read() {
            Some(reply.value)
        } else {
            warn!(path, reply_account = %reply.account, "reply for inactive account ignored");
            None
        }
    }

    async fn apply_listing(
        &self,
        account: &str,
        path: &str,
        listing: DirectoryListing,
    ) -> Result<ListingReplacement, EngineError> {
        let directory = DirectoryState {
            etag: listing.directory.etag.clone(),
            file_id: listing.directory.file_id.clone(),
            encrypted: listing.directory.e2e_encrypted,
            date_read: None,
        };
        let own_path = path.trim_end_matches('/');
        let fresh: Vec<ItemInput> = listing
            .items
            .iter()
            .filter(|entry| entry.path.trim_end_matches('/') != own_path)
            .map(|entry| item_input(account, path, entry))
            .collect();

        let replacement = self
            .index
            .replace_directory_listing(account, path, &directory, &fresh)
            .await?;
        if !replacement.removed.is_empty() {
            for removed in &replacement.removed {
                self.tracker
                    .signal_delete(ChangeScope::Container, ItemIdentifier::item(account, removed));
            }
            self.anchors.advance();
        }
        Ok(replacement)
    }

    async fn build_page(
        &self,
        account: &str,
        records: &[ItemRecord],
        page: usize,
    ) -> Result<EnumerationPage, EngineError> {
        let page_size = self.config.page_size;
        let selected = paging::select_page(records, page, page_size);
        let items = self.provider_items(account, selected).await?;
        let next_page = paging::next_page(page, items.len(), page_size);
        Ok(EnumerationPage { items, next_page })
    }

    async fn provider_items(
        &self,
        account: &str,
        records: Vec<&ItemRecord>,
    ) -> Result<Vec<ProviderItem>, EngineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ranks = self.index.favorite_ranks(account).await?;
        let mut tags: HashMap<String, Vec<String>> = HashMap::new();
        for tag in self.index.list_tags(account).await? {
            tags.entry(tag.path).or_default().push(tag.tag);
        }

        let mut resolver = ParentResolver::new(&self.index, account, &self.config.home_path);
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let Some(parent) = resolver.resolve(&record.parent_path).await? else {
                warn!(
                    path = %record.path,
                    parent = %record.parent_path,
                    "item has no resolvable parent; skipped"
                );
                continue;
            };
            let rank = ranks.get(&record.identifier()).copied();
            let item_tags = tags.get(&record.path).cloned().unwrap_or_default();
            items.push(ProviderItem::from_record(record, parent, rank, item_tags));
        }
        Ok(items)
    }

    async fn provider_item(
        &self,
        account: &str,
        record: &ItemRecord,
    ) -> Result<Option<ProviderItem>, EngineError> {
        Ok(self
            .provider_items(account, vec![record])
            .await?
            .into_iter()
            .next())
    }

    pub async fn refresh_favorites(&self) -> Result<(), EngineError> {
        let account = self.active_account();
        let current = self.index.favorite_ranks(&account).await?;
        let diff = {
            let mut known = self.favorites.lock();
            let diff = diff_favorites(&known, &current);
            *known = current;
            diff
        };
        if diff.is_empty() {
            return Ok(());
        }

        let mut signaled = false;
        for identifier in diff.changed.iter().chain(&diff.removed) {
            let (Some(owner), Some(path)) = (identifier.account(), identifier.path()) else {
                continue;
            };
            match self.index.get_item(owner, path).await? {
                Some(record) => {
                    if let Some(item) = self.provider_item(owner, &record).await? {
                        self.tracker.signal_update(ChangeScope::WorkingSet, item);
                        signaled = true;
                    }
                }
                None => {
                    self.tracker
                        .signal_delete(ChangeScope::WorkingSet, identifier.clone());
                    signaled = true;
                }
            }
        }
        if signaled {
            let anchor = self.anchors.advance();
            debug!(
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                anchor = %anchor,
                "favorites changed"
            );
        }
        Ok(())
    }

    pub async fn set_favorite(&self, path: &str, favorite: bool) -> Result<(), EngineError> {
        let account = self.active_account();
        self.index
            .set_favorite(&account, path, favorite)
            .await?
            .ok_or_else(|| EngineError::MissingItem(path.to_string()))?;
        self.refresh_favorites().await
    }

    pub async fn set_tags(&self, path: &str, tags: &[String]) -> Result<(), EngineError> {
        let account = self.active_account();
        let record = self
            .index
            .get_item(&account, path)
            .await?
            .ok_or_else(|| EngineError::MissingItem(path.to_string()))?;
        self.index.set_tags(&account, path, tags).await?;
        if let Some(item) = self.provider_item(&account, &record).await? {
            self.tracker.signal_update(ChangeScope::WorkingSet, item);
            self.anchors.advance();
        }
        Ok(())
    }

    pub async fn record_transfer_status(
        &self,
        path: &str,
        status: ItemStatus,
        session: Option<&str>,
    ) -> Result<(), EngineError> {
        let account = self.active_account();
        let record = self
            .index
            .set_transfer_status(&account, path, status, session)
            .await?
            .ok_or_else(|| EngineError::MissingItem(path.to_string()))?;
        if !is_enumerable(&record) {
            // A foreground session or hide status takes the item out of every listing.
            self.tracker
                .signal_delete(ChangeScope::Container, record.identifier());
            self.anchors.advance();
        } else if let Some(item) = self.provider_item(&account, &record).await? {
            self.tracker.signal_update(ChangeScope::Container, item);
            self.anchors.advance();
        }
        Ok(())
    }

    pub async fn remove_item(&self, path: &str) -> Result<bool, EngineError> {
        let account = self.active_account();
        if !self.index.delete_item(&account, path).await? {
            return Ok(false);
        }
        let identifier = ItemIdentifier::item(&account, path);
        self.favorites.lock().remove(&identifier);
        self.tracker
            .signal_delete(ChangeScope::Container, identifier.clone());
        self.tracker.signal_delete(ChangeScope::WorkingSet, identifier);
        self.anchors.advance();
        Ok(true)
    }
}

fn item_input(account: &str, parent_path: &str, entry: &Entry) -> ItemInput {
    ItemInput {
        account: account.to_string(),
        path: entry.path.clone(),
        parent_path: parent_path.to_string(),
        name: entry.name.clone(),
        item_type: match entry.entry_type {
            EntryType::File => ItemType::File,
            EntryType::Dir => ItemType::Dir,
        },
        etag: entry.etag.clone(),
        file_id: entry.file_id.clone(),
        size: entry.size.map(|v| v as i64),
        modified: parse_modified(entry.modified.as_deref()),
        encrypted: entry.e2e_encrypted,
        status: ItemStatus::Normal,
        session: None,
        favorite: entry.favorite,
    }
}

fn parse_modified(value: Option<&str>) -> Option<i64> {
    let value = value?;
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(parsed) => Some(parsed.unix_timestamp()),
        Err(err) => {
            debug!(value, error = %err, "unparseable modification time");
            None
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
