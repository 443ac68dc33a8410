use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::anchor::SyncAnchor;
use super::engine::{ChangeReport, ContainerScope, EngineError, EnumerationPage, SyncEngine};
use super::index::ItemType;
use super::items::ItemIdentifier;
use super::paging::PageToken;

pub struct Enumerator {
    engine: Arc<SyncEngine>,
    identifier: ItemIdentifier,
    scope: Option<ContainerScope>,
    cancel: CancellationToken,
}

impl Enumerator {
    // Resolves the enumerated identifier to a scope. Identifiers that do not
    // name a cached directory of the active account enumerate as empty.
    pub async fn open(
        engine: Arc<SyncEngine>,
        identifier: ItemIdentifier,
    ) -> Result<Self, EngineError> {
        let scope = match &identifier {
            ItemIdentifier::RootContainer => {
                Some(ContainerScope::Directory(engine.config().home_path.clone()))
            }
            ItemIdentifier::WorkingSet => Some(ContainerScope::WorkingSet),
            ItemIdentifier::Item { account, path } => {
                if *account != engine.active_account() {
                    None
                } else {
                    engine
                        .index()
                        .get_item(account, path)
                        .await?
                        .filter(|record| record.item_type == ItemType::Dir)
                        .map(|record| ContainerScope::Directory(record.path))
                }
            }
        };
        if scope.is_none() {
            warn!(identifier = %identifier, "enumerated identifier does not name a directory");
        }
        Ok(Self {
            engine,
            identifier,
            scope,
            cancel: CancellationToken::new(),
        })
    }

    pub fn identifier(&self) -> &ItemIdentifier {
        &self.identifier
    }

    pub fn scope(&self) -> Option<&ContainerScope> {
        self.scope.as_ref()
    }

    pub async fn enumerate_items(&self, page: &[u8]) -> Result<EnumerationPage, EngineError> {
        let token = PageToken::decode(page)?;
        let Some(scope) = &self.scope else {
            return Ok(EnumerationPage::default());
        };
        if self.cancel.is_cancelled() {
            debug!(identifier = %self.identifier, "enumerate on invalidated session");
            return Ok(EnumerationPage::default());
        }
        self.engine
            .list_container(scope, token, &self.cancel)
            .await
    }

    // The ledgers only hold what was signaled after the previous drain, so
    // `since` just keeps the reported anchor from falling behind the host.
    pub fn enumerate_changes(&self, since: &[u8]) -> Result<ChangeReport, EngineError> {
        let since = SyncAnchor::decode(since)?;
        self.engine.observe_anchor(since);
        let Some(scope) = self.scope.as_ref().map(ContainerScope::change_scope) else {
            return Ok(ChangeReport {
                deleted: Vec::new(),
                updated: Vec::new(),
                anchor: self.engine.current_anchor(),
                more_coming: false,
            });
        };
        let report = self.engine.drain_changes(scope);
        debug!(
            identifier = %self.identifier,
            since = %since,
            anchor = %report.anchor,
            deleted = report.deleted.len(),
            updated = report.updated.len(),
            "enumerated changes"
        );
        Ok(report)
    }

    pub fn current_anchor(&self) -> SyncAnchor {
        self.engine.current_anchor()
    }

    pub fn invalidate(&self) {
        self.cancel.cancel();
    }

    pub fn is_invalidated(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Enumerator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
