use std::collections::{HashMap, HashSet};
use std::{fs, path::Path, path::PathBuf};

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::OffsetDateTime;

use super::items::ItemIdentifier;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ITEM_COLUMNS: &str = "id, account, path, parent_path, name, item_type, etag, file_id, size, modified, encrypted, status, session, favorite";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid item type: {0}")]
    InvalidItemType(String),
    #[error("invalid item status: {0}")]
    InvalidStatus(String),
    #[error("item not found after upsert")]
    MissingItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Dir,
}

impl ItemType {
    fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Dir => "dir",
        }
    }

    fn parse(value: &str) -> Result<Self, IndexError> {
        match value {
            "file" => Ok(ItemType::File),
            "dir" => Ok(ItemType::Dir),
            other => Err(IndexError::InvalidItemType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Normal,
    Hide,
    WaitDownload,
    InDownload,
    Downloading,
    DownloadError,
    WaitUpload,
    InUpload,
    Uploading,
    UploadError,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Normal => "normal",
            ItemStatus::Hide => "hide",
            ItemStatus::WaitDownload => "wait_download",
            ItemStatus::InDownload => "in_download",
            ItemStatus::Downloading => "downloading",
            ItemStatus::DownloadError => "download_error",
            ItemStatus::WaitUpload => "wait_upload",
            ItemStatus::InUpload => "in_upload",
            ItemStatus::Uploading => "uploading",
            ItemStatus::UploadError => "upload_error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IndexError> {
        match value {
            "normal" => Ok(ItemStatus::Normal),
            "hide" => Ok(ItemStatus::Hide),
            "wait_download" => Ok(ItemStatus::WaitDownload),
            "in_download" => Ok(ItemStatus::InDownload),
            "downloading" => Ok(ItemStatus::Downloading),
            "download_error" => Ok(ItemStatus::DownloadError),
            "wait_upload" => Ok(ItemStatus::WaitUpload),
            "in_upload" => Ok(ItemStatus::InUpload),
            "uploading" => Ok(ItemStatus::Uploading),
            "upload_error" => Ok(ItemStatus::UploadError),
            other => Err(IndexError::InvalidStatus(other.to_string())),
        }
    }

    pub fn is_replaceable(&self) -> bool {
        matches!(self, ItemStatus::Normal | ItemStatus::Hide)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemInput {
    pub account: String,
    pub path: String,
    pub parent_path: String,
    pub name: String,
    pub item_type: ItemType,
    pub etag: Option<String>,
    pub file_id: Option<String>,
    pub size: Option<i64>,
    pub modified: Option<i64>,
    pub encrypted: bool,
    pub status: ItemStatus,
    pub session: Option<String>,
    pub favorite: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    pub account: String,
    pub path: String,
    pub parent_path: String,
    pub name: String,
    pub item_type: ItemType,
    pub etag: Option<String>,
    pub file_id: Option<String>,
    pub size: Option<i64>,
    pub modified: Option<i64>,
    pub encrypted: bool,
    pub status: ItemStatus,
    pub session: Option<String>,
    pub favorite: bool,
}

impl ItemRecord {
    pub fn identifier(&self) -> ItemIdentifier {
        ItemIdentifier::item(&self.account, &self.path)
    }

    fn to_input(&self) -> ItemInput {
        ItemInput {
            account: self.account.clone(),
            path: self.path.clone(),
            parent_path: self.parent_path.clone(),
            name: self.name.clone(),
            item_type: self.item_type,
            etag: self.etag.clone(),
            file_id: self.file_id.clone(),
            size: self.size,
            modified: self.modified,
            encrypted: self.encrypted,
            status: self.status,
            session: self.session.clone(),
            favorite: self.favorite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryState {
    pub etag: Option<String>,
    pub file_id: Option<String>,
    pub encrypted: bool,
    pub date_read: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub path: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingReplacement {
    pub stored: usize,
    pub preserved: usize,
    pub removed: Vec<String>,
}

#[derive(Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, IndexError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, IndexError> {
        Self::open(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_item(&self, item: &ItemInput) -> Result<ItemRecord, IndexError> {
        upsert_with(&self.pool, item).await?;
        self.get_item(&item.account, &item.path)
            .await?
            .ok_or(IndexError::MissingItem)
    }

    pub async fn upsert_items(&self, items: &[ItemInput]) -> Result<usize, IndexError> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            upsert_with(&mut *tx, item).await?;
        }
        tx.commit().await?;
        Ok(items.len())
    }

    pub async fn get_item(
        &self,
        account: &str,
        path: &str,
    ) -> Result<Option<ItemRecord>, IndexError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE account = ?1 AND path = ?2");
        let row = sqlx::query(&sql)
            .bind(account)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| item_from_row(&row)).transpose()
    }

    pub async fn list_children(
        &self,
        account: &str,
        parent_path: &str,
    ) -> Result<Vec<ItemRecord>, IndexError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE account = ?1 AND parent_path = ?2 ORDER BY name ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account)
            .bind(parent_path)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn delete_item(&self, account: &str, path: &str) -> Result<bool, IndexError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM items WHERE account = ?1 AND path = ?2")
            .bind(account)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tags WHERE account = ?1 AND path = ?2")
            .bind(account)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_directory_state(
        &self,
        account: &str,
        path: &str,
    ) -> Result<Option<DirectoryState>, IndexError> {
        let row = sqlx::query(
            "SELECT etag, file_id, encrypted, date_read FROM directories WHERE account = ?1 AND path = ?2",
        )
        .bind(account)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let encrypted: i64 = row.try_get("encrypted")?;
        Ok(Some(DirectoryState {
            etag: row.try_get("etag")?,
            file_id: row.try_get("file_id")?,
            encrypted: encrypted != 0,
            date_read: row.try_get("date_read")?,
        }))
    }

    pub async fn set_directory_state(
        &self,
        account: &str,
        path: &str,
        state: &DirectoryState,
    ) -> Result<(), IndexError> {
        set_directory_with(&self.pool, account, path, state).await
    }

    // Synced and hidden rows are dropped; rows in the middle of a transfer
    // are written back after the fresh rows so their local state wins.
    pub async fn replace_directory_listing(
        &self,
        account: &str,
        path: &str,
        directory: &DirectoryState,
        fresh: &[ItemInput],
    ) -> Result<ListingReplacement, IndexError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE account = ?1 AND parent_path = ?2");
        let rows = sqlx::query(&sql)
            .bind(account)
            .bind(path)
            .fetch_all(&mut *tx)
            .await?;
        let mut replaceable = Vec::new();
        let mut in_transfer = Vec::new();
        for row in &rows {
            let record = item_from_row(row)?;
            if record.status.is_replaceable() {
                replaceable.push(record.path);
            } else {
                in_transfer.push(record);
            }
        }

        sqlx::query(
            "DELETE FROM items WHERE account = ?1 AND parent_path = ?2 AND status IN ('normal', 'hide')",
        )
        .bind(account)
        .bind(path)
        .execute(&mut *tx)
        .await?;

        for item in fresh {
            upsert_with(&mut *tx, item).await?;
        }
        for record in &in_transfer {
            upsert_with(&mut *tx, &record.to_input()).await?;
        }
        set_directory_with(&mut *tx, account, path, directory).await?;
        tx.commit().await?;

        let fresh_paths: HashSet<&str> = fresh.iter().map(|item| item.path.as_str()).collect();
        let removed = replaceable
            .into_iter()
            .filter(|old| !fresh_paths.contains(old.as_str()))
            .collect();
        Ok(ListingReplacement {
            stored: fresh.len(),
            preserved: in_transfer.len(),
            removed,
        })
    }

    pub async fn set_favorite(
        &self,
        account: &str,
        path: &str,
        favorite: bool,
    ) -> Result<Option<ItemRecord>, IndexError> {
        sqlx::query("UPDATE items SET favorite = ?3 WHERE account = ?1 AND path = ?2")
            .bind(account)
            .bind(path)
            .bind(i64::from(favorite))
            .execute(&self.pool)
            .await?;
        self.get_item(account, path).await
    }

    pub async fn set_transfer_status(
        &self,
        account: &str,
        path: &str,
        status: ItemStatus,
        session: Option<&str>,
    ) -> Result<Option<ItemRecord>, IndexError> {
        sqlx::query("UPDATE items SET status = ?3, session = ?4 WHERE account = ?1 AND path = ?2")
            .bind(account)
            .bind(path)
            .bind(status.as_str())
            .bind(session)
            .execute(&self.pool)
            .await?;
        self.get_item(account, path).await
    }

    pub async fn set_tags(
        &self,
        account: &str,
        path: &str,
        tags: &[String],
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tags WHERE account = ?1 AND path = ?2")
            .bind(account)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO tags (account, path, tag) VALUES (?1, ?2, ?3)")
                .bind(account)
                .bind(path)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_tags(&self, account: &str) -> Result<Vec<TagRecord>, IndexError> {
        let rows = sqlx::query("SELECT path, tag FROM tags WHERE account = ?1 ORDER BY path, tag")
            .bind(account)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TagRecord {
                path: row.try_get("path")?,
                tag: row.try_get("tag")?,
            });
        }
        Ok(out)
    }

    pub async fn tagged_items(&self, account: &str) -> Result<Vec<ItemRecord>, IndexError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE account = ?1 AND path IN (SELECT path FROM tags WHERE account = ?1)
             ORDER BY path ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn favorite_items(&self, account: &str) -> Result<Vec<ItemRecord>, IndexError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE account = ?1 AND favorite != 0 ORDER BY path ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn favorite_ranks(
        &self,
        account: &str,
    ) -> Result<HashMap<ItemIdentifier, i64>, IndexError> {
        let rows = sqlx::query(
            "SELECT path FROM items WHERE account = ?1 AND favorite != 0 ORDER BY path ASC",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;
        let mut ranks = HashMap::with_capacity(rows.len());
        for (rank, row) in rows.iter().enumerate() {
            let path: String = row.try_get("path")?;
            ranks.insert(ItemIdentifier::item(account, &path), rank as i64 + 1);
        }
        Ok(ranks)
    }
}

async fn upsert_with<'e, E>(executor: E, item: &ItemInput) -> Result<(), IndexError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "
        INSERT INTO items (
            account, path, parent_path, name, item_type, etag, file_id,
            size, modified, encrypted, status, session, favorite
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(account, path) DO UPDATE SET
            parent_path = excluded.parent_path,
            name = excluded.name,
            item_type = excluded.item_type,
            etag = excluded.etag,
            file_id = excluded.file_id,
            size = excluded.size,
            modified = excluded.modified,
            encrypted = excluded.encrypted,
            status = excluded.status,
            session = excluded.session,
            favorite = excluded.favorite;
        ",
    )
    .bind(&item.account)
    .bind(&item.path)
    .bind(&item.parent_path)
    .bind(&item.name)
    .bind(item.item_type.as_str())
    .bind(&item.etag)
    .bind(&item.file_id)
    .bind(item.size)
    .bind(item.modified)
    .bind(i64::from(item.encrypted))
    .bind(item.status.as_str())
    .bind(&item.session)
    .bind(i64::from(item.favorite))
    .execute(executor)
    .await?;
    Ok(())
}

async fn set_directory_with<'e, E>(
    executor: E,
    account: &str,
    path: &str,
    state: &DirectoryState,
) -> Result<(), IndexError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let date_read = state
        .date_read
        .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp());
    sqlx::query(
        "
        INSERT INTO directories (account, path, etag, file_id, encrypted, date_read)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(account, path) DO UPDATE SET
            etag = excluded.etag,
            file_id = excluded.file_id,
            encrypted = excluded.encrypted,
            date_read = excluded.date_read;
        ",
    )
    .bind(account)
    .bind(path)
    .bind(&state.etag)
    .bind(&state.file_id)
    .bind(i64::from(state.encrypted))
    .bind(date_read)
    .execute(executor)
    .await?;
    Ok(())
}

fn item_from_row(row: &SqliteRow) -> Result<ItemRecord, IndexError> {
    let item_type: String = row.try_get("item_type")?;
    let status: String = row.try_get("status")?;
    let encrypted: i64 = row.try_get("encrypted")?;
    let favorite: i64 = row.try_get("favorite")?;
    Ok(ItemRecord {
        id: row.try_get("id")?,
        account: row.try_get("account")?,
        path: row.try_get("path")?,
        parent_path: row.try_get("parent_path")?,
        name: row.try_get("name")?,
        item_type: ItemType::parse(&item_type)?,
        etag: row.try_get("etag")?,
        file_id: row.try_get("file_id")?,
        size: row.try_get("size")?,
        modified: row.try_get("modified")?,
        encrypted: encrypted != 0,
        status: ItemStatus::parse(&status)?,
        session: row.try_get("session")?,
        favorite: favorite != 0,
    })
}

fn default_db_path() -> Result<PathBuf, IndexError> {
    let mut path = dirs::data_dir().ok_or(IndexError::MissingDataDir)?;
    path.push("nimbus");
    path.push("index.db");
    Ok(path)
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
