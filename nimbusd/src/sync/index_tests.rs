use super::*;
use tempfile::tempdir;

async fn make_store() -> IndexStore {
    IndexStore::in_memory().await.unwrap()
}

fn input(path: &str, parent: &str, status: ItemStatus) -> ItemInput {
    ItemInput {
        account: "alice".into(),
        path: path.into(),
        parent_path: parent.into(),
        name: path.rsplit('/').next().unwrap_or_default().into(),
        item_type: ItemType::File,
        etag: Some(format!("etag-{path}")),
        file_id: None,
        size: Some(1),
        modified: Some(1_700_000_000),
        encrypted: false,
        status,
        session: None,
        favorite: false,
    }
}

#[tokio::test]
async fn upsert_and_fetch_item() {
    let store = make_store().await;
    let item = input("/Docs/A.txt", "/Docs", ItemStatus::Normal);

    let inserted = store.upsert_item(&item).await.unwrap();
    let fetched = store.get_item("alice", "/Docs/A.txt").await.unwrap();

    assert_eq!(Some(inserted), fetched);
    assert!(store.get_item("bob", "/Docs/A.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_updates_existing_item() {
    let store = make_store().await;
    let mut item = input("/Docs/A.txt", "/Docs", ItemStatus::Normal);

    store.upsert_item(&item).await.unwrap();
    item.size = Some(24);
    item.status = ItemStatus::Downloading;
    let updated = store.upsert_item(&item).await.unwrap();

    assert_eq!(updated.size, Some(24));
    assert_eq!(updated.status, ItemStatus::Downloading);
}

#[tokio::test]
async fn upsert_items_reports_count() {
    let store = make_store().await;
    let items = vec![
        input("/Docs/A.txt", "/Docs", ItemStatus::Normal),
        input("/Docs/B.txt", "/Docs", ItemStatus::Normal),
    ];
    assert_eq!(store.upsert_items(&items).await.unwrap(), 2);
    assert_eq!(store.list_children("alice", "/Docs").await.unwrap().len(), 2);
}

#[tokio::test]
async fn list_children_sorts_by_name_and_scopes_by_parent() {
    let store = make_store().await;
    for path in ["/Docs/c.txt", "/Docs/a.txt", "/Docs/b.txt", "/Other/z.txt"] {
        let parent = crate::sync::items::parent_path(path);
        store
            .upsert_item(&input(path, &parent, ItemStatus::Normal))
            .await
            .unwrap();
    }

    let names: Vec<String> = store
        .list_children("alice", "/Docs")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn directory_state_round_trips() {
    let store = make_store().await;
    assert!(store.get_directory_state("alice", "/Photos").await.unwrap().is_none());

    store
        .set_directory_state(
            "alice",
            "/Photos",
            &DirectoryState {
                etag: Some("E1".into()),
                file_id: Some("42".into()),
                encrypted: false,
                date_read: None,
            },
        )
        .await
        .unwrap();

    let state = store.get_directory_state("alice", "/Photos").await.unwrap().unwrap();
    assert_eq!(state.etag.as_deref(), Some("E1"));
    assert_eq!(state.file_id.as_deref(), Some("42"));
    assert!(state.date_read.is_some());
}

#[tokio::test]
async fn replace_listing_keeps_items_mid_transfer() {
    let store = make_store().await;
    store
        .upsert_items(&[
            input("/Docs/stale.txt", "/Docs", ItemStatus::Normal),
            input("/Docs/hidden.txt", "/Docs", ItemStatus::Hide),
            input("/Docs/pending.txt", "/Docs", ItemStatus::WaitDownload),
            input("/Docs/failed.txt", "/Docs", ItemStatus::DownloadError),
            input("/Docs/kept.txt", "/Docs", ItemStatus::Normal),
        ])
        .await
        .unwrap();

    let mut fresh_pending = input("/Docs/pending.txt", "/Docs", ItemStatus::Normal);
    fresh_pending.etag = Some("remote".into());
    let fresh = vec![
        input("/Docs/kept.txt", "/Docs", ItemStatus::Normal),
        input("/Docs/new.txt", "/Docs", ItemStatus::Normal),
        fresh_pending,
    ];
    let replacement = store
        .replace_directory_listing(
            "alice",
            "/Docs",
            &DirectoryState {
                etag: Some("E2".into()),
                ..DirectoryState::default()
            },
            &fresh,
        )
        .await
        .unwrap();

    assert_eq!(replacement.stored, 3);
    assert_eq!(replacement.preserved, 2);
    let mut removed = replacement.removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["/Docs/hidden.txt", "/Docs/stale.txt"]);

    let children = store.list_children("alice", "/Docs").await.unwrap();
    let names: Vec<&str> = children.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["failed.txt", "kept.txt", "new.txt", "pending.txt"]);

    // The local transfer state beats the fresh remote row.
    let pending = children.iter().find(|r| r.name == "pending.txt").unwrap();
    assert_eq!(pending.status, ItemStatus::WaitDownload);
    assert_eq!(pending.etag.as_deref(), Some("etag-/Docs/pending.txt"));

    let state = store.get_directory_state("alice", "/Docs").await.unwrap().unwrap();
    assert_eq!(state.etag.as_deref(), Some("E2"));
}

#[tokio::test]
async fn tags_and_favorites_feed_working_set_queries() {
    let store = make_store().await;
    let mut fav = input("/Docs/fav.txt", "/Docs", ItemStatus::Normal);
    fav.favorite = true;
    let mut other_fav = input("/A/first.txt", "/A", ItemStatus::Normal);
    other_fav.favorite = true;
    store
        .upsert_items(&[
            fav,
            other_fav,
            input("/Docs/tagged.txt", "/Docs", ItemStatus::Normal),
            input("/Docs/plain.txt", "/Docs", ItemStatus::Normal),
        ])
        .await
        .unwrap();
    store
        .set_tags(
            "alice",
            "/Docs/tagged.txt",
            &["red".to_string(), "blue".to_string(), "red".to_string()],
        )
        .await
        .unwrap();

    let tags = store.list_tags("alice").await.unwrap();
    assert_eq!(
        tags,
        vec![
            TagRecord {
                path: "/Docs/tagged.txt".into(),
                tag: "blue".into()
            },
            TagRecord {
                path: "/Docs/tagged.txt".into(),
                tag: "red".into()
            },
        ]
    );

    let tagged = store.tagged_items("alice").await.unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].path, "/Docs/tagged.txt");

    let favorites = store.favorite_items("alice").await.unwrap();
    assert_eq!(favorites.len(), 2);

    let ranks = store.favorite_ranks("alice").await.unwrap();
    assert_eq!(ranks.get(&ItemIdentifier::item("alice", "/A/first.txt")), Some(&1));
    assert_eq!(ranks.get(&ItemIdentifier::item("alice", "/Docs/fav.txt")), Some(&2));

    store.set_tags("alice", "/Docs/tagged.txt", &[]).await.unwrap();
    assert!(store.tagged_items("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn writers_update_single_rows() {
    let store = make_store().await;
    store
        .upsert_item(&input("/Docs/A.txt", "/Docs", ItemStatus::Normal))
        .await
        .unwrap();

    let updated = store
        .set_transfer_status("alice", "/Docs/A.txt", ItemStatus::Uploading, Some("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, ItemStatus::Uploading);
    assert_eq!(updated.session.as_deref(), Some("s1"));

    let favorite = store
        .set_favorite("alice", "/Docs/A.txt", true)
        .await
        .unwrap()
        .unwrap();
    assert!(favorite.favorite);
    assert!(store
        .set_favorite("alice", "/Docs/missing.txt", true)
        .await
        .unwrap()
        .is_none());

    store
        .set_tags("alice", "/Docs/A.txt", &["x".to_string()])
        .await
        .unwrap();
    assert!(store.delete_item("alice", "/Docs/A.txt").await.unwrap());
    assert!(!store.delete_item("alice", "/Docs/A.txt").await.unwrap());
    assert!(store.list_tags("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn on_disk_store_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("index.db");
    {
        let store = IndexStore::open(&db_path).await.unwrap();
        store
            .upsert_item(&input("/Docs/A.txt", "/Docs", ItemStatus::Normal))
            .await
            .unwrap();
    }
    let reopened = IndexStore::open(&db_path).await.unwrap();
    assert!(reopened.get_item("alice", "/Docs/A.txt").await.unwrap().is_some());
}
