mod common;

use std::time::Duration;

use chore_sync::db::{self, LocalStore, OperationQueue};
use chore_sync::models::{OpKind, SyncState};

use common::{draft, server_task};

#[tokio::test]
async fn store_lists_newest_first_and_tracks_sync_state() {
    let pool = db::connect_in_memory().await.expect("Failed to create database");
    let store = LocalStore::open(pool).await.unwrap();

    store.put(&server_task(1, "older")).await.unwrap();
    store.put(&server_task(2, "newer")).await.unwrap();

    let titles: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["newer", "older"]);

    let mut replaced = server_task(1, "older, renamed");
    replaced.latitude = Some(52.37);
    replaced.photo_url = Some("content://photos/1".to_string());
    store.put(&replaced).await.unwrap();
    assert_eq!(store.get(1).await.unwrap(), Some(replaced));

    assert!(store.set_sync_state(2, SyncState::PendingUpdate).await.unwrap());
    assert!(!store.set_sync_state(99, SyncState::PendingUpdate).await.unwrap());
    assert_eq!(
        store.get(2).await.unwrap().unwrap().sync_state,
        SyncState::PendingUpdate
    );

    assert!(store.delete(2).await.unwrap());
    assert!(!store.delete(2).await.unwrap());
    assert_eq!(store.min_id().await.unwrap(), Some(1));
}

#[tokio::test]
async fn subscription_starts_with_current_state() {
    let pool = db::connect_in_memory().await.expect("Failed to create database");
    let store = LocalStore::open(pool).await.unwrap();
    store.put(&server_task(1, "first")).await.unwrap();

    let mut sub = store.subscribe();
    assert_eq!(sub.next().await.unwrap().len(), 1);

    store.put(&server_task(2, "second")).await.unwrap();
    assert_eq!(sub.next().await.unwrap().len(), 2);

    let mut late = store.subscribe();
    assert_eq!(late.next().await.unwrap().len(), 2);
    late.unsubscribe();

    drop(store);
    let ended = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn queue_is_fifo_and_never_reuses_seq() {
    let pool = db::connect_in_memory().await.expect("Failed to create database");
    let queue = OperationQueue::new(pool);

    let first = queue
        .enqueue(OpKind::Create, -1, Some(&draft("a")))
        .await
        .unwrap();
    let second = queue.enqueue(OpKind::Update, 7, Some(&draft("b"))).await.unwrap();
    let third = queue.enqueue(OpKind::Delete, 8, None).await.unwrap();
    assert!(first < second && second < third);

    let pending = queue.list_pending().await.unwrap();
    let order: Vec<i64> = pending.iter().map(|e| e.seq).collect();
    assert_eq!(order, vec![first, second, third]);
    assert_eq!(pending[0].draft().unwrap().title, "a");
    assert!(pending[2].draft().is_err());

    assert_eq!(queue.find_for(7).await.unwrap().unwrap().seq, second);
    assert!(queue.find_for(99).await.unwrap().is_none());
    assert_eq!(queue.min_target().await.unwrap(), Some(-1));
    assert_eq!(queue.pending_targets().await.unwrap().len(), 3);

    assert!(queue.remove(third).await.unwrap());
    assert!(!queue.remove(third).await.unwrap());
    let fourth = queue.enqueue(OpKind::Delete, 8, None).await.unwrap();
    assert!(fourth > third);

    assert_eq!(queue.count().await.unwrap(), 3);
    assert_eq!(queue.clear().await.unwrap(), 3);
    assert_eq!(queue.count().await.unwrap(), 0);
    assert_eq!(queue.min_target().await.unwrap(), None);
}
