mod common;

use common::{Fetch, Item, RecordingManager};
use futures::TryStreamExt;
use objman::{Entity, EntityManager, Error, FilterValue, Finder, FinderConfig, Search};

async fn drain(finder: &mut Finder<Item>, manager: &RecordingManager) -> Vec<Item> {
    let mut cursor = finder.find_all_detached(manager, Search::new()).unwrap();
    let mut items = Vec::new();
    while let Some(item) = cursor.next().await.unwrap() {
        items.push(item);
    }
    assert!(cursor.is_exhausted());
    items
}

#[tokio::test]
async fn test_pages_are_capped_by_limit() {
    let manager = RecordingManager::with_items(250);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(250));

    let items = drain(&mut finder, &manager).await;

    assert_eq!(items.len(), 250);
    assert_eq!(items.last(), Some(&Item { id: 250 }));
    assert_eq!(
        manager.fetches(),
        [
            Fetch { first: Some(0), max: Some(100), returned: 100 },
            Fetch { first: Some(100), max: Some(100), returned: 100 },
            Fetch { first: Some(200), max: Some(50), returned: 50 },
        ]
    );
    assert_eq!(manager.detached().len(), 250);
    assert_eq!(manager.detached()[0], Item { id: 1 }.identity_key());
}

#[tokio::test]
async fn test_unlimited_stream_stops_on_empty_page() {
    let manager = RecordingManager::with_items(250);
    let mut finder = Finder::<Item>::new();

    let items = drain(&mut finder, &manager).await;

    assert_eq!(items.len(), 250);
    let fetches = manager.fetches();
    assert_eq!(fetches.len(), 4);
    assert_eq!(fetches[2], Fetch { first: Some(200), max: Some(100), returned: 50 });
    assert_eq!(fetches[3], Fetch { first: Some(300), max: Some(100), returned: 0 });
}

#[tokio::test]
async fn test_small_limit_fetches_once() {
    let manager = RecordingManager::with_items(250);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(30));

    let items = drain(&mut finder, &manager).await;

    assert_eq!(items.len(), 30);
    assert_eq!(
        manager.fetches(),
        [Fetch { first: Some(0), max: Some(30), returned: 30 }]
    );
}

#[tokio::test]
async fn test_stream_starts_at_offset() {
    let manager = RecordingManager::with_items(250);
    let mut finder = Finder::<Item>::new();
    finder.offset_result(Some(240));

    let items = drain(&mut finder, &manager).await;

    assert_eq!(items.first(), Some(&Item { id: 241 }));
    assert_eq!(items.len(), 10);
    assert_eq!(manager.fetches()[0].first, Some(240));
}

#[tokio::test]
async fn test_zero_limit_is_exhausted() {
    let manager = RecordingManager::with_items(10);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(0));

    let mut cursor = finder.find_all_detached(&manager, Search::new()).unwrap();
    assert!(cursor.is_exhausted());
    assert!(cursor.next().await.unwrap().is_none());
    assert_eq!(cursor.pages_fetched(), 0);
    drop(cursor);

    assert!(manager.fetches().is_empty());
}

#[tokio::test]
async fn test_dropping_cursor_clears_finder() {
    let manager = RecordingManager::with_items(250);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(150)).offset_result(Some(10));

    let mut cursor = finder.find_all_detached(&manager, Search::new()).unwrap();
    for _ in 0..5 {
        assert!(cursor.next().await.unwrap().is_some());
    }
    assert_eq!(cursor.pages_fetched(), 1);
    assert!(!cursor.is_exhausted());
    drop(cursor);

    assert_eq!(finder.limit(), None);
    assert_eq!(finder.offset(), None);
    assert_eq!(manager.detached().len(), 5);
}

#[tokio::test]
async fn test_custom_stream_page_size() {
    let manager = RecordingManager::with_items(25);
    let config = FinderConfig {
        stream_page_size: 10,
        ..FinderConfig::default()
    };
    let mut finder = Finder::<Item>::new().with_config(config);

    let items = drain(&mut finder, &manager).await;

    assert_eq!(items.len(), 25);
    let sizes: Vec<usize> = manager.fetches().iter().map(|f| f.returned).collect();
    assert_eq!(sizes, [10, 10, 5, 0]);
}

#[tokio::test]
async fn test_into_stream() {
    let manager = RecordingManager::with_items(120);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(120));

    let items: Vec<Item> = finder
        .find_all_detached(&manager, Search::new())
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(items.len(), 120);
    assert_eq!(manager.fetches().len(), 2);
    assert!(items.iter().all(|item| !manager.contains(item)));
}

#[tokio::test]
async fn test_filter_error_is_returned_immediately() {
    let manager = RecordingManager::with_items(10);
    let mut finder = Finder::<Item>::new();
    finder.max_result(Some(5));

    let err = finder
        .find_all_detached(
            &manager,
            Search::new().with("id", FilterValue::map([("gt", 3)])),
        )
        .err()
        .unwrap();

    assert!(matches!(err, Error::WrongFilterValue(_)));
    assert_eq!(finder.limit(), None);
    assert!(manager.queries().is_empty());
}

#[tokio::test]
async fn test_stream_query_carries_filters() {
    let manager = RecordingManager::with_items(3);
    let mut finder = Finder::<Item>::with_alias("i");

    let cursor = finder
        .find_all_detached(&manager, Search::new().with("id", FilterValue::list([1, 2])))
        .unwrap();
    let items: Vec<Item> = cursor.into_stream().try_collect().await.unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(
        manager.queries()[0],
        "SELECT i.* FROM items i WHERE i.id IN (?, ?) LIMIT 100 OFFSET 0"
    );
}
