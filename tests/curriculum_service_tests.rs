//! Service-level tests: ownership, transactions, ordering and cache
//! invalidation working together over the in-memory stores

use chrono::{Duration as ChronoDuration, Utc};
use lms_core::cache::{CacheConfig, CacheStore, MemoryCacheStore};
use lms_core::curriculum::{AllowAll, OwnerRegistry};
use lms_core::store::MemoryItemStore;
use lms_core::{
    Actor, CacheKeys, CacheStatus, CurriculumService, ItemKind, ItemUpdate, LmsError, OrderPin,
    OrderedItem, OrderingConfig, OrderingEngine, ReadThroughCache, Role, SiblingScope,
    TransactionConfig,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    service: CurriculumService<MemoryItemStore>,
    store: Arc<MemoryItemStore>,
    cache_store: Arc<MemoryCacheStore>,
}

fn item(kind: ItemKind, id: &str, parent: &str, order: i64) -> OrderedItem {
    let created_at = Utc::now() + ChronoDuration::milliseconds(order);
    OrderedItem::with_id(id, kind, parent, format!("{} {}", kind, id), order, created_at)
}

async fn fixture(ownership: Arc<dyn lms_core::OwnershipCheck>) -> Fixture {
    let store = Arc::new(MemoryItemStore::new());
    store.insert_course("c-1").await;
    store
        .seed(vec![
            item(ItemKind::Chapter, "A", "c-1", 1),
            item(ItemKind::Chapter, "B", "c-1", 2),
            item(ItemKind::Chapter, "C", "c-1", 3),
            item(ItemKind::Lecture, "L1", "A", 1),
            item(ItemKind::Quiz, "Q1", "A", 2),
        ])
        .await;

    let cache_store = Arc::new(MemoryCacheStore::new(
        CacheConfig::builder()
            .default_ttl(Duration::from_secs(60))
            .ttl_jitter(0.0)
            .build(),
    ));
    let service = CurriculumService::new(
        Arc::clone(&store),
        OrderingEngine::new(OrderingConfig::default()),
        TransactionConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            timeout: Duration::from_secs(1),
        },
        ownership,
        ReadThroughCache::new(cache_store.clone()),
    );

    Fixture {
        service,
        store,
        cache_store,
    }
}

fn admin() -> Actor {
    Actor::new("root", Role::Admin)
}

fn ids(items: &[OrderedItem]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

#[tokio::test]
async fn test_write_invalidates_cached_listing() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let first = fx.service.list_chapters("c-1").await.unwrap();
    assert_eq!(first.cached, CacheStatus::Miss);
    assert_eq!(ids(&first.data), vec!["A", "B", "C"]);

    let second = fx.service.list_chapters("c-1").await.unwrap();
    assert_eq!(second.cached, CacheStatus::Fresh);

    let created = fx
        .service
        .create_chapter(&admin(), "c-1", "Setup", Some(1))
        .await
        .unwrap();
    assert_eq!(created.order, 1);

    let third = fx.service.list_chapters("c-1").await.unwrap();
    assert_eq!(third.cached, CacheStatus::Miss);
    assert_eq!(
        third.data.iter().map(|c| c.order).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(third.data[0].id, created.id);
}

#[tokio::test]
async fn test_content_write_clears_chapter_detail() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let detail = fx.service.get_chapter("A").await.unwrap();
    assert_eq!(ids(&detail.data.content), vec!["L1", "Q1"]);
    assert!(fx
        .cache_store
        .get(&CacheKeys::chapter("A"))
        .await
        .unwrap()
        .is_some());

    let quiz = fx
        .service
        .create_quiz(&admin(), "A", "Checkpoint", None)
        .await
        .unwrap();
    assert_eq!(quiz.order, 3);
    assert!(fx
        .cache_store
        .get(&CacheKeys::chapter("A"))
        .await
        .unwrap()
        .is_none());

    let detail = fx.service.get_chapter("A").await.unwrap();
    assert_eq!(detail.cached, CacheStatus::Miss);
    assert_eq!(detail.data.content.len(), 3);
}

#[tokio::test]
async fn test_move_and_delete_keep_orders_contiguous() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let moved = fx
        .service
        .update_chapter(&admin(), "C", ItemUpdate::order(1))
        .await
        .unwrap();
    assert_eq!(moved.order, 1);

    let removed = fx.service.delete_chapter(&admin(), "A").await.unwrap();
    assert_eq!(removed.id, "A");

    let scope = SiblingScope::CourseChapters("c-1".to_string());
    let chapters = fx.store.siblings(&scope).await;
    assert_eq!(ids(&chapters), vec!["C", "B"]);
    assert_eq!(chapters.iter().map(|c| c.order).collect::<Vec<_>>(), vec![1, 2]);

    // Content went with the chapter
    assert!(fx.store.item(ItemKind::Lecture, "L1").await.is_none());
    assert!(fx.store.item(ItemKind::Quiz, "Q1").await.is_none());
}

#[tokio::test]
async fn test_reorder_content_and_rename() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let outcome = fx
        .service
        .reorder_chapter_content(&admin(), "A", vec![OrderPin::new("Q1", 1)])
        .await
        .unwrap();
    assert_eq!(outcome.written, 2);

    let renamed = fx
        .service
        .update_content_item(&admin(), ItemKind::Lecture, "L1", ItemUpdate::title("Welcome"))
        .await
        .unwrap();
    assert_eq!(renamed.title, "Welcome");
    assert_eq!(renamed.order, 2);

    let content = fx.service.list_chapter_content("A").await.unwrap();
    assert_eq!(ids(&content.data), vec!["Q1", "L1"]);
}

#[tokio::test]
async fn test_ownership_is_checked_before_writing() {
    let registry = Arc::new(OwnerRegistry::new());
    registry.assign("c-1", "alice").await;
    let fx = fixture(registry).await;

    let intruder = Actor::new("mallory", Role::Instructor);
    let err = fx
        .service
        .reorder_chapters(&intruder, "c-1", vec![OrderPin::new("C", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Forbidden(_)));
    assert_eq!(fx.store.commit_count(), 0);

    let owner = Actor::new("alice", Role::Instructor);
    let outcome = fx
        .service
        .reorder_chapters(&owner, "c-1", vec![OrderPin::new("C", 1)])
        .await
        .unwrap();
    assert_eq!(outcome.written, 3);
}

#[tokio::test]
async fn test_validation_errors() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let err = fx
        .service
        .create_lecture(&admin(), "A", "   ", None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);

    let err = fx
        .service
        .create_chapter(&admin(), "c-1", "Late", Some(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Validation(_)));

    let err = fx
        .service
        .create_lecture(&admin(), "missing", "Intro", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::NotFound { .. }));

    let err = fx
        .service
        .update_content_item(&admin(), ItemKind::Chapter, "A", ItemUpdate::title("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::Validation(_)));
}

#[tokio::test]
async fn test_transient_failure_is_retried_by_service() {
    let fx = fixture(Arc::new(AllowAll)).await;
    fx.store.fail_next_commits(1);

    let lecture = fx
        .service
        .create_lecture(&admin(), "A", "Ownership", Some(1))
        .await
        .unwrap();
    assert_eq!(lecture.order, 1);
    assert_eq!(fx.store.commit_count(), 1);

    let content = fx
        .store
        .siblings(&SiblingScope::ChapterContent("A".to_string()))
        .await;
    assert_eq!(content.len(), 3);
    assert_eq!(content[0].id, lecture.id);
}

#[tokio::test]
async fn test_reads_survive_cache_outage() {
    let fx = fixture(Arc::new(AllowAll)).await;
    fx.cache_store.set_available(false);

    let chapters = fx.service.list_chapters("c-1").await.unwrap();
    assert_eq!(chapters.cached, CacheStatus::Miss);
    assert_eq!(chapters.data.len(), 3);

    fx.service
        .create_chapter(&admin(), "c-1", "Appendix", None)
        .await
        .unwrap();
    assert_eq!(fx.service.list_chapters("c-1").await.unwrap().data.len(), 4);
}

#[tokio::test]
async fn test_listing_unknown_course_is_not_found() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let err = fx.service.list_chapters("c-404").await.unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_concurrent_reads_agree() {
    let fx = fixture(Arc::new(AllowAll)).await;

    let reads = futures::future::join_all((0..8).map(|_| fx.service.list_chapters("c-1"))).await;
    for read in reads {
        assert_eq!(ids(&read.unwrap().data), vec!["A", "B", "C"]);
    }
}
