//! Chapter, lecture and quiz operations
//!
//! Writes follow one path: ownership check, transaction with retry, ordering
//! engine, commit, then best-effort cache invalidation. Reads go through the
//! read-through cache.

use crate::cache::{CacheKeys, Cached, InvalidationPlan, ReadThroughCache};
use crate::error::{LmsError, Result};
use crate::ordering::{OrderingEngine, OrderingOutcome};
use crate::schema::{Actor, ItemKind, OrderPin, OrderedItem, Role, SiblingScope};
use crate::store::ItemStore;
use crate::transaction::{with_transaction, TransactionConfig, UnitOfWork};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Decides whether an actor may modify a course
#[async_trait]
pub trait OwnershipCheck: Send + Sync {
    /// `Forbidden` when the actor may not write, `NotFound` for an unknown course
    async fn validate_ownership(&self, course_id: &str, actor: &Actor) -> Result<()>;
}

/// Lets every actor through
pub struct AllowAll;

#[async_trait]
impl OwnershipCheck for AllowAll {
    async fn validate_ownership(&self, _course_id: &str, _actor: &Actor) -> Result<()> {
        Ok(())
    }
}

/// Course owners held in memory
///
/// Admins may modify any known course, instructors only the ones they own,
/// students none.
#[derive(Default)]
pub struct OwnerRegistry {
    owners: RwLock<HashMap<String, String>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, course_id: impl Into<String>, owner_id: impl Into<String>) {
        self.owners
            .write()
            .await
            .insert(course_id.into(), owner_id.into());
    }
}

#[async_trait]
impl OwnershipCheck for OwnerRegistry {
    async fn validate_ownership(&self, course_id: &str, actor: &Actor) -> Result<()> {
        let owners = self.owners.read().await;
        let owner = owners
            .get(course_id)
            .ok_or_else(|| LmsError::missing("Course", course_id))?;

        match actor.role {
            Role::Admin => Ok(()),
            Role::Instructor if owner == &actor.user_id => Ok(()),
            _ => Err(LmsError::Forbidden(format!(
                "{} may not modify course {}",
                actor.user_id, course_id
            ))),
        }
    }
}

/// Partial update of a chapter, lecture or quiz
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl ItemUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            order: None,
        }
    }

    pub fn order(order: i64) -> Self {
        Self {
            title: None,
            order: Some(order),
        }
    }
}

/// Chapter with its lectures and quizzes in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDetail {
    pub chapter: OrderedItem,
    pub content: Vec<OrderedItem>,
}

#[derive(Debug, Clone)]
enum Mutation {
    Create {
        item: OrderedItem,
        order: Option<i64>,
    },
    Update {
        kind: ItemKind,
        id: String,
        update: ItemUpdate,
    },
    Delete {
        kind: ItemKind,
        id: String,
    },
    Reorder {
        scope: SiblingScope,
        pins: Vec<OrderPin>,
    },
}

#[derive(Debug, Default)]
struct MutationOutcome {
    item: Option<OrderedItem>,
    ordering: Option<OrderingOutcome>,
    /// Lectures and quizzes removed along with a chapter
    cascaded: Vec<OrderedItem>,
}

impl MutationOutcome {
    fn changed_items(&self) -> Vec<(ItemKind, &str)> {
        let moved = self
            .ordering
            .iter()
            .flat_map(|o| o.changed())
            .map(|p| (p.kind, p.id.as_str()));
        let removed = self.cascaded.iter().map(|i| (i.kind, i.id.as_str()));
        moved.chain(removed).collect()
    }
}

struct PlannedMutation<'a> {
    engine: &'a OrderingEngine,
    mutation: &'a Mutation,
}

#[async_trait]
impl<'a, S: ItemStore> UnitOfWork<S> for PlannedMutation<'a> {
    type Output = MutationOutcome;

    async fn run(&self, store: &S, session: &mut S::Session) -> Result<MutationOutcome> {
        match self.mutation {
            Mutation::Create { item, order } => {
                let (item, ordering) = self
                    .engine
                    .insert(store, session, item.clone(), *order)
                    .await?;
                Ok(MutationOutcome {
                    item: Some(item),
                    ordering: Some(ordering),
                    cascaded: Vec::new(),
                })
            }
            Mutation::Update { kind, id, update } => {
                let mut ordering = None;
                if let Some(title) = &update.title {
                    if !store.update_title(session, *kind, id, title).await? {
                        return Err(LmsError::missing(kind.label(), id));
                    }
                }
                if let Some(order) = update.order {
                    ordering = Some(self.engine.move_item(store, session, *kind, id, order).await?);
                }
                let item = store
                    .get_item(session, *kind, id)
                    .await?
                    .ok_or_else(|| LmsError::missing(kind.label(), id))?;
                Ok(MutationOutcome {
                    item: Some(item),
                    ordering,
                    cascaded: Vec::new(),
                })
            }
            Mutation::Delete { kind, id } => {
                let cascaded = if *kind == ItemKind::Chapter {
                    let content = SiblingScope::ChapterContent(id.clone());
                    store.list_siblings(session, &content).await?
                } else {
                    Vec::new()
                };
                let (item, ordering) = self.engine.remove(store, session, *kind, id).await?;
                Ok(MutationOutcome {
                    item: Some(item),
                    ordering: Some(ordering),
                    cascaded,
                })
            }
            Mutation::Reorder { scope, pins } => {
                let ordering = self.engine.reorder(store, session, scope, pins).await?;
                Ok(MutationOutcome {
                    item: None,
                    ordering: Some(ordering),
                    cascaded: Vec::new(),
                })
            }
        }
    }
}

/// Service-layer entry point for curriculum structure
pub struct CurriculumService<S: ItemStore> {
    store: Arc<S>,
    engine: OrderingEngine,
    transaction: TransactionConfig,
    ownership: Arc<dyn OwnershipCheck>,
    cache: ReadThroughCache,
}

impl<S: ItemStore> CurriculumService<S> {
    pub fn new(
        store: Arc<S>,
        engine: OrderingEngine,
        transaction: TransactionConfig,
        ownership: Arc<dyn OwnershipCheck>,
        cache: ReadThroughCache,
    ) -> Self {
        Self {
            store,
            engine,
            transaction,
            ownership,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    // ---- chapters ----

    pub async fn create_chapter(
        &self,
        actor: &Actor,
        course_id: &str,
        title: &str,
        order: Option<i64>,
    ) -> Result<OrderedItem> {
        validate_title(title)?;
        validate_order(order)?;
        self.ownership.validate_ownership(course_id, actor).await?;

        let item = OrderedItem::new(ItemKind::Chapter, course_id, title.trim(), 0);
        let outcome = self.execute(Mutation::Create { item, order }).await?;
        let chapter = outcome.created()?;

        info!(course_id, chapter_id = %chapter.id, order = chapter.order, "Created chapter");
        self.invalidate(InvalidationPlan::for_chapter(course_id, &chapter.id), &outcome)
            .await;
        Ok(chapter)
    }

    pub async fn update_chapter(
        &self,
        actor: &Actor,
        chapter_id: &str,
        update: ItemUpdate,
    ) -> Result<OrderedItem> {
        validate_update(&update)?;
        let chapter = self.require(ItemKind::Chapter, chapter_id).await?;
        self.ownership
            .validate_ownership(&chapter.parent_id, actor)
            .await?;

        let outcome = self
            .execute(Mutation::Update {
                kind: ItemKind::Chapter,
                id: chapter_id.to_string(),
                update,
            })
            .await?;
        let updated = outcome.created()?;

        info!(chapter_id, order = updated.order, "Updated chapter");
        self.invalidate(
            InvalidationPlan::for_chapter(&chapter.parent_id, chapter_id),
            &outcome,
        )
        .await;
        Ok(updated)
    }

    /// Delete a chapter with its content and renumber the remaining chapters
    pub async fn delete_chapter(&self, actor: &Actor, chapter_id: &str) -> Result<OrderedItem> {
        let chapter = self.require(ItemKind::Chapter, chapter_id).await?;
        self.ownership
            .validate_ownership(&chapter.parent_id, actor)
            .await?;

        let outcome = self
            .execute(Mutation::Delete {
                kind: ItemKind::Chapter,
                id: chapter_id.to_string(),
            })
            .await?;

        info!(
            chapter_id,
            removed_content = outcome.cascaded.len(),
            "Deleted chapter"
        );
        self.invalidate(
            InvalidationPlan::for_chapter(&chapter.parent_id, chapter_id),
            &outcome,
        )
        .await;
        outcome.created()
    }

    pub async fn reorder_chapters(
        &self,
        actor: &Actor,
        course_id: &str,
        pins: Vec<OrderPin>,
    ) -> Result<OrderingOutcome> {
        self.ownership.validate_ownership(course_id, actor).await?;

        let scope = SiblingScope::CourseChapters(course_id.to_string());
        let outcome = self.execute(Mutation::Reorder { scope, pins }).await?;

        let plan = InvalidationPlan::new(format!("course:{}", course_id))
            .key(CacheKeys::chapter_list(course_id))
            .course(course_id);
        self.invalidate(plan, &outcome).await;
        outcome.ordered()
    }

    // ---- lectures and quizzes ----

    pub async fn create_lecture(
        &self,
        actor: &Actor,
        chapter_id: &str,
        title: &str,
        order: Option<i64>,
    ) -> Result<OrderedItem> {
        self.create_content(actor, ItemKind::Lecture, chapter_id, title, order)
            .await
    }

    pub async fn create_quiz(
        &self,
        actor: &Actor,
        chapter_id: &str,
        title: &str,
        order: Option<i64>,
    ) -> Result<OrderedItem> {
        self.create_content(actor, ItemKind::Quiz, chapter_id, title, order)
            .await
    }

    async fn create_content(
        &self,
        actor: &Actor,
        kind: ItemKind,
        chapter_id: &str,
        title: &str,
        order: Option<i64>,
    ) -> Result<OrderedItem> {
        validate_title(title)?;
        validate_order(order)?;
        let chapter = self.require(ItemKind::Chapter, chapter_id).await?;
        self.ownership
            .validate_ownership(&chapter.parent_id, actor)
            .await?;

        let item = OrderedItem::new(kind, chapter_id, title.trim(), 0);
        let outcome = self.execute(Mutation::Create { item, order }).await?;
        let created = outcome.created()?;

        info!(
            chapter_id,
            kind = %kind,
            id = %created.id,
            order = created.order,
            "Created content item"
        );
        self.invalidate(
            InvalidationPlan::for_content(&chapter.parent_id, chapter_id, kind, &created.id),
            &outcome,
        )
        .await;
        Ok(created)
    }

    pub async fn update_content_item(
        &self,
        actor: &Actor,
        kind: ItemKind,
        id: &str,
        update: ItemUpdate,
    ) -> Result<OrderedItem> {
        validate_content_kind(kind)?;
        validate_update(&update)?;
        let (item, course_id) = self.require_content(kind, id).await?;
        self.ownership.validate_ownership(&course_id, actor).await?;

        let outcome = self
            .execute(Mutation::Update {
                kind,
                id: id.to_string(),
                update,
            })
            .await?;
        let updated = outcome.created()?;

        info!(kind = %kind, id, order = updated.order, "Updated content item");
        self.invalidate(
            InvalidationPlan::for_content(&course_id, &item.parent_id, kind, id),
            &outcome,
        )
        .await;
        Ok(updated)
    }

    /// Delete a lecture or quiz and renumber the rest of its chapter
    pub async fn delete_content_item(
        &self,
        actor: &Actor,
        kind: ItemKind,
        id: &str,
    ) -> Result<OrderedItem> {
        validate_content_kind(kind)?;
        let (item, course_id) = self.require_content(kind, id).await?;
        self.ownership.validate_ownership(&course_id, actor).await?;

        let outcome = self
            .execute(Mutation::Delete {
                kind,
                id: id.to_string(),
            })
            .await?;

        info!(kind = %kind, id, chapter_id = %item.parent_id, "Deleted content item");
        self.invalidate(
            InvalidationPlan::for_content(&course_id, &item.parent_id, kind, id),
            &outcome,
        )
        .await;
        outcome.created()
    }

    pub async fn reorder_chapter_content(
        &self,
        actor: &Actor,
        chapter_id: &str,
        pins: Vec<OrderPin>,
    ) -> Result<OrderingOutcome> {
        let chapter = self.require(ItemKind::Chapter, chapter_id).await?;
        self.ownership
            .validate_ownership(&chapter.parent_id, actor)
            .await?;

        let scope = SiblingScope::ChapterContent(chapter_id.to_string());
        let outcome = self.execute(Mutation::Reorder { scope, pins }).await?;

        self.invalidate(
            InvalidationPlan::for_chapter(&chapter.parent_id, chapter_id),
            &outcome,
        )
        .await;
        outcome.ordered()
    }

    // ---- reads ----

    pub async fn list_chapters(&self, course_id: &str) -> Result<Cached<Vec<OrderedItem>>> {
        let store = Arc::clone(&self.store);
        let scope = SiblingScope::CourseChapters(course_id.to_string());
        self.cache
            .fetch(&CacheKeys::chapter_list(course_id), move || async move {
                load_siblings(store.as_ref(), &scope).await
            })
            .await
    }

    pub async fn list_chapter_content(&self, chapter_id: &str) -> Result<Cached<Vec<OrderedItem>>> {
        let store = Arc::clone(&self.store);
        let scope = SiblingScope::ChapterContent(chapter_id.to_string());
        self.cache
            .fetch(&CacheKeys::chapter_content(chapter_id), move || async move {
                load_siblings(store.as_ref(), &scope).await
            })
            .await
    }

    pub async fn get_chapter(&self, chapter_id: &str) -> Result<Cached<ChapterDetail>> {
        let store = Arc::clone(&self.store);
        let chapter_id = chapter_id.to_string();
        let key = CacheKeys::chapter(&chapter_id);
        self.cache
            .fetch(&key, move || async move {
                let chapter = store
                    .read_item(ItemKind::Chapter, &chapter_id)
                    .await?
                    .ok_or_else(|| LmsError::missing("Chapter", &chapter_id))?;
                let content = store
                    .read_siblings(&SiblingScope::ChapterContent(chapter_id.clone()))
                    .await?;
                Ok(ChapterDetail { chapter, content })
            })
            .await
    }

    // ---- helpers ----

    async fn execute(&self, mutation: Mutation) -> Result<MutationOutcome> {
        let work = PlannedMutation {
            engine: &self.engine,
            mutation: &mutation,
        };
        with_transaction(self.store.as_ref(), &self.transaction, &work).await
    }

    async fn invalidate(&self, plan: InvalidationPlan, outcome: &MutationOutcome) {
        let plan = plan.with_items(outcome.changed_items());
        self.cache.invalidate_plan(&plan).await;
    }

    async fn require(&self, kind: ItemKind, id: &str) -> Result<OrderedItem> {
        self.store
            .read_item(kind, id)
            .await?
            .ok_or_else(|| LmsError::missing(kind.label(), id))
    }

    /// Content item plus the id of the course owning its chapter
    async fn require_content(&self, kind: ItemKind, id: &str) -> Result<(OrderedItem, String)> {
        let item = self.require(kind, id).await?;
        let chapter = self.require(ItemKind::Chapter, &item.parent_id).await?;
        Ok((item, chapter.parent_id))
    }
}

impl MutationOutcome {
    fn created(&self) -> Result<OrderedItem> {
        self.item
            .clone()
            .ok_or_else(|| LmsError::Other("mutation returned no item".to_string()))
    }

    fn ordered(self) -> Result<OrderingOutcome> {
        self.ordering
            .ok_or_else(|| LmsError::Other("mutation returned no ordering".to_string()))
    }
}

/// Siblings of `scope`, or `NotFound` when the parent is missing
async fn load_siblings<S: ItemStore>(store: &S, scope: &SiblingScope) -> Result<Vec<OrderedItem>> {
    let mut session = store.begin().await?;
    let result = async {
        if !store.parent_exists(&mut session, scope).await? {
            return Err(LmsError::missing(scope.parent_kind().label(), scope.parent_id()));
        }
        store.list_siblings(&mut session, scope).await
    }
    .await;
    store.rollback(session).await?;
    result
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(LmsError::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

fn validate_order(order: Option<i64>) -> Result<()> {
    match order {
        Some(order) if order <= 0 => Err(LmsError::Validation(format!(
            "order must be a positive integer, got {}",
            order
        ))),
        _ => Ok(()),
    }
}

fn validate_update(update: &ItemUpdate) -> Result<()> {
    if update.title.is_none() && update.order.is_none() {
        return Err(LmsError::Validation("update has no fields".to_string()));
    }
    if let Some(title) = &update.title {
        validate_title(title)?;
    }
    validate_order(update.order)
}

fn validate_content_kind(kind: ItemKind) -> Result<()> {
    if kind == ItemKind::Chapter {
        return Err(LmsError::Validation(
            "chapters are not chapter content".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_owner_registry_roles() {
        let registry = OwnerRegistry::new();
        registry.assign("c-1", "alice").await;

        let owner = Actor::new("alice", Role::Instructor);
        let other = Actor::new("bob", Role::Instructor);
        let admin = Actor::new("root", Role::Admin);
        let student = Actor::new("alice", Role::Student);

        assert!(registry.validate_ownership("c-1", &owner).await.is_ok());
        assert!(registry.validate_ownership("c-1", &admin).await.is_ok());
        assert!(matches!(
            registry.validate_ownership("c-1", &other).await,
            Err(LmsError::Forbidden(_))
        ));
        assert!(matches!(
            registry.validate_ownership("c-1", &student).await,
            Err(LmsError::Forbidden(_))
        ));
        assert!(matches!(
            registry.validate_ownership("c-9", &admin).await,
            Err(LmsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_validation() {
        assert!(validate_update(&ItemUpdate::default()).is_err());
        assert!(validate_update(&ItemUpdate::title("  ")).is_err());
        assert!(validate_update(&ItemUpdate::order(0)).is_err());
        assert!(validate_update(&ItemUpdate::order(3)).is_ok());
        assert!(validate_content_kind(ItemKind::Chapter).is_err());
    }
}
