//! In-process item store
//!
//! Sessions work on a private copy of the catalogue and keep a log of their
//! writes. Commit re-checks every compared version against the committed
//! state, then replays the log under one write lock.

use crate::error::{LmsError, Result};
use crate::ordering::OrderWrite;
use crate::schema::{ItemKind, OrderedItem, SiblingScope};
use crate::store::ItemStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type ItemKey = (ItemKind, String);

#[derive(Debug, Clone, Default)]
struct Catalog {
    courses: HashSet<String>,
    items: HashMap<ItemKey, OrderedItem>,
    versions: HashMap<SiblingScope, i64>,
}

impl Catalog {
    fn parent_exists(&self, scope: &SiblingScope) -> bool {
        match scope {
            SiblingScope::CourseChapters(course_id) => self.courses.contains(course_id),
            SiblingScope::ChapterContent(chapter_id) => self
                .items
                .contains_key(&(ItemKind::Chapter, chapter_id.clone())),
        }
    }

    fn siblings(&self, scope: &SiblingScope) -> Vec<OrderedItem> {
        let mut siblings: Vec<OrderedItem> = self
            .items
            .values()
            .filter(|item| scope.admits(item.kind) && item.parent_id == scope.parent_id())
            .cloned()
            .collect();
        siblings.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        siblings
    }

    fn version(&self, scope: &SiblingScope) -> i64 {
        self.versions.get(scope).copied().unwrap_or(0)
    }

    fn apply(&mut self, write: &PendingWrite) {
        match write {
            PendingWrite::Insert(item) => {
                self.items
                    .insert((item.kind, item.id.clone()), item.clone());
            }
            PendingWrite::Title { key, title } => {
                if let Some(item) = self.items.get_mut(key) {
                    item.title = title.clone();
                }
            }
            PendingWrite::Delete(key) => {
                self.items.remove(key);
                if key.0 == ItemKind::Chapter {
                    let chapter_id = &key.1;
                    self.items.retain(|(kind, _), item| {
                        *kind == ItemKind::Chapter || &item.parent_id != chapter_id
                    });
                    self.versions
                        .remove(&SiblingScope::ChapterContent(chapter_id.clone()));
                }
            }
            PendingWrite::Order { key, order } => {
                if let Some(item) = self.items.get_mut(key) {
                    item.order = *order;
                }
            }
            PendingWrite::Version { scope, version } => {
                self.versions.insert(scope.clone(), *version);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Insert(OrderedItem),
    Title { key: ItemKey, title: String },
    Delete(ItemKey),
    Order { key: ItemKey, order: i64 },
    Version { scope: SiblingScope, version: i64 },
}

/// Open transaction on a [`MemoryItemStore`]
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    view: Catalog,
    writes: Vec<PendingWrite>,
    version_checks: Vec<(SiblingScope, i64)>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn write(&mut self, write: PendingWrite) {
        self.view.apply(&write);
        self.writes.push(write);
    }
}

/// In-process [`ItemStore`] with failure injection for tests
#[derive(Default)]
pub struct MemoryItemStore {
    committed: RwLock<Catalog>,
    next_session: AtomicU64,
    fail_bulk_writes: AtomicUsize,
    fail_commits: AtomicUsize,
    stall_commits: AtomicUsize,
    commit_stall_ms: AtomicU64,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    bulk_writes: AtomicUsize,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a course so chapters can be created under it
    pub async fn insert_course(&self, course_id: impl Into<String>) {
        self.committed.write().await.courses.insert(course_id.into());
    }

    /// Write items straight into committed state, bypassing ordering
    pub async fn seed(&self, items: impl IntoIterator<Item = OrderedItem>) {
        let mut catalog = self.committed.write().await;
        for item in items {
            catalog.items.insert((item.kind, item.id.clone()), item);
        }
    }

    /// Committed siblings of `scope`
    pub async fn siblings(&self, scope: &SiblingScope) -> Vec<OrderedItem> {
        self.committed.read().await.siblings(scope)
    }

    /// Committed item, if any
    pub async fn item(&self, kind: ItemKind, id: &str) -> Option<OrderedItem> {
        self.committed
            .read()
            .await
            .items
            .get(&(kind, id.to_string()))
            .cloned()
    }

    /// Committed ordering version of `scope`
    pub async fn version(&self, scope: &SiblingScope) -> i64 {
        self.committed.read().await.version(scope)
    }

    /// Make the next `count` bulk order writes fail with a transient error
    pub fn fail_next_bulk_writes(&self, count: usize) {
        self.fail_bulk_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with a transient error
    pub fn fail_next_commits(&self, count: usize) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits apply their writes, then hold the
    /// acknowledgement back for `delay`
    pub fn stall_next_commits(&self, count: usize, delay: Duration) {
        self.commit_stall_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self.stall_commits.store(count, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of bulk order writes attempted, failed ones included
    pub fn bulk_write_count(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }
}

/// Decrement an injected failure counter; true when a failure is due
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let view = self.committed.read().await.clone();
        debug!(session = id, "Opened memory session");

        Ok(MemorySession {
            id,
            view,
            writes: Vec::new(),
            version_checks: Vec::new(),
        })
    }

    async fn commit(&self, session: MemorySession) -> Result<()> {
        if take_failure(&self.fail_commits) {
            warn!(session = session.id, "Injected commit failure");
            return Err(LmsError::TransientStore(format!(
                "commit of session {} failed",
                session.id
            )));
        }

        {
            let mut catalog = self.committed.write().await;
            for (scope, expected) in &session.version_checks {
                let found = catalog.version(scope);
                if found != *expected {
                    return Err(LmsError::Conflict {
                        parent: scope.to_string(),
                        expected: *expected,
                        found,
                    });
                }
            }

            for write in &session.writes {
                catalog.apply(write);
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(session = session.id, writes = session.writes.len(), "Committed memory session");

        if take_failure(&self.stall_commits) {
            let delay = Duration::from_millis(self.commit_stall_ms.load(Ordering::SeqCst));
            warn!(session = session.id, ?delay, "Injected commit stall");
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback(&self, session: MemorySession) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(session = session.id, "Rolled back memory session");
        Ok(())
    }

    async fn parent_exists(
        &self,
        session: &mut MemorySession,
        scope: &SiblingScope,
    ) -> Result<bool> {
        Ok(session.view.parent_exists(scope))
    }

    async fn parent_version(
        &self,
        session: &mut MemorySession,
        scope: &SiblingScope,
    ) -> Result<i64> {
        Ok(session.view.version(scope))
    }

    async fn list_siblings(
        &self,
        session: &mut MemorySession,
        scope: &SiblingScope,
    ) -> Result<Vec<OrderedItem>> {
        Ok(session.view.siblings(scope))
    }

    async fn count_siblings(
        &self,
        session: &mut MemorySession,
        scope: &SiblingScope,
    ) -> Result<usize> {
        Ok(session.view.siblings(scope).len())
    }

    async fn get_item(
        &self,
        session: &mut MemorySession,
        kind: ItemKind,
        id: &str,
    ) -> Result<Option<OrderedItem>> {
        Ok(session.view.items.get(&(kind, id.to_string())).cloned())
    }

    async fn insert_item(&self, session: &mut MemorySession, item: &OrderedItem) -> Result<()> {
        let key = (item.kind, item.id.clone());
        if session.view.items.contains_key(&key) {
            return Err(LmsError::Validation(format!(
                "{} {} already exists",
                item.kind.label(),
                item.id
            )));
        }
        session.write(PendingWrite::Insert(item.clone()));
        Ok(())
    }

    async fn update_title(
        &self,
        session: &mut MemorySession,
        kind: ItemKind,
        id: &str,
        title: &str,
    ) -> Result<bool> {
        let key = (kind, id.to_string());
        if !session.view.items.contains_key(&key) {
            return Ok(false);
        }
        session.write(PendingWrite::Title {
            key,
            title: title.to_string(),
        });
        Ok(true)
    }

    async fn delete_item(
        &self,
        session: &mut MemorySession,
        kind: ItemKind,
        id: &str,
    ) -> Result<bool> {
        let key = (kind, id.to_string());
        if !session.view.items.contains_key(&key) {
            return Ok(false);
        }
        session.write(PendingWrite::Delete(key));
        Ok(true)
    }

    async fn bulk_set_order(
        &self,
        session: &mut MemorySession,
        write: &OrderWrite,
    ) -> Result<usize> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_bulk_writes) {
            warn!(session = session.id, kind = %write.kind, "Injected bulk write failure");
            return Err(LmsError::TransientStore(format!(
                "bulk order write for {} items failed",
                write.kind
            )));
        }

        let mut updated = 0;
        for (id, order) in write.ids.iter().zip(&write.orders) {
            let key = (write.kind, id.clone());
            if session.view.items.contains_key(&key) {
                session.write(PendingWrite::Order { key, order: *order });
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn compare_and_bump_version(
        &self,
        session: &mut MemorySession,
        scope: &SiblingScope,
        expected: i64,
    ) -> Result<i64> {
        let found = session.view.version(scope);
        if found != expected {
            return Err(LmsError::Conflict {
                parent: scope.to_string(),
                expected,
                found,
            });
        }

        let version = expected + 1;
        session.version_checks.push((scope.clone(), expected));
        session.write(PendingWrite::Version {
            scope: scope.clone(),
            version,
        });
        Ok(version)
    }
}
