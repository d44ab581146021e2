//! Item store interface
//!
//! Every read and write of ordered items goes through a session. A session
//! is one transaction: writes made through it are visible to later reads on
//! the same session and reach other sessions only after
//! [`ItemStore::commit`].

pub mod memory;
pub mod neo4j;

use crate::error::Result;
use crate::ordering::OrderWrite;
use crate::schema::{ItemKind, OrderedItem, SiblingScope};
use async_trait::async_trait;

pub use memory::{MemoryItemStore, MemorySession};
pub use neo4j::{Neo4jItemStore, Neo4jSession};

/// Transactional store for chapters, lectures and quizzes
#[async_trait]
pub trait ItemStore: Send + Sync + 'static {
    type Session: Send;

    /// Open a session
    async fn begin(&self) -> Result<Self::Session>;

    /// Make the session's writes visible
    ///
    /// Fails with `Conflict` when a version compared through
    /// [`ItemStore::compare_and_bump_version`] moved after it was checked.
    async fn commit(&self, session: Self::Session) -> Result<()>;

    /// Discard the session's writes
    async fn rollback(&self, session: Self::Session) -> Result<()>;

    /// Whether the course or chapter owning `scope` exists
    async fn parent_exists(&self, session: &mut Self::Session, scope: &SiblingScope)
        -> Result<bool>;

    /// Current ordering version of the parent; 0 if never bumped
    async fn parent_version(&self, session: &mut Self::Session, scope: &SiblingScope)
        -> Result<i64>;

    /// All siblings in `scope`, sorted by `(order, created_at, id)`
    async fn list_siblings(
        &self,
        session: &mut Self::Session,
        scope: &SiblingScope,
    ) -> Result<Vec<OrderedItem>>;

    async fn count_siblings(&self, session: &mut Self::Session, scope: &SiblingScope)
        -> Result<usize>;

    async fn get_item(
        &self,
        session: &mut Self::Session,
        kind: ItemKind,
        id: &str,
    ) -> Result<Option<OrderedItem>>;

    async fn insert_item(&self, session: &mut Self::Session, item: &OrderedItem) -> Result<()>;

    /// Returns false when the item does not exist
    async fn update_title(
        &self,
        session: &mut Self::Session,
        kind: ItemKind,
        id: &str,
        title: &str,
    ) -> Result<bool>;

    /// Delete one item; deleting a chapter also deletes its lectures and quizzes
    async fn delete_item(&self, session: &mut Self::Session, kind: ItemKind, id: &str)
        -> Result<bool>;

    /// Set `order` on every item of one collection, returning the count updated
    async fn bulk_set_order(&self, session: &mut Self::Session, write: &OrderWrite)
        -> Result<usize>;

    /// Increment the parent's ordering version if it still equals `expected`
    ///
    /// Returns the new version, or `Conflict` with the version found.
    async fn compare_and_bump_version(
        &self,
        session: &mut Self::Session,
        scope: &SiblingScope,
        expected: i64,
    ) -> Result<i64>;

    /// Siblings read in a short-lived session
    async fn read_siblings(&self, scope: &SiblingScope) -> Result<Vec<OrderedItem>> {
        let mut session = self.begin().await?;
        let result = self.list_siblings(&mut session, scope).await;
        self.rollback(session).await?;
        result
    }

    /// Single item read in a short-lived session
    async fn read_item(&self, kind: ItemKind, id: &str) -> Result<Option<OrderedItem>> {
        let mut session = self.begin().await?;
        let result = self.get_item(&mut session, kind, id).await;
        self.rollback(session).await?;
        result
    }
}
