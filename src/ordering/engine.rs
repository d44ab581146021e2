//! Read-resolve-write ordering inside a store session

use crate::error::{LmsError, Result};
use crate::ordering::resolver::{
    full_rewrite_by_kind, next_available_order, resolve_ordering, split_by_kind,
};
use crate::schema::{ItemKind, OrderPin, OrderedItem, ResolvedPosition, SiblingScope};
use crate::store::ItemStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Ordering engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingConfig {
    /// Compare-and-bump the parent's `order_version` with every write so
    /// concurrent writers get `Conflict` instead of last-write-wins
    pub optimistic_concurrency: bool,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            optimistic_concurrency: true,
        }
    }
}

/// Result of one ordering pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingOutcome {
    pub scope: SiblingScope,
    /// Every sibling, sorted by final order
    pub positions: Vec<ResolvedPosition>,
    /// Items whose order was written
    pub written: usize,
    /// Parent version after the write, when versioning is on
    pub version: Option<i64>,
}

impl OrderingOutcome {
    pub fn changed(&self) -> impl Iterator<Item = &ResolvedPosition> {
        self.positions.iter().filter(|p| p.changed())
    }

    pub fn position_of(&self, kind: ItemKind, id: &str) -> Option<&ResolvedPosition> {
        self.positions.iter().find(|p| p.kind == kind && p.id == id)
    }
}

/// Applies resolved orderings through an [`ItemStore`] session
///
/// The engine holds no locks. Atomicity comes from the session, and with
/// optimistic concurrency on, from the parent version checked at commit.
#[derive(Debug, Clone, Default)]
pub struct OrderingEngine {
    config: OrderingConfig,
}

impl OrderingEngine {
    pub fn new(config: OrderingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrderingConfig {
        &self.config
    }

    /// Order a new item would get when appended to `scope`
    pub async fn next_available_order<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        scope: &SiblingScope,
    ) -> Result<i64> {
        self.ensure_parent(store, session, scope).await?;
        let count = store.count_siblings(session, scope).await?;
        Ok(next_available_order(count))
    }

    /// Resolve `pins` against the siblings of `scope` and write the changes
    pub async fn reorder<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        scope: &SiblingScope,
        pins: &[OrderPin],
    ) -> Result<OrderingOutcome> {
        self.ensure_parent(store, session, scope).await?;
        let version = self.read_version(store, session, scope).await?;

        let siblings = store.list_siblings(session, scope).await?;
        let positions = resolve_ordering(scope.parent_id(), pins, &siblings)?;
        self.persist(store, session, scope, positions, version, false)
            .await
    }

    /// Insert `item` at `order`, or at the end when `order` is `None`
    ///
    /// Returns the inserted item carrying its final order.
    pub async fn insert<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        mut item: OrderedItem,
        order: Option<i64>,
    ) -> Result<(OrderedItem, OrderingOutcome)> {
        let scope = item.scope();
        if let Some(order) = order {
            if order <= 0 {
                return Err(LmsError::Validation(format!(
                    "order must be a positive integer, got {}",
                    order
                )));
            }
        }

        self.ensure_parent(store, session, &scope).await?;
        let version = self.read_version(store, session, &scope).await?;

        let mut siblings = store.list_siblings(session, &scope).await?;
        item.order = order.unwrap_or_else(|| next_available_order(siblings.len()));
        store.insert_item(session, &item).await?;
        debug!(scope = %scope, id = %item.id, order = item.order, "Inserted item");

        let pin = OrderPin::with_kind(item.id.clone(), item.kind, item.order);
        siblings.push(item.clone());
        let positions = resolve_ordering(scope.parent_id(), &[pin], &siblings)?;

        let outcome = self
            .persist(store, session, &scope, positions, version, true)
            .await?;
        if let Some(position) = outcome.position_of(item.kind, &item.id) {
            item.order = position.order;
        }
        Ok((item, outcome))
    }

    /// Move one existing item to `order`
    pub async fn move_item<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        kind: ItemKind,
        id: &str,
        order: i64,
    ) -> Result<OrderingOutcome> {
        let item = self.require_item(store, session, kind, id).await?;
        let pin = OrderPin::with_kind(id, kind, order);
        self.reorder(store, session, &item.scope(), &[pin]).await
    }

    /// Delete an item and close the gap it leaves
    pub async fn remove<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        kind: ItemKind,
        id: &str,
    ) -> Result<(OrderedItem, OrderingOutcome)> {
        let item = self.require_item(store, session, kind, id).await?;
        let scope = item.scope();
        let version = self.read_version(store, session, &scope).await?;

        store.delete_item(session, kind, id).await?;
        debug!(scope = %scope, id, "Deleted item");

        let siblings = store.list_siblings(session, &scope).await?;
        let positions = resolve_ordering(scope.parent_id(), &[], &siblings)?;
        let outcome = self
            .persist(store, session, &scope, positions, version, true)
            .await?;
        Ok((item, outcome))
    }

    async fn ensure_parent<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        scope: &SiblingScope,
    ) -> Result<()> {
        if scope.parent_id().trim().is_empty() {
            return Err(LmsError::Validation("parent id must not be empty".to_string()));
        }
        if !store.parent_exists(session, scope).await? {
            return Err(LmsError::missing(scope.parent_kind().label(), scope.parent_id()));
        }
        Ok(())
    }

    async fn require_item<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        kind: ItemKind,
        id: &str,
    ) -> Result<OrderedItem> {
        store
            .get_item(session, kind, id)
            .await?
            .ok_or_else(|| LmsError::missing(kind.label(), id))
    }

    async fn read_version<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        scope: &SiblingScope,
    ) -> Result<Option<i64>> {
        if self.config.optimistic_concurrency {
            Ok(Some(store.parent_version(session, scope).await?))
        } else {
            Ok(None)
        }
    }

    async fn persist<S: ItemStore>(
        &self,
        store: &S,
        session: &mut S::Session,
        scope: &SiblingScope,
        positions: Vec<ResolvedPosition>,
        version: Option<i64>,
        membership_changed: bool,
    ) -> Result<OrderingOutcome> {
        let touched = membership_changed || positions.iter().any(|p| p.changed());
        let writes = match version {
            // Unguarded writers race; only a full rewrite keeps the winner contiguous
            None if touched => full_rewrite_by_kind(&positions),
            _ => split_by_kind(&positions),
        };

        let mut written = 0;
        for write in writes {
            let updated = store.bulk_set_order(session, &write).await?;
            if updated != write.len() {
                return Err(LmsError::TransientStore(format!(
                    "bulk order write under {} updated {} of {} {} items",
                    scope,
                    updated,
                    write.len(),
                    write.kind
                )));
            }
            written += updated;
        }

        let version = match version {
            Some(expected) if written > 0 || membership_changed => {
                Some(store.compare_and_bump_version(session, scope, expected).await?)
            }
            other => other,
        };

        info!(scope = %scope, siblings = positions.len(), written, "Resolved sibling ordering");
        Ok(OrderingOutcome {
            scope: scope.clone(),
            positions,
            written,
            version,
        })
    }
}
