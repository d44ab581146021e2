//! Neo4j-backed item store
//!
//! Graph shape:
//!
//! ```text
//! (:Course {id, order_version})
//!   -[:CONTAINS]->(:OrderedItem:Chapter {id, parent_id, kind, title, order, created_at, order_version})
//!     -[:CONTAINS]->(:OrderedItem:Lecture | :OrderedItem:Quiz {...})
//! ```
//!
//! `parent_id` is denormalised onto every item so sibling reads are a single
//! indexed lookup. `created_at` is stored as an RFC 3339 string.

use crate::error::{LmsError, Result};
use crate::ordering::OrderWrite;
use crate::schema::{ItemKind, OrderedItem, SiblingScope};
use crate::store::ItemStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Node, Query, Row, Txn};
use tracing::{debug, warn};

/// Open transaction on a [`Neo4jItemStore`]
pub struct Neo4jSession {
    txn: Txn,
}

/// [`ItemStore`] over a Neo4j graph
#[derive(Clone)]
pub struct Neo4jItemStore {
    graph: Graph,
}

impl Neo4jItemStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Create a course node if it does not exist yet
    pub async fn insert_course(&self, course_id: &str) -> Result<()> {
        let cypher = query("MERGE (c:Course {id: $id}) ON CREATE SET c.order_version = 0")
            .param("id", course_id.to_string());

        self.graph
            .run(cypher)
            .await
            .map_err(|e| classify("Failed to create course", e))?;

        Ok(())
    }
}

/// Map a driver error to a retryable or fatal crate error
fn classify(context: &str, e: neo4rs::Error) -> LmsError {
    let message = e.to_string();
    if message.contains("TransientError")
        || message.contains("Deadlock")
        || message.contains("LockClient")
    {
        LmsError::TransientStore(format!("{}: {}", context, message))
    } else if message.contains("IOError") || message.to_lowercase().contains("connection") {
        LmsError::Connection(format!("{}: {}", context, message))
    } else {
        LmsError::Query(format!("{}: {}", context, message))
    }
}

async fn fetch_rows(txn: &mut Txn, cypher: Query, context: &str) -> Result<Vec<Row>> {
    let mut stream = txn
        .execute(cypher)
        .await
        .map_err(|e| classify(context, e))?;

    let mut rows = Vec::new();
    while let Some(row) = stream
        .next(txn.handle())
        .await
        .map_err(|e| classify(context, e))?
    {
        rows.push(row);
    }
    Ok(rows)
}

async fn fetch_count(txn: &mut Txn, cypher: Query, column: &str, context: &str) -> Result<i64> {
    let rows = fetch_rows(txn, cypher, context).await?;
    match rows.first() {
        Some(row) => row
            .get::<i64>(column)
            .map_err(|e| LmsError::Query(format!("{}: missing {}: {}", context, column, e))),
        None => Ok(0),
    }
}

fn item_from_node(node: &Node) -> Result<OrderedItem> {
    let field = |name: &str| -> Result<String> {
        node.get::<String>(name)
            .map_err(|e| LmsError::Query(format!("Failed to extract item {}: {}", name, e)))
    };

    let kind_str = field("kind")?;
    let kind = ItemKind::parse(&kind_str)
        .ok_or_else(|| LmsError::Query(format!("Invalid item kind: {}", kind_str)))?;

    let order: i64 = node
        .get("order")
        .map_err(|e| LmsError::Query(format!("Failed to extract item order: {}", e)))?;

    let created_at = DateTime::parse_from_rfc3339(&field("created_at")?)
        .map_err(|e| LmsError::Query(format!("Failed to parse created_at datetime: {}", e)))?
        .with_timezone(&Utc);

    Ok(OrderedItem::with_id(
        field("id")?,
        kind,
        field("parent_id")?,
        field("title")?,
        order,
        created_at,
    ))
}

fn scope_kinds(scope: &SiblingScope) -> Vec<String> {
    scope.kinds().iter().map(|k| k.as_str().to_string()).collect()
}

#[async_trait]
impl ItemStore for Neo4jItemStore {
    type Session = Neo4jSession;

    async fn begin(&self) -> Result<Neo4jSession> {
        let txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| classify("Failed to start transaction", e))?;
        Ok(Neo4jSession { txn })
    }

    async fn commit(&self, session: Neo4jSession) -> Result<()> {
        session
            .txn
            .commit()
            .await
            .map_err(|e| classify("Failed to commit transaction", e))
    }

    async fn rollback(&self, session: Neo4jSession) -> Result<()> {
        session
            .txn
            .rollback()
            .await
            .map_err(|e| classify("Failed to roll back transaction", e))
    }

    async fn parent_exists(
        &self,
        session: &mut Neo4jSession,
        scope: &SiblingScope,
    ) -> Result<bool> {
        let cypher = query(&format!(
            "MATCH (p:{} {{id: $id}}) RETURN count(p) AS found",
            scope.parent_kind().label()
        ))
        .param("id", scope.parent_id().to_string());

        let found = fetch_count(&mut session.txn, cypher, "found", "Failed to check parent").await?;
        Ok(found > 0)
    }

    async fn parent_version(
        &self,
        session: &mut Neo4jSession,
        scope: &SiblingScope,
    ) -> Result<i64> {
        let cypher = query(&format!(
            "MATCH (p:{} {{id: $id}}) RETURN coalesce(p.order_version, 0) AS version",
            scope.parent_kind().label()
        ))
        .param("id", scope.parent_id().to_string());

        fetch_count(&mut session.txn, cypher, "version", "Failed to read parent version").await
    }

    async fn list_siblings(
        &self,
        session: &mut Neo4jSession,
        scope: &SiblingScope,
    ) -> Result<Vec<OrderedItem>> {
        let cypher = query(
            "MATCH (n:OrderedItem {parent_id: $parent_id})
             WHERE n.kind IN $kinds
             RETURN n
             ORDER BY n.order, n.created_at, n.id",
        )
        .param("parent_id", scope.parent_id().to_string())
        .param("kinds", scope_kinds(scope));

        let rows = fetch_rows(&mut session.txn, cypher, "Failed to list siblings").await?;
        rows.iter()
            .map(|row| {
                let node: Node = row
                    .get("n")
                    .map_err(|e| LmsError::Query(format!("Failed to extract item node: {}", e)))?;
                item_from_node(&node)
            })
            .collect()
    }

    async fn count_siblings(
        &self,
        session: &mut Neo4jSession,
        scope: &SiblingScope,
    ) -> Result<usize> {
        let cypher = query(
            "MATCH (n:OrderedItem {parent_id: $parent_id})
             WHERE n.kind IN $kinds
             RETURN count(n) AS total",
        )
        .param("parent_id", scope.parent_id().to_string())
        .param("kinds", scope_kinds(scope));

        let total =
            fetch_count(&mut session.txn, cypher, "total", "Failed to count siblings").await?;
        Ok(total.max(0) as usize)
    }

    async fn get_item(
        &self,
        session: &mut Neo4jSession,
        kind: ItemKind,
        id: &str,
    ) -> Result<Option<OrderedItem>> {
        let cypher = query(&format!("MATCH (n:{} {{id: $id}}) RETURN n", kind.label()))
            .param("id", id.to_string());

        let rows = fetch_rows(&mut session.txn, cypher, "Failed to get item").await?;
        match rows.first() {
            Some(row) => {
                let node: Node = row
                    .get("n")
                    .map_err(|e| LmsError::Query(format!("Failed to extract item node: {}", e)))?;
                Ok(Some(item_from_node(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_item(&self, session: &mut Neo4jSession, item: &OrderedItem) -> Result<()> {
        let scope = item.scope();
        let cypher = query(&format!(
            "MATCH (p:{} {{id: $parent_id}})
             CREATE (p)-[:CONTAINS]->(n:OrderedItem:{} {{
                id: $id,
                parent_id: $parent_id,
                kind: $kind,
                title: $title,
                order: $order,
                created_at: $created_at,
                order_version: 0
             }})
             RETURN count(n) AS created",
            scope.parent_kind().label(),
            item.kind.label()
        ))
        .param("id", item.id.clone())
        .param("parent_id", item.parent_id.clone())
        .param("kind", item.kind.as_str())
        .param("title", item.title.clone())
        .param("order", item.order)
        .param("created_at", item.created_at.to_rfc3339());

        let created =
            fetch_count(&mut session.txn, cypher, "created", "Failed to create item").await?;
        if created == 0 {
            return Err(LmsError::missing(scope.parent_kind().label(), &item.parent_id));
        }

        debug!(kind = %item.kind, id = %item.id, "Created item node");
        Ok(())
    }

    async fn update_title(
        &self,
        session: &mut Neo4jSession,
        kind: ItemKind,
        id: &str,
        title: &str,
    ) -> Result<bool> {
        let cypher = query(&format!(
            "MATCH (n:{} {{id: $id}}) SET n.title = $title RETURN count(n) AS updated",
            kind.label()
        ))
        .param("id", id.to_string())
        .param("title", title.to_string());

        let updated =
            fetch_count(&mut session.txn, cypher, "updated", "Failed to update title").await?;
        Ok(updated > 0)
    }

    async fn delete_item(
        &self,
        session: &mut Neo4jSession,
        kind: ItemKind,
        id: &str,
    ) -> Result<bool> {
        let exists = query(&format!(
            "MATCH (n:{} {{id: $id}}) RETURN count(n) AS found",
            kind.label()
        ))
        .param("id", id.to_string());
        if fetch_count(&mut session.txn, exists, "found", "Failed to find item").await? == 0 {
            return Ok(false);
        }

        if kind == ItemKind::Chapter {
            let children = query(
                "MATCH (:Chapter {id: $id})-[:CONTAINS]->(child:OrderedItem)
                 DETACH DELETE child",
            )
            .param("id", id.to_string());
            session
                .txn
                .run(children)
                .await
                .map_err(|e| classify("Failed to delete chapter content", e))?;
        }

        let cypher = query(&format!("MATCH (n:{} {{id: $id}}) DETACH DELETE n", kind.label()))
            .param("id", id.to_string());
        session
            .txn
            .run(cypher)
            .await
            .map_err(|e| classify("Failed to delete item", e))?;

        Ok(true)
    }

    async fn bulk_set_order(
        &self,
        session: &mut Neo4jSession,
        write: &OrderWrite,
    ) -> Result<usize> {
        if write.is_empty() {
            return Ok(0);
        }

        let cypher = query(&format!(
            "UNWIND range(0, size($ids) - 1) AS i
             MATCH (n:{} {{id: $ids[i]}})
             SET n.order = $orders[i]
             RETURN count(n) AS updated",
            write.kind.label()
        ))
        .param("ids", write.ids.clone())
        .param("orders", write.orders.clone());

        let updated =
            fetch_count(&mut session.txn, cypher, "updated", "Failed to write orders").await?;
        if updated as usize != write.len() {
            warn!(
                kind = %write.kind,
                expected = write.len(),
                updated,
                "Bulk order write touched fewer items than requested"
            );
        }
        Ok(updated.max(0) as usize)
    }

    async fn compare_and_bump_version(
        &self,
        session: &mut Neo4jSession,
        scope: &SiblingScope,
        expected: i64,
    ) -> Result<i64> {
        // Lock the parent before reading the version; a concurrent writer
        // blocks on the first SET and then reads the committed bump
        let cypher = query(&format!(
            "MATCH (p:{} {{id: $id}})
             SET p._lock = true
             WITH p
             WITH p, coalesce(p.order_version, 0) AS current
             SET p.order_version = CASE WHEN current = $expected THEN current + 1 ELSE current END
             REMOVE p._lock
             RETURN current",
            scope.parent_kind().label()
        ))
        .param("id", scope.parent_id().to_string())
        .param("expected", expected);

        let rows = fetch_rows(&mut session.txn, cypher, "Failed to bump parent version").await?;
        let row = rows
            .first()
            .ok_or_else(|| LmsError::missing(scope.parent_kind().label(), scope.parent_id()))?;
        let found: i64 = row
            .get("current")
            .map_err(|e| LmsError::Query(format!("Failed to read parent version: {}", e)))?;

        if found != expected {
            return Err(LmsError::Conflict {
                parent: scope.to_string(),
                expected,
                found,
            });
        }
        Ok(expected + 1)
    }
}
