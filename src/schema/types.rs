//! Type definitions for ordered catalogue records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a sibling-ordered record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Chapter within a course
    Chapter,
    /// Lecture within a chapter
    Lecture,
    /// Quiz within a chapter
    Quiz,
}

impl ItemKind {
    /// Convert kind to string for storage and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Chapter => "chapter",
            ItemKind::Lecture => "lecture",
            ItemKind::Quiz => "quiz",
        }
    }

    /// Parse kind from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chapter" => Some(ItemKind::Chapter),
            "lecture" => Some(ItemKind::Lecture),
            "quiz" => Some(ItemKind::Quiz),
            _ => None,
        }
    }

    /// Node label used by the graph store
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Chapter => "Chapter",
            ItemKind::Lecture => "Lecture",
            ItemKind::Quiz => "Quiz",
        }
    }

    /// Kind of aggregate that owns items of this kind
    pub fn parent_kind(&self) -> ParentKind {
        match self {
            ItemKind::Chapter => ParentKind::Course,
            ItemKind::Lecture | ItemKind::Quiz => ParentKind::Chapter,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of aggregate that owns a sibling set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentKind {
    Course,
    Chapter,
}

impl ParentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentKind::Course => "course",
            ParentKind::Chapter => "chapter",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ParentKind::Course => "Course",
            ParentKind::Chapter => "Chapter",
        }
    }
}

/// A set of siblings that share one contiguous 1..N ordering
///
/// Chapters of a course are homogeneous. Lectures and quizzes of a chapter
/// are pooled together into a single ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "parent_id", rename_all = "snake_case")]
pub enum SiblingScope {
    CourseChapters(String),
    ChapterContent(String),
}

impl SiblingScope {
    /// Scope that contains items of `kind` under `parent_id`
    pub fn for_kind(kind: ItemKind, parent_id: impl Into<String>) -> Self {
        match kind {
            ItemKind::Chapter => SiblingScope::CourseChapters(parent_id.into()),
            ItemKind::Lecture | ItemKind::Quiz => SiblingScope::ChapterContent(parent_id.into()),
        }
    }

    pub fn parent_id(&self) -> &str {
        match self {
            SiblingScope::CourseChapters(id) | SiblingScope::ChapterContent(id) => id,
        }
    }

    pub fn parent_kind(&self) -> ParentKind {
        match self {
            SiblingScope::CourseChapters(_) => ParentKind::Course,
            SiblingScope::ChapterContent(_) => ParentKind::Chapter,
        }
    }

    /// Item kinds pooled in this scope
    pub fn kinds(&self) -> &'static [ItemKind] {
        match self {
            SiblingScope::CourseChapters(_) => &[ItemKind::Chapter],
            SiblingScope::ChapterContent(_) => &[ItemKind::Lecture, ItemKind::Quiz],
        }
    }

    pub fn admits(&self, kind: ItemKind) -> bool {
        self.kinds().contains(&kind)
    }
}

impl fmt::Display for SiblingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.parent_kind().as_str(), self.parent_id())
    }
}

/// A sibling-ordered record (chapter, lecture or quiz)
///
/// `order` is not guaranteed unique at rest; the ordering engine restores
/// a contiguous 1..N sequence whenever it touches the sibling set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    /// Unique identifier
    pub id: String,
    /// Course id for chapters, chapter id for lectures and quizzes
    pub parent_id: String,
    pub kind: ItemKind,
    pub title: String,
    /// Position among siblings, starting at 1
    pub order: i64,
    /// Tie-break key for equal orders
    pub created_at: DateTime<Utc>,
}

impl OrderedItem {
    /// Create a new item with a generated id
    pub fn new(
        kind: ItemKind,
        parent_id: impl Into<String>,
        title: impl Into<String>,
        order: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: parent_id.into(),
            kind,
            title: title.into(),
            order,
            created_at: Utc::now(),
        }
    }

    /// Create an item with explicit id and timestamp
    pub fn with_id(
        id: impl Into<String>,
        kind: ItemKind,
        parent_id: impl Into<String>,
        title: impl Into<String>,
        order: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            kind,
            title: title.into(),
            order,
            created_at,
        }
    }

    pub fn scope(&self) -> SiblingScope {
        SiblingScope::for_kind(self.kind, self.parent_id.clone())
    }
}

/// Caller instruction to place an item at a specific position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPin {
    pub item_id: String,
    /// Required only to disambiguate mixed collections; checked when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    pub order: i64,
}

impl OrderPin {
    pub fn new(item_id: impl Into<String>, order: i64) -> Self {
        Self {
            item_id: item_id.into(),
            kind: None,
            order,
        }
    }

    pub fn with_kind(item_id: impl Into<String>, kind: ItemKind, order: i64) -> Self {
        Self {
            item_id: item_id.into(),
            kind: Some(kind),
            order,
        }
    }

    /// Parse `id=order` or `kind:id=order`
    pub fn parse(raw: &str) -> Option<Self> {
        let (target, order) = raw.rsplit_once('=')?;
        let order: i64 = order.trim().parse().ok()?;
        match target.split_once(':') {
            Some((kind, id)) => {
                let kind = ItemKind::parse(kind.trim())?;
                Some(Self::with_kind(id.trim(), kind, order))
            }
            None if !target.trim().is_empty() => Some(Self::new(target.trim(), order)),
            None => None,
        }
    }
}

/// Final position of one sibling after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    pub id: String,
    pub kind: ItemKind,
    /// Order held before resolution
    pub previous_order: i64,
    pub order: i64,
    /// Whether the position came from a pin
    pub pinned: bool,
}

impl ResolvedPosition {
    pub fn changed(&self) -> bool {
        self.previous_order != self.order
    }
}

/// Caller identity handed to the ownership check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}
