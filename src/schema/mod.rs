//! Catalogue schema module
//!
//! Defines the sibling-ordered records (chapters, lectures, quizzes), the
//! scopes that group them, and the pin requests used to reorder them.

pub mod types;

pub use types::{
    Actor, ItemKind, OrderPin, OrderedItem, ParentKind, ResolvedPosition, Role, SiblingScope,
};
