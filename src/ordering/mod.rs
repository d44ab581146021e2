//! Sibling ordering for chapters, lectures and quizzes
//!
//! [`resolve_ordering`] turns a partial list of pins into a contiguous
//! `1..N` ordering. [`OrderingEngine`] runs it against an item store session
//! and writes only the positions that changed, or the whole scope when
//! optimistic versioning is off.

pub mod engine;
pub mod resolver;

pub use engine::{OrderingConfig, OrderingEngine, OrderingOutcome};
pub use resolver::{
    full_rewrite_by_kind, next_available_order, resolve_ordering, split_by_kind, OrderWrite,
};
