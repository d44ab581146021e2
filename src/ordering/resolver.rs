//! Conflict-free sibling order resolution
//!
//! Pure functions: no store access, no clocks. The engine feeds them a
//! snapshot read inside the caller's session.

use crate::error::{LmsError, Result};
use crate::schema::{ItemKind, OrderPin, OrderedItem, ResolvedPosition};
use std::collections::{BTreeMap, HashSet};

/// Resolve `pins` against the current siblings of `parent_id`
///
/// Returns one position per item in `current`, sorted by final order. The
/// final orders are always exactly `1..=N`.
///
/// Pins are taken in `(order, request sequence)` order. Each pin targets its
/// order clamped to N. A first pass lets every pin whose target is still free
/// claim it; pins that lost a collision then take the nearest free slot above
/// their target, else the nearest free slot below. Unpinned items keep their
/// natural `(order, created_at, id)` sequence and fill the remaining slots
/// from the bottom.
///
/// # Errors
/// * `Validation` for an empty parent id, an empty or duplicated pin id, a
///   non-positive order, or a kind-less pin matching several items
/// * `NotFound` naming every pinned id absent from `current`
pub fn resolve_ordering(
    parent_id: &str,
    pins: &[OrderPin],
    current: &[OrderedItem],
) -> Result<Vec<ResolvedPosition>> {
    validate_pins(parent_id, pins)?;
    let targets = match_pins(parent_id, pins, current)?;

    let n = current.len();
    // Slot 0 is unused so indices line up with orders
    let mut slots: Vec<Option<usize>> = vec![None; n + 1];
    let mut final_order: Vec<Option<usize>> = vec![None; n];

    // Stable sort keeps request sequence for equal orders
    let mut queue: Vec<(usize, &OrderPin)> = targets.into_iter().zip(pins.iter()).collect();
    queue.sort_by_key(|(_, pin)| pin.order);

    let mut losers = Vec::new();
    for &(item, pin) in &queue {
        let target = clamp_target(pin.order, n);
        if slots[target].is_none() {
            slots[target] = Some(item);
            final_order[item] = Some(target);
        } else {
            losers.push((item, target));
        }
    }

    for (item, target) in losers {
        let slot = nearest_free(&slots, target).ok_or_else(|| {
            LmsError::Other(format!("no free slot left while resolving {}", parent_id))
        })?;
        slots[slot] = Some(item);
        final_order[item] = Some(slot);
    }

    let mut cursor = 1;
    for item in natural_order(current) {
        if final_order[item].is_some() {
            continue;
        }
        while slots[cursor].is_some() {
            cursor += 1;
        }
        slots[cursor] = Some(item);
        final_order[item] = Some(cursor);
    }

    let pinned: HashSet<usize> = queue.iter().map(|(item, _)| *item).collect();
    let mut resolved: Vec<ResolvedPosition> = slots
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(order, slot)| slot.map(|item| (order, item)))
        .map(|(order, item)| ResolvedPosition {
            id: current[item].id.clone(),
            kind: current[item].kind,
            previous_order: current[item].order,
            order: order as i64,
            pinned: pinned.contains(&item),
        })
        .collect();
    resolved.sort_by_key(|p| p.order);

    Ok(resolved)
}

/// Order for an item appended to a set of `sibling_count` items
pub fn next_available_order(sibling_count: usize) -> i64 {
    sibling_count as i64 + 1
}

/// Changed positions grouped per collection, ready for bulk writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderWrite {
    pub kind: ItemKind,
    pub ids: Vec<String>,
    pub orders: Vec<i64>,
}

impl OrderWrite {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split positions whose order changed into one write per item kind
pub fn split_by_kind(positions: &[ResolvedPosition]) -> Vec<OrderWrite> {
    group_by_kind(positions.iter().filter(|p| p.changed()))
}

/// Every position grouped per item kind, changed or not
///
/// Used when nothing guards the parent: rewriting the whole scope keeps a
/// racing writer's rows from mixing with ours.
pub fn full_rewrite_by_kind(positions: &[ResolvedPosition]) -> Vec<OrderWrite> {
    group_by_kind(positions.iter())
}

fn group_by_kind<'a>(positions: impl Iterator<Item = &'a ResolvedPosition>) -> Vec<OrderWrite> {
    let mut grouped: BTreeMap<ItemKind, OrderWrite> = BTreeMap::new();
    for position in positions {
        let write = grouped.entry(position.kind).or_insert_with(|| OrderWrite {
            kind: position.kind,
            ids: Vec::new(),
            orders: Vec::new(),
        });
        write.ids.push(position.id.clone());
        write.orders.push(position.order);
    }
    grouped.into_values().collect()
}

fn validate_pins(parent_id: &str, pins: &[OrderPin]) -> Result<()> {
    if parent_id.trim().is_empty() {
        return Err(LmsError::Validation("parent id must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for pin in pins {
        if pin.item_id.trim().is_empty() {
            return Err(LmsError::Validation("pinned item id must not be empty".to_string()));
        }
        if pin.order <= 0 {
            return Err(LmsError::Validation(format!(
                "order for {} must be a positive integer, got {}",
                pin.item_id, pin.order
            )));
        }
        if !seen.insert((pin.item_id.as_str(), pin.kind)) {
            duplicates.push(pin.item_id.clone());
        }
    }

    if !duplicates.is_empty() {
        return Err(LmsError::Validation(format!(
            "duplicate pinned ids: [{}]",
            duplicates.join(", ")
        )));
    }
    Ok(())
}

/// Index into `current` for every pin, in pin order
fn match_pins(parent_id: &str, pins: &[OrderPin], current: &[OrderedItem]) -> Result<Vec<usize>> {
    let mut targets = Vec::with_capacity(pins.len());
    let mut missing = Vec::new();

    for pin in pins {
        let mut matches = current.iter().enumerate().filter(|(_, item)| {
            item.id == pin.item_id && pin.kind.map_or(true, |kind| kind == item.kind)
        });
        match (matches.next(), matches.next()) {
            (Some((index, _)), None) => targets.push(index),
            (Some(_), Some(_)) => {
                return Err(LmsError::Validation(format!(
                    "pinned id {} is ambiguous under {}; specify its kind",
                    pin.item_id, parent_id
                )));
            }
            (None, _) => missing.push(pin.item_id.clone()),
        }
    }

    if !missing.is_empty() {
        let entity = match pins.iter().find_map(|p| p.kind) {
            Some(kind) if pins.iter().all(|p| p.kind == Some(kind)) => kind.label(),
            _ => "Item",
        };
        return Err(LmsError::not_found(entity, missing, parent_id));
    }

    // A kind-less and a kinded pin can still name the same item
    let unique: HashSet<usize> = targets.iter().copied().collect();
    if unique.len() != targets.len() {
        return Err(LmsError::Validation(format!(
            "an item under {} is pinned more than once",
            parent_id
        )));
    }

    Ok(targets)
}

fn natural_order(current: &[OrderedItem]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..current.len()).collect();
    indices.sort_by(|&a, &b| {
        let (a, b) = (&current[a], &current[b]);
        a.order
            .cmp(&b.order)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    indices
}

fn clamp_target(order: i64, n: usize) -> usize {
    (order.max(1) as usize).min(n)
}

fn nearest_free(slots: &[Option<usize>], target: usize) -> Option<usize> {
    let n = slots.len() - 1;
    ((target + 1)..=n)
        .find(|&slot| slots[slot].is_none())
        .or_else(|| (1..target).rev().find(|&slot| slots[slot].is_none()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn item(id: &str, kind: ItemKind, order: i64, created_offset: i64) -> OrderedItem {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        OrderedItem::with_id(
            id,
            kind,
            "parent",
            id.to_uppercase(),
            order,
            base + Duration::seconds(created_offset),
        )
    }

    fn chapters(orders: &[i64]) -> Vec<OrderedItem> {
        orders
            .iter()
            .enumerate()
            .map(|(i, order)| item(&format!("ch{}", i + 1), ItemKind::Chapter, *order, i as i64))
            .collect()
    }

    fn ids(resolved: &[ResolvedPosition]) -> Vec<&str> {
        resolved.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_no_pins_closes_gaps_and_duplicates() {
        let current = chapters(&[5, 2, 2, 9]);
        let resolved = resolve_ordering("course-1", &[], &current).unwrap();

        assert_eq!(ids(&resolved), vec!["ch2", "ch3", "ch1", "ch4"]);
        let orders: Vec<i64> = resolved.iter().map(|p| p.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pin_moves_item_and_shifts_others() {
        let current = chapters(&[1, 2, 3, 4]);
        let resolved =
            resolve_ordering("course-1", &[OrderPin::new("ch4", 1)], &current).unwrap();

        assert_eq!(ids(&resolved), vec!["ch4", "ch1", "ch2", "ch3"]);
        assert!(resolved[0].pinned);
        assert!(!resolved[1].pinned);
    }

    #[test]
    fn test_colliding_pins_keep_request_sequence() {
        let current = chapters(&[1, 2, 3, 4]);
        let pins = vec![OrderPin::new("ch3", 2), OrderPin::new("ch1", 2)];
        let resolved = resolve_ordering("course-1", &pins, &current).unwrap();

        // ch3 asked first and wins slot 2, ch1 takes the next free slot above
        assert_eq!(ids(&resolved), vec!["ch2", "ch3", "ch1", "ch4"]);
    }

    #[test]
    fn test_collision_loser_does_not_displace_unique_pin() {
        let current = chapters(&[1, 2, 3, 4]);
        let pins = vec![
            OrderPin::new("ch1", 2),
            OrderPin::new("ch2", 2),
            OrderPin::new("ch3", 3),
        ];
        let resolved = resolve_ordering("course-1", &pins, &current).unwrap();

        let order_of = |id: &str| resolved.iter().find(|p| p.id == id).unwrap().order;
        assert_eq!(order_of("ch1"), 2);
        assert_eq!(order_of("ch3"), 3);
        assert_eq!(order_of("ch2"), 4);
        assert_eq!(order_of("ch4"), 1);
    }

    #[test]
    fn test_pin_beyond_end_is_clamped() {
        let current = chapters(&[1, 2, 3]);
        let resolved =
            resolve_ordering("course-1", &[OrderPin::new("ch1", 99)], &current).unwrap();

        assert_eq!(ids(&resolved), vec!["ch2", "ch3", "ch1"]);
        assert_eq!(resolved[2].order, 3);
    }

    #[test]
    fn test_clamped_collision_falls_back_below() {
        let current = chapters(&[1, 2, 3]);
        let pins = vec![OrderPin::new("ch1", 3), OrderPin::new("ch2", 7)];
        let resolved = resolve_ordering("course-1", &pins, &current).unwrap();

        assert_eq!(ids(&resolved), vec!["ch3", "ch2", "ch1"]);
    }

    #[test]
    fn test_missing_pins_are_all_reported() {
        let current = chapters(&[1, 2]);
        let pins = vec![
            OrderPin::with_kind("ghost-1", ItemKind::Chapter, 1),
            OrderPin::new("ch1", 2),
            OrderPin::with_kind("ghost-2", ItemKind::Chapter, 2),
        ];

        match resolve_ordering("course-1", &pins, &current) {
            Err(LmsError::NotFound { ids, parent, .. }) => {
                assert_eq!(ids, vec!["ghost-1", "ghost-2"]);
                assert_eq!(parent.as_deref(), Some("course-1"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_mismatch_is_not_found() {
        let current = vec![
            item("x1", ItemKind::Lecture, 1, 0),
            item("x2", ItemKind::Quiz, 2, 1),
        ];
        let pins = vec![OrderPin::with_kind("x1", ItemKind::Quiz, 2)];

        let err = resolve_ordering("chapter-1", &pins, &current).unwrap_err();
        assert!(matches!(err, LmsError::NotFound { ref entity, .. } if entity == "Quiz"));
    }

    #[test]
    fn test_shared_id_across_kinds_needs_kind() {
        let current = vec![
            item("same", ItemKind::Lecture, 1, 0),
            item("same", ItemKind::Quiz, 2, 1),
        ];

        let err = resolve_ordering("chapter-1", &[OrderPin::new("same", 2)], &current)
            .unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));

        let resolved = resolve_ordering(
            "chapter-1",
            &[OrderPin::with_kind("same", ItemKind::Lecture, 2)],
            &current,
        )
        .unwrap();
        assert_eq!(resolved[0].kind, ItemKind::Quiz);
        assert_eq!(resolved[1].kind, ItemKind::Lecture);
    }

    #[test]
    fn test_validation_errors() {
        let current = chapters(&[1, 2]);

        let err = resolve_ordering("", &[], &current).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));

        let err = resolve_ordering("c", &[OrderPin::new("ch1", 0)], &current).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));

        let err = resolve_ordering("c", &[OrderPin::new("ch1", -3)], &current).unwrap_err();
        assert!(matches!(err, LmsError::Validation(_)));

        let pins = vec![OrderPin::new("ch1", 1), OrderPin::new("ch1", 2)];
        let err = resolve_ordering("c", &pins, &current).unwrap_err();
        assert!(matches!(err, LmsError::Validation(msg) if msg.contains("ch1")));
    }

    #[test]
    fn test_full_rewrite_covers_unchanged_rows() {
        let current = vec![
            item("l1", ItemKind::Lecture, 1, 0),
            item("q1", ItemKind::Quiz, 2, 1),
            item("l2", ItemKind::Lecture, 3, 2),
        ];
        let resolved = resolve_ordering("chapter-1", &[], &current).unwrap();

        assert!(split_by_kind(&resolved).is_empty());
        let writes = full_rewrite_by_kind(&resolved);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].kind, ItemKind::Lecture);
        assert_eq!(writes[0].ids, vec!["l1".to_string(), "l2".to_string()]);
        assert_eq!(writes[0].orders, vec![1, 3]);
        assert_eq!(writes[1].ids, vec!["q1".to_string()]);
    }

    #[test]
    fn test_split_by_kind_only_changed() {
        let current = vec![
            item("l1", ItemKind::Lecture, 1, 0),
            item("q1", ItemKind::Quiz, 2, 1),
            item("l2", ItemKind::Lecture, 3, 2),
        ];
        let resolved = resolve_ordering(
            "chapter-1",
            &[OrderPin::with_kind("l2", ItemKind::Lecture, 2)],
            &current,
        )
        .unwrap();

        let writes = split_by_kind(&resolved);
        assert_eq!(
            writes,
            vec![
                OrderWrite {
                    kind: ItemKind::Lecture,
                    ids: vec!["l2".to_string()],
                    orders: vec![2],
                },
                OrderWrite {
                    kind: ItemKind::Quiz,
                    ids: vec!["q1".to_string()],
                    orders: vec![3],
                },
            ]
        );
    }

    #[test]
    fn test_next_available_order() {
        assert_eq!(next_available_order(0), 1);
        assert_eq!(next_available_order(4), 5);
    }

    fn arb_siblings() -> impl Strategy<Value = Vec<OrderedItem>> {
        prop::collection::vec((1i64..30, 0i64..1000), 0..25).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (order, created))| {
                    let kind = if i % 3 == 0 { ItemKind::Quiz } else { ItemKind::Lecture };
                    item(&format!("i{}", i), kind, order, created)
                })
                .collect()
        })
    }

    fn arb_case() -> impl Strategy<Value = (Vec<OrderedItem>, Vec<OrderPin>)> {
        arb_siblings().prop_flat_map(|items| {
            let n = items.len();
            let picks = prop::collection::vec((any::<prop::sample::Index>(), 1i64..40), 0..=n);
            (Just(items), picks)
        })
        .prop_map(|(items, picks)| {
            let mut seen = HashSet::new();
            let pins: Vec<OrderPin> = picks
                .into_iter()
                .filter_map(|(index, order)| {
                    if items.is_empty() {
                        return None;
                    }
                    let target = &items[index.index(items.len())];
                    seen.insert(target.id.clone())
                        .then(|| OrderPin::new(target.id.clone(), order))
                })
                .collect();
            (items, pins)
        })
    }

    proptest! {
        #[test]
        fn prop_result_is_contiguous((items, pins) in arb_case()) {
            let resolved = resolve_ordering("chapter-1", &pins, &items).unwrap();

            prop_assert_eq!(resolved.len(), items.len());
            let orders: Vec<i64> = resolved.iter().map(|p| p.order).collect();
            let expected: Vec<i64> = (1..=items.len() as i64).collect();
            prop_assert_eq!(orders, expected);
        }

        #[test]
        fn prop_unique_pins_in_range_win((items, pins) in arb_case()) {
            let resolved = resolve_ordering("chapter-1", &pins, &items).unwrap();

            for pin in &pins {
                let unique = pins.iter().filter(|p| p.order == pin.order).count() == 1;
                if unique && pin.order as usize <= items.len() {
                    let position = resolved.iter().find(|p| p.id == pin.item_id).unwrap();
                    prop_assert_eq!(position.order, pin.order);
                }
            }
        }

        #[test]
        fn prop_contiguous_input_is_stable(count in 0usize..30) {
            let orders: Vec<i64> = (1..=count as i64).collect();
            let current = chapters(&orders);
            let resolved = resolve_ordering("course-1", &[], &current).unwrap();

            prop_assert!(resolved.iter().all(|p| !p.changed()));
            prop_assert!(split_by_kind(&resolved).is_empty());
        }
    }
}
