//! Collapse algebra for pending mutations.
//!
//! Before any network exchange, all pending operations for an identifier
//! are folded into the fewest operations that carry the same net edit:
//! the final value (or clearance) per attribute name and the final
//! membership change per tag group.
//!
//! # Algorithm
//!
//! Operations are processed in arrival order and folded per target key:
//!
//! - attributes: a later `set` or `remove` on the same name overrides the
//!   earlier one (a `set` then `remove` collapses to `remove` so a prior
//!   server-side value is still cleared)
//! - tag groups: a `remove` undoes a queued `add` outright and the pair
//!   vanishes from the queue, while an `add` after a queued `remove`
//!   overrides it, so re-joining a group always reaches the server
//! - a surviving key keeps its first-arrival position
//!
//! Attributes and tag groups are independent namespaces and never
//! interact.

use crate::mutation::{Mutation, MutationOp, TargetKey};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The minimal order-preserving equivalent of a mutation sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapsedMutation {
    /// Surviving operations, first-arrival order
    pub ops: Vec<MutationOp>,
    /// Earliest creation timestamp of the folded inputs
    pub created_at: Timestamp,
}

impl CollapsedMutation {
    /// An empty collapsed mutation.
    pub fn empty(created_at: Timestamp) -> Self {
        Self {
            ops: Vec::new(),
            created_at,
        }
    }

    /// Whether nothing survived the fold. An empty mutation is a no-op
    /// and must never reach the network.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of surviving operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Fold `incoming` into the currently pending collapsed mutation.
///
/// `pending` is `None` when nothing is queued for the identifier yet.
pub fn collapse(pending: Option<&CollapsedMutation>, incoming: &Mutation) -> CollapsedMutation {
    let created_at = match pending {
        Some(p) => p.created_at.min(incoming.created_at),
        None => incoming.created_at,
    };

    // Slots keep first-arrival positions; annihilated slots become holes.
    let mut slots: Vec<Option<MutationOp>> = Vec::new();
    let mut index: HashMap<TargetKey, usize> = HashMap::new();

    let pending_ops = pending.map(|p| p.ops.as_slice()).unwrap_or(&[]);
    for op in pending_ops.iter().chain(incoming.ops.iter()) {
        fold_op(op, &mut slots, &mut index);
    }

    CollapsedMutation {
        ops: slots.into_iter().flatten().collect(),
        created_at,
    }
}

fn fold_op(op: &MutationOp, slots: &mut Vec<Option<MutationOp>>, index: &mut HashMap<TargetKey, usize>) {
    let key = op.target_key();
    match index.get(&key) {
        None => {
            index.insert(key, slots.len());
            slots.push(Some(op.clone()));
        }
        Some(&slot) => {
            if op.is_attribute() {
                // Later attribute op overrides, keeping the slot position
                slots[slot] = Some(op.clone());
            } else if slots[slot].as_ref() == Some(op) {
                // add+add or remove+remove on the same group: keep one
            } else if matches!(op, MutationOp::AddToGroup { .. }) {
                // remove then add: the re-join must still reach the
                // server, so the add survives
                slots[slot] = Some(op.clone());
            } else {
                // add then remove: the remove undoes the queued add and
                // the pair vanishes
                slots[slot] = None;
                index.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collapse_one(m: &Mutation) -> CollapsedMutation {
        collapse(None, m)
    }

    #[test]
    fn later_set_overrides_earlier() {
        let m = Mutation::new(1000)
            .set_attribute("color", json!("blue"))
            .set_attribute("color", json!("red"));

        let c = collapse_one(&m);
        assert_eq!(c.len(), 1);
        assert_eq!(
            c.ops[0],
            MutationOp::SetAttribute {
                name: "color".into(),
                value: json!("red"),
            }
        );
    }

    #[test]
    fn set_then_remove_collapses_to_remove() {
        let m = Mutation::new(1000)
            .set_attribute("color", json!("blue"))
            .remove_attribute("color");

        let c = collapse_one(&m);
        assert_eq!(c.ops, vec![MutationOp::RemoveAttribute { name: "color".into() }]);
    }

    #[test]
    fn add_then_remove_group_annihilates() {
        let m = Mutation::new(1000).add_to_group("vip").remove_from_group("vip");

        let c = collapse_one(&m);
        assert!(c.is_empty());
    }

    #[test]
    fn remove_then_add_group_nets_to_add() {
        // Leaving then re-joining must still reach the server
        let m = Mutation::new(1000).remove_from_group("vip").add_to_group("vip");

        let c = collapse_one(&m);
        assert_eq!(c.ops, vec![MutationOp::AddToGroup { group: "vip".into() }]);
    }

    #[test]
    fn pending_remove_then_incoming_add_nets_to_add() {
        let pending = collapse_one(&Mutation::new(1000).remove_from_group("g2"));
        let incoming = Mutation::new(2000).add_to_group("g2");

        let c = collapse(Some(&pending), &incoming);
        assert_eq!(c.ops, vec![MutationOp::AddToGroup { group: "g2".into() }]);
    }

    #[test]
    fn duplicate_group_adds_collapse_to_one() {
        let m = Mutation::new(1000).add_to_group("vip").add_to_group("vip");

        let c = collapse_one(&m);
        assert_eq!(c.ops, vec![MutationOp::AddToGroup { group: "vip".into() }]);
    }

    #[test]
    fn add_remove_add_nets_to_add() {
        let m = Mutation::new(1000)
            .add_to_group("vip")
            .remove_from_group("vip")
            .add_to_group("vip");

        let c = collapse_one(&m);
        assert_eq!(c.ops, vec![MutationOp::AddToGroup { group: "vip".into() }]);
    }

    #[test]
    fn surviving_key_keeps_first_arrival_position() {
        let m = Mutation::new(1000)
            .set_attribute("a", json!(1))
            .set_attribute("b", json!(2))
            .set_attribute("a", json!(3));

        let c = collapse_one(&m);
        assert_eq!(c.len(), 2);
        // "a" keeps its original position ahead of "b"
        assert!(matches!(&c.ops[0], MutationOp::SetAttribute { name, value } if name == "a" && *value == json!(3)));
        assert!(matches!(&c.ops[1], MutationOp::SetAttribute { name, .. } if name == "b"));
    }

    #[test]
    fn namespaces_are_independent() {
        let m = Mutation::new(1000)
            .set_attribute("vip", json!(true))
            .remove_from_group("vip");

        let c = collapse_one(&m);
        // Same name, different namespaces: both survive
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn collapse_with_pending() {
        let first = Mutation::new(1000).set_attribute("color", json!("blue"));
        let pending = collapse_one(&first);

        let second = Mutation::new(2000).set_attribute("color", json!("red"));
        let c = collapse(Some(&pending), &second);

        assert_eq!(c.len(), 1);
        assert_eq!(c.created_at, 1000); // earliest timestamp kept
        assert!(matches!(&c.ops[0], MutationOp::SetAttribute { value, .. } if *value == json!("red")));
    }

    #[test]
    fn pending_add_annihilated_by_incoming_remove() {
        let pending = collapse_one(&Mutation::new(1000).add_to_group("beta"));
        let incoming = Mutation::new(2000).remove_from_group("beta");

        let c = collapse(Some(&pending), &incoming);
        assert!(c.is_empty());
    }

    #[test]
    fn empty_input_collapses_to_empty() {
        let c = collapse_one(&Mutation::new(500));
        assert!(c.is_empty());
        assert_eq!(c.created_at, 500);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        #[derive(Debug, Clone, Copy, PartialEq)]
        enum GroupEdit {
            Joined,
            Left,
        }

        /// Net edit carried by a mutation sequence.
        ///
        /// Attributes record the final write per name (`Some` set, `None`
        /// cleared). Groups record the final membership change; a remove
        /// undoes a queued join outright, so an add/remove pair leaves no
        /// entry behind, while an add after a queued leave nets to a join.
        #[derive(Debug, Clone, PartialEq, Default)]
        struct NetDelta {
            attributes: HashMap<String, Option<serde_json::Value>>,
            groups: HashMap<String, GroupEdit>,
        }

        impl NetDelta {
            fn apply(&mut self, op: &MutationOp) {
                match op {
                    MutationOp::SetAttribute { name, value } => {
                        self.attributes.insert(name.clone(), Some(value.clone()));
                    }
                    MutationOp::RemoveAttribute { name } => {
                        self.attributes.insert(name.clone(), None);
                    }
                    MutationOp::AddToGroup { group } => {
                        self.groups.insert(group.clone(), GroupEdit::Joined);
                    }
                    MutationOp::RemoveFromGroup { group } => {
                        if self.groups.get(group) == Some(&GroupEdit::Joined) {
                            self.groups.remove(group);
                        } else {
                            self.groups.insert(group.clone(), GroupEdit::Left);
                        }
                    }
                }
            }

            fn of(ops: &[MutationOp]) -> Self {
                let mut delta = Self::default();
                for op in ops {
                    delta.apply(op);
                }
                delta
            }
        }

        fn arb_op() -> impl Strategy<Value = MutationOp> {
            let name = prop_oneof![Just("a"), Just("b"), Just("c")];
            let group = prop_oneof![Just("g1"), Just("g2")];
            prop_oneof![
                (name.clone(), 0i64..10).prop_map(|(n, v)| MutationOp::SetAttribute {
                    name: n.to_string(),
                    value: serde_json::json!(v),
                }),
                name.prop_map(|n| MutationOp::RemoveAttribute { name: n.to_string() }),
                group.clone().prop_map(|g| MutationOp::AddToGroup { group: g.to_string() }),
                group.prop_map(|g| MutationOp::RemoveFromGroup { group: g.to_string() }),
            ]
        }

        proptest! {
            /// The collapsed sequence carries exactly the net edit of the
            /// original sequence.
            #[test]
            fn prop_collapse_preserves_net_delta(
                ops in prop::collection::vec(arb_op(), 0..12),
            ) {
                let mutation = Mutation { ops: ops.clone(), created_at: 1000 };
                let collapsed = collapse(None, &mutation);

                prop_assert_eq!(NetDelta::of(&collapsed.ops), NetDelta::of(&ops));
            }

            /// Incremental collapse (append one mutation at a time) carries
            /// the same net edit as the concatenated sequence.
            #[test]
            fn prop_incremental_collapse_matches_sequential(
                first in prop::collection::vec(arb_op(), 0..8),
                second in prop::collection::vec(arb_op(), 0..8),
            ) {
                let m1 = Mutation { ops: first.clone(), created_at: 1000 };
                let m2 = Mutation { ops: second.clone(), created_at: 2000 };

                let pending = collapse(None, &m1);
                let collapsed = collapse(Some(&pending), &m2);

                let mut concatenated = first;
                concatenated.extend(second);

                prop_assert_eq!(
                    NetDelta::of(&collapsed.ops),
                    NetDelta::of(&concatenated)
                );
            }

            /// Collapse never grows the op count.
            #[test]
            fn prop_collapse_is_minimal_or_equal(
                ops in prop::collection::vec(arb_op(), 0..12),
            ) {
                let mutation = Mutation { ops: ops.clone(), created_at: 0 };
                let collapsed = collapse(None, &mutation);
                prop_assert!(collapsed.len() <= ops.len());
            }

            /// Collapsing a collapsed sequence changes nothing.
            #[test]
            fn prop_collapse_is_idempotent(
                ops in prop::collection::vec(arb_op(), 0..12),
            ) {
                let collapsed = collapse(None, &Mutation { ops, created_at: 0 });
                let again = collapse(
                    None,
                    &Mutation { ops: collapsed.ops.clone(), created_at: 0 },
                );
                prop_assert_eq!(again.ops, collapsed.ops);
            }
        }
    }
}
