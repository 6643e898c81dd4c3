//! Snapshot comparison.

use std::collections::HashMap;

use crate::{Action, HierarchyNode};

/// Compare two snapshots of one level and produce minimal update messages.
///
/// For every key in `current`:
///
/// - absent from `previous` → a `CREATE` carrying the full subtree;
/// - present and structurally equal (action and children stripped) → an
///   `UNCHANGED` carrying only the child diff, suppressed entirely when
///   the child diff is empty;
/// - present and different → an `UPDATE` carrying the new attributes and
///   the child diff.
///
/// Keys left over in `previous` become `DELETE` messages, in their
/// original order. Two physically identical (or both empty) snapshots
/// short-circuit to an empty diff.
pub fn diff<N: HierarchyNode>(previous: &[N], current: &[N]) -> Vec<N> {
    if previous.is_empty() && current.is_empty() {
        return Vec::new();
    }
    if previous.as_ptr() == current.as_ptr() && previous.len() == current.len() {
        return Vec::new();
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(previous.len());
    for (i, node) in previous.iter().enumerate() {
        index.entry(node.key()).or_insert(i);
    }
    let mut matched = vec![false; previous.len()];
    let mut updates = Vec::new();

    for node in current {
        let prior = index
            .get(node.key())
            .copied()
            .filter(|&i| !matched[i]);
        match prior {
            None => {
                let mut message = node.clone();
                mark_subtree_created(&mut message);
                updates.push(message);
            }
            Some(i) => {
                matched[i] = true;
                let prior = &previous[i];
                let child_updates = diff(prior.children(), node.children());
                if prior.eq_ignoring_children(node) {
                    if !child_updates.is_empty() {
                        let mut message = N::with_key(node.key());
                        message.set_action(Action::Unchanged);
                        message.set_children(child_updates);
                        updates.push(message);
                    }
                } else {
                    let mut message = node.clone();
                    message.set_action(Action::Update);
                    message.set_children(child_updates);
                    updates.push(message);
                }
            }
        }
    }

    for (i, node) in previous.iter().enumerate() {
        if !matched[i] {
            let mut message = N::with_key(node.key());
            message.set_action(Action::Delete);
            updates.push(message);
        }
    }

    updates
}

/// Stamp `CREATE` on a node and its whole subtree.
fn mark_subtree_created<N: HierarchyNode>(node: &mut N) {
    node.set_action(Action::Create);
    let mut children = node.children().to_vec();
    for child in &mut children {
        mark_subtree_created(child);
    }
    node.set_children(children);
}
