//! # tether-sync
//!
//! Generic incremental sync over a fixed-depth hierarchy of keyed records.
//!
//! The engine is pure: [`diff`](diff::diff) turns two snapshots of one
//! level into a minimal set of update messages, and [`apply`](apply::apply)
//! replays such messages against a [`LevelStore`]. Levels are linked
//! through an associated `Child` type; leaves use the uninhabited
//! [`Leafless`] child so recursion terminates in the type system rather
//! than at runtime.
//!
//! ```text
//! previous ----\
//!               diff ---> Vec<Msg> (CREATE/UPDATE/DELETE/UNCHANGED)
//! current  ----/             |
//!                            v
//!                  apply(LevelStore) ---> peer replica converges
//! ```

pub mod apply;
pub mod diff;
#[cfg(test)]
pub(crate) mod testutil;

pub use apply::{apply, ApplyError, LevelStore};
pub use diff::diff;

/// Per-message action of an update at any level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Action {
    /// Unset. Appears on stored records (which carry no action) and on
    /// legacy whole-snapshot messages, where it is applied as
    /// [`Action::Replace`].
    #[default]
    Unspecified,
    /// Insert the record and its full subtree.
    Create,
    /// Update the record, then apply carried child updates.
    Update,
    /// Delete the record; descendants are removed with it.
    Delete,
    /// Leave the record alone; recurse into carried children.
    Unchanged,
    /// Delete, then recreate from the carried subtree. An empty REPLACE is
    /// a deletion.
    Replace,
}

/// One level of the sync hierarchy.
///
/// A node is a message with a stable key, a wire-only action, and child
/// messages of the next level down. Structural equality of two nodes is
/// judged with action and children stripped ([`eq_ignoring_children`]);
/// keys are authoritative for identity across snapshots.
///
/// [`eq_ignoring_children`]: HierarchyNode::eq_ignoring_children
pub trait HierarchyNode: Clone + PartialEq + std::fmt::Debug {
    /// The next level down; [`Leafless`] for leaves.
    type Child: HierarchyNode;

    /// An otherwise-empty node carrying only the key. Used to build
    /// minimal DELETE and UNCHANGED messages.
    fn with_key(key: &str) -> Self;

    /// Stable key within the parent.
    fn key(&self) -> &str;

    /// Wire action of this message.
    fn action(&self) -> Action;

    /// Set the wire action.
    fn set_action(&mut self, action: Action);

    /// Child messages.
    fn children(&self) -> &[Self::Child];

    /// Replace the child messages.
    fn set_children(&mut self, children: Vec<Self::Child>);

    /// Structural equality with action and children stripped from both
    /// sides. Safe as whole-record comparison: no level carries
    /// floating-point attributes.
    fn eq_ignoring_children(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.set_action(Action::Unspecified);
        b.set_action(Action::Unspecified);
        a.set_children(Vec::new());
        b.set_children(Vec::new());
        a == b
    }
}

/// Uninhabited child type for leaf levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leafless {}

impl HierarchyNode for Leafless {
    type Child = Leafless;

    fn with_key(_key: &str) -> Self {
        // A leafless node can never be constructed; diff/apply never
        // reach this because no slice of an uninhabited type has elements.
        unreachable!("Leafless is uninhabited")
    }

    fn key(&self) -> &str {
        match *self {}
    }

    fn action(&self) -> Action {
        match *self {}
    }

    fn set_action(&mut self, _action: Action) {
        match *self {}
    }

    fn children(&self) -> &[Self::Child] {
        match *self {}
    }

    fn set_children(&mut self, _children: Vec<Self::Child>) {
        match *self {}
    }
}
