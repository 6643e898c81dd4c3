//! Sync-engine bindings for the calendar wire types.
//!
//! Calendars, events, and attendees form the three levels the generic
//! diff/apply engine walks. Stored records never carry an action; the
//! bindings translate between the wire enum and the engine's.

use crate::calendar as wire;
use tether_sync::{Action, HierarchyNode, Leafless};

fn action_from_wire(value: i32) -> Action {
    match wire::Action::from_wire(value) {
        wire::Action::ActionUnspecified => Action::Unspecified,
        wire::Action::Create => Action::Create,
        wire::Action::Update => Action::Update,
        wire::Action::Delete => Action::Delete,
        wire::Action::Unchanged => Action::Unchanged,
        wire::Action::Replace => Action::Replace,
    }
}

fn action_to_wire(action: Action) -> i32 {
    let wire_action = match action {
        Action::Unspecified => wire::Action::ActionUnspecified,
        Action::Create => wire::Action::Create,
        Action::Update => wire::Action::Update,
        Action::Delete => wire::Action::Delete,
        Action::Unchanged => wire::Action::Unchanged,
        Action::Replace => wire::Action::Replace,
    };
    wire_action as i32
}

impl HierarchyNode for wire::Calendar {
    type Child = wire::Event;

    fn with_key(key: &str) -> Self {
        wire::Calendar {
            key: key.to_string(),
            ..Default::default()
        }
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn action(&self) -> Action {
        action_from_wire(self.action)
    }

    fn set_action(&mut self, action: Action) {
        self.action = action_to_wire(action);
    }

    fn children(&self) -> &[Self::Child] {
        &self.events
    }

    fn set_children(&mut self, children: Vec<Self::Child>) {
        self.events = children;
    }
}

impl HierarchyNode for wire::Event {
    type Child = wire::Attendee;

    fn with_key(key: &str) -> Self {
        wire::Event {
            key: key.to_string(),
            ..Default::default()
        }
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn action(&self) -> Action {
        action_from_wire(self.action)
    }

    fn set_action(&mut self, action: Action) {
        self.action = action_to_wire(action);
    }

    fn children(&self) -> &[Self::Child] {
        &self.attendees
    }

    fn set_children(&mut self, children: Vec<Self::Child>) {
        self.attendees = children;
    }
}

impl HierarchyNode for wire::Attendee {
    type Child = Leafless;

    fn with_key(key: &str) -> Self {
        wire::Attendee {
            email: key.to_string(),
            ..Default::default()
        }
    }

    fn key(&self) -> &str {
        &self.email
    }

    fn action(&self) -> Action {
        action_from_wire(self.action)
    }

    fn set_action(&mut self, action: Action) {
        self.action = action_to_wire(action);
    }

    fn children(&self) -> &[Self::Child] {
        &[]
    }

    fn set_children(&mut self, _children: Vec<Self::Child>) {}
}
