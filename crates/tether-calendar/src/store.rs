//! Replica-side calendar persistence.
//!
//! The platform calendar database sits behind [`CalendarStore`]; the
//! bundled [`InMemoryCalendarStore`] is the reference implementation and
//! the test double. Apply semantics follow the engine contract: create
//! replaces, delete tolerates missing keys, update inserts when absent.
//!
//! The in-memory store applies each batch record-by-record without a
//! cross-record transaction; a concurrent writer can interleave. A
//! SQLite-backed store should wrap [`CalendarStore::calendars`] usage in
//! one transaction.

use std::convert::Infallible;

use tether_proto::calendar as wire;
use tether_sync::LevelStore;

/// Replica persistence seam.
pub trait CalendarStore: Send {
    /// Level store over the top (calendar) level.
    fn calendars(&mut self) -> Box<dyn LevelStore<wire::Calendar, Error = Infallible> + '_>;

    /// Current contents, actions normalized to unspecified.
    fn snapshot(&self) -> Vec<wire::Calendar>;

    /// Drop all state for the syncing peer (disable path).
    fn purge(&mut self);
}

/// Insertion-ordered in-memory calendar tree.
#[derive(Debug, Default)]
pub struct InMemoryCalendarStore {
    calendars: Vec<wire::Calendar>,
}

impl InMemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalendarStore for InMemoryCalendarStore {
    fn calendars(&mut self) -> Box<dyn LevelStore<wire::Calendar, Error = Infallible> + '_> {
        Box::new(CalendarLevel {
            calendars: &mut self.calendars,
        })
    }

    fn snapshot(&self) -> Vec<wire::Calendar> {
        let mut snapshot = self.calendars.clone();
        for calendar in &mut snapshot {
            calendar.action = 0;
            for event in &mut calendar.events {
                event.action = 0;
                for attendee in &mut event.attendees {
                    attendee.action = 0;
                }
            }
        }
        snapshot
    }

    fn purge(&mut self) {
        self.calendars.clear();
    }
}

struct CalendarLevel<'a> {
    calendars: &'a mut Vec<wire::Calendar>,
}

impl LevelStore<wire::Calendar> for CalendarLevel<'_> {
    type Error = Infallible;

    fn create(&mut self, node: &wire::Calendar) -> Result<String, Self::Error> {
        self.calendars.retain(|c| c.key != node.key);
        self.calendars.push(wire::Calendar {
            key: node.key.clone(),
            range: node.range,
            action: 0,
            events: Vec::new(),
        });
        Ok(node.key.clone())
    }

    fn update(&mut self, node: &wire::Calendar) -> Result<String, Self::Error> {
        match self.calendars.iter_mut().find(|c| c.key == node.key) {
            Some(calendar) => {
                calendar.range = node.range;
            }
            None => {
                let _ = self.create(node)?;
            }
        }
        Ok(node.key.clone())
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.calendars.retain(|c| c.key != key);
        Ok(())
    }

    fn child_store<'a>(
        &'a mut self,
        key: &str,
    ) -> Option<Box<dyn LevelStore<wire::Event, Error = Self::Error> + 'a>> {
        match self.calendars.iter_mut().find(|c| c.key == key) {
            Some(calendar) => Some(Box::new(EventLevel {
                events: &mut calendar.events,
            })),
            None => None,
        }
    }
}

struct EventLevel<'a> {
    events: &'a mut Vec<wire::Event>,
}

impl LevelStore<wire::Event> for EventLevel<'_> {
    type Error = Infallible;

    fn create(&mut self, node: &wire::Event) -> Result<String, Self::Error> {
        self.events.retain(|e| e.key != node.key);
        let mut event = node.clone();
        event.action = 0;
        event.attendees = Vec::new();
        self.events.push(event);
        Ok(node.key.clone())
    }

    fn update(&mut self, node: &wire::Event) -> Result<String, Self::Error> {
        match self.events.iter_mut().find(|e| e.key == node.key) {
            Some(event) => {
                let attendees = std::mem::take(&mut event.attendees);
                *event = node.clone();
                event.action = 0;
                event.attendees = attendees;
            }
            None => {
                let _ = self.create(node)?;
            }
        }
        Ok(node.key.clone())
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.events.retain(|e| e.key != key);
        Ok(())
    }

    fn child_store<'a>(
        &'a mut self,
        key: &str,
    ) -> Option<Box<dyn LevelStore<wire::Attendee, Error = Self::Error> + 'a>> {
        match self.events.iter_mut().find(|e| e.key == key) {
            Some(event) => Some(Box::new(AttendeeLevel {
                attendees: &mut event.attendees,
            })),
            None => None,
        }
    }
}

struct AttendeeLevel<'a> {
    attendees: &'a mut Vec<wire::Attendee>,
}

impl LevelStore<wire::Attendee> for AttendeeLevel<'_> {
    type Error = Infallible;

    fn create(&mut self, node: &wire::Attendee) -> Result<String, Self::Error> {
        self.attendees.retain(|a| a.email != node.email);
        let mut attendee = node.clone();
        attendee.action = 0;
        self.attendees.push(attendee);
        Ok(node.email.clone())
    }

    fn update(&mut self, node: &wire::Attendee) -> Result<String, Self::Error> {
        match self.attendees.iter_mut().find(|a| a.email == node.email) {
            Some(attendee) => {
                *attendee = node.clone();
                attendee.action = 0;
            }
            None => {
                let _ = self.create(node)?;
            }
        }
        Ok(node.email.clone())
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.attendees.retain(|a| a.email != key);
        Ok(())
    }

    fn child_store<'a>(
        &'a mut self,
        _key: &str,
    ) -> Option<Box<dyn LevelStore<tether_sync::Leafless, Error = Self::Error> + 'a>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::{Attendee, Calendar, Event, TimeRange};
    use tether_sync::{apply, diff};

    fn seeded() -> Vec<Calendar> {
        vec![Calendar {
            key: "C1".to_string(),
            range: Some(TimeRange::from_seconds(0, 86_400)),
            action: 0,
            events: vec![Event {
                key: "E1".to_string(),
                title: "Lunch".to_string(),
                attendees: vec![Attendee {
                    email: "a@x".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }]
    }

    fn store_with(snapshot: &[Calendar]) -> InMemoryCalendarStore {
        let mut store = InMemoryCalendarStore::new();
        let creates = diff(&[], snapshot);
        let mut level = store.calendars();
        apply(level.as_mut(), &creates).expect("seed store");
        drop(level);
        store
    }

    #[test]
    fn test_diff_apply_converges_store() {
        let previous = seeded();
        let mut current = seeded();
        current[0].events[0].title = "Brunch".to_string();
        current[0].events[0].attendees.push(Attendee {
            email: "b@x".to_string(),
            ..Default::default()
        });

        let mut store = store_with(&previous);
        let updates = diff(&previous, &current);
        let mut level = store.calendars();
        apply(level.as_mut(), &updates).expect("apply");
        drop(level);

        assert_eq!(store.snapshot(), current);
    }

    #[test]
    fn test_replace_with_events_recreates() {
        let mut store = store_with(&seeded());

        let mut replacement = seeded().remove(0);
        replacement.action = tether_proto::Action::Replace as i32;
        replacement.events[0].title = "Rebuilt".to_string();
        replacement.events[0].action = tether_proto::Action::Create as i32;
        replacement.events[0].attendees[0].action = tether_proto::Action::Create as i32;

        let mut level = store.calendars();
        apply(level.as_mut(), &[replacement]).expect("apply replace");
        drop(level);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].events[0].title, "Rebuilt");
        assert_eq!(snapshot[0].events[0].attendees.len(), 1);
    }

    #[test]
    fn test_empty_replace_deletes() {
        let mut store = store_with(&seeded());

        let replacement = Calendar {
            key: "C1".to_string(),
            action: tether_proto::Action::Replace as i32,
            ..Default::default()
        };
        let mut level = store.calendars();
        apply(level.as_mut(), &[replacement]).expect("apply");
        drop(level);

        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_purge_clears_everything() {
        let mut store = store_with(&seeded());
        store.purge();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_normalizes_actions() {
        let mut snapshot = seeded();
        snapshot[0].action = tether_proto::Action::Create as i32;
        snapshot[0].events[0].action = tether_proto::Action::Create as i32;

        let store = store_with(&snapshot);
        let read_back = store.snapshot();
        assert_eq!(read_back[0].action, 0);
        assert_eq!(read_back[0].events[0].action, 0);
    }
}
