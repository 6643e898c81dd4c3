//! Source-side calendar access.
//!
//! The platform calendar database lives outside this workspace behind
//! [`CalendarProvider`]. [`InMemoryProvider`] is the reference
//! implementation used by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tether_proto::calendar as wire;
use tether_types::TimeRange;

/// Platform calendar access failure.
#[derive(Debug, thiserror::Error)]
#[error("calendar provider error: {0}")]
pub struct ProviderError(pub String);

/// Read access to the platform's calendars.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Read one calendar, restricted to events inside `range`.
    ///
    /// `Ok(None)` means the calendar is (no longer) readable; the source
    /// treats that as "gone" and the peer sees a deletion.
    async fn read_calendar(
        &self,
        key: &str,
        range: TimeRange,
    ) -> std::result::Result<Option<wire::Calendar>, ProviderError>;
}

/// Shared, mutable in-memory calendar set.
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    calendars: Arc<Mutex<HashMap<String, wire::Calendar>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a calendar.
    pub fn put(&self, calendar: wire::Calendar) {
        if let Ok(mut calendars) = self.calendars.lock() {
            calendars.insert(calendar.key.clone(), calendar);
        }
    }

    /// Remove a calendar, making it unreadable.
    pub fn remove(&self, key: &str) {
        if let Ok(mut calendars) = self.calendars.lock() {
            calendars.remove(key);
        }
    }
}

#[async_trait]
impl CalendarProvider for InMemoryProvider {
    async fn read_calendar(
        &self,
        key: &str,
        range: TimeRange,
    ) -> std::result::Result<Option<wire::Calendar>, ProviderError> {
        let calendars = self
            .calendars
            .lock()
            .map_err(|_| ProviderError("poisoned".to_string()))?;
        Ok(calendars.get(key).map(|calendar| {
            let mut read = calendar.clone();
            read.events
                .retain(|event| range.contains(event.start_seconds.max(0) as u64));
            read.range = Some(wire::TimeRange::from_seconds(
                range.from as i64,
                range.to as i64,
            ));
            read
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::{Calendar, Event};

    fn event_at(key: &str, start: i64) -> Event {
        Event {
            key: key.to_string(),
            title: key.to_string(),
            start_seconds: start,
            end_seconds: start + 3_600,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_events_outside_window_filtered() {
        let provider = InMemoryProvider::new();
        provider.put(Calendar {
            key: "C1".to_string(),
            events: vec![event_at("early", 100), event_at("in", 5_000), event_at("late", 99_999)],
            ..Default::default()
        });

        let read = provider
            .read_calendar("C1", TimeRange::new(1_000, 10_000))
            .await
            .expect("read")
            .expect("present");
        let keys: Vec<&str> = read.events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["in"]);
        assert_eq!(
            read.range,
            Some(wire::TimeRange::from_seconds(1_000, 10_000))
        );
    }

    #[tokio::test]
    async fn test_missing_calendar_reads_none() {
        let provider = InMemoryProvider::new();
        assert!(provider
            .read_calendar("nope", TimeRange::new(0, 10))
            .await
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_makes_unreadable() {
        let provider = InMemoryProvider::new();
        provider.put(Calendar {
            key: "C1".to_string(),
            ..Default::default()
        });
        provider.remove("C1");
        assert!(provider
            .read_calendar("C1", TimeRange::new(0, 10))
            .await
            .expect("read")
            .is_none());
    }
}
