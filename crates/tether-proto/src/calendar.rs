//! Calendar update messages.
//!
//! The three-level hierarchy (calendar → event → attendee) carried inside
//! `CLIENT_MESSAGE` payloads addressed to the calendar-sync feature. Every
//! level has an `action` that is meaningful only on the wire; stored
//! records never keep one.

/// Per-record action of an update message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    /// Unset; legacy peers send whole calendars without actions.
    ActionUnspecified = 0,
    /// Insert the record and its subtree.
    Create = 1,
    /// Update the record, then apply child updates.
    Update = 2,
    /// Delete the record; descendants go with it.
    Delete = 3,
    /// Leave the record alone; recurse into children if present.
    Unchanged = 4,
    /// Delete then recreate from the carried subtree (calendars only);
    /// empty REPLACE signals deletion.
    Replace = 5,
}

impl Action {
    /// Map a wire discriminant, treating unknown values from newer peers as
    /// [`Action::Replace`].
    pub fn from_wire(value: i32) -> Self {
        Action::try_from(value).unwrap_or(Action::Replace)
    }
}

/// Type of an [`UpdateCalendars`] message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum UpdateType {
    /// Unset; treated as [`UpdateType::Receive`].
    TypeUnspecified = 0,
    /// Calendars for the receiver to apply.
    Receive = 1,
    /// Receipt confirmation; carries the replier's protocol version.
    Acknowledge = 2,
    /// The sender stopped syncing; purge its state.
    Disable = 3,
}

impl UpdateType {
    /// Map a wire discriminant, treating unknown values as
    /// [`UpdateType::Receive`].
    pub fn from_wire(value: i32) -> Self {
        match UpdateType::try_from(value) {
            Ok(UpdateType::TypeUnspecified) | Err(_) => UpdateType::Receive,
            Ok(known) => known,
        }
    }
}

/// Whole seconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
}

/// Half-open interval `[from, to)`.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct TimeRange {
    /// Inclusive start.
    #[prost(message, optional, tag = "1")]
    pub from: Option<Timestamp>,
    /// Exclusive end.
    #[prost(message, optional, tag = "2")]
    pub to: Option<Timestamp>,
}

impl TimeRange {
    /// Build a range from epoch seconds.
    pub fn from_seconds(from: i64, to: i64) -> Self {
        Self {
            from: Some(Timestamp { seconds: from }),
            to: Some(Timestamp { seconds: to }),
        }
    }
}

/// Attendance response of an attendee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum AttendeeStatus {
    StatusUnspecified = 0,
    Accepted = 1,
    Declined = 2,
    Tentative = 3,
}

/// Participation role of an attendee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum AttendeeType {
    AttendeeTypeUnspecified = 0,
    Required = 1,
    Optional = 2,
    Resource = 3,
}

/// Leaf level: one attendee of an event, keyed by email.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Attendee {
    /// Stable key within the parent event.
    #[prost(string, tag = "1")]
    pub email: String,
    /// Display name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Participation role.
    #[prost(enumeration = "AttendeeType", tag = "3")]
    pub r#type: i32,
    /// Attendance response.
    #[prost(enumeration = "AttendeeStatus", tag = "4")]
    pub status: i32,
    /// Wire-only action.
    #[prost(enumeration = "Action", tag = "5")]
    pub action: i32,
}

/// Middle level: one event of a calendar.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Event {
    /// Stable key within the parent calendar.
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub location: String,
    #[prost(string, tag = "5")]
    pub organizer: String,
    /// IANA timezone name the event was created in.
    #[prost(string, tag = "6")]
    pub timezone: String,
    /// Start, epoch seconds.
    #[prost(int64, tag = "7")]
    pub start_seconds: i64,
    /// End, epoch seconds.
    #[prost(int64, tag = "8")]
    pub end_seconds: i64,
    #[prost(bool, tag = "9")]
    pub is_all_day: bool,
    /// Wire-only action.
    #[prost(enumeration = "Action", tag = "10")]
    pub action: i32,
    #[prost(message, repeated, tag = "11")]
    pub attendees: Vec<Attendee>,
}

/// Top level: one calendar.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Calendar {
    /// Stable key per source.
    #[prost(string, tag = "1")]
    pub key: String,
    /// Time range the carried events were read from.
    #[prost(message, optional, tag = "2")]
    pub range: Option<TimeRange>,
    /// Wire-only action.
    #[prost(enumeration = "Action", tag = "3")]
    pub action: i32,
    #[prost(message, repeated, tag = "4")]
    pub events: Vec<Event>,
}

/// Top-level calendar-sync feature payload.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UpdateCalendars {
    /// Sync protocol version of the sender; `0` marks a legacy peer that
    /// only understands whole-calendar REPLACE messages.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// What the receiver should do with this message.
    #[prost(enumeration = "UpdateType", tag = "2")]
    pub r#type: i32,
    #[prost(message, repeated, tag = "3")]
    pub calendars: Vec<Calendar>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_unknown_action_maps_to_replace() {
        assert_eq!(Action::from_wire(42), Action::Replace);
        assert_eq!(Action::from_wire(0), Action::ActionUnspecified);
        assert_eq!(Action::from_wire(4), Action::Unchanged);
    }

    #[test]
    fn test_unknown_update_type_maps_to_receive() {
        assert_eq!(UpdateType::from_wire(42), UpdateType::Receive);
        assert_eq!(UpdateType::from_wire(0), UpdateType::Receive);
        assert_eq!(UpdateType::from_wire(3), UpdateType::Disable);
    }

    #[test]
    fn test_update_calendars_roundtrip() {
        let update = UpdateCalendars {
            version: 1,
            r#type: UpdateType::Receive as i32,
            calendars: vec![Calendar {
                key: "work".to_string(),
                range: Some(TimeRange::from_seconds(0, 86_400)),
                action: Action::Create as i32,
                events: vec![Event {
                    key: "evt-1".to_string(),
                    title: "Lunch".to_string(),
                    description: String::new(),
                    location: "Cafe".to_string(),
                    organizer: "a@x".to_string(),
                    timezone: "UTC".to_string(),
                    start_seconds: 1_000,
                    end_seconds: 2_000,
                    is_all_day: false,
                    action: Action::Create as i32,
                    attendees: vec![Attendee {
                        email: "b@x".to_string(),
                        name: "B".to_string(),
                        r#type: AttendeeType::Required as i32,
                        status: AttendeeStatus::Accepted as i32,
                        action: Action::Create as i32,
                    }],
                }],
            }],
        };
        let restored =
            UpdateCalendars::decode(update.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(restored, update);
    }
}
