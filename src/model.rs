//! Domain types shared across the WBXML, provisioning, and calendar modules.
//!
//! These are plain data holders; the protocol logic that produces and
//! consumes them lives in [`crate::calendar`], [`crate::provisioning`], and
//! [`crate::transport`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The EAS protocol version negotiated with the server, detected once per
/// [`crate::transport::eas::EasClient`] via `OPTIONS` and cached for the
/// lifetime of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerVersion {
    /// `MS-ASProtocolVersion: 12.1` — no `AirSyncBase`, flat `Body` as plain text.
    V12_1,
    /// `MS-ASProtocolVersion: 14.0`
    V14_0,
    /// `MS-ASProtocolVersion: 14.1` — `AirSyncBase:Body` container, HTML bodies.
    V14_1,
    /// `MS-ASProtocolVersion: 16.0` and later, treated identically to 14.1
    /// for the calendar item shape this crate emits.
    V16_0,
}

impl ServerVersion {
    /// Parses the `MS-ASProtocolVersion` header value returned by `OPTIONS`.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        match header.trim() {
            "12.0" | "12.1" => Some(Self::V12_1),
            "14.0" => Some(Self::V14_0),
            "14.1" => Some(Self::V14_1),
            other if other.starts_with("16.") => Some(Self::V16_0),
            _ => None,
        }
    }

    /// `true` for 14.1 and later, where bodies are carried in the
    /// `AirSyncBase:Body` container rather than as bare text.
    #[must_use]
    pub const fn uses_airsyncbase_body(self) -> bool {
        !matches!(self, Self::V12_1 | Self::V14_0)
    }

    /// The literal header value to send back on every subsequent request.
    #[must_use]
    pub const fn as_header_value(self) -> &'static str {
        match self {
            Self::V12_1 => "12.1",
            Self::V14_0 => "14.0",
            Self::V14_1 => "14.1",
            Self::V16_0 => "16.1",
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header_value())
    }
}

/// Opaque PolicyKey issued by the server at the end of MS-ASPROV Phase 2,
/// echoed on every subsequent request via `X-MS-PolicyKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyKey(pub String);

impl PolicyKey {
    /// The sentinel value sent before any policy has been acknowledged.
    #[must_use]
    pub fn unprovisioned() -> Self {
        Self("0".to_string())
    }

    /// `true` for the `"0"` sentinel.
    #[must_use]
    pub fn is_unprovisioned(&self) -> bool {
        self.0 == "0"
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A server-maintained cursor for a single collection's `Sync` command.
///
/// `"0"` means "no state, perform an initial sync"; any other value is an
/// opaque token that must be echoed back unmodified on the next request and
/// replaced wholesale with whatever the server returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKey(pub String);

impl SyncKey {
    /// The initial value before any successful `Sync` round-trip.
    #[must_use]
    pub fn initial() -> Self {
        Self("0".to_string())
    }

    /// `true` for the `"0"` sentinel.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.0 == "0"
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A calendar folder resolved via `FolderSync`, identified by its
/// server-assigned `ServerId` (the well-known `"1"` for the default
/// calendar folder under most accounts, but never assumed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Opaque server identifier, the `ServerId` used as `CollectionId` in `Sync`.
    pub server_id: String,
    /// Parent folder `ServerId`, `"0"` for top-level folders.
    pub parent_id: String,
    /// Display name as returned by `FolderSync`.
    pub display_name: String,
    /// `MS-ASCMD` folder type; `8` is the default calendar folder.
    pub folder_type: u32,
}

impl Folder {
    /// The `FolderHierarchy:Type` code for a user-created calendar folder.
    pub const TYPE_USER_CALENDAR: u32 = 13;
    /// The `FolderHierarchy:Type` code for the default calendar folder.
    pub const TYPE_DEFAULT_CALENDAR: u32 = 8;

    /// `true` if this folder's type denotes a calendar collection.
    #[must_use]
    pub const fn is_calendar(&self) -> bool {
        matches!(self.folder_type, Self::TYPE_DEFAULT_CALENDAR | Self::TYPE_USER_CALENDAR)
    }
}

/// Attendee response status, `Calendar:Attendees/Attendee/AttendeeStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttendeeStatus {
    /// Response not yet received.
    Unknown = 0,
    /// Attendee has tentatively accepted.
    Tentative = 2,
    /// Attendee has accepted.
    Accepted = 3,
    /// Attendee has declined.
    Declined = 4,
    /// Meeting not yet responded to.
    NotResponded = 5,
}

impl AttendeeStatus {
    /// Parses the integer `AttendeeStatus` element text.
    #[must_use]
    pub fn from_wire(code: u32) -> Self {
        match code {
            2 => Self::Tentative,
            3 => Self::Accepted,
            4 => Self::Declined,
            5 => Self::NotResponded,
            _ => Self::Unknown,
        }
    }

    /// Returns the integer form sent on the wire.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        self as u32
    }
}

/// A meeting attendee, `Calendar:Attendees/Attendee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// `Attendees:Email`.
    pub email: String,
    /// `Attendees:Name`, optional on the wire but always populated here.
    pub name: String,
    /// `Attendees:AttendeeType`: `1` required, `2` optional, `3` resource.
    pub attendee_type: u32,
    /// `Attendees:AttendeeStatus`, absent on requests the client sends.
    pub status: Option<AttendeeStatus>,
}

/// Recurrence rule, a reduced projection of `Calendar:Recurrence` covering
/// the MS-ASCAL recurrence types this crate round-trips; exotic monthly/
/// yearly "nth weekday" patterns are passed through opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// `Recurrence:Type`: 0 daily, 1 weekly, 2 monthly, 3 monthly-nth, 5 yearly, 6 yearly-nth.
    pub recurrence_type: u32,
    /// `Recurrence:Interval`.
    pub interval: u32,
    /// `Recurrence:Until`, inclusive end date in UTC, if bounded.
    pub until: Option<DateTime<Utc>>,
    /// `Recurrence:Occurrences`, if bounded by count instead of date.
    pub occurrences: Option<u32>,
    /// `Recurrence:DayOfWeek` bitmask for weekly/monthly-nth/yearly-nth rules.
    pub day_of_week: Option<u32>,
}

/// A single calendar event as exchanged over `Calendar:` elements.
///
/// Server identity (`ServerId`) is absent on events the client is about to
/// `Add`; it is populated from the server's `Sync` response once the add is
/// acknowledged. See [`crate::calendar::sync_key`] for the add/ack lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Server-assigned item id within the collection; `None` for a pending `Add`.
    pub server_id: Option<String>,
    /// `Calendar:Subject`.
    pub subject: String,
    /// `Calendar:Location`, if set.
    pub location: Option<String>,
    /// `Calendar:StartTime`, UTC.
    pub start: DateTime<Utc>,
    /// `Calendar:EndTime`, UTC.
    pub end: DateTime<Utc>,
    /// `Calendar:AllDayEvent`.
    pub all_day: bool,
    /// Body text; carried as plain text pre-14.1 and as `AirSyncBase:Body`
    /// type 1 (plain text) post-14.1 — see [`ServerVersion::uses_airsyncbase_body`].
    pub body: Option<String>,
    /// `Calendar:Attendees`.
    pub attendees: Vec<Attendee>,
    /// `Calendar:Recurrence`, if the event repeats.
    pub recurrence: Option<Recurrence>,
    /// `Calendar:BusyStatus`: 0 free, 1 tentative, 2 busy, 3 out of office.
    pub busy_status: u32,
    /// `Calendar:Sensitivity`: 0 normal, 1 personal, 2 private, 3 confidential.
    pub sensitivity: u32,
    /// `Calendar:UID`, the iCalendar UID used to correlate with EWS items.
    pub uid: String,
    /// `Calendar:Reminder`, minutes before `start` the reminder fires; absent
    /// when the event has no reminder set.
    pub reminder_min: Option<u32>,
}

/// An EWS item identifier pair (`Id` + `ChangeKey`), opaque outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EwsItemId {
    /// `ItemId/@Id`.
    pub id: String,
    /// `ItemId/@ChangeKey`, required on `UpdateItem`/`DeleteItem`.
    pub change_key: String,
}

/// Account credentials and identity used to derive NTLMv2 responses and to
/// populate the EAS `DeviceId`/`DeviceType` query parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    /// NTLM domain, may be empty for a UPN-style login.
    pub domain: String,
    /// NTLM username, or the full UPN if `domain` is empty.
    pub username: String,
    /// Plaintext password, used transiently to derive the NTOWFv2 key; never logged.
    #[serde(skip_serializing)]
    pub password: String,
    /// Stable per-installation identifier sent as the EAS `DeviceId` parameter.
    pub device_id: String,
    /// EAS `DeviceType`, e.g. `"measync"`.
    pub device_type: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("device_type", &self.device_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_version_parses_known_headers() {
        assert_eq!(ServerVersion::parse("12.1"), Some(ServerVersion::V12_1));
        assert_eq!(ServerVersion::parse("14.0"), Some(ServerVersion::V14_0));
        assert_eq!(ServerVersion::parse("14.1"), Some(ServerVersion::V14_1));
        assert_eq!(ServerVersion::parse("16.1"), Some(ServerVersion::V16_0));
        assert_eq!(ServerVersion::parse("9.9"), None);
    }

    #[test]
    fn airsyncbase_cutover_is_14_1() {
        assert!(!ServerVersion::V12_1.uses_airsyncbase_body());
        assert!(!ServerVersion::V14_0.uses_airsyncbase_body());
        assert!(ServerVersion::V14_1.uses_airsyncbase_body());
        assert!(ServerVersion::V16_0.uses_airsyncbase_body());
    }

    #[test]
    fn sync_key_initial_sentinel() {
        assert!(SyncKey::initial().is_initial());
        assert!(!SyncKey("17".to_string()).is_initial());
    }

    #[test]
    fn folder_calendar_type_detection() {
        let f = Folder {
            server_id: "1".into(),
            parent_id: "0".into(),
            display_name: "Calendar".into(),
            folder_type: Folder::TYPE_DEFAULT_CALENDAR,
        };
        assert!(f.is_calendar());
    }
}
