//! `Sync`/`<Add>` calendar item creation.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{Attendee, CalendarEvent};
use crate::rand_bytes;
use crate::transport::Transport;
use crate::wbxml::{CodePage, WbxmlEvent};

use super::parse::{format_eas_datetime, xml_unescape};
use super::sync_key::{advance_to_stability, sync_with_mutation, DEFAULT_WINDOW_SIZE};

/// Creates `event` in `collection_id`.
///
/// Per §4.5.3, the SyncKey is advanced to stability first — Exchange 2007
/// SP1 rejects an `<Add>` sent against a stale key — and the request
/// always includes the full field set (`Body`/`MeetingStatus`/`Attendees`
/// are never dialect-gated on create, only on update).
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
/// transport, [`ErrorKind::Parse`] on malformed WBXML, and
/// [`ErrorKind::ProtocolStatus`] if the server rejects the `<Add>`.
pub async fn create_event<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    event: &CalendarEvent,
    config: &EngineConfig,
) -> Result<String> {
    let (key, _) = advance_to_stability(client, collection_id, config).await?;

    let client_id = rand_bytes::client_id()?;
    let add = build_add_commands(&client_id, event);

    let batch = sync_with_mutation(
        client,
        collection_id,
        &key,
        false,
        DEFAULT_WINDOW_SIZE,
        Some(add),
    )
    .await?;

    // Per MS-ASCMD §2.2.3.152, a successful Add response omits the
    // per-item entry entirely when the collection already carries the
    // CollectionId/SyncKey; Exchange in practice does emit a <Responses>
    // with the new ServerId, so we look for it and fall back to the
    // client-generated id if the server elides it. The ack lives under
    // <Responses>, not <Commands> (that holds server-initiated changes).
    for node in &batch.responses {
        if node.name != "Add" {
            continue;
        }
        let matches_client_id = node.text_of_first(&["ClientId"]) == Some(client_id.as_str());
        if !matches_client_id {
            continue;
        }
        let status: u32 = node
            .text_of_first(&["Status"])
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        if status != 1 {
            return Err(Error::protocol_status("Add", status));
        }
        if let Some(server_id) = node.text_of_first(&["ServerId"]) {
            return Ok(server_id.to_string());
        }
    }

    Ok(client_id)
}

fn build_add_commands(client_id: &str, event: &CalendarEvent) -> Vec<WbxmlEvent> {
    let air = CodePage::AirSync;
    let cal = CodePage::Calendar;
    let asb = CodePage::AirSyncBase;

    let mut events = vec![
        WbxmlEvent::start(air, "Add"),
        WbxmlEvent::start(air, "ClientId"),
        WbxmlEvent::Text(client_id.to_string()),
        WbxmlEvent::End,
        WbxmlEvent::start(air, "ApplicationData"),
    ];

    push_leaf(&mut events, cal, "Subject", &event.subject);
    push_leaf(&mut events, cal, "StartTime", &format_eas_datetime(event.start));
    push_leaf(&mut events, cal, "EndTime", &format_eas_datetime(event.end));
    if let Some(location) = &event.location {
        push_leaf(&mut events, cal, "Location", location);
    }
    push_leaf(&mut events, cal, "AllDayEvent", if event.all_day { "1" } else { "0" });
    push_leaf(&mut events, cal, "BusyStatus", &event.busy_status.to_string());
    push_leaf(&mut events, cal, "Sensitivity", &event.sensitivity.to_string());
    if let Some(reminder_min) = event.reminder_min {
        push_leaf(&mut events, cal, "Reminder", &reminder_min.to_string());
    }
    push_leaf(
        &mut events,
        cal,
        "MeetingStatus",
        if event.attendees.is_empty() { "0" } else { "1" },
    );

    if let Some(body) = &event.body {
        events.push(WbxmlEvent::start(asb, "Body"));
        push_leaf(&mut events, asb, "Type", "1");
        push_leaf(&mut events, asb, "Data", &xml_unescape_roundtrip(body));
        events.push(WbxmlEvent::End);
    }

    if !event.attendees.is_empty() {
        events.push(WbxmlEvent::start(cal, "Attendees"));
        for attendee in &event.attendees {
            push_attendee(&mut events, cal, attendee);
        }
        events.push(WbxmlEvent::End);
    }

    events.push(WbxmlEvent::End); // ApplicationData
    events.push(WbxmlEvent::End); // Add
    events
}

fn push_attendee(events: &mut Vec<WbxmlEvent>, page: CodePage, attendee: &Attendee) {
    events.push(WbxmlEvent::start(page, "Attendee"));
    push_leaf(events, page, "Attendee_Email", &attendee.email);
    if !attendee.name.is_empty() {
        push_leaf(events, page, "Attendee_Name", &attendee.name);
    }
    push_leaf(events, page, "Attendee_Type", "1");
    events.push(WbxmlEvent::End);
}

fn push_leaf(events: &mut Vec<WbxmlEvent>, page: CodePage, name: &'static str, text: &str) {
    events.push(WbxmlEvent::start(page, name));
    events.push(WbxmlEvent::Text(text.to_string()));
    events.push(WbxmlEvent::End);
}

/// Body text is carried verbatim; WBXML `STR_I` content needs no XML
/// escaping (unlike the textual bridge), so this only strips any
/// already-escaped entities a caller might have pre-escaped by habit.
fn xml_unescape_roundtrip(body: &str) -> String {
    xml_unescape(body)
}
