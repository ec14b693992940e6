//! `Sync`/`<Change>` calendar item update, with the EAS-version dialect
//! switch from §4.5.4.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{CalendarEvent, ServerVersion};
use crate::transport::Transport;
use crate::wbxml::{CodePage, WbxmlEvent};

use super::parse::{format_eas_datetime, xml_unescape};
use super::sync_key::{sync_once, sync_with_mutation, DEFAULT_WINDOW_SIZE};

/// Updates `server_id` in `collection_id` with the contents of `event`.
///
/// Does not require the SyncKey to be fully advanced to stability (unlike
/// Create/Delete); a single freshening `Sync` with no `GetChanges` is
/// enough to obtain a usable key, per §4.5.4.
///
/// The emitted field set depends on `version`: EAS 12.x omits
/// `Body`/`MeetingStatus`/`Attendees` entirely (their presence causes a
/// `Status=6` conversion error on those servers), while 14.x and later
/// include the full set.
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
/// transport, [`ErrorKind::Parse`] on malformed WBXML, and
/// [`ErrorKind::ProtocolStatus`] for any `<Change>` response `Status`
/// other than `1` (success), `7` (conflict, server wins — treated as
/// success from the caller's perspective), since the specification maps
/// only `6` and `8` to hard failures and `7` to an accepted conflict
/// resolution.
pub async fn update_event<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    server_id: &str,
    event: &CalendarEvent,
    version: ServerVersion,
    config: &EngineConfig,
) -> Result<()> {
    let _ = config;
    let fresh = sync_once(client, collection_id, &crate::model::SyncKey::initial(), false, DEFAULT_WINDOW_SIZE).await?;
    let key = fresh.next_key;

    let change = build_change_commands(server_id, event, version);
    let batch = sync_with_mutation(client, collection_id, &key, false, DEFAULT_WINDOW_SIZE, Some(change)).await?;

    let responses_change = batch
        .responses
        .iter()
        .find(|n| n.name == "Change" && n.text_of_first(&["ServerId"]) == Some(server_id));

    let Some(change_response) = responses_change else {
        // No per-item Change entry in the response: MS-ASCMD §2.2.3.152
        // says the server SHOULD omit it on success.
        return Ok(());
    };

    let status: u32 = change_response
        .text_of_first(&["Status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    match status {
        1 | 7 => Ok(()),
        other => Err(Error::new(ErrorKind::ProtocolStatus).with_context(format!("Change Status={other}"))),
    }
}

fn build_change_commands(server_id: &str, event: &CalendarEvent, version: ServerVersion) -> Vec<WbxmlEvent> {
    let air = CodePage::AirSync;
    let cal = CodePage::Calendar;
    let asb = CodePage::AirSyncBase;

    let mut events = vec![
        WbxmlEvent::start(air, "Change"),
        WbxmlEvent::start(air, "ServerId"),
        WbxmlEvent::Text(server_id.to_string()),
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

    if version.uses_airsyncbase_body() {
        push_leaf(
            &mut events,
            cal,
            "MeetingStatus",
            if event.attendees.is_empty() { "0" } else { "1" },
        );

        if let Some(body) = &event.body {
            events.push(WbxmlEvent::start(asb, "Body"));
            push_leaf(&mut events, asb, "Type", "1");
            push_leaf(&mut events, asb, "Data", &xml_unescape(body));
            events.push(WbxmlEvent::End);
        }

        if !event.attendees.is_empty() {
            events.push(WbxmlEvent::start(cal, "Attendees"));
            for attendee in &event.attendees {
                events.push(WbxmlEvent::start(cal, "Attendee"));
                push_leaf(&mut events, cal, "Attendee_Email", &attendee.email);
                if !attendee.name.is_empty() {
                    push_leaf(&mut events, cal, "Attendee_Name", &attendee.name);
                }
                push_leaf(&mut events, cal, "Attendee_Type", "1");
                events.push(WbxmlEvent::End);
            }
            events.push(WbxmlEvent::End);
        }
    }

    events.push(WbxmlEvent::End); // ApplicationData
    events.push(WbxmlEvent::End); // Change
    events
}

fn push_leaf(events: &mut Vec<WbxmlEvent>, page: CodePage, name: &'static str, text: &str) {
    events.push(WbxmlEvent::start(page, name));
    events.push(WbxmlEvent::Text(text.to_string()));
    events.push(WbxmlEvent::End);
}
