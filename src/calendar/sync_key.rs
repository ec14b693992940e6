//! `Sync` command construction and the bounded SyncKey-advancement loop.
//!
//! The loop shape follows §4.5.2 of the specification exactly: start from
//! `SyncKey("0")`, issue one initial `Sync` to obtain the first real key,
//! then repeat with `GetChanges` while the server reports `MoreAvailable`,
//! up to `max_iterations` round-trips. The most-recently observed key is
//! always retained even on a mid-loop error, so a caller that wants a
//! best-effort retry does not have to start over from `"0"`.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::model::SyncKey;
use crate::transport::Transport;
use crate::wbxml::{decode, encode, CodePage, WbxmlEvent};

use super::parse::{build_tree, Node};

/// The WBXML `Sync` window size this crate requests; MS-ASCMD requires
/// `window_size >= 1`, and some servers reject `0` outright.
pub const DEFAULT_WINDOW_SIZE: u32 = 100;

/// One batch returned by a single `Sync` round-trip.
pub struct SyncBatch {
    /// The key to use on the *next* request.
    pub next_key: SyncKey,
    /// Whether another round-trip is needed to drain the collection.
    pub more_available: bool,
    /// The server-initiated `<Add>`/`<Change>`/`<Delete>` nodes under
    /// `<Commands>` — changes the server is pushing to the client.
    pub commands: Vec<Node>,
    /// The per-item acknowledgement nodes under `<Responses>` — the
    /// status (and, for `Add`, the assigned `ServerId`) for mutations the
    /// *client* submitted on this same request. Per MS-ASCMD §2.2.3.152
    /// these live in a sibling element to `<Commands>`, never inside it.
    pub responses: Vec<Node>,
}

/// Advances `key` to stability for `collection_id`: issues the initial
/// `Sync(key="0")` if starting fresh, then drains `MoreAvailable` batches,
/// returning the final key once the server reports no more data.
///
/// Per the specification this bounds iterations at `config.max_sync_iterations`
/// and surfaces [`ErrorKind::Logic`] if the bound is exceeded without
/// convergence — a non-terminating `MoreAvailable` stream is a server or
/// client bug, not something to retry forever.
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
/// underlying transport, [`ErrorKind::Parse`] on a malformed response,
/// [`ErrorKind::ProtocolStatus`] on a non-1 `Sync` Status, and
/// [`ErrorKind::Logic`] if the iteration bound is exhausted.
pub async fn advance_to_stability<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    config: &EngineConfig,
) -> Result<(SyncKey, Vec<Node>)> {
    let mut key = SyncKey::initial();
    let mut collected = Vec::new();

    let initial = sync_once(client, collection_id, &key, false, DEFAULT_WINDOW_SIZE).await?;
    key = initial.next_key;
    collected.extend(initial.commands);

    let mut iterations = 0u32;
    let mut more = initial.more_available;
    while more {
        if iterations >= config.max_sync_iterations {
            return Err(Error::new(ErrorKind::Logic).with_context(format!(
                "Sync did not converge for collection {collection_id} after {iterations} iterations; retaining key {}",
                key.0
            )));
        }
        let batch = sync_once(client, collection_id, &key, true, DEFAULT_WINDOW_SIZE).await?;
        key = batch.next_key;
        collected.extend(batch.commands);
        more = batch.more_available;
        iterations += 1;
    }

    Ok((key, collected))
}

/// Performs exactly one `Sync` round-trip, optionally carrying a
/// `<Commands>` block (used by Create/Update/Delete to piggyback a
/// mutation on an already-stable key) via `mutation`.
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
/// underlying transport, [`ErrorKind::Parse`] on malformed WBXML, and
/// [`ErrorKind::ProtocolStatus`] on a non-1 top-level `Sync` Status.
pub async fn sync_once<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    key: &SyncKey,
    get_changes: bool,
    window_size: u32,
) -> Result<SyncBatch> {
    sync_with_mutation(client, collection_id, key, get_changes, window_size, None).await
}

/// Like [`sync_once`] but allows attaching a pre-built `<Commands>`
/// element stream (an `<Add>`/`<Change>`/`<Delete>` envelope) to the
/// request's `<Collection>`, as Create/Update/Delete do once their
/// SyncKey is stable.
///
/// # Errors
///
/// See [`sync_once`].
pub async fn sync_with_mutation<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    key: &SyncKey,
    get_changes: bool,
    window_size: u32,
    mutation: Option<Vec<WbxmlEvent>>,
) -> Result<SyncBatch> {
    let body = build_sync_request(collection_id, key, get_changes, window_size, mutation);
    let response = client.post_command("Sync", body).await?;

    if response.status != 200 {
        return Err(Error::new(ErrorKind::Transport)
            .with_context(format!("Sync HTTP status {}", response.status)));
    }

    if response.body.is_empty() {
        // An empty body on Sync means "no changes", per MS-ASCMD; the
        // client's key does not advance.
        return Ok(SyncBatch {
            next_key: key.clone(),
            more_available: false,
            commands: Vec::new(),
            responses: Vec::new(),
        });
    }

    let events = decode(&response.body)?;
    parse_sync_response(&events, key)
}

fn build_sync_request(
    collection_id: &str,
    key: &SyncKey,
    get_changes: bool,
    window_size: u32,
    mutation: Option<Vec<WbxmlEvent>>,
) -> Vec<u8> {
    let page = CodePage::AirSync;
    let mut events = vec![
        WbxmlEvent::start(page, "Sync"),
        WbxmlEvent::start(page, "Collections"),
        WbxmlEvent::start(page, "Collection"),
        WbxmlEvent::start(page, "SyncKey"),
        WbxmlEvent::Text(key.0.clone()),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "CollectionId"),
        WbxmlEvent::Text(collection_id.to_string()),
        WbxmlEvent::End,
    ];

    if get_changes {
        events.push(WbxmlEvent::start(page, "GetChanges"));
        events.push(WbxmlEvent::Text("1".to_string()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::start(page, "WindowSize"));
        events.push(WbxmlEvent::Text(window_size.to_string()));
        events.push(WbxmlEvent::End);
    }

    if let Some(commands) = mutation {
        events.push(WbxmlEvent::start(page, "Commands"));
        events.extend(commands);
        events.push(WbxmlEvent::End);
    }

    events.push(WbxmlEvent::End); // Collection
    events.push(WbxmlEvent::End); // Collections
    events.push(WbxmlEvent::End); // Sync

    encode(&events).expect("well-formed Sync request always encodes")
}

fn parse_sync_response(events: &[WbxmlEvent], previous_key: &SyncKey) -> Result<SyncBatch> {
    let roots = build_tree(events);
    let sync = roots
        .iter()
        .find(|n| n.name == "Sync")
        .ok_or_else(|| Error::new(ErrorKind::Parse).with_context("Sync response missing <Sync>"))?;

    let top_status: u32 = sync
        .text_of_first(&["Status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    if top_status != 1 {
        return Err(Error::protocol_status("Sync", top_status));
    }

    let collection = sync
        .child("Collections")
        .and_then(|c| c.child("Collection"))
        .ok_or_else(|| Error::new(ErrorKind::Parse).with_context("Sync response missing <Collection>"))?;

    let collection_status: u32 = collection
        .text_of_first(&["Status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    if collection_status != 1 {
        return Err(Error::protocol_status("Sync", collection_status));
    }

    let next_key = collection
        .text_of_first(&["SyncKey"])
        .map(|s| SyncKey(s.to_string()))
        .unwrap_or_else(|| previous_key.clone());

    let more_available = collection.child("MoreAvailable").is_some();

    let commands = collection
        .child("Commands")
        .map(|c| {
            c.children
                .iter()
                .filter(|n| matches!(n.name.as_str(), "Add" | "Change" | "Delete"))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let responses = collection
        .child("Responses")
        .map(|c| {
            c.children
                .iter()
                .filter(|n| matches!(n.name.as_str(), "Add" | "Change" | "Delete"))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Ok(SyncBatch {
        next_key,
        more_available,
        commands,
        responses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;
    use crate::transport::{EasClient, MockTransport, TransportResponse};
    use std::collections::HashMap;

    fn account() -> Account {
        Account {
            domain: "CONTOSO".into(),
            username: "alice".into(),
            password: "hunter2".into(),
            device_id: "dev1".into(),
            device_type: "measync".into(),
        }
    }

    fn sync_response(key: &str, status: u32, more: bool) -> Vec<u8> {
        let page = CodePage::AirSync;
        let mut events = vec![
            WbxmlEvent::start(page, "Sync"),
            WbxmlEvent::start(page, "Collections"),
            WbxmlEvent::start(page, "Collection"),
            WbxmlEvent::start(page, "SyncKey"),
            WbxmlEvent::Text(key.to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text(status.to_string()),
            WbxmlEvent::End,
        ];
        if more {
            events.push(WbxmlEvent::start(page, "MoreAvailable"));
            events.push(WbxmlEvent::End);
        }
        events.push(WbxmlEvent::End); // Collection
        events.push(WbxmlEvent::End); // Collections
        events.push(WbxmlEvent::End); // Sync
        encode(&events).unwrap()
    }

    #[tokio::test]
    async fn advance_to_stability_drains_more_available() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: sync_response("1", 1, true),
        });
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: sync_response("2", 1, false),
        });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let config = EngineConfig::new("https://mail.example.com/eas", account());
        let (key, _) = advance_to_stability(&client, "1", &config).await.unwrap();
        assert_eq!(key.0, "2");
    }

    #[tokio::test]
    async fn responses_and_commands_are_kept_separate() {
        let page = CodePage::AirSync;
        let body = encode(&[
            WbxmlEvent::start(page, "Sync"),
            WbxmlEvent::start(page, "Collections"),
            WbxmlEvent::start(page, "Collection"),
            WbxmlEvent::start(page, "SyncKey"),
            WbxmlEvent::Text("2".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text("1".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Responses"),
            WbxmlEvent::start(page, "Add"),
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text("1".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::End, // Add
            WbxmlEvent::End, // Responses
            WbxmlEvent::start(page, "Commands"),
            WbxmlEvent::start(page, "Add"),
            WbxmlEvent::start(page, "ServerId"),
            WbxmlEvent::Text("42:7".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::End, // Add
            WbxmlEvent::End, // Commands
            WbxmlEvent::End, // Collection
            WbxmlEvent::End, // Collections
            WbxmlEvent::End, // Sync
        ])
        .unwrap();

        let mock = MockTransport::new();
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let batch = sync_once(&client, "1", &SyncKey::initial(), false, DEFAULT_WINDOW_SIZE).await.unwrap();

        assert_eq!(batch.commands.len(), 1);
        assert_eq!(batch.commands[0].text_of_first(&["ServerId"]), Some("42:7"));
        assert_eq!(batch.responses.len(), 1);
        assert_eq!(batch.responses[0].text_of_first(&["Status"]), Some("1"));
    }

    #[tokio::test]
    async fn non_success_status_is_protocol_error() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: sync_response("1", 3, false),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let config = EngineConfig::new("https://mail.example.com/eas", account());
        let err = advance_to_stability(&client, "1", &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolStatus);
    }

    #[tokio::test]
    async fn iteration_bound_is_enforced() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: sync_response("1", 1, true),
        });
        for _ in 0..5 {
            mock.push_response(TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: sync_response("1", 1, true),
            });
        }
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let mut config = EngineConfig::new("https://mail.example.com/eas", account());
        config.max_sync_iterations = 3;
        let err = advance_to_stability(&client, "1", &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }
}
