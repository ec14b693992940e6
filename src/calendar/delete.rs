//! `Sync`/`<Delete>` calendar item deletion, with the one-shot
//! stale-SyncKey retry from §4.5.5.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;
use crate::wbxml::{CodePage, WbxmlEvent};

use super::sync_key::{advance_to_stability, sync_with_mutation, DEFAULT_WINDOW_SIZE};

/// The MS-ASCMD `Status` code meaning "invalid synchronization key".
const STATUS_INVALID_SYNC_KEY: u32 = 3;
/// The MS-ASCMD `Status` code meaning "object not found" — already gone
/// is treated as a successful delete.
const STATUS_OBJECT_NOT_FOUND: u32 = 8;

/// Deletes `server_id` from `collection_id`.
///
/// Advances the SyncKey to stability first (same rationale as Create: a
/// stale key is rejected outright). If the server responds `Status=3`
/// (stale key) the SyncKey is reset to `"0"`, re-advanced, and the delete
/// is retried exactly once — per §4.5.5 this bound prevents livelock
/// against a server that never converges.
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
/// transport, [`ErrorKind::Parse`] on malformed WBXML, and
/// [`ErrorKind::ProtocolStatus`] for any response `Status` other than `1`
/// or `8` on the final attempt.
pub async fn delete_event<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    server_id: &str,
    config: &EngineConfig,
) -> Result<()> {
    match try_delete_once(client, collection_id, server_id, config).await {
        Ok(()) => Ok(()),
        Err(err) if is_stale_sync_key(&err) => {
            try_delete_once(client, collection_id, server_id, config).await
        }
        Err(err) => Err(err),
    }
}

fn is_stale_sync_key(err: &crate::error::Error) -> bool {
    err.kind() == ErrorKind::ProtocolStatus
        && err
            .context()
            .is_some_and(|c| c.contains(&format!("Status={STATUS_INVALID_SYNC_KEY}")))
}

async fn try_delete_once<T: Transport>(
    client: &crate::transport::EasClient<T>,
    collection_id: &str,
    server_id: &str,
    config: &EngineConfig,
) -> Result<()> {
    let (key, _) = advance_to_stability(client, collection_id, config).await?;

    let page = CodePage::AirSync;
    let delete = vec![
        WbxmlEvent::start(page, "Delete"),
        WbxmlEvent::start(page, "ServerId"),
        WbxmlEvent::Text(server_id.to_string()),
        WbxmlEvent::End,
        WbxmlEvent::End,
    ];

    let batch = sync_with_mutation(client, collection_id, &key, false, DEFAULT_WINDOW_SIZE, Some(delete)).await?;

    let response = batch
        .responses
        .iter()
        .find(|n| n.name == "Delete" && n.text_of_first(&["ServerId"]) == Some(server_id));

    let Some(response) = response else {
        return Ok(());
    };

    let status: u32 = response
        .text_of_first(&["Status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    match status {
        1 | STATUS_OBJECT_NOT_FOUND => Ok(()),
        other => Err(Error::protocol_status("Delete", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;
    use crate::transport::{EasClient, MockTransport, TransportResponse};
    use crate::wbxml::encode;
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

    fn stable_key_response(key: &str) -> Vec<u8> {
        let page = CodePage::AirSync;
        encode(&[
            WbxmlEvent::start(page, "Sync"),
            WbxmlEvent::start(page, "Collections"),
            WbxmlEvent::start(page, "Collection"),
            WbxmlEvent::start(page, "SyncKey"),
            WbxmlEvent::Text(key.to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text("1".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
        ])
        .unwrap()
    }

    fn delete_response(server_id: &str, status: u32) -> Vec<u8> {
        let page = CodePage::AirSync;
        encode(&[
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
            WbxmlEvent::start(page, "Delete"),
            WbxmlEvent::start(page, "ServerId"),
            WbxmlEvent::Text(server_id.to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text(status.to_string()),
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
            WbxmlEvent::End,
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn successful_delete_on_first_attempt() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: stable_key_response("1") });
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: delete_response("42:1", 1) });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let config = EngineConfig::new("https://mail.example.com/eas", account());
        delete_event(&client, "1", "42:1", &config).await.unwrap();
        assert_eq!(client.transport().request_count(), 2);
    }

    #[tokio::test]
    async fn stale_key_triggers_exactly_one_retry() {
        let mock = MockTransport::new();
        // First attempt: advance, then Delete returns Status=3.
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: stable_key_response("1") });
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: delete_response("42:1", 3) });
        // Retry: advance again, then Delete succeeds.
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: stable_key_response("1") });
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: delete_response("42:1", 1) });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let config = EngineConfig::new("https://mail.example.com/eas", account());
        delete_event(&client, "1", "42:1", &config).await.unwrap();
        assert_eq!(client.transport().request_count(), 4);
    }

    #[tokio::test]
    async fn not_found_is_treated_as_success() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: stable_key_response("1") });
        mock.push_response(TransportResponse { status: 200, headers: HashMap::new(), body: delete_response("42:1", 8) });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let config = EngineConfig::new("https://mail.example.com/eas", account());
        delete_event(&client, "1", "42:1", &config).await.unwrap();
    }
}
