//! Calendar folder discovery via `FolderSync`.

use crate::error::{Error, ErrorKind, Result};
use crate::model::Folder;
use crate::transport::Transport;
use crate::wbxml::{decode, encode, CodePage, WbxmlEvent};

use super::parse::build_tree;

/// Performs an initial `FolderSync(SyncKey="0")` and returns the first
/// folder whose type is the default calendar folder (`8`).
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the transport,
/// [`ErrorKind::Parse`] on malformed WBXML, [`ErrorKind::ProtocolStatus`]
/// on a non-1 `Status`, and [`ErrorKind::Logic`] if no calendar folder is
/// present in the hierarchy.
pub async fn discover_calendar_folder<T: Transport>(
    client: &crate::transport::EasClient<T>,
) -> Result<Folder> {
    let page = CodePage::FolderHierarchy;
    let request = encode(&[
        WbxmlEvent::start(page, "FolderSync"),
        WbxmlEvent::start(page, "SyncKey"),
        WbxmlEvent::Text("0".to_string()),
        WbxmlEvent::End,
        WbxmlEvent::End,
    ])
    .expect("well-formed FolderSync request always encodes");

    let response = client.post_command("FolderSync", request).await?;
    if response.status != 200 {
        return Err(Error::new(ErrorKind::Transport)
            .with_context(format!("FolderSync HTTP status {}", response.status)));
    }

    let events = decode(&response.body)?;
    let roots = build_tree(&events);
    let folder_sync = roots
        .iter()
        .find(|n| n.name == "FolderSync")
        .ok_or_else(|| Error::new(ErrorKind::Parse).with_context("missing <FolderSync>"))?;

    let status: u32 = folder_sync
        .text_of_first(&["Status"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    if status != 1 {
        return Err(Error::protocol_status("FolderSync", status));
    }

    let changes = folder_sync
        .child("Changes")
        .ok_or_else(|| Error::new(ErrorKind::Parse).with_context("missing <Changes>"))?;

    for add in changes.children_named("Add") {
        let folder_type: u32 = add
            .text_of_first(&["Type"])
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if folder_type == Folder::TYPE_DEFAULT_CALENDAR || folder_type == Folder::TYPE_USER_CALENDAR {
            let server_id = add.text_of_first(&["ServerId"]).unwrap_or_default().to_string();
            let parent_id = add.text_of_first(&["ParentId"]).unwrap_or("0").to_string();
            let display_name = add.text_of_first(&["DisplayName"]).unwrap_or_default().to_string();
            return Ok(Folder {
                server_id,
                parent_id,
                display_name,
                folder_type,
            });
        }
    }

    Err(Error::new(ErrorKind::Logic).with_context("calendar folder not found in FolderSync response"))
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

    fn folder_sync_response(folders: &[(u32, &str, &str)]) -> Vec<u8> {
        let page = CodePage::FolderHierarchy;
        let mut events = vec![
            WbxmlEvent::start(page, "FolderSync"),
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text("1".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "SyncKey"),
            WbxmlEvent::Text("1".to_string()),
            WbxmlEvent::End,
            WbxmlEvent::start(page, "Changes"),
        ];
        for (ty, id, name) in folders {
            events.push(WbxmlEvent::start(page, "Add"));
            events.push(WbxmlEvent::start(page, "ServerId"));
            events.push(WbxmlEvent::Text((*id).to_string()));
            events.push(WbxmlEvent::End);
            events.push(WbxmlEvent::start(page, "ParentId"));
            events.push(WbxmlEvent::Text("0".to_string()));
            events.push(WbxmlEvent::End);
            events.push(WbxmlEvent::start(page, "DisplayName"));
            events.push(WbxmlEvent::Text((*name).to_string()));
            events.push(WbxmlEvent::End);
            events.push(WbxmlEvent::start(page, "Type"));
            events.push(WbxmlEvent::Text(ty.to_string()));
            events.push(WbxmlEvent::End);
            events.push(WbxmlEvent::End); // Add
        }
        events.push(WbxmlEvent::End); // Changes
        events.push(WbxmlEvent::End); // FolderSync
        encode(&events).unwrap()
    }

    #[tokio::test]
    async fn finds_default_calendar_folder() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: folder_sync_response(&[(2, "2", "Inbox"), (8, "1", "Calendar")]),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let folder = discover_calendar_folder(&client).await.unwrap();
        assert_eq!(folder.server_id, "1");
        assert_eq!(folder.display_name, "Calendar");
    }

    #[tokio::test]
    async fn errors_when_no_calendar_folder_present() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: folder_sync_response(&[(2, "2", "Inbox")]),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let err = discover_calendar_folder(&client).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }
}
