//! EWS SOAP fallback for operations the active EAS dialect cannot express
//! or against pre-2010 servers with reduced calendar coverage.
//!
//! Unlike the EAS path this does not go through [`crate::transport::EasClient`]
//! (no `MS-ASProtocolVersion`/`X-MS-PolicyKey` headers, a different content
//! type, a `SOAPAction` header instead of a `Cmd` query parameter) but
//! drives the same NTLM two-leg handshake directly against the injected
//! [`Transport`].

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Account, CalendarEvent, EwsItemId, ServerVersion};
use crate::ntlm::Authenticator;
use crate::transport::{Transport, TransportRequest};

use super::parse::{format_ews_datetime, xml_unescape};

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const TYPES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/types";
const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";

/// An EWS-aware client, mirroring [`crate::transport::EasClient`]'s
/// responsibility (auth, headers) but for the SOAP surface.
pub struct EwsClient<T: Transport> {
    inner: T,
    endpoint: String,
    account: Account,
}

impl<T: Transport> EwsClient<T> {
    /// Wraps `inner` as an EWS client targeting `endpoint`.
    #[must_use]
    pub fn new(inner: T, endpoint: impl Into<String>, account: Account) -> Self {
        Self {
            inner,
            endpoint: endpoint.into(),
            account,
        }
    }

    /// Creates `event` via `CreateItem` and returns its [`EwsItemId`].
    ///
    /// If the response omits the `ItemId` (seen against some pre-2010
    /// servers under partial failure), a synthetic pending id is returned
    /// instead of failing outright, so the caller has a stable local
    /// handle until the next `FindItem`/`Sync` reconciles it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
    /// transport and [`ErrorKind::ProtocolStatus`] if `ResponseClass` is
    /// not `Success` or `ResponseCode` is not `NoError`.
    pub async fn create_item(&self, version: ServerVersion, event: &CalendarEvent, now_epoch_ms: u64) -> Result<EwsItemId> {
        let send_invitations = if event.attendees.is_empty() {
            "SendToNone"
        } else {
            "SendToAllAndSaveCopy"
        };
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:t="{TYPES_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Header><t:RequestServerVersion Version="{}"/></soap:Header>
  <soap:Body>
    <m:CreateItem SendMeetingInvitations="{send_invitations}">
      <m:SavedItemFolderId><t:DistinguishedFolderId Id="calendar"/></m:SavedItemFolderId>
      <m:Items>
        <t:CalendarItem>
          <t:Subject>{}</t:Subject>
          <t:Body BodyType="Text">{}</t:Body>
          <t:Start>{}</t:Start>
          <t:End>{}</t:End>
          <t:LegacyFreeBusyStatus>{}</t:LegacyFreeBusyStatus>
          <t:Location>{}</t:Location>
        </t:CalendarItem>
      </m:Items>
    </m:CreateItem>
  </soap:Body>
</soap:Envelope>"#,
            request_server_version(version),
            xml_escape(&event.subject),
            xml_escape(event.body.as_deref().unwrap_or("")),
            format_ews_datetime(event.start),
            format_ews_datetime(event.end),
            legacy_free_busy_status(event.busy_status),
            xml_escape(event.location.as_deref().unwrap_or("")),
        );

        let response = self.post_soap("CreateItem", body.into_bytes()).await?;
        let (response_class, response_code) = extract_response_status(&response)?;
        if response_class != "Success" || response_code != "NoError" {
            return Err(Error::new(ErrorKind::ProtocolStatus).with_context(format!(
                "CreateItem ResponseClass={response_class} ResponseCode={response_code}"
            )));
        }

        Ok(extract_item_id(&response).unwrap_or_else(|| EwsItemId {
            id: format!("pending_sync_{now_epoch_ms}"),
            change_key: String::new(),
        }))
    }

    /// Resolves an item by subject via `FindItem`, returning its full
    /// [`EwsItemId`] (id + change key) for use with `update_item`/`delete_item`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
    /// transport, and [`ErrorKind::Logic`] if no item matches `subject`.
    pub async fn find_item_by_subject(&self, subject: &str) -> Result<EwsItemId> {
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:t="{TYPES_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Body>
    <m:FindItem Traversal="Shallow">
      <m:ItemShape><t:BaseShape>IdOnly</t:BaseShape></m:ItemShape>
      <m:Restriction>
        <t:IsEqualTo>
          <t:FieldURI FieldURI="item:Subject"/>
          <t:FieldURIOrConstant><t:Constant Value="{}"/></t:FieldURIOrConstant>
        </t:IsEqualTo>
      </m:Restriction>
      <m:ParentFolderIds><t:DistinguishedFolderId Id="calendar"/></m:ParentFolderIds>
    </m:FindItem>
  </soap:Body>
</soap:Envelope>"#,
            xml_escape(subject),
        );

        let response = self.post_soap("FindItem", body.into_bytes()).await?;
        extract_item_id(&response)
            .ok_or_else(|| Error::new(ErrorKind::Logic).with_context(format!("no item found matching subject '{subject}'")))
    }

    /// Updates the item identified by `item_id` via `UpdateItem`, setting
    /// the Subject/Start/End/Location fields. This crate deliberately does
    /// not offer a Delete+Create fallback for update (see `DESIGN.md`);
    /// `UpdateItem` is the only path.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
    /// transport and [`ErrorKind::ProtocolStatus`] on a non-success response.
    pub async fn update_item(&self, item_id: &EwsItemId, event: &CalendarEvent) -> Result<()> {
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:t="{TYPES_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Body>
    <m:UpdateItem ConflictResolution="AlwaysOverwrite" SendMeetingInvitationsOrCancellations="SendToNone">
      <m:ItemChanges>
        <t:ItemChange>
          <t:ItemId Id="{}" ChangeKey="{}"/>
          <t:Updates>
            <t:SetItemField><t:FieldURI FieldURI="item:Subject"/><t:CalendarItem><t:Subject>{}</t:Subject></t:CalendarItem></t:SetItemField>
            <t:SetItemField><t:FieldURI FieldURI="calendar:Start"/><t:CalendarItem><t:Start>{}</t:Start></t:CalendarItem></t:SetItemField>
            <t:SetItemField><t:FieldURI FieldURI="calendar:End"/><t:CalendarItem><t:End>{}</t:End></t:CalendarItem></t:SetItemField>
            <t:SetItemField><t:FieldURI FieldURI="calendar:Location"/><t:CalendarItem><t:Location>{}</t:Location></t:CalendarItem></t:SetItemField>
          </t:Updates>
        </t:ItemChange>
      </m:ItemChanges>
    </m:UpdateItem>
  </soap:Body>
</soap:Envelope>"#,
            xml_escape(&item_id.id),
            xml_escape(&item_id.change_key),
            xml_escape(&event.subject),
            format_ews_datetime(event.start),
            format_ews_datetime(event.end),
            xml_escape(event.location.as_deref().unwrap_or("")),
        );

        let response = self.post_soap("UpdateItem", body.into_bytes()).await?;
        let (response_class, response_code) = extract_response_status(&response)?;
        if response_class != "Success" || response_code != "NoError" {
            return Err(Error::new(ErrorKind::ProtocolStatus).with_context(format!(
                "UpdateItem ResponseClass={response_class} ResponseCode={response_code}"
            )));
        }
        Ok(())
    }

    /// Deletes the item identified by `item_id` via `DeleteItem`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
    /// transport and [`ErrorKind::ProtocolStatus`] on a non-success response.
    pub async fn delete_item(&self, item_id: &EwsItemId) -> Result<()> {
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:t="{TYPES_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Body>
    <m:DeleteItem DeleteType="MoveToDeletedItems">
      <m:ItemIds><t:ItemId Id="{}" ChangeKey="{}"/></m:ItemIds>
    </m:DeleteItem>
  </soap:Body>
</soap:Envelope>"#,
            xml_escape(&item_id.id),
            xml_escape(&item_id.change_key),
        );

        let response = self.post_soap("DeleteItem", body.into_bytes()).await?;
        let (_, response_code) = extract_response_status(&response)?;
        if response_code != "NoError" {
            return Err(Error::new(ErrorKind::ProtocolStatus).with_context(format!("DeleteItem ResponseCode={response_code}")));
        }
        Ok(())
    }

    async fn post_soap(&self, operation: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/xml; charset=utf-8".to_string());
        headers.insert(
            "SOAPAction".to_string(),
            format!("\"{MESSAGES_NS}/{operation}\""),
        );

        let request = TransportRequest {
            url: self.endpoint.clone(),
            headers: headers.clone(),
            body: body.clone(),
        };
        let response = self.inner.send(request).await?;

        if response.status != 401 {
            return Ok(response.body);
        }

        let authenticator = Authenticator::new(&self.account);
        let mut leg1_headers = headers.clone();
        leg1_headers.insert("Authorization".to_string(), authenticator.negotiate_header());
        let leg1 = self
            .inner
            .send(TransportRequest {
                url: self.endpoint.clone(),
                headers: leg1_headers,
                body: Vec::new(),
            })
            .await?;

        let challenge = leg1
            .header("WWW-Authenticate")
            .filter(|h| h.starts_with("NTLM "))
            .ok_or_else(|| Error::new(ErrorKind::Auth).with_context("EWS NTLM leg 1 returned no Type 2 challenge"))?
            .to_string();
        let auth_header = authenticator.authenticate_header(&challenge)?;

        let mut leg2_headers = headers;
        leg2_headers.insert("Authorization".to_string(), auth_header);
        let leg2 = self
            .inner
            .send(TransportRequest {
                url: self.endpoint.clone(),
                headers: leg2_headers,
                body,
            })
            .await?;

        if leg2.status == 401 {
            return Err(Error::new(ErrorKind::Auth).with_context("EWS NTLM handshake rejected on second leg"));
        }
        Ok(leg2.body)
    }
}

fn request_server_version(version: ServerVersion) -> &'static str {
    match version {
        ServerVersion::V12_1 => "Exchange2007_SP1",
        ServerVersion::V14_0 | ServerVersion::V14_1 => "Exchange2010_SP1",
        ServerVersion::V16_0 => "Exchange2013",
    }
}

fn legacy_free_busy_status(busy_status: u32) -> &'static str {
    match busy_status {
        0 => "Free",
        1 => "Tentative",
        3 => "OOF",
        _ => "Busy",
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Extracts `(ResponseClass, ResponseCode)` from a SOAP response body by
/// walking its event stream, namespace-agnostically (EWS responses
/// qualify every element with the `m:`/`t:` prefixes declared on the
/// envelope, which this crate does not re-derive; it matches local names).
fn extract_response_status(body: &[u8]) -> Result<(String, String)> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::new(ErrorKind::Parse).with_context(format!("non-UTF-8 SOAP response: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut response_class = String::new();
    let mut response_code = String::new();
    let mut buf = Vec::new();
    let mut current_attr_class: Option<String> = None;
    let mut in_response_code = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let local = local_name(&e.name().as_ref());
                if local.ends_with("Response") || local.ends_with("ResponseMessage") {
                    for attr in e.attributes().flatten() {
                        if local_name(attr.key.as_ref()) == "ResponseClass" {
                            current_attr_class = Some(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
                in_response_code = local == "ResponseCode";
            }
            Ok(Event::Text(t)) => {
                if in_response_code && response_code.is_empty() {
                    response_code = t.unescape().map(|c| c.into_owned()).unwrap_or_default();
                }
            }
            Ok(Event::End(_)) => {
                in_response_code = false;
            }
            Ok(_) => {}
            Err(e) => return Err(Error::new(ErrorKind::Parse).with_context(e.to_string())),
        }
        buf.clear();
        if response_class.is_empty() {
            if let Some(class) = current_attr_class.take() {
                response_class = class;
            }
        }
    }

    if response_class.is_empty() || response_code.is_empty() {
        return Err(Error::new(ErrorKind::Parse).with_context("SOAP response missing ResponseClass/ResponseCode"));
    }

    Ok((response_class, response_code))
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn extract_item_id(body: &[u8]) -> Option<EwsItemId> {
    let text = std::str::from_utf8(body).ok()?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => return None,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == "ItemId" {
                    let mut id = None;
                    let mut change_key = None;
                    for attr in e.attributes().flatten() {
                        match local_name(attr.key.as_ref()).as_str() {
                            "Id" => id = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                            "ChangeKey" => change_key = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                            _ => {}
                        }
                    }
                    if let Some(id) = id {
                        return Some(EwsItemId {
                            id,
                            change_key: change_key.unwrap_or_default(),
                        });
                    }
                }
            }
            Ok(_) => {}
            Err(_) => return None,
        }
        buf.clear();
    }
}

/// Builds the `Authorization: Basic <...>` header some EWS deployments
/// accept alongside NTLM; unused by the default flow but kept for parity
/// with the base64-header construction used throughout this module.
#[allow(dead_code)]
fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportResponse};

    fn account() -> Account {
        Account {
            domain: "CONTOSO".into(),
            username: "alice".into(),
            password: "hunter2".into(),
            device_id: "dev1".into(),
            device_type: "measync".into(),
        }
    }

    fn sample_event() -> CalendarEvent {
        CalendarEvent {
            server_id: None,
            subject: "Standup".to_string(),
            location: Some("Room A".to_string()),
            start: chrono::Utc::now(),
            end: chrono::Utc::now(),
            all_day: false,
            body: Some("agenda".to_string()),
            attendees: Vec::new(),
            recurrence: None,
            busy_status: 2,
            sensitivity: 0,
            uid: String::new(),
            reminder_min: Some(15),
        }
    }

    fn create_item_response(id: &str, change_key: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:m="{MESSAGES_NS}" xmlns:t="{TYPES_NS}">
  <soap:Body>
    <m:CreateItemResponse>
      <m:ResponseMessages>
        <m:CreateItemResponseMessage ResponseClass="Success">
          <m:ResponseCode>NoError</m:ResponseCode>
          <m:Items><t:CalendarItem><t:ItemId Id="{id}" ChangeKey="{change_key}"/></t:CalendarItem></m:Items>
        </m:CreateItemResponseMessage>
      </m:ResponseMessages>
    </m:CreateItemResponse>
  </soap:Body>
</soap:Envelope>"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn create_item_extracts_item_id_on_success() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: create_item_response("AAA=", "BBB="),
        });
        let client = EwsClient::new(mock, "https://mail.example.com/ews", account());
        let item_id = client.create_item(ServerVersion::V14_1, &sample_event(), 123_456).await.unwrap();
        assert_eq!(item_id.id, "AAA=");
        assert_eq!(item_id.change_key, "BBB=");
    }

    #[tokio::test]
    async fn create_item_falls_back_to_pending_id_when_item_id_missing() {
        let mock = MockTransport::new();
        let body = format!(
            r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Body>
    <m:CreateItemResponse>
      <m:ResponseMessages>
        <m:CreateItemResponseMessage ResponseClass="Success">
          <m:ResponseCode>NoError</m:ResponseCode>
        </m:CreateItemResponseMessage>
      </m:ResponseMessages>
    </m:CreateItemResponse>
  </soap:Body>
</soap:Envelope>"#
        );
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: body.into_bytes(),
        });
        let client = EwsClient::new(mock, "https://mail.example.com/ews", account());
        let item_id = client.create_item(ServerVersion::V14_1, &sample_event(), 123_456).await.unwrap();
        assert_eq!(item_id.id, "pending_sync_123456");
    }

    #[tokio::test]
    async fn create_item_errors_on_failure_response_class() {
        let mock = MockTransport::new();
        let body = format!(
            r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="{SOAP_NS}" xmlns:m="{MESSAGES_NS}">
  <soap:Body>
    <m:CreateItemResponse>
      <m:ResponseMessages>
        <m:CreateItemResponseMessage ResponseClass="Error">
          <m:ResponseCode>ErrorItemNotFound</m:ResponseCode>
        </m:CreateItemResponseMessage>
      </m:ResponseMessages>
    </m:CreateItemResponse>
  </soap:Body>
</soap:Envelope>"#
        );
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: body.into_bytes(),
        });
        let client = EwsClient::new(mock, "https://mail.example.com/ews", account());
        let err = client.create_item(ServerVersion::V14_1, &sample_event(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolStatus);
    }

    #[test]
    fn legacy_free_busy_status_mapping() {
        assert_eq!(legacy_free_busy_status(0), "Free");
        assert_eq!(legacy_free_busy_status(1), "Tentative");
        assert_eq!(legacy_free_busy_status(2), "Busy");
        assert_eq!(legacy_free_busy_status(3), "OOF");
    }
}
