//! WBXML codec for MS-ASCMD.
//!
//! ```text
//!        bytes                  WbxmlEvent stream              XML text
//!   ┌───────────────┐      ┌──────────────────────┐      ┌───────────────┐
//!   │ decoder::decode├────▶│                      │◀─────┤xml_bridge::    │
//!   └───────────────┘      │   wbxml::event::     │      │  xml_to_events │
//!   ┌───────────────┐      │   WbxmlEvent          │      ├───────────────┤
//!   │ encoder::encode│◀────┤                      ├─────▶│xml_bridge::    │
//!   └───────────────┘      └──────────────────────┘      │  events_to_xml │
//!                                                          └───────────────┘
//! ```
//!
//! The binary codec and the textual bridge share one event type so neither
//! side needs to know the other exists; [`crate::calendar`] and
//! [`crate::provisioning`] build and read [`WbxmlEvent`] streams directly
//! and never touch bytes or XML text themselves.

mod codepages;
mod decoder;
mod encoder;
mod event;
mod xml_bridge;

pub use codepages::CodePage;
pub use decoder::{decode, DecodeError};
pub use encoder::{encode, EncodeError};
pub use event::WbxmlEvent;
pub use xml_bridge::{events_to_xml, xml_to_events, BridgeError};

/// Builds a `ComposeMail:SendMail` request directly, bypassing the general
/// XML-event assembly calendar commands use.
///
/// `mime` is framed as WBXML `OPAQUE`, not `STR_I`: MIME messages are
/// arbitrary bytes (attachments, non-UTF-8 encodings) and must round-trip
/// exactly, which `STR_I`'s NUL-terminated-UTF-8 encoding cannot guarantee.
///
/// # Errors
///
/// Returns [`EncodeError`] only if the encoder's internal invariants are
/// violated; the event stream built here is always well-formed.
pub fn send_mail(client_id: &str, mime: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let page = CodePage::ComposeMail;
    encode(&[
        WbxmlEvent::start(page, "SendMail"),
        WbxmlEvent::start(page, "ClientId"),
        WbxmlEvent::Text(client_id.to_string()),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "SaveInSentItems"),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "Mime"),
        WbxmlEvent::Opaque(mime.to_vec()),
        WbxmlEvent::End,
        WbxmlEvent::End,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_round_trip_bytes_to_xml_and_back() {
        let events = vec![
            WbxmlEvent::start(CodePage::Calendar, "Subject"),
            WbxmlEvent::Text("Planning review".to_string()),
            WbxmlEvent::End,
        ];
        let bytes = encode(&events).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, events);

        let xml = events_to_xml(&decoded).unwrap();
        let reparsed = xml_to_events(&xml).unwrap();
        assert_eq!(reparsed, events);

        let re_encoded = encode(&reparsed).unwrap();
        assert_eq!(re_encoded, bytes);
    }

    #[test]
    fn send_mail_switches_to_compose_mail_page_and_opaques_the_mime() {
        let mime = vec![0xABu8; 100 * 1024];
        let bytes = send_mail("cid-1", &mime).unwrap();

        assert_eq!(&bytes[0..4], &[0x03, 0x01, 0x6A, 0x00]);
        // SWITCH_PAGE(0x00) to page 21 (0x15), then SendMail (0x05|0x40).
        assert_eq!(&bytes[4..7], &[0x00, 0x15, 0x45]);

        let decoded = decode(&bytes).unwrap();
        let opaque = decoded
            .iter()
            .find_map(|e| match e {
                WbxmlEvent::Opaque(data) => Some(data.clone()),
                _ => None,
            })
            .expect("Mime content must decode as Opaque");
        assert_eq!(opaque, mime);
    }
}
