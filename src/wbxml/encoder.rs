//! Binary WBXML encoder: a [`WbxmlEvent`] stream in, bytes out.
//!
//! The encoder is the dual of [`super::decoder::decode`]: it tracks the
//! currently active code page and emits a `SWITCH_PAGE` token only when an
//! event names a tag on a different page than the previous one, so callers
//! that stay within one page (the overwhelming majority of MS-ASCMD
//! documents) never pay for a redundant switch.

use std::fmt;

use super::codepages::CodePage;
use super::event::WbxmlEvent;

const TOKEN_SWITCH_PAGE: u8 = 0x00;
const TOKEN_END: u8 = 0x01;
const TOKEN_STR_I: u8 = 0x03;
const TOKEN_OPAQUE: u8 = 0xC3;
const FLAG_HAS_CONTENT: u8 = 0x40;

/// An error produced while encoding a [`WbxmlEvent`] stream.
#[derive(Debug)]
pub struct EncodeError {
    message: String,
}

impl EncodeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WBXML encode error: {}", self.message)
    }
}

impl std::error::Error for EncodeError {}

/// Encodes an event stream into a complete WBXML document, prefixed with
/// the fixed `03 01 6A 00` header (version 1.3, public id 1 "unknown or
/// absent", charset 106 UTF-8, zero-length string table) used by every
/// MS-ASCMD request and response.
///
/// # Errors
///
/// Returns [`EncodeError`] if a [`WbxmlEvent::Start`] names a tag absent
/// from its page's table, or if the stream is unbalanced (an `End` with no
/// matching open element).
pub fn encode(events: &[WbxmlEvent]) -> Result<Vec<u8>, EncodeError> {
    let mut out = vec![0x03, 0x01, 0x6A, 0x00];
    let mut page = CodePage::AirSync;
    // Tracks, per currently-open element, whether it was written with the
    // has-content flag and therefore owes a matching TOKEN_END.
    let mut open_content_bearing: Vec<bool> = Vec::new();
    let mut i = 0;

    while i < events.len() {
        match &events[i] {
            WbxmlEvent::Start { page: tag_page, name, has_attrs } => {
                if *has_attrs {
                    return Err(EncodeError::new("WBXML attributes are not supported"));
                }
                if *tag_page != page {
                    out.push(TOKEN_SWITCH_PAGE);
                    out.push(tag_page.index());
                    page = *tag_page;
                }
                let code = page
                    .tag_code(name)
                    .ok_or_else(|| EncodeError::new(format!("unknown tag '{name}' on page {page:?}")))?;

                let is_immediately_closed = matches!(events.get(i + 1), Some(WbxmlEvent::End));
                if is_immediately_closed {
                    out.push(code);
                    open_content_bearing.push(false);
                } else {
                    out.push(code | FLAG_HAS_CONTENT);
                    open_content_bearing.push(true);
                }
            }
            WbxmlEvent::End => {
                let content_bearing = open_content_bearing
                    .pop()
                    .ok_or_else(|| EncodeError::new("unbalanced End with no open element"))?;
                if content_bearing {
                    out.push(TOKEN_END);
                }
            }
            WbxmlEvent::Text(s) => {
                out.push(TOKEN_STR_I);
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            WbxmlEvent::Opaque(data) => {
                out.push(TOKEN_OPAQUE);
                write_mb_uint(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
        }
        i += 1;
    }

    if !open_content_bearing.is_empty() {
        return Err(EncodeError::new("unbalanced event stream: unclosed elements remain"));
    }

    Ok(out)
}

fn write_mb_uint(out: &mut Vec<u8>, mut value: u32) {
    let mut bytes = Vec::new();
    bytes.push((value & 0x7F) as u8);
    value >>= 7;
    while value > 0 {
        bytes.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}
