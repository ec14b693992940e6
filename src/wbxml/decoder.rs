//! Binary WBXML decoder: bytes in, a [`WbxmlEvent`] stream out.
//!
//! The overall token-walking shape (read header, loop over tag bytes,
//! track a multi-byte-uint reader for string-table and length fields) is
//! grounded on the reference WBXML decode loop retrieved alongside this
//! specification; it is reworked here into a streaming iterator producing
//! typed events rather than string-concatenating XML, and extended with
//! the code-page-switch and opaque-content handling MS-ASCMD requires.

use std::fmt;

use super::codepages::CodePage;
use super::event::WbxmlEvent;

const TOKEN_SWITCH_PAGE: u8 = 0x00;
const TOKEN_END: u8 = 0x01;
const TOKEN_ENTITY: u8 = 0x02;
const TOKEN_STR_I: u8 = 0x03;
const TOKEN_LITERAL: u8 = 0x04;
const TOKEN_EXT_I_0: u8 = 0x40;
const TOKEN_EXT_I_1: u8 = 0x41;
const TOKEN_EXT_I_2: u8 = 0x42;
const TOKEN_PI: u8 = 0x43;
const TOKEN_LITERAL_C: u8 = 0x44;
const TOKEN_OPAQUE: u8 = 0xC3;
const TOKEN_EXT_T_0: u8 = 0x80;
const TOKEN_STR_T: u8 = 0x83;

const FLAG_HAS_ATTRS: u8 = 0x80;
const FLAG_HAS_CONTENT: u8 = 0x40;
const TAG_MASK: u8 = 0x3F;

/// An error produced while decoding a WBXML byte stream.
#[derive(Debug)]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WBXML decode error: {}", self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a complete WBXML document into a flat event stream.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the header is malformed, a `SWITCH_PAGE`
/// targets an unknown code page, a tag byte has no entry in the active
/// page's table, or the byte stream is truncated mid-token.
pub fn decode(bytes: &[u8]) -> Result<Vec<WbxmlEvent>, DecodeError> {
    let mut cur = Cursor::new(bytes);

    let version = cur.byte()?;
    if version != 0x03 {
        return Err(DecodeError::new(format!(
            "unsupported WBXML version byte 0x{version:02X}, expected 0x03 (WBXML 1.3)"
        )));
    }
    let _public_id = cur.mb_uint()?;
    let _charset = cur.mb_uint()?;
    let strtbl_len = cur.mb_uint()?;
    cur.skip(strtbl_len as usize)?;

    let mut events = Vec::new();
    let mut page = CodePage::AirSync;
    let mut open_depth: Vec<CodePage> = Vec::new();

    while !cur.is_empty() {
        let tok = cur.byte()?;
        match tok {
            TOKEN_SWITCH_PAGE => {
                let idx = cur.byte()?;
                page = CodePage::from_index(idx)
                    .ok_or_else(|| DecodeError::new(format!("unknown code page index {idx}")))?;
            }
            TOKEN_END => {
                open_depth.pop();
                events.push(WbxmlEvent::End);
            }
            TOKEN_STR_I => {
                let s = cur.cstr()?;
                events.push(WbxmlEvent::Text(s));
            }
            TOKEN_OPAQUE => {
                let len = cur.mb_uint()? as usize;
                let data = cur.take(len)?.to_vec();
                events.push(WbxmlEvent::Opaque(data));
            }
            TOKEN_ENTITY => {
                let _ = cur.mb_uint()?;
            }
            TOKEN_LITERAL | TOKEN_LITERAL_C => {
                return Err(DecodeError::new("LITERAL tags are not used by MS-ASCMD"));
            }
            TOKEN_EXT_I_0 | TOKEN_EXT_I_1 | TOKEN_EXT_I_2 => {
                let _ = cur.cstr()?;
            }
            TOKEN_PI => {
                return Err(DecodeError::new("processing instructions are not used by MS-ASCMD"));
            }
            t if t >= TOKEN_EXT_T_0 && t <= TOKEN_STR_T => {
                let _ = cur.mb_uint()?;
            }
            t => {
                let has_attrs = t & FLAG_HAS_ATTRS != 0;
                let has_content = t & FLAG_HAS_CONTENT != 0;
                let tag_id = t & TAG_MASK;
                if has_attrs {
                    return Err(DecodeError::new(
                        "WBXML attributes are not used by MS-ASCMD",
                    ));
                }
                let name = page.tag_name(tag_id).map_or_else(
                    || {
                        std::borrow::Cow::Owned(format!(
                            "UnknownPage{}_Tag{tag_id}",
                            page.index()
                        ))
                    },
                    std::borrow::Cow::Borrowed,
                );
                events.push(WbxmlEvent::Start {
                    page,
                    name,
                    has_attrs: false,
                });
                if !has_content {
                    events.push(WbxmlEvent::End);
                } else {
                    open_depth.push(page);
                }
            }
        }
    }

    if !open_depth.is_empty() {
        return Err(DecodeError::new("unexpected end of document: unclosed elements"));
    }

    Ok(events)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| DecodeError::new("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or_else(|| DecodeError::new("length overflow"))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| DecodeError::new("unexpected end of input while reading opaque data"))?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    /// Reads a WBXML multi-byte `mb_u_int32`: 7 bits per byte, continuation
    /// in the top bit, most-significant byte first.
    fn mb_uint(&mut self) -> Result<u32, DecodeError> {
        let mut value: u32 = 0;
        loop {
            let b = self.byte()?;
            value = value
                .checked_shl(7)
                .ok_or_else(|| DecodeError::new("mb_u_int32 overflow"))?
                | u32::from(b & 0x7F);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Reads a NUL-terminated UTF-8 string.
    fn cstr(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        loop {
            let b = self.byte()?;
            if b == 0 {
                break;
            }
        }
        let slice = &self.bytes[start..self.pos - 1];
        String::from_utf8(slice.to_vec())
            .map_err(|e| DecodeError::new(format!("invalid UTF-8 in STR_I: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(strtbl: &[u8]) -> Vec<u8> {
        let mut v = vec![0x03, 0x01, 0x6A, strtbl.len() as u8];
        v.extend_from_slice(strtbl);
        v
    }

    #[test]
    fn decodes_simple_leaf_element() {
        let mut doc = header(&[]);
        // Sync page, <SyncKey>1</SyncKey>
        doc.push(0x00); // SWITCH_PAGE
        doc.push(0x00); // to AirSync (index 0, redundant but valid)
        doc.push(0x0B | FLAG_HAS_CONTENT); // SyncKey with content
        doc.push(TOKEN_STR_I);
        doc.extend_from_slice(b"1\0");
        doc.push(TOKEN_END);

        let events = decode(&doc).unwrap();
        assert_eq!(
            events,
            vec![
                WbxmlEvent::start(CodePage::AirSync, "SyncKey"),
                WbxmlEvent::Text("1".to_string()),
                WbxmlEvent::End,
            ]
        );
    }

    #[test]
    fn decodes_empty_element_without_content_flag() {
        let mut doc = header(&[]);
        doc.push(0x00);
        doc.push(0x00);
        doc.push(0x14); // MoreAvailable, no content flag, no attrs flag
        let events = decode(&doc).unwrap();
        assert_eq!(
            events,
            vec![WbxmlEvent::start(CodePage::AirSync, "MoreAvailable"), WbxmlEvent::End]
        );
    }

    #[test]
    fn rejects_truncated_document() {
        let doc = vec![0x03, 0x01, 0x6A, 0x00, 0x00];
        assert!(decode(&doc).is_err());
    }

    #[test]
    fn rejects_unknown_code_page() {
        let mut doc = header(&[]);
        doc.push(0x00);
        doc.push(99);
        assert!(decode(&doc).is_err());
    }

    #[test]
    fn decodes_opaque_content() {
        let mut doc = header(&[]);
        doc.push(0x00);
        doc.push(CodePage::AirSyncBase.index());
        doc.push(0x0B | FLAG_HAS_CONTENT); // Data
        doc.push(TOKEN_OPAQUE);
        doc.push(3); // mb_uint length
        doc.extend_from_slice(&[0xDE, 0xAD, 0xBE]);
        doc.push(TOKEN_END);

        let events = decode(&doc).unwrap();
        assert_eq!(
            events,
            vec![
                WbxmlEvent::start(CodePage::AirSyncBase, "Data"),
                WbxmlEvent::Opaque(vec![0xDE, 0xAD, 0xBE]),
                WbxmlEvent::End,
            ]
        );
    }

    #[test]
    fn mb_uint_multi_byte() {
        // 300 = 0b100101100 -> split into 7-bit groups: 0000010 0101100
        // bytes: 0x82, 0x2C
        let doc = [0x82u8, 0x2C];
        let mut cur = Cursor::new(&doc);
        assert_eq!(cur.mb_uint().unwrap(), 300);
    }

    #[test]
    fn unknown_tag_synthesizes_placeholder_instead_of_erroring() {
        let mut doc = header(&[]);
        doc.push(0x00);
        doc.push(0x00); // AirSync
        doc.push(0x3F | FLAG_HAS_CONTENT); // no entry on AirSync's page
        doc.push(TOKEN_STR_I);
        doc.extend_from_slice(b"x\0");
        doc.push(TOKEN_END);

        let events = decode(&doc).unwrap();
        assert_eq!(
            events,
            vec![
                WbxmlEvent::start(CodePage::AirSync, "UnknownPage0_Tag63"),
                WbxmlEvent::Text("x".to_string()),
                WbxmlEvent::End,
            ]
        );
    }
}
