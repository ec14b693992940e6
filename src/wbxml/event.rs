//! The streaming event model shared by the WBXML decoder/encoder and the
//! textual XML bridge.
//!
//! Mirrors the shape of [`quick_xml::events::Event`] deliberately: both the
//! WBXML binary side and the XML textual side produce/consume the same
//! [`WbxmlEvent`] stream, so the bridge in [`super::xml_bridge`] is a pure
//! one-to-one projection rather than a from-scratch tree builder.

use std::borrow::Cow;

use super::codepages::CodePage;

/// One token in a decoded (or to-be-encoded) WBXML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WbxmlEvent {
    /// Start tag for an element, qualified by the code page it was read
    /// from (tracked by the decoder's `SWITCH_PAGE` state).
    Start {
        /// The code page active when this tag was emitted.
        page: CodePage,
        /// The element's local name, resolved via [`CodePage::tag_name`].
        /// Borrowed for known tags; owned when the decoder synthesizes a
        /// placeholder name for an unrecognized tag id (see
        /// [`super::decoder::decode`]).
        name: Cow<'static, str>,
        /// `true` if the original tag byte had the has-attributes bit set.
        /// MS-ASCMD/WBXML as used by EAS never sends WBXML attributes, so
        /// this is tracked only to reject documents that do.
        has_attrs: bool,
    },
    /// End of the most recently opened element.
    End,
    /// Inline UTF-8 text content (WBXML `STR_I`).
    Text(String),
    /// Opaque binary content (WBXML `OPAQUE`), used by MS-ASCMD for
    /// `AirSyncBase:Data` attachment bytes and compressed RTF bodies.
    Opaque(Vec<u8>),
}

impl WbxmlEvent {
    /// Convenience constructor for a content-bearing start tag.
    #[must_use]
    pub fn start(page: CodePage, name: impl Into<Cow<'static, str>>) -> Self {
        Self::Start {
            page,
            name: name.into(),
            has_attrs: false,
        }
    }
}
