//! measync: a protocol engine for Exchange ActiveSync calendar synchronization.
//!
//! # Overview
//!
//! measync drives the MS-ASCMD/MS-ASWBXML/MS-ASPROV/MS-ASCAL protocol family
//! well enough to keep one calendar collection in sync with an Exchange
//! server: binary WBXML encode/decode, NTLMv2 authentication, the
//! provisioning policy handshake, and the bounded `Sync` loop that drives
//! Create/Update/Delete and full-collection fetch. An optional EWS SOAP
//! client is available for callers who need it as an explicit fallback.
//!
//! # Module Structure
//!
//! - [`wbxml`]: The binary WBXML codec (encode/decode) and its textual XML bridge.
//! - [`ntlm`]: NTLMv2 message construction and the MD4/NTOWFv2 primitives it depends on.
//! - [`provisioning`]: The MS-ASPROV two-phase PolicyKey handshake.
//! - [`calendar`]: Folder discovery, the `Sync` loop, Create/Update/Delete, and the EWS fallback client, wired together by [`calendar::CalendarEngine`].
//! - [`transport`]: The async HTTP seam ([`transport::Transport`]) and its EAS-aware wrapper ([`transport::EasClient`]).
//! - [`model`]: Shared domain types (`Account`, `CalendarEvent`, `ServerVersion`, `PolicyKey`, `SyncKey`, `Folder`).
//! - [`config`]: Engine configuration ([`config::EngineConfig`]).
//! - [`error`]: The crate-wide error type and `Result` alias.
//! - [`rand_bytes`]: OS entropy for NTLM client challenges and `Sync` `ClientId` values.
//!
//! # API Stability
//!
//! measync is pre-1.0; public items should be treated as unstable and
//! subject to change between minor versions.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod calendar;
pub mod config;
pub mod error;
pub mod model;
pub mod ntlm;
pub mod provisioning;
pub mod rand_bytes;
pub mod transport;
pub mod wbxml;

pub use calendar::CalendarEngine;
pub use config::EngineConfig;
pub use error::{Error, ErrorKind, Result};
pub use model::{Account, CalendarEvent, Folder, PolicyKey, ServerVersion, SyncKey};
pub use transport::{EasClient, Transport};
