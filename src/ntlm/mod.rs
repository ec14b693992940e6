//! NTLMv2 authentication over HTTP `Authorization: NTLM <base64>`.
//!
//! This module implements message construction ([`messages`]) and exposes
//! a small [`Authenticator`] that drives the two-leg handshake
//! ([`crate::transport`] is responsible for actually sending the two HTTP
//! requests and handing back the `WWW-Authenticate` header bytes).

mod md4;
mod messages;

pub use messages::{
    authenticate_message, build_response, negotiate_message, parse_challenge_message, ntowf_v2,
    AuthError, NtlmResponse, ServerChallenge,
};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::model::Account;
use crate::rand_bytes;

/// Drives the NTLMv2 negotiate/challenge/authenticate handshake for one
/// [`Account`], producing ready-to-send `Authorization` header values.
pub struct Authenticator<'a> {
    account: &'a Account,
    workstation: String,
}

impl<'a> Authenticator<'a> {
    /// Creates an authenticator for `account`, using its `device_id` as the
    /// NTLM workstation name (arbitrary but must be stable across a session).
    #[must_use]
    pub fn new(account: &'a Account) -> Self {
        Self {
            account,
            workstation: account.device_id.clone(),
        }
    }

    /// Returns the `Authorization: NTLM <base64>` header value for the
    /// first leg of the handshake.
    #[must_use]
    pub fn negotiate_header(&self) -> String {
        let msg = negotiate_message(&self.account.domain, &self.workstation);
        format!("NTLM {}", BASE64.encode(msg))
    }

    /// Parses the server's `WWW-Authenticate: NTLM <base64>` response and
    /// returns the `Authorization` header value to send on the second leg.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if `www_authenticate` is not a well-formed
    /// `NTLM <base64>` challenge, or if OS entropy for the client
    /// challenge is unavailable.
    pub fn authenticate_header(&self, www_authenticate: &str) -> Result<String, AuthError> {
        let b64 = www_authenticate
            .strip_prefix("NTLM ")
            .ok_or_else(|| AuthError::new("WWW-Authenticate is missing the NTLM scheme"))?;
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| AuthError::new(format!("invalid base64 challenge: {e}")))?;
        let server = parse_challenge_message(&bytes)?;

        let client_challenge = rand_bytes::client_challenge_8()
            .map_err(|e| AuthError::new(e.to_string()))?;

        let response = build_response(
            &self.account.username,
            &self.account.domain,
            &self.account.password,
            &server,
            client_challenge,
        );
        let msg = authenticate_message(
            &self.account.domain,
            &self.account.username,
            &self.workstation,
            &response,
        );
        Ok(format!("NTLM {}", BASE64.encode(msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            domain: "CONTOSO".into(),
            username: "alice".into(),
            password: "hunter2".into(),
            device_id: "device-abc".into(),
            device_type: "measync".into(),
        }
    }

    #[test]
    fn negotiate_header_has_ntlm_prefix_and_decodes() {
        let acct = account();
        let auth = Authenticator::new(&acct);
        let header = auth.negotiate_header();
        assert!(header.starts_with("NTLM "));
        let decoded = BASE64.decode(header.trim_start_matches("NTLM ")).unwrap();
        assert_eq!(&decoded[0..8], b"NTLMSSP\0");
    }

    #[test]
    fn authenticate_header_rejects_missing_scheme() {
        let acct = account();
        let auth = Authenticator::new(&acct);
        assert!(auth.authenticate_header("Basic abc").is_err());
    }

    #[test]
    fn authenticate_header_builds_from_well_formed_challenge() {
        let mut challenge_msg = vec![0u8; 48];
        challenge_msg[0..8].copy_from_slice(b"NTLMSSP\0");
        challenge_msg[8..12].copy_from_slice(&2u32.to_le_bytes());
        challenge_msg[24..32].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        challenge_msg[40..42].copy_from_slice(&0u16.to_le_bytes());
        challenge_msg[44..48].copy_from_slice(&48u32.to_le_bytes());
        let header = format!("NTLM {}", BASE64.encode(&challenge_msg));

        let acct = account();
        let auth = Authenticator::new(&acct);
        let result = auth.authenticate_header(&header).unwrap();
        assert!(result.starts_with("NTLM "));
    }
}
