//! NTLMv2 Type 1/2/3 message construction and the NTOWFv2 key schedule.
//!
//! Field layout follows `[MS-NLMP]`; the cryptographic primitives are MD4
//! (hand-rolled, see [`super::md4`]) and HMAC-MD5 (the standard RFC 2104
//! construction, via the `hmac`/`md-5` crates already in this crate's
//! dependency stack).

use std::fmt;

use hmac::{Hmac, Mac};
use md5::Md5;

use super::md4::md4;

type HmacMd5 = Hmac<Md5>;

/// NTLM negotiate flags this crate sets on the Type 1/3 messages it sends.
/// Unicode strings, NTLM session security, and always-sign are the minimum
/// set Exchange's NTLM implementation requires from a client.
const NEGOTIATE_FLAGS: u32 = 0x0000_8201 | 0x0002_0000 | 0x0000_0200;

/// An error in NTLM message construction or parsing.
#[derive(Debug)]
pub struct AuthError {
    message: String,
}

impl AuthError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NTLM error: {}", self.message)
    }
}

impl std::error::Error for AuthError {}

/// Builds the base64-ready bytes of an NTLM Type 1 (Negotiate) message.
#[must_use]
pub fn negotiate_message(domain: &str, workstation: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(32 + domain.len() + workstation.len());
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&1u32.to_le_bytes()); // message type 1
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());

    let offset = 32u32;
    write_security_buffer(&mut msg, domain.len() as u16, domain.len() as u16, offset);
    write_security_buffer(
        &mut msg,
        workstation.len() as u16,
        workstation.len() as u16,
        offset + domain.len() as u32,
    );
    msg.extend_from_slice(domain.as_bytes());
    msg.extend_from_slice(workstation.as_bytes());
    msg
}

/// The server challenge and target information parsed out of a Type 2 message.
#[derive(Debug, Clone)]
pub struct ServerChallenge {
    /// The 8-byte server challenge (`ServerChallenge` field).
    pub challenge: [u8; 8],
    /// The raw `TargetInfo` AV_PAIR blob, echoed verbatim into the NTLMv2
    /// response's `temp` buffer.
    pub target_info: Vec<u8>,
}

/// Parses an NTLM Type 2 (Challenge) message.
///
/// # Errors
///
/// Returns [`AuthError`] if the signature, message type, or declared
/// buffer offsets are inconsistent with a well-formed Type 2 message.
pub fn parse_challenge_message(bytes: &[u8]) -> Result<ServerChallenge, AuthError> {
    if bytes.len() < 32 {
        return Err(AuthError::new("Type 2 message shorter than fixed header"));
    }
    if &bytes[0..8] != b"NTLMSSP\0" {
        return Err(AuthError::new("bad NTLMSSP signature"));
    }
    let msg_type = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    if msg_type != 2 {
        return Err(AuthError::new(format!("expected message type 2, got {msg_type}")));
    }

    let mut challenge = [0u8; 8];
    challenge.copy_from_slice(
        bytes
            .get(24..32)
            .ok_or_else(|| AuthError::new("truncated ServerChallenge field"))?,
    );

    // TargetInfo security buffer at offset 40 (present when NTLM2 key /
    // target-info flags are set, which Exchange always sets).
    let target_info = if bytes.len() >= 48 {
        let len = u16::from_le_bytes(bytes[40..42].try_into().unwrap()) as usize;
        let offset = u32::from_le_bytes(bytes[44..48].try_into().unwrap()) as usize;
        bytes
            .get(offset..offset + len)
            .ok_or_else(|| AuthError::new("TargetInfo buffer out of bounds"))?
            .to_vec()
    } else {
        Vec::new()
    };

    Ok(ServerChallenge {
        challenge,
        target_info,
    })
}

/// Derives `NTOWFv2 = HMAC-MD5(MD4(UTF16-LE(password)), UTF16-LE(UPPER(user) || UPPER(domain)))`.
#[must_use]
pub fn ntowf_v2(username: &str, domain: &str, password: &str) -> [u8; 16] {
    let ntlm_hash = md4(&utf16le(password));
    let mut mac = <HmacMd5 as Mac>::new_from_slice(&ntlm_hash).expect("HMAC accepts any key length");
    mac.update(&utf16le(&username.to_uppercase()));
    mac.update(&utf16le(&domain.to_uppercase()));
    mac.finalize().into_bytes().into()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// The two response buffers and the negotiated session key produced by
/// [`build_response`].
pub struct NtlmResponse {
    /// The `LmChallengeResponse` field (LMv2, 24 bytes).
    pub lm_response: Vec<u8>,
    /// The `NtChallengeResponse` field (NTLMv2, `NTProofStr || temp`).
    pub nt_response: Vec<u8>,
}

/// Computes the NTLMv2 `LmChallengeResponse`/`NtChallengeResponse` pair
/// from the server's [`ServerChallenge`] and a freshly generated 8-byte
/// client challenge (see [`crate::rand_bytes::client_challenge_8`]).
#[must_use]
pub fn build_response(
    username: &str,
    domain: &str,
    password: &str,
    server: &ServerChallenge,
    client_challenge: [u8; 8],
) -> NtlmResponse {
    let ntowf = ntowf_v2(username, domain, password);

    // temp = responserversion(1) || hirversion(1) || Z(6) || time(8) ||
    //        client_challenge(8) || Z(4) || TargetInfo || Z(4)
    let mut temp = Vec::new();
    temp.push(0x01);
    temp.push(0x01);
    temp.extend_from_slice(&[0u8; 6]);
    temp.extend_from_slice(&filetime_now());
    temp.extend_from_slice(&client_challenge);
    temp.extend_from_slice(&[0u8; 4]);
    temp.extend_from_slice(&server.target_info);
    temp.extend_from_slice(&[0u8; 4]);

    let mut nt_proof_input = Vec::with_capacity(8 + temp.len());
    nt_proof_input.extend_from_slice(&server.challenge);
    nt_proof_input.extend_from_slice(&temp);
    let nt_proof_str = hmac_md5(&ntowf, &nt_proof_input);

    let mut nt_response = Vec::with_capacity(16 + temp.len());
    nt_response.extend_from_slice(&nt_proof_str);
    nt_response.extend_from_slice(&temp);

    let mut lm_input = Vec::with_capacity(16);
    lm_input.extend_from_slice(&server.challenge);
    lm_input.extend_from_slice(&client_challenge);
    let lm_proof = hmac_md5(&ntowf, &lm_input);
    let mut lm_response = Vec::with_capacity(24);
    lm_response.extend_from_slice(&lm_proof);
    lm_response.extend_from_slice(&client_challenge);

    NtlmResponse {
        lm_response,
        nt_response,
    }
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Returns the current time as an NT FILETIME (100ns ticks since
/// 1601-01-01), the format `temp`'s `Time` field requires.
fn filetime_now() -> [u8; 8] {
    const EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let ticks = now.as_secs() * 10_000_000 + u64::from(now.subsec_nanos()) / 100 + EPOCH_DIFF_100NS;
    ticks.to_le_bytes()
}

/// Builds the base64-ready bytes of an NTLM Type 3 (Authenticate) message.
#[must_use]
pub fn authenticate_message(
    domain: &str,
    username: &str,
    workstation: &str,
    response: &NtlmResponse,
) -> Vec<u8> {
    let domain_u16 = utf16le(domain);
    let user_u16 = utf16le(username);
    let workstation_u16 = utf16le(workstation);

    let fixed_len = 64u32;
    let mut offset = fixed_len;

    let lm_off = offset;
    offset += response.lm_response.len() as u32;
    let nt_off = offset;
    offset += response.nt_response.len() as u32;
    let domain_off = offset;
    offset += domain_u16.len() as u32;
    let user_off = offset;
    offset += user_u16.len() as u32;
    let workstation_off = offset;
    offset += workstation_u16.len() as u32;
    let session_key_off = offset;

    let mut msg = Vec::with_capacity(offset as usize);
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&3u32.to_le_bytes());

    write_security_buffer(&mut msg, response.lm_response.len() as u16, response.lm_response.len() as u16, lm_off);
    write_security_buffer(&mut msg, response.nt_response.len() as u16, response.nt_response.len() as u16, nt_off);
    write_security_buffer(&mut msg, domain_u16.len() as u16, domain_u16.len() as u16, domain_off);
    write_security_buffer(&mut msg, user_u16.len() as u16, user_u16.len() as u16, user_off);
    write_security_buffer(&mut msg, workstation_u16.len() as u16, workstation_u16.len() as u16, workstation_off);
    write_security_buffer(&mut msg, 0, 0, session_key_off);
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());

    debug_assert_eq!(msg.len() as u32, fixed_len);

    msg.extend_from_slice(&response.lm_response);
    msg.extend_from_slice(&response.nt_response);
    msg.extend_from_slice(&domain_u16);
    msg.extend_from_slice(&user_u16);
    msg.extend_from_slice(&workstation_u16);

    msg
}

fn write_security_buffer(out: &mut Vec<u8>, len: u16, max_len: u16, offset: u32) {
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&max_len.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_message_has_signature_and_type() {
        let msg = negotiate_message("CONTOSO", "WS1");
        assert_eq!(&msg[0..8], b"NTLMSSP\0");
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 1);
    }

    #[test]
    fn parse_challenge_rejects_bad_signature() {
        let bad = vec![0u8; 32];
        assert!(parse_challenge_message(&bad).is_err());
    }

    #[test]
    fn parse_challenge_extracts_server_challenge() {
        let mut msg = vec![0u8; 48];
        msg[0..8].copy_from_slice(b"NTLMSSP\0");
        msg[8..12].copy_from_slice(&2u32.to_le_bytes());
        msg[24..32].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        // TargetInfo: zero-length at offset 48 (== msg.len(), empty slice).
        msg[40..42].copy_from_slice(&0u16.to_le_bytes());
        msg[44..48].copy_from_slice(&48u32.to_le_bytes());

        let parsed = parse_challenge_message(&msg).unwrap();
        assert_eq!(parsed.challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(parsed.target_info.is_empty());
    }

    #[test]
    fn ntowf_v2_is_deterministic() {
        let a = ntowf_v2("alice", "CONTOSO", "hunter2");
        let b = ntowf_v2("alice", "CONTOSO", "hunter2");
        assert_eq!(a, b);
        let c = ntowf_v2("alice", "CONTOSO", "different");
        assert_ne!(a, c);
    }

    #[test]
    fn ntowf_v2_username_and_domain_are_case_insensitive() {
        let a = ntowf_v2("Alice", "CONTOSO", "hunter2");
        let b = ntowf_v2("ALICE", "CONTOSO", "hunter2");
        assert_eq!(a, b);
        let c = ntowf_v2("alice", "contoso", "hunter2");
        assert_eq!(a, c);
        let d = ntowf_v2("alice", "fabrikam", "hunter2");
        assert_ne!(a, d);
    }

    #[test]
    fn response_nt_response_carries_server_target_info() {
        let server = ServerChallenge {
            challenge: [9u8; 8],
            target_info: vec![0xAA, 0xBB, 0xCC],
        };
        let resp = build_response("alice", "CONTOSO", "hunter2", &server, [1u8; 8]);
        assert_eq!(resp.nt_response.len(), 16 + 32 + server.target_info.len());
        assert!(resp.nt_response.ends_with(&[0, 0, 0, 0]));
        assert_eq!(resp.lm_response.len(), 24);
    }

    #[test]
    fn authenticate_message_round_trips_security_buffer_offsets() {
        let server = ServerChallenge {
            challenge: [9u8; 8],
            target_info: vec![],
        };
        let resp = build_response("alice", "CONTOSO", "hunter2", &server, [1u8; 8]);
        let msg = authenticate_message("CONTOSO", "alice", "WS1", &resp);
        assert_eq!(&msg[0..8], b"NTLMSSP\0");
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 3);
    }
}
