//! OS entropy for NTLMv2 client challenges and EAS `Sync` `ClientId` values.
//!
//! Follows the same thin wrapper over [`getrandom`] used elsewhere in the
//! ecosystem for this exact purpose rather than pulling in a full `rand`
//! dependency for a handful of call sites.

use crate::error::{Error, ErrorKind};

/// Fills `buf` with cryptographically secure random bytes from the OS.
///
/// # Errors
///
/// Returns [`ErrorKind::Transport`] if the OS entropy source is unavailable;
/// this is classified as transport rather than logic because the caller's
/// only recourse is the same local retry as a network hiccup.
pub fn fill(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::fill(buf).map_err(|e| {
        Error::new(ErrorKind::Transport).with_context(format!("OS entropy unavailable: {e}"))
    })
}

/// Returns a fresh 8-byte NTLMv2 client challenge.
pub fn client_challenge_8() -> Result<[u8; 8], Error> {
    let mut buf = [0u8; 8];
    fill(&mut buf)?;
    Ok(buf)
}

/// Returns a fresh 32-character lowercase-hex `ClientId` string (the
/// hyphen-stripped form of a UUIDv4) for the EAS `Sync` command's
/// per-`Add` correlation token. MS-ASCMD requires uniqueness only within a
/// single `Sync` request, but global uniqueness is simpler to reason about
/// and costs nothing extra.
pub fn client_id() -> Result<String, Error> {
    let mut buf = [0u8; 16];
    fill(&mut buf)?;
    Ok(buf.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_challenge_is_nonzero_with_overwhelming_probability() {
        let a = client_challenge_8().unwrap();
        let b = client_challenge_8().unwrap();
        assert_ne!(a, [0u8; 8]);
        assert_ne!(a, b);
    }

    #[test]
    fn client_id_is_32_hex_chars() {
        let id = client_id().unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
