//! Crate-wide error taxonomy.
//!
//! Every failure surfaced by this crate is tagged with one of the seven
//! [`ErrorKind`] variants so callers can apply the propagation policy from
//! the specification (retry transport/auth once, re-provision once, reset
//! SyncKey once on a stale-key delete) without string-matching messages.
//!
//! The shape follows the kind+context pattern already used by
//! [`crate::ntlm::AuthError`]: a fixed, matchable `kind` plus free-form
//! `context` for diagnosis, and a `source` chain back to the underlying
//! I/O or parse error.

use std::fmt;

/// The classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network I/O, TLS, or other failure from the injected [`crate::transport::Transport`].
    Transport,
    /// NTLM failure, or HTTP 401 after the local retry has already been spent.
    Auth,
    /// A Phase-1/Phase-2 provisioning status outside the success set.
    Provisioning,
    /// An explicit non-OK EAS `Status` or non-`NoError` EWS `ResponseCode`.
    ProtocolStatus,
    /// Malformed WBXML or XML.
    Parse,
    /// A client-side invariant violation (e.g. an empty SyncKey where one is required).
    Logic,
    /// Cooperative cancellation.
    Cancelled,
}

impl ErrorKind {
    const fn message(self) -> &'static str {
        match self {
            Self::Transport => "transport error",
            Self::Auth => "authentication failed",
            Self::Provisioning => "provisioning failed",
            Self::ProtocolStatus => "protocol status error",
            Self::Parse => "parse error",
            Self::Logic => "client invariant violated",
            Self::Cancelled => "operation cancelled",
        }
    }
}

/// The crate-wide error type.
///
/// # Example
///
/// ```
/// use measync::error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::ProtocolStatus).with_context("Sync Status=3");
/// assert_eq!(err.kind(), ErrorKind::ProtocolStatus);
/// assert!(err.to_string().contains("Status=3"));
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error with the given kind and no context.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Attaches free-form diagnostic context.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Attaches an underlying error as the source.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the attached context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns `true` if the propagation policy in MS-ASCMD §7 allows one
    /// local retry of this error without involving the caller (transport
    /// hiccups and a single 401 are retried transparently; everything else
    /// surfaces).
    #[must_use]
    pub const fn is_locally_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::Auth)
    }

    /// Shorthand for `Error::new(ErrorKind::Logic).with_context(ctx)`, the
    /// most common construction site for client-side invariant violations.
    #[must_use]
    pub fn logic(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic).with_context(ctx)
    }

    /// Shorthand for a protocol-status failure carrying the raw status code.
    #[must_use]
    pub fn protocol_status(command: &str, status: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ProtocolStatus)
            .with_context(format!("{command} Status={status}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.message())?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::ntlm::AuthError> for Error {
    fn from(e: crate::ntlm::AuthError) -> Self {
        Self::new(ErrorKind::Auth).with_context(e.to_string())
    }
}

impl From<crate::wbxml::DecodeError> for Error {
    fn from(e: crate::wbxml::DecodeError) -> Self {
        Self::new(ErrorKind::Parse).with_context(e.to_string())
    }
}

impl From<crate::transport::TransportError> for Error {
    fn from(e: crate::transport::TransportError) -> Self {
        Self::new(ErrorKind::Transport).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::new(ErrorKind::Transport).is_locally_retryable());
        assert!(Error::new(ErrorKind::Auth).is_locally_retryable());
        assert!(!Error::new(ErrorKind::Provisioning).is_locally_retryable());
        assert!(!Error::new(ErrorKind::ProtocolStatus).is_locally_retryable());
        assert!(!Error::new(ErrorKind::Parse).is_locally_retryable());
        assert!(!Error::new(ErrorKind::Logic).is_locally_retryable());
        assert!(!Error::new(ErrorKind::Cancelled).is_locally_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::protocol_status("Delete", 3);
        assert_eq!(err.kind(), ErrorKind::ProtocolStatus);
        assert!(err.to_string().contains("Delete Status=3"));
    }

    #[test]
    fn logic_shorthand() {
        let err = Error::logic("SyncKey must not be \"0\" before Add");
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(err.context().unwrap().contains("SyncKey"));
    }
}
