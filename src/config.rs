//! Engine configuration.
//!
//! [`EngineConfig`] is the single entry point for tuning the retry/iteration
//! bounds the specification calls out explicitly (100 sync iterations, 50
//! mutation-preamble iterations) plus the handful of endpoint/feature toggles
//! a deployment needs to set once at startup. Values can be built
//! programmatically or, with the `config-file` feature, loaded from TOML.

use serde::{Deserialize, Serialize};

use crate::model::Account;

/// Top-level configuration for an [`crate::calendar::CalendarEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base EAS endpoint, e.g. `https://mail.example.com/Microsoft-Server-ActiveSync`.
    pub eas_endpoint: String,
    /// Base EWS endpoint, e.g. `https://mail.example.com/EWS/Exchange.asmx`.
    /// Required only when `ews_enabled` is set and the sync engine falls
    /// back from EAS.
    pub ews_endpoint: Option<String>,
    /// Account identity and credentials.
    pub account: Account,
    /// Upper bound on `Sync` round-trips performed while draining a
    /// `MoreAvailable` response for a single collection before surfacing
    /// [`crate::error::ErrorKind::Logic`] to the caller.
    pub max_sync_iterations: u32,
    /// Upper bound on the provisioning-then-retry loop performed before a
    /// mutating command (`Sync` Add/Change/Delete) when the server answers
    /// with Status 142/144 ("policy required"/"policy refresh needed").
    pub max_provision_retries: u32,
    /// Whether EWS SOAP fallback is permitted at all for this engine
    /// instance; see `SPEC_FULL.md` §4.5 for the conditions that trigger
    /// fallback even when this is `true`.
    pub ews_enabled: bool,
    /// Per-request timeout handed to the [`crate::transport::Transport`]
    /// implementer; enforcement is the transport's responsibility, this is
    /// advisory configuration only.
    pub request_timeout_secs: u64,
}

impl EngineConfig {
    /// The specification's mandated ceiling on `Sync` drain iterations.
    pub const DEFAULT_MAX_SYNC_ITERATIONS: u32 = 100;
    /// The specification's mandated ceiling on provisioning-retry iterations.
    pub const DEFAULT_MAX_PROVISION_RETRIES: u32 = 50;

    /// Builds a config with the specification's default bounds and EWS
    /// fallback enabled.
    #[must_use]
    pub fn new(eas_endpoint: impl Into<String>, account: Account) -> Self {
        Self {
            eas_endpoint: eas_endpoint.into(),
            ews_endpoint: None,
            account,
            max_sync_iterations: Self::DEFAULT_MAX_SYNC_ITERATIONS,
            max_provision_retries: Self::DEFAULT_MAX_PROVISION_RETRIES,
            ews_enabled: true,
            request_timeout_secs: 30,
        }
    }

    /// Sets the EWS endpoint and leaves `ews_enabled` untouched.
    #[must_use]
    pub fn with_ews_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ews_endpoint = Some(endpoint.into());
        self
    }

    /// Disables EWS fallback regardless of endpoint configuration.
    #[must_use]
    pub fn without_ews(mut self) -> Self {
        self.ews_enabled = false;
        self
    }

    /// Loads configuration from a TOML file. Requires the `config-file` feature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::Logic`] if the file cannot be read
    /// or does not parse as a valid `EngineConfig`.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use crate::error::{Error, ErrorKind};

        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::new(ErrorKind::Logic)
                .with_context(format!("reading config file {}: {e}", path.as_ref().display()))
        })?;
        toml::from_str(&text).map_err(|e| {
            Error::new(ErrorKind::Logic).with_context(format!("parsing config file: {e}"))
        })
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
            device_id: "abc123".into(),
            device_type: "measync".into(),
        }
    }

    #[test]
    fn defaults_match_specification_bounds() {
        let cfg = EngineConfig::new("https://mail.example.com/Microsoft-Server-ActiveSync", account());
        assert_eq!(cfg.max_sync_iterations, 100);
        assert_eq!(cfg.max_provision_retries, 50);
        assert!(cfg.ews_enabled);
        assert!(cfg.ews_endpoint.is_none());
    }

    #[test]
    fn without_ews_disables_fallback() {
        let cfg = EngineConfig::new("https://mail.example.com/Microsoft-Server-ActiveSync", account())
            .without_ews();
        assert!(!cfg.ews_enabled);
    }
}
