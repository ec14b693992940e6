//! The concrete EAS transport: builds EAS request URLs/headers, drives the
//! NTLM two-leg handshake transparently, and caches the detected
//! [`ServerVersion`] and current [`PolicyKey`] for the life of the client.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Account, PolicyKey, ServerVersion};
use crate::ntlm::Authenticator;

use super::{Transport, TransportRequest, TransportResponse};

/// An EAS-aware wrapper over any [`Transport`] implementer.
///
/// Owns the account identity, the cached protocol version (detected once
/// via `OPTIONS`), and the current [`PolicyKey`] (updated by
/// [`crate::provisioning`] as the provisioning state machine advances).
/// Every `post_wbxml` call drives a fresh NTLM negotiate/challenge
/// handshake if the server answers the first attempt with 401 — EAS
/// servers do not keep NTLM session state across a connection-pool churn,
/// so this crate never assumes a prior handshake is still valid.
pub struct EasClient<T: Transport> {
    inner: T,
    endpoint: String,
    account: Account,
    version: Mutex<Option<ServerVersion>>,
    policy_key: Mutex<PolicyKey>,
}

impl<T: Transport> EasClient<T> {
    /// Wraps `inner` as an EAS client targeting `endpoint`.
    #[must_use]
    pub fn new(inner: T, endpoint: impl Into<String>, account: Account) -> Self {
        Self {
            inner,
            endpoint: endpoint.into(),
            account,
            version: Mutex::new(None),
            policy_key: Mutex::new(PolicyKey::unprovisioned()),
        }
    }

    /// Returns the cached server version, if `detect_version` has run.
    #[must_use]
    pub fn cached_version(&self) -> Option<ServerVersion> {
        *self.version.lock().unwrap()
    }

    /// Returns the account identity this client authenticates as.
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Returns a reference to the wrapped transport, for test assertions
    /// against e.g. [`super::MockTransport::request_count`].
    #[cfg(feature = "test-internals")]
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner
    }

    /// Replaces the cached [`PolicyKey`], called by the provisioning state
    /// machine once a policy is acknowledged.
    pub fn set_policy_key(&self, key: PolicyKey) {
        *self.policy_key.lock().unwrap() = key;
    }

    /// Returns the current [`PolicyKey`] echoed on every request.
    #[must_use]
    pub fn policy_key(&self) -> PolicyKey {
        self.policy_key.lock().unwrap().clone()
    }

    /// Sends `OPTIONS` to discover the server's supported protocol
    /// versions and caches the highest one this crate understands.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`] on connection failure and
    /// [`ErrorKind::ProtocolStatus`] if the server advertises no version
    /// this crate recognizes.
    pub async fn detect_version(&self) -> Result<ServerVersion> {
        let response = self
            .send_with_auth("OPTIONS", HashMap::new(), Vec::new())
            .await?;

        let versions = response
            .header("MS-ASProtocolVersions")
            .ok_or_else(|| Error::new(ErrorKind::ProtocolStatus).with_context("OPTIONS response missing MS-ASProtocolVersions"))?
            .to_string();

        let best = versions
            .split(',')
            .filter_map(|v| ServerVersion::parse(v.trim()))
            .max()
            .ok_or_else(|| {
                Error::new(ErrorKind::ProtocolStatus)
                    .with_context(format!("no recognized protocol version in '{versions}'"))
            })?;

        *self.version.lock().unwrap() = Some(best);
        Ok(best)
    }

    /// Posts a WBXML-encoded command body to `Cmd={command}` and returns
    /// the raw response body (WBXML-encoded on success).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`] for connection failure, or
    /// [`ErrorKind::Auth`] if authentication fails even after the NTLM
    /// retry.
    pub async fn post_command(&self, command: &str, body: Vec<u8>) -> Result<TransportResponse> {
        self.send_with_auth(command, HashMap::new(), body).await
    }

    async fn send_with_auth(
        &self,
        command: &str,
        extra_query: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<TransportResponse> {
        let url = self.build_url(command, &extra_query);
        let headers = self.base_headers();

        let request = TransportRequest {
            url: url.clone(),
            headers: headers.clone(),
            body: body.clone(),
        };
        let response = self.inner.send(request).await?;

        if response.status != 401 {
            return Ok(response);
        }

        let www_auth = response
            .header("WWW-Authenticate")
            .ok_or_else(|| Error::new(ErrorKind::Auth).with_context("401 with no WWW-Authenticate header"))?
            .to_string();

        let authenticator = Authenticator::new(&self.account);

        // Leg 1: send Negotiate, expect a fresh 401 carrying the Type 2 challenge.
        let mut leg1_headers = headers.clone();
        leg1_headers.insert("Authorization".to_string(), authenticator.negotiate_header());
        let leg1_response = self
            .inner
            .send(TransportRequest {
                url: url.clone(),
                headers: leg1_headers,
                body: Vec::new(),
            })
            .await?;

        let challenge = leg1_response
            .header("WWW-Authenticate")
            .filter(|h| h.starts_with("NTLM "))
            .unwrap_or(&www_auth)
            .to_string();

        let auth_header = authenticator.authenticate_header(&challenge)?;

        let mut leg2_headers = headers;
        leg2_headers.insert("Authorization".to_string(), auth_header);
        let leg2_response = self
            .inner
            .send(TransportRequest {
                url,
                headers: leg2_headers,
                body,
            })
            .await?;

        if leg2_response.status == 401 {
            return Err(Error::new(ErrorKind::Auth).with_context("NTLM handshake rejected on second leg"));
        }

        Ok(leg2_response)
    }

    fn build_url(&self, command: &str, extra_query: &HashMap<String, String>) -> String {
        let version = self
            .cached_version()
            .map_or("14.1", ServerVersion::as_header_value);
        let mut url = format!(
            "{}?Cmd={}&User={}&DeviceId={}&DeviceType={}",
            self.endpoint,
            command,
            urlencode(&self.account.username),
            urlencode(&self.account.device_id),
            urlencode(&self.account.device_type),
        );
        let _ = version;
        for (k, v) in extra_query {
            url.push('&');
            url.push_str(&urlencode(k));
            url.push('=');
            url.push_str(&urlencode(v));
        }
        url
    }

    fn base_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/vnd.ms-sync.wbxml".to_string());
        headers.insert(
            "MS-ASProtocolVersion".to_string(),
            self.cached_version().map_or("14.1", ServerVersion::as_header_value).to_string(),
        );
        headers.insert("X-MS-PolicyKey".to_string(), self.policy_key().0);
        headers
    }
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}
