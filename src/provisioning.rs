//! MS-ASPROV two-phase provisioning.
//!
//! ```text
//! Unknown ──Provision(no PolicyKey)──▶ Phase1Requested
//! Phase1Requested ──Status=1, Policy.Status=1──▶ Phase1Ack (holds temp PolicyKey + policy Data)
//! Phase1Ack ──Provision(ack, temp PolicyKey)──▶ Phase2Requested
//! Phase2Requested ──Status=1, Policy.Status=1──▶ Active (holds final PolicyKey)
//! ```
//!
//! Any `Policy.Status` other than `1` (success) at either phase, or any
//! top-level `Status` other than `1`, moves the state machine to
//! [`ProvisioningState::Rejected`] and surfaces
//! [`crate::error::ErrorKind::Provisioning`] to the caller; this crate does
//! not attempt remote-wipe acknowledgement or policy-document enforcement,
//! it only carries the PolicyKey handshake to completion.

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Account, PolicyKey, ServerVersion};
use crate::transport::Transport;
use crate::wbxml::{decode, encode, CodePage, WbxmlEvent};

/// The EAS provisioning policy type this crate requests; the only policy
/// type documented for MS-ASPROV device provisioning.
const POLICY_TYPE: &str = "MS-EAS-Provisioning-WBXML";

/// `settings:DeviceInformation/Set/Model` value this crate reports.
const DEVICE_MODEL: &str = "measync";

/// Current phase of the provisioning handshake for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    /// No provisioning attempted yet.
    Unknown,
    /// Phase 1 request sent, awaiting the server's temporary PolicyKey.
    Phase1Requested,
    /// Phase 1 acknowledged; holds the temporary key to echo back in Phase 2.
    Phase1Ack {
        /// Temporary PolicyKey issued at the end of Phase 1.
        temp_key: PolicyKey,
    },
    /// Phase 2 request sent, awaiting final acknowledgement.
    Phase2Requested {
        /// The temporary key echoed in the Phase 2 request.
        temp_key: PolicyKey,
    },
    /// Provisioning complete; `key` is valid for all subsequent requests.
    Active {
        /// The final, server-issued PolicyKey.
        key: PolicyKey,
    },
    /// The server rejected provisioning outright (non-recoverable without
    /// administrator action); callers should surface this to the user
    /// rather than retry automatically.
    Rejected {
        /// The raw MS-ASPROV `Status` code that caused the rejection.
        status: u32,
    },
}

impl ProvisioningState {
    /// `true` if the account is fully provisioned and ready for mutating
    /// `Sync`/`FolderSync` commands.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Drives the Phase 1 → Phase 2 handshake to completion against `client`.
///
/// # Errors
///
/// Returns [`ErrorKind::Provisioning`] if either phase reports a
/// non-success `Status`, [`ErrorKind::Parse`] if a response fails to
/// decode, and [`ErrorKind::Transport`]/[`ErrorKind::Auth`] for the
/// underlying transport failures.
pub async fn provision<T: Transport>(
    client: &crate::transport::EasClient<T>,
) -> Result<ProvisioningState> {
    // Mirrors `EasClient::base_headers`'s own default: an undetected
    // version is assumed to be 14.1, so DeviceInformation is emitted unless
    // the server has explicitly negotiated the pre-14 dialect.
    let version = client.cached_version().unwrap_or(ServerVersion::V14_1);

    let phase1 = run_phase(client, None, version).await?;
    if let ProvisioningState::Active { key } = &phase1 {
        client.set_policy_key(key.clone());
        return Ok(phase1);
    }
    let ProvisioningState::Phase1Ack { temp_key } = phase1 else {
        return Ok(phase1);
    };

    let phase2 = run_phase(client, Some(temp_key), version).await?;
    if let ProvisioningState::Active { key } = &phase2 {
        client.set_policy_key(key.clone());
    }
    Ok(phase2)
}

async fn run_phase<T: Transport>(
    client: &crate::transport::EasClient<T>,
    ack_key: Option<PolicyKey>,
    version: ServerVersion,
) -> Result<ProvisioningState> {
    // DeviceInformation/Set is only meaningful on the initial Phase 1
    // request (the server has nothing to apply it to on the ack leg), and
    // only 14.x+ servers define the settings:DeviceInformation element at
    // all — 12.x predates it.
    let device_info = (ack_key.is_none() && version != ServerVersion::V12_1).then_some(client.account());
    let body = build_request(ack_key.as_ref(), device_info);
    let response = client.post_command("Provision", body).await?;

    if response.status != 200 {
        return Err(Error::new(ErrorKind::Provisioning).with_context(format!(
            "Provision HTTP status {}",
            response.status
        )));
    }

    let events = decode(&response.body)?;
    let (status, policy_key, policy_status) = parse_response(&events)?;

    if status != 1 {
        return Ok(ProvisioningState::Rejected { status });
    }
    // Policy.Status=2 means the server has no policy to enforce for this
    // client at all; this is a success outcome, not a rejection, and there
    // is no Phase 2 to run — the sentinel PolicyKey "0" is used thereafter.
    if policy_status == 2 {
        return Ok(ProvisioningState::Active {
            key: PolicyKey::unprovisioned(),
        });
    }
    if policy_status != 1 {
        return Ok(ProvisioningState::Rejected { status: policy_status });
    }

    let key = policy_key.ok_or_else(|| {
        Error::new(ErrorKind::Provisioning).with_context("Provision success with no PolicyKey")
    })?;

    Ok(if ack_key.is_some() {
        ProvisioningState::Active { key }
    } else {
        ProvisioningState::Phase1Ack { temp_key: key }
    })
}

fn build_request(ack_key: Option<&PolicyKey>, device_info: Option<&Account>) -> Vec<u8> {
    let page = CodePage::Provision;
    let mut events = vec![WbxmlEvent::start(page, "Provision")];

    if let Some(account) = device_info {
        events.extend(build_device_information(account));
    }

    if let Some(key) = ack_key {
        events.push(WbxmlEvent::start(page, "Policies"));
        events.push(WbxmlEvent::start(page, "Policy"));
        events.push(WbxmlEvent::start(page, "PolicyType"));
        events.push(WbxmlEvent::Text(POLICY_TYPE.to_string()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::start(page, "PolicyKey"));
        events.push(WbxmlEvent::Text(key.0.clone()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::start(page, "Status"));
        events.push(WbxmlEvent::Text("1".to_string()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::End); // Policy
        events.push(WbxmlEvent::End); // Policies
    } else {
        events.push(WbxmlEvent::start(page, "Policies"));
        events.push(WbxmlEvent::start(page, "Policy"));
        events.push(WbxmlEvent::start(page, "PolicyType"));
        events.push(WbxmlEvent::Text(POLICY_TYPE.to_string()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::End); // Policy
        events.push(WbxmlEvent::End); // Policies
    }

    events.push(WbxmlEvent::End); // Provision
    encode(&events).expect("well-formed static Provision request always encodes")
}

/// Builds `<settings:DeviceInformation><Set>...</Set></settings:DeviceInformation>`,
/// sent on Phase 1 of a 14.x+ handshake so the server can apply
/// device-specific policy (remote wipe targeting, attachment limits by OS).
fn build_device_information(account: &Account) -> Vec<WbxmlEvent> {
    let page = CodePage::Settings;
    vec![
        WbxmlEvent::start(page, "DeviceInformation"),
        WbxmlEvent::start(page, "Set"),
        WbxmlEvent::start(page, "Model"),
        WbxmlEvent::Text(DEVICE_MODEL.to_string()),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "IMEI"),
        WbxmlEvent::Text(synthetic_imei(&account.device_id)),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "FriendlyName"),
        WbxmlEvent::Text(account.device_type.clone()),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "OS"),
        WbxmlEvent::Text(std::env::consts::OS.to_string()),
        WbxmlEvent::End,
        WbxmlEvent::start(page, "UserAgent"),
        WbxmlEvent::Text(format!("measync/{}", env!("CARGO_PKG_VERSION"))),
        WbxmlEvent::End,
        WbxmlEvent::End, // Set
        WbxmlEvent::End, // DeviceInformation
    ]
}

/// Exchange requires `IMEI` to fit a phone-identifier shape; this crate has
/// no real IMEI, so it derives a stable stand-in from the trailing 15
/// characters of the account's `DeviceId`.
fn synthetic_imei(device_id: &str) -> String {
    let chars: Vec<char> = device_id.chars().collect();
    let start = chars.len().saturating_sub(15);
    chars[start..].iter().collect()
}

/// Returns `(top-level Status, PolicyKey if present, Policy.Status)`.
fn parse_response(events: &[WbxmlEvent]) -> Result<(u32, Option<PolicyKey>, u32)> {
    let mut status = 0u32;
    let mut policy_status = 0u32;
    let mut policy_key = None;

    // Flat scan: MS-ASPROV responses are shallow enough (Provision/Status,
    // Provision/Policies/Policy/{PolicyType,PolicyKey,Status}) that tracking
    // the immediately-preceding Start name is sufficient context, rather
    // than building a full tree.
    let mut path: Vec<&str> = Vec::new();

    for event in events {
        match event {
            WbxmlEvent::Start { name, .. } => path.push(name),
            WbxmlEvent::End => {
                path.pop();
            }
            WbxmlEvent::Text(text) => {
                match path.last().copied() {
                    Some("Status") if path.len() == 2 => {
                        status = text.parse().unwrap_or(0);
                    }
                    Some("Status") if path.iter().any(|n| *n == "Policy") => {
                        policy_status = text.parse().unwrap_or(0);
                    }
                    Some("PolicyKey") => {
                        policy_key = Some(PolicyKey(text.clone()));
                    }
                    _ => {}
                }
            }
            WbxmlEvent::Opaque(_) => {}
        }
    }

    Ok((status, policy_key, policy_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;
    use crate::transport::{EasClient, MockTransport};
    use crate::transport::TransportResponse;
    use std::collections::HashMap;

    fn account() -> Account {
        Account {
            domain: "CONTOSO".into(),
            username: "alice".into(),
            password: "hunter2".into(),
            device_id: "dev1".into(),
            device_type: "measync".into(),
        }
    }

    fn provision_response(status: u32, policy_status: u32, policy_key: &str) -> Vec<u8> {
        let page = CodePage::Provision;
        let mut events = vec![
            WbxmlEvent::start(page, "Provision"),
            WbxmlEvent::start(page, "Status"),
            WbxmlEvent::Text(status.to_string()),
            WbxmlEvent::End,
        ];
        events.push(WbxmlEvent::start(page, "Policies"));
        events.push(WbxmlEvent::start(page, "Policy"));
        events.push(WbxmlEvent::start(page, "PolicyType"));
        events.push(WbxmlEvent::Text(POLICY_TYPE.to_string()));
        events.push(WbxmlEvent::End);
        events.push(WbxmlEvent::start(page, "Status"));
        events.push(WbxmlEvent::Text(policy_status.to_string()));
        events.push(WbxmlEvent::End);
        if !policy_key.is_empty() {
            events.push(WbxmlEvent::start(page, "PolicyKey"));
            events.push(WbxmlEvent::Text(policy_key.to_string()));
            events.push(WbxmlEvent::End);
        }
        events.push(WbxmlEvent::End); // Policy
        events.push(WbxmlEvent::End); // Policies
        events.push(WbxmlEvent::End); // Provision
        encode(&events).unwrap()
    }

    #[tokio::test]
    async fn happy_path_reaches_active() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "temp-key-1"),
        });
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "final-key-9"),
        });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let state = provision(&client).await.unwrap();
        assert_eq!(state, ProvisioningState::Active { key: PolicyKey("final-key-9".to_string()) });
        assert_eq!(client.policy_key().0, "final-key-9");
    }

    #[tokio::test]
    async fn no_policy_server_is_active_with_sentinel_key() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 2, ""),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let state = provision(&client).await.unwrap();
        assert_eq!(
            state,
            ProvisioningState::Active {
                key: PolicyKey::unprovisioned()
            }
        );
        assert_eq!(client.policy_key(), PolicyKey::unprovisioned());
        // No Phase 2 round trip: exactly one Provision request was sent.
        assert_eq!(client.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn policy_status_other_than_one_or_two_rejects() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 139, ""),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let state = provision(&client).await.unwrap();
        assert_eq!(state, ProvisioningState::Rejected { status: 139 });
    }

    #[tokio::test]
    async fn phase1_emits_device_information_by_default() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "temp-key-1"),
        });
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "final-key-9"),
        });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        provision(&client).await.unwrap();

        let requests = client.transport().requests();
        let phase1_body = &requests[0].request.body;
        let events = decode(phase1_body).unwrap();
        let xml = crate::wbxml::events_to_xml(&events).unwrap();
        assert!(xml.contains("Settings:DeviceInformation"));
        assert!(xml.contains("Settings:Model"));
        assert!(xml.contains("Settings:IMEI"));
        assert!(xml.contains("Settings:FriendlyName"));
        assert!(xml.contains("Settings:OS"));
        assert!(xml.contains("Settings:UserAgent"));

        // Phase 2 (the ack leg) does not repeat it.
        let phase2_body = &requests[1].request.body;
        let phase2_xml = crate::wbxml::events_to_xml(&decode(phase2_body).unwrap()).unwrap();
        assert!(!phase2_xml.contains("DeviceInformation"));
    }

    #[tokio::test]
    async fn phase1_omits_device_information_for_12_1() {
        let mock = MockTransport::new();
        let mut options_headers = HashMap::new();
        options_headers.insert("MS-ASProtocolVersions".to_string(), "12.1".to_string());
        mock.push_response(TransportResponse {
            status: 200,
            headers: options_headers,
            body: Vec::new(),
        });
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "temp-key-1"),
        });
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(1, 1, "final-key-9"),
        });

        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        client.detect_version().await.unwrap();
        provision(&client).await.unwrap();

        let requests = client.transport().requests();
        let phase1_body = &requests[1].request.body;
        let xml = crate::wbxml::events_to_xml(&decode(phase1_body).unwrap()).unwrap();
        assert!(!xml.contains("DeviceInformation"));
    }

    #[tokio::test]
    async fn top_level_status_failure_rejects_before_phase2() {
        let mock = MockTransport::new();
        mock.push_response(TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: provision_response(139, 1, "x"),
        });
        let client = EasClient::new(mock, "https://mail.example.com/eas", account());
        let state = provision(&client).await.unwrap();
        assert_eq!(state, ProvisioningState::Rejected { status: 139 });
        assert_eq!(client.transport().request_count(), 1);
    }
}
