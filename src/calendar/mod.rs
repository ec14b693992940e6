//! The calendar sync engine: ties folder discovery, provisioning, version
//! detection, and the `Sync`-based Create/Update/Delete/fetch operations
//! together behind one process-wide cache per [`crate::config::EngineConfig`].
//!
//! Everything below this module (`create`/`delete`/`update`/`sync_key`/
//! `folder`/`parse`) is a free function operating on a borrowed
//! [`crate::transport::EasClient`]; [`CalendarEngine`] is the stateful
//! wrapper a caller actually holds, owning the transport, the cached
//! [`crate::model::Folder`], and the provisioning/version guards described
//! in the concurrency model.

mod create;
mod delete;
mod ews;
mod folder;
mod parse;
mod sync_key;
mod update;

pub use ews::EwsClient;
pub use parse::Node;

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{CalendarEvent, Folder, ServerVersion};
use crate::transport::{EasClient, Transport};

/// The stateful calendar sync engine for one account against one EAS
/// endpoint (and, optionally, one EWS endpoint for the operations this
/// crate chooses to expose there explicitly).
///
/// `T: Clone` so the same transport can back both the internal
/// [`EasClient`] and [`EwsClient`] without either owning the only handle;
/// any `Transport` implementer that is cheap to clone (an `Arc`-wrapped
/// HTTP client, or `Arc<MockTransport>` in tests) satisfies this.
pub struct CalendarEngine<T: Transport + Clone> {
    eas: EasClient<T>,
    ews: Option<EwsClient<T>>,
    config: EngineConfig,
    folder: tokio::sync::RwLock<Option<Folder>>,
    /// Serializes the whole discover→provision→mutate sequence for this
    /// engine's single calendar collection, per the specification's
    /// invariant that a collection's Sync state is owned by exactly one
    /// in-flight operation at a time.
    collection_lock: tokio::sync::Mutex<()>,
    /// `true` once [`crate::provisioning::provision`] has reached
    /// `Active`. Held across the provisioning round-trip so concurrent
    /// first callers queue behind one provisioning attempt instead of each
    /// racing the server.
    provisioned: tokio::sync::Mutex<bool>,
}

macro_rules! trace_event {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing-integration")]
        { tracing::info!($($arg)*); }
    };
}

impl<T: Transport + Clone> CalendarEngine<T> {
    /// Builds an engine over `transport`, targeting the endpoints and
    /// account in `config`. The EWS client is constructed only if
    /// `config.ews_enabled` and `config.ews_endpoint` are both set; see
    /// [`Self::ews`].
    #[must_use]
    pub fn new(transport: T, config: EngineConfig) -> Self {
        let eas = EasClient::new(
            transport.clone(),
            config.eas_endpoint.clone(),
            config.account.clone(),
        );
        let ews = if config.ews_enabled {
            config
                .ews_endpoint
                .clone()
                .map(|endpoint| EwsClient::new(transport, endpoint, config.account.clone()))
        } else {
            None
        };
        Self {
            eas,
            ews,
            config,
            folder: tokio::sync::RwLock::new(None),
            collection_lock: tokio::sync::Mutex::new(()),
            provisioned: tokio::sync::Mutex::new(false),
        }
    }

    /// Returns the EWS client, if this engine was configured with one.
    ///
    /// EWS is never reached automatically: the specification's condition
    /// for falling back ("unsupported by the active EAS dialect, or a
    /// pre-2010 server with reduced calendar coverage") has no crisp,
    /// mechanically checkable rule, so this crate leaves the choice to the
    /// caller rather than guessing. See `DESIGN.md`.
    #[must_use]
    pub fn ews(&self) -> Option<&EwsClient<T>> {
        self.ews.as_ref()
    }

    /// Drops the cached calendar folder id, forcing the next operation to
    /// re-run `FolderSync`. The cache is otherwise never invalidated on
    /// its own; callers that suspect the server reorganized folders (a
    /// `Status=3`/`Status=9` on some other command, for instance) should
    /// call this explicitly.
    pub async fn reset_folder_cache(&self) {
        *self.folder.write().await = None;
    }

    /// Returns all calendar items visible after draining the collection's
    /// `Sync` state to stability.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Transport`]/[`ErrorKind::Auth`] from the
    /// transport, [`ErrorKind::Provisioning`] if re-provisioning after a
    /// `449` fails, [`ErrorKind::Parse`] on malformed responses, and
    /// [`ErrorKind::ProtocolStatus`]/[`ErrorKind::Logic`] as propagated by
    /// [`sync_key::advance_to_stability`].
    pub async fn sync_calendar(&self) -> Result<Vec<CalendarEvent>> {
        let _guard = self.collection_lock.lock().await;
        self.ensure_provisioned().await?;
        let folder = self.ensure_folder().await?;

        match self.sync_calendar_once(&folder).await {
            Ok(events) => Ok(events),
            Err(err) if is_policy_required(&err) => {
                trace_event!(collection = %folder.server_id, "Sync returned 449, re-provisioning and retrying once");
                self.reprovision().await?;
                self.sync_calendar_once(&folder).await
            }
            Err(err) => Err(err),
        }
    }

    async fn sync_calendar_once(&self, folder: &Folder) -> Result<Vec<CalendarEvent>> {
        let (_, nodes) =
            sync_key::advance_to_stability(&self.eas, &folder.server_id, &self.config).await?;
        nodes
            .iter()
            .filter(|n| n.name == "Add" || n.name == "Change")
            .map(|n| parse::extract_calendar_event(n, true))
            .collect()
    }

    /// Creates `event` in the calendar collection and returns its
    /// server-assigned id.
    ///
    /// # Errors
    ///
    /// See [`Self::sync_calendar`]; additionally returns
    /// [`ErrorKind::ProtocolStatus`] if the server rejects the `<Add>`.
    pub async fn create_event(&self, event: &CalendarEvent) -> Result<String> {
        let _guard = self.collection_lock.lock().await;
        self.ensure_provisioned().await?;
        let folder = self.ensure_folder().await?;

        match create::create_event(&self.eas, &folder.server_id, event, &self.config).await {
            Ok(server_id) => Ok(server_id),
            Err(err) if is_policy_required(&err) => {
                trace_event!(collection = %folder.server_id, "Add returned 449, re-provisioning and retrying once");
                self.reprovision().await?;
                create::create_event(&self.eas, &folder.server_id, event, &self.config).await
            }
            Err(err) => Err(err),
        }
    }

    /// Updates `server_id` with the contents of `event`. The emitted field
    /// set depends on the server's negotiated [`ServerVersion`] (detected
    /// once and cached); see [`update::update_event`].
    ///
    /// # Errors
    ///
    /// See [`Self::sync_calendar`].
    pub async fn update_event(&self, server_id: &str, event: &CalendarEvent) -> Result<()> {
        let _guard = self.collection_lock.lock().await;
        self.ensure_provisioned().await?;
        let folder = self.ensure_folder().await?;
        let version = self.ensure_version().await?;

        match update::update_event(&self.eas, &folder.server_id, server_id, event, version, &self.config).await {
            Ok(()) => Ok(()),
            Err(err) if is_policy_required(&err) => {
                trace_event!(collection = %folder.server_id, "Change returned 449, re-provisioning and retrying once");
                self.reprovision().await?;
                update::update_event(&self.eas, &folder.server_id, server_id, event, version, &self.config).await
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes `server_id` from the calendar collection. A stale-SyncKey
    /// response is retried once internally by [`delete::delete_event`]
    /// before this method's own 449 handling even applies.
    ///
    /// # Errors
    ///
    /// See [`Self::sync_calendar`].
    pub async fn delete_event(&self, server_id: &str) -> Result<()> {
        let _guard = self.collection_lock.lock().await;
        self.ensure_provisioned().await?;
        let folder = self.ensure_folder().await?;

        match delete::delete_event(&self.eas, &folder.server_id, server_id, &self.config).await {
            Ok(()) => Ok(()),
            Err(err) if is_policy_required(&err) => {
                trace_event!(collection = %folder.server_id, "Delete returned 449, re-provisioning and retrying once");
                self.reprovision().await?;
                delete::delete_event(&self.eas, &folder.server_id, server_id, &self.config).await
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_version(&self) -> Result<ServerVersion> {
        if let Some(version) = self.eas.cached_version() {
            return Ok(version);
        }
        self.eas.detect_version().await
    }

    async fn ensure_folder(&self) -> Result<Folder> {
        if let Some(folder) = self.folder.read().await.clone() {
            return Ok(folder);
        }
        let mut guard = self.folder.write().await;
        if let Some(folder) = guard.as_ref() {
            return Ok(folder.clone());
        }
        let folder = folder::discover_calendar_folder(&self.eas).await?;
        *guard = Some(folder.clone());
        Ok(folder)
    }

    /// Runs [`crate::provisioning::provision`] if this engine has not yet
    /// reached `Active`. Holding `provisioned` across the round-trip means
    /// concurrent first callers queue behind one attempt rather than each
    /// independently racing the server with their own Phase 1 request.
    async fn ensure_provisioned(&self) -> Result<()> {
        let mut guard = self.provisioned.lock().await;
        if *guard {
            return Ok(());
        }
        Self::run_provisioning(&self.eas).await?;
        *guard = true;
        Ok(())
    }

    /// Forces a fresh provisioning round-trip regardless of cached state,
    /// used after a `449` response invalidates the current PolicyKey.
    async fn reprovision(&self) -> Result<()> {
        let mut guard = self.provisioned.lock().await;
        Self::run_provisioning(&self.eas).await?;
        *guard = true;
        Ok(())
    }

    /// Runs [`crate::provisioning::provision`] and turns a non-`Active`
    /// outcome (the state machine reports rejection as `Ok`, not `Err`,
    /// since it is a valid protocol response) into
    /// [`ErrorKind::Provisioning`].
    async fn run_provisioning(eas: &EasClient<T>) -> Result<()> {
        match crate::provisioning::provision(eas).await? {
            crate::provisioning::ProvisioningState::Active { .. } => Ok(()),
            other => Err(Error::new(ErrorKind::Provisioning)
                .with_context(format!("provisioning did not reach Active: {other:?}"))),
        }
    }
}

/// `true` if `err` is the `Transport`-kind wrapping an HTTP 449
/// ("retry after" / policy required) response, the condition under which
/// §4.3 mandates invalidating the PolicyKey and re-running provisioning.
fn is_policy_required(err: &Error) -> bool {
    err.kind() == ErrorKind::Transport && err.context().is_some_and(|c| c.contains("status 449"))
}
