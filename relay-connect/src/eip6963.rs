//! EIP-6963 multi-provider discovery.
//!
//! Wallets announce themselves with a [`ProviderDetail`]; the page asks every
//! loaded wallet to (re-)announce by emitting a request-provider signal. The
//! [`ProviderEnvironment`] trait abstracts the page-global event bus so the
//! registry can be driven by a browser binding or, as in [`AnnouncementBus`],
//! by in-process channels.
//!
//! See <https://eips.ethereum.org/EIPS/eip-6963>.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::eip1193::SharedTransport;
use crate::error::AnnouncementError;
use crate::runtime::lock;

/// Name of the inbound announcement event.
pub const ANNOUNCE_PROVIDER_EVENT: &str = "eip6963:announceProvider";

/// Name of the outbound request-provider event.
pub const REQUEST_PROVIDER_EVENT: &str = "eip6963:requestProvider";

/// Reserved id of the implicit (`window.ethereum`) provider.
pub const IMPLICIT_PROVIDER_KEY: &str = "window.ethereum";

const ETHEREUM_ICON: &str = "data:image/svg+xml,%3Csvg%20xmlns%3D%22http%3A%2F%2Fwww.w3.org%2F2000%2Fsvg%22%20viewBox%3D%220%200%20256%20417%22%3E%3Cpath%20fill%3D%22%23343434%22%20d%3D%22M127.9%200l-2.8%209.5v275.7l2.8%202.8%20127.9-75.6z%22%2F%3E%3Cpath%20fill%3D%22%238C8C8C%22%20d%3D%22M127.9%200L0%20212.4l127.9%2075.6V154.2z%22%2F%3E%3Cpath%20fill%3D%22%233C3C3B%22%20d%3D%22M127.9%20312.2l-1.6%201.9v98.2l1.6%204.6L256%20236.6z%22%2F%3E%3Cpath%20fill%3D%22%238C8C8C%22%20d%3D%22M127.9%20416.9V312.2L0%20236.6z%22%2F%3E%3C%2Fsvg%3E";

/// Identity of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Per-session unique id, normally a UUIDv4.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Icon as a data URI.
    pub icon: String,
    /// Reverse-DNS namespace, e.g. `io.metamask`.
    pub rdns: String,
}

impl ProviderInfo {
    /// Create a provider identity.
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        icon: impl Into<String>,
        rdns: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            icon: icon.into(),
            rdns: rdns.into(),
        }
    }

    /// Identity with a freshly generated uuid and the generic Ethereum icon.
    pub fn generate(name: impl Into<String>, rdns: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name, ETHEREUM_ICON, rdns)
    }

    /// The identity given to the implicit `window.ethereum` provider.
    #[must_use]
    pub fn implicit() -> Self {
        Self::new(
            IMPLICIT_PROVIDER_KEY,
            "window.ethereum (EIP-1193)",
            ETHEREUM_ICON,
            IMPLICIT_PROVIDER_KEY,
        )
    }

    /// Check an announced identity.
    ///
    /// Only the id is load-bearing: it must be non-empty and must not be
    /// [`IMPLICIT_PROVIDER_KEY`]. Other EIP-6963 recommendations (a UUIDv4
    /// id, a `data:` icon, a non-empty rdns) are logged when broken but do
    /// not reject the announcement.
    pub fn validate(&self) -> Result<(), AnnouncementError> {
        if self.uuid.is_empty() {
            return Err(AnnouncementError::EmptyUuid);
        }
        if self.uuid == IMPLICIT_PROVIDER_KEY {
            return Err(AnnouncementError::ReservedUuid(self.uuid.clone()));
        }

        if uuid::Uuid::parse_str(&self.uuid).is_err() {
            debug!(uuid = %self.uuid, "provider uuid is not a UUID");
        }
        if self.rdns.trim().is_empty() {
            warn!(uuid = %self.uuid, "provider announced without rdns");
        }
        if !self.icon.starts_with("data:") {
            warn!(uuid = %self.uuid, "provider icon is not a data URI");
        }
        Ok(())
    }
}

/// An announcement: provider identity plus its transport.
#[derive(Clone)]
pub struct ProviderDetail {
    /// Provider identity.
    pub info: ProviderInfo,
    /// Handle to the provider.
    pub provider: SharedTransport,
}

impl fmt::Debug for ProviderDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDetail")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl ProviderDetail {
    /// Pair an identity with a transport.
    #[must_use]
    pub fn new(info: ProviderInfo, provider: SharedTransport) -> Self {
        Self { info, provider }
    }
}

/// The page environment providers are discovered from.
pub trait ProviderEnvironment: Send + Sync {
    /// The pre-installed global provider, if any.
    fn implicit_provider(&self) -> Option<SharedTransport>;

    /// Start listening for announcements.
    ///
    /// The receiver is unbounded: every announcement made after this call is
    /// delivered in order.
    fn subscribe_announcements(&self) -> mpsc::UnboundedReceiver<ProviderDetail>;

    /// Ask every loaded provider to announce itself.
    fn request_providers(&self);
}

/// In-process announcement bus.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct AnnouncementBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProviderDetail>>>,
    responders: Mutex<Vec<ProviderDetail>>,
    implicit: Mutex<Option<SharedTransport>>,
}

impl fmt::Debug for AnnouncementBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnouncementBus")
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .field("responders", &lock(&self.inner.responders).len())
            .field("implicit", &lock(&self.inner.implicit).is_some())
            .finish()
    }
}

impl Default for AnnouncementBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnouncementBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                responders: Mutex::new(Vec::new()),
                implicit: Mutex::new(None),
            }),
        }
    }

    /// Install a global provider.
    #[must_use]
    pub fn with_implicit_provider(self, provider: SharedTransport) -> Self {
        *lock(&self.inner.implicit) = Some(provider);
        self
    }

    /// Broadcast a one-off announcement. Returns the number of listeners that
    /// received it.
    ///
    /// Subscribers whose receiver has been dropped are forgotten.
    pub fn announce(&self, detail: ProviderDetail) -> usize {
        trace!(provider = %detail.info.name, uuid = %detail.info.uuid, "announcing provider");
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|tx| tx.send(detail.clone()).is_ok());
        subscribers.len()
    }

    /// Close every open subscription.
    ///
    /// Listeners stop once they have consumed what was already announced.
    pub fn close(&self) {
        lock(&self.inner.subscribers).clear();
    }

    /// Load a provider: it announces now and answers every later request.
    pub fn register(&self, detail: ProviderDetail) {
        lock(&self.inner.responders).push(detail.clone());
        self.announce(detail);
    }

    /// Number of providers that answer requests.
    #[must_use]
    pub fn responder_count(&self) -> usize {
        lock(&self.inner.responders).len()
    }
}

impl ProviderEnvironment for AnnouncementBus {
    fn implicit_provider(&self) -> Option<SharedTransport> {
        lock(&self.inner.implicit).clone()
    }

    fn subscribe_announcements(&self) -> mpsc::UnboundedReceiver<ProviderDetail> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    fn request_providers(&self) {
        let responders = lock(&self.inner.responders).clone();
        debug!(responders = responders.len(), "{REQUEST_PROVIDER_EVENT}");
        for detail in responders {
            self.announce(detail);
        }
    }
}
