//! Provider registry.
//!
//! Tracks every discovered wallet as a [`ProviderSession`], keyed by the
//! provider's announced uuid. Discovery starts from whatever global provider
//! the page ships with (registered under [`IMPLICIT_PROVIDER_KEY`]) and
//! switches permanently to announced providers once the first valid
//! EIP-6963 announcement arrives.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::eip6963::{IMPLICIT_PROVIDER_KEY, ProviderDetail, ProviderEnvironment, ProviderInfo};
use crate::session::ProviderSession;

/// How providers are currently being discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DiscoveryMode {
    /// Nothing discovered yet.
    #[default]
    None,
    /// Only the global fallback provider is known.
    Implicit,
    /// At least one provider has announced itself. Never left again.
    Explicit,
}

impl DiscoveryMode {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    /// Discovery mode.
    pub mode: DiscoveryMode,
    /// Sessions in registration order.
    pub sessions: Vec<ProviderSession>,
}

impl RegistryState {
    /// Look up a session by provider id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProviderSession> {
        self.sessions.iter().find(|s| s.info().uuid == id)
    }

    /// Whether a session is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Provider ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.info().uuid.clone()).collect()
    }
}

struct RegistryInner {
    state: watch::Sender<RegistryState>,
    initialized: AtomicBool,
}

/// The set of known providers.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ProviderRegistry")
            .field("mode", &state.mode)
            .field("providers", &state.ids())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(RegistryState::default());
        Self {
            inner: Arc::new(RegistryInner {
                state,
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Start discovery. Only the first call has any effect.
    ///
    /// Registers the environment's global provider, if any, subscribes to
    /// announcements and asks every loaded provider to announce itself. The
    /// returned listener must be driven for announcements to be processed.
    ///
    /// Must be called from within a tokio runtime (or, on wasm32, the browser
    /// event loop). Sessions spawn their seed reads on construction and skip
    /// them otherwise; see [`ProviderSession::new`].
    pub fn initialize(&self, env: &dyn ProviderEnvironment) -> Option<AnnouncementListener> {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            debug!("provider registry already initialized");
            return None;
        }

        if let Some(provider) = env.implicit_provider() {
            let session = ProviderSession::new(ProviderDetail::new(ProviderInfo::implicit(), provider));
            let registered = self.inner.state.send_if_modified(|state| {
                if state.mode != DiscoveryMode::None {
                    return false;
                }
                state.mode = DiscoveryMode::Implicit;
                state.sessions.push(session);
                true
            });
            if registered {
                info!(provider = IMPLICIT_PROVIDER_KEY, "registered implicit provider");
            }
        }

        let announcements = env.subscribe_announcements();
        env.request_providers();

        Some(AnnouncementListener {
            registry: self.clone(),
            announcements,
        })
    }

    /// Handle one provider announcement.
    ///
    /// Returns `true` if a new session was registered. Invalid identities and
    /// already-known ids are ignored. The first accepted announcement evicts
    /// the implicit provider.
    pub fn on_announce(&self, detail: ProviderDetail) -> bool {
        if let Err(err) = detail.info.validate() {
            warn!(provider = %detail.info.name, error = %err, "ignoring invalid provider announcement");
            return false;
        }

        let id = detail.info.uuid.clone();
        let name = detail.info.name.clone();
        let mut evicted = None;

        let registered = self.inner.state.send_if_modified(|state| {
            if state.contains(&id) {
                return false;
            }
            if let Some(pos) = state
                .sessions
                .iter()
                .position(|s| s.info().uuid == IMPLICIT_PROVIDER_KEY)
            {
                evicted = Some(state.sessions.remove(pos));
            }
            state.mode = DiscoveryMode::Explicit;
            state.sessions.push(ProviderSession::new(detail));
            true
        });

        if let Some(session) = evicted {
            session.dispose();
            info!("implicit provider replaced by announced providers");
        }

        if registered {
            info!(provider = %name, uuid = %id, "registered provider");
        } else {
            debug!(provider = %name, uuid = %id, "duplicate provider announcement");
        }
        registered
    }

    /// Discovery mode.
    #[must_use]
    pub fn mode(&self) -> DiscoveryMode {
        self.inner.state.borrow().mode
    }

    /// Whether only the global fallback provider is known.
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.mode() == DiscoveryMode::Implicit
    }

    /// Whether providers are discovered through announcements.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.mode() == DiscoveryMode::Explicit
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().sessions.len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().sessions.is_empty()
    }

    /// Session registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ProviderSession> {
        self.inner.state.borrow().get(id).cloned()
    }

    /// Sessions in registration order.
    #[must_use]
    pub fn sessions(&self) -> Vec<ProviderSession> {
        self.inner.state.borrow().sessions.clone()
    }

    /// Provider ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.inner.state.borrow().ids()
    }

    /// Watch for registry changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RegistryState> {
        self.inner.state.subscribe()
    }
}

/// Feeds announcements into a [`ProviderRegistry`], in arrival order.
pub struct AnnouncementListener {
    registry: ProviderRegistry,
    announcements: mpsc::UnboundedReceiver<ProviderDetail>,
}

impl fmt::Debug for AnnouncementListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnouncementListener")
            .field("pending", &self.announcements.len())
            .finish_non_exhaustive()
    }
}

impl AnnouncementListener {
    /// Process announcements until the bus closes.
    pub async fn run(mut self) {
        while let Some(detail) = self.announcements.recv().await {
            self.registry.on_announce(detail);
        }
        debug!("announcement bus closed");
    }

    /// Process every announcement already queued. Returns how many were
    /// registered.
    pub fn drain(&mut self) -> usize {
        let mut registered = 0;
        while let Ok(detail) = self.announcements.try_recv() {
            if self.registry.on_announce(detail) {
                registered += 1;
            }
        }
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip1193::{EventKind, SharedTransport};
    use crate::eip6963::AnnouncementBus;
    use crate::transport::MemoryProvider;
    use serde_json::json;

    fn announced(name: &str, wallet: &Arc<MemoryProvider>) -> ProviderDetail {
        ProviderDetail::new(
            ProviderInfo::generate(name, format!("org.example.{}", name.to_lowercase())),
            Arc::clone(wallet) as SharedTransport,
        )
    }

    #[tokio::test]
    async fn test_no_providers() {
        let registry = ProviderRegistry::new();
        let bus = AnnouncementBus::new();

        let mut listener = registry.initialize(&bus).unwrap();
        assert_eq!(listener.drain(), 0);

        assert_eq!(registry.mode(), DiscoveryMode::None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_implicit_only() {
        let implicit = Arc::new(MemoryProvider::new().with_chain_id(0x5afe));
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::clone(&implicit) as SharedTransport);
        let registry = ProviderRegistry::new();

        let mut listener = registry.initialize(&bus).unwrap();
        listener.drain();

        assert!(registry.is_implicit());
        assert_eq!(registry.ids(), [IMPLICIT_PROVIDER_KEY]);
        let session = registry.get(IMPLICIT_PROVIDER_KEY).unwrap();
        assert_eq!(session.info().name, "window.ethereum (EIP-1193)");
        assert_eq!(implicit.listener_count(), 5);
    }

    #[tokio::test]
    async fn test_implicit_then_announced() {
        let implicit = Arc::new(MemoryProvider::new());
        let p1 = Arc::new(MemoryProvider::new());
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::clone(&implicit) as SharedTransport);
        let detail = announced("P1", &p1);
        let p1_id = detail.info.uuid.clone();
        bus.register(detail);

        let registry = ProviderRegistry::new();
        let mut listener = registry.initialize(&bus).unwrap();
        assert_eq!(listener.drain(), 1);

        assert!(registry.is_explicit());
        assert_eq!(registry.ids(), [p1_id]);
        assert!(registry.get(IMPLICIT_PROVIDER_KEY).is_none());
        assert_eq!(implicit.listener_count(), 0);
        assert_eq!(p1.listener_count(), 5);
    }

    #[tokio::test]
    async fn test_plain_string_id_evicts_implicit_provider() {
        let implicit = Arc::new(MemoryProvider::new());
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::clone(&implicit) as SharedTransport);
        let registry = ProviderRegistry::new();
        let mut listener = registry.initialize(&bus).unwrap();
        assert!(registry.is_implicit());

        let p1 = Arc::new(MemoryProvider::new());
        bus.announce(ProviderDetail::new(
            ProviderInfo::new("p1", "P1", "data:image/svg+xml,x", "org.example.p1"),
            Arc::clone(&p1) as SharedTransport,
        ));
        assert_eq!(listener.drain(), 1);

        assert_eq!(registry.ids(), ["p1"]);
        assert!(registry.is_explicit());
        assert_eq!(implicit.listener_count(), 0);
        assert_eq!(p1.listener_count(), 5);
    }

    #[tokio::test]
    async fn test_remote_icon_is_accepted() {
        let registry = ProviderRegistry::new();
        let info = ProviderInfo::new(
            "350670db-19fa-4704-a166-e52e178b59d2",
            "Remote Icon",
            "https://example.org/icon.png",
            "org.example.remote",
        );
        assert!(registry.on_announce(ProviderDetail::new(info, Arc::new(MemoryProvider::new()))));
        assert!(registry.is_explicit());
    }

    #[tokio::test]
    async fn test_many_providers_are_all_registered() {
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::new(MemoryProvider::new()));
        for i in 0..40 {
            bus.register(announced(&format!("P{i}"), &Arc::new(MemoryProvider::new())));
        }
        assert_eq!(bus.responder_count(), 40);

        let registry = ProviderRegistry::new();
        let mut listener = registry.initialize(&bus).unwrap();
        assert_eq!(listener.drain(), 40);

        assert_eq!(registry.len(), 40);
        assert_eq!(registry.sessions()[0].info().name, "P0");
        assert_eq!(registry.sessions()[39].info().name, "P39");
    }

    #[tokio::test]
    async fn test_evicted_implicit_session_ignores_events() {
        let implicit = Arc::new(MemoryProvider::new().with_accounts(["0xabc"]).authorized(true));
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::clone(&implicit) as SharedTransport);
        let registry = ProviderRegistry::new();
        let mut listener = registry.initialize(&bus).unwrap();

        let sentinel = registry.get(IMPLICIT_PROVIDER_KEY).unwrap();
        registry.on_announce(announced("P1", &Arc::new(MemoryProvider::new())));
        listener.drain();

        assert!(sentinel.is_disposed());
        let before = sentinel.state();
        implicit.emit(EventKind::ChainChanged, json!("0x1")).await;
        assert_eq!(sentinel.state(), before);
    }

    #[tokio::test]
    async fn test_duplicate_announcements_are_ignored() {
        let registry = ProviderRegistry::new();
        let wallet = Arc::new(MemoryProvider::new());
        let detail = announced("P1", &wallet);

        assert!(registry.on_announce(detail.clone()));
        let first = registry.get(&detail.info.uuid).unwrap();
        assert!(!registry.on_announce(detail.clone()));

        assert_eq!(registry.len(), 1);
        assert_eq!(wallet.listener_count(), 5);
        assert!(!first.is_disposed());
    }

    #[tokio::test]
    async fn test_invalid_announcements_are_ignored() {
        let registry = ProviderRegistry::new();
        let wallet: SharedTransport = Arc::new(MemoryProvider::new());

        assert!(!registry.on_announce(ProviderDetail::new(ProviderInfo::implicit(), Arc::clone(&wallet))));
        let mut info = ProviderInfo::generate("Broken", "org.example");
        info.uuid.clear();
        assert!(!registry.on_announce(ProviderDetail::new(info, wallet)));

        assert_eq!(registry.mode(), DiscoveryMode::None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_insertion_order_and_sentinel_never_returns() {
        let implicit = Arc::new(MemoryProvider::new());
        let bus = AnnouncementBus::new().with_implicit_provider(Arc::clone(&implicit) as SharedTransport);
        let registry = ProviderRegistry::new();
        let mut listener = registry.initialize(&bus).unwrap();

        let mut expected = Vec::new();
        for name in ["P1", "P2", "P3"] {
            let detail = announced(name, &Arc::new(MemoryProvider::new()));
            expected.push(detail.info.uuid.clone());
            bus.register(detail);
        }
        bus.request_providers();
        assert_eq!(listener.drain(), 3);

        assert_eq!(registry.ids(), expected);
        assert!(registry.is_explicit());
        assert!(registry.initialize(&bus).is_none());
        assert!(registry.get(IMPLICIT_PROVIDER_KEY).is_none());
        assert_eq!(implicit.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_runs_until_bus_closes() {
        let registry = ProviderRegistry::new();
        let bus = AnnouncementBus::new();
        let listener = registry.initialize(&bus).unwrap();
        let task = tokio::spawn(listener.run());

        let mut rx = registry.subscribe();
        bus.announce(announced("P1", &Arc::new(MemoryProvider::new())));
        rx.wait_for(|s| s.sessions.len() == 1).await.unwrap();
        assert!(registry.is_explicit());

        drop(rx);
        drop(bus);
        task.await.unwrap();
    }
}
