//! Provider sessions.
//!
//! A [`ProviderSession`] mirrors one provider's connectivity, chain and
//! account list. It subscribes to the provider's lifecycle events when
//! constructed, seeds its state with `eth_accounts` / `eth_chainId`, and
//! offers a single user action, [`connect`](ProviderSession::connect).
//!
//! # Out-of-order responses
//!
//! Event reactions and requests interleave freely. Every request and every
//! event takes a ticket from a per-session counter, and the account list and
//! chain id each remember the ticket of their last applied write. A response
//! holding an older ticket than that is discarded, so a late `eth_accounts`
//! answer cannot resurrect accounts cleared by a later `disconnect`.
//!
//! # Observing state
//!
//! [`subscribe`](ProviderSession::subscribe) returns a `watch` receiver that
//! is notified after every applied change.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::{chain_id_from_value, chain_name};
use crate::eip1193::{
    EventKind, Listener, ListenerId, ProviderEvent, RequestArguments, SharedTransport, methods,
};
use crate::eip6963::{ProviderDetail, ProviderInfo};
use crate::error::{Error, Result};
use crate::runtime::{lock, spawn};

/// Snapshot of a session's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// `true` iff `accounts` is a non-empty list.
    pub connected: bool,
    /// Active chain, once known.
    pub chain_id: Option<u64>,
    /// Authorised accounts, once known.
    pub accounts: Option<Vec<String>>,
}

impl SessionState {
    /// Human-readable chain name.
    #[must_use]
    pub fn chain_name(&self) -> Option<String> {
        chain_name(self.chain_id)
    }
}

#[derive(Debug, Default)]
struct Tickets {
    issued: u64,
    accounts: u64,
    chain: u64,
}

impl Tickets {
    fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }
}

struct SessionInner {
    info: ProviderInfo,
    transport: SharedTransport,
    state: watch::Sender<SessionState>,
    tickets: Mutex<Tickets>,
    /// `None` once disposed.
    subscriptions: Mutex<Option<Vec<(EventKind, ListenerId)>>>,
}

impl SessionInner {
    fn release_listeners(&self) -> bool {
        let Some(subscriptions) = lock(&self.subscriptions).take() else {
            return false;
        };
        for (event, id) in subscriptions {
            self.transport.remove_listener(event, id);
        }
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.release_listeners();
    }
}

/// A connected-or-connectable wallet provider.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ProviderSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("info", &self.inner.info)
            .field("state", &*self.inner.state.borrow())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ProviderSession {
    /// Create a session for a discovered provider.
    ///
    /// Subscribes to the five lifecycle events and spawns the two seed reads
    /// on the ambient executor.
    ///
    /// Call this from within a tokio runtime (or, on wasm32, the browser event
    /// loop). Without one the seed reads are skipped with an `error!` log and
    /// the state stays empty until an event arrives or
    /// [`refresh`](Self::refresh) is awaited.
    #[must_use]
    pub fn new(detail: ProviderDetail) -> Self {
        let ProviderDetail { info, provider } = detail;
        let (state, _) = watch::channel(SessionState::default());

        let session = Self {
            inner: Arc::new(SessionInner {
                info,
                transport: provider,
                state,
                tickets: Mutex::new(Tickets::default()),
                subscriptions: Mutex::new(Some(Vec::new())),
            }),
        };

        session.subscribe_events();

        let accounts = session.clone();
        spawn(async move { accounts.refresh_accounts().await });
        let chain = session.clone();
        spawn(async move { chain.refresh_chain_id().await });

        session
    }

    fn subscribe_events(&self) {
        let subscriptions: Vec<_> = EventKind::ALL
            .into_iter()
            .map(|event| {
                let id = self
                    .inner
                    .transport
                    .on(event, Self::listener(Arc::downgrade(&self.inner), event));
                (event, id)
            })
            .collect();
        *lock(&self.inner.subscriptions) = Some(subscriptions);
    }

    fn listener(session: Weak<SessionInner>, event: EventKind) -> Listener {
        Arc::new(move |payload: Value| {
            let session = session.clone();
            async move {
                if let Some(inner) = session.upgrade() {
                    Self { inner }.on_raw_event(event, payload).await;
                }
            }
            .boxed()
        })
    }

    /// Provider identity.
    #[must_use]
    pub fn info(&self) -> &ProviderInfo {
        &self.inner.info
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &SharedTransport {
        &self.inner.transport
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Whether the provider has exposed at least one account.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.state.borrow().connected
    }

    /// Active chain id.
    #[must_use]
    pub fn chain_id(&self) -> Option<u64> {
        self.inner.state.borrow().chain_id
    }

    /// Authorised accounts.
    #[must_use]
    pub fn accounts(&self) -> Option<Vec<String>> {
        self.inner.state.borrow().accounts.clone()
    }

    /// Human-readable chain name; `Unknown (<id>)` for unlisted chains.
    #[must_use]
    pub fn chain_name(&self) -> Option<String> {
        chain_name(self.chain_id())
    }

    /// Watch for state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.subscriptions).is_none()
    }

    /// Ask the user to authorise accounts.
    ///
    /// Returns `Ok(false)` if the user declined. Any other provider failure
    /// is returned as an error and leaves the state untouched.
    ///
    /// # Errors
    ///
    /// [`Error::Rpc`] for provider failures other than a rejection and
    /// [`Error::InvalidResponse`] if the provider answered with something
    /// other than an account list.
    pub async fn connect(&self) -> Result<bool> {
        let ticket = self.issue_ticket();
        let response = self
            .inner
            .transport
            .request(RequestArguments::new(methods::ETH_REQUEST_ACCOUNTS))
            .await;

        match response {
            Ok(value) => {
                let accounts = parse_accounts(value)
                    .map_err(|e| Error::invalid_response(methods::ETH_REQUEST_ACCOUNTS, e))?;
                info!(
                    provider = %self.inner.info.name,
                    accounts = accounts.len(),
                    "provider connected",
                );
                self.apply_accounts(ticket, accounts);
                Ok(true)
            }
            Err(err) if err.is_user_rejection() => {
                info!(provider = %self.inner.info.name, "user rejected connection");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Re-read the account list and chain id from the provider.
    ///
    /// Does the same work as the reads spawned by [`new`](Self::new), but
    /// in the caller's task. Failures are logged and leave the state as is.
    pub async fn refresh(&self) {
        futures::join!(self.refresh_accounts(), self.refresh_chain_id());
    }

    /// Unsubscribe from all provider events. Idempotent.
    ///
    /// Requests already in flight still complete.
    pub fn dispose(&self) {
        if self.inner.release_listeners() {
            debug!(provider = %self.inner.info.name, "session disposed");
        }
    }

    async fn on_raw_event(&self, event: EventKind, payload: Value) {
        if self.is_disposed() {
            return;
        }
        match ProviderEvent::parse(event, payload) {
            Ok(event) => self.on_event(event).await,
            Err(err) => {
                warn!(provider = %self.inner.info.name, error = %err, "dropping provider event");
            }
        }
    }

    async fn on_event(&self, event: ProviderEvent) {
        let provider = &self.inner.info.name;
        match event {
            ProviderEvent::Connect(info) => {
                debug!(%provider, chain_id = ?info.chain_id, "provider connect event");
                let ticket = self.issue_ticket();
                self.apply_chain_id(ticket, info.chain_id);
                self.refresh_accounts().await;
            }
            ProviderEvent::Disconnect(reason) => {
                debug!(%provider, %reason, "provider disconnect event");
                let ticket = self.issue_ticket();
                self.apply_disconnect(ticket);
            }
            ProviderEvent::Message(message) => {
                debug!(%provider, kind = %message.kind, data = %message.data, "provider message");
            }
            ProviderEvent::ChainChanged(chain_id) => {
                let ticket = self.issue_ticket();
                self.apply_chain_id(ticket, chain_id);
            }
            ProviderEvent::AccountsChanged(accounts) => {
                let ticket = self.issue_ticket();
                self.apply_accounts(ticket, accounts);
            }
        }
    }

    async fn refresh_accounts(&self) {
        let ticket = self.issue_ticket();
        let response = self
            .inner
            .transport
            .request(RequestArguments::new(methods::ETH_ACCOUNTS))
            .await;

        match response.map(parse_accounts) {
            Ok(Ok(accounts)) => {
                self.apply_accounts(ticket, accounts);
            }
            Ok(Err(err)) => {
                warn!(provider = %self.inner.info.name, error = %err, "malformed eth_accounts response");
            }
            Err(err) => {
                warn!(provider = %self.inner.info.name, error = %err, "eth_accounts failed");
            }
        }
    }

    async fn refresh_chain_id(&self) {
        let ticket = self.issue_ticket();
        let response = self
            .inner
            .transport
            .request(RequestArguments::new(methods::ETH_CHAIN_ID))
            .await;

        match response {
            Ok(value) => {
                self.apply_chain_id(ticket, chain_id_from_value(&value));
            }
            Err(err) => {
                warn!(provider = %self.inner.info.name, error = %err, "eth_chainId failed");
            }
        }
    }

    fn issue_ticket(&self) -> u64 {
        lock(&self.inner.tickets).issue()
    }

    fn apply_accounts(&self, ticket: u64, accounts: Vec<String>) -> bool {
        let mut tickets = lock(&self.inner.tickets);
        if ticket < tickets.accounts {
            debug!(provider = %self.inner.info.name, ticket, "discarding stale account list");
            return false;
        }
        tickets.accounts = ticket;
        self.inner.state.send_modify(|state| {
            state.connected = !accounts.is_empty();
            state.accounts = Some(accounts);
        });
        true
    }

    fn apply_chain_id(&self, ticket: u64, chain_id: Option<u64>) -> bool {
        let mut tickets = lock(&self.inner.tickets);
        if ticket < tickets.chain {
            debug!(provider = %self.inner.info.name, ticket, "discarding stale chain id");
            return false;
        }
        tickets.chain = ticket;
        if let Some(id) = chain_id {
            debug!(provider = %self.inner.info.name, chain_id = id, "chain changed");
        }
        self.inner.state.send_modify(|state| state.chain_id = chain_id);
        true
    }

    fn apply_disconnect(&self, ticket: u64) {
        let mut tickets = lock(&self.inner.tickets);
        tickets.accounts = tickets.accounts.max(ticket);
        tickets.chain = tickets.chain.max(ticket);
        self.inner.state.send_modify(|state| *state = SessionState::default());
    }
}

fn parse_accounts(value: Value) -> serde_json::Result<Vec<String>> {
    serde_json::from_value(value)
}
