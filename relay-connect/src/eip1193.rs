//! EIP-1193 provider transport contract.
//!
//! A [`Transport`] is anything that can answer JSON-RPC style requests and
//! emit the five provider lifecycle events. Raw event payloads are untrusted;
//! [`ProviderEvent::parse`] turns them into a typed representation before any
//! state is touched.
//!
//! See <https://eips.ethereum.org/EIPS/eip-1193>.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::chain_id_from_value;
use crate::error::{PayloadError, RpcError};
use crate::runtime::lock;

/// JSON-RPC method names used by sessions and readers.
pub mod methods {
    /// Returns the accounts the provider has authorised for this origin.
    pub const ETH_ACCOUNTS: &str = "eth_accounts";
    /// Returns the current chain id as a hex string.
    pub const ETH_CHAIN_ID: &str = "eth_chainId";
    /// Prompts the user to authorise accounts.
    pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    /// Executes a read-only contract call.
    pub const ETH_CALL: &str = "eth_call";
}

/// The provider lifecycle event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The provider became able to serve requests for a chain.
    Connect,
    /// The provider lost connection to all chains.
    Disconnect,
    /// A subscription or other provider message.
    Message,
    /// The active chain changed.
    ChainChanged,
    /// The authorised account list changed.
    AccountsChanged,
}

impl EventKind {
    /// Every event channel a session subscribes to.
    pub const ALL: [Self; 5] = [
        Self::Connect,
        Self::Disconnect,
        Self::Message,
        Self::ChainChanged,
        Self::AccountsChanged,
    ];

    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Message => "message",
            Self::ChainChanged => "chainChanged",
            Self::AccountsChanged => "accountsChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown provider event '{s}'"))
    }
}

/// Arguments of a provider request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    /// JSON-RPC method name.
    pub method: String,
    /// Positional or named parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestArguments {
    /// Request without parameters.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    /// Set the request parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a transport-allocated id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Callback invoked with the raw payload of a provider event.
///
/// The returned future is the event reaction; the transport decides whether
/// to await it inline or hand it to an executor.
pub type Listener = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// An EIP-1193 provider.
#[async_trait]
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement the `Transport` trait",
    label = "this type cannot be used as a wallet provider",
    note = "implement `Transport` to expose request/on/removeListener"
)]
pub trait Transport: Send + Sync {
    /// Submit a request and wait for its response.
    async fn request(&self, args: RequestArguments) -> Result<Value, RpcError>;

    /// Register a listener for an event channel.
    fn on(&self, event: EventKind, listener: Listener) -> ListenerId;

    /// Remove a previously registered listener. Returns `false` if it was not
    /// registered.
    fn remove_listener(&self, event: EventKind, id: ListenerId) -> bool;
}

/// A shared, type-erased provider transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Bookkeeping for transports that keep their own listener table.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(EventKind, ListenerId, Listener)>>,
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ListenerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and allocate its id.
    pub fn add(&self, event: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((event, id, listener));
        id
    }

    /// Remove a listener.
    pub fn remove(&self, event: EventKind, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(kind, lid, _)| !(*kind == event && *lid == id));
        listeners.len() != before
    }

    /// Listeners of one channel, in registration order.
    #[must_use]
    pub fn snapshot(&self, event: EventKind) -> Vec<Listener> {
        lock(&self.listeners)
            .iter()
            .filter(|(kind, _, _)| *kind == event)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect()
    }

    /// Total number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener of `event` in order, awaiting each reaction.
    pub async fn dispatch(&self, event: EventKind, payload: &Value) {
        for listener in self.snapshot(event) {
            listener(payload.clone()).await;
        }
    }
}

/// Payload of the `connect` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Chain the provider connected to, if it reported a usable one.
    pub chain_id: Option<u64>,
}

/// Payload of the `message` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderMessage {
    /// Message type, e.g. `eth_subscription`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body.
    #[serde(default)]
    pub data: Value,
}

/// A validated provider lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// `connect`
    Connect(ConnectInfo),
    /// `disconnect`
    Disconnect(RpcError),
    /// `message`
    Message(ProviderMessage),
    /// `chainChanged`; unparsable ids become `None`.
    ChainChanged(Option<u64>),
    /// `accountsChanged`
    AccountsChanged(Vec<String>),
}

impl ProviderEvent {
    /// Parse the raw payload delivered on `kind`.
    pub fn parse(kind: EventKind, payload: Value) -> Result<Self, PayloadError> {
        match kind {
            EventKind::Connect => match payload {
                Value::Object(map) => Ok(Self::Connect(ConnectInfo {
                    chain_id: map.get("chainId").and_then(chain_id_from_value),
                })),
                other => Err(PayloadError::malformed(
                    kind,
                    format!("expected an object, got {other}"),
                )),
            },
            EventKind::Disconnect => match payload {
                Value::Null => Ok(Self::Disconnect(RpcError::disconnected(
                    "The provider is disconnected from all chains.",
                ))),
                other => serde_json::from_value(other)
                    .map(Self::Disconnect)
                    .map_err(|e| PayloadError::malformed(kind, e)),
            },
            EventKind::Message => serde_json::from_value(payload)
                .map(Self::Message)
                .map_err(|e| PayloadError::malformed(kind, e)),
            EventKind::ChainChanged => Ok(Self::ChainChanged(chain_id_from_value(&payload))),
            EventKind::AccountsChanged => serde_json::from_value(payload)
                .map(Self::AccountsChanged)
                .map_err(|e| PayloadError::malformed(kind, e)),
        }
    }

    /// The channel this event belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Message(_) => EventKind::Message,
            Self::ChainChanged(_) => EventKind::ChainChanged,
            Self::AccountsChanged(_) => EventKind::AccountsChanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("chainchanged".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_parse_connect() {
        let event = ProviderEvent::parse(EventKind::Connect, json!({ "chainId": "0x5afd" })).unwrap();
        assert_eq!(
            event,
            ProviderEvent::Connect(ConnectInfo {
                chain_id: Some(0x5afd)
            })
        );

        let event = ProviderEvent::parse(EventKind::Connect, json!({})).unwrap();
        assert_eq!(event, ProviderEvent::Connect(ConnectInfo { chain_id: None }));

        assert!(ProviderEvent::parse(EventKind::Connect, json!("0x1")).is_err());
    }

    #[test]
    fn test_parse_disconnect() {
        let event = ProviderEvent::parse(
            EventKind::Disconnect,
            json!({ "code": 4900, "message": "bye" }),
        )
        .unwrap();
        assert!(matches!(event, ProviderEvent::Disconnect(ref e) if e.code == 4900));

        let event = ProviderEvent::parse(EventKind::Disconnect, Value::Null).unwrap();
        assert!(matches!(event, ProviderEvent::Disconnect(ref e) if e.code == RpcError::DISCONNECTED));
    }

    #[test]
    fn test_parse_chain_changed_is_lenient() {
        assert_eq!(
            ProviderEvent::parse(EventKind::ChainChanged, json!("0x5afe")).unwrap(),
            ProviderEvent::ChainChanged(Some(23294))
        );
        assert_eq!(
            ProviderEvent::parse(EventKind::ChainChanged, json!("garbage")).unwrap(),
            ProviderEvent::ChainChanged(None)
        );
    }

    #[test]
    fn test_parse_accounts_changed() {
        let event = ProviderEvent::parse(EventKind::AccountsChanged, json!(["0xabc"])).unwrap();
        assert_eq!(event, ProviderEvent::AccountsChanged(vec!["0xabc".into()]));
        assert_eq!(event.kind(), EventKind::AccountsChanged);

        let err = ProviderEvent::parse(EventKind::AccountsChanged, json!("0xabc")).unwrap_err();
        assert!(err.to_string().starts_with("malformed `accountsChanged` payload"));
    }

    #[test]
    fn test_parse_message() {
        let event = ProviderEvent::parse(
            EventKind::Message,
            json!({ "type": "eth_subscription", "data": { "subscription": "0x1" } }),
        )
        .unwrap();
        assert!(matches!(event, ProviderEvent::Message(ref m) if m.kind == "eth_subscription"));
        assert!(ProviderEvent::parse(EventKind::Message, json!(42)).is_err());
    }

    #[tokio::test]
    async fn test_listener_set_dispatch_and_remove() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let listener: Listener = Arc::new(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let id = set.add(EventKind::ChainChanged, Arc::clone(&listener));
        set.add(EventKind::AccountsChanged, listener);
        assert_eq!(set.len(), 2);

        set.dispatch(EventKind::ChainChanged, &json!("0x1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(!set.remove(EventKind::AccountsChanged, id));
        assert!(set.remove(EventKind::ChainChanged, id));
        set.dispatch(EventKind::ChainChanged, &json!("0x1")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }
}
