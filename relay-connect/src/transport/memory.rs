//! In-process EIP-1193 provider.
//!
//! [`MemoryProvider`] behaves like a browser wallet without a browser: it
//! keeps an account list and a chain id, answers the standard account and
//! chain requests, can be told to reject or fail requests, can hold a method's
//! responses until released, and emits lifecycle events on demand.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::trace;

use crate::eip1193::{EventKind, Listener, ListenerId, ListenerSet, RequestArguments, Transport, methods};
use crate::error::RpcError;
use crate::runtime::lock;

/// Custom request handler: receives the request params.
pub type RequestHandler = Arc<dyn Fn(Option<&Value>) -> Result<Value, RpcError> + Send + Sync>;

#[derive(Default)]
struct WalletState {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: Option<u64>,
    reject_connect: bool,
    handlers: HashMap<String, RequestHandler>,
    requests: Vec<String>,
}

/// A scriptable in-process wallet provider.
#[derive(Default)]
pub struct MemoryProvider {
    listeners: ListenerSet,
    state: Mutex<WalletState>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryProvider")
            .field("accounts", &state.accounts)
            .field("authorized", &state.authorized)
            .field("chain_id", &state.chain_id)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl MemoryProvider {
    /// A provider with no accounts and no chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chain the provider reports.
    #[must_use]
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        lock(&self.state).chain_id = Some(chain_id);
        self
    }

    /// Set the wallet's accounts. They are only exposed once authorised.
    #[must_use]
    pub fn with_accounts<I, S>(self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).accounts = accounts.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the origin as already authorised (accounts visible without a prompt).
    #[must_use]
    pub fn authorized(self, authorized: bool) -> Self {
        lock(&self.state).authorized = authorized;
        self
    }

    /// Make `eth_requestAccounts` answer with a user rejection.
    pub fn reject_connect(&self, reject: bool) {
        lock(&self.state).reject_connect = reject;
    }

    /// Serve `method` with a custom handler.
    pub fn handle<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<&Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        lock(&self.state)
            .handlers
            .insert(method.into(), Arc::new(handler));
    }

    /// Make every `method` request fail with `error`.
    pub fn fail(&self, method: impl Into<String>, error: RpcError) {
        self.handle(method, move |_| Err(error.clone()));
    }

    /// Hold responses to `method` until [`release`](Self::release) is called.
    ///
    /// The response is computed when the request arrives, so a held response
    /// reflects the wallet state at request time.
    pub fn pause(&self, method: impl Into<String>) {
        lock(&self.gates).insert(method.into(), Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held `method` responses through.
    pub fn release(&self, method: &str, count: usize) {
        if let Some(gate) = lock(&self.gates).get(method) {
            gate.add_permits(count);
        }
    }

    /// Methods requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state).requests.clone()
    }

    /// Number of registered event listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver a raw event payload to every listener, awaiting each reaction.
    pub async fn emit(&self, event: EventKind, payload: Value) {
        trace!(%event, %payload, "memory provider emitting event");
        self.listeners.dispatch(event, &payload).await;
    }

    /// Switch chains and emit `chainChanged`.
    pub async fn switch_chain(&self, chain_id: u64) {
        lock(&self.state).chain_id = Some(chain_id);
        self.emit(EventKind::ChainChanged, json!(format!("{chain_id:#x}")))
            .await;
    }

    /// Replace the account list and emit `accountsChanged`.
    pub async fn change_accounts<I, S>(&self, accounts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let visible = {
            let mut state = lock(&self.state);
            state.accounts = accounts.into_iter().map(Into::into).collect();
            state.visible_accounts()
        };
        self.emit(EventKind::AccountsChanged, json!(visible)).await;
    }

    /// Emit `connect` for the current chain.
    pub async fn announce_connect(&self) {
        let chain_id = lock(&self.state).chain_id.map(|id| format!("{id:#x}"));
        self.emit(EventKind::Connect, json!({ "chainId": chain_id }))
            .await;
    }

    /// Emit `disconnect` with a `4900` error.
    pub async fn announce_disconnect(&self) {
        let error = RpcError::disconnected("The provider is disconnected from all chains.");
        self.emit(EventKind::Disconnect, json!(error)).await;
    }

    fn respond(&self, args: &RequestArguments) -> Result<Value, RpcError> {
        let mut state = lock(&self.state);
        state.requests.push(args.method.clone());

        if let Some(handler) = state.handlers.get(&args.method).cloned() {
            drop(state);
            return handler(args.params.as_ref());
        }

        match args.method.as_str() {
            methods::ETH_CHAIN_ID => Ok(state
                .chain_id
                .map_or(Value::Null, |id| json!(format!("{id:#x}")))),
            methods::ETH_ACCOUNTS => Ok(json!(state.visible_accounts())),
            methods::ETH_REQUEST_ACCOUNTS => {
                if state.reject_connect {
                    return Err(RpcError::user_rejected());
                }
                state.authorized = true;
                Ok(json!(state.accounts))
            }
            other => Err(RpcError::unsupported_method(other)),
        }
    }
}

impl WalletState {
    fn visible_accounts(&self) -> Vec<String> {
        if self.authorized {
            self.accounts.clone()
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl Transport for MemoryProvider {
    async fn request(&self, args: RequestArguments) -> Result<Value, RpcError> {
        let response = self.respond(&args);

        let gate = lock(&self.gates).get(&args.method).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        response
    }

    fn on(&self, event: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn remove_listener(&self, event: EventKind, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    #[tokio::test]
    async fn test_accounts_hidden_until_authorised() {
        let wallet = MemoryProvider::new().with_accounts([ALICE]);

        let accounts = wallet
            .request(RequestArguments::new(methods::ETH_ACCOUNTS))
            .await
            .unwrap();
        assert_eq!(accounts, json!([]));

        let accounts = wallet
            .request(RequestArguments::new(methods::ETH_REQUEST_ACCOUNTS))
            .await
            .unwrap();
        assert_eq!(accounts, json!([ALICE]));

        let accounts = wallet
            .request(RequestArguments::new(methods::ETH_ACCOUNTS))
            .await
            .unwrap();
        assert_eq!(accounts, json!([ALICE]));
    }

    #[tokio::test]
    async fn test_chain_id_is_hex() {
        let wallet = MemoryProvider::new().with_chain_id(0x5aff);
        let chain = wallet
            .request(RequestArguments::new(methods::ETH_CHAIN_ID))
            .await
            .unwrap();
        assert_eq!(chain, json!("0x5aff"));

        let chain = MemoryProvider::new()
            .request(RequestArguments::new(methods::ETH_CHAIN_ID))
            .await
            .unwrap();
        assert_eq!(chain, Value::Null);
    }

    #[tokio::test]
    async fn test_rejection_and_failures() {
        let wallet = MemoryProvider::new();
        wallet.reject_connect(true);
        let err = wallet
            .request(RequestArguments::new(methods::ETH_REQUEST_ACCOUNTS))
            .await
            .unwrap_err();
        assert!(err.is_user_rejection());

        wallet.fail(methods::ETH_CHAIN_ID, RpcError::new(-32603, "internal"));
        let err = wallet
            .request(RequestArguments::new(methods::ETH_CHAIN_ID))
            .await
            .unwrap_err();
        assert_eq!(err.code, -32603);

        let err = wallet
            .request(RequestArguments::new("eth_sign"))
            .await
            .unwrap_err();
        assert_eq!(err.code, RpcError::UNSUPPORTED_METHOD);

        assert_eq!(
            wallet.requests(),
            [methods::ETH_REQUEST_ACCOUNTS, methods::ETH_CHAIN_ID, "eth_sign"]
        );
    }

    #[tokio::test]
    async fn test_pause_holds_response_until_release() {
        let wallet = MemoryProvider::new().with_chain_id(1);
        wallet.pause(methods::ETH_CHAIN_ID);

        let mut pending = task::spawn(wallet.request(RequestArguments::new(methods::ETH_CHAIN_ID)));
        assert_pending!(pending.poll());

        wallet.release(methods::ETH_CHAIN_ID, 1);
        assert!(pending.is_woken());
        assert_eq!(assert_ready_ok!(pending.poll()), json!("0x1"));
    }
}
