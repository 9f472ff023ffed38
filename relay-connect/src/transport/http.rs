//! JSON-RPC over HTTP as an EIP-1193 transport.
//!
//! Built on [`alloy`]'s provider stack. A plain node has no notion of user
//! consent and no push channel, so `eth_requestAccounts` is answered with the
//! node's `eth_accounts` and registered listeners are never invoked.

use std::borrow::Cow;
use std::fmt;

use alloy::network::Ethereum;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::eip1193::{EventKind, Listener, ListenerId, ListenerSet, RequestArguments, Transport, methods};
use crate::error::{Error, Result, RpcError};

/// A JSON-RPC node reached over HTTP.
pub struct HttpProvider {
    url: String,
    provider: DynProvider<Ethereum>,
    listeners: ListenerSet,
}

impl fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProvider")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl HttpProvider {
    /// Connect to a JSON-RPC endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| Error::Connect {
                url: url.to_owned(),
                reason: e.to_string(),
            })?
            .erased();

        info!(url = %url, "HTTP provider ready");

        Ok(Self {
            url: url.to_owned(),
            provider,
            listeners: ListenerSet::new(),
        })
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpProvider {
    async fn request(&self, args: RequestArguments) -> std::result::Result<Value, RpcError> {
        let method = match args.method.as_str() {
            methods::ETH_REQUEST_ACCOUNTS => methods::ETH_ACCOUNTS,
            other => other,
        };
        let params = args.params.unwrap_or_else(|| Value::Array(Vec::new()));

        debug!(url = %self.url, method = %method, "forwarding request");

        self.provider
            .raw_request::<Value, Value>(Cow::Owned(method.to_owned()), params)
            .await
            .map_err(rpc_error_from_transport)
    }

    fn on(&self, event: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn remove_listener(&self, event: EventKind, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }
}

/// Map an alloy transport failure onto the EIP-1193 error shape.
///
/// JSON-RPC error responses keep their code; everything else (connection
/// refused, bad status, undecodable body) is reported as a disconnection.
fn rpc_error_from_transport(err: TransportError) -> RpcError {
    if let Some(payload) = err.as_error_resp() {
        let data = payload
            .data
            .as_ref()
            .and_then(|raw| serde_json::from_str(raw.get()).ok());
        return RpcError {
            code: payload.code,
            message: payload.message.to_string(),
            data,
        };
    }
    RpcError::disconnected(err.to_string())
}
