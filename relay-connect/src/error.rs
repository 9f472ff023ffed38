//! Unified error types for relay-connect.
//!
//! Provider request failures are modelled on the EIP-1193 `ProviderRpcError`
//! shape so that well-known codes (user rejection, disconnection, ...) can be
//! matched without string inspection. Every concern-specific error converts
//! into the top-level [`Error`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eip1193::EventKind;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for relay-connect operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A provider request failed.
    #[error("provider: {0}")]
    Rpc(#[from] RpcError),

    /// A provider answered with a payload of the wrong shape.
    #[error("invalid `{method}` response: {reason}")]
    InvalidResponse {
        /// The JSON-RPC method that was called.
        method: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Contract call error.
    #[error("contract: {0}")]
    Contract(#[from] ContractError),

    /// Could not reach a provider endpoint.
    #[error("failed to connect to '{url}': {reason}")]
    Connect {
        /// Endpoint that was dialled.
        url: String,
        /// Underlying failure.
        reason: String,
    },
}

impl Error {
    /// Create an invalid-response error.
    #[must_use]
    pub fn invalid_response(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidResponse {
            method: method.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for relay-connect operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Provider RPC Errors
// ============================================================================

/// A failed provider request, as reported by an EIP-1193 provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Provider-specific detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested method and/or account has not been authorized by the user.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The provider does not support the requested method.
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    /// The provider is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;
    /// The provider is not connected to the requested chain.
    pub const CHAIN_DISCONNECTED: i64 = 4901;

    /// Create an error with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach provider-specific data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A `4001 User Rejected Request` error.
    #[must_use]
    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected the request.")
    }

    /// A `4200 Unsupported Method` error.
    #[must_use]
    pub fn unsupported_method(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("The provider does not support `{method}`."),
        )
    }

    /// A `4900 Disconnected` error.
    #[must_use]
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(Self::DISCONNECTED, message)
    }

    /// Returns `true` if the user declined the request.
    #[inline]
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }
}

// ============================================================================
// Event Payload Errors
// ============================================================================

/// A provider event payload that could not be interpreted.
///
/// These never leave the subscription boundary; sessions log and drop them.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload did not have the shape the event requires.
    #[error("malformed `{event}` payload: {reason}")]
    Malformed {
        /// Event the payload was delivered on.
        event: EventKind,
        /// Why it was rejected.
        reason: String,
    },
}

impl PayloadError {
    /// Create a malformed-payload error.
    #[must_use]
    pub fn malformed(event: EventKind, reason: impl ToString) -> Self {
        Self::Malformed {
            event,
            reason: reason.to_string(),
        }
    }
}

/// An announced provider identity that fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnouncementError {
    /// The `uuid` field is empty.
    #[error("provider uuid must not be empty")]
    EmptyUuid,

    /// The `uuid` field collides with the implicit provider's key.
    #[error("provider uuid '{0}' is reserved")]
    ReservedUuid(String),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for deployment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Manifest is not valid JSON.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    MissingVar(String),

    /// A contract address does not parse.
    #[error("invalid address for {name}: '{value}'")]
    InvalidAddress {
        /// Contract name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// A network name is not one of `localnet`, `testnet`, `mainnet`.
    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    /// The deployment does not contain the named contract.
    #[error("contract {0} is not part of this deployment")]
    MissingContract(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Contract Errors
// ============================================================================

/// Error type for contract reads issued through a provider.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// The `eth_call` request failed.
    #[error("call failed: {0}")]
    Rpc(#[from] RpcError),

    /// The call result was not a hex string.
    #[error("{function}: {reason}")]
    InvalidResponse {
        /// Solidity signature of the function.
        function: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The call result did not ABI-decode.
    #[error("{function}: failed to decode return data: {reason}")]
    Decode {
        /// Solidity signature of the function.
        function: &'static str,
        /// Decoder message.
        reason: String,
    },
}

/// Result type for contract operations.
pub type ContractResult<T> = std::result::Result<T, ContractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_roundtrips_provider_shape() {
        let raw = serde_json::json!({ "code": 4001, "message": "User rejected the request." });
        let err: RpcError = serde_json::from_value(raw).unwrap();
        assert!(err.is_user_rejection());
        assert_eq!(err.data, None);
        assert_eq!(err.to_string(), "[4001] User rejected the request.");
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = RpcError::disconnected("gone").into();
        assert!(matches!(err, Error::Rpc(ref e) if e.code == RpcError::DISCONNECTED));

        let err: Error = ConfigError::UnknownNetwork("devnet".into()).into();
        assert_eq!(err.to_string(), "config: unknown network 'devnet'");
    }
}
