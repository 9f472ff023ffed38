//! Read-only bindings for the BTC relay contract.
//!
//! Calls are ABI-encoded with [`alloy::sol!`] bindings and sent as
//! `eth_call` through any [`Transport`](crate::eip1193::Transport), so the
//! same reader works against a wallet session or a plain JSON-RPC node.

use alloy::primitives::{Address, B256, U256, hex};
use alloy::sol_types::SolCall;
use serde_json::{Value, json};
use tracing::debug;

use crate::eip1193::{RequestArguments, SharedTransport, methods};
use crate::error::{ContractError, ContractResult};

alloy::sol! {
    /// BTC relay read surface.
    interface IBtcRelay {
        struct ChainParams {
            string name;
            uint32 magic;
            uint8 pubkeyAddrPrefix;
            uint8 scriptAddrPrefix;
        }

        function getBlockHash(uint256 in_height) external view returns (bytes32);
        function getLatestBlockHeight() external view returns (uint256);
        function getLatestBlockTime() external view returns (uint256);
        function getMinConfirmations() external pure returns (uint256);
        function isTestnet() external view returns (bool);
        function startHeight() external view returns (uint256);
        function getChainParams() external view returns (ChainParams memory);
    }
}

pub use IBtcRelay::ChainParams;

/// Summary of the relay's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    /// Height of the newest relayed block.
    pub latest_height: u64,
    /// Timestamp of the newest relayed block (seconds since epoch).
    pub latest_time: u64,
    /// Confirmations required before a block is considered final.
    pub min_confirmations: u64,
    /// First height the relay was seeded with.
    pub start_height: u64,
    /// Whether the relay follows a Bitcoin test network.
    pub is_testnet: bool,
}

/// Issues read calls against a deployed relay.
#[derive(Clone)]
pub struct RelayReader {
    transport: SharedTransport,
    address: Address,
}

impl std::fmt::Debug for RelayReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayReader")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RelayReader {
    /// Reader for the relay at `address`.
    #[must_use]
    pub fn new(transport: SharedTransport, address: Address) -> Self {
        Self { transport, address }
    }

    /// Contract address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Hash of the relayed block at `height`.
    pub async fn block_hash(&self, height: u64) -> ContractResult<B256> {
        self.call(IBtcRelay::getBlockHashCall {
            in_height: U256::from(height),
        })
        .await
    }

    /// Height of the newest relayed block.
    pub async fn latest_block_height(&self) -> ContractResult<u64> {
        let height = self.call(IBtcRelay::getLatestBlockHeightCall {}).await?;
        to_u64(IBtcRelay::getLatestBlockHeightCall::SIGNATURE, height)
    }

    /// Timestamp of the newest relayed block.
    pub async fn latest_block_time(&self) -> ContractResult<u64> {
        let time = self.call(IBtcRelay::getLatestBlockTimeCall {}).await?;
        to_u64(IBtcRelay::getLatestBlockTimeCall::SIGNATURE, time)
    }

    /// Required confirmations.
    pub async fn min_confirmations(&self) -> ContractResult<u64> {
        let confirmations = self.call(IBtcRelay::getMinConfirmationsCall {}).await?;
        to_u64(IBtcRelay::getMinConfirmationsCall::SIGNATURE, confirmations)
    }

    /// Whether the relay follows a test network.
    pub async fn is_testnet(&self) -> ContractResult<bool> {
        self.call(IBtcRelay::isTestnetCall {}).await
    }

    /// First relayed height.
    pub async fn start_height(&self) -> ContractResult<u64> {
        let height = self.call(IBtcRelay::startHeightCall {}).await?;
        to_u64(IBtcRelay::startHeightCall::SIGNATURE, height)
    }

    /// Bitcoin network parameters.
    pub async fn chain_params(&self) -> ContractResult<ChainParams> {
        self.call(IBtcRelay::getChainParamsCall {}).await
    }

    /// Read the relay's progress in one go.
    pub async fn status(&self) -> ContractResult<RelayStatus> {
        let (latest_height, latest_time, min_confirmations, start_height, is_testnet) = futures::try_join!(
            self.latest_block_height(),
            self.latest_block_time(),
            self.min_confirmations(),
            self.start_height(),
            self.is_testnet(),
        )?;
        Ok(RelayStatus {
            latest_height,
            latest_time,
            min_confirmations,
            start_height,
            is_testnet,
        })
    }

    async fn call<C: SolCall>(&self, call: C) -> ContractResult<C::Return> {
        let data = hex::encode_prefixed(call.abi_encode());
        debug!(to = %self.address, function = C::SIGNATURE, "eth_call");

        let params = json!([{ "to": self.address, "data": data }, "latest"]);
        let response = self
            .transport
            .request(RequestArguments::new(methods::ETH_CALL).with_params(params))
            .await?;

        let bytes = decode_hex_result(C::SIGNATURE, &response)?;
        C::abi_decode_returns(&bytes).map_err(|e| ContractError::Decode {
            function: C::SIGNATURE,
            reason: e.to_string(),
        })
    }
}

fn decode_hex_result(function: &'static str, response: &Value) -> ContractResult<Vec<u8>> {
    let raw = response
        .as_str()
        .ok_or_else(|| ContractError::InvalidResponse {
            function,
            reason: format!("expected hex string, got {response}"),
        })?;
    hex::decode(raw).map_err(|e| ContractError::InvalidResponse {
        function,
        reason: e.to_string(),
    })
}

fn to_u64(function: &'static str, value: U256) -> ContractResult<u64> {
    u64::try_from(value).map_err(|_| ContractError::Decode {
        function,
        reason: format!("{value} does not fit in 64 bits"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::transport::MemoryProvider;
    use alloy::sol_types::SolValue;
    use std::sync::Arc;

    const RELAY: Address = Address::repeat_byte(0x11);

    fn call_data(params: Option<&Value>) -> Vec<u8> {
        let params = params.unwrap();
        assert_eq!(params[0]["to"], json!(RELAY));
        assert_eq!(params[1], "latest");
        hex::decode(params[0]["data"].as_str().unwrap()).unwrap()
    }

    fn reply(encoded: Vec<u8>) -> Result<Value, RpcError> {
        Ok(json!(hex::encode_prefixed(encoded)))
    }

    fn relay_node() -> Arc<MemoryProvider> {
        let wallet = Arc::new(MemoryProvider::new());
        wallet.handle(methods::ETH_CALL, |params| {
            let data = call_data(params);
            let selector = &data[..4];
            if selector == IBtcRelay::getLatestBlockHeightCall::SELECTOR {
                reply(U256::from(850_123).abi_encode())
            } else if selector == IBtcRelay::getLatestBlockTimeCall::SELECTOR {
                reply(U256::from(1_718_000_000u64).abi_encode())
            } else if selector == IBtcRelay::getMinConfirmationsCall::SELECTOR {
                reply(U256::from(6).abi_encode())
            } else if selector == IBtcRelay::startHeightCall::SELECTOR {
                reply(U256::from(840_000).abi_encode())
            } else if selector == IBtcRelay::isTestnetCall::SELECTOR {
                reply(true.abi_encode())
            } else if selector == IBtcRelay::getBlockHashCall::SELECTOR {
                let call = IBtcRelay::getBlockHashCall::abi_decode(&data).unwrap();
                let mut hash = [0u8; 32];
                hash[24..].copy_from_slice(&call.in_height.to::<u64>().to_be_bytes());
                reply(B256::from(hash).abi_encode())
            } else if selector == IBtcRelay::getChainParamsCall::SELECTOR {
                reply(
                    ChainParams {
                        name: "testnet3".into(),
                        magic: 0x0b11_0907,
                        pubkeyAddrPrefix: 111,
                        scriptAddrPrefix: 196,
                    }
                    .abi_encode(),
                )
            } else {
                Err(RpcError::new(-32000, "execution reverted"))
            }
        });
        wallet
    }

    #[tokio::test]
    async fn test_status() {
        let reader = RelayReader::new(relay_node(), RELAY);
        let status = reader.status().await.unwrap();
        assert_eq!(
            status,
            RelayStatus {
                latest_height: 850_123,
                latest_time: 1_718_000_000,
                min_confirmations: 6,
                start_height: 840_000,
                is_testnet: true,
            }
        );
    }

    #[tokio::test]
    async fn test_block_hash_encodes_height() {
        let reader = RelayReader::new(relay_node(), RELAY);
        let hash = reader.block_hash(42).await.unwrap();
        assert_eq!(hash[31], 42);
        assert!(hash[..24].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_chain_params() {
        let reader = RelayReader::new(relay_node(), RELAY);
        let params = reader.chain_params().await.unwrap();
        assert_eq!(params.name, "testnet3");
        assert_eq!(params.pubkeyAddrPrefix, 111);
    }

    #[tokio::test]
    async fn test_call_failures() {
        let node = Arc::new(MemoryProvider::new());
        let reader = RelayReader::new(Arc::clone(&node) as SharedTransport, RELAY);

        let err = reader.is_testnet().await.unwrap_err();
        assert!(matches!(err, ContractError::Rpc(ref e) if e.code == RpcError::UNSUPPORTED_METHOD));

        node.handle(methods::ETH_CALL, |_| Ok(json!(7)));
        let err = reader.is_testnet().await.unwrap_err();
        assert!(matches!(err, ContractError::InvalidResponse { function: "isTestnet()", .. }));

        node.handle(methods::ETH_CALL, |_| Ok(json!("0x")));
        let err = reader.latest_block_height().await.unwrap_err();
        assert!(matches!(err, ContractError::Decode { .. }));

        node.handle(methods::ETH_CALL, |_| reply(U256::MAX.abi_encode()));
        let err = reader.latest_block_height().await.unwrap_err();
        assert!(matches!(err, ContractError::Decode { function: "getLatestBlockHeight()", .. }));
    }
}
