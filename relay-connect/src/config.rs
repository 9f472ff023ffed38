//! Deployment configuration.
//!
//! A deployment is identified by the Bitcoin network the relay follows and
//! the Sapphire network it is deployed on. Its contract addresses come from
//! the deploy tool's manifest (`btc-<btc>_sapphire-<sapphire>.json`) or from
//! `RELAY_*` environment variables, the same lines [`DeploymentConfig::to_env_file`]
//! renders.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::{SAPPHIRE_LOCALNET, SAPPHIRE_MAINNET, SAPPHIRE_TESTNET};
use crate::error::{ConfigError, ConfigResult};

/// Prefix of every deployment environment variable.
pub const ENV_PREFIX: &str = "RELAY_";
/// Variable naming the Bitcoin network.
pub const BTC_NET_VAR: &str = "RELAY_BTC_NET";
/// Variable naming the Sapphire network.
pub const SAPPHIRE_NET_VAR: &str = "RELAY_SAPPHIRE_NET";

const ADDR_SUFFIX: &str = "_ADDR";

/// A network tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Local development chain.
    Localnet,
    /// Public test network.
    Testnet,
    /// Production network.
    Mainnet,
}

impl Network {
    /// All tiers.
    pub const ALL: [Self; 3] = [Self::Localnet, Self::Testnet, Self::Mainnet];

    /// Lowercase name, as used in manifest file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Localnet => "localnet",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    /// Chain id of the Sapphire network of this tier.
    #[must_use]
    pub const fn sapphire_chain_id(self) -> u64 {
        match self {
            Self::Localnet => SAPPHIRE_LOCALNET,
            Self::Testnet => SAPPHIRE_TESTNET,
            Self::Mainnet => SAPPHIRE_MAINNET,
        }
    }

    /// Public Sapphire JSON-RPC endpoint of this tier.
    #[must_use]
    pub const fn default_sapphire_rpc_url(self) -> &'static str {
        match self {
            Self::Localnet => "http://127.0.0.1:8545",
            Self::Testnet => "https://testnet.sapphire.oasis.dev",
            Self::Mainnet => "https://sapphire.oasis.io",
        }
    }

    /// Tier of a Sapphire chain id.
    #[must_use]
    pub fn from_sapphire_chain_id(chain_id: u64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|n| n.sapphire_chain_id() == chain_id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownNetwork(s.to_owned()))
    }
}

/// One manifest entry. Fields other than the address are ignored.
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    expected_address: String,
}

/// Where a deployment's contracts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    /// Bitcoin network followed by the relay.
    pub btc_net: Network,
    /// Sapphire network hosting the contracts.
    pub sapphire_net: Network,
    /// Contract addresses by name.
    pub contracts: BTreeMap<String, Address>,
}

impl DeploymentConfig {
    /// File name of the manifest for a network pair.
    #[must_use]
    pub fn manifest_file_name(btc_net: Network, sapphire_net: Network) -> String {
        format!("btc-{btc_net}_sapphire-{sapphire_net}.json")
    }

    /// Load the manifest for a network pair from `dir`.
    pub fn from_manifest_dir(
        dir: impl AsRef<Path>,
        btc_net: Network,
        sapphire_net: Network,
    ) -> ConfigResult<Self> {
        let path: PathBuf = dir
            .as_ref()
            .join(Self::manifest_file_name(btc_net, sapphire_net));
        debug!(path = %path.display(), "loading deployment manifest");
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_manifest_str(&raw, btc_net, sapphire_net)
    }

    /// Parse manifest JSON.
    pub fn from_manifest_str(
        raw: &str,
        btc_net: Network,
        sapphire_net: Network,
    ) -> ConfigResult<Self> {
        let entries: BTreeMap<String, ManifestEntry> = serde_json::from_str(raw)?;
        let contracts = entries
            .into_iter()
            .map(|(name, entry)| {
                let address = parse_address(&name, &entry.expected_address)?;
                Ok((name, address))
            })
            .collect::<ConfigResult<_>>()?;

        Ok(Self {
            btc_net,
            sapphire_net,
            contracts,
        })
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read the configuration from the process environment, with explicit
    /// networks taking precedence over `RELAY_BTC_NET` / `RELAY_SAPPHIRE_NET`.
    pub fn from_env_with_networks(
        btc_net: Option<Network>,
        sapphire_net: Option<Network>,
    ) -> ConfigResult<Self> {
        Self::from_vars_with_networks(std::env::vars(), btc_net, sapphire_net)
    }

    /// Read the configuration from `(name, value)` pairs.
    ///
    /// Every `RELAY_<Name>_ADDR` variable contributes a contract.
    pub fn from_vars<I, K, V>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_vars_with_networks(vars, None, None)
    }

    /// Like [`from_vars`](Self::from_vars), but a given network overrides the
    /// corresponding variable, which then need not be set or valid.
    pub fn from_vars_with_networks<I, K, V>(
        vars: I,
        btc_override: Option<Network>,
        sapphire_override: Option<Network>,
    ) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut btc_net = btc_override;
        let mut sapphire_net = sapphire_override;
        let mut contracts = BTreeMap::new();

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                BTC_NET_VAR if btc_override.is_none() => btc_net = Some(value.parse()?),
                SAPPHIRE_NET_VAR if sapphire_override.is_none() => {
                    sapphire_net = Some(value.parse()?);
                }
                BTC_NET_VAR | SAPPHIRE_NET_VAR => {}
                _ => {
                    let Some(name) = key
                        .strip_prefix(ENV_PREFIX)
                        .and_then(|k| k.strip_suffix(ADDR_SUFFIX))
                        .filter(|name| !name.is_empty())
                    else {
                        continue;
                    };
                    contracts.insert(name.to_owned(), parse_address(name, value)?);
                }
            }
        }

        Ok(Self {
            btc_net: btc_net.ok_or_else(|| ConfigError::MissingVar(BTC_NET_VAR.into()))?,
            sapphire_net: sapphire_net
                .ok_or_else(|| ConfigError::MissingVar(SAPPHIRE_NET_VAR.into()))?,
            contracts,
        })
    }

    /// Render the configuration as `KEY=value` lines.
    #[must_use]
    pub fn to_env_file(&self) -> String {
        let mut out = String::new();
        for (name, address) in &self.contracts {
            out.push_str(&format!("{ENV_PREFIX}{name}{ADDR_SUFFIX}={address}\n"));
        }
        out.push_str(&format!("{BTC_NET_VAR}={}\n", self.btc_net));
        out.push_str(&format!("{SAPPHIRE_NET_VAR}={}\n", self.sapphire_net));
        out
    }

    /// Address of the named contract.
    #[must_use]
    pub fn address(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).copied()
    }

    /// Address of the named contract, or an error if it was not deployed.
    pub fn require(&self, name: &str) -> ConfigResult<Address> {
        self.address(name)
            .ok_or_else(|| ConfigError::MissingContract(name.to_owned()))
    }

    /// Chain id wallets must be on to use this deployment.
    #[must_use]
    pub const fn expected_chain_id(&self) -> u64 {
        self.sapphire_net.sapphire_chain_id()
    }

    /// Whether a wallet on `chain_id` can use this deployment.
    #[must_use]
    pub fn matches_chain(&self, chain_id: Option<u64>) -> bool {
        chain_id == Some(self.expected_chain_id())
    }
}

fn parse_address(name: &str, value: &str) -> ConfigResult<Address> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            name: name.to_owned(),
            value: value.to_owned(),
        })
}
