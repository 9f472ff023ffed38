//! Chain identifiers and display names.

use serde_json::Value;

/// Ethereum mainnet.
pub const ETHEREUM_MAINNET: u64 = 1;
/// Oasis Sapphire mainnet.
pub const SAPPHIRE_MAINNET: u64 = 0x5afe;
/// Oasis Sapphire testnet.
pub const SAPPHIRE_TESTNET: u64 = 0x5aff;
/// Oasis Sapphire localnet.
pub const SAPPHIRE_LOCALNET: u64 = 0x5afd;

const NETWORK_NAMES: &[(u64, &str)] = &[
    (ETHEREUM_MAINNET, "Ethereum (Mainnet)"),
    (SAPPHIRE_MAINNET, "Sapphire (Mainnet)"),
    (SAPPHIRE_TESTNET, "Sapphire (Testnet)"),
    (SAPPHIRE_LOCALNET, "Sapphire (Localnet)"),
];

/// Parse a chain id as reported by a provider.
///
/// Accepts `0x`-prefixed hexadecimal (the EIP-1193 form) or plain decimal.
/// Anything else yields `None`.
#[must_use]
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Interpret a JSON chain id value. Unusable shapes map to `None`.
#[must_use]
pub fn chain_id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => parse_chain_id(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Name of a chain in the static table, if known.
#[must_use]
pub fn known_chain_name(chain_id: u64) -> Option<&'static str> {
    NETWORK_NAMES
        .iter()
        .find_map(|&(id, name)| (id == chain_id).then_some(name))
}

/// Human-readable chain name.
///
/// Known ids render their table name and unknown ids render `Unknown (<id>)`.
/// Only an absent id renders nothing; id `0` is an unknown id like any other.
#[must_use]
pub fn chain_name(chain_id: Option<u64>) -> Option<String> {
    let id = chain_id?;
    Some(known_chain_name(id).map_or_else(|| format!("Unknown ({id})"), str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_and_decimal() {
        assert_eq!(parse_chain_id("0x5afe"), Some(23294));
        assert_eq!(parse_chain_id("0X1"), Some(1));
        assert_eq!(parse_chain_id("23295"), Some(23295));
        assert_eq!(parse_chain_id(""), None);
        assert_eq!(parse_chain_id("0x"), None);
        assert_eq!(parse_chain_id("sapphire"), None);
    }

    #[test]
    fn test_chain_id_from_value() {
        assert_eq!(chain_id_from_value(&Value::from("0x5aff")), Some(SAPPHIRE_TESTNET));
        assert_eq!(chain_id_from_value(&Value::from(1)), Some(1));
        assert_eq!(chain_id_from_value(&Value::Null), None);
        assert_eq!(chain_id_from_value(&serde_json::json!({ "id": 1 })), None);
    }

    #[test]
    fn test_chain_names() {
        assert_eq!(chain_name(Some(23294)).as_deref(), Some("Sapphire (Mainnet)"));
        assert_eq!(chain_name(Some(1)).as_deref(), Some("Ethereum (Mainnet)"));
        assert_eq!(chain_name(Some(137)).as_deref(), Some("Unknown (137)"));
        assert_eq!(chain_name(Some(0)).as_deref(), Some("Unknown (0)"));
        assert_eq!(chain_name(None), None);
    }
}
