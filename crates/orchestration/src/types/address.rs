// Chain and validator addresses
// Both share a shape but are distinct types so they cannot be interchanged

use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OrchestrationError, Result};

/// Serialized form shared by both address types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddress {
    chain_id: String,
    address: String,
}

/// An account or contract on some chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawAddress", into = "RawAddress")]
pub struct ChainAddress {
    chain_id: String,
    address: String,
}

/// A staking validator on some chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawAddress", into = "RawAddress")]
pub struct ValidatorAddress {
    chain_id: String,
    address: String,
}

impl ChainAddress {
    /// Build an address, rejecting anything that is neither bech32 nor 0x-hex
    pub fn new(chain_id: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        let chain_id = chain_id.into();
        let address = address.into();
        check_chain_id(&chain_id)?;
        check_address_syntax(&address)?;
        Ok(Self { chain_id, address })
    }

    /// Encode raw account bytes as a bech32 address with the given prefix
    pub fn from_bytes(chain_id: impl Into<String>, prefix: &str, bytes: &[u8]) -> Result<Self> {
        let address = encode_bech32(prefix, bytes)?;
        Self::new(chain_id, address)
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Human-readable prefix of a bech32 address, if it is one
    pub fn prefix(&self) -> Option<String> {
        bech32_prefix(&self.address)
    }
}

impl ValidatorAddress {
    /// Build a validator address. Bech32 input must carry a `valoper` prefix.
    pub fn new(chain_id: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        let chain_id = chain_id.into();
        let address = address.into();
        check_chain_id(&chain_id)?;
        check_address_syntax(&address)?;
        if let Some(prefix) = bech32_prefix(&address) {
            if !prefix.ends_with("valoper") {
                return Err(OrchestrationError::validation(format!(
                    "{} is not a validator operator address (prefix {})",
                    address, prefix
                )));
            }
        }
        Ok(Self { chain_id, address })
    }

    pub fn from_bytes(chain_id: impl Into<String>, prefix: &str, bytes: &[u8]) -> Result<Self> {
        let address = encode_bech32(prefix, bytes)?;
        Self::new(chain_id, address)
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.address)
    }
}

impl fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.address)
    }
}

impl TryFrom<RawAddress> for ChainAddress {
    type Error = OrchestrationError;

    fn try_from(raw: RawAddress) -> Result<Self> {
        Self::new(raw.chain_id, raw.address)
    }
}

impl TryFrom<RawAddress> for ValidatorAddress {
    type Error = OrchestrationError;

    fn try_from(raw: RawAddress) -> Result<Self> {
        Self::new(raw.chain_id, raw.address)
    }
}

impl From<ChainAddress> for RawAddress {
    fn from(addr: ChainAddress) -> Self {
        Self { chain_id: addr.chain_id, address: addr.address }
    }
}

impl From<ValidatorAddress> for RawAddress {
    fn from(addr: ValidatorAddress) -> Self {
        Self { chain_id: addr.chain_id, address: addr.address }
    }
}

fn check_chain_id(chain_id: &str) -> Result<()> {
    if chain_id.is_empty() || chain_id.chars().any(char::is_whitespace) {
        return Err(OrchestrationError::validation(format!("invalid chain id {:?}", chain_id)));
    }
    Ok(())
}

fn check_address_syntax(address: &str) -> Result<()> {
    if let Some(hex_part) = address.strip_prefix("0x") {
        let bytes = hex::decode(hex_part)
            .map_err(|e| OrchestrationError::validation(format!("invalid hex address {}: {}", address, e)))?;
        if bytes.len() != 20 {
            return Err(OrchestrationError::validation(format!(
                "hex address {} must be 20 bytes, got {}",
                address,
                bytes.len()
            )));
        }
        return Ok(());
    }

    let (_, data, _) = bech32::decode(address)
        .map_err(|e| OrchestrationError::validation(format!("invalid bech32 address {}: {}", address, e)))?;
    let bytes = Vec::<u8>::from_base32(&data)
        .map_err(|e| OrchestrationError::validation(format!("invalid bech32 payload in {}: {}", address, e)))?;
    if bytes.is_empty() {
        return Err(OrchestrationError::validation(format!("empty bech32 payload in {}", address)));
    }
    Ok(())
}

fn bech32_prefix(address: &str) -> Option<String> {
    bech32::decode(address).ok().map(|(hrp, _, _)| hrp)
}

fn encode_bech32(prefix: &str, bytes: &[u8]) -> Result<String> {
    bech32::encode(prefix, bytes.to_base32(), Variant::Bech32)
        .map_err(|e| OrchestrationError::validation(format!("cannot encode {} address: {}", prefix, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bech32_round_trip() {
        let addr = ChainAddress::from_bytes("celestia", "celestia", &[7u8; 20]).unwrap();
        assert!(addr.address().starts_with("celestia1"));
        assert_eq!(addr.prefix().as_deref(), Some("celestia"));

        let reparsed = ChainAddress::new("celestia", addr.address()).unwrap();
        assert_eq!(reparsed, addr);
    }

    #[test]
    fn test_hex_addresses() {
        assert!(ChainAddress::new("1", "0x52908400098527886E0F7030069857D2E4169EE7").is_ok());
        assert!(ChainAddress::new("1", "0x1234").is_err());
        assert!(ChainAddress::new("1", "0xnothex").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ChainAddress::new("celestia", "not-an-address").is_err());
        assert!(ChainAddress::new("", "0x52908400098527886E0F7030069857D2E4169EE7").is_err());
    }

    #[test]
    fn test_validator_requires_valoper_prefix() {
        assert!(ValidatorAddress::from_bytes("celestia", "celestiavaloper", &[1u8; 20]).is_ok());
        let account = ChainAddress::from_bytes("celestia", "celestia", &[1u8; 20]).unwrap();
        assert!(ValidatorAddress::new("celestia", account.address()).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let addr = ChainAddress::from_bytes("stride-1", "stride", &[3u8; 20]).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.contains("chainId"));
        let back: ChainAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);

        let bad = r#"{"chainId":"stride-1","address":"stride1broken"}"#;
        assert!(serde_json::from_str::<ChainAddress>(bad).is_err());
    }
}
