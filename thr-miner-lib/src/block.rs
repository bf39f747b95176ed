use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder shipped in the default config; mining to it is refused.
pub const PLACEHOLDER_ADDRESS: &str = "THR_PUT_YOUR_ADDRESS_HERE";

/// Hex characters in a tip hash.
pub const TIP_HASH_LEN: usize = 64;

/// Errors that can occur while parsing a tip hash reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TipHashError {
    #[error("Tip hash must be exactly 64 hex characters, got {0} bytes")]
    InvalidLength(usize),

    #[error("Tip hash contains a non-hex character: {0:?}")]
    InvalidCharacter(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("No mining address configured (still set to the placeholder THR_PUT_YOUR_ADDRESS_HERE)")]
    Placeholder,

    #[error("Mining address is empty")]
    Empty,
}

/// Head of the chain as reported by the endpoint.
///
/// Kept verbatim: the string itself, not its decoded bytes, is what gets
/// hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TipHash(String);

impl TipHash {
    pub fn parse(hash: impl Into<String>) -> Result<Self, TipHashError> {
        let hash = hash.into();
        if hash.len() != TIP_HASH_LEN {
            return Err(TipHashError::InvalidLength(hash.len()));
        }
        if let Some(c) = hash.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(TipHashError::InvalidCharacter(c));
        }
        Ok(TipHash(hash))
    }

    /// The all-zero hash a fresh chain reports before its first block.
    pub fn genesis() -> Self {
        TipHash("0".repeat(TIP_HASH_LEN))
    }

    pub fn is_genesis(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl Display for TipHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Beneficiary of mined blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerAddress(String);

impl MinerAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into();
        let address = address.trim();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        if address.contains(PLACEHOLDER_ADDRESS) {
            return Err(AddressError::Placeholder);
        }
        Ok(MinerAddress(address.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MinerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A solved block, serialized exactly as the submit endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateBlock {
    pub thr_address: String,
    pub nonce: u64,
    pub pow_hash: String,
    pub prev_hash: String,
}

impl CandidateBlock {
    pub fn new(address: &MinerAddress, nonce: u64, pow_hash: String, prev_hash: &TipHash) -> Self {
        CandidateBlock {
            thr_address: address.as_str().to_string(),
            nonce,
            pow_hash,
            prev_hash: prev_hash.as_str().to_string(),
        }
    }
}

/// Body of `GET /last_block_hash`.
#[derive(Deserialize, Debug, Clone)]
pub struct LastBlockHashResponse {
    pub last_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIP: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_tip_hash_parse() {
        let tip = TipHash::parse(TIP).unwrap();
        assert_eq!(tip.as_str(), TIP);
        assert_eq!(tip.short(), "9f86d081884c7d65");
        assert!(!tip.is_genesis());
        assert!(TipHash::parse(TipHash::genesis().as_str()).unwrap().is_genesis());
    }

    #[test]
    fn test_tip_hash_rejects_bad_input() {
        assert_eq!(TipHash::parse("abc"), Err(TipHashError::InvalidLength(3)));
        assert_eq!(TipHash::parse(""), Err(TipHashError::InvalidLength(0)));
        assert_eq!(TipHash::parse("é".repeat(20)), Err(TipHashError::InvalidLength(40)));
        let bad = format!("{}z", &TIP[..63]);
        assert_eq!(TipHash::parse(bad), Err(TipHashError::InvalidCharacter('z')));
    }

    #[test]
    fn test_address_validation() {
        assert_eq!(MinerAddress::new(PLACEHOLDER_ADDRESS), Err(AddressError::Placeholder));
        assert_eq!(
            MinerAddress::new(format!("{}_2", PLACEHOLDER_ADDRESS)),
            Err(AddressError::Placeholder)
        );
        assert_eq!(MinerAddress::new("   "), Err(AddressError::Empty));
        assert_eq!(MinerAddress::new(" THR123 ").unwrap().as_str(), "THR123");
    }

    #[test]
    fn test_candidate_wire_format() {
        let block = CandidateBlock::new(
            &MinerAddress::new("THR123").unwrap(),
            77,
            "00abc".to_string(),
            &TipHash::parse(TIP).unwrap(),
        );
        let json: serde_json::Value = serde_json::to_value(&block).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "thr_address": "THR123",
                "nonce": 77,
                "pow_hash": "00abc",
                "prev_hash": TIP,
            })
        );
    }

    #[test]
    fn test_missing_last_hash_is_none() {
        let response: LastBlockHashResponse = serde_json::from_str(r#"{"height": 3}"#).unwrap();
        assert!(response.last_hash.is_none());
    }
}
