//! # ABI Helpers
//!
//! Minimal contract-call encoding for the two watched contracts:
//! zero-argument `uint256` getters and `safeMint(address)`.

use crate::domain::{keccak256, ContractMethod, SyncError};
use primitive_types::{H160, U256};

/// Signature of the issuance contract's mint entry point.
pub const SAFE_MINT_SIGNATURE: &str = "safeMint(address)";

/// ABI word size in bytes.
const WORD: usize = 32;

/// First four bytes of the Keccak-256 of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_bytes()[..4]);
    out
}

/// Calldata for a zero-argument getter, `0x`-prefixed.
pub fn encode_read_call(method: ContractMethod) -> String {
    format!("0x{}", hex::encode(selector(method.signature())))
}

/// Calldata for `safeMint(recipient)`, `0x`-prefixed.
pub fn encode_safe_mint(recipient: H160) -> String {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(SAFE_MINT_SIGNATURE));
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_bytes());
    format!("0x{}", hex::encode(data))
}

/// Decode the first `uint256` word of a hex return value.
pub fn decode_uint_word(data: &str) -> Result<U256, SyncError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes =
        hex::decode(digits).map_err(|e| SyncError::Decode(format!("invalid return data: {e}")))?;
    if bytes.len() < WORD {
        return Err(SyncError::Decode(format!(
            "return data too short: {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(&bytes[..WORD]))
}

/// Narrow a `uint256` counter to `u64`.
pub fn u256_to_u64(value: U256) -> Result<u64, SyncError> {
    if value > U256::from(u64::MAX) {
        return Err(SyncError::Decode(format!("value {value} exceeds u64")));
    }
    Ok(value.low_u64())
}

/// Parse a JSON-RPC hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, SyncError> {
    let digits = s.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| SyncError::Decode(format!("invalid quantity {s:?}: {e}")))
}

/// Encode a JSON-RPC hex quantity.
pub fn to_hex_quantity(value: u64) -> String {
    format!("0x{value:x}")
}
