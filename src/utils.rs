use std::str::FromStr;

use sha3::{Digest, Keccak256};
use web3::contract::Error as ContractError;
use web3::types::{Address, H256, U256};

use crate::config::Config;
use crate::error::{Error, Result};

#[inline(always)]
pub fn extract_keypair_from_config(config: &Config) -> (secp256k1::SecretKey, Address) {
    extract_keypair_from_str(&config.creator_secret)
}

#[inline(always)]
pub fn extract_keypair_from_str(sk_str: &str) -> (secp256k1::SecretKey, Address) {
    let sk = secp256k1::SecretKey::from_str(sk_str.trim()).unwrap();
    let s = secp256k1::Secp256k1::signing_only();
    let pk = secp256k1::PublicKey::from_secret_key(&s, &sk);
    let mut res = [0u8; 64];
    res.copy_from_slice(&pk.serialize_uncompressed()[1..65]);
    let addr = Address::from(H256::from_slice(Keccak256::digest(&res).as_slice()));
    (sk, addr)
}

#[inline(always)]
pub fn handle_error(error: &ContractError) -> String {
    match error {
        ContractError::InvalidOutputType(s) => format!("Invalid output type: {}", s),
        ContractError::Abi(e) => format!("Abi error: {}", e),
        ContractError::Api(e) => format!("Api error: {}", e),
        ContractError::Deployment(e) => format!("Deployment error: {}", e),
        ContractError::InterfaceUnsupported => "Contract does not support this interface.".to_string(),
    }
}

/// Pulls the human-readable revert reason out of a node error, falling back to
/// the raw message when the node did not produce one.
pub fn revert_reason(error: &ContractError) -> String {
    let raw = handle_error(error);
    match raw.split("execution reverted:").nth(1) {
        Some(reason) => reason
            .trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '}' || c == ')')
            .to_string(),
        None => raw,
    }
}

/// Converts a human token amount ("100", "0.5") into base units.
pub fn parse_units(amount: &str, decimals: u32) -> Result<U256> {
    let amount = amount.trim();
    let mut parts = amount.splitn(2, '.');
    let whole = parts.next().unwrap_or("0");
    let frac = parts.next().unwrap_or("");
    if frac.len() as u32 > decimals {
        return Err(Error::ParseAmount(amount.to_string()));
    }
    let whole = if whole.is_empty() { "0" } else { whole };
    let whole = U256::from_dec_str(whole).map_err(|_| Error::ParseAmount(amount.to_string()))?;
    let frac = if frac.is_empty() {
        U256::zero()
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        U256::from_dec_str(&padded).map_err(|_| Error::ParseAmount(amount.to_string()))?
    };
    Ok(whole * U256::exp10(decimals as usize) + frac)
}

/// Formats base units back into a human token amount, trimming trailing zeros.
pub fn format_units(value: U256, decimals: u32) -> String {
    let scale = U256::exp10(decimals as usize);
    let whole = value / scale;
    let frac = value % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let mut frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    while frac.ends_with('0') {
        frac.pop();
    }
    format!("{}.{}", whole, frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units_whole_and_fractional() {
        assert_eq!(parse_units("100", 6).unwrap(), U256::from(100_000_000u64));
        assert_eq!(parse_units("0.5", 6).unwrap(), U256::from(500_000u64));
        assert_eq!(parse_units("1.000001", 6).unwrap(), U256::from(1_000_001u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
    }

    #[test]
    fn parse_units_rejects_garbage() {
        assert!(parse_units("1.0000001", 6).is_err());
        assert!(parse_units("ten", 6).is_err());
        assert!(parse_units("1,5", 6).is_err());
    }

    #[test]
    fn format_units_round_trips_common_amounts() {
        assert_eq!(format_units(U256::from(100_000_000u64), 6), "100");
        assert_eq!(format_units(U256::from(65_000_000u64), 6), "65");
        assert_eq!(format_units(U256::from(500_000u64), 6), "0.5");
        assert_eq!(format_units(U256::from(1_000_001u64), 6), "1.000001");
    }

    #[test]
    fn revert_reason_is_extracted_from_node_message() {
        let err = ContractError::Api(web3::Error::Decoder(
            "Error { message: \"execution reverted: cycle not ended\" }".to_string(),
        ));
        assert_eq!(revert_reason(&err), "cycle not ended");

        let plain = ContractError::InterfaceUnsupported;
        assert_eq!(revert_reason(&plain), "Contract does not support this interface.");
    }

    #[test]
    fn keypair_derivation_is_deterministic() {
        let sk = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let (_, a) = extract_keypair_from_str(sk);
        let (_, b) = extract_keypair_from_str(sk);
        assert_eq!(a, b);
        assert_ne!(a, Address::zero());
    }
}
