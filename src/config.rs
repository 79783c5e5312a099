use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::from_str;

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub chain: Chain,
    pub http_listen: String,
    pub redis: String,
    pub leader_id: String,
    pub leader_name: String,
    pub creator_secret: String,
    /// Member id ("M001") to hex secret key, mirroring the wallets the demo
    /// members sign with.
    #[serde(default)]
    pub member_secrets: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Chain {
    pub name: String,
    #[serde(rename = "chainId")]
    pub chain_id: String,

    pub endpoint: String,
    /// ERC-20 contribution token address.
    pub token: String,
    /// Pool factory address.
    pub factory: String,
    pub opts: ChainOpts,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainOpts {
    #[serde(default = "default_decimals")]
    pub decimals: u32,

    #[serde(rename = "cycleDuration", default = "default_cycle_duration")]
    pub cycle_duration: u64,

    #[serde(rename = "minMembers", default = "default_min_members")]
    pub min_members: u32,

    /// Wei the creator account must hold before a pool is created; empty
    /// disables the check.
    #[serde(rename = "minGasReserve", default)]
    pub min_gas_reserve: String,
}

fn default_decimals() -> u32 {
    6
}

fn default_cycle_duration() -> u64 {
    300
}

fn default_min_members() -> u32 {
    2
}

impl Default for ChainOpts {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            cycle_duration: default_cycle_duration(),
            min_members: default_min_members(),
            min_gas_reserve: String::new(),
        }
    }
}

impl Config {
    pub fn parse_from_file<P: AsRef<Path>>(file: P) -> Self {
        use std::fs::read_to_string;
        let confstr = read_to_string(file).expect("confile read");
        from_str(&confstr).expect("confile deser")
    }

    pub fn member_secret(&self, member_id: &str) -> Result<&str> {
        self.member_secrets
            .get(member_id)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MemberKey(member_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chain": {
            "name": "celo-sepolia",
            "chainId": "11142220",
            "endpoint": "https://forno.celo-sepolia.celo-testnet.org",
            "token": "0x6d9b3bD0b27E1AC58Fd876351E19aD7b4e734b1a",
            "factory": "0xC4f3BeE53bBd6dB94bbBD7534B72434d0a096B05",
            "opts": { "cycleDuration": 300 }
        },
        "http_listen": "127.0.0.1:3000",
        "redis": "127.0.0.1:6379",
        "leader_id": "L001",
        "leader_name": "Sarah Chen",
        "creator_secret": "aa",
        "member_secrets": { "M001": "bb", "M002": "cc" }
    }"#;

    #[test]
    fn parses_sample_config() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.chain.chain_id, "11142220");
        assert_eq!(config.chain.opts.cycle_duration, 300);
        // omitted fields fall back to defaults
        assert_eq!(config.chain.opts.decimals, 6);
        assert_eq!(config.chain.opts.min_members, 2);
        assert!(config.chain.opts.min_gas_reserve.is_empty());
    }

    #[test]
    fn member_secret_lookup() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.member_secret("M002").unwrap(), "cc");
        assert!(matches!(config.member_secret("M999"), Err(Error::MemberKey(_))));
    }
}
