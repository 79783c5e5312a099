use std::str::FromStr;
use std::time::Duration;

use lazy_static::lazy_static;
use log::warn;
use secp256k1::SecretKey;
use web3::contract::tokens::{Detokenize, Tokenizable, Tokenize};
use web3::contract::{Contract, Error as ContractError, Options};
use web3::ethabi::{RawLog, Token};
use web3::futures::lock::Mutex;
use web3::{
    api::Eth,
    transports::Http,
    types::{Address, BlockNumber, TransactionReceipt, H256, U256},
};

use crate::error::{Error, Result};
use crate::utils::{extract_keypair_from_str, revert_reason};

pub const FACTORY_ABI: &str = include_str!("../abi/pool_factory.json");
pub const POOL_ABI: &str = include_str!("../abi/pool.json");
pub const ERC20_ABI: &str = include_str!("../abi/erc20.json");

// Gas limits lifted from the deployed contracts' observed usage.
pub const GAS_CREATE_POOL: u64 = 4_000_000;
pub const GAS_REQUEST_JOIN: u64 = 300_000;
pub const GAS_APPROVE_JOINS: u64 = 400_000;
pub const GAS_START: u64 = 400_000;
pub const GAS_APPROVE_TOKEN: u64 = 300_000;
pub const GAS_CONTRIBUTE: u64 = 400_000;
pub const GAS_PLACE_BID: u64 = 400_000;
pub const GAS_CLOSE_BIDS: u64 = 400_000;
pub const GAS_SETTLE: u64 = 900_000;

pub const MIN_BID_PERCENT: u32 = 60;
pub const MAX_BID_PERCENT: u32 = 95;

const NONCE_RETRIES: u32 = 3;

lazy_static! {
    // All signers share one process; the pending nonce must be taken under
    // this lock or concurrent calls race each other off the chain.
    pub static ref SIGNER_LOCK: Mutex<()> = Mutex::new(());
}

/// Bid expressed as a fraction of the contribution amount.
pub fn bid_amount(contribution: U256, percent: u32) -> U256 {
    contribution * U256::from(percent) / U256::from(100u32)
}

/// Lifecycle reported by the pool contract's `getStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Created,
    Active,
    Bidding,
    Settled,
}

impl PoolStatus {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PoolStatus::Created),
            1 => Ok(PoolStatus::Active),
            2 => Ok(PoolStatus::Bidding),
            3 => Ok(PoolStatus::Settled),
            other => Err(Error::Unknown(format!("unexpected pool status {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Created => "created",
            PoolStatus::Active => "active",
            PoolStatus::Bidding => "bidding",
            PoolStatus::Settled => "settled",
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Factory/pool configuration tuple: `(token, contributionAmount,
/// cycleDuration, minMembers, maxMembers, creator)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
    pub token: Address,
    pub contribution_amount: U256,
    pub cycle_duration: U256,
    pub min_members: U256,
    pub max_members: U256,
    pub creator: Address,
}

impl PoolConfig {
    fn from_tuple(tokens: Vec<Token>) -> std::result::Result<Self, ContractError> {
        if tokens.len() != 6 {
            return Err(ContractError::InvalidOutputType(format!(
                "Expected 6 elements, got a list of length {}: {:?}",
                tokens.len(),
                tokens
            )));
        }
        let take_addr = |t: &Token| {
            t.clone().into_address().ok_or_else(|| {
                ContractError::InvalidOutputType(format!("Expected address, got {:?}", t))
            })
        };
        let take_uint = |t: &Token| {
            t.clone().into_uint().ok_or_else(|| {
                ContractError::InvalidOutputType(format!("Expected uint, got {:?}", t))
            })
        };
        Ok(PoolConfig {
            token: take_addr(&tokens[0])?,
            contribution_amount: take_uint(&tokens[1])?,
            cycle_duration: take_uint(&tokens[2])?,
            min_members: take_uint(&tokens[3])?,
            max_members: take_uint(&tokens[4])?,
            creator: take_addr(&tokens[5])?,
        })
    }
}

impl Tokenize for PoolConfig {
    fn into_tokens(self) -> Vec<Token> {
        vec![Token::Tuple(vec![
            self.token.into_token(),
            self.contribution_amount.into_token(),
            self.cycle_duration.into_token(),
            self.min_members.into_token(),
            self.max_members.into_token(),
            self.creator.into_token(),
        ])]
    }
}

impl Detokenize for PoolConfig {
    fn from_tokens(tokens: Vec<Token>) -> std::result::Result<Self, ContractError> {
        if tokens.len() != 1 {
            return Err(ContractError::InvalidOutputType(format!(
                "Expected single element, got a list: {:?}",
                tokens
            )));
        }
        match tokens[0].to_owned() {
            Token::Tuple(inner) | Token::Array(inner) => PoolConfig::from_tuple(inner),
            other => Err(ContractError::InvalidOutputType(format!(
                "Expected `Tuple`, got {:?}",
                other
            ))),
        }
    }
}

fn parse_secret(sec_key: &str) -> Result<SecretKey> {
    SecretKey::from_str(sec_key.trim()).map_err(|_| Error::BadSecret)
}

fn parse_addr(addr: &str) -> Result<Address> {
    addr.trim().parse().map_err(|_| Error::BadAddress(addr.to_string()))
}

/// Preflight, then sign and submit under the nonce lock. The estimate-gas
/// call touches no state and surfaces the revert reason the transaction
/// itself would produce.
async fn signed_call<P>(
    contract: &Contract<Http>,
    eth: &Eth<Http>,
    sec_key: &str,
    func: &'static str,
    params: P,
    gas: u64,
) -> Result<H256>
where
    P: Tokenize + Clone,
{
    let secretkey = parse_secret(sec_key)?;
    let (_sk, caller) = extract_keypair_from_str(sec_key);

    if let Err(e) = contract
        .estimate_gas(func, params.clone(), caller, Options::default())
        .await
    {
        return Err(Error::Revert { step: func, reason: revert_reason(&e) });
    }

    let mut opt = Options {
        gas: Some(gas.into()),
        ..Default::default()
    };
    let hash = {
        let _guard = SIGNER_LOCK.lock().await;
        let mut tries = 0u32;
        let nonce = loop {
            match eth.transaction_count(caller, Some(BlockNumber::Pending)).await {
                Ok(nonce) => break nonce,
                Err(e) if tries < NONCE_RETRIES => {
                    tries += 1;
                    warn!("failed to get pending nonce, tries {}, {:?}", tries, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        opt.nonce = Some(nonce);
        contract.signed_call(func, params, opt, &secretkey).await?
    };
    Ok(hash)
}

/// The factory that deploys per-pool contracts.
#[derive(Debug, Clone, Default)]
pub struct FactoryContract {
    pub factory_addr: String,
    pub sec_key: String,
}

impl FactoryContract {
    fn bind(&self, eth: Eth<Http>) -> Result<(Contract<Http>, Address)> {
        let addr = parse_addr(&self.factory_addr)?;
        let contract = Contract::from_json(eth, addr, FACTORY_ABI.as_bytes())?;
        Ok((contract, addr))
    }

    /// Creates a pool and returns its address parsed from the `PoolCreated`
    /// event, together with the confirmed receipt.
    pub async fn create_pool(
        &self,
        eth: Eth<Http>,
        config: PoolConfig,
    ) -> Result<(Address, TransactionReceipt)> {
        let (contract, factory_addr) = self.bind(eth)?;
        let secretkey = parse_secret(&self.sec_key)?;
        let (_sk, caller) = extract_keypair_from_str(&self.sec_key);

        if let Err(e) = contract
            .estimate_gas("createPool", config.clone(), caller, Options::default())
            .await
        {
            return Err(Error::Revert { step: "createPool", reason: revert_reason(&e) });
        }

        let opt = Options {
            gas: Some(GAS_CREATE_POOL.into()),
            ..Default::default()
        };
        let receipt = {
            let _guard = SIGNER_LOCK.lock().await;
            contract
                .signed_call_with_confirmations("createPool", config, opt, 1, &secretkey)
                .await?
        };

        let pool = parse_pool_created(&contract, factory_addr, &receipt)
            .ok_or(Error::EventMissing("PoolCreated"))?;
        Ok((pool, receipt))
    }
}

fn parse_pool_created(
    contract: &Contract<Http>,
    factory: Address,
    receipt: &TransactionReceipt,
) -> Option<Address> {
    let event = contract.abi().event("PoolCreated").ok()?;
    for log in &receipt.logs {
        if log.address != factory {
            continue;
        }
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.0.clone(),
        };
        if let Ok(parsed) = event.parse_log(raw) {
            for param in parsed.params {
                if param.name == "pool" {
                    return param.value.into_address();
                }
            }
        }
    }
    None
}

/// One deployed pool instance.
#[derive(Debug, Clone, Default)]
pub struct PoolContract {
    pub pool_addr: String,
}

impl PoolContract {
    fn bind(&self, eth: Eth<Http>) -> Result<(Contract<Http>, Address)> {
        let addr = parse_addr(&self.pool_addr)?;
        let contract = Contract::from_json(eth, addr, POOL_ABI.as_bytes())?;
        Ok((contract, addr))
    }

    pub async fn status(&self, eth: Eth<Http>, caller: Address) -> Result<PoolStatus> {
        let (contract, _) = self.bind(eth)?;
        let raw: U256 = contract
            .query("getStatus", (), caller, Options::default(), None)
            .await?;
        PoolStatus::from_u8(raw.low_u32() as u8)
    }

    pub async fn current_cycle(&self, eth: Eth<Http>, caller: Address) -> Result<U256> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("currentCycle", (), caller, Options::default(), None)
            .await?)
    }

    pub async fn members(&self, eth: Eth<Http>, caller: Address) -> Result<Vec<Address>> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("getMembers", (), caller, Options::default(), None)
            .await?)
    }

    pub async fn pending_join_requests(
        &self,
        eth: Eth<Http>,
        caller: Address,
    ) -> Result<Vec<Address>> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("getPendingJoinRequests", (), caller, Options::default(), None)
            .await?)
    }

    pub async fn get_config(&self, eth: Eth<Http>, caller: Address) -> Result<PoolConfig> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("getConfig", (), caller, Options::default(), None)
            .await?)
    }

    pub async fn has_paid(&self, eth: Eth<Http>, cycle: U256, user: Address) -> Result<bool> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("hasPaid", (cycle, user), user, Options::default(), None)
            .await?)
    }

    pub async fn request_join(&self, eth: Eth<Http>, sec_key: &str) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "requestJoin", (), GAS_REQUEST_JOIN).await
    }

    pub async fn approve_all_joins(&self, eth: Eth<Http>, sec_key: &str) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "approveAllJoins", (), GAS_APPROVE_JOINS).await
    }

    pub async fn start(&self, eth: Eth<Http>, sec_key: &str) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "start", (), GAS_START).await
    }

    pub async fn contribute(&self, eth: Eth<Http>, sec_key: &str, cycle: U256) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "contribute", cycle, GAS_CONTRIBUTE).await
    }

    pub async fn place_bid(
        &self,
        eth: Eth<Http>,
        sec_key: &str,
        cycle: U256,
        amount: U256,
    ) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "placeBid", (cycle, amount), GAS_PLACE_BID).await
    }

    pub async fn close_bids(&self, eth: Eth<Http>, sec_key: &str, cycle: U256) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "closeBids", cycle, GAS_CLOSE_BIDS).await
    }

    pub async fn settle(&self, eth: Eth<Http>, sec_key: &str, cycle: U256) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "settle", cycle, GAS_SETTLE).await
    }
}

/// The ERC-20 contribution token.
#[derive(Debug, Clone, Default)]
pub struct TokenContract {
    pub token_addr: String,
}

impl TokenContract {
    fn bind(&self, eth: Eth<Http>) -> Result<(Contract<Http>, Address)> {
        let addr = parse_addr(&self.token_addr)?;
        let contract = Contract::from_json(eth, addr, ERC20_ABI.as_bytes())?;
        Ok((contract, addr))
    }

    pub async fn balance_of(&self, eth: Eth<Http>, owner: Address) -> Result<U256> {
        let (contract, _) = self.bind(eth)?;
        Ok(contract
            .query("balanceOf", owner, owner, Options::default(), None)
            .await?)
    }

    pub async fn approve(
        &self,
        eth: Eth<Http>,
        sec_key: &str,
        spender: Address,
        amount: U256,
    ) -> Result<H256> {
        let (contract, _) = self.bind(eth.clone())?;
        signed_call(&contract, &eth, sec_key, "approve", (spender, amount), GAS_APPROVE_TOKEN).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_tokens() -> Vec<Token> {
        vec![
            Token::Address(Address::repeat_byte(0x11)),
            Token::Uint(U256::from(100_000_000u64)),
            Token::Uint(U256::from(300u64)),
            Token::Uint(U256::from(2u64)),
            Token::Uint(U256::from(5u64)),
            Token::Address(Address::repeat_byte(0x22)),
        ]
    }

    #[test]
    fn pool_config_detokenizes_from_tuple() {
        let cfg = PoolConfig::from_tokens(vec![Token::Tuple(config_tokens())]).unwrap();
        assert_eq!(cfg.token, Address::repeat_byte(0x11));
        assert_eq!(cfg.contribution_amount, U256::from(100_000_000u64));
        assert_eq!(cfg.cycle_duration, U256::from(300u64));
        assert_eq!(cfg.min_members, U256::from(2u64));
        assert_eq!(cfg.max_members, U256::from(5u64));
        assert_eq!(cfg.creator, Address::repeat_byte(0x22));
    }

    #[test]
    fn pool_config_rejects_short_tuple() {
        let mut tokens = config_tokens();
        tokens.pop();
        assert!(PoolConfig::from_tokens(vec![Token::Tuple(tokens)]).is_err());
        assert!(PoolConfig::from_tokens(vec![Token::Bool(true)]).is_err());
    }

    #[test]
    fn pool_config_tokenizes_as_single_tuple() {
        let cfg = PoolConfig::from_tokens(vec![Token::Tuple(config_tokens())]).unwrap();
        let tokens = cfg.into_tokens();
        assert_eq!(tokens.len(), 1);
        match &tokens[0] {
            Token::Tuple(inner) => assert_eq!(inner.len(), 6),
            other => panic!("expected tuple, got {:?}", other),
        }
    }

    #[test]
    fn bid_amount_is_integer_percent() {
        let contribution = U256::from(100_000_000u64); // 100 tokens at 6 decimals
        assert_eq!(bid_amount(contribution, 65), U256::from(65_000_000u64));
        assert_eq!(bid_amount(contribution, 95), U256::from(95_000_000u64));
        // truncating division, never rounds up
        assert_eq!(bid_amount(U256::from(99u64), 65), U256::from(64u64));
    }

    #[test]
    fn pool_status_mapping() {
        assert_eq!(PoolStatus::from_u8(0).unwrap(), PoolStatus::Created);
        assert_eq!(PoolStatus::from_u8(3).unwrap(), PoolStatus::Settled);
        assert!(PoolStatus::from_u8(4).is_err());
        assert_eq!(PoolStatus::Bidding.to_string(), "bidding");
    }
}
