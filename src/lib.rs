pub mod api;
pub mod config;
pub mod contract;
pub mod error;
pub mod server;
pub mod store;
pub mod utils;

use std::error::Error as StdError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bip0039::{Count, Language, Mnemonic};
use bip32::{DerivationPath, XPrv};
use libsecp256k1::{PublicKey, SecretKey};
use log::{error, info, warn};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tokio::runtime::Runtime;
use web3::types::{Address, Block, BlockId, BlockNumber, Bytes, TransactionReceipt, H160, H256, U256, U64};

use crate::config::Config;
use crate::contract::{
    bid_amount, FactoryContract, PoolConfig, PoolContract, PoolStatus, TokenContract,
    MAX_BID_PERCENT, MIN_BID_PERCENT,
};
use crate::error::{Error, InternalError, Result};
use crate::utils::{extract_keypair_from_config, extract_keypair_from_str, format_units, parse_units};

pub const BLOCK_TIME: u64 = 5;

const RECEIPT_INTERVAL_SECS: u64 = 3;
const RECEIPT_RETRIES: u64 = 40;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub address: String,
    pub private: String,
}

/// Generates a fresh BIP-39 wallet on the standard Ethereum derivation path.
#[inline(always)]
pub fn one_eth_key() -> KeyPair {
    let mnemonic = Mnemonic::generate_in(Language::English, Count::Words12);
    let bs = mnemonic.to_seed("");
    let ext = XPrv::derive_from_path(&bs, &DerivationPath::from_str("m/44'/60'/0'/0/0").unwrap()).unwrap();

    let secret = SecretKey::parse_slice(&ext.to_bytes()).unwrap();
    let public = PublicKey::from_secret_key(&secret);

    let mut res = [0u8; 64];
    res.copy_from_slice(&public.serialize()[1..65]);
    let public = H160::from(H256::from_slice(Keccak256::digest(&res).as_slice()));

    KeyPair {
        address: eth_checksum::checksum(&format!("{:?}", public)),
        private: hex::encode(secret.serialize()),
    }
}

fn checksum(addr: Address) -> String {
    eth_checksum::checksum(&format!("{:?}", addr))
}

fn hash_str(hash: H256) -> String {
    format!("{:?}", hash)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolOutcome {
    pub pool_address: String,
    pub creator: String,
    pub contribution_amount: String,
    pub cycle_duration: u64,
    pub min_members: u32,
    pub max_members: u32,
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub pool_address: String,
    pub member_id: String,
    pub member_address: String,
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOutcome {
    pub pool_address: String,
    pub pending_count: usize,
    pub transaction_hash: Option<String>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub pool_address: String,
    pub status_before: String,
    pub status_after: String,
    pub cycle_id: String,
    pub members_after: usize,
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributeOutcome {
    pub pool_address: String,
    pub member_id: String,
    pub member_address: String,
    pub cycle_id: String,
    pub contribution_amount: String,
    pub approve_transaction_hash: String,
    pub contribute_transaction_hash: String,
    pub contribute_block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidOutcome {
    pub pool_address: String,
    pub member_id: String,
    pub member_address: String,
    pub cycle_id: String,
    pub bid_percent: u32,
    pub bid_amount: String,
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    pub pool_address: String,
    pub cycle_id: String,
    pub close_bids_transaction_hash: String,
    pub settle_transaction_hash: String,
    pub status_after: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutcome {
    pub pool_address: String,
    pub status: String,
    pub cycle_id: String,
    pub member_count: usize,
    pub members: Vec<String>,
    pub pending_requests: Vec<String>,
    pub token: String,
    pub contribution_amount: String,
    pub cycle_duration: u64,
    pub min_members: u32,
    pub max_members: u32,
    pub creator: String,
}

/// Blocking facade over the node connection. Every chain interaction the CLI
/// or a request handler performs goes through one of these; the embedded
/// current-thread runtime drives the async web3 calls.
#[derive(Debug)]
pub struct BlockClient {
    pub web3: Arc<web3::Web3<web3::transports::Http>>,
    pub eth: Arc<web3::api::Eth<web3::transports::Http>>,
    pub root_sk: secp256k1::SecretKey,
    pub root_addr: Address,
    pub config: Config,
    rt: Runtime,
}

impl BlockClient {
    pub fn setup(config: &Config, timeout: Option<u64>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.unwrap_or(3)))
            .build()
            .unwrap();
        let url = Url::parse(config.chain.endpoint.as_str()).unwrap();
        let transport = web3::transports::Http::with_client(client, url);
        let web3 = Arc::new(web3::Web3::new(transport));
        let eth = Arc::new(web3.eth());
        let (root_sk, root_addr) = extract_keypair_from_config(config);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        Self {
            web3,
            eth,
            root_sk,
            root_addr,
            config: config.clone(),
            rt,
        }
    }

    pub fn chain_id(&self) -> Option<U256> {
        self.rt.block_on(self.eth.chain_id()).ok()
    }

    pub fn block_number(&self) -> Option<U64> {
        self.rt.block_on(self.eth.block_number()).ok()
    }

    pub fn current_block(&self) -> Option<Block<H256>> {
        self.rt
            .block_on(self.eth.block(BlockId::Number(BlockNumber::Latest)))
            .unwrap_or_default()
    }

    pub fn gas_price(&self) -> Option<U256> {
        self.rt.block_on(self.eth.gas_price()).ok()
    }

    pub fn nonce(&self, from: Address, block: Option<BlockNumber>) -> Option<U256> {
        self.rt.block_on(self.eth.transaction_count(from, block)).ok()
    }

    pub fn pending_nonce(&self, from: Address) -> Option<U256> {
        self.pending_nonce_inner(from, Some(3), None)
    }

    /// Polls the pending nonce until the node answers, up to `times` tries.
    pub fn pending_nonce_inner(
        &self,
        from: Address,
        interval: Option<u64>,
        times: Option<u64>,
    ) -> Option<U256> {
        let interval = interval.unwrap_or(5);
        let mut tries = 1u64;
        loop {
            match self
                .rt
                .block_on(self.eth.transaction_count(from, Some(BlockNumber::Pending)))
            {
                Ok(nonce) => break Some(nonce),
                Err(e) => error!("failed to get nonce, tries {}, {:?}", tries, e),
            }
            std::thread::sleep(Duration::from_secs(interval));
            if times == Some(tries) || times == Some(0u64) {
                break None;
            }
            tries += 1;
        }
    }

    pub fn balance(&self, address: Address, number: Option<BlockNumber>) -> U256 {
        self.rt.block_on(self.eth.balance(address, number)).unwrap_or_default()
    }

    pub fn transaction_receipt(&self, hash: H256) -> Option<TransactionReceipt> {
        self.rt.block_on(self.eth.transaction_receipt(hash)).unwrap_or_default()
    }

    pub fn code_at(&self, address: Address) -> Option<Bytes> {
        self.rt.block_on(self.eth.code(address, None)).ok()
    }

    pub fn wait_for_tx_receipt(
        &self,
        hash: H256,
        interval: Duration,
        times: u64,
    ) -> (u64, Option<TransactionReceipt>) {
        let mut wait = 0;
        let mut retry = times;
        loop {
            if let Some(receipt) = self.transaction_receipt(hash) {
                wait = times + 1 - retry;
                break (wait, Some(receipt));
            } else {
                std::thread::sleep(interval);
                retry -= 1;
                if retry == 0 {
                    break (wait, None);
                }
            }
        }
    }

    /// Confirms the connected node serves the configured chain.
    pub fn check_chain(&self) -> Result<()> {
        let expected =
            U256::from_dec_str(self.config.chain.chain_id.trim()).map_err(|_| Error::CheckChainErr)?;
        match self.chain_id() {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => {
                warn!("connected chain id {} != configured {}", actual, expected);
                Err(Error::CheckChainErr)
            }
            None => Err(Error::CheckChainErr),
        }
    }

    /// Parses an address and verifies contract code is deployed there.
    pub fn check_code(&self, addr: &str) -> Result<Address> {
        let address: Address = addr.trim().parse().map_err(|_| Error::BadAddress(addr.to_string()))?;
        match self.code_at(address) {
            Some(code) if !code.0.is_empty() => Ok(address),
            _ => Err(Error::NoCode(checksum(address))),
        }
    }

    pub fn parse_error(&self, err: Option<&dyn StdError>) -> Error {
        match err {
            Some(e) => {
                let err_str = e.to_string();
                if err_str.contains("error sending request") {
                    Error::SendErr
                } else if err_str.contains("InternalError") {
                    if err_str.contains("InvalidNonce") {
                        Error::TxInternalErr(InternalError::InvalidNonce(err_str))
                    } else {
                        Error::TxInternalErr(InternalError::Other(err_str))
                    }
                } else {
                    Error::Unknown(err_str)
                }
            }
            None => Error::Unknown("empty error".to_string()),
        }
    }

    fn wait_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
        let (wait, receipt) = self.wait_for_tx_receipt(
            hash,
            Duration::from_secs(RECEIPT_INTERVAL_SECS),
            RECEIPT_RETRIES,
        );
        match receipt {
            Some(receipt) => {
                info!("receipt for {:?} after {} polls", hash, wait);
                Ok(receipt)
            }
            None => Err(Error::ReceiptTimeout(hash_str(hash))),
        }
    }

    /// Re-tags a node transport failure so callers see the transient class
    /// instead of a raw web3 error.
    fn classify(&self, e: Error) -> Error {
        match e {
            Error::Web3(w) => self.parse_error(Some(&w)),
            other => other,
        }
    }

    fn member_keypair(&self, member_id: &str) -> Result<(String, Address)> {
        let secret = self.config.member_secret(member_id)?.to_string();
        let (_sk, addr) = extract_keypair_from_str(&secret);
        Ok((secret, addr))
    }

    /// Deploys a new pool through the factory. The creator funds gas, so its
    /// native balance is checked against the configured reserve first.
    pub fn create_pool(&self, amount: &str, max_members: u32) -> Result<CreatePoolOutcome> {
        self.check_chain()?;

        let reserve = self.config.chain.opts.min_gas_reserve.trim();
        if !reserve.is_empty() {
            let reserve = U256::from_dec_str(reserve).map_err(|_| Error::ParseAmount(reserve.to_string()))?;
            let balance = self.balance(self.root_addr, None);
            if balance < reserve {
                return Err(Error::LowGasReserve(balance.to_string()));
            }
        }

        let token = self.check_code(&self.config.chain.token)?;
        self.check_code(&self.config.chain.factory)?;

        let opts = &self.config.chain.opts;
        let pool_config = PoolConfig {
            token,
            contribution_amount: parse_units(amount, opts.decimals)?,
            cycle_duration: U256::from(opts.cycle_duration),
            min_members: U256::from(opts.min_members),
            max_members: U256::from(max_members),
            creator: self.root_addr,
        };

        let factory = FactoryContract {
            factory_addr: self.config.chain.factory.clone(),
            sec_key: self.config.creator_secret.clone(),
        };
        info!(
            "creating pool: {} tokens per cycle, up to {} members",
            amount, max_members
        );
        let (pool, receipt) = self
            .rt
            .block_on(factory.create_pool((*self.eth).clone(), pool_config))
            .map_err(|e| self.classify(e))?;
        info!("pool deployed at {}", checksum(pool));

        Ok(CreatePoolOutcome {
            pool_address: checksum(pool),
            creator: checksum(self.root_addr),
            contribution_amount: amount.trim().to_string(),
            cycle_duration: opts.cycle_duration,
            min_members: opts.min_members,
            max_members,
            transaction_hash: hash_str(receipt.transaction_hash),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Submits a join request signed by the member's wallet.
    pub fn request_join(&self, pool_addr: &str, member_id: &str) -> Result<JoinOutcome> {
        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let (secret, member_addr) = self.member_keypair(member_id)?;

        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let hash = self
            .rt
            .block_on(contract.request_join((*self.eth).clone(), &secret))
            .map_err(|e| self.classify(e))?;
        let receipt = self.wait_receipt(hash)?;

        Ok(JoinOutcome {
            pool_address: checksum(pool),
            member_id: member_id.to_string(),
            member_address: checksum(member_addr),
            transaction_hash: hash_str(hash),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Approves every pending join request as the pool creator. When nothing
    /// is pending no transaction is sent.
    pub fn approve_all_joins(&self, pool_addr: &str) -> Result<ApproveOutcome> {
        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };

        let pending = self
            .rt
            .block_on(contract.pending_join_requests((*self.eth).clone(), self.root_addr))?;
        if pending.is_empty() {
            info!("no pending join requests for {}", checksum(pool));
            return Ok(ApproveOutcome {
                pool_address: checksum(pool),
                pending_count: 0,
                transaction_hash: None,
                block_number: None,
            });
        }

        let hash = self
            .rt
            .block_on(contract.approve_all_joins((*self.eth).clone(), &self.config.creator_secret))
            .map_err(|e| self.classify(e))?;
        let receipt = self.wait_receipt(hash)?;

        Ok(ApproveOutcome {
            pool_address: checksum(pool),
            pending_count: pending.len(),
            transaction_hash: Some(hash_str(hash)),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Starts the first contribution cycle. Refuses when the pool already
    /// left its created state.
    pub fn start_pool(&self, pool_addr: &str) -> Result<StartOutcome> {
        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let eth = (*self.eth).clone();

        let before = self.rt.block_on(contract.status(eth.clone(), self.root_addr))?;
        if before != PoolStatus::Created {
            return Err(Error::AlreadyActive);
        }

        let hash = self
            .rt
            .block_on(contract.start(eth.clone(), &self.config.creator_secret))
            .map_err(|e| self.classify(e))?;
        let receipt = self.wait_receipt(hash)?;

        let after = self.rt.block_on(contract.status(eth.clone(), self.root_addr))?;
        let cycle = self.rt.block_on(contract.current_cycle(eth.clone(), self.root_addr))?;
        let members = self.rt.block_on(contract.members(eth, self.root_addr))?;

        Ok(StartOutcome {
            pool_address: checksum(pool),
            status_before: before.to_string(),
            status_after: after.to_string(),
            cycle_id: cycle.to_string(),
            members_after: members.len(),
            transaction_hash: hash_str(hash),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Pays a member's contribution for the current cycle: ERC-20 approve
    /// first, then the pool pulls the tokens.
    pub fn contribute(&self, pool_addr: &str, member_id: &str, amount: &str) -> Result<ContributeOutcome> {
        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let (secret, member_addr) = self.member_keypair(member_id)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let eth = (*self.eth).clone();

        let config = self.rt.block_on(contract.get_config(eth.clone(), member_addr))?;
        let decimals = self.config.chain.opts.decimals;
        let provided = parse_units(amount, decimals)?;
        if provided != config.contribution_amount {
            return Err(Error::AmountMismatch {
                required: format_units(config.contribution_amount, decimals),
                provided: format_units(provided, decimals),
            });
        }

        let token = TokenContract { token_addr: checksum(config.token) };
        let balance = self.rt.block_on(token.balance_of(eth.clone(), member_addr))?;
        if balance < provided {
            return Err(Error::InsufficientBalance {
                required: format_units(provided, decimals),
                available: format_units(balance, decimals),
            });
        }

        let cycle = self.rt.block_on(contract.current_cycle(eth.clone(), member_addr))?;

        let approve_hash = self
            .rt
            .block_on(token.approve(eth.clone(), &secret, pool, provided))
            .map_err(|e| self.classify(e))?;
        self.wait_receipt(approve_hash)?;

        let contribute_hash = self
            .rt
            .block_on(contract.contribute(eth, &secret, cycle))
            .map_err(|e| self.classify(e))?;
        let receipt = self.wait_receipt(contribute_hash)?;
        info!("{} contributed {} to cycle {}", member_id, amount, cycle);

        Ok(ContributeOutcome {
            pool_address: checksum(pool),
            member_id: member_id.to_string(),
            member_address: checksum(member_addr),
            cycle_id: cycle.to_string(),
            contribution_amount: amount.trim().to_string(),
            approve_transaction_hash: hash_str(approve_hash),
            contribute_transaction_hash: hash_str(contribute_hash),
            contribute_block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Bids a percentage of the contribution amount for the current cycle's
    /// payout. Contribution must be in before bidding.
    pub fn place_bid(&self, pool_addr: &str, member_id: &str, percent: u32) -> Result<BidOutcome> {
        if !(MIN_BID_PERCENT..=MAX_BID_PERCENT).contains(&percent) {
            return Err(Error::BidOutOfRange(percent));
        }

        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let (secret, member_addr) = self.member_keypair(member_id)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let eth = (*self.eth).clone();

        let cycle = self.rt.block_on(contract.current_cycle(eth.clone(), member_addr))?;
        let paid = self.rt.block_on(contract.has_paid(eth.clone(), cycle, member_addr))?;
        if !paid {
            return Err(Error::NotContributed {
                member: member_id.to_string(),
                cycle: cycle.to_string(),
            });
        }

        let config = self.rt.block_on(contract.get_config(eth.clone(), member_addr))?;
        let amount = bid_amount(config.contribution_amount, percent);

        let hash = self
            .rt
            .block_on(contract.place_bid(eth, &secret, cycle, amount))
            .map_err(|e| self.classify(e))?;
        let receipt = self.wait_receipt(hash)?;

        Ok(BidOutcome {
            pool_address: checksum(pool),
            member_id: member_id.to_string(),
            member_address: checksum(member_addr),
            cycle_id: cycle.to_string(),
            bid_percent: percent,
            bid_amount: format_units(amount, self.config.chain.opts.decimals),
            transaction_hash: hash_str(hash),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    /// Ends the current cycle: close the bid window, then settle the payout.
    /// Both steps revert with timing errors when called too soon, so the
    /// reasons are annotated with what to do about them.
    pub fn settle_cycle(&self, pool_addr: &str) -> Result<SettleOutcome> {
        self.check_chain()?;
        let pool = self.check_code(pool_addr)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let eth = (*self.eth).clone();
        let secret = &self.config.creator_secret;

        let cycle = self.rt.block_on(contract.current_cycle(eth.clone(), self.root_addr))?;

        let close_hash = self
            .rt
            .block_on(contract.close_bids(eth.clone(), secret, cycle))
            .map_err(|e| {
                annotate_revert(
                    self.classify(e),
                    "If it's 'too early', wait until the bid window closes and retry.",
                )
            })?;
        self.wait_receipt(close_hash)?;

        let settle_hash = self
            .rt
            .block_on(contract.settle(eth.clone(), secret, cycle))
            .map_err(|e| {
                annotate_revert(
                    self.classify(e),
                    "If it's 'cycle not ended', wait for the cycle duration to elapse and retry.",
                )
            })?;
        self.wait_receipt(settle_hash)?;

        let after = self.rt.block_on(contract.status(eth, self.root_addr))?;
        info!("cycle {} of {} settled", cycle, checksum(pool));

        Ok(SettleOutcome {
            pool_address: checksum(pool),
            cycle_id: cycle.to_string(),
            close_bids_transaction_hash: hash_str(close_hash),
            settle_transaction_hash: hash_str(settle_hash),
            status_after: after.to_string(),
        })
    }

    /// Read-only snapshot of one pool.
    pub fn pool_status(&self, pool_addr: &str) -> Result<StatusOutcome> {
        let pool = self.check_code(pool_addr)?;
        let contract = PoolContract { pool_addr: pool_addr.trim().to_string() };
        let eth = (*self.eth).clone();

        let status = self.rt.block_on(contract.status(eth.clone(), self.root_addr))?;
        let cycle = self.rt.block_on(contract.current_cycle(eth.clone(), self.root_addr))?;
        let members = self.rt.block_on(contract.members(eth.clone(), self.root_addr))?;
        let pending = self
            .rt
            .block_on(contract.pending_join_requests(eth.clone(), self.root_addr))?;
        let config = self.rt.block_on(contract.get_config(eth, self.root_addr))?;

        Ok(StatusOutcome {
            pool_address: checksum(pool),
            status: status.to_string(),
            cycle_id: cycle.to_string(),
            member_count: members.len(),
            members: members.iter().map(|m| checksum(*m)).collect(),
            pending_requests: pending.iter().map(|m| checksum(*m)).collect(),
            token: checksum(config.token),
            contribution_amount: format_units(config.contribution_amount, self.config.chain.opts.decimals),
            cycle_duration: config.cycle_duration.as_u64(),
            min_members: config.min_members.low_u32(),
            max_members: config.max_members.low_u32(),
            creator: checksum(config.creator),
        })
    }
}

fn annotate_revert(e: Error, hint: &str) -> Error {
    match e {
        Error::Revert { step, reason } => Error::Revert {
            step,
            reason: format!("{}. {}", reason, hint),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // nothing listens on this port; calls fail fast with a transport error
    fn offline_client() -> BlockClient {
        let config: Config = serde_json::from_str(
            r#"{
                "chain": {
                    "name": "local",
                    "chainId": "11142220",
                    "endpoint": "http://127.0.0.1:9",
                    "token": "0x6d9b3bD0b27E1AC58Fd876351E19aD7b4e734b1a",
                    "factory": "0xC4f3BeE53bBd6dB94bbBD7534B72434d0a096B05",
                    "opts": {}
                },
                "http_listen": "127.0.0.1:3000",
                "redis": "127.0.0.1:6379",
                "leader_id": "L001",
                "leader_name": "Sarah Chen",
                "creator_secret": "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
                "member_secrets": {
                    "M001": "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                }
            }"#,
        )
        .unwrap();
        BlockClient::setup(&config, Some(1))
    }

    #[test]
    fn pending_nonce_gives_up_after_bounded_tries() {
        let client = offline_client();
        let nonce = client.pending_nonce_inner(client.root_addr, Some(0), Some(1));
        assert!(nonce.is_none());
    }

    #[test]
    fn write_flows_check_the_chain_before_signing() {
        let client = offline_client();
        let pool = "0xC4f3BeE53bBd6dB94bbBD7534B72434d0a096B05";
        assert!(matches!(client.request_join(pool, "M001"), Err(Error::CheckChainErr)));
        assert!(matches!(client.start_pool(pool), Err(Error::CheckChainErr)));
        assert!(matches!(client.contribute(pool, "M001", "100"), Err(Error::CheckChainErr)));
        assert!(matches!(client.place_bid(pool, "M001", 65), Err(Error::CheckChainErr)));
        assert!(matches!(client.settle_cycle(pool), Err(Error::CheckChainErr)));
        // local validation still fires first
        assert!(matches!(client.place_bid(pool, "M001", 42), Err(Error::BidOutOfRange(42))));
    }

    #[test]
    fn node_errors_classify_by_message() {
        let client = offline_client();
        let send = std::io::Error::new(std::io::ErrorKind::Other, "error sending request");
        assert!(matches!(client.parse_error(Some(&send)), Error::SendErr));

        let nonce = std::io::Error::new(
            std::io::ErrorKind::Other,
            "InternalError { InvalidNonce: expected 4, got 2 }",
        );
        assert!(matches!(
            client.parse_error(Some(&nonce)),
            Error::TxInternalErr(InternalError::InvalidNonce(_))
        ));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "who knows");
        assert!(matches!(client.parse_error(Some(&other)), Error::Unknown(_)));
        assert!(matches!(client.parse_error(None), Error::Unknown(_)));
    }

    #[test]
    fn classify_rewraps_transport_failures_only() {
        let client = offline_client();
        let err = client.classify(Error::Web3(web3::Error::Transport(
            web3::error::TransportError::Message("error sending request for url".to_string()),
        )));
        assert!(matches!(err, Error::SendErr));
        // domain errors pass through untouched
        assert!(matches!(client.classify(Error::AlreadyActive), Error::AlreadyActive));
    }

    #[test]
    fn generated_keys_are_valid_wallets() {
        let kp = one_eth_key();
        assert_eq!(kp.private.len(), 64);
        assert!(kp.address.starts_with("0x"));
        assert_eq!(kp.address.len(), 42);
        // derivation from the printed secret lands on the same address
        let (_sk, addr) = extract_keypair_from_str(&kp.private);
        assert_eq!(checksum(addr), kp.address);
    }

    #[test]
    fn revert_annotation_keeps_the_step() {
        let err = annotate_revert(
            Error::Revert { step: "closeBids", reason: "too early".to_string() },
            "If it's 'too early', wait until the bid window closes and retry.",
        );
        assert_eq!(
            err.to_string(),
            "closeBids failed: too early. If it's 'too early', wait until the bid window closes and retry."
        );
        // non-revert errors pass through untouched
        let err = annotate_revert(Error::AlreadyActive, "whatever");
        assert!(matches!(err, Error::AlreadyActive));
    }

    #[test]
    fn outcome_json_uses_camel_case() {
        let outcome = ApproveOutcome {
            pool_address: "0xabc".to_string(),
            pending_count: 0,
            transaction_hash: None,
            block_number: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"poolAddress\":\"0xabc\""));
        assert!(json.contains("\"pendingCount\":0"));
    }
}
