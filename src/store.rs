use chrono::{DateTime, Duration, SecondsFormat, Utc};
use derive_more::Display;
use redis::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// Fixed keys the mirror lists live under.
pub const POOLS_KEY: &str = "roscapool:pools";
pub const JOIN_REQUESTS_KEY: &str = "roscapool:join-requests";
pub const CONTRIBUTIONS_KEY: &str = "roscapool:contributions";
pub const BIDS_KEY: &str = "roscapool:bids";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "active")]
    Active,
    #[display(fmt = "bidding")]
    Bidding,
    #[display(fmt = "settled")]
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "approved")]
    Approved,
    #[display(fmt = "rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BidState {
    #[display(fmt = "active")]
    Active,
    #[display(fmt = "won")]
    Won,
    #[display(fmt = "lost")]
    Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub leader_id: String,
    pub leader_name: String,
    pub total_amount: f64,
    pub contributed_amount: f64,
    pub member_count: u32,
    pub max_members: u32,
    pub contribution_amount: f64,
    pub status: PoolState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidding_end_date: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequestRecord {
    pub id: String,
    pub pool_id: String,
    pub pool_name: String,
    pub member_id: String,
    pub member_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
    pub status: RequestState,
    pub requested_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRecord {
    pub id: String,
    pub pool_id: String,
    pub pool_name: String,
    pub member_id: String,
    pub member_name: String,
    pub amount: f64,
    pub contributed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub id: String,
    pub pool_id: String,
    pub pool_name: String,
    pub member_id: String,
    pub member_name: String,
    pub amount: f64,
    pub bid_at: String,
    pub status: BidState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAnalytics {
    pub pool: PoolRecord,
    pub total_contributions: f64,
    pub contribution_count: usize,
    pub highest_bid: f64,
    pub bid_count: usize,
    pub pending_requests: usize,
    pub approved_members: usize,
}

pub fn iso_now(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn next_id(prefix: &str, count: usize, existing: &[String]) -> String {
    let mut n = count + 1;
    loop {
        let id = format!("{}{:03}", prefix, n);
        if !existing.iter().any(|e| e == &id) {
            return id;
        }
        n += 1;
    }
}

/// The full off-chain mirror of on-chain pool activity. Pure in-memory value;
/// persistence is the [`Store`]'s job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mirror {
    pub pools: Vec<PoolRecord>,
    pub join_requests: Vec<JoinRequestRecord>,
    pub contributions: Vec<ContributionRecord>,
    pub bids: Vec<BidRecord>,
}

impl Mirror {
    /// The demo's two seed pools, installed when the backing store is empty.
    pub fn seeded() -> Self {
        let pool = |id: &str,
                    name: &str,
                    description: &str,
                    total: f64,
                    contributed: f64,
                    members: u32,
                    max: u32,
                    contribution: f64,
                    start: &str,
                    bid_end: &str,
                    created: &str| PoolRecord {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            leader_id: "L001".to_string(),
            leader_name: "Sarah Chen".to_string(),
            total_amount: total,
            contributed_amount: contributed,
            member_count: members,
            max_members: max,
            contribution_amount: contribution,
            status: PoolState::Bidding,
            start_date: Some(start.to_string()),
            bidding_end_date: Some(bid_end.to_string()),
            created_at: created.to_string(),
            pool_address: None,
            transaction_hash: None,
            block_number: None,
        };
        Mirror {
            pools: vec![
                pool(
                    "P001",
                    "Tech Innovators Pool",
                    "Investment pool for emerging tech startups and innovation projects",
                    100_000.0,
                    75_000.0,
                    8,
                    10,
                    100.0,
                    "2025-01-15",
                    "2025-02-15",
                    "2025-01-01",
                ),
                pool(
                    "P002",
                    "Real Estate Ventures",
                    "Collaborative pool for real estate investment opportunities",
                    250_000.0,
                    180_000.0,
                    12,
                    15,
                    150.0,
                    "2025-01-10",
                    "2025-02-10",
                    "2024-12-20",
                ),
            ],
            ..Default::default()
        }
    }

    pub fn next_pool_id(&self) -> String {
        let ids: Vec<String> = self.pools.iter().map(|p| p.id.clone()).collect();
        next_id("P", self.pools.len(), &ids)
    }

    pub fn next_request_id(&self) -> String {
        let ids: Vec<String> = self.join_requests.iter().map(|r| r.id.clone()).collect();
        next_id("JR", self.join_requests.len(), &ids)
    }

    pub fn next_contribution_id(&self) -> String {
        let ids: Vec<String> = self.contributions.iter().map(|c| c.id.clone()).collect();
        next_id("C", self.contributions.len(), &ids)
    }

    pub fn next_bid_id(&self) -> String {
        let ids: Vec<String> = self.bids.iter().map(|b| b.id.clone()).collect();
        next_id("B", self.bids.len(), &ids)
    }

    pub fn pool_by_id(&self, pool_id: &str) -> Option<&PoolRecord> {
        self.pools.iter().find(|p| p.id == pool_id)
    }

    pub fn pool_by_address(&self, address: &str) -> Option<&PoolRecord> {
        self.pools.iter().find(|p| {
            p.pool_address
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case(address))
                .unwrap_or(false)
        })
    }

    /// Inserts a pool, assigning the next free id. Returns the assigned id.
    pub fn add_pool(&mut self, mut pool: PoolRecord) -> String {
        pool.id = self.next_pool_id();
        let id = pool.id.clone();
        self.pools.push(pool);
        id
    }

    /// Moves a pool through its lifecycle. Activation stamps the start date,
    /// entering bidding stamps a bidding deadline 30 days out.
    pub fn update_pool_status(&mut self, pool_id: &str, status: PoolState, now: DateTime<Utc>) {
        if let Some(pool) = self.pools.iter_mut().find(|p| p.id == pool_id) {
            pool.status = status;
            if status == PoolState::Active && pool.start_date.is_none() {
                pool.start_date = Some(iso_now(now));
            }
            if status == PoolState::Bidding && pool.bidding_end_date.is_none() {
                pool.bidding_end_date = Some(iso_now(now + Duration::days(30)));
            }
        }
    }

    pub fn add_join_request(&mut self, mut request: JoinRequestRecord) -> String {
        request.id = self.next_request_id();
        let id = request.id.clone();
        self.join_requests.push(request);
        id
    }

    pub fn pending_requests_for(&self, pool_id: &str) -> Vec<&JoinRequestRecord> {
        self.join_requests
            .iter()
            .filter(|r| r.pool_id == pool_id && r.status == RequestState::Pending)
            .collect()
    }

    /// Approves every pending request for the pool and grows the member
    /// count accordingly. Returns how many were approved.
    pub fn approve_all_for_pool(&mut self, pool_id: &str) -> usize {
        let mut approved = 0;
        for request in &mut self.join_requests {
            if request.pool_id == pool_id && request.status == RequestState::Pending {
                request.status = RequestState::Approved;
                approved += 1;
            }
        }
        if approved > 0 {
            if let Some(pool) = self.pools.iter_mut().find(|p| p.id == pool_id) {
                pool.member_count += approved as u32;
            }
        }
        approved
    }

    pub fn reject_request(&mut self, request_id: &str) {
        if let Some(request) = self.join_requests.iter_mut().find(|r| r.id == request_id) {
            request.status = RequestState::Rejected;
        }
    }

    /// Records a contribution and accumulates it on the pool.
    pub fn add_contribution(&mut self, mut contribution: ContributionRecord) -> String {
        contribution.id = self.next_contribution_id();
        let id = contribution.id.clone();
        if let Some(pool) = self.pools.iter_mut().find(|p| p.id == contribution.pool_id) {
            pool.contributed_amount += contribution.amount;
        }
        self.contributions.push(contribution);
        id
    }

    pub fn add_bid(&mut self, mut bid: BidRecord) -> String {
        bid.id = self.next_bid_id();
        let id = bid.id.clone();
        self.bids.push(bid);
        id
    }

    /// Marks the pool settled; when the winning bid is known, flips every bid
    /// on the pool to won or lost.
    pub fn settle_pool(&mut self, pool_id: &str, winning_bid_id: Option<&str>) {
        if let Some(pool) = self.pools.iter_mut().find(|p| p.id == pool_id) {
            pool.status = PoolState::Settled;
        }
        if let Some(winner) = winning_bid_id {
            for bid in self.bids.iter_mut().filter(|b| b.pool_id == pool_id) {
                bid.status = if bid.id == winner { BidState::Won } else { BidState::Lost };
            }
        }
    }

    pub fn analytics(&self, pool_id: &str) -> Option<PoolAnalytics> {
        let pool = self.pool_by_id(pool_id)?.clone();
        let contributions: Vec<_> =
            self.contributions.iter().filter(|c| c.pool_id == pool_id).collect();
        let bids: Vec<_> = self.bids.iter().filter(|b| b.pool_id == pool_id).collect();
        let requests: Vec<_> =
            self.join_requests.iter().filter(|r| r.pool_id == pool_id).collect();
        Some(PoolAnalytics {
            total_contributions: contributions.iter().map(|c| c.amount).sum(),
            contribution_count: contributions.len(),
            highest_bid: bids.iter().map(|b| b.amount).fold(0.0, f64::max),
            bid_count: bids.len(),
            pending_requests: requests
                .iter()
                .filter(|r| r.status == RequestState::Pending)
                .count(),
            approved_members: requests
                .iter()
                .filter(|r| r.status == RequestState::Approved)
                .count(),
            pool,
        })
    }
}

/// Redis-backed persistence for the [`Mirror`]. One serialized list per key;
/// an empty backend is seeded with the demo pools.
#[derive(Debug, Clone)]
pub struct Store {
    client: Client,
}

impl Store {
    pub fn new(endpoint: &str) -> Result<Self> {
        let url = if endpoint.starts_with("redis://") || endpoint.starts_with("unix://") {
            endpoint.to_string()
        } else {
            format!("redis://{}", endpoint)
        };
        Ok(Self {
            client: Client::open(url.as_str())?,
        })
    }

    fn get_list<T: DeserializeOwned>(
        &self,
        conn: &mut redis::Connection,
        key: &str,
    ) -> Result<Option<Vec<T>>> {
        let raw: Option<String> = redis::cmd("GET").arg(key).query(conn)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn load(&self) -> Result<Mirror> {
        let mut conn = self.client.get_connection()?;
        let pools: Option<Vec<PoolRecord>> = self.get_list(&mut conn, POOLS_KEY)?;
        match pools {
            None => {
                let mirror = Mirror::seeded();
                self.save(&mirror)?;
                Ok(mirror)
            }
            Some(pools) => Ok(Mirror {
                pools,
                join_requests: self
                    .get_list(&mut conn, JOIN_REQUESTS_KEY)?
                    .unwrap_or_default(),
                contributions: self
                    .get_list(&mut conn, CONTRIBUTIONS_KEY)?
                    .unwrap_or_default(),
                bids: self.get_list(&mut conn, BIDS_KEY)?.unwrap_or_default(),
            }),
        }
    }

    pub fn save(&self, mirror: &Mirror) -> Result<()> {
        let mut conn = self.client.get_connection()?;
        redis::cmd("SET")
            .arg(POOLS_KEY)
            .arg(serde_json::to_string(&mirror.pools)?)
            .query::<()>(&mut conn)?;
        redis::cmd("SET")
            .arg(JOIN_REQUESTS_KEY)
            .arg(serde_json::to_string(&mirror.join_requests)?)
            .query::<()>(&mut conn)?;
        redis::cmd("SET")
            .arg(CONTRIBUTIONS_KEY)
            .arg(serde_json::to_string(&mirror.contributions)?)
            .query::<()>(&mut conn)?;
        redis::cmd("SET")
            .arg(BIDS_KEY)
            .arg(serde_json::to_string(&mirror.bids)?)
            .query::<()>(&mut conn)?;
        Ok(())
    }

    /// Load, mutate, save. Last writer wins; the chain stays authoritative.
    pub fn update<T, F: FnOnce(&mut Mirror) -> T>(&self, f: F) -> Result<T> {
        let mut mirror = self.load()?;
        let out = f(&mut mirror);
        self.save(&mirror)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn join_request(pool_id: &str, member_id: &str) -> JoinRequestRecord {
        JoinRequestRecord {
            id: String::new(),
            pool_id: pool_id.to_string(),
            pool_name: "Tech Innovators Pool".to_string(),
            member_id: member_id.to_string(),
            member_name: member_id.to_string(),
            member_address: None,
            pool_address: None,
            status: RequestState::Pending,
            requested_at: "2025-03-01T00:00:00.000Z".to_string(),
            transaction_hash: None,
            block_number: None,
        }
    }

    fn bid(pool_id: &str, member_id: &str, amount: f64) -> BidRecord {
        BidRecord {
            id: String::new(),
            pool_id: pool_id.to_string(),
            pool_name: "Tech Innovators Pool".to_string(),
            member_id: member_id.to_string(),
            member_name: member_id.to_string(),
            amount,
            bid_at: "2025-03-01T00:00:00.000Z".to_string(),
            status: BidState::Active,
            pool_address: None,
            transaction_hash: None,
            block_number: None,
        }
    }

    #[test]
    fn seed_contains_the_two_demo_pools() {
        let mirror = Mirror::seeded();
        assert_eq!(mirror.pools.len(), 2);
        assert_eq!(mirror.pools[0].id, "P001");
        assert_eq!(mirror.pools[1].name, "Real Estate Ventures");
        assert!(mirror.join_requests.is_empty());
        assert!(mirror.contributions.is_empty());
        assert!(mirror.bids.is_empty());
    }

    #[test]
    fn id_generation_skips_collisions() {
        let mut mirror = Mirror::seeded();
        assert_eq!(mirror.next_pool_id(), "P003");
        // fake a hole: remove P001 so len+1 collides with P002
        mirror.pools.remove(0);
        assert_eq!(mirror.next_pool_id(), "P003");
        assert_eq!(mirror.next_request_id(), "JR001");
    }

    #[test]
    fn contribution_accumulates_on_pool() {
        let mut mirror = Mirror::seeded();
        let id = mirror.add_contribution(ContributionRecord {
            id: String::new(),
            pool_id: "P001".to_string(),
            pool_name: "Tech Innovators Pool".to_string(),
            member_id: "M001".to_string(),
            member_name: "Alex Thompson".to_string(),
            amount: 100.0,
            contributed_at: "2025-03-01T00:00:00.000Z".to_string(),
            transaction_hash: None,
        });
        assert_eq!(id, "C001");
        assert_eq!(mirror.pool_by_id("P001").unwrap().contributed_amount, 75_100.0);
    }

    #[test]
    fn status_transitions_stamp_dates() {
        let mut mirror = Mirror::default();
        mirror.add_pool(PoolRecord {
            id: String::new(),
            name: "p".to_string(),
            description: String::new(),
            leader_id: "L001".to_string(),
            leader_name: String::new(),
            total_amount: 0.0,
            contributed_amount: 0.0,
            member_count: 0,
            max_members: 5,
            contribution_amount: 100.0,
            status: PoolState::Pending,
            start_date: None,
            bidding_end_date: None,
            created_at: "2025-03-01T00:00:00.000Z".to_string(),
            pool_address: None,
            transaction_hash: None,
            block_number: None,
        });
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        mirror.update_pool_status("P001", PoolState::Active, now);
        let pool = mirror.pool_by_id("P001").unwrap();
        assert_eq!(pool.status, PoolState::Active);
        assert_eq!(pool.start_date.as_deref(), Some("2025-03-02T12:00:00.000Z"));

        mirror.update_pool_status("P001", PoolState::Bidding, now);
        let pool = mirror.pool_by_id("P001").unwrap();
        assert_eq!(pool.bidding_end_date.as_deref(), Some("2025-04-01T12:00:00.000Z"));
    }

    #[test]
    fn approve_all_flips_pending_and_grows_member_count() {
        let mut mirror = Mirror::seeded();
        mirror.add_join_request(join_request("P001", "M001"));
        mirror.add_join_request(join_request("P001", "M002"));
        mirror.add_join_request(join_request("P002", "M001"));
        assert_eq!(mirror.pending_requests_for("P001").len(), 2);

        let approved = mirror.approve_all_for_pool("P001");
        assert_eq!(approved, 2);
        assert!(mirror.pending_requests_for("P001").is_empty());
        assert_eq!(mirror.pool_by_id("P001").unwrap().member_count, 10);
        // the other pool's request is untouched
        assert_eq!(mirror.pending_requests_for("P002").len(), 1);
    }

    #[test]
    fn rejected_requests_leave_the_pending_queue() {
        let mut mirror = Mirror::seeded();
        let rejected = mirror.add_join_request(join_request("P001", "M001"));
        mirror.add_join_request(join_request("P001", "M002"));

        mirror.reject_request(&rejected);
        assert_eq!(mirror.pending_requests_for("P001").len(), 1);

        // bulk approval skips the rejected one and counts only the rest
        let approved = mirror.approve_all_for_pool("P001");
        assert_eq!(approved, 1);
        let status = mirror.join_requests.iter().find(|r| r.id == rejected).unwrap().status;
        assert_eq!(status, RequestState::Rejected);
        assert_eq!(mirror.pool_by_id("P001").unwrap().member_count, 9);
    }

    #[test]
    fn settle_marks_winning_and_losing_bids() {
        let mut mirror = Mirror::seeded();
        let b1 = mirror.add_bid(bid("P001", "M001", 65.0));
        let b2 = mirror.add_bid(bid("P001", "M002", 81.0));
        mirror.settle_pool("P001", Some(&b2));

        assert_eq!(mirror.pool_by_id("P001").unwrap().status, PoolState::Settled);
        let status = |id: &str| mirror.bids.iter().find(|b| b.id == id).unwrap().status;
        assert_eq!(status(&b1), BidState::Lost);
        assert_eq!(status(&b2), BidState::Won);
    }

    #[test]
    fn analytics_summarizes_one_pool() {
        let mut mirror = Mirror::seeded();
        mirror.add_join_request(join_request("P001", "M001"));
        mirror.approve_all_for_pool("P001");
        mirror.add_join_request(join_request("P001", "M002"));
        mirror.add_bid(bid("P001", "M001", 65.0));
        mirror.add_bid(bid("P001", "M002", 81.0));

        let analytics = mirror.analytics("P001").unwrap();
        assert_eq!(analytics.bid_count, 2);
        assert_eq!(analytics.highest_bid, 81.0);
        assert_eq!(analytics.pending_requests, 1);
        assert_eq!(analytics.approved_members, 1);
        assert!(mirror.analytics("P999").is_none());
    }

    #[test]
    fn records_serialize_with_camel_case_fields() {
        let mirror = Mirror::seeded();
        let json = serde_json::to_string(&mirror.pools[0]).unwrap();
        assert!(json.contains("\"contributionAmount\":100.0"));
        assert!(json.contains("\"maxMembers\":10"));
        assert!(json.contains("\"status\":\"bidding\""));
        // absent provenance is omitted entirely
        assert!(!json.contains("poolAddress"));

        let back: PoolRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mirror.pools[0]);
    }
}
