use actix_web::{error::BlockingError, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::api::{json_error_handler, notfound, ApiResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{
    iso_now, BidRecord, BidState, ContributionRecord, JoinRequestRecord, PoolRecord, PoolState,
    RequestState, Store,
};
use crate::BlockClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolReq {
    pub name: Option<String>,
    pub description: Option<String>,
    pub contribution_amount: f64,
    pub max_members: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPoolReq {
    pub pool_address: String,
    pub member_id: String,
    #[serde(default)]
    pub member_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolReq {
    pub pool_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributeReq {
    pub pool_address: String,
    pub member_id: String,
    pub amount: f64,
    #[serde(default)]
    pub member_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBidReq {
    pub pool_address: String,
    pub member_id: String,
    pub bid_percent: u32,
    #[serde(default)]
    pub member_name: Option<String>,
}

fn amount_str(amount: f64) -> Result<String> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::ParseAmount(amount.to_string()));
    }
    // f64 from JSON; integer amounts print without the trailing ".0"
    if amount.fract() == 0.0 {
        Ok(format!("{}", amount as u64))
    } else {
        Ok(amount.to_string())
    }
}

fn respond<T: Serialize>(
    req: &HttpRequest,
    res: std::result::Result<Result<T>, BlockingError>,
) -> HttpResponse {
    match res {
        Ok(Ok(data)) => ApiResult::new().with_data(data).respond_to(req),
        Ok(Err(e)) => ApiResult::<()>::from_err(&e).respond_to(req),
        Err(e) => ApiResult::<()>::new()
            .code(500)
            .with_msg(e.to_string())
            .respond_to(req),
    }
}

async fn create_pool(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreatePoolReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let amount = amount_str(body.contribution_amount)?;
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.create_pool(&amount, body.max_members)?;

        let record = PoolRecord {
            id: String::new(),
            name: body.name.unwrap_or_else(|| "On-chain Pool".to_string()),
            description: body.description.unwrap_or_default(),
            leader_id: st.config.leader_id.clone(),
            leader_name: st.config.leader_name.clone(),
            total_amount: body.contribution_amount * body.max_members as f64,
            contributed_amount: 0.0,
            member_count: 0,
            max_members: body.max_members,
            contribution_amount: body.contribution_amount,
            status: PoolState::Pending,
            start_date: None,
            bidding_end_date: None,
            created_at: iso_now(Utc::now()),
            pool_address: Some(outcome.pool_address.clone()),
            transaction_hash: Some(outcome.transaction_hash.clone()),
            block_number: outcome.block_number,
        };
        let id = st.store.update(|m| m.add_pool(record))?;
        info!("pool {} mirrored at {}", id, outcome.pool_address);
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn join_pool(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<JoinPoolReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.request_join(&body.pool_address, &body.member_id)?;

        let pool_address = outcome.pool_address.clone();
        let record = JoinRequestRecord {
            id: String::new(),
            pool_id: String::new(),
            pool_name: String::new(),
            member_id: body.member_id.clone(),
            member_name: body.member_name.unwrap_or_else(|| body.member_id.clone()),
            member_address: Some(outcome.member_address.clone()),
            pool_address: Some(pool_address.clone()),
            status: RequestState::Pending,
            requested_at: iso_now(Utc::now()),
            transaction_hash: Some(outcome.transaction_hash.clone()),
            block_number: outcome.block_number,
        };
        st.store.update(|m| {
            let mut record = record;
            if let Some(pool) = m.pool_by_address(&pool_address) {
                record.pool_id = pool.id.clone();
                record.pool_name = pool.name.clone();
            }
            m.add_join_request(record)
        })?;
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn approve_all_joins(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PoolReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.approve_all_joins(&body.pool_address)?;

        if outcome.pending_count > 0 {
            let pool_address = outcome.pool_address.clone();
            st.store.update(|m| {
                if let Some(pool) = m.pool_by_address(&pool_address) {
                    let id = pool.id.clone();
                    m.approve_all_for_pool(&id);
                }
            })?;
        }
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn start_pool(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PoolReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.start_pool(&body.pool_address)?;

        let pool_address = outcome.pool_address.clone();
        st.store.update(|m| {
            if let Some(pool) = m.pool_by_address(&pool_address) {
                let id = pool.id.clone();
                m.update_pool_status(&id, PoolState::Active, Utc::now());
            }
        })?;
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn contribute(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ContributeReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let amount = amount_str(body.amount)?;
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.contribute(&body.pool_address, &body.member_id, &amount)?;

        let pool_address = outcome.pool_address.clone();
        let record = ContributionRecord {
            id: String::new(),
            pool_id: String::new(),
            pool_name: String::new(),
            member_id: body.member_id.clone(),
            member_name: body.member_name.unwrap_or_else(|| body.member_id.clone()),
            amount: body.amount,
            contributed_at: iso_now(Utc::now()),
            transaction_hash: Some(outcome.contribute_transaction_hash.clone()),
        };
        st.store.update(|m| {
            let mut record = record;
            if let Some(pool) = m.pool_by_address(&pool_address) {
                record.pool_id = pool.id.clone();
                record.pool_name = pool.name.clone();
            }
            m.add_contribution(record)
        })?;
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn place_bid(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PlaceBidReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.place_bid(&body.pool_address, &body.member_id, body.bid_percent)?;

        let pool_address = outcome.pool_address.clone();
        let amount: f64 = outcome.bid_amount.parse().unwrap_or_default();
        let record = BidRecord {
            id: String::new(),
            pool_id: String::new(),
            pool_name: String::new(),
            member_id: body.member_id.clone(),
            member_name: body.member_name.unwrap_or_else(|| body.member_id.clone()),
            amount,
            bid_at: iso_now(Utc::now()),
            status: BidState::Active,
            pool_address: Some(pool_address.clone()),
            transaction_hash: Some(outcome.transaction_hash.clone()),
            block_number: outcome.block_number,
        };
        st.store.update(|m| {
            let mut record = record;
            if let Some(pool) = m.pool_by_address(&pool_address) {
                record.pool_id = pool.id.clone();
                record.pool_name = pool.name.clone();
                let id = record.pool_id.clone();
                m.update_pool_status(&id, PoolState::Bidding, Utc::now());
            }
            m.add_bid(record)
        })?;
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn settle_pool(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PoolReq>,
) -> HttpResponse {
    let st = state.into_inner();
    let body = body.into_inner();
    let res = web::block(move || {
        let client = BlockClient::setup(&st.config, None);
        let outcome = client.settle_cycle(&body.pool_address)?;

        let pool_address = outcome.pool_address.clone();
        st.store.update(|m| {
            if let Some(pool) = m.pool_by_address(&pool_address) {
                let id = pool.id.clone();
                // the winning bid is decided on-chain, bids stay as recorded
                m.settle_pool(&id, None);
            }
        })?;
        Ok::<_, Error>(outcome)
    })
    .await;
    respond(&req, res)
}

async fn list_pools(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let st = state.into_inner();
    let res = web::block(move || {
        let mirror = st.store.load()?;
        Ok::<_, Error>(mirror.pools)
    })
    .await;
    respond(&req, res)
}

async fn pool_analytics(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let st = state.into_inner();
    let pool_id = path.into_inner();
    let res = web::block(move || {
        let mirror = st.store.load()?;
        mirror
            .analytics(&pool_id)
            .ok_or_else(|| Error::Unknown(format!("no pool with id {}", pool_id)))
    })
    .await;
    match res {
        Ok(Err(e)) => ApiResult::<()>::new()
            .code(404)
            .with_msg(e.to_string())
            .respond_to(&req),
        other => respond(&req, other),
    }
}

pub async fn run(config: Config) -> std::io::Result<()> {
    let store = Store::new(&config.redis).expect("redis client");
    let listen = config.http_listen.clone();
    let state = AppState { config, store };

    info!("listening on {}", listen);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(
                web::scope("/api")
                    .route("/create-pool", web::post().to(create_pool))
                    .route("/join-pool", web::post().to(join_pool))
                    .route("/approve-all-joins", web::post().to(approve_all_joins))
                    .route("/start-pool", web::post().to(start_pool))
                    .route("/contribute", web::post().to(contribute))
                    .route("/place-bid", web::post().to(place_bid))
                    .route("/settle-pool", web::post().to(settle_pool))
                    .route("/pools", web::get().to(list_pools))
                    .route("/pools/{id}/analytics", web::get().to(pool_analytics)),
            )
            .default_service(web::route().to(notfound))
    })
    .bind(listen)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_bodies_deserialize_from_camel_case() {
        let req: CreatePoolReq = serde_json::from_str(
            r#"{"name":"Tech Pool","contributionAmount":100,"maxMembers":5}"#,
        )
        .unwrap();
        assert_eq!(req.contribution_amount, 100.0);
        assert_eq!(req.max_members, 5);
        assert!(req.description.is_none());

        let req: PlaceBidReq = serde_json::from_str(
            r#"{"poolAddress":"0xabc","memberId":"M001","bidPercent":65}"#,
        )
        .unwrap();
        assert_eq!(req.bid_percent, 65);
        assert!(req.member_name.is_none());
    }

    #[test]
    fn amounts_print_like_the_caller_wrote_them() {
        assert_eq!(amount_str(100.0).unwrap(), "100");
        assert_eq!(amount_str(0.5).unwrap(), "0.5");
        assert_eq!(amount_str(150.25).unwrap(), "150.25");
    }

    #[test]
    fn negative_and_non_finite_amounts_are_rejected() {
        assert!(matches!(amount_str(-5.0), Err(Error::ParseAmount(_))));
        assert!(matches!(amount_str(-0.5), Err(Error::ParseAmount(_))));
        assert!(matches!(amount_str(f64::NAN), Err(Error::ParseAmount(_))));
        assert!(matches!(amount_str(f64::INFINITY), Err(Error::ParseAmount(_))));
    }
}
