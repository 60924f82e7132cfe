//! Sub-account futures history: query types, their canonical fingerprints,
//! and the [`HistoryService`] facade the dashboard talks to.
//!
//! ## Normalization
//!
//! Queries are normalized before both key building and serialization, so
//! that omitting a field and passing its default are indistinguishable.
//! This is intentional, to maximize coalescing:
//!
//! | field          | normalization                         |
//! |----------------|---------------------------------------|
//! | `emails`       | sorted lexicographically              |
//! | `symbol`       | absent means "all symbols"            |
//! | `contractType` | defaults to `UM`                      |
//! | `limit`        | defaults to 50 (orders) / 500 (trades)|
//! | `startTime`    | optional, part of the key when set    |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::caching::{
    CacheContents, CacheKey, CacheKeyBuilder, CacheStatus, Cacher, Caches, FetchOptions,
    FetchRequest,
};
use crate::config::Config;
use crate::fetch::{ApiClient, CredentialProvider};

/// Contract type assumed when a query does not specify one.
pub const DEFAULT_CONTRACT_TYPE: ContractType = ContractType::Um;
/// Row limit assumed for order queries.
pub const DEFAULT_ORDER_LIMIT: u32 = 50;
/// Row limit assumed for trade queries.
pub const DEFAULT_TRADE_LIMIT: u32 = 500;

const ORDERS_ENDPOINT: &str = "api/subaccounts/futures-orders";
const TRADES_ENDPOINT: &str = "api/subaccounts/futures-trades";

/// The futures wallet a sub-account operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    /// USDⓈ-margined futures.
    #[serde(rename = "UM")]
    Um,
    /// Coin-margined futures.
    #[serde(rename = "CM")]
    Cm,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Um => "UM",
            Self::Cm => "CM",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query for the sub-account futures order history endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryQuery {
    /// Sub-account emails to include; order is irrelevant.
    pub emails: Vec<String>,
    /// Trading pair; absent means all symbols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub contract_type: Option<ContractType>,
    pub limit: Option<u32>,
}

impl OrderHistoryQuery {
    /// Applies the normalization table: emails sorted, defaults filled in.
    ///
    /// The normalized form is what goes on the wire, so the request that is
    /// sent always matches the key it was cached under.
    pub fn normalized(&self) -> Self {
        let mut emails = self.emails.clone();
        emails.sort_unstable();
        OrderHistoryQuery {
            emails,
            symbol: self.symbol.clone(),
            contract_type: Some(self.contract_type.unwrap_or(DEFAULT_CONTRACT_TYPE)),
            limit: Some(self.limit.unwrap_or(DEFAULT_ORDER_LIMIT)),
        }
    }

    /// The canonical fingerprint of this query.
    pub fn cache_key(&self) -> CacheKey {
        let query = self.normalized();
        let mut key = CacheKeyBuilder::new();
        key.write_param("emails", query.emails.join(",")).unwrap();
        key.write_param("symbol", query.symbol.as_deref().unwrap_or_default())
            .unwrap();
        key.write_param("contract", query.contract_type.unwrap_or(DEFAULT_CONTRACT_TYPE))
            .unwrap();
        key.write_param("limit", query.limit.unwrap_or(DEFAULT_ORDER_LIMIT))
            .unwrap();
        key.build()
    }
}

/// Query for the sub-account futures trade history endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeHistoryQuery {
    /// Sub-account emails to include; order is irrelevant.
    pub emails: Vec<String>,
    /// Trading pair; absent means all symbols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub contract_type: Option<ContractType>,
    /// Only trades at or after this time.
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl TradeHistoryQuery {
    /// Applies the normalization table: emails sorted, defaults filled in.
    pub fn normalized(&self) -> Self {
        let mut emails = self.emails.clone();
        emails.sort_unstable();
        TradeHistoryQuery {
            emails,
            symbol: self.symbol.clone(),
            contract_type: Some(self.contract_type.unwrap_or(DEFAULT_CONTRACT_TYPE)),
            start_time: self.start_time,
            limit: Some(self.limit.unwrap_or(DEFAULT_TRADE_LIMIT)),
        }
    }

    /// The canonical fingerprint of this query.
    pub fn cache_key(&self) -> CacheKey {
        let query = self.normalized();
        let mut key = CacheKeyBuilder::new();
        key.write_param("emails", query.emails.join(",")).unwrap();
        key.write_param("symbol", query.symbol.as_deref().unwrap_or_default())
            .unwrap();
        key.write_param("contract", query.contract_type.unwrap_or(DEFAULT_CONTRACT_TYPE))
            .unwrap();
        let start = query
            .start_time
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();
        key.write_param("start", start).unwrap();
        key.write_param("limit", query.limit.unwrap_or(DEFAULT_TRADE_LIMIT))
            .unwrap();
        key.build()
    }
}

/// One order as the upstream reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default = "default_position_side")]
    pub position_side: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub update_time: DateTime<Utc>,
}

/// One executed trade, including the fee the dashboard aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: u64,
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub qty: String,
    #[serde(default)]
    pub quote_qty: Option<String>,
    pub commission: String,
    pub commission_asset: String,
    #[serde(default)]
    pub realized_pnl: Option<String>,
    #[serde(default)]
    pub position_side: Option<String>,
    #[serde(default)]
    pub buyer: bool,
    #[serde(default)]
    pub maker: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

fn default_position_side() -> String {
    "BOTH".into()
}

/// The per-sub-account slice of an orders response.
///
/// The upstream queries every account separately and reports per-account
/// failures in-band, so a successful response can still contain accounts
/// that produced no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOrders {
    pub email: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
}

/// The per-sub-account slice of a trades response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTrades {
    pub email: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

/// Payload cached per order-history key. `Arc`ed so every waiter on a
/// coalesced fetch shares one allocation.
pub type OrderHistory = Arc<Vec<AccountOrders>>;
/// Payload cached per trade-history key.
pub type TradeHistory = Arc<Vec<AccountTrades>>;

/// One upstream call for the orders endpoint; cheap to clone.
#[derive(Debug, Clone)]
struct OrdersRequest {
    client: Arc<ApiClient>,
    query: OrderHistoryQuery,
}

impl FetchRequest for OrdersRequest {
    type Item = OrderHistory;

    fn cache_key(&self) -> CacheKey {
        self.query.cache_key()
    }

    fn fetch(self) -> BoxFuture<'static, CacheContents<OrderHistory>> {
        async move {
            let body = self.query.normalized();
            let accounts: Vec<AccountOrders> =
                self.client.post_json(ORDERS_ENDPOINT, &body).await?;
            Ok(Arc::new(accounts))
        }
        .boxed()
    }
}

/// One upstream call for the trades endpoint; cheap to clone.
#[derive(Debug, Clone)]
struct TradesRequest {
    client: Arc<ApiClient>,
    query: TradeHistoryQuery,
}

impl FetchRequest for TradesRequest {
    type Item = TradeHistory;

    fn cache_key(&self) -> CacheKey {
        self.query.cache_key()
    }

    fn fetch(self) -> BoxFuture<'static, CacheContents<TradeHistory>> {
        async move {
            let body = self.query.normalized();
            let accounts: Vec<AccountTrades> =
                self.client.post_json(TRADES_ENDPOINT, &body).await?;
            Ok(Arc::new(accounts))
        }
        .boxed()
    }
}

/// Snapshot of both history caches, for observability endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryCacheStatus {
    pub orders: CacheStatus,
    pub trades: CacheStatus,
}

/// Front door for the dashboard's history data.
///
/// Owns one coalescing cache per endpoint. Construct one instance with a
/// defined lifetime and inject it into callers (one per test, one per
/// process); there is intentionally no module-level singleton state.
#[derive(Debug)]
pub struct HistoryService {
    client: Arc<ApiClient>,
    orders: Cacher<OrdersRequest>,
    trades: Cacher<TradesRequest>,
}

impl HistoryService {
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        let caches = Caches::from_config(config);
        HistoryService {
            client: Arc::new(ApiClient::new(config, credentials)),
            orders: Cacher::new(caches.orders),
            trades: Cacher::new(caches.trades),
        }
    }

    /// Fetches order history, coalescing concurrent equivalent queries.
    pub async fn get_orders(
        &self,
        query: OrderHistoryQuery,
        options: FetchOptions,
    ) -> CacheContents<OrderHistory> {
        let request = OrdersRequest {
            client: Arc::clone(&self.client),
            query,
        };
        self.orders.fetch_cached(request, options).await
    }

    /// Fetches trade history, coalescing concurrent equivalent queries.
    pub async fn get_trades(
        &self,
        query: TradeHistoryQuery,
        options: FetchOptions,
    ) -> CacheContents<TradeHistory> {
        let request = TradesRequest {
            client: Arc::clone(&self.client),
            query,
        };
        self.trades.fetch_cached(request, options).await
    }

    /// Drops every cached entry and resets the diagnostic counters.
    pub fn clear_caches(&self) {
        self.orders.clear();
        self.trades.clear();
    }

    /// Read-only snapshot of both caches. No side effects.
    pub fn cache_status(&self) -> HistoryCacheStatus {
        HistoryCacheStatus {
            orders: self.orders.status(),
            trades: self.trades.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tradecache_test::ApiServer;

    use crate::fetch::Credentials;

    use super::*;

    #[derive(Debug)]
    struct StaticCredentials(Option<&'static str>);

    impl CredentialProvider for StaticCredentials {
        fn credentials(&self) -> Option<Credentials> {
            self.0.map(|token| Credentials {
                token: token.into(),
            })
        }
    }

    fn test_service(server: &ApiServer) -> HistoryService {
        let config = Config {
            api_url: server.url().parse().unwrap(),
            ..Default::default()
        };
        HistoryService::new(&config, Arc::new(StaticCredentials(Some("secret"))))
    }

    fn order_query(emails: &[&str]) -> OrderHistoryQuery {
        OrderHistoryQuery {
            emails: emails.iter().map(|e| e.to_string()).collect(),
            symbol: Some("BTCUSDT".into()),
            ..Default::default()
        }
    }

    fn orders_payload() -> serde_json::Value {
        json!([{
            "email": "a@x",
            "success": true,
            "orders": [{
                "orderId": 1,
                "symbol": "BTCUSDT",
                "status": "FILLED",
                "type": "LIMIT",
                "side": "BUY",
                "price": "50000.0",
                "origQty": "0.5",
                "executedQty": "0.5",
                "reduceOnly": false,
                "positionSide": "BOTH",
                "time": 1700000000000u64,
                "updateTime": 1700000000000u64,
            }],
        }])
    }

    fn trades_payload() -> serde_json::Value {
        json!([{
            "email": "a@x",
            "success": true,
            "trades": [{
                "id": 77,
                "symbol": "BTCUSDT",
                "side": "SELL",
                "price": "50100.0",
                "qty": "0.25",
                "quoteQty": "12525.0",
                "commission": "0.0025",
                "commissionAsset": "USDT",
                "realizedPnl": "12.5",
                "positionSide": "BOTH",
                "buyer": false,
                "maker": true,
                "time": 1700000000000u64,
            }],
        }])
    }

    #[test]
    fn test_order_key_ignores_email_order() {
        let forward = order_query(&["a@x", "b@x"]);
        let reversed = order_query(&["b@x", "a@x"]);
        assert_eq!(forward.cache_key(), reversed.cache_key());
    }

    #[test]
    fn test_order_key_defaults_match_explicit_values() {
        let implicit = order_query(&["a@x"]);
        let explicit = OrderHistoryQuery {
            contract_type: Some(ContractType::Um),
            limit: Some(DEFAULT_ORDER_LIMIT),
            ..order_query(&["a@x"])
        };
        assert_eq!(implicit.cache_key(), explicit.cache_key());
    }

    #[test]
    fn test_order_key_distinguishes_parameters() {
        let base = order_query(&["a@x"]);

        let other_limit = OrderHistoryQuery {
            limit: Some(100),
            ..base.clone()
        };
        assert_ne!(base.cache_key(), other_limit.cache_key());

        let other_contract = OrderHistoryQuery {
            contract_type: Some(ContractType::Cm),
            ..base.clone()
        };
        assert_ne!(base.cache_key(), other_contract.cache_key());

        let other_symbol = OrderHistoryQuery {
            symbol: Some("ETHUSDT".into()),
            ..base.clone()
        };
        assert_ne!(base.cache_key(), other_symbol.cache_key());
    }

    #[test]
    fn test_trade_key_includes_start_time() {
        let base = TradeHistoryQuery {
            emails: vec!["a@x".into()],
            symbol: Some("BTCUSDT".into()),
            ..Default::default()
        };
        let bounded = TradeHistoryQuery {
            start_time: DateTime::from_timestamp_millis(1_700_000_000_000),
            ..base.clone()
        };
        assert_ne!(base.cache_key(), bounded.cache_key());
        // trades and orders never share keys even for equal parameters
        assert_ne!(base.cache_key(), order_query(&["a@x"]).cache_key());
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_one_request() {
        tradecache_test::setup();
        let server = ApiServer::with_data(orders_payload());
        let service = test_service(&server);

        let first = service
            .get_orders(order_query(&["b@x", "a@x"]), Default::default())
            .await
            .unwrap();
        let second = service
            .get_orders(order_query(&["a@x", "b@x"]), Default::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].orders[0].order_id, 1);
        assert_eq!(server.requests(), 1);

        let status = service.cache_status();
        assert_eq!(status.orders.entry_count, 1);
        assert_eq!(status.orders.request_count, 1);
        assert_eq!(status.orders.hit_count, 1);
    }

    #[tokio::test]
    async fn test_force_refresh_goes_upstream() {
        tradecache_test::setup();
        let server = ApiServer::with_data(orders_payload());
        let service = test_service(&server);

        service
            .get_orders(order_query(&["a@x"]), Default::default())
            .await
            .unwrap();
        service
            .get_orders(order_query(&["a@x"]), FetchOptions::force_refresh())
            .await
            .unwrap();

        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_trades_roundtrip() {
        tradecache_test::setup();
        let server = ApiServer::with_data(trades_payload());
        let service = test_service(&server);

        let query = TradeHistoryQuery {
            emails: vec!["a@x".into()],
            symbol: Some("BTCUSDT".into()),
            ..Default::default()
        };
        let trades = service.get_trades(query, Default::default()).await.unwrap();

        let trade = &trades[0].trades[0];
        assert_eq!(trade.id, 77);
        assert_eq!(trade.commission, "0.0025");
        assert_eq!(trade.commission_asset, "USDT");
        assert_eq!(trade.realized_pnl.as_deref(), Some("12.5"));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_without_network() {
        tradecache_test::setup();
        let server = ApiServer::with_data(orders_payload());
        let config = Config {
            api_url: server.url().parse().unwrap(),
            ..Default::default()
        };
        let service = HistoryService::new(&config, Arc::new(StaticCredentials(None)));

        let result = service
            .get_orders(order_query(&["a@x"]), Default::default())
            .await;

        assert_eq!(result, Err(crate::caching::CacheError::NotAuthenticated));
        assert_eq!(server.requests(), 0);
    }

    #[tokio::test]
    async fn test_logical_failure_surfaces_and_is_not_cached() {
        tradecache_test::setup();
        let server = ApiServer::failing("rate limited");
        let service = test_service(&server);

        let first = service
            .get_orders(order_query(&["a@x"]), Default::default())
            .await;
        assert_eq!(
            first,
            Err(crate::caching::CacheError::Logical("rate limited".into()))
        );

        // the failure was not cached; the next call goes upstream again
        let second = service
            .get_orders(order_query(&["a@x"]), Default::default())
            .await;
        assert!(second.is_err());
        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_clear_caches_resets_status() {
        tradecache_test::setup();
        let server = ApiServer::with_data(orders_payload());
        let service = test_service(&server);

        service
            .get_orders(order_query(&["a@x"]), Default::default())
            .await
            .unwrap();
        assert_eq!(service.cache_status().orders.entry_count, 1);

        service.clear_caches();

        let status = service.cache_status();
        assert_eq!(status.orders.entry_count, 0);
        assert_eq!(status.orders.request_count, 0);
        assert_eq!(status.orders.hit_count, 0);
        assert_eq!(status.trades.entry_count, 0);
    }
}
