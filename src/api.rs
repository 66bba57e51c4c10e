use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::types::{Trade, TradeSide};
use crate::{DATA_API_BASE, GAMMA_API_BASE};

/// Request timeout for data and gamma API calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Number of profiles requested from the search endpoint.
const PROFILE_SEARCH_LIMIT: u32 = 5;

/// Parameters of one trade feed request.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeQuery {
    /// Only fills this recent are returned.
    pub lookback_minutes: u32,
    /// Maximum number of records requested.
    pub limit: u32,
    /// Server-side minimum fill notional, in USD.
    pub min_cash: Option<Decimal>,
    /// Restrict to one proxy wallet.
    pub user: Option<String>,
}

/// Supplier of fills and the market/profile metadata needed to alert on them.
pub trait TradeSource {
    /// Fetch recent fills. Malformed records are skipped, not reported as errors.
    fn fetch_trades(&self, query: &TradeQuery) -> impl Future<Output = Result<Vec<Trade>>>;

    /// Resolution (end) date of a market, `None` when the market has none.
    fn resolution_date(&self, market_id: &str) -> impl Future<Output = Result<Option<String>>>;

    /// Best-effort profile name lookup; failures yield `None`.
    fn profile_name(&self, wallet: &str) -> impl Future<Output = Option<String>>;
}

/// Polymarket data API (fills) plus gamma API (markets, profiles).
pub struct DataApiClient {
    http: reqwest::Client,
    data_base: Url,
    gamma_base: Url,
}

impl DataApiClient {
    pub fn new() -> Result<Self> {
        Self::with_bases(DATA_API_BASE, GAMMA_API_BASE)
    }

    pub fn with_bases(data_base: &str, gamma_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("polywatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            data_base: Url::parse(data_base)
                .with_context(|| format!("invalid data API base {data_base}"))?,
            gamma_base: Url::parse(gamma_base)
                .with_context(|| format!("invalid gamma API base {gamma_base}"))?,
        })
    }

    async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .http
            .get(url.clone())
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        resp.json()
            .await
            .with_context(|| format!("invalid JSON from {url}"))
    }
}

impl TradeSource for DataApiClient {
    async fn fetch_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>> {
        let url = self.data_base.join("trades")?;
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(min_cash) = query.min_cash {
            params.push(("filterType", "CASH".to_string()));
            params.push(("filterAmount", min_cash.to_string()));
        }
        if let Some(user) = &query.user {
            params.push(("user", user.clone()));
        }

        let body = self.get_json(url, &params).await?;
        let cutoff = Utc::now() - chrono::Duration::minutes(i64::from(query.lookback_minutes));
        let trades = parse_trades(body, Some(cutoff))?;
        debug!("Fetched {} recent trades", trades.len());
        Ok(trades)
    }

    async fn resolution_date(&self, market_id: &str) -> Result<Option<String>> {
        let url = self.gamma_base.join("markets")?;
        let body = self
            .get_json(url, &[("condition_ids", market_id.to_string())])
            .await
            .with_context(|| format!("market lookup failed for {market_id}"))?;
        Ok(pick_end_date(&body))
    }

    async fn profile_name(&self, wallet: &str) -> Option<String> {
        let url = self.gamma_base.join("public-search").ok()?;
        let params = [
            ("q", wallet.to_string()),
            ("limit", PROFILE_SEARCH_LIMIT.to_string()),
        ];
        match self.get_json(url, &params).await {
            Ok(body) => pick_profile_name(&body, wallet),
            Err(e) => {
                debug!("Profile lookup failed for {wallet}: {e:#}");
                None
            }
        }
    }
}

/// Raw fill as served by `/trades`. Every field is optional so one odd record
/// cannot fail the whole response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrade {
    proxy_wallet: Option<String>,
    side: Option<String>,
    asset: Option<Value>,
    condition_id: Option<String>,
    size: Option<Value>,
    price: Option<Value>,
    timestamp: Option<Value>,
    title: Option<String>,
    outcome: Option<String>,
    name: Option<String>,
    pseudonym: Option<String>,
    transaction_hash: Option<String>,
}

impl RawTrade {
    fn into_trade(self) -> Option<Trade> {
        let wallet = non_empty(self.proxy_wallet)?.to_ascii_lowercase();
        let market_id = non_empty(self.condition_id)?;
        let side = TradeSide::parse(self.side.as_deref()?)?;
        let size = decimal_from_value(self.size.as_ref()?)?;
        let price = decimal_from_value(self.price.as_ref()?)?;
        if size <= Decimal::ZERO || price < Decimal::ZERO {
            return None;
        }
        let secs = match self.timestamp.as_ref()? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let timestamp = DateTime::from_timestamp(secs, 0)?;
        let asset = match self.asset {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        Some(Trade {
            wallet,
            market_id,
            asset,
            side,
            size,
            price,
            timestamp,
            title: self.title.unwrap_or_default(),
            outcome: self.outcome.unwrap_or_default(),
            trader_name: non_empty(self.name),
            pseudonym: non_empty(self.pseudonym),
            transaction_hash: non_empty(self.transaction_hash),
        })
    }
}

/// Parse a `/trades` response body, skipping malformed records and, when a
/// cutoff is given, fills older than it.
pub fn parse_trades(body: Value, cutoff: Option<DateTime<Utc>>) -> Result<Vec<Trade>> {
    let Value::Array(records) = body else {
        anyhow::bail!("unexpected trades response: expected a JSON array");
    };

    let total = records.len();
    let mut malformed = 0usize;
    let mut trades = Vec::with_capacity(total);

    for record in records {
        match serde_json::from_value::<RawTrade>(record)
            .ok()
            .and_then(RawTrade::into_trade)
        {
            Some(trade) => {
                if cutoff.is_none_or(|c| trade.timestamp >= c) {
                    trades.push(trade);
                }
            }
            None => malformed += 1,
        }
    }

    if malformed > 0 {
        debug!("Skipped {malformed} malformed trade record(s) out of {total}");
    }
    Ok(trades)
}

/// `endDate` of the first market in a gamma `/markets` response.
pub fn pick_end_date(body: &Value) -> Option<String> {
    body.as_array()?
        .first()?
        .get("endDate")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Name of the profile whose proxy wallet matches `wallet`, pseudonym first.
pub fn pick_profile_name(body: &Value, wallet: &str) -> Option<String> {
    let profiles = match body {
        Value::Array(list) => list.as_slice(),
        Value::Object(obj) => obj
            .get("profiles")
            .or_else(|| obj.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => return None,
    };

    profiles
        .iter()
        .find(|p| {
            p.get("proxyWallet")
                .and_then(Value::as_str)
                .is_some_and(|w| w.eq_ignore_ascii_case(wallet))
        })
        .and_then(|p| {
            ["pseudonym", "name"]
                .into_iter()
                .filter_map(|field| p.get(field).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        })
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
