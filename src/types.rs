use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a filled trade, from the trader's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// A single fill from the public trade feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Proxy wallet, lower-cased.
    pub wallet: String,
    /// Market condition id.
    pub market_id: String,
    /// Outcome token id.
    pub asset: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub outcome: String,
    /// Profile name reported alongside the fill, if any.
    pub trader_name: Option<String>,
    pub pseudonym: Option<String>,
    pub transaction_hash: Option<String>,
}

impl Trade {
    /// Signed cash flow: buys spend cash, sells receive it.
    pub fn cash_flow(&self) -> Decimal {
        let notional = self.size * self.price;
        match self.side {
            TradeSide::Buy => -notional,
            TradeSide::Sell => notional,
        }
    }
}

/// Aggregation key for a trader's activity in one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub wallet: String,
    pub market_id: String,
}

/// Windowed aggregate of one trader's fills in one market.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub key: PositionKey,
    /// Sell proceeds minus buy costs over the window.
    pub net_cash_flow: Decimal,
    pub latest_trade_timestamp: DateTime<Utc>,
    pub trade_count: u32,
    /// Metadata of the latest contributing trade.
    pub title: String,
    pub outcome: String,
    pub trader_name: Option<String>,
    pub pseudonym: Option<String>,
}

impl Position {
    pub fn abs_pnl(&self) -> Decimal {
        self.net_cash_flow.abs()
    }
}

/// Stable identity of an alerted position: `wallet:market:resolution_date`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Resolution-date component used when the market reports none.
    pub const OPEN_MARKET: &'static str = "open";

    pub fn new(wallet: &str, market_id: &str, resolution_date: Option<&str>) -> Self {
        let date = resolution_date
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(Self::OPEN_MARKET);
        Self(format!(
            "{}:{}:{}",
            wallet.trim().to_ascii_lowercase(),
            market_id.trim(),
            date
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A qualifying position enriched with market metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub position: Position,
    pub resolution_date: Option<String>,
    pub abs_pnl: Decimal,
    pub key: DedupKey,
}

impl AlertCandidate {
    pub fn new(position: Position, resolution_date: Option<String>) -> Self {
        let key = DedupKey::new(
            &position.key.wallet,
            &position.key.market_id,
            resolution_date.as_deref(),
        );
        Self {
            abs_pnl: position.abs_pnl(),
            position,
            resolution_date,
            key,
        }
    }

    pub fn wallet(&self) -> &str {
        &self.position.key.wallet
    }

    pub fn market_id(&self) -> &str {
        &self.position.key.market_id
    }

    pub fn pnl(&self) -> Decimal {
        self.position.net_cash_flow
    }
}

/// Compact view of the ranked candidate for run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub key: DedupKey,
    pub wallet: String,
    pub market_id: String,
    pub title: String,
    pub outcome: String,
    pub pnl: Decimal,
    pub trade_count: u32,
    pub latest_trade: String,
}

impl From<&AlertCandidate> for CandidateSummary {
    fn from(c: &AlertCandidate) -> Self {
        Self {
            key: c.key.clone(),
            wallet: c.wallet().to_string(),
            market_id: c.market_id().to_string(),
            title: c.position.title.clone(),
            outcome: c.position.outcome.clone(),
            pnl: c.pnl(),
            trade_count: c.position.trade_count,
            latest_trade: c.position.latest_trade_timestamp.to_rfc3339(),
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Watchlist mode without any configured wallets.
    NothingToDo,
    /// No position met the threshold.
    NoCandidates,
    /// The top candidate was alerted in an earlier run.
    Duplicate { key: DedupKey },
    /// The daily alert cap is exhausted.
    RateLimited { key: DedupKey, sent_in_window: usize },
    /// Dry run: message rendered, nothing delivered or persisted.
    DryRun { key: DedupKey, message: String },
    Posted {
        key: DedupKey,
        post_id: Option<String>,
        message: String,
    },
    /// Delivery failed; the candidate stays eligible for the next run.
    NotifyFailed { key: DedupKey, error: String },
}

/// Machine-readable summary of one run, emitted on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub dry_run: bool,
    pub trades_fetched: usize,
    pub positions: usize,
    pub qualifying: usize,
    pub top: Option<CandidateSummary>,
    pub outcome: RunOutcome,
}
