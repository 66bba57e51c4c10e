//! One alerting pass: fetch, aggregate, filter, rank, guard, render, deliver.
//!
//! Each stage either hands its value to the next one or stops the run with a
//! [`RunOutcome`]. Persistent state is touched only after a confirmed delivery.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::{TradeQuery, TradeSource};
use crate::engine::{aggregate_positions, dedup_trades, filter_by_threshold, rank, window_start};
use crate::format::{
    AlertText, MessageOptions, fallback_headline, format_alert, resolve_display_label,
};
use crate::headline::{HeadlineRequest, HeadlineWriter};
use crate::notifier::Notifier;
use crate::state::{PostedCache, RateLimiter, RateWindow};
use crate::types::{AlertCandidate, CandidateSummary, RunOutcome, RunReport, Trade};

/// Which part of the trade feed a run scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    /// The platform-wide feed.
    Global,
    /// Only the listed proxy wallets, one request each.
    Watchlist(Vec<String>),
}

/// Everything a run needs besides its collaborators and stores.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub window_minutes: u32,
    pub min_pnl: Decimal,
    pub min_trade_cash: Option<Decimal>,
    pub trade_limit: u32,
    pub dry_run: bool,
    pub scope: FeedScope,
    pub message: MessageOptions,
}

/// Result of one pipeline stage.
#[derive(Debug)]
pub enum Step<T> {
    Continue(T),
    Stop(RunOutcome),
}

/// Unwrap a [`Step`], ending the run on `Stop`.
macro_rules! proceed {
    ($report:ident, $step:expr) => {
        match $step {
            Step::Continue(value) => value,
            Step::Stop(outcome) => {
                $report.outcome = outcome;
                return Ok($report);
            }
        }
    };
}

/// Dedup cache and rate limiter, loaded once per run.
pub struct Stores {
    pub cache: PostedCache,
    pub limiter: RateLimiter,
}

impl Stores {
    pub fn load(
        posted_path: &Path,
        rate_state_path: &Path,
        max_per_day: u32,
        window: RateWindow,
    ) -> Self {
        Self {
            cache: PostedCache::load(posted_path),
            limiter: RateLimiter::load(rate_state_path, max_per_day, window),
        }
    }
}

pub struct Pipeline<'a, S, H, N> {
    pub source: &'a S,
    pub headlines: &'a H,
    pub notifier: &'a N,
    pub settings: &'a RunSettings,
}

impl<S, H, N> Pipeline<'_, S, H, N>
where
    S: TradeSource,
    H: HeadlineWriter,
    N: Notifier,
{
    /// Run one pass at `now`.
    ///
    /// Errors are returned only for source failures, before any state is
    /// written. Every other ending is reported through the outcome.
    pub async fn run(&self, stores: &mut Stores, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport {
            timestamp: now.to_rfc3339(),
            dry_run: self.settings.dry_run,
            trades_fetched: 0,
            positions: 0,
            qualifying: 0,
            top: None,
            outcome: RunOutcome::NoCandidates,
        };

        let trades = proceed!(report, self.fetch().await?);
        report.trades_fetched = trades.len();

        let step = self.qualify(trades, now, &mut report).await?;
        let candidates = proceed!(report, step);
        let Some(top) = rank(candidates) else {
            report.outcome = RunOutcome::NoCandidates;
            return Ok(report);
        };
        report.top = Some(CandidateSummary::from(&top));
        info!(
            wallet = %top.wallet(),
            market = %top.market_id(),
            "Top candidate {} with PnL {}",
            top.key,
            top.pnl()
        );

        proceed!(report, guard(&top, stores, now));
        let message = self.compose(&top).await;
        report.outcome = self.deliver(top, message, stores, now).await;
        Ok(report)
    }

    async fn fetch(&self) -> Result<Step<Vec<Trade>>> {
        let base = TradeQuery {
            lookback_minutes: self.settings.window_minutes,
            limit: self.settings.trade_limit,
            min_cash: self.settings.min_trade_cash,
            user: None,
        };

        match &self.settings.scope {
            FeedScope::Global => {
                let trades = self
                    .source
                    .fetch_trades(&base)
                    .await
                    .context("trade fetch failed")?;
                info!("Fetched {} trades from the global feed", trades.len());
                Ok(Step::Continue(trades))
            }
            FeedScope::Watchlist(wallets) if wallets.is_empty() => {
                warn!("Watchlist mode enabled but no wallets are configured");
                Ok(Step::Stop(RunOutcome::NothingToDo))
            }
            FeedScope::Watchlist(wallets) => {
                let mut trades = Vec::new();
                for wallet in wallets {
                    let query = TradeQuery {
                        user: Some(wallet.clone()),
                        ..base.clone()
                    };
                    let batch = self
                        .source
                        .fetch_trades(&query)
                        .await
                        .with_context(|| format!("trade fetch failed for wallet {wallet}"))?;
                    debug!(wallet = %wallet, "Fetched {} trades", batch.len());
                    trades.extend(batch);
                }
                info!(
                    "Fetched {} trades for {} watched wallet(s)",
                    trades.len(),
                    wallets.len()
                );
                Ok(Step::Continue(trades))
            }
        }
    }

    /// Aggregate, filter and attach resolution dates.
    async fn qualify(
        &self,
        trades: Vec<Trade>,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<Step<Vec<AlertCandidate>>> {
        let trades = dedup_trades(trades);
        let start = window_start(now, self.settings.window_minutes);
        let positions = aggregate_positions(&trades, start);
        report.positions = positions.len();

        let qualifying = filter_by_threshold(positions, self.settings.min_pnl);
        report.qualifying = qualifying.len();
        info!(
            "{} position(s) in window, {} at or above {}",
            report.positions, report.qualifying, self.settings.min_pnl
        );
        if qualifying.is_empty() {
            return Ok(Step::Stop(RunOutcome::NoCandidates));
        }

        let mut end_dates: HashMap<String, Option<String>> = HashMap::new();
        let mut candidates = Vec::with_capacity(qualifying.len());
        for position in qualifying {
            let market = position.key.market_id.clone();
            let date = match end_dates.get(&market) {
                Some(date) => date.clone(),
                None => {
                    let date = self.source.resolution_date(&market).await.map_err(|e| {
                        error!(
                            wallet = %position.key.wallet,
                            market = %market,
                            stage = "resolution_date",
                            "Market lookup failed: {e:#}"
                        );
                        e
                    })?;
                    end_dates.insert(market, date.clone());
                    date
                }
            };
            candidates.push(AlertCandidate::new(position, date));
        }
        Ok(Step::Continue(candidates))
    }

    async fn compose(&self, top: &AlertCandidate) -> String {
        let position = &top.position;
        let profile_name = match &position.trader_name {
            Some(name) => Some(name.clone()),
            None => self.source.profile_name(top.wallet()).await,
        };
        let label = resolve_display_label(
            profile_name.as_deref(),
            position.pseudonym.as_deref(),
            top.wallet(),
        );

        let request = HeadlineRequest {
            label: &label,
            pnl: top.pnl(),
            title: &position.title,
            outcome: &position.outcome,
        };
        let headline = match self.headlines.headline(&request).await {
            Ok(Some(text)) => text,
            Ok(None) => fallback_headline(&label, top.pnl(), &position.title),
            Err(e) => {
                warn!(
                    wallet = %top.wallet(),
                    market = %top.market_id(),
                    stage = "headline",
                    "Headline generation failed, using template: {e:#}"
                );
                fallback_headline(&label, top.pnl(), &position.title)
            }
        };

        format_alert(
            &AlertText {
                headline: &headline,
                pnl: top.pnl(),
                title: &position.title,
                outcome: &position.outcome,
                wallet: top.wallet(),
            },
            &self.settings.message,
        )
    }

    async fn deliver(
        &self,
        top: AlertCandidate,
        message: String,
        stores: &mut Stores,
        now: DateTime<Utc>,
    ) -> RunOutcome {
        if self.settings.dry_run {
            info!("Dry run, not posting:\n{message}");
            return RunOutcome::DryRun {
                key: top.key,
                message,
            };
        }

        let delivery = match self.notifier.notify(&message).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    wallet = %top.wallet(),
                    market = %top.market_id(),
                    stage = "notify",
                    "Delivery failed, will retry next run: {e:#}"
                );
                return RunOutcome::NotifyFailed {
                    key: top.key,
                    error: format!("{e:#}"),
                };
            }
        };

        if let Err(e) = stores
            .cache
            .add(top.key.clone(), delivery.post_id.clone(), now)
        {
            error!(
                wallet = %top.wallet(),
                market = %top.market_id(),
                stage = "cache_save",
                "Alert posted but dedup cache not saved: {e:#}"
            );
        }
        if let Err(e) = stores.limiter.record_send(now) {
            error!(stage = "rate_save", "Alert posted but rate state not saved: {e:#}");
        }

        RunOutcome::Posted {
            key: top.key,
            post_id: delivery.post_id,
            message,
        }
    }
}

/// Dedup and rate checks, in that order.
fn guard(top: &AlertCandidate, stores: &Stores, now: DateTime<Utc>) -> Step<()> {
    if stores.cache.has(&top.key) {
        info!(wallet = %top.wallet(), market = %top.market_id(), "Already alerted {}", top.key);
        return Step::Stop(RunOutcome::Duplicate {
            key: top.key.clone(),
        });
    }
    if !stores.limiter.can_send(now) {
        let sent = stores.limiter.sent_in_window(now);
        info!(
            "Rate limit reached ({sent}/{} in {} window)",
            stores.limiter.max_per_day(),
            stores.limiter.window()
        );
        return Step::Stop(RunOutcome::RateLimited {
            key: top.key.clone(),
            sent_in_window: sent,
        });
    }
    Step::Continue(())
}
