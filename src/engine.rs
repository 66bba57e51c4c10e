use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{AlertCandidate, Position, PositionKey, Trade, TradeSide};

/// Start of the aggregation window ending at `now`.
pub fn window_start(now: DateTime<Utc>, window_minutes: u32) -> DateTime<Utc> {
    now - Duration::minutes(i64::from(window_minutes))
}

/// Drop fills the feed returned more than once.
///
/// Only fills carrying a transaction hash are collapsed; two hashless fills
/// with identical fields may be distinct executions.
pub fn dedup_trades(trades: Vec<Trade>) -> Vec<Trade> {
    let mut seen: HashSet<(String, String, String, TradeSide, Decimal, Decimal, i64)> =
        HashSet::new();
    let before = trades.len();

    let unique: Vec<Trade> = trades
        .into_iter()
        .filter(|t| match &t.transaction_hash {
            Some(hash) => seen.insert((
                hash.clone(),
                t.wallet.clone(),
                t.asset.clone(),
                t.side,
                t.size,
                t.price,
                t.timestamp.timestamp(),
            )),
            None => true,
        })
        .collect();

    if unique.len() < before {
        debug!("Dropped {} duplicate fill(s)", before - unique.len());
    }
    unique
}

/// Group in-window fills by (wallet, market) and sum their cash flow.
///
/// Fills strictly before `window_start` are ignored entirely. Net cash flow is
/// treated as realized PnL, which only holds when the window covers both legs
/// of a position; no cost basis is carried in from outside the window.
pub fn aggregate_positions(
    trades: &[Trade],
    window_start: DateTime<Utc>,
) -> HashMap<PositionKey, Position> {
    let mut positions: HashMap<PositionKey, Position> = HashMap::new();

    for trade in trades.iter().filter(|t| t.timestamp >= window_start) {
        let key = PositionKey {
            wallet: trade.wallet.clone(),
            market_id: trade.market_id.clone(),
        };
        let pos = positions.entry(key.clone()).or_insert_with(|| Position {
            key,
            net_cash_flow: Decimal::ZERO,
            latest_trade_timestamp: trade.timestamp,
            trade_count: 0,
            title: String::new(),
            outcome: String::new(),
            trader_name: None,
            pseudonym: None,
        });

        pos.net_cash_flow += trade.cash_flow();
        pos.trade_count += 1;

        if trade.timestamp >= pos.latest_trade_timestamp {
            pos.latest_trade_timestamp = trade.timestamp;
        }
        if trade.timestamp >= pos.latest_trade_timestamp || pos.title.is_empty() {
            if !trade.title.is_empty() {
                pos.title = trade.title.clone();
            }
            if !trade.outcome.is_empty() {
                pos.outcome = trade.outcome.clone();
            }
            if trade.trader_name.is_some() {
                pos.trader_name = trade.trader_name.clone();
            }
            if trade.pseudonym.is_some() {
                pos.pseudonym = trade.pseudonym.clone();
            }
        }
    }

    positions
}

/// Keep positions whose absolute PnL reaches `min_pnl` (inclusive).
///
/// Flat positions never qualify, even with a zero threshold. Output is sorted
/// by key so downstream stages see a stable order.
pub fn filter_by_threshold(
    positions: HashMap<PositionKey, Position>,
    min_pnl: Decimal,
) -> Vec<Position> {
    let mut kept: Vec<Position> = positions
        .into_values()
        .filter(|p| p.trade_count > 0 && !p.net_cash_flow.is_zero())
        .filter(|p| p.abs_pnl() >= min_pnl)
        .collect();
    kept.sort_by(|a, b| a.key.cmp(&b.key));
    kept
}

/// Pick the candidate with the largest absolute PnL.
///
/// Exact ties go to the lexicographically smallest dedup key.
pub fn rank(candidates: Vec<AlertCandidate>) -> Option<AlertCandidate> {
    candidates.into_iter().max_by(|a, b| {
        a.abs_pnl
            .cmp(&b.abs_pnl)
            .then_with(|| b.key.cmp(&a.key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_trade(
        wallet: &str,
        market: &str,
        side: TradeSide,
        size: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Trade {
        Trade {
            wallet: wallet.to_string(),
            market_id: market.to_string(),
            asset: format!("{market}-yes"),
            side,
            size,
            price,
            timestamp: at,
            title: format!("Market {market}"),
            outcome: "Yes".to_string(),
            trader_name: None,
            pseudonym: None,
            transaction_hash: None,
        }
    }

    fn scenario_trades() -> Vec<Trade> {
        vec![
            make_trade("w1", "m1", TradeSide::Buy, dec!(10), dec!(5), t0()),
            make_trade(
                "w1",
                "m1",
                TradeSide::Sell,
                dec!(10),
                dec!(7),
                t0() + Duration::minutes(1),
            ),
        ]
    }

    fn key(wallet: &str, market: &str) -> PositionKey {
        PositionKey {
            wallet: wallet.to_string(),
            market_id: market.to_string(),
        }
    }

    fn candidate(wallet: &str, market: &str, pnl: Decimal) -> AlertCandidate {
        AlertCandidate::new(
            Position {
                key: key(wallet, market),
                net_cash_flow: pnl,
                latest_trade_timestamp: t0(),
                trade_count: 1,
                title: String::new(),
                outcome: String::new(),
                trader_name: None,
                pseudonym: None,
            },
            None,
        )
    }

    // ── aggregate_positions ────────────────────────────────────────

    #[test]
    fn full_window_nets_both_legs() {
        let now = t0() + Duration::minutes(2);
        let positions = aggregate_positions(&scenario_trades(), window_start(now, 90));
        let pos = &positions[&key("w1", "m1")];
        assert_eq!(pos.net_cash_flow, dec!(20));
        assert_eq!(pos.trade_count, 2);
        assert_eq!(pos.latest_trade_timestamp, t0() + Duration::minutes(1));
    }

    #[test]
    fn short_window_drops_early_leg() {
        let now = t0() + Duration::minutes(2);
        let positions = aggregate_positions(&scenario_trades(), window_start(now, 1));
        let pos = &positions[&key("w1", "m1")];
        assert_eq!(pos.net_cash_flow, dec!(70));
        assert_eq!(pos.trade_count, 1);
    }

    #[test]
    fn out_of_window_trade_does_not_touch_latest_timestamp() {
        let start = t0();
        let trades = vec![
            make_trade("w1", "m1", TradeSide::Sell, dec!(1), dec!(1), t0() + Duration::minutes(5)),
            make_trade("w1", "m1", TradeSide::Sell, dec!(100), dec!(1), t0() - Duration::seconds(1)),
        ];
        let positions = aggregate_positions(&trades, start);
        let pos = &positions[&key("w1", "m1")];
        assert_eq!(pos.net_cash_flow, dec!(1));
        assert_eq!(pos.latest_trade_timestamp, t0() + Duration::minutes(5));
    }

    #[test]
    fn trade_exactly_at_window_start_counts() {
        let trades = vec![make_trade("w1", "m1", TradeSide::Sell, dec!(2), dec!(3), t0())];
        let positions = aggregate_positions(&trades, t0());
        assert_eq!(positions[&key("w1", "m1")].net_cash_flow, dec!(6));
    }

    #[test]
    fn all_trades_outside_window_yield_nothing() {
        let trades = scenario_trades();
        let positions = aggregate_positions(&trades, t0() + Duration::hours(1));
        assert!(positions.is_empty());
    }

    #[test]
    fn single_trade_is_aggregated() {
        let trades = vec![make_trade("w2", "m9", TradeSide::Buy, dec!(4), dec!(0.25), t0())];
        let positions = aggregate_positions(&trades, t0() - Duration::minutes(1));
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[&key("w2", "m9")].net_cash_flow, dec!(-1));
    }

    #[test]
    fn separate_keys_per_wallet_and_market() {
        let trades = vec![
            make_trade("w1", "m1", TradeSide::Sell, dec!(1), dec!(1), t0()),
            make_trade("w1", "m2", TradeSide::Sell, dec!(1), dec!(1), t0()),
            make_trade("w2", "m1", TradeSide::Sell, dec!(1), dec!(1), t0()),
        ];
        let positions = aggregate_positions(&trades, t0());
        assert_eq!(positions.len(), 3);
    }

    #[test]
    fn metadata_follows_latest_trade() {
        let mut early = make_trade("w1", "m1", TradeSide::Buy, dec!(1), dec!(1), t0());
        early.outcome = "No".to_string();
        let mut late = make_trade("w1", "m1", TradeSide::Sell, dec!(1), dec!(2), t0() + Duration::minutes(3));
        late.outcome = "Yes".to_string();
        late.pseudonym = Some("Lucky-Otter".to_string());
        let positions = aggregate_positions(&[late, early], t0());
        let pos = &positions[&key("w1", "m1")];
        assert_eq!(pos.outcome, "Yes");
        assert_eq!(pos.pseudonym.as_deref(), Some("Lucky-Otter"));
    }

    // ── dedup_trades ───────────────────────────────────────────────

    #[test]
    fn dedup_collapses_repeated_fill() {
        let mut fill = make_trade("w1", "m1", TradeSide::Sell, dec!(5), dec!(0.5), t0());
        fill.transaction_hash = Some("0xhash".to_string());
        let trades = dedup_trades(vec![fill.clone(), fill]);
        assert_eq!(trades.len(), 1);
    }

    #[test]
    fn dedup_keeps_distinct_fills_in_same_tx() {
        let mut a = make_trade("w1", "m1", TradeSide::Sell, dec!(5), dec!(0.5), t0());
        a.transaction_hash = Some("0xhash".to_string());
        let mut b = a.clone();
        b.size = dec!(6);
        assert_eq!(dedup_trades(vec![a, b]).len(), 2);
    }

    #[test]
    fn dedup_keeps_hashless_fills() {
        let a = make_trade("w1", "m1", TradeSide::Sell, dec!(5), dec!(0.5), t0());
        assert_eq!(dedup_trades(vec![a.clone(), a]).len(), 2);
    }

    // ── filter_by_threshold ────────────────────────────────────────

    #[test]
    fn threshold_is_inclusive() {
        let trades = vec![make_trade("w1", "m1", TradeSide::Sell, dec!(10), dec!(1), t0())];
        let kept = filter_by_threshold(aggregate_positions(&trades, t0()), dec!(10));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn below_threshold_dropped() {
        let trades = vec![make_trade("w1", "m1", TradeSide::Sell, dec!(9.99), dec!(1), t0())];
        let kept = filter_by_threshold(aggregate_positions(&trades, t0()), dec!(10));
        assert!(kept.is_empty());
    }

    #[test]
    fn losses_qualify_by_magnitude() {
        let trades = vec![make_trade("w1", "m1", TradeSide::Buy, dec!(100), dec!(0.5), t0())];
        let kept = filter_by_threshold(aggregate_positions(&trades, t0()), dec!(50));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].net_cash_flow, dec!(-50));
    }

    #[test]
    fn flat_position_dropped_even_at_zero_threshold() {
        let trades = vec![
            make_trade("w1", "m1", TradeSide::Buy, dec!(10), dec!(0.5), t0()),
            make_trade("w1", "m1", TradeSide::Sell, dec!(10), dec!(0.5), t0()),
        ];
        let kept = filter_by_threshold(aggregate_positions(&trades, t0()), Decimal::ZERO);
        assert!(kept.is_empty());
    }

    #[test]
    fn filter_output_is_sorted_by_key() {
        let trades = vec![
            make_trade("w2", "m1", TradeSide::Sell, dec!(1), dec!(1), t0()),
            make_trade("w1", "m2", TradeSide::Sell, dec!(1), dec!(1), t0()),
            make_trade("w1", "m1", TradeSide::Sell, dec!(1), dec!(1), t0()),
        ];
        let kept = filter_by_threshold(aggregate_positions(&trades, t0()), dec!(1));
        let keys: Vec<_> = kept.iter().map(|p| p.key.clone()).collect();
        assert_eq!(keys, vec![key("w1", "m1"), key("w1", "m2"), key("w2", "m1")]);
    }

    // ── rank ───────────────────────────────────────────────────────

    #[test]
    fn rank_empty_is_none() {
        assert!(rank(Vec::new()).is_none());
    }

    #[test]
    fn rank_picks_largest_magnitude() {
        let top = rank(vec![
            candidate("w1", "m1", dec!(15000)),
            candidate("w2", "m2", dec!(-40000)),
            candidate("w3", "m3", dec!(20000)),
        ])
        .unwrap();
        assert_eq!(top.wallet(), "w2");
        assert_eq!(top.abs_pnl, dec!(40000));
    }

    #[test]
    fn rank_tie_goes_to_smallest_key() {
        let top = rank(vec![
            candidate("w9", "m1", dec!(500)),
            candidate("w1", "m5", dec!(-500)),
            candidate("w5", "m1", dec!(500)),
        ])
        .unwrap();
        assert_eq!(top.wallet(), "w1");
    }

    #[test]
    fn rank_tie_is_order_independent() {
        let a = vec![candidate("w2", "m1", dec!(7)), candidate("w1", "m1", dec!(7))];
        let b = vec![candidate("w1", "m1", dec!(7)), candidate("w2", "m1", dec!(7))];
        assert_eq!(rank(a).unwrap().key, rank(b).unwrap().key);
    }
}
