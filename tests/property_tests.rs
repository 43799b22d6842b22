//! Property tests for ranking, sizing and the signal state machine.

mod common;

use chrono::NaiveDate;
use common::*;
use orbtrader::domain::daily_metrics::CheckedMetrics;
use orbtrader::domain::execution::ExecutionCosts;
use orbtrader::domain::opening_range::{Direction, OpeningRange};
use orbtrader::domain::position::{ExitReason, Side};
use orbtrader::domain::ranking::{rank_candidates, RankingConfig, SideFilter};
use orbtrader::domain::session::SessionCalendar;
use orbtrader::domain::signal::{CancelReason, Fill, RejectReason, SignalEvent, SignalStatus};
use orbtrader::domain::sizing::{size_position, RiskConfig, SizeBinding};
use orbtrader::domain::strategy::{arm_signal, EntryPlan};
use proptest::prelude::*;

fn trade_date() -> NaiveDate {
    date("2024-03-01")
}

fn member(symbol: &str) -> CheckedMetrics {
    CheckedMetrics {
        symbol: symbol.to_string(),
        trade_date: trade_date(),
        close: 10.0,
        atr_14: 2.0,
        avg_volume_14: 2_000_000.0,
        prev_close: 10.0,
        avg_or_volume_14: Some(10_000.0),
        score: None,
    }
}

fn range(symbol: &str, volume: i64, bullish: bool) -> OpeningRange {
    let (open, close) = if bullish { (9.9, 10.0) } else { (10.0, 9.9) };
    OpeningRange {
        symbol: symbol.to_string(),
        trade_date: trade_date(),
        open,
        high: 10.1,
        low: 9.8,
        close,
        volume,
        direction: if bullish { Direction::Bullish } else { Direction::Bearish },
        bar_count: 5,
    }
}

/// Distinct symbols with arbitrary opening-range volume and direction.
fn ranges_strategy() -> impl Strategy<Value = Vec<OpeningRange>> {
    prop::collection::btree_map("[A-Z]{1,4}", (0i64..60_000, any::<bool>()), 0..25).prop_map(|m| {
        m.into_iter()
            .map(|(symbol, (volume, bullish))| range(&symbol, volume, bullish))
            .collect()
    })
}

fn ranked(ranges: &[OpeningRange], config: &RankingConfig) -> Vec<(String, Option<usize>)> {
    let members: Vec<CheckedMetrics> = ranges.iter().map(|r| member(&r.symbol)).collect();
    rank_candidates(ranges, &members, config, &SessionCalendar::default())
        .iter()
        .map(|c| (c.symbol().to_string(), c.rank))
        .collect()
}

proptest! {
    #[test]
    fn ranking_ignores_input_order(
        ranges in ranges_strategy(),
        top_n in 1usize..10,
        seed in any::<u64>(),
    ) {
        let config = RankingConfig { top_n, ..RankingConfig::default() };
        let first = ranked(&ranges, &config);

        let mut shuffled = ranges.clone();
        let len = shuffled.len();
        if len > 1 {
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
        }
        prop_assert_eq!(&ranked(&shuffled, &config), &first);
        prop_assert_eq!(&ranked(&ranges, &config), &first);
    }

    #[test]
    fn ranks_are_dense_and_follow_rvol(
        ranges in ranges_strategy(),
        top_n in 1usize..10,
        rvol_min in 0.0f64..3.0,
    ) {
        let config = RankingConfig { top_n, rvol_min, side: SideFilter::Long, min_score: None };
        let members: Vec<CheckedMetrics> = ranges.iter().map(|r| member(&r.symbol)).collect();
        let candidates = rank_candidates(&ranges, &members, &config, &SessionCalendar::default());

        let ranked: Vec<_> = candidates.iter().filter(|c| c.rank.is_some()).collect();
        prop_assert!(ranked.len() <= top_n);
        for (i, c) in ranked.iter().enumerate() {
            prop_assert_eq!(c.rank, Some(i + 1));
            prop_assert_eq!(c.side(), Some(Side::Long));
            prop_assert!(c.rvol >= rvol_min);
        }
        for pair in ranked.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            prop_assert!(a.rvol > b.rvol || (a.rvol == b.rvol && a.symbol() < b.symbol()));
        }
        // nothing unranked beats the last ranked candidate unless it was filtered
        if ranked.len() == top_n {
            let last = ranked[top_n - 1];
            for c in candidates.iter().filter(|c| c.rank.is_none() && c.side() == Some(Side::Long)) {
                prop_assert!(c.rvol < rvol_min || c.rvol <= last.rvol);
            }
        }
    }

    #[test]
    fn size_respects_every_cap(
        equity in 1.0f64..5_000_000.0,
        entry in 0.5f64..1_000.0,
        distance in 0.001f64..50.0,
        avg_volume in 0.0f64..50_000_000.0,
        risk_pct in 0.001f64..0.05,
        liquidity in prop::option::of(0.001f64..0.05),
        leverage in 0.5f64..8.0,
    ) {
        let risk = RiskConfig { risk_pct, liquidity_cap_pct: liquidity, leverage };
        let stop = entry - distance;
        let distance = entry - stop;
        // floor of each cap, allowing only a few ULPs of division noise
        let bound = |x: f64| (x * (1.0 + 8.0 * f64::EPSILON)).floor() as i64;
        let risk_bound = bound(equity * risk_pct / distance);
        let leverage_bound = bound(leverage * equity / entry);
        let liquidity_bound = liquidity.map(|pct| bound(pct * avg_volume));
        match size_position(equity, entry, stop, avg_volume, &risk) {
            Ok(size) => {
                prop_assert!(size.shares >= 1);
                prop_assert!(size.shares <= risk_bound);
                prop_assert!(size.shares <= leverage_bound);
                if let Some(cap) = liquidity_bound {
                    prop_assert!(size.shares <= cap);
                }
                prop_assert_eq!(size.is_capped, size.binding == SizeBinding::Liquidity);
            }
            Err(_) => {
                let best = risk_bound
                    .min(leverage_bound)
                    .min(liquidity_bound.unwrap_or(i64::MAX));
                prop_assert!(best < 1);
            }
        }
    }
}

#[test]
fn thin_name_is_capped_by_liquidity() {
    let risk = RiskConfig {
        risk_pct: 0.02,
        liquidity_cap_pct: Some(0.01),
        leverage: 4.0,
    };
    let size = size_position(1_000.0, 30.0, 29.0, 500.0, &risk).unwrap();
    assert_eq!(size.shares, 5);
    assert!(size.is_capped);
    approx::assert_relative_eq!(size.risk_amount, 20.0);
}

fn armed(with_target: bool) -> orbtrader::domain::signal::Signal {
    let d = trade_date();
    let plan = EntryPlan {
        symbol: "X".into(),
        trade_date: d,
        side: Side::Long,
        entry_price: 10.0,
        stop_price: 9.8,
        target_price: with_target.then_some(10.5),
        atr_14: 2.0,
        avg_volume_14: 2_000_000.0,
        rank: 1,
        rvol: 3.0,
    };
    let (signal, error) = arm_signal(plan, 100_000.0, &RiskConfig::default(), at(d, 9, 35));
    assert!(error.is_none());
    signal
}

fn event_strategy() -> impl Strategy<Value = SignalEvent> {
    let d = trade_date();
    let t = at(d, 10, 0);
    let fill = Fill {
        price: 10.0,
        quantity: 100,
        at: t,
    };
    prop_oneof![
        Just(SignalEvent::Submit { order_id: "o-1".into(), at: t }),
        Just(SignalEvent::Fill(fill.clone())),
        Just(SignalEvent::Reject { reason: RejectReason::Gateway("halted".into()), at: t }),
        Just(SignalEvent::Cancel { reason: CancelReason::EntryCutoff, at: t }),
        Just(SignalEvent::Exit { reason: ExitReason::Stop, fill: fill.clone() }),
        Just(SignalEvent::Exit { reason: ExitReason::Target, fill: fill.clone() }),
        Just(SignalEvent::Exit { reason: ExitReason::ForcedExit, fill }),
    ]
}

proptest! {
    #[test]
    fn signal_never_takes_an_illegal_edge(
        events in prop::collection::vec(event_strategy(), 0..12),
        with_target in any::<bool>(),
    ) {
        let mut signal = armed(with_target);
        for event in events {
            let before = signal.status();
            let history_len = signal.history().len();
            match signal.apply(event) {
                Ok(after) => {
                    prop_assert!(!before.is_terminal());
                    prop_assert!(before.can_transition_to(after));
                    prop_assert_eq!(signal.status(), after);
                    prop_assert_eq!(signal.history().len(), history_len + 1);
                }
                Err(_) => {
                    prop_assert_eq!(signal.status(), before);
                    prop_assert_eq!(signal.history().len(), history_len);
                }
            }
        }

        if signal.status().is_terminal() {
            let terminal = signal.status();
            prop_assert!(SignalStatus::ALL.iter().all(|s| !terminal.can_transition_to(*s)));
        }
        let has_trade = signal.trade_record(&ExecutionCosts::default()).is_some();
        prop_assert_eq!(has_trade, signal.status().exit_reason().is_some());
    }
}
