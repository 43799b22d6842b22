//! ORB strategy parameters and the decision steps shared by the backtest
//! engine and the live driver: universe, opening ranges, ranking, entry
//! planning and sizing.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::daily_metrics::DailyMetrics;
use super::error::{Stage, SymbolError};
use super::ohlcv::IntradayBar;
use super::opening_range::extract_opening_range;
use super::position::Side;
use super::ranking::{Candidate, CandidateBoard, RankingConfig};
use super::session::SessionCalendar;
use super::signal::{RejectReason, Signal, SignalEvent};
use super::sizing::{size_position, RiskConfig, SizingError};
use super::universe::{select_universe, UniverseFilter, UniverseSelection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub universe: UniverseFilter,
    pub ranking: RankingConfig,
    pub calendar: SessionCalendar,
    pub stop_atr_scale: f64,
    /// Profit target distance in ATRs. `None` means stop or forced exit only.
    pub target_atr_scale: Option<f64>,
    pub risk: RiskConfig,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams {
            universe: UniverseFilter::default(),
            ranking: RankingConfig::default(),
            calendar: SessionCalendar::default(),
            stop_atr_scale: 0.10,
            target_atr_scale: None,
            risk: RiskConfig::default(),
        }
    }
}

/// Entry order parameters for one ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub side: Side,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub atr_14: f64,
    pub avg_volume_14: f64,
    pub rank: usize,
    pub rvol: f64,
}

/// Long entries sit on the opening-range high, shorts on the low. Returns
/// none for unranked candidates and doji ranges.
pub fn plan_entry(candidate: &Candidate, params: &StrategyParams) -> Option<EntryPlan> {
    let rank = candidate.rank?;
    let side = candidate.side()?;
    let range = &candidate.opening_range;
    let atr = candidate.metrics.atr_14;

    let entry_price = match side {
        Side::Long => range.high,
        Side::Short => range.low,
    };
    let stop_price = entry_price - side.sign() * params.stop_atr_scale * atr;
    let target_price = params
        .target_atr_scale
        .map(|scale| entry_price + side.sign() * scale * atr);

    Some(EntryPlan {
        symbol: range.symbol.clone(),
        trade_date: range.trade_date,
        side,
        entry_price,
        stop_price,
        target_price,
        atr_14: atr,
        avg_volume_14: candidate.metrics.avg_volume_14,
        rank,
        rvol: candidate.rvol,
    })
}

/// Create the PENDING signal for a plan and size it. Sizing failures leave
/// the signal REJECTED and are returned alongside it.
pub fn arm_signal(
    plan: EntryPlan,
    equity: f64,
    risk: &RiskConfig,
    at: NaiveDateTime,
) -> (Signal, Option<SizingError>) {
    let sized = size_position(
        equity,
        plan.entry_price,
        plan.stop_price,
        plan.avg_volume_14,
        risk,
    );
    let mut signal = Signal::new(plan, at);

    match sized {
        Ok(size) => {
            let armed = signal.set_size(size);
            debug_assert!(armed.is_ok(), "fresh signal refused its size: {armed:?}");
            if let Err(e) = armed {
                warn!(symbol = signal.symbol(), error = %e, "fresh signal refused its size");
            }
            (signal, None)
        }
        Err(err) => {
            let reason = match &err {
                SizingError::InsufficientSize { .. } => RejectReason::InsufficientSize,
                other => RejectReason::Sizing(other.to_string()),
            };
            debug!(symbol = signal.symbol(), %err, "signal rejected at sizing");
            let rejected = signal.apply(SignalEvent::Reject { reason, at });
            debug_assert!(rejected.is_ok(), "fresh signal refused rejection: {rejected:?}");
            if let Err(e) = rejected {
                warn!(symbol = signal.symbol(), error = %e, "fresh signal refused rejection");
            }
            (signal, Some(err))
        }
    }
}

/// Everything known once the opening window has closed.
#[derive(Debug, Clone)]
pub struct DayScan {
    pub trade_date: NaiveDate,
    pub universe: UniverseSelection,
    pub board: CandidateBoard,
    pub errors: Vec<SymbolError>,
}

impl DayScan {
    /// Entry plans in rank order, freezing each rank as the decision is taken.
    pub fn take_entries(&mut self, params: &StrategyParams) -> Vec<EntryPlan> {
        let ranked: Vec<Candidate> = self.board.ranked().cloned().collect();
        let mut plans = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            if let Some(plan) = plan_entry(&candidate, params) {
                self.board.freeze(candidate.symbol());
                plans.push(plan);
            }
        }
        plans
    }
}

/// Universe selection and opening-range ranking for one day. Per-symbol
/// data problems become error records; they never stop the scan.
pub fn scan_day(
    params: &StrategyParams,
    trade_date: NaiveDate,
    metrics: &[DailyMetrics],
    bars: &BTreeMap<String, Vec<IntradayBar>>,
) -> DayScan {
    let universe = select_universe(&params.universe, metrics);
    let mut errors: Vec<SymbolError> = universe
        .skipped
        .iter()
        .filter(|s| s.reason.is_data_error())
        .map(|s| SymbolError::new(trade_date, &s.symbol, Stage::Universe, &s.reason))
        .collect();

    let mut board = CandidateBoard::new(
        params.ranking.clone(),
        params.calendar.clone(),
        &universe.members,
    );

    for member in &universe.members {
        let Some(symbol_bars) = bars.get(&member.symbol) else {
            errors.push(SymbolError::new(
                trade_date,
                &member.symbol,
                Stage::OpeningRange,
                "no intraday bars",
            ));
            continue;
        };
        match extract_opening_range(&member.symbol, trade_date, symbol_bars, &params.calendar) {
            Ok(range) => {
                board.insert(range);
            }
            Err(e) => {
                warn!(symbol = %member.symbol, date = %trade_date, error = %e, "opening range unavailable");
                errors.push(SymbolError::new(
                    trade_date,
                    &member.symbol,
                    Stage::OpeningRange,
                    e,
                ));
            }
        }
    }

    debug!(
        date = %trade_date,
        universe = universe.count(),
        ranked = board.ranked().count(),
        "day scanned"
    );

    DayScan {
        trade_date,
        universe,
        board,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::daily_metrics::CheckedMetrics;
    use crate::domain::opening_range::{Direction, OpeningRange};
    use crate::domain::signal::SignalStatus;
    use approx::assert_relative_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn candidate(direction: Direction, rank: Option<usize>) -> Candidate {
        Candidate {
            opening_range: OpeningRange {
                symbol: "X".into(),
                trade_date: date(),
                open: 9.9,
                high: 10.0,
                low: 9.8,
                close: 9.95,
                volume: 100_000,
                direction,
                bar_count: 5,
            },
            metrics: CheckedMetrics {
                symbol: "X".into(),
                trade_date: date(),
                close: 9.9,
                atr_14: 2.0,
                avg_volume_14: 2_000_000.0,
                prev_close: 9.7,
                avg_or_volume_14: None,
                score: None,
            },
            rvol: 4.0,
            rank,
            rejection: None,
        }
    }

    #[test]
    fn long_plan_uses_high_and_atr_stop() {
        let plan = plan_entry(&candidate(Direction::Bullish, Some(1)), &StrategyParams::default())
            .unwrap();
        assert_eq!(plan.side, Side::Long);
        assert_relative_eq!(plan.entry_price, 10.0);
        assert_relative_eq!(plan.stop_price, 9.8);
        assert!(plan.target_price.is_none());
    }

    #[test]
    fn short_plan_uses_low_and_optional_target() {
        let params = StrategyParams {
            target_atr_scale: Some(0.5),
            ..StrategyParams::default()
        };
        let plan = plan_entry(&candidate(Direction::Bearish, Some(2)), &params).unwrap();
        assert_eq!(plan.side, Side::Short);
        assert_relative_eq!(plan.entry_price, 9.8);
        assert_relative_eq!(plan.stop_price, 10.0);
        assert_relative_eq!(plan.target_price.unwrap(), 8.8);
        assert_eq!(plan.rank, 2);
    }

    #[test]
    fn unranked_or_doji_has_no_plan() {
        let params = StrategyParams::default();
        assert!(plan_entry(&candidate(Direction::Bullish, None), &params).is_none());
        assert!(plan_entry(&candidate(Direction::Doji, Some(1)), &params).is_none());
    }

    #[test]
    fn arm_signal_sizes_or_rejects() {
        let params = StrategyParams::default();
        let plan = plan_entry(&candidate(Direction::Bullish, Some(1)), &params).unwrap();
        let at = date().and_hms_opt(9, 35, 0).unwrap();

        let (signal, err) = arm_signal(plan.clone(), 100_000.0, &params.risk, at);
        assert!(err.is_none());
        assert_eq!(signal.status(), SignalStatus::Pending);
        assert_eq!(signal.quantity(), Some(5000));

        let (signal, err) = arm_signal(plan, 10.0, &params.risk, at);
        assert!(matches!(err, Some(SizingError::InsufficientSize { .. })));
        assert_eq!(signal.status(), SignalStatus::Rejected);
        assert_eq!(signal.reject_reason(), Some(&RejectReason::InsufficientSize));
    }

    #[test]
    fn armed_signal_records_one_transition() {
        let params = StrategyParams::default();
        let plan = plan_entry(&candidate(Direction::Bullish, Some(1)), &params).unwrap();
        let at = date().and_hms_opt(9, 35, 0).unwrap();

        let (mut sized, _) = arm_signal(plan.clone(), 100_000.0, &params.risk, at);
        assert_eq!(sized.history().len(), 1);
        assert!(sized.size().is_some());
        // the size is set once; a second attempt is refused
        let again = sized.size().cloned().unwrap();
        assert!(sized.set_size(again).is_err());

        let (rejected, _) = arm_signal(plan, 10.0, &params.risk, at);
        assert_eq!(rejected.history().len(), 2);
        assert_eq!(rejected.history()[1].to, SignalStatus::Rejected);
        assert!(rejected.size().is_none());
    }

    #[test]
    fn scan_day_records_missing_bars() {
        let metrics = vec![DailyMetrics {
            symbol: "X".into(),
            trade_date: date(),
            close: Some(50.0),
            atr_14: Some(2.0),
            avg_volume_14: Some(5_000_000.0),
            prev_close: Some(49.0),
            avg_or_volume_14: None,
            score: None,
        }];
        let scan = scan_day(&StrategyParams::default(), date(), &metrics, &BTreeMap::new());
        assert_eq!(scan.universe.count(), 1);
        assert_eq!(scan.errors.len(), 1);
        assert_eq!(scan.errors[0].stage, Stage::OpeningRange);
        assert_eq!(scan.board.ranked().count(), 0);
    }
}
