//! Parallel parameter sweeps.
//!
//! Every grid point is an independent backtest over the same loaded days.
//! Points run in parallel with rayon; results come back in grid order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::backtest::{run_backtest, BacktestConfig, TradingDay};
use super::metrics::Metrics;
use super::ranking::SideFilter;
use super::strategy::StrategyParams;

/// Values to try per parameter. An empty axis keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub stop_atr_scales: Vec<f64>,
    pub top_ns: Vec<usize>,
    pub sides: Vec<SideFilter>,
    pub rvol_mins: Vec<f64>,
}

/// One combination of swept values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub stop_atr_scale: f64,
    pub top_n: usize,
    pub side: SideFilter,
    pub rvol_min: f64,
}

impl GridPoint {
    pub fn apply(&self, base: &StrategyParams) -> StrategyParams {
        let mut params = base.clone();
        params.stop_atr_scale = self.stop_atr_scale;
        params.ranking.top_n = self.top_n;
        params.ranking.side = self.side;
        params.ranking.rvol_min = self.rvol_min;
        params
    }
}

impl ParameterGrid {
    /// Cartesian product in axis order: stop scale, top N, side, RVOL minimum.
    pub fn points(&self, base: &StrategyParams) -> Vec<GridPoint> {
        let stops = or_base(&self.stop_atr_scales, base.stop_atr_scale);
        let top_ns = or_base(&self.top_ns, base.ranking.top_n);
        let sides = or_base(&self.sides, base.ranking.side);
        let rvols = or_base(&self.rvol_mins, base.ranking.rvol_min);

        let mut points = Vec::with_capacity(stops.len() * top_ns.len() * sides.len() * rvols.len());
        for &stop_atr_scale in &stops {
            for &top_n in &top_ns {
                for &side in &sides {
                    for &rvol_min in &rvols {
                        points.push(GridPoint {
                            stop_atr_scale,
                            top_n,
                            side,
                            rvol_min,
                        });
                    }
                }
            }
        }
        points
    }
}

fn or_base<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub point: GridPoint,
    pub metrics: Metrics,
    pub final_equity: f64,
    pub errors: usize,
}

pub fn run_sweep(
    days: &[TradingDay],
    base: &StrategyParams,
    config: &BacktestConfig,
    grid: &ParameterGrid,
) -> Vec<SweepResult> {
    let points = grid.points(base);
    info!(points = points.len(), days = days.len(), "starting sweep");

    points
        .par_iter()
        .map(|point| {
            let params = point.apply(base);
            let run = run_backtest(days, &params, config);
            SweepResult {
                point: *point,
                metrics: run.metrics(),
                final_equity: run.final_equity(),
                errors: run.errors.len(),
            }
        })
        .collect()
}

/// Parse a comma-separated list, e.g. `0.05, 0.1, 0.2`.
pub fn parse_list<T: std::str::FromStr>(input: &str) -> Result<Vec<T>, String>
where
    T::Err: std::fmt::Display,
{
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| format!("'{s}': {e}")))
        .collect()
}
