//! Candidate ranking by relative volume.
//!
//! Every opening range of a universe member becomes a [`Candidate`]. Filters
//! run before truncation so the top-N slots only ever hold tradable
//! candidates. Ordering is RVOL descending, ties broken by symbol ascending.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::debug;

use super::daily_metrics::CheckedMetrics;
use super::opening_range::{Direction, OpeningRange};
use super::position::Side;
use super::session::SessionCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideFilter {
    Long,
    Short,
    Both,
}

impl SideFilter {
    pub fn allows(self, side: Side) -> bool {
        match self {
            SideFilter::Both => true,
            SideFilter::Long => side == Side::Long,
            SideFilter::Short => side == Side::Short,
        }
    }
}

impl FromStr for SideFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(SideFilter::Long),
            "short" => Ok(SideFilter::Short),
            "both" => Ok(SideFilter::Both),
            other => Err(format!("unknown side '{other}', expected long, short or both")),
        }
    }
}

impl std::fmt::Display for SideFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideFilter::Long => f.write_str("long"),
            SideFilter::Short => f.write_str("short"),
            SideFilter::Both => f.write_str("both"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub rvol_min: f64,
    pub top_n: usize,
    pub side: SideFilter,
    /// Minimum upstream model score; candidates without a score fail.
    pub min_score: Option<f64>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            rvol_min: 1.0,
            top_n: 20,
            side: SideFilter::Both,
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CandidateRejection {
    InvalidBaseline,
    Doji,
    SideFiltered,
    RvolBelowMin,
    MissingScore,
    ScoreBelowMin,
    OutsideTopN,
}

impl std::fmt::Display for CandidateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CandidateRejection::InvalidBaseline => "no usable volume baseline",
            CandidateRejection::Doji => "doji opening range",
            CandidateRejection::SideFiltered => "side filtered",
            CandidateRejection::RvolBelowMin => "rvol below minimum",
            CandidateRejection::MissingScore => "missing score",
            CandidateRejection::ScoreBelowMin => "score below minimum",
            CandidateRejection::OutsideTopN => "outside top n",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub opening_range: OpeningRange,
    pub metrics: CheckedMetrics,
    pub rvol: f64,
    pub rank: Option<usize>,
    pub rejection: Option<CandidateRejection>,
}

impl Candidate {
    pub fn symbol(&self) -> &str {
        &self.opening_range.symbol
    }

    pub fn passed_filters(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn side(&self) -> Option<Side> {
        self.opening_range.direction.side()
    }
}

/// Historical volume expected inside the opening window.
pub fn rvol_baseline(metrics: &CheckedMetrics, calendar: &SessionCalendar) -> Option<f64> {
    let baseline = match metrics.avg_or_volume_14 {
        Some(v) => v,
        None => {
            let session = calendar.session_minutes();
            if session <= 0 {
                return None;
            }
            metrics.avg_volume_14 * f64::from(calendar.or_window_minutes) / session as f64
        }
    };
    (baseline.is_finite() && baseline > 0.0).then_some(baseline)
}

/// Strict total order: RVOL descending, then symbol ascending.
pub fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.rvol
        .total_cmp(&a.rvol)
        .then_with(|| a.symbol().cmp(b.symbol()))
}

fn evaluate(
    range: &OpeningRange,
    metrics: &CheckedMetrics,
    config: &RankingConfig,
    calendar: &SessionCalendar,
) -> Candidate {
    let baseline = rvol_baseline(metrics, calendar);
    let rvol = baseline.map_or(0.0, |b| range.volume.max(0) as f64 / b);

    let rejection = if baseline.is_none() {
        Some(CandidateRejection::InvalidBaseline)
    } else if range.direction == Direction::Doji {
        Some(CandidateRejection::Doji)
    } else if !range
        .direction
        .side()
        .is_some_and(|side| config.side.allows(side))
    {
        Some(CandidateRejection::SideFiltered)
    } else if rvol < config.rvol_min {
        Some(CandidateRejection::RvolBelowMin)
    } else {
        match (config.min_score, metrics.score) {
            (Some(_), None) => Some(CandidateRejection::MissingScore),
            (Some(min), Some(score)) if score < min => Some(CandidateRejection::ScoreBelowMin),
            _ => None,
        }
    };

    Candidate {
        opening_range: range.clone(),
        metrics: metrics.clone(),
        rvol,
        rank: None,
        rejection,
    }
}

/// Rank opening ranges of universe members. Ranges for symbols outside the
/// universe are ignored. Output is in rank order with unranked candidates
/// after the ranked ones.
pub fn rank_candidates(
    ranges: &[OpeningRange],
    members: &[CheckedMetrics],
    config: &RankingConfig,
    calendar: &SessionCalendar,
) -> Vec<Candidate> {
    let by_symbol: BTreeMap<&str, &CheckedMetrics> =
        members.iter().map(|m| (m.symbol.as_str(), m)).collect();

    let mut candidates: Vec<Candidate> = ranges
        .iter()
        .filter_map(|r| {
            by_symbol
                .get(r.symbol.as_str())
                .map(|m| evaluate(r, m, config, calendar))
        })
        .collect();

    assign_ranks(&mut candidates, config.top_n, &BTreeMap::new());
    candidates
}

/// Sort, then hand out ranks. Frozen symbols keep their rank; the rest take
/// the smallest unused numbers in 1..=top_n in ranking order.
fn assign_ranks(candidates: &mut [Candidate], top_n: usize, frozen: &BTreeMap<String, usize>) {
    candidates.sort_by(rank_order);

    let mut used: BTreeSet<usize> = frozen.values().copied().collect();
    let mut next = 1usize;

    for candidate in candidates.iter_mut() {
        candidate.rank = None;
        if let Some(rank) = frozen.get(candidate.symbol()) {
            candidate.rank = Some(*rank);
            candidate.rejection = None;
            continue;
        }
        if matches!(candidate.rejection, Some(CandidateRejection::OutsideTopN)) {
            candidate.rejection = None;
        }
        if !candidate.passed_filters() {
            continue;
        }
        while used.contains(&next) {
            next += 1;
        }
        if next <= top_n {
            candidate.rank = Some(next);
            used.insert(next);
            next += 1;
        } else {
            candidate.rejection = Some(CandidateRejection::OutsideTopN);
        }
    }

    candidates.sort_by(|a, b| match (a.rank, b.rank) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => rank_order(a, b),
    });
}

/// Intraday ranking state. Opening ranges arrive one by one; ranking is
/// recomputed on every arrival, and a symbol's rank is frozen once its entry
/// decision has been taken.
#[derive(Debug, Clone)]
pub struct CandidateBoard {
    config: RankingConfig,
    calendar: SessionCalendar,
    members: BTreeMap<String, CheckedMetrics>,
    ranges: BTreeMap<String, OpeningRange>,
    frozen: BTreeMap<String, usize>,
    candidates: Vec<Candidate>,
}

impl CandidateBoard {
    pub fn new(config: RankingConfig, calendar: SessionCalendar, members: &[CheckedMetrics]) -> Self {
        CandidateBoard {
            config,
            calendar,
            members: members
                .iter()
                .map(|m| (m.symbol.clone(), m.clone()))
                .collect(),
            ranges: BTreeMap::new(),
            frozen: BTreeMap::new(),
            candidates: Vec::new(),
        }
    }

    /// Add an opening range and re-rank. Returns false for non-members and
    /// for symbols that already have a range.
    pub fn insert(&mut self, range: OpeningRange) -> bool {
        if !self.members.contains_key(&range.symbol) || self.ranges.contains_key(&range.symbol) {
            return false;
        }
        self.ranges.insert(range.symbol.clone(), range);
        self.recompute();
        true
    }

    /// Freeze the current rank of `symbol`. Returns the frozen rank, or none
    /// if the symbol is not ranked.
    pub fn freeze(&mut self, symbol: &str) -> Option<usize> {
        if let Some(rank) = self.frozen.get(symbol) {
            return Some(*rank);
        }
        let rank = self
            .candidates
            .iter()
            .find(|c| c.symbol() == symbol)
            .and_then(|c| c.rank)?;
        self.frozen.insert(symbol.to_string(), rank);
        Some(rank)
    }

    pub fn is_frozen(&self, symbol: &str) -> bool {
        self.frozen.contains_key(symbol)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn ranked(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.rank.is_some())
    }

    pub fn get(&self, symbol: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.symbol() == symbol)
    }

    fn recompute(&mut self) {
        let mut candidates: Vec<Candidate> = self
            .ranges
            .values()
            .filter_map(|r| {
                self.members
                    .get(&r.symbol)
                    .map(|m| evaluate(r, m, &self.config, &self.calendar))
            })
            .collect();
        assign_ranks(&mut candidates, self.config.top_n, &self.frozen);
        debug!(
            candidates = candidates.len(),
            frozen = self.frozen.len(),
            "candidate ranking recomputed"
        );
        self.candidates = candidates;
    }
}
