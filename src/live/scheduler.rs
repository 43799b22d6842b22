//! Intraday schedule as explicit values.
//!
//! The session driver walks the plan in order. A task whose time has
//! already passed still runs; its lateness is logged.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::session::SessionCalendar;
use crate::ports::clock_port::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionTask {
    UniverseRefresh,
    OpeningRangeScan,
    EntryCutoff,
    ForcedExitSweep,
    SessionClose,
}

impl std::fmt::Display for SessionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionTask::UniverseRefresh => "universe_refresh",
            SessionTask::OpeningRangeScan => "opening_range_scan",
            SessionTask::EntryCutoff => "entry_cutoff",
            SessionTask::ForcedExitSweep => "forced_exit_sweep",
            SessionTask::SessionClose => "session_close",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task: SessionTask,
    pub at: NaiveDateTime,
}

impl ScheduledTask {
    /// How far past its time the task is at `now`, if at all.
    pub fn lateness(&self, now: NaiveDateTime) -> Option<Duration> {
        (now > self.at).then(|| now - self.at)
    }

    /// Wait for the task's time. Returns the lateness when it was already due.
    pub async fn wait(&self, clock: &dyn Clock) -> Option<Duration> {
        let late = self.lateness(clock.now());
        match late {
            Some(by) => {
                warn!(
                    task = %self.task,
                    scheduled = %self.at,
                    late_secs = by.num_seconds(),
                    "running late task"
                );
            }
            None => clock.sleep_until(self.at).await,
        }
        late
    }
}

/// The day's tasks in execution order.
pub fn session_plan(calendar: &SessionCalendar, date: NaiveDate, refresh_lead: Duration) -> Vec<ScheduledTask> {
    let mut plan = vec![
        ScheduledTask {
            task: SessionTask::UniverseRefresh,
            at: calendar.at(date, calendar.open) - refresh_lead,
        },
        ScheduledTask {
            task: SessionTask::OpeningRangeScan,
            at: calendar.window_end_at(date),
        },
        ScheduledTask {
            task: SessionTask::EntryCutoff,
            at: calendar.entry_cutoff_at(date),
        },
        ScheduledTask {
            task: SessionTask::ForcedExitSweep,
            at: calendar.forced_exit_at(date),
        },
        ScheduledTask {
            task: SessionTask::SessionClose,
            at: calendar.close_at(date),
        },
    ];
    plan.sort_by_key(|t| (t.at, t.task));
    plan
}
