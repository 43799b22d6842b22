//! Clock adapters.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use std::sync::Mutex;

use crate::ports::clock_port::Clock;

/// Wall clock shifted to exchange-local time by a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    utc_offset_minutes: i32,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { utc_offset_minutes }
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::minutes(i64::from(self.utc_offset_minutes))
    }

    async fn sleep_until(&self, at: NaiveDateTime) {
        let remaining = at - self.now();
        if let Ok(wait) = remaining.to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Clock that only moves when told to. `sleep_until` jumps straight to the
/// requested time, so a whole session replays instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep_until(&self, at: NaiveDateTime) {
        {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            if at > *now {
                *now = at;
            }
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn manual_clock_jumps_forward_only() {
        let clock = ManualClock::new(at(9, 30));
        clock.sleep_until(at(9, 35)).await;
        assert_eq!(clock.now(), at(9, 35));
        clock.sleep_until(at(9, 31)).await;
        assert_eq!(clock.now(), at(9, 35));
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), at(9, 40));
    }

    #[tokio::test]
    async fn system_clock_past_sleep_returns() {
        let clock = SystemClock::new(0);
        let past = clock.now() - Duration::minutes(1);
        clock.sleep_until(past).await;
        assert!(clock.now() > past);
    }
}
