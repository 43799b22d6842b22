//! Trading session calendar: one session per day with fixed local times.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCalendar {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub or_window_minutes: u32,
    pub entry_cutoff: NaiveTime,
    pub forced_exit: NaiveTime,
    /// Exchange-local offset from UTC, used by the wall clock in live mode.
    pub utc_offset_minutes: i32,
}

impl Default for SessionCalendar {
    fn default() -> Self {
        SessionCalendar {
            open: hm(9, 30),
            close: hm(16, 0),
            or_window_minutes: 5,
            entry_cutoff: hm(15, 30),
            forced_exit: hm(15, 55),
            utc_offset_minutes: -300,
        }
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

impl SessionCalendar {
    /// End of the opening window. Saturates at 23:59:59 instead of wrapping
    /// past midnight; `validate` rejects windows that reach the close.
    pub fn or_window_end(&self) -> NaiveTime {
        let (end, wrapped) = self
            .open
            .overflowing_add_signed(Duration::minutes(i64::from(self.or_window_minutes)));
        if wrapped != 0 {
            return NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(self.close);
        }
        end
    }

    pub fn session_minutes(&self) -> i64 {
        (self.close - self.open).num_minutes()
    }

    pub fn in_opening_window(&self, time: NaiveTime) -> bool {
        time >= self.open && time < self.or_window_end()
    }

    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
        date.and_time(time)
    }

    pub fn window_end_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.or_window_end())
    }

    pub fn entry_cutoff_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.entry_cutoff)
    }

    pub fn forced_exit_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.forced_exit)
    }

    pub fn close_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.close)
    }

    /// Checks open < window end <= entry cutoff <= forced exit < close.
    pub fn validate(&self) -> Result<(), String> {
        if self.or_window_minutes == 0 {
            return Err("or_window_minutes must be positive".into());
        }
        if self.open >= self.close {
            return Err("session open must be before close".into());
        }
        if i64::from(self.or_window_minutes) >= self.session_minutes() {
            return Err(format!(
                "or_window_minutes ({}) must end before the session close",
                self.or_window_minutes
            ));
        }
        if self.or_window_end() > self.entry_cutoff {
            return Err("entry cutoff must not precede the end of the opening range".into());
        }
        if self.entry_cutoff > self.forced_exit {
            return Err("entry cutoff must not be after the forced exit time".into());
        }
        if self.forced_exit >= self.close {
            return Err("forced exit must be before session close".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_calendar_is_valid() {
        let cal = SessionCalendar::default();
        assert!(cal.validate().is_ok());
        assert_eq!(cal.or_window_end(), hm(9, 35));
        assert_eq!(cal.session_minutes(), 390);
    }

    #[test]
    fn opening_window_is_half_open() {
        let cal = SessionCalendar::default();
        assert!(cal.in_opening_window(hm(9, 30)));
        assert!(cal.in_opening_window(hm(9, 34)));
        assert!(!cal.in_opening_window(hm(9, 35)));
        assert!(!cal.in_opening_window(hm(9, 29)));
    }

    #[test]
    fn forced_exit_after_close_is_invalid() {
        let cal = SessionCalendar {
            forced_exit: hm(16, 0),
            ..SessionCalendar::default()
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn cutoff_inside_window_is_invalid() {
        let cal = SessionCalendar {
            entry_cutoff: hm(9, 32),
            ..SessionCalendar::default()
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn zero_window_is_invalid() {
        let cal = SessionCalendar {
            or_window_minutes: 0,
            ..SessionCalendar::default()
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn window_past_midnight_is_invalid() {
        let cal = SessionCalendar {
            or_window_minutes: 1000,
            ..SessionCalendar::default()
        };
        assert_eq!(cal.or_window_end(), hm(23, 59) + Duration::seconds(59));
        assert!(cal.in_opening_window(hm(9, 31)));
        assert!(cal.validate().unwrap_err().contains("or_window_minutes"));
    }

    #[test]
    fn window_reaching_close_is_invalid() {
        let cal = SessionCalendar {
            or_window_minutes: 390,
            entry_cutoff: hm(15, 59),
            forced_exit: hm(15, 59),
            ..SessionCalendar::default()
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn datetime_helpers() {
        let cal = SessionCalendar::default();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(cal.window_end_at(date), date.and_hms_opt(9, 35, 0).unwrap());
        assert_eq!(cal.forced_exit_at(date), date.and_hms_opt(15, 55, 0).unwrap());
        assert_eq!(cal.close_at(date), date.and_hms_opt(16, 0, 0).unwrap());
    }
}
