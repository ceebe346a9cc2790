//! Window boundary computation for subscription usage resets.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Daily,
    Weekly,
    Monthly,
}

impl Window {
    pub fn column(self) -> &'static str {
        match self {
            Window::Daily => "daily",
            Window::Weekly => "weekly",
            Window::Monthly => "monthly",
        }
    }

    /// The start instant of the window containing `now`, UTC midnight-aligned.
    pub fn boundary_for(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).expect("valid midnight");
        match self {
            Window::Daily => Utc.from_utc_datetime(&midnight),
            Window::Weekly => {
                let days_since_monday = now.weekday().num_days_from_monday() as i64;
                Utc.from_utc_datetime(&midnight) - Duration::days(days_since_monday)
            }
            Window::Monthly => {
                let first_of_month = now
                    .date_naive()
                    .with_day(1)
                    .expect("valid day")
                    .and_hms_opt(0, 0, 0)
                    .expect("valid midnight");
                Utc.from_utc_datetime(&first_of_month)
            }
        }
    }

    /// True if the stored `window_start` is behind the current window's
    /// boundary, meaning usage must be reset before this request proceeds.
    pub fn needs_reset(self, window_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match window_start {
            None => true,
            Some(start) => start < self.boundary_for(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_window_start_always_needs_reset() {
        assert!(Window::Daily.needs_reset(None, Utc::now()));
    }

    #[test]
    fn current_window_start_does_not_need_reset() {
        let now = Utc::now();
        let boundary = Window::Daily.boundary_for(now);
        assert!(!Window::Daily.needs_reset(Some(boundary), now));
    }

    #[test]
    fn stale_window_start_needs_reset() {
        let now = Utc::now();
        let stale = Window::Monthly.boundary_for(now) - Duration::days(40);
        assert!(Window::Monthly.needs_reset(Some(stale), now));
    }

    #[test]
    fn weekly_boundary_is_monday_midnight() {
        let now = Utc::now();
        let boundary = Window::Weekly.boundary_for(now);
        assert_eq!(boundary.weekday().num_days_from_monday(), 0);
    }
}
