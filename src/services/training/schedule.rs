use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

/// Fires at most once per calendar day, at or after a fixed time of day.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    at: NaiveTime,
    last_run: Option<NaiveDate>,
}

impl DailySchedule {
    /// Parses "H:MM"; anything unparseable falls back to 3:00.
    pub fn parse(value: &str) -> Self {
        let at = parse_time(value).unwrap_or_else(|| {
            warn!(schedule = %value, "Invalid training schedule, using 3:00");
            default_time()
        });
        Self { at, last_run: None }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Treats `today` as already handled, so the first run is the next occurrence.
    pub fn skip_day(mut self, today: NaiveDate) -> Self {
        self.last_run = Some(today);
        self
    }

    /// True once per day when `now` has reached the scheduled time.
    pub fn due(&mut self, now: NaiveDateTime) -> bool {
        let today = now.date();
        if self.last_run == Some(today) || now.time() < self.at {
            return false;
        }
        self.last_run = Some(today);
        true
    }
}

fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    NaiveTime::from_hms_opt(hour.trim().parse().ok()?, minute.trim().parse().ok()?, 0)
}
