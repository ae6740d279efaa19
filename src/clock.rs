//! Wall-clock helpers for halt scheduling and log timestamps.

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike};

/// A civil timestamp as carried in halt schedules and over the membus,
/// `hh:mm:ss MM/DD/YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub month: u32,
    pub day: u32,
    pub year: i32,
}

/// Where a timestamp sits relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrder {
    Future,
    Present,
    Past,
}

impl WallTime {
    /// Captures the current local time.
    pub fn now() -> WallTime {
        WallTime::from_datetime(Local::now())
    }

    fn from_datetime(dt: DateTime<Local>) -> WallTime {
        WallTime {
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            month: dt.month(),
            day: dt.day(),
            year: dt.year(),
        }
    }

    /// Parses the wire format `hh:mm:ss MM/DD/YYYY`.
    pub fn parse(text: &str) -> Option<WallTime> {
        let (clock, date) = text.trim().split_once(' ')?;
        let mut clock_parts = clock.split(':');
        let hour = clock_parts.next()?.parse().ok()?;
        let minute = clock_parts.next()?.parse().ok()?;
        let second = clock_parts.next()?.parse().ok()?;
        if clock_parts.next().is_some() {
            return None;
        }
        let mut date_parts = date.trim().split('/');
        let month = date_parts.next()?.parse().ok()?;
        let day = date_parts.next()?.parse().ok()?;
        let year = date_parts.next()?.parse().ok()?;
        if date_parts.next().is_some() {
            return None;
        }
        let parsed = WallTime { hour, minute, second, month, day, year };
        parsed.to_datetime()?;
        Some(parsed)
    }

    /// The projected local time `minutes` from now. Used by `shutdown +m`.
    pub fn mins_from_now(minutes: i64) -> WallTime {
        WallTime::from_datetime(Local::now() + Duration::minutes(minutes))
    }

    /// The next occurrence of `hour:minute` on the wall clock, today or
    /// tomorrow. Used by `shutdown hh:mm`.
    pub fn next_occurrence(hour: u32, minute: u32) -> WallTime {
        let now = Local::now();
        let mut candidate = WallTime::from_datetime(now);
        candidate.hour = hour;
        candidate.minute = minute;
        candidate.second = 0;
        match candidate.to_datetime() {
            Some(dt) if dt.timestamp() >= now.timestamp() => candidate,
            _ => WallTime::from_datetime(
                (now + Duration::days(1))
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .map(|naive| naive.and_local_timezone(Local).single())
                    .flatten()
                    .unwrap_or(now + Duration::days(1)),
            ),
        }
    }

    /// Is this timestamp in the past, present, or future? Returns `None` for
    /// dates the calendar cannot represent.
    pub fn order(&self) -> Option<TimeOrder> {
        let target = self.to_datetime()?;
        let now = Local::now();
        Some(if target.timestamp() < now.timestamp() {
            TimeOrder::Past
        } else if target.timestamp() == now.timestamp() {
            TimeOrder::Present
        } else {
            TimeOrder::Future
        })
    }

    /// True once the timestamp is no longer in the future.
    pub fn is_due(&self) -> bool {
        matches!(self.order(), Some(TimeOrder::Past | TimeOrder::Present))
    }

    /// Whole minutes until the timestamp; zero if it already passed.
    pub fn minutes_until(&self) -> i64 {
        let Some(target) = self.to_datetime() else {
            return 0;
        };
        let secs = target.timestamp() - Local::now().timestamp();
        if secs <= 0 { 0 } else { secs / 60 }
    }

    fn to_datetime(&self) -> Option<DateTime<Local>> {
        Local
            .with_ymd_and_hms(self.year, self.month, self.day, self.hour, self.minute, self.second)
            .single()
    }

    /// Formats as `hh:mm MM/DD/YYYY` for wall broadcasts.
    pub fn display_short(&self) -> String {
        format!(
            "{:02}:{:02} {}/{}/{}",
            self.hour, self.minute, self.month, self.day, self.year
        )
    }

    /// Formats in the wire format `hh:mm:ss MM/DD/YYYY`.
    pub fn wire_format(&self) -> String {
        format!(
            "{}:{}:{} {}/{}/{}",
            self.hour, self.minute, self.second, self.month, self.day, self.year
        )
    }
}

/// Unix seconds, local clock.
pub fn unix_now() -> i64 {
    Local::now().timestamp()
}

/// Timestamp prefix used by the logger and wall broadcasts,
/// `[hh:mm:ss | YYYY-MM-DD]`.
pub fn log_stamp() -> String {
    Local::now().format("[%H:%M:%S | %Y-%m-%d]").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_wire_format() {
        let wt = WallTime::parse("10:02:00 3/14/2031").expect("parse");
        assert_eq!(wt.hour, 10);
        assert_eq!(wt.minute, 2);
        assert_eq!(wt.second, 0);
        assert_eq!(wt.month, 3);
        assert_eq!(wt.day, 14);
        assert_eq!(wt.year, 2031);
        assert_eq!(WallTime::parse(&wt.wire_format()), Some(wt));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(WallTime::parse("10:02 3/14/2031"), None);
        assert_eq!(WallTime::parse("10:02:00"), None);
        assert_eq!(WallTime::parse("now"), None);
        assert_eq!(WallTime::parse("99:99:99 13/40/2031"), None);
    }

    #[test]
    fn far_future_is_future() {
        let wt = WallTime::parse("00:00:00 1/1/2999").expect("parse");
        assert_eq!(wt.order(), Some(TimeOrder::Future));
        assert!(!wt.is_due());
        assert!(wt.minutes_until() > 60);
    }

    #[test]
    fn past_is_due() {
        let wt = WallTime::parse("00:00:00 1/1/1999").expect("parse");
        assert_eq!(wt.order(), Some(TimeOrder::Past));
        assert!(wt.is_due());
        assert_eq!(wt.minutes_until(), 0);
    }

    #[test]
    fn next_occurrence_is_never_past() {
        let wt = WallTime::next_occurrence(12, 30);
        assert_eq!(wt.hour, 12);
        assert_eq!(wt.minute, 30);
        assert!(!matches!(wt.order(), Some(TimeOrder::Past)));
        // At most a day and a bit away.
        assert!(wt.minutes_until() <= 24 * 60);
    }

    #[test]
    fn mins_from_now_moves_forward() {
        let later = WallTime::mins_from_now(90);
        assert!(!later.is_due());
        let until = later.minutes_until();
        assert!((88..=90).contains(&until), "{until} minutes until");
    }
}
