use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

use super::{ErrorKind, Result};

/// Which side of the schedule an instant falls on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::ScaleUp => write!(f, "scale-up"),
            Window::ScaleDown => write!(f, "scale-down"),
        }
    }
}

/// Parse a 24-hour `HH:MM` clock value
///
/// The key is only used to name the offending setting in the error.
pub fn parse_clock(key: &str, value: &str) -> Result<NaiveTime> {
    let t = NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ErrorKind::InvalidTime(key.into(), value.into()))?;
    Ok(t)
}

/// Resolve an IANA timezone identifier like `Europe/London`
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    let zone = tz
        .parse::<Tz>()
        .map_err(|_| ErrorKind::InvalidTimezone(tz.into()))?;
    Ok(zone)
}

/// Daily scaling schedule
///
/// The floor is raised to `scale_up_replicas` at `scale_up_time` and lowered to
/// `scale_down_replicas` at `scale_down_time`, both read as wall clock times in `timezone`.
/// When the scale down time is not after the scale up time the window wraps past midnight.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub scale_up_time: NaiveTime,
    pub scale_down_time: NaiveTime,
    pub timezone: Tz,
    pub scale_up_replicas: i32,
    pub scale_down_replicas: i32,
}

impl Schedule {
    /// Re-base the schedule onto the local calendar date of `now`
    pub fn evaluate(&self, now: DateTime<Utc>) -> Evaluation {
        let local = now.with_timezone(&self.timezone);
        let today = local.date_naive();
        Evaluation {
            scale_up_at: rebase(&self.timezone, today, self.scale_up_time),
            scale_down_at: rebase(&self.timezone, today, self.scale_down_time),
            now: local,
        }
    }

    pub fn replicas_for(&self, window: Window) -> i32 {
        match window {
            Window::ScaleUp => self.scale_up_replicas,
            Window::ScaleDown => self.scale_down_replicas,
        }
    }

    /// The minimum replica floor in effect at `now`
    pub fn target_replicas(&self, now: DateTime<Utc>) -> i32 {
        self.replicas_for(self.evaluate(now).window())
    }
}

/// One invocation's view of the schedule
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Current time in the schedule's timezone
    pub now: DateTime<Tz>,
    /// Scale up boundary on today's date
    pub scale_up_at: DateTime<Tz>,
    /// Scale down boundary on today's date
    pub scale_down_at: DateTime<Tz>,
}

impl Evaluation {
    pub fn wraps_midnight(&self) -> bool {
        self.scale_down_at <= self.scale_up_at
    }

    /// Same day windows are `[up, down)`.
    /// Wrapping windows scale up strictly after `up` or strictly before `down`.
    pub fn window(&self) -> Window {
        let up = if self.wraps_midnight() {
            self.now > self.scale_up_at || self.now < self.scale_down_at
        } else {
            self.now >= self.scale_up_at && self.now < self.scale_down_at
        };
        if up {
            Window::ScaleUp
        } else {
            Window::ScaleDown
        }
    }
}

// Wall clock time on a date; DST gaps move forward, DST overlaps take the first occurrence
fn rebase(tz: &Tz, date: NaiveDate, t: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(t);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Decide the minimum replica floor from raw settings
///
/// Fails on an unknown timezone or a malformed clock value before anything is evaluated.
pub fn decide_target_replicas(
    now: DateTime<Utc>,
    timezone: &str,
    scale_up_time: &str,
    scale_down_time: &str,
    scale_up_replicas: i32,
    scale_down_replicas: i32,
) -> Result<i32> {
    let schedule = Schedule {
        timezone: parse_timezone(timezone)?,
        scale_up_time: parse_clock("scale-up-time", scale_up_time)?,
        scale_down_time: parse_clock("scale-down-time", scale_down_time)?,
        scale_up_replicas,
        scale_down_replicas,
    };
    Ok(schedule.target_replicas(now))
}
