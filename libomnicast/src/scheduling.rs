//! Scheduling and time resolution
//!
//! A schedule is resolved to an absolute UTC instant exactly once, when the
//! post is created. The result depends only on the wall-clock input and the
//! IANA timezone database, never on the host's local zone.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{OmnicastError, Result};

const WALL_CLOCK_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// When a post should fire
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Publish as soon as the scheduler next ticks
    Now,
    /// Publish after a delay from creation
    After(std::time::Duration),
    /// Publish at a wall-clock time in an IANA timezone
    At {
        local: NaiveDateTime,
        timezone: String,
    },
}

/// A schedule pinned to an instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchedule {
    pub instant: DateTime<Utc>,
    pub timezone: String,
    /// Publish-now requests skip the past-time check
    pub immediate: bool,
}

impl Schedule {
    /// Pin the schedule to an absolute instant relative to `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResolvedSchedule> {
        match self {
            Schedule::Now => Ok(ResolvedSchedule {
                instant: now,
                timezone: "UTC".to_string(),
                immediate: true,
            }),
            Schedule::After(delay) => {
                let instant = Duration::from_std(*delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| OmnicastError::Validation("Delay out of range".to_string()))?;
                Ok(ResolvedSchedule {
                    instant,
                    timezone: "UTC".to_string(),
                    immediate: false,
                })
            }
            Schedule::At { local, timezone } => Ok(ResolvedSchedule {
                instant: resolve_wall_clock(*local, timezone)?,
                timezone: timezone.clone(),
                immediate: false,
            }),
        }
    }
}

/// Parse a schedule string.
///
/// Supports:
/// - `now`
/// - Relative durations: "90s", "30m", "2h 15m"
/// - Wall-clock times: "2025-06-01T09:00", "2025-06-01 09:00:30" (interpreted in `timezone`)
pub fn parse_schedule(input: &str, timezone: &str) -> Result<Schedule> {
    let input = input.trim();
    if input.is_empty() {
        return Err(OmnicastError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(Schedule::Now);
    }

    if let Ok(delay) = humantime::parse_duration(input) {
        return Ok(Schedule::After(delay));
    }

    let local = parse_wall_clock(input)?;
    Ok(Schedule::At {
        local,
        timezone: timezone.to_string(),
    })
}

/// Parse a wall-clock date and time without zone information
pub fn parse_wall_clock(input: &str) -> Result<NaiveDateTime> {
    WALL_CLOCK_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input.trim(), format).ok())
        .ok_or_else(|| {
            OmnicastError::Validation(format!(
                "Could not parse time '{}'. Expected YYYY-MM-DDTHH:MM[:SS]",
                input
            ))
        })
}

/// Parse an IANA timezone name such as "America/New_York"
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| OmnicastError::Validation(format!("Unknown timezone '{}'", name)))
}

/// Convert a wall-clock time in `timezone` to UTC.
///
/// Times skipped by a DST jump are rejected; times repeated by a DST fall-back
/// resolve to the earlier instant.
pub fn resolve_wall_clock(local: NaiveDateTime, timezone: &str) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;

    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(OmnicastError::Validation(format!(
            "{} does not exist in {} (skipped by a daylight-saving change)",
            local, timezone
        ))),
    }
}

/// Reject instants further in the past than the grace window
pub fn ensure_not_past(
    instant: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: std::time::Duration,
) -> Result<()> {
    let grace = Duration::from_std(grace).unwrap_or_else(|_| Duration::zero());
    if instant < now - grace {
        return Err(OmnicastError::Validation(format!(
            "Scheduled time {} is in the past",
            instant.format("%Y-%m-%d %H:%M:%S UTC")
        )));
    }
    Ok(())
}
