//! Next-run arithmetic (coordination protocol §4.1).
//!
//! Pure functions over `DateTime<Utc>` — no I/O, no database — so every
//! schedule type is exhaustively unit-testable. All arithmetic happens on
//! timezone-aware UTC instants throughout; naive datetimes never appear
//! here. Any HH:MM provided by an upstream UI in a local display zone must
//! already be converted to UTC (using the zone's *current* offset, not a
//! cached historical one) before it reaches this module.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use thiserror::Error;

use crate::model::{ScheduleType, ScheduledJob};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("interval schedule requires interval_seconds > 0")]
    InvalidInterval,
    #[error("hourly schedule requires schedule_minute in 0..=59")]
    InvalidMinute,
    #[error("schedule_time must be \"HH:MM\", got {0:?}")]
    InvalidTime(String),
    #[error("weekly schedule requires schedule_day in 0..=6 (0=Monday)")]
    InvalidWeekday,
    #[error("monthly schedule requires schedule_day in 1..=31")]
    InvalidMonthDay,
    #[error("schedule_type {0:?} is missing a required field")]
    MissingField(ScheduleType),
}

/// Parse `"HH:MM"` into (hour, minute), both validated in range.
fn parse_hh_mm(value: &str) -> Result<(u32, u32), ScheduleError> {
    let (h, m) = value
        .split_once(':')
        .ok_or_else(|| ScheduleError::InvalidTime(value.to_string()))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(ScheduleError::InvalidTime(value.to_string()));
    }
    Ok((hour, minute))
}

/// `schedule_day` 0..=6 maps to ISO weekday, 0 = Monday. See DESIGN.md for
/// the rationale (this was unspecified in the source and decided here).
fn weekday_from_index(index: i32) -> Result<Weekday, ScheduleError> {
    match index {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        _ => Err(ScheduleError::InvalidWeekday),
    }
}

/// Compute the next UTC instant at which `job` becomes eligible, given the
/// current UTC instant `now`. Returns `None` for manual jobs (they never
/// auto-reschedule) and propagates a `ScheduleError` if the job's stored
/// fields are inconsistent with its `schedule_type`.
pub fn compute_next_run(
    job: &ScheduledJob,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match job.schedule_type {
        ScheduleType::Manual => Ok(None),
        ScheduleType::Interval => {
            let seconds = job
                .interval_seconds
                .ok_or(ScheduleError::MissingField(ScheduleType::Interval))?;
            if seconds <= 0 {
                return Err(ScheduleError::InvalidInterval);
            }
            Ok(Some(now + Duration::seconds(seconds)))
        }
        ScheduleType::Hourly => {
            let minute = job
                .schedule_minute
                .ok_or(ScheduleError::MissingField(ScheduleType::Hourly))?;
            if !(0..=59).contains(&minute) {
                return Err(ScheduleError::InvalidMinute);
            }
            Ok(Some(next_hourly(now, minute as u32)))
        }
        ScheduleType::Daily => {
            let raw = job
                .schedule_time
                .as_deref()
                .ok_or(ScheduleError::MissingField(ScheduleType::Daily))?;
            let (hour, minute) = parse_hh_mm(raw)?;
            Ok(Some(next_daily(now, hour, minute)))
        }
        ScheduleType::Weekly => {
            let raw = job
                .schedule_time
                .as_deref()
                .ok_or(ScheduleError::MissingField(ScheduleType::Weekly))?;
            let (hour, minute) = parse_hh_mm(raw)?;
            let day = job
                .schedule_day
                .ok_or(ScheduleError::MissingField(ScheduleType::Weekly))?;
            let weekday = weekday_from_index(day)?;
            Ok(Some(next_weekly(now, weekday, hour, minute)))
        }
        ScheduleType::Monthly => {
            let raw = job
                .schedule_time
                .as_deref()
                .ok_or(ScheduleError::MissingField(ScheduleType::Monthly))?;
            let (hour, minute) = parse_hh_mm(raw)?;
            let day = job
                .schedule_day
                .ok_or(ScheduleError::MissingField(ScheduleType::Monthly))?;
            if !(1..=31).contains(&day) {
                return Err(ScheduleError::InvalidMonthDay);
            }
            Ok(Some(next_monthly(now, day as u32, hour, minute)))
        }
    }
}

fn next_hourly(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    let candidate = now
        .date_naive()
        .and_hms_opt(now.hour(), minute, 0)
        .expect("minute in 0..=59 is always valid");
    let mut candidate = Utc.from_utc_datetime(&candidate);
    if candidate <= now {
        candidate += Duration::hours(1);
    }
    candidate
}

fn next_daily(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let candidate = Utc.from_utc_datetime(
        &today
            .and_time(NaiveTime::from_hms_opt(hour, minute, 0).expect("validated HH:MM")),
    );
    if candidate > now {
        candidate
    } else {
        Utc.from_utc_datetime(
            &(today + Duration::days(1))
                .and_time(NaiveTime::from_hms_opt(hour, minute, 0).expect("validated HH:MM")),
        )
    }
}

fn next_weekly(now: DateTime<Utc>, weekday: Weekday, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    for offset in 0..=7 {
        let candidate_date = today + Duration::days(offset);
        if candidate_date.weekday() != weekday {
            continue;
        }
        let candidate = Utc.from_utc_datetime(
            &candidate_date
                .and_time(NaiveTime::from_hms_opt(hour, minute, 0).expect("validated HH:MM")),
        );
        if candidate > now {
            return candidate;
        }
    }
    unreachable!("a matching weekday strictly after now exists within 7 days")
}

fn next_monthly(now: DateTime<Utc>, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let mut year = now.year();
    let mut month = now.month();
    // Bounded: `day` exists in at least one of every 4 consecutive months,
    // so this always terminates well before 48 iterations.
    for _ in 0..48 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let candidate = Utc.from_utc_datetime(
                &date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).expect("validated HH:MM")),
            );
            if candidate > now {
                return candidate;
            }
        }
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }
    unreachable!("schedule_day 1..=31 always recurs within 48 months")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_job(schedule_type: ScheduleType) -> ScheduledJob {
        ScheduledJob {
            id: 1,
            name: "test".into(),
            script_id: "test.sh".into(),
            schedule_type,
            interval_seconds: None,
            schedule_time: None,
            schedule_minute: None,
            schedule_day: None,
            is_active: true,
            next_run: None,
            last_dispatched_at: None,
            dispatch_lock_until: None,
        }
    }

    #[test]
    fn manual_never_reschedules() {
        let job = base_job(ScheduleType::Manual);
        let now = Utc::now();
        assert_eq!(compute_next_run(&job, now).unwrap(), None);
    }

    #[test]
    fn interval_adds_seconds() {
        let mut job = base_job(ScheduleType::Interval);
        job.interval_seconds = Some(120);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, now + Duration::seconds(120));
    }

    #[test]
    fn interval_rejects_non_positive() {
        let mut job = base_job(ScheduleType::Interval);
        job.interval_seconds = Some(0);
        let now = Utc::now();
        assert_eq!(
            compute_next_run(&job, now).unwrap_err(),
            ScheduleError::InvalidInterval
        );
    }

    /// Scenario A from the coordination protocol spec: daily schedule, UTC.
    #[test]
    fn scenario_a_daily_utc() {
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = Some("01:00".to_string());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 30, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap());

        // After that dispatch, "now" effectively becomes the stored next_run;
        // the following day's 01:00 must be produced, never the same instant.
        let now2 = next;
        let next2 = compute_next_run(&job, now2).unwrap().unwrap();
        assert_eq!(next2, Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap());
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_time_passed() {
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = Some("01:00".to_string());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap());
    }

    #[test]
    fn hourly_uses_minute_only() {
        let mut job = base_job(ScheduleType::Hourly);
        job.schedule_minute = Some(15);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 20, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 11, 15, 0).unwrap());

        let now2 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 5, 0).unwrap();
        let next2 = compute_next_run(&job, now2).unwrap().unwrap();
        assert_eq!(next2, Utc.with_ymd_and_hms(2025, 6, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn weekly_wraps_week_boundary() {
        let mut job = base_job(ScheduleType::Weekly);
        job.schedule_time = Some("09:00".to_string());
        job.schedule_day = Some(0); // Monday
        // 2025-06-01 is a Sunday.
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    }

    /// Scenario E: monthly with a short month skips February.
    #[test]
    fn scenario_e_monthly_short_month() {
        let mut job = base_job(ScheduleType::Monthly);
        job.schedule_time = Some("00:00".to_string());
        job.schedule_day = Some(31);
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 0, 1, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn monthly_same_month_when_day_still_ahead() {
        let mut job = base_job(ScheduleType::Monthly);
        job.schedule_time = Some("12:00".to_string());
        job.schedule_day = Some(15);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn next_run_is_never_equal_to_now() {
        // Guards the "strictly after now" edge rule: dispatching exactly at
        // the stored next_run must not return that same instant again.
        let mut job = base_job(ScheduleType::Daily);
        job.schedule_time = Some("01:00".to_string());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap();
        let next = compute_next_run(&job, now).unwrap().unwrap();
        assert_ne!(next, now);
        assert!(next > now);
    }
}
