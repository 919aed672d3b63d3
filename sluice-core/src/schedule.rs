//! Pipeline schedules
//!
//! Schedules are standard 5-field cron expressions evaluated in UTC with
//! minute granularity. The scheduler ticks once a minute and starts every
//! pipeline whose expression fires in the current minute.
//!
//! Day-of-week numbers follow crontab (0 and 7 are Sunday). The `cron`
//! crate counts 1-7 from Sunday, so numeric days are rewritten to names
//! before the expression reaches it.

use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parses a 5-field cron expression
pub fn parse(expr: &str) -> Result<CronSchedule, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::FieldCount(fields.len()));
    }
    let weekdays = weekday_names(fields[4])?;
    // cron crate expects a leading seconds field
    let normalized = format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], weekdays);
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron(e.to_string()))
}

fn weekday(value: &str) -> Result<usize, ScheduleError> {
    value
        .parse::<usize>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| ScheduleError::InvalidCron(format!("day of week out of range: {}", value)))
}

/// Rewrites numeric days of week (ranges, lists and steps) as day names
fn weekday_names(field: &str) -> Result<String, ScheduleError> {
    let mut items: Vec<String> = Vec::new();

    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        let named = base.chars().any(|c| c.is_ascii_alphabetic());
        if named || (matches!(base, "*" | "?") && step.is_none()) {
            items.push(item.to_string());
            continue;
        }

        let step = match step {
            Some(step) => step
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ScheduleError::InvalidCron(format!("invalid step: {}", item)))?,
            None => 1,
        };
        let (start, end) = match base.split_once('-') {
            _ if matches!(base, "*" | "?") => (0, 7),
            Some((from, to)) => (weekday(from)?, weekday(to)?),
            None if step > 1 => (weekday(base)?, 7),
            None => {
                let day = weekday(base)?;
                (day, day)
            }
        };
        if start > end {
            return Err(ScheduleError::InvalidCron(format!("inverted range: {}", item)));
        }

        for day in (start..=end).step_by(step) {
            let name = WEEKDAYS[day % 7].to_string();
            if !items.contains(&name) {
                items.push(name);
            }
        }
    }

    Ok(items.join(","))
}

/// Start of the minute containing `at`
pub fn minute_of(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(at)
}

/// Whether `expr` fires during the minute containing `now`
pub fn is_due(expr: &str, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
    let schedule = parse(expr)?;
    let minute = minute_of(now);
    Ok(schedule
        .after(&(minute - Duration::seconds(1)))
        .next()
        .is_some_and(|next| next == minute))
}

/// Next firing strictly after `after`
pub fn next_after(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(parse(expr)?.after(&after).next())
}
