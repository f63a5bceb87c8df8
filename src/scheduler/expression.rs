//! Cron expression compilation
//!
//! Subscriptions use the standard five-field syntax
//! (`minute hour day-of-month month day-of-week`). The `cron` crate expects a
//! leading seconds field and numbers weekdays differently, so five-field
//! expressions are rewritten before parsing:
//!
//! - a `0` seconds field is prepended
//! - numeric weekdays (`0`/`7` = Sunday) are expanded to day names
//! - `@hourly`, `@daily`, ... descriptors are expanded to explicit fields
//!
//! Six- and seven-field expressions are passed through unchanged.
//!
//! When both day-of-month and day-of-week are restricted, standard cron fires
//! on either match while the `cron` crate requires both. Such expressions
//! compile into two schedules, one per day field, and the earlier fire time
//! wins.

use chrono::{DateTime, Local};
use cron::Schedule;
use std::str::FromStr;

use super::error::{SchedulerError, SchedulerResult};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Day-of-month and day-of-week positions in a normalized expression
const DOM_FIELD: usize = 3;
const DOW_FIELD: usize = 5;

/// A compiled cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Next fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&now).next())
            .min()
    }
}

/// Compile a cron expression
pub fn compile(expression: &str) -> SchedulerResult<CronSchedule> {
    let normalized = normalize(expression)?;

    let variants = if day_fields_restricted(expression) {
        let fields: Vec<&str> = normalized.split_whitespace().collect();
        let mut by_month_day = fields.clone();
        by_month_day[DOW_FIELD] = "*";
        let mut by_week_day = fields;
        by_week_day[DOM_FIELD] = "*";
        vec![by_month_day.join(" "), by_week_day.join(" ")]
    } else {
        vec![normalized]
    };

    let schedules = variants
        .iter()
        .map(|variant| {
            Schedule::from_str(variant)
                .map_err(|e| SchedulerError::invalid_cron(expression.trim(), e.to_string()))
        })
        .collect::<SchedulerResult<Vec<_>>>()?;
    Ok(CronSchedule { schedules })
}

/// Next fire time strictly after `now`; `None` once the schedule is exhausted
pub fn next_after(schedule: &CronSchedule, now: DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.next_after(now)
}

/// Both day fields restricted, judged on the expression as written
fn day_fields_restricted(expression: &str) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let (dom, dow) = match fields.len() {
        5 => (fields[2], fields[4]),
        6 | 7 => (fields[DOM_FIELD], fields[DOW_FIELD]),
        _ => return false,
    };
    let restricted = |field: &str| !field.starts_with('*') && !field.starts_with('?');
    restricted(dom) && restricted(dow)
}

/// Rewrite an expression into the syntax understood by the `cron` crate
pub fn normalize(expression: &str) -> SchedulerResult<String> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(SchedulerError::EmptyExpression);
    }

    if expression.starts_with('@') {
        let expanded = match expression.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * Sun",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            _ => {
                return Err(SchedulerError::invalid_cron(
                    expression,
                    "unsupported descriptor",
                ))
            }
        };
        return Ok(expanded.to_string());
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = normalize_day_of_week(expression, fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(SchedulerError::invalid_cron(
            expression,
            format!("expected 5 fields, found {n}"),
        )),
    }
}

fn normalize_day_of_week(expression: &str, field: &str) -> SchedulerResult<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = |reason: &str| SchedulerError::invalid_cron(expression, reason.to_string());
    let mut days: Vec<&str> = Vec::new();
    let mut named: Vec<&str> = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let Some((start, end)) = parse_day_range(range, step.is_some()) else {
            // Day names and anything else the cron crate understands natively
            named.push(item);
            continue;
        };

        if start > 7 || end > 7 {
            return Err(invalid("day of week must be between 0 and 7"));
        }
        if start > end {
            return Err(invalid("day of week range is reversed"));
        }

        let step = match step {
            Some(step) => step
                .parse::<usize>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| invalid("day of week step must be a positive number"))?,
            None => 1,
        };

        for day in (start..=end).step_by(step) {
            let name = DAY_NAMES[day % 7];
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }

    days.extend(named);
    Ok(days.join(","))
}

fn parse_day_range(range: &str, stepped: bool) -> Option<(usize, usize)> {
    if range == "*" {
        return Some((0, 6));
    }
    if let Some((start, end)) = range.split_once('-') {
        return Some((start.parse().ok()?, end.parse().ok()?));
    }
    let start: usize = range.parse().ok()?;
    // "n/s" runs from n to the end of the week
    Some((start, if stepped { 6 } else { start }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_prepends_seconds() {
        assert_eq!(normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize("  0 3 * * *  ").unwrap(), "0 0 3 * * *");
    }

    #[test]
    fn test_six_fields_pass_through() {
        assert_eq!(normalize("*/2 * * * * *").unwrap(), "*/2 * * * * *");
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(normalize("@daily").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize("@Hourly").unwrap(), "0 0 * * * *");
        assert!(normalize("@every 5m").is_err());
    }

    #[test]
    fn test_day_of_week_numbers() {
        assert_eq!(normalize("0 0 * * 0").unwrap(), "0 0 0 * * Sun");
        assert_eq!(normalize("0 0 * * 7").unwrap(), "0 0 0 * * Sun");
        assert_eq!(
            normalize("0 0 * * 1-5").unwrap(),
            "0 0 0 * * Mon,Tue,Wed,Thu,Fri"
        );
        assert_eq!(normalize("0 0 * * 5-7").unwrap(), "0 0 0 * * Fri,Sat,Sun");
        assert_eq!(normalize("0 0 * * */2").unwrap(), "0 0 0 * * Sun,Tue,Thu,Sat");
        assert_eq!(normalize("0 0 * * MON-FRI").unwrap(), "0 0 0 * * MON-FRI");
    }

    #[test]
    fn test_day_of_week_errors() {
        assert!(normalize("0 0 * * 8").is_err());
        assert!(normalize("0 0 * * 5-1").is_err());
        assert!(normalize("0 0 * * */0").is_err());
    }

    #[test]
    fn test_field_count() {
        assert!(matches!(
            normalize("* * *"),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert_eq!(normalize(""), Err(SchedulerError::EmptyExpression));
    }

    #[test]
    fn test_compile_and_next() {
        let schedule = compile("30 6 * * *").unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();

        let next = next_after(&schedule, now).unwrap();
        assert_eq!(next.day(), 2);
        assert_eq!((next.hour(), next.minute(), next.second()), (6, 30, 0));
        assert!(next > now);
    }

    #[test]
    fn test_weekday_schedule() {
        // 2024-05-04 is a Saturday
        let schedule = compile("0 9 * * 1").unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap();

        let next = next_after(&schedule, now).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 6);
    }

    #[test]
    fn test_day_fields_match_either() {
        // 1st of the month or any Monday; 2024-05-02 is a Thursday
        let schedule = compile("0 0 1 * 1").unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let next = next_after(&schedule, now).unwrap();
        assert_eq!((next.month(), next.day()), (5, 6));

        // 2024-05-27 is a Monday; June 1st comes before the next Monday
        let now = Local.with_ymd_and_hms(2024, 5, 27, 12, 0, 0).unwrap();
        let next = next_after(&schedule, now).unwrap();
        assert_eq!((next.month(), next.day()), (6, 1));
    }

    #[test]
    fn test_single_day_field_not_split() {
        assert!(!day_fields_restricted("0 0 * * 1"));
        assert!(!day_fields_restricted("0 0 1 * *"));
        assert!(!day_fields_restricted("0 0 1 * */2"));
        assert!(day_fields_restricted("0 0 1,15 * MON"));
        assert!(!day_fields_restricted("@weekly"));

        // stepped day-of-week stays unrestricted after expansion to names
        let schedule = compile("0 0 13 * */2").unwrap();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let next = next_after(&schedule, now).unwrap();
        assert_eq!(next.day(), 13);
    }

    #[test]
    fn test_compile_rejects_garbage() {
        assert!(compile("not a cron expr").is_err());
        assert!(compile("61 * * * *").is_err());
    }
}
