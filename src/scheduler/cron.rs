//! Five-field POSIX cron expressions.
//!
//! `minute hour day-of-month month day-of-week` with `*`, lists, ranges,
//! `*/n`, `a-b/n`, and named months/weekdays. When both day-of-month and
//! day-of-week are restricted they combine with OR, matching classic cron.
//! `next_run` performs a full forward search bounded at two years, evaluated
//! in the job's timezone.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::errors::ScheduleError;

const MONTH_NAMES: &[(&str, u8)] = &[
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const DAY_NAMES: &[(&str, u8)] = &[
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

/// One parsed cron field: the set of allowed values plus whether the field
/// was written as an unrestricted `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    allowed: Vec<bool>,
    unrestricted: bool,
    min: u8,
}

impl Field {
    fn contains(&self, value: u8) -> bool {
        self.allowed
            .get((value - self.min) as usize)
            .copied()
            .unwrap_or(false)
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    /// Parse an expression like `"0 9 * * MON"`.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidSchedule(format!(
                "expected 5 fields, got {} in '{}'",
                fields.len(),
                expr
            )));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59, &[])?,
            hour: parse_field(fields[1], 0, 23, &[])?,
            day_of_month: parse_field(fields[2], 1, 31, &[])?,
            month: parse_field(fields[3], 1, 12, MONTH_NAMES)?,
            day_of_week: parse_field(fields[4], 0, 6, DAY_NAMES)?,
        })
    }

    /// Whether the expression matches the given local time (seconds ignored).
    pub fn matches<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        if !self.minute.contains(at.minute() as u8)
            || !self.hour.contains(at.hour() as u8)
            || !self.month.contains(at.month() as u8)
        {
            return false;
        }
        self.matches_day(at)
    }

    /// Day match with classic-cron OR semantics: when both day fields are
    /// restricted, either one matching fires the job.
    fn matches_day<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        let dom = self.day_of_month.contains(at.day() as u8);
        let dow = self
            .day_of_week
            .contains(at.weekday().num_days_from_sunday() as u8);

        match (
            self.day_of_month.unrestricted,
            self.day_of_week.unrestricted,
        ) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// Next fire time strictly after `after`, in `tz`, as UTC.
    ///
    /// Walks forward to the next whole minute and searches at most two
    /// years; `None` means the expression never fires in that window
    /// (e.g. Feb 30).
    pub fn next_run(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz);
        // Advance past `after`, truncated to the whole minute.
        let mut candidate = (local + Duration::minutes(1))
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?;
        let horizon = local + Duration::days(366 * 2);

        while candidate <= horizon {
            if !self.month.contains(candidate.month() as u8) || !self.matches_day(&candidate) {
                // Skip to the next day's first minute.
                let next_day = candidate.date_naive().succ_opt()?;
                candidate = match tz
                    .with_ymd_and_hms(next_day.year(), next_day.month(), next_day.day(), 0, 0, 0)
                {
                    chrono::LocalResult::Single(t) => t,
                    // DST gap at midnight: take the earliest valid instant.
                    chrono::LocalResult::Ambiguous(t, _) => t,
                    chrono::LocalResult::None => {
                        (candidate + Duration::days(1)).with_second(0)?
                    }
                };
                continue;
            }
            if self.hour.contains(candidate.hour() as u8)
                && self.minute.contains(candidate.minute() as u8)
            {
                return Some(candidate.with_timezone(&Utc));
            }
            candidate = candidate + Duration::minutes(1);
        }
        None
    }
}

/// Parse one field: `*`, `*/n`, comma lists of values, ranges, and stepped
/// ranges, with optional names.
fn parse_field(
    spec: &str,
    min: u8,
    max: u8,
    names: &[(&str, u8)],
) -> Result<Field, ScheduleError> {
    let size = (max - min + 1) as usize;
    let mut allowed = vec![false; size];
    let unrestricted = spec == "*";

    for part in spec.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u8 = s.parse().map_err(|_| {
                    ScheduleError::InvalidSchedule(format!("bad step '{}'", s))
                })?;
                if step == 0 {
                    return Err(ScheduleError::InvalidSchedule("step of 0".into()));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (
                parse_value(a, min, max, names)?,
                parse_value(b, min, max, names)?,
            )
        } else {
            let v = parse_value(range_part, min, max, names)?;
            // A bare value with a step (`5/15`) ranges to the max, per cron.
            if step > 1 {
                (v, max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(ScheduleError::InvalidSchedule(format!(
                "inverted range '{}'",
                part
            )));
        }

        let mut v = lo;
        while v <= hi {
            allowed[(v - min) as usize] = true;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }

    Ok(Field {
        allowed,
        unrestricted,
        min,
    })
}

fn parse_value(s: &str, min: u8, max: u8, names: &[(&str, u8)]) -> Result<u8, ScheduleError> {
    let lower = s.trim().to_lowercase();
    if let Some(&(_, v)) = names.iter().find(|(name, _)| *name == lower) {
        return Ok(v);
    }
    let v: u8 = lower
        .parse()
        .map_err(|_| ScheduleError::InvalidSchedule(format!("bad value '{}'", s)))?;
    // Day-of-week 7 is Sunday in many crontabs.
    if max == 6 && v == 7 {
        return Ok(0);
    }
    if v < min || v > max {
        return Err(ScheduleError::InvalidSchedule(format!(
            "value {} out of range {}-{}",
            v, min, max
        )));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("* * * 13 *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn test_every_minute() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 12, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 12, 1));
    }

    #[test]
    fn test_fixed_time_daily() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 10, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 9, 30));
    }

    #[test]
    fn test_next_run_is_strictly_after() {
        // Exactly at the fire time, the next run is the following day.
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 9, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 9, 0));
    }

    #[test]
    fn test_step_values() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 12, 1), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 12, 15));
    }

    #[test]
    fn test_range_with_step() {
        let expr = CronExpr::parse("10-40/10 * * * *").unwrap();
        assert!(expr.matches(&utc(2026, 1, 1, 0, 10)));
        assert!(expr.matches(&utc(2026, 1, 1, 0, 30)));
        assert!(!expr.matches(&utc(2026, 1, 1, 0, 15)));
        assert!(!expr.matches(&utc(2026, 1, 1, 0, 50)));
    }

    #[test]
    fn test_lists() {
        let expr = CronExpr::parse("0 8,12,18 * * *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 9, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 12, 0));
    }

    #[test]
    fn test_named_month_and_day() {
        let expr = CronExpr::parse("0 9 * JAN mon").unwrap();
        assert!(expr.matches(&utc(2026, 1, 5, 9, 0))); // first Monday of Jan 2026
        assert!(!expr.matches(&utc(2026, 2, 2, 9, 0)));
    }

    #[test]
    fn test_sunday_as_seven() {
        let expr = CronExpr::parse("0 9 * * 7").unwrap();
        // 2026-03-01 is a Sunday.
        assert!(expr.matches(&utc(2026, 3, 1, 9, 0)));
    }

    #[test]
    fn test_dom_dow_or_semantics() {
        // Fires on the 13th OR on Fridays.
        let expr = CronExpr::parse("0 0 13 * FRI").unwrap();
        // 2026-03-06 is a Friday (not the 13th).
        assert!(expr.matches(&utc(2026, 3, 6, 0, 0)));
        // 2026-03-13 is both.
        assert!(expr.matches(&utc(2026, 3, 13, 0, 0)));
        // 2026-04-13 is a Monday (13th, not Friday).
        assert!(expr.matches(&utc(2026, 4, 13, 0, 0)));
        // 2026-03-12 is a Thursday, not the 13th.
        assert!(!expr.matches(&utc(2026, 3, 12, 0, 0)));
    }

    #[test]
    fn test_dom_only_restricted() {
        let expr = CronExpr::parse("0 0 13 * *").unwrap();
        assert!(expr.matches(&utc(2026, 3, 13, 0, 0)));
        assert!(!expr.matches(&utc(2026, 3, 6, 0, 0)));
    }

    #[test]
    fn test_seoul_mondays_across_dst_elsewhere() {
        // "0 9 * * MON" in Asia/Seoul next-runs on successive Mondays 09:00
        // local, unaffected by DST transitions in other zones.
        let tz: Tz = "Asia/Seoul".parse().unwrap();
        let expr = CronExpr::parse("0 9 * * MON").unwrap();

        // Start the Friday before the US DST transition of 2026-03-08.
        let mut after = utc(2026, 3, 6, 0, 0);
        let mut mondays = Vec::new();
        for _ in 0..3 {
            let next = expr.next_run(after, tz).unwrap();
            mondays.push(next);
            after = next;
        }

        for next in &mondays {
            let local = next.with_timezone(&tz);
            assert_eq!(local.weekday(), chrono::Weekday::Mon);
            assert_eq!((local.hour(), local.minute()), (9, 0));
        }
        // Successive Mondays are exactly 7 days apart in Seoul (no DST).
        assert_eq!(
            mondays[1].signed_duration_since(mondays[0]),
            Duration::days(7)
        );
        assert_eq!(
            mondays[2].signed_duration_since(mondays[1]),
            Duration::days(7)
        );
        let first = mondays[0].with_timezone(&tz).date_naive();
        assert_eq!(first, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
    }

    #[test]
    fn test_timezone_offset_applies() {
        let tz: Tz = "Asia/Seoul".parse().unwrap();
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        // 2026-03-01 05:00 UTC is 14:00 in Seoul, so the next 09:00 local is
        // 2026-03-02 00:00 UTC.
        let next = expr.next_run(utc(2026, 3, 1, 5, 0), tz).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 0, 0));
    }

    #[test]
    fn test_impossible_date_returns_none() {
        // February 30th never exists; the two-year search gives up.
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_run(utc(2026, 1, 1, 0, 0), Tz::UTC).is_none());
    }

    #[test]
    fn test_rare_date_found_within_two_years() {
        // Feb 29 exists in 2028.
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        let next = expr.next_run(utc(2026, 3, 1, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0));
    }

    #[test]
    fn test_full_search_not_next_minute_fallback() {
        // A complex expression whose next fire is days away must resolve to
        // the true time, not fall back to "next minute".
        let expr = CronExpr::parse("30 4 1 * MON").unwrap();
        let after = utc(2026, 3, 3, 0, 0); // Tuesday
        let next = expr.next_run(after, Tz::UTC).unwrap();
        // Next match: Monday 2026-03-09 04:30 (dow branch of the OR).
        assert_eq!(next, utc(2026, 3, 9, 4, 30));
        assert_ne!(next, after + Duration::minutes(1));
    }
}
