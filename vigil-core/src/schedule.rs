//! Recurrence math for schedules.
//!
//! All instants are stored in UTC. Month-based periods use calendar-aware
//! arithmetic rather than a fixed day count, with the day-of-month clamped
//! to the target month's length. The schedule's timezone enters only
//! through [`elapsed_into_period`], which shifts instants by the stored UTC
//! offset before taking the window modulus.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use vigil_model::RecurrencePeriod;

/// Whole calendar months between `earlier` and `later`. Partial months do
/// not count: one month from Jan 31 is complete only once Feb has run out.
pub fn months_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    if later < earlier {
        return 0;
    }
    let mut months = i64::from(later.year() - earlier.year()) * 12
        + i64::from(later.month() as i32 - earlier.month() as i32);
    if months > 0 && add_months(earlier, months) > later {
        months -= 1;
    }
    months.max(0)
}

/// Add calendar months, clamping the day to the target month's length so
/// Jan 31 + 1 month lands on the last day of February.
pub fn add_months(instant: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let zero_based = i64::from(instant.year()) * 12 + i64::from(instant.month0());
    let target = zero_based + months;
    let year = target.div_euclid(12) as i32;
    let month = target.rem_euclid(12) as u32 + 1;
    let day = instant.day().min(days_in_month(year, month));

    match Utc.with_ymd_and_hms(
        year,
        month,
        day,
        instant.time().hour(),
        instant.time().minute(),
        instant.time().second(),
    ) {
        chrono::LocalResult::Single(result) => result,
        // UTC has no gaps or folds; anything else means the arithmetic
        // above produced an impossible date.
        _ => instant,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Next occurrence of a schedule strictly after `now`.
///
/// `first` not yet reached returns `first` unchanged. Without a period the
/// schedule fires once: `None` disables it. The result is always `≥ first`
/// and, for periodic schedules, `> now`.
pub fn next_time(
    first: DateTime<Utc>,
    period: Option<RecurrencePeriod>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if first >= now {
        return Some(first);
    }

    match period {
        None => None,
        Some(RecurrencePeriod::Seconds(seconds)) => {
            let period = i64::try_from(seconds).ok().filter(|p| *p > 0)?;
            let elapsed = (now - first).num_seconds();
            let periods = elapsed / period + 1;
            Some(first + Duration::seconds(periods * period))
        }
        Some(RecurrencePeriod::Months(months)) => {
            let months = i64::from(months);
            if months == 0 {
                return None;
            }
            let blocks = months_between(first, now) / months;
            // The floor block may already lie past `now` when the month
            // difference is not block-aligned; prefer it, else the next one.
            let candidate = add_months(first, blocks * months);
            if candidate > now {
                Some(candidate)
            } else {
                Some(add_months(first, (blocks + 1) * months))
            }
        }
    }
}

/// How far `now` is into the schedule's current period, measured in the
/// schedule's local wall time via its UTC offset. Used for the
/// duration-window check: a start due longer than the window after the
/// period boundary is skipped.
pub fn elapsed_into_period(
    first: DateTime<Utc>,
    period: Option<RecurrencePeriod>,
    now: DateTime<Utc>,
    utc_offset_secs: i32,
) -> Duration {
    let offset = Duration::seconds(i64::from(utc_offset_secs));
    let first_local = first + offset;
    let now_local = now + offset;
    if now_local <= first_local {
        return Duration::zero();
    }

    match period {
        None => now_local - first_local,
        Some(RecurrencePeriod::Seconds(seconds)) => {
            let Ok(period) = i64::try_from(seconds) else {
                return Duration::zero();
            };
            if period <= 0 {
                return Duration::zero();
            }
            Duration::seconds((now_local - first_local).num_seconds() % period)
        }
        Some(RecurrencePeriod::Months(months)) => {
            let months = i64::from(months).max(1);
            let blocks = months_between(first_local, now_local) / months;
            now_local - add_months(first_local, blocks * months)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn future_first_time_is_returned_unchanged() {
        let first = utc(2026, 9, 1, 8, 0, 0);
        let now = utc(2026, 8, 7, 12, 0, 0);
        assert_eq!(
            next_time(first, Some(RecurrencePeriod::Seconds(3600)), now),
            Some(first)
        );
        assert_eq!(next_time(first, None, now), Some(first));
    }

    #[test]
    fn one_shot_past_schedule_disables() {
        let first = utc(2026, 8, 1, 8, 0, 0);
        let now = utc(2026, 8, 7, 12, 0, 0);
        assert_eq!(next_time(first, None, now), None);
    }

    #[test]
    fn seconds_period_lands_strictly_after_now() {
        let first = utc(2026, 8, 7, 0, 0, 0);
        let now = utc(2026, 8, 7, 10, 30, 0);
        let next = next_time(first, Some(RecurrencePeriod::Seconds(3600)), now).unwrap();
        assert_eq!(next, utc(2026, 8, 7, 11, 0, 0));
        // Idempotent for the same `now`, bounded below by `now - period`.
        assert_eq!(
            next_time(first, Some(RecurrencePeriod::Seconds(3600)), now),
            Some(next)
        );
        assert!(next > now);
        assert!(next >= first);
    }

    #[test]
    fn seconds_period_exactly_on_boundary() {
        let first = utc(2026, 8, 7, 0, 0, 0);
        let now = utc(2026, 8, 7, 1, 0, 0);
        // `now` sits exactly on a boundary: the next fire is one period on.
        let next = next_time(first, Some(RecurrencePeriod::Seconds(3600)), now).unwrap();
        assert_eq!(next, utc(2026, 8, 7, 2, 0, 0));
    }

    #[test]
    fn month_period_is_calendar_aware() {
        let first = utc(2026, 1, 31, 9, 0, 0);
        let now = utc(2026, 2, 10, 0, 0, 0);
        let next = next_time(first, Some(RecurrencePeriod::Months(1)), now).unwrap();
        // Jan 31 + 1 month clamps to Feb 28.
        assert_eq!(next, utc(2026, 2, 28, 9, 0, 0));
    }

    #[test]
    fn month_recurrence_is_monotonic() {
        let first = utc(2025, 3, 15, 6, 0, 0);
        let period = Some(RecurrencePeriod::Months(2));
        let mut now = utc(2026, 8, 7, 12, 0, 0);
        let mut previous = next_time(first, period, now).unwrap();
        for _ in 0..12 {
            now = previous + Duration::seconds(1);
            let next = next_time(first, period, now).unwrap();
            assert!(next > previous, "{next} should exceed {previous}");
            previous = next;
        }
    }

    #[test]
    fn months_between_counts_whole_months_only() {
        let first = utc(2026, 1, 31, 12, 0, 0);
        assert_eq!(months_between(first, utc(2026, 2, 27, 12, 0, 0)), 0);
        assert_eq!(months_between(first, utc(2026, 2, 28, 12, 0, 0)), 1);
        assert_eq!(months_between(first, utc(2026, 3, 30, 12, 0, 0)), 1);
        assert_eq!(months_between(first, utc(2026, 3, 31, 12, 0, 0)), 2);
        assert_eq!(months_between(first, utc(2025, 1, 1, 0, 0, 0)), 0);
    }

    #[test]
    fn add_months_clamps_and_crosses_years() {
        assert_eq!(
            add_months(utc(2026, 1, 31, 9, 0, 0), 1),
            utc(2026, 2, 28, 9, 0, 0)
        );
        assert_eq!(
            add_months(utc(2024, 1, 31, 9, 0, 0), 1),
            utc(2024, 2, 29, 9, 0, 0)
        );
        assert_eq!(
            add_months(utc(2026, 11, 30, 9, 0, 0), 3),
            utc(2027, 2, 28, 9, 0, 0)
        );
    }

    #[test]
    fn elapsed_into_period_wraps_at_the_boundary() {
        let first = utc(2026, 8, 7, 0, 0, 0);
        let period = Some(RecurrencePeriod::Seconds(3600));
        assert_eq!(
            elapsed_into_period(first, period, utc(2026, 8, 7, 2, 10, 0), 0),
            Duration::seconds(600)
        );
        assert_eq!(
            elapsed_into_period(first, period, utc(2026, 8, 7, 2, 0, 0), 0),
            Duration::zero()
        );
    }

    #[test]
    fn utc_offset_shifts_the_window_origin() {
        // A schedule anchored at local midnight one hour east of UTC.
        let first = utc(2026, 8, 6, 23, 0, 0);
        let period = Some(RecurrencePeriod::Seconds(86_400));
        let elapsed = elapsed_into_period(first, period, utc(2026, 8, 7, 23, 30, 0), 3600);
        assert_eq!(elapsed, Duration::seconds(1800));
    }
}
