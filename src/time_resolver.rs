//! Time resolver (C1): translates (anniversary month/day, IANA timezone, local
//! HH:MM, reference instant) into the next UTC instant a notification must fire.
//!
//! Local-to-UTC projection follows `chrono_tz`'s `LocalResult`: a DST fall-back
//! overlap resolves to the earliest of the two valid instants; a spring-forward
//! gap (no valid local instant) resolves by walking forward in one-hour steps
//! until the timezone table reports a valid offset again. Either choice keeps
//! successive `notify_utc` advances strictly increasing, which is all the
//! contract requires of gap/overlap resolution.

use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

#[derive(Debug, thiserror::Error)]
pub enum TimeResolverError {
    #[error("invalid IANA timezone: {0}")]
    InvalidTimezone(String),
    #[error("invalid local time (expected HH:MM): {0}")]
    InvalidLocalTime(String),
    #[error("invalid anniversary date: month={0} day={1}")]
    InvalidAnniversaryDate(u32, u32),
}

/// Feb 29 in a non-leap target year normalizes to Feb 28 of that year.
fn anniversary_date_for_year(
    year: i32,
    month: u32,
    day: u32,
) -> Result<NaiveDate, TimeResolverError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| {
            if month == 2 && day == 29 {
                NaiveDate::from_ymd_opt(year, 2, 28)
            } else {
                None
            }
        })
        .ok_or(TimeResolverError::InvalidAnniversaryDate(month, day))
}

fn parse_local_time(hhmm: &str) -> Result<NaiveTime, TimeResolverError> {
    NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|_| TimeResolverError::InvalidLocalTime(hhmm.to_string()))
}

/// Resolve one naive local wall-clock instant against a timezone's DST rules.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _latest) => earliest,
        LocalResult::None => {
            let mut candidate = naive;
            for _ in 0..4 {
                candidate += Duration::hours(1);
                if let LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) =
                    tz.from_local_datetime(&candidate)
                {
                    return dt;
                }
            }
            // No IANA zone has a gap wider than a few hours; this is unreachable
            // for real timezone data but keeps the function total.
            tz.from_utc_datetime(&candidate)
        }
    }
}

/// Compute the UTC instant for a specific calendar year, with no "is this in
/// the future" check. Used directly by the sender (§4.4 Phase 1), which
/// already knows the target year it is claiming.
pub fn resolve_for_year(
    month: u32,
    day: u32,
    year: i32,
    iana_tz: &str,
    local_hhmm: &str,
) -> Result<DateTime<Utc>, TimeResolverError> {
    let tz =
        Tz::from_str(iana_tz).map_err(|_| TimeResolverError::InvalidTimezone(iana_tz.to_string()))?;
    let local_time = parse_local_time(local_hhmm)?;
    let date = anniversary_date_for_year(year, month, day)?;
    let naive = NaiveDateTime::new(date, local_time);
    Ok(resolve_local(&tz, naive).with_timezone(&Utc))
}

/// `NextNotifyUtc` (§4.1): the next UTC instant strictly after `reference` at
/// which (month, day, local_hhmm) next occurs in `iana_tz`. Exact equality
/// with `reference` is not in the future; the search advances to the next
/// calendar year.
pub fn next_notify_utc(
    month: u32,
    day: u32,
    iana_tz: &str,
    local_hhmm: &str,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimeResolverError> {
    // Validate the timezone and local time once up front so a malformed
    // input fails fast rather than after an arbitrary number of year bumps.
    Tz::from_str(iana_tz).map_err(|_| TimeResolverError::InvalidTimezone(iana_tz.to_string()))?;
    parse_local_time(local_hhmm)?;

    let mut year = reference.year();
    loop {
        let candidate = resolve_for_year(month, day, year, iana_tz, local_hhmm)?;
        if candidate > reference {
            return Ok(candidate);
        }
        year += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // S1 — happy path: UTC timezone, reference exactly at the instant.
    #[test]
    fn s1_exact_equality_advances_to_next_year() {
        let reference = utc(2026, 6, 15, 9, 0, 0);
        let next = next_notify_utc(6, 15, "UTC", "09:00", reference).unwrap();
        assert_eq!(next, utc(2027, 6, 15, 9, 0, 0));
    }

    #[test]
    fn future_instant_within_same_year_is_kept() {
        let reference = utc(2026, 1, 1, 0, 0, 0);
        let next = next_notify_utc(6, 15, "UTC", "09:00", reference).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 9, 0, 0));
    }

    #[test]
    fn feb_29_normalizes_to_feb_28_in_non_leap_year() {
        // 2027 is not a leap year.
        let resolved = resolve_for_year(2, 29, 2027, "UTC", "09:00").unwrap();
        assert_eq!(resolved, utc(2027, 2, 28, 9, 0, 0));
    }

    #[test]
    fn feb_29_consecutive_advances_never_repeat() {
        let reference = utc(2027, 1, 1, 0, 0, 0);
        let first = next_notify_utc(2, 29, "UTC", "09:00", reference).unwrap();
        let second = next_notify_utc(2, 29, "UTC", "09:00", first).unwrap();
        assert!(second > first);
    }

    #[test]
    fn midnight_and_end_of_day_local_times_are_valid() {
        let reference = utc(2026, 1, 1, 0, 0, 0);
        let midnight = next_notify_utc(3, 1, "UTC", "00:00", reference).unwrap();
        let end_of_day = next_notify_utc(3, 1, "UTC", "23:59", reference).unwrap();
        assert!(midnight > reference);
        assert!(end_of_day > reference);
    }

    #[test]
    fn invalid_timezone_is_a_hard_failure() {
        let reference = utc(2026, 1, 1, 0, 0, 0);
        let err = next_notify_utc(6, 15, "Not/A_Zone", "09:00", reference).unwrap_err();
        assert!(matches!(err, TimeResolverError::InvalidTimezone(_)));
    }

    // S5 — timezone edge: Pacific/Auckland, date rolls to the prior UTC day.
    #[test]
    fn s5_extreme_offset_advances_past_reference() {
        let reference = utc(2026, 12, 31, 19, 0, 0);
        let next = next_notify_utc(12, 31, "Pacific/Auckland", "09:00", reference).unwrap();
        assert!(next > reference);
        // Local wall-clock stays Dec 31 09:00 even though the UTC date differs.
        let local = next.with_timezone(&chrono_tz::Pacific::Auckland);
        assert_eq!(local.month(), 12);
        assert_eq!(local.day(), 31);
        assert_eq!(local.hour(), 9);
    }

    // S6 — DST ambiguity: successive advances across America/New_York's
    // 2026 spring-forward strictly increase and keep the intended wall clock.
    #[test]
    fn s6_dst_spring_forward_advances_are_monotonic() {
        let reference = utc(2026, 1, 1, 0, 0, 0);
        let first = next_notify_utc(3, 8, "America/New_York", "09:00", reference).unwrap();
        let second = next_notify_utc(3, 8, "America/New_York", "09:00", first).unwrap();
        assert!(second > first);
        let local_first = first.with_timezone(&chrono_tz::America::New_York);
        let local_second = second.with_timezone(&chrono_tz::America::New_York);
        assert_eq!((local_first.month(), local_first.day(), local_first.hour()), (3, 8, 9));
        assert_eq!((local_second.month(), local_second.day(), local_second.hour()), (3, 8, 9));
        assert_eq!(local_first.year() + 1, local_second.year());
    }

    #[test]
    fn idempotent_on_its_own_output_month_day() {
        let reference = utc(2026, 1, 1, 0, 0, 0);
        let first = next_notify_utc(6, 15, "UTC", "09:00", reference).unwrap();
        let second = next_notify_utc(first.month(), first.day(), "UTC", "09:00", first).unwrap();
        assert_eq!(second, utc(2027, 6, 15, 9, 0, 0));
    }
}
