//! Date/time values
//!
//! `DateTime` and `TimeSpan` are value kinds stored as 8-byte tick
//! counts: one tick is 100 ns, dates count from 0001-01-01T00:00:00.
//! Civil-date conversion uses days-from-civil arithmetic; parsing and
//! formatting are culture-invariant (`yyyy-MM-dd HH:mm:ss` forms only).

use sable_core::error::{ErrorKind, RunResult, err};

pub const TICKS_PER_SECOND: i64 = 10_000_000;
pub const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;
pub const TICKS_PER_HOUR: i64 = 60 * TICKS_PER_MINUTE;
pub const TICKS_PER_DAY: i64 = 24 * TICKS_PER_HOUR;

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS: i64 = 719_162;

/// A calendar timestamp (ticks since 0001-01-01T00:00:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    pub ticks: i64,
}

/// A duration (ticks, possibly negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub ticks: i64,
}

impl Date {
    pub const MIN: Date = Date { ticks: 0 };

    pub fn from_ymd(year: i64, month: i64, day: i64) -> RunResult<Date> {
        Date::from_ymd_hms(year, month, day, 0, 0, 0)
    }

    pub fn from_ymd_hms(
        year: i64,
        month: i64,
        day: i64,
        hour: i64,
        minute: i64,
        second: i64,
    ) -> RunResult<Date> {
        if !(1..=9999).contains(&year)
            || !(1..=12).contains(&month)
            || day < 1
            || day > days_in_month(year, month)
            || !(0..24).contains(&hour)
            || !(0..60).contains(&minute)
            || !(0..60).contains(&second)
        {
            return Err(err(
                ErrorKind::DomainError,
                format!("invalid date {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
            ));
        }
        let days = days_from_civil(year, month, day);
        Ok(Date {
            ticks: days * TICKS_PER_DAY
                + hour * TICKS_PER_HOUR
                + minute * TICKS_PER_MINUTE
                + second * TICKS_PER_SECOND,
        })
    }

    pub fn from_unix_seconds(secs: i64) -> Date {
        Date {
            ticks: (UNIX_EPOCH_DAYS * TICKS_PER_DAY) + secs * TICKS_PER_SECOND,
        }
    }

    fn civil(&self) -> (i64, i64, i64) {
        civil_from_days(self.ticks.div_euclid(TICKS_PER_DAY))
    }

    pub fn year(&self) -> i64 {
        self.civil().0
    }

    pub fn month(&self) -> i64 {
        self.civil().1
    }

    pub fn day(&self) -> i64 {
        self.civil().2
    }

    pub fn hour(&self) -> i64 {
        self.ticks.rem_euclid(TICKS_PER_DAY) / TICKS_PER_HOUR
    }

    pub fn minute(&self) -> i64 {
        self.ticks.rem_euclid(TICKS_PER_HOUR) / TICKS_PER_MINUTE
    }

    pub fn second(&self) -> i64 {
        self.ticks.rem_euclid(TICKS_PER_MINUTE) / TICKS_PER_SECOND
    }

    /// Day of week, Sunday = 0 (0001-01-01 was a Monday).
    pub fn day_of_week(&self) -> i64 {
        (self.ticks.div_euclid(TICKS_PER_DAY) + 1).rem_euclid(7)
    }

    pub fn add_span(&self, span: Span) -> RunResult<Date> {
        let ticks = self
            .ticks
            .checked_add(span.ticks)
            .ok_or_else(|| err(ErrorKind::Overflow, "DateTime out of range"))?;
        if ticks < 0 {
            return Err(err(ErrorKind::Overflow, "DateTime out of range"));
        }
        Ok(Date { ticks })
    }

    pub fn sub_date(&self, other: Date) -> Span {
        Span {
            ticks: self.ticks - other.ticks,
        }
    }

    /// Culture-invariant parse: `yyyy-MM-dd`, `yyyy-MM-dd HH:mm:ss` or
    /// `yyyy-MM-ddTHH:mm:ss`, with an optional `.fffffff` fraction.
    pub fn parse(text: &str) -> RunResult<Date> {
        let t = text.trim();
        let bad = || err(ErrorKind::TypeMismatch, format!("'{text}' is not a DateTime"));
        let (date_part, time_part) = match t.split_once([' ', 'T']) {
            Some((d, rest)) => (d, Some(rest)),
            None => (t, None),
        };
        let mut dp = date_part.split('-');
        let year: i64 = dp.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let month: i64 = dp.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let day: i64 = dp.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        if dp.next().is_some() {
            return Err(bad());
        }
        let (mut hour, mut minute, mut second, mut frac_ticks) = (0, 0, 0, 0);
        if let Some(tp) = time_part {
            let (hms, frac) = match tp.split_once('.') {
                Some((h, f)) => (h, Some(f)),
                None => (tp, None),
            };
            let mut it = hms.split(':');
            hour = it.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
            minute = it.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
            second = it.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
            if it.next().is_some() {
                return Err(bad());
            }
            if let Some(f) = frac {
                if f.is_empty() || f.len() > 7 || !f.chars().all(|c| c.is_ascii_digit()) {
                    return Err(bad());
                }
                let digits: i64 = f.parse().map_err(|_| bad())?;
                frac_ticks = digits * 10i64.pow(7 - f.len() as u32);
            }
        }
        let base = Date::from_ymd_hms(year, month, day, hour, minute, second)
            .map_err(|_| bad())?;
        Ok(Date {
            ticks: base.ticks + frac_ticks,
        })
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (y, m, d) = self.civil();
        write!(
            f,
            "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}",
            self.hour(),
            self.minute(),
            self.second()
        )?;
        let frac = self.ticks.rem_euclid(TICKS_PER_SECOND);
        if frac != 0 {
            write!(f, ".{frac:07}")?;
        }
        Ok(())
    }
}

impl Span {
    pub const ZERO: Span = Span { ticks: 0 };

    pub fn from_hms(hours: i64, minutes: i64, seconds: i64) -> Span {
        Span {
            ticks: hours * TICKS_PER_HOUR + minutes * TICKS_PER_MINUTE + seconds * TICKS_PER_SECOND,
        }
    }

    pub fn from_days(days: i64) -> Span {
        Span {
            ticks: days * TICKS_PER_DAY,
        }
    }

    pub fn days(&self) -> i64 {
        self.ticks / TICKS_PER_DAY
    }

    pub fn hours(&self) -> i64 {
        (self.ticks % TICKS_PER_DAY) / TICKS_PER_HOUR
    }

    pub fn minutes(&self) -> i64 {
        (self.ticks % TICKS_PER_HOUR) / TICKS_PER_MINUTE
    }

    pub fn seconds(&self) -> i64 {
        (self.ticks % TICKS_PER_MINUTE) / TICKS_PER_SECOND
    }

    pub fn total_seconds(&self) -> f64 {
        self.ticks as f64 / TICKS_PER_SECOND as f64
    }

    pub fn total_milliseconds(&self) -> f64 {
        self.ticks as f64 / (TICKS_PER_SECOND / 1000) as f64
    }

    pub fn checked_add(&self, other: Span) -> RunResult<Span> {
        self.ticks
            .checked_add(other.ticks)
            .map(|ticks| Span { ticks })
            .ok_or_else(|| err(ErrorKind::Overflow, "TimeSpan out of range"))
    }

    /// Parse `[-][d.]HH:mm:ss[.fffffff]`.
    pub fn parse(text: &str) -> RunResult<Span> {
        let t = text.trim();
        let bad = || err(ErrorKind::TypeMismatch, format!("'{text}' is not a TimeSpan"));
        let (neg, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (days, rest): (i64, &str) = match t.split_once('.') {
            // A leading day component only when the tail still has colons
            Some((d, rest)) if rest.contains(':') && d.chars().all(|c| c.is_ascii_digit()) => {
                (d.parse().map_err(|_| bad())?, rest)
            }
            _ => (0, t),
        };
        let (hms, frac) = match rest.split_once('.') {
            Some((h, f)) => (h, Some(f)),
            None => (rest, None),
        };
        let mut it = hms.split(':');
        let hours: i64 = it.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let minutes: i64 = it.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let seconds: i64 = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        if it.next().is_some() {
            return Err(bad());
        }
        let mut ticks =
            days * TICKS_PER_DAY + hours * TICKS_PER_HOUR + minutes * TICKS_PER_MINUTE
                + seconds * TICKS_PER_SECOND;
        if let Some(f) = frac {
            if f.is_empty() || f.len() > 7 || !f.chars().all(|c| c.is_ascii_digit()) {
                return Err(bad());
            }
            let digits: i64 = f.parse().map_err(|_| bad())?;
            ticks += digits * 10i64.pow(7 - f.len() as u32);
        }
        Ok(Span {
            ticks: if neg { -ticks } else { ticks },
        })
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.ticks.unsigned_abs() as i64;
        if self.ticks < 0 {
            write!(f, "-")?;
        }
        let days = t / TICKS_PER_DAY;
        if days != 0 {
            write!(f, "{days}.")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}",
            (t % TICKS_PER_DAY) / TICKS_PER_HOUR,
            (t % TICKS_PER_HOUR) / TICKS_PER_MINUTE,
            (t % TICKS_PER_MINUTE) / TICKS_PER_SECOND
        )?;
        let frac = t % TICKS_PER_SECOND;
        if frac != 0 {
            write!(f, ".{frac:07}")?;
        }
        Ok(())
    }
}

fn is_leap_year(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

fn days_in_month(y: i64, m: i64) -> i64 {
    match m {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(y) => 29,
        _ => 28,
    }
}

/// Days since 0001-01-01 for a civil date (days-from-civil, rebased).
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    // The civil epoch of the algorithm is 0000-03-01; rebase to 0001-01-01
    era * 146_097 + doe - 306
}

fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 306;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = (mp + 2) % 12 + 1;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_civil_round_trip() {
        for (y, m, d) in [
            (1, 1, 1),
            (1969, 7, 20),
            (2000, 2, 29),
            (2024, 12, 31),
            (9999, 12, 31),
        ] {
            let date = Date::from_ymd(y, m, d).unwrap();
            assert_eq!((date.year(), date.month(), date.day()), (y, m, d));
        }
    }

    #[test]
    fn test_epoch_alignment() {
        let unix = Date::from_unix_seconds(0);
        assert_eq!((unix.year(), unix.month(), unix.day()), (1970, 1, 1));
        // 1970-01-01 was a Thursday
        assert_eq!(unix.day_of_week(), 4);
    }

    #[test]
    fn test_invalid_dates_rejected() {
        assert!(Date::from_ymd(2023, 2, 29).is_err());
        assert!(Date::from_ymd(2023, 13, 1).is_err());
        assert!(Date::from_ymd_hms(2023, 6, 1, 24, 0, 0).is_err());
    }

    #[test]
    fn test_parse_and_display() {
        let d = Date::parse("2024-03-05 14:30:09").unwrap();
        assert_eq!(d.to_string(), "2024-03-05 14:30:09");
        let d2 = Date::parse("2024-03-05T14:30:09.5").unwrap();
        assert_eq!(d2.ticks - d.ticks, TICKS_PER_SECOND / 2);
        assert_eq!(Date::parse("2024-03-05").unwrap().hour(), 0);
        assert!(Date::parse("05/03/2024").is_err());
    }

    #[test]
    fn test_date_arithmetic() {
        let a = Date::parse("2024-03-05 00:00:00").unwrap();
        let b = Date::parse("2024-03-07 06:00:00").unwrap();
        let span = b.sub_date(a);
        assert_eq!(span.days(), 2);
        assert_eq!(span.hours(), 6);
        assert_eq!(a.add_span(span).unwrap(), b);
    }

    #[test]
    fn test_span_parse_and_display() {
        let s = Span::parse("1.02:03:04").unwrap();
        assert_eq!((s.days(), s.hours(), s.minutes(), s.seconds()), (1, 2, 3, 4));
        assert_eq!(s.to_string(), "1.02:03:04");
        let neg = Span::parse("-00:00:30").unwrap();
        assert_eq!(neg.to_string(), "-00:00:30");
        assert_eq!(Span::from_hms(2, 3, 4).to_string(), "02:03:04");
    }
}
