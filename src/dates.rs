use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";
const DATE_ONLY: &str = "%Y-%m-%d";

/// Anything that can be reduced to a calendar day in a given frame.
pub trait CalendarInput {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate>;
}

impl CalendarInput for NaiveDate {
    fn calendar_day(&self, _frame: &FixedOffset) -> Option<NaiveDate> {
        Some(*self)
    }
}

impl CalendarInput for DateTime<Utc> {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        Some(self.with_timezone(frame).date_naive())
    }
}

impl CalendarInput for DateTime<FixedOffset> {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        Some(self.with_timezone(frame).date_naive())
    }
}

impl CalendarInput for str {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        let value = self.trim();
        if value.is_empty() {
            return None;
        }
        // A bare date is already a calendar day; shifting it would break idempotence.
        if let Ok(date) = NaiveDate::parse_from_str(value, DATE_ONLY) {
            return Some(date);
        }
        parse_database_date(value).and_then(|instant| instant.calendar_day(frame))
    }
}

impl CalendarInput for String {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        self.as_str().calendar_day(frame)
    }
}

impl<T: CalendarInput + ?Sized> CalendarInput for &T {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        (**self).calendar_day(frame)
    }
}

impl<T: CalendarInput> CalendarInput for Option<T> {
    fn calendar_day(&self, frame: &FixedOffset) -> Option<NaiveDate> {
        self.as_ref().and_then(|value| value.calendar_day(frame))
    }
}

/// Truncates a date-like value to the calendar day it falls on in `frame`.
///
/// Returns `None` for empty or unparseable input. Normalizing an already
/// normalized value returns it unchanged.
pub fn normalize_date_only<T: CalendarInput + ?Sized>(
    value: &T,
    frame: &FixedOffset,
) -> Option<NaiveDate> {
    value.calendar_day(frame)
}

/// Parses a stored timestamp. Values containing `T` are ISO 8601; anything
/// else is treated as a SQLite `DATETIME`, which is always UTC.
pub fn parse_database_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains('T') {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(parsed.with_timezone(&Utc));
        }
        // "2025-12-05T15:00:00" without an offset
        return NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive));
    }

    NaiveDateTime::parse_from_str(value, SQLITE_DATETIME)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Resolves a client-reported timezone to the offset in effect at `at`.
///
/// Lookup order: IANA database, the legacy city-name table, an explicit
/// offset string, then UTC.
pub fn resolve_offset(timezone: Option<&str>, at: DateTime<Utc>) -> FixedOffset {
    let utc = Utc.fix();
    let Some(name) = timezone.map(str::trim).filter(|name| !name.is_empty()) else {
        return utc;
    };

    if let Ok(tz) = name.parse::<Tz>() {
        return tz.offset_from_utc_datetime(&at.naive_utc()).fix();
    }

    legacy_zone_offset(name)
        .or_else(|| parse_offset(name))
        .unwrap_or(utc)
}

// Known zones the first web client reported before IANA names were sent.
const LEGACY_ZONES: &[(&str, i32)] = &[
    ("seoul", 9 * 3600),
    ("tokyo", 9 * 3600),
    ("shanghai", 8 * 3600),
    ("singapore", 8 * 3600),
    ("kolkata", 5 * 3600 + 1800),
    ("berlin", 3600),
    ("paris", 3600),
    ("london", 0),
    ("utc", 0),
    ("new_york", -5 * 3600),
    ("chicago", -6 * 3600),
    ("denver", -7 * 3600),
    ("los_angeles", -8 * 3600),
];

fn legacy_zone_offset(name: &str) -> Option<FixedOffset> {
    let lowered = name.to_ascii_lowercase().replace(' ', "_");
    LEGACY_ZONES
        .iter()
        .find(|(city, _)| lowered.contains(city))
        .and_then(|(_, seconds)| FixedOffset::east_opt(*seconds))
}

/// Parses `Z`, `+09:00`, `-0530` or `UTC+9` style offsets.
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let value = value
        .strip_prefix("UTC")
        .or_else(|| value.strip_prefix("GMT"))
        .unwrap_or(value);
    if value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => (rest.get(..2)?, rest.get(2..)?),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// The client's reported "now", or the server clock when absent or invalid.
pub fn client_now(reported: Option<&str>) -> DateTime<Utc> {
    reported
        .and_then(parse_database_date)
        .unwrap_or_else(Utc::now)
}

/// A record made before `today` in the client's frame.
pub fn is_past_record(created_at: &DateTime<Utc>, today: NaiveDate, frame: &FixedOffset) -> bool {
    created_at.with_timezone(frame).date_naive() < today
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_ONLY).to_string()
}
