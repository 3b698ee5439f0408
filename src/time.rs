//! CF-convention time axes.
//!
//! A time array carries a `units` attribute such as `"days since 2005-1-1"`
//! (or the packed form `"day as %Y%m%d"`) and an optional `calendar`.
//! Raw values are decoded to [TimeLabel]s, whose years are what panels
//! showing different models are aligned on.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, TimeDelta};

/// Offsets further than this from the epoch are treated as garbage.
const MAX_ABS_DAYS: f64 = 1.0e8;

/// Year-literal fallback bounds for axes without usable units.
const LITERAL_YEAR_MIN: f64 = 1000.0;
const LITERAL_YEAR_MAX: f64 = 3000.0;

const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Calendar {
    /// Proleptic Gregorian; also `gregorian` and `proleptic_gregorian`.
    Standard,
    Julian,
    /// The default when no calendar is declared.
    #[default]
    NoLeap365,
    AllLeap366,
    Day360,
}

impl Calendar {
    pub fn parse(name: &str) -> Option<Self> {
        let cal = match name.trim().to_ascii_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" => Calendar::Standard,
            "julian" => Calendar::Julian,
            "noleap" | "no_leap" | "365_day" => Calendar::NoLeap365,
            "all_leap" | "366_day" => Calendar::AllLeap366,
            "360_day" => Calendar::Day360,
            _ => return None,
        };
        Some(cal)
    }

    /// Resolve a `calendar` attribute, falling back to the default for
    /// missing or unknown names.
    pub fn from_attribute(name: Option<&str>) -> Self {
        match name {
            None => Calendar::default(),
            Some(n) => Calendar::parse(n).unwrap_or_else(|| {
                log::warn!("unknown calendar {n:?}, assuming {:?}", Calendar::default());
                Calendar::default()
            }),
        }
    }

    pub fn is_leap_year(&self, year: i32) -> bool {
        match self {
            Calendar::Standard => (year % 4 == 0 && year % 100 != 0) || year % 400 == 0,
            Calendar::Julian => year.rem_euclid(4) == 0,
            Calendar::NoLeap365 | Calendar::Day360 => false,
            Calendar::AllLeap366 => true,
        }
    }

    pub fn days_in_month(&self, year: i32, month: u32) -> u32 {
        if let Calendar::Day360 = self {
            return 30;
        }
        match month {
            2 if self.is_leap_year(year) => 29,
            1..=12 => MONTH_DAYS[month as usize - 1],
            _ => 0,
        }
    }

    /// Days and years in one repeat of the calendar's leap pattern.
    fn cycle(&self) -> (i64, i64) {
        match self {
            Calendar::Standard => (146_097, 400),
            Calendar::Julian => (1461, 4),
            Calendar::NoLeap365 => (365, 1),
            Calendar::AllLeap366 => (366, 1),
            Calendar::Day360 => (360, 1),
        }
    }

    /// Days from 0000-01-01 to the start of `year`.
    fn days_before_year(&self, year: i64) -> i64 {
        match self {
            Calendar::NoLeap365 => 365 * year,
            Calendar::AllLeap366 => 366 * year,
            Calendar::Day360 => 360 * year,
            Calendar::Julian => 365 * year + (year + 3).div_euclid(4),
            Calendar::Standard => {
                365 * year + (year + 3).div_euclid(4) - (year + 99).div_euclid(100)
                    + (year + 399).div_euclid(400)
            }
        }
    }

    fn day_number(&self, date: CalendarDate) -> i64 {
        let before_month: i64 = (1..date.month)
            .map(|m| self.days_in_month(date.year, m) as i64)
            .sum();
        self.days_before_year(date.year as i64) + before_month + date.day as i64 - 1
    }

    /// Add `days` by walking month lengths, normalising month/year rollover
    /// in both directions. Whole leap cycles are skipped first.
    fn add_days(&self, epoch: CalendarDate, days: i64) -> Option<CalendarDate> {
        let (cycle_days, cycle_years) = self.cycle();
        let mut year = epoch.year as i64;
        let mut month = epoch.month;
        let mut day = epoch.day as i64 + days;

        if day > cycle_days {
            let k = (day - 1) / cycle_days;
            year += k * cycle_years;
            day -= k * cycle_days;
        } else if day < 1 {
            let k = (1 - day + cycle_days - 1) / cycle_days;
            year -= k * cycle_years;
            day += k * cycle_days;
        }

        loop {
            let y = i32::try_from(year).ok()?;
            let len = self.days_in_month(y, month) as i64;
            if day <= len {
                break;
            }
            day -= len;
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }
        while day < 1 {
            month -= 1;
            if month < 1 {
                month = 12;
                year -= 1;
            }
            day += self.days_in_month(i32::try_from(year).ok()?, month) as i64;
        }
        Some(CalendarDate {
            year: i32::try_from(year).ok()?,
            month,
            day: day as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    pub fn is_valid_in(&self, calendar: Calendar) -> bool {
        (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= calendar.days_in_month(self.year, self.month)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A decoded time-axis element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLabel {
    Date(CalendarDate),
    Unparseable,
}

impl TimeLabel {
    pub fn year(&self) -> Option<i32> {
        match self {
            TimeLabel::Date(d) => Some(d.year),
            TimeLabel::Unparseable => None,
        }
    }
}

impl fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeLabel::Date(d) => fmt::Display::fmt(d, f),
            TimeLabel::Unparseable => f.write_str("unparseable"),
        }
    }
}

impl FromStr for TimeLabel {
    type Err = std::convert::Infallible;

    /// `YYYY-MM-DD`; anything else is [TimeLabel::Unparseable].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '-');
        let parsed = (|| {
            let year = parts.next()?.parse().ok()?;
            let month = parts.next()?.parse().ok()?;
            let day = leading_digits(parts.next()?).parse().ok()?;
            let date = CalendarDate::new(year, month, day);
            (1..=12).contains(&month).then_some(date)
        })();
        Ok(parsed.map_or(TimeLabel::Unparseable, TimeLabel::Date))
    }
}

fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

/// The leading `YYYY` of a label string.
pub fn year_from_label(label: &str) -> Option<i32> {
    let label = label.trim();
    let end = label
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map_or(label.len(), |(i, _)| i);
    label[..end].parse().ok()
}

/// How raw time values map to dates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeEncoding {
    /// `<unit> since <epoch>`.
    Offset {
        scale_to_days: f64,
        epoch: CalendarDate,
        calendar: Calendar,
    },
    /// Raw values are `YYYYMMDD.fraction`.
    PackedDate,
}

fn unit_scale(unit: &str) -> Option<f64> {
    let scale = match unit {
        "days" | "day" | "d" => 1.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 1.0 / 24.0,
        "minutes" | "minute" | "mins" | "min" => 1.0 / 1440.0,
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0 / 86_400.0,
        "milliseconds" | "millisecond" | "msecs" | "msec" | "ms" => 1.0 / 86_400_000.0,
        _ => return None,
    };
    Some(scale)
}

fn parse_epoch(s: &str, calendar: Calendar) -> Option<CalendarDate> {
    let date = s.trim().split([' ', 'T', 't']).next()?;
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = leading_digits(parts.next()?).parse().ok()?;
    let epoch = CalendarDate::new(year, month, day);
    epoch.is_valid_in(calendar).then_some(epoch)
}

impl TimeEncoding {
    /// Parse a `units` attribute together with an optional `calendar` attribute.
    pub fn parse(units: &str, calendar: Option<&str>) -> crate::Result<Self> {
        let lower = units.trim().to_ascii_lowercase();
        if let Some(rest) = lower
            .strip_prefix("days as ")
            .or_else(|| lower.strip_prefix("day as "))
        {
            if rest.starts_with("%y%m%d") {
                return Ok(TimeEncoding::PackedDate);
            }
        }

        let (unit, epoch) = lower
            .split_once(" since ")
            .ok_or_else(|| crate::Error::TimeParse(units.to_string()))?;
        let scale_to_days =
            unit_scale(unit.trim()).ok_or_else(|| crate::Error::TimeParse(units.to_string()))?;
        let calendar = Calendar::from_attribute(calendar);
        let epoch = parse_epoch(epoch, calendar)
            .ok_or_else(|| crate::Error::TimeParse(format!("bad epoch in {units:?}")))?;
        Ok(TimeEncoding::Offset {
            scale_to_days,
            epoch,
            calendar,
        })
    }

    /// Decode one raw value. Fractional days are floored.
    pub fn decode(&self, raw: f64) -> TimeLabel {
        if !raw.is_finite() {
            return TimeLabel::Unparseable;
        }
        let date = match *self {
            TimeEncoding::PackedDate => {
                let v = raw.floor();
                if v < 0.0 {
                    return TimeLabel::Unparseable;
                }
                let v = v as i64;
                let date = CalendarDate {
                    year: (v / 10_000) as i32,
                    month: ((v / 100) % 100) as u32,
                    day: (v % 100) as u32,
                };
                date.is_valid_in(Calendar::Standard).then_some(date)
            }
            TimeEncoding::Offset {
                scale_to_days,
                epoch,
                calendar,
            } => {
                let days = (raw * scale_to_days).floor();
                if days.abs() > MAX_ABS_DAYS {
                    return TimeLabel::Unparseable;
                }
                let days = days as i64;
                match calendar {
                    Calendar::Standard => standard_add_days(epoch, days),
                    cal => cal.add_days(epoch, days),
                }
            }
        };
        date.map_or(TimeLabel::Unparseable, TimeLabel::Date)
    }

    /// The raw value for the start of `date`; the inverse of [TimeEncoding::decode].
    pub fn encode(&self, date: CalendarDate) -> f64 {
        match *self {
            TimeEncoding::PackedDate => {
                (date.year as i64 * 10_000 + date.month as i64 * 100 + date.day as i64) as f64
            }
            TimeEncoding::Offset {
                scale_to_days,
                epoch,
                calendar,
            } => {
                let days = calendar.day_number(date) - calendar.day_number(epoch);
                days as f64 / scale_to_days
            }
        }
    }
}

fn standard_add_days(epoch: CalendarDate, days: i64) -> Option<CalendarDate> {
    let d = NaiveDate::from_ymd_opt(epoch.year, epoch.month, epoch.day)?
        .checked_add_signed(TimeDelta::try_days(days)?)?;
    Some(CalendarDate::new(d.year(), d.month(), d.day()))
}

/// Decode a whole time axis.
///
/// Without usable units, values which all look like years (finite, within
/// 1000..=3000) become `YYYY-01-01` labels. Returns `None` when neither
/// route yields a single valid date.
pub fn decode_time_axis(
    values: &[f64],
    units: Option<&str>,
    calendar: Option<&str>,
) -> Option<Vec<TimeLabel>> {
    let encoding = units.map(|u| TimeEncoding::parse(u, calendar));
    let labels: Vec<TimeLabel> = match encoding {
        Some(Ok(enc)) => values.iter().map(|v| enc.decode(*v)).collect(),
        other => {
            if let Some(Err(e)) = other {
                log::debug!("{e}; trying year literals");
            }
            let literal = !values.is_empty()
                && values
                    .iter()
                    .all(|v| v.is_finite() && (LITERAL_YEAR_MIN..=LITERAL_YEAR_MAX).contains(v));
            if !literal {
                return None;
            }
            values
                .iter()
                .map(|v| TimeLabel::Date(CalendarDate::new(v.floor() as i32, 1, 1)))
                .collect()
        }
    };
    labels
        .iter()
        .any(|l| l.year().is_some())
        .then_some(labels)
}

/// Inclusive year span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub min_year: i32,
    pub max_year: i32,
}

impl YearRange {
    pub fn contains(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    pub fn span(&self) -> u32 {
        self.max_year.abs_diff(self.min_year)
    }

    fn include(self, year: i32) -> Self {
        Self {
            min_year: self.min_year.min(year),
            max_year: self.max_year.max(year),
        }
    }
}

/// Union min/max of valid years across several label arrays.
pub fn year_range<'a>(axes: impl IntoIterator<Item = &'a [TimeLabel]>) -> Option<YearRange> {
    axes.into_iter()
        .flatten()
        .filter_map(TimeLabel::year)
        .fold(None, |acc: Option<YearRange>, year| {
            Some(match acc {
                None => YearRange {
                    min_year: year,
                    max_year: year,
                },
                Some(r) => r.include(year),
            })
        })
}

/// Index of the label whose year is closest to `target_year`.
///
/// `None` when the target lies outside the axis' valid years; ties go to
/// the earliest label.
pub fn find_index_for_year(labels: &[TimeLabel], target_year: i32) -> Option<usize> {
    let range = year_range([labels])?;
    if !range.contains(target_year) {
        return None;
    }
    let mut best: Option<(usize, u32)> = None;
    for (i, year) in labels.iter().enumerate() {
        let Some(year) = year.year() else {
            continue;
        };
        let dist = year.abs_diff(target_year);
        if best.is_none_or(|(_, d)| dist < d) {
            best = Some((i, dist));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(strs: &[&str]) -> Vec<TimeLabel> {
        strs.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn decode(units: &str, calendar: Option<&str>, raw: f64) -> String {
        TimeEncoding::parse(units, calendar).unwrap().decode(raw).to_string()
    }

    #[test]
    fn noleap_year_boundary() {
        assert_eq!(decode("days since 2005-1-1", Some("365_day"), 365.0), "2006-01-01");
        assert_eq!(decode("days since 2005-1-1", Some("noleap"), 59.0), "2005-03-01");
        // no calendar means no-leap
        assert_eq!(decode("days since 2004-1-1", None, 59.0), "2004-03-01");
    }

    #[test]
    fn standard_leap_day() {
        assert_eq!(decode("days since 2000-1-1", Some("standard"), 59.0), "2000-02-29");
        assert_eq!(decode("days since 2000-1-1", Some("gregorian"), 60.0), "2000-03-01");
        assert_eq!(decode("days since 1900-1-1", Some("proleptic_gregorian"), 59.0), "1900-03-01");
    }

    #[test]
    fn julian_leap_century() {
        assert_eq!(decode("days since 1900-1-1", Some("julian"), 59.0), "1900-02-29");
    }

    #[test]
    fn day360_months() {
        assert_eq!(decode("days since 2000-01-01", Some("360_day"), 45.0), "2000-02-16");
        assert_eq!(decode("days since 2000-01-01", Some("360_day"), 360.0), "2001-01-01");
        assert_eq!(decode("days since 2000-02-30", Some("360_day"), 1.0), "2000-03-01");
    }

    #[test]
    fn negative_offsets_roll_back() {
        assert_eq!(decode("days since 2000-01-01", Some("noleap"), -1.0), "1999-12-31");
        assert_eq!(decode("days since 2000-03-01", Some("standard"), -1.0), "2000-02-29");
        assert_eq!(decode("days since 2000-01-01", Some("360_day"), -31.0), "1999-11-30");
        assert_eq!(decode("days since 2000-01-01", Some("noleap"), -0.5), "1999-12-31");
    }

    #[test]
    fn sub_day_units() {
        assert_eq!(decode("hours since 1850-01-01 00:00:00", None, 47.0), "1850-01-02");
        assert_eq!(decode("seconds since 1970-01-01T00:00:00Z", Some("standard"), 86_400.0 * 366.0), "1971-01-02");
        assert_eq!(decode("minutes since 2000-1-1", None, 1440.0 * 31.0), "2000-02-01");
    }

    #[test]
    fn long_spans_skip_cycles() {
        let enc = TimeEncoding::parse("days since 1850-01-01", Some("365_day")).unwrap();
        assert_eq!(enc.decode(365.0 * 250.0 + 31.0).to_string(), "2100-02-01");
        let enc = TimeEncoding::parse("days since 1850-01-01", Some("julian")).unwrap();
        assert_eq!(enc.decode(1461.0 * 10.0).to_string(), "1890-01-01");
    }

    #[test]
    fn packed_dates() {
        let enc = TimeEncoding::parse("day as %Y%m%d.%f", None).unwrap();
        assert_eq!(enc, TimeEncoding::PackedDate);
        assert_eq!(enc.decode(20050115.5).to_string(), "2005-01-15");
        assert_eq!(enc.decode(20051315.0), TimeLabel::Unparseable);
        assert_eq!(enc.decode(20050231.0), TimeLabel::Unparseable);
        assert_eq!(enc.decode(20050229.0), TimeLabel::Unparseable);
        assert_eq!(enc.decode(20040229.0).to_string(), "2004-02-29");
        assert!(!CalendarDate::new(2005, 4, 31).is_valid_in(Calendar::Standard));
        assert_eq!(enc.encode(CalendarDate::new(2005, 1, 15)), 20050115.0);
    }

    #[test]
    fn encode_inverts_decode() {
        for cal in ["standard", "julian", "noleap", "all_leap", "360_day"] {
            let enc = TimeEncoding::parse("hours since 1990-06-15", Some(cal)).unwrap();
            for raw in [-24.0 * 4000.0, -24.0, 0.0, 24.0 * 400.0, 24.0 * 50_000.0] {
                let TimeLabel::Date(date) = enc.decode(raw) else {
                    panic!("{cal} {raw} did not decode");
                };
                assert_eq!(enc.encode(date), raw, "{cal} {raw}");
            }
        }
    }

    #[test]
    fn unrecognised_units() {
        assert!(matches!(
            TimeEncoding::parse("months since 2000-01-01", None),
            Err(crate::Error::TimeParse(_))
        ));
        assert!(TimeEncoding::parse("days after 2000-01-01", None).is_err());
        assert!(TimeEncoding::parse("days since 2001-02-29", Some("standard")).is_err());
        assert!(TimeEncoding::parse("days since 2000-02-29", Some("standard")).is_ok());
    }

    #[test]
    fn unknown_calendar_defaults() {
        assert_eq!(Calendar::from_attribute(Some("mayan")), Calendar::NoLeap365);
        assert_eq!(Calendar::from_attribute(Some("Gregorian")), Calendar::Standard);
    }

    #[test]
    fn axis_year_literal_fallback() {
        let axis = decode_time_axis(&[2015.0, 2016.0, 2017.0], None, None).unwrap();
        assert_eq!(axis, labels(&["2015-01-01", "2016-01-01", "2017-01-01"]));
        let axis = decode_time_axis(&[2015.0], Some("years since 2000"), None).unwrap();
        assert_eq!(axis[0].year(), Some(2015));
        assert_eq!(decode_time_axis(&[0.0, 1.0], None, None), None);
        assert_eq!(decode_time_axis(&[2015.0, f64::NAN], None, None), None);
        assert_eq!(decode_time_axis(&[], None, None), None);
    }

    #[test]
    fn axis_with_units() {
        let axis = decode_time_axis(&[0.0, 365.0], Some("days since 2005-01-01"), Some("noleap")).unwrap();
        assert_eq!(axis, labels(&["2005-01-01", "2006-01-01"]));
        assert_eq!(decode_time_axis(&[f64::NAN], Some("days since 2005-01-01"), None), None);
    }

    #[test]
    fn label_years() {
        assert_eq!(year_from_label("2020-01-01"), Some(2020));
        assert_eq!(year_from_label("0850-06-01"), Some(850));
        assert_eq!(year_from_label("unparseable"), None);
        assert_eq!("garbage".parse::<TimeLabel>().unwrap(), TimeLabel::Unparseable);
    }

    #[test]
    fn closest_year() {
        let axis = labels(&["2020-01-01", "2025-01-01", "2030-01-01"]);
        assert_eq!(find_index_for_year(&axis, 2027), Some(1));
        assert_eq!(find_index_for_year(&axis, 2035), None);
        assert_eq!(find_index_for_year(&axis, 2019), None);
        assert_eq!(find_index_for_year(&axis, 2030), Some(2));
    }

    #[test]
    fn ties_prefer_first() {
        let axis = labels(&["2020-01-01", "2020-07-01", "2022-01-01"]);
        assert_eq!(find_index_for_year(&axis, 2020), Some(0));
        assert_eq!(find_index_for_year(&axis, 2021), Some(0));
    }

    #[test]
    fn unparseable_labels_are_skipped() {
        let axis = labels(&["bad", "2010-01-01", "2012-01-01"]);
        assert_eq!(find_index_for_year(&axis, 2011), Some(1));
        assert_eq!(find_index_for_year(&labels(&["bad"]), 2011), None);
    }

    #[test]
    fn union_year_range() {
        let a = labels(&["2010-01-01", "2020-01-01"]);
        let b = labels(&["2015-01-01", "2025-01-01"]);
        let range = year_range([a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(
            range,
            YearRange {
                min_year: 2010,
                max_year: 2025
            }
        );
        assert_eq!(range.span(), 15);
        assert_eq!(year_range([labels(&["bad"]).as_slice()]), None);
        assert_eq!(year_range(Vec::<&[TimeLabel]>::new()), None);
    }
}
