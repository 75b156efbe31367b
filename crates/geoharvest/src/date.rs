//! Dates with year, month or day precision.
//!
//! Bibliographic metadata rarely agrees on how precise a date is: OAI-PMH `dc:date` may be
//! `2021`, `2021-05` or a full timestamp, RSS uses RFC 2822. A [`PartialDate`] keeps exactly
//! the precision the source gave us.
//!
//! ```
//! use geoharvest::date::PartialDate;
//!
//! assert_eq!(PartialDate::parse("2021"), Some(PartialDate::Year(2021)));
//! assert_eq!(PartialDate::parse("2021-13"), None);
//! ```

use chrono::Datelike;

use super::*;

/// A calendar date known to year, month or day precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartialDate {
  /// Only the year is known
  Year(i32),
  /// Year and month (1-12)
  YearMonth(i32, u32),
  /// An exact day
  Day(NaiveDate),
}

lazy_static! {
  static ref YEAR: Regex = Regex::new(r"^(\d{4})$").unwrap();
  static ref YEAR_MONTH: Regex = Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap();
  static ref FULL_DATE: Regex = Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap();
}

impl PartialDate {
  /// Parse a date string, returning `None` for anything we cannot read.
  ///
  /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, RFC 3339 timestamps and RFC 2822 dates. The
  /// latter two keep day precision. Out-of-range components (`2021-13`, `2021-02-30`) are
  /// rejected rather than clamped.
  pub fn parse(input: &str) -> Option<Self> {
    let s = input.trim();
    if s.is_empty() {
      return None;
    }

    if let Some(caps) = YEAR.captures(s) {
      return caps[1].parse().ok().map(PartialDate::Year);
    }
    if let Some(caps) = YEAR_MONTH.captures(s) {
      let year: i32 = caps[1].parse().ok()?;
      let month: u32 = caps[2].parse().ok()?;
      return (1..=12).contains(&month).then_some(PartialDate::YearMonth(year, month));
    }
    if let Some(caps) = FULL_DATE.captures(s) {
      let year: i32 = caps[1].parse().ok()?;
      let month: u32 = caps[2].parse().ok()?;
      let day: u32 = caps[3].parse().ok()?;
      return NaiveDate::from_ymd_opt(year, month, day).map(PartialDate::Day);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
      return Some(PartialDate::Day(dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
      return Some(PartialDate::Day(dt.date_naive()));
    }
    // `2021-05-03T10:00:00` without offset, and similar
    if s.len() > 10 && s.is_char_boundary(10) && s.as_bytes()[10] == b'T' {
      return FULL_DATE.is_match(&s[..10]).then(|| Self::parse(&s[..10])).flatten();
    }

    trace!("Unparseable date string: {s:?}");
    None
  }

  /// The year component.
  pub fn year(&self) -> i32 {
    match self {
      PartialDate::Year(y) | PartialDate::YearMonth(y, _) => *y,
      PartialDate::Day(d) => d.year(),
    }
  }

  /// Earliest day covered by this date.
  pub fn first_day(&self) -> NaiveDate {
    match *self {
      PartialDate::Year(y) => NaiveDate::from_ymd_opt(y, 1, 1).unwrap_or(NaiveDate::MIN),
      PartialDate::YearMonth(y, m) => NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(NaiveDate::MIN),
      PartialDate::Day(d) => d,
    }
  }
}

impl fmt::Display for PartialDate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PartialDate::Year(y) => write!(f, "{y:04}"),
      PartialDate::YearMonth(y, m) => write!(f, "{y:04}-{m:02}"),
      PartialDate::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
    }
  }
}

impl FromStr for PartialDate {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    PartialDate::parse(s).ok_or_else(|| HarvestError::MalformedRecord(format!("invalid date {s:?}")))
  }
}

impl Serialize for PartialDate {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for PartialDate {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    PartialDate::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid date {s:?}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_precisions() {
    assert_eq!(PartialDate::parse("2021"), Some(PartialDate::Year(2021)));
    assert_eq!(PartialDate::parse("2021-05"), Some(PartialDate::YearMonth(2021, 5)));
    assert_eq!(
      PartialDate::parse("2021-05-03"),
      Some(PartialDate::Day(NaiveDate::from_ymd_opt(2021, 5, 3).unwrap()))
    );
  }

  #[test]
  fn test_invalid_components_are_absent() {
    assert_eq!(PartialDate::parse("2021-13"), None);
    assert_eq!(PartialDate::parse("2021-00"), None);
    assert_eq!(PartialDate::parse("2021-02-30"), None);
    assert_eq!(PartialDate::parse("last spring"), None);
    assert_eq!(PartialDate::parse("   "), None);
  }

  #[test]
  fn test_timestamps_keep_day_precision() {
    let day = PartialDate::Day(NaiveDate::from_ymd_opt(2021, 5, 3).unwrap());
    assert_eq!(PartialDate::parse("2021-05-03T10:00:00Z"), Some(day));
    assert_eq!(PartialDate::parse("2021-05-03T10:00:00"), Some(day));
    assert_eq!(PartialDate::parse("Mon, 03 May 2021 10:00:00 +0000"), Some(day));
  }

  #[test]
  fn test_display_and_serde() {
    assert_eq!(PartialDate::YearMonth(2021, 5).to_string(), "2021-05");
    let json = serde_json::to_string(&PartialDate::Year(1999)).unwrap();
    assert_eq!(json, "\"1999\"");
    let back: PartialDate = serde_json::from_str("\"1999-12-31\"").unwrap();
    assert_eq!(back.year(), 1999);
  }
}
