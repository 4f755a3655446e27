//! The span of time one fetched page covers.

use std::fmt;

use chrono::{Datelike, Duration, Months, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    /// The provider's most recent publication, as of the given date.
    Current(NaiveDate),
    /// A single calendar day.
    Day(NaiveDate),
    /// `days` days before `end` up to and including `end`.
    Window { end: NaiveDate, days: u32 },
    /// The calendar month starting on the given (first) day.
    Month(NaiveDate),
    /// A fixed provider-defined span, such as one archive file.
    Span { start: NaiveDate, end: NaiveDate },
    /// The provider's whole published history in a single page.
    Full,
}

impl Period {
    pub fn month_containing(date: NaiveDate) -> Self {
        Self::Month(date - Duration::days(i64::from(date.day0())))
    }

    pub fn window_ending(end: NaiveDate, days: u32) -> Self {
        Self::Window { end, days }
    }

    pub fn first_day(&self) -> NaiveDate {
        match *self {
            Self::Current(d) | Self::Day(d) | Self::Month(d) => d,
            Self::Window { end, days } => end
                .checked_sub_signed(Duration::days(i64::from(days)))
                .unwrap_or(NaiveDate::MIN),
            Self::Span { start, .. } => start,
            Self::Full => NaiveDate::MIN,
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        match *self {
            Self::Current(d) | Self::Day(d) => d,
            Self::Window { end, .. } | Self::Span { end, .. } => end,
            Self::Month(first) => first
                .checked_add_months(Months::new(1))
                .and_then(|next| next.pred_opt())
                .unwrap_or(NaiveDate::MAX),
            Self::Full => NaiveDate::MAX,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.first_day() <= date && date <= self.last_day()
    }

    /// The same-sized period immediately before this one.
    ///
    /// `Span` and `Full` have no generic predecessor; sources that page by
    /// archive decide that themselves.
    pub fn preceding(&self) -> Option<Self> {
        match *self {
            Self::Current(d) | Self::Day(d) => d.pred_opt().map(Self::Day),
            Self::Window { end, days } => end
                .checked_sub_signed(Duration::days(i64::from(days) + 1))
                .map(|end| Self::Window { end, days }),
            Self::Month(first) => first.checked_sub_months(Months::new(1)).map(Self::Month),
            Self::Span { .. } | Self::Full => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current(d) => write!(f, "current as of {d}"),
            Self::Day(d) => write!(f, "{d}"),
            Self::Month(first) => write!(f, "{}", first.format("%Y-%m")),
            Self::Window { .. } | Self::Span { .. } => {
                write!(f, "{}..={}", self.first_day(), self.last_day())
            }
            Self::Full => f.write_str("full history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_bounds() {
        let feb = Period::month_containing(date(2024, 2, 17));
        assert_eq!(feb, Period::Month(date(2024, 2, 1)));
        assert_eq!(feb.first_day(), date(2024, 2, 1));
        assert_eq!(feb.last_day(), date(2024, 2, 29));
        assert!(feb.contains(date(2024, 2, 29)));
        assert!(!feb.contains(date(2024, 3, 1)));
    }

    #[test]
    fn month_precedes_across_year() {
        let jan = Period::month_containing(date(2024, 1, 2));
        assert_eq!(jan.preceding(), Some(Period::Month(date(2023, 12, 1))));
        assert_eq!(jan.preceding().unwrap().last_day(), date(2023, 12, 31));
    }

    #[test]
    fn window_is_inclusive_and_steps_without_overlap() {
        let window = Period::window_ending(date(2024, 1, 15), 5);
        assert_eq!(window.first_day(), date(2024, 1, 10));
        assert_eq!(window.last_day(), date(2024, 1, 15));

        let previous = window.preceding().unwrap();
        assert_eq!(previous.last_day(), date(2024, 1, 9));
        assert_eq!(previous.first_day(), date(2024, 1, 4));
    }

    #[test]
    fn current_and_day_step_back_one_day() {
        assert_eq!(
            Period::Current(date(2024, 3, 1)).preceding(),
            Some(Period::Day(date(2024, 2, 29)))
        );
        assert_eq!(
            Period::Day(date(2024, 1, 1)).preceding(),
            Some(Period::Day(date(2023, 12, 31)))
        );
    }

    #[test]
    fn archives_have_no_generic_predecessor() {
        let span = Period::Span {
            start: date(2018, 1, 1),
            end: date(2022, 12, 31),
        };
        assert_eq!(span.preceding(), None);
        assert_eq!(Period::Full.preceding(), None);
        assert!(Period::Full.contains(date(1900, 1, 1)));
    }

    #[test]
    fn display() {
        assert_eq!(Period::month_containing(date(2024, 1, 9)).to_string(), "2024-01");
        assert_eq!(
            Period::window_ending(date(2024, 1, 15), 5).to_string(),
            "2024-01-10..=2024-01-15"
        );
        assert_eq!(Period::Full.to_string(), "full history");
    }
}
