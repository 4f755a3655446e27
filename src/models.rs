use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;

/// One published price or rate at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Which series inside a multi-series page this belongs to
    /// (fund column, currency code, security id).
    pub stream: String,
    pub at: DateTime<Tz>,
    pub value: Decimal,
}

impl Observation {
    pub fn new(stream: impl Into<String>, at: DateTime<Tz>, value: Decimal) -> Self {
        Self {
            stream: stream.into(),
            at,
            value,
        }
    }
}

/// The observations decoded from one fetched page, in fetch order.
///
/// Order is whatever the provider sent; nothing downstream assumes it is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationSeries {
    observations: Vec<Observation>,
}

impl ObservationSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    /// Observations belonging to one stream, in fetch order.
    pub fn in_stream<'a>(&'a self, stream: &'a str) -> impl Iterator<Item = &'a Observation> {
        self.observations.iter().filter(move |o| o.stream == stream)
    }
}

impl From<Vec<Observation>> for ObservationSeries {
    fn from(observations: Vec<Observation>) -> Self {
        Self { observations }
    }
}

impl FromIterator<Observation> for ObservationSeries {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        Self {
            observations: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ObservationSeries {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The price handed back to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPrice {
    pub value: Decimal,
    pub trade_date: DateTime<Tz>,
    /// `None` when the price is in the query's own implied currency; set when
    /// the source itself is a currency conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_currency: Option<String>,
}

/// The fixed zone and time of day at which a source's trading day is stamped.
///
/// Calendar dates from a query and date-only observations from a page are
/// both turned into instants through the same anchor, so comparisons never
/// depend on the process-local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub tz: Tz,
    pub time: NaiveTime,
}

impl Anchor {
    pub const fn new(tz: Tz, time: NaiveTime) -> Self {
        Self { tz, time }
    }

    pub const fn midnight(tz: Tz) -> Self {
        Self::new(tz, NaiveTime::MIN)
    }

    /// The anchored instant on `date`.
    ///
    /// Ambiguous local times take the earlier instant; times falling in a DST
    /// gap are pushed forward an hour.
    pub fn at(&self, date: NaiveDate) -> DateTime<Tz> {
        let naive = date.and_time(self.time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .unwrap_or_else(|| self.tz.from_utc_datetime(&naive))
    }
}

/// What point in time a query asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Latest,
    On(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetQuery {
    pub ticker: String,
    pub target: Target,
}

impl TargetQuery {
    pub fn latest(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            target: Target::Latest,
        }
    }

    pub fn on(ticker: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            target: Target::On(date),
        }
    }
}
