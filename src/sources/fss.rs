//! First State Super (now Aware Super) unit prices.
//!
//! Two publication layouts are supported:
//!
//! - `export` (default): one CSV holding the whole unit price history, a
//!   `Date` column in `dd/mm/yyyy` form followed by one column per option.
//! - `monthly`: one CSV per calendar month at `super-MM-YYYY.csv`. Each row is
//!   an option and the `Investment Options` header row lists the dates.
//!
//! Tickers name the option with underscores for spaces, e.g.
//! `International_Shares`.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::parse_decimal;
use crate::error::{SourceError, TickerError};
use crate::models::{Anchor, Observation, ObservationSeries};
use crate::net::HttpFetcher;
use crate::period::Period;
use crate::source::{PageSource, StreamSelector};

pub const DEFAULT_EXPORT_URL: &str =
    "https://aware.com.au/bin/unitPriceExport?category=FUTURE_SAVER";
pub const DEFAULT_MONTHLY_BASE_URL: &str =
    "https://firststatesuper.com.au/content/dam/ftc/superunitprices";

const DATE_COLUMN: &str = "Date";
const DATES_ROW_KEY: &str = "investmentoptions";
const DATE_FORMAT: &str = "%d/%m/%Y";

/// Unit prices are end-of-day values for a Sydney-based fund.
const ANCHOR: Anchor = Anchor::midnight(chrono_tz::Australia::Sydney);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FssLayout {
    /// Whole history in a single export.
    #[default]
    Export,
    /// One file per month, one row per option.
    Monthly,
}

/// An investment option, as named in the published file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundName {
    name: String,
    stream: String,
}

impl FundName {
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl StreamSelector for FundName {
    fn stream(&self) -> &str {
        &self.stream
    }
}

/// Row key used by the monthly files: lowercase, no spaces or underscores.
fn fund_key(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone)]
pub struct FssSource {
    fetcher: HttpFetcher,
    url: String,
    layout: FssLayout,
    monthly_base_url: String,
}

impl FssSource {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            url: DEFAULT_EXPORT_URL.to_string(),
            layout: FssLayout::default(),
            monthly_base_url: DEFAULT_MONTHLY_BASE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_layout(mut self, layout: FssLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_monthly_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.monthly_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn monthly_url(&self, first: NaiveDate) -> String {
        format!(
            "{}/super-{:02}-{}.csv",
            self.monthly_base_url,
            first.month(),
            first.year()
        )
    }

    /// Decode the export into one observation per (date, option) cell.
    ///
    /// Rows without a parseable date (blank lines, footers) and cells without
    /// a parseable price are skipped.
    fn parse_csv(body: &[u8]) -> Result<ObservationSeries, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(body);

        let headers = reader
            .headers()
            .map_err(|e| SourceError::malformed("csv", e))?
            .clone();
        let date_idx = headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == DATE_COLUMN)
            .ok_or_else(|| SourceError::malformed("csv", "missing Date column"))?;

        let mut series = ObservationSeries::new();
        for record in reader.records() {
            let record = record.map_err(|e| SourceError::malformed("csv", e))?;

            let Some(raw_date) = record.get(date_idx) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(raw_date, DATE_FORMAT) else {
                debug!(row = raw_date, "skipping row without a date");
                continue;
            };
            let at = ANCHOR.at(date);

            for (idx, fund) in headers.iter().enumerate() {
                if idx == date_idx || fund.is_empty() {
                    continue;
                }
                if let Some(value) = record.get(idx).and_then(parse_decimal) {
                    series.push(Observation::new(fund, at, value));
                }
            }
        }

        Ok(series)
    }

    /// Decode one monthly file. The dates row may appear anywhere before the
    /// option rows; rows before it are preamble.
    fn parse_monthly_csv(body: &[u8]) -> Result<ObservationSeries, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(body);

        let mut dates: Option<Vec<Option<NaiveDate>>> = None;
        let mut series = ObservationSeries::new();
        for record in reader.records() {
            let record = record.map_err(|e| SourceError::malformed("csv", e))?;
            let Some(first) = record.get(0) else {
                continue;
            };
            let key = fund_key(first.trim_start_matches('\u{feff}'));
            if key.is_empty() {
                continue;
            }

            if key == DATES_ROW_KEY {
                dates = Some(
                    record
                        .iter()
                        .skip(1)
                        .map(|cell| NaiveDate::parse_from_str(cell, DATE_FORMAT).ok())
                        .collect(),
                );
                continue;
            }
            let Some(dates) = &dates else {
                debug!(row = first, "skipping row before the dates row");
                continue;
            };

            for (date, cell) in dates.iter().zip(record.iter().skip(1)) {
                let Some(date) = date else {
                    continue;
                };
                if let Some(value) = parse_decimal(cell) {
                    series.push(Observation::new(key.as_str(), ANCHOR.at(*date), value));
                }
            }
        }

        if dates.is_none() {
            return Err(SourceError::malformed("csv", "missing Investment Options row"));
        }
        Ok(series)
    }
}

#[async_trait::async_trait]
impl PageSource for FssSource {
    type Selector = FundName;

    fn name(&self) -> &str {
        "fss"
    }

    fn parse_ticker(&self, ticker: &str) -> Result<FundName, TickerError> {
        let name = ticker.trim().replace('_', " ");
        if name.trim().is_empty() {
            return Err(TickerError::new("fss", ticker, "fund name is empty"));
        }
        let stream = match self.layout {
            FssLayout::Export => name.clone(),
            FssLayout::Monthly => fund_key(&name),
        };
        Ok(FundName { name, stream })
    }

    fn anchor(&self) -> Anchor {
        ANCHOR
    }

    fn period_for(&self, date: NaiveDate, _today: NaiveDate) -> Period {
        match self.layout {
            FssLayout::Export => Period::Full,
            FssLayout::Monthly => Period::month_containing(date),
        }
    }

    async fn fetch_page(
        &self,
        period: &Period,
        _fund: &FundName,
    ) -> Result<Option<ObservationSeries>, SourceError> {
        let url = match period {
            Period::Full => self.url.clone(),
            Period::Month(first) => self.monthly_url(*first),
            _ => return Ok(None),
        };
        let Some(body) = self.fetcher.fetch(&url).await? else {
            return Ok(None);
        };
        match period {
            Period::Month(_) => Self::parse_monthly_csv(&body).map(Some),
            _ => Self::parse_csv(&body).map(Some),
        }
    }
}
