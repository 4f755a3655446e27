//! Reserve Bank of Australia exchange rates.
//!
//! The RBA publishes how much of a foreign currency one Australian dollar buys,
//! observed at 4pm Sydney time. The latest rates come from an RSS feed; older
//! ones from spreadsheets that each cover a block of years. Tickers are the
//! foreign currency code, e.g. `USD`.

use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Reader, Xls};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use quick_xml::events::Event;
use tracing::debug;

use crate::decimal::{decimal_from_f64, parse_decimal, with_scale};
use crate::error::{SourceError, TickerError};
use crate::models::{Anchor, Observation, ObservationSeries};
use crate::net::HttpFetcher;
use crate::period::Period;
use crate::source::{PageSource, StreamSelector};

pub const DEFAULT_BASE_URL: &str = "https://www.rba.gov.au";

const RSS_PATH: &str = "/rss/rss-cb-exchange-rates.xml";
const ARCHIVE_PATH: &str = "/statistics/tables/xls-hist";

/// Published rates carry four decimal places.
const RATE_SCALE: u32 = 4;

const FOUR_PM: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(time) => time,
    None => NaiveTime::MIN,
};

const ANCHOR: Anchor = Anchor::new(chrono_tz::Australia::Sydney, FOUR_PM);

/// Historical spreadsheets: first year, last year (`None` while still being
/// appended to) and file name. Newest first.
const ARCHIVES: &[(i32, Option<i32>, &str)] = &[
    (2023, None, "2023-current"),
    (2018, Some(2022), "2018-2022"),
    (2014, Some(2017), "2014-2017"),
    (2010, Some(2013), "2010-2013"),
    (2007, Some(2009), "2007-2009"),
    (2003, Some(2006), "2003-2006"),
    (1999, Some(2002), "1999-2002"),
];

/// Header cell that starts the row of series ids in the spreadsheets.
const SERIES_ID_HEADER: &str = "Series ID";
/// Series id prefix of the AUD exchange rate columns, e.g. `FXRUSD`.
const RATE_SERIES_PREFIX: &str = "FXR";

/// Days between the spreadsheet epoch (1899-12-30) and the Unix epoch.
const EXCEL_UNIX_EPOCH_DAYS: i64 = 25_569;
/// Serial of 9999-12-31, the last date a spreadsheet can hold.
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency(String);

impl StreamSelector for Currency {
    fn stream(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct RbaSource {
    fetcher: HttpFetcher,
    base_url: String,
}

impl RbaSource {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// The archive spreadsheet covering `date`, or `None` before 1999.
    fn archive_for(date: NaiveDate) -> Option<Period> {
        let year = date.year();
        ARCHIVES
            .iter()
            .find(|(first, last, _)| year >= *first && last.map_or(true, |last| year <= last))
            .and_then(|(first, last, _)| {
                let start = NaiveDate::from_ymd_opt(*first, 1, 1)?;
                let end = NaiveDate::from_ymd_opt(last.unwrap_or(year), 12, 31)?;
                Some(Period::Span { start, end })
            })
    }

    fn archive_name(period: &Period) -> Option<&'static str> {
        let Period::Span { start, .. } = period else {
            return None;
        };
        ARCHIVES
            .iter()
            .find(|(first, _, _)| *first == start.year())
            .map(|(_, _, name)| *name)
    }

    /// Decode the RSS feed's `cb:exchangeRate` entries.
    ///
    /// Elements are matched by local name so the feed's namespace prefixes
    /// do not matter.
    fn parse_rss(body: &[u8]) -> Result<ObservationSeries, SourceError> {
        let mut reader = quick_xml::Reader::from_reader(body);
        reader.config_mut().trim_text(true);

        let mut series = ObservationSeries::new();
        let mut path: Vec<String> = Vec::new();
        let mut entry = RssEntry::default();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if name == "exchangeRate" {
                        entry = RssEntry::default();
                    }
                    path.push(name);
                }
                Ok(Event::End(_)) => {
                    if path.pop().as_deref() == Some("exchangeRate") {
                        match entry.observation() {
                            Some(observation) => series.push(observation),
                            None => debug!(?entry, "skipping incomplete exchange rate entry"),
                        }
                    }
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|e| SourceError::malformed("rss", e))?;
                    entry.record(&path, text.trim());
                }
                Ok(Event::CData(data)) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    entry.record(&path, text.trim());
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(SourceError::malformed("rss", e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(series)
    }

    /// Decode a historical spreadsheet.
    ///
    /// The first sheet holds a block of descriptive rows, then a row starting
    /// with `Series ID` naming each column (`FXRUSD`, `FXRJPY`, ...), then one
    /// row per trading day.
    fn parse_xls(body: Vec<u8>) -> Result<ObservationSeries, SourceError> {
        let mut workbook: Xls<_> =
            open_workbook_from_rs(Cursor::new(body)).map_err(|e| SourceError::malformed("xls", e))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| SourceError::malformed("xls", "workbook has no sheets"))?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| SourceError::malformed("xls", e))?;

        let mut columns: Option<Vec<Option<String>>> = None;
        let mut series = ObservationSeries::new();

        for row in range.rows() {
            let Some(first) = row.first() else {
                continue;
            };

            if columns.is_none() {
                if cell_text(first) == SERIES_ID_HEADER {
                    columns = Some(
                        row.iter()
                            .map(|cell| {
                                cell_text(cell)
                                    .strip_prefix(RATE_SERIES_PREFIX)
                                    .map(str::to_string)
                            })
                            .collect(),
                    );
                }
                continue;
            }
            let Some(currencies) = &columns else {
                continue;
            };

            let Some(date) = cell_date(first) else {
                continue;
            };
            let at = ANCHOR.at(date);

            for (idx, currency) in currencies.iter().enumerate().skip(1) {
                let Some(currency) = currency else {
                    continue;
                };
                if let Some(value) = row.get(idx).and_then(cell_decimal) {
                    series.push(Observation::new(
                        currency.as_str(),
                        at,
                        with_scale(value, RATE_SCALE),
                    ));
                }
            }
        }

        if columns.is_none() {
            return Err(SourceError::malformed("xls", "no Series ID header row"));
        }
        Ok(series)
    }
}

/// Fields of one `cb:exchangeRate` element collected while reading the feed.
#[derive(Debug, Default)]
struct RssEntry {
    currency: Option<String>,
    value: Option<String>,
    period: Option<String>,
}

impl RssEntry {
    fn record(&mut self, path: &[String], text: &str) {
        let (Some(leaf), Some(parent)) = (path.last(), path.iter().rev().nth(1)) else {
            return;
        };
        match (parent.as_str(), leaf.as_str()) {
            ("exchangeRate", "targetCurrency") => self.currency = Some(text.to_string()),
            ("observation", "value") => self.value = Some(text.to_string()),
            ("observationPeriod", "period") => self.period = Some(text.to_string()),
            _ => {}
        }
    }

    fn observation(&self) -> Option<Observation> {
        let currency = self.currency.as_deref()?.trim().to_uppercase();
        let value = parse_decimal(self.value.as_deref()?)?;
        let date = NaiveDate::parse_from_str(self.period.as_deref()?, "%Y-%m-%d").ok()?;
        Some(Observation::new(
            currency,
            ANCHOR.at(date),
            with_scale(value, RATE_SCALE),
        ))
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => excel_serial_date(dt.as_f64()),
        Data::Float(serial) => excel_serial_date(*serial),
        Data::Int(serial) => excel_serial_date(*serial as f64),
        Data::DateTimeIso(s) => NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok(),
        Data::String(s) => NaiveDate::parse_from_str(s.trim(), "%d-%b-%Y").ok(),
        _ => None,
    }
}

fn cell_decimal(cell: &Data) -> Option<rust_decimal::Decimal> {
    match cell {
        Data::Float(f) => decimal_from_f64(*f),
        Data::Int(i) => Some(rust_decimal::Decimal::from(*i)),
        Data::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Calendar date of a spreadsheet day serial (days since 1899-12-30).
fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let days = serial.trunc() as i64 - EXCEL_UNIX_EPOCH_DAYS;
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::try_days(days)?)
}

fn currency_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

#[async_trait::async_trait]
impl PageSource for RbaSource {
    type Selector = Currency;

    fn name(&self) -> &str {
        "rba"
    }

    fn parse_ticker(&self, ticker: &str) -> Result<Currency, TickerError> {
        let raw = if ticker.trim().is_empty() { "USD" } else { ticker };
        currency_code(raw)
            .map(Currency)
            .ok_or_else(|| TickerError::new("rba", ticker, "expected a currency code like USD"))
    }

    fn anchor(&self) -> Anchor {
        ANCHOR
    }

    fn period_for(&self, date: NaiveDate, today: NaiveDate) -> Period {
        if date >= today {
            Period::Current(today)
        } else {
            Self::archive_for(date).unwrap_or(Period::Day(date))
        }
    }

    fn previous_period(&self, period: &Period) -> Option<Period> {
        let before = period.first_day().pred_opt()?;
        Self::archive_for(before)
    }

    fn quote_currency(&self, currency: &Currency) -> Option<String> {
        Some(currency.0.clone())
    }

    async fn fetch_page(
        &self,
        period: &Period,
        _currency: &Currency,
    ) -> Result<Option<ObservationSeries>, SourceError> {
        match period {
            Period::Current(_) => {
                let url = format!("{}{}", self.base_url, RSS_PATH);
                let Some(body) = self.fetcher.fetch(&url).await? else {
                    return Ok(None);
                };
                Self::parse_rss(&body).map(Some)
            }
            _ => {
                let Some(name) = Self::archive_name(period) else {
                    debug!(%period, "no RBA archive covers period");
                    return Ok(None);
                };
                let url = format!("{}{}/{}.xls", self.base_url, ARCHIVE_PATH, name);
                let Some(body) = self.fetcher.fetch(&url).await? else {
                    return Ok(None);
                };
                Self::parse_xls(body).map(Some)
            }
        }
    }
}
