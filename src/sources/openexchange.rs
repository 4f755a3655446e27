//! Open Exchange Rates currency conversion.
//!
//! Tickers are `<app_id>:FROM_TO`, e.g. `abc123:USD_VND`, or just `FROM_TO`
//! when an app id is configured. The price is how many `TO` one `FROM` buys,
//! quoted in `FROM`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::decimal::{decimal_from_json, with_scale};
use crate::error::{SourceError, TickerError};
use crate::models::{Anchor, Observation, ObservationSeries};
use crate::net::HttpFetcher;
use crate::period::Period;
use crate::source::{PageSource, StreamSelector};

pub const DEFAULT_BASE_URL: &str = "https://openexchangerates.org/api";

/// Rates are reported as floats; six places is all the precision they carry.
const RATE_SCALE: u32 = 6;

const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(time) => time,
    None => NaiveTime::MIN,
};

/// Daily rates close at the end of the UTC day.
const ANCHOR: Anchor = Anchor::new(chrono_tz::UTC, END_OF_DAY);

#[derive(Clone)]
pub struct CurrencyPair {
    app_id: SecretString,
    pub from: String,
    pub to: String,
}

impl std::fmt::Debug for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrencyPair")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl StreamSelector for CurrencyPair {
    fn stream(&self) -> &str {
        &self.to
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    /// Unix seconds of the published rates.
    timestamp: i64,
    #[serde(default)]
    rates: HashMap<String, Value>,
}

#[derive(Clone)]
pub struct OpenExchangeSource {
    fetcher: HttpFetcher,
    base_url: String,
    app_id: Option<SecretString>,
}

impl OpenExchangeSource {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// App id used for tickers that do not carry their own.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(SecretString::from(app_id.into()));
        self
    }

    fn request_url(&self, period: &Period, pair: &CurrencyPair) -> Option<String> {
        let endpoint = match period {
            Period::Current(_) => "latest.json".to_string(),
            Period::Day(date) => format!("historical/{}.json", date.format("%Y-%m-%d")),
            _ => return None,
        };
        Some(format!(
            "{}/{}?app_id={}&base={}&symbols={}",
            self.base_url,
            endpoint,
            urlencoding::encode(pair.app_id.expose_secret()),
            pair.from,
            pair.to,
        ))
    }

    fn parse_rates(body: &[u8], pair: &CurrencyPair) -> Result<ObservationSeries, SourceError> {
        let response: RatesResponse =
            serde_json::from_slice(body).map_err(|e| SourceError::malformed("json", e))?;

        let at = DateTime::from_timestamp(response.timestamp, 0)
            .ok_or_else(|| SourceError::malformed("json", "timestamp out of range"))?
            .with_timezone(&chrono_tz::UTC);

        let mut series = ObservationSeries::new();
        for (currency, raw) in &response.rates {
            if let Some(rate) = decimal_from_json(raw) {
                series.push(Observation::new(currency.as_str(), at, with_scale(rate, RATE_SCALE)));
            }
        }

        if series.in_stream(&pair.to).next().is_none() {
            return Err(SourceError::malformed(
                "json",
                format!("no {} rate in response", pair.to),
            ));
        }

        Ok(series)
    }
}

fn currency_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

#[async_trait::async_trait]
impl PageSource for OpenExchangeSource {
    type Selector = CurrencyPair;

    fn name(&self) -> &str {
        "openexchange"
    }

    fn parse_ticker(&self, ticker: &str) -> Result<CurrencyPair, TickerError> {
        let invalid = |reason: &str| TickerError::new("openexchange", ticker, reason);

        let (app_id, currencies) = match ticker.trim().rsplit_once(':') {
            Some((app_id, currencies)) if !app_id.trim().is_empty() => {
                (SecretString::from(app_id.trim().to_string()), currencies)
            }
            Some(_) => return Err(invalid("empty app id")),
            None => match &self.app_id {
                Some(app_id) => (app_id.clone(), ticker.trim()),
                None => return Err(invalid("no app id in ticker and none configured")),
            },
        };

        let (from, to) = currencies
            .split_once('_')
            .ok_or_else(|| invalid("expected FROM_TO currency pair"))?;
        let from = currency_code(from).ok_or_else(|| invalid("bad FROM currency"))?;
        let to = currency_code(to).ok_or_else(|| invalid("bad TO currency"))?;

        Ok(CurrencyPair { app_id, from, to })
    }

    fn anchor(&self) -> Anchor {
        ANCHOR
    }

    fn period_for(&self, date: NaiveDate, today: NaiveDate) -> Period {
        if date >= today {
            Period::Current(today)
        } else {
            Period::Day(date)
        }
    }

    fn quote_currency(&self, pair: &CurrencyPair) -> Option<String> {
        Some(pair.from.clone())
    }

    async fn fetch_page(
        &self,
        period: &Period,
        pair: &CurrencyPair,
    ) -> Result<Option<ObservationSeries>, SourceError> {
        let Some(url) = self.request_url(period, pair) else {
            return Ok(None);
        };
        let Some(body) = self.fetcher.fetch(&url).await? else {
            return Ok(None);
        };
        Self::parse_rates(&body, pair).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;

    const SAMPLE_HISTORICAL: &str = r#"{
        "disclaimer": "Usage subject to terms",
        "license": "https://openexchangerates.org/license",
        "timestamp": 1704153599,
        "base": "USD",
        "rates": { "VND": 24262.5 }
    }"#;

    fn source() -> OpenExchangeSource {
        OpenExchangeSource::new(HttpFetcher::with_client(Client::new()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_rates() {
        let pair = source().parse_ticker("app:USD_VND").unwrap();
        let series = OpenExchangeSource::parse_rates(SAMPLE_HISTORICAL.as_bytes(), &pair).unwrap();

        let rate = series.in_stream("VND").next().unwrap();
        assert_eq!(rate.value.to_string(), "24262.500000");
        // 2024-01-01T23:59:59Z
        assert_eq!(rate.at, ANCHOR.at(date(2024, 1, 1)));
    }

    #[test]
    fn test_parse_rates_missing_symbol() {
        let pair = source().parse_ticker("app:USD_EUR").unwrap();
        let err = OpenExchangeSource::parse_rates(SAMPLE_HISTORICAL.as_bytes(), &pair).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn test_parse_ticker_with_app_id() {
        let pair = source().parse_ticker("abc123:usd_vnd").unwrap();
        assert_eq!(pair.from, "USD");
        assert_eq!(pair.to, "VND");
        assert_eq!(pair.app_id.expose_secret(), "abc123");
        assert_eq!(pair.stream(), "VND");
    }

    #[test]
    fn test_parse_ticker_uses_configured_app_id() {
        assert!(source().parse_ticker("USD_VND").is_err());

        let pair = source().with_app_id("configured").parse_ticker("USD_VND").unwrap();
        assert_eq!(pair.app_id.expose_secret(), "configured");
    }

    #[test]
    fn test_parse_ticker_rejects_bad_pairs() {
        assert!(source().parse_ticker("app:USDVND").is_err());
        assert!(source().parse_ticker("app:US_VND").is_err());
        assert!(source().parse_ticker(":USD_VND").is_err());
    }

    #[test]
    fn test_debug_hides_app_id() {
        let pair = source().parse_ticker("topsecret:USD_VND").unwrap();
        assert!(!format!("{pair:?}").contains("topsecret"));
    }

    #[test]
    fn test_request_urls() {
        let src = source().with_base_url("http://oxr.test/api/");
        let pair = src.parse_ticker("app:USD_VND").unwrap();

        assert_eq!(
            src.request_url(&Period::Current(date(2024, 1, 2)), &pair).unwrap(),
            "http://oxr.test/api/latest.json?app_id=app&base=USD&symbols=VND"
        );
        assert_eq!(
            src.request_url(&Period::Day(date(2024, 1, 1)), &pair).unwrap(),
            "http://oxr.test/api/historical/2024-01-01.json?app_id=app&base=USD&symbols=VND"
        );
        assert_eq!(src.request_url(&Period::Full, &pair), None);
    }

    #[test]
    fn test_periods() {
        let src = source();
        let today = date(2024, 1, 2);
        assert_eq!(src.period_for(today, today), Period::Current(today));
        assert_eq!(src.period_for(date(2024, 1, 1), today), Period::Day(date(2024, 1, 1)));
        assert_eq!(
            src.previous_period(&Period::Current(today)),
            Some(Period::Day(date(2024, 1, 1)))
        );
    }
}
