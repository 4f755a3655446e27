//! Morningstar prices from the undocumented chart endpoint.
//!
//! Tickers look like `etfs:ARCX:GSLC`, `stocks:NYSE:GE` or `funds:XASX:VEU`
//! (`security_type:exchange:symbol`). A security is looked up in two steps:
//! its quote page carries the internal `secId` in a `<meta>` tag, and the
//! chart endpoint returns daily prices for that id over a date range.

use chrono::NaiveDate;
use chrono_tz::Tz;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::decimal::decimal_from_json;
use crate::error::{SourceError, TickerError};
use crate::models::{Anchor, Observation, ObservationSeries};
use crate::net::HttpFetcher;
use crate::period::Period;
use crate::source::{PageSource, StreamSelector};

pub const DEFAULT_QUOTE_BASE_URL: &str = "http://beta.morningstar.com";
pub const DEFAULT_CHART_URL: &str = "http://mschart.morningstar.com/chartweb/defaultChart";

/// Days before the target date requested per chart call, enough to hop over
/// a long weekend plus a public holiday.
pub const DEFAULT_WINDOW_DAYS: u32 = 5;

/// Chart data ids: mutual funds use a different price series than ETFs and stocks.
const FUND_DATA_ID: u32 = 8217;
const SECURITY_DATA_ID: u32 = 8225;

const CHART_STATUS_OK: i64 = 200;

#[derive(Debug, Clone)]
pub struct MorningstarTicker {
    pub security_type: String,
    pub exchange: String,
    pub symbol: String,
    key: String,
    /// Result of the quote page lookup, shared by every page of one query.
    sec_id: OnceCell<Option<String>>,
}

impl MorningstarTicker {
    fn data_id(&self) -> u32 {
        if self.security_type == "funds" {
            FUND_DATA_ID
        } else {
            SECURITY_DATA_ID
        }
    }
}

impl StreamSelector for MorningstarTicker {
    fn stream(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    data: Option<ChartData>,
    status: ChartStatus,
}

#[derive(Debug, Deserialize)]
struct ChartStatus {
    /// Sent as either a number or a numeric string.
    code: Value,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    r: Vec<ChartSecurity>,
}

#[derive(Debug, Deserialize)]
struct ChartSecurity {
    #[serde(default)]
    t: Vec<ChartTrack>,
}

#[derive(Debug, Deserialize)]
struct ChartTrack {
    #[serde(default)]
    d: Vec<ChartPoint>,
}

/// One daily point: `i` is the date, `v` the price.
#[derive(Debug, Deserialize)]
struct ChartPoint {
    i: String,
    v: Value,
}

#[derive(Debug, Clone)]
pub struct MorningstarSource {
    fetcher: HttpFetcher,
    quote_base_url: String,
    chart_url: String,
    anchor: Anchor,
    window_days: u32,
}

impl MorningstarSource {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            quote_base_url: DEFAULT_QUOTE_BASE_URL.to_string(),
            chart_url: DEFAULT_CHART_URL.to_string(),
            anchor: Anchor::midnight(chrono_tz::UTC),
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    pub fn with_quote_base_url(mut self, url: impl Into<String>) -> Self {
        self.quote_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chart_url(mut self, url: impl Into<String>) -> Self {
        self.chart_url = url.into();
        self
    }

    /// Zone the chart's dates are read in.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.anchor = Anchor::midnight(tz);
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days.max(1);
        self
    }

    /// Look up the internal security id from the public quote page.
    async fn lookup_sec_id(&self, ticker: &MorningstarTicker) -> Result<Option<String>, SourceError> {
        let url = format!(
            "{}/{}/{}/{}/quote.html",
            self.quote_base_url,
            urlencoding::encode(&ticker.security_type),
            urlencoding::encode(&ticker.exchange),
            urlencoding::encode(&ticker.symbol),
        );

        let Some(body) = self.fetcher.fetch(&url).await? else {
            return Ok(None);
        };
        Self::parse_sec_id(&String::from_utf8_lossy(&body))
    }

    fn parse_sec_id(html: &str) -> Result<Option<String>, SourceError> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(r#"meta[name="secId"]"#)
            .map_err(|e| SourceError::malformed("html", e))?;

        Ok(document
            .select(&selector)
            .filter_map(|meta| meta.value().attr("content"))
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string))
    }

    fn chart_request_url(&self, sec_id: &str, data_id: u32, period: &Period) -> String {
        format!(
            "{}?type=getcc&secids={}&dataid={}&startdate={}&enddate={}&currency=&format=1",
            self.chart_url,
            urlencoding::encode(sec_id),
            data_id,
            period.first_day().format("%Y-%m-%d"),
            period.last_day().format("%Y-%m-%d"),
        )
    }

    /// Decode a chart response, tagging every point with `stream`.
    fn parse_chart(body: &[u8], stream: &str, anchor: &Anchor) -> Result<ObservationSeries, SourceError> {
        let response: ChartResponse =
            serde_json::from_slice(body).map_err(|e| SourceError::malformed("json", e))?;

        let code = match &response.status.code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| SourceError::malformed("json", "status code is not a number"))?;

        if code != CHART_STATUS_OK {
            return Err(SourceError::Status {
                code,
                message: response.status.message,
            });
        }

        let mut series = ObservationSeries::new();
        let points = response
            .data
            .into_iter()
            .flat_map(|data| data.r)
            .flat_map(|security| security.t)
            .flat_map(|track| track.d);

        for point in points {
            let Ok(date) = NaiveDate::parse_from_str(&point.i, "%Y-%m-%d") else {
                debug!(date = %point.i, "skipping chart point with unparseable date");
                continue;
            };
            let Some(value) = decimal_from_json(&point.v) else {
                debug!(date = %point.i, "skipping chart point without a price");
                continue;
            };
            series.push(Observation::new(stream, anchor.at(date), value));
        }

        Ok(series)
    }
}

#[async_trait::async_trait]
impl PageSource for MorningstarSource {
    type Selector = MorningstarTicker;

    fn name(&self) -> &str {
        "morningstar"
    }

    fn parse_ticker(&self, ticker: &str) -> Result<MorningstarTicker, TickerError> {
        let lowered = ticker.trim().to_lowercase();
        let parts: Vec<&str> = lowered.split(':').collect();
        let [security_type, exchange, symbol] = parts.as_slice() else {
            return Err(TickerError::new(
                "morningstar",
                ticker,
                "expected security_type:exchange:symbol",
            ));
        };
        if [security_type, exchange, symbol].iter().any(|p| p.is_empty()) {
            return Err(TickerError::new("morningstar", ticker, "empty ticker component"));
        }

        Ok(MorningstarTicker {
            security_type: security_type.to_string(),
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            key: lowered.clone(),
            sec_id: OnceCell::new(),
        })
    }

    fn anchor(&self) -> Anchor {
        self.anchor
    }

    fn period_for(&self, date: NaiveDate, _today: NaiveDate) -> Period {
        Period::window_ending(date, self.window_days)
    }

    async fn fetch_page(
        &self,
        period: &Period,
        ticker: &MorningstarTicker,
    ) -> Result<Option<ObservationSeries>, SourceError> {
        let sec_id = ticker
            .sec_id
            .get_or_try_init(|| self.lookup_sec_id(ticker))
            .await?;
        let Some(sec_id) = sec_id else {
            info!(ticker = %ticker.key, "could not find secId");
            return Ok(None);
        };

        let url = self.chart_request_url(sec_id, ticker.data_id(), period);
        let Some(body) = self.fetcher.fetch(&url).await? else {
            return Ok(None);
        };

        Self::parse_chart(&body, ticker.stream(), &self.anchor).map(Some)
    }
}
