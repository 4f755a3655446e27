//! The two capabilities every provider plugs into.
//!
//! A provider implements [`PageSource`]: how to read a ticker, which period a
//! date falls in, and how to fetch one page of observations. Everything about
//! picking the right observation lives in [`Resolver`]. [`ResolvingSource`]
//! glues the two together into the [`PriceSource`] contract the ledger calls.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;

use crate::clock::{Clock, SystemClock};
use crate::error::{SourceError, TickerError};
use crate::models::{Anchor, ObservationSeries, ResolvedPrice, Target, TargetQuery};
use crate::period::Period;
use crate::resolver::Resolver;

/// A parsed ticker that knows which stream of a page it refers to.
pub trait StreamSelector {
    fn stream(&self) -> &str;
}

/// Provider adapter: fetch one page, nothing more.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    type Selector: StreamSelector + Send + Sync;

    fn name(&self) -> &str;

    fn parse_ticker(&self, ticker: &str) -> Result<Self::Selector, TickerError>;

    /// Zone and time of day this provider stamps its trading days with.
    fn anchor(&self) -> Anchor;

    /// The page covering `date`. `today` is the current date in the anchor zone.
    fn period_for(&self, date: NaiveDate, today: NaiveDate) -> Period;

    /// The page to fall back to before `period`, or `None` when there is none.
    fn previous_period(&self, period: &Period) -> Option<Period> {
        period.preceding()
    }

    /// Currency the price is quoted in, when the source converts currencies.
    fn quote_currency(&self, _selector: &Self::Selector) -> Option<String> {
        None
    }

    /// Fetch and decode one page. `Ok(None)` means the page does not exist.
    async fn fetch_page(
        &self,
        period: &Period,
        selector: &Self::Selector,
    ) -> Result<Option<ObservationSeries>, SourceError>;
}

/// The host ledger's price source contract.
///
/// `Ok(None)` means no price is available; callers skip the quote and move on.
/// `Err` is reserved for tickers the source cannot interpret.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_latest_price(&self, ticker: &str) -> Result<Option<ResolvedPrice>>;

    async fn get_historical_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<ResolvedPrice>>;

    fn name(&self) -> &str;

    async fn get_price(&self, query: &TargetQuery) -> Result<Option<ResolvedPrice>> {
        match query.target {
            Target::Latest => self.get_latest_price(&query.ticker).await,
            Target::On(date) => self.get_historical_price(&query.ticker, date).await,
        }
    }
}

/// A [`PageSource`] served through the shared [`Resolver`].
pub struct ResolvingSource<S> {
    source: S,
    resolver: Resolver,
    clock: Arc<dyn Clock>,
}

impl<S: PageSource> ResolvingSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            resolver: Resolver::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    fn today(&self) -> NaiveDate {
        self.clock.today_in(self.source.anchor().tz)
    }

    async fn resolve(&self, ticker: &str, date: NaiveDate) -> Result<Option<ResolvedPrice>> {
        let selector = self.source.parse_ticker(ticker)?;
        Ok(self
            .resolver
            .resolve(&self.source, &selector, date, self.today())
            .await)
    }
}

#[async_trait::async_trait]
impl<S: PageSource> PriceSource for ResolvingSource<S> {
    async fn get_latest_price(&self, ticker: &str) -> Result<Option<ResolvedPrice>> {
        self.resolve(ticker, self.today()).await
    }

    async fn get_historical_price(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<ResolvedPrice>> {
        self.resolve(ticker, date).await
    }

    fn name(&self) -> &str {
        self.source.name()
    }
}
