#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use price_sources::clock::{Clock, FixedClock};
use price_sources::net::HttpFetcher;
use reqwest::Client;

/// A fetcher that gives up on the first server error.
pub fn fetcher() -> HttpFetcher {
    HttpFetcher::with_client(Client::new()).with_retries(0, Duration::from_millis(1))
}

/// A fetcher that retries quickly.
pub fn retrying_fetcher(max_retries: u32) -> HttpFetcher {
    HttpFetcher::with_client(Client::new()).with_retries(max_retries, Duration::from_millis(1))
}

/// A clock stopped at noon UTC on the given day.
pub fn clock_at(y: i32, m: u32, d: u32) -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
    ))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
