//! Nearest-prior-date resolution.
//!
//! Given a target date, the resolver fetches the page covering it and picks the
//! latest observation of the requested stream that is not after the target.
//! When the page is missing, or only holds later observations (a query on the
//! first weekend of a month before that month's file is published), it walks
//! back to the preceding page, at most `max_hops` times.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::models::{Observation, ObservationSeries, ResolvedPrice};
use crate::source::{PageSource, StreamSelector};

/// Default number of earlier pages one query may fall back to.
pub const DEFAULT_MAX_HOPS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    max_hops: u8,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl Resolver {
    pub const fn new(max_hops: u8) -> Self {
        Self { max_hops }
    }

    pub const fn max_hops(&self) -> u8 {
        self.max_hops
    }

    /// Resolve the price of `selector` as of `date`.
    ///
    /// Returns `None` when no observation at or before the target can be
    /// found within the fallback budget. Fetch and decode failures are logged
    /// and treated as a missing page.
    ///
    /// An unavailable page is only skipped once: if the first fallback page is
    /// unavailable too the query ends there, since the provider is most
    /// likely down.
    pub async fn resolve<S: PageSource>(
        &self,
        source: &S,
        selector: &S::Selector,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Option<ResolvedPrice> {
        let anchor = source.anchor();
        let stream = selector.stream();
        let mut target = anchor.at(date);
        let mut period = source.period_for(date, today);
        let mut hops: u8 = 0;

        loop {
            let page = match source.fetch_page(&period, selector).await {
                Ok(Some(page)) if !page.is_empty() => Some(page),
                Ok(_) => {
                    debug!(source = source.name(), %period, "page unavailable");
                    None
                }
                Err(e) => {
                    warn!(source = source.name(), %period, error = %e, "failed to fetch page");
                    None
                }
            };

            let may_fall_back = match page {
                None => hops == 0 && self.max_hops > 0,
                Some(page) => {
                    if let Some(found) = nearest_prior(&page, stream, &target) {
                        info!(
                            source = source.name(),
                            stream,
                            %period,
                            hops,
                            at = %found.at,
                            value = %found.value,
                            "resolved price"
                        );
                        return Some(ResolvedPrice {
                            value: found.value,
                            trade_date: found.at,
                            quote_currency: source.quote_currency(selector),
                        });
                    }
                    debug!(
                        source = source.name(),
                        stream,
                        %period,
                        target = %target,
                        observations = page.in_stream(stream).count(),
                        "no observation at or before target"
                    );
                    hops < self.max_hops
                }
            };

            if !may_fall_back {
                info!(source = source.name(), stream, %date, hops, "no price available");
                return None;
            }

            let Some(previous) = source.previous_period(&period) else {
                info!(source = source.name(), stream, %period, "no earlier page to fall back to");
                return None;
            };

            target = target.min(anchor.at(previous.last_day()));
            debug!(source = source.name(), from = %period, to = %previous, "falling back");
            period = previous;
            hops += 1;
        }
    }
}

/// The latest observation of `stream` not after `target`.
///
/// Ties go to the first observation in fetch order.
pub fn nearest_prior<'a>(
    page: &'a ObservationSeries,
    stream: &'a str,
    target: &DateTime<Tz>,
) -> Option<&'a Observation> {
    page.in_stream(stream)
        .filter(|o| o.at <= *target)
        .fold(None, |best: Option<&Observation>, o| match best {
            Some(b) if b.at >= o.at => Some(b),
            _ => Some(o),
        })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::error::{SourceError, TickerError};
    use crate::models::Anchor;
    use crate::period::Period;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const ANCHOR: Anchor = Anchor::midnight(chrono_tz::UTC);

    fn obs(stream: &str, d: NaiveDate, value: &str) -> Observation {
        Observation::new(stream, ANCHOR.at(d), dec(value))
    }

    struct Fund(String);

    impl StreamSelector for Fund {
        fn stream(&self) -> &str {
            &self.0
        }
    }

    /// Monthly pages held in memory. A month missing from the map fails to fetch.
    struct MonthlyPages {
        pages: Vec<(Period, ObservationSeries)>,
        fetched: Mutex<Vec<Period>>,
    }

    impl MonthlyPages {
        fn new(pages: Vec<(NaiveDate, Vec<Observation>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(d, obs)| (Period::month_containing(d), obs.into()))
                    .collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<Period> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PageSource for MonthlyPages {
        type Selector = Fund;

        fn name(&self) -> &str {
            "monthly"
        }

        fn parse_ticker(&self, ticker: &str) -> Result<Fund, TickerError> {
            Ok(Fund(ticker.to_string()))
        }

        fn anchor(&self) -> Anchor {
            ANCHOR
        }

        fn period_for(&self, date: NaiveDate, _today: NaiveDate) -> Period {
            Period::month_containing(date)
        }

        async fn fetch_page(
            &self,
            period: &Period,
            _selector: &Fund,
        ) -> Result<Option<ObservationSeries>, SourceError> {
            self.fetched.lock().unwrap().push(*period);
            match self.pages.iter().find(|(p, _)| p == period) {
                Some((_, page)) => Ok(Some(page.clone())),
                None => Err(SourceError::malformed("test", "no such page")),
            }
        }
    }

    async fn resolve(source: &MonthlyPages, fund: &str, on: NaiveDate) -> Option<ResolvedPrice> {
        Resolver::default()
            .resolve(source, &Fund(fund.to_string()), on, date(2030, 1, 1))
            .await
    }

    #[tokio::test]
    async fn picks_latest_observation_not_after_target() {
        let source = MonthlyPages::new(vec![(
            date(2024, 1, 1),
            vec![
                obs("F", date(2024, 1, 19), "11.00"),
                obs("F", date(2024, 1, 5), "10.00"),
                obs("F", date(2024, 1, 12), "10.50"),
            ],
        )]);

        let price = resolve(&source, "F", date(2024, 1, 15)).await.unwrap();
        assert_eq!(price.value, dec("10.50"));
        assert_eq!(price.trade_date, ANCHOR.at(date(2024, 1, 12)));
        assert_eq!(price.quote_currency, None);
        assert_eq!(source.fetched().len(), 1);
    }

    #[tokio::test]
    async fn exact_date_match_wins() {
        let source = MonthlyPages::new(vec![(
            date(2024, 1, 1),
            vec![
                obs("F", date(2024, 1, 5), "10.00"),
                obs("F", date(2024, 1, 12), "10.50"),
            ],
        )]);

        let price = resolve(&source, "F", date(2024, 1, 5)).await.unwrap();
        assert_eq!(price.value, dec("10.00"));
    }

    #[tokio::test]
    async fn other_streams_are_ignored() {
        let source = MonthlyPages::new(vec![(
            date(2024, 1, 1),
            vec![
                obs("G", date(2024, 1, 14), "99"),
                obs("F", date(2024, 1, 12), "10.50"),
            ],
        )]);

        let price = resolve(&source, "F", date(2024, 1, 15)).await.unwrap();
        assert_eq!(price.value, dec("10.50"));
    }

    #[tokio::test]
    async fn tie_goes_to_first_in_fetch_order() {
        let source = MonthlyPages::new(vec![(
            date(2024, 1, 1),
            vec![
                obs("F", date(2024, 1, 12), "1.00"),
                obs("F", date(2024, 1, 12), "2.00"),
            ],
        )]);

        let price = resolve(&source, "F", date(2024, 1, 20)).await.unwrap();
        assert_eq!(price.value, dec("1.00"));
    }

    #[tokio::test]
    async fn target_before_page_falls_back_once() {
        let source = MonthlyPages::new(vec![
            (date(2024, 1, 1), vec![obs("F", date(2024, 1, 3), "10.00")]),
            (date(2023, 12, 1), vec![obs("F", date(2023, 12, 29), "9.80")]),
        ]);

        let price = resolve(&source, "F", date(2024, 1, 2)).await.unwrap();
        assert_eq!(price.value, dec("9.80"));
        assert_eq!(
            source.fetched(),
            vec![
                Period::Month(date(2024, 1, 1)),
                Period::Month(date(2023, 12, 1))
            ]
        );
    }

    #[tokio::test]
    async fn unavailable_page_falls_back_to_previous_period() {
        let source = MonthlyPages::new(vec![(
            date(2023, 12, 1),
            vec![obs("F", date(2023, 12, 29), "9.80")],
        )]);

        let price = resolve(&source, "F", date(2024, 1, 2)).await.unwrap();
        assert_eq!(price.value, dec("9.80"));
        assert_eq!(price.trade_date, ANCHOR.at(date(2023, 12, 29)));
    }

    #[tokio::test]
    async fn two_unavailable_pages_give_up() {
        let source = MonthlyPages::new(vec![(
            date(2023, 11, 1),
            vec![obs("F", date(2023, 11, 30), "9.00")],
        )]);

        assert_eq!(resolve(&source, "F", date(2024, 1, 2)).await, None);
        assert_eq!(source.fetched().len(), 2);
    }

    #[tokio::test]
    async fn hop_limit_bounds_fetches() {
        let early = |d| (d, vec![obs("F", date(2030, 1, 1), "1")]);
        let source = MonthlyPages::new(vec![
            early(date(2024, 3, 1)),
            early(date(2024, 2, 1)),
            early(date(2024, 1, 1)),
            early(date(2023, 12, 1)),
        ]);

        assert_eq!(resolve(&source, "F", date(2024, 3, 15)).await, None);
        assert_eq!(source.fetched().len(), 1 + usize::from(DEFAULT_MAX_HOPS));
    }

    #[tokio::test]
    async fn zero_hops_never_falls_back() {
        let source = MonthlyPages::new(vec![(
            date(2023, 12, 1),
            vec![obs("F", date(2023, 12, 29), "9.80")],
        )]);

        let price = Resolver::new(0)
            .resolve(&source, &Fund("F".into()), date(2024, 1, 2), date(2030, 1, 1))
            .await;
        assert_eq!(price, None);
        assert_eq!(source.fetched().len(), 1);
    }

    #[tokio::test]
    async fn repeated_queries_agree() {
        let source = MonthlyPages::new(vec![(
            date(2024, 1, 1),
            vec![obs("F", date(2024, 1, 12), "10.50")],
        )]);

        let first = resolve(&source, "F", date(2024, 1, 15)).await;
        let second = resolve(&source, "F", date(2024, 1, 15)).await;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn nearest_prior_ignores_later_observations() {
        let page: ObservationSeries = vec![
            obs("F", date(2024, 1, 19), "11.00"),
            obs("F", date(2024, 1, 12), "10.50"),
        ]
        .into();

        let target = ANCHOR.at(date(2024, 1, 11));
        assert!(nearest_prior(&page, "F", &target).is_none());
    }
}
