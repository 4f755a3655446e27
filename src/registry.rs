//! Building configured sources by name.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::net::HttpFetcher;
use crate::resolver::Resolver;
use crate::source::{PageSource, PriceSource, ResolvingSource};
use crate::sources::{FssSource, MorningstarSource, OpenExchangeSource, RbaSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Fss,
    Morningstar,
    Openexchange,
    Rba,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Fss,
        SourceKind::Morningstar,
        SourceKind::Openexchange,
        SourceKind::Rba,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Fss => "fss",
            SourceKind::Morningstar => "morningstar",
            SourceKind::Openexchange => "openexchange",
            SourceKind::Rba => "rba",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SourceKind::Fss => "pension fund unit prices (CSV export or monthly files)",
            SourceKind::Morningstar => "fund and ETF prices (chart JSON)",
            SourceKind::Openexchange => "exchange rates (Open Exchange Rates API)",
            SourceKind::Rba => "AUD exchange rates (RBA RSS feed and archives)",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .with_context(|| {
                let known: Vec<_> = SourceKind::ALL.iter().map(SourceKind::as_str).collect();
                format!("Unknown price source '{s}' (known: {})", known.join(", "))
            })
    }
}

/// A ledger price command target: `[CURRENCY:]source/ticker`,
/// e.g. `AUD:fss/International_Shares` or `rba/USD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSpec {
    pub currency: Option<String>,
    pub source: SourceKind,
    pub ticker: String,
}

impl FromStr for PriceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((head, ticker)) = s.trim().split_once('/') else {
            bail!("Price spec '{s}' must look like [CURRENCY:]source/ticker");
        };
        let (currency, source) = match head.split_once(':') {
            Some((currency, source)) => {
                let currency = currency.trim().to_ascii_uppercase();
                if currency.is_empty() {
                    bail!("Price spec '{s}' has an empty currency");
                }
                (Some(currency), source)
            }
            None => (None, head),
        };
        if ticker.trim().is_empty() {
            bail!("Price spec '{s}' has an empty ticker");
        }
        Ok(Self {
            currency,
            source: source.parse()?,
            ticker: ticker.trim().to_string(),
        })
    }
}

/// Home currency of the RBA rates.
const RBA_BASE_CURRENCY: &str = "AUD";

/// What a ledger price directive prices, and in which unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPair {
    pub commodity: String,
    /// `None` for single-asset sources given without a currency prefix.
    pub unit: Option<String>,
}

impl PriceSpec {
    /// The commodity and unit of a `P` directive for this spec.
    ///
    /// Exchange-rate sources price one currency in another, so the pair comes
    /// from the ticker rather than the ticker text itself.
    pub fn ledger_pair(&self) -> LedgerPair {
        match self.source {
            SourceKind::Fss => LedgerPair {
                commodity: self.ticker.clone(),
                unit: self.currency.clone(),
            },
            SourceKind::Morningstar => LedgerPair {
                commodity: self
                    .ticker
                    .rsplit(':')
                    .next()
                    .unwrap_or(&self.ticker)
                    .to_ascii_uppercase(),
                unit: self.currency.clone(),
            },
            SourceKind::Openexchange => {
                let pair = self.ticker.rsplit(':').next().unwrap_or_default();
                match pair.split_once('_') {
                    Some((from, to)) => LedgerPair {
                        commodity: from.trim().to_ascii_uppercase(),
                        unit: Some(to.trim().to_ascii_uppercase()),
                    },
                    None => LedgerPair {
                        commodity: pair.trim().to_ascii_uppercase(),
                        unit: None,
                    },
                }
            }
            SourceKind::Rba => {
                let currency = self.ticker.trim();
                LedgerPair {
                    commodity: RBA_BASE_CURRENCY.to_string(),
                    unit: Some(if currency.is_empty() {
                        "USD".to_string()
                    } else {
                        currency.to_ascii_uppercase()
                    }),
                }
            }
        }
    }

    /// The ticker as it may appear in output and errors.
    pub fn display_ticker(&self) -> Cow<'_, str> {
        match (self.source, self.ticker.rsplit_once(':')) {
            (SourceKind::Openexchange, Some((_, pair))) => Cow::Owned(format!("***:{pair}")),
            _ => Cow::Borrowed(&self.ticker),
        }
    }
}

/// Builds price sources from the loaded configuration.
pub struct SourceRegistry {
    config: Config,
    clock: Arc<dyn Clock>,
}

impl SourceRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn build(&self, kind: SourceKind) -> Result<Arc<dyn PriceSource>> {
        let fetcher = HttpFetcher::new(&self.config.http)
            .context("Failed to build HTTP client")?;

        let source = match kind {
            SourceKind::Fss => {
                let cfg = &self.config.fss;
                self.wrap(
                    FssSource::new(fetcher)
                        .with_url(&cfg.url)
                        .with_layout(cfg.layout)
                        .with_monthly_base_url(&cfg.monthly_base_url),
                )
            }
            SourceKind::Morningstar => {
                let cfg = &self.config.morningstar;
                self.wrap(
                    MorningstarSource::new(fetcher)
                        .with_quote_base_url(&cfg.quote_base_url)
                        .with_chart_url(&cfg.chart_url)
                        .with_timezone(cfg.tz()?)
                        .with_window_days(cfg.window_days),
                )
            }
            SourceKind::Openexchange => {
                let cfg = &self.config.openexchange;
                let mut source = OpenExchangeSource::new(fetcher).with_base_url(&cfg.base_url);
                if let Some(app_id) = &cfg.app_id {
                    source = source.with_app_id(app_id);
                }
                self.wrap(source)
            }
            SourceKind::Rba => {
                self.wrap(RbaSource::new(fetcher).with_base_url(&self.config.rba.base_url))
            }
        };

        Ok(source)
    }

    pub fn build_by_name(&self, name: &str) -> Result<Arc<dyn PriceSource>> {
        self.build(name.parse()?)
    }

    fn wrap<S: PageSource + 'static>(&self, source: S) -> Arc<dyn PriceSource> {
        Arc::new(
            ResolvingSource::new(source)
                .with_resolver(Resolver::new(self.config.resolver.max_hops))
                .with_clock(self.clock.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("rba".parse::<SourceKind>().unwrap(), SourceKind::Rba);
        assert_eq!(" FSS ".parse::<SourceKind>().unwrap(), SourceKind::Fss);

        let err = "yahoo".parse::<SourceKind>().unwrap_err();
        assert!(err.to_string().contains("openexchange"));
    }

    #[test]
    fn test_price_spec_with_currency() {
        let spec: PriceSpec = "aud:fss/International_Shares".parse().unwrap();
        assert_eq!(spec.currency.as_deref(), Some("AUD"));
        assert_eq!(spec.source, SourceKind::Fss);
        assert_eq!(spec.ticker, "International_Shares");
    }

    #[test]
    fn test_price_spec_keeps_ticker_separators() {
        let spec: PriceSpec = "openexchange/abc123:USD_VND".parse().unwrap();
        assert_eq!(spec.currency, None);
        assert_eq!(spec.source, SourceKind::Openexchange);
        assert_eq!(spec.ticker, "abc123:USD_VND");

        let spec: PriceSpec = "USD:morningstar/etfs:ARCX:GSLC".parse().unwrap();
        assert_eq!(spec.ticker, "etfs:ARCX:GSLC");
    }

    #[test]
    fn test_price_spec_rejects_malformed() {
        assert!("fss".parse::<PriceSpec>().is_err());
        assert!("fss/".parse::<PriceSpec>().is_err());
        assert!(":fss/Growth".parse::<PriceSpec>().is_err());
        assert!("bogus/Growth".parse::<PriceSpec>().is_err());
    }

    fn pair(spec: &str) -> LedgerPair {
        spec.parse::<PriceSpec>().unwrap().ledger_pair()
    }

    #[test]
    fn test_ledger_pairs() {
        assert_eq!(
            pair("AUD:fss/International_Shares"),
            LedgerPair {
                commodity: "International_Shares".into(),
                unit: Some("AUD".into())
            }
        );
        assert_eq!(pair("USD:morningstar/etfs:ARCX:gslc").commodity, "GSLC");
        assert_eq!(pair("morningstar/etfs:ARCX:GSLC").unit, None);
        assert_eq!(
            pair("USD:openexchange/topsecret:usd_vnd"),
            LedgerPair {
                commodity: "USD".into(),
                unit: Some("VND".into())
            }
        );
        assert_eq!(
            pair("rba/usd"),
            LedgerPair {
                commodity: "AUD".into(),
                unit: Some("USD".into())
            }
        );
    }

    #[test]
    fn test_display_ticker_hides_app_id() {
        let spec: PriceSpec = "openexchange/topsecret:USD_VND".parse().unwrap();
        assert_eq!(spec.display_ticker(), "***:USD_VND");

        let spec: PriceSpec = "openexchange/USD_VND".parse().unwrap();
        assert_eq!(spec.display_ticker(), "USD_VND");

        let spec: PriceSpec = "morningstar/etfs:ARCX:GSLC".parse().unwrap();
        assert_eq!(spec.display_ticker(), "etfs:ARCX:GSLC");
    }

    #[test]
    fn test_builds_every_source() {
        let registry = SourceRegistry::new(Config::default());
        for kind in SourceKind::ALL {
            let source = registry.build(kind).unwrap();
            assert_eq!(source.name(), kind.as_str());
        }
        assert!(registry.build_by_name("nope").is_err());
    }
}
