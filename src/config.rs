use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::resolver::DEFAULT_MAX_HOPS;
use crate::sources::fss::{self, FssLayout};

/// Upper bound accepted for `resolver.max_hops`.
pub const MAX_ALLOWED_HOPS: u8 = 12;

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_user_agent() -> String {
    format!("price-sources/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP client settings shared by every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,

    /// How many times a failed request is retried before the page is given up on.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each further retry.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub retry_base_delay: Duration,

    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_retries: 3,
            retry_base_delay: default_retry_base_delay(),
            user_agent: default_user_agent(),
        }
    }
}

/// Nearest-prior-date resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How many earlier pages a single query may fall back to.
    pub max_hops: u8,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

/// Pension fund unit prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FssConfig {
    pub layout: FssLayout,
    /// Whole-history export, used by the `export` layout.
    pub url: String,
    /// Directory of `super-MM-YYYY.csv` files, used by the `monthly` layout.
    pub monthly_base_url: String,
}

impl Default for FssConfig {
    fn default() -> Self {
        Self {
            layout: FssLayout::default(),
            url: fss::DEFAULT_EXPORT_URL.to_string(),
            monthly_base_url: fss::DEFAULT_MONTHLY_BASE_URL.to_string(),
        }
    }
}

/// Morningstar quote pages and chart endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MorningstarConfig {
    pub quote_base_url: String,
    pub chart_url: String,
    /// IANA zone the chart dates are stamped in.
    pub timezone: String,
    /// Days before the target date covered by one chart request.
    pub window_days: u32,
}

impl Default for MorningstarConfig {
    fn default() -> Self {
        Self {
            quote_base_url: crate::sources::morningstar::DEFAULT_QUOTE_BASE_URL.to_string(),
            chart_url: crate::sources::morningstar::DEFAULT_CHART_URL.to_string(),
            timezone: "UTC".to_string(),
            window_days: crate::sources::morningstar::DEFAULT_WINDOW_DAYS,
        }
    }
}

/// Open Exchange Rates API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenExchangeConfig {
    pub base_url: String,
    /// App id used for tickers of the short `FROM_TO` form.
    #[serde(skip_serializing)]
    pub app_id: Option<String>,
}

impl Default for OpenExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: crate::sources::openexchange::DEFAULT_BASE_URL.to_string(),
            app_id: None,
        }
    }
}

/// Reserve Bank of Australia RSS feed and historical spreadsheets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RbaConfig {
    pub base_url: String,
}

impl Default for RbaConfig {
    fn default() -> Self {
        Self {
            base_url: crate::sources::rba::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub resolver: ResolverConfig,
    pub fss: FssConfig,
    pub morningstar: MorningstarConfig,
    pub openexchange: OpenExchangeConfig,
    pub rba: RbaConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolver.max_hops > MAX_ALLOWED_HOPS {
            bail!(
                "resolver.max_hops must be at most {MAX_ALLOWED_HOPS}, got {}",
                self.resolver.max_hops
            );
        }
        if self.morningstar.window_days == 0 {
            bail!("morningstar.window_days must be positive");
        }
        self.morningstar.tz()?;
        Ok(())
    }
}

impl MorningstarConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid morningstar.timezone '{}': {}", self.timezone, e))
    }
}

/// Default config path: `$XDG_CONFIG_HOME/price-sources/config.toml` or the
/// platform equivalent, falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("price-sources").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("price-sources.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[http]")?;
        writeln!(file, "timeout = \"30s\"")?;
        writeln!(file, "retry_base_delay = \"250ms\"")?;
        writeln!(file, "[resolver]")?;
        writeln!(file, "max_hops = 3")?;
        writeln!(file, "[openexchange]")?;
        writeln!(file, "app_id = \"abc\"")?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.http.timeout, Duration::from_secs(30));
        assert_eq!(config.http.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.resolver.max_hops, 3);
        assert_eq!(config.openexchange.app_id.as_deref(), Some("abc"));
        assert_eq!(config.rba.base_url, crate::sources::rba::DEFAULT_BASE_URL);

        Ok(())
    }

    #[test]
    fn test_load_empty_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.resolver.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(config.http.timeout, Duration::from_secs(10));
        assert_eq!(config.morningstar.tz()?, chrono_tz::UTC);

        Ok(())
    }

    #[test]
    fn test_fss_monthly_layout() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[fss]\nlayout = \"monthly\"\nmonthly_base_url = \"http://localhost/prices\"\n",
        )?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.fss.layout, FssLayout::Monthly);
        assert_eq!(config.fss.monthly_base_url, "http://localhost/prices");
        assert_eq!(config.fss.url, fss::DEFAULT_EXPORT_URL);
        assert_eq!(Config::default().fss.layout, FssLayout::Export);

        Ok(())
    }

    #[test]
    fn test_invalid_timezone_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[morningstar]\ntimezone = \"Mars/Olympus\"\n")?;

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Mars/Olympus"));

        Ok(())
    }

    #[test]
    fn test_hop_limit_enforced() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[resolver]\nmax_hops = 200\n")?;

        assert!(Config::load(&config_path).is_err());

        Ok(())
    }

    #[test]
    fn test_bad_duration_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[http]\ntimeout = \"soon\"\n")?;

        assert!(Config::load(&config_path).is_err());

        Ok(())
    }

    #[test]
    fn test_load_or_default_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config = Config::load_or_default(&dir.path().join("missing.toml"))?;
        assert_eq!(config.fss.url, fss::DEFAULT_EXPORT_URL);
        Ok(())
    }

    #[test]
    fn test_app_id_not_serialized() -> Result<()> {
        let mut config = Config::default();
        config.openexchange.app_id = Some("secret".to_string());
        let rendered = toml::to_string(&config)?;
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("timeout = \"10s\""));
        Ok(())
    }
}
