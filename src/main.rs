use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use price_sources::config::{default_config_path, Config};
use price_sources::registry::{LedgerPair, PriceSpec, SourceKind, SourceRegistry};
use price_sources::{ResolvedPrice, TargetQuery};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "price-sources")]
#[command(about = "Fetch prices and exchange rates for a plain-text ledger")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Emit logs and results as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Latest available price, e.g. `AUD:fss/International_Shares`
    Latest { spec: PriceSpec },
    /// Price as of a date (YYYY-MM-DD), falling back to the nearest earlier one
    Historical { spec: PriceSpec, date: NaiveDate },
    /// List available sources
    Sources,
    /// Show the effective configuration
    Config,
}

#[derive(Serialize)]
struct PriceOutput<'a> {
    source: SourceKind,
    ticker: &'a str,
    commodity: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    #[serde(flatten)]
    price: &'a ResolvedPrice,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

/// A ledger `P` directive: `P 2024-01-12 International_Shares 2.51 AUD`.
fn price_line(pair: &LedgerPair, price: &ResolvedPrice) -> String {
    let mut line = format!(
        "P {} {} {}",
        price.trade_date.date_naive(),
        pair.commodity,
        price.value
    );
    if let Some(unit) = pair.unit.as_deref().or(price.quote_currency.as_deref()) {
        line.push(' ');
        line.push_str(unit);
    }
    line
}

async fn show_price(
    registry: &SourceRegistry,
    spec: PriceSpec,
    query: TargetQuery,
    json: bool,
) -> Result<()> {
    let source = registry.build(spec.source)?;
    let ticker = spec.display_ticker();
    let price = source
        .get_price(&query)
        .await
        .with_context(|| format!("{} could not price '{}'", spec.source, ticker))?;

    let Some(price) = price else {
        anyhow::bail!("No price available for {}/{}", spec.source, ticker);
    };

    let pair = spec.ledger_pair();
    if json {
        let output = PriceOutput {
            source: spec.source,
            ticker: &ticker,
            commodity: &pair.commodity,
            unit: pair.unit.as_deref().or(price.quote_currency.as_deref()),
            price: &price,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", price_line(&pair, &price));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    let registry = SourceRegistry::new(config);

    match cli.command {
        Command::Latest { spec } => {
            let query = TargetQuery::latest(spec.ticker.clone());
            show_price(&registry, spec, query, cli.json).await?;
        }
        Command::Historical { spec, date } => {
            let query = TargetQuery::on(spec.ticker.clone(), date);
            show_price(&registry, spec, query, cli.json).await?;
        }
        Command::Sources => {
            for kind in SourceKind::ALL {
                println!("{:<14} {}", kind.as_str(), kind.description());
            }
        }
        Command::Config => {
            println!("# Config file: {}", cli.config.display());
            print!("{}", toml::to_string_pretty(registry.config())?);
        }
    }

    Ok(())
}
