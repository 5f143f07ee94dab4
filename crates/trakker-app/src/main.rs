//! TrakkerTime command-line client.
//!
//! ## Usage
//!
//! ```bash
//! # Install the offline shell from a live deployment
//! trakker precache --scope https://localhost:7233/
//!
//! # Start a billable timer
//! trakker start --billing-status Billable --billing-rate 95 --field description="Design review"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use trakker_app::{register_shell, AppConfig, BillingStatus, PageFetcher, TimerClient, TimerPage};
use trakker_common::{init_logging, LogConfig, LogFormat, OptionExt};
use trakker_net::{Fetcher, HttpLoader, LoaderConfig, Origin};
use trakker_sw::{CacheStorage, ServiceWorkerContainer};
use url::Url;

#[derive(Parser)]
#[command(name = "trakker")]
#[command(about = "TrakkerTime time-tracking client")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, default_value = "trakker.json")]
    config: PathBuf,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Debug logging with source locations
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the offline shell and precache it
    Precache {
        /// Page URL the shell is served from
        #[arg(long)]
        scope: Option<Url>,
    },

    /// Start a timer
    Start {
        /// Billable or NonBillable
        #[arg(long)]
        billing_status: Option<BillingStatus>,
        /// Hourly rate, required for billable entries
        #[arg(long)]
        billing_rate: Option<String>,
        /// Extra form field, as name=value
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}

fn container(config: &AppConfig) -> anyhow::Result<Arc<ServiceWorkerContainer>> {
    let loader: Arc<dyn Fetcher> = Arc::new(HttpLoader::new(LoaderConfig::default())?);
    let caches = match config.service_worker.cache_quota_bytes {
        Some(limit) => CacheStorage::with_quota(limit),
        None => CacheStorage::new(),
    };
    let (container, _events) = ServiceWorkerContainer::new(loader, Arc::new(caches));
    Ok(Arc::new(container))
}

async fn precache(config: &AppConfig, scope: Option<Url>) -> anyhow::Result<()> {
    let page_url = match scope {
        Some(url) => url,
        None => config.page_url()?,
    };
    let container = container(config)?;

    let scope = register_shell(&container, &page_url, &config.service_worker)
        .await
        .with_context(|| format!("installing the offline shell for {page_url}"))?;

    let cache_name = config.service_worker.cache_name();
    let entries = container
        .caches
        .get(&cache_name)
        .await
        .ok_or_not_found(&cache_name)?
        .len()
        .await;
    println!("{cache_name}: {entries} entries precached for {scope}");
    Ok(())
}

async fn start(
    config: &AppConfig,
    billing_status: Option<BillingStatus>,
    billing_rate: Option<String>,
    fields: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let page_url = config.page_url()?;
    let container = container(config)?;
    let opened = container.open_client(page_url.clone()).await;
    let fetcher = PageFetcher::new(Arc::clone(&container))
        .for_client(opened.id.clone(), Origin::from_url(&page_url));
    let client = TimerClient::new(config.timer_endpoint()?, Arc::new(fetcher));
    let mut page = TimerPage::new(client);

    page.form.set_billing_status(billing_status);
    if let Some(rate) = billing_rate {
        page.form.set_billing_rate(rate);
    }
    for (name, value) in fields {
        page.form.set_field(name, value);
    }

    page.submit().await;
    container.close_client(&opened.id).await;
    if page.status().is_error() {
        bail!("{}", page.status());
    }
    println!("{}", page.status());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let base = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let mut logging = base.with_format(cli.log_format.unwrap_or(config.log_format));
    if let Some(filter) = &config.log_filter {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging)?;

    match cli.command {
        Commands::Precache { scope } => precache(&config, scope).await,
        Commands::Start {
            billing_status,
            billing_rate,
            fields,
        } => start(&config, billing_status, billing_rate, fields).await,
    }
}
