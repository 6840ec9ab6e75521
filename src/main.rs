use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sub_check::{
    config::Config,
    proxy::{dedup_raw, CheckResult, ProxyChecker, SubscriptionFetcher, SubscriptionParser},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Checks proxy subscriptions for live, capable nodes
#[derive(Parser)]
#[command(name = "sub-check")]
#[command(about = "Checks proxy subscriptions for live, capable nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch subscriptions and check every proxy
    Check {
        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Subscription URL (can specify multiple)
        #[arg(short = 's', long = "sub")]
        subs: Vec<String>,
        /// Number of concurrent workers
        #[arg(short = 'n', long)]
        concurrent: Option<usize>,
        /// Timeout in milliseconds for each request through a proxy
        #[arg(long)]
        timeout: Option<u64>,
        /// Do not draw the progress line
        #[arg(long)]
        no_progress: bool,
        /// MaxMind country database used for naming
        #[arg(long)]
        mmdb: Option<String>,
    },
    /// Decode and deduplicate a local subscription file
    Parse {
        /// Subscription file
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            config,
            subs,
            concurrent,
            timeout,
            no_progress,
            mmdb,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)
                    .with_context(|| format!("cannot load {}", path.display()))?,
                None => Config::default(),
            };

            config.sub_urls.extend(subs);
            if let Some(concurrent) = concurrent {
                config.concurrent = concurrent;
            }
            if let Some(timeout) = timeout {
                config.timeout = timeout;
            }
            if no_progress {
                config.print_progress = false;
            }
            if mmdb.is_some() {
                config.mmdb_path = mmdb;
            }
            config.validate()?;

            if config.sub_urls.is_empty() {
                bail!("no subscription urls configured (use --sub or sub-urls in the config)");
            }

            let fetcher = SubscriptionFetcher::with_config(config.fetcher_config())?;
            let entries = fetcher.fetch_all(&config.sub_urls).await?;
            info!("fetched {} proxies", entries.len());

            let candidates = dedup_raw(entries);
            info!("{} proxies after deduplication", candidates.len());

            let checker = ProxyChecker::with_config(config.checker_config());
            let report = checker.run(candidates).await?;

            for result in &report.results {
                println!("{}", format_result(result));
            }
        }
        Commands::Parse { input } => {
            let entries = SubscriptionParser::parse_file(&input)?;
            let total = entries.len();
            let candidates = dedup_raw(entries);

            println!(
                "Parsed {} proxies from {:?}, {} unique",
                total,
                input,
                candidates.len()
            );
            for proxy in &candidates {
                println!("{}", proxy);
            }
        }
    }

    Ok(())
}

fn format_result(result: &CheckResult) -> String {
    let services: Vec<String> = result
        .flags
        .reachable()
        .iter()
        .map(ToString::to_string)
        .collect();

    format!(
        "{}\t{}\t{}\t{}",
        result.name(),
        result.proxy.kind,
        result.proxy.address(),
        services.join(",")
    )
}
