use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use newsbrief::compose::Composer;
use newsbrief::config::Config;
use newsbrief::feed::FeedFetcher;
use newsbrief::history::HistoryStore;
use newsbrief::mail::Mailer;
use newsbrief::pipeline::{self, Delivery};

#[derive(Parser, Debug)]
#[command(name = "newsbrief", about = "Daily news briefing mailed from RSS/Atom feeds")]
struct Args {
    /// Config file (default: ~/.config/newsbrief/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// History file, overriding `history_path` from the config
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Print the digest HTML instead of mailing it; history is left untouched
    #[arg(long)]
    dry_run: bool,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Loads the config, falling back to defaults on any error.
fn load_config(path: Option<PathBuf>, config_dir: Option<&PathBuf>) -> Config {
    let Some(path) = path.or_else(|| config_dir.map(|d| d.join("config.toml"))) else {
        tracing::warn!("HOME not set and no --config given, using defaults");
        return Config::default();
    };

    match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Invalid config, using defaults");
            Config::default()
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_dir = Config::default_dir();
    let config = load_config(args.config, config_dir.as_ref());

    let history_path = args
        .history
        .unwrap_or_else(|| config.resolved_history_path(config_dir.as_deref()));
    let store = HistoryStore::new(history_path, config.history_cap);

    let fetcher = FeedFetcher::from_config(&config).context("Failed to build HTTP client")?;
    let llm_client = reqwest::Client::builder()
        .build()
        .context("Failed to build LLM HTTP client")?;
    let composer = Composer::from_config(&config.llm, llm_client, env_var)
        .with_title(config.email.subject.as_str());

    let mailer;
    let delivery = if args.dry_run {
        Delivery::DryRun
    } else {
        mailer = Mailer::from_config(&config.email, env_var);
        Delivery::Mail(&mailer)
    };

    let report = pipeline::run(&config, &store, &fetcher, &composer, delivery).await;
    report.log();

    if let Some(html) = &report.html {
        println!("{html}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Partial failures are reported in the log; the exit status stays 0
    if let Err(e) = run(Args::parse()).await {
        tracing::error!(error = ?e, "Run aborted");
    }
}
