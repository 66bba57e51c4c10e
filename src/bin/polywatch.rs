use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use polywatch::api::DataApiClient;
use polywatch::config::AppConfig;
use polywatch::format::format_plain;
use polywatch::headline::Headlines;
use polywatch::notifier::{Notifier, XNotifier};
use polywatch::pipeline::{FeedScope, Pipeline, Stores};
use polywatch::reporter::{self, TestMessageReport};

#[derive(Parser)]
#[command(name = "polywatch", about = "Alert on large Polymarket trade PnL")]
struct Args {
    /// Render the alert without posting or touching state files
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,

    /// Post the alert and record it
    #[arg(long, conflicts_with = "dry_run")]
    live: bool,

    /// Config file (defaults to polywatch.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Post this text instead of running the pipeline
    #[arg(long, value_name = "TEXT")]
    test_message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());
    if args.dry_run {
        config.settings.dry_run = true;
    } else if args.live {
        config.settings.dry_run = false;
    }
    config.validate()?;

    let dry_run = config.settings.dry_run;
    let notifier = XNotifier::new(config.secrets.x_user_access_token.clone())?;
    if !dry_run && !notifier.has_credentials() {
        anyhow::bail!("Live mode requires X_USER_ACCESS_TOKEN");
    }

    if let Some(text) = args.test_message.as_deref() {
        return send_test_message(text, &config, &notifier).await;
    }

    let settings = config.run_settings();
    let mode = if dry_run { "dry-run" } else { "live" };
    let scope = match &settings.scope {
        FeedScope::Global => "global".to_string(),
        FeedScope::Watchlist(wallets) => format!("watchlist({})", wallets.len()),
    };
    info!(
        "Starting polywatch ({mode}) — scope={scope} window={}m threshold={} cap={}/day ({})",
        settings.window_minutes,
        settings.min_pnl,
        config.settings.max_posts_per_day,
        config.settings.rate_window,
    );

    let source = DataApiClient::new()?;
    let headlines = Headlines::new(
        config.secrets.fireworks_api_key.clone(),
        config.secrets.fireworks_model.clone(),
    )?;
    if !headlines.is_enabled() {
        info!("FIREWORKS_API_KEY not set, using template headlines");
    }

    let mut stores = Stores::load(
        &config.paths.posted,
        &config.paths.rate_state,
        config.settings.max_posts_per_day,
        config.settings.rate_window,
    );

    let pipeline = Pipeline {
        source: &source,
        headlines: &headlines,
        notifier: &notifier,
        settings: &settings,
    };
    let report = pipeline.run(&mut stores, Utc::now()).await?;
    reporter::report_run(&report);
    Ok(())
}

async fn send_test_message(text: &str, config: &AppConfig, notifier: &XNotifier) -> Result<()> {
    let message = format_plain(text, &config.message_options());
    let dry_run = config.settings.dry_run;

    let post_id = if dry_run {
        info!("Dry run, test message not posted:\n{message}");
        None
    } else {
        notifier.notify(&message).await?.post_id
    };

    reporter::report_test_message(&TestMessageReport {
        timestamp: Utc::now().to_rfc3339(),
        dry_run,
        message,
        post_id,
    });
    Ok(())
}
