//! Print the dedup cache (newest first) and the current rate window usage.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;

use polywatch::config::AppConfig;
use polywatch::state::{PostedCache, RateLimiter};

#[derive(Parser)]
#[command(name = "show_posted", about = "Inspect polywatch state files")]
struct Args {
    /// Config file (defaults to polywatch.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show at most this many entries
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());

    let cache = PostedCache::load(&config.paths.posted);
    let limiter = RateLimiter::load(
        &config.paths.rate_state,
        config.settings.max_posts_per_day,
        config.settings.rate_window,
    );

    println!("=== Posted alerts ({}) ===", cache.path().display());
    println!("Total entries: {}", cache.len());

    let mut entries = cache.entries().to_vec();
    entries.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    for entry in entries.iter().take(args.limit) {
        println!(
            "  {}  {}  post={}",
            entry.posted_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.key,
            entry.post_id.as_deref().unwrap_or("-")
        );
    }
    if entries.len() > args.limit {
        println!("  ... {} older entries", entries.len() - args.limit);
    }

    println!();
    println!(
        "Rate window ({}): {}/{} sent",
        limiter.window(),
        limiter.sent_in_window(Utc::now()),
        limiter.max_per_day()
    );
    Ok(())
}
