use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::format::{
    DEFAULT_FOOTER, DEFAULT_MAX_CHARS, MIN_MAX_CHARS, MessageOptions, fixed_chars,
};
use crate::pipeline::{FeedScope, RunSettings};
use crate::state::{POSTED_PATH, RATE_STATE_PATH, RateWindow};

/// Default config file path, read when present.
pub const CONFIG_PATH: &str = "polywatch.toml";

/// Default watchlist file (JSON array of wallet addresses).
pub const WALLETS_PATH: &str = "wallets.json";

/// Upper bound of the data API `limit` parameter.
const MAX_TRADE_LIMIT: u32 = 10_000;

/// Top-level application config: file settings plus env-only secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub message: MessageConfig,
    /// Never read from or written to the config file.
    #[serde(skip)]
    pub secrets: Secrets,
}

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Aggregation window, in minutes.
    #[serde(default = "default_since_minutes")]
    pub since_minutes: u32,
    /// Minimum absolute PnL (USD) for a position to qualify.
    #[serde(default = "default_min_profit")]
    pub min_profit_usd: Decimal,
    #[serde(default = "default_max_posts")]
    pub max_posts_per_day: u32,
    #[serde(default)]
    pub rate_window: RateWindow,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Server-side minimum fill notional (USD); zero disables the filter.
    #[serde(default = "default_min_trade_cash")]
    pub min_trade_cash: Decimal,
    #[serde(default = "default_trade_limit")]
    pub trade_limit: u32,
    /// Scan the global feed instead of the watchlist.
    #[serde(default = "default_true")]
    pub global_mode: bool,
    #[serde(default)]
    pub wallets: Vec<String>,
}

/// Store locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_posted_path")]
    pub posted: PathBuf,
    #[serde(default = "default_rate_state_path")]
    pub rate_state: PathBuf,
    #[serde(default = "default_wallets_path")]
    pub wallets: PathBuf,
}

/// Message rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_footer")]
    pub footer: String,
}

/// Credentials, taken from the environment only.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub x_user_access_token: Option<String>,
    pub fireworks_api_key: Option<String>,
    pub fireworks_model: Option<String>,
}

fn default_since_minutes() -> u32 {
    90
}

fn default_min_profit() -> Decimal {
    Decimal::from(10_000)
}

fn default_max_posts() -> u32 {
    17
}

fn default_true() -> bool {
    true
}

fn default_min_trade_cash() -> Decimal {
    Decimal::from(500)
}

fn default_trade_limit() -> u32 {
    1000
}

fn default_posted_path() -> PathBuf {
    PathBuf::from(POSTED_PATH)
}

fn default_rate_state_path() -> PathBuf {
    PathBuf::from(RATE_STATE_PATH)
}

fn default_wallets_path() -> PathBuf {
    PathBuf::from(WALLETS_PATH)
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_footer() -> String {
    DEFAULT_FOOTER.to_string()
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            since_minutes: default_since_minutes(),
            min_profit_usd: default_min_profit(),
            max_posts_per_day: default_max_posts(),
            rate_window: RateWindow::default(),
            dry_run: true,
            min_trade_cash: default_min_trade_cash(),
            trade_limit: default_trade_limit(),
            global_mode: true,
            wallets: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            posted: default_posted_path(),
            rate_state: default_rate_state_path(),
            wallets: default_wallets_path(),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            footer: default_footer(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicitly requested file, else `polywatch.toml` when present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(CONFIG_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay environment variables. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let s = &mut self.settings;
        env_parse(&lookup, "SINCE_MINUTES", &mut s.since_minutes);
        env_parse(&lookup, "MIN_PROFIT_USD", &mut s.min_profit_usd);
        env_parse(&lookup, "MAX_TWEETS_PER_DAY", &mut s.max_posts_per_day);
        env_parse(&lookup, "RATE_WINDOW", &mut s.rate_window);
        env_bool(&lookup, "DRY_RUN", &mut s.dry_run);
        env_parse(&lookup, "MIN_TRADE_CASH", &mut s.min_trade_cash);
        env_parse(&lookup, "TRADE_LIMIT", &mut s.trade_limit);
        env_bool(&lookup, "GLOBAL_MODE", &mut s.global_mode);
        if let Some(raw) = non_empty(lookup("WALLETS")) {
            s.wallets = parse_wallet_list(&raw);
        }

        let m = &mut self.message;
        env_parse(&lookup, "MAX_POST_CHARS", &mut m.max_chars);
        if let Some(footer) = lookup("POST_FOOTER") {
            m.footer = footer;
        }

        let p = &mut self.paths;
        if let Some(path) = non_empty(lookup("POSTED_PATH")) {
            p.posted = PathBuf::from(path);
        }
        if let Some(path) = non_empty(lookup("RATE_STATE_PATH")) {
            p.rate_state = PathBuf::from(path);
        }

        self.secrets = Secrets {
            x_user_access_token: non_empty(lookup("X_USER_ACCESS_TOKEN")),
            fireworks_api_key: non_empty(lookup("FIREWORKS_API_KEY")),
            fireworks_model: non_empty(lookup("FIREWORKS_MODEL")),
        };
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;
        if s.since_minutes == 0 {
            anyhow::bail!("since_minutes must be positive");
        }
        if s.min_profit_usd.is_sign_negative() {
            anyhow::bail!("min_profit_usd must not be negative");
        }
        if s.min_trade_cash.is_sign_negative() {
            anyhow::bail!("min_trade_cash must not be negative");
        }
        if !(1..=MAX_TRADE_LIMIT).contains(&s.trade_limit) {
            anyhow::bail!("trade_limit must be between 1 and {MAX_TRADE_LIMIT}");
        }
        if self.message.max_chars < MIN_MAX_CHARS {
            anyhow::bail!("max_chars must be at least {MIN_MAX_CHARS}");
        }
        let fixed = fixed_chars(&self.message_options());
        if fixed > self.message.max_chars {
            anyhow::bail!(
                "footer is too long: amount, link and footer need {fixed} chars but max_chars is {}",
                self.message.max_chars
            );
        }
        Ok(())
    }

    /// Wallets to scan in watchlist mode: configured list, else the wallets file.
    pub fn watchlist(&self) -> Vec<String> {
        if !self.settings.wallets.is_empty() {
            return self.settings.wallets.clone();
        }
        load_wallets_file(&self.paths.wallets)
    }

    pub fn message_options(&self) -> MessageOptions {
        MessageOptions {
            max_chars: self.message.max_chars,
            footer: self.message.footer.clone(),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        let s = &self.settings;
        RunSettings {
            window_minutes: s.since_minutes,
            min_pnl: s.min_profit_usd,
            min_trade_cash: Some(s.min_trade_cash).filter(|c| !c.is_zero()),
            trade_limit: s.trade_limit,
            dry_run: s.dry_run,
            scope: if s.global_mode {
                FeedScope::Global
            } else {
                FeedScope::Watchlist(self.watchlist())
            },
            message: self.message_options(),
        }
    }
}

/// Split a wallet list on commas when present, otherwise on whitespace.
pub fn parse_wallet_list(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = if raw.contains(',') {
        raw.split(',').collect()
    } else {
        raw.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_wallets_file(path: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&contents) {
        Ok(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!("Ignoring malformed wallets file {}: {e}", path.display());
            Vec::new()
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = non_empty(lookup(name)) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *target = v,
        Err(e) => warn!("Ignoring invalid {name}={raw:?}: {e}"),
    }
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut bool) {
    let Some(raw) = non_empty(lookup(name)) else {
        return;
    };
    match parse_bool(&raw) {
        Some(v) => *target = v,
        None => warn!("Ignoring invalid {name}={raw:?}: expected true/false"),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
