use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::DedupKey;

/// Default dedup cache file.
pub const POSTED_PATH: &str = "posted.json";

/// Default rate limiter state file.
pub const RATE_STATE_PATH: &str = "rate_state.json";

/// Send records older than this are pruned when the rate state is saved.
const RATE_RETENTION_HOURS: i64 = 48;

/// Read a JSON store, falling back to its default when missing or unreadable.
///
/// Dedup and rate state fail open: a broken file must never stop alerting.
fn load_store<T: DeserializeOwned + Default>(path: &Path, store: &str) -> T {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("{store} store {} unavailable ({e}), starting empty", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            warn!("{store} store {} is corrupt ({e}), starting empty", path.display());
            T::default()
        }
    }
}

/// Write a JSON store through a sibling temp file so readers never see a partial file.
fn save_store<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(value).context("failed to serialize store")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

// ── Dedup cache ────────────────────────────────────────────────────

/// One delivered alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: DedupKey,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub post_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    items: Vec<CacheEntry>,
}

/// Persistent record of positions that have already been alerted.
///
/// Entries never expire; the file has to be removed by hand to re-arm a key.
pub struct PostedCache {
    path: PathBuf,
    entries: Vec<CacheEntry>,
    keys: HashSet<DedupKey>,
}

impl PostedCache {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: CacheFile = load_store(&path, "dedup cache");
        let keys = file.items.iter().map(|e| e.key.clone()).collect();
        debug!("Loaded {} dedup entries from {}", file.items.len(), path.display());
        Self {
            path,
            entries: file.items,
            keys,
        }
    }

    pub fn has(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a delivered alert and persist the cache.
    ///
    /// The entry is kept in memory even when the write fails, so the same key
    /// cannot be re-sent later in this process.
    pub fn add(
        &mut self,
        key: DedupKey,
        post_id: Option<String>,
        posted_at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.keys.insert(key.clone()) {
            return Ok(());
        }
        self.entries.push(CacheEntry {
            key,
            posted_at,
            post_id,
        });
        self.save()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let file = CacheFile {
            items: self.entries.clone(),
        };
        save_store(&self.path, &file)
    }
}

// ── Rate limiter ───────────────────────────────────────────────────

/// Which sends count toward the daily cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateWindow {
    /// Sends within the 24 hours before now.
    #[default]
    Trailing,
    /// Sends on the current UTC calendar day; resets at midnight UTC.
    UtcDay,
}

impl FromStr for RateWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trailing" | "rolling" => Ok(Self::Trailing),
            "utc-day" | "utc_day" | "daily" => Ok(Self::UtcDay),
            other => anyhow::bail!("unknown rate window {other:?} (expected trailing or utc-day)"),
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trailing => f.write_str("trailing"),
            Self::UtcDay => f.write_str("utc-day"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RateFile {
    #[serde(default)]
    sends: Vec<DateTime<Utc>>,
}

/// Persistent daily cap on delivered alerts.
pub struct RateLimiter {
    path: PathBuf,
    max_per_day: u32,
    window: RateWindow,
    sends: Vec<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn load(path: impl Into<PathBuf>, max_per_day: u32, window: RateWindow) -> Self {
        let path = path.into();
        let file: RateFile = load_store(&path, "rate limiter");
        Self {
            path,
            max_per_day,
            window,
            sends: file.sends,
        }
    }

    /// Number of sends that count against the cap at `now`.
    pub fn sent_in_window(&self, now: DateTime<Utc>) -> usize {
        match self.window {
            RateWindow::Trailing => {
                let cutoff = now - Duration::hours(24);
                self.sends.iter().filter(|s| **s > cutoff).count()
            }
            RateWindow::UtcDay => {
                let today = now.date_naive();
                self.sends.iter().filter(|s| s.date_naive() == today).count()
            }
        }
    }

    pub fn can_send(&self, now: DateTime<Utc>) -> bool {
        self.sent_in_window(now) < self.max_per_day as usize
    }

    /// Count one delivered alert and persist the state.
    pub fn record_send(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.sends.push(now);
        let cutoff = now - Duration::hours(RATE_RETENTION_HOURS);
        self.sends.retain(|s| *s > cutoff);
        let file = RateFile {
            sends: self.sends.clone(),
        };
        save_store(&self.path, &file)
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn window(&self) -> RateWindow {
        self.window
    }
}
