pub mod api;
pub mod config;
pub mod engine;
pub mod format;
pub mod headline;
pub mod notifier;
pub mod pipeline;
pub mod reporter;
pub mod state;
pub mod types;

/// Polymarket data API base URL (public, no auth required)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Gamma API base URL (market metadata and profile search)
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Public profile page, wallet address is appended
pub const PROFILE_URL_BASE: &str = "https://polymarket.com/profile/";

/// X (Twitter) v2 API base URL
pub const X_API_BASE: &str = "https://api.twitter.com";

/// OpenAI-compatible inference endpoint used for headlines
pub const FIREWORKS_API_BASE: &str = "https://api.fireworks.ai/inference/v1";
