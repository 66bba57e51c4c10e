use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::FIREWORKS_API_BASE;
use crate::format::format_usd;

/// Model used when `FIREWORKS_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "accounts/sentientfoundation/models/dobby-unhinged-llama-3-3-70b-new";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 150;
const TEMPERATURE: f64 = 0.9;

/// What a headline is written about.
#[derive(Debug, Clone, Copy)]
pub struct HeadlineRequest<'a> {
    pub label: &'a str,
    pub pnl: Decimal,
    pub title: &'a str,
    pub outcome: &'a str,
}

/// Source of the free-text lead line of an alert.
pub trait HeadlineWriter {
    /// `Ok(None)` means no headline is available and the template is used.
    fn headline(&self, req: &HeadlineRequest<'_>) -> impl Future<Output = Result<Option<String>>>;
}

/// Generated headlines through an OpenAI-compatible chat endpoint.
///
/// Without an API key every request yields `None`.
pub struct Headlines {
    client: Option<ChatClient>,
}

struct ChatClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl Headlines {
    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn new(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
            return Ok(Self::disabled());
        };
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let endpoint = Url::parse(&format!("{FIREWORKS_API_BASE}/chat/completions"))
            .context("invalid headline endpoint")?;
        Ok(Self {
            client: Some(ChatClient {
                http,
                endpoint,
                api_key,
                model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }
}

impl HeadlineWriter for Headlines {
    async fn headline(&self, req: &HeadlineRequest<'_>) -> Result<Option<String>> {
        let Some(client) = &self.client else {
            return Ok(None);
        };
        let prompt = build_prompt(req);
        let body = ChatRequest {
            model: &client.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        debug!("Requesting headline from {}", client.model);
        let resp: ChatResponse = client
            .http
            .post(client.endpoint.clone())
            .bearer_auth(&client.api_key)
            .json(&body)
            .send()
            .await
            .context("headline request failed")?
            .error_for_status()
            .context("headline endpoint returned an error status")?
            .json()
            .await
            .context("invalid headline response")?;

        Ok(resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .and_then(|raw| clean_headline(&raw)))
    }
}

pub fn build_prompt(req: &HeadlineRequest<'_>) -> String {
    let amount = format_usd(req.pnl.abs());
    let (tone, event) = if req.pnl.is_sign_negative() {
        ("roasting", format!("losing {amount}"))
    } else {
        ("celebratory", format!("making {amount} profit"))
    };
    format!(
        "Write one short, {tone} post (under 200 characters, emojis welcome) about a trader \
         {event} on Polymarket.\nTrader: {}\nMarket: {}\nOutcome: {}\n\
         Reply with the post text only.",
        req.label, req.title, req.outcome
    )
}

/// Strip wrapping quotes and collapse whitespace; `None` when nothing is left.
pub fn clean_headline(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    let text = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(text).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(pnl: Decimal) -> HeadlineRequest<'static> {
        HeadlineRequest {
            label: "Damp-Heron",
            pnl,
            title: "Will it rain?",
            outcome: "Yes",
        }
    }

    #[test]
    fn prompt_tone_follows_sign() {
        let win = build_prompt(&request(dec!(12000)));
        assert!(win.contains("celebratory"));
        assert!(win.contains("making $12,000 profit"));
        assert!(win.contains("Trader: Damp-Heron"));

        let loss = build_prompt(&request(dec!(-12000)));
        assert!(loss.contains("roasting"));
        assert!(loss.contains("losing $12,000"));
    }

    #[test]
    fn clean_strips_quotes_and_newlines() {
        assert_eq!(
            clean_headline("  \"Big  win\non rain!\" ").as_deref(),
            Some("Big win on rain!")
        );
        assert_eq!(clean_headline("plain").as_deref(), Some("plain"));
        assert_eq!(clean_headline(" \"\" "), None);
        assert_eq!(clean_headline("   "), None);
    }

    #[test]
    fn missing_key_disables_client() {
        assert!(!Headlines::new(None, None).unwrap().is_enabled());
        assert!(!Headlines::new(Some("  ".into()), None).unwrap().is_enabled());
        assert!(Headlines::new(Some("fw_key".into()), None).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn disabled_client_yields_none() {
        let headlines = Headlines::disabled();
        assert!(headlines.headline(&request(dec!(1))).await.unwrap().is_none());
    }

    #[test]
    fn chat_response_parses() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello"));
    }
}
