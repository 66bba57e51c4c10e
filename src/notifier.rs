use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::X_API_BASE;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for transient delivery errors.
const MAX_RETRIES: u32 = 3;

/// Base backoff delay for retries (doubles each attempt).
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier assigned by the receiving service, when it returns one.
    pub post_id: Option<String>,
}

/// Destination for rendered alerts.
pub trait Notifier {
    fn notify(&self, text: &str) -> impl Future<Output = Result<Delivery>>;
}

/// Posts alerts to X through the v2 `POST /2/tweets` endpoint.
///
/// Authenticates with an OAuth 2.0 user-context access token.
pub struct XNotifier {
    http: reqwest::Client,
    endpoint: Url,
    access_token: Option<String>,
}

#[derive(Serialize)]
struct PostRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PostResponse {
    data: Option<PostData>,
}

#[derive(Deserialize)]
struct PostData {
    id: String,
}

impl XNotifier {
    pub fn new(access_token: Option<String>) -> Result<Self> {
        Self::with_base(X_API_BASE, access_token)
    }

    pub fn with_base(base: &str, access_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let endpoint = Url::parse(base)
            .and_then(|b| b.join("2/tweets"))
            .with_context(|| format!("invalid X API base {base}"))?;
        Ok(Self {
            http,
            endpoint,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some()
    }
}

impl Notifier for XNotifier {
    async fn notify(&self, text: &str) -> Result<Delivery> {
        let token = self
            .access_token
            .as_deref()
            .context("X_USER_ACCESS_TOKEN is not set")?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent = self
                .http
                .post(self.endpoint.clone())
                .bearer_auth(token)
                .json(&PostRequest { text })
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let body: PostResponse =
                        resp.json().await.context("invalid X API response")?;
                    let post_id = body.data.map(|d| d.id);
                    info!("Post delivered (id: {})", post_id.as_deref().unwrap_or("?"));
                    return Ok(Delivery { post_id });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        let delay = backoff(attempt);
                        warn!(
                            "X API returned {status} (attempt {attempt}/{MAX_RETRIES}), retrying in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    anyhow::bail!("X API returned {status}: {detail}");
                }
                // Connection never established, so no post was created.
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    let delay = backoff(attempt);
                    warn!(
                        "Cannot reach X API (attempt {attempt}/{MAX_RETRIES}): {e}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e).context("failed to reach X API"),
            }
        }
    }
}

/// Statuses returned before the post is created.
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}
