//! News Search Adapter
//!
//! NewsAPI-compatible headline search backing the agent's news tool. The
//! whole adapter is optional: without a configured API key the tool reports
//! "no provider configured" instead of calling anything.

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{NewsItem, NewsSource};

/// Default NewsAPI endpoint.
const DEFAULT_BASE_URL: &str = "https://newsapi.org";

/// NewsAPI client configuration.
#[derive(Clone)]
pub struct NewsApiConfig {
    /// API base URL (no trailing slash).
    pub base_url: String,
    /// API key, sent as `X-Api-Key`.
    pub api_key: String,
    /// Request timeout.
    pub timeout: std::time::Duration,
}

impl NewsApiConfig {
    /// Config with the production endpoint.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for NewsApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: String,
    #[serde(default)]
    description: Option<String>,
    source: ArticleSource,
    #[serde(rename = "publishedAt", default)]
    published_at: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: String,
}

/// NewsAPI `everything` search client.
pub struct NewsApiSource {
    config: NewsApiConfig,
    http: reqwest::Client,
}

impl NewsApiSource {
    /// Create the client.
    ///
    /// # Errors
    ///
    /// Returns an error string if the HTTP client cannot be constructed.
    pub fn new(config: NewsApiConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl NewsSource for NewsApiSource {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<NewsItem>, String> {
        let url = format!("{}/v2/everything", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.config.api_key)
            .query(&[
                ("q", query),
                ("sortBy", "publishedAt"),
                ("pageSize", &max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("news API returned HTTP {}", response.status()));
        }

        let body: EverythingResponse = response.json().await.map_err(|e| e.to_string())?;

        Ok(body
            .articles
            .into_iter()
            .map(|article| NewsItem {
                headline: article.title,
                summary: article.description.unwrap_or_default(),
                source: article.source.name,
                published_at: article.published_at,
                url: article.url,
            })
            .collect())
    }
}
