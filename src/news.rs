// src/news.rs
use crate::error::AppError;
use crate::models::Article;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

pub const PAGE_SIZE: u32 = 5;

#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn everything(&self, query: &str, api_key: &str) -> Result<Vec<Article>, AppError>;
}

#[derive(Deserialize, Debug)]
struct EverythingResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

pub struct NewsApi {
    client: Client,
    base_url: String,
}

impl NewsApi {
    pub fn new(client: Client, base_url: &str) -> Self {
        NewsApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NewsProvider for NewsApi {
    async fn everything(&self, query: &str, api_key: &str) -> Result<Vec<Article>, AppError> {
        let url = format!("{}/v2/everything", self.base_url);
        let page_size = PAGE_SIZE.to_string();
        debug!("Requesting news for {}", query);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("apiKey", api_key),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;

        let body = response
            .json::<EverythingResponse>()
            .await
            .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
        Ok(body.articles)
    }
}

/// Latest English headlines for `query`. A blank key is a user error, a
/// failing provider just yields no articles.
pub async fn search(
    provider: &dyn NewsProvider,
    query: &str,
    api_key: Option<&str>,
) -> Result<Vec<Article>, AppError> {
    let api_key = match api_key.map(str::trim) {
        Some(key) if !key.is_empty() => key,
        _ => return Err(AppError::MissingField("Please enter a valid NewsAPI key.")),
    };

    match provider.everything(query, api_key).await {
        Ok(articles) => Ok(articles),
        Err(e) => {
            warn!("News lookup for {} failed: {}", query, e);
            Ok(Vec::new())
        }
    }
}
