use anyhow::{anyhow, Context, Result};
use ::scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ScrapeConfig;
use crate::processing::html;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedArticle {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

/// Fetches a web page politely and pulls out its article text.
pub struct WebScraper {
    client: reqwest::Client,
    politeness_delay: Duration,
}

impl WebScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build scraper HTTP client")?;

        Ok(Self {
            client,
            politeness_delay: Duration::from_millis(config.politeness_delay_ms),
        })
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapedArticle> {
        if !self.politeness_delay.is_zero() {
            tokio::time::sleep(self.politeness_delay).await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Error occurred while fetching article at {}", url))?;

        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!(url, status = %response.status(), "Scrape returned non-200 status");
            return Err(anyhow!("Failed to fetch article at {}", url));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        let (title, text) = extract_article(&body);
        tracing::info!(url, chars = text.len(), "Scraped article");

        Ok(ScrapedArticle {
            url: url.to_string(),
            title,
            text,
        })
    }
}

/// Title and main text of an HTML page: `<article>`, else `<main>`,
/// else every `<p>` in document order.
pub fn extract_article(page: &str) -> (Option<String>, String) {
    let document = Html::parse_document(page);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    for container in ["article", "main"] {
        let Ok(selector) = Selector::parse(container) else {
            continue;
        };
        let text = document
            .select(&selector)
            .map(html::visible_text)
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !text.is_empty() {
            return (title, text);
        }
    }

    let text = match Selector::parse("p") {
        Ok(selector) => document
            .select(&selector)
            .map(html::visible_text)
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Err(_) => String::new(),
    };

    (title, text)
}
