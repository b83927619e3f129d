use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

pub const WEB_SEARCH_DEADLINE: Duration = Duration::from_secs(3);

const BING_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";
const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Looks up whether an address appears in public web pages. `(found, error)`:
/// a search that ran but matched nothing is `(false, None)`; any failure is
/// `(false, Some(reason))` and never propagates further.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn check_mentioned(
        &self,
        email: &str,
        provider: &str,
        api_key: &str,
    ) -> (bool, Option<String>);
}

pub struct HttpWebSearch {
    client: reqwest::Client,
}

impl HttpWebSearch {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(WEB_SEARCH_DEADLINE)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn check_bing(&self, email: &str, api_key: &str) -> (bool, Option<String>) {
        let response = self
            .client
            .get(BING_ENDPOINT)
            .query(&[("q", format!("\"{email}\"")), ("count", "1".to_string())])
            .header("Ocp-Apim-Subscription-Key", api_key.trim())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return (false, Some("Timeout connecting to Bing".to_string()));
            }
            Err(_) => return (false, Some("Request error Bing".to_string())),
        };

        if let Err(err) = response.error_for_status_ref() {
            let status = err.status().map(|s| s.as_u16()).unwrap_or_default();
            return (false, Some(format!("HTTP error Bing: {status}")));
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let total = body
                    .get("webPages")
                    .and_then(|pages| pages.get("totalEstimatedMatches"))
                    .and_then(|total| total.as_i64())
                    .unwrap_or(0);
                (total > 0, None)
            }
            Err(_) => (false, Some("Request error Bing".to_string())),
        }
    }

    async fn check_serper(&self, email: &str, api_key: &str) -> (bool, Option<String>) {
        let response = self
            .client
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", api_key.trim())
            .json(&json!({ "q": format!("\"{email}\""), "num": 1 }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return (false, Some("Timeout connecting to Serper".to_string()));
            }
            Err(_) => return (false, Some("Request error Serper".to_string())),
        };

        if let Err(err) = response.error_for_status_ref() {
            let status = err.status().map(|s| s.as_u16()).unwrap_or_default();
            return (false, Some(format!("HTTP error Serper: {status}")));
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let organic = body
                    .get("organic")
                    .and_then(|results| results.as_array())
                    .map(|results| !results.is_empty())
                    .unwrap_or(false);
                (organic, None)
            }
            Err(_) => (false, Some("Request error Serper".to_string())),
        }
    }
}

impl Default for HttpWebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn check_mentioned(
        &self,
        email: &str,
        provider: &str,
        api_key: &str,
    ) -> (bool, Option<String>) {
        if api_key.trim().is_empty() {
            return (false, Some("API key not configured".to_string()));
        }
        let provider = provider.trim().to_lowercase();
        if provider.is_empty() {
            return (false, Some("Provider not configured".to_string()));
        }

        match provider.as_str() {
            "bing" => self.check_bing(email, api_key).await,
            "serper" => self.check_serper(email, api_key).await,
            other => (false, Some(format!("Provider '{other}' not supported"))),
        }
    }
}
