//! SearXNG-backed [`Retriever`].
//!
//! Endpoints are tried in order: the configured instance, a few public
//! instances, then a local one. The first instance that returns a JSON result
//! list wins.

use super::retrieval::{Retrieval, Retriever};
use crate::error::RetrievalError;
use crate::state::{dedup_sources, Source};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const PUBLIC_INSTANCES: &[&str] = &[
    "https://searx.be",
    "https://search.sapti.me",
    "https://searx.tiekoetter.com",
];

const LOCAL_INSTANCES: &[&str] = &["http://localhost:8888", "http://127.0.0.1:8888"];

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
    #[serde(default)]
    answers: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct SearxngRetriever {
    client: reqwest::Client,
    endpoints: Vec<String>,
    max_results: usize,
}

impl SearxngRetriever {
    /// Build a retriever; `custom_url` takes priority over discovery
    pub fn new(custom_url: Option<&str>) -> anyhow::Result<Self> {
        let mut endpoints: Vec<String> = Vec::new();
        if let Some(url) = custom_url {
            endpoints.push(format!("{}/search", url.trim_end_matches('/')));
        }
        endpoints.extend(
            PUBLIC_INSTANCES
                .iter()
                .chain(LOCAL_INSTANCES)
                .map(|base| format!("{}/search", base)),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("inquest/0.1")
            .build()?;

        Ok(Self {
            client,
            endpoints,
            max_results: 6,
        })
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }
}

#[async_trait]
impl Retriever for SearxngRetriever {
    async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::Rejected("empty query".to_string()));
        }

        let mut last_error = String::from("no search endpoint configured");
        for endpoint in &self.endpoints {
            let url = format!(
                "{}?q={}&format=json",
                endpoint,
                urlencoding::encode(query)
            );

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "SearXNG endpoint unreachable");
                    last_error = e.to_string();
                    continue;
                }
            };
            if !response.status().is_success() {
                last_error = format!("{} returned {}", endpoint, response.status());
                continue;
            }
            match response.json::<SearxResponse>().await {
                Ok(body) => return Ok(to_retrieval(body, self.max_results)),
                Err(e) => {
                    last_error = format!("{} sent an unreadable body: {}", endpoint, e);
                }
            }
        }

        Err(RetrievalError::Transient(last_error))
    }
}

fn to_retrieval(body: SearxResponse, max_results: usize) -> Retrieval {
    let results: Vec<&SearxResult> = body
        .results
        .iter()
        .filter(|r| !r.url.is_empty())
        .take(max_results)
        .collect();

    let direct = body
        .answers
        .iter()
        .filter_map(|a| a.as_str().or_else(|| a.get("answer").and_then(|v| v.as_str())))
        .next();

    let answer = match direct {
        Some(text) => text.to_string(),
        None => results
            .iter()
            .filter(|r| !r.content.trim().is_empty())
            .map(|r| format!("{}: {}", r.title.trim(), r.content.trim()))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    Retrieval {
        answer,
        sources: dedup_sources(results.iter().map(|r| Source::new(&r.url, &r.title))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_results_to_sources() {
        let body: SearxResponse = serde_json::from_value(serde_json::json!({
            "results": [
                {"title": "Tokio", "url": "https://tokio.rs", "content": "An async runtime"},
                {"title": "Tokio docs", "url": "https://tokio.rs", "content": "Docs"},
                {"title": "No url", "url": "", "content": "skipped"},
                {"title": "Glommio", "url": "https://glommio.rs", "content": ""}
            ]
        }))
        .unwrap();

        let retrieval = to_retrieval(body, 10);
        assert_eq!(retrieval.sources.len(), 2);
        assert!(retrieval.answer.starts_with("Tokio: An async runtime"));
        assert!(!retrieval.answer.contains("skipped"));
    }

    #[test]
    fn test_prefers_direct_answer() {
        let body: SearxResponse = serde_json::from_value(serde_json::json!({
            "answers": ["42"],
            "results": [{"title": "t", "url": "https://a.example", "content": "c"}]
        }))
        .unwrap();
        assert_eq!(to_retrieval(body, 10).answer, "42");
    }

    #[test]
    fn test_custom_url_goes_first() {
        let retriever = SearxngRetriever::new(Some("http://search.local/")).unwrap();
        assert_eq!(retriever.endpoints[0], "http://search.local/search");
        assert!(retriever
            .endpoints
            .iter()
            .any(|e| e == "http://localhost:8888/search"));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let retriever = SearxngRetriever::new(None).unwrap();
        assert!(matches!(
            retriever.retrieve("   ").await,
            Err(RetrievalError::Rejected(_))
        ));
    }
}
