//! Web research
//!
//! Fills memory gaps with bounded web searches. The search transport is a
//! pluggable `SearchProvider`; the default is the DuckDuckGo instant-answer
//! API, which needs no key. Research is only invoked when memory coverage
//! falls below the configured threshold, and never before a memory search
//! (the dispatcher enforces that ordering).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query facets used to spread searches across angles of a topic.
/// The facet doubles as the category key in the organised results.
const FACETS: &[&str] = &[
    "overview",
    "practices",
    "risks",
    "examples",
    "requirements",
    "costs",
    "regulations",
    "tools",
];

/// One retrieved result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub category: String,
    pub title: String,
    pub source: String,
    pub url: String,
    pub snippet: String,
    pub retrieved_at: String,
}

/// Organised outcome of a research pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    /// category → ordered results; BTreeMap keeps category order stable
    pub organized: BTreeMap<String, Vec<ResearchResult>>,
    pub total_searches: u32,
    pub total_results: u32,
    /// True when the offline probe failed and no queries were attempted
    pub offline: bool,
}

impl ResearchReport {
    /// Sentinel report for the offline case
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }
}

/// A raw hit from a provider, before categorisation
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

/// Pluggable search transport
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for display
    fn name(&self) -> &str;

    /// Execute one search query
    async fn search(&self, query: &str, max_results: u32) -> anyhow::Result<Vec<SearchHit>>;

    /// Short connectivity probe; false means "treat as offline"
    async fn probe(&self) -> bool;
}

/// DuckDuckGo instant-answer provider (no API key required, limited results)
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("loom/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: u32) -> anyhow::Result<Vec<SearchHit>> {
        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await?;

        let data: serde_json::Value = response.json().await?;
        let mut hits = Vec::new();

        // Abstract (main result)
        if let Some(abstract_text) = data.get("AbstractText").and_then(|t| t.as_str()) {
            if !abstract_text.is_empty() {
                hits.push(SearchHit {
                    title: data
                        .get("Heading")
                        .and_then(|h| h.as_str())
                        .unwrap_or("Result")
                        .to_string(),
                    url: data
                        .get("AbstractURL")
                        .and_then(|u| u.as_str())
                        .unwrap_or("")
                        .to_string(),
                    snippet: abstract_text.to_string(),
                    source: self.name().to_string(),
                });
            }
        }

        // Related topics
        if let Some(topics) = data.get("RelatedTopics").and_then(|r| r.as_array()) {
            for topic in topics {
                if hits.len() >= max_results as usize {
                    break;
                }
                if let Some(text) = topic.get("Text").and_then(|t| t.as_str()) {
                    hits.push(SearchHit {
                        title: text.chars().take(80).collect(),
                        url: topic
                            .get("FirstURL")
                            .and_then(|u| u.as_str())
                            .unwrap_or("")
                            .to_string(),
                        snippet: text.to_string(),
                        source: self.name().to_string(),
                    });
                }
            }
        }

        Ok(hits)
    }

    async fn probe(&self) -> bool {
        self.client
            .head("https://duckduckgo.com/")
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .is_ok()
    }
}

/// Research agent: bounded, categorised, de-duplicated searches
pub struct ResearchAgent {
    provider: Arc<dyn SearchProvider>,
    default_max_queries: u32,
    per_query_timeout: Duration,
}

impl ResearchAgent {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        default_max_queries: u32,
        per_query_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            default_max_queries,
            per_query_timeout,
        }
    }

    /// The configured per-pass query budget
    pub fn query_budget(&self) -> u32 {
        self.default_max_queries
    }

    /// Run a research pass for the topic.
    ///
    /// Queries one facet at a time, up to `max_queries` (bounded by the
    /// configured default). Results are de-duplicated by URL across all
    /// facets. If the connectivity probe fails, returns the offline sentinel
    /// without issuing any query.
    pub async fn research(&self, topic: &str, max_queries: Option<u32>) -> ResearchReport {
        let budget = max_queries
            .unwrap_or(self.default_max_queries)
            .min(self.default_max_queries);

        if !self.provider.probe().await {
            warn!("research provider offline; continuing without research");
            return ResearchReport::offline();
        }

        let mut report = ResearchReport::default();
        let mut seen_urls: HashSet<String> = HashSet::new();

        for facet in FACETS.iter().take(budget as usize) {
            let query = format!("{} {}", topic, facet);
            debug!("research query ({}): {}", self.provider.name(), query);
            report.total_searches += 1;

            let hits = match tokio::time::timeout(
                self.per_query_timeout,
                self.provider.search(&query, 5),
            )
            .await
            {
                Ok(Ok(hits)) => hits,
                Ok(Err(e)) => {
                    warn!("research query failed: {}", e);
                    continue;
                }
                Err(_) => {
                    warn!("research query timed out after {:?}", self.per_query_timeout);
                    continue;
                }
            };

            let retrieved_at = chrono::Utc::now().to_rfc3339();
            for hit in hits {
                if !hit.url.is_empty() && !seen_urls.insert(hit.url.clone()) {
                    continue;
                }
                let result = ResearchResult {
                    category: facet.to_string(),
                    title: hit.title,
                    source: hit.source,
                    url: hit.url,
                    snippet: hit.snippet,
                    retrieved_at: retrieved_at.clone(),
                };
                report.total_results += 1;
                report
                    .organized
                    .entry(facet.to_string())
                    .or_default()
                    .push(result);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider returning canned hits; counts queries
    struct FakeProvider {
        online: bool,
        queries: AtomicU32,
        hits_per_query: Vec<SearchHit>,
    }

    impl FakeProvider {
        fn online(hits: Vec<SearchHit>) -> Self {
            Self {
                online: true,
                queries: AtomicU32::new(0),
                hits_per_query: hits,
            }
        }

        fn offline() -> Self {
            Self {
                online: false,
                queries: AtomicU32::new(0),
                hits_per_query: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn search(&self, _query: &str, _max: u32) -> anyhow::Result<Vec<SearchHit>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits_per_query.clone())
        }

        async fn probe(&self) -> bool {
            self.online
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: format!("title for {}", url),
            url: url.to_string(),
            snippet: "snippet".to_string(),
            source: "fake".to_string(),
        }
    }

    #[tokio::test]
    async fn test_offline_probe_short_circuits() {
        let provider = Arc::new(FakeProvider::offline());
        let agent = ResearchAgent::new(provider.clone(), 8, Duration::from_secs(20));

        let report = agent.research("vat registration", None).await;
        assert!(report.offline);
        assert_eq!(report.total_searches, 0);
        assert_eq!(report.total_results, 0);
        assert_eq!(provider.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_budget_is_respected() {
        let provider = Arc::new(FakeProvider::online(vec![hit("https://a")]));
        let agent = ResearchAgent::new(provider.clone(), 8, Duration::from_secs(20));

        let report = agent.research("topic", Some(3)).await;
        assert_eq!(report.total_searches, 3);
        assert_eq!(provider.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_never_exceeds_configured_default() {
        let provider = Arc::new(FakeProvider::online(vec![]));
        let agent = ResearchAgent::new(provider.clone(), 4, Duration::from_secs(20));

        let report = agent.research("topic", Some(100)).await;
        assert_eq!(report.total_searches, 4);
    }

    #[tokio::test]
    async fn test_urls_are_deduplicated_across_facets() {
        let provider = Arc::new(FakeProvider::online(vec![
            hit("https://same"),
            hit("https://same"),
        ]));
        let agent = ResearchAgent::new(provider, 8, Duration::from_secs(20));

        let report = agent.research("topic", Some(2)).await;
        // One distinct URL total, despite two hits per query and two queries
        assert_eq!(report.total_results, 1);
    }

    #[tokio::test]
    async fn test_results_are_organized_by_facet_category() {
        let provider = Arc::new(FakeProvider::online(vec![hit("https://a")]));
        let agent = ResearchAgent::new(provider, 8, Duration::from_secs(20));

        let report = agent.research("topic", Some(1)).await;
        assert!(report.organized.contains_key("overview"));
        assert_eq!(report.organized["overview"][0].category, "overview");
    }
}
