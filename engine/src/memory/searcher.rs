//! Memory searcher
//!
//! Lexical search over entity bodies. Computes per-entity coverage of the
//! query's keyphrases, extracts matching snippets, and names the gaps. The
//! output is a structured report, never free prose, and no language-model
//! call happens here: identical arguments produce byte-identical results.

use crate::memory::store::MemoryStore;
use regex::Regex;
use sdk::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words carrying no search signal
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "how", "in",
    "is", "it", "its", "of", "on", "or", "our", "set", "that", "the", "their", "this", "to", "up",
    "use", "was", "we", "what", "when", "where", "which", "will", "with", "you", "your",
];

/// Maximum snippets returned per entity
const MAX_SNIPPETS: usize = 5;

/// Maximum snippet length in characters
const MAX_SNIPPET_CHARS: usize = 240;

/// Coverage summary for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCoverage {
    /// Fraction of query keyphrases present in the body, in [0, 1]
    pub coverage: f64,
    /// Body lines containing at least one keyphrase
    pub snippets: Vec<String>,
    /// Keyphrases absent from the body
    pub gaps: Vec<String>,
    /// Per-entity failure (unknown name, exhausted retries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityCoverage {
    fn failed(message: String) -> Self {
        Self {
            coverage: 0.0,
            snippets: Vec::new(),
            gaps: Vec::new(),
            error: Some(message),
        }
    }
}

/// Structured search report, ordered by entity name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchReport {
    /// Per-entity results; BTreeMap keeps lexicographic order
    pub per_entity: BTreeMap<String, EntityCoverage>,
    /// Mean coverage over entities that could be read
    pub aggregate_coverage: f64,
}

impl MemorySearchReport {
    /// Keyphrases missing from every searched entity
    pub fn unresolved_gaps(&self) -> Vec<String> {
        let mut gaps: Vec<String> = Vec::new();
        for coverage in self.per_entity.values() {
            for gap in &coverage.gaps {
                if self
                    .per_entity
                    .values()
                    .all(|c| c.gaps.contains(gap) || c.error.is_some())
                    && !gaps.contains(gap)
                {
                    gaps.push(gap.clone());
                }
            }
        }
        gaps.sort();
        gaps
    }
}

/// Lexical searcher over a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemorySearcher {
    store: MemoryStore,
    word: Regex,
}

impl MemorySearcher {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            // Lowercased alphanumeric runs; hyphens split into words
            word: Regex::new(r"[a-z0-9]+").expect("static pattern"),
        }
    }

    /// Search the named entities for the query.
    ///
    /// Unknown names yield a per-entity error rather than failing the whole
    /// call; an empty body yields coverage 0. The caller (the dispatcher) has
    /// already filtered names to the selected set.
    pub async fn search(&self, entity_names: &[String], query: &str) -> MemorySearchReport {
        let keyphrases = self.keyphrases(query);
        let mut per_entity = BTreeMap::new();

        for name in entity_names {
            let coverage = match self.store.read_entity(name).await {
                Ok(body) => self.score(&body, &keyphrases),
                Err(CoreError::EntityNotFound(_)) => {
                    EntityCoverage::failed(format!("entity not found: {}", name))
                }
                Err(e) => EntityCoverage::failed(e.to_string()),
            };
            per_entity.insert(name.clone(), coverage);
        }

        let readable: Vec<&EntityCoverage> =
            per_entity.values().filter(|c| c.error.is_none()).collect();
        let aggregate_coverage = if readable.is_empty() {
            0.0
        } else {
            readable.iter().map(|c| c.coverage).sum::<f64>() / readable.len() as f64
        };

        MemorySearchReport {
            per_entity,
            aggregate_coverage,
        }
    }

    /// List addressable entities (lexicographic order)
    pub async fn list_entities(&self) -> anyhow::Result<Vec<String>> {
        self.store.list_entities().await
    }

    /// Extract deduplicated keyphrases from a query
    fn keyphrases(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let mut phrases: Vec<String> = Vec::new();
        for m in self.word.find_iter(&lowered) {
            let word = m.as_str();
            if word.len() <= 2 || STOPWORDS.contains(&word) {
                continue;
            }
            if !phrases.iter().any(|p| p.as_str() == word) {
                phrases.push(word.to_string());
            }
        }
        phrases
    }

    /// Score one body against the keyphrases
    fn score(&self, body: &str, keyphrases: &[String]) -> EntityCoverage {
        if keyphrases.is_empty() || body.trim().is_empty() {
            return EntityCoverage {
                coverage: 0.0,
                snippets: Vec::new(),
                gaps: keyphrases.to_vec(),
                error: None,
            };
        }

        let lowered = body.to_lowercase();
        let mut gaps = Vec::new();
        let mut hits = 0usize;
        for phrase in keyphrases {
            if lowered.contains(phrase.as_str()) {
                hits += 1;
            } else {
                gaps.push(phrase.clone());
            }
        }

        let mut snippets = Vec::new();
        for line in body.lines() {
            if snippets.len() >= MAX_SNIPPETS {
                break;
            }
            let line_lowered = line.to_lowercase();
            if keyphrases.iter().any(|p| line_lowered.contains(p.as_str())) {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let snippet: String = trimmed.chars().take(MAX_SNIPPET_CHARS).collect();
                snippets.push(snippet);
            }
        }

        EntityCoverage {
            coverage: hits as f64 / keyphrases.len() as f64,
            snippets,
            gaps,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::ENTITIES_DIR;
    use tempfile::TempDir;

    async fn searcher_with(entries: &[(&str, &str)]) -> (TempDir, MemorySearcher) {
        let dir = TempDir::new().unwrap();
        let entities = dir.path().join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&entities).await.unwrap();
        for (name, body) in entries {
            tokio::fs::write(entities.join(format!("{}.md", name)), body)
                .await
                .unwrap();
        }
        let store = MemoryStore::open(dir.path()).unwrap();
        (dir, MemorySearcher::new(store))
    }

    #[tokio::test]
    async fn test_full_coverage() {
        let (_dir, searcher) = searcher_with(&[(
            "infra-notes",
            "Orchestrator infrastructure basics.\nKeep the orchestrator small.",
        )])
        .await;

        let report = searcher
            .search(
                &["infra-notes".to_string()],
                "set up basic orchestrator infrastructure",
            )
            .await;

        let entry = &report.per_entity["infra-notes"];
        assert_eq!(entry.coverage, 1.0);
        assert!(entry.gaps.is_empty());
        assert!(!entry.snippets.is_empty());
        assert_eq!(report.aggregate_coverage, 1.0);
    }

    #[tokio::test]
    async fn test_partial_coverage_names_gaps() {
        let (_dir, searcher) =
            searcher_with(&[("vat-notes", "VAT registration rules for 2023.")]).await;

        let report = searcher
            .search(&["vat-notes".to_string()], "vat registration deadlines")
            .await;

        let entry = &report.per_entity["vat-notes"];
        assert!(entry.coverage > 0.0 && entry.coverage < 1.0);
        assert_eq!(entry.gaps, vec!["deadlines".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_entity_reports_local_error() {
        let (_dir, searcher) = searcher_with(&[("known", "text")]).await;

        let report = searcher
            .search(
                &["known".to_string(), "unknown".to_string()],
                "text query",
            )
            .await;

        assert!(report.per_entity["known"].error.is_none());
        assert!(report.per_entity["unknown"].error.is_some());
        // Aggregate covers only readable entities
        assert!(report.aggregate_coverage > 0.0);
    }

    #[tokio::test]
    async fn test_empty_body_is_zero_coverage() {
        let (_dir, searcher) = searcher_with(&[("empty", "")]).await;
        let report = searcher.search(&["empty".to_string()], "anything here").await;
        assert_eq!(report.per_entity["empty"].coverage, 0.0);
        assert!(report.per_entity["empty"].error.is_none());
    }

    #[tokio::test]
    async fn test_identical_calls_are_byte_identical() {
        let (_dir, searcher) =
            searcher_with(&[("notes", "alpha beta gamma\ndelta epsilon")]).await;

        let args = ["notes".to_string()];
        let first = searcher.search(&args, "alpha delta").await;
        let second = searcher.search(&args, "alpha delta").await;

        let first_bytes = serde_json::to_vec(&first).unwrap();
        let second_bytes = serde_json::to_vec(&second).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn test_report_order_is_lexicographic() {
        let (_dir, searcher) =
            searcher_with(&[("b-notes", "x"), ("a-notes", "x"), ("c-notes", "x")]).await;

        let report = searcher
            .search(
                &[
                    "c-notes".to_string(),
                    "a-notes".to_string(),
                    "b-notes".to_string(),
                ],
                "x",
            )
            .await;

        let keys: Vec<&String> = report.per_entity.keys().collect();
        assert_eq!(keys, vec!["a-notes", "b-notes", "c-notes"]);
    }

    #[test]
    fn test_keyphrase_extraction_filters_stopwords_and_short_words() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(ENTITIES_DIR)).unwrap();
        let searcher = MemorySearcher::new(MemoryStore::open(dir.path()).unwrap());

        let phrases = searcher.keyphrases("How to set up the VAT for a small business?");
        assert_eq!(phrases, vec!["vat", "small", "business"]);
    }
}
