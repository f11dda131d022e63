//! Goal analysis
//!
//! Derives a `GoalAnalysis` from the raw goal text with lexical keyword
//! buckets. Deterministic and credential-free, so the session reaches
//! `Analysed` without touching the model and replays identically during
//! recovery. Immutable once derived.

use serde::{Deserialize, Serialize};

/// Derived classification of a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalAnalysis {
    /// Coarse domain: business, legal, infrastructure, or general
    pub domain: String,
    /// Best-guess industry label
    pub industry: String,
    /// Market scope: international or domestic
    pub market: String,
    /// Entities the user selected for this session
    pub context_entities: Vec<String>,
    /// When the analysis was made (RFC 3339)
    pub timestamp: String,
}

/// Keyword buckets for the domain classification. First match wins, so the
/// more specific buckets come first.
const DOMAIN_BUCKETS: &[(&str, &[&str])] = &[
    (
        "legal",
        &[
            "tax", "vat", "legal", "law", "compliance", "regulation", "contract", "licence",
            "license", "permit", "gdpr",
        ],
    ),
    (
        "infrastructure",
        &[
            "infrastructure", "server", "deploy", "deployment", "orchestrator", "cluster",
            "kubernetes", "network", "database", "pipeline", "hosting", "devops",
        ],
    ),
    (
        "business",
        &[
            "business", "startup", "company", "market", "revenue", "product", "customer",
            "sales", "pricing", "budget", "plan",
        ],
    ),
];

const INDUSTRY_BUCKETS: &[(&str, &[&str])] = &[
    ("accounting", &["tax", "vat", "bookkeeping", "accounting"]),
    ("software", &["server", "deploy", "software", "api", "cloud", "orchestrator", "app"]),
    ("retail", &["shop", "store", "retail", "ecommerce", "bakery", "restaurant"]),
    ("consulting", &["consulting", "advisory", "freelance"]),
];

const INTERNATIONAL_MARKERS: &[&str] = &[
    "international",
    "global",
    "export",
    "import",
    "cross-border",
    "worldwide",
    "eu",
];

/// Analyse a goal. Pure and deterministic apart from the timestamp.
pub fn analyse(goal: &str, selected_entities: &[String]) -> GoalAnalysis {
    let lowered = goal.to_lowercase();
    let contains = |words: &[&str]| {
        words
            .iter()
            .any(|w| lowered.split(|c: char| !c.is_alphanumeric()).any(|t| t == *w))
    };

    let domain = DOMAIN_BUCKETS
        .iter()
        .find(|(_, words)| contains(words))
        .map(|(name, _)| *name)
        .unwrap_or("general");

    let industry = INDUSTRY_BUCKETS
        .iter()
        .find(|(_, words)| contains(words))
        .map(|(name, _)| *name)
        .unwrap_or("general");

    let market = if contains(INTERNATIONAL_MARKERS) {
        "international"
    } else {
        "domestic"
    };

    GoalAnalysis {
        domain: domain.to_string(),
        industry: industry.to_string(),
        market: market.to_string(),
        context_entities: selected_entities.to_vec(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_goal() {
        let analysis = analyse("Set up basic orchestrator infrastructure", &[]);
        assert_eq!(analysis.domain, "infrastructure");
        assert_eq!(analysis.industry, "software");
        assert_eq!(analysis.market, "domestic");
    }

    #[test]
    fn test_legal_wins_over_business() {
        let analysis = analyse("Business plan for VAT registration", &[]);
        assert_eq!(analysis.domain, "legal");
        assert_eq!(analysis.industry, "accounting");
    }

    #[test]
    fn test_international_market_detection() {
        let analysis = analyse("Export strategy for a global product launch", &[]);
        assert_eq!(analysis.market, "international");
    }

    #[test]
    fn test_general_fallback() {
        let analysis = analyse("Write a poem about autumn", &[]);
        assert_eq!(analysis.domain, "general");
        assert_eq!(analysis.industry, "general");
    }

    #[test]
    fn test_selected_entities_are_recorded() {
        let selected = vec!["infra-notes".to_string()];
        let analysis = analyse("deploy a server", &selected);
        assert_eq!(analysis.context_entities, selected);
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "apply" contains "app" but is not the software industry marker
        let analysis = analyse("apply for a grant", &[]);
        assert_eq!(analysis.industry, "general");
    }
}
