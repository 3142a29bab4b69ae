//! Pre-agent context injection for qualitative questions.

use super::{format_hits, RagIndex};
use crate::intent::contains_term;
use tracing::debug;

/// Words that mark a question as being about look and feel rather than
/// hard filters.
const QUALITATIVE_KEYWORDS: &[&str] = &[
    "luxury",
    "modern",
    "sea view",
    "waterfront",
    "spacious",
    "cozy",
    "elegant",
    "premium",
    "exclusive",
    "stunning",
    "panoramic",
    "beachfront",
    "pool",
    "gym",
    "amenities",
];

const ENRICH_TOP_K: usize = 3;

pub fn needs_enrichment(query: &str) -> bool {
    let lower = query.to_lowercase();
    QUALITATIVE_KEYWORDS.iter().any(|k| contains_term(&lower, k))
}

/// Adds matching descriptions to the agent's context.
pub struct ContextEnricher {
    index: RagIndex,
}

impl ContextEnricher {
    pub fn new(index: RagIndex) -> Self {
        Self { index }
    }

    /// Context block for `query`, or `None` when the query is not
    /// qualitative or nothing matches.
    pub async fn context_for(&self, query: &str) -> Option<String> {
        if !needs_enrichment(query) {
            return None;
        }

        match self.index.search(query, Some(ENRICH_TOP_K)).await {
            Ok(hits) if !hits.is_empty() => {
                debug!("Enriched query with {} descriptions", hits.len());
                Some(format!(
                    "Relevant property descriptions from the database:\n{}",
                    format_hits(&hits)
                ))
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Context enrichment skipped: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::db::testing::sample_db;

    #[test]
    fn test_needs_enrichment() {
        assert!(needs_enrichment("Any luxury towers with a Pool?"));
        assert!(needs_enrichment("something with a sea view"));
        assert!(!needs_enrichment("2 bedroom in Dubai under 1m"));
        assert!(!needs_enrichment("gymnasium nearby"));
    }

    #[tokio::test]
    async fn test_context_for() {
        let enricher = ContextEnricher::new(RagIndex::new(sample_db(), None, &RagConfig::default()));

        let context = enricher.context_for("luxury waterfront homes").await.unwrap();
        assert!(context.starts_with("Relevant property descriptions"));
        assert!(context.matches("Project: ").count() <= ENRICH_TOP_K);

        assert!(enricher.context_for("3 bedrooms in London").await.is_none());
    }
}
