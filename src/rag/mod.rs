//! Semantic search over project descriptions.
//!
//! Each project becomes one text document. With an embedding model the
//! documents are embedded in batches and ranked by cosine similarity;
//! without one (or when the query embedding fails) they are ranked by
//! keyword overlap.

mod enricher;

pub use enricher::{needs_enrichment, ContextEnricher};

use crate::config::RagConfig;
use crate::db::{Database, RagDocument};
use crate::error::ConciergeResult;
use crate::llm::ChatModel;
use crate::models::Project;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Query words ignored by keyword scoring.
const STOPWORDS: &[&str] = &[
    "the", "and", "with", "for", "that", "this", "are", "any", "some", "have", "has", "show",
    "find", "looking", "want", "near", "from", "what", "which", "where", "there", "properties",
    "property", "projects", "project", "homes", "home", "something",
];

/// One search result.
#[derive(Debug, Clone)]
pub struct RagHit {
    pub project: Project,
    pub content: String,
    pub score: f32,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub documents: usize,
    pub embedded: usize,
    pub batches: usize,
}

/// Document index over the projects table.
#[derive(Clone)]
pub struct RagIndex {
    db: Database,
    model: Option<Arc<dyn ChatModel>>,
    top_k: usize,
    batch_size: usize,
}

impl RagIndex {
    pub fn new(db: Database, model: Option<Arc<dyn ChatModel>>, config: &RagConfig) -> Self {
        Self {
            db,
            model,
            top_k: config.top_k.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Searchable text for one project.
    pub fn document_for(project: &Project) -> String {
        let mut parts = vec![project.name.clone()];
        if let Some(description) = &project.description {
            parts.push(description.clone());
        }
        if let Some(features) = &project.features {
            parts.push(format!("Features: {}", features));
        }
        if let Some(facilities) = &project.facilities {
            parts.push(format!("Facilities: {}", facilities));
        }
        if let Some(city) = &project.city {
            parts.push(format!("Located in {}", city));
        }
        if let Some(kind) = &project.property_type {
            parts.push(format!("Type: {}", kind));
        }
        parts.join(". ")
    }

    /// Rebuild the index from every project.
    pub async fn ingest(&self, show_progress: bool) -> Result<IngestReport> {
        let projects = self.db.all_projects()?;
        let mut documents: Vec<RagDocument> = projects
            .iter()
            .map(|p| RagDocument {
                project_id: p.id,
                content: Self::document_for(p),
                embedding: None,
            })
            .collect();

        let mut report = IngestReport {
            documents: documents.len(),
            ..Default::default()
        };

        if let Some(model) = &self.model {
            let pb = crate::progress::bar(documents.len() as u64, show_progress);
            for batch in documents.chunks_mut(self.batch_size) {
                let inputs: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
                let vectors = model
                    .embed(&inputs)
                    .await
                    .with_context(|| format!("Failed to embed batch {}", report.batches + 1))?;

                for (doc, vector) in batch.iter_mut().zip(vectors) {
                    doc.embedding = Some(vector);
                    report.embedded += 1;
                }
                report.batches += 1;
                pb.inc(batch.len() as u64);
            }
            pb.finish_with_message("embedded");
        } else {
            info!("No embedding model configured, storing documents for keyword search");
        }

        self.db.replace_rag_documents(&documents)?;
        info!(
            "Ingested {} documents ({} embedded in {} batches)",
            report.documents, report.embedded, report.batches
        );
        Ok(report)
    }

    /// Top `k` projects for `query` (configured default when `None`).
    pub async fn search(&self, query: &str, k: Option<usize>) -> ConciergeResult<Vec<RagHit>> {
        let k = k.unwrap_or(self.top_k).max(1);

        let mut documents = self.db.rag_documents()?;
        if documents.is_empty() {
            debug!("RAG index is empty, searching project text directly");
            documents = self
                .db
                .all_projects()?
                .iter()
                .map(|p| RagDocument {
                    project_id: p.id,
                    content: Self::document_for(p),
                    embedding: None,
                })
                .collect();
        }

        let mut scored = match self.semantic_scores(query, &documents).await {
            Some(scores) => scores,
            None => keyword_scores(query, &documents),
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let ids: Vec<i64> = scored.iter().map(|(doc, _)| doc.project_id).collect();
        let projects: HashMap<i64, Project> = self
            .db
            .projects_by_ids(&ids)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(scored
            .into_iter()
            .filter_map(|(doc, score)| {
                projects.get(&doc.project_id).map(|project| RagHit {
                    project: project.clone(),
                    content: doc.content.clone(),
                    score,
                })
            })
            .collect())
    }

    /// Cosine scores, or `None` when embeddings are unavailable.
    async fn semantic_scores<'a>(
        &self,
        query: &str,
        documents: &'a [RagDocument],
    ) -> Option<Vec<(&'a RagDocument, f32)>> {
        let model = self.model.as_ref()?;
        if documents.iter().all(|d| d.embedding.is_none()) {
            return None;
        }

        let query_vector = match model.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return None,
            Err(e) => {
                warn!("Query embedding failed, using keyword search: {}", e);
                return None;
            }
        };

        Some(
            documents
                .iter()
                .filter_map(|doc| {
                    let embedding = doc.embedding.as_ref()?;
                    Some((doc, cosine_similarity(&query_vector, embedding)))
                })
                .collect(),
        )
    }
}

/// Cosine similarity; 0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
    {
        if !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

/// Fraction of query terms found in each document. Non-matching
/// documents are dropped.
fn keyword_scores<'a>(query: &str, documents: &'a [RagDocument]) -> Vec<(&'a RagDocument, f32)> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    documents
        .iter()
        .filter_map(|doc| {
            let text = doc.content.to_lowercase();
            let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
            (matched > 0).then(|| (doc, matched as f32 / terms.len() as f32))
        })
        .collect()
}

/// Render hits as `Project:` / `Description:` blocks for prompts and
/// tool results.
pub fn format_hits(hits: &[RagHit]) -> String {
    hits.iter()
        .map(|hit| format!("Project: {}\nDescription: {}\n---", hit.project.name, hit.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::sample_db;
    use crate::llm::testing::ScriptedModel;

    fn config(batch_size: usize) -> RagConfig {
        RagConfig {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_embeds_in_batches() {
        let db = sample_db();
        let model = Arc::new(ScriptedModel::new());
        let index = RagIndex::new(db.clone(), Some(model.clone()), &config(5));

        let report = index.ingest(false).await.unwrap();
        assert_eq!(report.documents, 12);
        assert_eq!(report.embedded, 12);
        assert_eq!(report.batches, 3);
        assert_eq!(*model.embed_calls.lock().unwrap(), 3);

        let docs = db.rag_documents().unwrap();
        assert_eq!(docs.len(), 12);
        assert!(docs.iter().all(|d| d.embedding.is_some()));
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_by_similarity() {
        let db = Database::open_in_memory().unwrap();
        for (name, description) in [
            ("Dune", "beachfront golf sunsets"),
            ("Loft", "downtown skyline nightlife"),
            ("Grove", "quiet orchard garden"),
        ] {
            db.insert_project(&Project {
                name: name.to_string(),
                description: Some(description.to_string()),
                ..Default::default()
            })
            .unwrap();
        }
        let index = RagIndex::new(db, Some(Arc::new(ScriptedModel::new())), &config(10));
        index.ingest(false).await.unwrap();

        let hits = index.search("beachfront golf sunsets", Some(2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].project.name, "Dune");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_keyword_search_without_model() {
        let index = RagIndex::new(sample_db(), None, &config(10));
        let hits = index.search("private cinema", None).await.unwrap();
        assert_eq!(hits[0].project.name, "Creek Harbour Residences");
        assert!(hits.len() <= 5);

        assert!(index.search("zzzz", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_format_hits() {
        let hit = RagHit {
            project: Project {
                name: "Azure Bay".into(),
                ..Default::default()
            },
            content: "Sea views".into(),
            score: 0.9,
        };
        assert_eq!(
            format_hits(&[hit]),
            "Project: Azure Bay\nDescription: Sea views\n---"
        );
    }
}
