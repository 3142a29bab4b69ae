//! Text-to-SQL over the `projects` table.
//!
//! A question is answered in up to three steps:
//!
//! 1. LLM-generated SQL, prompted with the table DDL, column documentation,
//!    business rules and the most similar remembered question/SQL pairs.
//!    The SQL must pass the read-only guard and is wrapped in a row limit.
//! 2. A parameterised query built from the extracted intent filters.
//! 3. A `LIKE` search over the text columns for every query keyword.
//!
//! Steps 2 and 3 only run when step 1 is unavailable, fails, or returns
//! no rows. Generated queries that return rows are remembered and become
//! few-shot examples for later questions.

pub mod guard;
mod training;

use crate::config::SqlConfig;
use crate::db::{Database, QueryRows};
use crate::error::{ConciergeError, ConciergeResult};
use crate::intent::IntentFilters;
use crate::llm::{self, ChatModel};
use crate::models::Project;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Words that never make useful `LIKE` keywords.
const KEYWORD_STOPWORDS: &[&str] = &[
    "about", "all", "and", "any", "apartment", "apartments", "are", "available", "bed",
    "bedroom", "bedrooms", "best", "between", "budget", "buy", "can", "cheap", "cheapest",
    "find", "flat", "flats", "for", "from", "give", "has", "have", "home", "homes", "how",
    "interested", "list", "looking", "many", "million", "more", "near", "need", "over",
    "please", "price", "project", "projects", "properties", "property", "rent", "show", "some",
    "studio", "tell", "than", "that", "the", "there", "this", "under", "villa", "villas",
    "want", "what", "where", "which", "with", "within", "you", "usd", "aed", "eur", "gbp",
    "inr", "dollars", "dirhams",
];

/// Related projects summarized for the LLM; the rest are only counted.
const RELATED_IN_TOOL_JSON: usize = 10;

/// Which step produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Generated,
    Structured,
    Keyword,
    None,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Generated => "generated_sql",
            SearchStrategy::Structured => "structured_filters",
            SearchStrategy::Keyword => "keyword_fallback",
            SearchStrategy::None => "none",
        }
    }
}

/// Result of [`TextToSql::search`].
#[derive(Debug, Clone)]
pub struct SqlOutcome {
    pub strategy: SearchStrategy,
    /// Generated SQL, when one was produced (even if it was rejected).
    pub sql: Option<String>,
    /// Raw rows of the generated query.
    pub rows: QueryRows,
    /// Primary matches.
    pub projects: Vec<Project>,
    /// Keyword matches not already in `projects`.
    pub related: Vec<Project>,
    /// Why generated SQL was not used.
    pub error: Option<String>,
}

impl SqlOutcome {
    fn empty() -> Self {
        Self {
            strategy: SearchStrategy::None,
            sql: None,
            rows: QueryRows::default(),
            projects: Vec::new(),
            related: Vec::new(),
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.related.is_empty() && self.rows.is_empty()
    }

    /// Primary matches followed by related ones.
    pub fn all_projects(&self) -> Vec<&Project> {
        self.projects.iter().chain(self.related.iter()).collect()
    }

    /// Compact JSON summary handed back to the LLM as a tool result.
    pub fn to_tool_json(&self) -> Value {
        let summarize = |p: &Project| {
            serde_json::json!({
                "id": p.id,
                "name": p.name,
                "city": p.city,
                "price_usd": p.price,
                "bedrooms": p.bedrooms,
                "property_type": p.property_type,
                "completion_status": p.completion_status,
                "developer": p.developer,
            })
        };

        let mut out = serde_json::json!({
            "strategy": self.strategy.as_str(),
            "count": self.projects.len(),
            "projects": self.projects.iter().map(summarize).collect::<Vec<_>>(),
        });
        if !self.related.is_empty() {
            out["related_count"] = Value::from(self.related.len());
            out["related"] = self
                .related
                .iter()
                .take(RELATED_IN_TOOL_JSON)
                .map(summarize)
                .collect();
        }
        if self.projects.is_empty() && !self.rows.is_empty() {
            out["columns"] = serde_json::json!(self.rows.columns);
            out["rows"] = serde_json::json!(self.rows.rows);
        }
        if let Some(sql) = &self.sql {
            out["sql"] = Value::String(sql.clone());
        }
        out
    }
}

/// Text-to-SQL service with tool memory.
pub struct TextToSql {
    db: Database,
    model: Option<Arc<dyn ChatModel>>,
    row_limit: usize,
    memory_examples: usize,
}

impl TextToSql {
    /// Create the service and install the starter examples into an empty
    /// tool memory.
    pub fn new(
        db: Database,
        model: Option<Arc<dyn ChatModel>>,
        config: &SqlConfig,
    ) -> ConciergeResult<Self> {
        if db.count_sql_memory()? == 0 {
            for (question, sql) in training::SEED_EXAMPLES {
                db.remember_sql(question, sql)?;
            }
            info!(
                "Installed {} starter SQL examples",
                training::SEED_EXAMPLES.len()
            );
        }

        Ok(Self {
            db,
            model,
            row_limit: config.row_limit.max(1),
            memory_examples: config.memory_examples,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// System prompt for SQL generation.
    fn build_prompt(&self, question: &str) -> ConciergeResult<String> {
        let ddl = self
            .db
            .table_ddl("projects")?
            .ok_or_else(|| ConciergeError::Internal("projects table missing".to_string()))?;

        let mut prompt = String::from(
            "You are a SQLite expert. Write one SQL query that answers the user's question.\n\n",
        );
        prompt.push_str("===Tables\n");
        prompt.push_str(&ddl);
        prompt.push_str("\n\n===Additional Context\n");
        for line in training::DOCUMENTATION.iter().chain(training::BUSINESS_RULES) {
            prompt.push_str("- ");
            prompt.push_str(line);
            prompt.push('\n');
        }

        let examples = self.db.sql_examples()?;
        let similar = training::similar_examples(question, &examples, self.memory_examples);
        if !similar.is_empty() {
            prompt.push_str("\n===Examples\n");
            for ex in similar {
                prompt.push_str(&format!("Question: {}\nSQL: {}\n\n", ex.question, ex.sql));
            }
        }

        prompt.push_str(
            "\n===Response Guidelines\n\
             - Respond with only the SQL query, no explanation.\n\
             - Only SELECT statements are allowed.\n\
             - Always include the id and name columns when listing projects.\n\
             - If the question cannot be answered from this table, reply with: NO_SQL\n",
        );
        Ok(prompt)
    }

    /// Ask the LLM for SQL. `Ok(None)` when no model is configured or the
    /// reply holds no query.
    pub async fn generate(&self, question: &str) -> anyhow::Result<Option<String>> {
        let Some(model) = &self.model else {
            return Ok(None);
        };

        let prompt = self.build_prompt(question)?;
        let reply = llm::ask(model.as_ref(), &prompt, question).await?;
        let sql = guard::extract_sql(&reply);
        debug!("Generated SQL for {:?}: {:?}", question, sql);
        Ok(sql)
    }

    /// Validate, limit and execute generated SQL. Non-empty results are
    /// remembered.
    fn run_generated(&self, question: &str, sql: &str) -> ConciergeResult<SqlOutcome> {
        let validated = guard::validate(sql)?;
        let rows = self
            .db
            .run_readonly(&guard::with_row_limit(&validated, self.row_limit))?;

        if !rows.is_empty() {
            self.db.remember_sql(question, &validated)?;
        }
        let projects = self.db.projects_by_ids(&rows.project_ids())?;

        Ok(SqlOutcome {
            strategy: SearchStrategy::Generated,
            sql: Some(validated),
            rows,
            projects,
            ..SqlOutcome::empty()
        })
    }

    /// Answer a listing question with the first step that yields rows.
    pub async fn search(&self, question: &str, filters: &IntentFilters) -> ConciergeResult<SqlOutcome> {
        let mut generated_sql = None;
        let mut error = None;

        match self.generate(question).await {
            Ok(Some(sql)) => {
                match self.run_generated(question, &sql) {
                    Ok(outcome) if !outcome.rows.is_empty() => {
                        info!(
                            "Generated SQL returned {} rows",
                            outcome.rows.rows.len()
                        );
                        return Ok(outcome);
                    }
                    Ok(_) => debug!("Generated SQL returned no rows, using fallback"),
                    Err(e) => {
                        warn!("Generated SQL rejected: {}", e);
                        error = Some(e.to_string());
                    }
                }
                generated_sql = Some(sql);
            }
            Ok(None) => debug!("No generated SQL, using fallback"),
            Err(e) => {
                warn!("SQL generation failed: {}", e);
                error = Some(e.to_string());
            }
        }

        let mut outcome = self.fallback(question, filters)?;
        outcome.sql = generated_sql;
        outcome.error = error;
        Ok(outcome)
    }

    /// Structured filter query plus the `LIKE` keyword search.
    ///
    /// Every project whose text columns contain one of
    /// [`keywords`](Self::keywords) is in `projects` or `related`.
    pub fn fallback(&self, question: &str, filters: &IntentFilters) -> ConciergeResult<SqlOutcome> {
        let structured = self.db.filter_projects(filters, self.row_limit)?;
        let keywords = Self::keywords(question, filters);
        let like_hits = self.db.like_search(&keywords)?;
        debug!(
            "Fallback: {} structured, {} keyword hits for {:?}",
            structured.len(),
            like_hits.len(),
            keywords
        );

        if !structured.is_empty() {
            let seen: HashSet<i64> = structured.iter().map(|p| p.id).collect();
            let related = like_hits
                .into_iter()
                .filter(|p| !seen.contains(&p.id))
                .collect();
            return Ok(SqlOutcome {
                strategy: SearchStrategy::Structured,
                projects: structured,
                related,
                ..SqlOutcome::empty()
            });
        }

        if !like_hits.is_empty() {
            let mut projects = like_hits;
            let related = projects.split_off(projects.len().min(self.row_limit));
            return Ok(SqlOutcome {
                strategy: SearchStrategy::Keyword,
                projects,
                related,
                ..SqlOutcome::empty()
            });
        }

        Ok(SqlOutcome::empty())
    }

    /// Keywords for the `LIKE` search: meaningful question words plus the
    /// text filter values.
    pub fn keywords(question: &str, filters: &IntentFilters) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        let mut push = |word: &str| {
            let word = word.trim().to_lowercase();
            if !word.is_empty() && !keywords.contains(&word) {
                keywords.push(word);
            }
        };

        for word in question
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .map(|w| w.trim_matches('-'))
        {
            if word.len() >= 3
                && !word.chars().any(|c| c.is_ascii_digit())
                && !KEYWORD_STOPWORDS.contains(&word)
            {
                push(word);
            }
        }

        for value in [&filters.city, &filters.developer, &filters.project_name]
            .into_iter()
            .flatten()
        {
            push(value);
        }
        for feature in &filters.must_have_features {
            if feature != "ready" {
                push(feature);
            }
        }

        keywords
    }
}
