//! Tool definitions and execution for the concierge agent.
//!
//! The same executor serves both agents: the routing graph calls the
//! typed methods directly, the tool agent goes through [`ToolExecutor::execute`]
//! with LLM-supplied JSON arguments. Either way every call is recorded in
//! the turn's [`TurnArtifacts`].

use super::{AgentEvent, Services};
use crate::analysis::similar::Alternatives;
use crate::analysis::{self, Comparison, InvestmentAnalysis, SimilarCriteria};
use crate::booking::{self, BookingOutcome, BookingRequest};
use crate::error::ConciergeResult;
use crate::intent::{self, IntentFilters};
use crate::llm::ToolCall;
use crate::models::{Project, UiContext};
use crate::rag::{self, RagHit};
use crate::report;
use crate::sql::SqlOutcome;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub const EXTRACT_INTENT: &str = "extract_intent_filters";
pub const EXECUTE_SQL: &str = "execute_sql_query";
pub const SEARCH_RAG: &str = "search_rag";
pub const UPDATE_UI: &str = "update_ui_context";
pub const BOOK_VIEWING: &str = "book_viewing";
pub const COMPARE: &str = "compare_projects";
pub const ANALYZE_INVESTMENT: &str = "analyze_investment";
pub const FIND_SIMILAR: &str = "find_similar_properties";

/// Tool definition for the chat-completions tool-calling API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn tool(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    /// Text sent back to the LLM as the tool message.
    pub fn content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// Everything the tools produced during one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnArtifacts {
    /// Tool names in first-use order, without repeats.
    pub tools_used: Vec<String>,
    /// Arguments of the last `update_ui_context` call.
    pub ui: Option<UiContext>,
    /// Projects returned by tools, for citations.
    pub cited: Vec<Project>,
    pub preview_markdown: Option<String>,
}

impl TurnArtifacts {
    fn record(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    pub fn cite(&mut self, projects: &[Project]) {
        for project in projects {
            if !self.cited.iter().any(|p| p.id == project.id) {
                self.cited.push(project.clone());
            }
        }
    }
}

/// Get all tool definitions offered to the LLM.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            EXTRACT_INTENT,
            "Parse project/developer/city/price/bedrooms/property_type/features and a rewritten_query from the user message to ground tool calls.",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "The user's message" }
                },
                "required": ["message"]
            }),
        ),
        tool(
            EXECUTE_SQL,
            "Structured search over the projects table from a natural-language question. Primary search tool. Falls back to keyword search when no rows match.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Natural-language question with all known filters, prices in USD" }
                },
                "required": ["query"]
            }),
        ),
        tool(
            SEARCH_RAG,
            "Semantic search over project descriptions and features. Use for amenities, views, vibe, proximity, or when SQL returns nothing.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Description of what the buyer wants" },
                    "k": { "type": "integer", "description": "Number of results (default 5)" }
                },
                "required": ["query"]
            }),
        ),
        tool(
            UPDATE_UI,
            "Send structured data to the user interface: shortlisted project ids and booking status.",
            json!({
                "type": "object",
                "properties": {
                    "shortlisted_project_ids": { "type": "array", "items": { "type": "integer" } },
                    "booking_status": { "type": "string", "description": "e.g. pending, confirmed" }
                }
            }),
        ),
        tool(
            BOOK_VIEWING,
            "Book a property viewing once the buyer confirmed the project and gave name and email.",
            json!({
                "type": "object",
                "properties": {
                    "project_id": { "type": "integer" },
                    "project_name": { "type": "string" },
                    "customer_name": { "type": "string" },
                    "customer_email": { "type": "string" },
                    "preferred_date": { "type": "string", "description": "YYYY-MM-DD" },
                    "city": { "type": "string" }
                },
                "required": ["customer_name", "customer_email"]
            }),
        ),
        tool(
            COMPARE,
            "Compare 2-5 named projects side by side (city, price, bedrooms, type, area, status).",
            json!({
                "type": "object",
                "properties": {
                    "project_names": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["project_names"]
            }),
        ),
        tool(
            ANALYZE_INVESTMENT,
            "Analyze investment potential of a project: rental yield, appreciation, score.",
            json!({
                "type": "object",
                "properties": {
                    "project_name": { "type": "string" }
                },
                "required": ["project_name"]
            }),
        ),
        tool(
            FIND_SIMILAR,
            "When a search returns nothing, suggest alternatives by relaxing criteria (+/-1 bedroom, higher budget, other cities).",
            json!({
                "type": "object",
                "properties": {
                    "bedrooms": { "type": "integer" },
                    "city": { "type": "string" },
                    "max_price": { "type": "number" },
                    "property_type": { "type": "string" }
                }
            }),
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct MessageArgs {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct UiArgs {
    #[serde(default)]
    shortlisted_project_ids: Vec<i64>,
    #[serde(default)]
    booking_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompareArgs {
    project_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InvestmentArgs {
    project_name: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(name: &str, args: Value) -> Result<T, ToolResult> {
    serde_json::from_value(args)
        .map_err(|e| ToolResult::error(format!("Invalid arguments for {}: {}", name, e)))
}

/// The tools executor that handles tool calls for one turn.
pub struct ToolExecutor {
    services: Arc<Services>,
    events: Option<UnboundedSender<AgentEvent>>,
    pub artifacts: TurnArtifacts,
}

impl ToolExecutor {
    pub fn new(services: Arc<Services>, events: Option<UnboundedSender<AgentEvent>>) -> Self {
        Self {
            services,
            events,
            artifacts: TurnArtifacts::default(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn started(&mut self, name: &str) {
        self.artifacts.record(name);
        if let Some(events) = &self.events {
            // A closed stream only means the client went away.
            let _ = events.send(AgentEvent::Tool {
                name: name.to_string(),
            });
        }
    }

    fn finished(&self, name: &str, success: bool) {
        self.services.monitor.tool_called(name, success);
    }

    /// Execute an LLM tool call and return the result.
    pub async fn execute(&mut self, call: &ToolCall) -> ToolResult {
        let name = call.function.name.as_str();
        let args = call.arguments();
        debug!("Executing tool: {} with args: {}", name, args);

        let result = match name {
            EXTRACT_INTENT => match parse_args::<MessageArgs>(name, args) {
                Ok(a) => {
                    let filters = self.extract_intent(&a.message).await;
                    ToolResult::success(serde_json::to_string(&filters).unwrap_or_default())
                }
                Err(e) => e,
            },
            EXECUTE_SQL => match parse_args::<QueryArgs>(name, args) {
                Ok(a) => {
                    let filters = intent::extract(&a.query);
                    match self.execute_sql(&a.query, &filters).await {
                        Ok(outcome) => ToolResult::success(outcome.to_tool_json().to_string()),
                        Err(e) => ToolResult::error(e.to_string()),
                    }
                }
                Err(e) => e,
            },
            SEARCH_RAG => match parse_args::<QueryArgs>(name, args) {
                Ok(a) => match self.search_rag(&a.query, a.k).await {
                    Ok(hits) if hits.is_empty() => ToolResult::success(
                        "No relevant projects found matching the description.".to_string(),
                    ),
                    Ok(hits) => ToolResult::success(rag::format_hits(&hits)),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => e,
            },
            UPDATE_UI => match parse_args::<UiArgs>(name, args) {
                Ok(a) => {
                    self.update_ui_context(a.shortlisted_project_ids, a.booking_status);
                    ToolResult::success("UI Context Updated.".to_string())
                }
                Err(e) => e,
            },
            BOOK_VIEWING => match parse_args::<BookingRequest>(name, args) {
                Ok(request) => match self.book_viewing(&request) {
                    Ok(outcome) if outcome.is_confirmed() => ToolResult::success(outcome.message()),
                    Ok(outcome) => ToolResult::error(outcome.message()),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => e,
            },
            COMPARE => match parse_args::<CompareArgs>(name, args) {
                Ok(a) => match self.compare_projects(&a.project_names) {
                    Ok(Comparison::Table { markdown, .. }) => ToolResult::success(markdown),
                    Ok(other) => ToolResult::error(other.message()),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => e,
            },
            ANALYZE_INVESTMENT => match parse_args::<InvestmentArgs>(name, args) {
                Ok(a) => match self.analyze_investment(&a.project_name) {
                    Ok(Some(analysis)) => ToolResult::success(analysis.to_markdown()),
                    Ok(None) => ToolResult::error(format!(
                        "Project '{}' not found in database.",
                        a.project_name
                    )),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => e,
            },
            FIND_SIMILAR => match parse_args::<SimilarCriteria>(name, args) {
                Ok(criteria) => match self.find_similar(&criteria) {
                    Ok(groups) => ToolResult::success(analysis::format_alternatives(&groups)),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => e,
            },
            _ => ToolResult::error(format!("Unknown tool: {}", name)),
        };

        if !result.success {
            debug!("Tool {} returned error: {:?}", name, result.error);
        }
        result
    }

    pub async fn extract_intent(&mut self, message: &str) -> IntentFilters {
        self.started(EXTRACT_INTENT);
        let filters = self.services.intent.extract(message).await;
        self.finished(EXTRACT_INTENT, true);
        filters
    }

    /// Text-to-SQL search. Primary matches are cited and previewed.
    pub async fn execute_sql(
        &mut self,
        question: &str,
        filters: &IntentFilters,
    ) -> ConciergeResult<SqlOutcome> {
        self.started(EXECUTE_SQL);
        let result = self.services.sql.search(question, filters).await;

        match &result {
            Ok(outcome) => {
                if outcome.sql.is_some() {
                    self.services.monitor.sql_generated(outcome.sql.as_deref());
                }
                self.artifacts.cite(&outcome.projects);
                if !outcome.projects.is_empty() {
                    self.artifacts.preview_markdown =
                        Some(report::generate_listing_table(&outcome.projects));
                } else if !outcome.rows.is_empty() {
                    self.artifacts.preview_markdown = Some(report::generate_rows_table(&outcome.rows));
                }
            }
            Err(_) => self.services.monitor.sql_generated(None),
        }

        self.finished(EXECUTE_SQL, result.is_ok());
        result
    }

    pub async fn search_rag(&mut self, query: &str, k: Option<usize>) -> ConciergeResult<Vec<RagHit>> {
        self.started(SEARCH_RAG);
        let result = self.services.rag.search(query, k).await;
        if let Ok(hits) = &result {
            let projects: Vec<Project> = hits.iter().map(|h| h.project.clone()).collect();
            self.artifacts.cite(&projects);
        }
        self.finished(SEARCH_RAG, result.is_ok());
        result
    }

    pub fn update_ui_context(
        &mut self,
        shortlisted_project_ids: Vec<i64>,
        booking_status: Option<String>,
    ) {
        self.started(UPDATE_UI);
        let mut ids: Vec<i64> = Vec::with_capacity(shortlisted_project_ids.len());
        for id in shortlisted_project_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.artifacts.ui = Some(UiContext {
            shortlisted_project_ids: ids,
            booking_status,
        });
        self.finished(UPDATE_UI, true);
    }

    pub fn book_viewing(&mut self, request: &BookingRequest) -> ConciergeResult<BookingOutcome> {
        self.started(BOOK_VIEWING);
        let result = booking::book_viewing(&self.services.db, request);
        if let Ok(BookingOutcome::Confirmed(confirmation)) = &result {
            self.artifacts.cite(std::slice::from_ref(&confirmation.project));
        }
        let ok = matches!(result, Ok(BookingOutcome::Confirmed(_)));
        self.finished(BOOK_VIEWING, ok);
        result
    }

    pub fn compare_projects(&mut self, names: &[String]) -> ConciergeResult<Comparison> {
        self.started(COMPARE);
        let result = analysis::compare(&self.services.db, names);
        if let Ok(comparison) = &result {
            self.artifacts.cite(comparison.projects());
            if let Comparison::Table { markdown, .. } = comparison {
                self.artifacts.preview_markdown = Some(markdown.clone());
            }
        }
        self.finished(COMPARE, matches!(result, Ok(Comparison::Table { .. })));
        result
    }

    pub fn analyze_investment(
        &mut self,
        project_name: &str,
    ) -> ConciergeResult<Option<InvestmentAnalysis>> {
        self.started(ANALYZE_INVESTMENT);
        let result = self
            .services
            .db
            .find_projects_by_name(project_name, 1)
            .map(|found| found.into_iter().next());
        let analysis = match result {
            Ok(Some(project)) => {
                self.artifacts.cite(std::slice::from_ref(&project));
                Ok(Some(analysis::analyze(&project)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.finished(ANALYZE_INVESTMENT, matches!(analysis, Ok(Some(_))));
        analysis
    }

    pub fn find_similar(&mut self, criteria: &SimilarCriteria) -> ConciergeResult<Vec<Alternatives>> {
        self.started(FIND_SIMILAR);
        let result = analysis::find_similar(&self.services.db, criteria);
        if let Ok(groups) = &result {
            for group in groups {
                self.artifacts.cite(&group.projects);
            }
        }
        self.finished(FIND_SIMILAR, result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::services;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new("call_1", name, args)
    }

    #[test]
    fn test_tool_definitions() {
        let tools = get_tool_definitions();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names.len(), 8);
        for expected in [EXECUTE_SQL, SEARCH_RAG, UPDATE_UI, BOOK_VIEWING, FIND_SIMILAR] {
            assert!(names.contains(&expected));
        }
        let json = serde_json::to_value(&tools[0]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_execute_sql_records_artifacts() {
        let mut executor = ToolExecutor::new(services(None), None);
        let result = executor
            .execute(&call(EXECUTE_SQL, json!({"query": "villas in Abu Dhabi"})))
            .await;

        assert!(result.success);
        let output: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(output["projects"][0]["name"], "Saadiyat Beach Villas");
        assert_eq!(executor.artifacts.tools_used, vec![EXECUTE_SQL]);
        assert!(executor.artifacts.preview_markdown.is_some());
        assert!(!executor.artifacts.cited.is_empty());
    }

    #[tokio::test]
    async fn test_update_ui_context_dedupes() {
        let mut executor = ToolExecutor::new(services(None), None);
        executor
            .execute(&call(
                UPDATE_UI,
                json!({"shortlisted_project_ids": [3, 1, 3], "booking_status": "pending"}),
            ))
            .await;
        let ui = executor.artifacts.ui.clone().unwrap();
        assert_eq!(ui.shortlisted_project_ids, vec![3, 1]);
        assert_eq!(ui.booking_status.as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn test_bad_arguments_and_unknown_tool() {
        let mut executor = ToolExecutor::new(services(None), None);
        let bad = executor.execute(&call(COMPARE, json!({"names": "x"}))).await;
        assert!(!bad.success);
        assert!(bad.content().starts_with("Error: Invalid arguments for compare_projects"));

        let unknown = executor.execute(&call("web_search", json!({}))).await;
        assert_eq!(unknown.error.as_deref(), Some("Unknown tool: web_search"));
    }

    #[tokio::test]
    async fn test_booking_and_investment_tools() {
        let svc = services(None);
        let mut executor = ToolExecutor::new(svc.clone(), None);
        let booked = executor
            .execute(&call(
                BOOK_VIEWING,
                json!({
                    "project_name": "Thames Quay",
                    "customer_name": "Ola Nordmann",
                    "customer_email": "ola@example.com",
                    "preferred_date": "2027-05-02"
                }),
            ))
            .await;
        assert!(booked.success, "{:?}", booked);
        assert_eq!(svc.db.count_bookings().unwrap(), 1);

        let invest = executor
            .execute(&call(ANALYZE_INVESTMENT, json!({"project_name": "thames quay"})))
            .await;
        assert!(invest.output.contains("Investment Analysis for Thames Quay Apartments"));

        let missing = executor
            .execute(&call(ANALYZE_INVESTMENT, json!({"project_name": "Atlantis"})))
            .await;
        assert!(!missing.success);

        let usage = svc.monitor.snapshot().tool_usage;
        assert_eq!(usage[ANALYZE_INVESTMENT], 2);
    }

    #[tokio::test]
    async fn test_events_are_sent() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut executor = ToolExecutor::new(services(None), Some(tx));
        executor.search_rag("pool", None).await.unwrap();
        match rx.recv().await {
            Some(AgentEvent::Tool { name }) => assert_eq!(name, SEARCH_RAG),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
