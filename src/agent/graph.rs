//! Deterministic routing graph.
//!
//! Every turn starts at [`Node::ExtractIntent`], is routed to exactly one
//! handler node, and ends with [`Node::Synthesize`] (done by the caller,
//! which owns the LLM). Handlers call the same tools the LLM agent uses,
//! so tool usage, UI data and citations are reported identically in both
//! modes.

use super::memory::ConversationState;
use super::tools::ToolExecutor;
use crate::analysis::{Comparison, SimilarCriteria};
use crate::booking::{BookingOutcome, BookingRequest};
use crate::error::ConciergeResult;
use crate::intent::IntentFilters;
use crate::models::Project;
use crate::rag;
use crate::report;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::{debug, info};

/// Projects listed in a templated reply.
const SUMMARY_LIMIT: usize = 5;

static COMPARE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:,|\band\b|\bvs\.?|\bversus\b|\bwith\b)\s*").expect("invalid compare regex")
});

static COMPARE_LEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^.*?\b(?:compare|comparison of|difference between)\b\s*").expect("invalid compare regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    ExtractIntent,
    Greet,
    OffTopic,
    Book,
    Compare,
    Invest,
    Detail,
    Listing,
    MissingFilters,
    Synthesize,
    End,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Node::ExtractIntent => "extract_intent",
            Node::Greet => "greet",
            Node::OffTopic => "off_topic",
            Node::Book => "book",
            Node::Compare => "compare",
            Node::Invest => "invest",
            Node::Detail => "detail",
            Node::Listing => "listing",
            Node::MissingFilters => "missing_filters",
            Node::Synthesize => "synthesize",
            Node::End => "end",
        };
        write!(f, "{}", name)
    }
}

/// Result of one pass through the graph, before synthesis.
#[derive(Debug, Clone)]
pub struct GraphTurn {
    /// Handler node that produced the draft.
    pub node: Node,
    /// This turn's filters merged with the conversation's.
    pub filters: IntentFilters,
    /// Templated reply.
    pub draft: String,
    /// Tool output handed to synthesis.
    pub context: Vec<String>,
}

impl GraphTurn {
    fn new(node: Node, filters: &IntentFilters, draft: impl Into<String>) -> Self {
        Self {
            node,
            filters: filters.clone(),
            draft: draft.into(),
            context: Vec::new(),
        }
    }
}

/// Pick the handler node for this turn's intent.
///
/// Booking, comparison and investment requests win over everything else.
/// A bare project name is a detail question; any other search filter
/// makes it a listing. Without filters the concierge asks for them.
pub fn route(filters: &IntentFilters, state: &ConversationState) -> Node {
    if filters.is_booking {
        return Node::Book;
    }
    if filters.is_comparison {
        return Node::Compare;
    }
    if filters.is_investment {
        return Node::Invest;
    }
    if filters.is_greeting && !filters.has_any_filter() {
        return Node::Greet;
    }
    if filters.is_off_topic && !filters.has_any_filter() {
        return Node::OffTopic;
    }
    if filters.is_detail_question
        && (filters.has_named_target() || state.focus_project_id.is_some())
    {
        return Node::Detail;
    }
    if filters.project_name.is_some() && only_names_project(filters) {
        return Node::Detail;
    }
    if filters.has_any_filter() {
        return Node::Listing;
    }
    Node::MissingFilters
}

fn only_names_project(filters: &IntentFilters) -> bool {
    let mut rest = filters.clone();
    rest.project_name = None;
    !rest.has_any_filter()
}

/// Run the graph for one user message.
pub async fn run(
    executor: &mut ToolExecutor,
    state: &ConversationState,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    debug!("Graph node: {}", Node::ExtractIntent);
    let raw = executor.extract_intent(message).await;
    let mut filters = raw.clone();
    filters.inherit_from(&state.filters);

    let node = route(&raw, state);
    info!("Routing turn to {}", node);

    match node {
        Node::Greet => Ok(GraphTurn::new(
            node,
            &filters,
            "Hello! I'm your property concierge. Which city are you considering, \
             what budget do you have in mind, and how many bedrooms do you need?",
        )),
        Node::OffTopic => Ok(GraphTurn::new(
            node,
            &filters,
            "I can only help with property searches, project details, investment \
             questions and viewings. What kind of home are you looking for?",
        )),
        Node::Book => book(executor, state, &raw, &filters, message),
        Node::Compare => compare(executor, state, &filters, message),
        Node::Invest => invest(executor, state, &raw, &filters, message),
        Node::Detail => detail(executor, state, &raw, &filters, message).await,
        Node::Listing => listing(executor, &raw, &filters, message).await,
        _ => missing_filters(executor, &raw, &filters, message).await,
    }
}

/// The project a message is about: named, mentioned, or in focus.
fn resolve_target(
    executor: &ToolExecutor,
    state: &ConversationState,
    raw: &IntentFilters,
    message: &str,
) -> ConciergeResult<Option<Project>> {
    let db = &executor.services().db;

    if let Some(name) = &raw.project_name {
        if let Some(project) = db.find_projects_by_name(name, 1)?.into_iter().next() {
            return Ok(Some(project));
        }
    }
    if let Some(project) = db.projects_mentioned_in(message)?.into_iter().next() {
        return Ok(Some(project));
    }
    if let Some(id) = state.focus_project_id {
        return db.get_project(id);
    }
    if let [only] = state.shortlisted_ids.as_slice() {
        return db.get_project(*only);
    }
    Ok(None)
}

fn shortlist_names(executor: &ToolExecutor, state: &ConversationState) -> ConciergeResult<Vec<String>> {
    Ok(executor
        .services()
        .db
        .projects_by_ids(&state.shortlisted_ids)?
        .into_iter()
        .map(|p| p.name)
        .collect())
}

fn book(
    executor: &mut ToolExecutor,
    state: &ConversationState,
    raw: &IntentFilters,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    let Some(project) = resolve_target(executor, state, raw, message)? else {
        let names = shortlist_names(executor, state)?;
        let draft = if names.is_empty() {
            "Which project would you like to view? Tell me its name and I'll set up the viewing."
                .to_string()
        } else {
            format!(
                "Which of these projects would you like to view: {}?",
                names.join(", ")
            )
        };
        return Ok(GraphTurn::new(Node::Book, filters, draft));
    };

    let (name, email) = (filters.lead_name.clone(), filters.lead_email.clone());
    let missing = match (&name, &email) {
        (None, None) => Some("your full name and email address"),
        (None, Some(_)) => Some("your full name"),
        (Some(_), None) => Some("your email address"),
        (Some(_), Some(_)) => None,
    };
    if let Some(missing) = missing {
        executor.artifacts.cite(std::slice::from_ref(&project));
        let draft = format!(
            "Happy to arrange a viewing of **{}**. Please share {}, and a preferred date \
             (YYYY-MM-DD) if you have one.",
            project.name, missing
        );
        return Ok(GraphTurn::new(Node::Book, filters, draft));
    }

    let request = BookingRequest {
        project_id: Some(project.id),
        project_name: Some(project.name.clone()),
        customer_name: name.unwrap_or_default(),
        customer_email: email.unwrap_or_default(),
        preferred_date: raw.preferred_date.clone(),
        city: None,
    };
    let outcome = executor.book_viewing(&request)?;
    if let BookingOutcome::Confirmed(confirmation) = &outcome {
        executor.update_ui_context(
            vec![project.id],
            Some(confirmation.booking.status.to_string()),
        );
    }

    let mut turn = GraphTurn::new(Node::Book, filters, outcome.message());
    turn.context.push(report::generate_project_details(&project));
    Ok(turn)
}

/// Names to compare: full project names found in the message, else the
/// phrases around "and" / "vs" / commas.
fn comparison_targets(executor: &ToolExecutor, message: &str) -> ConciergeResult<Vec<String>> {
    let mentioned: Vec<String> = executor
        .services()
        .db
        .projects_mentioned_in(message)?
        .into_iter()
        .map(|p| p.name)
        .collect();
    if mentioned.len() >= 2 {
        return Ok(mentioned);
    }

    let body = COMPARE_LEAD_RE.replace(message, "");
    Ok(COMPARE_SPLIT_RE
        .split(body.trim().trim_end_matches(['?', '.', '!']))
        .map(str::trim)
        .filter(|part| part.len() >= 3)
        .map(str::to_string)
        .collect())
}

fn compare(
    executor: &mut ToolExecutor,
    state: &ConversationState,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    let mut names = comparison_targets(executor, message)?;
    if names.len() < 2 && state.shortlisted_ids.len() >= 2 {
        names = shortlist_names(executor, state)?;
    }

    let comparison = executor.compare_projects(&names)?;
    if let Comparison::Table { projects, .. } = &comparison {
        executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
    }

    let draft = match &comparison {
        Comparison::Table { projects, markdown } => format!(
            "Here is how {} compare:\n\n{}",
            projects
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            markdown
        ),
        other => other.message(),
    };
    Ok(GraphTurn::new(Node::Compare, filters, draft))
}

fn invest(
    executor: &mut ToolExecutor,
    state: &ConversationState,
    raw: &IntentFilters,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    let Some(project) = resolve_target(executor, state, raw, message)? else {
        return Ok(GraphTurn::new(
            Node::Invest,
            filters,
            "Which project should I analyze for investment potential?",
        ));
    };

    let draft = match executor.analyze_investment(&project.name)? {
        Some(analysis) => {
            executor.update_ui_context(vec![project.id], None);
            analysis.to_markdown()
        }
        None => format!("Project '{}' not found in database.", project.name),
    };
    Ok(GraphTurn::new(Node::Invest, filters, draft))
}

async fn detail(
    executor: &mut ToolExecutor,
    state: &ConversationState,
    raw: &IntentFilters,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    match resolve_target(executor, state, raw, message)? {
        Some(project) => {
            executor.artifacts.cite(std::slice::from_ref(&project));
            let hits = executor
                .search_rag(&format!("{} {}", project.name, message), Some(3))
                .await?;
            executor.update_ui_context(vec![project.id], None);

            let mut turn = GraphTurn::new(
                Node::Detail,
                filters,
                report::generate_project_details(&project),
            );
            if !hits.is_empty() {
                turn.context.push(rag::format_hits(&hits));
            }
            Ok(turn)
        }
        None if raw.developer.is_some() => listing(executor, raw, filters, message).await,
        None => {
            let hits = executor.search_rag(message, None).await?;
            let projects: Vec<Project> = hits.iter().map(|h| h.project.clone()).collect();
            let draft = if projects.is_empty() {
                "I couldn't find a project by that name. Could you check the spelling, \
                 or tell me the city you're interested in?"
                    .to_string()
            } else {
                executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
                format!(
                    "I couldn't find that exact project, but these look related:\n\n{}",
                    report::generate_listing_summary(&projects, SUMMARY_LIMIT)
                )
            };
            Ok(GraphTurn::new(Node::Detail, filters, draft))
        }
    }
}

/// SQL search, then semantic search, then cross-sell.
async fn listing(
    executor: &mut ToolExecutor,
    raw: &IntentFilters,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    let question = search_question(message, raw, filters);
    let outcome = executor.execute_sql(&question, filters).await?;
    let mut turn = GraphTurn::new(Node::Listing, filters, String::new());

    let projects = &outcome.projects;
    if !projects.is_empty() {
        executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
        turn.draft = format!(
            "I found {} matching project{}:\n\n{}",
            projects.len(),
            if projects.len() == 1 { "" } else { "s" },
            report::generate_listing_summary(projects, SUMMARY_LIMIT)
        );
        if !outcome.related.is_empty() {
            let names: Vec<&str> = outcome
                .related
                .iter()
                .take(3)
                .map(|p| p.name.as_str())
                .collect();
            turn.draft
                .push_str(&format!("\n\nYou might also like: {}.", names.join(", ")));
        }
        if let Some(question) = clarifying_question(&filters.missing_filters()) {
            turn.draft.push_str(&format!("\n\nTo narrow this down, {}", question));
        }
        turn.context.push(outcome.to_tool_json().to_string());
        return Ok(turn);
    }

    if !outcome.rows.is_empty() {
        turn.draft = format!(
            "Here is what the data shows:\n\n{}",
            report::generate_rows_table(&outcome.rows)
        );
        return Ok(turn);
    }

    debug!("SQL search was empty, trying semantic search");
    let hits = executor.search_rag(message, None).await?;
    if !hits.is_empty() {
        let projects: Vec<Project> = hits.iter().map(|h| h.project.clone()).collect();
        executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
        executor
            .artifacts
            .preview_markdown
            .get_or_insert_with(|| report::generate_listing_table(&projects));
        turn.draft = format!(
            "I couldn't find an exact match, but these projects come close:\n\n{}",
            report::generate_listing_summary(&projects, SUMMARY_LIMIT)
        );
        turn.context.push(rag::format_hits(&hits));
        return Ok(turn);
    }

    debug!("Semantic search was empty, suggesting alternatives");
    let groups = executor.find_similar(&SimilarCriteria::from(filters))?;
    if groups.is_empty() {
        turn.draft = "I couldn't find any matching properties. Could you be flexible on \
                      city, bedrooms or budget?"
            .to_string();
        return Ok(turn);
    }

    let projects: Vec<Project> = groups.iter().flat_map(|g| g.projects.clone()).collect();
    executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
    executor
        .artifacts
        .preview_markdown
        .get_or_insert_with(|| report::generate_listing_table(&projects));
    turn.draft = crate::analysis::format_alternatives(&groups);
    Ok(turn)
}

async fn missing_filters(
    executor: &mut ToolExecutor,
    raw: &IntentFilters,
    filters: &IntentFilters,
    message: &str,
) -> ConciergeResult<GraphTurn> {
    // Earlier turns may already have supplied the filters.
    if filters.has_any_filter() {
        return listing(executor, raw, filters, message).await;
    }

    let question = clarifying_question(&filters.missing_filters())
        .unwrap_or_else(|| "what are you looking for?".to_string());
    let hits = executor.search_rag(message, None).await?;

    let mut turn = GraphTurn::new(Node::MissingFilters, filters, String::new());
    if hits.is_empty() {
        turn.draft = format!("I'd love to help you find a property. Could you tell me {}", question);
    } else {
        let projects: Vec<Project> = hits.iter().map(|h| h.project.clone()).collect();
        executor.update_ui_context(projects.iter().map(|p| p.id).collect(), None);
        turn.draft = format!(
            "Here are a few projects you might like:\n\n{}\n\nCould you tell me {}",
            report::generate_listing_summary(&projects, 3),
            question
        );
        turn.context.push(rag::format_hits(&hits));
    }
    Ok(turn)
}

/// One question covering every missing core filter.
pub fn clarifying_question(missing: &[&str]) -> Option<String> {
    let parts: Vec<&str> = missing
        .iter()
        .filter_map(|m| match *m {
            "city" => Some("which city you prefer"),
            "budget" => Some("your budget in USD"),
            "bedrooms" => Some("how many bedrooms you need"),
            _ => None,
        })
        .collect();

    let joined = match parts.as_slice() {
        [] => return None,
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    };
    Some(format!("{}?", joined))
}

/// The question sent to text-to-SQL. Filters inherited from earlier turns
/// are spelled out so generated SQL sees them too.
fn search_question(message: &str, raw: &IntentFilters, filters: &IntentFilters) -> String {
    if raw == filters {
        return message.to_string();
    }

    let mut question = format!(
        "{} show {} projects",
        message,
        filters.property_type.as_deref().unwrap_or("all")
    );
    if let Some(city) = &filters.city {
        question.push_str(&format!(" in {}", city));
    }
    if let Some(bedrooms) = filters.bedrooms {
        question.push_str(&format!(" with {} bedrooms", bedrooms));
    }
    if let Some(min) = filters.price_min {
        question.push_str(&format!(" over {} usd", min.round() as i64));
    }
    if let Some(max) = filters.price_max {
        question.push_str(&format!(" under {} usd", max.round() as i64));
    }
    question
}
