//! Data models for the concierge.
//!
//! This module contains the core records persisted in the database
//! (projects, leads, visit bookings) and the payloads exchanged over
//! the chat API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Completion state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Ready to move in.
    Available,
    /// Under construction.
    OffPlan,
}

impl CompletionStatus {
    /// Column value stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Available => "available",
            CompletionStatus::OffPlan => "off_plan",
        }
    }

    /// Normalize free text ("Available", "off plan", "ready") into a status.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("available") || lower.contains("ready") {
            CompletionStatus::Available
        } else {
            CompletionStatus::OffPlan
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Available => write!(f, "Available"),
            CompletionStatus::OffPlan => write!(f, "Off plan"),
        }
    }
}

/// A real-estate project listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Database identifier.
    pub id: i64,
    /// Project / property name.
    pub name: String,
    /// Number of bedrooms.
    pub bedrooms: Option<i64>,
    /// Number of bathrooms.
    pub bathrooms: Option<f64>,
    /// `available` or `off_plan`.
    pub completion_status: Option<String>,
    /// Unit type as listed by the developer.
    pub unit_type: Option<String>,
    /// Developer / builder name.
    pub developer: Option<String>,
    /// Price in USD.
    pub price: Option<f64>,
    /// Area in square meters.
    pub area: Option<f64>,
    /// Lowercase property type (apartment, villa, townhouse, ...).
    pub property_type: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// Country code (AE, US, UK, ...).
    pub country: Option<String>,
    /// Expected completion date.
    pub completion_date: Option<String>,
    /// Unit features (free text or JSON list).
    pub features: Option<String>,
    /// Building facilities (free text or JSON list).
    pub facilities: Option<String>,
    /// Marketing description.
    pub description: Option<String>,
}

impl Project {
    /// Price formatted as `$1,250,000`, or `N/A`.
    pub fn price_label(&self) -> String {
        match self.price {
            Some(p) if p > 0.0 => format!("${}", group_thousands(p.round() as i64)),
            _ => "N/A".to_string(),
        }
    }

    /// Bedroom count as text, or `N/A`.
    pub fn bedrooms_label(&self) -> String {
        match self.bedrooms {
            Some(b) if b > 0 => b.to_string(),
            Some(0) => "Studio".to_string(),
            _ => "N/A".to_string(),
        }
    }

    /// Short citation record for API responses.
    pub fn citation(&self) -> Citation {
        Citation {
            project_id: self.id,
            name: self.name.clone(),
            city: self.city.clone(),
        }
    }
}

/// Format an integer with comma thousands separators.
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// A prospective buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub city: Option<String>,
    pub preferences: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status of a visit booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            _ => BookingStatus::Pending,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scheduled property visit. One row per (lead, project).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitBooking {
    /// Confirmation identifier.
    pub id: String,
    pub lead_id: i64,
    pub project_id: i64,
    /// City the buyer is visiting from / interested in.
    pub city: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Project reference returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub project_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Structured data for the frontend, mirrored from `update_ui_context`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortlisted_project_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_status: Option<String>,
}

impl UiContext {
    pub fn is_empty(&self) -> bool {
        self.shortlisted_project_ids.is_empty() && self.booking_status.is_none()
    }
}

/// Body of `POST /api/agents/chat` and `POST /api/vanna/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Chat reply payload, shared by the JSON and SSE endpoints.
///
/// Empty collections serialize as `null` so clients can distinguish
/// "no tool ran" from "a tool ran and found nothing".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub data: Option<UiContext>,
    pub tools_used: Option<Vec<String>>,
    pub preview_markdown: Option<String>,
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Body of `POST /api/agents/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1250000), "1,250,000");
        assert_eq!(group_thousands(-45000), "-45,000");
    }

    #[test]
    fn test_price_and_bedroom_labels() {
        let project = Project {
            id: 1,
            name: "Marina Heights".to_string(),
            price: Some(849_999.6),
            bedrooms: Some(0),
            ..Default::default()
        };
        assert_eq!(project.price_label(), "$850,000");
        assert_eq!(project.bedrooms_label(), "Studio");

        let unknown = Project::default();
        assert_eq!(unknown.price_label(), "N/A");
        assert_eq!(unknown.bedrooms_label(), "N/A");
    }

    #[test]
    fn test_completion_status_normalize() {
        assert_eq!(
            CompletionStatus::normalize("Available"),
            CompletionStatus::Available
        );
        assert_eq!(
            CompletionStatus::normalize("off plan"),
            CompletionStatus::OffPlan
        );
        assert_eq!(CompletionStatus::OffPlan.as_str(), "off_plan");
    }

    #[test]
    fn test_chat_response_nulls() {
        let resp = ChatResponse {
            response: "Hello".to_string(),
            conversation_id: "abc".to_string(),
            data: None,
            tools_used: None,
            preview_markdown: None,
            citations: None,
            metadata: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["data"].is_null());
        assert!(json["tools_used"].is_null());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_booking_status_parse() {
        assert_eq!(BookingStatus::parse("Confirmed"), BookingStatus::Confirmed);
        assert_eq!(BookingStatus::parse("canceled"), BookingStatus::Cancelled);
        assert_eq!(BookingStatus::parse("whatever"), BookingStatus::Pending);
    }
}
