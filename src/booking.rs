//! Viewing bookings.
//!
//! A booking resolves the project, validates the visitor's details,
//! upserts the lead by email and then creates or updates the single
//! booking for that (lead, project) pair.

use crate::db::{Database, LeadInput};
use crate::error::ConciergeResult;
use crate::models::{Lead, Project, VisitBooking};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("invalid email regex")
});

/// Tool arguments for `book_viewing`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingRequest {
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default, alias = "visitor_name")]
    pub customer_name: String,
    #[serde(default, alias = "visitor_email")]
    pub customer_email: String,
    /// `YYYY-MM-DD`.
    #[serde(default, alias = "visit_date")]
    pub preferred_date: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// Why a booking was not made. The message goes straight to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookingRejection {
    #[error("Project '{0}' not found.")]
    ProjectNotFound(String),

    #[error("'{0}' is not a valid email address.")]
    InvalidEmail(String),

    #[error("Invalid date '{0}'. Please use YYYY-MM-DD format (e.g. 2027-03-15).")]
    InvalidDate(String),

    #[error("Please tell me your name so I can book the viewing.")]
    MissingName,
}

#[derive(Debug, Clone)]
pub struct BookingConfirmation {
    pub booking: VisitBooking,
    pub project: Project,
    pub lead: Lead,
    /// False when an existing booking was updated.
    pub created: bool,
}

impl BookingConfirmation {
    pub fn message(&self) -> String {
        let heading = if self.created {
            "Viewing booked successfully!"
        } else {
            "Your existing viewing has been updated!"
        };
        let date = self
            .booking
            .preferred_date
            .map(|d| d.format("%B %d, %Y").to_string())
            .unwrap_or_else(|| "to be confirmed".to_string());
        let visitor = match &self.lead.last_name {
            Some(last) => format!("{} {}", self.lead.first_name, last),
            None => self.lead.first_name.clone(),
        };

        format!(
            "**{}**\n\n\
             - **Property**: {}\n\
             - **Visitor**: {}\n\
             - **Date**: {}\n\
             - **Status**: {}\n\
             - **Confirmation**: #{}\n\n\
             A confirmation email will be sent to {}",
            heading,
            self.project.name,
            visitor,
            date,
            self.booking.status,
            self.booking.id,
            self.lead.email
        )
    }
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Confirmed(BookingConfirmation),
    Rejected(BookingRejection),
}

impl BookingOutcome {
    pub fn message(&self) -> String {
        match self {
            BookingOutcome::Confirmed(c) => c.message(),
            BookingOutcome::Rejected(r) => r.to_string(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, BookingOutcome::Confirmed(_))
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

fn resolve_project(db: &Database, request: &BookingRequest) -> ConciergeResult<Option<Project>> {
    if let Some(id) = request.project_id {
        if let Some(project) = db.get_project(id)? {
            return Ok(Some(project));
        }
    }
    match request.project_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(db.find_projects_by_name(name, 1)?.into_iter().next()),
        _ => Ok(None),
    }
}

pub fn book_viewing(db: &Database, request: &BookingRequest) -> ConciergeResult<BookingOutcome> {
    let Some(project) = resolve_project(db, request)? else {
        let wanted = request
            .project_name
            .clone()
            .or_else(|| request.project_id.map(|id| format!("#{}", id)))
            .unwrap_or_default();
        return Ok(BookingOutcome::Rejected(BookingRejection::ProjectNotFound(wanted)));
    };

    let email = request.customer_email.trim();
    if !is_valid_email(email) {
        return Ok(BookingOutcome::Rejected(BookingRejection::InvalidEmail(
            email.to_string(),
        )));
    }

    let preferred_date = match request.preferred_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                return Ok(BookingOutcome::Rejected(BookingRejection::InvalidDate(
                    raw.to_string(),
                )))
            }
        },
        _ => None,
    };

    let mut names = request.customer_name.split_whitespace();
    let Some(first_name) = names.next() else {
        return Ok(BookingOutcome::Rejected(BookingRejection::MissingName));
    };
    let rest: Vec<&str> = names.collect();

    let city = request.city.clone().or_else(|| project.city.clone());
    let lead = db.upsert_lead(&LeadInput {
        first_name: first_name.to_string(),
        last_name: (!rest.is_empty()).then(|| rest.join(" ")),
        email: email.to_string(),
        city: city.clone(),
        preferences: None,
    })?;
    let (booking, created) =
        db.upsert_booking(lead.id, project.id, city.as_deref(), preferred_date)?;

    info!(
        "{} booking {} for lead {} on project {}",
        if created { "Created" } else { "Updated" },
        booking.id,
        lead.id,
        project.id
    );

    Ok(BookingOutcome::Confirmed(BookingConfirmation {
        booking,
        project,
        lead,
        created,
    }))
}
