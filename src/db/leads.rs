//! Leads and visit bookings.

use super::Database;
use crate::error::ConciergeResult;
use crate::models::{BookingStatus, Lead, VisitBooking};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// Lead fields supplied by the buyer.
#[derive(Debug, Clone, Default)]
pub struct LeadInput {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub city: Option<String>,
    pub preferences: Option<String>,
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        city: row.get(4)?,
        preferences: row.get(5)?,
        created_at: parse_timestamp(row.get(6)?),
    })
}

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<VisitBooking> {
    let date: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(VisitBooking {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        project_id: row.get(2)?,
        city: row.get(3)?,
        preferred_date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        status: BookingStatus::parse(&status),
        created_at: parse_timestamp(row.get(6)?),
        updated_at: parse_timestamp(row.get(7)?),
    })
}

const LEAD_COLUMNS: &str = "id, first_name, last_name, email, city, preferences, created_at";
const BOOKING_COLUMNS: &str =
    "id, lead_id, project_id, city, preferred_date, status, created_at, updated_at";

impl Database {
    /// Get the lead with this email, creating it if needed. Non-empty
    /// fields in `input` overwrite stored ones.
    pub fn upsert_lead(&self, input: &LeadInput) -> ConciergeResult<Lead> {
        let email = input.email.trim().to_lowercase();
        let now = Utc::now().to_rfc3339();
        let select = format!("SELECT {} FROM leads WHERE email = ?1", LEAD_COLUMNS);

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO leads (first_name, last_name, email, city, preferences, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(email) DO UPDATE SET \
                    first_name = COALESCE(NULLIF(excluded.first_name, ''), leads.first_name), \
                    last_name = COALESCE(excluded.last_name, leads.last_name), \
                    city = COALESCE(excluded.city, leads.city), \
                    preferences = COALESCE(excluded.preferences, leads.preferences)",
                params![
                    input.first_name.trim(),
                    input.last_name,
                    email,
                    input.city,
                    input.preferences,
                    now,
                ],
            )?;
            let lead = tx.query_row(&select, params![email], lead_from_row)?;
            tx.commit()?;
            Ok(lead)
        })
    }

    #[cfg(test)]
    pub fn lead_by_email(&self, email: &str) -> ConciergeResult<Option<Lead>> {
        let select = format!("SELECT {} FROM leads WHERE email = ?1", LEAD_COLUMNS);
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            conn.query_row(&select, params![email], lead_from_row)
                .optional()
        })
    }

    /// Create the booking for (lead, project), or update the existing one.
    /// Returns the booking and whether it was newly created.
    pub fn upsert_booking(
        &self,
        lead_id: i64,
        project_id: i64,
        city: Option<&str>,
        preferred_date: Option<NaiveDate>,
    ) -> ConciergeResult<(VisitBooking, bool)> {
        let now = Utc::now().to_rfc3339();
        let date = preferred_date.map(|d| d.format("%Y-%m-%d").to_string());
        let select = format!(
            "SELECT {} FROM visit_bookings WHERE lead_id = ?1 AND project_id = ?2",
            BOOKING_COLUMNS
        );

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM visit_bookings WHERE lead_id = ?1 AND project_id = ?2",
                    params![lead_id, project_id],
                    |row| row.get(0),
                )
                .optional()?;

            let created = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE visit_bookings SET city = COALESCE(?1, city), \
                         preferred_date = COALESCE(?2, preferred_date), status = ?3, updated_at = ?4 \
                         WHERE id = ?5",
                        params![city, date, BookingStatus::Pending.as_str(), now, id],
                    )?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO visit_bookings \
                         (id, lead_id, project_id, city, preferred_date, status, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                        params![
                            uuid::Uuid::new_v4().to_string(),
                            lead_id,
                            project_id,
                            city,
                            date,
                            BookingStatus::Pending.as_str(),
                            now,
                        ],
                    )?;
                    true
                }
            };

            let booking = tx.query_row(&select, params![lead_id, project_id], booking_from_row)?;
            tx.commit()?;
            Ok((booking, created))
        })
    }

    pub fn count_bookings(&self) -> ConciergeResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM visit_bookings", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::project;

    fn input(email: &str) -> LeadInput {
        LeadInput {
            first_name: "Sara".to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_lead_by_email() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_lead(&input("Sara@Example.com")).unwrap();
        assert_eq!(first.email, "sara@example.com");

        let again = db
            .upsert_lead(&LeadInput {
                city: Some("Dubai".into()),
                ..input("sara@example.com")
            })
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.city.as_deref(), Some("Dubai"));
        assert!(db.lead_by_email("SARA@example.com").unwrap().is_some());
    }

    #[test]
    fn test_upsert_booking_create_then_update() {
        let db = Database::open_in_memory().unwrap();
        let project_id = db
            .insert_project(&project("Azure Bay Residences", "Dubai", 2, 650_000.0))
            .unwrap();
        let lead = db.upsert_lead(&input("sara@example.com")).unwrap();

        let (booking, created) = db
            .upsert_booking(lead.id, project_id, Some("Dubai"), None)
            .unwrap();
        assert!(created);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(uuid::Uuid::parse_str(&booking.id).is_ok());

        let date = NaiveDate::from_ymd_opt(2026, 11, 2);
        let (updated, created) = db.upsert_booking(lead.id, project_id, None, date).unwrap();
        assert!(!created);
        assert_eq!(updated.id, booking.id);
        assert_eq!(updated.preferred_date, date);
        assert_eq!(updated.city.as_deref(), Some("Dubai"));
        assert_eq!(db.count_bookings().unwrap(), 1);
    }

    #[test]
    fn test_booking_requires_existing_project() {
        let db = Database::open_in_memory().unwrap();
        let lead = db.upsert_lead(&input("a@b.co")).unwrap();
        assert!(db.upsert_booking(lead.id, 999, None, None).is_err());
    }
}
