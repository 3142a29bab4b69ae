//! Markdown previews for chat replies.
//!
//! These produce the `preview_markdown` table returned with listing
//! answers and the templated text used when no LLM rewrites the draft.

use crate::db::QueryRows;
use crate::models::Project;
use serde_json::Value;

/// Rows shown in a preview table.
pub const PREVIEW_ROWS: usize = 10;

/// Table of projects: name, city, price, bedrooms, type, status.
pub fn generate_listing_table(projects: &[Project]) -> String {
    let mut table = String::new();

    table.push_str("| # | Project | City | Price (USD) | Bedrooms | Type | Status |\n");
    table.push_str("|---|---------|------|-------------|----------|------|--------|\n");

    for (i, p) in projects.iter().take(PREVIEW_ROWS).enumerate() {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            escape_cell(&p.name),
            escape_cell(p.city.as_deref().unwrap_or("N/A")),
            p.price_label(),
            p.bedrooms_label(),
            escape_cell(p.property_type.as_deref().unwrap_or("N/A")),
            status_label(p.completion_status.as_deref())
        ));
    }

    if projects.len() > PREVIEW_ROWS {
        table.push_str(&format!(
            "\n_{} more not shown._\n",
            projects.len() - PREVIEW_ROWS
        ));
    }

    table
}

/// Table of raw query rows (aggregates, counts).
pub fn generate_rows_table(rows: &QueryRows) -> String {
    let mut table = String::new();
    if rows.columns.is_empty() {
        return table;
    }

    table.push_str(&format!("| {} |\n", rows.columns.join(" | ")));
    table.push_str(&format!("|{}\n", "---|".repeat(rows.columns.len())));

    for row in rows.rows.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    table
}

/// Numbered summary used in templated replies.
pub fn generate_listing_summary(projects: &[Project], limit: usize) -> String {
    let mut lines = Vec::new();

    for (i, p) in projects.iter().take(limit).enumerate() {
        let mut line = format!(
            "{}. **{}** ({}) - {}",
            i + 1,
            p.name,
            p.city.as_deref().unwrap_or("N/A"),
            p.price_label()
        );
        if let Some(bedrooms) = p.bedrooms {
            line.push_str(&format!(", {} bed", bedrooms));
        }
        if let Some(kind) = &p.property_type {
            line.push_str(&format!(" {}", kind));
        }
        if let Some(features) = &p.features {
            line.push_str(&format!(". Features: {}", features));
        }
        lines.push(line);
    }

    lines.join("\n")
}

/// Full detail block for one project.
pub fn generate_project_details(project: &Project) -> String {
    let mut section = String::new();

    section.push_str(&format!("**{}**\n\n", project.name));
    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            section.push_str(&format!("- **{}:** {}\n", label, value));
        }
    };

    field(
        "Location",
        match (&project.city, &project.country) {
            (Some(city), Some(country)) => Some(format!("{}, {}", city, country)),
            (Some(city), None) => Some(city.clone()),
            _ => None,
        },
    );
    field("Developer", project.developer.clone());
    field("Price", Some(project.price_label()));
    field("Bedrooms", Some(project.bedrooms_label()));
    field("Bathrooms", project.bathrooms.map(|b| format!("{}", b)));
    field("Type", project.property_type.clone());
    field("Area", project.area.map(|a| format!("{} sq m", a)));
    field(
        "Status",
        Some(status_label(project.completion_status.as_deref()).to_string()),
    );
    field("Completion", project.completion_date.clone());
    field("Features", project.features.clone());
    field("Facilities", project.facilities.clone());

    if let Some(description) = &project.description {
        section.push_str(&format!("\n{}\n", description));
    }

    section
}

fn status_label(raw: Option<&str>) -> &'static str {
    match raw {
        Some("available") => "Ready",
        Some("off_plan") => "Off plan",
        _ => "N/A",
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => escape_cell(s),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() != 0.0 => format!("{:.2}", f),
            _ => n.to_string(),
        },
        other => escape_cell(&other.to_string()),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::project;
    use serde_json::json;

    #[test]
    fn test_listing_table() {
        let mut a = project("Azure Bay", "Dubai", 2, 650_000.0);
        a.completion_status = Some("off_plan".into());
        a.property_type = Some("apartment".into());
        let table = generate_listing_table(&[a]);

        assert!(table.starts_with("| # | Project |"));
        assert!(table.contains("| 1 | Azure Bay | Dubai | $650,000 | 2 | apartment | Off plan |"));
    }

    #[test]
    fn test_listing_table_truncates() {
        let projects: Vec<Project> = (0..12)
            .map(|i| project(&format!("P{}", i), "Miami", 1, 1.0))
            .collect();
        let table = generate_listing_table(&projects);
        assert!(table.contains("| 10 | P9 |"));
        assert!(!table.contains("| 11 |"));
        assert!(table.contains("_2 more not shown._"));
    }

    #[test]
    fn test_rows_table() {
        let rows = QueryRows {
            columns: vec!["city".into(), "avg_price".into()],
            rows: vec![vec![json!("Dubai"), json!(1300000.5)], vec![json!(null), json!(3)]],
        };
        let table = generate_rows_table(&rows);
        assert!(table.contains("| city | avg_price |"));
        assert!(table.contains("| Dubai | 1300000.50 |"));
        assert!(table.contains("| N/A | 3 |"));
    }

    #[test]
    fn test_project_details_skips_missing() {
        let mut p = project("Azure Bay", "Dubai", 2, 650_000.0);
        p.facilities = Some("pool, gym".into());
        let details = generate_project_details(&p);
        assert!(details.contains("- **Facilities:** pool, gym"));
        assert!(details.contains("- **Location:** Dubai"));
        assert!(!details.contains("Developer"));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }
}
