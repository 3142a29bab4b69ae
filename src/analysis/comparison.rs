//! Side-by-side project comparison.

use crate::db::Database;
use crate::error::ConciergeResult;
use crate::models::Project;

/// Most projects shown in one table.
pub const MAX_COMPARED: usize = 5;

/// Outcome of a comparison request.
#[derive(Debug, Clone)]
pub enum Comparison {
    /// Fewer than two names were given.
    TooFew,
    /// None of the names matched a project.
    NotFound,
    Table {
        projects: Vec<Project>,
        markdown: String,
    },
}

impl Comparison {
    /// Reply text for the user or the LLM.
    pub fn message(&self) -> String {
        match self {
            Comparison::TooFew => "Please provide at least 2 projects to compare.".to_string(),
            Comparison::NotFound => "I couldn't find any of the specified projects.".to_string(),
            Comparison::Table { markdown, .. } => markdown.clone(),
        }
    }

    pub fn projects(&self) -> &[Project] {
        match self {
            Comparison::Table { projects, .. } => projects,
            _ => &[],
        }
    }
}

/// Match each name by case-insensitive substring and tabulate the hits.
pub fn compare(db: &Database, names: &[String]) -> ConciergeResult<Comparison> {
    let names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();
    if names.len() < 2 {
        return Ok(Comparison::TooFew);
    }

    let mut projects: Vec<Project> = Vec::new();
    for name in names {
        for project in db.find_projects_by_name(name, MAX_COMPARED)? {
            if projects.len() < MAX_COMPARED && !projects.iter().any(|p| p.id == project.id) {
                projects.push(project);
            }
        }
    }

    if projects.is_empty() {
        return Ok(Comparison::NotFound);
    }

    let markdown = comparison_table(&projects);
    Ok(Comparison::Table { projects, markdown })
}

/// Markdown table with one column per project.
pub fn comparison_table(projects: &[Project]) -> String {
    let or_na = |v: Option<String>| v.unwrap_or_else(|| "N/A".to_string());

    let mut out = String::from("**Property Comparison**\n\n");
    out.push_str("| Feature | ");
    out.push_str(
        &projects
            .iter()
            .map(|p| p.name.chars().take(30).collect::<String>())
            .collect::<Vec<_>>()
            .join(" | "),
    );
    out.push_str(" |\n|");
    out.push_str(&"----|".repeat(projects.len() + 1));
    out.push('\n');

    let rows: [(&str, Vec<String>); 6] = [
        ("City", projects.iter().map(|p| or_na(p.city.clone())).collect()),
        ("Price", projects.iter().map(Project::price_label).collect()),
        ("Bedrooms", projects.iter().map(Project::bedrooms_label).collect()),
        (
            "Type",
            projects.iter().map(|p| or_na(p.property_type.clone())).collect(),
        ),
        (
            "Area (sqm)",
            projects
                .iter()
                .map(|p| or_na(p.area.map(|a| format!("{}", a))))
                .collect(),
        ),
        (
            "Status",
            projects
                .iter()
                .map(|p| or_na(p.completion_status.clone()))
                .collect(),
        ),
    ];

    for (label, values) in rows {
        out.push_str(&format!("| {} | {} |\n", label, values.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::sample_db;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compare_two_projects() {
        let db = sample_db();
        let result = compare(&db, &names(&["azure bay", "Marina Heights"])).unwrap();
        let text = result.message();

        assert_eq!(result.projects().len(), 2);
        assert!(text.contains("| Feature | Azure Bay Residences | Marina Heights Tower |"));
        assert!(text.contains("| Price | $650,000 | $920,000 |"));
        assert!(text.contains("| Status | off_plan | available |"));
    }

    #[test]
    fn test_compare_guards() {
        let db = sample_db();
        assert!(matches!(
            compare(&db, &names(&["Azure Bay"])).unwrap(),
            Comparison::TooFew
        ));
        assert!(matches!(
            compare(&db, &names(&["Nowhere Plaza", "Ghost Tower"])).unwrap(),
            Comparison::NotFound
        ));
    }

    #[test]
    fn test_compare_caps_at_five() {
        let db = sample_db();
        // seven projects match these names
        let result = compare(&db, &names(&["residence", "villas", "tower"])).unwrap();
        assert_eq!(result.projects().len(), MAX_COMPARED);
    }
}
