//! CSV import of the project inventory.
//!
//! Headers follow the inventory spreadsheet ("Project name",
//! "No of bedrooms", "Price (USD)", ...). Unparseable numbers become
//! NULL instead of failing the row.

use super::Database;
use crate::models::{CompletionStatus, Project};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// One spreadsheet row.
#[derive(Debug, Deserialize)]
struct InventoryRow {
    #[serde(rename = "Project name", default)]
    name: Option<String>,
    #[serde(rename = "No of bedrooms", default, deserialize_with = "csv::invalid_option")]
    bedrooms: Option<f64>,
    #[serde(rename = "bathrooms", default, deserialize_with = "csv::invalid_option")]
    bathrooms: Option<f64>,
    #[serde(rename = "unit type", default)]
    unit_type: Option<String>,
    #[serde(rename = "Completion status (off plan/available)", default)]
    completion_status: Option<String>,
    #[serde(rename = "developer name", default)]
    developer: Option<String>,
    #[serde(rename = "Price (USD)", default, deserialize_with = "csv::invalid_option")]
    price: Option<f64>,
    #[serde(rename = "Area (sq mtrs)", default, deserialize_with = "csv::invalid_option")]
    area: Option<f64>,
    #[serde(rename = "Property type (apartment/villa)", default)]
    property_type: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    completion_date: Option<String>,
    #[serde(default)]
    features: Option<String>,
    #[serde(default)]
    facilities: Option<String>,
    #[serde(rename = "Project description", default)]
    description: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
}

impl InventoryRow {
    fn into_project(self) -> Option<Project> {
        let name = clean(self.name)?;
        let property_type = clean(self.property_type)
            .or_else(|| clean(self.unit_type.clone()))
            .map(|t| t.to_lowercase());

        Some(Project {
            id: 0,
            name,
            bedrooms: self.bedrooms.map(|b| b.round() as i64),
            bathrooms: self.bathrooms,
            completion_status: Some(
                CompletionStatus::normalize(self.completion_status.as_deref().unwrap_or(""))
                    .as_str()
                    .to_string(),
            ),
            unit_type: clean(self.unit_type),
            developer: clean(self.developer),
            price: self.price,
            area: self.area,
            property_type,
            city: clean(self.city),
            country: clean(self.country),
            completion_date: clean(self.completion_date),
            features: clean(self.features),
            facilities: clean(self.facilities),
            description: clean(self.description),
        })
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub created: usize,
    pub errors: usize,
    /// Set when the import was skipped because projects already exist.
    pub existing: Option<usize>,
}

/// Import `path` unless the database already holds projects (or `force`).
pub fn seed_from_csv(db: &Database, path: &Path, force: bool, show_progress: bool) -> Result<SeedReport> {
    let existing = db.count_projects()?;
    if existing > 0 && !force {
        info!("Database already contains {} projects. Skipping seed.", existing);
        return Ok(SeedReport {
            existing: Some(existing),
            ..Default::default()
        });
    }

    let file = std::fs::File::open(path)
        .with_context(|| format!("CSV file not found at {}", path.display()))?;
    info!("Loading projects from {}", path.display());
    import_csv_reader(db, file, show_progress)
}

/// Import every row from a CSV reader.
pub fn import_csv_reader<R: Read>(db: &Database, reader: R, show_progress: bool) -> Result<SeedReport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let rows: Vec<csv::Result<InventoryRow>> = csv_reader.deserialize().collect();
    let pb = crate::progress::bar(rows.len() as u64, show_progress);
    let mut report = SeedReport::default();

    for (idx, row) in rows.into_iter().enumerate() {
        pb.inc(1);
        let project = match row {
            Ok(row) => row.into_project(),
            Err(e) => {
                report.errors += 1;
                if report.errors <= 5 {
                    warn!("Error on row {}: {}", idx + 1, e);
                }
                continue;
            }
        };

        let Some(project) = project else {
            report.errors += 1;
            warn!("Row {} has no project name, skipped", idx + 1);
            continue;
        };

        match db.insert_project(&project) {
            Ok(_) => report.created += 1,
            Err(e) => {
                report.errors += 1;
                warn!("Failed to insert {}: {}", project.name, e);
            }
        }
    }

    pb.finish_with_message("seeded");
    info!(
        "Seeding complete: {} created, {} errors",
        report.created, report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    const HEADER: &str = "Project name,No of bedrooms,bathrooms,unit type,Completion status (off plan/available),developer name,Price (USD),Area (sq mtrs),Property type (apartment/villa),city,country,completion_date,features,facilities,Project description\n";

    #[test]
    fn test_import_maps_columns() {
        let db = Database::open_in_memory().unwrap();
        let csv = format!(
            "{}Azure Bay,2,2,2BR,Off Plan,Nakheel,650000,110.5,Apartment,Dubai,AE,2027-06-30,\"balcony, sea view\",pool,Waterfront living\n\
             ,3,2,3BR,Available,X,1,1,Villa,Dubai,AE,,,,\n\
             Garden Court,studio,1,Studio,available,Y,n/a,40,,London,UK,,,,\n",
            HEADER
        );

        let report = import_csv_reader(&db, csv.as_bytes(), false).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.errors, 1);

        let projects = db.all_projects().unwrap();
        let azure = &projects[0];
        assert_eq!(azure.property_type.as_deref(), Some("apartment"));
        assert_eq!(azure.completion_status.as_deref(), Some("off_plan"));
        assert_eq!(azure.features.as_deref(), Some("balcony, sea view"));
        assert_eq!(azure.area, Some(110.5));

        let garden = &projects[1];
        assert_eq!(garden.bedrooms, None);
        assert_eq!(garden.price, None);
        assert_eq!(garden.property_type.as_deref(), Some("studio"));
        assert_eq!(garden.completion_status.as_deref(), Some("available"));
    }

    #[test]
    fn test_seed_skips_when_populated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("properties.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}One Tower,1,1,1BR,available,Dev,100000,50,apartment,Miami,US,,,,\n", HEADER).unwrap();

        let db = Database::open_in_memory().unwrap();
        let first = assert_ok!(seed_from_csv(&db, &path, false, false));
        assert_eq!(first.created, 1);

        let second = assert_ok!(seed_from_csv(&db, &path, false, false));
        assert_eq!(second.existing, Some(1));
        assert_eq!(db.count_projects().unwrap(), 1);

        let forced = assert_ok!(seed_from_csv(&db, &path, true, false));
        assert_eq!(forced.created, 1);
        assert_eq!(db.count_projects().unwrap(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        assert_err!(seed_from_csv(&db, Path::new("/nonexistent/p.csv"), false, false));
    }
}
