//! SQLite persistence for projects, leads, bookings and agent memory.

mod leads;
mod memory;
pub mod seed;

pub use leads::LeadInput;
pub use memory::{RagDocument, SqlExample};

use crate::error::{ConciergeError, ConciergeResult};
use crate::intent::IntentFilters;
use crate::models::Project;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    bedrooms INTEGER,
    bathrooms REAL,
    completion_status TEXT,
    unit_type TEXT,
    developer TEXT,
    price REAL,
    area REAL,
    property_type TEXT,
    city TEXT,
    country TEXT,
    completion_date TEXT,
    features TEXT,
    facilities TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_projects_city ON projects(city);

CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT,
    email TEXT NOT NULL UNIQUE,
    city TEXT,
    preferences TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS visit_bookings (
    id TEXT PRIMARY KEY,
    lead_id INTEGER NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    city TEXT,
    preferred_date TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (lead_id, project_id)
);

CREATE TABLE IF NOT EXISTS sql_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL UNIQUE,
    sql TEXT NOT NULL,
    hits INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rag_documents (
    project_id INTEGER PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    embedding BLOB
);
"#;

/// Column list matching [`project_from_row`].
const PROJECT_COLUMNS: &str = "id, name, bedrooms, bathrooms, completion_status, unit_type, \
    developer, price, area, property_type, city, country, completion_date, features, \
    facilities, description";

/// The only table generated SQL may read.
const READABLE_TABLE: &str = "projects";

/// Text columns searched by the keyword fallback.
const LIKE_COLUMNS: &[&str] = &[
    "name",
    "developer",
    "city",
    "description",
    "features",
    "facilities",
];

/// Rows returned by a read-only query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the `id` column, if the query selected it.
    pub fn project_ids(&self) -> Vec<i64> {
        let Some(idx) = self.columns.iter().position(|c| c.eq_ignore_ascii_case("id")) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(idx).and_then(Value::as_i64))
            .collect()
    }
}

/// Shared handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> ConciergeResult<Self> {
        info!("Opening database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> ConciergeResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ConciergeResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the locked connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> ConciergeResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| ConciergeError::Internal("database lock poisoned".to_string()))?;
        Ok(f(&mut *conn)?)
    }

    /// `CREATE TABLE` statement for `table`, as stored by SQLite.
    pub fn table_ddl(&self, table: &str) -> ConciergeResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn insert_project(&self, project: &Project) -> ConciergeResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (name, bedrooms, bathrooms, completion_status, unit_type, \
                 developer, price, area, property_type, city, country, completion_date, features, \
                 facilities, description) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    project.name,
                    project.bedrooms,
                    project.bathrooms,
                    project.completion_status,
                    project.unit_type,
                    project.developer,
                    project.price,
                    project.area,
                    project.property_type,
                    project.city,
                    project.country,
                    project.completion_date,
                    project.features,
                    project.facilities,
                    project.description,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn count_projects(&self) -> ConciergeResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    pub fn get_project(&self, id: i64) -> ConciergeResult<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        self.with_conn(|conn| {
            conn.query_row(&sql, params![id], project_from_row)
                .optional()
        })
    }

    /// Projects with the given ids, in the order given. Unknown ids are skipped.
    pub fn projects_by_ids(&self, ids: &[i64]) -> ConciergeResult<Vec<Project>> {
        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(project) = self.get_project(*id)? {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    pub fn all_projects(&self) -> ConciergeResult<Vec<Project>> {
        self.query_projects(
            &format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS),
            Vec::new(),
        )
    }

    /// Case-insensitive substring match on the project name.
    pub fn find_projects_by_name(&self, name: &str, limit: usize) -> ConciergeResult<Vec<Project>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.query_projects(
            &format!(
                "SELECT {} FROM projects WHERE LOWER(name) LIKE ?1 ORDER BY LENGTH(name), id LIMIT ?2",
                PROJECT_COLUMNS
            ),
            vec![
                SqlValue::Text(format!("%{}%", needle)),
                SqlValue::Integer(limit as i64),
            ],
        )
    }

    /// Projects whose full name appears in `text`, longest names first.
    pub fn projects_mentioned_in(&self, text: &str) -> ConciergeResult<Vec<Project>> {
        let lower = text.to_lowercase();
        let mut matched: Vec<Project> = self
            .all_projects()?
            .into_iter()
            .filter(|p| {
                let name = p.name.trim().to_lowercase();
                !name.is_empty() && crate::intent::contains_term(&lower, &name)
            })
            .collect();
        matched.sort_by_key(|p| std::cmp::Reverse(p.name.len()));
        Ok(matched)
    }

    /// Structured search from extracted filters. Returns nothing when no
    /// filter is set.
    pub fn filter_projects(
        &self,
        filters: &IntentFilters,
        limit: usize,
    ) -> ConciergeResult<Vec<Project>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(city) = &filters.city {
            clauses.push("LOWER(city) = ?".to_string());
            values.push(SqlValue::Text(city.to_lowercase()));
        }
        if let Some(min) = filters.price_min {
            clauses.push("price >= ?".to_string());
            values.push(SqlValue::Real(min));
        }
        if let Some(max) = filters.price_max {
            clauses.push("price <= ?".to_string());
            values.push(SqlValue::Real(max));
        }
        if let Some(bedrooms) = filters.bedrooms {
            clauses.push("bedrooms = ?".to_string());
            values.push(SqlValue::Integer(bedrooms));
        }
        if let Some(kind) = &filters.property_type {
            clauses.push("LOWER(property_type) = ?".to_string());
            values.push(SqlValue::Text(kind.to_lowercase()));
        }
        if let Some(developer) = &filters.developer {
            clauses.push("LOWER(developer) LIKE ?".to_string());
            values.push(SqlValue::Text(format!("%{}%", developer.to_lowercase())));
        }
        if let Some(project) = &filters.project_name {
            clauses.push("LOWER(name) LIKE ?".to_string());
            values.push(SqlValue::Text(format!("%{}%", project.to_lowercase())));
        }
        for feature in &filters.must_have_features {
            if feature == "ready" {
                clauses.push("completion_status = 'available'".to_string());
                continue;
            }
            clauses.push(
                "(LOWER(COALESCE(features, '')) LIKE ? OR LOWER(COALESCE(facilities, '')) LIKE ? \
                 OR LOWER(COALESCE(description, '')) LIKE ?)"
                    .to_string(),
            );
            let pattern = format!("%{}%", feature.to_lowercase());
            values.extend(std::iter::repeat(SqlValue::Text(pattern)).take(3));
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM projects WHERE {} ORDER BY price IS NULL, price ASC LIMIT ?",
            PROJECT_COLUMNS,
            clauses.join(" AND ")
        );
        values.push(SqlValue::Integer(limit as i64));
        debug!("Structured search: {}", sql);
        self.query_projects(&sql, values)
    }

    /// Keyword fallback: every project with any keyword contained in any
    /// searched text column. Unbounded; callers cap what they display.
    pub fn like_search(&self, keywords: &[String]) -> ConciergeResult<Vec<Project>> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for keyword in &keywords {
            for column in LIKE_COLUMNS {
                clauses.push(format!("LOWER(COALESCE({}, '')) LIKE ?", column));
                values.push(SqlValue::Text(format!("%{}%", keyword)));
            }
        }

        let sql = format!(
            "SELECT {} FROM projects WHERE {} ORDER BY id",
            PROJECT_COLUMNS,
            clauses.join(" OR ")
        );
        self.query_projects(&sql, values)
    }

    /// Execute a statement that SQLite confirms is read-only and that reads
    /// no table but `projects`.
    pub fn run_readonly(&self, sql: &str) -> ConciergeResult<QueryRows> {
        let result = self.with_conn(|conn| {
            let denied: Arc<Mutex<Option<String>>> = Arc::default();
            let record = denied.clone();
            conn.authorizer(Some(move |ctx: AuthContext<'_>| match ctx.action {
                AuthAction::Read { table_name, .. } if !table_name.eq_ignore_ascii_case(READABLE_TABLE) => {
                    if let Ok(mut slot) = record.lock() {
                        slot.get_or_insert_with(|| table_name.to_string());
                    }
                    Authorization::Deny
                }
                _ => Authorization::Allow,
            }));
            let prepared = conn.prepare(sql);
            conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);

            let mut stmt = match prepared {
                Ok(stmt) => stmt,
                Err(e) => {
                    let table = denied.lock().ok().and_then(|slot| slot.clone());
                    return match table {
                        Some(table) => Ok(Err(format!("table '{}' is not readable", table))),
                        None => Err(e),
                    };
                }
            };
            if !stmt.readonly() {
                return Ok(Err("statement is not read-only".to_string()));
            }

            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let mut rows = Vec::new();
            let mut cursor = stmt.query([])?;
            while let Some(row) = cursor.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(json_value(row.get_ref(i)?));
                }
                rows.push(values);
            }
            Ok(Ok(QueryRows { columns, rows }))
        })?;

        result.map_err(ConciergeError::UnsafeSql)
    }

    fn query_projects(&self, sql: &str, values: Vec<SqlValue>) -> ConciergeResult<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(values), project_from_row)?;
            let projects = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        bedrooms: row.get(2)?,
        bathrooms: row.get(3)?,
        completion_status: row.get(4)?,
        unit_type: row.get(5)?,
        developer: row.get(6)?,
        price: row.get(7)?,
        area: row.get(8)?,
        property_type: row.get(9)?,
        city: row.get(10)?,
        country: row.get(11)?,
        completion_date: row.get(12)?,
        features: row.get(13)?,
        facilities: row.get(14)?,
        description: row.get(15)?,
    })
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Sample inventory shared by tests across modules.

    use super::*;

    pub fn project(name: &str, city: &str, bedrooms: i64, price: f64) -> Project {
        Project {
            name: name.to_string(),
            city: Some(city.to_string()),
            bedrooms: Some(bedrooms),
            price: Some(price),
            ..Default::default()
        }
    }

    /// In-memory database loaded from `fixtures/properties.csv`.
    pub fn sample_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let csv = include_str!("../../fixtures/properties.csv");
        seed::import_csv_reader(&db, csv.as_bytes(), false).unwrap();
        db
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::intent;

    #[test]
    fn test_insert_and_get_project() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .insert_project(&project("Azure Bay Residences", "Dubai", 2, 650_000.0))
            .unwrap();
        let fetched = db.get_project(id).unwrap().unwrap();
        assert_eq!(fetched.name, "Azure Bay Residences");
        assert_eq!(fetched.bedrooms, Some(2));
        assert!(db.get_project(id + 100).unwrap().is_none());
        assert_eq!(db.count_projects().unwrap(), 1);
    }

    #[test]
    fn test_filter_projects() {
        let db = sample_db();
        let filters = intent::extract("2 bedroom apartment in Dubai under 1m");
        let results = db.filter_projects(&filters, 10).unwrap();
        assert!(!results.is_empty());
        for p in &results {
            assert_eq!(p.city.as_deref().map(str::to_lowercase).as_deref(), Some("dubai"));
            assert_eq!(p.bedrooms, Some(2));
            assert!(p.price.unwrap() <= 1_000_000.0);
        }
        // cheapest first
        let prices: Vec<f64> = results.iter().filter_map(|p| p.price).collect();
        assert!(prices.windows(2).all(|w| w[0] <= w[1]));

        let empty = intent::IntentFilters::default();
        assert!(db.filter_projects(&empty, 10).unwrap().is_empty());
    }

    #[test]
    fn test_like_search_is_superset_of_keyword_rows() {
        let db = sample_db();
        let keywords = vec!["waterfront".to_string(), "emaar".to_string()];
        let hits = db.like_search(&keywords).unwrap();
        for p in db.all_projects().unwrap() {
            let text = [
                Some(p.name.clone()),
                p.developer.clone(),
                p.city.clone(),
                p.description.clone(),
                p.features.clone(),
                p.facilities.clone(),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
            if keywords.iter().any(|k| text.contains(k.as_str())) {
                assert!(hits.iter().any(|h| h.id == p.id), "missing {}", p.name);
            }
        }
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_find_and_mentioned_projects() {
        let db = sample_db();
        let found = db.find_projects_by_name("marina heights", 5).unwrap();
        assert_eq!(found[0].name, "Marina Heights Tower");

        let mentioned = db
            .projects_mentioned_in("compare azure bay residences with marina heights tower")
            .unwrap();
        let names: Vec<&str> = mentioned.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"Azure Bay Residences"));
        assert!(names.contains(&"Marina Heights Tower"));
    }

    #[test]
    fn test_run_readonly() {
        let db = sample_db();
        let rows = db
            .run_readonly("SELECT id, name, price FROM projects WHERE LOWER(city) = 'london'")
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "price"]);
        assert!(!rows.is_empty());
        assert_eq!(rows.project_ids().len(), rows.rows.len());

        let err = db.run_readonly("DELETE FROM projects").unwrap_err();
        assert!(matches!(err, ConciergeError::UnsafeSql(_)));
        assert!(db.count_projects().unwrap() > 0);
    }

    #[test]
    fn test_run_readonly_only_reads_projects() {
        let db = sample_db();
        db.upsert_lead(&LeadInput {
            first_name: "Maya".into(),
            email: "maya@example.com".into(),
            ..Default::default()
        })
        .unwrap();

        for sql in [
            "SELECT first_name, email FROM leads",
            "SELECT p.name, l.email FROM projects p JOIN leads l ON 1 = 1",
            "SELECT * FROM (SELECT email FROM leads)",
            "SELECT name FROM sqlite_master",
        ] {
            match db.run_readonly(sql) {
                Err(ConciergeError::UnsafeSql(msg)) => assert!(msg.contains("not readable"), "{}", msg),
                other => panic!("{} was not rejected: {:?}", sql, other),
            }
        }

        let rows = db.run_readonly("SELECT * FROM (SELECT id, name FROM projects) LIMIT 3").unwrap();
        assert_eq!(rows.rows.len(), 3);
    }

    #[test]
    fn test_table_ddl() {
        let db = Database::open_in_memory().unwrap();
        let ddl = db.table_ddl("projects").unwrap().unwrap();
        assert!(ddl.contains("completion_status"));
        assert!(db.table_ddl("nope").unwrap().is_none());
    }
}
