//! Tool memory (question/SQL pairs) and the persisted RAG index.

use super::Database;
use crate::error::ConciergeResult;
use chrono::Utc;
use rusqlite::params;

/// A remembered question and the SQL that answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExample {
    pub question: String,
    pub sql: String,
    pub hits: i64,
}

/// One searchable document per project.
#[derive(Debug, Clone, PartialEq)]
pub struct RagDocument {
    pub project_id: i64,
    pub content: String,
    /// Missing when ingestion ran without an embedding model.
    pub embedding: Option<Vec<f32>>,
}

impl Database {
    /// Store a successful pair. Repeating a question bumps its hit count
    /// and keeps the newest SQL.
    pub fn remember_sql(&self, question: &str, sql: &str) -> ConciergeResult<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sql_memory (question, sql, hits, created_at) VALUES (?1, ?2, 1, ?3) \
                 ON CONFLICT(question) DO UPDATE SET sql = excluded.sql, hits = sql_memory.hits + 1",
                params![question.trim(), sql.trim(), now],
            )?;
            Ok(())
        })
    }

    pub fn sql_examples(&self) -> ConciergeResult<Vec<SqlExample>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT question, sql, hits FROM sql_memory ORDER BY hits DESC, id")?;
            let rows = stmt.query_map([], |row| {
                Ok(SqlExample {
                    question: row.get(0)?,
                    sql: row.get(1)?,
                    hits: row.get(2)?,
                })
            })?;
            let examples = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(examples)
        })
    }

    pub fn count_sql_memory(&self) -> ConciergeResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sql_memory", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    /// Replace the whole RAG index.
    pub fn replace_rag_documents(&self, documents: &[RagDocument]) -> ConciergeResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM rag_documents", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO rag_documents (project_id, content, embedding) VALUES (?1, ?2, ?3)",
                )?;
                for doc in documents {
                    let blob = doc.embedding.as_deref().map(f32_to_blob);
                    stmt.execute(params![doc.project_id, doc.content, blob])?;
                }
            }
            tx.commit()
        })
    }

    pub fn rag_documents(&self) -> ConciergeResult<Vec<RagDocument>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT project_id, content, embedding FROM rag_documents ORDER BY project_id")?;
            let rows = stmt.query_map([], |row| {
                let blob: Option<Vec<u8>> = row.get(2)?;
                Ok(RagDocument {
                    project_id: row.get(0)?,
                    content: row.get(1)?,
                    embedding: blob.map(|b| blob_to_f32(&b)).transpose()?,
                })
            })?;
            let documents = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(documents)
        })
    }
}

fn f32_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_f32(blob: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            blob.len(),
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid f32 blob length",
            )),
        ));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
