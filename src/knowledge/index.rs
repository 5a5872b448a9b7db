//! Vector index on SQLite with the sqlite-vec extension.
//!
//! Document metadata sits in `documents`; embeddings sit in a `vec0` table
//! partitioned by scope (0 for curated, the guild id for chat) and searched
//! with cosine distance. A document is identified by its content hash, so
//! inserting the same text twice never creates a second embedding.

use super::{DocumentMetadata, KnowledgeDocument, Priority};
use crate::db::schema::{vector_schema, KNOWLEDGE_SCHEMA};
use rusqlite::{params, Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use tracing::{debug, info};

const CURATED_SCOPE: i64 = 0;

static SQLITE_VEC_INIT: Once = Once::new();

/// Registers sqlite-vec for every connection opened afterwards.
fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: KnowledgeDocument,
    /// Cosine distance to the query; smaller is closer.
    pub distance: f64,
}

#[derive(Clone)]
pub struct KnowledgeIndex {
    conn: Arc<Mutex<Connection>>,
    dimensions: usize,
}

impl KnowledgeIndex {
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        load_sqlite_vec();
        let conn = Connection::open(path)?;
        let index = Self::init(conn, dimensions)?;
        info!(
            "Knowledge index opened at {} ({} dimensions)",
            path.display(),
            dimensions
        );
        Ok(index)
    }

    pub fn in_memory(dimensions: usize) -> anyhow::Result<Self> {
        load_sqlite_vec();
        Self::init(Connection::open_in_memory()?, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> anyhow::Result<Self> {
        conn.execute_batch(KNOWLEDGE_SCHEMA)?;
        conn.execute_batch(&vector_schema(dimensions))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimensions,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn contains(&self, content_hash: &str) -> anyhow::Result<bool> {
        let conn = self.conn();
        let exists = conn
            .prepare("SELECT 1 FROM documents WHERE content_hash = ?1")?
            .exists([content_hash])?;
        Ok(exists)
    }

    /// Returns `false` if a document with the same content hash already exists.
    pub fn insert(&self, doc: &KnowledgeDocument, embedding: &[f32]) -> anyhow::Result<bool> {
        if embedding.len() != self.dimensions {
            anyhow::bail!(
                "embedding has {} dimensions, index expects {}",
                embedding.len(),
                self.dimensions
            );
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO documents
                (content_hash, guild_id, text, source, location, timestamp, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.content_hash(),
                doc.metadata.guild_id.map(|id| id.to_string()),
                doc.text,
                doc.metadata.source,
                doc.metadata.location,
                doc.metadata.timestamp,
                doc.metadata.priority.as_str(),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        let document_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO document_vectors (document_id, scope, embedding) VALUES (?1, ?2, ?3)",
            params![document_id, scope_of(doc.metadata.guild_id), embedding_bytes(embedding)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Runs blocking index work on tokio's blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&KnowledgeIndex) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let index = self.clone();
        tokio::task::spawn_blocking(move || f(&index)).await?
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Archive row up to which `guild_id` has been ingested.
    pub fn ingest_progress(&self, guild_id: u64) -> anyhow::Result<i64> {
        let conn = self.conn();
        let row: Option<i64> = conn
            .query_row(
                "SELECT last_row FROM ingest_progress WHERE guild_id = ?1",
                [guild_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.unwrap_or(0))
    }

    pub fn set_ingest_progress(&self, guild_id: u64, last_row: i64) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ingest_progress (guild_id, last_row) VALUES (?1, ?2)
             ON CONFLICT(guild_id) DO UPDATE SET last_row = excluded.last_row
             WHERE excluded.last_row > last_row",
            params![guild_id.to_string(), last_row],
        )?;
        Ok(())
    }

    /// Most similar documents visible to `guild_id` (its own messages plus
    /// curated docs), closest first.
    pub fn nearest(
        &self,
        guild_id: Option<u64>,
        query: &[f32],
        limit: usize,
    ) -> anyhow::Result<Vec<ScoredDocument>> {
        let conn = self.conn();
        let query = embedding_bytes(query);

        let mut hits = knn(&conn, &query, CURATED_SCOPE, limit)?;
        if let Some(id) = guild_id {
            hits.extend(knn(&conn, &query, scope_of(Some(id)), limit)?);
        }
        // stable: on equal distance curated hits stay first
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(limit);

        let mut stmt = conn.prepare(
            "SELECT text, source, location, timestamp, priority, guild_id
             FROM documents WHERE id = ?1",
        )?;
        let mut scored = Vec::with_capacity(hits.len());
        for (document_id, distance) in hits {
            let document = stmt.query_row([document_id], |row| {
                let guild: Option<String> = row.get(5)?;
                Ok(KnowledgeDocument {
                    text: row.get(0)?,
                    metadata: DocumentMetadata {
                        source: row.get(1)?,
                        location: row.get(2)?,
                        timestamp: row.get(3)?,
                        priority: Priority::parse(&row.get::<_, String>(4)?),
                        guild_id: guild.and_then(|g| g.parse().ok()),
                    },
                })
            })?;
            scored.push(ScoredDocument { document, distance });
        }

        debug!("Knowledge index: {} neighbours for guild {:?}", scored.len(), guild_id);
        Ok(scored)
    }
}

fn scope_of(guild_id: Option<u64>) -> i64 {
    guild_id.map_or(CURATED_SCOPE, |id| id as i64)
}

/// KNN inside one partition, closest first.
fn knn(conn: &Connection, query: &[u8], scope: i64, limit: usize) -> anyhow::Result<Vec<(i64, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT document_id, distance FROM document_vectors
         WHERE embedding MATCH ?1 AND k = ?2 AND scope = ?3
         ORDER BY distance",
    )?;
    let hits = stmt
        .query_map(params![query, limit as i64, scope], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// sqlite-vec reads vectors as packed little-endian f32.
fn embedding_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::tests::doc;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[i] = 1.0;
        v
    }

    #[test]
    fn insert_skips_existing_content() {
        let index = KnowledgeIndex::in_memory(8).unwrap();
        let d = doc("some curated line of guidance", Priority::High);

        assert!(!index.contains(&d.content_hash()).unwrap());
        assert!(index.insert(&d, &axis(0)).unwrap());
        assert!(index.contains(&d.content_hash()).unwrap());
        assert!(!index.insert(&d, &axis(1)).unwrap());
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn rejects_vectors_of_the_wrong_size() {
        let index = KnowledgeIndex::in_memory(8).unwrap();
        let d = doc("some curated line of guidance", Priority::High);
        assert!(index.insert(&d, &[1.0, 0.0]).is_err());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn nearest_orders_by_distance_within_scope() {
        let index = KnowledgeIndex::in_memory(8).unwrap();

        let mut other_guild = doc("message from another guild entirely", Priority::Low);
        other_guild.metadata.guild_id = Some(2);
        index.insert(&other_guild, &axis(0)).unwrap();

        index
            .insert(&doc("close chat message in guild one", Priority::Low), &axis(0))
            .unwrap();
        index
            .insert(&doc("far curated note with other topic", Priority::High), &axis(3))
            .unwrap();

        let results = index.nearest(Some(1), &axis(0), 10).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.document.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["close chat message in guild one", "far curated note with other topic"]
        );
        assert!(results[0].distance < results[1].distance);
        assert_eq!(results[1].document.metadata.priority, Priority::High);
        assert_eq!(results[0].document.metadata.guild_id, Some(1));

        let curated_only = index.nearest(None, &axis(0), 10).unwrap();
        assert_eq!(curated_only.len(), 1);

        let limited = index.nearest(Some(1), &axis(0), 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].document.text, "close chat message in guild one");
    }

    #[test]
    fn ingest_progress_only_moves_forward() {
        let index = KnowledgeIndex::in_memory(8).unwrap();
        assert_eq!(index.ingest_progress(1).unwrap(), 0);
        index.set_ingest_progress(1, 40).unwrap();
        index.set_ingest_progress(1, 10).unwrap();
        assert_eq!(index.ingest_progress(1).unwrap(), 40);
        assert_eq!(index.ingest_progress(2).unwrap(), 0);
    }

    #[test]
    fn vectors_persist_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.sqlite");
        {
            let index = KnowledgeIndex::open(&path, 8).unwrap();
            index
                .insert(&doc("curated note kept across restarts", Priority::High), &axis(2))
                .unwrap();
        }
        let index = KnowledgeIndex::open(&path, 8).unwrap();
        let results = index.nearest(None, &axis(2), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].distance < 1e-4);
    }
}
