//! Per-guild message archive.
//!
//! Every guild gets its own SQLite file (`guild_<id>.sqlite`). Messages are
//! only ever inserted; a repeated message id is ignored, never overwritten.

pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedMessage {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub content: Option<String>,
    pub attachments: Vec<String>,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
}

pub fn permalink(guild_id: u64, channel_id: u64, message_id: u64) -> String {
    format!(
        "https://discord.com/channels/{}/{}/{}",
        guild_id, channel_id, message_id
    )
}

enum Location {
    Directory(PathBuf),
    Memory,
}

type Store = Arc<Mutex<Connection>>;

fn lock(store: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct Archive {
    location: Arc<Location>,
    stores: Arc<Mutex<HashMap<u64, Store>>>,
}

impl Archive {
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        info!("Archive: storing guild databases in {}", dir.display());
        Ok(Self {
            location: Arc::new(Location::Directory(dir.to_path_buf())),
            stores: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Archive whose guild stores live in memory only.
    pub fn in_memory() -> Self {
        Self {
            location: Arc::new(Location::Memory),
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store_path(&self, guild_id: u64) -> Option<PathBuf> {
        match self.location.as_ref() {
            Location::Directory(dir) => Some(dir.join(format!("guild_{}.sqlite", guild_id))),
            Location::Memory => None,
        }
    }

    fn store(&self, guild_id: u64) -> anyhow::Result<Store> {
        let mut stores = self.stores.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(store) = stores.get(&guild_id) {
            return Ok(store.clone());
        }

        let conn = match self.store_path(guild_id) {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(schema::ARCHIVE_SCHEMA)?;
        debug!("Archive: opened store for guild {}", guild_id);

        let store = Arc::new(Mutex::new(conn));
        stores.insert(guild_id, store.clone());
        Ok(store)
    }

    /// Creates the guild's table if it does not exist yet.
    pub fn ensure_store(&self, guild_id: u64) -> anyhow::Result<()> {
        self.store(guild_id).map(|_| ())
    }

    /// Guilds with an open store, in ascending id order.
    pub fn guild_ids(&self) -> Vec<u64> {
        let stores = self.stores.lock().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<u64> = stores.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns `true` when the message was new, `false` when it was already archived.
    pub fn append(&self, message: &ArchivedMessage) -> anyhow::Result<bool> {
        let store = self.store(message.guild_id)?;
        let conn = lock(&store);
        let attachments = serde_json::to_string(&message.attachments)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (
                guild_id, channel_id, message_id, author_id, author_name,
                content, attachments, message_url, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.guild_id.to_string(),
                message.channel_id.to_string(),
                message.message_id.to_string(),
                message.author_id.to_string(),
                message.author_name,
                message.content,
                attachments,
                message.permalink,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Newest archived message id in a channel, live or backfilled.
    pub fn last_seen_id(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<Option<u64>> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        let last: Option<String> = conn
            .query_row(
                "SELECT message_id FROM messages
                 WHERE channel_id = ?1
                 ORDER BY CAST(message_id AS INTEGER) DESC
                 LIMIT 1",
                [channel_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last.and_then(|id| id.parse().ok()))
    }

    /// Newest message id backfill has archived up to in a channel. Unlike
    /// [`Archive::last_seen_id`] this ignores messages archived live, so a
    /// live message never hides older unarchived history.
    pub fn backfill_checkpoint(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<Option<u64>> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        let last: Option<String> = conn
            .query_row(
                "SELECT last_message_id FROM backfill_checkpoints WHERE channel_id = ?1",
                [channel_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last.and_then(|id| id.parse().ok()))
    }

    /// Moves the channel's checkpoint forward; never backwards.
    pub fn advance_checkpoint(&self, guild_id: u64, channel_id: u64, message_id: u64) -> anyhow::Result<()> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        conn.execute(
            "INSERT INTO backfill_checkpoints (channel_id, last_message_id) VALUES (?1, ?2)
             ON CONFLICT(channel_id) DO UPDATE SET last_message_id = excluded.last_message_id
             WHERE CAST(excluded.last_message_id AS INTEGER) > CAST(last_message_id AS INTEGER)",
            params![channel_id.to_string(), message_id.to_string()],
        )?;
        Ok(())
    }

    pub fn count(&self, guild_id: u64) -> anyhow::Result<usize> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All archived messages of a guild, oldest first.
    pub fn messages(&self, guild_id: u64) -> anyhow::Result<Vec<ArchivedMessage>> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        let rows = read_rows(
            &conn,
            guild_id,
            "ORDER BY CAST(message_id AS INTEGER) ASC",
            params![],
        )?;
        Ok(rows.into_iter().map(|(_, message)| message).collect())
    }

    /// Up to `limit` messages archived after row `after_row`, in archive
    /// order, paired with their row number. Backfilled history lands after
    /// live messages here even though its message ids are older.
    pub fn messages_since(
        &self,
        guild_id: u64,
        after_row: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<(i64, ArchivedMessage)>> {
        let store = self.store(guild_id)?;
        let conn = lock(&store);
        read_rows(
            &conn,
            guild_id,
            "WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            params![after_row, limit as i64],
        )
    }

    /// Runs blocking archive work on tokio's blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Archive) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let archive = self.clone();
        tokio::task::spawn_blocking(move || f(&archive)).await?
    }
}

fn read_rows(
    conn: &Connection,
    guild_id: u64,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> anyhow::Result<Vec<(i64, ArchivedMessage)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, channel_id, message_id, author_id, author_name, content,
                attachments, message_url, timestamp
         FROM messages {}",
        filter
    ))?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (row_id, channel_id, message_id, author_id, author_name, content, attachments, url, ts) =
            row?;
        messages.push((
            row_id,
            ArchivedMessage {
                guild_id,
                channel_id: channel_id.parse()?,
                message_id: message_id.parse()?,
                author_id: author_id.parse()?,
                author_name,
                content,
                attachments: serde_json::from_str(&attachments).unwrap_or_default(),
                permalink: url,
                created_at: DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc),
            },
        ));
    }
    Ok(messages)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn message(guild: u64, channel: u64, id: u64, content: Option<&str>) -> ArchivedMessage {
        ArchivedMessage {
            guild_id: guild,
            channel_id: channel,
            message_id: id,
            author_id: 7,
            author_name: "alice".to_string(),
            content: content.map(str::to_string),
            attachments: Vec::new(),
            permalink: permalink(guild, channel, id),
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        }
    }

    #[test]
    fn duplicate_message_ids_are_stored_once() {
        let archive = Archive::in_memory();
        let first = message(1, 10, 100, Some("original text"));
        let mut second = first.clone();
        second.content = Some("edited text".to_string());

        assert!(archive.append(&first).unwrap());
        assert!(!archive.append(&second).unwrap());

        assert_eq!(archive.count(1).unwrap(), 1);
        let stored = archive.messages(1).unwrap();
        assert_eq!(stored[0].content.as_deref(), Some("original text"));
    }

    #[test]
    fn round_trips_attachments_and_null_content() {
        let archive = Archive::in_memory();
        let mut msg = message(1, 10, 5, None);
        msg.attachments = vec!["https://cdn.example/a.png".to_string()];
        archive.append(&msg).unwrap();

        let stored = archive.messages(1).unwrap();
        assert_eq!(stored, vec![msg]);
    }

    #[test]
    fn last_seen_id_tracks_newest_message_per_channel() {
        let archive = Archive::in_memory();
        archive.ensure_store(1).unwrap();
        assert_eq!(archive.last_seen_id(1, 10).unwrap(), None);

        // inserted out of order; snowflake order decides
        for id in [900, 1200, 1000] {
            archive.append(&message(1, 10, id, Some("hello there"))).unwrap();
        }
        archive.append(&message(1, 20, 5000, Some("other channel"))).unwrap();

        assert_eq!(archive.last_seen_id(1, 10).unwrap(), Some(1200));
        assert_eq!(archive.last_seen_id(1, 20).unwrap(), Some(5000));
        assert_eq!(archive.last_seen_id(1, 30).unwrap(), None);
    }

    #[test]
    fn backfill_checkpoint_ignores_live_messages_and_only_moves_forward() {
        let archive = Archive::in_memory();
        archive.append(&message(1, 10, 500, Some("arrived live"))).unwrap();
        assert_eq!(archive.last_seen_id(1, 10).unwrap(), Some(500));
        assert_eq!(archive.backfill_checkpoint(1, 10).unwrap(), None);

        archive.advance_checkpoint(1, 10, 300).unwrap();
        archive.advance_checkpoint(1, 10, 200).unwrap();
        assert_eq!(archive.backfill_checkpoint(1, 10).unwrap(), Some(300));
        archive.advance_checkpoint(1, 10, 1000).unwrap();
        assert_eq!(archive.backfill_checkpoint(1, 10).unwrap(), Some(1000));
        assert_eq!(archive.backfill_checkpoint(1, 20).unwrap(), None);
    }

    #[test]
    fn messages_since_follows_archive_order() {
        let archive = Archive::in_memory();
        // live message first, older history backfilled afterwards
        for id in [900, 100, 200] {
            archive.append(&message(1, 10, id, Some("some chat text"))).unwrap();
        }

        let all = archive.messages_since(1, 0, 10).unwrap();
        let ids: Vec<u64> = all.iter().map(|(_, m)| m.message_id).collect();
        assert_eq!(ids, vec![900, 100, 200]);

        let after_first = archive.messages_since(1, all[0].0, 1).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].1.message_id, 100);
    }

    #[test]
    fn guilds_are_isolated() {
        let archive = Archive::in_memory();
        archive.append(&message(1, 10, 100, Some("guild one"))).unwrap();
        archive.append(&message(2, 10, 100, Some("guild two"))).unwrap();

        assert_eq!(archive.count(1).unwrap(), 1);
        assert_eq!(archive.count(2).unwrap(), 1);
        assert_eq!(archive.guild_ids(), vec![1, 2]);
    }

    #[test]
    fn stores_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let archive = Archive::open(dir.path()).unwrap();
            archive.append(&message(42, 10, 100, Some("persisted"))).unwrap();
        }
        assert!(dir.path().join("guild_42.sqlite").exists());

        let archive = Archive::open(dir.path()).unwrap();
        assert_eq!(archive.last_seen_id(42, 10).unwrap(), Some(100));
        assert!(!archive.append(&message(42, 10, 100, Some("persisted"))).unwrap());
    }

    #[tokio::test]
    async fn run_blocking_uses_shared_stores() {
        let archive = Archive::in_memory();
        let inserted = archive
            .run_blocking(|a| a.append(&message(3, 1, 1, Some("from the pool"))))
            .await
            .unwrap();
        assert!(inserted);
        assert_eq!(archive.count(3).unwrap(), 1);
    }
}
