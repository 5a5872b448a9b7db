/// Per-guild archive of every observed message.
pub const ARCHIVE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        message_id TEXT NOT NULL UNIQUE,
        author_id TEXT NOT NULL,
        author_name TEXT NOT NULL,
        content TEXT,
        attachments TEXT NOT NULL DEFAULT '[]',
        message_url TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages (channel_id);

    -- advanced only by backfill; live messages never move it
    CREATE TABLE IF NOT EXISTS backfill_checkpoints (
        channel_id TEXT PRIMARY KEY,
        last_message_id TEXT NOT NULL
    );
";

/// Document metadata shared by all guilds. Curated documents have a NULL
/// guild. Vectors live in the `document_vectors` vec0 table, keyed by `id`.
pub const KNOWLEDGE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_hash TEXT NOT NULL UNIQUE,
        guild_id TEXT,
        text TEXT NOT NULL,
        source TEXT NOT NULL,
        location TEXT NOT NULL,
        timestamp TEXT,
        priority TEXT NOT NULL,
        indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    -- last archive row (per guild) that ingestion has gone past
    CREATE TABLE IF NOT EXISTS ingest_progress (
        guild_id TEXT PRIMARY KEY,
        last_row INTEGER NOT NULL
    );
";

/// vec0 tables fix their dimension at creation, so this one is built from
/// the configured embedding size. `scope` is 0 for curated documents and the
/// guild id otherwise.
pub fn vector_schema(dimensions: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS document_vectors USING vec0(
            document_id INTEGER PRIMARY KEY,
            scope INTEGER PARTITION KEY,
            embedding FLOAT[{}] distance_metric=cosine
        );",
        dimensions
    )
}
