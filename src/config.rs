use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub permissions_path: PathBuf,
    pub data_dir: PathBuf,
    pub knowledge_dir: PathBuf,

    // Log files
    pub log_dir: PathBuf,
    pub log_max_bytes: u64,
    pub log_backups: usize,

    // Language model (RAG is off unless both key and model are set)
    pub llm_api_key: Option<String>,
    pub llm_url: String,
    pub llm_model: Option<String>,
    pub system_prompt: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    /// Vector size of the embedding model; fixed once the index exists.
    pub embedding_dimensions: usize,

    // Retrieval and ingestion
    pub rag_search_limit: usize,
    pub rag_guild_ids: Vec<u64>,
    pub ingest_delay_ms: u64,
    pub knowledge_index_interval_secs: u64,
    pub backfill_enabled: bool,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for this Discord server. \
Answer the user's question using only the provided context from the server's history and curated notes. \
If the context does not contain the answer, say so briefly instead of guessing.";

const DEFAULT_LLM_URL: &str = "https://openrouter.ai/api/v1";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(non_empty(key).unwrap_or_else(|| default.to_string()))
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let llm_api_key = non_empty("OPENAI_API_KEY");
        let llm_url = non_empty("LLM_URL").unwrap_or_else(|| DEFAULT_LLM_URL.to_string());

        Ok(Config {
            discord_token: non_empty("DISCORD_TOKEN")
                .ok_or_else(|| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            permissions_path: env_path("PERMISSIONS_PATH", "cfg/servers.json"),
            data_dir: env_path("DATA_DIR", "rag/knowledge_base/data"),
            knowledge_dir: env_path("KNOWLEDGE_DIR", "rag/knowledge_base/docs"),
            log_dir: env_path("LOG_DIR", "logs"),
            log_max_bytes: env_or("LOG_MAX_BYTES", 32 * 1024 * 1024),
            log_backups: env_or("LOG_BACKUPS", 10),
            embedding_url: non_empty("EMBEDDING_URL").unwrap_or_else(|| llm_url.clone()),
            embedding_model: non_empty("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_api_key: non_empty("EMBEDDING_API_KEY").or_else(|| llm_api_key.clone()),
            llm_api_key,
            llm_url,
            llm_model: non_empty("ID_MODEL"),
            system_prompt: non_empty("LLM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", 120),
            embedding_timeout_secs: env_or("EMBEDDING_TIMEOUT_SECS", 30),
            embedding_dimensions: env_or("EMBEDDING_DIMENSIONS", 1536),
            rag_search_limit: env_or("RAG_SEARCH_LIMIT", 8),
            rag_guild_ids: env::var("RAG_GUILD_IDS")
                .map(|raw| parse_id_list(&raw))
                .unwrap_or_default(),
            ingest_delay_ms: env_or("INGEST_DELAY_MS", 250),
            knowledge_index_interval_secs: env_or("KNOWLEDGE_INDEX_INTERVAL_SECS", 3600),
            backfill_enabled: env_or("BACKFILL_ENABLED", true),
        })
    }

    pub fn rag_enabled(&self) -> bool {
        self.llm_api_key.is_some() && self.llm_model.is_some()
    }

    /// RAG answers mentions in every guild unless `RAG_GUILD_IDS` narrows it.
    pub fn rag_enabled_for(&self, guild_id: u64) -> bool {
        self.rag_enabled()
            && (self.rag_guild_ids.is_empty() || self.rag_guild_ids.contains(&guild_id))
    }

    pub fn knowledge_index_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.sqlite")
    }
}

fn parse_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("permissions_path", &self.permissions_path)
            .field("data_dir", &self.data_dir)
            .field("knowledge_dir", &self.knowledge_dir)
            .field("log_dir", &self.log_dir)
            .field("log_max_bytes", &self.log_max_bytes)
            .field("log_backups", &self.log_backups)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field("system_prompt", &self.system_prompt)
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("rag_search_limit", &self.rag_search_limit)
            .field("rag_guild_ids", &self.rag_guild_ids)
            .field("ingest_delay_ms", &self.ingest_delay_ms)
            .field(
                "knowledge_index_interval_secs",
                &self.knowledge_index_interval_secs,
            )
            .field("backfill_enabled", &self.backfill_enabled)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Missing token
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("ID_MODEL");
        assert!(Config::build().is_err(), "Should fail without DISCORD_TOKEN");

        // 2. Defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.permissions_path, PathBuf::from("cfg/servers.json"));
        assert_eq!(config.log_max_bytes, 32 * 1024 * 1024);
        assert_eq!(config.log_backups, 10);
        assert!(!config.rag_enabled());

        // 3. RAG switches on with key + model, embedding key falls back
        env::set_var("OPENAI_API_KEY", "secret_api_key");
        env::set_var("ID_MODEL", "some/model:free");
        env::set_var("RAG_GUILD_IDS", "10, 20,nope");
        let config = Config::build().unwrap();
        assert!(config.rag_enabled());
        assert_eq!(config.embedding_api_key.as_deref(), Some("secret_api_key"));
        assert_eq!(config.rag_guild_ids, vec![10, 20]);
        assert!(config.rag_enabled_for(20));
        assert!(!config.rag_enabled_for(30));

        // 4. Debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("secret_api_key"));
        assert!(debug_output.contains("[REDACTED]"));

        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("ID_MODEL");
        env::remove_var("RAG_GUILD_IDS");
    }
}
