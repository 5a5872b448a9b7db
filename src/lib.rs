pub mod backfill;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod indexer;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod mention;
pub mod permissions;
pub mod reply;
pub mod responder;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub permissions: permissions::PermissionStore,
    pub archive: db::Archive,
    /// Present only when a language model is configured
    pub rag: Option<std::sync::Arc<responder::RagPipeline>>,
    /// Bot's own user ID, used to skip our own messages and detect mentions
    pub bot_id: u64,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
