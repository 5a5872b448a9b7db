use crate::db::Archive;
use crate::knowledge::IngestReport;
use crate::responder::RagPipeline;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Periodically indexes archived messages of every known guild.
///
/// Messages archived live only reach the knowledge index through this loop.
/// Each pass reads only the archive rows past the guild's ingest mark, so a
/// tick over an unchanged archive reads nothing and embeds nothing.
pub struct KnowledgeIndexer {
    archive: Archive,
    pipeline: Arc<RagPipeline>,
    guilds: Option<Vec<u64>>,
    interval: Duration,
}

impl KnowledgeIndexer {
    /// `guilds` restricts indexing to those guild ids; `None` means all.
    pub fn new(
        archive: Archive,
        pipeline: Arc<RagPipeline>,
        guilds: Option<Vec<u64>>,
        interval: Duration,
    ) -> Self {
        Self {
            archive,
            pipeline,
            guilds,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick fires immediately; startup ingestion already covers it
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let total = self.process_all().await;
            if total.indexed == 0 {
                debug!("Knowledge indexer: nothing new to index");
            } else {
                info!("Knowledge indexer: indexed {} documents", total.indexed);
            }
        }
    }

    async fn process_all(&self) -> IngestReport {
        let mut total = IngestReport::default();
        for guild_id in self.archive.guild_ids() {
            if !self.wants(guild_id) {
                continue;
            }
            match self.pipeline.retriever.ingest_archive(&self.archive, guild_id).await {
                Ok(report) => total.absorb(report),
                Err(e) => error!("Knowledge indexer error for guild {}: {}", guild_id, e),
            }
        }
        total
    }

    fn wants(&self, guild_id: u64) -> bool {
        self.guilds
            .as_ref()
            .map_or(true, |ids| ids.contains(&guild_id))
    }
}
