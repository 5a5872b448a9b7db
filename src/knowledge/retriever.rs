use super::{chunk_text, is_valid_text, rank, KnowledgeDocument, KnowledgeIndex, CHUNK_CHARS};
use crate::db::Archive;
use crate::llm::Embedder;
use crate::logging::EVENTS;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CURATED_EXTENSIONS: &[&str] = &["md", "txt"];
const INGEST_BATCH: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub indexed: usize,
    pub existing: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Indexed => self.indexed += 1,
            Outcome::Existing => self.existing += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn absorb(&mut self, other: IngestReport) {
        self.indexed += other.indexed;
        self.existing += other.existing;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Indexed,
    Existing,
    Rejected,
    Failed,
}

/// Searches the knowledge index and keeps it filled.
///
/// The retriever is the only writer to the index; ingestion of archived
/// chat sleeps `ingest_delay` after each new embedding to stay under the
/// embedding service's rate limit. Curated files are not throttled.
pub struct ContextRetriever {
    index: KnowledgeIndex,
    embedder: Arc<dyn Embedder>,
    search_limit: usize,
    ingest_delay: Duration,
}

impl ContextRetriever {
    pub fn new(
        index: KnowledgeIndex,
        embedder: Arc<dyn Embedder>,
        search_limit: usize,
        ingest_delay: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            search_limit,
            ingest_delay,
        }
    }

    pub fn index(&self) -> &KnowledgeIndex {
        &self.index
    }

    /// Nearest documents for `query`, filtered and ranked curated-first.
    pub async fn search(
        &self,
        guild_id: Option<u64>,
        query: &str,
    ) -> anyhow::Result<Vec<KnowledgeDocument>> {
        let embedding = self.embedder.embed(query).await?;
        let limit = self.search_limit;
        let scored = self
            .index
            .run_blocking(move |index| index.nearest(guild_id, &embedding, limit))
            .await?;
        let docs = rank(scored.into_iter().map(|s| s.document).collect());
        debug!("Retrieved {} context documents for guild {:?}", docs.len(), guild_id);
        Ok(docs)
    }

    async fn ingest_one(&self, doc: KnowledgeDocument) -> anyhow::Result<Outcome> {
        if !is_valid_text(Some(&doc.text)) {
            return Ok(Outcome::Rejected);
        }

        let hash = doc.content_hash();
        if self.index.run_blocking(move |index| index.contains(&hash)).await? {
            return Ok(Outcome::Existing);
        }

        let embedding = match self.embedder.embed(&doc.text).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Knowledge ingestion: failed to embed {}: {}", doc.metadata.location, e);
                return Ok(Outcome::Failed);
            }
        };

        let inserted = self
            .index
            .run_blocking(move |index| index.insert(&doc, &embedding))
            .await?;
        Ok(if inserted { Outcome::Indexed } else { Outcome::Existing })
    }

    async fn throttle(&self, outcome: Outcome) {
        if outcome == Outcome::Indexed && !self.ingest_delay.is_zero() {
            tokio::time::sleep(self.ingest_delay).await;
        }
    }

    async fn ingest(&self, docs: Vec<KnowledgeDocument>) -> anyhow::Result<IngestReport> {
        let mut report = IngestReport::default();
        for doc in docs {
            report.record(self.ingest_one(doc).await?);
        }
        Ok(report)
    }

    /// Indexes the archived messages of a guild that arrived since the last
    /// pass, in archive order.
    ///
    /// The progress mark stops in front of the first message whose embedding
    /// failed, so that message is retried on the next pass.
    pub async fn ingest_archive(&self, archive: &Archive, guild_id: u64) -> anyhow::Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut mark = self
            .index
            .run_blocking(move |index| index.ingest_progress(guild_id))
            .await?;

        loop {
            let after = mark;
            let batch = archive
                .run_blocking(move |a| a.messages_since(guild_id, after, INGEST_BATCH))
                .await?;
            if batch.is_empty() {
                break;
            }
            let full = batch.len() == INGEST_BATCH;

            let mut stalled = false;
            for (row, message) in batch {
                let outcome = match KnowledgeDocument::from_message(&message) {
                    Some(doc) => self.ingest_one(doc).await?,
                    None => Outcome::Rejected,
                };
                report.record(outcome);
                stalled |= outcome == Outcome::Failed;
                if !stalled {
                    mark = row;
                }
                self.throttle(outcome).await;
            }

            let reached = mark;
            self.index
                .run_blocking(move |index| index.set_ingest_progress(guild_id, reached))
                .await?;
            if stalled || !full {
                break;
            }
        }

        info!(
            target: EVENTS,
            "Knowledge ingestion for guild {}: {} indexed, {} already present, {} rejected, {} failed",
            guild_id, report.indexed, report.existing, report.rejected, report.failed
        );
        Ok(report)
    }

    /// Indexes the curated `.md`/`.txt` files below `dir`.
    pub async fn ingest_curated(&self, dir: &Path) -> anyhow::Result<IngestReport> {
        let root = dir.to_path_buf();
        let docs = tokio::task::spawn_blocking(move || load_curated(&root)).await??;
        let report = self.ingest(docs).await?;
        info!(
            target: EVENTS,
            "Curated knowledge from {}: {} indexed, {} already present, {} rejected, {} failed",
            dir.display(), report.indexed, report.existing, report.rejected, report.failed
        );
        Ok(report)
    }
}

pub fn load_curated(dir: &Path) -> anyhow::Result<Vec<KnowledgeDocument>> {
    if !dir.is_dir() {
        info!("No curated knowledge directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let wanted = entry.file_type().is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CURATED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !wanted {
            continue;
        }

        let text = std::fs::read_to_string(path)?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let location = path.display().to_string();
        for chunk in chunk_text(&text, CHUNK_CHARS) {
            docs.push(KnowledgeDocument::curated(chunk, &file_name, &location));
        }
    }
    Ok(docs)
}
