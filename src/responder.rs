//! Answers mentions from retrieved context.
//!
//! The model gets no tools and no retrieval of its own: the context is
//! assembled here and passed in the prompt.

use crate::error::ExternalServiceError;
use crate::knowledge::{build_context, ContextRetriever, KnowledgeDocument};
use crate::llm::ChatModel;
use std::sync::Arc;
use tracing::{info, warn};

pub const FALLBACK_ANSWER: &str = "I could not generate a response.";

pub struct RagResponder {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl RagResponder {
    pub fn new(model: Arc<dyn ChatModel>, system_prompt: impl Into<String>) -> Self {
        Self {
            model,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn build_prompt(query: &str, docs: &[KnowledgeDocument]) -> String {
        let context = build_context(docs);
        let context = if context.is_empty() {
            "(no relevant context found)".to_string()
        } else {
            context
        };
        format!("Context:\n{}\n\nQuestion: {}", context, query)
    }

    pub async fn answer(
        &self,
        query: &str,
        docs: &[KnowledgeDocument],
    ) -> Result<String, ExternalServiceError> {
        let prompt = Self::build_prompt(query, docs);
        let text = self.model.complete(&self.system_prompt, &prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            warn!("Language model returned empty content for query: {}", query);
            return Ok(FALLBACK_ANSWER.to_string());
        }
        Ok(text.to_string())
    }
}

/// Retrieval followed by generation, shared by every mention handler.
pub struct RagPipeline {
    pub retriever: ContextRetriever,
    pub responder: RagResponder,
}

impl RagPipeline {
    pub fn new(retriever: ContextRetriever, responder: RagResponder) -> Self {
        Self {
            retriever,
            responder,
        }
    }

    /// Never fails: service errors become a user-facing message.
    pub async fn respond(&self, guild_id: u64, query: &str) -> String {
        let docs = match self.retriever.search(Some(guild_id), query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Context retrieval failed for guild {}: {}", guild_id, e);
                Vec::new()
            }
        };
        info!("RAG query in guild {} with {} context documents", guild_id, docs.len());

        match self.responder.answer(query, &docs).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("RAG answer failed for guild {}: {}", guild_id, e);
                format!("⚠️ I couldn't reach the language model right now ({}).", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::tests::doc;
    use crate::knowledge::{KnowledgeIndex, Priority};
    use crate::llm::Embedder;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records prompts and replies with a canned answer.
    struct ScriptedModel {
        reply: Result<String, ExternalServiceError>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedModel {
        fn new(reply: Result<String, ExternalServiceError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, system: &str, user: &str) -> Result<String, ExternalServiceError> {
            self.seen
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.reply.clone()
        }
    }

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ExternalServiceError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[test]
    fn prompt_has_ranked_context_then_query() {
        let docs = vec![
            doc("older chat message about the speedrun", Priority::Low),
            doc("curated: the record is 1:02:33 set in 2023", Priority::High),
        ];
        let prompt = RagResponder::build_prompt("what is the record?", &docs);
        assert_eq!(
            prompt,
            "Context:\ncurated: the record is 1:02:33 set in 2023\n\n\
             older chat message about the speedrun\n\nQuestion: what is the record?"
        );
    }

    #[tokio::test]
    async fn answer_uses_system_prompt_and_falls_back_on_empty_output() {
        let model = ScriptedModel::new(Ok("   ".to_string()));
        let responder = RagResponder::new(model.clone(), "be brief");

        let answer = responder.answer("hi", &[]).await.unwrap();
        assert_eq!(answer, FALLBACK_ANSWER);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "be brief");
        assert!(seen[0].1.ends_with("Question: hi"));
    }

    #[tokio::test]
    async fn answer_returns_service_errors_as_values() {
        let model = ScriptedModel::new(Err(ExternalServiceError::Timeout {
            service: "language model",
            secs: 120,
        }));
        let responder = RagResponder::new(model, "be brief");
        let result = responder.answer("hi", &[]).await;
        assert!(matches!(result, Err(ExternalServiceError::Timeout { .. })));
    }

    #[tokio::test]
    async fn pipeline_degrades_to_error_message() {
        let retriever = ContextRetriever::new(
            KnowledgeIndex::in_memory(2).unwrap(),
            Arc::new(FlatEmbedder),
            5,
            Duration::ZERO,
        );
        let model = ScriptedModel::new(Err(ExternalServiceError::Completion("401".to_string())));
        let pipeline = RagPipeline::new(retriever, RagResponder::new(model, "sys"));

        let reply = pipeline.respond(1, "anyone know the rules?").await;
        assert!(reply.starts_with("⚠️"));
        assert!(reply.contains("401"));
    }

    #[tokio::test]
    async fn pipeline_passes_retrieved_context_to_the_model() {
        let index = KnowledgeIndex::in_memory(2).unwrap();
        index
            .insert(&doc("curated note: meetups are on fridays", Priority::High), &[1.0, 0.0])
            .unwrap();
        let retriever = ContextRetriever::new(index, Arc::new(FlatEmbedder), 5, Duration::ZERO);
        let model = ScriptedModel::new(Ok("Fridays.".to_string()));
        let pipeline = RagPipeline::new(retriever, RagResponder::new(model.clone(), "sys"));

        assert_eq!(pipeline.respond(1, "when are meetups?").await, "Fridays.");
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].1.contains("curated note: meetups are on fridays"));
    }
}
