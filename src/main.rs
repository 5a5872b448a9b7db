use guildkeeper::db::Archive;
use guildkeeper::indexer::KnowledgeIndexer;
use guildkeeper::knowledge::{ContextRetriever, KnowledgeIndex};
use guildkeeper::llm::LlmClient;
use guildkeeper::permissions::PermissionStore;
use guildkeeper::responder::{RagPipeline, RagResponder};
use guildkeeper::{commands, config::Config, dispatch, events, logging, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn build_rag(config: &Config) -> anyhow::Result<Option<Arc<RagPipeline>>> {
    if !config.rag_enabled() {
        warn!("OPENAI_API_KEY or ID_MODEL not set; mentions get the greeting only");
        return Ok(None);
    }

    let llm = Arc::new(LlmClient::new(config));
    let index = KnowledgeIndex::open(config.knowledge_index_path(), config.embedding_dimensions)?;
    let retriever = ContextRetriever::new(
        index,
        llm.clone(),
        config.rag_search_limit,
        Duration::from_millis(config.ingest_delay_ms),
    );
    let responder = RagResponder::new(llm, config.system_prompt.clone());
    Ok(Some(Arc::new(RagPipeline::new(retriever, responder))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    let _log_guards = logging::init(&config.log_dir, config.log_max_bytes, config.log_backups)?;
    info!("Configuration: {:?}", config);

    let permissions = PermissionStore::load(&config.permissions_path)?;
    let archive = Archive::open(&config.data_dir)?;
    let rag = build_rag(&config)?;

    if let Some(pipeline) = &rag {
        let curated = pipeline.clone();
        let dir = config.knowledge_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = curated.retriever.ingest_curated(&dir).await {
                error!("Curated knowledge ingestion failed: {}", e);
            }
        });

        let guilds = (!config.rag_guild_ids.is_empty()).then(|| config.rag_guild_ids.clone());
        let indexer = KnowledgeIndexer::new(
            archive.clone(),
            pipeline.clone(),
            guilds,
            Duration::from_secs(config.knowledge_index_interval_secs.max(1)),
        );
        tokio::spawn(indexer.run());
    }

    let discord_token = config.discord_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::registry(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("!".into()),
                mention_as_prefix: false,
                ..Default::default()
            },
            command_check: Some(|ctx| Box::pin(dispatch::check_allowed(ctx))),
            pre_command: |ctx| Box::pin(dispatch::log_command(ctx)),
            on_error: |error| Box::pin(dispatch::on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |_ctx, ready, _framework| {
            Box::pin(async move {
                info!("Bot is ready as {}", ready.user.name);
                Ok(Data {
                    config,
                    permissions,
                    archive,
                    rag,
                    bot_id: ready.user.id.get(),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
