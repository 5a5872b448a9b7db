use crate::dispatch::{log_bot_reply, transcript_place};
use crate::reply::send_chunked;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info};

pub const GREETING: &str = "👋 Why, hello there.";

pub fn strip_bot_mentions(input: &str, bot_id: u64) -> String {
    let mention = format!("<@{}>", bot_id);
    let mention_nick = format!("<@!{}>", bot_id);

    input
        .replace(&mention, "")
        .replace(&mention_nick, "")
        .trim()
        .to_string()
}

/// Answers a message that mentions the bot.
///
/// Guilds with retrieval enabled get a generated answer from a spawned task
/// so the gateway loop keeps going; everyone else gets the greeting.
pub async fn handle_mention(
    ctx: &serenity::Context,
    new_message: &serenity::Message,
    data: &Data,
    place: &str,
) -> Result<(), Error> {
    let query = strip_bot_mentions(&new_message.content, data.bot_id);
    let pipeline = new_message
        .guild_id
        .filter(|id| data.config.rag_enabled_for(id.get()))
        .and(data.rag.clone());

    let (Some(guild_id), Some(pipeline), false) = (new_message.guild_id, pipeline, query.is_empty())
    else {
        new_message.channel_id.say(ctx, GREETING).await?;
        log_bot_reply(place, GREETING);
        return Ok(());
    };

    info!(
        "Handling mention from {} in {}: {}",
        new_message.author.name, place, query
    );

    let http = ctx.http.clone();
    let message = new_message.clone();
    let place = place.to_string();
    tokio::spawn(async move {
        let typing = message.channel_id.start_typing(&http);
        let answer = pipeline.respond(guild_id.get(), &query).await;
        drop(typing);

        if let Err(e) = send_chunked(&http, message.channel_id, &answer, Some(&message), &place).await {
            error!("Failed to send answer in {}: {}", place, e);
        }
    });
    Ok(())
}

pub fn mention_place(ctx: &serenity::Context, message: &serenity::Message) -> String {
    let guild_name = message.guild(&ctx.cache).map(|g| g.name.clone());
    transcript_place(
        guild_name.as_deref(),
        message.guild_id.map(|id| id.get()),
        message.channel_id.get(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_mention_forms() {
        assert_eq!(strip_bot_mentions("<@42> what are the rules?", 42), "what are the rules?");
        assert_eq!(strip_bot_mentions("hey <@!42>  ", 42), "hey");
        assert_eq!(strip_bot_mentions("<@7> hi", 42), "<@7> hi");
        assert!(strip_bot_mentions("<@42>", 42).is_empty());
    }
}
