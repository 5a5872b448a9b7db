//! Gateway event handling: guild bookkeeping, transcripts and archiving.

use crate::backfill::{archived_from, backfill_guild, ChannelRef, SerenityHistory};
use crate::dispatch::log_bot_reply;
use crate::logging::{EVENTS, MESSAGES};
use crate::mention::{handle_mention, mention_place};
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info, warn};

pub const DM_REPLY: &str = "I apologize, but I currently don't talk in DMs.";

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            info!(
                target: EVENTS,
                "Logged in as {} ({}), member of {} guilds",
                data_about_bot.user.name,
                data_about_bot.user.id,
                data_about_bot.guilds.len()
            );
        }
        serenity::FullEvent::GuildCreate { guild, is_new } => {
            on_guild_available(ctx, guild, is_new.unwrap_or(false), data).await;
        }
        serenity::FullEvent::GuildDelete { incomplete, full } => {
            let name = full
                .as_ref()
                .map(|g| g.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            info!(target: EVENTS, "Removed from guild {} ({})", name, incomplete.id);
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            info!(
                target: EVENTS,
                "Member joined guild {}: {} ({})",
                new_member.guild_id, new_member.user.name, new_member.user.id
            );
        }
        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            info!(
                target: EVENTS,
                "Member left guild {}: {} ({})",
                guild_id, user.name, user.id
            );
        }
        serenity::FullEvent::Message { new_message } => {
            on_message(ctx, new_message, data).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn on_message(
    ctx: &serenity::Context,
    new_message: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    if new_message.author.id.get() == data.bot_id {
        return Ok(());
    }

    let place = mention_place(ctx, new_message);
    info!(
        target: MESSAGES,
        "{} {}: {}", place, new_message.author.name, new_message.content
    );

    let Some(guild_id) = new_message.guild_id else {
        new_message.channel_id.say(ctx, DM_REPLY).await?;
        log_bot_reply(&place, DM_REPLY);
        return Ok(());
    };

    let archived = archived_from(new_message, guild_id.get());
    if let Err(e) = data.archive.run_blocking(move |a| a.append(&archived)).await {
        error!("Failed to archive message {} in {}: {}", new_message.id, place, e);
    }

    if new_message.mentions_user_id(serenity::UserId::new(data.bot_id)) {
        handle_mention(ctx, new_message, data, &place).await?;
    }
    Ok(())
}

async fn on_guild_available(ctx: &serenity::Context, guild: &serenity::Guild, is_new: bool, data: &Data) {
    let verb = if is_new { "Joined" } else { "Connected to" };
    info!(
        target: EVENTS,
        "{} guild {} ({}) with {} channels and {} members",
        verb,
        guild.name,
        guild.id,
        guild.channels.len(),
        guild.members.len()
    );

    let bot_member = guild.members.get(&serenity::UserId::new(data.bot_id));
    let mut readable = Vec::new();
    for channel in guild.channels.values() {
        let perms = bot_member.map(|m| guild.user_permissions_in(channel, m));
        let (view, send, history) = perms
            .map(|p| (p.view_channel(), p.send_messages(), p.read_message_history()))
            .unwrap_or((false, false, false));
        info!(
            target: EVENTS,
            "  channel #{} ({}, {:?}) view={} send={} read_history={}",
            channel.name, channel.id, channel.kind, view, send, history
        );

        let is_text = matches!(
            channel.kind,
            serenity::ChannelType::Text | serenity::ChannelType::News
        );
        // without our own member we cannot tell; let the scan report failures
        if is_text && (bot_member.is_none() || (view && history)) {
            readable.push(ChannelRef {
                id: channel.id.get(),
                name: channel.name.clone(),
            });
        }
    }

    for member in guild.members.values() {
        let roles: Vec<String> = member
            .roles
            .iter()
            .filter_map(|id| guild.roles.get(id).map(|r| r.name.clone()))
            .collect();
        let mut marks = Vec::new();
        if guild.member_permissions(member).administrator() {
            marks.push("ADMIN");
        }
        if guild.owner_id == member.user.id {
            marks.push("OWNER");
        }
        info!(
            target: EVENTS,
            "  member {} ({}) roles=[{}] {}",
            member.user.name,
            member.user.id,
            roles.join(", "),
            marks.join(" ")
        );
    }

    let guild_id = guild.id.get();
    let archive = data.archive.clone();
    if let Err(e) = archive.run_blocking(move |a| a.ensure_store(guild_id)).await {
        error!("Failed to open archive for guild {}: {}", guild_id, e);
        return;
    }

    if !data.config.backfill_enabled {
        return;
    }
    let pipeline = data
        .rag
        .clone()
        .filter(|_| data.config.rag_enabled_for(guild_id));
    let history = SerenityHistory::new(ctx.http.clone());
    tokio::spawn(async move {
        backfill_guild(&archive, &history, guild_id, &readable).await;
        if let Some(pipeline) = pipeline {
            if let Err(e) = pipeline.retriever.ingest_archive(&archive, guild_id).await {
                warn!("Knowledge ingestion after backfill failed for guild {}: {}", guild_id, e);
            }
        }
    });
}
