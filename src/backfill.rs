//! Resumable import of channel history into the archive.
//!
//! Each channel resumes from its backfill checkpoint, which only this module
//! advances. A channel that cannot be read is reported and skipped; the rest
//! still run.

use crate::db::{self, Archive, ArchivedMessage};
use crate::error::ChannelScanError;
use crate::logging::EVENTS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Discord returns at most 100 messages per history request.
pub const PAGE_SIZE: u8 = 100;

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` messages newer than `after`, oldest first.
    async fn messages_after(
        &self,
        guild_id: u64,
        channel_id: u64,
        after: u64,
        limit: u8,
    ) -> anyhow::Result<Vec<ArchivedMessage>>;
}

#[derive(Debug, Clone)]
pub struct ChannelRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub archived: usize,
    pub scanned_channels: usize,
    pub failed_channels: Vec<ChannelScanError>,
}

pub fn archived_from(message: &serenity::Message, guild_id: u64) -> ArchivedMessage {
    let content = message.content.trim();
    ArchivedMessage {
        guild_id,
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
        author_id: message.author.id.get(),
        author_name: message.author.name.clone(),
        content: (!content.is_empty()).then(|| message.content.clone()),
        attachments: message.attachments.iter().map(|a| a.url.clone()).collect(),
        permalink: db::permalink(guild_id, message.channel_id.get(), message.id.get()),
        created_at: DateTime::<Utc>::from_timestamp(message.timestamp.unix_timestamp(), 0)
            .unwrap_or_else(Utc::now),
    }
}

/// Reads history through the Discord REST API.
pub struct SerenityHistory {
    http: Arc<serenity::Http>,
}

impl SerenityHistory {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HistorySource for SerenityHistory {
    async fn messages_after(
        &self,
        guild_id: u64,
        channel_id: u64,
        after: u64,
        limit: u8,
    ) -> anyhow::Result<Vec<ArchivedMessage>> {
        let builder = serenity::GetMessages::new()
            .after(serenity::MessageId::new(after.max(1)))
            .limit(limit);
        let mut messages = serenity::ChannelId::new(channel_id)
            .messages(&*self.http, builder)
            .await?;
        messages.sort_by_key(|m| m.id);
        Ok(messages.iter().map(|m| archived_from(m, guild_id)).collect())
    }
}

pub async fn backfill_guild(
    archive: &Archive,
    source: &dyn HistorySource,
    guild_id: u64,
    channels: &[ChannelRef],
) -> BackfillReport {
    let mut report = BackfillReport::default();

    for channel in channels {
        match backfill_channel(archive, source, guild_id, channel.id).await {
            Ok(archived) => {
                debug!(
                    "Backfill: archived {} new messages from #{} in guild {}",
                    archived, channel.name, guild_id
                );
                report.archived += archived;
                report.scanned_channels += 1;
            }
            Err(e) => {
                let failure = ChannelScanError {
                    channel_id: channel.id,
                    channel_name: channel.name.clone(),
                    reason: e.to_string(),
                };
                warn!(target: EVENTS, "Backfill in guild {}: {}", guild_id, failure);
                report.failed_channels.push(failure);
            }
        }
    }

    if report.failed_channels.is_empty() {
        info!(
            target: EVENTS,
            "Backfill for guild {} finished: {} new messages from {} channels",
            guild_id, report.archived, report.scanned_channels
        );
    } else {
        error!(
            "Backfill for guild {} finished with {} failed channel(s): {} new messages from {} channels",
            guild_id,
            report.failed_channels.len(),
            report.archived,
            report.scanned_channels
        );
    }
    report
}

async fn backfill_channel(
    archive: &Archive,
    source: &dyn HistorySource,
    guild_id: u64,
    channel_id: u64,
) -> anyhow::Result<usize> {
    let mut cursor = archive
        .run_blocking(move |a| a.backfill_checkpoint(guild_id, channel_id))
        .await?
        .unwrap_or(0);
    let mut archived = 0usize;

    loop {
        let page = source
            .messages_after(guild_id, channel_id, cursor, PAGE_SIZE)
            .await?;
        let Some(newest) = page.iter().map(|m| m.message_id).max() else {
            break;
        };
        let full_page = page.len() >= PAGE_SIZE as usize;

        archived += archive
            .run_blocking(move |a| {
                let mut inserted = 0usize;
                for message in &page {
                    if a.append(message)? {
                        inserted += 1;
                    }
                }
                a.advance_checkpoint(guild_id, channel_id, newest)?;
                Ok(inserted)
            })
            .await?;

        if !full_page || newest <= cursor {
            break;
        }
        cursor = newest;
    }

    Ok(archived)
}
