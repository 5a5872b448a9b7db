//! Before-invoke permission gate and command failure reporting.
//!
//! An invocation is checked against the allow-list before any command body
//! runs. Unknown commands, denials and execution errors each get their own
//! reply and exactly one audit line carrying user, guild and channel.

use crate::error::DispatchError;
use crate::logging::{EVENTS, MESSAGES};
use crate::permissions::PermissionStore;
use crate::{Context, Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info};

pub const UNKNOWN_COMMAND_REPLY: &str = ":x: I didn't recognize your command. Try again or use !help";
pub const DENIED_REPLY: &str = ":x: :x: I didn't recognize your command. Try again or use !help";
pub const EXECUTION_ERROR_REPLY: &str = "⚠️ Something went wrong while running that command.";

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub command: String,
    pub user: String,
    pub user_id: u64,
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub channel_id: u64,
}

impl Invocation {
    pub fn from_context(ctx: Context<'_>) -> Self {
        Self {
            command: ctx.command().name.clone(),
            user: ctx.author().name.clone(),
            user_id: ctx.author().id.get(),
            guild_id: ctx.guild_id().map(|id| id.get()),
            guild_name: ctx.guild().map(|g| g.name.clone()),
            channel_id: ctx.channel_id().get(),
        }
    }

    pub fn from_message(ctx: &serenity::Context, msg: &serenity::Message, command: &str) -> Self {
        Self {
            command: command.to_string(),
            user: msg.author.name.clone(),
            user_id: msg.author.id.get(),
            guild_id: msg.guild_id.map(|id| id.get()),
            guild_name: msg.guild(&ctx.cache).map(|g| g.name.clone()),
            channel_id: msg.channel_id.get(),
        }
    }

    /// `guild/#channel` as written to the logs.
    pub fn place(&self) -> String {
        transcript_place(self.guild_name.as_deref(), self.guild_id, self.channel_id)
    }
}

pub fn transcript_place(guild_name: Option<&str>, guild_id: Option<u64>, channel_id: u64) -> String {
    match (guild_name, guild_id) {
        (Some(name), _) => format!("[{}] #{}", name, channel_id),
        (None, Some(id)) => format!("[{}] #{}", id, channel_id),
        (None, None) => format!("[DM] #{}", channel_id),
    }
}

pub fn authorize(permissions: &PermissionStore, invocation: &Invocation) -> Result<(), DispatchError> {
    if permissions.is_allowed_in(invocation.guild_id, &invocation.command) {
        Ok(())
    } else {
        Err(DispatchError::PermissionDenied {
            command: invocation.command.clone(),
        })
    }
}

/// Failure reported when `command_check` stops an invocation. `error` is set
/// when the check itself failed instead of answering no.
pub fn check_failure(invocation: &Invocation, error: Option<&Error>) -> DispatchError {
    match error {
        Some(e) => DispatchError::CommandExecution {
            command: invocation.command.clone(),
            detail: e.to_string(),
        },
        None => DispatchError::PermissionDenied {
            command: invocation.command.clone(),
        },
    }
}

pub fn reply_for(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::CommandNotFound { .. } => UNKNOWN_COMMAND_REPLY,
        DispatchError::PermissionDenied { .. } => DENIED_REPLY,
        DispatchError::CommandExecution { .. } => EXECUTION_ERROR_REPLY,
    }
}

/// Writes the single audit line for a failed invocation and returns the
/// reply to show the user.
pub fn report_failure(invocation: &Invocation, err: &DispatchError) -> &'static str {
    error!(
        user = %invocation.user,
        user_id = invocation.user_id,
        guild_id = ?invocation.guild_id,
        channel_id = invocation.channel_id,
        "Error in command {} by {} in {}: {}",
        invocation.command,
        invocation.user,
        invocation.place(),
        err
    );
    reply_for(err)
}

pub fn log_bot_reply(place: &str, reply: &str) {
    info!(target: MESSAGES, "{} [BOT]: {}", place, reply);
}

/// `command_check` hook: runs before every command body.
pub async fn check_allowed(ctx: Context<'_>) -> Result<bool, Error> {
    let invocation = Invocation::from_context(ctx);
    Ok(authorize(&ctx.data().permissions, &invocation).is_ok())
}

/// `pre_command` hook: only reached once the gate has passed.
pub async fn log_command(ctx: Context<'_>) {
    let invocation = Invocation::from_context(ctx);
    info!(
        target: EVENTS,
        "Command executed: {} by {} in {}",
        invocation.command,
        invocation.user,
        invocation.place()
    );
}

pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::UnknownCommand {
            ctx,
            msg,
            msg_content,
            ..
        } => {
            let command = msg_content.split_whitespace().next().unwrap_or_default();
            let invocation = Invocation::from_message(ctx, msg, command);
            let reply = report_failure(
                &invocation,
                &DispatchError::CommandNotFound {
                    input: command.to_string(),
                },
            );
            if let Err(e) = msg.channel_id.say(ctx, reply).await {
                error!("Failed to send unknown-command reply: {}", e);
                return;
            }
            log_bot_reply(&invocation.place(), reply);
        }
        poise::FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let invocation = Invocation::from_context(ctx);
            let err = check_failure(&invocation, error.as_ref());
            send_failure(ctx, &invocation, &err).await;
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            let invocation = Invocation::from_context(ctx);
            let err = DispatchError::CommandExecution {
                command: invocation.command.clone(),
                detail: error.to_string(),
            };
            send_failure(ctx, &invocation, &err).await;
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling framework error: {}", e);
            }
        }
    }
}

async fn send_failure(ctx: Context<'_>, invocation: &Invocation, err: &DispatchError) {
    let reply = report_failure(invocation, err);
    if let Err(e) = ctx.say(reply).await {
        error!("Failed to send error reply in {}: {}", invocation.place(), e);
        return;
    }
    log_bot_reply(&invocation.place(), reply);
}
