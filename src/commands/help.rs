//! Allow-list aware help.
//!
//! Only commands the guild may run are listed; asking about any other
//! command gets the same reply as an unknown one.

use crate::dispatch::{log_bot_reply, Invocation};
use crate::permissions::PermissionStore;
use crate::{Context, Data, Error};
use poise::serenity_prelude as serenity;

pub const HELP_DENIED_REPLY: &str =
    ":x: :x: :x: I didn't recognize your command. Try again or use !help";
const NO_CATEGORY: &str = "No category";
const NO_DESCRIPTION: &str = "No description";
const DARK_PURPLE: u32 = 0x71368A;
const GREEN: u32 = 0x2ECC71;

#[derive(Debug, Clone, PartialEq)]
pub struct HelpSection {
    pub category: String,
    pub commands: Vec<String>,
}

/// Allowed commands grouped by category, categories in registry order.
pub fn help_sections(
    commands: &[poise::Command<Data, Error>],
    permissions: &PermissionStore,
    guild_id: Option<u64>,
) -> Vec<HelpSection> {
    let mut sections: Vec<HelpSection> = Vec::new();
    for command in commands {
        if command.hide_in_help || !permissions.is_allowed_in(guild_id, &command.name) {
            continue;
        }
        let category = command.category.as_deref().unwrap_or(NO_CATEGORY);
        match sections.iter_mut().find(|s| s.category == category) {
            Some(section) => section.commands.push(command.name.clone()),
            None => sections.push(HelpSection {
                category: category.to_string(),
                commands: vec![command.name.clone()],
            }),
        }
    }
    sections
}

/// Title and description for one command, `None` when it is unknown or
/// not allowed here.
pub fn command_help(
    commands: &[poise::Command<Data, Error>],
    permissions: &PermissionStore,
    guild_id: Option<u64>,
    name: &str,
) -> Option<(String, String)> {
    let command = commands.iter().find(|c| c.name == name)?;
    if !permissions.is_allowed_in(guild_id, &command.name) {
        return None;
    }
    let description = command
        .help_text
        .clone()
        .or_else(|| command.description.clone())
        .unwrap_or_else(|| NO_DESCRIPTION.to_string());
    Some((format!("!{}", command.name), description))
}

/// Show available commands, or details about one of them
#[poise::command(prefix_command, category = "General")]
pub async fn help(
    ctx: Context<'_>,
    #[rest] command: Option<String>,
) -> Result<(), Error> {
    let commands = &ctx.framework().options().commands;
    let permissions = &ctx.data().permissions;
    let guild_id = ctx.guild_id().map(|id| id.get());
    let place = Invocation::from_context(ctx).place();

    let embed = match command.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        None => {
            let mut embed = serenity::CreateEmbed::new()
                .title("Currently available commands")
                .color(DARK_PURPLE);
            for section in help_sections(commands, permissions, guild_id) {
                embed = embed.field(section.category, section.commands.join(", "), false);
            }
            embed
        }
        Some(name) => match command_help(commands, permissions, guild_id, name) {
            Some((title, description)) => serenity::CreateEmbed::new()
                .title(title)
                .description(description)
                .color(GREEN),
            None => {
                ctx.say(HELP_DENIED_REPLY).await?;
                log_bot_reply(&place, HELP_DENIED_REPLY);
                return Ok(());
            }
        },
    };

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    log_bot_reply(&place, "[help embed]");
    Ok(())
}
