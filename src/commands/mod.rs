pub mod general;
pub mod help;

use crate::dispatch::{log_bot_reply, Invocation};
use crate::{Context, Data, Error};

/// Every prefix command the bot knows, in help order.
pub fn registry() -> Vec<poise::Command<Data, Error>> {
    vec![help::help(), general::hello(), general::ping()]
}

/// Replies in the invoking channel and writes the reply to the transcript.
pub async fn say_logged(ctx: Context<'_>, text: &str) -> Result<(), Error> {
    ctx.say(text).await?;
    log_bot_reply(&Invocation::from_context(ctx).place(), text);
    Ok(())
}
