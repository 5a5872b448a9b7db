use super::say_logged;
use crate::{Context, Error};

/// Test query
#[poise::command(prefix_command, category = "Diagnostics")]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    say_logged(ctx, "pong").await
}

/// Just a greeting
#[poise::command(prefix_command, category = "General")]
pub async fn hello(ctx: Context<'_>) -> Result<(), Error> {
    say_logged(ctx, "Hello!").await
}
