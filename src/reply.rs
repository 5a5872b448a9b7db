use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::dispatch::log_bot_reply;
use poise::serenity_prelude as serenity;

/// Splits `content` into pieces of at most `limit` characters, preferring to
/// break at the last newline or space inside each window.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    let content = content.trim();
    if content.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        if rest.chars().count() <= limit {
            chunks.push(rest.to_string());
            break;
        }

        // byte offset of the first char past the window
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard_end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard_end);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    chunks
}

/// Sends `content` as consecutive messages, the first one replying to
/// `reference` when given.
pub async fn send_chunked(
    http: &serenity::Http,
    channel_id: serenity::ChannelId,
    content: &str,
    reference: Option<&serenity::Message>,
    place: &str,
) -> Result<(), serenity::Error> {
    for (i, chunk) in split_message(content, DISCORD_MESSAGE_LIMIT).into_iter().enumerate() {
        let mut builder = serenity::CreateMessage::new().content(chunk.as_str());
        if i == 0 {
            if let Some(message) = reference {
                builder = builder.reference_message(message);
            }
        }
        channel_id.send_message(http, builder).await?;
        log_bot_reply(place, &chunk);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_one_chunk() {
        assert_eq!(split_message("  hello there  ", 2000), vec!["hello there"]);
        assert!(split_message("   ", 2000).is_empty());
    }

    #[test]
    fn breaks_on_whitespace_when_possible() {
        let chunks = split_message("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn never_splits_inside_a_character() {
        let text = "é".repeat(4500);
        let chunks = split_message(&text, DISCORD_MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn long_answer_respects_the_discord_limit() {
        let text = "word ".repeat(1000);
        let chunks = split_message(&text, DISCORD_MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(chunks.join(" "), text.trim());
    }
}
