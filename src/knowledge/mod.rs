//! Documents fed to the RAG responder: archived chat plus curated notes.

pub mod index;
pub mod retriever;

pub use index::KnowledgeIndex;
pub use retriever::{ContextRetriever, IngestReport};

use crate::db::ArchivedMessage;
use serde::{Deserialize, Serialize};

/// Texts shorter than this carry too little to be worth embedding.
pub const MIN_TEXT_CHARS: usize = 20;

/// Maximum size of a curated-file chunk.
pub const CHUNK_CHARS: usize = 1200;

/// Stand-ins Discord clients show for media-only messages. They are matched
/// against the text left once links are removed, since such a message is
/// usually the placeholder followed by the media URL.
const PLACEHOLDER_TEXTS: &[&str] = &[
    "attachment",
    "attachments",
    "[attachment]",
    "image",
    "[image]",
    "image.png",
    "image.jpg",
    "photo",
    "video",
    "file",
    "sticker",
    "gif",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("high") {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Author name for chat messages, file name for curated docs.
    pub source: String,
    /// Message permalink or file path.
    pub location: String,
    pub timestamp: Option<String>,
    pub priority: Priority,
    /// `None` for curated documents, which every guild can see.
    pub guild_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl KnowledgeDocument {
    pub fn from_message(message: &ArchivedMessage) -> Option<Self> {
        let text = message.content.as_deref()?.trim();
        Some(Self {
            text: text.to_string(),
            metadata: DocumentMetadata {
                source: message.author_name.clone(),
                location: message.permalink.clone(),
                timestamp: Some(message.created_at.to_rfc3339()),
                priority: Priority::Low,
                guild_id: Some(message.guild_id),
            },
        })
    }

    pub fn curated(text: impl Into<String>, file_name: &str, location: &str) -> Self {
        Self {
            text: text.into(),
            metadata: DocumentMetadata {
                source: file_name.to_string(),
                location: location.to_string(),
                timestamp: None,
                priority: Priority::High,
                guild_id: None,
            },
        }
    }

    /// Identity used for skip-if-exists: the same text in another scope is
    /// a different document.
    pub fn content_hash(&self) -> String {
        let scope = match self.metadata.guild_id {
            Some(id) => id.to_string(),
            None => "curated".to_string(),
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(scope.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

pub fn is_valid_text(text: Option<&str>) -> bool {
    let Some(text) = text else {
        return false;
    };
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_TEXT_CHARS {
        return false;
    }
    let words = trimmed
        .split_whitespace()
        .filter(|word| !is_link(word))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    !words.is_empty() && !PLACEHOLDER_TEXTS.contains(&words.as_str())
}

fn is_link(word: &str) -> bool {
    let word = word.trim_start_matches('<');
    word.starts_with("http://") || word.starts_with("https://")
}

/// Drops unusable documents and moves curated (high priority) ones to the
/// front. Order inside each tier is preserved.
pub fn rank(docs: Vec<KnowledgeDocument>) -> Vec<KnowledgeDocument> {
    let mut kept: Vec<KnowledgeDocument> = docs
        .into_iter()
        .filter(|doc| is_valid_text(Some(&doc.text)))
        .collect();
    kept.sort_by_key(|doc| tier(doc.metadata.priority));
    kept
}

fn tier(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Low => 1,
    }
}

/// Texts joined by a blank line, high priority first.
pub fn build_context(docs: &[KnowledgeDocument]) -> String {
    let mut ordered: Vec<&KnowledgeDocument> = docs.iter().collect();
    ordered.sort_by_key(|doc| tier(doc.metadata.priority));
    ordered
        .iter()
        .map(|doc| doc.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splits a curated file into paragraph-aligned chunks of at most
/// `max_chars` characters. A single oversized paragraph is cut on char
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let len = paragraph.chars().count();
        if len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let joined_len = if current.is_empty() {
            len
        } else {
            current.chars().count() + 2 + len
        };
        if joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn doc(text: &str, priority: Priority) -> KnowledgeDocument {
        KnowledgeDocument {
            text: text.to_string(),
            metadata: DocumentMetadata {
                source: "test".to_string(),
                location: "test".to_string(),
                timestamp: None,
                priority,
                guild_id: match priority {
                    Priority::High => None,
                    Priority::Low => Some(1),
                },
            },
        }
    }

    #[test]
    fn rejects_short_empty_and_placeholder_text() {
        assert!(!is_valid_text(None));
        assert!(!is_valid_text(Some("")));
        assert!(!is_valid_text(Some("0123456789")));
        assert!(!is_valid_text(Some("attachment")));
        assert!(!is_valid_text(Some("   AttachMENT  ")));
        assert!(!is_valid_text(Some("                         ")));
        assert!(is_valid_text(Some("The race starts at nine.")));
    }

    #[test]
    fn media_placeholders_with_links_are_rejected() {
        assert!(!is_valid_text(Some(
            "image https://cdn.discordapp.com/attachments/1/2/cat.png"
        )));
        assert!(!is_valid_text(Some(
            "[Attachment] <https://cdn.discordapp.com/attachments/1/2/run.mp4>"
        )));
        assert!(!is_valid_text(Some("https://cdn.discordapp.com/attachments/1/2/cat.png")));
        assert!(is_valid_text(Some("check https://example.com for the rules")));
    }

    #[test]
    fn build_context_puts_curated_first() {
        let docs = vec![doc("B", Priority::Low), doc("A", Priority::High)];
        assert_eq!(build_context(&docs), "A\n\nB");
    }

    #[test]
    fn rank_is_stable_within_a_tier() {
        let ranked = rank(vec![
            doc("low priority message number one", Priority::Low),
            doc("high priority document number one", Priority::High),
            doc("low priority message number two", Priority::Low),
            doc("too short", Priority::High),
            doc("high priority document number two", Priority::High),
        ]);
        let texts: Vec<_> = ranked.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "high priority document number one",
                "high priority document number two",
                "low priority message number one",
                "low priority message number two",
            ]
        );
    }

    #[test]
    fn build_context_of_nothing_is_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn chunks_respect_paragraphs_and_limit() {
        let text = "first paragraph\n\nsecond paragraph\n\n\n\nthird";
        assert_eq!(
            chunk_text(text, 35),
            vec!["first paragraph\n\nsecond paragraph", "third"]
        );

        let long = "x".repeat(25);
        assert_eq!(chunk_text(&long, 10), vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn content_hash_depends_on_scope() {
        let curated = doc("identical text in both scopes", Priority::High);
        let chat = doc("identical text in both scopes", Priority::Low);
        assert_ne!(curated.content_hash(), chat.content_hash());
        assert_eq!(curated.content_hash(), curated.clone().content_hash());
    }
}
