//! # Prompt
//!
//! Message types and prompt rendering shared by the conversation memory crates.
//!
//! ## Contents
//!
//! - [`ChatMessage`] / [`MessageRole`]: one element of a chat-completion `messages` array.
//! - [`SystemPrompt`]: renders the system message (user name, current time, long-term memory).
//! - [`timestamp_prefix`]: the `"On Monday, October 19, 2026 at 3:04 PM: "` prefix stamped on turns.
//! - [`summarization_request`]: wraps turns with the instruction sent to the summarizer model.
//!
//! ## External interactions
//!
//! - **AI models**: Output is the `messages` argument of a chat-completion call.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message, one-to-one with OpenAI Chat Completions API `role` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction (API `role: "system"`).
    System,
    /// User message (API `role: "user"`).
    User,
    /// Assistant message (API `role: "assistant"`).
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message, one-to-one with one element of OpenAI `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Placeholder replaced by the user's name.
pub const PLACEHOLDER_USER: &str = "{user}";
/// Placeholder replaced by the rendered current time.
pub const PLACEHOLDER_TIME: &str = "{time}";
/// Placeholder replaced by the long-term memory string.
pub const PLACEHOLDER_MEMORY: &str = "{long_term_memory}";

/// Default system template. The placeholders matter; the wording does not.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "You are {user}'s personal AI assistant. \
The current date time is {time}. \
What you remember about earlier conversations: {long_term_memory}";

/// Text substituted for `{long_term_memory}` while nothing has been remembered yet.
pub const EMPTY_MEMORY_TEXT: &str = "nothing yet.";

/// Instruction appended to the turns handed to the summarizer model.
pub const SUMMARIZE_INSTRUCTION: &str = "Please summarize this conversation concisely \
(respond only with your best attempt at a summary and leave out caveats, preambles, or next steps).";

/// Chrono format used for both the system message and turn prefixes.
const TIME_FORMAT: &str = "%A, %B %-d, %Y at %-I:%M %p";

/// Renders a timestamp the way it appears in prompts, e.g. `Monday, October 19, 2026 at 3:04 PM`.
pub fn format_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format(TIME_FORMAT).to_string()
}

/// Prefix stamped on every stored turn so the model can reason about when it was said.
pub fn timestamp_prefix<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!("On {}: ", format_time(at))
}

/// System message template bound to a user name.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    template: String,
    user_name: String,
}

impl SystemPrompt {
    pub fn new(template: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            user_name: user_name.into(),
        }
    }

    /// Uses [`DEFAULT_SYSTEM_TEMPLATE`].
    pub fn with_default_template(user_name: impl Into<String>) -> Self {
        Self::new(DEFAULT_SYSTEM_TEMPLATE, user_name)
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Renders the system message for the given time and long-term memory.
    ///
    /// An empty `long_term_memory` is rendered as [`EMPTY_MEMORY_TEXT`].
    pub fn render<Tz: TimeZone>(&self, now: &DateTime<Tz>, long_term_memory: &str) -> ChatMessage
    where
        Tz::Offset: fmt::Display,
    {
        let memory = match long_term_memory.trim() {
            "" => EMPTY_MEMORY_TEXT,
            text => text,
        };
        let content = self
            .template
            .replace(PLACEHOLDER_USER, &self.user_name)
            .replace(PLACEHOLDER_TIME, &format_time(now))
            .replace(PLACEHOLDER_MEMORY, memory);
        ChatMessage::system(content)
    }
}

/// Builds the message list sent to the summarizer: the turns followed by a user instruction.
pub fn summarization_request(turns: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = turns.to_vec();
    messages.push(ChatMessage::user(SUMMARIZE_INSTRUCTION));
    messages
}
