use serde::{Deserialize, Serialize};

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of who sent this message
    pub role: MessageRole,
    /// The text content of the message
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// Message from the user
    User,
    /// Message from the assistant
    Assistant,
}

/// Build the ordered message list for a single-shot query.
///
/// With `convert_system_to_user`, the system text is sent as a user turn for
/// providers that reject the system role. Absent parts produce no message.
pub fn messages_from_parts(
    system: Option<&str>,
    user: Option<&str>,
    convert_system_to_user: bool,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);

    if let Some(system) = system {
        if convert_system_to_user {
            messages.push(Message::user(system));
        } else {
            messages.push(Message::system(system));
        }
    }

    if let Some(user) = user {
        messages.push(Message::user(user));
    }

    messages
}
