//! Request codec helpers shared by providers
//!
//! Role-sequence repair and prompt extraction. Upstreams that require strict
//! user/assistant alternation get adjacent same-role messages merged, with a
//! provider-specific separator.

use crate::messages::{Message, Role};

/// Merge consecutive messages that share a role, joining content with `separator`.
///
/// Tool calls of a merged message replace the previous ones when present.
#[must_use]
pub fn merge_adjacent_roles(messages: &[Message], separator: &str) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());

    for message in messages {
        match result.last_mut() {
            Some(prev) if prev.role == message.role => {
                prev.content.push_str(separator);
                prev.content.push_str(&message.content);
                if message.tool_calls.is_some() {
                    prev.tool_calls.clone_from(&message.tool_calls);
                }
            }
            _ => result.push(message.clone()),
        }
    }

    result
}

/// Rewrite an assistant first message to the user role
pub fn coerce_first_user(messages: &mut [Message]) {
    if let Some(first) = messages.first_mut() {
        if first.role == Role::Assistant {
            first.role = Role::User;
        }
    }
}

/// Content of the latest user message, or empty
#[must_use]
pub fn latest_user_prompt(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map_or("", |m| m.content.as_str())
}

/// Content of the last message regardless of role, or empty
#[must_use]
pub fn last_message_content(messages: &[Message]) -> &str {
    messages.last().map_or("", |m| m.content.as_str())
}

/// Split text on a separator, keeping the separator on every piece but the last
#[must_use]
pub fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    let parts: Vec<&str> = text.split(separator).collect();
    let last = parts.len().saturating_sub(1);
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            if i == last {
                part.to_string()
            } else {
                format!("{part}{separator}")
            }
        })
        .collect()
}
