//! Shared conversation document: datasets, handles, and turns.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions preceding the conversation.
    System,
    /// Caller-written turn.
    User,
    /// Turn written by the remote execution.
    Assistant,
}

/// One turn of a conversation document.
///
/// `content` is kept as raw JSON because the remote side may write either
/// a plain string or a mixed-content list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Prompt key; an assistant answer shares the key of its user turn.
    pub key: String,
    /// Author.
    pub role: Role,
    /// Text or mixed-content list.
    pub content: Value,
    /// Model that wrote an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl Turn {
    /// Build a user turn, optionally referencing an uploaded image.
    #[must_use]
    pub fn user(key: impl Into<String>, text: &str, attachment_url: Option<&str>) -> Self {
        let mut parts = vec![json!({ "type": "text", "text": text })];
        if let Some(url) = attachment_url {
            parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
        }
        Self {
            key: key.into(),
            role: Role::User,
            content: Value::Array(parts),
            model_name: None,
        }
    }

    /// Build an assistant turn with plain text content.
    #[must_use]
    pub fn assistant(key: impl Into<String>, text: &str) -> Self {
        Self {
            key: key.into(),
            role: Role::Assistant,
            content: Value::String(text.to_owned()),
            model_name: None,
        }
    }
}

/// Conversation document as last fetched from the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Document identifier.
    pub id: String,
    /// Document name, `<sessionId>.json`.
    #[serde(default)]
    pub name: String,
    /// Turns in append order.
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Document {
    /// Key the next appended user turn receives.
    #[must_use]
    pub fn next_prompt_key(&self) -> String {
        let users = self.turns.iter().filter(|t| t.role == Role::User).count();
        (users + 1).to_string()
    }

    /// Key of the most recent user turn.
    #[must_use]
    pub fn last_user_key(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.key.as_str())
    }

    /// Assistant turns, optionally restricted to one producing model.
    ///
    /// Untagged turns always match.
    pub fn assistant_turns<'a>(
        &'a self,
        model_name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Turn> + 'a {
        self.turns.iter().filter(move |t| {
            t.role == Role::Assistant
                && match (model_name, t.model_name.as_deref()) {
                    (Some(wanted), Some(actual)) => wanted == actual,
                    _ => true,
                }
        })
    }
}

/// Dataset holding conversation documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    /// Dataset identifier.
    pub id: String,
    /// Dataset name.
    pub name: String,
}

/// Reference to a conversation document on the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHandle {
    /// Document identifier (the `item_id` exposed to callers).
    pub id: String,
    /// Document name.
    #[serde(default)]
    pub name: String,
    /// Owning dataset.
    #[serde(default)]
    pub dataset_id: String,
}

/// Uploaded file referenced from a user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// File identifier.
    pub id: String,
    /// URL the execution can read the file from.
    pub url: String,
}
