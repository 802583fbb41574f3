use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to a conversation before its first message.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Maximum number of characters kept when deriving a title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A source link attached to a grounded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

/// Individual message inside a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_links: Option<Vec<Citation>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            is_error: false,
            grounding_links: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant message that gets filled in while a response streams
    pub fn placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    pub fn citations(&self) -> &[Citation] {
        self.grounding_links.as_deref().unwrap_or_default()
    }
}

/// A titled, ordered group of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: now_millis(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Title for a conversation whose first message is `text`.
///
/// Counts characters rather than bytes so multi-byte input is never split.
pub fn derive_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_becomes_title_verbatim() {
        assert_eq!(derive_title("Hello"), "Hello");
        let exact = "a".repeat(TITLE_MAX_CHARS);
        assert_eq!(derive_title(&exact), exact);
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let text = "Explain quantum physics to a curious ten year old";
        assert_eq!(derive_title(text), "Explain quantum physics to a c...");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(31);
        let title = derive_title(&text);
        assert_eq!(title, format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn message_serializes_with_camel_case_and_omits_defaults() {
        let message = Message::user("hi");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert!(value.get("isError").is_none());
        assert!(value.get("groundingLinks").is_none());

        let mut failed = Message::placeholder();
        failed.is_error = true;
        failed.grounding_links = Some(vec![Citation {
            title: "Rust".into(),
            uri: "https://www.rust-lang.org".into(),
        }]);
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(value["groundingLinks"][0]["uri"], "https://www.rust-lang.org");
    }

    #[test]
    fn reads_records_written_by_the_browser_client() {
        let raw = r#"[{
            "id": "c1",
            "title": "Hello",
            "updatedAt": 1700000000000,
            "messages": [
                {"id": "m1", "role": "user", "content": "Hello", "timestamp": 1700000000000},
                {"id": "m2", "role": "assistant", "content": "Hi!", "timestamp": 1700000000001,
                 "groundingLinks": [{"title": "Example", "uri": "https://example.com"}]}
            ]
        }]"#;
        let sessions: Vec<Conversation> = serde_json::from_str(raw).unwrap();
        assert_eq!(sessions[0].messages.len(), 2);
        assert_eq!(sessions[0].messages[1].role, Role::Assistant);
        assert_eq!(sessions[0].messages[1].citations()[0].title, "Example");
        assert!(!sessions[0].messages[1].is_error);
    }
}
