use serde::{Deserialize, Serialize};

/// Who authored a transcript message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a session transcript. Immutable once appended — the
/// transcript is append-only; nothing edits or removes a message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Set only on assistant messages, identifying which model in the
    /// sequence produced the content.
    #[serde(rename = "modelId", skip_serializing_if = "Option::is_none", default)]
    pub model_id: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            model_id: None,
            content: content.into(),
        }
    }

    pub fn assistant(model_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            model_id: Some(model_id.into()),
            content: content.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_no_model() {
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, Role::User);
        assert!(msg.model_id.is_none());
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn assistant_message_carries_model() {
        let msg = ChatMessage::assistant("gpt-4o", "world");
        assert!(msg.is_assistant());
        assert_eq!(msg.model_id.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn user_message_omits_model_field_on_wire() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("modelId").is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("alpha", "hello"),
        ];
        for msg in &messages {
            let json = serde_json::to_string(msg).unwrap();
            let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }
}
