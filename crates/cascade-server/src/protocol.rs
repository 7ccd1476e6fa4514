use serde::{Deserialize, Serialize};

use cascade_core::events::ErrorCode;
use cascade_core::ids::SessionId;
use cascade_core::messages::ChatMessage;

/// Inbound WebSocket frames, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Start a sequence run for one user message.
    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        session_id: SessionId,
        message: String,
    },

    /// Mint a session. An explicit id is accepted; collisions are
    /// rejected.
    #[serde(rename = "create_session", rename_all = "camelCase")]
    CreateSession {
        #[serde(default)]
        session_id: Option<SessionId>,
    },

    /// Fetch a session's transcript snapshot.
    #[serde(rename = "get_history", rename_all = "camelCase")]
    GetHistory { session_id: SessionId },
}

/// Direct replies sent to the requesting client only. Sequence events
/// travel separately through the event bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerReply {
    #[serde(rename = "session_created", rename_all = "camelCase")]
    SessionCreated { session_id: SessionId },

    #[serde(rename = "history", rename_all = "camelCase")]
    History {
        session_id: SessionId,
        messages: Vec<ChatMessage>,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: ErrorCode, message: String },
}

impl ServerReply {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Error {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }

    pub fn invalid_session(session_id: &SessionId) -> Self {
        Self::Error {
            code: ErrorCode::InvalidSession,
            message: format!("unknown session: {session_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_send_message() {
        let raw = r#"{"type":"send_message","sessionId":"sess_1","message":"hello"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            req,
            ClientRequest::SendMessage { session_id, message }
                if session_id.as_str() == "sess_1" && message == "hello"
        ));
    }

    #[test]
    fn parse_create_session_without_id() {
        let raw = r#"{"type":"create_session"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            req,
            ClientRequest::CreateSession { session_id: None }
        ));
    }

    #[test]
    fn parse_get_history() {
        let raw = r#"{"type":"get_history","sessionId":"sess_2"}"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            req,
            ClientRequest::GetHistory { session_id } if session_id.as_str() == "sess_2"
        ));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"reboot_server"}"#;
        assert!(serde_json::from_str::<ClientRequest>(raw).is_err());
    }

    #[test]
    fn session_created_wire_format() {
        let reply = ServerReply::SessionCreated {
            session_id: SessionId::from_raw("sess_3"),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "session_created");
        assert_eq!(json["sessionId"], "sess_3");
    }

    #[test]
    fn history_wire_format() {
        let reply = ServerReply::History {
            session_id: SessionId::from_raw("sess_4"),
            messages: vec![ChatMessage::user("hi")],
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "history");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn error_wire_format() {
        let json = serde_json::to_value(ServerReply::invalid_request("bad frame")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "invalid_request");
    }
}
