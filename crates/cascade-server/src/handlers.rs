use std::sync::Arc;

use tracing::{info, instrument, warn};

use cascade_engine::Sequencer;
use cascade_store::{SessionStore, StoreError};

use crate::client::{ClientId, ClientRegistry};
use crate::protocol::{ClientRequest, ServerReply};

/// Shared state for request handling.
pub struct HandlerState {
    pub store: Arc<SessionStore>,
    pub sequencer: Arc<Sequencer>,
    pub registry: Arc<ClientRegistry>,
}

impl HandlerState {
    pub fn new(
        store: Arc<SessionStore>,
        sequencer: Arc<Sequencer>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            store,
            sequencer,
            registry,
        }
    }
}

/// Handle one raw inbound frame from a client. Direct replies go back
/// to the sender; sequence events reach it via the event bridge.
pub async fn handle_frame(state: &HandlerState, client_id: &ClientId, raw: &str) {
    let request: ClientRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "unparseable frame");
            send_reply(state, client_id, &ServerReply::invalid_request(e.to_string()));
            return;
        }
    };

    dispatch(state, client_id, request).await;
}

#[instrument(skip(state, request), fields(client_id = %client_id))]
async fn dispatch(state: &HandlerState, client_id: &ClientId, request: ClientRequest) {
    match request {
        ClientRequest::CreateSession { session_id } => {
            match state.store.create(session_id) {
                Ok(session) => {
                    state.registry.bind_session(client_id, session.id.clone());
                    info!(session_id = %session.id, "session created");
                    send_reply(
                        state,
                        client_id,
                        &ServerReply::SessionCreated {
                            session_id: session.id,
                        },
                    );
                }
                Err(e) => {
                    send_reply(state, client_id, &ServerReply::invalid_request(e.to_string()));
                }
            }
        }

        ClientRequest::GetHistory { session_id } => match state.store.history(&session_id) {
            Ok(messages) => {
                state.registry.bind_session(client_id, session_id.clone());
                send_reply(
                    state,
                    client_id,
                    &ServerReply::History {
                        session_id,
                        messages,
                    },
                );
            }
            Err(StoreError::NotFound(_)) => {
                send_reply(state, client_id, &ServerReply::invalid_session(&session_id));
            }
            Err(e) => {
                send_reply(state, client_id, &ServerReply::invalid_request(e.to_string()));
            }
        },

        ClientRequest::SendMessage {
            session_id,
            message,
        } => {
            // Bind first so the events of this run reach the sender.
            // Session validation happens inside the run; an unknown id
            // comes back as an invalid_session event.
            state.registry.bind_session(client_id, session_id.clone());

            let sequencer = Arc::clone(&state.sequencer);
            let sid = session_id.clone();
            tokio::spawn(async move {
                // Failures were already reported as events; log and move on.
                if let Err(e) = sequencer.run(sid.clone(), message).await {
                    warn!(session_id = %sid, error = %e, "sequence run failed");
                }
            });
        }
    }
}

fn send_reply(state: &HandlerState, client_id: &ClientId, reply: &ServerReply) {
    match serde_json::to_string(reply) {
        Ok(json) => {
            state.registry.send_to(client_id, json);
        }
        Err(e) => warn!(client_id = %client_id, error = %e, "failed to serialize reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::events::SequenceEvent;
    use cascade_engine::config::ModelLineup;
    use cascade_llm::{MockGenerator, MockReply};
    use tokio::sync::broadcast;

    fn setup(
        replies: Vec<MockReply>,
    ) -> (
        HandlerState,
        broadcast::Receiver<SequenceEvent>,
        ClientId,
        tokio::sync::mpsc::Receiver<String>,
    ) {
        let store = Arc::new(SessionStore::new());
        let registry = Arc::new(ClientRegistry::new(64));
        let (event_tx, event_rx) = broadcast::channel(256);
        let lineup = ModelLineup::from_lookup(|key| match key {
            "CASCADE_MODELS" => Some("alpha".to_string()),
            _ => None,
        });
        let sequencer = Arc::new(Sequencer::new(
            Arc::new(MockGenerator::new(replies)),
            Arc::clone(&store),
            event_tx,
            lineup,
        ));
        let state = HandlerState::new(store, sequencer, Arc::clone(&registry));
        let (client_id, client_rx) = registry.register();
        (state, event_rx, client_id, client_rx)
    }

    fn recv_json(rx: &mut tokio::sync::mpsc::Receiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn create_session_replies_with_id() {
        let (state, _events, client_id, mut rx) = setup(vec![]);

        handle_frame(&state, &client_id, r#"{"type":"create_session"}"#).await;

        let reply = recv_json(&mut rx);
        assert_eq!(reply["type"], "session_created");
        assert!(reply["sessionId"].as_str().unwrap().starts_with("sess_"));
        assert_eq!(state.store.len(), 1);
    }

    #[tokio::test]
    async fn create_session_with_explicit_id() {
        let (state, _events, client_id, mut rx) = setup(vec![]);

        handle_frame(
            &state,
            &client_id,
            r#"{"type":"create_session","sessionId":"sess_mine"}"#,
        )
        .await;

        let reply = recv_json(&mut rx);
        assert_eq!(reply["sessionId"], "sess_mine");

        // Duplicate creation is rejected
        handle_frame(
            &state,
            &client_id,
            r#"{"type":"create_session","sessionId":"sess_mine"}"#,
        )
        .await;
        let reply = recv_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_request");
    }

    #[tokio::test]
    async fn get_history_returns_transcript() {
        let (state, _events, client_id, mut rx) = setup(vec![]);
        let session = state.store.create(None).unwrap();
        state
            .store
            .append_message(&session.id, cascade_core::messages::ChatMessage::user("hi"))
            .unwrap();

        let frame = format!(
            r#"{{"type":"get_history","sessionId":"{}"}}"#,
            session.id.as_str()
        );
        handle_frame(&state, &client_id, &frame).await;

        let reply = recv_json(&mut rx);
        assert_eq!(reply["type"], "history");
        assert_eq!(reply["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn get_history_unknown_session() {
        let (state, _events, client_id, mut rx) = setup(vec![]);

        handle_frame(
            &state,
            &client_id,
            r#"{"type":"get_history","sessionId":"sess_nope"}"#,
        )
        .await;

        let reply = recv_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_session");
    }

    #[tokio::test]
    async fn unparseable_frame_gets_invalid_request() {
        let (state, _events, client_id, mut rx) = setup(vec![]);

        handle_frame(&state, &client_id, "{not json").await;

        let reply = recv_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_request");
    }

    #[tokio::test]
    async fn send_message_runs_sequence_and_binds_client() {
        let (state, mut events, client_id, _rx) =
            setup(vec![MockReply::stream_text("answer")]);
        let session = state.store.create(None).unwrap();

        let frame = format!(
            r#"{{"type":"send_message","sessionId":"{}","message":"question"}}"#,
            session.id.as_str()
        );
        handle_frame(&state, &client_id, &frame).await;

        // The run happens on a spawned task
        let mut saw_complete = false;
        for _ in 0..4 {
            if matches!(events.recv().await, Ok(SequenceEvent::SequenceComplete { .. })) {
                saw_complete = true;
                break;
            }
        }
        assert!(saw_complete);

        let history = state.store.history(&session.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "answer");

        assert_eq!(
            state.registry.clients_for_session(&session.id),
            vec![client_id]
        );
    }

    #[tokio::test]
    async fn send_message_unknown_session_emits_error_event() {
        let (state, mut events, client_id, _rx) = setup(vec![]);

        handle_frame(
            &state,
            &client_id,
            r#"{"type":"send_message","sessionId":"sess_ghost","message":"hi"}"#,
        )
        .await;

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SequenceEvent::Error {
                code: cascade_core::events::ErrorCode::InvalidSession,
                ..
            }
        ));
    }
}
