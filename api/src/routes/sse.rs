use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use spacebridge_mcp_runtime::connection::MESSAGES_PATH;
use spacebridge_mcp_runtime::{AuthenticatedConnection, DeliveryError, Frame};
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::RpcPayload;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sse", get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn frame_event(frame: Frame) -> Event {
    match frame {
        Frame::Endpoint(path) => Event::default().event("endpoint").data(path),
        Frame::Message(message) => Event::default().event("message").data(message.to_string()),
        Frame::Heartbeat => Event::default().comment("keepalive"),
    }
}

async fn open_stream(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let connection = match AuthenticatedConnection::authenticate(
        &state.store,
        query.token.as_deref(),
        state.jira.clone(),
    ) {
        Ok(connection) => connection,
        Err(err) => {
            tracing::info!(event = "sse_rejected", "Stream refused: unknown token");
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": err.to_string() })))
                .into_response();
        }
    };

    let serving = connection.open(
        &state.connections,
        state.connection_options(),
        &state.shutdown,
    );
    let events = serving.map(|frame| Ok::<_, Infallible>(frame_event(frame)));
    Sse::new(events).into_response()
}

async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    RpcPayload(payload): RpcPayload,
) -> Result<StatusCode, AppError> {
    let raw_id = query.session_id.ok_or_else(|| AppError::Validation {
        message: "Missing required query parameter 'sessionId'".to_string(),
        docs_hint: None,
    })?;
    let unknown = || AppError::NotFound {
        message: format!("Unknown connection '{raw_id}'"),
    };
    let id = Uuid::parse_str(&raw_id).map_err(|_| unknown())?;

    match state.connections.deliver(id, payload).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(DeliveryError::UnknownConnection) => Err(unknown()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::{Body, BodyDataStream, to_bytes};
    use axum::http::Request;
    use axum::http::header::CONTENT_TYPE;
    use chrono::Utc;
    use serde_json::Value;
    use spacebridge_core::Session;
    use tower::ServiceExt;

    fn state_with_session() -> (AppState, String) {
        let state = AppState::new(Settings::for_tests());
        let session = state.store.insert_session(Session {
            session_token: "c".repeat(64),
            access_token: "atl".to_string(),
            cloud_id: "cloud-1".to_string(),
            site_url: "https://acme.atlassian.net".to_string(),
            space_keys: vec!["ENG".to_string(), "OPS".to_string()],
            created_at: Utc::now(),
        });
        (state, session.session_token.clone())
    }

    async fn next_chunk(stream: &mut BodyDataStream) -> String {
        let chunk = stream
            .next()
            .await
            .expect("stream is open")
            .expect("chunk is readable");
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_with_json_401() {
        let (state, _) = state_with_session();
        let app = router().with_state(state.clone());

        for uri in ["/v1/sse", "/v1/sse?token=nope"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body: Value =
                serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                    .unwrap();
            assert_eq!(body, json!({ "error": "Invalid token" }));
        }
        assert!(state.connections.is_empty());
    }

    #[tokio::test]
    async fn stream_announces_endpoint_and_carries_tool_results() {
        let (state, token) = state_with_session();
        let app = router().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/sse?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");

        let mut stream = response.into_body().into_data_stream();
        let endpoint = next_chunk(&mut stream).await;
        assert!(endpoint.starts_with("event: endpoint\ndata: /v1/messages?sessionId="));
        let path = endpoint
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("endpoint data line")
            .to_string();
        assert_eq!(state.connections.len(), 1);

        let accepted = app
            .oneshot(post_json(
                &path,
                json!({
                    "jsonrpc": "2.0",
                    "id": 3,
                    "method": "tools/call",
                    "params": { "name": "list_spaces" }
                })
                .to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);

        let message = next_chunk(&mut stream).await;
        assert!(message.starts_with("event: message\n"));
        assert!(message.contains("Accessible spaces: ENG, OPS"));

        drop(stream);
        for _ in 0..100 {
            if state.connections.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("connection was not deregistered after the client went away");
    }

    #[tokio::test]
    async fn messages_for_unknown_connection_are_not_found() {
        let (state, _) = state_with_session();
        let app = router().with_state(state);

        for uri in [
            format!("/v1/messages?sessionId={}", Uuid::new_v4()),
            "/v1/messages?sessionId=not-a-uuid".to_string(),
        ] {
            let response = app
                .clone()
                .oneshot(post_json(&uri, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn malformed_message_bodies_are_bad_requests() {
        let (state, _) = state_with_session();
        let app = router().with_state(state);

        let bad_json = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/messages?sessionId={}", Uuid::new_v4()),
                "{not json",
            ))
            .await
            .unwrap();
        assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
        let body: Value =
            serde_json::from_slice(&to_bytes(bad_json.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(body["error"], "validation_failed");
        assert!(body["request_id"].is_string());

        let missing_id = app
            .oneshot(post_json("/v1/messages", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);
    }
}
