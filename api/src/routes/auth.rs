use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use spacebridge_core::auth::token_fingerprint;

use crate::extract::PublicBaseUrl;
use crate::oauth::{AuthFlowError, AuthorizationFlow, CallbackParams};
use crate::pages;
use crate::state::AppState;

/// The landing page, outside the rate-limited auth surface.
pub fn landing_router() -> Router<AppState> {
    Router::new().route("/", get(landing))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/start", get(start))
        .route("/auth/callback", get(callback))
        .route("/auth/revoke", post(revoke))
}

async fn landing() -> Html<String> {
    Html(pages::render_landing())
}

async fn start(State(state): State<AppState>, PublicBaseUrl(base): PublicBaseUrl) -> Response {
    match state.flow.begin_authorization(&base) {
        Ok(url) => (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response(),
        Err(AuthFlowError::Configuration { missing }) => {
            tracing::warn!(
                event = "oauth_not_configured",
                missing = %missing.join(","),
                "Serving OAuth setup guide"
            );
            Html(pages::render_setup_guide(
                &AuthorizationFlow::callback_url(&base),
                &missing,
            ))
            .into_response()
        }
        Err(err) => callback_failure(err),
    }
}

async fn callback(
    State(state): State<AppState>,
    PublicBaseUrl(base): PublicBaseUrl,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.flow.complete_authorization(params, &base).await {
        Ok(authorized) => Html(pages::render_success(&authorized)).into_response(),
        Err(err) => callback_failure(err),
    }
}

fn callback_failure(err: AuthFlowError) -> Response {
    match err {
        AuthFlowError::InvalidState | AuthFlowError::NoAccessibleWorkspace => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Authentication failed: {other}"),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    token: String,
}

/// Pull `token` out of a JSON or form-encoded body.
fn parse_revoke_request(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let token = if content_type.contains("application/json") {
        serde_json::from_slice::<RevokeRequest>(body).ok()?.token
    } else {
        let params: HashMap<String, String> =
            url::form_urlencoded::parse(body).into_owned().collect();
        params.get("token")?.clone()
    };
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

async fn revoke(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    // RFC 7009: unknown tokens are not an error.
    if let Some(token) = parse_revoke_request(&headers, &body) {
        let revoked = state.store.revoke(&token);
        tracing::info!(
            event = "session_revoked",
            session = %token_fingerprint(&token),
            revoked,
            "Revocation requested"
        );
    }
    StatusCode::OK
}
