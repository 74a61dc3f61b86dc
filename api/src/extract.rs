//! Request extractors that turn raw requests into domain inputs, rejecting
//! with structured `AppError` bodies.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum::http::request::Parts;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// Externally visible origin of this server, e.g. `https://bridge.example.com`.
///
/// `PUBLIC_BASE_URL` wins when set; otherwise it is derived from the
/// forwarding headers a TLS-terminating proxy sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicBaseUrl(pub String);

impl FromRequestParts<AppState> for PublicBaseUrl {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let base = state
            .settings
            .public_base_url()
            .unwrap_or_else(|| request_base_url(&parts.headers, state.settings.port));
        Ok(PublicBaseUrl(base))
    }
}

pub fn request_base_url(headers: &HeaderMap, port: u16) -> String {
    let forwarded_proto = first_header_token(headers, "x-forwarded-proto");
    let forwarded_host = first_header_token(headers, "x-forwarded-host");
    let host = forwarded_host.or_else(|| {
        headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
    });

    if let Some(host) = host {
        let proto = forwarded_proto.unwrap_or_else(|| {
            if host.contains("localhost") || host.starts_with("127.0.0.1") {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });
        return format!("{}://{}", proto.trim_end_matches(':'), host);
    }

    format!("http://localhost:{port}")
}

pub fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// A JSON-RPC payload posted by a client, accepted regardless of the
/// declared content type.
#[derive(Debug)]
pub struct RpcPayload(pub Value);

impl<S> FromRequest<S> for RpcPayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation {
                message: format!("Unreadable request body: {}", rejection.body_text()),
                docs_hint: None,
            })?;
        serde_json::from_slice(&body)
            .map(RpcPayload)
            .map_err(|err| AppError::Validation {
                message: format!("Invalid JSON-RPC payload: {err}"),
                docs_hint: Some(
                    "POST a JSON-RPC 2.0 object or batch array to the endpoint announced on the stream."
                        .to_string(),
                ),
            })
    }
}
