use reqwest::Method;
use serde_json::Value;
use spacebridge_core::Session;

pub const DEFAULT_API_GATEWAY: &str = "https://api.atlassian.com";

/// A Jira REST call failed: non-2xx status, unreachable host, or unreadable body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider_message}")]
pub struct DownstreamApiError {
    /// HTTP status when a response arrived; `None` for transport failures.
    pub status: Option<u16>,
    pub provider_message: String,
}

impl DownstreamApiError {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            status: None,
            provider_message: err.to_string(),
        }
    }

    fn from_response(status: u16, body: &Value) -> Self {
        Self {
            status: Some(status),
            provider_message: provider_message(status, body),
        }
    }
}

/// Credential and site a Jira call is made against.
#[derive(Debug, Clone, Copy)]
pub struct JiraTarget<'a> {
    pub access_token: &'a str,
    pub cloud_id: &'a str,
}

impl<'a> From<&'a Session> for JiraTarget<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            access_token: &session.access_token,
            cloud_id: &session.cloud_id,
        }
    }
}

/// Thin signing wrapper around the Jira Cloud REST API (v3) reached through
/// the Atlassian API gateway.
#[derive(Debug, Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    api_gateway: String,
}

impl Default for JiraClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_GATEWAY)
    }
}

impl JiraClient {
    pub fn new(api_gateway: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), api_gateway)
    }

    pub fn with_http(http: reqwest::Client, api_gateway: impl Into<String>) -> Self {
        let api_gateway = api_gateway.into().trim_end_matches('/').to_string();
        Self { http, api_gateway }
    }

    pub fn api_gateway(&self) -> &str {
        &self.api_gateway
    }

    /// `<gateway>/ex/jira/<cloud id>/rest/api/3`
    pub fn api_base(&self, cloud_id: &str) -> String {
        format!("{}/ex/jira/{cloud_id}/rest/api/3", self.api_gateway)
    }

    pub async fn call(
        &self,
        target: JiraTarget<'_>,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, DownstreamApiError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let url = format!("{}{}", self.api_base(target.cloud_id), path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(target.access_token)
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = std::time::Instant::now();
        let response = request.send().await.map_err(|err| {
            tracing::warn!(
                event = "jira_request_failed",
                method = %method,
                path = %path,
                error = %err,
                "Jira request could not be sent"
            );
            DownstreamApiError::transport(err)
        })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(DownstreamApiError::transport)?;
        let body = parse_response_body(&bytes);

        tracing::debug!(
            event = "jira_request",
            method = %method,
            path = %path,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Jira request completed"
        );

        if !(200..=299).contains(&status) {
            return Err(DownstreamApiError::from_response(status, &body));
        }
        Ok(body)
    }

    pub async fn get(
        &self,
        target: JiraTarget<'_>,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, DownstreamApiError> {
        self.call(target, Method::GET, path, query, None).await
    }

    pub async fn post(
        &self,
        target: JiraTarget<'_>,
        path: &str,
        body: &Value,
    ) -> Result<Value, DownstreamApiError> {
        self.call(target, Method::POST, path, &[], Some(body)).await
    }
}

fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Best human-readable message from a Jira error body.
///
/// Jira reports failures as `{"errorMessages": [..], "errors": {field: msg}}`.
fn provider_message(status: u16, body: &Value) -> String {
    let joined_messages = body
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty());
    if let Some(joined) = joined_messages {
        return joined;
    }

    let joined_field_errors = body
        .get("errors")
        .and_then(Value::as_object)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|(field, message)| {
                    message.as_str().map(|message| format!("{field}: {message}"))
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty());
    if let Some(joined) = joined_field_errors {
        return joined;
    }

    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }

    format!("Request failed with status code {status}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_session, spawn_stub};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn api_base_embeds_cloud_id() {
        let client = JiraClient::new("https://api.atlassian.com/");
        assert_eq!(
            client.api_base("abc-123"),
            "https://api.atlassian.com/ex/jira/abc-123/rest/api/3"
        );
    }

    #[test]
    fn provider_message_prefers_error_messages() {
        let body = json!({
            "errorMessages": ["Project does not exist", "Try again"],
            "errors": { "summary": "required" }
        });
        assert_eq!(
            provider_message(400, &body),
            "Project does not exist, Try again"
        );
    }

    #[test]
    fn provider_message_falls_back_to_field_errors_then_status() {
        let body = json!({ "errorMessages": [], "errors": { "summary": "required" } });
        assert_eq!(provider_message(400, &body), "summary: required");
        assert_eq!(
            provider_message(502, &Value::Null),
            "Request failed with status code 502"
        );
    }

    #[tokio::test]
    async fn call_signs_requests_with_session_bearer_token() {
        let app = Router::new().route(
            "/ex/jira/cloud-1/rest/api/3/myself",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({ "authorization": auth }))
            }),
        );
        let base = spawn_stub(app).await;
        let client = JiraClient::new(base);
        let session = sample_session(&["ENG"]);

        let body = client
            .get((&session).into(), "/myself", &[])
            .await
            .expect("stub call should succeed");

        assert_eq!(body["authorization"], "Bearer access-token-1");
    }

    #[tokio::test]
    async fn non_success_status_becomes_downstream_error() {
        let app = Router::new().route(
            "/ex/jira/cloud-1/rest/api/3/issue/NOPE-1",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "errorMessages": ["Issue does not exist or you do not have permission to see it."] })),
                )
            }),
        );
        let base = spawn_stub(app).await;
        let client = JiraClient::new(base);
        let session = sample_session(&["ENG"]);

        let err = client
            .get((&session).into(), "issue/NOPE-1", &[])
            .await
            .expect_err("404 must fail");

        assert_eq!(err.status, Some(404));
        assert_eq!(
            err.provider_message,
            "Issue does not exist or you do not have permission to see it."
        );
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let client = JiraClient::new("http://127.0.0.1:9");
        let session = sample_session(&["ENG"]);

        let err = client
            .get((&session).into(), "/project", &[])
            .await
            .expect_err("nothing listens on port 9");

        assert_eq!(err.status, None);
        assert!(!err.provider_message.is_empty());
    }
}
