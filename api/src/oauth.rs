//! Atlassian OAuth 2.0 (3LO) authorization-code flow.
//!
//! `begin_authorization` records a single-use `state` and builds the consent
//! URL; `complete_authorization` consumes that state, exchanges the code,
//! picks a Jira site, snapshots its project keys and mints a session.

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use spacebridge_core::auth::{generate_session_token, token_fingerprint};
use spacebridge_core::{CredentialStore, Session};
use spacebridge_mcp_runtime::jira::{DownstreamApiError, JiraClient, JiraTarget};
use url::Url;

use crate::config::{OAuthClient, Settings};

pub const OAUTH_SCOPES: &str = "read:jira-work write:jira-work read:jira-user offline_access";
pub const OAUTH_AUDIENCE: &str = "api.atlassian.com";
pub const CALLBACK_PATH: &str = "/auth/callback";
pub const SSE_PATH: &str = "/v1/sse";

/// A consent round trip must finish within this window.
pub const PENDING_AUTHORIZATION_TTL_MINUTES: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum AuthFlowError {
    #[error("OAuth is not configured (missing {})", .missing.join(", "))]
    Configuration { missing: Vec<&'static str> },
    #[error("Invalid state")]
    InvalidState,
    #[error("{0}")]
    AuthExchange(String),
    #[error("No Jira sites found")]
    NoAccessibleWorkspace,
    #[error("{0}")]
    AuthenticationFailed(String),
}

impl From<DownstreamApiError> for AuthFlowError {
    fn from(err: DownstreamApiError) -> Self {
        AuthFlowError::AuthenticationFailed(err.provider_message)
    }
}

impl AuthFlowError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthFlowError::Configuration { .. } => "configuration",
            AuthFlowError::InvalidState => "invalid_state",
            AuthFlowError::AuthExchange(_) => "auth_exchange",
            AuthFlowError::NoAccessibleWorkspace => "no_accessible_workspace",
            AuthFlowError::AuthenticationFailed(_) => "authentication_failed",
        }
    }
}

/// One entry of `/oauth/token/accessible-resources`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessibleResource {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
}

/// Which Jira site a multi-site grant binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkspaceSelection {
    /// The first site Atlassian lists.
    #[default]
    FirstAccessible,
}

impl WorkspaceSelection {
    pub fn select(self, resources: Vec<AccessibleResource>) -> Option<AccessibleResource> {
        match self {
            WorkspaceSelection::FirstAccessible => resources.into_iter().next(),
        }
    }
}

/// Query parameters Atlassian sends back to the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizedSession {
    pub session_token: String,
    pub connection_url: String,
    pub space_keys: Vec<String>,
    pub space_count: usize,
    pub site_name: String,
    pub site_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    key: String,
}

#[derive(Debug)]
pub struct AuthorizationFlow {
    http: reqwest::Client,
    store: CredentialStore,
    jira: JiraClient,
    client: Result<OAuthClient, Vec<&'static str>>,
    auth_base: String,
    selection: WorkspaceSelection,
    pending_ttl: Duration,
}

impl AuthorizationFlow {
    pub fn new(settings: &Settings, store: CredentialStore, jira: JiraClient) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            jira,
            client: settings.oauth_client(),
            auth_base: settings.atlassian_auth_url.trim_end_matches('/').to_string(),
            selection: WorkspaceSelection::default(),
            pending_ttl: Duration::minutes(PENDING_AUTHORIZATION_TTL_MINUTES),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_ok()
    }

    pub fn callback_url(base_url: &str) -> String {
        format!("{base_url}{CALLBACK_PATH}")
    }

    fn oauth_client(&self) -> Result<&OAuthClient, AuthFlowError> {
        self.client
            .as_ref()
            .map_err(|missing| AuthFlowError::Configuration {
                missing: missing.clone(),
            })
    }

    /// Record a pending authorization and return the consent URL to redirect to.
    pub fn begin_authorization(&self, base_url: &str) -> Result<Url, AuthFlowError> {
        let client = self.oauth_client()?;
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base))
            .map_err(|err| {
                AuthFlowError::AuthenticationFailed(format!("Invalid authorize URL: {err}"))
            })?;

        let state = self.store.begin_authorization(Utc::now());
        url.query_pairs_mut()
            .append_pair("audience", OAUTH_AUDIENCE)
            .append_pair("client_id", &client.client_id)
            .append_pair("scope", OAUTH_SCOPES)
            .append_pair("redirect_uri", &Self::callback_url(base_url))
            .append_pair("state", &state)
            .append_pair("response_type", "code")
            .append_pair("prompt", "consent");

        tracing::info!(
            event = "oauth_flow_started",
            state = %token_fingerprint(&state),
            "Redirecting to Atlassian consent"
        );
        Ok(url)
    }

    pub async fn complete_authorization(
        &self,
        params: CallbackParams,
        base_url: &str,
    ) -> Result<AuthorizedSession, AuthFlowError> {
        let result = self.complete(params, base_url).await;
        match &result {
            Ok(authorized) => tracing::info!(
                event = "oauth_flow_completed",
                session = %token_fingerprint(&authorized.session_token),
                site = %authorized.site_url,
                space_count = authorized.space_count,
                "Session issued"
            ),
            Err(err) => tracing::warn!(
                event = "oauth_flow_failed",
                kind = err.kind(),
                error = %err,
                "Authorization callback failed"
            ),
        }
        result
    }

    async fn complete(
        &self,
        params: CallbackParams,
        base_url: &str,
    ) -> Result<AuthorizedSession, AuthFlowError> {
        let state = params
            .state
            .as_deref()
            .map(str::trim)
            .filter(|state| !state.is_empty())
            .ok_or(AuthFlowError::InvalidState)?;
        let pending = self
            .store
            .take_pending(state)
            .ok_or(AuthFlowError::InvalidState)?;
        if Utc::now() - pending.created_at > self.pending_ttl {
            return Err(AuthFlowError::InvalidState);
        }

        if let Some(error) = params.error {
            return Err(AuthFlowError::AuthenticationFailed(
                params.error_description.unwrap_or(error),
            ));
        }
        let code = params
            .code
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| AuthFlowError::AuthExchange("Missing authorization code".to_string()))?;

        let client = self.oauth_client()?;
        let access_token = self
            .exchange_code(client, &code, &Self::callback_url(base_url))
            .await?;

        let resources = self.accessible_resources(&access_token).await?;
        let site = self
            .selection
            .select(resources)
            .ok_or(AuthFlowError::NoAccessibleWorkspace)?;

        let projects = self
            .jira
            .get(
                JiraTarget {
                    access_token: &access_token,
                    cloud_id: &site.id,
                },
                "/project",
                &[],
            )
            .await?;
        let projects: Vec<ProjectRef> = serde_json::from_value(projects).map_err(|err| {
            AuthFlowError::AuthenticationFailed(format!("Unexpected project list: {err}"))
        })?;
        let space_keys: Vec<String> = projects.into_iter().map(|p| p.key).collect();

        let session = self.store.insert_session(Session {
            session_token: generate_session_token(),
            access_token,
            cloud_id: site.id,
            site_url: site.url.clone(),
            space_keys: space_keys.clone(),
            created_at: Utc::now(),
        });

        Ok(AuthorizedSession {
            connection_url: format!("{base_url}{SSE_PATH}?token={}", session.session_token),
            session_token: session.session_token.clone(),
            space_count: space_keys.len(),
            space_keys,
            site_name: site.name,
            site_url: site.url,
        })
    }

    async fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthFlowError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.auth_base))
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": client.client_id,
                "client_secret": client.client_secret,
                "code": code,
                "redirect_uri": redirect_uri,
            }))
            .send()
            .await
            .map_err(|err| AuthFlowError::AuthExchange(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(AuthFlowError::AuthExchange(oauth_error_message(
                status.as_u16(),
                &body,
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthFlowError::AuthExchange(err.to_string()))?;
        Ok(token.access_token)
    }

    async fn accessible_resources(
        &self,
        access_token: &str,
    ) -> Result<Vec<AccessibleResource>, AuthFlowError> {
        let response = self
            .http
            .get(format!(
                "{}/oauth/token/accessible-resources",
                self.jira.api_gateway()
            ))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| AuthFlowError::AuthExchange(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(AuthFlowError::AuthExchange(oauth_error_message(
                status.as_u16(),
                &body,
            )));
        }

        response
            .json()
            .await
            .map_err(|err| AuthFlowError::AuthExchange(err.to_string()))
    }
}

fn oauth_error_message(status: u16, body: &Value) -> String {
    ["error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("Request failed with status code {status}"))
}
