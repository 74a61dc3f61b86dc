use std::sync::Arc;

use spacebridge_core::CredentialStore;
use spacebridge_mcp_runtime::{ConnectionOptions, ConnectionRegistry, JiraClient};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::oauth::AuthorizationFlow;

#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub connections: ConnectionRegistry,
    pub flow: Arc<AuthorizationFlow>,
    pub jira: JiraClient,
    pub settings: Arc<Settings>,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let store = CredentialStore::new();
        let jira = JiraClient::new(settings.atlassian_api_url.clone());
        let flow = AuthorizationFlow::new(&settings, store.clone(), jira.clone());
        Self {
            store,
            connections: ConnectionRegistry::new(),
            flow: Arc::new(flow),
            jira,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            heartbeat_interval: self.settings.heartbeat_interval(),
            ..ConnectionOptions::default()
        }
    }
}
