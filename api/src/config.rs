use std::time::Duration;

use clap::Parser;

/// Runtime settings, read from flags or the environment (`.env` included).
#[derive(Debug, Clone, Parser)]
#[command(name = "spacebridge", version, about = "Jira MCP bridge over server-sent events")]
pub struct Settings {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "ATLASSIAN_CLIENT_ID")]
    pub atlassian_client_id: Option<String>,

    #[arg(long, env = "ATLASSIAN_CLIENT_SECRET", hide_env_values = true)]
    pub atlassian_client_secret: Option<String>,

    /// Accepted for deployment parity; no cookie-backed state uses it yet.
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Overrides the base URL derived from forwarding headers.
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    #[arg(long, env = "ATLASSIAN_AUTH_URL", default_value = "https://auth.atlassian.com")]
    pub atlassian_auth_url: String,

    #[arg(long, env = "ATLASSIAN_API_URL", default_value = "https://api.atlassian.com")]
    pub atlassian_api_url: String,

    /// Comma-separated browser origins allowed by CORS.
    #[arg(long, env = "SPACEBRIDGE_CORS_ORIGINS", default_value = "http://localhost:3000")]
    pub cors_origins: String,

    #[arg(long, env = "SPACEBRIDGE_REQUIRE_HTTPS", default_value_t = false)]
    pub require_https: bool,

    #[arg(long, env = "SESSION_MAX_AGE_SECS", default_value_t = 86_400)]
    pub session_max_age_secs: u64,

    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 3_600)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,
}

impl Settings {
    /// Client credentials, or the names of the variables that are unset.
    pub fn oauth_client(&self) -> Result<OAuthClient, Vec<&'static str>> {
        let id = non_empty(&self.atlassian_client_id);
        let secret = non_empty(&self.atlassian_client_secret);
        match (id, secret) {
            (Some(id), Some(secret)) => Ok(OAuthClient {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            }),
            (id, secret) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push("ATLASSIAN_CLIENT_ID");
                }
                if secret.is_none() {
                    missing.push("ATLASSIAN_CLIENT_SECRET");
                }
                Err(missing)
            }
        }
    }

    pub fn public_base_url(&self) -> Option<String> {
        non_empty(&self.public_base_url).map(|url| url.trim_end_matches('/').to_string())
    }

    pub fn session_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.session_max_age_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
impl Settings {
    /// Defaults with no environment involved.
    pub fn for_tests() -> Self {
        Self::parse_from(["spacebridge"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::parse_from(["spacebridge"]);
        assert_eq!(settings.atlassian_auth_url, "https://auth.atlassian.com");
        assert_eq!(settings.atlassian_api_url, "https://api.atlassian.com");
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(settings.session_max_age(), chrono::Duration::hours(24));
    }

    #[test]
    fn oauth_client_lists_every_missing_variable() {
        let mut settings = Settings::parse_from(["spacebridge"]);
        settings.atlassian_client_id = None;
        settings.atlassian_client_secret = Some("  ".to_string());
        assert_eq!(
            settings.oauth_client().unwrap_err(),
            vec!["ATLASSIAN_CLIENT_ID", "ATLASSIAN_CLIENT_SECRET"]
        );

        settings.atlassian_client_id = Some("cid".to_string());
        settings.atlassian_client_secret = Some("hunter2".to_string());
        let client = settings.oauth_client().expect("both set");
        assert_eq!(client.client_id, "cid");
        assert!(!format!("{client:?}").contains("hunter2"));
    }

    #[test]
    fn public_base_url_drops_trailing_slash() {
        let settings =
            Settings::parse_from(["spacebridge", "--public-base-url", "https://bridge.example.com/"]);
        assert_eq!(
            settings.public_base_url().as_deref(),
            Some("https://bridge.example.com")
        );
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let settings = Settings::parse_from([
            "spacebridge",
            "--cors-origins",
            "https://a.example, ,https://b.example",
        ]);
        assert_eq!(
            settings.cors_origins(),
            vec!["https://a.example", "https://b.example"]
        );
    }
}
