use std::fmt;

use chrono::{DateTime, Utc};

/// Single-use CSRF guard for one OAuth redirect round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// Binds an opaque client-held token to a Jira access credential and the
/// spaces that credential can reach. Immutable once stored.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub session_token: String,
    pub access_token: String,
    /// Atlassian cloud id of the selected Jira site.
    pub cloud_id: String,
    /// Browser-facing site URL, e.g. `https://acme.atlassian.net`.
    pub site_url: String,
    /// Project keys visible at authorization time, in the order Jira listed them.
    pub space_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Browse URL for an issue key on this session's site.
    pub fn browse_url(&self, issue_key: &str) -> String {
        format!("{}/browse/{issue_key}", self.site_url.trim_end_matches('/'))
    }
}

// Credentials stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_token", &crate::auth::token_fingerprint(&self.session_token))
            .field("access_token", &"<redacted>")
            .field("cloud_id", &self.cloud_id)
            .field("site_url", &self.site_url)
            .field("space_keys", &self.space_keys)
            .field("created_at", &self.created_at)
            .finish()
    }
}
