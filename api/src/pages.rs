//! Server-rendered HTML for the browser half of the flow.

use spacebridge_mcp_runtime::tools::tool_descriptors;

use crate::oauth::AuthorizedSession;

const STYLE: &str = r#"<style>
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; max-width: 640px; margin: 50px auto; padding: 0 20px; color: #172B4D; }
h2 { color: #42526E; margin-top: 30px; }
.button { background: #0052CC; color: #fff; padding: 12px 24px; text-decoration: none; border-radius: 5px; display: inline-block; margin: 20px 0; }
.button:hover { background: #0747A6; }
.success { background: #00875A; color: #fff; padding: 20px; border-radius: 5px; }
.url { background: #f4f4f4; padding: 15px; border-radius: 5px; word-break: break-all; }
code { font-family: 'Courier New', monospace; }
.muted { color: #6B778C; font-size: 0.9em; }
</style>"#;

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
{STYLE}
</head>
<body>
{body}
</body>
</html>"#,
        title = html_escape(title),
    )
}

pub fn render_landing() -> String {
    let tools: String = tool_descriptors()
        .iter()
        .map(|tool| {
            format!(
                "<li><code>{}</code> - {}</li>\n",
                html_escape(tool.name),
                html_escape(tool.description)
            )
        })
        .collect();

    page(
        "Multi-Space Jira MCP Server",
        &format!(
            r#"<h1>Multi-Space Jira MCP Server</h1>
<p>Connect an MCP client to every Jira space you can see, with a single authorization.</p>
<a href="/auth/start" class="button">Connect to Jira</a>
<h2>Setup</h2>
<ol>
<li>Click "Connect to Jira" above</li>
<li>Log in with your Atlassian account and grant access</li>
<li>Copy the generated connection URL</li>
<li>Add it to your MCP client's integrations</li>
</ol>
<h2>Available tools</h2>
<ul>
{tools}</ul>"#
        ),
    )
}

pub fn render_setup_guide(callback_url: &str, missing: &[&str]) -> String {
    let vars: String = missing
        .iter()
        .map(|name| format!("<li><code>{}</code></li>\n", html_escape(name)))
        .collect();

    page(
        "OAuth Not Configured",
        &format!(
            r#"<h2>OAuth Not Configured</h2>
<p>This server needs Atlassian OAuth 2.0 (3LO) credentials before it can connect to Jira:</p>
<ol>
<li>Open the <a href="https://developer.atlassian.com/console/myapps/" target="_blank" rel="noopener">Atlassian Developer Console</a></li>
<li>Create an app and add the OAuth 2.0 (3LO) integration</li>
<li>Set the callback URL to <code>{callback}</code></li>
<li>Set these environment variables:
<ul>
{vars}</ul>
</li>
<li>Restart the server and try again</li>
</ol>"#,
            callback = html_escape(callback_url),
        ),
    )
}

pub fn render_success(authorized: &AuthorizedSession) -> String {
    let site = if authorized.site_name.is_empty() {
        &authorized.site_url
    } else {
        &authorized.site_name
    };

    page(
        "Connected",
        &format!(
            r#"<div class="success">
<h2>Successfully connected</h2>
<p>Found {count} accessible Jira projects on {site}</p>
</div>
<h3>Your MCP connection URL</h3>
<div class="url"><code id="url">{url}</code></div>
<h3>Next steps</h3>
<ol>
<li>Copy the URL above</li>
<li>Add it as an MCP integration in your client (for example <a href="https://claude.ai" target="_blank" rel="noopener">claude.ai</a>)</li>
<li>Keep it private: anyone holding it can act on your Jira spaces until it is revoked</li>
</ol>
<p class="muted">Accessible spaces: {spaces}</p>"#,
            count = authorized.space_count,
            site = html_escape(site),
            url = html_escape(&authorized.connection_url),
            spaces = html_escape(&authorized.space_keys.join(", ")),
        ),
    )
}
