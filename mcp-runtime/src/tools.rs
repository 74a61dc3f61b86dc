//! Tool capability registry and handlers.
//!
//! The tool set is closed: adding a tool means adding a `Tool` variant, and
//! the compiler then points at every match that needs a new arm. The dispatch
//! loop only ever talks to `Tool::descriptor` and `call_tool`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use spacebridge_core::Session;

use crate::jira::{DownstreamApiError, JiraClient};
use crate::jql;

pub const DEFAULT_MAX_RESULTS: u64 = 20;
/// Jira Cloud never returns more than 100 issues per search page.
pub const MAX_RESULTS_CEILING: u64 = 100;
pub const DEFAULT_ISSUE_TYPE: &str = "Task";
/// Enhanced JQL search; the legacy `/search` resource is gone from Jira Cloud.
pub const SEARCH_PATH: &str = "/search/jql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    SearchIssuesAcrossSpaces,
    CreateIssue,
    ListSpaces,
}

/// Entry of a `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// Payload of a `tools/call` result: `{"content": [{"type": "text", "text": ...}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ContentBlock>,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn from_error(err: &ToolError) -> Self {
        Self::text(format!("Error: {err}"))
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "content": [] }))
    }
}

/// Per-call failure. Always reported in-band as result text, never as a
/// channel error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{message}")]
    InvalidArgument { field: String, message: String },
    #[error(transparent)]
    Downstream(#[from] DownstreamApiError),
    #[error("Unexpected response from Jira: {0}")]
    UnexpectedResponse(String),
}

impl ToolError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArgument { .. } => "validation_failed",
            ToolError::Downstream(_) => "downstream_api_error",
            ToolError::UnexpectedResponse(_) => "unexpected_response",
        }
    }
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::SearchIssuesAcrossSpaces, Tool::CreateIssue, Tool::ListSpaces];

    pub fn name(self) -> &'static str {
        match self {
            Tool::SearchIssuesAcrossSpaces => "search_issues_across_spaces",
            Tool::CreateIssue => "create_issue",
            Tool::ListSpaces => "list_spaces",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn descriptor(self) -> ToolDescriptor {
        match self {
            Tool::SearchIssuesAcrossSpaces => ToolDescriptor {
                name: self.name(),
                description: "Search issues in all accessible Jira spaces",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search text" },
                        "maxResults": { "type": "number", "default": DEFAULT_MAX_RESULTS }
                    },
                    "required": ["query"]
                }),
            },
            Tool::CreateIssue => ToolDescriptor {
                name: self.name(),
                description: "Create a new issue",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "projectKey": { "type": "string" },
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "issueType": { "type": "string", "default": DEFAULT_ISSUE_TYPE }
                    },
                    "required": ["projectKey", "summary"]
                }),
            },
            Tool::ListSpaces => ToolDescriptor {
                name: self.name(),
                description: "List all accessible spaces",
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        }
    }

    pub async fn invoke(
        self,
        jira: &JiraClient,
        session: &Session,
        args: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        match self {
            Tool::SearchIssuesAcrossSpaces => search_issues_across_spaces(jira, session, args).await,
            Tool::CreateIssue => create_issue(jira, session, args).await,
            Tool::ListSpaces => Ok(list_spaces(session)),
        }
    }
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    Tool::ALL.into_iter().map(Tool::descriptor).collect()
}

/// Resolve and run a tool by name. Callers render errors with
/// `ToolCallResult::from_error`.
pub async fn call_tool(
    jira: &JiraClient,
    session: &Session,
    name: &str,
    args: &Map<String, Value>,
) -> Result<ToolCallResult, ToolError> {
    let tool = Tool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
    tool.invoke(jira, session, args)
        .await
        .map(ToolCallResult::text)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<NamedRef>,
    #[serde(default)]
    project: Option<KeyedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeyedRef {
    #[serde(default)]
    key: String,
}

/// One search hit as reported back to the agent.
#[derive(Debug, Serialize)]
struct IssueSummary {
    key: String,
    summary: String,
    status: String,
    project: String,
    url: String,
}

async fn search_issues_across_spaces(
    jira: &JiraClient,
    session: &Session,
    args: &Map<String, Value>,
) -> Result<String, ToolError> {
    let query = required_string(args, "query")?;
    let max_results = match arg_optional_u64(args, "maxResults")? {
        None | Some(0) => DEFAULT_MAX_RESULTS,
        Some(n) => n.min(MAX_RESULTS_CEILING),
    };

    let jql = jql::text_search(&query, &session.space_keys);
    let body = jira
        .get(
            session.into(),
            SEARCH_PATH,
            &[
                ("jql", jql),
                ("maxResults", max_results.to_string()),
                ("fields", "summary,status,project".to_string()),
            ],
        )
        .await?;

    let response: SearchResponse = serde_json::from_value(body)
        .map_err(|err| ToolError::UnexpectedResponse(err.to_string()))?;

    let issues: Vec<IssueSummary> = response
        .issues
        .into_iter()
        .map(|issue| IssueSummary {
            url: session.browse_url(&issue.key),
            summary: issue.fields.summary.unwrap_or_default(),
            status: issue.fields.status.map(|s| s.name).unwrap_or_default(),
            project: issue.fields.project.map(|p| p.key).unwrap_or_default(),
            key: issue.key,
        })
        .collect();

    if issues.is_empty() {
        return Ok("No issues found matching your search.".to_string());
    }

    let listing = serde_json::to_string_pretty(&issues)
        .map_err(|err| ToolError::UnexpectedResponse(err.to_string()))?;
    Ok(format!("Found {} issues:\n\n{listing}", issues.len()))
}

/// Jira Cloud v3 only accepts rich text as an Atlassian Document Format tree.
fn plain_text_document(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": text }]
        }]
    })
}

fn create_issue_payload(project_key: &str, summary: &str, description: &str, issue_type: &str) -> Value {
    json!({
        "fields": {
            "project": { "key": project_key },
            "summary": summary,
            "description": plain_text_document(description),
            "issuetype": { "name": issue_type }
        }
    })
}

async fn create_issue(
    jira: &JiraClient,
    session: &Session,
    args: &Map<String, Value>,
) -> Result<String, ToolError> {
    let project_key = required_string(args, "projectKey")?;
    let summary = required_string(args, "summary")?;
    let description = arg_string(args, "description", "")?;
    let issue_type = arg_optional_string(args, "issueType")?
        .unwrap_or_else(|| DEFAULT_ISSUE_TYPE.to_string());

    let payload = create_issue_payload(&project_key, &summary, &description, &issue_type);
    let created = jira.post(session.into(), "/issue", &payload).await?;

    let key = created
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::UnexpectedResponse("created issue has no key".to_string()))?;

    Ok(format!(
        "Created issue: {key}\nURL: {}",
        session.browse_url(key)
    ))
}

fn list_spaces(session: &Session) -> String {
    format!("Accessible spaces: {}", session.space_keys.join(", "))
}

fn arg_string(args: &Map<String, Value>, key: &str, default: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(v)) => Ok(v.clone()),
        Some(_) => Err(ToolError::invalid(key, format!("'{key}' must be a string"))),
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args
        .get(key)
        .ok_or_else(|| ToolError::invalid(key, format!("Missing required field '{key}'")))?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::invalid(key, format!("'{key}' must not be empty"))),
        _ => Err(ToolError::invalid(key, format!("'{key}' must be a string"))),
    }
}

fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolError::invalid(key, format!("'{key}' must be a string"))),
    }
}

/// Schema type is `number`, so whole floats like `5.0` are accepted too.
fn arg_optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolError> {
    let not_unsigned = || ToolError::invalid(key, format!("'{key}' must be a non-negative integer"));
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return Ok(Some(v));
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(Some(f as u64)),
                _ => Err(not_unsigned()),
            }
        }
        Some(_) => Err(not_unsigned()),
    }
}
