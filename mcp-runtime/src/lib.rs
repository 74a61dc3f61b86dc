//! MCP surface of spacebridge: the Jira REST client, the tool registry, the
//! JSON-RPC dispatcher and the per-connection streaming loop.

pub mod connection;
pub mod jira;
pub mod jql;
pub mod server;
pub mod tools;

pub use connection::{
    AuthenticatedConnection, ConnectionOptions, ConnectionRegistry, DeliveryError, Frame,
    ServingConnection,
};
pub use jira::{DownstreamApiError, JiraClient};
pub use server::McpDispatcher;
pub use tools::{Tool, ToolCallResult, ToolDescriptor, ToolError};
