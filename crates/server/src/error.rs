//! Errors raised by the tool layer itself.
//!
//! Query and cache failures arrive as [`panorama_core::Error`] and convert
//! into MCP errors on their own; these cover tool-level misuse.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid tool arguments (e.g., an empty project id).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The tool needs a backend this deployment was not started with.
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),

    /// Tool output could not be rendered as JSON.
    #[error("OUTPUT_FAILED: {0}")]
    Output(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::Unsupported(_) => -32010,
            ToolError::Output(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_codes() {
        let mcp: McpError = ToolError::InvalidInput("project_id cannot be empty".into()).into();
        assert_eq!(mcp.code.0, -32602);
        assert!(mcp.message.starts_with("INVALID_INPUT"));

        let mcp: McpError = ToolError::Unsupported("cache_purge".into()).into();
        assert_eq!(mcp.code.0, -32010);
    }
}
