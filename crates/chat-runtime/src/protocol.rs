//! Tool-server reply parsing
//!
//! Server traffic is typed with `rust-mcp-schema`; this module pulls the
//! `result` out of a reply and flattens it into the `chat-core` records.

use chat_core::catalog::{PromptArgument, PromptDescriptor, ResourceDescriptor};
use chat_core::error::{AgentError, Result};
use chat_core::session::{PromptMessage, PromptPayload, ResourceContent};
use chat_core::tool::{ToolContent, ToolDescriptor, ToolOutput};
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, ContentBlock, GetPromptResult, InitializeResult, Prompt, ReadResourceResult,
    Resource, RpcError, Tool,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult> {
    let result: InitializeResult = parse_response(message)
        .map_err(|e| AgentError::Protocol(format!("malformed initialize result: {e}")))?;
    if result.protocol_version.trim().is_empty() {
        return Err(AgentError::Protocol(
            "initialize result has no protocolVersion".into(),
        ));
    }
    Ok(result)
}

pub(crate) fn parse_response<T: DeserializeOwned>(message: ServerMessage) -> Result<T> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|e| AgentError::Protocol(e.to_string()))
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(AgentError::from)
        }
        ServerMessage::Error(error) => Err(rpc_error(error.error)),
        other => Err(AgentError::Protocol(format!(
            "unexpected tool server message: {other:?}"
        ))),
    }
}

fn rpc_error(error: RpcError) -> AgentError {
    AgentError::Rpc {
        code: error.code,
        message: error.message,
    }
}

pub(crate) fn tool_descriptor(tool: Tool) -> ToolDescriptor {
    let schema = match serde_json::to_value(&tool.input_schema) {
        Ok(schema @ Value::Object(_)) => schema,
        _ => json!({"type": "object", "properties": {}}),
    };
    ToolDescriptor::new(tool.name, tool.description.unwrap_or_default(), schema)
}

pub(crate) fn prompt_descriptor(prompt: Prompt) -> PromptDescriptor {
    // arguments are optional on the wire
    let arguments = serde_json::to_value(&prompt.arguments)
        .ok()
        .and_then(|value| value.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|arg| serde_json::from_value::<rust_mcp_schema::PromptArgument>(arg).ok())
        .map(|arg| PromptArgument {
            name: arg.name,
            description: arg.description,
            required: arg.required.unwrap_or(false),
        })
        .collect();

    PromptDescriptor {
        name: prompt.name,
        description: prompt.description,
        arguments,
    }
}

pub(crate) fn resource_descriptor(resource: Resource) -> ResourceDescriptor {
    let name = if resource.name.trim().is_empty() {
        resource.uri.clone()
    } else {
        resource.name
    };
    ResourceDescriptor {
        name,
        uri: resource.uri,
        description: resource.description,
        mime_type: resource.mime_type,
    }
}

pub(crate) fn tool_output(result: CallToolResult) -> ToolOutput {
    let content = result
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::TextContent(text) => ToolContent::Text {
                text: text.text.clone(),
            },
            other => ToolContent::Other {
                value: serde_json::to_value(other).unwrap_or(Value::Null),
            },
        })
        .collect();

    ToolOutput {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

pub(crate) fn prompt_payload(result: GetPromptResult) -> PromptPayload {
    PromptPayload::Messages(
        result
            .messages
            .iter()
            .map(|message| PromptMessage {
                role: serde_json::to_value(&message.role)
                    .ok()
                    .and_then(|role| role.as_str().map(str::to_string))
                    .unwrap_or_else(|| "user".into()),
                text: prompt_text(&message.content),
            })
            .collect(),
    )
}

/// Text of a prompt message; embedded resources contribute their text
fn prompt_text(content: &ContentBlock) -> String {
    match content {
        ContentBlock::TextContent(text) => text.text.clone(),
        other => {
            let value = serde_json::to_value(other).unwrap_or(Value::Null);
            value
                .pointer("/resource/text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string())
        }
    }
}

pub(crate) fn resource_contents(result: ReadResourceResult) -> Vec<ResourceContent> {
    let contents = serde_json::to_value(&result.contents).unwrap_or(Value::Null);
    contents
        .as_array()
        .map(|items| items.iter().map(resource_content).collect())
        .unwrap_or_default()
}

fn resource_content(item: &Value) -> ResourceContent {
    let uri = item
        .get("uri")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mime_type = item
        .get("mimeType")
        .and_then(Value::as_str)
        .map(str::to_string);

    match item.get("text").and_then(Value::as_str) {
        Some(text) => ResourceContent::Text {
            uri,
            mime_type,
            text: text.to_string(),
        },
        None => ResourceContent::Blob {
            uri,
            mime_type,
            size: item
                .get("blob")
                .and_then(Value::as_str)
                .map_or(0, str::len),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_mcp_schema::{ListPromptsResult, ListToolsResult};

    fn reply(result: Value) -> ServerMessage {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
            .expect("message should parse")
    }

    #[test]
    fn initialize_rejects_blank_protocol_version() {
        let message = reply(json!({
            "capabilities": {},
            "protocolVersion": " ",
            "serverInfo": {"name": "x", "version": "1.0.0"},
        }));

        let err = parse_initialize_result(message).unwrap_err();
        assert!(matches!(err, AgentError::Protocol(msg) if msg.contains("protocolVersion")));
    }

    #[test]
    fn error_reply_becomes_rpc_error() {
        let message: ServerMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -32602, "message": "Unknown prompt: nope"},
        }))
        .unwrap();

        let err = parse_response::<GetPromptResult>(message).unwrap_err();
        assert!(matches!(err, AgentError::Rpc { code: -32602, .. }));
    }

    #[test]
    fn tool_schema_is_kept() {
        let page: ListToolsResult = parse_response(reply(json!({
            "tools": [{"name": "search", "inputSchema": {"type": "object", "required": ["query"]}}],
            "nextCursor": "abc",
        })))
        .unwrap();

        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        let search = tool_descriptor(page.tools.into_iter().next().unwrap());
        assert_eq!(search.description, "");
        assert_eq!(search.input_schema["type"], "object");
        assert_eq!(search.input_schema["required"], json!(["query"]));
    }

    #[test]
    fn prompt_arguments_default_to_optional() {
        let page: ListPromptsResult = parse_response(reply(json!({
            "prompts": [
                {"name": "review", "arguments": [
                    {"name": "code", "required": true},
                    {"name": "style", "description": "Guide to follow"},
                ]},
                {"name": "bare"},
            ],
        })))
        .unwrap();

        let prompts: Vec<_> = page.prompts.into_iter().map(prompt_descriptor).collect();
        assert_eq!(prompts[0].arguments.len(), 2);
        assert!(prompts[0].arguments[0].required);
        assert!(!prompts[0].arguments[1].required);
        assert!(prompts[1].arguments.is_empty());
    }

    #[test]
    fn call_result_keeps_non_text_parts() {
        let result: CallToolResult = parse_response(reply(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
            ],
            "isError": true,
        })))
        .unwrap();

        let output = tool_output(result);
        assert!(output.is_error);
        assert_eq!(output.content.len(), 2);
        assert!(matches!(&output.content[0], ToolContent::Text { text } if text == "line one"));
        assert!(matches!(&output.content[1], ToolContent::Other { .. }));
    }

    #[test]
    fn prompt_messages_flatten_to_text() {
        let result: GetPromptResult = parse_response(reply(json!({
            "description": "Review code",
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "Review this"}},
                {"role": "assistant", "content": {"type": "resource", "resource": {"uri": "file:///a.rs", "text": "fn main() {}"}}},
            ],
        })))
        .unwrap();

        match prompt_payload(result) {
            PromptPayload::Messages(messages) => {
                let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
                assert_eq!(texts, vec!["Review this", "fn main() {}"]);
                assert_eq!(messages[1].role, "assistant");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn resource_contents_split_text_and_blob() {
        let result: ReadResourceResult = parse_response(reply(json!({
            "contents": [
                {"uri": "a://1", "mimeType": "text/plain", "text": "hello"},
                {"uri": "a://2", "blob": "aGVsbG8="},
            ],
        })))
        .unwrap();

        let contents = resource_contents(result);
        assert_eq!(contents[0].render(), "hello");
        assert!(matches!(contents[1], ResourceContent::Blob { size: 8, .. }));
    }
}
