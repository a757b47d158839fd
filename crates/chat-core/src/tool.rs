//! Tool System
//!
//! Tool descriptors as advertised by a tool server, the invocation requests
//! the model emits, and the results fed back into the conversation.

use serde::{Deserialize, Serialize};

/// Tool definition offered to the model.
///
/// Identity is the name; descriptors are immutable once fetched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier within a session
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Parameter summary derived from an input schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Whether this parameter is required
    pub required: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Flatten the schema's top-level properties
    pub fn parameters(&self) -> Vec<ParameterSchema> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        self.input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| ParameterSchema {
                        name: name.clone(),
                        param_type: schema
                            .get("type")
                            .and_then(|t| t.as_str())
                            .unwrap_or("any")
                            .to_string(),
                        required: required.contains(&name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Request id, unique within the turn
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments object
    pub arguments: serde_json::Value,
}

/// Result correlated to a [`ToolInvocation`] by id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the request this answers
    pub id: String,

    /// Tool that was called
    pub name: String,

    /// Whether the output describes a failure
    pub is_error: bool,

    /// Output (tool content or error text)
    pub output: String,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_error: false,
            output: output.into(),
        }
    }

    pub fn failure(id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_error: true,
            output: error.into(),
        }
    }

    /// Fold a session response into a result for `call`
    pub fn from_output(call: &ToolInvocation, output: ToolOutput) -> Self {
        let text = output.render();
        if output.is_error {
            Self::failure(&call.id, &call.name, text)
        } else {
            Self::success(&call.id, &call.name, text)
        }
    }
}

/// One part of what a tool server returned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    /// Anything else (images, embedded resources), kept as sent
    Other { value: serde_json::Value },
}

/// Raw response of a `callTool` round-trip
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,

    /// Tool-side failure reported by the server
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Text parts joined by newlines; other parts as compact JSON
    pub fn render(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ToolContent::Text { text } => text.clone(),
                ToolContent::Other { value } => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameters_follow_schema() {
        let tool = ToolDescriptor::new(
            "search",
            "Search the web",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        );

        let params = tool.parameters();
        assert_eq!(params.len(), 2);
        let query = params.iter().find(|p| p.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.param_type, "string");
        let limit = params.iter().find(|p| p.name == "limit").unwrap();
        assert!(!limit.required);
    }

    #[test]
    fn descriptor_defaults_schema() {
        let tool: ToolDescriptor = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert!(tool.parameters().is_empty());
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn output_render_joins_parts() {
        let output = ToolOutput {
            content: vec![
                ToolContent::Text { text: "first".into() },
                ToolContent::Other { value: json!({"type": "image", "mimeType": "image/png"}) },
                ToolContent::Text { text: "last".into() },
            ],
            is_error: false,
        };

        assert_eq!(
            output.render(),
            "first\n{\"mimeType\":\"image/png\",\"type\":\"image\"}\nlast"
        );
    }

    #[test]
    fn result_keeps_request_correlation() {
        let call = ToolInvocation {
            id: "toolu_7".into(),
            name: "sum".into(),
            arguments: json!({"a": 1, "b": 2}),
        };
        let mut output = ToolOutput::text("3");
        output.is_error = true;

        let result = ToolResult::from_output(&call, output);
        assert_eq!(result.id, "toolu_7");
        assert_eq!(result.name, "sum");
        assert!(result.is_error);
        assert_eq!(result.output, "3");
    }

    #[test]
    fn clean_output_is_a_success() {
        let call = ToolInvocation {
            id: "toolu_8".into(),
            name: "now".into(),
            arguments: json!({}),
        };

        let result = ToolResult::from_output(&call, ToolOutput::text("noon"));
        assert_eq!(result, ToolResult::success("toolu_8", "now", "noon"));
    }
}
