use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::schema::ToolCall;

/// One block of tool output as seen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Answer to exactly one [`ToolCall`], correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    id: String,
    name: String,
    output: Vec<ContentBlock>,
    is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Vec<ContentBlock>) -> Self {
        Self {
            id: call.id().to_string(),
            name: call.name().to_string(),
            output,
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            id: call.id().to_string(),
            name: call.name().to_string(),
            output: vec![ContentBlock::text(format!("Error: {error}"))],
            is_error: true,
        }
    }

    /// Result carrying content the tool itself flagged as a failure.
    pub fn failed_with(call: &ToolCall, output: Vec<ContentBlock>) -> Self {
        Self {
            id: call.id().to_string(),
            name: call.name().to_string(),
            output,
            is_error: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &[ContentBlock] {
        &self.output
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.output
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Wire request for a remote tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Wire response of a remote tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Map<String, Value>>,
}

impl CallToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
            structured_content: None,
        }
    }

    pub fn into_result(self, call: &ToolCall) -> ToolResult {
        let mut output = self.content;
        if output.is_empty()
            && let Some(structured) = self.structured_content
        {
            output.push(ContentBlock::text(Value::Object(structured).to_string()));
        }

        if self.is_error {
            ToolResult::failed_with(call, output)
        } else {
            ToolResult::success(call, output)
        }
    }
}
