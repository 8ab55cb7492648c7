//! Wire types exchanged with the host tool-calling server.
//!
//! These mirror the MCP `tools/call` and `tools/list` shapes closely enough to
//! be serialized straight onto the wire, without depending on any particular
//! MCP SDK.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of a tool call as received from the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// The tool name to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Protocol extensions, where payment proofs travel.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl CallToolParams {
    /// Creates call parameters without `_meta`.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            meta: None,
        }
    }

    /// Sets one `_meta` entry, creating the map if needed.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// A single content item in a tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum ContentItem {
    /// Text content.
    Text {
        /// The text value.
        text: String,
    },
}

impl ContentItem {
    /// Creates a new text content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text content if this is a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
        }
    }
}

/// Result of a tool call as returned to the host.
///
/// Payment failures are reported here with `is_error` set, never as
/// transport errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content items returned by the tool.
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Whether the call failed.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    /// Protocol extensions, e.g. the x402 settlement response.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Machine-readable payload.
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Renders a JSON value as a successful result.
    ///
    /// Strings become plain text; anything else is serialized into the text
    /// content, and objects are also exposed as structured content.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
            meta: None,
            structured_content: value.is_object().then_some(value),
        }
    }

    /// Builds an error result whose text is the serialized structured payload.
    #[must_use]
    pub fn error(structured: Value) -> Self {
        Self {
            content: vec![ContentItem::text(structured.to_string())],
            is_error: true,
            meta: None,
            structured_content: Some(structured),
        }
    }

    /// Returns the text of the first text item.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentItem::as_text)
    }
}

/// A tool as advertised in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

impl Tool {
    /// Creates a tool accepting any object.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    /// Replaces the argument schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}
