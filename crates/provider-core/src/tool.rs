//! Tool call normalisation
//!
//! The provider contract needs a vendor-agnostic shape for tool definitions and
//! tool calls, but executing a tool call is the job of an external adapter
//! (explicitly out of scope here — see §1 of the specification this crate
//! implements). These types are what crosses that boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tool call a backend asked the caller to perform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier.
    pub name: String,

    /// Arguments as key-value pairs, normalised to a map regardless of whether
    /// the vendor emitted a string-encoded JSON blob or a native object.
    pub arguments: HashMap<String, serde_json::Value>,

    /// Optional call ID for correlating the eventual `ToolResult`.
    #[serde(default)]
    pub id: Option<String>,
}

/// Result of executing a `ToolCall`, as reported back to a provider that
/// supports multi-turn tool use. Execution itself happens outside this crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called.
    pub name: String,

    /// Call ID (if provided in the request).
    pub id: Option<String>,

    /// Whether execution succeeded.
    pub success: bool,

    /// Output (success message or error).
    pub output: String,

    /// Structured data, if the tool adapter returned any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: false,
            output: error.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Parameter definition within a `ToolSchema`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name.
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array).
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description.
    pub description: String,

    /// Whether this parameter is required.
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Enum of allowed values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

/// Tool definition passed into `generate_with_tools`/`stream_with_tools`,
/// describing a capability an external adapter exposes to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier.
    pub name: String,

    /// Human-readable description (shown to the model).
    pub description: String,

    /// Parameter definitions.
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping, if the adapter supplies one.
    #[serde(default)]
    pub category: Option<String>,

    /// Whether invoking the tool has side effects.
    #[serde(default)]
    pub has_side_effects: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_builders_set_expected_fields() {
        let ok = ToolResult::success("search", "3 hits").with_id("call-1");
        assert!(ok.success);
        assert_eq!(ok.id.as_deref(), Some("call-1"));

        let err = ToolResult::failure("search", "timeout").with_data(serde_json::json!({"retryable": true}));
        assert!(!err.success);
        assert_eq!(err.data.unwrap()["retryable"], true);
    }

    #[test]
    fn tool_call_arguments_round_trip_through_json() {
        let call = ToolCall {
            name: "search".into(),
            arguments: HashMap::from([("query".to_string(), serde_json::json!("rust"))]),
            id: Some("call-7".into()),
        };
        let encoded = serde_json::to_string(&call).unwrap();
        let decoded: ToolCall = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.name, "search");
        assert_eq!(decoded.arguments["query"], "rust");
    }
}
