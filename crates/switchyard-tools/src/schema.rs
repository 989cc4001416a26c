use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolCallError;

/// JSON-Schema shaped description of a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }
}

impl InputSchema {
    pub fn object(properties: Map<String, Value>, required: Vec<String>) -> Self {
        Self {
            schema_type: "object".to_string(),
            properties,
            required,
        }
    }

    /// Build from an arbitrary JSON schema document, keeping only the top-level
    /// object shape (`allOf` members are folded in).
    pub fn from_value(schema: &Value) -> Self {
        let summary = SchemaSummary::from_value(schema);
        let schema_type = if summary.schema_type.is_empty() {
            "object".to_string()
        } else {
            summary.schema_type
        };
        Self {
            schema_type,
            properties: summary.properties,
            required: summary.required,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::String(self.schema_type.clone()));
        obj.insert("properties".to_string(), Value::Object(self.properties.clone()));
        obj.insert(
            "required".to_string(),
            Value::Array(self.required.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(obj)
    }

    /// Copy of this schema with the given keys removed from `properties` and `required`.
    pub fn without_properties<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut schema = self.clone();
        for key in keys {
            schema.properties.remove(key);
            schema.required.retain(|r| r != key);
        }
        schema
    }
}

impl From<schemars::Schema> for InputSchema {
    fn from(schema: schemars::Schema) -> Self {
        let schema_value =
            serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::Value::Null);
        Self::from_value(&schema_value)
    }
}

struct SchemaSummary {
    properties: Map<String, Value>,
    required: Vec<String>,
    schema_type: String,
}

impl SchemaSummary {
    fn from_value(schema: &Value) -> Self {
        let mut properties = Map::new();
        let mut required = BTreeSet::new();
        let schema_type = schema
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Self::merge_schema(schema, &mut properties, &mut required);

        Self {
            properties,
            required: required.into_iter().collect(),
            schema_type,
        }
    }

    fn merge_schema(
        schema: &Value,
        properties: &mut Map<String, Value>,
        required: &mut BTreeSet<String>,
    ) {
        let Some(obj) = schema.as_object() else {
            return;
        };

        if let Some(prop_obj) = obj.get("properties").and_then(|v| v.as_object()) {
            for (key, value) in prop_obj {
                properties.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        if let Some(req) = obj.get("required").and_then(|v| v.as_array()) {
            required.extend(req.iter().filter_map(|v| v.as_str().map(String::from)));
        }

        if let Some(all_of) = obj.get("allOf").and_then(|v| v.as_array()) {
            for sub in all_of {
                Self::merge_schema(sub, properties, required);
            }
        }
    }
}

/// Schema advertised to the model for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: InputSchema,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A model's request to invoke one tool.
///
/// The `id` is assigned by the caller and is echoed unchanged on the
/// matching [`ToolResult`](crate::ToolResult).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    id: String,
    name: String,
    arguments: Map<String, Value>,
    raw_arguments: String,
}

impl ToolCall {
    /// Build a call from already-parsed arguments. `null` means "no arguments".
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Result<Self, ToolCallError> {
        let id = id.into();
        let name = name.into();
        Self::check_identity(&id, &name)?;

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolCallError::NotAnObject {
                    tool_name: name,
                    found: json_kind(&other).to_string(),
                });
            }
        };
        let raw_arguments = Value::Object(arguments.clone()).to_string();

        Ok(Self {
            id,
            name,
            arguments,
            raw_arguments,
        })
    }

    /// Build a call from the raw argument string a provider streamed back.
    pub fn from_raw(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Result<Self, ToolCallError> {
        let id = id.into();
        let name = name.into();
        let raw_arguments = raw_arguments.into();
        Self::check_identity(&id, &name)?;

        let arguments = if raw_arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&raw_arguments) {
                Ok(Value::Object(map)) => map,
                Ok(Value::Null) => Map::new(),
                Ok(other) => {
                    return Err(ToolCallError::NotAnObject {
                        tool_name: name,
                        found: json_kind(&other).to_string(),
                    });
                }
                Err(e) => {
                    return Err(ToolCallError::MalformedArguments {
                        tool_name: name,
                        message: e.to_string(),
                    });
                }
            }
        };

        Ok(Self {
            id,
            name,
            arguments,
            raw_arguments,
        })
    }

    fn check_identity(id: &str, name: &str) -> Result<(), ToolCallError> {
        if id.is_empty() {
            return Err(ToolCallError::EmptyId);
        }
        if name.is_empty() {
            return Err(ToolCallError::EmptyName);
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn raw_arguments(&self) -> &str {
        &self.raw_arguments
    }

    /// Arguments as a JSON object value.
    pub fn parameters(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
