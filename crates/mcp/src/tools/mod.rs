mod calendar;
mod gmail;

use gsuite_tools_core::{GatewayError, Result, ServiceProvider};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Provider list endpoints refuse larger pages than this.
const MAX_RESULTS_CAP: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    StringArray,
}

impl ParamKind {
    fn schema(self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Number => json!({ "type": "number" }),
            ParamKind::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::StringArray => "array",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn schema(&self) -> Value {
        let mut schema = self.kind.schema();
        schema["description"] = json!(self.description);
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamDef>,
}

impl ToolDescriptor {
    /// JSON Schema for the MCP `inputSchema` field.
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// Flat `{field: {type, required, default}}` map served by `GET /tools`.
    pub fn http_parameters(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                let mut param = json!({ "type": p.kind.type_name(), "description": p.description });
                if p.required {
                    param["required"] = json!(true);
                }
                if let Some(default) = &p.default {
                    param["default"] = default.clone();
                }
                (p.name.to_string(), param)
            })
            .collect();
        Value::Object(params)
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn list_tools() -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();
    tools.extend(calendar::definitions());
    tools.extend(gmail::definitions());
    tools
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    list_tools().iter().map(ToolDescriptor::definition).collect()
}

/// Outcome of one tool call. Handlers never fail past this point.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(Value),
    Error(String),
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }

    /// Strings pass through verbatim; everything else is pretty JSON.
    pub fn text(&self) -> String {
        match self {
            ToolResult::Success(Value::String(s)) => s.clone(),
            ToolResult::Success(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            ToolResult::Error(msg) => format!("Error: {}", msg),
        }
    }

    /// MCP `tools/call` result: one text content block.
    pub fn into_content(self) -> Value {
        json!({
            "content": [{
                "type": "text",
                "text": self.text()
            }],
            "isError": self.is_error()
        })
    }

    /// HTTP `{result, error}` envelope.
    pub fn into_envelope(self) -> Value {
        match self {
            ToolResult::Success(v) => json!({ "result": v, "error": null }),
            ToolResult::Error(msg) => json!({ "result": null, "error": format!("Error: {}", msg) }),
        }
    }
}

/// Routes tool calls to their handlers and converts every failure into
/// [`ToolResult::Error`].
pub struct Dispatcher {
    services: Arc<dyn ServiceProvider>,
}

impl Dispatcher {
    pub fn new(services: Arc<dyn ServiceProvider>) -> Self {
        Self { services }
    }

    pub fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };

        tracing::info!(tool = name, "tool call");
        let services = self.services.as_ref();
        let outcome = match name {
            n if n.starts_with("calendar_") => calendar::call(name, arguments, services),
            n if n.starts_with("gmail_") => gmail::call(name, arguments, services),
            _ => Err(GatewayError::UnknownTool(name.to_string())),
        };

        match outcome {
            Ok(value) => ToolResult::Success(value),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                ToolResult::Error(e.to_string())
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| GatewayError::validation(e.to_string()))
}

fn default_max_results() -> u32 {
    10
}

/// Any JSON number is accepted: fractions round, out-of-range values clamp.
fn deserialize_max_results<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let n = f64::deserialize(deserializer)?;
    if !n.is_finite() {
        return Ok(1);
    }
    Ok(n.round().clamp(1.0, f64::from(MAX_RESULTS_CAP)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_five_tools_in_order() {
        let names: Vec<&str> = list_tools().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "calendar_list_events",
                "calendar_create_event",
                "gmail_list_messages",
                "gmail_read_message",
                "gmail_send_message",
            ]
        );
        assert!(list_tools().iter().all(|t| !t.description.is_empty()));
    }

    #[test]
    fn input_schema_lists_required_fields() {
        let tools = list_tools();
        let create = tools
            .iter()
            .find(|t| t.name == "calendar_create_event")
            .unwrap();
        let schema = create.input_schema();

        assert_eq!(
            schema["required"],
            json!(["summary", "start_time", "end_time"])
        );
        assert_eq!(schema["properties"]["attendees"]["type"], "array");
        assert_eq!(schema["properties"]["attendees"]["items"]["type"], "string");
    }

    #[test]
    fn optional_only_schema_has_no_required_key() {
        let tools = list_tools();
        let list = tools
            .iter()
            .find(|t| t.name == "calendar_list_events")
            .unwrap();
        let schema = list.input_schema();

        assert!(schema.get("required").is_none());
        assert_eq!(schema["properties"]["max_results"]["default"], 10);
    }

    #[test]
    fn http_parameters_are_flat() {
        let tools = list_tools();
        let read = tools
            .iter()
            .find(|t| t.name == "gmail_read_message")
            .unwrap();
        let params = read.http_parameters();

        assert_eq!(params["message_id"]["type"], "string");
        assert_eq!(params["message_id"]["required"], true);
    }

    #[test]
    fn result_text_and_envelopes() {
        let ok = ToolResult::Success(json!("Message sent"));
        assert_eq!(ok.text(), "Message sent");

        let list = ToolResult::Success(json!([{ "id": "1" }]));
        assert!(list.text().contains("\"id\": \"1\""));

        let err = ToolResult::Error("Unknown tool: nope".to_string());
        assert_eq!(
            err.clone().into_envelope(),
            json!({ "result": null, "error": "Error: Unknown tool: nope" })
        );
        let content = err.into_content();
        assert_eq!(content["isError"], true);
        assert_eq!(content["content"][0]["text"], "Error: Unknown tool: nope");
    }

    #[derive(Deserialize)]
    struct Page {
        #[serde(default = "default_max_results", deserialize_with = "deserialize_max_results")]
        max_results: u32,
    }

    fn page(arguments: Value) -> u32 {
        parse_args::<Page>(arguments).unwrap().max_results
    }

    #[test]
    fn max_results_accepts_any_json_number() {
        assert_eq!(page(json!({})), 10);
        assert_eq!(page(json!({ "max_results": 10.0 })), 10);
        assert_eq!(page(json!({ "max_results": 2.6 })), 3);
        assert_eq!(page(json!({ "max_results": -5 })), 1);
        assert_eq!(page(json!({ "max_results": 0 })), 1);
        assert_eq!(page(json!({ "max_results": 9000 })), MAX_RESULTS_CAP);
        assert!(parse_args::<Page>(json!({ "max_results": "ten" })).is_err());
    }

    #[test]
    fn max_results_is_advertised_as_number() {
        for tool in ["calendar_list_events", "gmail_list_messages"] {
            let tools = list_tools();
            let desc = tools.iter().find(|t| t.name == tool).unwrap();
            assert_eq!(desc.input_schema()["properties"]["max_results"]["type"], "number");
        }
    }
}
