//! Vault tools: the actions the agent can take.
//!
//! Every tool implements [`Tool`]. Parameters are described by a typed struct
//! deriving `JsonSchema`; the JSON Schema is the single source for both the
//! validation descriptors ([`ToolParameter`]) and the LLM function-calling
//! schema. `execute` never fails: problems come back as an error
//! [`ToolResult`].

pub mod ai_process;
pub mod list_notes;
pub mod read_note;
pub mod search_notes;
pub mod update_note;
pub mod vector_search;
pub mod write_note;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::VaultMindConfig;
use crate::llm::TextGenerator;
use crate::nlp::types::Params;
use crate::search::VectorSearch;
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Cancelled,
    RequiresConfirmation,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::RequiresConfirmation => "requires_confirmation",
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub content: String,
    pub error_message: Option<String>,
    pub metadata: Params,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            content: content.into(),
            error_message: None,
            metadata: Params::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            content: String::new(),
            error_message: Some(message.into()),
            metadata: Params::new(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Cancelled,
            content: reason.into(),
            error_message: None,
            metadata: Params::new(),
        }
    }

    pub fn requires_confirmation(prompt: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::RequiresConfirmation,
            content: prompt.into(),
            error_message: None,
            metadata: Params::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// The error text, or empty for non-error results.
    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn from_schema(ty: &str) -> Self {
        match ty {
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            _ => Self::String,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed_values: Vec<String>,
    pub description: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the parameter object.
    fn schema(&self) -> Value;

    fn parameters(&self) -> Vec<ToolParameter> {
        parameters_from_schema(&self.schema())
    }

    /// OpenAI-style function description for LLM function calling.
    fn function_schema(&self) -> Value {
        let mut parameters = self.schema();
        if let Some(obj) = parameters.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": parameters,
            }
        })
    }

    async fn execute(&self, params: &Params) -> ToolResult;
}

/// JSON Schema for a parameter struct.
pub fn schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

/// Deserialize the open parameter map into a tool's typed parameters.
pub fn parse_params<T: DeserializeOwned>(params: &Params) -> Result<T, String> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| format!("invalid parameters: {e}"))
}

/// Flatten a parameter-object schema into descriptors. Follows `$ref` into
/// `$defs` and looks through `Option` wrappers.
pub fn parameters_from_schema(schema: &Value) -> Vec<ToolParameter> {
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| {
            let resolved = resolve_schema(schema, prop);
            let ty = type_name(prop).or_else(|| type_name(resolved)).unwrap_or("string");
            let allowed_values = resolved
                .get("enum")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let description = prop
                .get("description")
                .or_else(|| resolved.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            ToolParameter {
                name: name.clone(),
                param_type: ParamType::from_schema(ty),
                required: required.contains(name.as_str()),
                default: prop.get("default").cloned(),
                allowed_values,
                description,
            }
        })
        .collect()
}

fn resolve_schema<'a>(root: &'a Value, prop: &'a Value) -> &'a Value {
    let variants = prop
        .get("anyOf")
        .or_else(|| prop.get("oneOf"))
        .or_else(|| prop.get("allOf"))
        .and_then(Value::as_array);
    if let Some(variants) = variants {
        if let Some(first) = variants
            .iter()
            .find(|v| v.get("type").and_then(Value::as_str) != Some("null"))
        {
            return resolve_schema(root, first);
        }
    }
    if let Some(name) = prop
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.rsplit('/').next())
    {
        if let Some(def) = root.get("$defs").and_then(|defs| defs.get(name)) {
            return def;
        }
    }
    prop
}

/// `"type": "x"` or the first non-null entry of `"type": ["x", "null"]`.
fn type_name(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(ty) => Some(ty.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

/// Check presence, type and allowed values. Returns one message per problem.
pub fn validate_params(parameters: &[ToolParameter], params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    for parameter in parameters {
        match params.get(&parameter.name) {
            None | Some(Value::Null) => {
                if parameter.required {
                    errors.push(format!("missing required parameter '{}'", parameter.name));
                }
            }
            Some(value) => {
                if !parameter.param_type.accepts(value) {
                    errors.push(format!(
                        "parameter '{}' must be of type {:?}",
                        parameter.name, parameter.param_type
                    ));
                } else if let (false, Some(s)) = (parameter.allowed_values.is_empty(), value.as_str()) {
                    if !parameter.allowed_values.iter().any(|v| v == s) {
                        errors.push(format!(
                            "parameter '{}' must be one of: {}",
                            parameter.name,
                            parameter.allowed_values.join(", ")
                        ));
                    }
                }
            }
        }
    }
    errors
}

// ── Registry ────────────────────────────────────────────────────────

/// Tools in registration order, each of which can be switched off.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    disabled: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard vault tools. `vector_search` is only registered when a
    /// search backend is supplied, `ai_process` only with a generator.
    pub fn with_defaults(
        vault: Arc<dyn Vault>,
        generator: Option<Arc<dyn TextGenerator>>,
        search: Option<Arc<dyn VectorSearch>>,
        config: &VaultMindConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(read_note::ReadNoteTool::new(vault.clone())));
        registry.register(Arc::new(write_note::WriteNoteTool::new(vault.clone())));
        registry.register(Arc::new(update_note::UpdateNoteTool::new(
            vault.clone(),
            config.vault.backup_on_update,
        )));
        registry.register(Arc::new(search_notes::SearchNotesTool::new(vault.clone())));
        if let Some(search) = search {
            registry.register(Arc::new(vector_search::VectorSearchTool::new(search)));
        }
        registry.register(Arc::new(list_notes::ListNotesTool::new(
            vault.clone(),
            config.vault.default_pattern.clone(),
        )));
        if let Some(generator) = generator {
            registry.register(Arc::new(ai_process::AiProcessTool::new(
                vault,
                generator,
                config.llm.temperature,
                config.llm.max_tokens,
            )));
        }
        registry
    }

    /// Add a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn enabled_names(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .map(|t| t.name())
            .filter(|name| !self.disabled.contains(*name))
            .collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.contains(name) && !self.disabled.contains(name)
    }

    /// Returns false for unknown tools.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if !self.contains(name) {
            return false;
        }
        if enabled {
            self.disabled.remove(name);
        } else {
            self.disabled.insert(name.to_string());
        }
        true
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .filter(|t| !self.disabled.contains(t.name()))
            .map(|t| t.function_schema())
            .collect()
    }

    /// Validate and run a tool by name.
    pub async fn execute(&self, name: &str, params: &Params) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };
        if self.disabled.contains(name) {
            return ToolResult::error(format!("tool is disabled: {name}"));
        }

        let errors = validate_params(&tool.parameters(), params);
        if !errors.is_empty() {
            tracing::warn!(tool = name, errors = ?errors, "tool parameters rejected");
            return ToolResult::error(errors.join("; "));
        }

        let start = Instant::now();
        let result = tool.execute(params).await;
        tracing::info!(
            tool = name,
            status = %result.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool executed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct DemoParams {
        /// Note to open
        #[schemars(description = "Path of the note")]
        note_path: String,
        #[serde(default = "default_limit")]
        limit: u32,
        mode: Option<crate::vault::UpdateMode>,
        flag: Option<bool>,
    }

    fn default_limit() -> u32 {
        10
    }

    fn demo() -> Vec<ToolParameter> {
        parameters_from_schema(&schema_for::<DemoParams>())
    }

    fn find<'a>(params: &'a [ToolParameter], name: &str) -> &'a ToolParameter {
        params.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn descriptors_follow_schema() {
        let params = demo();
        assert_eq!(params.len(), 4);

        let path = find(&params, "note_path");
        assert!(path.required);
        assert_eq!(path.param_type, ParamType::String);
        assert_eq!(path.description, "Path of the note");

        let limit = find(&params, "limit");
        assert!(!limit.required);
        assert_eq!(limit.param_type, ParamType::Integer);
        assert_eq!(limit.default, Some(json!(10)));

        let mode = find(&params, "mode");
        assert_eq!(mode.allowed_values, vec!["append", "prepend", "replace"]);

        assert_eq!(find(&params, "flag").param_type, ParamType::Boolean);
    }

    #[test]
    fn validation_reports_each_problem() {
        let params = demo();
        let mut input = Params::new();
        input.insert("limit".into(), json!("ten"));
        input.insert("mode".into(), json!("sideways"));
        let errors = validate_params(&params, &input);
        assert_eq!(errors.len(), 3, "{errors:?}");

        input.insert("note_path".into(), json!("a.md"));
        input.insert("limit".into(), json!(3));
        input.insert("mode".into(), json!("append"));
        assert!(validate_params(&params, &input).is_empty());
    }

    #[test]
    fn result_builders() {
        let ok = ToolResult::success("done").with_metadata("count", 2);
        assert!(ok.is_success());
        assert_eq!(ok.metadata["count"], 2);

        let err = ToolResult::error("boom");
        assert_eq!(err.status, ToolStatus::Error);
        assert_eq!(err.error_text(), "boom");
    }
}
