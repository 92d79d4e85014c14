//! MCP (Model Context Protocol) server: the stdio tool surface planners
//! and agents use to talk to the store.
//!
//! JSON-RPC 2.0 over stdin/stdout. Creation tools (`create_feature`,
//! `create_task`, `create_dependency`) stage their arguments instead of
//! applying them; referential checks are deferred to
//! `commit_staged_changes`, which applies the whole session atomically.
//! Lifecycle tools apply immediately and surface typed errors as
//! tool-level failures, never protocol errors.

use crate::models::{Dependency, Feature, Task, TaskStatus};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// MCP protocol version.
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server information.
const SERVER_NAME: &str = "ponder";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default staging session for tools that omit `session_id`.
const DEFAULT_SESSION: &str = "default";

// === JSON-RPC types ===

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// === Server ===

pub struct McpServer {
    store: Arc<Store>,
}

impl McpServer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Handle one JSON-RPC request.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id.clone(),
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": SERVER_VERSION
                    }
                }),
            ),
            "initialized" | "notifications/initialized" | "ping" => {
                JsonRpcResponse::success(request.id.clone(), json!({}))
            }
            "tools/list" => JsonRpcResponse::success(
                request.id.clone(),
                json!({ "tools": tool_definitions() }),
            ),
            "tools/call" => self.handle_tools_call(request),
            _ => JsonRpcResponse::error(
                request.id.clone(),
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = &request.params else {
            return JsonRpcResponse::error(request.id.clone(), -32602, "Missing params".into());
        };
        let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(request.id.clone(), -32602, "Missing tool name".into());
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.execute_tool(tool_name, &arguments) {
            Ok(text) => JsonRpcResponse::success(
                request.id.clone(),
                json!({
                    "content": [{ "type": "text", "text": text }]
                }),
            ),
            Err(e) => JsonRpcResponse::success(
                request.id.clone(),
                json!({
                    "content": [{ "type": "text", "text": format!("Error: {e}") }],
                    "isError": true
                }),
            ),
        }
    }

    /// Dispatch a named tool. Errors become tool-level failures.
    pub fn execute_tool(&self, name: &str, args: &Value) -> Result<String, String> {
        match name {
            "create_feature" => self.tool_create_feature(args),
            "update_feature" => self.tool_update_feature(args),
            "delete_feature" => self.tool_delete_feature(args),
            "list_features" => self.tool_list_features(),
            "get_feature" => self.tool_get_feature(args),
            "create_task" => self.tool_create_task(args),
            "update_task" => self.tool_update_task(args),
            "update_task_status" => self.tool_update_task_status(args),
            "delete_task" => self.tool_delete_task(args),
            "list_tasks" => self.tool_list_tasks(args),
            "get_available_tasks" => self.tool_get_available_tasks(),
            "start_task" => self.tool_start_task(args),
            "complete_task" => self.tool_complete_task(args),
            "report_task_blocked" => self.tool_report_task_blocked(args),
            "create_dependency" => self.tool_create_dependency(args),
            "delete_dependency" => self.tool_delete_dependency(args),
            "get_task_dependencies" => self.tool_get_task_dependencies(args),
            "get_graph_json" => self.tool_get_graph_json(),
            "commit_staged_changes" => self.tool_commit_staged_changes(args),
            "list_staged_changes" => self.tool_list_staged_changes(args),
            _ => Err(format!("Unknown tool: {name}")),
        }
    }

    // === Feature tools ===

    fn tool_create_feature(&self, args: &Value) -> Result<String, String> {
        let name = required_str(args, "name")?;
        let description = required_str(args, "description")?;
        let specification = required_str(args, "specification")?;
        let session_id = session_id(args);

        let mut feature = Feature::new(name);
        feature.description = description.to_string();
        feature.specification = specification.to_string();
        self.store.staging.add_feature(&session_id, feature);

        Ok(format!(
            "Feature '{name}' staged for session '{session_id}'. Propose another or call 'commit_staged_changes' to apply."
        ))
    }

    fn tool_update_feature(&self, args: &Value) -> Result<String, String> {
        let name = required_str(args, "name")?;
        let mut feature = self
            .store
            .get_feature_by_name(name)
            .map_err(stringify)?
            .ok_or_else(|| format!("Feature with name '{name}' not found"))?;

        if let Some(new_name) = optional_str(args, "new_name") {
            feature.name = new_name.to_string();
        }
        if let Some(description) = optional_str(args, "description") {
            feature.description = description.to_string();
        }
        if let Some(specification) = optional_str(args, "specification") {
            feature.specification = specification.to_string();
        }

        self.store.update_feature(&mut feature).map_err(stringify)?;
        Ok("Feature updated successfully".into())
    }

    fn tool_delete_feature(&self, args: &Value) -> Result<String, String> {
        let name = required_str(args, "name")?;
        let feature = self
            .store
            .get_feature_by_name(name)
            .map_err(stringify)?
            .ok_or_else(|| format!("Feature with name '{name}' not found"))?;
        self.store.delete_feature(&feature.id).map_err(stringify)?;
        Ok("Feature deleted successfully".into())
    }

    fn tool_list_features(&self) -> Result<String, String> {
        let features = self.store.list_features().map_err(stringify)?;
        serde_json::to_string(&json!({ "features": features })).map_err(stringify)
    }

    fn tool_get_feature(&self, args: &Value) -> Result<String, String> {
        let name = required_str(args, "name")?;
        let feature = self
            .store
            .get_feature_by_name(name)
            .map_err(stringify)?
            .ok_or_else(|| format!("Feature with name '{name}' not found"))?;
        serde_json::to_string(&feature).map_err(stringify)
    }

    // === Task tools ===

    fn tool_create_task(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let description = required_str(args, "description")?;
        let specification = required_str(args, "specification")?;
        let priority = optional_i64(args, "priority").unwrap_or(0);
        let tests_required = optional_bool(args, "tests_required").unwrap_or(true);
        let session_id = session_id(args);

        let mut task = Task::new("", name);
        task.feature_name = feature_name.to_string();
        task.description = description.to_string();
        task.specification = specification.to_string();
        task.priority = priority;
        task.tests_required = tests_required;
        self.store.staging.add_task(&session_id, task);

        Ok(format!(
            "Task '{name}' staged for session '{session_id}'. Propose another or call 'commit_staged_changes' to apply."
        ))
    }

    fn tool_update_task(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let mut task = self.lookup_task(feature_name, name)?;

        if let Some(new_name) = optional_str(args, "new_name") {
            task.name = new_name.to_string();
        }
        if let Some(new_feature_name) = optional_str(args, "new_feature_name") {
            let feature = self
                .store
                .get_feature_by_name(new_feature_name)
                .map_err(stringify)?
                .ok_or_else(|| format!("Feature with name '{new_feature_name}' not found"))?;
            task.feature_id = feature.id;
        }
        if let Some(description) = optional_str(args, "description") {
            task.description = description.to_string();
        }
        if let Some(specification) = optional_str(args, "specification") {
            task.specification = specification.to_string();
        }
        if let Some(priority) = optional_i64(args, "priority") {
            task.priority = priority;
        }
        if let Some(tests_required) = optional_bool(args, "tests_required") {
            task.tests_required = tests_required;
        }

        self.store.update_task(&mut task).map_err(stringify)?;
        Ok("Task updated successfully".into())
    }

    fn tool_update_task_status(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let status_str = required_str(args, "status")?;
        let status = TaskStatus::parse(status_str)
            .ok_or_else(|| format!("Invalid status '{status_str}'"))?;
        let summary = optional_str(args, "completion_summary");

        let task = self.lookup_task(feature_name, name)?;
        self.store
            .update_task_status(&task.id, status, summary)
            .map_err(stringify)?;
        Ok("Task status updated successfully".into())
    }

    fn tool_delete_task(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let task = self.lookup_task(feature_name, name)?;
        self.store.delete_task(&task.id).map_err(stringify)?;
        Ok("Task deleted successfully".into())
    }

    fn tool_list_tasks(&self, args: &Value) -> Result<String, String> {
        let status = match optional_str(args, "status") {
            Some(s) => {
                Some(TaskStatus::parse(s).ok_or_else(|| format!("Invalid status '{s}'"))?)
            }
            None => None,
        };
        let feature_name = optional_str(args, "feature_name");
        let tasks = self
            .store
            .list_tasks(status, feature_name)
            .map_err(stringify)?;
        serde_json::to_string(&json!({ "tasks": tasks })).map_err(stringify)
    }

    fn tool_get_available_tasks(&self) -> Result<String, String> {
        let tasks = self.store.get_available_tasks().map_err(stringify)?;
        serde_json::to_string(&json!({ "tasks": tasks })).map_err(stringify)
    }

    fn tool_start_task(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let task = self.lookup_task(feature_name, name)?;
        self.store
            .update_task_status(&task.id, TaskStatus::InProgress, None)
            .map_err(stringify)?;
        Ok("Task started successfully".into())
    }

    fn tool_complete_task(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let summary = required_str(args, "completion_summary")?;
        let task = self.lookup_task(feature_name, name)?;
        self.store
            .update_task_status(&task.id, TaskStatus::Completed, Some(summary))
            .map_err(stringify)?;
        Ok("Task completed successfully".into())
    }

    /// Appends the reason to the task's specification, then flips the
    /// status. Two separate writes: a crash in between leaves the
    /// specification amended with the status unchanged.
    fn tool_report_task_blocked(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let reason = required_str(args, "reason")?;

        let mut task = self.lookup_task(feature_name, name)?;
        task.specification
            .push_str(&format!("\n\n### Blocked Reason\n{reason}"));
        self.store.update_task(&mut task).map_err(stringify)?;

        self.store
            .update_task_status(&task.id, TaskStatus::Blocked, None)
            .map_err(stringify)?;
        Ok("Task reported as blocked successfully".into())
    }

    // === Dependency tools ===

    fn tool_create_dependency(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let task_name = required_str(args, "task_name")?;
        let depends_on_task_name = required_str(args, "depends_on_task_name")?;
        let depends_on_feature_name =
            optional_str(args, "depends_on_feature_name").unwrap_or(feature_name);
        let session_id = session_id(args);

        self.store.staging.add_dependency(
            &session_id,
            Dependency {
                task_name: task_name.to_string(),
                feature_name: feature_name.to_string(),
                depends_on_task_name: depends_on_task_name.to_string(),
                depends_on_feature_name: depends_on_feature_name.to_string(),
                ..Default::default()
            },
        );

        Ok(format!(
            "Dependency {feature_name}:{task_name} -> {depends_on_feature_name}:{depends_on_task_name} staged for session '{session_id}'. Call 'commit_staged_changes' to apply."
        ))
    }

    fn tool_delete_dependency(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let task_name = required_str(args, "task_name")?;
        let depends_on_task_name = required_str(args, "depends_on_task_name")?;
        let depends_on_feature_name =
            optional_str(args, "depends_on_feature_name").unwrap_or(feature_name);

        let task_id = self
            .store
            .resolve_task_id(feature_name, task_name)
            .map_err(stringify)?;
        let depends_on_id = self
            .store
            .resolve_task_id(depends_on_feature_name, depends_on_task_name)
            .map_err(stringify)?;

        self.store
            .delete_dependency(&task_id, &depends_on_id)
            .map_err(stringify)?;
        Ok("Dependency deleted successfully".into())
    }

    fn tool_get_task_dependencies(&self, args: &Value) -> Result<String, String> {
        let feature_name = required_str(args, "feature_name")?;
        let name = required_str(args, "name")?;
        let task_id = self
            .store
            .resolve_task_id(feature_name, name)
            .map_err(stringify)?;
        let deps = self.store.get_dependencies(&task_id).map_err(stringify)?;
        serde_json::to_string(&json!({ "dependencies": deps })).map_err(stringify)
    }

    // === Graph & staging tools ===

    fn tool_get_graph_json(&self) -> Result<String, String> {
        self.store.graph_json().map_err(stringify)
    }

    fn tool_commit_staged_changes(&self, args: &Value) -> Result<String, String> {
        let session_id = session_id(args);
        self.store.commit_batch(&session_id).map_err(stringify)?;
        Ok(format!(
            "Staged changes for session '{session_id}' committed successfully"
        ))
    }

    fn tool_list_staged_changes(&self, args: &Value) -> Result<String, String> {
        let session_id = session_id(args);
        let items = self.store.staging.peek(&session_id);
        serde_json::to_string(&items).map_err(stringify)
    }

    fn lookup_task(&self, feature_name: &str, name: &str) -> Result<Task, String> {
        let feature = self
            .store
            .get_feature_by_name(feature_name)
            .map_err(stringify)?
            .ok_or_else(|| format!("Feature with name '{feature_name}' not found"))?;
        self.store
            .get_task_by_name(name, &feature.id)
            .map_err(stringify)?
            .ok_or_else(|| format!("Task with name '{name}' not found in feature '{feature_name}'"))
    }
}

/// Run the server on stdio until stdin closes.
pub fn serve(store: Arc<Store>) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let server = McpServer::new(store);

    tracing::info!("ponder MCP server {SERVER_VERSION} started");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("error reading stdin: {e}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let response =
                    JsonRpcResponse::error(None, -32700, format!("Parse error: {e}"));
                print_response(&stdout, &response);
                continue;
            }
        };

        let is_notification = request.id.is_none();
        let response = server.handle_request(&request);
        if !is_notification {
            print_response(&stdout, &response);
        }
    }
}

fn print_response(stdout: &io::Stdout, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(output) => {
            println!("{output}");
            let _ = stdout.lock().flush();
        }
        Err(e) => tracing::error!("failed to serialize response: {e}"),
    }
}

// === Argument helpers ===

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required argument '{key}'"))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn optional_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

fn session_id(args: &Value) -> String {
    optional_str(args, "session_id")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

fn stringify(e: impl std::fmt::Display) -> String {
    e.to_string()
}

/// Tool catalog for `tools/list`.
fn tool_definitions() -> Vec<ToolDef> {
    fn schema(required: &[&str], props: Value) -> Value {
        json!({
            "type": "object",
            "properties": props,
            "required": required,
        })
    }

    vec![
        ToolDef {
            name: "create_feature",
            description: "Propose a new feature. Changes are staged and must be committed to take effect.",
            input_schema: schema(
                &["name", "description", "specification"],
                json!({
                    "name": { "type": "string", "description": "Feature name (max 55 chars, unique)" },
                    "description": { "type": "string", "description": "Feature description" },
                    "specification": { "type": "string", "description": "Feature specification" },
                    "session_id": { "type": "string", "description": "Session ID for staging changes (defaults to 'default')" },
                }),
            ),
        },
        ToolDef {
            name: "update_feature",
            description: "Update an existing feature.",
            input_schema: schema(
                &["name"],
                json!({
                    "name": { "type": "string", "description": "Feature name" },
                    "new_name": { "type": "string", "description": "New name" },
                    "description": { "type": "string", "description": "New description" },
                    "specification": { "type": "string", "description": "New specification" },
                }),
            ),
        },
        ToolDef {
            name: "delete_feature",
            description: "Delete a feature (cascades to tasks).",
            input_schema: schema(
                &["name"],
                json!({ "name": { "type": "string", "description": "Feature name" } }),
            ),
        },
        ToolDef {
            name: "list_features",
            description: "List all features.",
            input_schema: schema(&[], json!({})),
        },
        ToolDef {
            name: "get_feature",
            description: "Get a single feature by name.",
            input_schema: schema(
                &["name"],
                json!({ "name": { "type": "string", "description": "Feature name" } }),
            ),
        },
        ToolDef {
            name: "create_task",
            description: "Propose a new task. Changes are staged and must be committed to take effect.",
            input_schema: schema(
                &["feature_name", "name", "description", "specification"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name (max 55 chars)" },
                    "description": { "type": "string", "description": "Task description" },
                    "specification": { "type": "string", "description": "Task specification" },
                    "priority": { "type": "number", "description": "Priority (0-10)" },
                    "tests_required": { "type": "boolean", "description": "Whether tests are required" },
                    "session_id": { "type": "string", "description": "Session ID for staging changes (defaults to 'default')" },
                }),
            ),
        },
        ToolDef {
            name: "update_task",
            description: "Update an existing task.",
            input_schema: schema(
                &["feature_name", "name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                    "new_name": { "type": "string", "description": "New name" },
                    "new_feature_name": { "type": "string", "description": "New feature name" },
                    "description": { "type": "string", "description": "New description" },
                    "specification": { "type": "string", "description": "New specification" },
                    "priority": { "type": "number", "description": "New priority" },
                    "tests_required": { "type": "boolean", "description": "New tests required status" },
                }),
            ),
        },
        ToolDef {
            name: "update_task_status",
            description: "Update task status.",
            input_schema: schema(
                &["feature_name", "name", "status"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                    "status": { "type": "string", "description": "New status (pending|in_progress|completed|blocked)" },
                    "completion_summary": { "type": "string", "description": "Summary of work (required if status=completed)" },
                }),
            ),
        },
        ToolDef {
            name: "delete_task",
            description: "Delete a task.",
            input_schema: schema(
                &["feature_name", "name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                }),
            ),
        },
        ToolDef {
            name: "list_tasks",
            description: "List tasks with optional filters.",
            input_schema: schema(
                &[],
                json!({
                    "feature_name": { "type": "string", "description": "Filter by feature name" },
                    "status": { "type": "string", "description": "Filter by status" },
                }),
            ),
        },
        ToolDef {
            name: "get_available_tasks",
            description: "Get tasks that are ready to work on.",
            input_schema: schema(&[], json!({})),
        },
        ToolDef {
            name: "start_task",
            description: "Start a task by setting its status to in_progress.",
            input_schema: schema(
                &["feature_name", "name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                }),
            ),
        },
        ToolDef {
            name: "complete_task",
            description: "Complete a task by setting its status to completed.",
            input_schema: schema(
                &["feature_name", "name", "completion_summary"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                    "completion_summary": { "type": "string", "description": "Summary of the completed task" },
                }),
            ),
        },
        ToolDef {
            name: "report_task_blocked",
            description: "Report a task as blocked and provide a reason.",
            input_schema: schema(
                &["feature_name", "name", "reason"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                    "reason": { "type": "string", "description": "Reason why the task is blocked" },
                }),
            ),
        },
        ToolDef {
            name: "create_dependency",
            description: "Propose a dependency between two tasks. Changes are staged and must be committed to take effect.",
            input_schema: schema(
                &["feature_name", "task_name", "depends_on_task_name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name of the dependent task" },
                    "task_name": { "type": "string", "description": "Task name of the dependent task" },
                    "depends_on_task_name": { "type": "string", "description": "Task name of the prerequisite task" },
                    "depends_on_feature_name": { "type": "string", "description": "Feature name of the prerequisite task (defaults to feature_name)" },
                    "session_id": { "type": "string", "description": "Session ID for staging changes (defaults to 'default')" },
                }),
            ),
        },
        ToolDef {
            name: "delete_dependency",
            description: "Remove a dependency.",
            input_schema: schema(
                &["feature_name", "task_name", "depends_on_task_name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name of the dependent task" },
                    "task_name": { "type": "string", "description": "Task name of the dependent task" },
                    "depends_on_task_name": { "type": "string", "description": "Task name of the prerequisite task" },
                    "depends_on_feature_name": { "type": "string", "description": "Feature name of the prerequisite task (defaults to feature_name)" },
                }),
            ),
        },
        ToolDef {
            name: "get_task_dependencies",
            description: "Get all tasks that a task depends on.",
            input_schema: schema(
                &["feature_name", "name"],
                json!({
                    "feature_name": { "type": "string", "description": "Feature name" },
                    "name": { "type": "string", "description": "Task name" },
                }),
            ),
        },
        ToolDef {
            name: "get_graph_json",
            description: "Get the complete task graph as JSON.",
            input_schema: schema(&[], json!({})),
        },
        ToolDef {
            name: "commit_staged_changes",
            description: "Commit all staged changes for a session. This applies all proposed features, tasks, and dependencies at once.",
            input_schema: schema(
                &[],
                json!({ "session_id": { "type": "string", "description": "Session ID (defaults to 'default')" } }),
            ),
        },
        ToolDef {
            name: "list_staged_changes",
            description: "List all staged changes for a session. Use this to review a proposed plan before committing.",
            input_schema: schema(
                &[],
                json!({ "session_id": { "type": "string", "description": "Session ID (defaults to 'default')" } }),
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mem_store, seed_feature, seed_task};

    fn server() -> McpServer {
        McpServer::new(Arc::new(mem_store()))
    }

    #[test]
    fn test_initialize_and_tools_list() {
        let srv = server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: "initialize".into(),
            params: None,
        };
        let response = srv.handle_request(&request);
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "ponder");

        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(2)),
            method: "tools/list".into(),
            params: None,
        };
        let response = srv.handle_request(&request);
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 20);
    }

    #[test]
    fn test_unknown_method_is_protocol_error() {
        let srv = server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: "bogus/method".into(),
            params: None,
        };
        let response = srv.handle_request(&request);
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_missing_argument_is_tool_error() {
        let srv = server();
        let err = srv
            .execute_tool("create_feature", &json!({ "name": "auth" }))
            .unwrap_err();
        assert!(err.contains("description"));
    }

    #[test]
    fn test_unknown_tool() {
        let srv = server();
        assert!(srv.execute_tool("no_such_tool", &json!({})).is_err());
    }

    #[test]
    fn test_stage_and_commit_flow() {
        let srv = server();

        srv.execute_tool(
            "create_feature",
            &json!({
                "name": "auth", "description": "d", "specification": "s",
                "session_id": "sess1"
            }),
        )
        .unwrap();
        srv.execute_tool(
            "create_task",
            &json!({
                "feature_name": "auth", "name": "hash", "description": "d",
                "specification": "s", "priority": 7, "session_id": "sess1"
            }),
        )
        .unwrap();
        // Dependency on a task staged later in the same batch.
        srv.execute_tool(
            "create_dependency",
            &json!({
                "feature_name": "auth", "task_name": "login",
                "depends_on_task_name": "hash", "session_id": "sess1"
            }),
        )
        .unwrap();
        srv.execute_tool(
            "create_task",
            &json!({
                "feature_name": "auth", "name": "login", "description": "d",
                "specification": "s", "priority": 9, "session_id": "sess1"
            }),
        )
        .unwrap();

        // Nothing applied yet.
        assert!(srv.store.list_features().unwrap().is_empty());
        let staged = srv
            .execute_tool("list_staged_changes", &json!({ "session_id": "sess1" }))
            .unwrap();
        let staged: Value = serde_json::from_str(&staged).unwrap();
        assert_eq!(staged["tasks"].as_array().unwrap().len(), 2);

        srv.execute_tool("commit_staged_changes", &json!({ "session_id": "sess1" }))
            .unwrap();

        let feature = srv.store.get_feature_by_name("auth").unwrap().unwrap();
        let login = srv
            .store
            .get_task_by_name("login", &feature.id)
            .unwrap()
            .unwrap();
        let deps = srv.store.get_dependencies(&login.id).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "hash");
    }

    #[test]
    fn test_lifecycle_tools() {
        let srv = server();
        let f = seed_feature(&srv.store, "auth");
        seed_task(&srv.store, &f.id, "login", 5);

        srv.execute_tool(
            "start_task",
            &json!({ "feature_name": "auth", "name": "login" }),
        )
        .unwrap();
        let task = srv.store.get_task_by_name("login", &f.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        // Completing without a summary fails with a typed message.
        let err = srv
            .execute_tool(
                "update_task_status",
                &json!({ "feature_name": "auth", "name": "login", "status": "completed" }),
            )
            .unwrap_err();
        assert!(err.contains("summary"));

        srv.execute_tool(
            "complete_task",
            &json!({
                "feature_name": "auth", "name": "login",
                "completion_summary": "implemented"
            }),
        )
        .unwrap();
        let task = srv.store.get_task_by_name("login", &f.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        // An invalid transition surfaces as a tool error.
        let err = srv
            .execute_tool(
                "update_task_status",
                &json!({ "feature_name": "auth", "name": "login", "status": "pending" }),
            )
            .unwrap_err();
        assert!(err.contains("invalid transition"));
    }

    #[test]
    fn test_report_task_blocked_appends_reason() {
        let srv = server();
        let f = seed_feature(&srv.store, "auth");
        seed_task(&srv.store, &f.id, "login", 0);

        srv.execute_tool(
            "report_task_blocked",
            &json!({
                "feature_name": "auth", "name": "login",
                "reason": "waiting on schema migration"
            }),
        )
        .unwrap();

        let task = srv.store.get_task_by_name("login", &f.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task
            .specification
            .ends_with("### Blocked Reason\nwaiting on schema migration"));
    }

    #[test]
    fn test_dependency_tools() {
        let srv = server();
        let f = seed_feature(&srv.store, "auth");
        let a = seed_task(&srv.store, &f.id, "a", 0);
        let b = seed_task(&srv.store, &f.id, "b", 0);
        srv.store.create_dependency(&a.id, &b.id).unwrap();

        let deps = srv
            .execute_tool(
                "get_task_dependencies",
                &json!({ "feature_name": "auth", "name": "a" }),
            )
            .unwrap();
        let deps: Value = serde_json::from_str(&deps).unwrap();
        assert_eq!(deps["dependencies"][0]["name"], "b");

        srv.execute_tool(
            "delete_dependency",
            &json!({
                "feature_name": "auth", "task_name": "a",
                "depends_on_task_name": "b"
            }),
        )
        .unwrap();
        assert!(srv.store.get_dependencies(&a.id).unwrap().is_empty());
    }

    #[test]
    fn test_graph_json_tool() {
        let srv = server();
        let f = seed_feature(&srv.store, "auth");
        seed_task(&srv.store, &f.id, "t", 0);

        let graph = srv.execute_tool("get_graph_json", &json!({})).unwrap();
        let graph: Value = serde_json::from_str(&graph).unwrap();
        assert_eq!(graph["nodes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_feature_crud_tools() {
        let srv = server();
        seed_feature(&srv.store, "auth");

        srv.execute_tool(
            "update_feature",
            &json!({ "name": "auth", "description": "better" }),
        )
        .unwrap();
        let text = srv
            .execute_tool("get_feature", &json!({ "name": "auth" }))
            .unwrap();
        let feature: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(feature["description"], "better");

        srv.execute_tool("delete_feature", &json!({ "name": "auth" }))
            .unwrap();
        let err = srv
            .execute_tool("get_feature", &json!({ "name": "auth" }))
            .unwrap_err();
        assert!(err.contains("not found"));
    }
}
