use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use flycode_confirm::ConfirmationCenter;
use flycode_confirm::ConfirmationStatus;
use flycode_confirm::CreatePendingInput;
use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_fs::ChmodResult;
use flycode_fs::DiffOptions;
use flycode_fs::FileService;
use flycode_fs::MvResult;
use flycode_fs::ReadOptions;
use flycode_fs::RmResult;
use flycode_fs::SearchOptions;
use flycode_fs::WriteMode;
use flycode_process::ExecInput;
use flycode_process::ProcessRunner;
use flycode_process::RunInput;
use flycode_sandbox::PathSandbox;
use flycode_write::PrepareWriteBatchInput;
use flycode_write::PrepareWriteFileInput;
use flycode_write::PrepareWriteInput;
use flycode_write::WriteBatchManager;
use flycode_write::WriteManager;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::args;
use crate::sinks::AuditRecord;
use crate::sinks::AuditSink;
use crate::sinks::ConsoleRecord;
use crate::sinks::ConsoleSink;
use crate::tools;
use crate::wire::JsonRpcRequest;
use crate::wire::JsonRpcResponse;
use crate::wire::McpToolCallResult;
use crate::wire::TextContent;
use crate::wire::ToolCallMeta;

/// What a valid, approved `confirmationId` resumes: either a previously
/// staged write (single or batch), or an arbitrary gated tool call whose
/// original arguments are the authoritative source (`spec.md` §4.J.3.d).
enum Resumed {
    None,
    WriteCommit(String),
    WriteBatchCommit(String),
    ToolCall(Value),
}

pub struct Dispatcher {
    sandbox: Arc<PathSandbox>,
    file_service: Arc<FileService>,
    write_manager: Arc<WriteManager>,
    write_batch_manager: Arc<WriteBatchManager>,
    process_runner: Arc<ProcessRunner>,
    confirm: Arc<ConfirmationCenter>,
    audit: AuditSink,
    console: ConsoleSink,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sandbox: Arc<PathSandbox>,
        file_service: Arc<FileService>,
        write_manager: Arc<WriteManager>,
        write_batch_manager: Arc<WriteBatchManager>,
        process_runner: Arc<ProcessRunner>,
        confirm: Arc<ConfirmationCenter>,
        config_dir: &std::path::Path,
    ) -> Self {
        Dispatcher {
            sandbox,
            file_service,
            write_manager,
            write_batch_manager,
            process_runner,
            confirm,
            audit: AuditSink::new(config_dir),
            console: ConsoleSink::new(config_dir),
        }
    }

    /// The confirmation center backing this dispatcher, for callers (the
    /// real transport's confirmation-approval endpoint, or a test) that
    /// need to resolve a pending confirmation outside of a `tools/call`.
    pub fn confirm(&self) -> &Arc<ConfirmationCenter> {
        &self.confirm
    }

    pub fn dispatch(&self, site: &str, request: JsonRpcRequest, trace_id: &str) -> JsonRpcResponse {
        let _span = tracing::info_span!("dispatch", trace_id, site, method = %request.method).entered();

        if request.jsonrpc != "2.0" || request.method.is_empty() {
            return JsonRpcResponse::from_app_error(request.id, &AppError::InvalidInput("malformed envelope".to_string()));
        }

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(request.id, self.handle_initialize()),
            "tools/list" => JsonRpcResponse::success(request.id, json!({ "tools": tools::tool_descriptors() })),
            "tools/call" => self.handle_tools_call(site, request.id, &request.params, trace_id),
            _ => JsonRpcResponse::from_app_error(request.id, &AppError::NotFound(format!("unknown method `{}`", request.method))),
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "flycode", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": { "listChanged": false } },
        })
    }

    fn handle_tools_call(&self, site: &str, id: Value, params: &Value, trace_id: &str) -> JsonRpcResponse {
        let start = Instant::now();
        let name = args::str_field(params, "name");
        let raw_arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let arguments = args::sanitize_arguments(&raw_arguments);

        let outcome = self.call_tool(site, &name, &arguments, trace_id);

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let bytes: u64 = result.content.iter().map(|c| c.text.len() as u64).sum();
                self.audit.record(AuditRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    site: site.to_string(),
                    command: name.clone(),
                    path: args::opt_str_field(&arguments, "path"),
                    outcome: "ok",
                    bytes: Some(bytes),
                    truncated: result.meta.truncated,
                    user_confirm: None,
                    trace_id: trace_id.to_string(),
                    audit_id: result.meta.audit_id.clone(),
                    error_code: None,
                    message: None,
                });
                self.console.record(ConsoleRecord {
                    id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    site: site.to_string(),
                    method: "tools/call".to_string(),
                    tool: Some(name.clone()),
                    status: if result.meta.pending_confirmation_id.is_some() { "pending" } else { "success" },
                    duration_ms: Some(duration_ms),
                    truncated: Some(result.meta.truncated),
                    request: Some(arguments),
                    response: None,
                });
                JsonRpcResponse::success(id, serde_json::to_value(&result).unwrap_or(Value::Null))
            }
            Err(err) => {
                self.audit.record(AuditRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    site: site.to_string(),
                    command: name.clone(),
                    path: args::opt_str_field(&arguments, "path"),
                    outcome: "error",
                    bytes: None,
                    truncated: false,
                    user_confirm: None,
                    trace_id: trace_id.to_string(),
                    audit_id: Uuid::new_v4().to_string(),
                    error_code: Some(err.code()),
                    message: Some(err.message()),
                });
                self.console.record(ConsoleRecord {
                    id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    site: site.to_string(),
                    method: "tools/call".to_string(),
                    tool: Some(name),
                    status: "failed",
                    duration_ms: Some(duration_ms),
                    truncated: None,
                    request: Some(arguments),
                    response: None,
                });
                JsonRpcResponse::from_app_error(id, &err)
            }
        }
    }

    fn call_tool(&self, site: &str, name: &str, arguments: &Value, trace_id: &str) -> Result<McpToolCallResult> {
        self.sandbox.assert_site_allowed(site)?;
        if name.is_empty() || !tools::TOOL_NAMES.contains(&name) {
            return Err(AppError::NotFound(format!("unknown tool `{name}`")));
        }

        let resumed = self.resolve_confirmation(site, name, arguments)?;

        let requires_confirmation = tools::tool_needs_confirmation(name) && !self.confirm.should_skip_confirmation(site, name) && matches!(resumed, Resumed::None);

        if requires_confirmation {
            return self.stage_pending(site, name, arguments, trace_id);
        }

        let effective_arguments = match &resumed {
            Resumed::ToolCall(stored) => stored,
            _ => arguments,
        };

        let (value, truncated) = self.execute_tool(name, effective_arguments, site, trace_id, &resumed)?;

        Ok(McpToolCallResult {
            content: vec![TextContent::new(serde_json::to_string_pretty(&value).unwrap_or_default())],
            is_error: false,
            meta: ToolCallMeta {
                audit_id: Uuid::new_v4().to_string(),
                truncated,
                pending_confirmation_id: None,
            },
        })
    }

    fn resolve_confirmation(&self, site: &str, name: &str, arguments: &Value) -> Result<Resumed> {
        let Some(confirmation_id) = args::opt_str_field(arguments, "confirmationId") else {
            return Ok(Resumed::None);
        };

        let entry = self
            .confirm
            .get_by_id(&confirmation_id)
            .ok_or_else(|| AppError::NotFound(format!("no confirmation `{confirmation_id}`")))?;

        if entry.site != site || entry.tool != name {
            return Err(AppError::Forbidden("confirmation does not match this site/tool".to_string()));
        }

        match entry.status {
            ConfirmationStatus::Approved => {}
            ConfirmationStatus::Pending => return Err(AppError::WriteConfirmationRequired(format!("confirmation `{confirmation_id}` is still pending"))),
            ConfirmationStatus::Rejected => return Err(AppError::Forbidden(format!("confirmation `{confirmation_id}` was rejected"))),
            ConfirmationStatus::Timeout => return Err(AppError::NotFound(format!("confirmation `{confirmation_id}` expired"))),
        }

        let payload = self
            .confirm
            .get_request_payload(&confirmation_id)
            .ok_or_else(|| AppError::NotFound(format!("no confirmation `{confirmation_id}`")))?;
        let kind = payload.get("kind").and_then(Value::as_str).unwrap_or("");

        match kind {
            "write-commit" => Ok(Resumed::WriteCommit(args::str_field(&payload, "op_id"))),
            "write-batch-commit" => Ok(Resumed::WriteBatchCommit(args::str_field(&payload, "op_id"))),
            _ => Ok(Resumed::ToolCall(payload.get("arguments").cloned().unwrap_or_else(|| json!({})))),
        }
    }

    fn stage_pending(&self, site: &str, name: &str, arguments: &Value, trace_id: &str) -> Result<McpToolCallResult> {
        let request = match name {
            "fs.write" => {
                let prepared = self.prepare_write(arguments, site, trace_id, true)?;
                json!({ "kind": "write-commit", "op_id": prepared.op_id, "trace_id": trace_id })
            }
            "fs.writeBatch" => {
                let prepared = self.prepare_write_batch(arguments, site, trace_id, true)?;
                json!({ "kind": "write-batch-commit", "op_id": prepared.op_id, "trace_id": trace_id })
            }
            _ => json!({ "kind": "tool-call", "name": name, "arguments": arguments, "trace_id": trace_id }),
        };

        let entry = self.confirm.create_pending(CreatePendingInput {
            site: site.to_string(),
            tool: name.to_string(),
            summary: format!("confirm {name}"),
            trace_id: trace_id.to_string(),
            request,
        });

        Ok(McpToolCallResult {
            content: vec![TextContent::new("Pending confirmation")],
            is_error: false,
            meta: ToolCallMeta {
                audit_id: Uuid::new_v4().to_string(),
                truncated: false,
                pending_confirmation_id: Some(entry.id),
            },
        })
    }

    fn prepare_write(&self, arguments: &Value, site: &str, trace_id: &str, disable_confirmation: bool) -> Result<flycode_write::PrepareWriteResult> {
        let path = args::required_path_field(arguments, "path")?;
        let mode = parse_write_mode(arguments);
        let content = args::str_field(arguments, "content");
        self.write_manager.prepare(PrepareWriteInput {
            path,
            mode,
            content,
            site: site.to_string(),
            trace_id: trace_id.to_string(),
            expected_sha256: args::opt_str_field(arguments, "expected_sha256"),
            disable_confirmation,
        })
    }

    fn prepare_write_batch(
        &self,
        arguments: &Value,
        site: &str,
        trace_id: &str,
        disable_confirmation: bool,
    ) -> Result<flycode_write::PrepareWriteBatchResult> {
        let files = arguments
            .get("files")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::InvalidInput("`files` is required".to_string()))?
            .iter()
            .map(|file| {
                Ok(PrepareWriteFileInput {
                    path: args::required_path_field(file, "path")?,
                    mode: file.get("mode").and_then(Value::as_str).and_then(|m| serde_json::from_value(json!(m)).ok()),
                    content: args::str_field(file, "content"),
                    expected_sha256: args::opt_str_field(file, "expected_sha256"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_batch_manager.prepare(PrepareWriteBatchInput {
            files,
            site: site.to_string(),
            trace_id: trace_id.to_string(),
            disable_confirmation,
        })
    }

    fn execute_tool(&self, name: &str, arguments: &Value, site: &str, trace_id: &str, resumed: &Resumed) -> Result<(Value, bool)> {
        match name {
            "fs.ls" => {
                let path = args::required_path_field(arguments, "path")?;
                let entries = self.file_service.ls(&path, args::u32_field(arguments, "depth"), args::opt_str_field(arguments, "glob").as_deref())?;
                Ok((serde_json::to_value(entries).unwrap_or(Value::Null), false))
            }
            "fs.mkdir" => {
                let path = args::required_path_field(arguments, "path")?;
                self.file_service.mkdir(&path, args::bool_field(arguments, "parents", false))?;
                Ok((json!({ "ok": true }), false))
            }
            "fs.read" => {
                let path = args::required_path_field(arguments, "path")?;
                let opts = ReadOptions {
                    range: args::opt_str_field(arguments, "range"),
                    line: args::u32_field(arguments, "line"),
                    lines: args::opt_str_field(arguments, "lines"),
                    encoding: args::opt_str_field(arguments, "encoding"),
                    include_meta: args::bool_field(arguments, "include_meta", false),
                };
                let result = self.file_service.read(&path, &opts)?;
                let truncated = result.truncated;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), truncated))
            }
            "fs.search" => {
                let path = args::required_path_field(arguments, "path")?;
                let opts = SearchOptions {
                    query: args::str_field(arguments, "query"),
                    regex: args::bool_field(arguments, "regex", false),
                    glob: args::opt_str_field(arguments, "glob"),
                    limit: args::u32_field(arguments, "limit"),
                    extensions: args::str_list_field(arguments, "extensions"),
                    min_bytes: args::u64_field(arguments, "min_bytes"),
                    max_bytes: args::u64_field(arguments, "max_bytes"),
                    mtime_from: args::i64_field(arguments, "mtime_from"),
                    mtime_to: args::i64_field(arguments, "mtime_to"),
                    context_lines: args::u32_field(arguments, "context_lines"),
                };
                let result = self.file_service.search(&path, &opts)?;
                let truncated = result.truncated;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), truncated))
            }
            "fs.rm" => {
                let path = args::required_path_field(arguments, "path")?;
                let result: RmResult = self.file_service.rm(&path, args::bool_field(arguments, "recursive", false), args::bool_field(arguments, "force", false))?;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), false))
            }
            "fs.mv" => {
                let from = args::required_path_field(arguments, "from")?;
                let to = args::required_path_field(arguments, "to")?;
                let result: MvResult = self.file_service.mv(&from, &to, args::bool_field(arguments, "overwrite", false))?;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), false))
            }
            "fs.chmod" => {
                let path = args::required_path_field(arguments, "path")?;
                let mode = args::required_str_field(arguments, "mode")?;
                let result: ChmodResult = self.file_service.chmod(&path, &mode)?;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), false))
            }
            "fs.diff" => {
                let opts = DiffOptions {
                    left_path: args::opt_str_field(arguments, "left_path"),
                    right_path: args::opt_str_field(arguments, "right_path"),
                    right_content: args::opt_str_field(arguments, "right_content"),
                    context_lines: args::u32_field(arguments, "context_lines"),
                };
                let result = self.file_service.diff(&opts)?;
                let truncated = result.truncated;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), truncated))
            }
            "fs.write" => {
                let result = match resumed {
                    Resumed::WriteCommit(op_id) => self.write_manager.commit(op_id, true, site)?,
                    _ => {
                        let prepared = self.prepare_write(arguments, site, trace_id, true)?;
                        self.write_manager.commit(&prepared.op_id, true, site)?
                    }
                };
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), false))
            }
            "fs.writeBatch" => {
                let result = match resumed {
                    Resumed::WriteBatchCommit(op_id) => self.write_batch_manager.commit(op_id, true, site)?,
                    _ => {
                        let prepared = self.prepare_write_batch(arguments, site, trace_id, true)?;
                        self.write_batch_manager.commit(&prepared.op_id, true, site)?
                    }
                };
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), false))
            }
            "process.run" => {
                let input = RunInput {
                    command: args::required_str_field(arguments, "command")?,
                    args: args::str_list_field(arguments, "args").unwrap_or_default(),
                    cwd: args::opt_str_field(arguments, "cwd"),
                    timeout_ms: args::u64_field(arguments, "timeout_ms"),
                    env: args::string_map_field(arguments, "env"),
                };
                let result = self.process_runner.run(&input)?;
                let truncated = result.truncated;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), truncated))
            }
            "shell.exec" => {
                let input = ExecInput {
                    command: args::required_str_field(arguments, "command")?,
                    cwd: args::opt_str_field(arguments, "cwd"),
                    timeout_ms: args::u64_field(arguments, "timeout_ms"),
                    env: args::string_map_field(arguments, "env"),
                };
                let result = self.process_runner.exec(&input)?;
                let truncated = result.truncated;
                Ok((serde_json::to_value(result).unwrap_or(Value::Null), truncated))
            }
            _ => Err(AppError::NotFound(format!("unknown tool `{name}`"))),
        }
    }
}

fn parse_write_mode(arguments: &Value) -> WriteMode {
    arguments
        .get("mode")
        .and_then(Value::as_str)
        .and_then(|m| serde_json::from_value(json!(m)).ok())
        .unwrap_or(WriteMode::Overwrite)
}

