//! End-to-end dispatcher scenarios: authorization, confirmation staging
//! and resume, and the write/process gates that sit behind it
//! (`spec.md` §8), driven only through `Dispatcher`'s public surface —
//! the same integration-test placement the teacher uses for its own
//! `mcp-server/tests/*.rs` suites.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use flycode_confirm::ConfirmationCenter;
use flycode_confirm::ResolveInput;
use flycode_fs::FileService;
use flycode_mcp::Dispatcher;
use flycode_mcp::JsonRpcRequest;
use flycode_mcp::TOOL_NAMES;
use flycode_policy::Limits;
use flycode_policy::MutationSection;
use flycode_policy::ProcessSection;
use flycode_policy::RedactionSection;
use flycode_policy::WriteSection;
use flycode_process::ProcessRunner;
use flycode_redact::Redactor;
use flycode_sandbox::PathSandbox;
use flycode_sandbox::SandboxConfig;
use flycode_write::WriteBatchManager;
use flycode_write::WriteManager;
use serde_json::Value;
use serde_json::json;
use tempfile::tempdir;

fn dispatcher(dir: &std::path::Path) -> Dispatcher {
    let sandbox = Arc::new(
        PathSandbox::new(SandboxConfig::from_policy(vec![dir.to_path_buf()], Vec::new(), vec!["site-a".to_string()]))
            .expect("sandbox"),
    );
    let redactor = Arc::new(Redactor::new(&RedactionSection::default()));
    let file_service = Arc::new(FileService::new(
        sandbox.clone(),
        Limits::default(),
        MutationSection::default(),
        redactor.clone(),
        8_000,
    ));
    let write = WriteSection {
        require_confirmation_default: true,
        allow_disable_confirmation: true,
        backup_on_overwrite: true,
        pending_ttl_seconds: 60,
    };
    let write_manager = Arc::new(WriteManager::new(sandbox.clone(), file_service.clone(), write.clone()));
    let write_batch_manager = Arc::new(WriteBatchManager::new(sandbox.clone(), file_service.clone(), write, MutationSection::default()));
    let process = ProcessSection {
        enabled: true,
        allowed_commands: vec!["echo".to_string()],
        allowed_cwds: vec![dir.to_path_buf()],
        ..ProcessSection::default()
    };
    let process_runner = Arc::new(ProcessRunner::new(sandbox.clone(), redactor, process, 8_000));
    let confirm = Arc::new(ConfirmationCenter::new(dir).expect("confirm center"));
    Dispatcher::new(sandbox, file_service, write_manager, write_batch_manager, process_runner, confirm, dir)
}

fn req(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: json!(id),
        method: method.to_string(),
        params,
    }
}

#[test]
fn initialize_reports_capabilities() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = dispatcher(dir.path());
    let response = dispatcher.dispatch("site-a", req(1, "initialize", json!({})), "t1");
    let result = response.result.expect("result");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(false));
}

#[test]
fn tools_list_returns_every_tool_name() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = dispatcher(dir.path());
    let response = dispatcher.dispatch("site-a", req(1, "tools/list", json!({})), "t1");
    let result = response.result.expect("result");
    let names: Vec<&str> = result["tools"].as_array().expect("tools").iter().map(|t| t["name"].as_str().expect("name")).collect();
    assert_eq!(names.len(), TOOL_NAMES.len());
}

#[test]
fn unauthorized_site_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = dispatcher(dir.path());
    let response = dispatcher.dispatch(
        "unknown-site",
        req(1, "tools/call", json!({"name": "fs.ls", "arguments": {"path": dir.path()}})),
        "t1",
    );
    let error = response.error.expect("error");
    assert_eq!(error.code, -32003);
}

#[test]
fn read_only_tool_skips_confirmation() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "hello").expect("seed");
    let dispatcher = dispatcher(dir.path());
    let response = dispatcher.dispatch(
        "site-a",
        req(1, "tools/call", json!({"name": "fs.read", "arguments": {"path": dir.path().join("a.txt")}})),
        "t1",
    );
    let result = response.result.expect("result");
    assert_eq!(result["meta"]["pendingConfirmationId"], Value::Null);
    assert!(!result["isError"].as_bool().expect("isError"));
}

#[test]
fn write_requires_confirmation_then_resumes_on_approval() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = dispatcher(dir.path());
    let target = dir.path().join("a.txt");

    let pending_response = dispatcher.dispatch(
        "site-a",
        req(1, "tools/call", json!({"name": "fs.write", "arguments": {"path": target, "content": "hi"}})),
        "t1",
    );
    let pending_result = pending_response.result.expect("result");
    let confirmation_id = pending_result["meta"]["pendingConfirmationId"].as_str().expect("pending id").to_string();
    assert!(!target.exists());

    dispatcher
        .confirm()
        .resolve(&confirmation_id, ResolveInput { approved: true, always_allow: false })
        .expect("approve");

    let committed_response = dispatcher.dispatch(
        "site-a",
        req(
            2,
            "tools/call",
            json!({"name": "fs.write", "arguments": {"path": target, "content": "hi", "confirmationId": confirmation_id}}),
        ),
        "t1",
    );
    assert!(committed_response.error.is_none());
    assert_eq!(std::fs::read_to_string(&target).expect("read"), "hi");
}

#[test]
fn process_run_rejects_commands_outside_allowlist_even_when_confirmed() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = dispatcher(dir.path());
    let pending_response = dispatcher.dispatch(
        "site-a",
        req(1, "tools/call", json!({"name": "process.run", "arguments": {"command": "rm", "args": ["-rf", "/"]}})),
        "t1",
    );
    let pending_result = pending_response.result.expect("result");
    let confirmation_id = pending_result["meta"]["pendingConfirmationId"].as_str().expect("pending id").to_string();

    dispatcher
        .confirm()
        .resolve(&confirmation_id, ResolveInput { approved: true, always_allow: false })
        .expect("approve");

    let response = dispatcher.dispatch(
        "site-a",
        req(
            2,
            "tools/call",
            json!({"name": "process.run", "arguments": {"confirmationId": confirmation_id}}),
        ),
        "t1",
    );
    let error = response.error.expect("error");
    assert_eq!(error.code, -32003);
}
