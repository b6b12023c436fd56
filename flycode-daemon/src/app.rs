use std::path::Path;
use std::sync::Arc;

use flycode_confirm::ConfirmationCenter;
use flycode_errors::Result;
use flycode_fs::FileService;
use flycode_mcp::Dispatcher;
use flycode_process::ProcessRunner;
use flycode_redact::Redactor;
use flycode_sandbox::PathSandbox;
use flycode_sandbox::SandboxConfig;
use flycode_write::WriteBatchManager;
use flycode_write::WriteManager;

/// Load `policy.yaml`/`app-config.json` under `config_dir` and wire every
/// component into a single `Dispatcher`, the same assembly order the
/// teacher's `codex-mcp-server` uses to build its `Config` then hand it to
/// `MessageProcessor`.
pub fn build_dispatcher(config_dir: &Path) -> Result<Dispatcher> {
    let policy = flycode_policy::load(config_dir)?;

    let sandbox = Arc::new(PathSandbox::new(SandboxConfig::from_policy(
        policy.allowed_roots.clone(),
        policy.deny_globs.clone(),
        policy.site_allowlist.clone(),
    ))?);
    let redactor = Arc::new(Redactor::new(&policy.redaction));
    let file_service = Arc::new(FileService::new(
        Arc::clone(&sandbox),
        policy.limits.clone(),
        policy.mutation.clone(),
        Arc::clone(&redactor),
        policy.limits.max_inject_tokens,
    ));
    let write_manager = Arc::new(WriteManager::new(
        Arc::clone(&sandbox),
        Arc::clone(&file_service),
        policy.write.clone(),
    ));
    let write_batch_manager = Arc::new(WriteBatchManager::new(
        Arc::clone(&sandbox),
        Arc::clone(&file_service),
        policy.write.clone(),
        policy.mutation.clone(),
    ));
    let process_runner = Arc::new(ProcessRunner::new(
        Arc::clone(&sandbox),
        Arc::clone(&redactor),
        policy.process.clone(),
        policy.limits.max_inject_tokens,
    ));
    let confirm = Arc::new(ConfirmationCenter::new(config_dir)?);

    Ok(Dispatcher::new(
        sandbox,
        file_service,
        write_manager,
        write_batch_manager,
        process_runner,
        confirm,
        config_dir,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builds_dispatcher_from_fresh_config_dir() {
        let dir = tempdir().expect("tempdir");
        build_dispatcher(dir.path()).expect("wires every component");
        assert!(dir.path().join("policy.yaml").exists());
        assert!(dir.path().join("app-config.json").exists());
    }
}
