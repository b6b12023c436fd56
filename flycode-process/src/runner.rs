use std::sync::Arc;

use flycode_errors::Result;
use flycode_policy::ProcessSection;
use flycode_redact::Redactor;
use flycode_sandbox::PathSandbox;

use crate::capture::spawn_and_collect;
use crate::gating;
use crate::types::ExecInput;
use crate::types::ExecResult;
use crate::types::RunInput;

/// Process Runner: spawns allowlisted commands under a sandboxed cwd and
/// returns captured, redacted, token-budgeted output (`spec.md` §4.H).
pub struct ProcessRunner {
    sandbox: Arc<PathSandbox>,
    redactor: Arc<Redactor>,
    process: ProcessSection,
    max_inject_tokens: u32,
}

impl ProcessRunner {
    pub fn new(
        sandbox: Arc<PathSandbox>,
        redactor: Arc<Redactor>,
        process: ProcessSection,
        max_inject_tokens: u32,
    ) -> Self {
        ProcessRunner {
            sandbox,
            redactor,
            process,
            max_inject_tokens,
        }
    }

    fn finish_text(&self, content: Vec<u8>) -> (String, bool) {
        let lossy = String::from_utf8_lossy(&content).into_owned();
        let (redacted, _) = self.redactor.redact(&lossy);
        flycode_redact::apply_token_budget(&redacted, self.max_inject_tokens)
    }

    /// Direct exec: no shell interpretation, `command` plus an explicit
    /// argument array.
    pub fn run(&self, input: &RunInput) -> Result<ExecResult> {
        let name = gating::command_name_for_run(&input.command);
        gating::assert_command_allowed(&name, &self.process)?;
        let cwd = gating::resolve_cwd(
            input.cwd.as_deref(),
            &self.process,
            self.sandbox.allowed_roots(),
            &self.sandbox,
        )?;
        let timeout_ms = gating::clamp_timeout_ms(input.timeout_ms, &self.process);
        let env = gating::build_env(input.env.as_ref(), &self.process.allow_env_keys);

        let raw = spawn_and_collect(
            &input.command,
            &input.args,
            &cwd,
            &env,
            timeout_ms,
            self.process.max_output_bytes,
            false,
        )?;

        let (stdout, stdout_truncated) = self.finish_text(raw.stdout);
        let (stderr, stderr_truncated) = self.finish_text(raw.stderr);
        let command_display = format!("{} {}", input.command, input.args.join(" "));

        Ok(ExecResult {
            command_display: command_display.trim().to_string(),
            cwd: cwd.to_string_lossy().into_owned(),
            exit_code: raw.exit_code,
            stdout,
            stderr,
            duration_ms: raw.duration.as_millis() as u64,
            timed_out: raw.timed_out,
            truncated: raw.truncated || stdout_truncated || stderr_truncated,
        })
    }

    /// Shell exec: `command` is a single string interpreted by the host
    /// shell (`/bin/sh -c` on unix, `cmd /C` on windows).
    pub fn exec(&self, input: &ExecInput) -> Result<ExecResult> {
        let name = gating::command_name_for_exec(&input.command);
        gating::assert_command_allowed(&name, &self.process)?;
        let cwd = gating::resolve_cwd(
            input.cwd.as_deref(),
            &self.process,
            self.sandbox.allowed_roots(),
            &self.sandbox,
        )?;
        let timeout_ms = gating::clamp_timeout_ms(input.timeout_ms, &self.process);
        let env = gating::build_env(input.env.as_ref(), &self.process.allow_env_keys);

        let raw = spawn_and_collect(
            &input.command,
            &[],
            &cwd,
            &env,
            timeout_ms,
            self.process.max_output_bytes,
            true,
        )?;

        let (stdout, stdout_truncated) = self.finish_text(raw.stdout);
        let (stderr, stderr_truncated) = self.finish_text(raw.stderr);

        Ok(ExecResult {
            command_display: input.command.clone(),
            cwd: cwd.to_string_lossy().into_owned(),
            exit_code: raw.exit_code,
            stdout,
            stderr,
            duration_ms: raw.duration.as_millis() as u64,
            timed_out: raw.timed_out,
            truncated: raw.truncated || stdout_truncated || stderr_truncated,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use flycode_policy::RedactionSection;
    use flycode_sandbox::SandboxConfig;
    use tempfile::tempdir;

    use super::*;

    fn runner(dir: &std::path::Path, process: ProcessSection) -> ProcessRunner {
        let sandbox = PathSandbox::new(SandboxConfig::from_policy(
            vec![dir.to_path_buf()],
            Vec::new(),
            vec!["test-site".to_string()],
        ))
        .expect("build sandbox");
        let redactor = Redactor::new(&RedactionSection::default());
        ProcessRunner::new(Arc::new(sandbox), Arc::new(redactor), process, 100_000)
    }

    fn echo_process(dir: &std::path::Path) -> ProcessSection {
        ProcessSection {
            enabled: true,
            allowed_commands: vec!["echo".to_string(), "sh".to_string(), "sleep".to_string()],
            allowed_cwds: vec![dir.to_path_buf()],
            ..ProcessSection::default()
        }
    }

    #[test]
    fn run_rejects_commands_outside_allowlist() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path(), echo_process(dir.path()));
        let input = RunInput {
            command: "rm".to_string(),
            args: vec!["-rf".to_string(), "/".to_string()],
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            ..RunInput::default()
        };
        let err = runner.run(&input).unwrap_err();
        assert!(matches!(err, flycode_errors::AppError::Forbidden(_)));
    }

    #[test]
    fn run_captures_stdout_for_allowed_command() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path(), echo_process(dir.path()));
        let input = RunInput {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            ..RunInput::default()
        };
        let result = runner.run(&input).unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
    }

    #[test]
    fn exec_runs_through_shell() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path(), echo_process(dir.path()));
        let input = ExecInput {
            command: "echo one && echo two".to_string(),
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            ..ExecInput::default()
        };
        let result = runner.exec(&input).unwrap();
        assert_eq!(result.stdout.trim(), "one\ntwo");
    }

    #[test]
    fn timeout_kills_long_running_command() {
        let dir = tempdir().unwrap();
        let mut process = echo_process(dir.path());
        process.default_timeout_ms = 100;
        process.max_timeout_ms = 200;
        let runner = runner(dir.path(), process);
        let input = RunInput {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            ..RunInput::default()
        };
        let result = runner.run(&input).unwrap();
        assert!(result.timed_out);
    }

    #[test]
    fn cwd_outside_sandbox_is_rejected() {
        let dir = tempdir().unwrap();
        let runner = runner(dir.path(), echo_process(dir.path()));
        let input = RunInput {
            command: "echo".to_string(),
            args: vec!["hi".to_string()],
            cwd: Some("/etc".to_string()),
            ..RunInput::default()
        };
        let err = runner.run(&input).unwrap_err();
        assert!(matches!(err, flycode_errors::AppError::PolicyBlocked(_)));
    }

    #[test]
    fn cwd_falls_back_to_allowed_root_when_process_has_no_allowed_cwds() {
        let dir = tempdir().unwrap();
        let process = ProcessSection {
            enabled: true,
            allowed_commands: vec!["echo".to_string()],
            allowed_cwds: Vec::new(),
            ..ProcessSection::default()
        };
        let runner = runner(dir.path(), process);
        let input = RunInput {
            command: "echo".to_string(),
            args: vec!["hi".to_string()],
            cwd: None,
            ..RunInput::default()
        };
        let result = runner.run(&input).expect("falls back to sandbox root, not the process cwd");
        assert_eq!(result.cwd, dir.path().to_string_lossy());
    }

    #[test]
    fn env_keys_not_allowlisted_are_dropped() {
        let dir = tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("SECRET_TOKEN".to_string(), "leak-me".to_string());
        let input = ExecInput {
            command: "env".to_string(),
            cwd: Some(dir.path().to_string_lossy().into_owned()),
            env: Some(env),
            ..ExecInput::default()
        };
        let mut process = echo_process(dir.path());
        process.allowed_commands.push("env".to_string());
        let runner = runner(dir.path(), process);
        let result = runner.exec(&input).unwrap();
        assert!(!result.stdout.contains("leak-me"));
    }
}
