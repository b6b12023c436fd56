use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_policy::ProcessSection;
use flycode_sandbox::PathSandbox;

const STRIPPED_SUFFIXES: &[&str] = &[".exe", ".cmd", ".bat", ".ps1"];
const SAFE_BASE_ENV_KEYS: &[&str] = &[
    "PATH",
    "SystemRoot",
    "ComSpec",
    "PATHEXT",
    "HOME",
    "USERPROFILE",
    "TMP",
    "TEMP",
];

fn strip_known_suffix(name: &str) -> &str {
    for suffix in STRIPPED_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped;
        }
    }
    name
}

/// Basename of `command`, lowercased, with known executable suffixes
/// stripped — the allowlist key for `run`.
pub(crate) fn command_name_for_run(command: &str) -> String {
    let basename = Path::new(command)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| command.to_string());
    strip_known_suffix(&basename.to_lowercase()).to_string()
}

/// First shell token of `command`, honoring single/double quotes, then the
/// same normalization as `command_name_for_run` — the allowlist key for
/// `exec`.
pub(crate) fn command_name_for_exec(command: &str) -> String {
    let trimmed = command.trim_start();
    let mut chars = trimmed.chars().peekable();
    let mut token = String::new();

    if let Some(&quote) = chars.peek()
        && (quote == '\'' || quote == '"')
    {
        chars.next();
        for c in chars.by_ref() {
            if c == quote {
                break;
            }
            token.push(c);
        }
    } else {
        for c in chars.by_ref() {
            if c.is_whitespace() {
                break;
            }
            token.push(c);
        }
    }

    command_name_for_run(&token)
}

pub(crate) fn assert_command_allowed(name: &str, process: &ProcessSection) -> Result<()> {
    if process
        .allowed_commands
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
    {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("command `{name}` is not in allowed_commands")))
    }
}

pub(crate) fn resolve_cwd(
    caller_cwd: Option<&str>,
    process: &ProcessSection,
    allowed_roots: &[PathBuf],
    sandbox: &PathSandbox,
) -> Result<PathBuf> {
    let candidate = match caller_cwd {
        Some(raw) => flycode_sandbox::normalize_input(raw),
        None => process
            .allowed_cwds
            .first()
            .cloned()
            .or_else(|| allowed_roots.first().cloned())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))),
    };
    sandbox.assert_allowed(&candidate)?;
    Ok(candidate)
}

pub(crate) fn clamp_timeout_ms(caller_timeout_ms: Option<u64>, process: &ProcessSection) -> u64 {
    let requested = caller_timeout_ms.unwrap_or(process.default_timeout_ms);
    requested.clamp(100, process.max_timeout_ms)
}

pub(crate) fn build_env(caller_env: Option<&HashMap<String, String>>, allow_env_keys: &[String]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in SAFE_BASE_ENV_KEYS {
        if let Ok(value) = std::env::var(key) {
            env.insert((*key).to_string(), value);
        }
    }
    if let Some(caller_env) = caller_env {
        for (key, value) in caller_env {
            if allow_env_keys.iter().any(|allowed| allowed == key) {
                env.insert(key.clone(), value.clone());
            }
        }
    }
    env
}
