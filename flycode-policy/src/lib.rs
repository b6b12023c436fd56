//! Canonical policy model: load/normalize/validate/persist `PolicyConfig`,
//! plus the small `AppConfig` sidecar (theme, always-allow map).
//!
//! Mirrors the shape of `codex-core::config::Config::load`: read what's on
//! disk, fall back to defaults field-by-field on type mismatch, then run
//! one idempotent normalization pass and re-persist so the file on disk is
//! always self-describing.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use flycode_errors::AppError;
use flycode_errors::Result;
use serde::Deserialize;
use serde::Serialize;

const POLICY_FILE: &str = "policy.yaml";
const APP_CONFIG_FILE: &str = "app-config.json";

const MIN_MAX_FILE_BYTES: u64 = 1;
const MAX_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;
const MIN_MAX_INJECT_TOKENS: u32 = 200;
const MAX_MAX_INJECT_TOKENS: u32 = 200_000;
const MIN_MAX_SEARCH_MATCHES: u32 = 1;
const MAX_MAX_SEARCH_MATCHES: u32 = 10_000;
const MIN_PENDING_TTL_SECONDS: u64 = 30;
const MAX_PENDING_TTL_SECONDS: u64 = 3600;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const MIN_MAX_OUTPUT_BYTES: u64 = 1024;
const MAX_MAX_OUTPUT_BYTES: u64 = 5 * 1024 * 1024;
const MIN_TOKEN_TTL_DAYS: u32 = 1;
const MAX_TOKEN_TTL_DAYS: u32 = 365;
const MIN_PAIR_CODE_TTL_MINUTES: u32 = 1;
const MAX_PAIR_CODE_TTL_MINUTES: u32 = 60;

const DEFAULT_REPLACEMENT: &str = "***REDACTED***";
const ALLOWED_REGEX_FLAGS: &str = "gimsuy";

fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    value.clamp(min, max)
}

fn clamp_u32(value: u32, min: u32, max: u32) -> u32 {
    value.clamp(min, max)
}

fn dedup_preserve_order<T: Eq + std::hash::Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Lexically resolve `.`/`..` without touching the filesystem, then
/// absolutize relative to the process cwd. Grounded on
/// `codex-core::safety::is_write_patch_constrained_to_writable_paths`'s
/// `normalize` helper, generalized from patch paths to policy roots.
pub fn absolutize(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "Limits::default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "Limits::default_max_inject_tokens")]
    pub max_inject_tokens: u32,
    #[serde(default = "Limits::default_max_search_matches")]
    pub max_search_matches: u32,
}

impl Limits {
    fn default_max_file_bytes() -> u64 {
        10 * 1024 * 1024
    }
    fn default_max_inject_tokens() -> u32 {
        8_000
    }
    fn default_max_search_matches() -> u32 {
        500
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_file_bytes: Self::default_max_file_bytes(),
            max_inject_tokens: Self::default_max_inject_tokens(),
            max_search_matches: Self::default_max_search_matches(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteSection {
    #[serde(default = "WriteSection::default_require_confirmation")]
    pub require_confirmation_default: bool,
    #[serde(default = "WriteSection::default_allow_disable_confirmation")]
    pub allow_disable_confirmation: bool,
    #[serde(default = "WriteSection::default_backup_on_overwrite")]
    pub backup_on_overwrite: bool,
    #[serde(default = "WriteSection::default_pending_ttl_seconds")]
    pub pending_ttl_seconds: u64,
}

impl WriteSection {
    fn default_require_confirmation() -> bool {
        true
    }
    fn default_allow_disable_confirmation() -> bool {
        false
    }
    fn default_backup_on_overwrite() -> bool {
        true
    }
    fn default_pending_ttl_seconds() -> u64 {
        300
    }
}

impl Default for WriteSection {
    fn default() -> Self {
        WriteSection {
            require_confirmation_default: Self::default_require_confirmation(),
            allow_disable_confirmation: Self::default_allow_disable_confirmation(),
            backup_on_overwrite: Self::default_backup_on_overwrite(),
            pending_ttl_seconds: Self::default_pending_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSection {
    #[serde(default = "MutationSection::default_true")]
    pub allow_rm: bool,
    #[serde(default = "MutationSection::default_true")]
    pub allow_mv: bool,
    #[serde(default = "MutationSection::default_true")]
    pub allow_chmod: bool,
    #[serde(default = "MutationSection::default_true")]
    pub allow_write_batch: bool,
}

impl MutationSection {
    fn default_true() -> bool {
        true
    }
}

impl Default for MutationSection {
    fn default() -> Self {
        MutationSection {
            allow_rm: true,
            allow_mv: true,
            allow_chmod: true,
            allow_write_batch: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSection {
    #[serde(default = "ProcessSection::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub allowed_cwds: Vec<PathBuf>,
    #[serde(default = "ProcessSection::default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "ProcessSection::default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "ProcessSection::default_max_output_bytes")]
    pub max_output_bytes: u64,
    #[serde(default)]
    pub allow_env_keys: Vec<String>,
}

impl ProcessSection {
    fn default_enabled() -> bool {
        false
    }
    fn default_timeout_ms() -> u64 {
        10_000
    }
    fn default_max_timeout_ms() -> u64 {
        60_000
    }
    fn default_max_output_bytes() -> u64 {
        1024 * 1024
    }
}

impl Default for ProcessSection {
    fn default() -> Self {
        ProcessSection {
            enabled: Self::default_enabled(),
            allowed_commands: vec!["node".to_string()],
            allowed_cwds: Vec::new(),
            default_timeout_ms: Self::default_timeout_ms(),
            max_timeout_ms: Self::default_max_timeout_ms(),
            max_output_bytes: Self::default_max_output_bytes(),
            allow_env_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub flags: Option<String>,
}

impl RedactionRule {
    pub fn replacement_or_default(&self) -> &str {
        self.replacement.as_deref().unwrap_or(DEFAULT_REPLACEMENT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionSection {
    #[serde(default = "RedactionSection::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<RedactionRule>,
}

impl RedactionSection {
    fn default_enabled() -> bool {
        true
    }
}

impl Default for RedactionSection {
    fn default() -> Self {
        RedactionSection {
            enabled: Self::default_enabled(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default = "AuditSection::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub include_content_hash: bool,
}

impl AuditSection {
    fn default_true() -> bool {
        true
    }
}

impl Default for AuditSection {
    fn default() -> Self {
        AuditSection {
            enabled: true,
            include_content_hash: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "AuthSection::default_token_ttl_days")]
    pub token_ttl_days: u32,
    #[serde(default = "AuthSection::default_pair_code_ttl_minutes")]
    pub pair_code_ttl_minutes: u32,
}

impl AuthSection {
    fn default_token_ttl_days() -> u32 {
        30
    }
    fn default_pair_code_ttl_minutes() -> u32 {
        10
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        AuthSection {
            token_ttl_days: Self::default_token_ttl_days(),
            pair_code_ttl_minutes: Self::default_pair_code_ttl_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub allowed_roots: Vec<PathBuf>,
    pub deny_globs: Vec<String>,
    pub site_allowlist: Vec<String>,
    pub limits: Limits,
    pub write: WriteSection,
    pub mutation: MutationSection,
    pub process: ProcessSection,
    pub redaction: RedactionSection,
    pub audit: AuditSection,
    pub auth: AuthSection,
}

impl PolicyConfig {
    /// Idempotent: `normalize(normalize(cfg)) == normalize(cfg)`.
    pub fn normalize(mut self) -> Self {
        self.allowed_roots = dedup_preserve_order(
            self.allowed_roots
                .iter()
                .map(|p| absolutize(p))
                .collect::<Vec<_>>(),
        );
        self.deny_globs = dedup_preserve_order(self.deny_globs);
        self.site_allowlist = dedup_preserve_order(self.site_allowlist);

        self.limits.max_file_bytes =
            clamp_u64(self.limits.max_file_bytes, MIN_MAX_FILE_BYTES, MAX_MAX_FILE_BYTES);
        self.limits.max_inject_tokens = clamp_u32(
            self.limits.max_inject_tokens,
            MIN_MAX_INJECT_TOKENS,
            MAX_MAX_INJECT_TOKENS,
        );
        self.limits.max_search_matches = clamp_u32(
            self.limits.max_search_matches,
            MIN_MAX_SEARCH_MATCHES,
            MAX_MAX_SEARCH_MATCHES,
        );

        self.write.pending_ttl_seconds = clamp_u64(
            self.write.pending_ttl_seconds,
            MIN_PENDING_TTL_SECONDS,
            MAX_PENDING_TTL_SECONDS,
        );

        self.process.allowed_commands = dedup_preserve_order(self.process.allowed_commands);
        if self.process.allowed_commands.is_empty() {
            self.process.allowed_commands = vec!["node".to_string()];
        }
        self.process.allowed_cwds = dedup_preserve_order(
            self.process
                .allowed_cwds
                .iter()
                .map(|p| absolutize(p))
                .collect::<Vec<_>>(),
        );
        self.process.allow_env_keys = dedup_preserve_order(self.process.allow_env_keys);
        self.process.default_timeout_ms =
            clamp_u64(self.process.default_timeout_ms, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        self.process.max_timeout_ms =
            clamp_u64(self.process.max_timeout_ms, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        if self.process.default_timeout_ms > self.process.max_timeout_ms {
            self.process.default_timeout_ms = self.process.max_timeout_ms;
        }
        self.process.max_output_bytes = clamp_u64(
            self.process.max_output_bytes,
            MIN_MAX_OUTPUT_BYTES,
            MAX_MAX_OUTPUT_BYTES,
        );

        for rule in &mut self.redaction.rules {
            let mut kept: Vec<char> = rule
                .flags
                .as_deref()
                .unwrap_or("")
                .chars()
                .filter(|c| ALLOWED_REGEX_FLAGS.contains(*c))
                .collect();
            if !kept.contains(&'g') {
                kept.push('g');
            }
            kept.sort();
            kept.dedup();
            rule.flags = Some(kept.into_iter().collect());
            if rule.replacement.is_none() {
                rule.replacement = Some(DEFAULT_REPLACEMENT.to_string());
            }
        }

        self.audit.enabled = true;

        self.auth.token_ttl_days =
            clamp_u32(self.auth.token_ttl_days, MIN_TOKEN_TTL_DAYS, MAX_TOKEN_TTL_DAYS);
        self.auth.pair_code_ttl_minutes = clamp_u32(
            self.auth.pair_code_ttl_minutes,
            MIN_PAIR_CODE_TTL_MINUTES,
            MAX_PAIR_CODE_TTL_MINUTES,
        );

        self
    }
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    fs::create_dir_all(config_dir)
        .map_err(|e| AppError::internal(format!("creating config dir: {e}")))
}

/// Read `policy.yaml` under `config_dir`. Missing file: write and return
/// defaults. Any other I/O error propagates as `INTERNAL_ERROR`. Unknown
/// fields are ignored by serde; fields with the wrong type fall back to
/// the type's default via a best-effort re-parse of a stripped document.
pub fn load(config_dir: &Path) -> Result<PolicyConfig> {
    ensure_config_dir(config_dir)?;
    let path = config_dir.join(POLICY_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let cfg = PolicyConfig::default().normalize();
            save(config_dir, &cfg)?;
            return Ok(cfg);
        }
        Err(e) => return Err(AppError::internal(format!("reading policy.yaml: {e}"))),
    };

    let cfg = parse_yaml_best_effort(&raw);
    let normalized = cfg.normalize();
    save(config_dir, &normalized)?;
    Ok(normalized)
}

/// Parse the document value-by-value so a type mismatch on one field falls
/// back to that field's default instead of failing the whole document.
fn parse_yaml_best_effort(raw: &str) -> PolicyConfig {
    let value: serde_yaml::Value = match serde_yaml::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("policy.yaml failed to parse, using defaults: {e}");
            return PolicyConfig::default();
        }
    };
    match serde_yaml::from_value::<PolicyConfig>(value.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("policy.yaml has type errors, merging field-by-field: {e}");
            merge_value_onto_default(value)
        }
    }
}

/// Best-effort per-top-level-key merge: for each key in the raw YAML
/// mapping, try to parse just that key's subtree into the matching field;
/// on failure keep the default for that field and warn.
fn merge_value_onto_default(value: serde_yaml::Value) -> PolicyConfig {
    let mut cfg = PolicyConfig::default();
    let serde_yaml::Value::Mapping(map) = value else {
        return cfg;
    };

    macro_rules! try_field {
        ($key:literal, $field:ident) => {
            if let Some(v) = map.get(serde_yaml::Value::String($key.to_string())) {
                match serde_yaml::from_value(v.clone()) {
                    Ok(parsed) => cfg.$field = parsed,
                    Err(e) => tracing::warn!("policy.yaml field `{}` invalid: {e}", $key),
                }
            }
        };
    }

    try_field!("allowed_roots", allowed_roots);
    try_field!("deny_globs", deny_globs);
    try_field!("site_allowlist", site_allowlist);
    try_field!("limits", limits);
    try_field!("write", write);
    try_field!("mutation", mutation);
    try_field!("process", process);
    try_field!("redaction", redaction);
    try_field!("audit", audit);
    try_field!("auth", auth);

    cfg
}

/// Persist `cfg`, normalized, back to `policy.yaml`.
pub fn save(config_dir: &Path, cfg: &PolicyConfig) -> Result<()> {
    ensure_config_dir(config_dir)?;
    let yaml = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::internal(format!("serializing policy.yaml: {e}")))?;
    fs::write(config_dir.join(POLICY_FILE), yaml)
        .map_err(|e| AppError::internal(format!("writing policy.yaml: {e}")))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyPatch {
    #[serde(default)]
    pub allowed_roots: Option<Vec<String>>,
    #[serde(default)]
    pub process_allowed_commands: Option<Vec<String>>,
    #[serde(default)]
    pub process_allowed_cwds: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<FieldError>,
}

fn validate_string_list(field: &str, values: &Option<Vec<String>>, errors: &mut Vec<FieldError>) {
    let Some(values) = values else { return };
    if values.is_empty() {
        errors.push(FieldError {
            field: field.to_string(),
            message: "must be non-empty".to_string(),
        });
    }
    for v in values {
        if v.trim().is_empty() {
            errors.push(FieldError {
                field: field.to_string(),
                message: "entries must be non-empty strings".to_string(),
            });
        }
    }
}

fn validate_path_list(field: &str, values: &Option<Vec<String>>, errors: &mut Vec<FieldError>) {
    let Some(values) = values else { return };
    if values.is_empty() {
        errors.push(FieldError {
            field: field.to_string(),
            message: "must be non-empty".to_string(),
        });
    }
    for v in values {
        if !Path::new(v).is_absolute() {
            errors.push(FieldError {
                field: field.to_string(),
                message: format!("`{v}` must be an absolute path"),
            });
        }
    }
}

/// Validate a runtime patch without mutating `current`. Patches are
/// restricted to `allowed_roots` and `process.{allowed_commands,allowed_cwds}`
/// per `spec.md` §4.A.
pub fn validate_patch(_current: &PolicyConfig, patch: &PolicyPatch) -> ValidationResult {
    let mut errors = Vec::new();
    validate_path_list("allowed_roots", &patch.allowed_roots, &mut errors);
    validate_string_list(
        "process.allowed_commands",
        &patch.process_allowed_commands,
        &mut errors,
    );
    validate_path_list(
        "process.allowed_cwds",
        &patch.process_allowed_cwds,
        &mut errors,
    );
    ValidationResult {
        ok: errors.is_empty(),
        errors,
    }
}

/// Apply a valid patch and re-normalize. Caller must have already checked
/// `validate_patch(current, patch).ok`.
pub fn merge_patch(current: &PolicyConfig, patch: &PolicyPatch) -> PolicyConfig {
    let mut next = current.clone();
    if let Some(roots) = &patch.allowed_roots {
        next.allowed_roots = roots.iter().map(PathBuf::from).collect();
    }
    if let Some(commands) = &patch.process_allowed_commands {
        next.process.allowed_commands = commands.clone();
    }
    if let Some(cwds) = &patch.process_allowed_cwds {
        next.process.allowed_cwds = cwds.iter().map(PathBuf::from).collect();
    }
    next.normalize()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: String,
    pub log_retention_days: u32,
    pub service_port: u16,
    pub always_allow: HashMap<String, bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            theme: "system".to_string(),
            log_retention_days: 30,
            service_port: 4799,
            always_allow: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Result<AppConfig> {
        ensure_config_dir(config_dir)?;
        let path = config_dir.join(APP_CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = AppConfig::default();
                cfg.save(config_dir)?;
                Ok(cfg)
            }
            Err(e) => Err(AppError::internal(format!("reading app-config.json: {e}"))),
        }
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        ensure_config_dir(config_dir)?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::internal(format!("serializing app-config.json: {e}")))?;
        fs::write(config_dir.join(APP_CONFIG_FILE), json)
            .map_err(|e| AppError::internal(format!("writing app-config.json: {e}")))
    }

    pub fn should_skip_confirmation(&self, site: &str, tool: &str) -> bool {
        self.always_allow
            .get(&always_allow_key(site, tool))
            .copied()
            .unwrap_or(false)
    }

    pub fn update_always_allow(&mut self, site: &str, tool: &str, value: bool) {
        self.always_allow.insert(always_allow_key(site, tool), value);
    }
}

fn always_allow_key(site: &str, tool: &str) -> String {
    format!("{site}:{tool}")
}
