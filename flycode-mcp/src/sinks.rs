use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;
use flycode_errors::AppError;
use flycode_errors::Result;
use serde::Serialize;

fn append_line(dir: &Path, record: &impl Serialize) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| AppError::internal(format!("creating {}: {e}", dir.display())))?;
    let file_name = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
    let path = dir.join(file_name);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| AppError::internal(format!("opening {}: {e}", path.display())))?;
    let mut line = serde_json::to_string(record).map_err(|e| AppError::internal(format!("serializing audit record: {e}")))?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .map_err(|e| AppError::internal(format!("writing {}: {e}", path.display())))
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub site: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_confirm: Option<bool>,
    pub trace_id: String,
    pub audit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct AuditSink {
    dir: PathBuf,
}

impl AuditSink {
    pub fn new(config_dir: &Path) -> Self {
        AuditSink { dir: config_dir.join("audit") }
    }

    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = append_line(&self.dir, &record) {
            tracing::warn!("failed to append audit record: {e}");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleRecord {
    pub id: String,
    pub timestamp: String,
    pub site: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

pub struct ConsoleSink {
    dir: PathBuf,
}

impl ConsoleSink {
    pub fn new(config_dir: &Path) -> Self {
        ConsoleSink { dir: config_dir.join("console") }
    }

    pub fn record(&self, record: ConsoleRecord) {
        if let Err(e) = append_line(&self.dir, &record) {
            tracing::warn!("failed to append console record: {e}");
        }
    }
}
