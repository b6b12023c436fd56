use std::path::PathBuf;

use flycode_fs::WriteMode;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PendingWriteOp {
    pub id: String,
    pub path: PathBuf,
    pub mode: WriteMode,
    pub content: String,
    pub require_confirmation: bool,
    pub trace_id: String,
    pub site: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct PendingWriteFile {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PendingWriteBatchOp {
    pub id: String,
    pub files: Vec<PendingWriteFile>,
    pub require_confirmation: bool,
    pub trace_id: String,
    pub site: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct PrepareWriteInput {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub content: String,
    pub site: String,
    pub trace_id: String,
    pub expected_sha256: Option<String>,
    pub disable_confirmation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareWriteResult {
    pub op_id: String,
    pub require_confirmation: bool,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct PrepareWriteFileInput {
    pub path: PathBuf,
    pub mode: Option<WriteMode>,
    pub content: String,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrepareWriteBatchInput {
    pub files: Vec<PrepareWriteFileInput>,
    pub site: String,
    pub trace_id: String,
    pub disable_confirmation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareWriteBatchResult {
    pub op_id: String,
    pub require_confirmation: bool,
    pub summary: String,
    pub total_files: u32,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitWriteFileResult {
    pub path: String,
    pub bytes_written: u64,
    pub sha256: String,
    pub backup_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitWriteBatchResult {
    pub files: Vec<CommitWriteFileResult>,
}
