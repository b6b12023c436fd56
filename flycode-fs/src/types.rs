use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    /// Octal string, e.g. `"0644"`.
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LsEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub range: Option<String>,
    pub line: Option<u32>,
    pub lines: Option<String>,
    pub encoding: Option<String>,
    pub include_meta: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub content: String,
    pub mime: String,
    pub bytes: u64,
    pub sha256: String,
    pub truncated: bool,
    pub meta: Option<FileMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub regex: bool,
    pub glob: Option<String>,
    pub limit: Option<u32>,
    pub extensions: Option<Vec<String>>,
    pub min_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
    pub mtime_from: Option<i64>,
    pub mtime_to: Option<i64>,
    pub context_lines: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: u32,
    pub line: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub total: u32,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RmResult {
    pub removed: bool,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MvResult {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChmodResult {
    pub mode: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub left_path: Option<String>,
    pub right_path: Option<String>,
    pub right_content: Option<String>,
    pub context_lines: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub diff: String,
    pub truncated: bool,
}

/// Primitive handed from Write Manager / Write Batch Manager to
/// `FileService::commit_write` — deliberately not the full `PendingWriteOp`
/// (which carries TTL/site/trace bookkeeping those managers own).
#[derive(Debug, Clone)]
pub struct CommitWriteInput {
    pub path: std::path::PathBuf,
    pub mode: WriteMode,
    pub content: String,
    pub backup_on_overwrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitWriteResult {
    pub path: String,
    pub bytes_written: u64,
    pub sha256: String,
    pub backup_path: Option<String>,
}
