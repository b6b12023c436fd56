use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_fs::CommitWriteInput;
use flycode_fs::FileService;
use flycode_fs::WriteMode;
use flycode_policy::MutationSection;
use flycode_policy::WriteSection;
use flycode_sandbox::PathSandbox;
use uuid::Uuid;

use crate::CommitWriteBatchResult;
use crate::CommitWriteFileResult;
use crate::PendingWriteBatchOp;
use crate::PendingWriteFile;
use crate::PrepareWriteBatchInput;
use crate::PrepareWriteBatchResult;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Atomic multi-file write with snapshot+rollback (`spec.md` §4.G).
pub struct WriteBatchManager {
    sandbox: Arc<PathSandbox>,
    file_service: Arc<FileService>,
    write: WriteSection,
    mutation: MutationSection,
    pending: Mutex<HashMap<String, PendingWriteBatchOp>>,
}

impl WriteBatchManager {
    pub fn new(
        sandbox: Arc<PathSandbox>,
        file_service: Arc<FileService>,
        write: WriteSection,
        mutation: MutationSection,
    ) -> Self {
        WriteBatchManager {
            sandbox,
            file_service,
            write,
            mutation,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn purge_expired(pending: &mut HashMap<String, PendingWriteBatchOp>) {
        let now = now_secs();
        pending.retain(|_, op| op.expires_at > now);
    }

    pub fn prepare(&self, input: PrepareWriteBatchInput) -> Result<PrepareWriteBatchResult> {
        if !self.mutation.allow_write_batch {
            return Err(AppError::Forbidden("write batches are disabled by policy".to_string()));
        }

        let mut files = Vec::with_capacity(input.files.len());
        let mut total_bytes: u64 = 0;
        for (index, file) in input.files.into_iter().enumerate() {
            self.sandbox.assert_allowed(&file.path)?;
            let mode = file.mode.unwrap_or(WriteMode::Overwrite);

            if let Some(expected) = &file.expected_sha256 {
                let current = self.file_service.existing_sha256(&file.path);
                if current.as_deref() != Some(expected.as_str()) {
                    return Err(AppError::Conflict(format!(
                        "file[{index}] {} sha256 does not match expected_sha256",
                        file.path.display()
                    )));
                }
            }

            total_bytes += file.content.len() as u64;
            files.push(PendingWriteFile {
                path: file.path,
                mode,
                content: file.content,
            });
        }

        let require_confirmation =
            self.write.require_confirmation_default && !(input.disable_confirmation && self.write.allow_disable_confirmation);

        let id = Uuid::new_v4().to_string();
        let now = now_secs();
        let total_files = files.len() as u32;
        let summary = format!("write batch of {total_files} file(s), {total_bytes} bytes total");

        let op = PendingWriteBatchOp {
            id: id.clone(),
            files,
            require_confirmation,
            trace_id: input.trace_id,
            site: input.site,
            created_at: now,
            expires_at: now + self.write.pending_ttl_seconds as i64,
        };

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut pending);
        pending.insert(id.clone(), op);

        Ok(PrepareWriteBatchResult {
            op_id: id,
            require_confirmation,
            summary,
            total_files,
            total_bytes,
        })
    }

    pub fn commit(&self, op_id: &str, confirmed_by_user: bool, site: &str) -> Result<CommitWriteBatchResult> {
        let op = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            Self::purge_expired(&mut pending);
            pending
                .get(op_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("no pending write batch `{op_id}`")))?
        };

        if op.site != site {
            return Err(AppError::Forbidden(format!("write batch `{op_id}` belongs to a different site")));
        }
        if op.require_confirmation && !confirmed_by_user {
            return Err(AppError::WriteConfirmationRequired(format!(
                "write batch `{op_id}` requires confirmation"
            )));
        }

        let mut snapshots: Vec<(std::path::PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(op.files.len());
        let mut results = Vec::with_capacity(op.files.len());

        for file in &op.files {
            let existing = std::fs::read(&file.path).ok();
            snapshots.push((file.path.clone(), existing));

            match self.file_service.commit_write(&CommitWriteInput {
                path: file.path.clone(),
                mode: file.mode,
                content: file.content.clone(),
                backup_on_overwrite: self.write.backup_on_overwrite,
            }) {
                Ok(result) => results.push(CommitWriteFileResult {
                    path: result.path,
                    bytes_written: result.bytes_written,
                    sha256: result.sha256,
                    backup_path: result.backup_path,
                }),
                Err(original) => {
                    let rollback_errors = rollback(&snapshots);
                    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                    pending.remove(op_id);
                    return Err(enrich_with_rollback(original, &rollback_errors));
                }
            }
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(op_id);

        Ok(CommitWriteBatchResult { files: results })
    }
}

fn rollback(snapshots: &[(std::path::PathBuf, Option<Vec<u8>>)]) -> Vec<String> {
    let mut errors = Vec::new();
    for (path, existed) in snapshots.iter().rev() {
        let outcome = match existed {
            Some(content) => std::fs::write(path, content),
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = outcome {
            errors.push(format!("rollback of {} failed: {e}", path.display()));
        }
    }
    errors
}

fn enrich_with_rollback(original: AppError, rollback_errors: &[String]) -> AppError {
    if rollback_errors.is_empty() {
        return original;
    }
    let suffix = format!(" (rollback errors: {})", rollback_errors.join("; "));
    match original {
        AppError::Unauthorized(m) => AppError::Unauthorized(m + &suffix),
        AppError::Forbidden(m) => AppError::Forbidden(m + &suffix),
        AppError::PolicyBlocked(m) => AppError::PolicyBlocked(m + &suffix),
        AppError::NotFound(m) => AppError::NotFound(m + &suffix),
        AppError::InvalidInput(m) => AppError::InvalidInput(m + &suffix),
        AppError::Conflict(m) => AppError::Conflict(m + &suffix),
        AppError::LimitExceeded(m) => AppError::LimitExceeded(m + &suffix),
        AppError::NotSupported(m) => AppError::NotSupported(m + &suffix),
        AppError::WriteConfirmationRequired(m) => AppError::WriteConfirmationRequired(m + &suffix),
        AppError::Internal(m) => AppError::Internal(m + &suffix),
    }
}
