use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_fs::CommitWriteInput;
use flycode_fs::CommitWriteResult;
use flycode_fs::FileService;
use flycode_policy::WriteSection;
use flycode_sandbox::PathSandbox;
use uuid::Uuid;

use crate::PendingWriteOp;
use crate::PrepareWriteInput;
use crate::PrepareWriteResult;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Single-file two-phase write: `prepare` stages the op, `commit` applies
/// it after (optionally) a confirmation round-trip (`spec.md` §4.F).
pub struct WriteManager {
    sandbox: Arc<PathSandbox>,
    file_service: Arc<FileService>,
    write: WriteSection,
    pending: Mutex<HashMap<String, PendingWriteOp>>,
}

impl WriteManager {
    pub fn new(sandbox: Arc<PathSandbox>, file_service: Arc<FileService>, write: WriteSection) -> Self {
        WriteManager {
            sandbox,
            file_service,
            write,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn purge_expired(pending: &mut HashMap<String, PendingWriteOp>) {
        let now = now_secs();
        pending.retain(|_, op| op.expires_at > now);
    }

    pub fn prepare(&self, input: PrepareWriteInput) -> Result<PrepareWriteResult> {
        self.sandbox.assert_allowed(&input.path)?;

        if let Some(expected) = &input.expected_sha256 {
            let current = self.file_service.existing_sha256(&input.path);
            if current.as_deref() != Some(expected.as_str()) {
                return Err(AppError::Conflict(format!(
                    "{} sha256 does not match expected_sha256",
                    input.path.display()
                )));
            }
        }

        let require_confirmation =
            self.write.require_confirmation_default && !(input.disable_confirmation && self.write.allow_disable_confirmation);

        let id = Uuid::new_v4().to_string();
        let now = now_secs();
        let summary = format!(
            "{:?} {} bytes to {}",
            input.mode,
            input.content.len(),
            input.path.display()
        );

        let op = PendingWriteOp {
            id: id.clone(),
            path: input.path,
            mode: input.mode,
            content: input.content,
            require_confirmation,
            trace_id: input.trace_id,
            site: input.site,
            created_at: now,
            expires_at: now + self.write.pending_ttl_seconds as i64,
        };

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut pending);
        pending.insert(id.clone(), op);

        Ok(PrepareWriteResult {
            op_id: id,
            require_confirmation,
            summary,
        })
    }

    pub fn commit(&self, op_id: &str, confirmed_by_user: bool, site: &str) -> Result<CommitWriteResult> {
        let op = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            Self::purge_expired(&mut pending);
            pending.get(op_id).cloned().ok_or_else(|| AppError::NotFound(format!("no pending write `{op_id}`")))?
        };

        if op.site != site {
            return Err(AppError::Forbidden(format!("write `{op_id}` belongs to a different site")));
        }
        if op.require_confirmation && !confirmed_by_user {
            return Err(AppError::WriteConfirmationRequired(format!(
                "write `{op_id}` requires confirmation"
            )));
        }

        let result = self.file_service.commit_write(&CommitWriteInput {
            path: op.path.clone(),
            mode: op.mode,
            content: op.content.clone(),
            backup_on_overwrite: self.write.backup_on_overwrite,
        })?;

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(op_id);

        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use flycode_fs::WriteMode;
    use flycode_policy::Limits;
    use flycode_policy::MutationSection;
    use flycode_policy::RedactionSection;
    use flycode_redact::Redactor;
    use flycode_sandbox::SandboxConfig;

    use super::*;

    fn manager(dir: &std::path::Path, write: WriteSection) -> WriteManager {
        let sandbox = Arc::new(
            PathSandbox::new(SandboxConfig::from_policy(
                vec![dir.to_path_buf()],
                Vec::new(),
                vec!["site-a".to_string()],
            ))
            .expect("sandbox"),
        );
        let file_service = Arc::new(FileService::new(
            sandbox.clone(),
            Limits::default(),
            MutationSection::default(),
            Arc::new(Redactor::new(&RedactionSection::default())),
            8_000,
        ));
        WriteManager::new(sandbox, file_service, write)
    }

    fn write_section() -> WriteSection {
        WriteSection {
            require_confirmation_default: true,
            allow_disable_confirmation: true,
            backup_on_overwrite: true,
            pending_ttl_seconds: 60,
        }
    }

    #[test]
    fn prepare_then_commit_without_confirmation_flag_requires_confirmation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path(), write_section());
        let prepared = mgr
            .prepare(PrepareWriteInput {
                path: dir.path().join("a.txt"),
                mode: WriteMode::Overwrite,
                content: "hi".to_string(),
                site: "site-a".to_string(),
                trace_id: "t1".to_string(),
                expected_sha256: None,
                disable_confirmation: false,
            })
            .expect("prepare");
        assert!(prepared.require_confirmation);
        let err = mgr.commit(&prepared.op_id, false, "site-a").unwrap_err();
        assert!(matches!(err, AppError::WriteConfirmationRequired(_)));
        let result = mgr.commit(&prepared.op_id, true, "site-a").expect("commit");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).expect("read"), "hi");
        assert_eq!(result.sha256.len(), 64);
    }

    #[test]
    fn disable_confirmation_skips_the_gate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path(), write_section());
        let prepared = mgr
            .prepare(PrepareWriteInput {
                path: dir.path().join("a.txt"),
                mode: WriteMode::Overwrite,
                content: "hi".to_string(),
                site: "site-a".to_string(),
                trace_id: "t1".to_string(),
                expected_sha256: None,
                disable_confirmation: true,
            })
            .expect("prepare");
        assert!(!prepared.require_confirmation);
        mgr.commit(&prepared.op_id, false, "site-a").expect("commit");
    }

    #[test]
    fn sha_conflict_is_rejected_at_prepare() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "old").expect("seed");
        let mgr = manager(dir.path(), write_section());
        let result = mgr.prepare(PrepareWriteInput {
            path: dir.path().join("a.txt"),
            mode: WriteMode::Overwrite,
            content: "new".to_string(),
            site: "site-a".to_string(),
            trace_id: "t1".to_string(),
            expected_sha256: Some("deadbeef".to_string()),
            disable_confirmation: true,
        });
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn commit_rejects_mismatched_site() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path(), write_section());
        let prepared = mgr
            .prepare(PrepareWriteInput {
                path: dir.path().join("a.txt"),
                mode: WriteMode::Overwrite,
                content: "hi".to_string(),
                site: "site-a".to_string(),
                trace_id: "t1".to_string(),
                expected_sha256: None,
                disable_confirmation: true,
            })
            .expect("prepare");
        let err = mgr.commit(&prepared.op_id, true, "site-b").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn unknown_op_id_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(dir.path(), write_section());
        let err = mgr.commit("nope", true, "site-a").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
