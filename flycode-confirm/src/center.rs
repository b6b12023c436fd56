use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_policy::AppConfig;
use uuid::Uuid;

use crate::types::ConfirmationEntry;
use crate::types::ConfirmationStatus;
use crate::types::CreatePendingInput;
use crate::types::ResolveInput;

const DEFAULT_TTL_SECONDS: i64 = 120;
const DEFAULT_RECENT_CAP: usize = 1000;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// In-memory pending/approved/rejected/timeout state machine for tools
/// that require a human confirmation round-trip (`spec.md` §4.I). Not a
/// source of truth across restarts: pending entries are lost on crash by
/// design.
pub struct ConfirmationCenter {
    entries: Mutex<VecDeque<ConfirmationEntry>>,
    app_config: Mutex<AppConfig>,
    config_dir: PathBuf,
    ttl_seconds: i64,
    recent_cap: usize,
}

impl ConfirmationCenter {
    pub fn new(config_dir: &Path) -> Result<Self> {
        Self::with_limits(config_dir, DEFAULT_TTL_SECONDS, DEFAULT_RECENT_CAP)
    }

    pub fn with_limits(config_dir: &Path, ttl_seconds: i64, recent_cap: usize) -> Result<Self> {
        let app_config = AppConfig::load(config_dir)?;
        Ok(ConfirmationCenter {
            entries: Mutex::new(VecDeque::new()),
            app_config: Mutex::new(app_config),
            config_dir: config_dir.to_path_buf(),
            ttl_seconds,
            recent_cap,
        })
    }

    fn expire_stale(entries: &mut VecDeque<ConfirmationEntry>) {
        let now = now_secs();
        for entry in entries.iter_mut() {
            if entry.status == ConfirmationStatus::Pending && entry.expires_at <= now {
                entry.status = ConfirmationStatus::Timeout;
                entry.resolved_at = Some(now);
            }
        }
    }

    fn evict_if_over_cap(entries: &mut VecDeque<ConfirmationEntry>, cap: usize) {
        if entries.len() <= cap {
            return;
        }
        if let Some(index) = entries.iter().position(|e| e.status.is_terminal()) {
            entries.remove(index);
        }
    }

    pub fn create_pending(&self, input: CreatePendingInput) -> ConfirmationEntry {
        let now = now_secs();
        let entry = ConfirmationEntry {
            id: Uuid::new_v4().to_string(),
            site: input.site,
            tool: input.tool,
            summary: input.summary,
            status: ConfirmationStatus::Pending,
            trace_id: input.trace_id,
            created_at: now,
            expires_at: now + self.ttl_seconds,
            resolved_at: None,
            request: input.request,
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire_stale(&mut entries);
        entries.push_back(entry.clone());
        Self::evict_if_over_cap(&mut entries, self.recent_cap);
        entry
    }

    pub fn get_by_id(&self, id: &str) -> Option<ConfirmationEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire_stale(&mut entries);
        entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn resolve(&self, id: &str, input: ResolveInput) -> Result<ConfirmationEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire_stale(&mut entries);
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AppError::NotFound(format!("no confirmation `{id}`")))?;

        if entry.status.is_terminal() {
            return Ok(entry.clone());
        }

        let now = now_secs();
        entry.status = if input.approved {
            ConfirmationStatus::Approved
        } else {
            ConfirmationStatus::Rejected
        };
        entry.resolved_at = Some(now);
        let resolved = entry.clone();
        drop(entries);

        if input.approved && input.always_allow {
            let mut app_config = self.app_config.lock().unwrap_or_else(|e| e.into_inner());
            app_config.update_always_allow(&resolved.site, &resolved.tool, true);
            app_config.save(&self.config_dir)?;
        }

        Ok(resolved)
    }

    pub fn should_skip_confirmation(&self, site: &str, tool: &str) -> bool {
        self.app_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .should_skip_confirmation(site, tool)
    }

    pub fn list_recent(&self, limit: usize) -> Vec<ConfirmationEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire_stale(&mut entries);
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_request_payload(&self, id: &str) -> Option<serde_json::Value> {
        self.get_by_id(id).map(|e| e.request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn pending(center: &ConfirmationCenter, tool: &str) -> ConfirmationEntry {
        center.create_pending(CreatePendingInput {
            site: "site-a".to_string(),
            tool: tool.to_string(),
            summary: format!("run {tool}"),
            trace_id: "t1".to_string(),
            request: serde_json::json!({"tool": tool}),
        })
    }

    #[test]
    fn create_then_resolve_approved_round_trip() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::new(dir.path()).expect("center");
        let entry = pending(&center, "exec");
        assert_eq!(entry.status, ConfirmationStatus::Pending);

        let resolved = center
            .resolve(&entry.id, ResolveInput { approved: true, always_allow: false })
            .expect("resolve");
        assert_eq!(resolved.status, ConfirmationStatus::Approved);
        assert!(resolved.resolved_at.is_some());
        assert!(!center.should_skip_confirmation("site-a", "exec"));
    }

    #[test]
    fn resolve_is_idempotent_once_terminal() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::new(dir.path()).expect("center");
        let entry = pending(&center, "exec");
        center
            .resolve(&entry.id, ResolveInput { approved: false, always_allow: false })
            .expect("resolve");
        let again = center
            .resolve(&entry.id, ResolveInput { approved: true, always_allow: false })
            .expect("resolve again");
        assert_eq!(again.status, ConfirmationStatus::Rejected);
    }

    #[test]
    fn always_allow_updates_app_config_and_persists() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::new(dir.path()).expect("center");
        let entry = pending(&center, "exec");
        center
            .resolve(&entry.id, ResolveInput { approved: true, always_allow: true })
            .expect("resolve");
        assert!(center.should_skip_confirmation("site-a", "exec"));

        let reloaded = AppConfig::load(dir.path()).expect("reload");
        assert!(reloaded.should_skip_confirmation("site-a", "exec"));
    }

    #[test]
    fn lazy_expiry_flips_pending_to_timeout() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::with_limits(dir.path(), -1, 1000).expect("center");
        let entry = pending(&center, "exec");
        let fetched = center.get_by_id(&entry.id).expect("entry");
        assert_eq!(fetched.status, ConfirmationStatus::Timeout);
    }

    #[test]
    fn unknown_id_resolves_to_none_or_not_found() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::new(dir.path()).expect("center");
        assert!(center.get_by_id("nope").is_none());
        let err = center
            .resolve("nope", ResolveInput { approved: true, always_allow: false })
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn list_recent_is_newest_first() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::new(dir.path()).expect("center");
        pending(&center, "a");
        pending(&center, "b");
        let recent = center.list_recent(10);
        assert_eq!(recent[0].tool, "b");
        assert_eq!(recent[1].tool, "a");
    }

    #[test]
    fn fifo_eviction_only_removes_terminal_entries_over_cap() {
        let dir = tempdir().expect("tempdir");
        let center = ConfirmationCenter::with_limits(dir.path(), 120, 2).expect("center");
        let first = pending(&center, "a");
        center
            .resolve(&first.id, ResolveInput { approved: true, always_allow: false })
            .expect("resolve");
        pending(&center, "b");
        pending(&center, "c");

        let recent = center.list_recent(10);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|e| e.tool != "a"));
    }
}
