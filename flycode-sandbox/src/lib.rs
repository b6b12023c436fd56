//! Path sandbox: normalize a caller-supplied path into one canonical
//! absolute form, then test it against an allowlist of roots and a
//! denylist of globs.
//!
//! The normalize/prefix-check approach is grounded on
//! `codex-core::safety::is_write_patch_constrained_to_writable_paths`,
//! generalized from "is this patch's paths all under a writable root" to
//! "is this arbitrary tool-call path admissible".

use std::collections::HashSet;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use flycode_errors::AppError;
use flycode_errors::Result;
use globset::Glob;
use globset::GlobSetBuilder;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub allowed_roots: Vec<PathBuf>,
    pub deny_globs: Vec<String>,
    pub site_allowlist: HashSet<String>,
}

impl SandboxConfig {
    pub fn from_policy(
        allowed_roots: Vec<PathBuf>,
        deny_globs: Vec<String>,
        site_allowlist: Vec<String>,
    ) -> Self {
        SandboxConfig {
            allowed_roots,
            deny_globs,
            site_allowlist: site_allowlist.into_iter().collect(),
        }
    }
}

pub struct PathSandbox {
    config: SandboxConfig,
    deny_set: globset::GlobSet,
}

fn is_case_sensitive_platform() -> bool {
    !cfg!(target_os = "windows")
}

/// Cross-map `/mnt/<letter>/...` <-> `<letter>:\...` so a single canonical
/// form is produced per host platform, per `spec.md` §4.B.
fn cross_map_drive_forms(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if cfg!(target_os = "windows") {
        if raw.len() >= 6 && raw.starts_with("/mnt/") {
            let letter = bytes[5] as char;
            if letter.is_ascii_alphabetic() {
                let rest = &raw[6..];
                let rest = rest.trim_start_matches('/');
                return format!("{}:\\{}", letter.to_ascii_uppercase(), rest.replace('/', "\\"));
            }
        }
        raw.to_string()
    } else {
        if raw.len() >= 2 {
            let first = bytes[0] as char;
            if first.is_ascii_alphabetic() && bytes[1] == b':' {
                let rest = &raw[2..];
                let rest = rest.trim_start_matches(['\\', '/']);
                let rest = rest.replace('\\', "/");
                return format!("/mnt/{}/{}", first.to_ascii_lowercase(), rest);
            }
        }
        raw.to_string()
    }
}

/// Strip whitespace, cross-map drive forms, expand to an absolute path
/// relative to the process cwd, then lexically resolve `.`/`..` without
/// touching the filesystem.
pub fn normalize_input(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let mapped = cross_map_drive_forms(trimmed);
    let mapped = mapped.replace('\\', "/");
    let path = Path::new(&mapped);

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

fn path_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    if is_case_sensitive_platform() {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

fn is_descendant_or_equal(path: &Path, root: &Path) -> bool {
    let path_k = path_key(path);
    let root_k = path_key(root);
    path_k == root_k || path_k.starts_with(&format!("{root_k}/"))
}

/// Root-relative path, forward-slashed, for denylist matching.
fn relative_to_root(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

impl PathSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.deny_globs {
            let glob = Glob::new(pattern)
                .map_err(|e| AppError::internal(format!("invalid deny_glob `{pattern}`: {e}")))?;
            builder.add(glob);
        }
        let deny_set = builder
            .build()
            .map_err(|e| AppError::internal(format!("building deny glob set: {e}")))?;
        Ok(PathSandbox { config, deny_set })
    }

    /// Exposes the configured roots for callers that need a sandbox-root
    /// fallback of their own (e.g. the process runner's cwd resolution).
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.config.allowed_roots
    }

    pub fn assert_site_allowed(&self, site: &str) -> Result<()> {
        if self.config.site_allowlist.contains(site) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("site `{site}` is not allowlisted")))
        }
    }

    /// True iff `path` is at/under some allowed root and its root-relative
    /// form does not match any deny glob.
    pub fn assert_allowed(&self, path: &Path) -> Result<()> {
        let matching_root = self
            .config
            .allowed_roots
            .iter()
            .find(|root| is_descendant_or_equal(path, root));

        let Some(root) = matching_root else {
            return Err(AppError::PolicyBlocked(format!(
                "{} is outside all allowed_roots",
                path.display()
            )));
        };

        if let Some(rel) = relative_to_root(path, root)
            && self.deny_set.is_match(&rel)
        {
            return Err(AppError::PolicyBlocked(format!(
                "{} matches a deny_glob",
                path.display()
            )));
        }

        Ok(())
    }

    /// Refuses operations that target a sandbox root exactly (deleting or
    /// moving the root itself).
    pub fn assert_not_root_target(&self, path: &Path) -> Result<()> {
        let is_root = self
            .config
            .allowed_roots
            .iter()
            .any(|root| path_key(path) == path_key(root));
        if is_root {
            Err(AppError::PolicyBlocked(format!(
                "{} is a sandbox root and cannot be targeted directly",
                path.display()
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sandbox(roots: &[&str], denies: &[&str], sites: &[&str]) -> PathSandbox {
        PathSandbox::new(SandboxConfig::from_policy(
            roots.iter().map(PathBuf::from).collect(),
            denies.iter().map(|s| s.to_string()).collect(),
            sites.iter().map(|s| s.to_string()).collect(),
        ))
        .expect("build sandbox")
    }

    #[test]
    fn rejects_path_outside_allowed_roots() {
        let sb = sandbox(&["/w/proj"], &[], &["site-a"]);
        let result = sb.assert_allowed(Path::new("/etc/passwd"));
        assert!(matches!(result, Err(AppError::PolicyBlocked(_))));
    }

    #[test]
    fn allows_descendant_of_root() {
        let sb = sandbox(&["/w/proj"], &[], &["site-a"]);
        assert!(sb.assert_allowed(Path::new("/w/proj/src/main.rs")).is_ok());
    }

    #[test]
    fn deny_glob_blocks_descendant() {
        let sb = sandbox(&["/w/proj"], &["**/.git/**"], &["site-a"]);
        assert!(sb.assert_allowed(Path::new("/w/proj/src/main.rs")).is_ok());
        let result = sb.assert_allowed(Path::new("/w/proj/.git/config"));
        assert!(matches!(result, Err(AppError::PolicyBlocked(_))));
    }

    #[test]
    fn site_allowlist_enforced() {
        let sb = sandbox(&["/w/proj"], &[], &["site-a"]);
        assert!(sb.assert_site_allowed("site-a").is_ok());
        assert!(matches!(
            sb.assert_site_allowed("site-b"),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn refuses_root_target() {
        let sb = sandbox(&["/w/proj"], &[], &["site-a"]);
        assert!(sb.assert_not_root_target(Path::new("/w/proj")).is_err());
        assert!(sb.assert_not_root_target(Path::new("/w/proj/sub")).is_ok());
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        let normalized = normalize_input("/w/proj/a/../b/./c.txt");
        assert_eq!(normalized, PathBuf::from("/w/proj/b/c.txt"));
    }
}
