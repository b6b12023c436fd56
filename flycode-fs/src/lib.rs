//! File Service: the sandboxed filesystem operations FlyCode exposes as
//! MCP tools (`spec.md` §4.E), plus the `commit_write` primitive shared by
//! the Write Manager and Write Batch Manager.
//!
//! Every operation re-asserts sandbox admission for every user-supplied
//! path — callers (the dispatcher) are expected to have already checked
//! site allowlisting, but never path admission, which is this crate's job.

mod diff;
mod ls;
mod mutate;
mod read;
mod search;
#[cfg(test)]
mod test_support;
mod types;
mod write_primitive;

pub use types::*;

use std::path::Path;
use std::sync::Arc;

use flycode_errors::AppError;
use flycode_errors::Result;
use flycode_policy::Limits;
use flycode_policy::MutationSection;
use flycode_redact::Redactor;
use flycode_sandbox::PathSandbox;

pub struct FileService {
    pub(crate) sandbox: Arc<PathSandbox>,
    pub(crate) limits: Limits,
    pub(crate) mutation: MutationSection,
    pub(crate) redactor: Arc<Redactor>,
    pub(crate) max_inject_tokens: u32,
}

impl FileService {
    pub fn new(
        sandbox: Arc<PathSandbox>,
        limits: Limits,
        mutation: MutationSection,
        redactor: Arc<Redactor>,
        max_inject_tokens: u32,
    ) -> Self {
        FileService {
            sandbox,
            limits,
            mutation,
            redactor,
            max_inject_tokens,
        }
    }

    pub(crate) fn finish_text(&self, content: String) -> (String, bool) {
        let (redacted, _) = self.redactor.redact(&content);
        flycode_redact::apply_token_budget(&redacted, self.max_inject_tokens)
    }

    pub fn ls(&self, path: &Path, depth: Option<u32>, glob: Option<&str>) -> Result<Vec<LsEntry>> {
        ls::ls(self, path, depth.unwrap_or(2), glob)
    }

    pub fn mkdir(&self, path: &Path, parents: bool) -> Result<()> {
        self.sandbox.assert_allowed(path)?;
        mutate::mkdir(path, parents)
    }

    pub fn read(&self, path: &Path, opts: &ReadOptions) -> Result<ReadResult> {
        self.sandbox.assert_allowed(path)?;
        read::read(self, path, opts)
    }

    pub fn search(&self, path: &Path, opts: &SearchOptions) -> Result<SearchResult> {
        self.sandbox.assert_allowed(path)?;
        search::search(self, path, opts)
    }

    pub fn rm(&self, path: &Path, recursive: bool, force: bool) -> Result<RmResult> {
        if !self.mutation.allow_rm {
            return Err(AppError::Forbidden("rm is disabled by policy".to_string()));
        }
        self.sandbox.assert_allowed(path)?;
        self.sandbox.assert_not_root_target(path)?;
        mutate::rm(path, recursive, force)
    }

    pub fn mv(&self, from: &Path, to: &Path, overwrite: bool) -> Result<MvResult> {
        if !self.mutation.allow_mv {
            return Err(AppError::Forbidden("mv is disabled by policy".to_string()));
        }
        self.sandbox.assert_allowed(from)?;
        self.sandbox.assert_allowed(to)?;
        self.sandbox.assert_not_root_target(from)?;
        mutate::mv(from, to, overwrite)
    }

    pub fn chmod(&self, path: &Path, mode: &str) -> Result<ChmodResult> {
        if !self.mutation.allow_chmod {
            return Err(AppError::Forbidden("chmod is disabled by policy".to_string()));
        }
        self.sandbox.assert_allowed(path)?;
        mutate::chmod(path, mode)
    }

    pub fn diff(&self, opts: &DiffOptions) -> Result<DiffResult> {
        diff::diff(self, opts)
    }

    /// The primitive used by Write Manager and Write Batch Manager.
    pub fn commit_write(&self, input: &CommitWriteInput) -> Result<CommitWriteResult> {
        self.sandbox.assert_allowed(&input.path)?;
        write_primitive::commit_write(input)
    }

    pub fn existing_sha256(&self, path: &Path) -> Option<String> {
        write_primitive::existing_sha256(path)
    }
}
