#![cfg(test)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;

use flycode_policy::Limits;
use flycode_policy::MutationSection;
use flycode_policy::RedactionSection;
use flycode_sandbox::PathSandbox;
use flycode_sandbox::SandboxConfig;
use flycode_redact::Redactor;

use crate::FileService;

pub fn service_for(root: &std::path::Path) -> FileService {
    let sandbox = PathSandbox::new(SandboxConfig::from_policy(
        vec![root.to_path_buf()],
        Vec::new(),
        vec!["test-site".to_string()],
    ))
    .expect("build sandbox");
    let redactor = Redactor::new(&RedactionSection::default());
    FileService::new(
        Arc::new(sandbox),
        Limits::default(),
        MutationSection::default(),
        Arc::new(redactor),
        8_000,
    )
}

pub fn write_file(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir -p");
    }
    std::fs::write(&path, content).expect("write fixture");
    path
}
