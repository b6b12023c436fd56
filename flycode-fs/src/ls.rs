use std::collections::VecDeque;
use std::path::Path;
use std::time::UNIX_EPOCH;

use flycode_errors::Result;
use globset::Glob;

use crate::FileService;
use crate::LsEntry;

fn to_entry(path: &Path) -> std::io::Result<LsEntry> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(LsEntry {
        path: path.to_string_lossy().to_string(),
        is_dir: metadata.is_dir(),
        size: metadata.len(),
        mtime,
    })
}

pub(crate) fn ls(
    service: &FileService,
    path: &Path,
    depth: u32,
    glob: Option<&str>,
) -> Result<Vec<LsEntry>> {
    service.sandbox.assert_allowed(path)?;

    if path.is_file() {
        let entry = to_entry(path)
            .map_err(|e| flycode_errors::AppError::NotFound(format!("{}: {e}", path.display())))?;
        return Ok(vec![entry]);
    }

    let matcher = match glob {
        Some(pattern) => Some(
            Glob::new(pattern)
                .map_err(|e| {
                    flycode_errors::AppError::InvalidInput(format!("invalid glob `{pattern}`: {e}"))
                })?
                .compile_matcher(),
        ),
        None => None,
    };

    let mut results = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((path.to_path_buf(), 0u32));

    while let Some((dir, current_depth)) = queue.pop_front() {
        if current_depth >= depth {
            continue;
        }
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let child = entry.path();
            if service.sandbox.assert_allowed(&child).is_err() {
                continue;
            }

            let matches = match &matcher {
                None => true,
                Some(m) => {
                    let rel = child
                        .strip_prefix(path)
                        .unwrap_or(&child)
                        .to_string_lossy()
                        .replace('\\', "/");
                    m.is_match(&rel)
                }
            };

            let is_dir = child.is_dir();
            if matches && let Ok(e) = to_entry(&child) {
                results.push(e);
            }
            if is_dir {
                queue.push_back((child, current_depth + 1));
            }
        }
    }

    results.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(results)
}
