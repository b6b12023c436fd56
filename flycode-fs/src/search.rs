use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use flycode_errors::AppError;
use flycode_errors::Result;
use globset::Glob;
use regex::Regex;

use crate::FileService;
use crate::SearchMatch;
use crate::SearchOptions;
use crate::SearchResult;

fn normalize_extension(ext: &str) -> String {
    let lower = ext.to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

fn collect_candidates(service: &FileService, root: &Path, glob: Option<&str>) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let matcher = match glob {
        Some(pattern) => Some(
            Glob::new(pattern)
                .map_err(|e| AppError::InvalidInput(format!("invalid glob `{pattern}`: {e}")))?
                .compile_matcher(),
        ),
        None => None,
    };

    let mut out = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.to_path_buf());
    while let Some(dir) = queue.pop_front() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let child = entry.path();
            if service.sandbox.assert_allowed(&child).is_err() {
                continue;
            }
            if child.is_dir() {
                queue.push_back(child);
                continue;
            }
            let matches = match &matcher {
                None => true,
                Some(m) => {
                    let rel = child
                        .strip_prefix(root)
                        .unwrap_or(&child)
                        .to_string_lossy()
                        .replace('\\', "/");
                    m.is_match(&rel)
                }
            };
            if matches {
                out.push(child);
            }
        }
    }
    Ok(out)
}

fn file_mtime_secs(path: &Path) -> i64 {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn passes_file_filters(service: &FileService, path: &Path, opts: &SearchOptions) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    let size = metadata.len();
    if size > service.limits.max_file_bytes {
        return false;
    }
    if let Some(min) = opts.min_bytes
        && size < min
    {
        return false;
    }
    if let Some(max) = opts.max_bytes
        && size > max
    {
        return false;
    }
    if let Some(extensions) = &opts.extensions {
        let normalized: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
        let path_ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if !normalized.contains(&path_ext) {
            return false;
        }
    }
    if let Some(from) = opts.mtime_from
        && file_mtime_secs(path) < from
    {
        return false;
    }
    if let Some(to) = opts.mtime_to
        && file_mtime_secs(path) > to
    {
        return false;
    }
    true
}

enum Matcher {
    Substring(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Substring(needle) => line.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(line),
        }
    }
}

pub(crate) fn search(service: &FileService, path: &Path, opts: &SearchOptions) -> Result<SearchResult> {
    let matcher = if opts.regex {
        Matcher::Regex(
            Regex::new(&opts.query)
                .map_err(|e| AppError::InvalidInput(format!("invalid regex `{}`: {e}", opts.query)))?,
        )
    } else {
        Matcher::Substring(opts.query.clone())
    };

    let context_lines = opts.context_lines.unwrap_or(0).clamp(0, 5) as usize;
    let cap = opts
        .limit
        .unwrap_or(service.limits.max_search_matches)
        .min(service.limits.max_search_matches) as usize;

    let candidates = collect_candidates(service, path, opts.glob.as_deref())?;

    let mut matches = Vec::new();
    let mut total: u32 = 0;
    let mut truncated = false;

    for file in candidates {
        if !passes_file_filters(service, &file, opts) {
            continue;
        }
        let Ok(raw) = std::fs::read(&file) else {
            continue;
        };
        let content = String::from_utf8_lossy(&raw);
        let lines: Vec<&str> = content.lines().collect();

        for (idx, line) in lines.iter().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            total += 1;
            if matches.len() >= cap {
                truncated = true;
                continue;
            }

            let before_start = idx.saturating_sub(context_lines);
            let after_end = (idx + context_lines + 1).min(lines.len());

            let (redacted_line, _) = service.redactor.redact(line);
            let context_before: Vec<String> = lines[before_start..idx]
                .iter()
                .map(|l| service.redactor.redact(l).0)
                .collect();
            let context_after: Vec<String> = lines[idx + 1..after_end]
                .iter()
                .map(|l| service.redactor.redact(l).0)
                .collect();

            matches.push(SearchMatch {
                path: file.to_string_lossy().to_string(),
                line_number: (idx + 1) as u32,
                line: redacted_line,
                context_before,
                context_after,
            });
        }
    }

    Ok(SearchResult {
        matches,
        total,
        truncated,
    })
}
