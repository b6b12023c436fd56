use std::path::Path;
use std::time::UNIX_EPOCH;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flycode_errors::AppError;
use flycode_errors::Result;
use sha2::Digest;
use sha2::Sha256;

use crate::FileMeta;
use crate::FileService;
use crate::ReadOptions;
use crate::ReadResult;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn selector_count(opts: &ReadOptions) -> usize {
    [opts.range.is_some(), opts.line.is_some(), opts.lines.is_some()]
        .iter()
        .filter(|b| **b)
        .count()
}

fn select_range(content: &str, spec: &str) -> Result<String> {
    let chars: Vec<char> = content.chars().collect();
    if let Some(n) = spec.strip_prefix("head:") {
        let n: usize = n
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("invalid range `{spec}`")))?;
        return Ok(chars.iter().take(n).collect());
    }
    if let Some(n) = spec.strip_prefix("tail:") {
        let n: usize = n
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("invalid range `{spec}`")))?;
        let start = chars.len().saturating_sub(n);
        return Ok(chars[start..].iter().collect());
    }
    if let Some((a, b)) = spec.split_once(':') {
        let a: usize = a
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("invalid range `{spec}`")))?;
        let b: usize = b
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("invalid range `{spec}`")))?;
        if a > b {
            return Err(AppError::InvalidInput(format!("invalid range `{spec}`: start > end")));
        }
        let b = b.min(chars.len());
        let a = a.min(b);
        return Ok(chars[a..b].iter().collect());
    }
    Err(AppError::InvalidInput(format!("invalid range `{spec}`")))
}

fn select_line(content: &str, line: u32) -> String {
    content
        .lines()
        .nth((line as usize).saturating_sub(1))
        .unwrap_or("")
        .to_string()
}

fn select_lines(content: &str, spec: &str) -> Result<String> {
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| AppError::InvalidInput(format!("invalid lines `{spec}`")))?;
    let start: usize = start
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("invalid lines `{spec}`")))?;
    let end: usize = end
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("invalid lines `{spec}`")))?;
    if start < 1 || start > end {
        return Err(AppError::InvalidInput(format!(
            "invalid lines `{spec}`: need 1 <= start <= end"
        )));
    }
    let lines: Vec<&str> = content.lines().collect();
    let start_idx = start - 1;
    let end_idx = end.min(lines.len());
    if start_idx >= lines.len() {
        return Ok(String::new());
    }
    Ok(lines[start_idx..end_idx].join("\n"))
}

fn file_meta(path: &Path, size: u64) -> FileMeta {
    let metadata = std::fs::metadata(path).ok();
    let mtime = metadata
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let ctime = metadata
        .as_ref()
        .and_then(|m| m.created().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(mtime);
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        metadata
            .as_ref()
            .map(|m| format!("{:04o}", m.permissions().mode() & 0o7777))
            .unwrap_or_else(|| "0000".to_string())
    };
    #[cfg(not(unix))]
    let mode = "0000".to_string();

    FileMeta {
        size,
        mtime,
        ctime,
        mode,
    }
}

pub(crate) fn read(service: &FileService, path: &Path, opts: &ReadOptions) -> Result<ReadResult> {
    if selector_count(opts) > 1 {
        return Err(AppError::InvalidInput(
            "only one of range/line/lines may be supplied".to_string(),
        ));
    }

    let encoding = opts.encoding.as_deref().unwrap_or("utf-8");
    if (opts.line.is_some() || opts.lines.is_some()) && encoding != "utf-8" {
        return Err(AppError::InvalidInput(
            "line/lines selection requires utf-8 encoding".to_string(),
        ));
    }

    let metadata = std::fs::metadata(path)
        .map_err(|_| AppError::NotFound(format!("{} does not exist", path.display())))?;
    if !metadata.is_file() {
        return Err(AppError::NotFound(format!("{} is not a regular file", path.display())));
    }
    if metadata.len() > service.limits.max_file_bytes {
        return Err(AppError::LimitExceeded(format!(
            "{} exceeds max_file_bytes",
            path.display()
        )));
    }

    let raw = std::fs::read(path).map_err(|e| AppError::internal(format!("reading {}: {e}", path.display())))?;
    let sha256 = sha256_hex(&raw);
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();

    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    let mut text = if is_pdf {
        pdf_extract::extract_text(path)
            .map_err(|e| AppError::InvalidInput(format!("failed to extract PDF text: {e}")))?
    } else if encoding == "base64" {
        BASE64.encode(&raw)
    } else {
        String::from_utf8_lossy(&raw).into_owned()
    };

    if let Some(spec) = &opts.range {
        text = select_range(&text, spec)?;
    } else if let Some(line) = opts.line {
        text = select_line(&text, line);
    } else if let Some(spec) = &opts.lines {
        text = select_lines(&text, spec)?;
    }

    let (content, truncated) = service.finish_text(text);

    let meta = if opts.include_meta {
        Some(file_meta(path, metadata.len()))
    } else {
        None
    };

    Ok(ReadResult {
        content,
        mime,
        bytes: metadata.len(),
        sha256,
        truncated,
        meta,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::ReadOptions;
    use crate::test_support::service_for;
    use crate::test_support::write_file;

    #[test]
    fn reads_whole_file_by_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.txt", "one\ntwo\nthree");
        let service = service_for(dir.path());
        let result = service.read(&file, &ReadOptions::default()).expect("read");
        assert_eq!(result.content, "one\ntwo\nthree");
        assert!(!result.truncated);
        assert_eq!(result.sha256.len(), 64);
    }

    #[test]
    fn single_line_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.txt", "one\ntwo\nthree");
        let service = service_for(dir.path());
        let opts = ReadOptions {
            line: Some(2),
            ..ReadOptions::default()
        };
        let result = service.read(&file, &opts).expect("read");
        assert_eq!(result.content, "two");
    }

    #[test]
    fn lines_range_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.txt", "one\ntwo\nthree\nfour");
        let service = service_for(dir.path());
        let opts = ReadOptions {
            lines: Some("2-3".to_string()),
            ..ReadOptions::default()
        };
        let result = service.read(&file, &opts).expect("read");
        assert_eq!(result.content, "two\nthree");
    }

    #[test]
    fn rejects_multiple_selectors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.txt", "one\ntwo");
        let service = service_for(dir.path());
        let opts = ReadOptions {
            line: Some(1),
            lines: Some("1-2".to_string()),
            ..ReadOptions::default()
        };
        assert!(service.read(&file, &opts).is_err());
    }

    #[test]
    fn base64_encoding_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.bin", "hello");
        let service = service_for(dir.path());
        let opts = ReadOptions {
            encoding: Some("base64".to_string()),
            ..ReadOptions::default()
        };
        let result = service.read(&file, &opts).expect("read");
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(result.content)
            .expect("decode");
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn include_meta_reports_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "a.txt", "hi");
        let service = service_for(dir.path());
        let opts = ReadOptions {
            include_meta: true,
            ..ReadOptions::default()
        };
        let result = service.read(&file, &opts).expect("read");
        assert!(result.meta.is_some());
    }
}
