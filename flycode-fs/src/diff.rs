use flycode_errors::AppError;
use flycode_errors::Result;
use similar::TextDiff;

use crate::DiffOptions;
use crate::DiffResult;
use crate::FileService;

const MAX_DIFF_LINES: usize = 4000;

fn load_side(service: &FileService, path: &str) -> Result<String> {
    let path = std::path::Path::new(path);
    service.sandbox.assert_allowed(path)?;
    let metadata = std::fs::metadata(path).map_err(|_| AppError::NotFound(format!("{} does not exist", path.display())))?;
    if metadata.len() > service.limits.max_file_bytes {
        return Err(AppError::LimitExceeded(format!("{} exceeds max_file_bytes", path.display())));
    }
    let raw = std::fs::read(path).map_err(|e| AppError::internal(format!("reading {}: {e}", path.display())))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn check_line_count(label: &str, text: &str) -> Result<()> {
    if text.lines().count() > MAX_DIFF_LINES {
        return Err(AppError::LimitExceeded(format!("{label} exceeds {MAX_DIFF_LINES} lines")));
    }
    Ok(())
}

pub(crate) fn diff(service: &FileService, opts: &DiffOptions) -> Result<DiffResult> {
    let left_path = opts
        .left_path
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("left_path is required".to_string()))?;
    let left = load_side(service, left_path)?;
    check_line_count(left_path, &left)?;

    let (right, right_label) = match (&opts.right_path, &opts.right_content) {
        (Some(_), Some(_)) => {
            return Err(AppError::InvalidInput(
                "exactly one of right_path/right_content must be supplied".to_string(),
            ));
        }
        (Some(right_path), None) => {
            let text = load_side(service, right_path)?;
            check_line_count(right_path, &text)?;
            (text, right_path.clone())
        }
        (None, Some(content)) => {
            if content.len() as u64 > service.limits.max_file_bytes {
                return Err(AppError::LimitExceeded("right_content exceeds max_file_bytes".to_string()));
            }
            check_line_count("right_content", content)?;
            (content.clone(), "right_content".to_string())
        }
        (None, None) => {
            return Err(AppError::InvalidInput(
                "exactly one of right_path/right_content must be supplied".to_string(),
            ));
        }
    };

    let context_radius = opts.context_lines.unwrap_or(3).clamp(0, 20) as usize;

    let text_diff = TextDiff::from_lines(&left, &right);
    let unified = text_diff
        .unified_diff()
        .context_radius(context_radius)
        .header(left_path, &right_label)
        .to_string();

    let (content, truncated) = service.finish_text(unified);

    Ok(DiffResult {
        diff: content,
        truncated,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::DiffOptions;
    use crate::test_support::service_for;
    use crate::test_support::write_file;

    #[test]
    fn diffs_against_right_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = write_file(dir.path(), "a.txt", "one\ntwo\nthree\n");
        let service = service_for(dir.path());

        let opts = DiffOptions {
            left_path: Some(left.to_string_lossy().to_string()),
            right_content: Some("one\nTWO\nthree\n".to_string()),
            ..DiffOptions::default()
        };
        let result = service.diff(&opts).expect("diff");
        assert!(result.diff.contains("-two"));
        assert!(result.diff.contains("+TWO"));
        assert!(result.diff.contains("--- "));
        assert!(result.diff.contains("+++ right_content"));
    }

    #[test]
    fn diffs_against_right_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = write_file(dir.path(), "a.txt", "hello\n");
        let right = write_file(dir.path(), "b.txt", "world\n");
        let service = service_for(dir.path());

        let opts = DiffOptions {
            left_path: Some(left.to_string_lossy().to_string()),
            right_path: Some(right.to_string_lossy().to_string()),
            ..DiffOptions::default()
        };
        let result = service.diff(&opts).expect("diff");
        assert!(result.diff.contains("-hello"));
        assert!(result.diff.contains("+world"));
    }

    #[test]
    fn requires_exactly_one_right_side() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = write_file(dir.path(), "a.txt", "hello\n");
        let service = service_for(dir.path());

        let neither = DiffOptions {
            left_path: Some(left.to_string_lossy().to_string()),
            ..DiffOptions::default()
        };
        assert!(service.diff(&neither).is_err());

        let both = DiffOptions {
            left_path: Some(left.to_string_lossy().to_string()),
            right_path: Some("b.txt".to_string()),
            right_content: Some("x".to_string()),
            ..DiffOptions::default()
        };
        assert!(service.diff(&both).is_err());
    }
}
