use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flycode_errors::AppError;
use flycode_errors::Result;
use sha2::Digest;
use sha2::Sha256;

use crate::CommitWriteInput;
use crate::CommitWriteResult;
use crate::WriteMode;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn existing_sha256(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(sha256_hex(&bytes))
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".flycode.bak.{millis}"));
    std::path::PathBuf::from(name)
}

pub(crate) fn commit_write(input: &CommitWriteInput) -> Result<CommitWriteResult> {
    if let Some(parent) = input.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::internal(format!("creating parent of {}: {e}", input.path.display())))?;
    }

    let mut backup = None;
    if matches!(input.mode, WriteMode::Overwrite) && input.path.is_file() && input.backup_on_overwrite {
        let dest = backup_path(&input.path);
        std::fs::copy(&input.path, &dest)
            .map_err(|e| AppError::internal(format!("backing up {}: {e}", input.path.display())))?;
        backup = Some(dest.to_string_lossy().to_string());
    }

    match input.mode {
        WriteMode::Overwrite => {
            std::fs::write(&input.path, input.content.as_bytes())
                .map_err(|e| AppError::internal(format!("writing {}: {e}", input.path.display())))?;
        }
        WriteMode::Append => {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&input.path)
                .map_err(|e| AppError::internal(format!("opening {} for append: {e}", input.path.display())))?;
            file.write_all(input.content.as_bytes())
                .map_err(|e| AppError::internal(format!("appending to {}: {e}", input.path.display())))?;
        }
    }

    let raw = std::fs::read(&input.path)
        .map_err(|e| AppError::internal(format!("reading back {}: {e}", input.path.display())))?;
    let sha256 = sha256_hex(&raw);

    Ok(CommitWriteResult {
        path: input.path.to_string_lossy().to_string(),
        bytes_written: raw.len() as u64,
        sha256,
        backup_path: backup,
    })
}
