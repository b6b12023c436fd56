use std::path::Path;

use flycode_errors::AppError;
use flycode_errors::Result;

use crate::ChmodResult;
use crate::MvResult;
use crate::RmResult;

pub(crate) fn mkdir(path: &Path, parents: bool) -> Result<()> {
    if path.exists() {
        return if path.is_dir() {
            Ok(())
        } else {
            Err(AppError::Conflict(format!(
                "{} exists and is not a directory",
                path.display()
            )))
        };
    }

    if parents {
        std::fs::create_dir_all(path)
            .map_err(|e| AppError::internal(format!("mkdir -p {}: {e}", path.display())))
    } else {
        let Some(parent) = path.parent() else {
            return Err(AppError::InvalidInput("path has no parent".to_string()));
        };
        if !parent.is_dir() {
            return Err(AppError::NotFound(format!(
                "parent directory {} does not exist",
                parent.display()
            )));
        }
        std::fs::create_dir(path)
            .map_err(|e| AppError::internal(format!("mkdir {}: {e}", path.display())))
    }
}

pub(crate) fn rm(path: &Path, recursive: bool, force: bool) -> Result<RmResult> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return if force {
                Ok(RmResult {
                    removed: false,
                    kind: "missing".to_string(),
                })
            } else {
                Err(AppError::NotFound(format!("{} does not exist", path.display())))
            };
        }
        Err(e) => return Err(AppError::internal(format!("stat {}: {e}", path.display()))),
    };

    if metadata.is_dir() {
        if !recursive {
            return Err(AppError::InvalidInput(
                "directory deletion requires recursive=true".to_string(),
            ));
        }
        std::fs::remove_dir_all(path)
            .map_err(|e| AppError::internal(format!("rm -r {}: {e}", path.display())))?;
        Ok(RmResult {
            removed: true,
            kind: "dir".to_string(),
        })
    } else {
        std::fs::remove_file(path)
            .map_err(|e| AppError::internal(format!("rm {}: {e}", path.display())))?;
        Ok(RmResult {
            removed: true,
            kind: "file".to_string(),
        })
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        copy_dir_recursive(from, to)?;
        std::fs::remove_dir_all(from)
    } else {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

pub(crate) fn mv(from: &Path, to: &Path, overwrite: bool) -> Result<MvResult> {
    if !from.exists() {
        return Err(AppError::NotFound(format!("{} does not exist", from.display())));
    }
    if to.exists() {
        if to.is_dir() {
            return Err(AppError::Conflict(
                "destination is a directory; directory overwrite is not supported".to_string(),
            ));
        }
        if !overwrite {
            return Err(AppError::Conflict(format!(
                "{} already exists",
                to.display()
            )));
        }
    }

    match std::fs::rename(from, to) {
        Ok(()) => {}
        Err(_) => {
            // Likely a cross-filesystem rename; fall back to copy-then-remove.
            copy_then_remove(from, to)
                .map_err(|e| AppError::internal(format!("mv {} -> {}: {e}", from.display(), to.display())))?;
        }
    }

    Ok(MvResult {
        from: from.to_string_lossy().to_string(),
        to: to.to_string_lossy().to_string(),
    })
}

#[cfg(unix)]
pub(crate) fn chmod(path: &Path, mode: &str) -> Result<ChmodResult> {
    use std::os::unix::fs::PermissionsExt;

    let is_octal_mode = mode.len() >= 3 && mode.len() <= 4 && mode.bytes().all(|b| (b'0'..=b'7').contains(&b));
    if !is_octal_mode {
        return Err(AppError::InvalidInput(format!("invalid mode `{mode}`")));
    }
    let parsed = u32::from_str_radix(mode, 8)
        .map_err(|e| AppError::InvalidInput(format!("invalid mode `{mode}`: {e}")))?;

    let metadata = std::fs::metadata(path)
        .map_err(|_| AppError::NotFound(format!("{} does not exist", path.display())))?;
    let mut perms = metadata.permissions();
    perms.set_mode(parsed);
    std::fs::set_permissions(path, perms)
        .map_err(|e| AppError::internal(format!("chmod {}: {e}", path.display())))?;

    Ok(ChmodResult {
        mode: format!("{parsed:04o}"),
    })
}

#[cfg(not(unix))]
pub(crate) fn chmod(_path: &Path, _mode: &str) -> Result<ChmodResult> {
    Err(AppError::NotSupported(
        "chmod is not supported on this platform".to_string(),
    ))
}
