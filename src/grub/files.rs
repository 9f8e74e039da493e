//! Rotate-then-write handling for the files the bootloader owns.
//!
//! Every rewrite first moves the previous version aside with the backup
//! suffix. A failed move aborts the write.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::paths;

/// Mode for a configuration file that did not exist before
pub const DEFAULT_CONFIG_MODE: u32 = 0o600;

/// A side effect that failed without affecting the boot setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectWarning {
    pub path: PathBuf,
    pub message: String,
}

/// `path` (absolute inside the installed system) under `root`
pub fn in_root(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(paths::BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Move an existing regular file aside, returning its permission bits.
pub fn rotate(path: &Path) -> Result<Option<u32>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(None),
    };
    let mode = metadata.permissions().mode() & 0o777;
    let backup = backup_path(path);
    fs::rename(path, &backup)
        .with_context(|| format!("Failed to move {} aside", path.display()))?;
    tracing::debug!("Rotated {} to {}", path.display(), backup.display());
    Ok(Some(mode))
}

/// Rotate `path` and write `contents`, keeping the old permission bits or
/// `default_mode` for a new file.
pub fn write_rotated(path: &Path, contents: &str, default_mode: u32) -> Result<()> {
    let mode = rotate(path)?.unwrap_or(default_mode);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    Ok(())
}

/// Point `link` at `target`, moving whatever is there aside first. Failures
/// are reported, never propagated.
pub fn replace_symlink(link: &Path, target: &str) -> Option<SideEffectWarning> {
    let result = (|| -> std::io::Result<()> {
        if fs::symlink_metadata(link).is_ok() {
            fs::rename(link, backup_path(link))?;
        }
        symlink(target, link)
    })();

    match result {
        Ok(()) => None,
        Err(e) => {
            let warning = SideEffectWarning {
                path: link.to_path_buf(),
                message: e.to_string(),
            };
            tracing::warn!("Could not link {} -> {}: {}", link.display(), target, e);
            Some(warning)
        }
    }
}

fn sysconfig_contents(boot: &str, force_lba: bool) -> String {
    format!("boot={}\nforcelba={}\n", boot, if force_lba { 1 } else { 0 })
}

/// Rewrite the state file. A regular file or an absolute symlink in the way
/// is moved aside first.
pub fn write_sysconfig(root: &Path, target: &str, force_lba: bool) -> Result<()> {
    let path = in_root(root, paths::SYSCONFIG_GRUB);

    if fs::metadata(&path).is_ok() {
        rotate(&path)?;
    } else if let Ok(link) = fs::read_link(&path) {
        if link.is_absolute() {
            fs::rename(&path, backup_path(&path))
                .with_context(|| format!("Failed to move {} aside", path.display()))?;
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, sysconfig_contents(&format!("/dev/{}", target), force_lba))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Create the state file recording `device` unless one already exists.
/// Returns whether it was written.
pub fn write_sysconfig_if_absent(root: &Path, device: &str, force_lba: bool) -> Result<bool> {
    let path = in_root(root, paths::SYSCONFIG_GRUB);
    if fs::metadata(&path).is_ok() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, sysconfig_contents(device, force_lba))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
