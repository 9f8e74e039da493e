//! Re-install on upgrade without regenerating grub.conf.
//!
//! The previous boot device is only trusted when it was recorded on disk.
//! Without a record nothing is touched: guessing could overwrite the boot
//! sector of an unrelated disk.

use anyhow::Result;
use std::fs;
use std::path::Path;

use super::config::PathStyle;
use super::files::{in_root, write_sysconfig_if_absent};
use super::install::{command_pair, Executor};
use super::naming::{DriveMap, PartitionNamer};
use crate::cmd::Runner;
use crate::error::BootError;
use crate::paths;
use crate::storage::DeviceTree;

/// Value of a `key=value` record line, trimmed
fn boot_dev_string(line: &str) -> Option<String> {
    line.split_once('=')
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Find the recorded boot device: the state file's `boot=` line first, then
/// the `#boot=` comment in grub.conf.
pub fn recover_boot_device(install_root: &Path) -> Option<String> {
    let sources = [(paths::SYSCONFIG_GRUB, "boot="), (paths::GRUB_CONF, "#boot=")];

    for (file, prefix) in sources {
        let path = in_root(install_root, file);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let found = contents
            .lines()
            .find(|line| line.starts_with(prefix))
            .and_then(boot_dev_string);
        if found.is_some() {
            return found;
        }
    }

    None
}

/// Install commands re-targeting the recovered device. Each stage1 disk is
/// paired with the root member living on the same disk when there is one.
pub fn plan(
    tree: &DeviceTree,
    drives: &DriveMap,
    style: PathStyle,
    device: &str,
    force_lba: bool,
) -> Result<Vec<String>> {
    let namer = PartitionNamer::new(tree, drives);
    let carrier = style.boot_carrier(tree)?;

    let root_devs = if carrier.starts_with("md") {
        tree.raid_members(&carrier, 1, false)?
    } else {
        vec![carrier.clone()]
    };
    let first_root = root_devs
        .first()
        .ok_or_else(|| BootError::NoPhysicalDevice(carrier.clone()))?;

    let device = device.strip_prefix("/dev/").unwrap_or(device);
    let stage1_devs = if device.starts_with("md") {
        tree.raid_members(device, 1, true)?
    } else {
        vec![device.to_string()]
    };

    let mut commands = Vec::with_capacity(stage1_devs.len());
    for stage1_dev in &stage1_devs {
        let stage1 = namer.name(stage1_dev)?;

        let mut root_part = namer.name(first_root)?;
        for root_dev in &root_devs {
            if namer.disk_of(root_dev)? == stage1 {
                root_part = namer.name(root_dev)?;
                break;
            }
        }

        commands.push(command_pair(&root_part, &stage1, style.grub_path(), force_lba));
    }

    Ok(commands)
}

/// Re-install stage1/stage2 on the previously recorded boot device.
///
/// Returns the device that was used, or `None` when no record exists, in
/// which case nothing was written or run.
pub fn upgrade(
    runner: &dyn Runner,
    tree: &DeviceTree,
    install_root: &Path,
    force_lba: bool,
) -> Result<Option<String>> {
    let Some(device) = recover_boot_device(install_root) else {
        tracing::warn!("No recorded boot device found; leaving bootloader untouched");
        return Ok(None);
    };

    println!("Found previous boot device: {}", device);
    write_sysconfig_if_absent(install_root, &device, force_lba)?;

    let drives = DriveMap::from_tree(tree);
    let style = PathStyle::detect(tree)?;
    let commands = plan(tree, &drives, style, &device, force_lba)?;

    Executor::new(runner, tree, install_root).run(style, &commands)?;
    Ok(Some(device))
}
