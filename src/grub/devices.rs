use anyhow::Result;

use crate::error::BootError;
use crate::storage::DeviceTree;

/// Devices the given device resides on, as far as the bootloader can reach.
///
/// Accepts RAID1 arrays (`md0`), disks (`sda`) and plain partitions
/// (`sda1`). Logical volumes, volume groups and encrypted volumes cannot be
/// booted from directly and yield an empty list. For a mirror every member
/// holds a full copy, so each member is returned, sorted.
pub fn physical_devices(tree: &DeviceTree, name: &str) -> Result<Vec<String>> {
    let device = tree.get(name)?;
    let path = device.dev_relative_path();

    if tree.is_lvm(name) {
        return Ok(Vec::new());
    }

    if path.starts_with("mapper/luks-") {
        return Ok(Vec::new());
    }

    if path.starts_with("md") {
        let mut members = tree.raid_members(name, 1, false)?;
        members.sort();
        return Ok(members);
    }

    Ok(vec![name.to_string()])
}

/// The physical device of `target` on the same disk as `boot_dev`, or the
/// first one when none shares it.
pub fn matching_part(tree: &DeviceTree, boot_dev: &str, target: &str) -> Result<String> {
    let (boot_disk, _) = tree.disk_part(boot_dev)?;
    let devices = physical_devices(tree, target)?;

    for device in &devices {
        let (disk, _) = tree.disk_part(device)?;
        if disk == boot_disk {
            return Ok(device.clone());
        }
    }

    devices
        .into_iter()
        .next()
        .ok_or_else(|| BootError::NoPhysicalDevice(target.into()).into())
}
