use anyhow::Result;

use crate::error::BootError;
use crate::storage::DeviceTree;

/// BIOS drive numbering for one run: `hdN` is the disk's position in the
/// sorted drive list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveMap {
    drives: Vec<String>,
}

impl DriveMap {
    pub fn new(mut drives: Vec<String>) -> Self {
        drives.sort();
        drives.dedup();
        Self { drives }
    }

    pub fn from_tree(tree: &DeviceTree) -> Self {
        Self::new(tree.drive_list())
    }

    pub fn drives(&self) -> &[String] {
        &self.drives
    }

    pub fn index(&self, disk: &str) -> Result<usize> {
        self.drives
            .iter()
            .position(|d| d == disk)
            .ok_or_else(|| BootError::DriveNotMapped(disk.into()).into())
    }

    /// `hdN` for a disk
    pub fn disk_name(&self, disk: &str) -> Result<String> {
        Ok(format!("hd{}", self.index(disk)?))
    }
}

/// Renders devices in the bootloader's `(hdN,P)` address syntax.
#[derive(Debug, Clone, Copy)]
pub struct PartitionNamer<'a> {
    pub tree: &'a DeviceTree,
    pub drives: &'a DriveMap,
}

impl<'a> PartitionNamer<'a> {
    pub fn new(tree: &'a DeviceTree, drives: &'a DriveMap) -> Self {
        Self { tree, drives }
    }

    pub fn name(&self, device: &str) -> Result<String> {
        let (disk, part) = self.tree.disk_part(device)?;
        let disk = self.drives.disk_name(&disk)?;
        Ok(match part {
            Some(part) => format!("({},{})", disk, part),
            None => format!("({})", disk),
        })
    }

    /// Address of the whole disk carrying `device`
    pub fn disk_of(&self, device: &str) -> Result<String> {
        let (disk, _) = self.tree.disk_part(device)?;
        self.name(&disk)
    }
}
