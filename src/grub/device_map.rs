use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;

use super::files::{in_root, rotate};
use super::naming::DriveMap;
use crate::paths;
use crate::storage::DeviceTree;

const HEADER: &str = "# this device map was generated by mkOS installer\n";

/// Every device referenced during a run. Only the disks they live on end up
/// in the device map, once each.
#[derive(Debug, Clone, Default)]
pub struct UsedDevices {
    devices: BTreeSet<String>,
}

impl UsedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, device: &str) {
        self.devices.insert(device.to_string());
    }

    pub fn mark_all<I, S>(&mut self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for device in devices {
            self.mark(device.as_ref());
        }
    }

    /// Sorted, deduplicated disks carrying the marked devices. RAID
    /// containers are dropped since the BIOS cannot address them.
    pub fn disks(&self, tree: &DeviceTree) -> Result<Vec<String>> {
        let mut disks = BTreeSet::new();
        for device in &self.devices {
            let (disk, _) = tree.disk_part(device)?;
            disks.insert(disk);
        }
        Ok(disks.into_iter().filter(|d| !d.starts_with("md")).collect())
    }

    pub fn render(&self, tree: &DeviceTree, drives: &DriveMap) -> Result<String> {
        let mut out = String::from(HEADER);
        for disk in self.disks(tree)? {
            let path = &tree.get(&disk)?.path;
            out.push_str(&format!("({})     {}\n", drives.disk_name(&disk)?, path));
        }
        Ok(out)
    }

    /// Rotate the old map and write the new one under `root`
    pub fn write(&self, root: &Path, tree: &DeviceTree, drives: &DriveMap) -> Result<()> {
        let contents = self.render(tree, drives)?;
        let path = in_root(root, paths::DEVICE_MAP);
        rotate(&path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}
