//! Read-only view of the storage topology the bootloader is planned against.
//!
//! The installer's partitioning stage owns the real device tree; this module
//! only carries the facts the bootloader needs: device paths, which disk a
//! partition lives on, RAID membership and LVM/mapper classification.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BootError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    Disk,
    /// `number` is the kernel's 1-based partition number
    Partition {
        disk: String,
        number: u32,
    },
    Raid {
        level: u8,
        members: Vec<String>,
    },
    LogicalVolume,
    VolumeGroup,
    Mapper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDevice {
    pub name: String,
    pub path: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    /// How fstab refers to this device (e.g. `UUID=...`)
    #[serde(default)]
    pub fstab_spec: Option<String>,
    /// Filesystem type when the device carries one
    #[serde(default)]
    pub format: Option<String>,
}

impl StorageDevice {
    pub fn disk(name: &str) -> Self {
        Self {
            name: name.into(),
            path: format!("/dev/{}", name),
            kind: DeviceKind::Disk,
            fstab_spec: None,
            format: None,
        }
    }

    pub fn partition(name: &str, disk: &str, number: u32) -> Self {
        Self {
            name: name.into(),
            path: format!("/dev/{}", name),
            kind: DeviceKind::Partition {
                disk: disk.into(),
                number,
            },
            fstab_spec: None,
            format: None,
        }
    }

    pub fn raid(name: &str, level: u8, members: &[&str]) -> Self {
        Self {
            name: name.into(),
            path: format!("/dev/{}", name),
            kind: DeviceKind::Raid {
                level,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
            fstab_spec: None,
            format: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_fstab_spec(mut self, spec: &str) -> Self {
        self.fstab_spec = Some(spec.into());
        self
    }

    /// Path relative to `/dev/`
    pub fn dev_relative_path(&self) -> &str {
        self.path.strip_prefix("/dev/").unwrap_or(&self.path)
    }

    pub fn fstab_spec(&self) -> &str {
        self.fstab_spec.as_deref().unwrap_or(&self.path)
    }
}

/// Mounted filesystem layout of the target system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsSet {
    /// Name of the device mounted at `/`
    pub root: String,
    /// Mountpoint to device name
    #[serde(default)]
    pub mountpoints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTree {
    pub devices: Vec<StorageDevice>,
    #[serde(flatten)]
    pub fsset: FsSet,
}

impl DeviceTree {
    pub fn new(devices: Vec<StorageDevice>, root: &str) -> Self {
        Self {
            devices,
            fsset: FsSet {
                root: root.into(),
                mountpoints: BTreeMap::new(),
            },
        }
    }

    pub fn with_mount(mut self, mountpoint: &str, device: &str) -> Self {
        self.fsset
            .mountpoints
            .insert(mountpoint.into(), device.into());
        self
    }

    pub fn get(&self, name: &str) -> Result<&StorageDevice> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| BootError::UnknownDevice(name.into()).into())
    }

    pub fn root_device(&self) -> Result<&StorageDevice> {
        self.get(&self.fsset.root)
    }

    /// Device mounted at `mountpoint`, if any
    pub fn mounted_at(&self, mountpoint: &str) -> Result<Option<&StorageDevice>> {
        match self.fsset.mountpoints.get(mountpoint) {
            Some(name) => self.get(name).map(Some),
            None => Ok(None),
        }
    }

    pub fn is_lvm(&self, name: &str) -> bool {
        self.devices.iter().any(|d| {
            d.name == name
                && matches!(d.kind, DeviceKind::LogicalVolume | DeviceKind::VolumeGroup)
        })
    }

    /// Sorted names of every physical disk
    pub fn drive_list(&self) -> Vec<String> {
        let mut drives: Vec<String> = self
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Disk)
            .map(|d| d.name.clone())
            .collect();
        drives.sort();
        drives
    }

    /// Split a device into its disk and the bootloader's zero-based
    /// partition index. Whole disks and other devices have no index.
    pub fn disk_part(&self, name: &str) -> Result<(String, Option<u32>)> {
        let device = self.get(name)?;
        Ok(match &device.kind {
            DeviceKind::Partition { disk, number } => {
                (disk.clone(), Some(number.saturating_sub(1)))
            }
            _ => (device.name.clone(), None),
        })
    }

    /// Members of a RAID array of the given level. Arrays of any other level
    /// yield nothing; `strip_part` reduces members to their disks.
    pub fn raid_members(&self, name: &str, level: u8, strip_part: bool) -> Result<Vec<String>> {
        let device = self.get(name)?;
        let members = match &device.kind {
            DeviceKind::Raid {
                level: actual,
                members,
            } if *actual == level => members,
            _ => return Ok(Vec::new()),
        };

        let mut result = Vec::with_capacity(members.len());
        for member in members {
            let name = if strip_part {
                self.disk_part(member)?.0
            } else {
                member.clone()
            };
            result.push(name);
        }
        Ok(result)
    }
}
