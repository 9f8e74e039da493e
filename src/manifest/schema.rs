use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::grub::{ChainEntry, GrubSettings, KernelEntry};
use crate::paths;
use crate::storage::DeviceTree;

/// Everything one bootloader run needs to know about the target system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Where the target system is mounted
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    pub storage: DeviceTree,

    #[serde(default)]
    pub kernels: Vec<KernelEntry>,

    #[serde(default)]
    pub chains: Vec<ChainEntry>,

    #[serde(default)]
    pub bootloader: GrubSettings,

    /// Entry booted by default; the root device when unset
    #[serde(default)]
    pub default_device: Option<String>,

    /// Install profile name; selected by architecture when unset
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default)]
    pub password: Option<PasswordConfig>,
}

/// Bootloader password as entered by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub value: String,
    /// Value is already an MD5-crypt hash
    #[serde(default)]
    pub crypted: bool,
}

fn default_install_root() -> PathBuf {
    PathBuf::from(paths::MOUNT_TARGET)
}

impl Manifest {
    pub fn default_device(&self) -> &str {
        self.default_device
            .as_deref()
            .unwrap_or(&self.storage.fsset.root)
    }
}
