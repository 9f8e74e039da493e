pub mod config;
pub mod device_map;
pub mod devices;
pub mod files;
pub mod install;
pub mod naming;
pub mod password;
pub mod upgrade;

pub use config::{PathStyle, RenderContext, RenderedConfig, TargetMode};
pub use devices::physical_devices;
pub use files::SideEffectWarning;
pub use naming::{DriveMap, PartitionNamer};
pub use password::Password;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cmd::Runner;
use crate::error::BootError;
use crate::paths;
use crate::storage::DeviceTree;
use crate::util::Platform;
use files::{in_root, replace_symlink, write_rotated, write_sysconfig, DEFAULT_CONFIG_MODE};
use install::{build_commands, Executor, PlanInput};

/// An installed kernel. The version determines the vmlinuz and initrd names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelEntry {
    pub label: String,
    pub long_label: String,
    pub version: String,
}

impl KernelEntry {
    pub fn new(label: &str, long_label: &str, version: &str) -> Self {
        Self {
            label: label.into(),
            long_label: long_label.into(),
            version: version.into(),
        }
    }
}

/// A foreign OS booted through its own boot sector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub label: String,
    #[serde(default)]
    pub long_label: String,
    pub device: String,
}

impl ChainEntry {
    pub fn new(label: &str, long_label: &str, device: &str) -> Self {
        Self {
            label: label.into(),
            long_label: long_label.into(),
            device: device.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConsole {
    /// Kernel device name, e.g. `ttyS0`
    pub device: String,
    /// Speed and framing, e.g. `115200n8`
    #[serde(default)]
    pub options: String,
}

impl SerialConsole {
    pub fn new(device: &str, options: &str) -> Self {
        Self {
            device: device.into(),
            options: options.into(),
        }
    }
}

/// Bootloader settings for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrubSettings {
    /// Device receiving stage1 (`sda`, `sda1`, `md0`)
    pub target: String,
    pub timeout: Option<u32>,
    pub serial: Option<SerialConsole>,
    /// MD5-crypt hash for `password --md5`
    pub password: Option<String>,
    pub force_lba: bool,
    /// Extra kernel command line arguments
    pub args: Vec<String>,
    /// When false only grub.conf and friends are written
    pub use_grub: bool,
    pub upgrade_only: bool,
    /// Write configuration files but do not run the installer
    pub just_config: bool,
    /// Where installer program output goes
    pub console: Option<PathBuf>,
}

impl Default for GrubSettings {
    fn default() -> Self {
        Self {
            target: String::new(),
            timeout: None,
            serial: None,
            password: None,
            force_lba: false,
            args: Vec::new(),
            use_grub: true,
            upgrade_only: false,
            just_config: false,
            console: Some(PathBuf::from(paths::DIAGNOSTIC_CONSOLE)),
        }
    }
}

/// Installs the bootloader on EFI machines, where none of the legacy
/// two-stage logic applies.
pub trait EfiDelegate {
    fn install(
        &self,
        install_root: &Path,
        kernels: &[KernelEntry],
        chains: &[ChainEntry],
        default_device: &str,
    ) -> Result<()>;
}

/// Everything a full install would write and run, computed without side
/// effects.
#[derive(Debug, Clone)]
pub struct Plan {
    pub config: RenderedConfig,
    pub device_map: String,
    pub commands: Vec<String>,
}

/// What a call to [`Grub::write`] did
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub config_written: bool,
    /// Commands fed to the grub shell
    pub commands: Vec<String>,
    /// Boot device recovered during an upgrade
    pub recovered_device: Option<String>,
    pub warnings: Vec<SideEffectWarning>,
}

pub struct Grub<'a> {
    pub runner: &'a dyn Runner,
    pub tree: &'a DeviceTree,
    pub install_root: PathBuf,
    pub settings: GrubSettings,
    pub platform: Platform,
    pub efi: Option<&'a dyn EfiDelegate>,
    /// Plain text password, when it was entered unhashed
    pub password_plain: Option<String>,
}

impl<'a> Grub<'a> {
    pub fn new(
        runner: &'a dyn Runner,
        tree: &'a DeviceTree,
        install_root: impl Into<PathBuf>,
        settings: GrubSettings,
    ) -> Self {
        Self {
            runner,
            tree,
            install_root: install_root.into(),
            settings,
            platform: Platform::default(),
            efi: None,
            password_plain: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_efi(mut self, efi: &'a dyn EfiDelegate) -> Self {
        self.efi = Some(efi);
        self
    }

    pub fn set_password(&mut self, value: &str, is_crypted: bool) -> Result<()> {
        let password = Password::set(self.runner, value, is_crypted, self.settings.use_grub)?;
        self.settings.password = password.hash;
        self.password_plain = password.plain;
        Ok(())
    }

    /// Settings a run with `chains` renders from: the timeout defaults to
    /// 5 seconds when unset and there is something to choose between.
    pub fn effective_settings(&self, chains: &[ChainEntry]) -> GrubSettings {
        let mut settings = self.settings.clone();
        if settings.timeout.is_none() && !chains.is_empty() {
            settings.timeout = Some(5);
        }
        settings
    }

    /// Render the configuration, device map and install commands
    pub fn plan(
        &self,
        kernels: &[KernelEntry],
        chains: &[ChainEntry],
        default_device: &str,
    ) -> Result<Plan> {
        let settings = self.effective_settings(chains);
        let drives = DriveMap::from_tree(self.tree);
        let config = config::render(&RenderContext {
            tree: self.tree,
            drives: &drives,
            settings: &settings,
            kernels,
            chains,
            default_device,
            install_root: &self.install_root,
            xen_host: self.platform.xen_host,
        })?;

        let device_map = config.used.render(self.tree, &drives)?;
        let commands = build_commands(&PlanInput {
            namer: PartitionNamer::new(self.tree, &drives),
            boot_devices: &config.boot_devices,
            target: &settings.target,
            mode: config.target_mode,
            style: config.style,
            force_lba: settings.force_lba,
        })?;

        Ok(Plan {
            config,
            device_map,
            commands,
        })
    }

    /// Write the boot configuration and install the bootloader.
    ///
    /// An upgrade run only re-installs on the recorded boot device. A full
    /// run rejects an empty kernel list before touching any file.
    pub fn write(
        &mut self,
        kernels: &[KernelEntry],
        chains: &[ChainEntry],
        default_device: &str,
    ) -> Result<WriteReport> {
        self.settings = self.effective_settings(chains);

        if self.platform.efi {
            let efi = self.efi.ok_or(BootError::EfiUnsupported)?;
            efi.install(&self.install_root, kernels, chains, default_device)?;
            return Ok(WriteReport::default());
        }

        if self.settings.upgrade_only {
            let mut report = WriteReport::default();
            if self.settings.use_grub && !self.settings.just_config {
                report.recovered_device = upgrade::upgrade(
                    self.runner,
                    self.tree,
                    &self.install_root,
                    self.settings.force_lba,
                )?;
            }
            return Ok(report);
        }

        if kernels.is_empty() {
            return Err(BootError::NoKernel.into());
        }

        let just_config = self.settings.just_config || !self.settings.use_grub;
        let report = self.write_config(kernels, chains, default_device, just_config)?;

        if self.settings.use_grub {
            let lilo = in_root(&self.install_root, paths::LILO_CONF);
            if lilo.exists() {
                let aside = in_root(&self.install_root, "/etc/lilo.conf.mkos");
                fs::rename(&lilo, &aside)
                    .with_context(|| format!("Failed to move {} aside", lilo.display()))?;
            }
        }

        Ok(report)
    }

    fn write_config(
        &self,
        kernels: &[KernelEntry],
        chains: &[ChainEntry],
        default_device: &str,
        just_config: bool,
    ) -> Result<WriteReport> {
        let root = &self.install_root;
        let plan = self.plan(kernels, chains, default_device)?;

        let conf = in_root(root, paths::GRUB_CONF);
        write_rotated(&conf, &plan.config.text, DEFAULT_CONFIG_MODE)?;
        println!("✓ Wrote {}", paths::GRUB_CONF);

        let mut warnings = Vec::new();
        warnings.extend(replace_symlink(&in_root(root, paths::MENU_LST), "./grub.conf"));
        warnings.extend(replace_symlink(
            &in_root(root, paths::ETC_GRUB_CONF),
            paths::ETC_GRUB_CONF_LINK,
        ));

        let drives = DriveMap::from_tree(self.tree);
        plan.config.used.write(root, self.tree, &drives)?;
        write_sysconfig(root, &self.settings.target, self.settings.force_lba)?;

        let mut report = WriteReport {
            config_written: true,
            commands: Vec::new(),
            recovered_device: None,
            warnings,
        };

        if !just_config {
            Executor::new(self.runner, self.tree, root).run(plan.config.style, &plan.commands)?;
            report.commands = plan.commands;
        }

        Ok(report)
    }

    /// Kickstart `bootloader` arguments reproducing this configuration
    pub fn arg_list(&self) -> Result<Vec<String>> {
        let mut args = Vec::new();

        if self.settings.target.is_empty() {
            args.push("--location=none".to_string());
            return Ok(args);
        }

        let target = self.tree.get(&self.settings.target)?;
        let mode = TargetMode::classify(&target.name, &target.path);
        args.push(format!("--location={}", mode.as_str()));
        args.push(format!(
            "--driveorder={}",
            DriveMap::from_tree(self.tree).drives().join(",")
        ));
        if !self.settings.args.is_empty() {
            args.push(format!("--append=\"{}\"", self.settings.args.join(" ")));
        }

        if self.settings.force_lba {
            args.push("--lba32".to_string());
        }
        if let Some(password) = &self.settings.password {
            args.push(format!("--md5pass={}", password));
        }

        Ok(args)
    }
}
