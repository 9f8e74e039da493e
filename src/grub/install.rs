use anyhow::{Context, Result};
use std::path::Path;

use super::config::{PathStyle, TargetMode};
use super::devices::matching_part;
use super::files::in_root;
use super::naming::PartitionNamer;
use crate::cmd::{chroot_args, Runner};
use crate::paths;
use crate::storage::DeviceTree;

/// `install` line writing stage1 to `stage1_target` and pointing it at the
/// stage2 and config under `root_part`.
pub fn install_line(root_part: &str, stage1_target: &str, grub_path: &str, force_lba: bool) -> String {
    let mut args = format!("--stage2={} ", paths::STAGE2);
    if force_lba {
        args.push_str("--force-lba ");
    }
    format!(
        "install {}{}/stage1 d {} {}/stage2 p {}{}/grub.conf",
        args, grub_path, stage1_target, grub_path, root_part, grub_path
    )
}

/// `root` + `install` pair fed to one grub shell invocation
pub fn command_pair(root_part: &str, stage1_target: &str, grub_path: &str, force_lba: bool) -> String {
    format!(
        "root {}\n{}",
        root_part,
        install_line(root_part, stage1_target, grub_path, force_lba)
    )
}

/// Inputs for building the install commands of a full install
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub namer: PartitionNamer<'a>,
    pub boot_devices: &'a [String],
    pub target: &'a str,
    pub mode: TargetMode,
    pub style: PathStyle,
    pub force_lba: bool,
}

/// One command per boot device. Stage1 goes to the target's member on the
/// same disk: its MBR, or the partition itself in partition mode.
pub fn build_commands(input: &PlanInput) -> Result<Vec<String>> {
    let namer = input.namer;
    let mut commands = Vec::with_capacity(input.boot_devices.len());

    for boot_dev in input.boot_devices {
        let gt_part = matching_part(namer.tree, boot_dev, input.target)?;
        let stage1 = match input.mode {
            TargetMode::Mbr => namer.disk_of(&gt_part)?,
            TargetMode::Partition => namer.name(&gt_part)?,
        };
        let boot_part = namer.name(boot_dev)?;
        commands.push(command_pair(
            &boot_part,
            &stage1,
            input.style.grub_path(),
            input.force_lba,
        ));
    }

    Ok(commands)
}

/// Runs install commands through the grub shell inside the installed system.
pub struct Executor<'a> {
    pub runner: &'a dyn Runner,
    pub tree: &'a DeviceTree,
    pub install_root: &'a Path,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn Runner, tree: &'a DeviceTree, install_root: &'a Path) -> Self {
        Self {
            runner,
            tree,
            install_root,
        }
    }

    /// Flush `mountpoint` so grub reads what was just written. XFS keeps
    /// metadata in its log after sync, so it is frozen and thawed as well.
    pub fn sync_tree(&self, mountpoint: &str) -> Result<()> {
        self.runner.sync()?;

        let format = self
            .tree
            .mounted_at(mountpoint)?
            .or(if mountpoint == "/" {
                Some(self.tree.root_device()?)
            } else {
                None
            })
            .and_then(|d| d.format.as_deref());

        if format == Some("xfs") {
            let target = in_root(self.install_root, mountpoint);
            let target = target.to_string_lossy();
            self.runner.run("xfs_freeze", &["-f", &target])?;
            self.runner.run("xfs_freeze", &["-u", &target])?;
        }
        Ok(())
    }

    /// Copy stage files, then feed each command to the grub shell, syncing
    /// before every step.
    pub fn run(&self, style: PathStyle, commands: &[String]) -> Result<()> {
        let tree_path = style.sync_tree();
        self.sync_tree(tree_path)?;

        let copy = chroot_args(self.install_root, paths::GRUB_INSTALL, &["--just-copy"]);
        let copy: Vec<&str> = copy.iter().map(String::as_str).collect();
        self.runner
            .run("chroot", &copy)
            .context("Failed to copy grub stage files")?;

        let device_map = format!("--device-map={}", paths::DEVICE_MAP);
        let shell = chroot_args(
            self.install_root,
            paths::GRUB_SHELL,
            &["--batch", "--no-floppy", &device_map],
        );
        let shell: Vec<&str> = shell.iter().map(String::as_str).collect();

        for command in commands {
            self.sync_tree(tree_path)?;
            tracing::info!("Installing grub: {}", command.replace('\n', "; "));
            self.runner
                .run_with_stdin("chroot", &shell, format!("{}\n", command).as_bytes())
                .context("grub install command failed")?;
        }

        println!("✓ Bootloader installed");
        Ok(())
    }
}
