use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use super::device_map::UsedDevices;
use super::devices::physical_devices;
use super::files::in_root;
use super::naming::{DriveMap, PartitionNamer};
use super::{ChainEntry, GrubSettings, KernelEntry, SerialConsole};
use crate::error::BootError;
use crate::paths;
use crate::storage::DeviceTree;

/// Where stage1 is written on the target device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Mbr,
    Partition,
}

impl TargetMode {
    /// Classify the grub target from its name and device path.
    ///
    /// Hardware RAID and device-mapper names (`rd/`, `ida/`, `cciss/`,
    /// `sx8/`, `mapper/`) end in a digit for whole disks too, so only a
    /// `pN` or `pNN` suffix marks a partition there. Anywhere else a
    /// trailing digit means a partition unless the device is an md array.
    pub fn classify(name: &str, path: &str) -> Self {
        let path = path.strip_prefix("/dev/").unwrap_or(path);
        let chars: Vec<char> = name.chars().collect();
        let from_end = |n: usize| chars.len().checked_sub(n).map(|i| chars[i]);
        let ends_in_digit = from_end(1).is_some_and(|c| c.is_ascii_digit());

        let prefixed = ["rd/", "ida/", "cciss/", "sx8/", "mapper/"]
            .iter()
            .any(|prefix| path.starts_with(prefix));

        if prefixed {
            let p_suffix = from_end(2) == Some('p')
                || (from_end(2).is_some_and(|c| c.is_ascii_digit()) && from_end(3) == Some('p'));
            if ends_in_digit && p_suffix {
                return TargetMode::Partition;
            }
        } else if ends_in_digit && !path.starts_with("md") {
            return TargetMode::Partition;
        }

        TargetMode::Mbr
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Mbr => "mbr",
            TargetMode::Partition => "partition",
        }
    }
}

/// Whether kernels live on a dedicated `/boot` filesystem. Every path
/// written into the configuration depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStyle {
    pub boot_partition: bool,
}

impl PathStyle {
    pub fn detect(tree: &DeviceTree) -> Result<Self> {
        Ok(Self {
            boot_partition: tree.mounted_at("/boot")?.is_some(),
        })
    }

    /// Prefix for kernel and initrd paths
    pub fn cf_path(&self) -> &'static str {
        if self.boot_partition {
            "/"
        } else {
            "/boot/"
        }
    }

    /// Directory of stage files as grub sees it
    pub fn grub_path(&self) -> &'static str {
        if self.boot_partition {
            "/grub"
        } else {
            paths::GRUB_DIR
        }
    }

    /// Mounted tree that must be flushed before grub reads it
    pub fn sync_tree(&self) -> &'static str {
        if self.boot_partition {
            "/boot"
        } else {
            "/"
        }
    }

    /// Device holding the kernels: the `/boot` filesystem or the root one
    pub fn boot_carrier(&self, tree: &DeviceTree) -> Result<String> {
        match tree.mounted_at("/boot")? {
            Some(device) => Ok(device.name.clone()),
            None => Ok(tree.fsset.root.clone()),
        }
    }
}

/// Leading digits of the serial options, or 9600
pub fn serial_speed(options: &str) -> &str {
    let end = options
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(options.len());
    if end == 0 {
        "9600"
    } else {
        &options[..end]
    }
}

/// Zero-based serial unit, the last character of the device name
pub fn serial_unit(device: &str) -> Option<char> {
    device.chars().last()
}

/// Serial settings in the hypervisor's `comN=` vocabulary
pub fn hypervisor_serial(serial: Option<&SerialConsole>) -> Option<String> {
    let serial = serial?;
    let port = match serial.device.as_str() {
        "ttyS0" => "com1",
        "ttyS1" => "com2",
        "ttyS2" => "com3",
        "ttyS3" => "com4",
        _ => return None,
    };
    if serial.options.is_empty() {
        return None;
    }
    Some(format!("{}={}", port, serial.options))
}

/// Everything the generator reads. Nothing here is mutated.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub tree: &'a DeviceTree,
    pub drives: &'a DriveMap,
    pub settings: &'a GrubSettings,
    pub kernels: &'a [KernelEntry],
    pub chains: &'a [ChainEntry],
    pub default_device: &'a str,
    pub install_root: &'a Path,
    /// Running under a Xen hypervisor (`/proc/xen` exists)
    pub xen_host: bool,
}

#[derive(Debug, Clone)]
pub struct RenderedConfig {
    pub text: String,
    pub target_mode: TargetMode,
    pub style: PathStyle,
    /// Physical devices of the boot carrier
    pub boot_devices: Vec<String>,
    pub used: UsedDevices,
}

fn is_hypervisor_kernel(version: &str, xen_host: bool) -> bool {
    version.ends_with("xen0") || (version.ends_with("xen") && !xen_host)
}

pub fn render(ctx: &RenderContext) -> Result<RenderedConfig> {
    let tree = ctx.tree;
    let settings = ctx.settings;
    let namer = PartitionNamer::new(tree, ctx.drives);
    let root = tree.root_device()?;

    let target = tree.get(&settings.target)?;
    let target_mode = TargetMode::classify(&target.name, &target.path);

    let style = PathStyle::detect(tree)?;
    let cf_path = style.cf_path();
    let carrier = style.boot_carrier(tree)?;
    let boot_devices = physical_devices(tree, &carrier)?;
    let primary = boot_devices
        .first()
        .ok_or_else(|| BootError::NoPhysicalDevice(carrier.clone()))?;
    let boot_part = namer.name(primary)?;

    let mut out = String::new();
    out.push_str("# grub.conf generated by mkOS installer\n");
    out.push_str("#\n");
    out.push_str("# Note that you do not have to rerun grub after making changes to this file\n");
    if style.boot_partition {
        out.push_str("# NOTICE:  You have a /boot partition.  This means that\n");
        out.push_str("#          all kernel and initrd paths are relative to /boot/, eg.\n");
    } else {
        out.push_str("# NOTICE:  You do not have a /boot partition.  This means that\n");
        out.push_str("#          all kernel and initrd paths are relative to /, eg.\n");
    }
    writeln!(out, "#          root {}", boot_part)?;
    writeln!(
        out,
        "#          kernel {}vmlinuz-version ro root={}",
        cf_path, root.path
    )?;
    writeln!(out, "#          initrd {}initrd-version.img", cf_path)?;
    writeln!(out, "#boot=/dev/{}", settings.target)?;

    // grub indexes entries by position; chain entries follow all kernels
    let default = if ctx.default_device == root.name {
        0
    } else {
        ctx.kernels.len()
    };
    writeln!(out, "default={}", default)?;
    writeln!(out, "timeout={}", settings.timeout.unwrap_or(0))?;

    let mut used = UsedDevices::new();

    if let Some(serial) = &settings.serial {
        let unit = serial_unit(&serial.device).unwrap_or('0');
        writeln!(
            out,
            "serial --unit={} --speed={}",
            unit,
            serial_speed(&serial.options)
        )?;
        let terminal_timeout = settings.timeout.filter(|t| *t != 0).unwrap_or(5);
        writeln!(out, "terminal --timeout={} serial console", terminal_timeout)?;
    } else if in_root(ctx.install_root, paths::SPLASH_IMAGE).exists() {
        writeln!(out, "splashimage={}{}grub/splash.xpm.gz", boot_part, cf_path)?;
        out.push_str("hiddenmenu\n");
    }

    used.mark_all(physical_devices(tree, &settings.target)?);

    if let Some(password) = &settings.password {
        writeln!(out, "password --md5 {}", password)?;
    }

    let args = settings.args.join(" ");
    let realroot = format!(" root={}", root.fstab_spec());

    for kernel in ctx.kernels {
        let version = &kernel.version;
        let kernel_file = format!("{}vmlinuz-{}", cf_path, version);
        let has_initrd = in_root(ctx.install_root, &format!("/boot/initrd-{}.img", version)).exists();

        writeln!(out, "title {} ({})", kernel.long_label, version)?;
        writeln!(out, "\troot {}", boot_part)?;

        let (loader, initrd_keyword) = if is_hypervisor_kernel(version, ctx.xen_host) {
            let base = if version.ends_with("xen0") {
                version.replace("xen0", "")
            } else {
                version.replace("xen", "")
            };
            let mut hypervisor = format!("{}xen.gz-{}", cf_path, base);
            if let Some(hvs) = hypervisor_serial(settings.serial.as_ref()) {
                hypervisor.push(' ');
                hypervisor.push_str(&hvs);
            }
            writeln!(out, "\tkernel {}", hypervisor)?;
            ("module", "module")
        } else {
            ("kernel", "initrd")
        };

        write!(out, "\t{} {} ro{}", loader, kernel_file, realroot)?;
        if !args.is_empty() {
            write!(out, " {}", args)?;
        }
        out.push('\n');

        if has_initrd {
            writeln!(out, "\t{} {}initrd-{}.img", initrd_keyword, cf_path, version)?;
        }
    }

    for chain in ctx.chains {
        if chain.long_label.is_empty() {
            continue;
        }
        writeln!(out, "title {}", chain.long_label)?;
        writeln!(out, "\trootnoverify {}", namer.name(&chain.device)?)?;
        out.push_str("\tchainloader +1\n");
        used.mark(&chain.device);
    }

    used.mark_all(physical_devices(tree, &root.name)?);
    used.mark_all(&boot_devices);

    Ok(RenderedConfig {
        text: out,
        target_mode,
        style,
        boot_devices,
        used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeviceKind, StorageDevice};
    use std::fs;

    fn single_disk() -> DeviceTree {
        DeviceTree::new(
            vec![
                StorageDevice::disk("sda"),
                StorageDevice::partition("sda1", "sda", 1),
                StorageDevice::partition("sda2", "sda", 2),
            ],
            "sda2",
        )
    }

    fn settings(target: &str) -> GrubSettings {
        GrubSettings {
            target: target.into(),
            ..GrubSettings::default()
        }
    }

    fn fedora() -> Vec<KernelEntry> {
        vec![KernelEntry::new("linux", "Fedora", "5.1.0")]
    }

    fn render_with(
        tree: &DeviceTree,
        settings: &GrubSettings,
        kernels: &[KernelEntry],
        chains: &[ChainEntry],
        default_device: &str,
        root: &Path,
    ) -> RenderedConfig {
        let drives = DriveMap::from_tree(tree);
        render(&RenderContext {
            tree,
            drives: &drives,
            settings,
            kernels,
            chains,
            default_device,
            install_root: root,
            xen_host: false,
        })
        .unwrap()
    }

    #[test]
    fn classify_plain_disk_is_mbr() {
        assert_eq!(TargetMode::classify("sda", "/dev/sda"), TargetMode::Mbr);
    }

    #[test]
    fn classify_plain_partition() {
        assert_eq!(TargetMode::classify("sda1", "/dev/sda1"), TargetMode::Partition);
    }

    #[test]
    fn classify_md_array_is_mbr() {
        assert_eq!(TargetMode::classify("md0", "/dev/md0"), TargetMode::Mbr);
    }

    #[test]
    fn classify_mapper_partition_suffix() {
        assert_eq!(
            TargetMode::classify("mapper/isw_raid0p1", "/dev/mapper/isw_raid0p1"),
            TargetMode::Partition
        );
        assert_eq!(
            TargetMode::classify("mapper/isw_raid0p12", "/dev/mapper/isw_raid0p12"),
            TargetMode::Partition
        );
    }

    #[test]
    fn classify_prefixed_whole_disks_are_mbr() {
        for (name, path) in [
            ("cciss/c0d0", "/dev/cciss/c0d0"),
            ("rd/c0d0", "/dev/rd/c0d0"),
            ("ida/c0d0", "/dev/ida/c0d0"),
            ("sx8/0", "/dev/sx8/0"),
            ("mapper/isw_raid0", "/dev/mapper/isw_raid0"),
        ] {
            assert_eq!(TargetMode::classify(name, path), TargetMode::Mbr, "{}", name);
        }
    }

    #[test]
    fn classify_prefixed_partitions() {
        assert_eq!(
            TargetMode::classify("cciss/c0d0p1", "/dev/cciss/c0d0p1"),
            TargetMode::Partition
        );
        assert_eq!(TargetMode::classify("sx8/0p1", "/dev/sx8/0p1"), TargetMode::Partition);
        assert_eq!(TargetMode::classify("rd/c0d0p10", "/dev/rd/c0d0p10"), TargetMode::Partition);
    }

    #[test]
    fn classify_short_names_do_not_panic() {
        assert_eq!(TargetMode::classify("1", "/dev/mapper/1"), TargetMode::Mbr);
        assert_eq!(TargetMode::classify("", "/dev/"), TargetMode::Mbr);
    }

    #[test]
    fn grub_path_follows_boot_partition() {
        let root_only = PathStyle { boot_partition: false };
        assert_eq!(root_only.grub_path(), paths::GRUB_DIR);
        assert_eq!(root_only.cf_path(), "/boot/");
        assert_eq!(PathStyle { boot_partition: true }.grub_path(), "/grub");
    }

    #[test]
    fn serial_speed_parses_leading_digits() {
        assert_eq!(serial_speed("115200n8"), "115200");
        assert_eq!(serial_speed("n8"), "9600");
        assert_eq!(serial_speed(""), "9600");
        assert_eq!(serial_speed("38400"), "38400");
    }

    #[test]
    fn serial_unit_is_last_character() {
        assert_eq!(serial_unit("ttyS1"), Some('1'));
    }

    #[test]
    fn hypervisor_serial_translation() {
        let serial = SerialConsole::new("ttyS1", "115200n8");
        assert_eq!(hypervisor_serial(Some(&serial)).as_deref(), Some("com2=115200n8"));
        assert_eq!(hypervisor_serial(Some(&SerialConsole::new("ttyS1", ""))), None);
        assert_eq!(hypervisor_serial(Some(&SerialConsole::new("ttyUSB0", "9600"))), None);
        assert_eq!(hypervisor_serial(None), None);
    }

    #[test]
    fn single_kernel_single_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tree = single_disk();
        let out = render_with(&tree, &settings("sda"), &fedora(), &[], "sda2", dir.path());

        assert!(out.text.contains("default=0\n"));
        assert!(out.text.contains("timeout=0\n"));
        assert_eq!(out.text.matches("title ").count(), 1);
        assert!(out.text.contains("title Fedora (5.1.0)\n"));
        assert!(out.text.contains("\troot (hd0,1)\n"));
        assert!(out.text.contains("\tkernel /boot/vmlinuz-5.1.0 ro root=/dev/sda2\n"));
        assert!(out.text.contains("#boot=/dev/sda\n"));
        assert!(!out.text.contains("initrd /boot/initrd-5.1.0.img\n"));
        assert_eq!(out.target_mode, TargetMode::Mbr);
        assert_eq!(out.boot_devices, vec!["sda2"]);
        assert_eq!(out.used.disks(&tree).unwrap(), vec!["sda"]);
    }

    #[test]
    fn boot_partition_changes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tree = single_disk().with_mount("/boot", "sda1");
        let out = render_with(&tree, &settings("sda"), &fedora(), &[], "sda2", dir.path());

        assert!(out.text.contains("You have a /boot partition"));
        assert!(out.text.contains("\troot (hd0,0)\n"));
        assert!(out.text.contains("\tkernel /vmlinuz-5.1.0 ro root=/dev/sda2\n"));
        assert_eq!(out.style.grub_path(), "/grub");
        assert_eq!(out.boot_devices, vec!["sda1"]);
    }

    #[test]
    fn initrd_line_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot")).unwrap();
        fs::write(dir.path().join("boot/initrd-5.1.0.img"), b"").unwrap();

        let out = render_with(&single_disk(), &settings("sda"), &fedora(), &[], "sda2", dir.path());
        assert!(out.text.contains("\tinitrd /boot/initrd-5.1.0.img\n"));
    }

    #[test]
    fn default_points_past_kernels_for_chain_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = single_disk();
        tree.devices.push(StorageDevice::partition("sda3", "sda", 3));
        let kernels = vec![
            KernelEntry::new("linux", "Fedora", "5.1.0"),
            KernelEntry::new("linux-old", "Fedora", "5.0.0"),
        ];
        let chains = vec![ChainEntry::new("other", "Other OS", "sda3")];
        let out = render_with(&tree, &settings("sda"), &kernels, &chains, "sda3", dir.path());

        assert!(out.text.contains("default=2\n"));
        assert!(out.text.contains("title Other OS\n\trootnoverify (hd0,2)\n\tchainloader +1\n"));
    }

    #[test]
    fn chain_without_long_label_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = single_disk();
        tree.devices.push(StorageDevice::disk("sdb"));
        tree.devices.push(StorageDevice::partition("sdb1", "sdb", 1));
        let chains = vec![ChainEntry::new("dos", "", "sdb1")];
        let out = render_with(&tree, &settings("sda"), &fedora(), &chains, "sda2", dir.path());

        assert!(!out.text.contains("rootnoverify"));
        assert!(!out.text.contains("chainloader"));
        assert_eq!(out.used.disks(&tree).unwrap(), vec!["sda"]);
    }

    #[test]
    fn serial_console_directives() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/splash.xpm.gz"), b"").unwrap();

        let mut settings = settings("sda");
        settings.serial = Some(SerialConsole::new("ttyS1", "115200n8"));
        let out = render_with(&single_disk(), &settings, &fedora(), &[], "sda2", dir.path());

        assert!(out.text.contains("serial --unit=1 --speed=115200\n"));
        assert!(out.text.contains("terminal --timeout=5 serial console\n"));
        assert!(!out.text.contains("splashimage"));
    }

    #[test]
    fn splash_without_serial() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/splash.xpm.gz"), b"").unwrap();

        let out = render_with(&single_disk(), &settings("sda"), &fedora(), &[], "sda2", dir.path());
        assert!(out.text.contains("splashimage=(hd0,1)/boot/grub/splash.xpm.gz\nhiddenmenu\n"));
    }

    #[test]
    fn password_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings("sda");
        settings.password = Some("$1$abcdefgh$xyz".into());
        settings.args = vec!["rhgb".into(), "quiet".into()];
        settings.timeout = Some(10);
        let out = render_with(&single_disk(), &settings, &fedora(), &[], "sda2", dir.path());

        assert!(out.text.contains("timeout=10\n"));
        assert!(out.text.contains("password --md5 $1$abcdefgh$xyz\n"));
        assert!(out.text.contains("ro root=/dev/sda2 rhgb quiet\n"));
    }

    #[test]
    fn hypervisor_kernel_stanza() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot")).unwrap();
        fs::write(dir.path().join("boot/initrd-2.6.18-8.el5xen.img"), b"").unwrap();

        let mut settings = settings("sda");
        settings.serial = Some(SerialConsole::new("ttyS0", "115200n8"));
        let kernels = vec![KernelEntry::new("linux", "Server", "2.6.18-8.el5xen")];
        let out = render_with(&single_disk(), &settings, &kernels, &[], "sda2", dir.path());

        assert!(out
            .text
            .contains("\tkernel /boot/xen.gz-2.6.18-8.el5 com1=115200n8\n"));
        assert!(out
            .text
            .contains("\tmodule /boot/vmlinuz-2.6.18-8.el5xen ro root=/dev/sda2\n"));
        assert!(out
            .text
            .contains("\tmodule /boot/initrd-2.6.18-8.el5xen.img\n"));
        assert!(!out.text.contains("\tinitrd"));
    }

    #[test]
    fn xen_kernel_on_xen_host_is_normal() {
        let dir = tempfile::tempdir().unwrap();
        let tree = single_disk();
        let drives = DriveMap::from_tree(&tree);
        let settings = settings("sda");
        let kernels = vec![KernelEntry::new("linux", "Guest", "2.6.18xen")];
        let out = render(&RenderContext {
            tree: &tree,
            drives: &drives,
            settings: &settings,
            kernels: &kernels,
            chains: &[],
            default_device: "sda2",
            install_root: dir.path(),
            xen_host: true,
        })
        .unwrap();
        assert!(out.text.contains("\tkernel /boot/vmlinuz-2.6.18xen ro root=/dev/sda2\n"));
        assert!(!out.text.contains("xen.gz"));
    }

    #[test]
    fn root_uses_fstab_spec() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = single_disk();
        tree.devices[2] = StorageDevice::partition("sda2", "sda", 2).with_fstab_spec("UUID=42");
        let out = render_with(&tree, &settings("sda"), &fedora(), &[], "sda2", dir.path());
        assert!(out.text.contains("ro root=UUID=42\n"));
        assert!(out.text.contains("#          kernel /boot/vmlinuz-version ro root=/dev/sda2\n"));
    }

    #[test]
    fn mirrored_boot_marks_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DeviceTree::new(
            vec![
                StorageDevice::disk("sda"),
                StorageDevice::disk("sdb"),
                StorageDevice::partition("sda1", "sda", 1),
                StorageDevice::partition("sdb1", "sdb", 1),
                StorageDevice::raid("md0", 1, &["sdb1", "sda1"]),
            ],
            "md0",
        );
        let out = render_with(&tree, &settings("md0"), &fedora(), &[], "md0", dir.path());
        assert_eq!(out.boot_devices, vec!["sda1", "sdb1"]);
        assert_eq!(out.used.disks(&tree).unwrap(), vec!["sda", "sdb"]);
        assert_eq!(out.target_mode, TargetMode::Mbr);
    }

    #[test]
    fn lvm_root_without_boot_partition_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DeviceTree::new(
            vec![
                StorageDevice::disk("sda"),
                StorageDevice::disk("vg-root")
                    .with_path("/dev/mapper/vg-root")
                    .with_kind(DeviceKind::LogicalVolume),
            ],
            "vg-root",
        );
        let drives = DriveMap::from_tree(&tree);
        let settings = settings("sda");
        let kernels = fedora();
        let err = render(&RenderContext {
            tree: &tree,
            drives: &drives,
            settings: &settings,
            kernels: &kernels,
            chains: &[],
            default_device: "vg-root",
            install_root: dir.path(),
            xen_host: false,
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootError>(),
            Some(BootError::NoPhysicalDevice(_))
        ));
    }
}
