/// Default mount target for installation
pub const MOUNT_TARGET: &str = "/mnt";

/// Directory holding grub stage files and configuration
pub const GRUB_DIR: &str = "/boot/grub";

/// Main grub configuration file
pub const GRUB_CONF: &str = "/boot/grub/grub.conf";

/// Conventional menu.lst name, symlinked to grub.conf
pub const MENU_LST: &str = "/boot/grub/menu.lst";

/// /etc alias for the configuration file
pub const ETC_GRUB_CONF: &str = "/etc/grub.conf";

/// Symlink target used for the /etc alias
pub const ETC_GRUB_CONF_LINK: &str = "../boot/grub/grub.conf";

/// BIOS drive to device path map read by the grub shell
pub const DEVICE_MAP: &str = "/boot/grub/device.map";

/// Small state file recording the boot target
pub const SYSCONFIG_GRUB: &str = "/etc/sysconfig/grub";

/// Stage2 image as seen from inside the installed system
pub const STAGE2: &str = "/boot/grub/stage2";

/// Splash image shown when no serial console is in use
pub const SPLASH_IMAGE: &str = "/boot/grub/splash.xpm.gz";

/// LILO configuration moved aside when grub is in use
pub const LILO_CONF: &str = "/etc/lilo.conf";

/// Suffix for rotated files
pub const BACKUP_SUFFIX: &str = ".rpmsave";

/// Console receiving installer program output
pub const DIAGNOSTIC_CONSOLE: &str = "/dev/tty5";

pub const GRUB_INSTALL: &str = "/sbin/grub-install";

pub const GRUB_SHELL: &str = "/sbin/grub";
