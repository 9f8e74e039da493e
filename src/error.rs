use thiserror::Error;

/// Errors raised while planning or installing the bootloader.
///
/// Devices that cannot carry boot code (LVM, encrypted volumes) are not
/// errors: they resolve to an empty device list and callers decide.
#[derive(Debug, Error)]
pub enum BootError {
    /// Full install requested with an empty kernel list
    #[error("no kernel available to boot")]
    NoKernel,

    #[error("unknown storage device: {0}")]
    UnknownDevice(String),

    /// The device resolved to zero physical disks
    #[error("{0} does not reside on any physical disk")]
    NoPhysicalDevice(String),

    #[error("disk {0} is not in the BIOS drive list")]
    DriveNotMapped(String),

    #[error("{program} failed with exit code {code:?}")]
    InstallerFailed { program: String, code: Option<i32> },

    #[error("unable to find an install profile to use")]
    NoProfile,

    #[error("EFI systems are handled by a separate installer")]
    EfiUnsupported,
}
