use std::path::Path;

/// Facts about the machine running the install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub arch: String,
    /// Booted through UEFI firmware
    pub efi: bool,
    /// Running as a Xen guest or dom0
    pub xen_host: bool,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            arch: std::env::consts::ARCH.to_string(),
            efi: false,
            xen_host: false,
        }
    }
}

impl Platform {
    /// Probe the running system
    pub fn detect() -> Self {
        Self {
            arch: std::env::consts::ARCH.to_string(),
            efi: Path::new("/sys/firmware/efi").exists(),
            xen_host: Path::new("/proc/xen").exists(),
        }
    }

    /// Whether the legacy PC boot path applies at all
    pub fn is_x86(&self) -> bool {
        is_x86_arch(&self.arch)
    }
}

pub fn is_x86_arch(arch: &str) -> bool {
    arch == "x86_64" || is_ix86(arch)
}

/// Matches the i386..i686 family
pub fn is_ix86(arch: &str) -> bool {
    let bytes = arch.as_bytes();
    bytes.len() == 4 && bytes[0] == b'i' && bytes[2] == b'8' && bytes[3] == b'6'
}

/// Architectures are equal, treating every i?86 as the same
pub fn arches_equal(a: &str, b: &str) -> bool {
    (is_ix86(a) && is_ix86(b)) || a == b
}
