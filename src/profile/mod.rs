//! Install profiles: named bundles of product defaults.
//!
//! Profiles are registered statically. Selection filters by architecture
//! and visibility, then orders by priority and name.

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::error::BootError;
use crate::grub::GrubSettings;
use crate::util::arches_equal;

/// Outcome of each upgrade compatibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeChecks {
    pub product: bool,
    pub version: bool,
    pub arch: bool,
}

impl UpgradeChecks {
    pub fn all(&self) -> bool {
        self.product && self.version && self.arch
    }
}

/// Trait for product install profiles
pub trait InstallProfile: Send + Sync {
    fn name(&self) -> &str;

    /// Higher wins when several profiles are available
    fn sort_priority(&self) -> i32 {
        0
    }

    /// Restrict the profile to one architecture
    fn arch(&self) -> Option<&str> {
        None
    }

    fn hidden(&self) -> bool {
        false
    }

    fn bootloader_timeout_default(&self) -> Option<u32> {
        None
    }

    fn bootloader_extra_args(&self) -> &[&str] {
        &[]
    }

    /// Apply product defaults. An explicitly set timeout is kept.
    fn configure(&self, settings: &mut GrubSettings) {
        if settings.timeout.is_none() {
            settings.timeout = self.bootloader_timeout_default();
        }
        for arg in self.bootloader_extra_args() {
            if !settings.args.iter().any(|a| a == arg) {
                settings.args.push(arg.to_string());
            }
        }
    }

    fn product_matches(&self, _product: &str) -> bool {
        false
    }

    fn version_matches(&self, _version: &str) -> bool {
        false
    }

    /// Whether an installed system can be upgraded by this profile
    fn product_upgradable(
        &self,
        arch: &str,
        product_arch: &str,
        old_product: &str,
        old_version: &str,
    ) -> UpgradeChecks {
        UpgradeChecks {
            product: self.product_matches(old_product),
            version: self.version_matches(old_version),
            arch: arches_equal(arch, product_arch),
        }
    }
}

/// Fallback profile carrying no product defaults
#[derive(Debug, Default)]
pub struct Base;

impl InstallProfile for Base {
    fn name(&self) -> &str {
        "base"
    }

    fn hidden(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct Mkos;

impl InstallProfile for Mkos {
    fn name(&self) -> &str {
        "mkOS"
    }

    fn sort_priority(&self) -> i32 {
        10000
    }

    fn bootloader_timeout_default(&self) -> Option<u32> {
        Some(5)
    }

    fn bootloader_extra_args(&self) -> &[&str] {
        &["quiet"]
    }

    fn product_matches(&self, product: &str) -> bool {
        product.starts_with("mkOS")
    }

    fn version_matches(&self, version: &str) -> bool {
        version
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
            .is_some_and(|major| major == 0)
    }
}

/// mkOS on 32-bit PCs, where a serial console is the common case
#[derive(Debug, Default)]
pub struct MkosLegacy;

impl InstallProfile for MkosLegacy {
    fn name(&self) -> &str {
        "mkOS legacy"
    }

    fn sort_priority(&self) -> i32 {
        20000
    }

    fn arch(&self) -> Option<&str> {
        Some("i686")
    }

    fn bootloader_timeout_default(&self) -> Option<u32> {
        Some(10)
    }

    fn bootloader_extra_args(&self) -> &[&str] {
        &["quiet", "nomodeset"]
    }

    fn product_matches(&self, product: &str) -> bool {
        product.starts_with("mkOS")
    }
}

static PROFILES: Lazy<Vec<Box<dyn InstallProfile>>> =
    Lazy::new(|| vec![Box::new(Base), Box::new(Mkos), Box::new(MkosLegacy)]);

fn visible_on(profile: &dyn InstallProfile, arch: &str) -> bool {
    let arch_hidden = profile.arch().is_some_and(|a| a != arch);
    !profile.hidden() && !arch_hidden
}

/// Profiles usable on `arch`, lowest priority first. Hidden profiles and
/// profiles for another architecture only appear with `show_hidden`.
pub fn available(show_hidden: bool, arch: &str) -> Vec<&'static dyn InstallProfile> {
    let mut profiles: Vec<&'static dyn InstallProfile> = PROFILES
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| show_hidden || visible_on(*p, arch))
        .collect();
    profiles.sort_by(|a, b| {
        a.sort_priority()
            .cmp(&b.sort_priority())
            .then_with(|| a.name().cmp(b.name()))
    });
    profiles
}

/// Pick the profile to install with: the only one there is, otherwise the
/// highest priority, preferring visible profiles.
pub fn base_profile(arch: &str) -> Result<&'static dyn InstallProfile> {
    let all = available(true, arch);
    let visible = available(false, arch);

    let chosen = if visible.len() == 1 {
        visible[0]
    } else if all.len() == 1 {
        all[0]
    } else if let Some(last) = visible.last() {
        *last
    } else if let Some(last) = all.last() {
        *last
    } else {
        return Err(BootError::NoProfile.into());
    };

    tracing::info!("Using install profile {}", chosen.name());
    Ok(chosen)
}

pub fn by_name(name: &str) -> Option<&'static dyn InstallProfile> {
    PROFILES
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.name() == name)
}
