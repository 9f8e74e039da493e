use anyhow::{bail, Context, Result};
use std::env;
use tracing_subscriber::EnvFilter;

use mkgrub::cmd::{self, SystemRunner};
use mkgrub::grub::{Grub, GrubSettings};
use mkgrub::manifest::{self, Manifest, ManifestSource};
use mkgrub::profile::{self, InstallProfile};
use mkgrub::util::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Install,
    Config,
    Upgrade,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "install" => write(&args[2..], Mode::Install),
        "config" => write(&args[2..], Mode::Config),
        "upgrade" => write(&args[2..], Mode::Upgrade),
        "plan" => plan(&args[2..]),
        "args" => kickstart_args(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"mkos-grub - Legacy PC bootloader installer

Usage:
    mkos-grub install <manifest>  Write grub.conf and install stage1/stage2
    mkos-grub config <manifest>   Write grub.conf, device.map and state only
    mkos-grub upgrade <manifest>  Re-install on the recorded boot device
    mkos-grub plan <manifest>     Print what install would write and run
    mkos-grub args <manifest>     Print kickstart bootloader arguments
    mkos-grub help                Show this help message

The manifest may be YAML, JSON or TOML; use - to read it from stdin.

Examples:
    mkos-grub plan boot.yml       # Preview grub.conf and grub shell commands
    mkos-grub install boot.yml    # Install onto the target mounted at /mnt
"#
    );
}

fn load(args: &[String]) -> Result<Manifest> {
    let Some(arg) = args.first() else {
        bail!("A manifest is required. Usage: mkos-grub <command> <manifest>");
    };
    manifest::load(&ManifestSource::from_arg(arg))
}

fn select_profile(manifest: &Manifest, platform: &Platform) -> Result<&'static dyn InstallProfile> {
    match &manifest.profile {
        Some(name) => {
            profile::by_name(name).with_context(|| format!("Unknown install profile: {}", name))
        }
        None => profile::base_profile(&platform.arch),
    }
}

/// Settings for this run: manifest values completed by the profile
fn settings(manifest: &Manifest, platform: &Platform) -> Result<GrubSettings> {
    let mut settings = manifest.bootloader.clone();
    select_profile(manifest, platform)?.configure(&mut settings);
    Ok(settings)
}

fn runner(settings: &GrubSettings) -> SystemRunner {
    match &settings.console {
        Some(console) => SystemRunner::new().with_console(console),
        None => SystemRunner::new(),
    }
}

fn write(args: &[String], mode: Mode) -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        eprintln!("Error: mkos-grub must be run as root (use sudo)");
        std::process::exit(1);
    }

    let manifest = load(args)?;
    let platform = Platform::detect();
    if !platform.efi && !platform.is_x86() {
        bail!("Legacy PC boot is not available on {}", platform.arch);
    }

    let mut settings = settings(&manifest, &platform)?;
    match mode {
        Mode::Install => {}
        Mode::Config => settings.just_config = true,
        Mode::Upgrade => settings.upgrade_only = true,
    }
    if settings.use_grub && !settings.just_config && !platform.efi {
        cmd::require("chroot")?;
    }

    let runner = runner(&settings);
    let mut grub = Grub::new(&runner, &manifest.storage, &manifest.install_root, settings)
        .with_platform(platform);
    if let Some(password) = &manifest.password {
        grub.set_password(&password.value, password.crypted)?;
    }

    let report = grub.write(&manifest.kernels, &manifest.chains, manifest.default_device())?;

    for warning in &report.warnings {
        eprintln!("Warning: {}: {}", warning.path.display(), warning.message);
    }
    match (mode, &report.recovered_device) {
        (Mode::Upgrade, Some(device)) => println!("✓ Bootloader updated on {}", device),
        (Mode::Upgrade, None) => println!("No recorded boot device; bootloader left as is"),
        _ if report.config_written => println!("✓ Boot configuration complete"),
        _ => {}
    }

    Ok(())
}

fn plan(args: &[String]) -> Result<()> {
    let manifest = load(args)?;
    let platform = Platform::detect();
    let settings = settings(&manifest, &platform)?;
    let runner = runner(&settings);

    let mut grub = Grub::new(&runner, &manifest.storage, &manifest.install_root, settings)
        .with_platform(platform);
    if let Some(password) = &manifest.password {
        grub.set_password(&password.value, password.crypted)?;
    }

    let plan = grub.plan(&manifest.kernels, &manifest.chains, manifest.default_device())?;

    println!("==> grub.conf ({} mode)", plan.config.target_mode.as_str());
    print!("{}", plan.config.text);
    println!("==> device.map");
    print!("{}", plan.device_map);
    println!("==> grub shell");
    for command in &plan.commands {
        println!("{}", command);
    }

    Ok(())
}

fn kickstart_args(args: &[String]) -> Result<()> {
    let manifest = load(args)?;
    let platform = Platform::detect();
    let settings = settings(&manifest, &platform)?;
    let runner = runner(&settings);

    let mut grub = Grub::new(&runner, &manifest.storage, &manifest.install_root, settings);
    if let Some(password) = &manifest.password {
        grub.set_password(&password.value, password.crypted)?;
    }

    println!("bootloader {}", grub.arg_list()?.join(" "));
    Ok(())
}
