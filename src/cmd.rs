use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};

use crate::error::BootError;

const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Seam for everything that leaves the process: external programs and
/// filesystem sync.
pub trait Runner {
    /// Run a program to completion
    fn run(&self, program: &str, args: &[&str]) -> Result<()>;

    /// Run a program with `input` fed over a pipe on stdin
    fn run_with_stdin(&self, program: &str, args: &[&str], input: &[u8]) -> Result<()>;

    /// Run a program with piped stdin and return its trimmed stdout
    fn run_output_with_stdin(&self, program: &str, args: &[&str], input: &[u8]) -> Result<String>;

    /// Flush dirty pages of every mounted filesystem
    fn sync(&self) -> Result<()>;
}

/// Runs real processes, sending their output to `console` when it can be
/// opened.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    pub console: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_console(mut self, console: impl Into<PathBuf>) -> Self {
        self.console = Some(console.into());
        self
    }

    fn console_file(&self) -> Option<File> {
        let path = self.console.as_deref()?;
        match OpenOptions::new().append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::debug!("Cannot open {}: {}", path.display(), e);
                None
            }
        }
    }

    fn command(&self, program: &str, args: &[&str]) -> Result<Command> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(file) = self.console_file() {
            command.stdout(file.try_clone()?).stderr(file);
        }
        Ok(command)
    }
}

impl Runner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        announce(program, args);
        let status = self
            .command(program, args)?
            .status()
            .with_context(|| format!("Failed to run {}", program))?;
        check_status(program, status.success(), status.code())
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], input: &[u8]) -> Result<()> {
        announce(program, args);
        let mut child = self
            .command(program, args)?
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", program))?;

        let written = feed(child.stdin.take(), input);

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {}", program))?;
        check_status(program, status.success(), status.code())?;
        written.with_context(|| format!("Failed to write input to {}", program))
    }

    fn run_output_with_stdin(&self, program: &str, args: &[&str], input: &[u8]) -> Result<String> {
        run_output_with_stdin(program, args, input)
    }

    fn sync(&self) -> Result<()> {
        tracing::debug!("sync");
        nix::unistd::sync();
        Ok(())
    }
}

/// Write `input` and close the pipe. The error is returned for the caller
/// to report after the child's exit status.
fn feed(stdin: Option<ChildStdin>, input: &[u8]) -> std::io::Result<()> {
    match stdin {
        Some(mut stdin) => stdin.write_all(input),
        None => Ok(()),
    }
}

fn announce(program: &str, args: &[&str]) {
    tracing::debug!("{} {}", program, args.join(" "));
    println!("{}> {} {}{}", CYAN, program, args.join(" "), RESET);
}

fn check_status(program: &str, success: bool, code: Option<i32>) -> Result<()> {
    if !success {
        return Err(BootError::InstallerFailed {
            program: program.to_string(),
            code,
        }
        .into());
    }
    Ok(())
}

/// Run a program, feed it `input` and capture stdout. The input never
/// appears on the announced command line.
pub fn run_output_with_stdin<I, S>(program: &str, args: I, input: &[u8]) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().collect();
    let args_str: Vec<_> = args.iter().map(|s| s.as_ref().to_string_lossy()).collect();

    println!("{}> {} {}{}", CYAN, program, args_str.join(" "), RESET);

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    let written = feed(child.stdin.take(), input);

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {}", program))?;
    check_status(program, output.status.success(), output.status.code())?;
    written.with_context(|| format!("Failed to write input to {}", program))?;

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check that a program is available before depending on it
pub fn require(program: &str) -> Result<PathBuf> {
    which::which(program).with_context(|| format!("{} not found in PATH", program))
}

/// Argument list for running `program` chrooted into `root`
pub fn chroot_args<'a>(root: &'a Path, program: &'a str, args: &[&'a str]) -> Vec<String> {
    let mut all = vec![root.to_string_lossy().to_string(), program.to_string()];
    all.extend(args.iter().map(|a| a.to_string()));
    all
}
