//! Privilege elevation for packet filter commands
//!
//! fwadm runs as an unprivileged user and only elevates `iptables` and
//! `ip6tables`. Connection listings (`ss`, `netstat`) run unprivileged.
//!
//! # Elevation Strategy
//!
//! - Already root: run the program directly
//! - Preferred: `run0` when available (systemd v256+, no SUID)
//! - Terminal: `sudo`
//! - No terminal: `pkexec`
//!
//! # Environment Variables
//!
//! - `FWADM_ELEVATION_METHOD`: force `sudo`, `run0` or `pkexec`. Useful with
//!   sudoers NOPASSWD rules, e.g. `FWADM_ELEVATION_METHOD=sudo fwadm --list`.
//! - `FWADM_TEST_NO_ELEVATION`: run programs directly (tests only).
//!
//! # Example
//!
//! ```no_run
//! use fwadm::elevation::create_elevated_iptables_command;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut cmd = create_elevated_iptables_command(&["-S"])?;
//! let output = cmd.output().await?;
//! # Ok(())
//! # }
//! ```

use tokio::process::Command;

pub const ELEVATION_METHOD_ENV: &str = "FWADM_ELEVATION_METHOD";
pub const TEST_NO_ELEVATION_ENV: &str = "FWADM_TEST_NO_ELEVATION";

#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Neither run0, sudo nor pkexec can be used
    #[error("no elevation method available (install sudo or polkit, or run as root)")]
    NoMethodAvailable,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    #[error("{0} not found in PATH, /usr/sbin or /sbin")]
    ProgramNotFound(String),

    #[error("Invalid FWADM_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),
}

/// How a privileged program will be launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ElevationMethod {
    /// Already privileged, or test mode
    Direct,
    Run0,
    Sudo,
    Pkexec,
}

impl ElevationMethod {
    fn wrapper(self) -> Option<&'static str> {
        match self {
            ElevationMethod::Direct => None,
            ElevationMethod::Run0 => Some("run0"),
            ElevationMethod::Sudo => Some("sudo"),
            ElevationMethod::Pkexec => Some("pkexec"),
        }
    }
}

/// Checks if a binary exists in PATH
pub fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
    })
}

/// Resolves the elevation method for this process.
///
/// # Errors
///
/// Returns an error if a forced method is unknown or missing, or if no
/// method is usable at all.
pub fn select_method() -> Result<ElevationMethod, ElevationError> {
    use std::os::fd::AsFd;

    if std::env::var(TEST_NO_ELEVATION_ENV).is_ok() {
        return Ok(ElevationMethod::Direct);
    }

    if nix::unistd::getuid().is_root() {
        return Ok(ElevationMethod::Direct);
    }

    if let Ok(method) = std::env::var(ELEVATION_METHOD_ENV) {
        let method = method.to_lowercase();
        if !method.is_empty() {
            let parsed: ElevationMethod = match method.parse() {
                Ok(m) if m != ElevationMethod::Direct => m,
                _ => return Err(ElevationError::InvalidMethod(method)),
            };
            let binary = parsed.wrapper().unwrap_or_default();
            if !binary_exists(binary) {
                return Err(ElevationError::MethodNotAvailable(binary.to_string()));
            }
            return Ok(parsed);
        }
    }

    if binary_exists("run0") {
        return Ok(ElevationMethod::Run0);
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty && binary_exists("sudo") {
        return Ok(ElevationMethod::Sudo);
    }
    if binary_exists("pkexec") {
        return Ok(ElevationMethod::Pkexec);
    }
    if binary_exists("sudo") {
        return Ok(ElevationMethod::Sudo);
    }

    Err(ElevationError::NoMethodAvailable)
}

/// Only the programs exposed below may be elevated.
fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    let method = select_method()?;
    let mut cmd = match method.wrapper() {
        Some(wrapper) => {
            let mut cmd = Command::new(wrapper);
            cmd.arg(program);
            cmd
        }
        None => Command::new(program),
    };
    cmd.args(args);
    Ok(cmd)
}

/// Creates an elevated `iptables` command.
///
/// Arguments are passed as an argv vector without shell interpretation.
/// Callers must only render validated rule fields into them.
///
/// # Errors
///
/// See [`select_method`].
pub fn create_elevated_iptables_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("iptables", args)
}

/// Creates an elevated `ip6tables` command.
///
/// # Errors
///
/// See [`select_method`].
pub fn create_elevated_ip6tables_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("ip6tables", args)
}

/// Verifies that filter commands can be elevated before any are attempted.
///
/// # Errors
///
/// Returns the reason elevation is impossible, or that `iptables` itself
/// is missing.
pub fn check_elevation_available() -> Result<ElevationMethod, ElevationError> {
    let method = select_method()?;
    if std::env::var(TEST_NO_ELEVATION_ENV).is_ok() {
        return Ok(method);
    }
    if !binary_exists("iptables") && !binary_exists_in_sbin("iptables") {
        return Err(ElevationError::ProgramNotFound("iptables".to_string()));
    }
    Ok(method)
}

// iptables often lives in /usr/sbin, which is not on an unprivileged user's PATH
fn binary_exists_in_sbin(name: &str) -> bool {
    ["/usr/sbin", "/sbin"]
        .iter()
        .any(|dir| std::path::Path::new(dir).join(name).is_file())
}
