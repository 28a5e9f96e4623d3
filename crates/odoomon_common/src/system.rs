//! OS query adapter.
//!
//! Single narrow interface between the decision logic and the host:
//! file metadata, identity resolution, privileged command execution and
//! systemd unit queries. Keeping privileged execution behind this trait
//! lets tests substitute a fake instead of mocking processes.

use crate::error::MonitorError;
use anyhow::Result;
use nix::unistd::{AccessFlags, Gid, Group, Uid, User};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Unix metadata for one filesystem object.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    /// Permission bits (st_mode & 0o7777)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_dir: bool,
}

/// Result of a privileged command: success plus captured diagnostics.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub detail: String,
}

/// Capabilities the permission and service logic consume from the OS.
pub trait SystemAdapter: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Effective read/write/execute access of the calling process
    fn can_read(&self, path: &Path) -> bool;
    fn can_write(&self, path: &Path) -> bool;
    fn can_execute(&self, path: &Path) -> bool;

    /// Resolve a uid/gid to a name; None when unresolvable
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;

    /// The invoking human user (honors $SUDO_USER)
    fn login_user(&self) -> Option<String>;

    /// Whether `user` belongs to `group`; None when membership cannot be
    /// determined
    fn user_in_group(&self, user: &str, group: &str) -> Option<bool>;

    /// Run an ownership/mode/service-control command with elevated
    /// privilege. Never errors; failure is reported in the outcome.
    fn run_privileged(&self, args: &[&str]) -> CommandOutcome;

    /// Fast liveness probe: the word printed by `systemctl is-active`
    fn unit_active_state(&self, unit: &str) -> Result<String>;

    /// Full `systemctl status` output for finer-grained state parsing
    fn unit_status_output(&self, unit: &str) -> Result<String>;

    /// Unit names currently registered that match a glob pattern
    fn list_units(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Adapter backed by the real host: std::fs, nix and systemctl.
#[derive(Debug, Default)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }

    fn systemctl(args: &[&str]) -> Result<std::process::Output> {
        Command::new("systemctl").args(args).output().map_err(|e| {
            MonitorError::CommandFailed {
                command: format!("systemctl {}", args.join(" ")),
                detail: e.to_string(),
            }
            .into()
        })
    }
}

impl SystemAdapter for HostSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MonitorError::NotFound(path.to_path_buf()),
            _ => MonitorError::Io(e),
        })?;
        Ok(FileStat {
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            is_dir: metadata.is_dir(),
        })
    }

    fn can_read(&self, path: &Path) -> bool {
        nix::unistd::access(path, AccessFlags::R_OK).is_ok()
    }

    fn can_write(&self, path: &Path) -> bool {
        nix::unistd::access(path, AccessFlags::W_OK).is_ok()
    }

    fn can_execute(&self, path: &Path) -> bool {
        nix::unistd::access(path, AccessFlags::X_OK).is_ok()
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        Group::from_gid(Gid::from_raw(gid)).ok().flatten().map(|g| g.name)
    }

    fn login_user(&self) -> Option<String> {
        if let Ok(user) = std::env::var("SUDO_USER") {
            if !user.is_empty() {
                return Some(user);
            }
        }
        User::from_uid(Uid::current()).ok().flatten().map(|u| u.name)
    }

    fn user_in_group(&self, user: &str, group: &str) -> Option<bool> {
        let group_entry = Group::from_name(group).ok().flatten()?;
        if group_entry.mem.iter().any(|m| m == user) {
            return Some(true);
        }
        // Not in the member list; primary group still counts
        let user_entry = User::from_name(user).ok().flatten()?;
        Some(user_entry.gid == group_entry.gid)
    }

    fn run_privileged(&self, args: &[&str]) -> CommandOutcome {
        if args.is_empty() {
            return CommandOutcome {
                success: false,
                detail: "empty command".to_string(),
            };
        }

        let mut command = if Uid::effective().is_root() {
            let mut c = Command::new(args[0]);
            c.args(&args[1..]);
            c
        } else {
            let mut c = Command::new("sudo");
            c.arg("-n").args(args);
            c
        };

        debug!("Running privileged command: {:?}", args);

        match command.output() {
            Ok(output) => {
                let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if !output.status.success() {
                    warn!("Privileged command {:?} failed: {}", args, detail);
                }
                CommandOutcome {
                    success: output.status.success(),
                    detail,
                }
            }
            Err(e) => {
                warn!("Failed to spawn privileged command {:?}: {}", args, e);
                CommandOutcome {
                    success: false,
                    detail: e.to_string(),
                }
            }
        }
    }

    fn unit_active_state(&self, unit: &str) -> Result<String> {
        // is-active exits non-zero for anything but "active"; the state
        // word on stdout is still meaningful
        let output = Self::systemctl(&["is-active", unit])?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if state.is_empty() {
            return Ok("unknown".to_string());
        }
        Ok(state)
    }

    fn unit_status_output(&self, unit: &str) -> Result<String> {
        let output = Self::systemctl(&["status", unit, "--no-pager"])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn list_units(&self, pattern: &str) -> Result<Vec<String>> {
        let output = Self::systemctl(&[
            "list-units",
            pattern,
            "--all",
            "--no-pager",
            "--no-legend",
            "--plain",
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MonitorError::CommandFailed {
                command: format!("systemctl list-units {}", pattern),
                detail: stderr.trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let units = stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(|name| name.to_string())
            .collect();
        Ok(units)
    }
}
