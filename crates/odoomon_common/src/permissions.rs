//! Addon directory permission auditing and repair.
//!
//! `classify` produces a full access report for one directory without
//! touching anything; `fix` drives the directory tree toward the target
//! posture (dirs 0775, files 0664, owned by the configured service
//! identity) and tallies per-item success. Both are stateless; every call
//! re-reads live filesystem state.

use crate::config::IdentityConfig;
use crate::system::SystemAdapter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Levels of the tree sampled by the consistency scan
const MAX_SCAN_DEPTH: usize = 3;
/// Files sampled per directory level
const FILES_PER_LEVEL: usize = 10;
/// Divergent paths reported before the scan stops
const MAX_INCONSISTENT: usize = 5;

/// Group/other read+write bits compared by the consistency scan
const CONSISTENCY_MASK: u32 = 0o066;

/// Target mode for directories: rwx for owner+group, r-x for others
const DIR_MODE: &str = "775";
/// Target mode for files: no execute bit
const FILE_MODE: &str = "664";

/// Overall verdict for one directory audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    NotFound,
    Ok,
    Warning,
    Error,
}

impl PermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStatus::NotFound => "not_found",
            PermissionStatus::Ok => "ok",
            PermissionStatus::Warning => "warning",
            PermissionStatus::Error => "error",
        }
    }
}

/// Access posture of one addon directory. Built fresh on every audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirPermissionReport {
    pub status: PermissionStatus,

    /// Effective access of the calling process
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,

    /// Raw mode bits for group and others
    pub group_readable: bool,
    pub group_writable: bool,
    pub group_executable: bool,
    pub others_readable: bool,
    pub others_writable: bool,
    pub others_executable: bool,

    /// Whether sampled contained files match the directory's group/other
    /// read+write bits
    pub files_consistent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inconsistent_files: Vec<String>,

    /// Resolved owner/group names (numeric id string when unresolvable)
    pub owner: String,
    pub group: String,
    pub is_owner_match: bool,
    pub is_group_match: bool,

    /// Octal permission bits, e.g. "775"
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DirPermissionReport {
    fn empty(status: PermissionStatus, error: Option<String>) -> Self {
        Self {
            status,
            readable: false,
            writable: false,
            executable: false,
            group_readable: false,
            group_writable: false,
            group_executable: false,
            others_readable: false,
            others_writable: false,
            others_executable: false,
            files_consistent: true,
            inconsistent_files: vec![],
            owner: String::new(),
            group: String::new(),
            is_owner_match: false,
            is_group_match: false,
            mode: String::new(),
            error,
        }
    }
}

/// Outcome of a repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Fixed,
    PartiallyFixed,
    Failed,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Fixed => "fixed",
            FixStatus::PartiallyFixed => "partially_fixed",
            FixStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    /// True iff at least one item was corrected
    pub success: bool,
    pub status: FixStatus,
    pub fixed_count: u32,
    pub failed_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FixOutcome {
    fn nothing_attempted(error: String) -> Self {
        Self {
            success: false,
            status: FixStatus::Failed,
            fixed_count: 0,
            failed_count: 0,
            error: Some(error),
        }
    }
}

/// Audits and repairs addon directory permissions.
pub struct PermissionAuditor {
    system: Arc<dyn SystemAdapter>,
    identity: IdentityConfig,
}

impl PermissionAuditor {
    pub fn new(system: Arc<dyn SystemAdapter>, identity: IdentityConfig) -> Self {
        Self { system, identity }
    }

    /// Classify one directory's access posture. Never errors: a missing
    /// path yields `not_found`, any query failure yields `error`.
    pub fn classify(&self, path: &Path) -> DirPermissionReport {
        if !self.system.exists(path) {
            debug!("Directory does not exist: {}", path.display());
            return DirPermissionReport::empty(
                PermissionStatus::NotFound,
                Some(format!("Directory does not exist: {}", path.display())),
            );
        }

        let stat = match self.system.stat(path) {
            Ok(stat) => stat,
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                return DirPermissionReport::empty(PermissionStatus::Error, Some(e.to_string()));
            }
        };

        let readable = self.system.can_read(path);
        let writable = self.system.can_write(path);
        let executable = self.system.can_execute(path);

        let group_readable = stat.mode & 0o040 != 0;
        let group_writable = stat.mode & 0o020 != 0;
        let group_executable = stat.mode & 0o010 != 0;
        let others_readable = stat.mode & 0o004 != 0;
        let others_writable = stat.mode & 0o002 != 0;
        let others_executable = stat.mode & 0o001 != 0;

        let owner = self
            .system
            .user_name(stat.uid)
            .unwrap_or_else(|| stat.uid.to_string());
        let group = self
            .system
            .group_name(stat.gid)
            .unwrap_or_else(|| stat.gid.to_string());
        let is_owner_match = owner == self.identity.user;
        let is_group_match = group == self.identity.group;

        // Only scan what we can traverse
        let (files_consistent, inconsistent_files) = if readable && executable {
            self.scan_consistency(path, stat.mode)
        } else {
            (true, vec![])
        };

        // Verdict precedence, first match wins
        let status = if !readable || !executable {
            PermissionStatus::Error
        } else if !is_owner_match {
            PermissionStatus::Error
        } else if !writable {
            PermissionStatus::Warning
        } else if !files_consistent {
            PermissionStatus::Warning
        } else if !(group_readable && group_writable && group_executable) {
            PermissionStatus::Warning
        } else if !(others_readable && others_executable) {
            PermissionStatus::Warning
        } else {
            PermissionStatus::Ok
        };

        debug!(
            "Directory {} permission status: {}",
            path.display(),
            status.as_str()
        );

        DirPermissionReport {
            status,
            readable,
            writable,
            executable,
            group_readable,
            group_writable,
            group_executable,
            others_readable,
            others_writable,
            others_executable,
            files_consistent,
            inconsistent_files,
            owner,
            group,
            is_owner_match,
            is_group_match,
            mode: format!("{:03o}", stat.mode),
            error: None,
        }
    }

    /// Compare sampled files' group/other read+write bits against the
    /// directory's. Bounded: at most `MAX_SCAN_DEPTH` levels, at most
    /// `FILES_PER_LEVEL` files per directory, stops after
    /// `MAX_INCONSISTENT` divergent paths. Symlinks are skipped.
    fn scan_consistency(&self, root: &Path, dir_mode: u32) -> (bool, Vec<String>) {
        let mut divergent = Vec::new();
        self.scan_level(root, dir_mode & CONSISTENCY_MASK, 1, &mut divergent);
        (divergent.is_empty(), divergent)
    }

    fn scan_level(&self, dir: &Path, expected_bits: u32, depth: usize, divergent: &mut Vec<String>) {
        if depth > MAX_SCAN_DEPTH || divergent.len() >= MAX_INCONSISTENT {
            return;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list {}: {}", dir.display(), e);
                return;
            }
        };

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                subdirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        subdirs.sort();

        for file in files.iter().take(FILES_PER_LEVEL) {
            match self.system.stat(file) {
                Ok(stat) => {
                    if stat.mode & CONSISTENCY_MASK != expected_bits {
                        divergent.push(file.display().to_string());
                        if divergent.len() >= MAX_INCONSISTENT {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not check {}: {}", file.display(), e);
                }
            }
        }

        for subdir in subdirs {
            self.scan_level(&subdir, expected_bits, depth + 1, divergent);
            if divergent.len() >= MAX_INCONSISTENT {
                return;
            }
        }
    }

    /// Repair one directory tree: mode 0775/0664 and the expected
    /// ownership, applied item by item. Idempotent and safe to re-run;
    /// a privilege failure on one item is one failed item, never fatal.
    pub fn fix(&self, path: &Path) -> FixOutcome {
        if !self.system.exists(path) {
            warn!("Directory does not exist: {}", path.display());
            return FixOutcome::nothing_attempted(format!(
                "Directory does not exist: {}",
                path.display()
            ));
        }

        info!("Fixing permissions for {}", path.display());

        let owner_spec = format!("{}:{}", self.identity.user, self.identity.group);
        let path_str = path.to_string_lossy();
        let mut fixed_count: u32 = 0;
        let mut failed_count: u32 = 0;

        // The directory's own mode and ownership are two separate items
        if self
            .system
            .run_privileged(&["chmod", DIR_MODE, path_str.as_ref()])
            .success
        {
            fixed_count += 1;
        } else {
            failed_count += 1;
        }
        if self
            .system
            .run_privileged(&["chown", &owner_spec, path_str.as_ref()])
            .success
        {
            fixed_count += 1;
        } else {
            failed_count += 1;
        }

        self.ensure_group_membership();

        for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Unreadable entry under {}: {}", path.display(), e);
                    failed_count += 1;
                    continue;
                }
            };

            let mode = if entry.file_type().is_dir() {
                DIR_MODE
            } else {
                FILE_MODE
            };
            let entry_path = entry.path().to_string_lossy();

            let chmod = self
                .system
                .run_privileged(&["chmod", mode, entry_path.as_ref()]);
            let chown = self
                .system
                .run_privileged(&["chown", &owner_spec, entry_path.as_ref()]);

            if chmod.success && chown.success {
                fixed_count += 1;
            } else {
                warn!(
                    "Failed to fix {}: {}",
                    entry.path().display(),
                    if chmod.success {
                        &chown.detail
                    } else {
                        &chmod.detail
                    }
                );
                failed_count += 1;
            }
        }

        let status = if failed_count == 0 && fixed_count > 0 {
            FixStatus::Fixed
        } else if fixed_count > 0 {
            FixStatus::PartiallyFixed
        } else {
            FixStatus::Failed
        };

        info!(
            "Fixed permissions for {} items in {}, {} failures",
            fixed_count,
            path.display(),
            failed_count
        );

        FixOutcome {
            success: fixed_count > 0,
            status,
            fixed_count,
            failed_count,
            error: None,
        }
    }

    /// Best-effort: make sure the invoking user belongs to the service
    /// group. Skipped when membership cannot be determined; never affects
    /// the fix tally.
    fn ensure_group_membership(&self) {
        let Some(user) = self.system.login_user() else {
            debug!("Could not determine invoking user, skipping group check");
            return;
        };

        match self.system.user_in_group(&user, &self.identity.group) {
            Some(true) => {
                debug!("User {} already in group {}", user, self.identity.group);
            }
            Some(false) => {
                let outcome =
                    self.system
                        .run_privileged(&["usermod", "-aG", &self.identity.group, &user]);
                if outcome.success {
                    info!("Added {} to group {}", user, self.identity.group);
                } else {
                    warn!(
                        "Could not add {} to group {}: {}",
                        user, self.identity.group, outcome.detail
                    );
                }
            }
            None => {
                debug!(
                    "Could not verify membership of {} in {}, skipping",
                    user, self.identity.group
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::FakeSystem;
    use std::fs::File;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    fn set_mode(path: &Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    /// Fake that resolves `path`'s actual owner/group ids to the given names
    fn fake_owning(path: &Path, owner_name: &str, group_name: &str) -> FakeSystem {
        let metadata = fs::metadata(path).unwrap();
        let mut fake = FakeSystem::default();
        fake.users.insert(metadata.uid(), owner_name.to_string());
        fake.groups.insert(metadata.gid(), group_name.to_string());
        fake
    }

    fn auditor(fake: FakeSystem) -> (PermissionAuditor, Arc<FakeSystem>) {
        let fake = Arc::new(fake);
        let auditor = PermissionAuditor::new(fake.clone(), IdentityConfig::default());
        (auditor, fake)
    }

    #[test]
    fn test_classify_missing_path() {
        let (auditor, _) = auditor(FakeSystem::default());
        let report = auditor.classify(Path::new("/nonexistent/addons"));
        assert_eq!(report.status, PermissionStatus::NotFound);
        assert!(report.error.unwrap().contains("does not exist"));
    }

    #[test]
    fn test_classify_compliant_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.py", "b.py", "c.py"] {
            let file = dir.path().join(name);
            File::create(&file).unwrap();
            set_mode(&file, 0o664);
        }
        set_mode(dir.path(), 0o775);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert_eq!(report.status, PermissionStatus::Ok);
        assert!(report.files_consistent);
        assert!(report.inconsistent_files.is_empty());
        assert!(report.is_owner_match);
        assert!(report.is_group_match);
        assert_eq!(report.owner, "odoo");
        assert_eq!(report.mode, "775");
    }

    #[test]
    fn test_classify_0700_owner_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        set_mode(dir.path(), 0o700);

        // Directory owned by the builder, not the service identity
        let (auditor, _) = auditor(fake_owning(dir.path(), "builder", "builder"));
        let report = auditor.classify(dir.path());

        assert_eq!(report.status, PermissionStatus::Error);
        assert!(report.readable);
        assert!(report.writable);
        assert!(report.executable);
        assert!(!report.group_readable);
        assert!(!report.group_writable);
        assert!(!report.others_readable);
        assert!(!report.is_owner_match);
        assert_eq!(report.mode, "700");
    }

    #[test]
    fn test_classify_inconsistent_file_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.py");
        File::create(&good).unwrap();
        set_mode(&good, 0o664);
        let bad = dir.path().join("locked.py");
        File::create(&bad).unwrap();
        set_mode(&bad, 0o600);
        set_mode(dir.path(), 0o775);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert_eq!(report.status, PermissionStatus::Warning);
        assert!(!report.files_consistent);
        assert_eq!(report.inconsistent_files.len(), 1);
        assert!(report.inconsistent_files[0].ends_with("locked.py"));
    }

    #[test]
    fn test_classify_caps_reported_divergences() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            let file = dir.path().join(format!("f{}.py", i));
            File::create(&file).unwrap();
            set_mode(&file, 0o600);
        }
        set_mode(dir.path(), 0o775);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert!(!report.files_consistent);
        assert_eq!(report.inconsistent_files.len(), 5);
    }

    #[test]
    fn test_classify_scans_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("module");
        fs::create_dir(&sub).unwrap();
        let nested = sub.join("odd.py");
        File::create(&nested).unwrap();
        set_mode(&nested, 0o600);
        set_mode(&sub, 0o775);
        set_mode(dir.path(), 0o775);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert!(!report.files_consistent);
        assert!(report.inconsistent_files[0].ends_with("odd.py"));
    }

    #[test]
    fn test_classify_incomplete_group_bits_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        File::create(&file).unwrap();
        set_mode(&file, 0o644);
        set_mode(dir.path(), 0o755);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert_eq!(report.status, PermissionStatus::Warning);
        assert!(report.files_consistent);
        assert!(report.group_readable);
        assert!(!report.group_writable);
    }

    #[test]
    fn test_classify_missing_others_access_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        set_mode(dir.path(), 0o770);

        let (auditor, _) = auditor(fake_owning(dir.path(), "odoo", "odoo"));
        let report = auditor.classify(dir.path());

        assert_eq!(report.status, PermissionStatus::Warning);
        assert!(!report.others_readable);
        assert!(!report.others_executable);
    }

    #[test]
    fn test_fix_missing_path() {
        let (auditor, fake) = auditor(FakeSystem::default());
        let outcome = auditor.fix(Path::new("/nonexistent/addons"));

        assert!(!outcome.success);
        assert_eq!(outcome.status, FixStatus::Failed);
        assert_eq!(outcome.fixed_count, 0);
        assert_eq!(outcome.failed_count, 0);
        assert!(outcome.error.unwrap().contains("does not exist"));
        assert!(fake.recorded().is_empty());
    }

    #[test]
    fn test_fix_counts_every_object_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.py")).unwrap();
        File::create(dir.path().join("b.py")).unwrap();
        let sub = dir.path().join("module");
        fs::create_dir(&sub).unwrap();
        File::create(sub.join("c.py")).unwrap();

        let (auditor, fake) = auditor(FakeSystem::default());
        let outcome = auditor.fix(dir.path());

        // Root mode + root ownership = 2 items, then 4 walked objects
        assert!(outcome.success);
        assert_eq!(outcome.status, FixStatus::Fixed);
        assert_eq!(outcome.fixed_count, 6);
        assert_eq!(outcome.failed_count, 0);

        // Directories get 775, files 664
        let commands = fake.recorded();
        assert!(commands
            .iter()
            .any(|c| c[0] == "chmod" && c[1] == "775" && c[2].ends_with("module")));
        assert!(commands
            .iter()
            .any(|c| c[0] == "chmod" && c[1] == "664" && c[2].ends_with("c.py")));
        assert!(commands
            .iter()
            .any(|c| c[0] == "chown" && c[1] == "odoo:odoo"));

        // Re-running on an already-fixed tree still succeeds cleanly
        let again = auditor.fix(dir.path());
        assert_eq!(again.status, FixStatus::Fixed);
        assert_eq!(again.failed_count, 0);
        assert_eq!(again.fixed_count, outcome.fixed_count);
    }

    #[test]
    fn test_fix_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("ok.py")).unwrap();
        File::create(dir.path().join("denied.py")).unwrap();

        let mut fake = FakeSystem::default();
        fake.fail_privileged_matching = Some("denied".to_string());
        let (auditor, _) = auditor(fake);

        let outcome = auditor.fix(dir.path());
        assert!(outcome.success);
        assert_eq!(outcome.status, FixStatus::PartiallyFixed);
        assert_eq!(outcome.fixed_count, 3);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.fixed_count + outcome.failed_count, 4);
    }

    #[test]
    fn test_fix_total_failure() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.py")).unwrap();

        let mut fake = FakeSystem::default();
        // Everything runs under the tempdir, so every command fails
        fake.fail_privileged_matching = Some(dir.path().to_string_lossy().into_owned());
        let (auditor, _) = auditor(fake);

        let outcome = auditor.fix(dir.path());
        assert!(!outcome.success);
        assert_eq!(outcome.status, FixStatus::Failed);
        assert_eq!(outcome.fixed_count, 0);
        assert_eq!(outcome.failed_count, 3);
    }

    #[test]
    fn test_fix_adds_missing_group_membership() {
        let dir = tempfile::tempdir().unwrap();

        let mut fake = FakeSystem::default();
        fake.login = Some("dev".to_string());
        fake.membership = Some(false);
        let (auditor, fake) = auditor(fake);

        let outcome = auditor.fix(dir.path());
        assert_eq!(outcome.status, FixStatus::Fixed);

        let commands = fake.recorded();
        assert!(commands
            .iter()
            .any(|c| c == &vec!["usermod", "-aG", "odoo", "dev"]));
    }

    #[test]
    fn test_fix_skips_group_step_when_membership_unknown() {
        let dir = tempfile::tempdir().unwrap();

        let mut fake = FakeSystem::default();
        fake.login = Some("dev".to_string());
        fake.membership = None;
        let (auditor, fake) = auditor(fake);

        let outcome = auditor.fix(dir.path());
        // Degraded path: no usermod issued, outcome untouched
        assert_eq!(outcome.status, FixStatus::Fixed);
        assert_eq!(outcome.fixed_count, 2);
        assert!(!fake.recorded().iter().any(|c| c[0] == "usermod"));
    }
}
