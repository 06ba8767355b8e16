//! Removal of a trial's mission data and reconstruction results.
//!
//! Mission files are written by the simulation container and frequently end
//! up with restrictive ownership or modes. Before deleting them we make one
//! best-effort pass to open up permissions; a remaining permission failure
//! is reported with the manual command to run.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::layout::{TrialId, TrialLayout};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

impl DeletionReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Nothing existed for the trial.
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.errors.is_empty()
    }
}

pub fn delete_trial_data(layout: &TrialLayout, id: TrialId) -> DeletionReport {
    let mut report = DeletionReport::default();

    let mission = layout.mission_dir(id);
    if mission.exists() {
        relax_permissions(&mission);
        match fs::remove_dir_all(&mission) {
            Ok(()) => {
                info!(trial = %id, "Deleted mission data {:?}", mission);
                report
                    .deleted
                    .push(format!("trial data ({})", mission.display()));
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(trial = %id, "Permission denied deleting {:?}", mission);
                report.errors.push(format!(
                    "Permission denied deleting trial data. Files may be owned by Docker. Try: sudo rm -rf {}",
                    mission.display()
                ));
            }
            Err(e) => {
                warn!(trial = %id, "Failed to delete {:?}: {}", mission, e);
                report
                    .errors
                    .push(format!("Failed to delete trial data: {e}"));
            }
        }
    }

    let results = layout.results_dir(id);
    if results.exists() {
        match fs::remove_dir_all(&results) {
            Ok(()) => {
                info!(trial = %id, "Deleted reconstruction results {:?}", results);
                report
                    .deleted
                    .push(format!("reconstruction results ({})", results.display()));
            }
            Err(e) => {
                warn!(trial = %id, "Failed to delete {:?}: {}", results, e);
                report
                    .errors
                    .push(format!("Failed to delete reconstruction results: {e}"));
            }
        }
    }

    report
}

/// dirs 0755, files 0644; failures are ignored.
#[cfg(unix)]
fn relax_permissions(root: &Path) {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_symlink() {
            continue;
        }
        let mode = if entry.file_type().is_dir() { 0o755 } else { 0o644 };
        if let Err(e) = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode)) {
            debug!("chmod {:o} {:?} failed: {}", mode, entry.path(), e);
        }
    }
}

#[cfg(not(unix))]
fn relax_permissions(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            perms.set_readonly(false);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_both_trial_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        let id = TrialId(9);
        fs::create_dir_all(layout.mission_dir(id).join("radial")).unwrap();
        fs::write(layout.samples_csv(id, "radial"), "x\n").unwrap();
        fs::create_dir_all(layout.results_dir(id)).unwrap();
        fs::write(layout.reconstruction_log(id), "done").unwrap();

        let report = delete_trial_data(&layout, id);
        assert!(report.success());
        assert_eq!(report.deleted.len(), 2);
        assert!(report.deleted[0].starts_with("trial data"));
        assert!(report.deleted[1].starts_with("reconstruction results"));
        assert!(!layout.mission_dir(id).exists());
        assert!(!layout.results_dir(id).exists());
    }

    #[test]
    fn leaves_other_trials_alone() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        fs::create_dir_all(layout.mission_dir(TrialId(1))).unwrap();
        fs::create_dir_all(layout.mission_dir(TrialId(11))).unwrap();

        let report = delete_trial_data(&layout, TrialId(1));
        assert_eq!(report.deleted.len(), 1);
        assert!(layout.mission_dir(TrialId(11)).exists());
    }

    #[test]
    fn nothing_to_delete_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        let report = delete_trial_data(&layout, TrialId(4));
        assert!(report.is_empty());
        assert!(report.success());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_tree_is_repaired_before_removal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        let id = TrialId(2);
        let field = layout.mission_dir(id).join("radial");
        fs::create_dir_all(&field).unwrap();
        fs::write(field.join("radial_samples.csv"), "x\n").unwrap();
        fs::set_permissions(&field, fs::Permissions::from_mode(0o555)).unwrap();

        let report = delete_trial_data(&layout, id);
        assert!(report.success(), "{:?}", report.errors);
        assert!(!layout.mission_dir(id).exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_targets_keep_their_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("private.key");
        fs::write(&outside, "secret").unwrap();
        fs::set_permissions(&outside, fs::Permissions::from_mode(0o600)).unwrap();

        let layout = TrialLayout::new(dir.path().join("ws"));
        let id = TrialId(6);
        fs::create_dir_all(layout.mission_dir(id)).unwrap();
        std::os::unix::fs::symlink(&outside, layout.mission_dir(id).join("link")).unwrap();

        let report = delete_trial_data(&layout, id);
        assert!(report.success(), "{:?}", report.errors);
        assert!(outside.exists());
        let mode = fs::metadata(&outside).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
