//! On-disk layout of the aquatic-mapping workspace.
//!
//! Every trial owns two directories that share the `trial_<id>` name:
//! the mission data written by the simulation container and the
//! reconstruction results written by the GP scripts.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FieldPanelError, Result};

pub const FIELDS: [&str; 5] = [
    "radial",
    "x_compress",
    "y_compress",
    "x_compress_tilt",
    "y_compress_tilt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(pub u32);

impl TrialId {
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    pub fn dir_name(&self) -> String {
        format!("trial_{}", self.0)
    }

    pub fn ros_domain_id(&self) -> u32 {
        self.0 % 100
    }

    pub fn vnc_port(&self, base: u16) -> Result<u16> {
        u16::try_from(self.0)
            .ok()
            .and_then(|n| base.checked_add(n))
            .ok_or_else(|| {
                FieldPanelError::InvalidInput(format!("trial {} has no valid VNC port", self.0))
            })
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TrialId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for TrialId {
    type Err = FieldPanelError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(TrialId)
            .map_err(|_| FieldPanelError::InvalidInput(format!("invalid trial id: {s}")))
    }
}

/// Sort key used for trial listings: numeric ids in order, anything else first.
pub fn numeric_sort_key(id: &str) -> u64 {
    id.parse::<u64>().unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct TrialLayout {
    root: PathBuf,
}

impl TrialLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn missions_dir(&self) -> PathBuf {
        self.root
            .join("src")
            .join("sampling")
            .join("data")
            .join("missions")
    }

    pub fn reconstruction_dir(&self) -> PathBuf {
        self.root.join("reconstruction")
    }

    pub fn results_root(&self) -> PathBuf {
        self.reconstruction_dir().join("results")
    }

    pub fn mission_dir(&self, id: TrialId) -> PathBuf {
        self.missions_dir().join(id.dir_name())
    }

    pub fn results_dir(&self, id: TrialId) -> PathBuf {
        self.results_root().join(id.dir_name())
    }

    pub fn reconstruction_log(&self, id: TrialId) -> PathBuf {
        self.results_dir(id).join("reconstruction.log")
    }

    pub fn samples_csv(&self, id: TrialId, field: &str) -> PathBuf {
        self.mission_dir(id)
            .join(field)
            .join(format!("{field}_samples.csv"))
    }

    pub fn metrics_csv(&self, id: TrialId, method: &str, field: &str, kernel: &str) -> PathBuf {
        self.results_dir(id)
            .join(method)
            .join(field)
            .join(kernel)
            .join(format!("{field}_{kernel}_metrics.csv"))
    }

    pub fn heatmap(&self, id: TrialId) -> PathBuf {
        self.results_dir(id)
            .join("comparison")
            .join("comparison_heatmaps.png")
    }

    /// Resolve a client-supplied path inside a trial's results directory.
    ///
    /// Absolute paths and `..` components are rejected outright; the
    /// canonical target must also stay under the canonical results dir so
    /// symlinks cannot escape it.
    pub fn resolve_result_file(&self, id: TrialId, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || rel.as_os_str().is_empty() {
            return Err(FieldPanelError::InvalidInput("Access denied".into()));
        }

        let base = self.results_dir(id);
        let candidate = base.join(rel);
        if !candidate.exists() {
            return Err(FieldPanelError::not_found("Image not found"));
        }

        let base = base.canonicalize()?;
        let candidate = candidate.canonicalize()?;
        if !candidate.starts_with(&base) {
            return Err(FieldPanelError::InvalidInput("Access denied".into()));
        }
        Ok(candidate)
    }
}
