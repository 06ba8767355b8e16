//! Reconstruction outputs: per-method metrics tables and rendered plots.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{FieldPanelError, Result};
use crate::layout::{TrialId, TrialLayout, FIELDS};

pub const METHODS: [&str; 3] = ["standard_gp", "mchutchon_nigp", "girard"];
pub const KERNELS: [&str; 4] = ["rbf", "exponential", "matern15", "matern25"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricRow {
    pub method: String,
    pub field: String,
    pub kernel: String,
    pub rmse: f64,
    pub nrmse: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultImage {
    pub name: String,
    pub path: String,
    pub url: String,
}

/// Method/field/kernel combinations the reconstruction scripts produce.
/// Girard's uncertain-input GP only runs with the RBF kernel.
pub fn combinations() -> impl Iterator<Item = (&'static str, &'static str, &'static str)> {
    METHODS.into_iter().flat_map(|method| {
        FIELDS.into_iter().flat_map(move |field| {
            KERNELS
                .into_iter()
                .filter(move |kernel| method != "girard" || *kernel == "rbf")
                .map(move |kernel| (method, field, kernel))
        })
    })
}

pub fn collect_metrics(layout: &TrialLayout, id: TrialId) -> Result<Vec<MetricRow>> {
    if !layout.results_dir(id).exists() {
        return Err(FieldPanelError::not_found(format!(
            "No reconstruction results for trial {id}"
        )));
    }

    let mut rows = Vec::new();
    for (method, field, kernel) in combinations() {
        let path = layout.metrics_csv(id, method, field, kernel);
        if !path.exists() {
            continue;
        }
        let mut reader = csv::Reader::from_path(&path)?;
        for record in reader.deserialize::<HashMap<String, String>>() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping malformed metrics row in {:?}: {}", path, e);
                    continue;
                }
            };
            rows.push(MetricRow {
                method: method.to_string(),
                field: field.to_string(),
                kernel: kernel.to_string(),
                rmse: parse_metric(record.get("rmse")),
                nrmse: parse_metric(record.get("nrmse")),
            });
        }
    }

    rows.sort_by(|a, b| {
        (a.field.as_str(), a.method.as_str(), a.kernel.as_str()).cmp(&(
            b.field.as_str(),
            b.method.as_str(),
            b.kernel.as_str(),
        ))
    });
    Ok(rows)
}

fn parse_metric(value: Option<&String>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn image_url(id: TrialId, rel_path: &str) -> String {
    format!("/api/reconstruct/{id}/image/{rel_path}")
}

/// Every PNG under the trial's results directory.
pub fn list_images(layout: &TrialLayout, id: TrialId) -> Vec<ResultImage> {
    let base = layout.results_dir(id);
    if !base.exists() {
        return Vec::new();
    }

    WalkDir::new(&base)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(&base).ok()?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some(ResultImage {
                name: e.file_name().to_string_lossy().into_owned(),
                url: image_url(id, &rel),
                path: rel,
            })
        })
        .collect()
}
