use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FieldPanelError, Result};
use crate::layout::{numeric_sort_key, TrialId, TrialLayout};

pub const PREVIEW_ROWS: usize = 100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldSummary {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTrial {
    pub id: String,
    pub path: PathBuf,
    pub fields: Vec<FieldSummary>,
    pub field_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplePreview {
    pub trial_id: TrialId,
    pub field: String,
    pub rows: Vec<BTreeMap<String, String>>,
    pub total_preview: usize,
}

/// Trials that have a mission directory, with the fields that produced samples.
pub fn list_completed_trials(layout: &TrialLayout) -> Result<Vec<CompletedTrial>> {
    let missions = layout.missions_dir();
    if !missions.exists() {
        return Ok(Vec::new());
    }

    let mut trials = Vec::new();
    for entry in fs::read_dir(&missions)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(id) = name.strip_prefix("trial_") else {
            continue;
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let mut fields = Vec::new();
        for field in fs::read_dir(&path)? {
            let field = field?;
            let field_path = field.path();
            if !field_path.is_dir() {
                continue;
            }
            let field_name = field.file_name().to_string_lossy().into_owned();
            let csv = field_path.join(format!("{field_name}_samples.csv"));
            if let Ok(meta) = fs::metadata(&csv) {
                fields.push(FieldSummary {
                    name: field_name,
                    size: meta.len(),
                });
            }
        }
        fields.sort_by(|a, b| a.name.cmp(&b.name));

        trials.push(CompletedTrial {
            id: id.to_string(),
            path,
            field_count: fields.len(),
            fields,
        });
    }

    trials.sort_by_key(|t| numeric_sort_key(&t.id));
    Ok(trials)
}

/// Whether the mission wrote at least one `*_samples.csv`, anywhere below its directory.
pub fn has_samples(layout: &TrialLayout, id: TrialId) -> bool {
    let dir = layout.mission_dir(id);
    if !dir.exists() {
        return false;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| {
            e.file_type().is_file() && e.file_name().to_string_lossy().ends_with("_samples.csv")
        })
}

pub fn preview_samples(layout: &TrialLayout, id: TrialId, field: &str) -> Result<SamplePreview> {
    let path = layout.samples_csv(id, field);
    if field.contains(['/', '\\']) || field.contains("..") || !path.exists() {
        return Err(FieldPanelError::not_found(format!(
            "Data not found for trial {id}, field {field}"
        )));
    }

    // A running trial may still be appending, so the last row can be short.
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records().take(PREVIEW_ROWS) {
        let record = record?;
        rows.push(
            headers
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), record.get(i).unwrap_or_default().to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
    }

    Ok(SamplePreview {
        trial_id: id,
        field: field.to_string(),
        total_preview: rows.len(),
        rows,
    })
}

pub fn archive_file_name(id: TrialId) -> String {
    format!("trial_{id}_data.zip")
}

/// Zip every file of a trial's mission directory into `dest`.
///
/// Entry names are relative to the mission directory.
pub fn archive_trial(layout: &TrialLayout, id: TrialId, dest: &Path) -> Result<u64> {
    let source = layout.mission_dir(id);
    if !source.exists() {
        return Err(FieldPanelError::not_found(format!(
            "Trial {id} data not found"
        )));
    }

    let mut writer = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0u64;

    for entry in WalkDir::new(&source).sort_by_file_name() {
        let entry = entry.map_err(|e| FieldPanelError::Io(io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&source)
            .map_err(|e| FieldPanelError::Io(io::Error::other(e)))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut writer)?;
        files += 1;
    }

    writer.finish()?;
    debug!("Archived {} files of trial {} into {:?}", files, id, dest);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_samples(layout: &TrialLayout, id: TrialId, field: &str, body: &str) {
        let path = layout.samples_csv(id, field);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn lists_trials_in_numeric_order_with_fields() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        write_samples(&layout, TrialId(10), "radial", "x,y,value\n1,2,3\n");
        write_samples(&layout, TrialId(2), "x_compress", "x,y,value\n");
        fs::create_dir_all(layout.mission_dir(TrialId(2)).join("empty_field")).unwrap();
        fs::create_dir_all(layout.missions_dir().join("notes")).unwrap();

        let trials = list_completed_trials(&layout).unwrap();
        let ids: Vec<_> = trials.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["2", "10"]);
        assert_eq!(trials[0].field_count, 1);
        assert_eq!(trials[0].fields[0].name, "x_compress");
        assert_eq!(trials[1].fields[0].size, 16);
    }

    #[test]
    fn missing_missions_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        assert!(list_completed_trials(&layout).unwrap().is_empty());
        assert!(!has_samples(&layout, TrialId(1)));
    }

    #[test]
    fn detects_samples_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        let nested = layout.mission_dir(TrialId(4)).join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert!(!has_samples(&layout, TrialId(4)));
        fs::write(nested.join("deep_samples.csv"), "x\n").unwrap();
        assert!(has_samples(&layout, TrialId(4)));
    }

    #[test]
    fn preview_caps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        let mut body = String::from("x,y,value\n");
        for i in 0..150 {
            body.push_str(&format!("{i},{i},0.5\n"));
        }
        write_samples(&layout, TrialId(1), "radial", &body);

        let preview = preview_samples(&layout, TrialId(1), "radial").unwrap();
        assert_eq!(preview.total_preview, PREVIEW_ROWS);
        assert_eq!(preview.rows[3]["x"], "3");
        assert_eq!(preview.rows[3]["value"], "0.5");

        let missing = preview_samples(&layout, TrialId(1), "y_compress").unwrap_err();
        assert!(missing.is_not_found());
    }

    #[test]
    fn preview_tolerates_a_partly_written_row() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        write_samples(&layout, TrialId(3), "radial", "x,y,value\n1,2,3\n4,5,6\n7,8\n");

        let preview = preview_samples(&layout, TrialId(3), "radial").unwrap();
        assert_eq!(preview.total_preview, 3);
        assert_eq!(preview.rows[1]["value"], "6");
        assert_eq!(preview.rows[2]["x"], "7");
        assert_eq!(preview.rows[2]["y"], "8");
        assert_eq!(preview.rows[2]["value"], "");
    }

    #[test]
    fn archive_contains_relative_entries() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(dir.path());
        write_samples(&layout, TrialId(5), "radial", "x\n1\n");
        write_samples(&layout, TrialId(5), "y_compress", "x\n2\n");

        let dest = dir.path().join(archive_file_name(TrialId(5)));
        assert_eq!(archive_trial(&layout, TrialId(5), &dest).unwrap(), 2);

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            ["radial/radial_samples.csv", "y_compress/y_compress_samples.csv"]
        );

        let err = archive_trial(&layout, TrialId(6), &dir.path().join("x.zip")).unwrap_err();
        assert!(err.is_not_found());
    }
}
