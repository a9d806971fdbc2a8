use crate::error::{DreError, Result};
use crate::hierarchy::CategoryHierarchy;
use crate::narrative::NarrativeEntry;
use crate::schema::LedgerTable;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "processed_dre.csv";
pub const CATEGORIES_FILE: &str = "categories.json";
pub const NARRATIVE_REPORT_FILE: &str = "narrative_report.csv";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Everything a successful run publishes.
#[derive(Debug, Clone, Copy)]
pub struct RunArtifacts<'a> {
    pub table: &'a LedgerTable,
    pub hierarchy: &'a CategoryHierarchy,
    pub narratives: &'a [NarrativeEntry],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedArtifacts {
    pub snapshot: PathBuf,
    pub categories: PathBuf,
    pub narrative_report: PathBuf,
}

pub trait ArtifactSink {
    /// Publishes all artifacts or none of them.
    fn persist(&self, artifacts: &RunArtifacts<'_>) -> Result<PersistedArtifacts>;

    /// Narrative entries already published by earlier runs.
    fn existing_narratives(&self) -> Result<Vec<NarrativeEntry>> {
        Ok(Vec::new())
    }
}

/// Writes artifacts into one output directory.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    output_dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(SNAPSHOT_FILE)
    }

    pub fn categories_path(&self) -> PathBuf {
        self.output_dir.join(CATEGORIES_FILE)
    }

    pub fn narrative_report_path(&self) -> PathBuf {
        self.output_dir.join(NARRATIVE_REPORT_FILE)
    }

    fn staging_path(target: &Path) -> PathBuf {
        sibling_path(target, "tmp")
    }

    fn stage_all(&self, artifacts: &RunArtifacts<'_>, staged: &mut Vec<PathBuf>) -> Result<()> {
        let snapshot = Self::staging_path(&self.snapshot_path());
        staged.push(snapshot.clone());
        write_snapshot(&snapshot, artifacts.table)?;

        let categories = Self::staging_path(&self.categories_path());
        staged.push(categories.clone());
        let mut json = artifacts.hierarchy.to_json()?;
        json.push('\n');
        fs::write(&categories, json)?;

        let report = Self::staging_path(&self.narrative_report_path());
        staged.push(report.clone());
        write_narrative_report(&report, artifacts.narratives)?;

        Ok(())
    }
}

impl ArtifactSink for FsArtifactSink {
    fn persist(&self, artifacts: &RunArtifacts<'_>) -> Result<PersistedArtifacts> {
        fs::create_dir_all(&self.output_dir)?;

        let targets = [
            self.snapshot_path(),
            self.categories_path(),
            self.narrative_report_path(),
        ];
        if let Some(blocked) = targets.iter().find(|t| t.is_dir()) {
            return Err(DreError::IoError(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is a directory", blocked.display()),
            )));
        }

        let mut staged = Vec::new();
        if let Err(e) = self.stage_all(artifacts, &mut staged) {
            for path in &staged {
                if path.exists() {
                    if let Err(cleanup) = fs::remove_file(path) {
                        warn!("Could not remove staged file {}: {}", path.display(), cleanup);
                    }
                }
            }
            return Err(e);
        }

        publish(&staged, &targets, |from, to| fs::rename(from, to))?;

        let [snapshot, categories, narrative_report] = targets;
        Ok(PersistedArtifacts {
            snapshot,
            categories,
            narrative_report,
        })
    }

    fn existing_narratives(&self) -> Result<Vec<NarrativeEntry>> {
        let path = self.narrative_report_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_narrative_report(&path)
    }
}

fn sibling_path(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}", name, suffix))
}

/// Moves every staged file onto its target. Existing targets are kept as
/// `.bak` siblings until all renames succeed; on failure they are restored.
fn publish<F>(staged: &[PathBuf], targets: &[PathBuf], mut rename: F) -> Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut published: Vec<PathBuf> = Vec::new();

    let mut outcome = Ok(());
    for (staged_path, target) in staged.iter().zip(targets) {
        if target.exists() {
            let backup = sibling_path(target, "bak");
            if let Err(e) = rename(target, &backup) {
                outcome = Err(e);
                break;
            }
            backups.push((backup, target.clone()));
        }
        if let Err(e) = rename(staged_path, target) {
            outcome = Err(e);
            break;
        }
        published.push(target.clone());
    }

    if let Err(e) = outcome {
        warn!("Publishing failed, restoring previous artifacts: {}", e);
        for target in &published {
            if let Err(cleanup) = fs::remove_file(target) {
                warn!("Could not remove {}: {}", target.display(), cleanup);
            }
        }
        for (backup, target) in &backups {
            if let Err(restore) = fs::rename(backup, target) {
                warn!("Could not restore {}: {}", target.display(), restore);
            }
        }
        for path in staged.iter().filter(|p| p.exists()) {
            if let Err(cleanup) = fs::remove_file(path) {
                warn!("Could not remove staged file {}: {}", path.display(), cleanup);
            }
        }
        return Err(e.into());
    }

    for (backup, _) in &backups {
        if let Err(cleanup) = fs::remove_file(backup) {
            warn!("Could not remove backup {}: {}", backup.display(), cleanup);
        }
    }
    for target in &published {
        info!("Published {}", target.display());
    }
    Ok(())
}

/// Normalized table, one column per source column, canonical cell renderings.
pub fn write_snapshot(path: &Path, table: &LedgerTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|cell| cell.to_display_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// `;`-separated, UTF-8 with BOM so spreadsheet tools detect the encoding.
pub fn write_narrative_report(path: &Path, entries: &[NarrativeEntry]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(file);
    writer.write_record(["narrative", "month", "group", "detail", "amount"])?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_narrative_report(path: &Path) -> Result<Vec<NarrativeEntry>> {
    let bytes = fs::read(path)?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(content);

    let mut entries = Vec::new();
    for record in reader.deserialize() {
        entries.push(record?);
    }
    Ok(entries)
}

/// Distinct non-empty months of a published report.
pub fn read_report_months(path: &Path) -> Result<BTreeSet<String>> {
    Ok(read_narrative_report(path)?
        .into_iter()
        .map(|entry| entry.month)
        .filter(|month| !month.is_empty())
        .collect())
}
