//! Upload folder layout: `temp_<stamp>/` staging directories,
//! `<stamp>_product_files.zip` bundles and `<stamp>_image.<ext>` images.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::MarketError;
use crate::validation::is_image_file;

const TEMP_PREFIX: &str = "temp_";
const BUNDLE_SUFFIX: &str = "_product_files.zip";
const KEEP_FILE: &str = ".keep";

pub fn temp_dir_name(stamp: i64) -> String {
    format!("{}{}", TEMP_PREFIX, stamp)
}

pub fn bundle_name(stamp: i64) -> String {
    format!("{}{}", stamp, BUNDLE_SUFFIX)
}

pub fn image_name(stamp: i64, extension: &str) -> String {
    format!("{}_image.{}", stamp, extension)
}

/// Resolves a stored file name inside the upload folder. Names with parent or
/// absolute components are refused.
pub fn resolve(upload_dir: &Path, stored: &str) -> Option<PathBuf> {
    let stored = Path::new(stored.trim_start_matches('/'));
    let plain = stored
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if stored.as_os_str().is_empty() || !plain {
        return None;
    }
    Some(upload_dir.join(stored))
}

/// Writes every regular file below `source` into a new zip at `destination`,
/// keeping paths relative to `source`. Returns the number of entries.
pub fn bundle_directory(source: &Path, destination: &Path) -> Result<usize, MarketError> {
    let mut files = Vec::new();
    collect_files(source, &mut files)?;
    files.sort();

    let mut zip = ZipWriter::new(File::create(destination)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &files {
        let relative = path
            .strip_prefix(source)
            .map_err(|err| MarketError::Internal(err.to_string()))?;
        let entry_name = relative
            .components()
            .filter_map(|component| component.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(entry_name, options)?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }

    zip.finish()?;
    Ok(files.len())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub total_files: usize,
    pub total_bytes: u64,
    pub removed_files: usize,
    pub removed_bytes: u64,
    pub removed_temp_dirs: usize,
    pub kept_files: usize,
    pub skipped_recent: usize,
}

impl SweepReport {
    pub fn kept_bytes(&self) -> u64 {
        self.total_bytes - self.removed_bytes
    }
}

/// Cleans the upload folder: staging directories go, bundles and images stay,
/// anything else is removed. When `referenced` is given, bundles and images
/// that no product points at are removed as well.
///
/// Entries modified less than `min_age` ago are left alone, since they may
/// belong to an upload the server is still writing.
pub fn sweep_uploads(
    upload_dir: &Path,
    referenced: Option<&HashSet<String>>,
    min_age: Duration,
) -> Result<SweepReport, MarketError> {
    let mut report = SweepReport::default();

    for entry in fs::read_dir(upload_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        let metadata = entry.metadata()?;
        let recent = is_recent(&metadata, min_age);

        if file_type.is_dir() {
            if name.starts_with(TEMP_PREFIX) && recent {
                tracing::debug!(dir = %name, "staging directory still in use");
                report.skipped_recent += 1;
            } else if name.starts_with(TEMP_PREFIX) {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        tracing::info!(dir = %name, "removed staging directory");
                        report.removed_temp_dirs += 1;
                    }
                    Err(err) => tracing::warn!(dir = %name, error = %err, "could not remove staging directory"),
                }
            }
            continue;
        }

        let size = metadata.len();
        report.total_files += 1;
        report.total_bytes += size;

        if keep_file(&name, referenced) {
            tracing::debug!(file = %name, "kept");
            report.kept_files += 1;
            continue;
        }
        if recent {
            tracing::debug!(file = %name, "modified recently, kept");
            report.kept_files += 1;
            report.skipped_recent += 1;
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::info!(file = %name, bytes = size, "removed");
                report.removed_files += 1;
                report.removed_bytes += size;
            }
            Err(err) => {
                tracing::warn!(file = %name, error = %err, "could not remove file");
                report.kept_files += 1;
            }
        }
    }

    Ok(report)
}

fn is_recent(metadata: &fs::Metadata, min_age: Duration) -> bool {
    metadata
        .modified()
        .map(|modified| modified.elapsed().unwrap_or_default() < min_age)
        .unwrap_or(false)
}

fn keep_file(name: &str, referenced: Option<&HashSet<String>>) -> bool {
    if name == KEEP_FILE {
        return true;
    }
    let recognised = name.ends_with(BUNDLE_SUFFIX) || is_image_file(name);
    match referenced {
        Some(referenced) => recognised && referenced.contains(name),
        None => recognised,
    }
}
