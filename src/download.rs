//! # Download Component
//!
//! Fetches repository resources into a local directory.
//!
//! Key properties:
//! - The destination directory is created on demand; an existing one is fine
//! - Bodies are streamed to a hidden `.part` file and renamed into place only
//!   once complete (and validated), so a file under its final name is never
//!   a partial download
//! - Optional checksum/size validation against the catalog's file descriptor
//! - Optional extraction of `.zip` and `.tar.gz` archives
//! - Batch downloads are independent: one failure does not stop the others

use crate::catalog::FileDescriptor;
use crate::client::RepositoryApi;
use crate::error::{PipelineError, PipelineResult, TransferError};
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio::fs;

/// Caller-controlled download behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Verify checksum and size against the file descriptor
    pub validate: bool,
    /// Extract archives into the destination directory
    pub extract: bool,
    /// Re-download files that already exist under their final name
    pub overwrite: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            validate: true,
            extract: true,
            overwrite: false,
        }
    }
}

/// Expected properties of a downloaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Integrity {
    pub checksum: Option<String>,
    pub checksum_type: Option<String>,
    pub size: Option<u64>,
}

impl From<&FileDescriptor> for Integrity {
    fn from(file: &FileDescriptor) -> Self {
        Self {
            checksum: file.checksum.clone(),
            checksum_type: file.checksum_type.clone(),
            size: file.size,
        }
    }
}

impl Integrity {
    pub fn is_empty(&self) -> bool {
        self.checksum.is_none() && self.size.is_none()
    }
}

/// Result of one download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub url: String,
    /// Where the fetched file was written
    pub path: PathBuf,
    /// Files unpacked from the archive, if it was one
    pub extracted: Vec<PathBuf>,
    pub bytes: u64,
    pub validated: bool,
    /// The file already existed and was not fetched again
    pub skipped: bool,
}

/// Result of a batch download.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<DownloadOutcome>,
    pub failed: Vec<PipelineError>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Derives the local file name from the last path segment of `url`.
pub fn file_name_from_url(url: &str) -> Result<String, TransferError> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    if name.is_empty() || name.contains(':') || name == "." || name == ".." {
        return Err(TransferError::InvalidUrl(url.to_string()));
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
}

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else {
        None
    }
}

/// Downloads one resource into `dest_dir`.
///
/// # Errors
///
/// Every failure is a [`TransferError`]; fetch failures and extraction
/// failures are reported as different variants.
pub async fn download<A>(
    api: &A,
    url: &str,
    dest_dir: &Path,
    integrity: &Integrity,
    options: DownloadOptions,
) -> Result<DownloadOutcome, TransferError>
where
    A: RepositoryApi + ?Sized,
{
    fs::create_dir_all(dest_dir).await?;

    let file_name = file_name_from_url(url)?;
    let final_path = dest_dir.join(&file_name);
    let part_path = dest_dir.join(format!(".{}.part", file_name));

    if !options.overwrite && fs::try_exists(&final_path).await? {
        let bytes = fs::metadata(&final_path).await?.len();
        let check_existing = options.validate && !integrity.is_empty();
        let reusable = if check_existing {
            match verify(&final_path, integrity, bytes).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "{} exists but fails validation ({}), downloading it again",
                        final_path.display(),
                        e
                    );
                    false
                }
            }
        } else {
            true
        };

        if reusable {
            info!("{} already exists, skipping download", final_path.display());
            let extracted = if options.extract {
                extract_if_archive(&final_path, dest_dir).await?
            } else {
                Vec::new()
            };
            return Ok(DownloadOutcome {
                url: url.to_string(),
                path: final_path,
                extracted,
                bytes,
                validated: check_existing,
                skipped: true,
            });
        }
    }

    info!("Downloading {} to {}", url, dest_dir.display());
    let bytes = match api.fetch_to(url, &part_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            fs::remove_file(&part_path).await.ok();
            return Err(TransferError::Fetch(e));
        }
    };

    let validated = if options.validate {
        if let Err(e) = verify(&part_path, integrity, bytes).await {
            fs::remove_file(&part_path).await.ok();
            return Err(e);
        }
        !integrity.is_empty()
    } else {
        warn!(
            "Integrity validation disabled for {}; the file is accepted unchecked",
            url
        );
        false
    };

    fs::rename(&part_path, &final_path).await?;
    debug!("Wrote {} bytes to {}", bytes, final_path.display());

    let extracted = if options.extract {
        extract_if_archive(&final_path, dest_dir).await?
    } else {
        Vec::new()
    };

    Ok(DownloadOutcome {
        url: url.to_string(),
        path: final_path,
        extracted,
        bytes,
        validated,
        skipped: false,
    })
}

/// Downloads every resource in turn, collecting failures instead of stopping.
pub async fn download_all<A, F>(
    api: &A,
    files: &[FileDescriptor],
    dest_dir: &Path,
    options: DownloadOptions,
    mut on_progress: F,
) -> BatchReport
where
    A: RepositoryApi + ?Sized,
    F: FnMut(&str, &Result<DownloadOutcome, TransferError>),
{
    let mut report = BatchReport::default();

    for file in files {
        let integrity = Integrity::from(file);
        let result = download(api, &file.file_url, dest_dir, &integrity, options).await;
        on_progress(&file.file_url, &result);

        match result {
            Ok(outcome) => report.completed.push(outcome),
            Err(source) => {
                warn!("Download of {} failed: {}", file.file_url, source);
                report.failed.push(PipelineError::Download {
                    url: file.file_url.clone(),
                    source,
                });
            }
        }
    }

    info!(
        "Batch download finished: {} completed, {} failed",
        report.completed.len(),
        report.failed.len()
    );
    report
}

async fn verify(path: &Path, integrity: &Integrity, bytes: u64) -> Result<(), TransferError> {
    if let Some(expected) = integrity.size {
        if expected != bytes {
            return Err(TransferError::Integrity {
                path: path.to_path_buf(),
                expected: format!("{} bytes", expected),
                actual: format!("{} bytes", bytes),
            });
        }
    }

    if let Some(expected) = &integrity.checksum {
        let kind = integrity
            .checksum_type
            .clone()
            .unwrap_or_else(|| "sha512".to_string());
        let owned = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || checksum_file(&owned, &kind))
            .await
            .map_err(|e| io::Error::other(e.to_string()))??;

        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(TransferError::Integrity {
                path: path.to_path_buf(),
                expected: expected.clone(),
                actual,
            });
        }
        debug!("Checksum verified for {}", path.display());
    }

    Ok(())
}

/// Hex digest of a file for the given checksum type (`sha512` or `sha256`).
pub fn checksum_file(path: &Path, checksum_type: &str) -> Result<String, TransferError> {
    let mut file = File::open(path)?;
    match checksum_type.to_lowercase().as_str() {
        "sha512" => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        "sha256" => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        other => Err(TransferError::UnsupportedChecksum(other.to_string())),
    }
}

async fn extract_if_archive(path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, TransferError> {
    let Some(kind) = archive_kind(path) else {
        return Ok(Vec::new());
    };

    let archive = path.to_path_buf();
    let dest = dest_dir.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest, kind))
        .await
        .map_err(|e| TransferError::Extract {
            archive: path.to_path_buf(),
            reason: e.to_string(),
        })??;

    fs::remove_file(path).await?;
    info!(
        "Extracted {} file(s) from {}",
        extracted.len(),
        path.display()
    );
    Ok(extracted)
}

fn extract_archive(
    archive: &Path,
    dest_dir: &Path,
    kind: ArchiveKind,
) -> Result<Vec<PathBuf>, TransferError> {
    let extract_error = |reason: String| TransferError::Extract {
        archive: archive.to_path_buf(),
        reason,
    };
    let file = File::open(archive)?;
    let mut extracted = Vec::new();

    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_error(e.to_string()))?;
            for i in 0..zip.len() {
                let name = zip
                    .by_index(i)
                    .map_err(|e| extract_error(e.to_string()))?
                    .enclosed_name()
                    .ok_or_else(|| extract_error(format!("unsafe entry path at index {}", i)))?;
                extracted.push(dest_dir.join(name));
            }
            zip.extract(dest_dir)
                .map_err(|e| extract_error(e.to_string()))?;
        }
        ArchiveKind::TarGz => {
            let mut tar = Archive::new(GzDecoder::new(file));
            let entries = tar.entries().map_err(|e| extract_error(e.to_string()))?;
            for entry in entries {
                let mut entry = entry.map_err(|e| extract_error(e.to_string()))?;
                let relative = entry
                    .path()
                    .map_err(|e| extract_error(e.to_string()))?
                    .into_owned();
                let unpacked = entry
                    .unpack_in(dest_dir)
                    .map_err(|e| extract_error(e.to_string()))?;
                if !unpacked {
                    return Err(extract_error(format!(
                        "entry {} escapes the destination directory",
                        relative.display()
                    )));
                }
                extracted.push(dest_dir.join(relative));
            }
        }
    }

    extracted.retain(|p| p.is_file());
    extracted.sort();
    Ok(extracted)
}

/// Files in `dir` whose name ends with `suffix`, sorted by name.
pub fn find_grid_files(dir: &Path, suffix: &str) -> PipelineResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::format(dir, e))?;
    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::format(dir, e))?.path();
        let is_match = path.is_file()
            && path
                .file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    !n.starts_with('.') && n.ends_with(suffix)
                })
                .unwrap_or(false);
        if is_match {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches)
}

/// The single file in `dir` ending with `suffix`.
///
/// # Errors
///
/// Fails when there is no match, or when several files match and the choice
/// would be ambiguous.
pub fn locate_grid_file(dir: &Path, suffix: &str) -> PipelineResult<PathBuf> {
    let mut matches = find_grid_files(dir, suffix)?;
    match matches.len() {
        0 => Err(PipelineError::format(
            dir,
            format!("no file ending in '{}' found", suffix),
        )),
        1 => Ok(matches.remove(0)),
        n => Err(PipelineError::format(
            dir,
            format!(
                "{} files end in '{}', cannot choose one: {}",
                n,
                suffix,
                matches
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}
