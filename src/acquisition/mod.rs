//! Turns a sequence reference into a file owned by the job directory.

mod fetcher;

pub use fetcher::{last_segment, HttpFetcher, RemoteFetcher};

use crate::job_store::{display_name, SequenceKind, SequenceReference, SequenceRole};
use crate::notifications::content::escape_html;
use crate::orchestrator::JobPaths;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Accepted sequence file extensions, compressed variants included.
pub const ALLOWED_EXTENSIONS: &[&str] = &["fa", "fasta", "fna", "fa.gz", "fasta.gz", "fna.gz"];

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("File {filename} downloaded from {url} is not a Fasta file")]
    InvalidInputFile { filename: String, url: String },

    #[error("Url {0} is not a valid URL")]
    InvalidUrl(String),

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Invalid local file: {0}")]
    InvalidLocalFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Message shown to the job owner, as stored on the job record.
    pub fn user_message(&self) -> String {
        match self {
            AcquisitionError::InvalidInputFile { filename, url } => format!(
                "<p>File <b>{}</b> downloaded from <b>{}</b> is not a Fasta file!</p>\
                 <p>If this is unattended, please contact the support.</p>",
                escape_html(filename),
                escape_html(url)
            ),
            AcquisitionError::InvalidUrl(url) => format!(
                "<p>Url <b>{}</b> is not a valid URL!</p>\
                 <p>If this is unattended, please contact the support.</p>",
                escape_html(url)
            ),
            _ => "<p>Error while getting input files. \
                  Please contact the support to report the bug.</p>"
                .to_string(),
        }
    }
}

/// Check a file name against [`ALLOWED_EXTENSIONS`], case-insensitively.
///
/// Only the last one or two dot-separated components are considered.
pub fn is_allowed_sequence_file(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    let parts: Vec<&str> = lower.split('.').collect();
    if parts.len() < 2 {
        return false;
    }
    let last = parts[parts.len() - 1];
    if ALLOWED_EXTENSIONS.contains(&last) {
        return true;
    }
    if parts.len() >= 3 {
        let last_two = format!("{}.{}", parts[parts.len() - 2], last);
        return ALLOWED_EXTENSIONS.contains(&last_two.as_str());
    }
    false
}

/// A sequence file now living in the job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFile {
    pub path: PathBuf,
    pub name: String,
}

impl AcquiredFile {
    pub fn into_reference(self) -> SequenceReference {
        SequenceReference {
            name: self.name,
            location: self.path.to_string_lossy().to_string(),
            kind: SequenceKind::Local,
        }
    }
}

pub struct FileAcquirer {
    fetcher: Arc<dyn RemoteFetcher>,
}

impl FileAcquirer {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self { fetcher }
    }

    /// Acquire `reference` into the job directory as `<role>_<file>` and write the role marker.
    pub async fn acquire(
        &self,
        paths: &JobPaths,
        reference: &SequenceReference,
        role: SequenceRole,
    ) -> Result<AcquiredFile, AcquisitionError> {
        let job_dir = paths.dir();
        let acquired = match reference.kind {
            SequenceKind::Local => self.acquire_local(job_dir, reference, role).await?,
            SequenceKind::Remote => self.acquire_remote(job_dir, reference, role).await?,
        };

        let marker = paths.marker(role);
        fs::write(&marker, acquired.path.to_string_lossy().as_bytes()).await?;
        info!(
            "Acquired {} {} as {:?}",
            role.as_str(),
            reference.location,
            acquired.path
        );
        Ok(acquired)
    }

    async fn acquire_local(
        &self,
        job_dir: &Path,
        reference: &SequenceReference,
        role: SequenceRole,
    ) -> Result<AcquiredFile, AcquisitionError> {
        let source = Path::new(&reference.location);
        let basename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AcquisitionError::InvalidLocalFile(reference.location.clone()))?;
        let final_path = role_path(job_dir, role, basename);
        move_file(source, &final_path).await?;
        Ok(AcquiredFile {
            path: final_path,
            name: reference.name.clone(),
        })
    }

    async fn acquire_remote(
        &self,
        job_dir: &Path,
        reference: &SequenceReference,
        role: SequenceRole,
    ) -> Result<AcquiredFile, AcquisitionError> {
        let url = reference.location.as_str();
        let filename = self.fetcher.resolve_filename(url).await?;
        // A name with a path separator could escape the job directory
        if filename.contains(['/', '\\']) || !is_allowed_sequence_file(&filename) {
            return Err(AcquisitionError::InvalidInputFile {
                filename,
                url: url.to_string(),
            });
        }

        let download_path = job_dir.join(&filename);
        let bytes = match self.fetcher.download(url, &download_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&download_path).await;
                return Err(e);
            }
        };
        debug!("Downloaded {} bytes from {}", bytes, url);

        let final_path = role_path(job_dir, role, &filename);
        fs::rename(&download_path, &final_path).await?;
        Ok(AcquiredFile {
            path: final_path,
            name: display_name(&filename),
        })
    }
}

fn role_path(job_dir: &Path, role: SequenceRole, basename: &str) -> PathBuf {
    job_dir.join(format!("{}_{}", role.as_str(), basename))
}

/// Rename, falling back to copy and remove when the rename crosses filesystems.
async fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !fs::try_exists(source).await.unwrap_or(false) {
                return Err(rename_err);
            }
            warn!(
                "Rename {:?} -> {:?} failed ({}), copying instead",
                source, dest, rename_err
            );
            fs::copy(source, dest).await?;
            fs::remove_file(source).await
        }
    }
}
