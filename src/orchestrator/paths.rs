use crate::job_store::SequenceRole;
use std::path::{Path, PathBuf};

/// File layout of a job's result directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    dir: PathBuf,
}

impl JobPaths {
    pub fn new(data_dir: impl AsRef<Path>, job_id: &str) -> Self {
        Self {
            dir: data_dir.as_ref().join(job_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paf(&self) -> PathBuf {
        self.dir.join("map.paf")
    }

    pub fn raw_paf(&self) -> PathBuf {
        self.dir.join("map_raw.paf")
    }

    pub fn logs(&self) -> PathBuf {
        self.dir.join("logs.txt")
    }

    pub fn index(&self, role: SequenceRole) -> PathBuf {
        self.dir.join(format!("{}.idx", role.as_str()))
    }

    pub fn marker(&self, role: SequenceRole) -> PathBuf {
        self.dir.join(role.marker_file_name())
    }

    pub fn key_file(&self) -> PathBuf {
        self.dir.join(".key")
    }

    pub fn all_vs_all_marker(&self) -> PathBuf {
        self.dir.join(".all-vs-all")
    }
}
