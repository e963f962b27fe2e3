//! Sequence index files (`target.idx`, `query.idx`) written after alignment.
//!
//! Format: the sequence display name on the first line, then one
//! `<record id>\t<length>` line per FASTA record in file order.

use bio::io::fasta;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed FASTA {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub length: u64,
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

fn open_sequence(path: &Path) -> Result<Box<dyn Read>, IndexError> {
    let file = File::open(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(if is_gzip(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    })
}

/// Scan a FASTA file (plain or gzip) and return its records in order.
pub fn read_fasta_entries(fasta_path: &Path) -> Result<Vec<IndexEntry>, IndexError> {
    let reader = fasta::Reader::new(open_sequence(fasta_path)?);
    let mut entries = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|source| match source.kind() {
            // bio reports format violations as `Other`
            ErrorKind::Other | ErrorKind::InvalidData => IndexError::Malformed {
                path: fasta_path.to_path_buf(),
                reason: source.to_string(),
            },
            _ => IndexError::Io {
                path: fasta_path.to_path_buf(),
                source,
            },
        })?;
        if record.id().is_empty() {
            return Err(IndexError::Malformed {
                path: fasta_path.to_path_buf(),
                reason: "header line without an identifier".to_string(),
            });
        }
        entries.push(IndexEntry {
            id: record.id().to_string(),
            length: record.seq().len() as u64,
        });
    }

    if entries.is_empty() {
        return Err(IndexError::Malformed {
            path: fasta_path.to_path_buf(),
            reason: "no records".to_string(),
        });
    }
    Ok(entries)
}

/// Write the index of `fasta_path` to `index_path` under `display_name`.
///
/// Returns the number of records indexed.
pub fn write_index(
    fasta_path: &Path,
    display_name: &str,
    index_path: &Path,
) -> Result<usize, IndexError> {
    let entries = read_fasta_entries(fasta_path)?;
    let io_err = |source| IndexError::Io {
        path: index_path.to_path_buf(),
        source,
    };

    let mut out = BufWriter::new(File::create(index_path).map_err(io_err)?);
    writeln!(out, "{}", display_name).map_err(io_err)?;
    for entry in &entries {
        writeln!(out, "{}\t{}", entry.id, entry.length).map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(entries.len())
}
