// External imports
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// Internal imports
use crate::constants::FAST5_EXTENSION;
use crate::error::{GruPruneError, Result};

/// One read found in a signal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    pub read_id: String,
    pub file: PathBuf,
}

impl fmt::Display for ReadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file_name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| self.file.to_string_lossy());
        write!(f, "{}\t{}", self.read_id, file_name)
    }
}

/// Raw current of one read, in picoamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRead {
    pub read_id: String,
    pub signal: Vec<f32>,
}

/// # Read Source
///
/// Access to the reads stored in a signal file. The HDF5-backed
/// [`Hdf5Source`] is the production implementation; tests substitute their own.
pub trait ReadSource {
    /// Identifiers of every read in `path`, in file order.
    fn read_ids(&self, path: &Path) -> Result<Vec<String>>;

    /// Scaled signal of one read.
    fn raw_signal(&self, path: &Path, read_id: &str) -> Result<RawRead>;
}

/// Every `*.fast5` file directly inside `dir`, sorted by file name.
pub fn fast5_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().ends_with(FAST5_EXTENSION))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    debug!("Found {} signal files in {}", files.len(), dir.display());
    Ok(files)
}

/// # List Reads
///
/// Collects every read of every signal file in `dir`. Files that cannot be
/// read are logged and skipped, so one corrupt file does not hide the rest.
pub fn list_reads(dir: &Path, source: &dyn ReadSource) -> Result<Vec<ReadEntry>> {
    let mut entries = Vec::new();
    for file in fast5_files(dir)? {
        match source.read_ids(&file) {
            Ok(ids) => entries.extend(ids.into_iter().map(|read_id| ReadEntry {
                read_id,
                file: file.clone(),
            })),
            Err(GruPruneError::Fast5Unavailable) => return Err(GruPruneError::Fast5Unavailable),
            Err(e) => warn!("Skipping {}: {}", file.display(), e),
        }
    }
    Ok(entries)
}

/// # For Each Read
///
/// Loads every read of every signal file in `dir`, in file order, and hands it
/// to `on_read`. A file whose reads cannot be listed and a read whose signal
/// cannot be loaded are logged and skipped. A missing HDF5 backend and any
/// error returned by `on_read` stop the walk.
///
/// # Returns
///
/// The number of reads passed to `on_read`
pub fn for_each_read<F>(dir: &Path, source: &dyn ReadSource, mut on_read: F) -> Result<usize>
where
    F: FnMut(RawRead) -> Result<()>,
{
    let mut delivered = 0;
    for file in fast5_files(dir)? {
        let read_ids = match source.read_ids(&file) {
            Ok(ids) => ids,
            Err(GruPruneError::Fast5Unavailable) => return Err(GruPruneError::Fast5Unavailable),
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
        };
        for read_id in read_ids {
            match source.raw_signal(&file, &read_id) {
                Ok(read) => {
                    on_read(read)?;
                    delivered += 1;
                }
                Err(GruPruneError::Fast5Unavailable) => {
                    return Err(GruPruneError::Fast5Unavailable)
                }
                Err(e) => warn!("Skipping read {} in {}: {}", read_id, file.display(), e),
            }
        }
    }
    Ok(delivered)
}

/// Reads signal files through the system HDF5 library.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Source;

#[cfg(feature = "fast5")]
mod hdf5_backend {
    use super::*;
    use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
    use hdf5::{File, Group};

    const READ_GROUP_PREFIX: &str = "read_";
    const SINGLE_READ_GROUP: &str = "Raw/Reads";
    const SINGLE_READ_CHANNEL: &str = "UniqueGlobalKey/channel_id";

    fn fast5_error(path: &Path, e: hdf5::Error) -> GruPruneError {
        GruPruneError::Fast5 {
            file: path.display().to_string(),
            message: e.to_string(),
        }
    }

    fn string_attr(group: &Group, name: &str) -> hdf5::Result<String> {
        let attr = group.attr(name)?;
        if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
            return Ok(s.as_str().to_string());
        }
        if let Ok(s) = attr.read_scalar::<VarLenAscii>() {
            return Ok(s.as_str().to_string());
        }
        Ok(attr.read_scalar::<FixedAscii<64>>()?.as_str().to_string())
    }

    /// `(read_id, Raw group, channel_id group)` for every read in the file.
    fn reads(file: &File) -> hdf5::Result<Vec<(String, Group, Group)>> {
        let mut reads = Vec::new();
        let multi: Vec<String> = file
            .member_names()?
            .into_iter()
            .filter(|n| n.starts_with(READ_GROUP_PREFIX))
            .collect();

        if !multi.is_empty() {
            for name in multi {
                let read = file.group(&name)?;
                let raw = read.group("Raw")?;
                let channel = read.group("channel_id")?;
                reads.push((string_attr(&raw, "read_id")?, raw, channel));
            }
        } else if let Ok(single) = file.group(SINGLE_READ_GROUP) {
            let channel = file.group(SINGLE_READ_CHANNEL)?;
            for name in single.member_names()? {
                let raw = single.group(&name)?;
                reads.push((string_attr(&raw, "read_id")?, raw, channel.clone()));
            }
        }
        Ok(reads)
    }

    fn scaled_signal(raw: &Group, channel: &Group) -> hdf5::Result<Vec<f32>> {
        let samples = raw.dataset("Signal")?.read_raw::<i16>()?;
        let digitisation = channel.attr("digitisation")?.read_scalar::<f64>()?;
        let offset = channel.attr("offset")?.read_scalar::<f64>()?;
        let range = channel.attr("range")?.read_scalar::<f64>()?;
        let scale = range / digitisation;
        Ok(samples
            .into_iter()
            .map(|s| ((s as f64 + offset) * scale) as f32)
            .collect())
    }

    impl ReadSource for Hdf5Source {
        fn read_ids(&self, path: &Path) -> Result<Vec<String>> {
            let file = File::open(path).map_err(|e| fast5_error(path, e))?;
            let reads = reads(&file).map_err(|e| fast5_error(path, e))?;
            Ok(reads.into_iter().map(|(id, _, _)| id).collect())
        }

        fn raw_signal(&self, path: &Path, read_id: &str) -> Result<RawRead> {
            let file = File::open(path).map_err(|e| fast5_error(path, e))?;
            let reads = reads(&file).map_err(|e| fast5_error(path, e))?;
            let (_, raw, channel) = reads
                .into_iter()
                .find(|(id, _, _)| id == read_id)
                .ok_or_else(|| GruPruneError::Fast5 {
                    file: path.display().to_string(),
                    message: format!("no read {read_id}"),
                })?;
            let signal = scaled_signal(&raw, &channel).map_err(|e| fast5_error(path, e))?;
            Ok(RawRead {
                read_id: read_id.to_string(),
                signal,
            })
        }
    }
}

#[cfg(not(feature = "fast5"))]
impl ReadSource for Hdf5Source {
    fn read_ids(&self, _path: &Path) -> Result<Vec<String>> {
        Err(GruPruneError::Fast5Unavailable)
    }

    fn raw_signal(&self, _path: &Path, _read_id: &str) -> Result<RawRead> {
        Err(GruPruneError::Fast5Unavailable)
    }
}
