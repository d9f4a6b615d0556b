//! ZIP packaging of downloaded files
//!
//! The packager bundles whatever subset of a batch actually landed on disk.
//! Missing paths are expected (failed tasks leave no file) and are skipped
//! with a warning instead of failing the archive. Entries are named by base
//! name, so the archive is flat; sources are never modified or removed.

use std::collections::HashSet;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::error::{ArchiveSkip, Error, Result};

/// What went into an archive
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Entry names, in archive order
    pub entries: Vec<String>,
    /// Requested paths that were left out
    pub skipped: Vec<ArchiveSkip>,
}

/// An archive built in memory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedArchive {
    /// The ZIP bytes
    pub bytes: Vec<u8>,
    /// Entry names, in archive order
    pub entries: Vec<String>,
    /// Requested paths that were left out
    pub skipped: Vec<ArchiveSkip>,
}

impl PackedArchive {
    /// Whether every requested path made it in
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Builds flat ZIP archives from file paths
#[derive(Clone, Copy, Debug)]
pub struct ArchivePackager {
    compression: CompressionMethod,
}

impl Default for ArchivePackager {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ArchivePackager {
    /// Packager using Deflate compression
    pub fn new() -> Self {
        Self::default()
    }

    /// Packager storing entries uncompressed (media is already compressed)
    pub fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }

    /// Pack `paths` into an in-memory ZIP
    pub fn pack<P: AsRef<Path>>(&self, paths: &[P]) -> Result<PackedArchive> {
        let (cursor, report) = self.pack_to_writer(paths, Cursor::new(Vec::new()))?;
        Ok(PackedArchive {
            bytes: cursor.into_inner(),
            entries: report.entries,
            skipped: report.skipped,
        })
    }

    /// Pack `paths` into `writer`, returning the writer once the archive is finished.
    ///
    /// Files are streamed in the given order. A path that does not exist,
    /// is not a regular file, cannot be opened, or repeats an earlier base
    /// name is skipped and recorded in the report.
    pub fn pack_to_writer<P, W>(&self, paths: &[P], writer: W) -> Result<(W, ArchiveReport)>
    where
        P: AsRef<Path>,
        W: Write + Seek,
    {
        let mut zip = zip::ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(self.compression);

        let mut report = ArchiveReport::default();
        let mut names: HashSet<String> = HashSet::new();

        for path in paths {
            let path = path.as_ref();
            let (mut file, name) = match open_source(path, &names) {
                Ok(source) => source,
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "skipping file");
                    report.skipped.push(ArchiveSkip {
                        path: path.to_path_buf(),
                        reason,
                    });
                    continue;
                }
            };

            zip.start_file(name.clone(), options)?;
            let written = std::io::copy(&mut file, &mut zip)?;
            debug!(entry = %name, bytes = written, "added archive entry");
            names.insert(name.clone());
            report.entries.push(name);
        }

        let writer = zip.finish()?;
        info!(
            entries = report.entries.len(),
            skipped = report.skipped.len(),
            "archive packed"
        );
        Ok((writer, report))
    }

    /// Pack `paths` into a ZIP file at `dest`, removing it again on failure
    pub fn pack_to_file<P: AsRef<Path>>(
        &self,
        paths: &[P],
        dest: &Path,
    ) -> Result<ArchiveReport> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(dest)?;
        match self.pack_to_writer(paths, std::io::BufWriter::new(file)) {
            Ok((mut writer, report)) => {
                writer.flush()?;
                Ok(report)
            }
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(dest) {
                    debug!(
                        path = %dest.display(),
                        error = %remove_err,
                        "failed to remove incomplete archive"
                    );
                }
                Err(e)
            }
        }
    }

    /// [`pack`](Self::pack) on the blocking thread pool
    pub async fn pack_async(&self, paths: Vec<PathBuf>) -> Result<PackedArchive> {
        let packager = *self;
        tokio::task::spawn_blocking(move || packager.pack(&paths))
            .await
            .map_err(|e| Error::Other(format!("archive task failed: {e}")))?
    }
}

/// Open a source file and derive its entry name, or say why it is skipped
fn open_source(
    path: &Path,
    taken: &HashSet<String>,
) -> std::result::Result<(std::fs::File, String), String> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => "file does not exist".to_string(),
        _ => format!("cannot stat file: {e}"),
    })?;
    if !metadata.is_file() {
        return Err("not a regular file".to_string());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| "path has no file name".to_string())?;
    if taken.contains(&name) {
        return Err(format!("duplicate entry name {name}"));
    }

    let file = std::fs::File::open(path).map_err(|e| format!("cannot open file: {e}"))?;
    Ok((file, name))
}
