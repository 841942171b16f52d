use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use rayon::prelude::*;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::AppError;

lazy_static! {
    /// Extensions treated as catalogable imagery/video.
    static ref MEDIA_EXTENSIONS: HashSet<&'static str> = [
        "jpg", "jpeg", "png", "tif", "tiff", "dng", "raw", "mp4", "mov", "avi",
    ]
    .iter()
    .copied()
    .collect();
}

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Flattens a directory tree into its media leaf files, sorted for
/// deterministic chunking.
pub fn collect_leaf_files(root: &Path) -> Result<Vec<PathBuf>, AppError> {
    log::debug!("Flattening file set under {:?}", root);
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() && is_media_file(entry.path()) {
            log::trace!("Discovered media file: {:?}", entry.path());
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    log::info!("Found {} media files under {:?}", files.len(), root);
    Ok(files)
}

/// Splits files into archive-sized chunks. One slot per archive is reserved
/// so archives stay safely under the backend's per-archive ceiling, and the
/// remainder is balanced so no archive is much fuller than another.
pub fn chunk_files(files: Vec<PathBuf>, max_per_archive: usize) -> Vec<Vec<PathBuf>> {
    if files.is_empty() {
        return Vec::new();
    }
    let effective_max = max_per_archive.saturating_sub(1).max(1);
    let archive_count = files.len().div_ceil(effective_max);
    let per_archive = files.len().div_ceil(archive_count);

    let mut chunks = Vec::with_capacity(archive_count);
    let mut remaining = files;
    while !remaining.is_empty() {
        let take = per_archive.min(remaining.len());
        let rest = remaining.split_off(take);
        chunks.push(remaining);
        remaining = rest;
    }
    chunks
}

/// One staged archive awaiting transfer. The temp file is removed when this
/// is dropped, so a failed pipeline cleans up after itself.
pub struct BuiltArchive {
    pub file: NamedTempFile,
    pub entry_count: usize,
}

impl BuiltArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// The archive entry name for one file: the top-level folder name followed
/// by the file's path relative to that folder, always with `/` separators.
pub fn entry_name(top_folder: &Path, file: &Path) -> Result<String, AppError> {
    let folder_name = top_folder
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Generic(format!("unusable top folder {:?}", top_folder)))?;
    let relative = file.strip_prefix(top_folder).map_err(|_| {
        AppError::Generic(format!("{:?} is not under top folder {:?}", file, top_folder))
    })?;
    let mut name = folder_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(name)
}

fn build_one_archive(top_folder: &Path, chunk: &[PathBuf]) -> Result<BuiltArchive, AppError> {
    let staged = NamedTempFile::new()?;
    {
        let mut builder = tar::Builder::new(staged.as_file());
        for file in chunk {
            let name = entry_name(top_folder, file)?;
            log::trace!("Adding archive entry {}", name);
            builder.append_path_with_name(file, name)?;
        }
        builder.finish()?;
    }
    Ok(BuiltArchive {
        file: staged,
        entry_count: chunk.len(),
    })
}

/// Builds every chunk into a tar archive staged in the temp directory.
/// Archive building is CPU/disk bound, so chunks are built in parallel; the
/// transfers that follow stay sequential.
pub fn build_archives(
    top_folder: &Path,
    chunks: &[Vec<PathBuf>],
) -> Result<Vec<BuiltArchive>, AppError> {
    log::info!("Building {} archive(s) for {:?}", chunks.len(), top_folder);
    chunks
        .par_iter()
        .map(|chunk| build_one_archive(top_folder, chunk))
        .collect()
}
