//! Source archive extraction
//!
//! Unpacks `.tar.gz`, `.tgz`, `.tar.xz`, `.txz` and `.tar` artifacts.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use xz2::read::XzDecoder;

use crate::error::BuildError;

/// Supported archive layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.split(['?', '#']).next().unwrap_or(name);
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect the format from leading bytes
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::TarGz
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::TarXz
        } else {
            Self::Tar
        }
    }

    /// Canonical file extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::Tar => "tar",
        }
    }
}

fn extract_error(archive: &Path, error: impl ToString) -> BuildError {
    BuildError::Extract {
        archive: archive.to_path_buf(),
        error: error.to_string(),
    }
}

/// Unpack `archive` into `dest` and return the source root
///
/// The format comes from the file name, or from the content when the name
/// says nothing. When the archive holds exactly one top-level directory,
/// that directory is the source root.
///
/// Blocking; call from the blocking pool in async contexts.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, BuildError> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let format = match ArchiveFormat::from_name(name) {
        Some(format) => format,
        None => {
            let mut magic = [0u8; 6];
            let mut file = File::open(archive).map_err(|e| extract_error(archive, e))?;
            let read = file.read(&mut magic).map_err(|e| extract_error(archive, e))?;
            ArchiveFormat::from_magic_bytes(&magic[..read])
        }
    };

    fs::create_dir_all(dest).map_err(|e| extract_error(archive, e))?;

    let file = BufReader::new(File::open(archive).map_err(|e| extract_error(archive, e))?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::Tar => Box::new(file),
    };

    let mut tarball = tar::Archive::new(reader);
    tarball.set_preserve_permissions(true);
    tarball
        .unpack(dest)
        .map_err(|e| extract_error(archive, e))?;

    tracing::debug!("Extracted {} to {}", archive.display(), dest.display());
    source_root(dest).map_err(|e| extract_error(archive, e))
}

/// The single top-level directory of `dir`, or `dir` itself
pub fn source_root(dir: &Path) -> std::io::Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();

    if entries.len() == 1 && entries[0].file_type().is_ok_and(|t| t.is_dir()) {
        return Ok(entries[0].path());
    }
    Ok(dir.to_path_buf())
}
