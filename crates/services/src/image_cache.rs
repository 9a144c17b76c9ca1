//! Single-slot cache for the most recently generated image.
//!
//! Only the latest image is kept, at a fixed path inside the config
//! directory. Exports copy it out atomically: the bytes go to a temp file
//! beside the destination, which is then renamed into place.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CACHE_FILE_NAME: &str = "temp.png";

pub struct ImageCache {
    path: PathBuf,
}

/// A fully written copy that has not been moved to its destination yet.
///
/// Dropping it removes the temp file and leaves the destination alone.
pub struct StagedExport {
    file: NamedTempFile,
    dest: PathBuf,
}

impl StagedExport {
    pub fn temp_path(&self) -> &Path {
        self.file.path()
    }

    pub fn commit(self) -> Result<PathBuf> {
        self.file
            .persist(&self.dest)
            .map_err(|e| anyhow!("failed to save image: {}", e.error))?;
        Ok(self.dest)
    }
}

impl ImageCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CACHE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the cached image.
    pub fn store(&self, bytes: &[u8]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("cache path has no parent: {:?}", self.path))?;
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("failed to read {:?}", self.path))
    }

    /// Write a complete copy of the cached image next to `dest`.
    pub fn stage(&self, dest: &Path) -> Result<StagedExport> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).context("failed to create directory")?;

        let mut src = fs::File::open(&self.path).context("failed to open source file")?;
        let mut file = NamedTempFile::new_in(&dir).context("failed to create temporary file")?;
        io::copy(&mut src, &mut file).context("failed to copy image data")?;
        file.as_file().sync_all()?;

        Ok(StagedExport {
            file,
            dest: dest.to_path_buf(),
        })
    }

    /// Copy the cached image to `dest` atomically.
    pub fn export(&self, dest: &Path) -> Result<PathBuf> {
        self.stage(dest)?.commit()
    }

    /// Remove the cache file. Missing files are fine.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append `.png` unless the path already ends with it (case-insensitive).
pub fn ensure_png_extension(path: &Path) -> PathBuf {
    let is_png = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if is_png {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".png");
    PathBuf::from(name)
}
