//! Map version resolution.
//!
//! Versioned maps are named `<base>_dev<N>.bsp`. The next version for a base
//! name is one more than the highest `N` already present in the output
//! directory.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};

use crate::error::{BspsyncError, Result};

/// Extension of compiled map files.
pub const MAP_EXTENSION: &str = "bsp";

/// Extension appended by the compressor.
pub const ARCHIVE_EXTENSION: &str = "bz2";

/// The derived artifact for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedOutput {
    /// Asset name without version suffix or extension
    pub base_name: String,
    /// Assigned version, always >= 1
    pub version: u32,
    /// Absolute location of the versioned `.bsp`
    pub output_path: PathBuf,
}

impl VersionedOutput {
    /// Build the output for `base_name` at `version` inside `output_dir`.
    pub fn new(base_name: impl Into<String>, version: u32, output_dir: &Path) -> Self {
        let base_name = base_name.into();
        let file_name = format!("{}_dev{}.{}", base_name, version, MAP_EXTENSION);
        Self {
            output_path: output_dir.join(file_name),
            base_name,
            version,
        }
    }

    /// Map name as the game server knows it, e.g. `fy_test_dev4`.
    pub fn map_name(&self) -> String {
        format!("{}_dev{}", self.base_name, self.version)
    }

    /// File name of the versioned map, e.g. `fy_test_dev4.bsp`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.map_name(), MAP_EXTENSION)
    }

    /// File name of the compressed archive, e.g. `fy_test_dev4.bsp.bz2`.
    pub fn archive_name(&self) -> String {
        format!("{}.{}", self.file_name(), ARCHIVE_EXTENSION)
    }

    /// Path the compressor writes next to the versioned map.
    pub fn archive_path(&self) -> PathBuf {
        self.output_path.with_file_name(self.archive_name())
    }
}

/// Computes the next unused version for a base name.
#[derive(Debug, Clone, Default)]
pub struct VersionResolver;

impl VersionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Scan `directory` and return `max(N) + 1` over `<base>_dev<N>.bsp`,
    /// or 1 when nothing matches.
    pub async fn resolve(&self, base_name: &str, directory: &Path) -> Result<u32> {
        let read_failed = |source| BspsyncError::DirectoryReadFailed {
            path: directory.to_path_buf(),
            source,
        };

        let mut entries = tokio::fs::read_dir(directory).await.map_err(read_failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        next_version(base_name, names.iter().map(String::as_str))
    }
}

/// Pure form of [`VersionResolver::resolve`] over a list of file names.
pub fn next_version<'a>(base_name: &str, names: impl IntoIterator<Item = &'a str>) -> Result<u32> {
    let pattern = version_pattern(base_name)?;
    let prefix = base_name.to_lowercase();

    let highest = names
        .into_iter()
        .filter(|name| name.to_lowercase().starts_with(&prefix))
        .filter_map(|name| pattern.captures(name))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .max();

    match highest {
        None => Ok(1),
        Some(n) => n.checked_add(1).ok_or_else(|| {
            BspsyncError::VersionResolutionFailed(format!("version counter for '{}' overflowed", base_name))
        }),
    }
}

fn version_pattern(base_name: &str) -> Result<Regex> {
    RegexBuilder::new(&format!(
        r"^{}_dev(\d+)\.{}$",
        regex::escape(base_name),
        MAP_EXTENSION
    ))
    .case_insensitive(true)
    .build()
    .map_err(|e| BspsyncError::VersionResolutionFailed(format!("bad base name '{}': {}", base_name, e)))
}
