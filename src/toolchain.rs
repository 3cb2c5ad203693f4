//! External tool locations and the startup dependency check.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, ToolsConfig};
use crate::error::{BspsyncError, Result};
use crate::executor::CommandSpec;

/// Resolved locations of every external program the pipeline runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Working directory for tool invocations
    pub bin_dir: Option<PathBuf>,
    pub compressor: PathBuf,
    pub scp: PathBuf,
    pub ssh: PathBuf,
    pub python: PathBuf,
    pub packer_script: PathBuf,
}

impl Toolchain {
    /// Resolve tool names against the configured bin directory
    pub fn from_config(tools: &ToolsConfig) -> Self {
        let bin_dir = tools.bin_dir.clone();
        let in_bin = |name: &str| match &bin_dir {
            Some(dir) if is_bare_name(name) => dir.join(name),
            _ => PathBuf::from(name),
        };

        Self {
            compressor: in_bin(&tools.compressor),
            scp: in_bin(&tools.scp),
            ssh: in_bin(&tools.ssh),
            // the interpreter comes from PATH, the script lives next to the tools
            python: PathBuf::from(&tools.python),
            packer_script: in_bin(&tools.packer_script),
            bin_dir,
        }
    }

    /// `<compressor> -z9 -k <file>`: best compression, keep the input
    pub fn compress(&self, file: &Path, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.compressor)
            .args(["-z9", "-k"])
            .arg(file)
            .current_dir_opt(self.bin_dir.as_deref())
            .timeout(timeout)
    }

    /// `<python> <packer_script> <file>`
    pub fn pack(&self, file: &Path, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.python)
            .arg(&self.packer_script)
            .arg(file)
            .current_dir_opt(self.bin_dir.as_deref())
            .timeout(timeout)
    }

    /// Programs the pipeline needs, labelled for error messages
    fn required(&self, packing: bool) -> Vec<(&'static str, &Path)> {
        let mut required = vec![
            ("compressor", self.compressor.as_path()),
            ("secure copy", self.scp.as_path()),
            ("remote shell", self.ssh.as_path()),
        ];
        if packing {
            required.push(("python", self.python.as_path()));
            required.push(("packer script", self.packer_script.as_path()));
        }
        required
    }
}

/// Check that every tool the configuration needs exists.
///
/// Reports all missing tools at once.
pub fn check_dependencies(config: &Config, toolchain: &Toolchain) -> Result<()> {
    let search_path = std::env::var_os("PATH");
    let search_dirs: Vec<PathBuf> = search_path
        .as_deref()
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default();

    let missing: Vec<String> = toolchain
        .required(config.enable_packing)
        .into_iter()
        .filter(|(_, path)| locate(path, &search_dirs).is_none())
        .map(|(role, path)| format!("{} '{}'", role, path.display()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BspsyncError::MissingDependency(missing.join(", ")))
    }
}

/// Find a program: paths with a directory part are checked directly, bare
/// names are looked up in `search_dirs`.
pub fn locate(program: &Path, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    search_dirs.iter().find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

fn is_bare_name(name: &str) -> bool {
    Path::new(name).components().count() == 1 && !Path::new(name).is_absolute()
}
