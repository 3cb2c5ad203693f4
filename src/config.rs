use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::TransportParams;
use crate::version::MAP_EXTENSION;

/// Port the game server's remote console listens on unless told otherwise
pub const DEFAULT_RCON_PORT: u16 = 27015;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Directory the editor compiles maps into
    pub watch_directory: PathBuf,
    /// Where versioned maps are moved; the watch directory when unset
    pub output_directory: Option<PathBuf>,
    /// Map file names to watch
    pub tracked_files: Vec<String>,
    /// Watch subdirectories too
    pub recursive: bool,
    /// Run the resource packer on each versioned map
    pub enable_packing: bool,
    pub pipeline: PipelineConfig,
    pub tools: ToolsConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stage_timeout_ms: u64,
    pub stream_output: bool,
    pub fail_on_optional_stage_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 300000,
            stream_output: false,
            fail_on_optional_stage_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory holding the tool binaries; PATH is searched when unset
    pub bin_dir: Option<PathBuf>,
    pub compressor: String,
    pub scp: String,
    pub ssh: String,
    pub python: String,
    pub packer_script: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            compressor: "bzip2".to_string(),
            scp: "pscp".to_string(),
            ssh: "plink".to_string(),
            python: "python".to_string(),
            packer_script: "QuickPack.py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub host_key_fingerprint: String,
    pub paths: RemotePathsConfig,
    pub rcon: RconConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            private_key_path: None,
            host_key_fingerprint: String::new(),
            paths: RemotePathsConfig::default(),
            rcon: RconConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotePathsConfig {
    /// Remote directory serving `.bsp.bz2` archives to clients
    pub fastdl_directory: String,
    /// Remote directory the game server loads `.bsp` files from
    pub maps_directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    pub enabled: bool,
    /// `host[:port]`; the remote address when unset
    pub address: Option<String>,
    pub password: String,
    pub timeout_ms: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: None,
            password: String::new(),
            timeout_ms: 10000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            watch_directory: PathBuf::from("."),
            output_directory: None,
            tracked_files: Vec::new(),
            recursive: false,
            enable_packing: false,
            pipeline: PipelineConfig::default(),
            tools: ToolsConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Watch settings given on the command line
#[derive(Debug, Clone, Default)]
pub struct WatchOverrides {
    pub watch_directory: Option<PathBuf>,
    pub output_directory: Option<PathBuf>,
    pub tracked_files: Vec<String>,
    pub enable_packing: bool,
    pub recursive: bool,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try project config: ./bspsync.yml
        let project_config = PathBuf::from(format!("{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/bspsync/bspsync.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Overlay remote credentials from environment variables.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key) {
                *target = value;
            }
        };

        set(&mut self.remote.address, "REMOTE_ADDR");
        set(&mut self.remote.username, "REMOTE_USER");
        set(&mut self.remote.host_key_fingerprint, "HOSTKEY");
        set(&mut self.remote.paths.fastdl_directory, "REMOTE_FASTDL_DIR");
        set(&mut self.remote.paths.maps_directory, "REMOTE_MAP_DIR");
        set(&mut self.remote.rcon.password, "RCON_PASS");

        if let Some(port) = lookup("REMOTE_PORT") {
            self.remote.port = port
                .trim()
                .parse()
                .context(format!("REMOTE_PORT '{}' is not a valid port", port))?;
        }
        if let Some(password) = lookup("REMOTE_PASS") {
            self.remote.password = Some(password);
        }
        if let Some(key) = lookup("PRIVKEY").filter(|k| !k.is_empty()) {
            self.remote.private_key_path = Some(PathBuf::from(key));
        }
        Ok(())
    }

    /// Apply command line watch settings on top of the file config
    pub fn apply_overrides(&mut self, overrides: &WatchOverrides) {
        if let Some(dir) = &overrides.watch_directory {
            self.watch_directory = dir.clone();
        }
        if let Some(dir) = &overrides.output_directory {
            self.output_directory = Some(dir.clone());
        }
        if !overrides.tracked_files.is_empty() {
            self.tracked_files = overrides.tracked_files.clone();
        }
        self.enable_packing |= overrides.enable_packing;
        self.recursive |= overrides.recursive;
    }

    /// Tracked names with the map extension enforced, duplicates removed
    pub fn tracked_map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.tracked_files.iter().map(|n| normalize_map_name(n)) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Directory versioned maps are written to
    pub fn output_dir(&self) -> &Path {
        self.output_directory.as_deref().unwrap_or(&self.watch_directory)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.stage_timeout_ms)
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.rcon.timeout_ms)
    }

    /// `host:port` of the remote console
    pub fn rcon_address(&self) -> String {
        let address = self
            .remote
            .rcon
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.remote.address);
        if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_RCON_PORT)
        }
    }

    pub fn transport_params(&self) -> TransportParams {
        TransportParams {
            host: self.remote.address.clone(),
            port: self.remote.port,
            username: self.remote.username.clone(),
            password: self.remote.password.clone(),
            private_key: self.remote.private_key_path.clone(),
            host_key: self.remote.host_key_fingerprint.clone(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tracked_files.is_empty() {
            eyre::bail!("no map files to watch; pass map names or set tracked_files");
        }
        if !self.watch_directory.is_dir() {
            eyre::bail!("watch_directory {} is not a directory", self.watch_directory.display());
        }
        if self.pipeline.stage_timeout_ms == 0 {
            eyre::bail!("pipeline.stage_timeout_ms must be > 0");
        }
        self.transport_params()
            .validate()
            .context("remote settings are incomplete")?;
        if self.remote.paths.fastdl_directory.is_empty() {
            eyre::bail!("remote.paths.fastdl_directory is required");
        }
        if self.remote.paths.maps_directory.is_empty() {
            eyre::bail!("remote.paths.maps_directory is required");
        }
        if self.remote.rcon.enabled {
            if self.rcon_address().starts_with(':') {
                eyre::bail!("remote.rcon.address or remote.address is required when rcon is enabled");
            }
            if self.remote.rcon.password.is_empty() {
                eyre::bail!("remote.rcon.password is required when rcon is enabled");
            }
            if self.remote.rcon.timeout_ms == 0 {
                eyre::bail!("remote.rcon.timeout_ms must be > 0");
            }
        }
        Ok(())
    }

    /// Copy with secrets blanked, for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.remote.password.is_some() {
            copy.remote.password = Some("********".to_string());
        }
        if !copy.remote.rcon.password.is_empty() {
            copy.remote.rcon.password = "********".to_string();
        }
        copy
    }
}

/// Append `.bsp` to a map name that lacks it
pub fn normalize_map_name(name: &str) -> String {
    let suffix = format!(".{}", MAP_EXTENSION);
    let has_suffix = name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(&suffix);
    if has_suffix {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}
