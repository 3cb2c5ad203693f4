//! Secure-copy and remote-exec command builders.
//!
//! Builds argument vectors for PuTTY-style `pscp` and `plink`. Values coming
//! from configuration are validated before they reach an argument list, and
//! the one string that is interpreted by the remote shell (the extract
//! command) is assembled from single-quoted paths.

use std::path::{Path, PathBuf};

use crate::error::{BspsyncError, Result};
use crate::executor::CommandSpec;
use crate::version::VersionedOutput;

/// Connection parameters shared by copy and remote-exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password, passed with `-pw` when set
    pub password: Option<String>,
    /// Private key file, passed with `-i` when set
    pub private_key: Option<PathBuf>,
    /// Host key fingerprint; required so no interactive trust prompt happens
    pub host_key: String,
}

impl TransportParams {
    /// Check every field that ends up on a command line
    pub fn validate(&self) -> Result<()> {
        check_token("host", &self.host)?;
        check_token("username", &self.username)?;
        if self.username.contains(['@', ':']) {
            return Err(invalid(format!("username '{}' must not contain '@' or ':'", self.username)));
        }
        if self.host.contains('@') {
            return Err(invalid(format!("host '{}' must not contain '@'", self.host)));
        }
        if self.port == 0 {
            return Err(invalid("port must be non-zero".to_string()));
        }
        if self.host_key.trim().is_empty() {
            return Err(invalid("host key fingerprint is required".to_string()));
        }
        if has_control(&self.host_key) {
            return Err(invalid("host key fingerprint contains control characters".to_string()));
        }
        if let Some(password) = &self.password
            && has_control(password)
        {
            return Err(invalid("password contains control characters".to_string()));
        }
        Ok(())
    }

    /// `user@host`
    pub fn login(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Port, host key and credentials, in the order both tools accept
    fn auth_args(&self) -> Vec<String> {
        let mut args = vec![
            "-P".to_string(),
            self.port.to_string(),
            "-hostkey".to_string(),
            self.host_key.clone(),
        ];
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            args.push("-pw".to_string());
            args.push(password.to_string());
        }
        if let Some(key) = &self.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }
}

/// Builder for uploading one local file into a remote directory
#[derive(Debug, Clone)]
pub struct SecureCopy<'a> {
    params: &'a TransportParams,
    source: PathBuf,
    remote_dir: String,
}

impl<'a> SecureCopy<'a> {
    pub fn new(params: &'a TransportParams, source: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        Self {
            params,
            source: source.into(),
            remote_dir: remote_dir.into(),
        }
    }

    /// Produce the validated command for `program`
    pub fn build(&self, program: &Path) -> Result<CommandSpec> {
        self.params.validate()?;
        check_remote_path("remote directory", &self.remote_dir)?;

        let mut args = vec!["-batch".to_string()];
        let mut auth = self.params.auth_args();
        // -q goes after the port, matching pscp's documented usage
        auth.insert(2, "-q".to_string());
        args.extend(auth);

        Ok(CommandSpec::new(program)
            .args(args)
            .arg(&self.source)
            .arg(format!("{}:{}", self.params.login(), self.remote_dir)))
    }
}

/// Builder for running one command on the remote host
#[derive(Debug, Clone)]
pub struct RemoteExec<'a> {
    params: &'a TransportParams,
    command: String,
}

impl<'a> RemoteExec<'a> {
    pub fn new(params: &'a TransportParams, command: impl Into<String>) -> Self {
        Self {
            params,
            command: command.into(),
        }
    }

    /// Produce the validated command for `program`
    pub fn build(&self, program: &Path) -> Result<CommandSpec> {
        self.params.validate()?;
        if self.command.trim().is_empty() {
            return Err(invalid("remote command is empty".to_string()));
        }

        let mut args = vec!["-ssh".to_string(), "-batch".to_string()];
        args.extend(self.params.auth_args());
        args.push(self.params.login());
        args.push(self.command.clone());

        Ok(CommandSpec::new(program).args(args))
    }
}

/// Remote shell command that decompresses the uploaded archive straight into
/// the live map directory.
pub fn remote_extract_command(
    fastdl_dir: &str,
    maps_dir: &str,
    output: &VersionedOutput,
) -> Result<String> {
    check_remote_path("fast-download directory", fastdl_dir)?;
    check_remote_path("map directory", maps_dir)?;

    let archive = join_remote(fastdl_dir, &output.archive_name());
    let map = join_remote(maps_dir, &output.file_name());
    Ok(format!(
        "bunzip2 -k -c {} > {}",
        shell_quote(&archive),
        shell_quote(&map)
    ))
}

/// POSIX single-quote a string for the remote shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn join_remote(dir: &str, name: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", trimmed, name)
    }
}

fn check_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    if value.starts_with('-') {
        return Err(invalid(format!("{} '{}' must not start with '-'", field, value)));
    }
    if value.chars().any(char::is_whitespace) || has_control(value) {
        return Err(invalid(format!("{} '{}' must not contain whitespace", field, value)));
    }
    Ok(())
}

fn check_remote_path(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    if has_control(value) {
        return Err(invalid(format!("{} contains control characters", field)));
    }
    Ok(())
}

fn has_control(value: &str) -> bool {
    value.chars().any(char::is_control)
}

fn invalid(message: String) -> BspsyncError {
    BspsyncError::InvalidTransport(message)
}
