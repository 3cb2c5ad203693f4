//! Remote console (Source RCON) support.
//!
//! The pipeline only ever needs one thing from the game server: switch to the
//! freshly deployed map. [`RemoteConsole`] is that seam; [`RconConsole`]
//! implements it over the wire protocol, [`MockConsole`] in memory.

mod client;
mod codec;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BspsyncError, Result};

pub use client::RconClient;
pub use codec::{RconCodec, RconPacket};

/// Something that can switch a game server to another map
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    /// Connect, authenticate, issue `changelevel <map_name>` and disconnect
    async fn change_level(&self, map_name: &str) -> Result<()>;
}

/// [`RemoteConsole`] over Source RCON
#[derive(Debug, Clone)]
pub struct RconConsole {
    address: String,
    password: String,
    timeout: Duration,
}

impl RconConsole {
    pub fn new(address: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RemoteConsole for RconConsole {
    async fn change_level(&self, map_name: &str) -> Result<()> {
        let command = changelevel_command(map_name)?;

        let mut client = RconClient::connect(&self.address, self.timeout).await?;
        client.authenticate(&self.password).await?;
        let output = client.execute(&command).await?;
        if !output.trim().is_empty() {
            log::debug!("{}: {}", command, output.trim());
        }
        if let Err(e) = client.close().await {
            log::debug!("Ignoring remote console close error: {}", e);
        }
        Ok(())
    }
}

/// `changelevel <map>`, refusing names that would smuggle in more commands
pub fn changelevel_command(map_name: &str) -> Result<String> {
    let valid = !map_name.is_empty()
        && map_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(BspsyncError::Rcon(format!("refusing to send map name '{}'", map_name)));
    }
    Ok(format!("changelevel {}", map_name))
}

/// In-memory console that records requested maps
#[derive(Debug, Default)]
pub struct MockConsole {
    failure: Option<String>,
    levels: Mutex<Vec<String>>,
}

impl MockConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// A console whose every call fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            levels: Mutex::new(Vec::new()),
        }
    }

    /// Maps requested so far, including failed attempts
    pub fn levels(&self) -> Vec<String> {
        self.levels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RemoteConsole for MockConsole {
    async fn change_level(&self, map_name: &str) -> Result<()> {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(map_name.to_string());
        match &self.failure {
            Some(reason) => Err(BspsyncError::Rcon(reason.clone())),
            None => Ok(()),
        }
    }
}
