//! RCON TCP client

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use super::codec::{RconCodec, RconPacket, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE};
use crate::error::{BspsyncError, Result};

/// An authenticated-or-not connection to a game server's remote console.
pub struct RconClient {
    framed: Framed<TcpStream, RconCodec>,
    next_id: i32,
    timeout: Duration,
}

impl RconClient {
    /// Open a TCP connection to `address` (`host:port`)
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| rcon_err(format!("connect to {} timed out after {}ms", address, timeout.as_millis())))?
            .map_err(|e| rcon_err(format!("failed to connect to {}: {}", address, e)))?;

        log::debug!("Connected to remote console at {}", address);
        Ok(Self {
            framed: Framed::new(stream, RconCodec::new()),
            next_id: 1,
            timeout,
        })
    }

    /// Log in with the console password
    pub async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.next_id();
        self.send(RconPacket::auth(id, password)).await?;

        loop {
            let Some(packet) = self.recv().await? else {
                return Err(rcon_err("connection closed during authentication".to_string()));
            };
            // Servers send an empty RESPONSE_VALUE ahead of the auth reply
            if packet.packet_type != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(rcon_err("authentication rejected".to_string()));
            }
            if packet.id == id {
                return Ok(());
            }
        }
    }

    /// Run a console command and return its output
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        let id = self.next_id();
        self.send(RconPacket::exec(id, command)).await?;

        loop {
            match self.recv().await? {
                Some(packet) if packet.id == id && packet.packet_type == SERVERDATA_RESPONSE_VALUE => {
                    return Ok(packet.body);
                }
                Some(_) => continue,
                None => {
                    // changelevel can drop the link before replying; the command was delivered
                    log::debug!("Remote console closed the connection after '{}'", command);
                    return Ok(String::new());
                }
            }
        }
    }

    /// Flush and close the connection
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<RconPacket>::close(&mut self.framed)
            .await
            .map_err(|e| rcon_err(format!("failed to close connection: {}", e)))
    }

    fn next_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn send(&mut self, packet: RconPacket) -> Result<()> {
        tokio::time::timeout(self.timeout, self.framed.send(packet))
            .await
            .map_err(|_| rcon_err("send timed out".to_string()))?
            .map_err(|e| rcon_err(format!("send failed: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<RconPacket>> {
        let next = tokio::time::timeout(self.timeout, self.framed.next())
            .await
            .map_err(|_| rcon_err(format!("no reply within {}ms", self.timeout.as_millis())))?;

        match next {
            None => Ok(None),
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(e)) => Err(rcon_err(format!("receive failed: {}", e))),
        }
    }
}

fn rcon_err(message: String) -> BspsyncError {
    BspsyncError::Rcon(message)
}
