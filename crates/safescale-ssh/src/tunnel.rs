//! Nested SSH tunnel chains built entirely with `russh` client sessions —
//! no shelling out to the `ssh` binary (REDESIGN FLAGS: "the nested
//! port-forward chain moves in-process").
//!
//! A [`SshConfig`] with a `gateway` forms a chain: connect to the outermost
//! gateway first, open a `direct-tcpip` channel to the next hop's address
//! over that session, wrap the channel as a byte stream, and start a fresh
//! SSH client session on top of it. Repeating inward lands a connected
//! session pointed at the actual target host.

use crate::SshConfig;
use russh::client::{self, Handle};
use russh::ChannelStream;
use russh_keys::key;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use std::sync::Arc;
use tracing::debug;

pub struct TunnelHandle {
    pub(crate) session: Handle<ClientHandler>,
}

pub struct TunnelChain;

impl TunnelChain {
    /// Opens a connected, authenticated session at the target named by
    /// `config`, hopping through every `config.gateway` link along the way.
    pub async fn open(config: &SshConfig) -> Result<TunnelHandle> {
        match &config.gateway {
            None => Self::connect_direct(config).await,
            Some(gateway) => {
                let outer = Box::pin(Self::open(gateway)).await?;
                debug!(host = %config.host, via = %gateway.host, "opening nested hop");
                let channel = outer
                    .session
                    .channel_open_direct_tcpip(config.host.clone(), config.port as u32, "127.0.0.1", 0)
                    .await
                    .map_err(|e| SafeScaleError::not_available(format!("direct-tcpip to {} via {} failed: {e}", config.host, gateway.host)))?;
                let stream = channel.into_stream();
                Self::connect_over_stream(config, stream).await
            }
        }
    }

    async fn connect_direct(config: &SshConfig) -> Result<TunnelHandle> {
        let addr = (config.host.as_str(), config.port);
        let session = client::connect(Arc::new(client::Config::default()), addr, ClientHandler)
            .await
            .map_err(|e| SafeScaleError::new(ErrorKind::NotAvailable, format!("ssh connect to {}:{} failed: {e}", config.host, config.port)))?;
        Self::authenticate(session, config).await
    }

    async fn connect_over_stream(config: &SshConfig, stream: ChannelStream) -> Result<TunnelHandle> {
        let session = client::connect_stream(Arc::new(client::Config::default()), stream, ClientHandler)
            .await
            .map_err(|e| SafeScaleError::new(ErrorKind::NotAvailable, format!("ssh handshake over tunnel to {} failed: {e}", config.host)))?;
        Self::authenticate(session, config).await
    }

    async fn authenticate(mut session: Handle<ClientHandler>, config: &SshConfig) -> Result<TunnelHandle> {
        let key_pair = russh_keys::decode_secret_key(&config.private_key_pem, None)
            .map_err(|e| SafeScaleError::new(ErrorKind::NotAuthenticated, format!("decoding private key for {} failed: {e}", config.host)))?;
        let ok = session
            .authenticate_publickey(&config.user, Arc::new(key_pair))
            .await
            .map_err(|e| SafeScaleError::new(ErrorKind::NotAuthenticated, format!("ssh auth to {} failed: {e}", config.host)))?;
        if !ok {
            return Err(SafeScaleError::new(ErrorKind::NotAuthenticated, format!("ssh key rejected by {}", config.host)));
        }
        Ok(TunnelHandle { session })
    }
}

/// Accepts every host key without pinning — host key verification is a
/// deployment concern the core delegates to network-level trust (the
/// subnet/VPC boundary), matching the spec's Non-goals around key
/// management (§1).
pub struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &key::PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}
