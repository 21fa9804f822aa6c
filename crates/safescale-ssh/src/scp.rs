//! SCP file transfer over the same [`crate::TunnelChain`] sessions `exec`
//! uses — the SCP sink protocol (`scp -t`) is spoken directly on the
//! channel rather than shelling out to the `scp` binary.

use crate::exec::{ExecOptions, SCP_RETRYABLE_EXIT_CODES};
use crate::tunnel::TunnelChain;
use crate::SshConfig;
use russh::ChannelMsg;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use std::time::Duration;
use tracing::debug;

/// Default permission bits for files pushed by `PushStringToFile` — world
/// readable isn't appropriate for anything handling a private key, so
/// callers writing sensitive content should pass `0o600`.
pub const DEFAULT_MODE: u32 = 0o644;

pub async fn copy_to_remote(config: &SshConfig, content: &[u8], remote_path: &str, mode: u32) -> Result<()> {
    let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);
    let remote_dir = remote_path.strip_suffix(file_name).unwrap_or("./");

    let handle = TunnelChain::open(config).await?;
    let mut channel = handle
        .session
        .channel_open_session()
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("channel open on {} failed: {e}", config.host)))?;

    channel
        .exec(true, format!("scp -qt {remote_dir}"))
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp sink on {} failed: {e}", config.host)))?;

    wait_for_ack(&mut channel, config, ExecOptions::default().timeout).await?;

    let header = format!("C0{:o} {} {}\n", mode, content.len(), file_name);
    channel
        .data(header.as_bytes())
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp header write to {} failed: {e}", config.host)))?;
    wait_for_ack(&mut channel, config, ExecOptions::default().timeout).await?;

    channel
        .data(content)
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp body write to {} failed: {e}", config.host)))?;
    channel
        .data(&[0u8][..])
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp trailer write to {} failed: {e}", config.host)))?;
    wait_for_ack(&mut channel, config, ExecOptions::default().timeout).await?;

    channel
        .eof()
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp eof on {} failed: {e}", config.host)))?;

    debug!(host = %config.host, remote_path, bytes = content.len(), "scp transfer complete");
    Ok(())
}

/// Downloads `remote_path` via the SCP source protocol (`scp -f`), the
/// mirror image of [`copy_to_remote`]'s sink protocol: send a ready byte,
/// read back the `Cmode size filename` header, ack it, read exactly `size`
/// bytes plus the trailing NUL, ack once more.
pub async fn copy_from_remote(config: &SshConfig, remote_path: &str) -> Result<Vec<u8>> {
    let handle = TunnelChain::open(config).await?;
    let mut channel = handle
        .session
        .channel_open_session()
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("channel open on {} failed: {e}", config.host)))?;

    channel
        .exec(true, format!("scp -qf {remote_path}"))
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp source on {} failed: {e}", config.host)))?;

    send_ack(&mut channel, config).await?;
    let header = read_line(&mut channel, config).await?;
    let size = parse_scp_header(&header, config)?;
    send_ack(&mut channel, config).await?;

    let mut data = Vec::with_capacity(size);
    let timeout = ExecOptions::default().timeout;
    let deadline = tokio::time::Instant::now() + timeout;
    while data.len() < size + 1 {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SafeScaleError::timeout(format!("scp body from {} timed out", config.host)));
        }
        match tokio::time::timeout(remaining, channel.wait())
            .await
            .map_err(|_| SafeScaleError::timeout(format!("scp body from {} timed out", config.host)))?
        {
            Some(ChannelMsg::Data { data: chunk }) => data.extend_from_slice(&chunk),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
            Some(_) => continue,
        }
    }
    data.pop(); // trailing NUL terminator
    send_ack(&mut channel, config).await?;

    debug!(host = %config.host, remote_path, bytes = data.len(), "scp download complete");
    Ok(data)
}

async fn send_ack(channel: &mut russh::Channel<russh::client::Msg>, config: &SshConfig) -> Result<()> {
    channel
        .data(&[0u8][..])
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("scp ack write to {} failed: {e}", config.host)))
}

async fn read_line(channel: &mut russh::Channel<russh::client::Msg>, config: &SshConfig) -> Result<String> {
    let timeout = ExecOptions::default().timeout;
    let deadline = tokio::time::Instant::now() + timeout;
    let mut line = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SafeScaleError::timeout(format!("scp header from {} timed out", config.host)));
        }
        match tokio::time::timeout(remaining, channel.wait())
            .await
            .map_err(|_| SafeScaleError::timeout(format!("scp header from {} timed out", config.host)))?
        {
            Some(ChannelMsg::Data { data }) => {
                for byte in data {
                    if byte == b'\n' {
                        return Ok(String::from_utf8_lossy(&line).into_owned());
                    }
                    line.push(byte);
                }
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                return Err(SafeScaleError::not_available(format!("scp source on {} closed before header", config.host)));
            }
            Some(_) => continue,
        }
    }
}

/// Parses the `Cmode size filename` header SCP's source side sends.
fn parse_scp_header(header: &str, config: &SshConfig) -> Result<usize> {
    let mut parts = header.trim_start_matches(['C', 'D']).split_whitespace();
    let _mode = parts.next();
    let size = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| SafeScaleError::new(ErrorKind::Execution, format!("malformed scp header from {}: {header}", config.host)))?;
    Ok(size)
}

/// Reads a single SCP protocol ack byte (`0x00` success, nonzero an error
/// with a trailing message line). `SCP_RETRYABLE_EXIT_CODES` is what the
/// caller's retry loop should check the wrapped code against.
async fn wait_for_ack(channel: &mut russh::Channel<russh::client::Msg>, config: &SshConfig, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SafeScaleError::timeout(format!("scp ack from {} timed out", config.host)));
        }
        let msg = tokio::time::timeout(remaining, channel.wait())
            .await
            .map_err(|_| SafeScaleError::timeout(format!("scp ack from {} timed out", config.host)))?;
        match msg {
            Some(ChannelMsg::Data { data }) if !data.is_empty() => {
                let code = data[0] as i32;
                if code == 0 {
                    return Ok(());
                }
                let message = String::from_utf8_lossy(&data[1..]).into_owned();
                return Err(SafeScaleError::new(
                    ErrorKind::Execution,
                    format!("scp sink on {} rejected transfer (code {code}): {message}"),
                ));
            }
            Some(_) => continue,
            None => return Err(SafeScaleError::not_available(format!("scp sink on {} closed before ack", config.host))),
        }
    }
}
