//! Indirection seam over `exec`/`scp`'s free functions (spec §4.6's `run`,
//! sudo variant, `copy`, wait-ready), so `safescale-host` can depend on
//! "something that talks SSH" without every other crate's test suite
//! needing a live SSH server reachable at the synthetic IPs the mock
//! provider hands back — the same shape `safescale-provider::Provider`
//! gives the host pipeline for the cloud side.

use crate::{ExecOptions, ExecOutcome, SshConfig};
use async_trait::async_trait;
use safescale_error::Result;
use std::fmt::Debug;
use std::time::Duration;

#[async_trait]
pub trait SshTransport: Send + Sync + Debug {
    async fn run(&self, config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome>;
    async fn run_sudo(&self, config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome>;
    async fn copy_to_remote(&self, config: &SshConfig, content: &[u8], remote_path: &str, mode: u32) -> Result<()>;
    async fn copy_from_remote(&self, config: &SshConfig, remote_path: &str) -> Result<Vec<u8>>;
    async fn wait_for_phase(&self, config: &SshConfig, phase: &str, timeout: Duration) -> Result<()>;
}

/// Real transport: the `russh`-backed tunnel chain in `exec`/`scp`.
#[derive(Debug, Default)]
pub struct RusshTransport;

#[async_trait]
impl SshTransport for RusshTransport {
    async fn run(&self, config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome> {
        crate::exec::run(config, command, opts).await
    }

    async fn run_sudo(&self, config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome> {
        crate::exec::run_sudo(config, command, opts).await
    }

    async fn copy_to_remote(&self, config: &SshConfig, content: &[u8], remote_path: &str, mode: u32) -> Result<()> {
        crate::scp::copy_to_remote(config, content, remote_path, mode).await
    }

    async fn copy_from_remote(&self, config: &SshConfig, remote_path: &str) -> Result<Vec<u8>> {
        crate::scp::copy_from_remote(config, remote_path).await
    }

    async fn wait_for_phase(&self, config: &SshConfig, phase: &str, timeout: Duration) -> Result<()> {
        crate::exec::wait_for_phase(config, phase, timeout).await
    }
}
