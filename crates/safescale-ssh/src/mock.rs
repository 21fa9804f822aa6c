//! In-memory [`SshTransport`] for every other crate's test suite, the same
//! role `safescale_provider::providers::mock::MockProvider` plays for the
//! cloud side: every call "succeeds" (exit 0, empty output) by default, with
//! a couple of atomics to inject the failures spec §8's rollback scenarios
//! (S2) and retry tests need without a reachable SSH server.

use crate::transport::SshTransport;
use crate::{ExecOptions, ExecOutcome, SshConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use safescale_error::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockSshTransport {
    /// `wait_for_phase` never completes (and every `run` below "fails the
    /// marker check" implicitly) — drives the phase-1 timeout rollback path.
    pub never_ready: AtomicBool,
    /// Hosts (by `SshConfig::host`) whose next `run`/`run_sudo` call returns
    /// a non-zero exit code once, then reverts to succeeding.
    fail_next_run: Mutex<BTreeSet<String>>,
}

impl MockSshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_run_on(&self, host: impl Into<String>) {
        self.fail_next_run.lock().insert(host.into());
    }
}

#[async_trait]
impl SshTransport for MockSshTransport {
    async fn run(&self, config: &SshConfig, _command: &str, _opts: &ExecOptions) -> Result<ExecOutcome> {
        if self.fail_next_run.lock().remove(&config.host) {
            return Ok(ExecOutcome { exit_code: 1, stdout: String::new(), stderr: "injected failure".to_string() });
        }
        Ok(ExecOutcome { exit_code: 0, stdout: "linux,ubuntu-22.04".to_string(), stderr: String::new() })
    }

    async fn run_sudo(&self, config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome> {
        self.run(config, command, opts).await
    }

    async fn copy_to_remote(&self, _config: &SshConfig, _content: &[u8], _remote_path: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    async fn copy_from_remote(&self, _config: &SshConfig, _remote_path: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn wait_for_phase(&self, config: &SshConfig, phase: &str, timeout: Duration) -> Result<()> {
        if self.never_ready.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(safescale_error::SafeScaleError::timeout(format!(
                "phase {phase} on {} did not complete within {timeout:?}",
                config.host
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_succeeds_by_default_and_can_be_made_to_fail_once() {
        let transport = MockSshTransport::new();
        let config = SshConfig::direct("10.0.0.5", "safescale", "key");
        let ok = transport.run(&config, "true", &ExecOptions::default()).await.unwrap();
        assert!(ok.success());

        transport.fail_next_run_on("10.0.0.5");
        let failed = transport.run(&config, "true", &ExecOptions::default()).await.unwrap();
        assert!(!failed.success());

        let ok_again = transport.run(&config, "true", &ExecOptions::default()).await.unwrap();
        assert!(ok_again.success());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_phase_times_out_when_never_ready() {
        let transport = MockSshTransport::new();
        transport.never_ready.store(true, Ordering::SeqCst);
        let config = SshConfig::direct("10.0.0.5", "safescale", "key");
        let err = transport.wait_for_phase(&config, "phase1", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind, safescale_error::ErrorKind::Timeout);
    }
}
