//! Remote command execution over a [`crate::TunnelChain`] session, with the
//! SSH/SCP retryable-exit-code classification the core's retry engine
//! matches on (spec §4.6).

use crate::tunnel::TunnelChain;
use crate::SshConfig;
use russh::ChannelMsg;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use std::time::Duration;
use tracing::{debug, warn};

/// Exit codes the shell or SSH itself can return for reasons unrelated to
/// the command's own logic — transient resource pressure, a dropped
/// connection mid-session, `exec` itself failing. The retry engine treats
/// these as worth another attempt; everything else is the command's own
/// verdict and is never retried blindly.
pub const SSH_RETRYABLE_EXIT_CODES: &[i32] = &[2, 4, 5, 66, 67, 70, 74, 75, 76];

/// SCP's retryable set is a superset of SSH's: it additionally treats
/// "partial transfer" (code 1 in some scp implementations is used for a
/// protocol-level NAK rather than a command failure) as worth retrying.
pub const SCP_RETRYABLE_EXIT_CODES: &[i32] = &[1, 2, 4, 5, 66, 67, 70, 74, 75, 76];

/// Conventional meaning: the connection itself failed before the remote
/// command ever ran.
pub const CONNECTION_FAILED_EXIT_CODE: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Buffer stdout/stderr and return them in [`ExecOutcome`].
    Collect,
    /// Stream each line to `tracing` as it arrives, in addition to
    /// buffering (used for long-running feature steps the operator wants
    /// to watch live).
    Display,
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    pub output_mode: OutputMode,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(300), output_mode: OutputMode::Collect }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_retryable(&self, retryable_codes: &[i32]) -> bool {
        retryable_codes.contains(&self.exit_code)
    }
}

pub async fn run(config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome> {
    let handle = TunnelChain::open(config).await?;
    let mut channel = handle
        .session
        .channel_open_session()
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("channel open on {} failed: {e}", config.host)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("exec on {} failed: {e}", config.host)))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = CONNECTION_FAILED_EXIT_CODE;

    let deadline = tokio::time::Instant::now() + opts.timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SafeScaleError::timeout(format!("command on {} exceeded {:?}", config.host, opts.timeout)));
        }
        let msg = match tokio::time::timeout(remaining, channel.wait()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => return Err(SafeScaleError::timeout(format!("command on {} exceeded {:?}", config.host, opts.timeout))),
        };
        match msg {
            ChannelMsg::Data { data } => {
                if opts.output_mode == OutputMode::Display {
                    debug!(host = %config.host, line = %String::from_utf8_lossy(&data), "stdout");
                }
                stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, .. } => {
                if opts.output_mode == OutputMode::Display {
                    warn!(host = %config.host, line = %String::from_utf8_lossy(&data), "stderr");
                }
                stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus { exit_status } => {
                exit_code = exit_status as i32;
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }

    Ok(ExecOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Runs `command` as root via `sudo -n`, failing fast (no password prompt)
/// rather than hanging a Task waiting on stdin that will never arrive.
pub async fn run_sudo(config: &SshConfig, command: &str, opts: &ExecOptions) -> Result<ExecOutcome> {
    let wrapped = format!("sudo -n bash -c {}", shell_quote(command));
    run(config, &wrapped, opts).await
}

fn shell_quote(command: &str) -> String {
    format!("'{}'", command.replace('\'', "'\\''"))
}

/// Polls for `/opt/safescale/var/state/user_data.<phase>.done` (spec §4.7
/// userdata phase markers) until it appears or `timeout` elapses. On
/// timeout, fetches the phase's log file so the caller's error carries
/// the remote-side failure reason instead of just "not ready".
pub async fn wait_for_phase(config: &SshConfig, phase: &str, timeout: Duration) -> Result<()> {
    let marker = format!("/opt/safescale/var/state/user_data.{phase}.done");
    let poll_opts = ExecOptions { timeout: Duration::from_secs(10), output_mode: OutputMode::Collect };
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match run(config, &format!("test -f {marker}"), &poll_opts).await {
            Ok(outcome) if outcome.success() => return Ok(()),
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            let log_path = format!("/opt/safescale/var/log/user_data.{phase}.log");
            let log = run(config, &format!("tail -n 200 {log_path} 2>/dev/null"), &poll_opts)
                .await
                .map(|o| o.stdout)
                .unwrap_or_default();
            return Err(SafeScaleError::timeout(format!(
                "phase {phase} on {} did not complete within {:?}; last log output:\n{log}",
                config.host, timeout
            )));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_sets_do_not_include_connection_failed() {
        assert!(!SSH_RETRYABLE_EXIT_CODES.contains(&CONNECTION_FAILED_EXIT_CODE));
        assert!(!SCP_RETRYABLE_EXIT_CODES.contains(&CONNECTION_FAILED_EXIT_CODE));
    }

    #[test]
    fn scp_retryable_set_is_a_superset_of_ssh() {
        assert!(SSH_RETRYABLE_EXIT_CODES.iter().all(|c| SCP_RETRYABLE_EXIT_CODES.contains(c)));
    }

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), r#"'echo '\''hi'\'''"#);
    }

    #[test]
    fn exec_outcome_reports_success_only_on_zero() {
        let outcome = ExecOutcome { exit_code: 0, stdout: String::new(), stderr: String::new() };
        assert!(outcome.success());
        let failed = ExecOutcome { exit_code: 5, ..outcome };
        assert!(!failed.success());
        assert!(failed.is_retryable(SSH_RETRYABLE_EXIT_CODES));
    }
}
