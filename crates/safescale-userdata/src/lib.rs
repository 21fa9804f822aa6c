//! Userdata generator (component C7): phase-keyed Handlebars expansion
//! producing cloud-init scripts for the five provisioning phases, plus
//! `#<tagname>` marker insertion (spec §4.7).
//!
//! Grounded in the "hand-built `format!` string" shape of
//! `claw_provision`'s `cloud_init_script` — generalized per REDESIGN FLAGS
//! from one hard-coded script into five named phase templates driven by a
//! real template engine (`handlebars`, the ecosystem's natural reach where
//! the teacher itself only ever needed one inline string). The parsed
//! templates are cached once per process in a `once_cell::sync::Lazy`
//! behind a `parking_lot::RwLock`: a write lock only on first parse of a
//! phase, a read lock on every subsequent render (spec §5, §9).

#![forbid(unsafe_code)]

mod tags;
mod templates;

pub use tags::TagRegistry;

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use serde::Serialize;
use tracing::debug;

/// The five ordered cloud-init phases (spec §4.7, GLOSSARY "Phase").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Phase1Init,
    Phase2NetworkAndSecurity,
    Phase3GatewayHighAvailability,
    Phase4SystemFixes,
    Phase5Final,
}

impl Phase {
    /// Name the phase marker file on the host carries, and the registry key
    /// the process-wide template cache uses.
    pub fn key(self) -> &'static str {
        match self {
            Phase::Phase1Init => "phase1",
            Phase::Phase2NetworkAndSecurity => "phase2",
            Phase::Phase3GatewayHighAvailability => "phase3",
            Phase::Phase4SystemFixes => "phase4",
            Phase::Phase5Final => "phase5",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Phase::Phase1Init => templates::PHASE1_INIT,
            Phase::Phase2NetworkAndSecurity => templates::PHASE2_NETWORK_AND_SECURITY,
            Phase::Phase3GatewayHighAvailability => templates::PHASE3_GATEWAY_HIGH_AVAILABILITY,
            Phase::Phase4SystemFixes => templates::PHASE4_SYSTEM_FIXES,
            Phase::Phase5Final => templates::PHASE5_FINAL,
        }
    }

    /// Gateways run only PHASE2 themselves (spec §4.8 step 15); phases 3-5
    /// are orchestrated separately, by the subnet controller for the
    /// gateway itself and by the regular host pipeline for everyone else.
    pub fn all_in_order() -> [Phase; 5] {
        [
            Phase::Phase1Init,
            Phase::Phase2NetworkAndSecurity,
            Phase::Phase3GatewayHighAvailability,
            Phase::Phase4SystemFixes,
            Phase::Phase5Final,
        ]
    }
}

/// Everything a phase template can reference (spec §4.7). One `Content` is
/// built per host and reused across every phase rendered for it.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub bash_library: String,
    pub script_header: String,
    pub default_user: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub dns_servers: Vec<String>,
    pub cidr: String,
    pub default_route_ip: String,
    pub endpoint_ip: String,
    pub primary_gateway_ip: Option<String>,
    pub secondary_gateway_ip: Option<String>,
    pub emulated_public_net: Option<String>,
    pub host_name: String,
    pub provider_name: String,
    pub operation_timeout_secs: u64,
    pub long_operation_timeout_secs: u64,
    pub pull_images_timeout_secs: u64,
    pub operation_delay_secs: u64,
}

impl Content {
    pub fn new(host_name: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            bash_library: default_bash_library(),
            script_header: "set -u".to_string(),
            default_user: "safescale".to_string(),
            public_key: String::new(),
            private_key: String::new(),
            dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            cidr: String::new(),
            default_route_ip: String::new(),
            endpoint_ip: String::new(),
            primary_gateway_ip: None,
            secondary_gateway_ip: None,
            emulated_public_net: None,
            host_name: host_name.into(),
            provider_name: provider_name.into(),
            operation_timeout_secs: 120,
            long_operation_timeout_secs: 14400,
            pull_images_timeout_secs: 1800,
            operation_delay_secs: 0,
        }
    }

    /// `SAFESCALE_SCRIPTS_FAIL_FAST` (spec §6): switches the header from
    /// `set -u` to `set -Eeuxo pipefail`, trading silent tolerance of
    /// unset-but-harmless variables for an immediate, traced abort plus a
    /// provisioning-error marker the caller is expected to also write.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.script_header = if fail_fast {
            "set -Eeuxo pipefail".to_string()
        } else {
            "set -u".to_string()
        };
        self
    }
}

fn default_bash_library() -> String {
    "# safescale bash helpers: retry(), log(), require_cmd()\n".to_string()
}

static TEMPLATE_REGISTRY: Lazy<RwLock<Handlebars<'static>>> = Lazy::new(|| RwLock::new(Handlebars::new()));

fn ensure_registered(phase: Phase) -> Result<()> {
    {
        let registry = TEMPLATE_REGISTRY.read();
        if registry.has_template(phase.key()) {
            return Ok(());
        }
    }
    let mut registry = TEMPLATE_REGISTRY.write();
    // Re-check under the write lock: another thread may have won the race
    // to parse this phase while we waited.
    if !registry.has_template(phase.key()) {
        registry
            .register_template_string(phase.key(), phase.source())
            .map_err(|e| SafeScaleError::new(ErrorKind::Syntax, format!("userdata template {} failed to parse: {e}", phase.key())))?;
        debug!(phase = phase.key(), "userdata template parsed and cached");
    }
    Ok(())
}

/// Expands `phase`'s template with `content`, then applies `tags`'
/// `#<tagname>` insertions (spec §4.7).
pub fn generate(phase: Phase, content: &Content, tags: &TagRegistry) -> Result<String> {
    ensure_registered(phase)?;
    let rendered = {
        let registry = TEMPLATE_REGISTRY.read();
        registry
            .render(phase.key(), content)
            .map_err(|e| SafeScaleError::new(ErrorKind::Execution, format!("userdata template {} failed to render: {e}", phase.key())))?
    };
    Ok(tags.apply(&rendered))
}

/// Writes the generated script under
/// `$HOME/.safescale/forensics/<hostname>/userdata.<phase>.sh`
/// when `SAFESCALE_FORENSICS` is set (spec §6). Best-effort: a write
/// failure is logged, never surfaced, since forensics dumping must not
/// block provisioning.
pub fn dump_forensics_if_enabled(phase: Phase, host_name: &str, script: &str) {
    if std::env::var("SAFESCALE_FORENSICS").is_err() {
        return;
    }
    let Some(home) = std::env::var_os("HOME") else { return };
    let dir = std::path::Path::new(&home).join(".safescale/forensics").join(host_name);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %e, "forensics directory creation failed");
        return;
    }
    let path = dir.join(format!("userdata.{}.sh", phase.key()));
    if let Err(e) = std::fs::write(&path, script) {
        tracing::warn!(error = %e, path = %path.display(), "forensics dump failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> Content {
        Content::new("h1", "mock")
            .with_fail_fast(false)
    }

    #[test]
    fn generate_renders_phase1_with_host_name() {
        let script = generate(Phase::Phase1Init, &content(), &TagRegistry::new()).unwrap();
        assert!(script.contains("h1"));
        assert!(script.contains("set -u"));
        assert!(script.contains("touch /opt/safescale/var/state/user_data.phase1.done"));
    }

    #[test]
    fn generate_honors_fail_fast_header() {
        let c = Content::new("h1", "mock").with_fail_fast(true);
        let script = generate(Phase::Phase1Init, &c, &TagRegistry::new()).unwrap();
        assert!(script.contains("set -Eeuxo pipefail"));
    }

    #[test]
    fn generate_expands_dns_servers_loop() {
        let mut c = content();
        c.dns_servers = vec!["9.9.9.9".to_string()];
        let script = generate(Phase::Phase2NetworkAndSecurity, &c, &TagRegistry::new()).unwrap();
        assert!(script.contains("nameserver 9.9.9.9"));
    }

    #[test]
    fn generate_applies_tag_insertion() {
        let mut tags = TagRegistry::new();
        tags.register("insert_phase1_extra", "echo injected");
        let script = generate(Phase::Phase1Init, &content(), &tags).unwrap();
        assert!(script.contains("echo injected"));
    }

    #[test]
    fn same_phase_renders_twice_use_the_cached_template() {
        let first = generate(Phase::Phase5Final, &content(), &TagRegistry::new()).unwrap();
        let mut other = content();
        other.host_name = "h2".to_string();
        let second = generate(Phase::Phase5Final, &other, &TagRegistry::new()).unwrap();
        assert!(first.contains("h1"));
        assert!(second.contains("h2"));
    }

    #[test]
    fn all_in_order_lists_five_phases_in_sequence() {
        let phases = Phase::all_in_order();
        assert_eq!(phases.len(), 5);
        assert_eq!(phases[0], Phase::Phase1Init);
        assert_eq!(phases[4], Phase::Phase5Final);
    }
}
