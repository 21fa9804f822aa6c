//! Tenant and daemon configuration (ambient stack, spec §1a/§6).
//!
//! Grounded in `claw_config::ConfigStore` (an in-memory `HashMap` snapshotted
//! to disk on every write) and `claw_persist::JsonStore`'s
//! load-into-map/save-with-directory-creation shape, now re-pointed at
//! [`safescale_blobstore::BlobStore`] instead of owning file I/O directly.
//! [`TenantConfig`] additionally layers in the environment-variable
//! overrides spec §6 names, applied on top of whatever the tenant's JSON
//! record says.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use safescale_blobstore::BlobStore;
use safescale_error::{Result, SafeScaleError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const BUCKET: &str = "config";
const TENANTS_KEY: &str = "tenants";
const DAEMON_KEY: &str = "daemon";

/// A single tenant's provider credentials and per-tenant behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    pub provider: String,
    pub region: Option<String>,
    pub settings: HashMap<String, String>,
    pub ssh_phase_timeout: Duration,
    pub scripts_fail_fast: bool,
    pub script_flavor: Option<String>,
    pub forensics: bool,
    /// Seed password for the generated operator account. Normally absent
    /// (spec §4.8 step 6 generates a random one); set only when
    /// `SAFESCALE_UNSAFE_PASSWORD` is present, for debugging.
    pub unsafe_password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            provider: provider.into(),
            region: None,
            settings: HashMap::new(),
            ssh_phase_timeout: Duration::from_secs(5 * 60),
            scripts_fail_fast: false,
            script_flavor: None,
            forensics: false,
            unsafe_password: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the spec §6 environment variable overrides on top of whatever
    /// was loaded from disk. Called once per process, after `load`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var("SAFESCALE_UNSAFE_PASSWORD") {
            debug!(tenant = %self.name, "operator password overridden by SAFESCALE_UNSAFE_PASSWORD");
            self.unsafe_password = Some(password);
        }
        if let Ok(flag) = std::env::var("SAFESCALE_SCRIPTS_FAIL_FAST") {
            self.scripts_fail_fast = is_truthy(&flag);
        }
        if let Ok(flavor) = std::env::var("SAFESCALE_SCRIPT_FLAVOR") {
            self.script_flavor = Some(flavor);
        }
        if let Ok(flag) = std::env::var("SAFESCALE_FORENSICS") {
            self.forensics = is_truthy(&flag);
        }
        if let Ok(minutes) = std::env::var("SSH_TIMEOUT") {
            match minutes.parse::<u64>() {
                Ok(m) => self.ssh_phase_timeout = Duration::from_secs(m * 60),
                Err(_) => warn!(value = %minutes, "SSH_TIMEOUT is not a valid integer, ignoring"),
            }
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True")
}

/// Daemon-wide settings: not tenant scoped, one record per installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub default_tenant: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".to_string(),
            default_tenant: None,
            updated_at: Utc::now(),
        }
    }
}

/// In-memory tenant config map, snapshotted to the blob store on every
/// write — the same discipline as `claw_config::ConfigStore::snapshot`.
pub struct ConfigStore {
    blobs: Arc<dyn BlobStore>,
    tenants: HashMap<String, TenantConfig>,
}

impl ConfigStore {
    pub fn open(blobs: Arc<dyn BlobStore>) -> Self {
        let tenants = match blobs.read(BUCKET, TENANTS_KEY) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "corrupt tenant config, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!("no tenant config on disk, starting fresh");
                HashMap::new()
            }
        };
        Self { blobs, tenants }
    }

    pub fn create(&mut self, mut tenant: TenantConfig) -> Result<()> {
        if self.tenants.contains_key(&tenant.name) {
            return Err(SafeScaleError::duplicate(format!("tenant '{}' already exists", tenant.name)));
        }
        tenant.apply_env_overrides();
        self.tenants.insert(tenant.name.clone(), tenant);
        self.snapshot()
    }

    pub fn get(&self, name: &str) -> Option<&TenantConfig> {
        self.tenants.get(name)
    }

    pub fn update(&mut self, name: &str, f: impl FnOnce(&mut TenantConfig)) -> Result<()> {
        let tenant = self
            .tenants
            .get_mut(name)
            .ok_or_else(|| SafeScaleError::not_found(format!("tenant '{name}'")))?;
        f(tenant);
        tenant.updated_at = Utc::now();
        self.snapshot()
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        if self.tenants.remove(name).is_none() {
            return Ok(());
        }
        self.snapshot()
    }

    pub fn list(&self) -> Vec<&TenantConfig> {
        let mut tenants: Vec<&TenantConfig> = self.tenants.values().collect();
        tenants.sort_by(|a, b| a.name.cmp(&b.name));
        tenants
    }

    fn snapshot(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.tenants)
            .map_err(|e| SafeScaleError::inconsistent(format!("tenant config failed to encode: {e}")))?;
        self.blobs.write(BUCKET, TENANTS_KEY, &bytes)
    }
}

/// Loads/saves the single [`DaemonConfig`] record.
pub struct DaemonConfigStore {
    blobs: Arc<dyn BlobStore>,
}

impl DaemonConfigStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn load(&self) -> DaemonConfig {
        match self.blobs.read(BUCKET, DAEMON_KEY) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => DaemonConfig::default(),
        }
    }

    pub fn save(&self, config: &DaemonConfig) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(config)
            .map_err(|e| SafeScaleError::inconsistent(format!("daemon config failed to encode: {e}")))?;
        self.blobs.write(BUCKET, DAEMON_KEY, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_blobstore::FilesystemBlobStore;

    fn store(dir: &std::path::Path) -> ConfigStore {
        ConfigStore::open(Arc::new(FilesystemBlobStore::new(dir)))
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        store.create(TenantConfig::new("acme", "openstack")).unwrap();
        assert_eq!(store.get("acme").unwrap().provider, "openstack");
    }

    #[test]
    fn create_duplicate_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        store.create(TenantConfig::new("acme", "openstack")).unwrap();
        let err = store.create(TenantConfig::new("acme", "gcp")).unwrap_err();
        assert_eq!(err.kind, safescale_error::ErrorKind::Duplicate);
    }

    #[test]
    fn update_applies_closure_and_bumps_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        store.create(TenantConfig::new("acme", "openstack")).unwrap();
        let before = store.get("acme").unwrap().updated_at;
        store.update("acme", |t| t.region = Some("eu-west".into())).unwrap();
        let after = store.get("acme").unwrap();
        assert_eq!(after.region.as_deref(), Some("eu-west"));
        assert!(after.updated_at >= before);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        store.create(TenantConfig::new("acme", "openstack")).unwrap();
        store.delete("acme").unwrap();
        store.delete("acme").unwrap();
        assert!(store.get("acme").is_none());
    }

    #[test]
    fn env_overrides_apply_on_top_of_stored_values() {
        // SAFETY for test isolation: std::env mutation is process-global: this
        // test and `ssh_timeout_env_override_parses_minutes` below both set
        // and restore distinct variables, but real test binaries run
        // single-threaded per `cargo test` default unless `--test-threads`
        // is raised; both are scoped to variables this crate alone reads.
        std::env::set_var("SAFESCALE_SCRIPTS_FAIL_FAST", "true");
        let mut tenant = TenantConfig::new("acme", "openstack");
        tenant.apply_env_overrides();
        std::env::remove_var("SAFESCALE_SCRIPTS_FAIL_FAST");
        assert!(tenant.scripts_fail_fast);
    }

    #[test]
    fn ssh_timeout_env_override_parses_minutes() {
        std::env::set_var("SSH_TIMEOUT", "10");
        let mut tenant = TenantConfig::new("acme", "openstack");
        tenant.apply_env_overrides();
        std::env::remove_var("SSH_TIMEOUT");
        assert_eq!(tenant.ssh_phase_timeout, Duration::from_secs(600));
    }

    #[test]
    fn daemon_config_defaults_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DaemonConfigStore::new(Arc::new(FilesystemBlobStore::new(dir.path())));
        let config = store.load();
        assert_eq!(config.listen_addr, "127.0.0.1:50051");
    }

    #[test]
    fn daemon_config_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let store = DaemonConfigStore::new(blobs.clone());
        let mut config = store.load();
        config.default_tenant = Some("acme".to_string());
        store.save(&config).unwrap();

        let reloaded = DaemonConfigStore::new(blobs).load();
        assert_eq!(reloaded.default_tenant.as_deref(), Some("acme"));
    }
}
