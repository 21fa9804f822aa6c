//! Per-invocation context: loads a tenant's [`TenantConfig`], builds its
//! decorated [`Provider`], and wires the [`MetadataCore`]s every resource
//! service needs.
//!
//! `safescaled` has no long-running RPC loop (out of scope per spec §1), so
//! there is nothing to keep alive across invocations: every subcommand opens
//! the blob store, loads the one tenant it was asked to act on, builds a
//! fresh [`Context`], and drops it on exit. This mirrors `clawnode`'s own
//! `create_state` — a cheap, stateless constructor called once per process
//! run — generalized here to carry a whole tenant's resource services
//! instead of one node's static capability list.

use safescale_blobstore::{BlobStore, FilesystemBlobStore};
use safescale_config::{ConfigStore, TenantConfig};
use safescale_error::{Result, SafeScaleError};
use safescale_feature::FeatureService;
use safescale_host::HostService;
use safescale_metadata::{MetadataCore, PropertyRegistry};
use safescale_network::{register_network_properties, NetworkService, VipService};
use safescale_provider::{
    providers::mock::MockProvider, Capabilities, GcpProvider, InterceptedProvider, OpenStackProvider,
    OutscaleProvider, Provider,
};
use safescale_registry::HostRegistry;
use safescale_ssh::{MockSshTransport, RusshTransport, SshTransport};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default data directory when `--data-dir` is not given, mirroring the
/// `~/.clawnode` convention `clawnode`'s `join`/`exec` subcommands fall back
/// to.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join(".safescale")
}

/// Everything a resource subcommand needs to act on one tenant.
pub struct Context {
    pub tenant: TenantConfig,
    pub provider: Arc<dyn Provider>,
    pub hosts: Arc<HostService>,
    pub network: Arc<NetworkService>,
    pub features: Arc<FeatureService>,
    pub vips: VipService,
    pub registry: HostRegistry,
}

/// Settings resolver shared by every subcommand before it even knows which
/// tenant it's acting on (tenant create/list/delete).
pub struct Daemon {
    pub blobs: Arc<dyn BlobStore>,
}

impl Daemon {
    pub fn open(data_dir: &Path) -> Self {
        Self { blobs: Arc::new(FilesystemBlobStore::new(data_dir)) }
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::open(self.blobs.clone())
    }

    /// Build the full per-tenant [`Context`], loading `tenant_name`'s
    /// config (applying spec §6's environment variable overrides) and
    /// constructing its decorated provider and resource services.
    pub fn context_for(&self, tenant_name: &str) -> Result<Context> {
        let mut tenant = self
            .config_store()
            .get(tenant_name)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("tenant '{tenant_name}'")))?;
        tenant.apply_env_overrides();

        let inner_provider = build_provider(&tenant)?;
        let provider: Arc<dyn Provider> = InterceptedProvider::new(inner_provider);

        let mut prop_registry = PropertyRegistry::new();
        safescale_host::register_host_properties(&mut prop_registry);
        register_network_properties(&mut prop_registry);
        safescale_network::register_vip_properties(&mut prop_registry);
        let prop_registry = Arc::new(prop_registry);

        let networks = Arc::new(MetadataCore::new(
            safescale_types::ResourceKind::Network,
            self.blobs.clone(),
            prop_registry.clone(),
        ));
        let subnets = Arc::new(MetadataCore::new(
            safescale_types::ResourceKind::Subnet,
            self.blobs.clone(),
            prop_registry.clone(),
        ));
        let host_store = Arc::new(MetadataCore::new(
            safescale_types::ResourceKind::Host,
            self.blobs.clone(),
            prop_registry.clone(),
        ));
        let vip_store = Arc::new(MetadataCore::new(
            safescale_types::ResourceKind::VirtualIp,
            self.blobs.clone(),
            prop_registry.clone(),
        ));

        let network = Arc::new(NetworkService::new(provider.clone(), networks, subnets));
        let vips = VipService::new(provider.clone(), vip_store);

        let ssh: Arc<dyn SshTransport> = if tenant.provider == "mock" {
            Arc::new(MockSshTransport::new())
        } else {
            Arc::new(RusshTransport)
        };

        let hosts = Arc::new(HostService::new(provider.clone(), host_store.clone(), network.clone(), tenant.clone(), ssh));
        let features = Arc::new(FeatureService::new(hosts.clone()));
        let registry = HostRegistry::new(host_store, network.clone(), "safescale");

        Ok(Context { tenant, provider, hosts, network, features, vips, registry })
    }
}

/// Selects and constructs the concrete [`Provider`] named by
/// `tenant.provider`, reading whatever per-provider settings it needs out of
/// `tenant.settings` (spec §4.5: "tenant configuration").
fn build_provider(tenant: &TenantConfig) -> Result<Arc<dyn Provider>> {
    let setting = |key: &str| tenant.settings.get(key).cloned().unwrap_or_default();
    let provider: Arc<dyn Provider> = match tenant.provider.as_str() {
        "mock" => Arc::new(MockProvider::new(tenant.name.clone(), Capabilities::default())),
        "openstack" => Arc::new(OpenStackProvider::new(
            tenant.name.clone(),
            tenant.region.clone().unwrap_or_default(),
            setting("token"),
            setting("endpoint"),
        )),
        "gcp" => Arc::new(GcpProvider::new(setting("project"))),
        "outscale" => Arc::new(OutscaleProvider::new(tenant.name.clone(), tenant.region.clone().unwrap_or_default())),
        other => {
            return Err(SafeScaleError::invalid_request(format!(
                "tenant '{}' names unknown provider '{other}' (expected mock, openstack, gcp, or outscale)",
                tenant.name
            )))
        }
    };
    Ok(provider)
}
