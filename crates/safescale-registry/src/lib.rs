//! Resource registry (component C11): `LoadHost` by ID-or-Name, upgrading
//! stale property versions on read and caching the derived, read-only
//! access fields (privateIP, publicIP, accessIP, a nested-gateway
//! [`SshConfig`]) so repeat lookups during a single request (feature
//! install fan-out, SSH command wrappers) skip re-deriving them.
//!
//! Grounded in `safescale-host`'s own `ssh_config_for` (same
//! core-then-networking double `inspect`, same `access_ip()` precedence),
//! generalized here into a cross-request cache with an explicit `reload`
//! that a caller invokes after any operation it knows changed a host's
//! networking (e.g. binding a new subnet). The nested-gateway chain this
//! crate builds is what `safescale-host` does *not* do: `HostService`
//! always talks to a host directly, while feature install and any
//! operator-initiated SSH against a private-subnet host needs the full
//! gateway hop chain from spec §4.6.

#![forbid(unsafe_code)]

use parking_lot::RwLock;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_host::{HOST_CORE_MODULE, HOST_NETWORKING_MODULE};
use safescale_metadata::MetadataCore;
use safescale_network::NetworkService;
use safescale_ssh::SshConfig;
use safescale_types::{Host, HostNetworking, ProviderId, Ref};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A gateway chain deeper than this is almost certainly a cycle in the
/// network/gateway metadata rather than a legitimate multi-hop topology.
const MAX_GATEWAY_DEPTH: usize = 8;

/// Cached, read-only view of a host's access information (spec §4.11).
#[derive(Debug, Clone)]
pub struct CachedHost {
    pub id: ProviderId,
    pub name: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub access_ip: String,
    pub is_gateway: bool,
    pub ssh: SshConfig,
}

/// `LoadHost`/cache layer over `safescale-metadata` + `safescale-network`
/// (spec §4.11). One `HostRegistry` is constructed per tenant, alongside the
/// `HostService`/`NetworkService` it reads through.
pub struct HostRegistry {
    hosts: Arc<MetadataCore>,
    network: Arc<NetworkService>,
    ssh_user: String,
    cache: RwLock<HashMap<String, Arc<CachedHost>>>,
}

impl HostRegistry {
    pub fn new(hosts: Arc<MetadataCore>, network: Arc<NetworkService>, ssh_user: impl Into<String>) -> Self {
        Self { hosts, network, ssh_user: ssh_user.into(), cache: RwLock::new(HashMap::new()) }
    }

    /// Load by ID-or-Name, upgrading property versions if the underlying
    /// row is stale, returning the cached snapshot if one already exists.
    pub fn load(&self, r: &Ref) -> Result<Arc<CachedHost>> {
        let row = self.hosts.read(r)?;
        if let Some(hit) = self.cache.read().get(&row.id).cloned() {
            return Ok(hit);
        }
        self.build_and_cache(&row.id, 0)
    }

    /// Force a re-fetch: drop the cached entry (if any) and re-derive it
    /// from a fresh metadata read, upgrading property versions along the
    /// way (spec §4.11: "Reload forces a re-fetch and re-caches").
    pub fn reload(&self, r: &Ref) -> Result<Arc<CachedHost>> {
        let row = self.hosts.reload(r)?;
        self.cache.write().remove(&row.id);
        self.build_and_cache(&row.id, 0)
    }

    fn build_and_cache(&self, host_id: &str, depth: usize) -> Result<Arc<CachedHost>> {
        if depth > MAX_GATEWAY_DEPTH {
            return Err(SafeScaleError::inconsistent(format!(
                "gateway chain for host {host_id} exceeds {MAX_GATEWAY_DEPTH} hops; likely a cycle"
            )));
        }
        let host_ref = Ref::Id(host_id.to_string());
        let core: Option<Host> = self.hosts.inspect(&host_ref, HOST_CORE_MODULE, |v: &Option<Host>| v.clone())?;
        let host = core.ok_or_else(|| SafeScaleError::inconsistent(format!("host {host_id} has no core payload")))?;
        let networking: HostNetworking = self.hosts.inspect(&host_ref, HOST_NETWORKING_MODULE, |v: &HostNetworking| v.clone())?;
        let access_ip = networking
            .access_ip()
            .ok_or_else(|| SafeScaleError::inconsistent(format!("host {host_id} has neither a public nor a private IP cached")))?
            .to_string();

        let mut ssh = SshConfig::direct(access_ip.clone(), self.ssh_user.clone(), host.private_key.clone());

        // A host with its own public IP (including gateways) is reachable
        // directly; anything else is tunneled through its default subnet's
        // gateway, recursively, until a directly-reachable hop is found.
        if networking.public_ip.is_none() && !host.is_gateway {
            if let Some(gateway_ssh) = self.gateway_chain(&networking, depth)? {
                ssh = ssh.via_gateway(gateway_ssh);
            }
        }

        let cached = Arc::new(CachedHost {
            id: host.id.clone(),
            name: host.name.clone(),
            private_ip: networking.private_ip.clone(),
            public_ip: networking.public_ip.clone(),
            access_ip,
            is_gateway: host.is_gateway,
            ssh,
        });
        self.cache.write().insert(host.id.clone(), cached.clone());
        debug!(host = %host_id, access_ip = %cached.access_ip, "registry cached host access info");
        Ok(cached)
    }

    /// Resolves the gateway host of `networking`'s default subnet (invariant
    /// 2: first element of the subnet list) and returns its already-built
    /// `SshConfig`, recursing through further gateway hops if that gateway
    /// is itself only reachable through another one.
    fn gateway_chain(&self, networking: &HostNetworking, depth: usize) -> Result<Option<SshConfig>> {
        let Some(subnet_id) = networking.default_subnet() else {
            return Ok(None);
        };
        let subnet = self.network.read_subnet(&Ref::Id(subnet_id.clone()))?;
        let network = self.network.read_network(&Ref::Id(subnet.network_id.clone()))?;
        let Some(gateway_id) = network.gateway_id else {
            return Ok(None);
        };
        let cached = self.build_and_cache(&gateway_id, depth + 1)?;
        Ok(Some(cached.ssh.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_blobstore::InMemoryBlobStore;
    use safescale_host::{register_host_properties, CreateHostRequest, HostService};
    use safescale_metadata::PropertyRegistry;
    use safescale_network::register_network_properties;
    use safescale_provider::providers::mock::MockProvider;
    use safescale_provider::{Capabilities, Provider};
    use safescale_types::ResourceKind;
    use safescale_config::TenantConfig;

    struct Fixture {
        registry: HostRegistry,
        hosts: HostService,
    }

    fn fixture() -> Fixture {
        let mut prop_registry = PropertyRegistry::new();
        register_host_properties(&mut prop_registry);
        register_network_properties(&mut prop_registry);
        let prop_registry = Arc::new(prop_registry);
        let blobs: Arc<dyn safescale_blobstore::BlobStore> = Arc::new(InMemoryBlobStore::new());

        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new("mock", Capabilities::default()));
        let network = Arc::new(NetworkService::new(
            provider.clone(),
            Arc::new(MetadataCore::new(ResourceKind::Network, blobs.clone(), prop_registry.clone())),
            Arc::new(MetadataCore::new(ResourceKind::Subnet, blobs.clone(), prop_registry.clone())),
        ));
        let host_store = Arc::new(MetadataCore::new(ResourceKind::Host, blobs, prop_registry));
        let tenant = TenantConfig::new("test-tenant", "mock");
        let ssh: Arc<dyn safescale_ssh::SshTransport> = Arc::new(safescale_ssh::MockSshTransport::new());
        let hosts = HostService::new(provider, host_store.clone(), network.clone(), tenant, ssh);
        let registry = HostRegistry::new(host_store, network, "safescale");
        Fixture { registry, hosts }
    }

    fn request(name: &str) -> CreateHostRequest {
        let mut req = CreateHostRequest::new(name.to_string());
        req.image_name = Some("ubuntu-22.04".to_string());
        req
    }

    #[tokio::test]
    async fn load_caches_access_info_by_id_and_by_name() {
        let fx = fixture();
        let host = fx.hosts.create(request("h1")).await.unwrap();

        let by_id = fx.registry.load(&Ref::Id(host.id.clone())).unwrap();
        assert_eq!(by_id.access_ip, by_id.private_ip.clone().unwrap());

        let by_name = fx.registry.load(&Ref::Name("h1".to_string())).unwrap();
        assert_eq!(by_name.id, by_id.id);
    }

    #[tokio::test]
    async fn load_is_cached_reload_forces_a_rebuild() {
        let fx = fixture();
        let host = fx.hosts.create(request("h1")).await.unwrap();
        let r = Ref::Id(host.id.clone());

        let first = fx.registry.load(&r).unwrap();
        let second = fx.registry.load(&r).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "load() should return the cached Arc without rebuilding");

        let reloaded = fx.registry.reload(&r).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded), "reload() must rebuild rather than reuse the cache");
        assert_eq!(first.access_ip, reloaded.access_ip);
    }

    #[tokio::test]
    async fn gateway_backed_host_has_no_chain_when_its_subnet_has_no_registered_gateway() {
        // The mock provider never populates Network::gateway_id, so a plain
        // host behind a subnet with no recorded gateway stays directly
        // reachable on its private IP rather than gaining a bogus tunnel.
        let fx = fixture();
        let host = fx.hosts.create(request("h1")).await.unwrap();
        let cached = fx.registry.load(&Ref::Id(host.id)).unwrap();
        assert!(cached.ssh.gateway.is_none());
        assert_eq!(cached.ssh.chain_depth(), 1);
    }

    #[tokio::test]
    async fn load_missing_host_is_not_found() {
        let fx = fixture();
        let err = fx.registry.load(&Ref::Id("ghost".to_string())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
