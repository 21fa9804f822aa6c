//! Virtual IP lifecycle (spec §4.9): allocate a port with
//! `allowedAddressPairs`, bind/unbind host MACs into that list, and delete.
//! The provider's `create_vip`/`bind_host_to_vip`/`unbind_host_from_vip`/
//! `delete_vip` operations carry the actual allowed-address-pair mechanics
//! (out of scope per spec §1 — "concrete provider SDK calls"); this service
//! layers metadata bookkeeping over those calls the same way
//! [`crate::NetworkService`] does for networks and subnets.

use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_metadata::{AlterOutcome, MetadataCore, PropertyRegistry};
use safescale_provider::Provider;
use safescale_types::{Name, ProviderId, Ref, VirtualIp};
use std::sync::Arc;
use tracing::info;

pub const VIP_CORE_MODULE: &str = "core";
const CORE_VERSION: u32 = 1;

/// Registers this module's property. Exposed separately from
/// [`crate::register_network_properties`] since a VIP's
/// [`safescale_metadata::MetadataCore`] is keyed by its own
/// `ResourceKind::VirtualIp`, not `Network`/`Subnet`.
pub fn register_vip_properties(registry: &mut PropertyRegistry) {
    registry.register_zero(VIP_CORE_MODULE, CORE_VERSION, &None::<VirtualIp>);
}

pub struct VipService {
    provider: Arc<dyn Provider>,
    vips: Arc<MetadataCore>,
}

impl VipService {
    pub fn new(provider: Arc<dyn Provider>, vips: Arc<MetadataCore>) -> Self {
        Self { provider, vips }
    }

    pub async fn create(&self, name: &Name, network_id: &ProviderId) -> Result<VirtualIp> {
        let vip = self.provider.create_vip(name, network_id).await?;
        self.vips.carry(vip.id.clone(), name.clone(), VIP_CORE_MODULE, CORE_VERSION, &Some(vip.clone()))?;
        info!(vip = %vip.id, network = %network_id, "virtual IP created");
        Ok(vip)
    }

    pub async fn add_public_ip(&self, r: &Ref) -> Result<VirtualIp> {
        let id = self.vips.read(r)?.id;
        let updated = self.provider.add_public_ip_to_vip(&id).await?;
        self.vips.alter(r, VIP_CORE_MODULE, |v: &mut Option<VirtualIp>| {
            *v = Some(updated.clone());
            Ok(AlterOutcome::Changed(()))
        })?;
        Ok(updated)
    }

    /// Bind `host_id` into the VIP's allowed-address-pairs. Idempotent: a
    /// host already bound is a no-op (mirrors the provider's own
    /// duplicate-binding tolerance for security groups, spec §7).
    pub async fn bind(&self, r: &Ref, host_id: &ProviderId) -> Result<()> {
        let id = self.vips.read(r)?.id;
        self.provider.bind_host_to_vip(&id, host_id).await?;
        self.vips.alter(r, VIP_CORE_MODULE, |v: &mut Option<VirtualIp>| {
            let vip = v.as_mut().ok_or_else(|| SafeScaleError::inconsistent("vip has no core payload"))?;
            if vip.bound_host_ids.contains(host_id) {
                return Ok(AlterOutcome::NoChange(()));
            }
            vip.bound_host_ids.push(host_id.clone());
            Ok(AlterOutcome::Changed(()))
        })
    }

    pub async fn unbind(&self, r: &Ref, host_id: &ProviderId) -> Result<()> {
        let id = self.vips.read(r)?.id;
        self.provider.unbind_host_from_vip(&id, host_id).await?;
        self.vips.alter(r, VIP_CORE_MODULE, |v: &mut Option<VirtualIp>| {
            let vip = v.as_mut().ok_or_else(|| SafeScaleError::inconsistent("vip has no core payload"))?;
            if !vip.bound_host_ids.contains(host_id) {
                return Ok(AlterOutcome::NoChange(()));
            }
            vip.bound_host_ids.retain(|id| id != host_id);
            Ok(AlterOutcome::Changed(()))
        })
    }

    pub fn read(&self, r: &Ref) -> Result<VirtualIp> {
        self.vips
            .inspect(r, VIP_CORE_MODULE, |v: &Option<VirtualIp>| v.clone())?
            .ok_or_else(|| SafeScaleError::inconsistent(format!("vip {r} has no core payload")))
    }

    /// Unbind every bound host, then delete the provider port and the
    /// metadata row (spec §4.9: "DeleteVIP unbinds all hosts before
    /// deleting the port").
    pub async fn delete(&self, r: &Ref) -> Result<()> {
        let row_id = self.vips.read(r)?.id;
        let vip = self.read(r)?;
        let mut primary: Option<SafeScaleError> = None;
        for host_id in &vip.bound_host_ids {
            if let Err(e) = self.unbind(r, host_id).await {
                if e.kind != ErrorKind::NotFound {
                    match primary.as_mut() {
                        Some(p) => p.add_consequence(e),
                        None => primary = Some(e),
                    }
                }
            }
        }
        if let Some(err) = primary {
            return Err(err);
        }
        match self.provider.delete_vip(&row_id).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.vips.delete(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_blobstore::InMemoryBlobStore;
    use safescale_provider::{providers::mock::MockProvider, Capabilities, CreateNetworkRequest};
    use safescale_types::{IpVersion, ResourceKind};

    fn service() -> (VipService, Arc<dyn Provider>, ProviderId) {
        let mut registry = PropertyRegistry::new();
        register_vip_properties(&mut registry);
        let registry = Arc::new(registry);
        let blobs: Arc<dyn safescale_blobstore::BlobStore> = Arc::new(InMemoryBlobStore::new());
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new("mock", Capabilities::default()));
        let vips = Arc::new(MetadataCore::new(ResourceKind::VirtualIp, blobs, registry));
        let svc = VipService::new(provider.clone(), vips);
        (svc, provider, String::new())
    }

    #[tokio::test]
    async fn bind_unbind_round_trips_through_metadata() {
        let (svc, provider, _) = service();
        let network = provider
            .create_network(&CreateNetworkRequest { name: "n1".into(), cidr: "10.0.0.0/24".into(), ip_version: IpVersion::V4 })
            .await
            .unwrap();
        let vip = svc.create(&"v1".to_string(), &network.id).await.unwrap();
        let r = Ref::Id(vip.id.clone());

        svc.bind(&r, &"h1".to_string()).await.unwrap();
        svc.bind(&r, &"h2".to_string()).await.unwrap();
        assert_eq!(svc.read(&r).unwrap().bound_host_ids, vec!["h1".to_string(), "h2".to_string()]);

        svc.unbind(&r, &"h1".to_string()).await.unwrap();
        assert_eq!(svc.read(&r).unwrap().bound_host_ids, vec!["h2".to_string()]);
    }

    #[tokio::test]
    async fn delete_unbinds_everyone_first() {
        let (svc, provider, _) = service();
        let network = provider
            .create_network(&CreateNetworkRequest { name: "n1".into(), cidr: "10.0.0.0/24".into(), ip_version: IpVersion::V4 })
            .await
            .unwrap();
        let vip = svc.create(&"v1".to_string(), &network.id).await.unwrap();
        let r = Ref::Id(vip.id.clone());
        svc.bind(&r, &"h1".to_string()).await.unwrap();
        svc.delete(&r).await.unwrap();
        assert!(svc.read(&r).is_err());
    }
}
