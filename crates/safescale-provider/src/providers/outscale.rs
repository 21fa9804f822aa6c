//! Outscale provider stub.
//!
//! Outscale's API is OpenStack-derived, so its capability matrix matches
//! [`crate::OpenStackProvider`] (layer-3 routing, NAT service, floating
//! IPs) — but the spec (§4.9) treats it as a second "stub" entry alongside
//! GCP rather than a fleshed-out client, since the wire format is out of
//! scope here.

use crate::*;
use async_trait::async_trait;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_types::{
    Host, HostState, Name, SecurityGroup, SecurityGroupRule, Subnet, VirtualIp, Volume,
    VolumeAttachment,
};
use std::collections::HashMap;

#[derive(Debug)]
pub struct OutscaleProvider {
    account: String,
    region: String,
}

impl OutscaleProvider {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self { account: account.into(), region: region.into() }
    }

    fn unimplemented(op: &str) -> SafeScaleError {
        SafeScaleError::new(ErrorKind::NotImplemented, format!("outscale: {op} not implemented"))
    }
}

#[async_trait]
impl Provider for OutscaleProvider {
    fn name(&self) -> &str {
        "outscale"
    }

    fn tenant_parameters(&self) -> TenantParameters {
        [("account".to_string(), self.account.clone()), ("region".to_string(), self.region.clone())]
            .into_iter()
            .collect()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            public_virtual_ip: true,
            private_virtual_ip: true,
            layer3_networking: true,
            nat_service: true,
            use_floating_ip: true,
        }
    }

    fn auth_options(&self) -> AuthOptions {
        HashMap::new()
    }

    fn configuration_options(&self) -> ConfigurationOptions {
        HashMap::new()
    }

    async fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(vec![Region { id: self.region.clone(), name: self.region.clone() }])
    }

    async fn list_availability_zones(&self, _region_id: &str) -> Result<Vec<AvailabilityZone>> {
        Err(Self::unimplemented("list_availability_zones"))
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Err(Self::unimplemented("list_images"))
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        Err(Self::unimplemented("list_templates"))
    }

    async fn inspect_template(&self, _id: &str) -> Result<Template> {
        Err(Self::unimplemented("inspect_template"))
    }

    async fn create_keypair(&self, _name: &str) -> Result<KeyPair> {
        Err(Self::unimplemented("create_keypair"))
    }

    async fn import_keypair(&self, _name: &str, _public_key: &str) -> Result<KeyPair> {
        Err(Self::unimplemented("import_keypair"))
    }

    async fn inspect_keypair(&self, _name: &str) -> Result<KeyPair> {
        Err(Self::unimplemented("inspect_keypair"))
    }

    async fn list_keypairs(&self) -> Result<Vec<KeyPair>> {
        Err(Self::unimplemented("list_keypairs"))
    }

    async fn delete_keypair(&self, _name: &str) -> Result<()> {
        Err(Self::unimplemented("delete_keypair"))
    }

    async fn create_network(&self, _req: &CreateNetworkRequest) -> Result<safescale_types::Network> {
        Err(Self::unimplemented("create_network"))
    }

    async fn create_subnet(&self, _req: &CreateSubnetRequest) -> Result<Subnet> {
        Err(Self::unimplemented("create_subnet"))
    }

    async fn inspect_network(&self, _id: &str) -> Result<safescale_types::Network> {
        Err(Self::unimplemented("inspect_network"))
    }

    async fn inspect_network_by_name(&self, _name: &str) -> Result<safescale_types::Network> {
        Err(Self::unimplemented("inspect_network_by_name"))
    }

    async fn inspect_subnet(&self, _id: &str) -> Result<Subnet> {
        Err(Self::unimplemented("inspect_subnet"))
    }

    async fn inspect_subnet_by_name(&self, _network_id: &str, _name: &str) -> Result<Subnet> {
        Err(Self::unimplemented("inspect_subnet_by_name"))
    }

    async fn list_networks(&self) -> Result<Vec<safescale_types::Network>> {
        Err(Self::unimplemented("list_networks"))
    }

    async fn list_subnets(&self, _network_id: &str) -> Result<Vec<Subnet>> {
        Err(Self::unimplemented("list_subnets"))
    }

    async fn delete_network(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_network"))
    }

    async fn delete_subnet(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_subnet"))
    }

    async fn create_host(&self, _req: &CreateHostRequest) -> Result<Host> {
        Err(Self::unimplemented("create_host"))
    }

    async fn inspect_host(&self, _id: &str) -> Result<Host> {
        Err(Self::unimplemented("inspect_host"))
    }

    async fn inspect_host_by_name(&self, _name: &str) -> Result<Host> {
        Err(Self::unimplemented("inspect_host_by_name"))
    }

    async fn get_host_state(&self, _id: &str) -> Result<HostState> {
        Err(Self::unimplemented("get_host_state"))
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Err(Self::unimplemented("list_hosts"))
    }

    async fn delete_host(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_host"))
    }

    async fn start_host(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("start_host"))
    }

    async fn stop_host(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("stop_host"))
    }

    async fn reboot_host(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("reboot_host"))
    }

    async fn resize_host(&self, _id: &str, _template_id: &str) -> Result<()> {
        Err(Self::unimplemented("resize_host"))
    }

    async fn wait_host_ready(&self, _id: &str, _timeout: std::time::Duration) -> Result<HostState> {
        Err(Self::unimplemented("wait_host_ready"))
    }

    async fn create_volume(&self, _req: &CreateVolumeRequest) -> Result<Volume> {
        Err(Self::unimplemented("create_volume"))
    }

    async fn inspect_volume(&self, _id: &str) -> Result<Volume> {
        Err(Self::unimplemented("inspect_volume"))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Err(Self::unimplemented("list_volumes"))
    }

    async fn delete_volume(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_volume"))
    }

    async fn create_volume_attachment(&self, _req: &CreateVolumeAttachmentRequest) -> Result<VolumeAttachment> {
        Err(Self::unimplemented("create_volume_attachment"))
    }

    async fn inspect_volume_attachment(&self, _id: &str) -> Result<VolumeAttachment> {
        Err(Self::unimplemented("inspect_volume_attachment"))
    }

    async fn list_volume_attachments(&self, _server_id: &str) -> Result<Vec<VolumeAttachment>> {
        Err(Self::unimplemented("list_volume_attachments"))
    }

    async fn delete_volume_attachment(&self, _server_id: &str, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_volume_attachment"))
    }

    async fn create_vip(&self, _name: &Name, _network_id: &str) -> Result<VirtualIp> {
        Err(Self::unimplemented("create_vip"))
    }

    async fn add_public_ip_to_vip(&self, _vip_id: &str) -> Result<VirtualIp> {
        Err(Self::unimplemented("add_public_ip_to_vip"))
    }

    async fn bind_host_to_vip(&self, _vip_id: &str, _host_id: &str) -> Result<()> {
        Err(Self::unimplemented("bind_host_to_vip"))
    }

    async fn unbind_host_from_vip(&self, _vip_id: &str, _host_id: &str) -> Result<()> {
        Err(Self::unimplemented("unbind_host_from_vip"))
    }

    async fn delete_vip(&self, _vip_id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_vip"))
    }

    async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Err(Self::unimplemented("list_security_groups"))
    }

    async fn create_security_group(&self, _name: &Name, _description: &str) -> Result<SecurityGroup> {
        Err(Self::unimplemented("create_security_group"))
    }

    async fn inspect_security_group(&self, _id: &str) -> Result<SecurityGroup> {
        Err(Self::unimplemented("inspect_security_group"))
    }

    async fn clear_security_group(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("clear_security_group"))
    }

    async fn delete_security_group(&self, _id: &str) -> Result<()> {
        Err(Self::unimplemented("delete_security_group"))
    }

    async fn add_security_group_rule(&self, _id: &str, _rule: SecurityGroupRule) -> Result<()> {
        Err(Self::unimplemented("add_security_group_rule"))
    }

    async fn delete_security_group_rule(&self, _id: &str, _rule_index: usize) -> Result<()> {
        Err(Self::unimplemented("delete_security_group_rule"))
    }

    async fn bind_security_group_to_host(&self, _sg_id: &str, _host_id: &str) -> Result<()> {
        Err(Self::unimplemented("bind_security_group_to_host"))
    }

    async fn unbind_security_group_from_host(&self, _sg_id: &str, _host_id: &str) -> Result<()> {
        Err(Self::unimplemented("unbind_security_group_from_host"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outscale_capabilities_mirror_openstack_layer3() {
        let provider = OutscaleProvider::new("acct-1", "eu-west-2");
        let caps = provider.capabilities();
        assert!(caps.layer3_networking);
        assert!(caps.nat_service);
    }

    #[tokio::test]
    async fn outscale_reports_its_single_configured_region() {
        let provider = OutscaleProvider::new("acct-1", "eu-west-2");
        let regions = provider.list_regions().await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id, "eu-west-2");
    }
}
