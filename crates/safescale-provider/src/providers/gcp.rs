//! GCP provider stub.
//!
//! The spec names GCP only as a capability-matrix entry (§4.9): a provider
//! with floating/public VIPs but no NAT gateway service of its own. This is
//! deliberately thin — enough to exercise the capability-gated branches in
//! `safescale-network`/`safescale-host`, not a Compute Engine client.

use crate::*;
use async_trait::async_trait;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_types::{
    Host, HostState, Name, SecurityGroup, SecurityGroupRule, Subnet, VirtualIp, Volume,
    VolumeAttachment,
};
use std::collections::HashMap;

#[derive(Debug)]
pub struct GcpProvider {
    project: String,
}

impl GcpProvider {
    pub fn new(project: impl Into<String>) -> Self {
        Self { project: project.into() }
    }

    fn unimplemented(op: &str) -> SafeScaleError {
        SafeScaleError::new(ErrorKind::NotImplemented, format!("gcp: {op} not implemented"))
    }
}

#[async_trait]
impl Provider for GcpProvider {
    fn name(&self) -> &str {
        "gcp"
    }

    fn tenant_parameters(&self) -> TenantParameters {
        [("project".to_string(), self.project.clone())].into_iter().collect()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            public_virtual_ip: true,
            private_virtual_ip: false,
            layer3_networking: true,
            nat_service: false,
            use_floating_ip: false,
        }
    }

    fn auth_options(&self) -> AuthOptions {
        HashMap::new()
    }

    fn configuration_options(&self) -> ConfigurationOptions {
        HashMap::new()
    }

    async fn list_regions(&self) -> Result<Vec<Region>> {
        Err(Self::unimplemented("list_regions"))
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
        // GCP lacks a native layer-2 VIP primitive; the core falls back to
        // a reserved static address plus target-instance reassignment,
        // which is out of scope for this stub.
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
    fn gcp_capabilities_have_no_nat_service() {
        let provider = GcpProvider::new("proj-1");
        let caps = provider.capabilities();
        assert!(caps.public_virtual_ip);
        assert!(!caps.nat_service);
    }
}
