//! An in-memory [`Provider`] used by every other crate's test suite in
//! place of a live cloud backend. Grounded in the same `HashMap`-guarded
//! state shape as `claw_provision`'s registry, generalized from "one VPS
//! resource kind" to all resource kinds this contract covers, plus a couple
//! of test-only failure-injection switches (`fail_next_create_host`,
//! `never_become_ready`) used to drive rollback scenarios (spec §8 S2)
//! without a live provider.

use crate::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use safescale_error::{Result, SafeScaleError};
use safescale_types::{
    Host, HostState, Name, SecurityGroup, SecurityGroupRule, Subnet, VirtualIp, Volume,
    VolumeAttachment, VolumeState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct State {
    hosts: HashMap<String, Host>,
    networks: HashMap<String, safescale_types::Network>,
    subnets: HashMap<String, Subnet>,
    security_groups: HashMap<String, SecurityGroup>,
    sg_bindings: HashMap<String, Vec<String>>, // host_id -> sg_ids
    volumes: HashMap<String, Volume>,
    volume_attachments: HashMap<String, VolumeAttachment>,
    vips: HashMap<String, VirtualIp>,
    keypairs: HashMap<String, KeyPair>,
    next_id: u64,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }
}

/// Test double standing in for a real cloud. `capabilities` is configurable
/// per-instance so callers can exercise both layer-3 and flat-network
/// branches of the host/network lifecycle without two separate mocks.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    capabilities: Capabilities,
    state: Mutex<State>,
    pub fail_next_create_host: AtomicBool,
    pub never_become_ready: AtomicBool,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
            state: Mutex::new(State::default()),
            fail_next_create_host: AtomicBool::new(false),
            never_become_ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tenant_parameters(&self) -> TenantParameters {
        HashMap::new()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn auth_options(&self) -> AuthOptions {
        HashMap::new()
    }

    fn configuration_options(&self) -> ConfigurationOptions {
        HashMap::new()
    }

    async fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(vec![Region { id: "mock-region-1".into(), name: "Mock Region 1".into() }])
    }

    async fn list_availability_zones(&self, _region_id: &str) -> Result<Vec<AvailabilityZone>> {
        Ok(vec![AvailabilityZone { id: "mock-az-1".into(), name: "Mock AZ 1".into() }])
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(vec![Image { id: "img-ubuntu-20.04".into(), name: "ubuntu-20.04".into() }])
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        Ok(vec![
            Template { id: "cpu4-ram8".into(), name: "cpu4-ram8".into(), cpus: 4, ram_mb: 8192, disk_gb: 80, gpu_count: 0, cpu_freq_ghz: None },
            Template { id: "cpu1-ram1".into(), name: "cpu1-ram1".into(), cpus: 1, ram_mb: 1024, disk_gb: 20, gpu_count: 0, cpu_freq_ghz: None },
        ])
    }

    async fn inspect_template(&self, id: &str) -> Result<Template> {
        self.list_templates()
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SafeScaleError::not_found(format!("template {id}")))
    }

    async fn create_keypair(&self, name: &str) -> Result<KeyPair> {
        let keypair = KeyPair {
            name: name.to_string(),
            public_key: format!("ssh-rsa AAAAMOCK{name}"),
            private_key: Some(format!("-----BEGIN MOCK KEY {name}-----")),
        };
        self.state.lock().keypairs.insert(name.to_string(), keypair.clone());
        Ok(keypair)
    }

    async fn import_keypair(&self, name: &str, public_key: &str) -> Result<KeyPair> {
        let keypair = KeyPair { name: name.to_string(), public_key: public_key.to_string(), private_key: None };
        self.state.lock().keypairs.insert(name.to_string(), keypair.clone());
        Ok(keypair)
    }

    async fn inspect_keypair(&self, name: &str) -> Result<KeyPair> {
        self.state
            .lock()
            .keypairs
            .get(name)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("keypair {name}")))
    }

    async fn list_keypairs(&self) -> Result<Vec<KeyPair>> {
        Ok(self.state.lock().keypairs.values().cloned().collect())
    }

    async fn delete_keypair(&self, name: &str) -> Result<()> {
        self.state.lock().keypairs.remove(name);
        Ok(())
    }

    async fn create_network(&self, req: &CreateNetworkRequest) -> Result<safescale_types::Network> {
        let mut state = self.state.lock();
        let id = state.fresh_id("net");
        let network = safescale_types::Network {
            id: id.clone(),
            name: req.name.clone(),
            cidr: req.cidr.clone(),
            ip_version: req.ip_version,
            gateway_id: None,
            secondary_gateway_id: None,
            vip: None,
        };
        state.networks.insert(id, network.clone());
        Ok(network)
    }

    async fn create_subnet(&self, req: &CreateSubnetRequest) -> Result<Subnet> {
        let mut state = self.state.lock();
        if !state.networks.contains_key(&req.network_id) {
            return Err(SafeScaleError::not_found(format!("network {}", req.network_id)));
        }
        let id = state.fresh_id("subnet");
        let gw_sg = state.fresh_id("sg-gw");
        let internal_sg = state.fresh_id("sg-int");
        let subnet = Subnet {
            id: id.clone(),
            name: req.name.clone(),
            cidr: req.cidr.clone(),
            network_id: req.network_id.clone(),
            gateway_sg_id: gw_sg,
            internal_sg_id: internal_sg,
        };
        state.subnets.insert(id, subnet.clone());
        Ok(subnet)
    }

    async fn inspect_network(&self, id: &str) -> Result<safescale_types::Network> {
        self.state
            .lock()
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("network {id}")))
    }

    async fn inspect_network_by_name(&self, name: &str) -> Result<safescale_types::Network> {
        self.state
            .lock()
            .networks
            .values()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("network named {name}")))
    }

    async fn inspect_subnet(&self, id: &str) -> Result<Subnet> {
        self.state
            .lock()
            .subnets
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("subnet {id}")))
    }

    async fn inspect_subnet_by_name(&self, network_id: &str, name: &str) -> Result<Subnet> {
        self.state
            .lock()
            .subnets
            .values()
            .find(|s| s.network_id == network_id && s.name == name)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("subnet named {name}")))
    }

    async fn list_networks(&self) -> Result<Vec<safescale_types::Network>> {
        Ok(self.state.lock().networks.values().cloned().collect())
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>> {
        Ok(self
            .state
            .lock()
            .subnets
            .values()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.state.lock().networks.remove(id);
        Ok(())
    }

    async fn delete_subnet(&self, id: &str) -> Result<()> {
        self.state.lock().subnets.remove(id);
        Ok(())
    }

    async fn create_host(&self, req: &CreateHostRequest) -> Result<Host> {
        if self.fail_next_create_host.swap(false, Ordering::SeqCst) {
            return Err(SafeScaleError::new(
                safescale_error::ErrorKind::Execution,
                "mock provider: injected create_host failure",
            ));
        }
        let mut state = self.state.lock();
        if state.hosts.values().any(|h| h.name == req.name) {
            return Err(SafeScaleError::duplicate(format!("host named {}", req.name)));
        }
        let id = state.fresh_id("srv");
        let host = Host {
            id: id.clone(),
            name: req.name.clone(),
            state: HostState::Starting,
            private_key: String::new(),
            password: req.password.clone().unwrap_or_default(),
            is_gateway: false,
        };
        state.hosts.insert(id, host.clone());
        Ok(host)
    }

    async fn inspect_host(&self, id: &str) -> Result<Host> {
        self.state
            .lock()
            .hosts
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("host {id}")))
    }

    async fn inspect_host_by_name(&self, name: &str) -> Result<Host> {
        self.state
            .lock()
            .hosts
            .values()
            .find(|h| h.name == name)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("host named {name}")))
    }

    async fn get_host_state(&self, id: &str) -> Result<HostState> {
        Ok(self.inspect_host(id).await?.state)
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(self.state.lock().hosts.values().cloned().collect())
    }

    async fn delete_host(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.hosts.remove(id);
        state.sg_bindings.remove(id);
        Ok(())
    }

    async fn start_host(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let host = state.hosts.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("host {id}")))?;
        host.state = HostState::Started;
        Ok(())
    }

    async fn stop_host(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let host = state.hosts.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("host {id}")))?;
        host.state = HostState::Stopped;
        Ok(())
    }

    async fn reboot_host(&self, id: &str) -> Result<()> {
        self.stop_host(id).await?;
        self.start_host(id).await
    }

    async fn resize_host(&self, _id: &str, _template_id: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_host_ready(&self, id: &str, timeout: Duration) -> Result<HostState> {
        if self.never_become_ready.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(SafeScaleError::timeout(format!("host {id} never became ready")));
        }
        let mut state = self.state.lock();
        let host = state.hosts.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("host {id}")))?;
        host.state = HostState::Started;
        Ok(HostState::Started)
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        let mut state = self.state.lock();
        let id = state.fresh_id("vol");
        let volume = Volume { id: id.clone(), name: req.name.clone(), size_gb: req.size_gb, speed: req.speed, state: VolumeState::Available };
        state.volumes.insert(id, volume.clone());
        Ok(volume)
    }

    async fn inspect_volume(&self, id: &str) -> Result<Volume> {
        self.state
            .lock()
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("volume {id}")))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.state.lock().volumes.values().cloned().collect())
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.state.lock().volumes.remove(id);
        Ok(())
    }

    async fn create_volume_attachment(&self, req: &CreateVolumeAttachmentRequest) -> Result<VolumeAttachment> {
        let mut state = self.state.lock();
        let id = state.fresh_id("att");
        let attachment = VolumeAttachment {
            id: id.clone(),
            server_id: req.server_id.clone(),
            volume_id: req.volume_id.clone(),
            device: req.device.clone(),
        };
        state.volume_attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    async fn inspect_volume_attachment(&self, id: &str) -> Result<VolumeAttachment> {
        self.state
            .lock()
            .volume_attachments
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("volume attachment {id}")))
    }

    async fn list_volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        Ok(self
            .state
            .lock()
            .volume_attachments
            .values()
            .filter(|a| a.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn delete_volume_attachment(&self, _server_id: &str, id: &str) -> Result<()> {
        self.state.lock().volume_attachments.remove(id);
        Ok(())
    }

    async fn create_vip(&self, name: &Name, network_id: &str) -> Result<VirtualIp> {
        let mut state = self.state.lock();
        let id = state.fresh_id("vip");
        let n = state.next_id;
        let vip = VirtualIp {
            id: id.clone(),
            name: name.clone(),
            network_id: network_id.to_string(),
            private_ip: format!("10.0.0.{}", 20 + (n % 200)),
            public_ip: None,
            bound_host_ids: Vec::new(),
        };
        state.vips.insert(id, vip.clone());
        Ok(vip)
    }

    async fn add_public_ip_to_vip(&self, vip_id: &str) -> Result<VirtualIp> {
        let mut state = self.state.lock();
        let vip = state.vips.get_mut(vip_id).ok_or_else(|| SafeScaleError::not_found(format!("vip {vip_id}")))?;
        vip.public_ip = Some(format!("198.51.100.{}", 1 + (vip_id.len() % 200) as u16));
        Ok(vip.clone())
    }

    async fn bind_host_to_vip(&self, vip_id: &str, host_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let vip = state.vips.get_mut(vip_id).ok_or_else(|| SafeScaleError::not_found(format!("vip {vip_id}")))?;
        if !vip.bound_host_ids.contains(&host_id.to_string()) {
            vip.bound_host_ids.push(host_id.to_string());
        }
        Ok(())
    }

    async fn unbind_host_from_vip(&self, vip_id: &str, host_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let vip = state.vips.get_mut(vip_id).ok_or_else(|| SafeScaleError::not_found(format!("vip {vip_id}")))?;
        vip.bound_host_ids.retain(|h| h != host_id);
        Ok(())
    }

    async fn delete_vip(&self, vip_id: &str) -> Result<()> {
        self.state.lock().vips.remove(vip_id);
        Ok(())
    }

    async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Ok(self.state.lock().security_groups.values().cloned().collect())
    }

    async fn create_security_group(&self, name: &Name, description: &str) -> Result<SecurityGroup> {
        let mut state = self.state.lock();
        let id = state.fresh_id("sg");
        let sg = SecurityGroup { id: id.clone(), name: name.clone(), description: description.to_string(), rules: Vec::new() };
        state.security_groups.insert(id, sg.clone());
        Ok(sg)
    }

    async fn inspect_security_group(&self, id: &str) -> Result<SecurityGroup> {
        self.state
            .lock()
            .security_groups
            .get(id)
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("security group {id}")))
    }

    async fn clear_security_group(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let sg = state.security_groups.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("security group {id}")))?;
        sg.rules.clear();
        Ok(())
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        self.state.lock().security_groups.remove(id);
        Ok(())
    }

    async fn add_security_group_rule(&self, id: &str, rule: SecurityGroupRule) -> Result<()> {
        let mut state = self.state.lock();
        let sg = state.security_groups.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("security group {id}")))?;
        sg.rules.push(rule);
        Ok(())
    }

    async fn delete_security_group_rule(&self, id: &str, rule_index: usize) -> Result<()> {
        let mut state = self.state.lock();
        let sg = state.security_groups.get_mut(id).ok_or_else(|| SafeScaleError::not_found(format!("security group {id}")))?;
        if rule_index >= sg.rules.len() {
            return Err(SafeScaleError::not_found(format!("rule {rule_index} on security group {id}")));
        }
        sg.rules.remove(rule_index);
        Ok(())
    }

    async fn bind_security_group_to_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.security_groups.contains_key(sg_id) {
            return Err(SafeScaleError::not_found(format!("security group {sg_id}")));
        }
        let bindings = state.sg_bindings.entry(host_id.to_string()).or_default();
        if bindings.contains(&sg_id.to_string()) {
            // Duplicate binding is treated as success (spec §7).
            return Ok(());
        }
        bindings.push(sg_id.to_string());
        Ok(())
    }

    async fn unbind_security_group_from_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(bindings) = state.sg_bindings.get_mut(host_id) {
            bindings.retain(|id| id != sg_id);
        }
        Ok(())
    }
}
