//! Host lifecycle (component C8): the 15-step Create pipeline with its LIFO
//! rollback stack, Delete's preflight/exclusive-lock sequence, power
//! control, and thin Run/Push/Pull/PushStringToFile wrappers over C6.
//!
//! Grounded in `safescale_network::NetworkService`'s carry/alter discipline
//! and its `Compensation`/`unwind` rollback shape (here pulled out into
//! [`rollback::RollbackStack`] since Create pushes many more steps than
//! subnet creation does), and in `safescale_provider::providers::mock`'s
//! exact `Host`/`HostState` transitions for what each provider call
//! actually returns.

#![forbid(unsafe_code)]

mod password;
mod rollback;

use rollback::RollbackStack;

use safescale_config::TenantConfig;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_metadata::{AlterOutcome, MetadataCore, PropertyRegistry};
use safescale_network::{Cidr4, NetworkService};
use safescale_provider::{CreateHostRequest as ProviderCreateHostRequest, Image, Provider, Template};
use safescale_retry::{retry, DelayPolicy};
use safescale_ssh::{ExecOptions, ExecOutcome, OutputMode, SshConfig, SshTransport};
use safescale_types::{
    Host, HostDescription, HostNetworking, HostSecurityGroups, HostShares, HostSizing, HostState,
    HostSystem, HostVolumes, Name, ProviderId, Ref, ResourceKind, SizingRequest, Subnet,
};
use safescale_userdata::{Content, Phase, TagRegistry};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const HOST_CORE_MODULE: &str = "core";
pub const HOST_SIZING_MODULE: &str = "sizing";
pub const HOST_DESCRIPTION_MODULE: &str = "description";
pub const HOST_NETWORKING_MODULE: &str = "networking";
pub const HOST_SYSTEM_MODULE: &str = "system";
pub const HOST_SECURITY_GROUPS_MODULE: &str = "security_groups";
pub const HOST_FEATURES_MODULE: &str = "features";
pub const HOST_VOLUMES_MODULE: &str = "volumes";
pub const HOST_SHARES_MODULE: &str = "shares";
pub const HOST_CLUSTER_MODULE: &str = "cluster";
const CORE_VERSION: u32 = 1;

/// `LongOperationTimeout` (spec §4.7/§4.8 step 7): the ceiling the retry
/// loop around `Provider::create_host` runs to, shared with userdata's
/// `Content::long_operation_timeout_secs` default.
const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
/// How long `Provider::wait_host_ready` is given after a successful
/// `create_host`, before the pipeline moves on to metadata and SSH steps.
const HOST_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Deadline for Stop/Start/Reboot polling and for Delete waiting for
/// effective disappearance (spec §4.8).
const POWER_STATE_DEADLINE: Duration = Duration::from_secs(5 * 60);
const POWER_STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Registers this crate's property modules (spec §4.4). Called once at
/// daemon startup, the same way `safescale_network::register_network_properties`
/// is, before any [`MetadataCore`] for hosts is constructed.
pub fn register_host_properties(registry: &mut PropertyRegistry) {
    registry.register_zero(HOST_CORE_MODULE, CORE_VERSION, &None::<Host>);
    registry.register_zero(
        HOST_SIZING_MODULE,
        CORE_VERSION,
        &HostSizing {
            requested_cpus: 0,
            requested_ram_mb: 0,
            requested_disk_gb: 0,
            allocated_cpus: 0,
            allocated_ram_mb: 0,
            allocated_disk_gb: 0,
            gpu_count: 0,
        },
    );
    registry.register_zero(
        HOST_DESCRIPTION_MODULE,
        CORE_VERSION,
        &HostDescription {
            created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            creator: String::new(),
            tenant: String::new(),
        },
    );
    registry.register_zero(HOST_NETWORKING_MODULE, CORE_VERSION, &HostNetworking::default());
    registry.register_zero(HOST_SYSTEM_MODULE, CORE_VERSION, &HostSystem::default());
    registry.register_zero(HOST_SECURITY_GROUPS_MODULE, CORE_VERSION, &HostSecurityGroups::default());
    registry.register_zero(HOST_FEATURES_MODULE, CORE_VERSION, &safescale_types::HostFeatures::default());
    registry.register_zero(HOST_VOLUMES_MODULE, CORE_VERSION, &HostVolumes::default());
    registry.register_zero(HOST_SHARES_MODULE, CORE_VERSION, &HostShares::default());
    registry.register_zero(HOST_CLUSTER_MODULE, CORE_VERSION, &safescale_types::HostClusterMembership::default());
}

/// Request shape for [`HostService::create`]. Distinct from
/// [`safescale_provider::CreateHostRequest`], which is the narrower
/// provider-facing shape this builds and sends at step 7.
#[derive(Debug, Clone)]
pub struct CreateHostRequest {
    pub name: Name,
    pub sizing: SizingRequest,
    pub template_id: Option<ProviderId>,
    pub image_id: Option<ProviderId>,
    pub image_name: Option<String>,
    pub subnets: Vec<Ref>,
    pub public_ip: bool,
    pub is_gateway: bool,
    pub password: Option<String>,
    /// When `subnets` is empty and `public_ip` is false, whether to fall
    /// back to the single-host network (step 4) rather than reject the
    /// request outright — a host with no subnet and no public IP can never
    /// be reached, so the default is `true` only to let callers opt out
    /// explicitly and hit that InvalidRequest boundary deliberately.
    pub allow_default_subnet: bool,
}

impl CreateHostRequest {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            sizing: SizingRequest::default(),
            template_id: None,
            image_id: None,
            image_name: None,
            subnets: Vec::new(),
            public_ip: false,
            is_gateway: false,
            password: None,
            allow_default_subnet: true,
        }
    }
}

pub struct HostService {
    provider: Arc<dyn Provider>,
    hosts: Arc<MetadataCore>,
    network: Arc<NetworkService>,
    tenant: TenantConfig,
    ssh: Arc<dyn SshTransport>,
}

impl HostService {
    pub fn new(
        provider: Arc<dyn Provider>,
        hosts: Arc<MetadataCore>,
        network: Arc<NetworkService>,
        tenant: TenantConfig,
        ssh: Arc<dyn SshTransport>,
    ) -> Self {
        Self { provider, hosts, network, tenant, ssh }
    }

    /// The 15-step Create pipeline (spec §4.8). Every step that had an
    /// effect worth undoing pushes a compensating action before moving on;
    /// any later failure unwinds everything pushed so far.
    pub async fn create(&self, req: CreateHostRequest) -> Result<Host> {
        // Steps 1-2: reject name collisions, locally and at the provider.
        match self.hosts.read(&Ref::Name(req.name.clone())) {
            Ok(_) => return Err(SafeScaleError::duplicate(format!("host {} already exists", req.name))),
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match self.provider.inspect_host_by_name(&req.name).await {
            Ok(_) => return Err(SafeScaleError::duplicate(format!("host {} already exists at the provider", req.name))),
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        // Step 3: template.
        let template = self.resolve_template(&req).await?;
        // Step 4: default subnet.
        let subnet = self.resolve_subnet(&req).await?;
        // Step 5: image.
        let image = self.resolve_image(&req).await?;
        // Step 6: password.
        let password = password::resolve(req.password.as_deref());

        let mut rollback: RollbackStack = RollbackStack::new();

        // SSH keypair generation (spec §4.8/§4.6): not its own numbered
        // step, but must happen before step 7 since the public key is
        // baked into PHASE1's userdata.
        let keypair = safescale_ssh::generate_keypair()?;
        let provider_keypair_name = format!("safescale-{}", req.name);
        if let Err(mut err) = self.provider.import_keypair(&provider_keypair_name, &keypair.public_key_openssh).await {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        {
            let provider = self.provider.clone();
            let keypair_name = provider_keypair_name.clone();
            rollback.push(Box::new(move || Box::pin(async move { provider.delete_keypair(&keypair_name).await })));
        }

        let tags = TagRegistry::new();
        let mut content = Content::new(req.name.clone(), self.provider.name().to_string()).with_fail_fast(self.tenant.scripts_fail_fast);
        content.public_key = keypair.public_key_openssh.clone();
        content.private_key = keypair.private_key_pem.clone();
        content.cidr = subnet.cidr.clone();
        let phase1_script = match safescale_userdata::generate(Phase::Phase1Init, &content, &tags) {
            Ok(script) => script,
            Err(mut err) => {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        };
        safescale_userdata::dump_forensics_if_enabled(Phase::Phase1Init, &req.name, &phase1_script);

        // Step 7: provider CreateHost, retried until LongOperationTimeout.
        // `InvalidRequest` (the provider's classification of e.g. a 409) is
        // never worth retrying, so it's escalated to `stop_retry`.
        let provider_req = ProviderCreateHostRequest {
            name: req.name.clone(),
            template_id: template.id.clone(),
            image_id: image.id.clone(),
            subnet_ids: vec![subnet.id.clone()],
            public_ip: req.public_ip,
            keypair_name: Some(provider_keypair_name.clone()),
            user_data: phase1_script,
            password: Some(password.clone()),
        };
        let create_result = retry(
            || async {
                match self.provider.create_host(&provider_req).await {
                    Ok(host) => Ok(host),
                    Err(e) if e.kind == ErrorKind::InvalidRequest => Err(safescale_retry::stop_retry(e)),
                    Err(e) => Err(e),
                }
            },
            DelayPolicy::Exponential { initial: Duration::from_secs(1), cap: Duration::from_secs(30) },
            LONG_OPERATION_TIMEOUT,
            None::<fn(safescale_retry::Verdict, u32)>,
        )
        .await;
        let mut host = match create_result {
            Ok(host) => host,
            Err(mut err) => {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        };
        {
            let provider = self.provider.clone();
            let host_id = host.id.clone();
            rollback.push(Box::new(move || Box::pin(async move { provider.delete_host(&host_id).await })));
        }

        match self.provider.wait_host_ready(&host.id, HOST_READY_TIMEOUT).await {
            Ok(state) => host.state = state,
            Err(mut err) => {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        }

        host.private_key = keypair.private_key_pem.clone();
        host.password = password;
        host.is_gateway = req.is_gateway;

        // Step 8: carry the metadata row.
        if let Err(mut err) = self.hosts.carry(host.id.clone(), req.name.clone(), HOST_CORE_MODULE, CORE_VERSION, &Some(host.clone())) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        {
            let hosts = self.hosts.clone();
            let r = Ref::Id(host.id.clone());
            rollback.push(Box::new(move || Box::pin(async move { hosts.delete(&r) })));
        }

        let host_ref = Ref::Id(host.id.clone());

        // Step 9: property bags.
        let creator = format!(
            "{}@{}",
            std::env::var("USER").unwrap_or_else(|_| "safescale".to_string()),
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
        );
        if let Err(mut err) = self.hosts.alter(&host_ref, HOST_SIZING_MODULE, |v: &mut HostSizing| {
            *v = HostSizing {
                requested_cpus: req.sizing.min_cpus,
                requested_ram_mb: req.sizing.min_ram_mb,
                requested_disk_gb: req.sizing.min_disk_gb,
                allocated_cpus: template.cpus,
                allocated_ram_mb: template.ram_mb,
                allocated_disk_gb: template.disk_gb,
                gpu_count: template.gpu_count,
            };
            Ok(AlterOutcome::Changed(()))
        }) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        if let Err(mut err) = self.hosts.alter(&host_ref, HOST_DESCRIPTION_MODULE, |v: &mut HostDescription| {
            *v = HostDescription { created_at: chrono::Utc::now(), creator: creator.clone(), tenant: self.tenant.name.clone() };
            Ok(AlterOutcome::Changed(()))
        }) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        if let Err(mut err) = self.hosts.alter(&host_ref, HOST_NETWORKING_MODULE, |v: &mut HostNetworking| {
            *v = HostNetworking { subnets: vec![subnet.id.clone()], public_ip: None, private_ip: None, is_gateway: req.is_gateway };
            Ok(AlterOutcome::Changed(()))
        }) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }

        // Step 10: security-group binding.
        if let Err(mut err) = self.bind_security_groups(&mut rollback, &host_ref, &host.id, &req, &subnet).await {
            rollback.unwind(&mut err).await;
            return Err(err);
        }

        // Step 11: refresh cached access information.
        let attached_before = self.network.attached_hosts(&Ref::Id(subnet.id.clone())).unwrap_or_default().len() as u32;
        let private_ip = match Cidr4::parse(&subnet.cidr).and_then(|c| c.pool_address(attached_before)) {
            Ok(addr) => addr.to_string(),
            Err(mut err) => {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        };
        let public_ip = req.public_ip.then(|| synthesize_public_ip(&host.id));
        if let Err(mut err) = self.hosts.alter(&host_ref, HOST_NETWORKING_MODULE, |v: &mut HostNetworking| {
            v.private_ip = Some(private_ip.clone());
            v.public_ip = public_ip.clone();
            Ok(AlterOutcome::Changed(()))
        }) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }

        let ssh_config = SshConfig::direct(
            public_ip.clone().unwrap_or_else(|| private_ip.clone()),
            "safescale",
            keypair.private_key_pem.clone(),
        );

        content.default_route_ip = private_ip.clone();
        content.endpoint_ip = private_ip.clone();

        // Step 12: wait for PHASE1's done marker.
        if let Err(mut err) = self.ssh.wait_for_phase(&ssh_config, Phase::Phase1Init.key(), self.tenant.ssh_phase_timeout).await {
            rollback.unwind(&mut err).await;
            return Err(err);
        }

        // Step 13: System property from the phase-1 status line.
        let status_outcome = match self.ssh.run(&ssh_config, "cat /opt/safescale/var/state/phase1.status", &ExecOptions::default()).await {
            Ok(outcome) => outcome,
            Err(mut err) => {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        };
        let mut fields = status_outcome.stdout.trim().splitn(3, ',');
        let os_type = fields.next().unwrap_or("unknown").to_string();
        let os_flavor = fields.next().unwrap_or("unknown").to_string();
        if let Err(mut err) = self.hosts.alter(&host_ref, HOST_SYSTEM_MODULE, |v: &mut HostSystem| {
            *v = HostSystem { os_type: os_type.clone(), os_flavor: os_flavor.clone(), image_id: image.id.clone() };
            Ok(AlterOutcome::Changed(()))
        }) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }

        // Step 14: link into the subnet's Hosts property.
        if let Err(mut err) = self.network.link_host(&Ref::Id(subnet.id.clone()), &host.id, req.is_gateway) {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        {
            let network = self.network.clone();
            let subnet_id = subnet.id.clone();
            let host_id = host.id.clone();
            rollback.push(Box::new(move || {
                Box::pin(async move { network.unlink_host(&Ref::Id(subnet_id), &host_id) })
            }));
        }

        // Step 15: run the remaining phases and reboot between them.
        if let Err(mut err) = self.run_phase(&ssh_config, &content, Phase::Phase2NetworkAndSecurity, &req.name).await {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        if let Err(mut err) = self.reboot(&host_ref).await {
            rollback.unwind(&mut err).await;
            return Err(err);
        }
        if !req.is_gateway {
            if let Err(mut err) = self.run_phase(&ssh_config, &content, Phase::Phase4SystemFixes, &req.name).await {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
            if let Err(mut err) = self.reboot(&host_ref).await {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
            if let Err(mut err) = self.run_phase(&ssh_config, &content, Phase::Phase5Final, &req.name).await {
                rollback.unwind(&mut err).await;
                return Err(err);
            }
        }

        info!(host = %host.id, name = %req.name, "host creation complete");
        let _ = rollback;
        Ok(host)
    }

    /// Generates, pushes, and executes one post-boot phase script, then
    /// waits for its own done marker — the marker check catches a phase
    /// whose own reboot raced ahead of the SSH exec's exit-status delivery.
    async fn run_phase(&self, ssh: &SshConfig, content: &Content, phase: Phase, host_name: &str) -> Result<()> {
        let script = safescale_userdata::generate(phase, content, &TagRegistry::new())?;
        safescale_userdata::dump_forensics_if_enabled(phase, host_name, &script);
        let remote_path = format!("/opt/safescale/var/tmp/userdata.{}.sh", phase.key());
        self.ssh.copy_to_remote(ssh, script.as_bytes(), &remote_path, 0o750).await?;
        let outcome = self.ssh.run_sudo(ssh, &format!("bash {remote_path}"), &ExecOptions { timeout: self.tenant.ssh_phase_timeout, output_mode: OutputMode::Display }).await?;
        if !outcome.success() {
            return Err(SafeScaleError::new(ErrorKind::Execution, format!("{} failed on {} (exit {}): {}", phase.key(), host_name, outcome.exit_code, outcome.stderr)));
        }
        self.ssh.wait_for_phase(ssh, phase.key(), self.tenant.ssh_phase_timeout).await
    }

    /// Step 10: gateways bind both the subnet's gateway-SG and internal-SG;
    /// a host with no explicit subnet request but a public IP binds only
    /// the gateway-SG; every other host binds only the internal-SG. Every
    /// host additionally gets a dedicated per-host SG with an empty rule
    /// set. `Duplicate` from a bind call means "already bound" and is
    /// treated as success (spec §7).
    async fn bind_security_groups(
        &self,
        rollback: &mut RollbackStack<'_>,
        host_ref: &Ref,
        host_id: &ProviderId,
        req: &CreateHostRequest,
        subnet: &Subnet,
    ) -> Result<()> {
        let mut to_bind = Vec::new();
        if req.is_gateway {
            to_bind.push(subnet.gateway_sg_id.clone());
            to_bind.push(subnet.internal_sg_id.clone());
        } else if req.subnets.is_empty() && req.public_ip {
            to_bind.push(subnet.gateway_sg_id.clone());
        } else {
            to_bind.push(subnet.internal_sg_id.clone());
        }

        for sg_id in &to_bind {
            self.bind_one_sg(rollback, sg_id, host_id).await?;
        }

        let per_host_sg = self
            .provider
            .create_security_group(&format!("{}-sg", req.name), &format!("default security group for host {}", req.name))
            .await?;
        {
            let provider = self.provider.clone();
            let sg_id = per_host_sg.id.clone();
            rollback.push(Box::new(move || Box::pin(async move { provider.delete_security_group(&sg_id).await })));
        }
        self.bind_one_sg(rollback, &per_host_sg.id, host_id).await?;
        to_bind.push(per_host_sg.id.clone());

        self.hosts.alter(host_ref, HOST_SECURITY_GROUPS_MODULE, |v: &mut HostSecurityGroups| {
            *v = HostSecurityGroups { bound: to_bind.clone(), default_sg: Some(per_host_sg.id.clone()) };
            Ok(AlterOutcome::Changed(()))
        })
    }

    async fn bind_one_sg(&self, rollback: &mut RollbackStack<'_>, sg_id: &str, host_id: &ProviderId) -> Result<()> {
        match self.provider.bind_security_group_to_host(sg_id, host_id).await {
            Ok(()) | Err(SafeScaleError { kind: ErrorKind::Duplicate, .. }) => {}
            Err(e) => return Err(e),
        }
        let provider = self.provider.clone();
        let sg = sg_id.to_string();
        let host = host_id.clone();
        rollback.push(Box::new(move || Box::pin(async move { provider.unbind_security_group_from_host(&sg, &host).await })));
        Ok(())
    }

    async fn resolve_template(&self, req: &CreateHostRequest) -> Result<Template> {
        if let Some(id) = &req.template_id {
            return self.provider.inspect_template(id).await;
        }
        let templates = self.provider.list_templates().await?;
        let sizing = &req.sizing;
        let mut candidates: Vec<Template> = templates
            .into_iter()
            .filter(|t| t.cpus >= sizing.min_cpus && t.ram_mb >= sizing.min_ram_mb && t.disk_gb >= sizing.min_disk_gb && t.gpu_count >= sizing.gpu_count)
            .filter(|t| sizing.min_cpu_freq_ghz.is_none_or(|min| t.cpu_freq_ghz.is_some_and(|f| f >= min)))
            .collect();
        candidates.sort_by_key(|t| (t.cpus, t.ram_mb, t.disk_gb));
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| SafeScaleError::not_available(format!("no template satisfies the sizing request for host {}", req.name)))
    }

    async fn resolve_subnet(&self, req: &CreateHostRequest) -> Result<Subnet> {
        if let Some(first) = req.subnets.first() {
            return self.network.read_subnet(first);
        }
        if !req.public_ip && !req.allow_default_subnet {
            return Err(SafeScaleError::invalid_request(format!("host {} requests neither a subnet nor a public IP", req.name)));
        }
        self.network.ensure_single_host_subnet().await
    }

    async fn resolve_image(&self, req: &CreateHostRequest) -> Result<Image> {
        if let Some(id) = &req.image_id {
            return Ok(Image { id: id.clone(), name: req.image_name.clone().unwrap_or_default() });
        }
        let name = req
            .image_name
            .clone()
            .ok_or_else(|| SafeScaleError::invalid_request(format!("host {} requires image_id or image_name", req.name)))?;
        retry(
            || async {
                let images = self.provider.list_images().await?;
                images
                    .into_iter()
                    .find(|i| i.name == name)
                    .ok_or_else(|| SafeScaleError::not_available(format!("image {name} not found")))
            },
            DelayPolicy::Fixed1s,
            Duration::from_secs(10),
            None::<fn(safescale_retry::Verdict, u32)>,
        )
        .await
    }

    /// Delete(task) (spec §4.8). Gateways, hosts with volumes attached, or
    /// hosts whose exported shares are mounted elsewhere are rejected
    /// before anything is touched.
    pub async fn delete(&self, r: &Ref) -> Result<()> {
        let row = self.hosts.read(r)?;
        let host_id = row.id.clone();
        let host_ref = Ref::Id(host_id.clone());

        let networking: HostNetworking = self.hosts.inspect(&host_ref, HOST_NETWORKING_MODULE, |v: &HostNetworking| v.clone())?;
        if networking.is_gateway {
            return Err(SafeScaleError::invalid_request(format!("host {r} is a gateway; delete its subnet instead")));
        }

        let shares: HostShares = self.hosts.inspect(&host_ref, HOST_SHARES_MODULE, |v: &HostShares| v.clone())?;
        if !shares.exported.is_empty() {
            let mut mounted_elsewhere = false;
            self.hosts.browse(&mut |other| {
                if other.id == host_id {
                    return Ok(());
                }
                if let Ok(other_shares) = self.hosts.inspect(&Ref::Id(other.id.clone()), HOST_SHARES_MODULE, |v: &HostShares| v.clone()) {
                    if other_shares.mounted.iter().any(|m| shares.exported.contains(m)) {
                        mounted_elsewhere = true;
                    }
                }
                Ok(())
            })?;
            if mounted_elsewhere {
                return Err(SafeScaleError::invalid_request(format!("host {r} exports a share mounted by another host")));
            }
        }

        let volumes: HostVolumes = self.hosts.inspect(&host_ref, HOST_VOLUMES_MODULE, |v: &HostVolumes| v.clone())?;
        if !volumes.attachments.is_empty() {
            return Err(SafeScaleError::invalid_request(format!("host {r} still has {} attached volume(s)", volumes.attachments.len())));
        }

        // Exclusive phase. Share unmount/export-delete is bookkeeping only:
        // the Provider contract has no share/NFS operations to call out to.
        self.hosts.alter(&host_ref, HOST_SHARES_MODULE, |v: &mut HostShares| {
            if v.exported.is_empty() && v.mounted.is_empty() {
                return Ok(AlterOutcome::NoChange(()));
            }
            v.exported.clear();
            v.mounted.clear();
            Ok(AlterOutcome::Changed(()))
        })?;

        for subnet_id in &networking.subnets {
            if let Err(e) = self.network.unlink_host(&Ref::Id(subnet_id.clone()), &host_id) {
                warn!(error = %e, subnet = %subnet_id, "failed to unlink host from subnet during delete");
            }
        }

        let sgs: HostSecurityGroups = self.hosts.inspect(&host_ref, HOST_SECURITY_GROUPS_MODULE, |v: &HostSecurityGroups| v.clone())?;
        for sg_id in &sgs.bound {
            match self.provider.unbind_security_group_from_host(sg_id, &host_id).await {
                Ok(()) => {}
                Err(e) if e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(default_sg) = &sgs.default_sg {
            match self.provider.delete_security_group(default_sg).await {
                Ok(()) => {}
                Err(e) if e.kind == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        match self.provider.delete_host(&host_id).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let start = Instant::now();
        let mut saw_error = false;
        loop {
            match self.provider.inspect_host(&host_id).await {
                Err(e) if e.kind == ErrorKind::NotFound => break,
                Ok(h) if h.state == HostState::Error => saw_error = true,
                _ => {}
            }
            if start.elapsed() >= POWER_STATE_DEADLINE {
                if saw_error {
                    return Err(SafeScaleError::not_available(format!("host {host_id} entered ERROR state and never disappeared")));
                }
                return Err(SafeScaleError::timeout(format!("host {host_id} did not disappear within {:?} of deletion", POWER_STATE_DEADLINE)));
            }
            tokio::time::sleep(POWER_STATE_POLL_INTERVAL).await;
        }

        self.hosts.delete(&host_ref)
    }

    pub async fn stop(&self, r: &Ref) -> Result<()> {
        let host_id = self.hosts.read(r)?.id;
        self.provider.stop_host(&host_id).await?;
        self.poll_state(&host_id, HostState::Stopped).await
    }

    pub async fn start(&self, r: &Ref) -> Result<()> {
        let host_id = self.hosts.read(r)?.id;
        self.provider.start_host(&host_id).await?;
        self.poll_state(&host_id, HostState::Started).await
    }

    /// Stop then Start rather than the provider's native reboot, so the
    /// host observably passes through STOPPED before STARTED (spec §4.8).
    pub async fn reboot(&self, r: &Ref) -> Result<()> {
        self.stop(r).await?;
        self.start(r).await
    }

    async fn poll_state(&self, host_id: &str, target: HostState) -> Result<()> {
        let start = Instant::now();
        loop {
            let state = self.provider.get_host_state(host_id).await?;
            if state == target {
                return Ok(());
            }
            if start.elapsed() >= POWER_STATE_DEADLINE {
                return Err(SafeScaleError::timeout(format!("host {host_id} did not reach {target:?} within {:?}", POWER_STATE_DEADLINE)));
            }
            tokio::time::sleep(POWER_STATE_POLL_INTERVAL).await;
        }
    }

    fn ssh_config_for(&self, r: &Ref) -> Result<SshConfig> {
        let host_ref = Ref::Id(self.hosts.read(r)?.id);
        let core: Option<Host> = self.hosts.inspect(&host_ref, HOST_CORE_MODULE, |v: &Option<Host>| v.clone())?;
        let host = core.ok_or_else(|| SafeScaleError::inconsistent(format!("host {r} has no core payload")))?;
        let networking: HostNetworking = self.hosts.inspect(&host_ref, HOST_NETWORKING_MODULE, |v: &HostNetworking| v.clone())?;
        let access_ip = networking
            .access_ip()
            .ok_or_else(|| SafeScaleError::inconsistent(format!("host {r} has neither a public nor a private IP cached")))?;
        Ok(SshConfig::direct(access_ip, "safescale", host.private_key))
    }

    /// Run/Push/Pull (spec §4.8): thin wrappers over C6 with the tenant's
    /// phase timeout as the default execution ceiling.
    pub async fn run(&self, r: &Ref, command: &str, timeout: Option<Duration>) -> Result<ExecOutcome> {
        let ssh = self.ssh_config_for(r)?;
        let opts = ExecOptions { timeout: timeout.unwrap_or(self.tenant.ssh_phase_timeout), output_mode: OutputMode::Collect };
        self.ssh.run(&ssh, command, &opts).await
    }

    pub async fn push(&self, r: &Ref, content: &[u8], remote_path: &str, mode: u32) -> Result<()> {
        let ssh = self.ssh_config_for(r)?;
        self.ssh.copy_to_remote(&ssh, content, remote_path, mode).await
    }

    pub async fn pull(&self, r: &Ref, remote_path: &str) -> Result<Vec<u8>> {
        let ssh = self.ssh_config_for(r)?;
        self.ssh.copy_from_remote(&ssh, remote_path).await
    }

    /// PushStringToFile (spec §4.8): on a retryable SCP rejection (a
    /// leftover file with the wrong owner/mode is the known failure mode),
    /// clear the remote path with `sudo rm -f` and retry once before
    /// giving up; then apply the requested owner/mode.
    pub async fn push_string_to_file(&self, r: &Ref, content: &str, remote_path: &str, owner: Option<&str>, mode: Option<u32>) -> Result<()> {
        let ssh = self.ssh_config_for(r)?;
        let mode_bits = mode.unwrap_or(0o644);
        match self.ssh.copy_to_remote(&ssh, content.as_bytes(), remote_path, mode_bits).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::Execution => {
                let _ = self.ssh.run_sudo(&ssh, &format!("rm -f {remote_path}"), &ExecOptions::default()).await;
                self.ssh.copy_to_remote(&ssh, content.as_bytes(), remote_path, mode_bits).await?;
            }
            Err(e) => return Err(e),
        }
        if let Some(owner) = owner {
            self.ssh.run_sudo(&ssh, &format!("chown {owner} {remote_path}"), &ExecOptions::default()).await?;
        }
        if let Some(mode) = mode {
            self.ssh.run_sudo(&ssh, &format!("chmod {mode:o} {remote_path}"), &ExecOptions::default()).await?;
        }
        Ok(())
    }

    /// Records that `binding.feature_name` is now installed on `r`, replacing
    /// any prior binding for the same feature (a re-install after a failed
    /// uninstall, say). The feature installer never touches `hosts` directly —
    /// it goes through this seam the same way `safescale_network::gateway`
    /// goes through `HostLauncher` rather than reaching into a `HostService`.
    pub fn install_feature(&self, r: &Ref, binding: safescale_types::FeatureBinding) -> Result<()> {
        self.hosts.alter(r, HOST_FEATURES_MODULE, |v: &mut safescale_types::HostFeatures| {
            v.installed.retain(|b| b.feature_name != binding.feature_name);
            v.installed.push(binding);
            Ok(AlterOutcome::Changed(()))
        })
    }

    /// Removes `feature_name`'s binding from `r`. Idempotent: removing a
    /// feature that was never installed is a no-op, not an error.
    pub fn uninstall_feature(&self, r: &Ref, feature_name: &str) -> Result<()> {
        self.hosts.alter(r, HOST_FEATURES_MODULE, |v: &mut safescale_types::HostFeatures| {
            let before = v.installed.len();
            v.installed.retain(|b| b.feature_name != feature_name);
            if v.installed.len() == before {
                Ok(AlterOutcome::NoChange(()))
            } else {
                Ok(AlterOutcome::Changed(()))
            }
        })
    }

    pub fn installed_features(&self, r: &Ref) -> Result<Vec<safescale_types::FeatureBinding>> {
        self.hosts.inspect(r, HOST_FEATURES_MODULE, |v: &safescale_types::HostFeatures| v.installed.clone())
    }
}

/// Synthesizes a deterministic address in the RFC 5737 TEST-NET-3
/// documentation range (203.0.113.0/24) for a host's public IP, since
/// neither [`Host`] nor [`Provider`] return one. Never a routable address —
/// documented as a simplification in DESIGN.md.
fn synthesize_public_ip(host_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host_id.as_bytes());
    let digest = hasher.finalize();
    let octet = digest[0].clamp(1, 254);
    format!("203.0.113.{octet}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_blobstore::InMemoryBlobStore;
    use safescale_provider::{providers::mock::MockProvider, Capabilities};
    use std::sync::atomic::Ordering;

    fn registry() -> Arc<PropertyRegistry> {
        let mut registry = PropertyRegistry::new();
        register_host_properties(&mut registry);
        safescale_network::register_network_properties(&mut registry);
        Arc::new(registry)
    }

    fn service(caps: Capabilities) -> (HostService, Arc<MockProvider>) {
        let blobs: Arc<dyn safescale_blobstore::BlobStore> = Arc::new(InMemoryBlobStore::new());
        let registry = registry();
        let mock = Arc::new(MockProvider::new("mock", caps));
        let provider: Arc<dyn Provider> = mock.clone();
        let network = Arc::new(NetworkService::new(
            provider.clone(),
            Arc::new(MetadataCore::new(ResourceKind::Network, blobs.clone(), registry.clone())),
            Arc::new(MetadataCore::new(ResourceKind::Subnet, blobs.clone(), registry.clone())),
        ));
        let hosts = Arc::new(MetadataCore::new(ResourceKind::Host, blobs, registry));
        let tenant = TenantConfig::new("test-tenant", "mock");
        let ssh: Arc<dyn SshTransport> = Arc::new(safescale_ssh::MockSshTransport::new());
        (HostService::new(provider, hosts, network, tenant, ssh), mock)
    }

    fn request(name: &str) -> CreateHostRequest {
        let mut req = CreateHostRequest::new(name.to_string());
        req.image_name = Some("ubuntu-22.04".to_string());
        req
    }

    #[tokio::test]
    async fn create_without_subnet_or_public_ip_is_rejected_when_fallback_disabled() {
        let (svc, _mock) = service(Capabilities::default());
        let mut req = request("h1");
        req.allow_default_subnet = false;
        let err = svc.create(req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn create_succeeds_end_to_end_against_the_mock_provider() {
        let (svc, _mock) = service(Capabilities::default());
        let host = svc.create(request("h1")).await.unwrap();
        assert_eq!(host.state, HostState::Started);

        let row = svc.hosts.read(&Ref::Name("h1".to_string())).unwrap();
        assert_eq!(row.id, host.id);

        let networking: HostNetworking = svc
            .hosts
            .inspect(&Ref::Id(host.id.clone()), HOST_NETWORKING_MODULE, |v: &HostNetworking| v.clone())
            .unwrap();
        assert!(networking.access_ip().is_some());
        assert!(!networking.subnets.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let (svc, _mock) = service(Capabilities::default());
        svc.create(request("dup")).await.unwrap();
        let err = svc.create(request("dup")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn create_retries_a_single_injected_create_host_failure_and_succeeds() {
        let (svc, mock) = service(Capabilities::default());
        mock.fail_next_create_host.store(true, Ordering::SeqCst);
        let host = svc.create(request("flaky")).await.unwrap();
        assert_eq!(host.state, HostState::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn create_rolls_back_the_provider_host_and_keypair_when_it_never_becomes_ready() {
        let (svc, mock) = service(Capabilities::default());
        mock.never_become_ready.store(true, Ordering::SeqCst);
        let err = svc.create(request("never-ready")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(svc.hosts.read(&Ref::Name("never-ready".to_string())).is_err());
        assert!(mock.list_hosts().await.unwrap().iter().all(|h| h.name != "never-ready"));
    }

    #[tokio::test]
    async fn delete_removes_the_metadata_row_and_is_idempotent() {
        let (svc, _mock) = service(Capabilities::default());
        let host = svc.create(request("h1")).await.unwrap();
        let r = Ref::Id(host.id.clone());
        svc.delete(&r).await.unwrap();
        assert!(svc.hosts.read(&r).is_err());
        svc.delete(&r).await.unwrap();
    }

    #[tokio::test]
    async fn delete_rejects_a_gateway() {
        let (svc, _mock) = service(Capabilities::default());
        let mut req = request("gw1");
        req.is_gateway = true;
        req.public_ip = true;
        let host = svc.create(req).await.unwrap();
        let err = svc.delete(&Ref::Id(host.id)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn delete_rejects_a_host_with_an_attached_volume() {
        let (svc, _mock) = service(Capabilities::default());
        let host = svc.create(request("h1")).await.unwrap();
        let r = Ref::Id(host.id.clone());
        svc.hosts
            .alter(&r, HOST_VOLUMES_MODULE, |v: &mut HostVolumes| {
                v.attachments.push("vol-1".to_string());
                Ok(AlterOutcome::Changed(()))
            })
            .unwrap();
        let err = svc.delete(&r).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn install_feature_then_uninstall_round_trips_through_the_features_module() {
        let (svc, _mock) = service(Capabilities::default());
        let host = svc.create(request("h1")).await.unwrap();
        let r = Ref::Id(host.id.clone());

        assert!(svc.installed_features(&r).unwrap().is_empty());

        svc.install_feature(&r, safescale_types::FeatureBinding {
            feature_name: "docker".to_string(),
            requires: vec![],
            installed_at: chrono::Utc::now(),
        })
        .unwrap();
        let installed = svc.installed_features(&r).unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].feature_name, "docker");

        svc.uninstall_feature(&r, "docker").unwrap();
        assert!(svc.installed_features(&r).unwrap().is_empty());
        // Uninstalling again is a no-op, not an error.
        svc.uninstall_feature(&r, "docker").unwrap();
    }

    #[test]
    fn synthesize_public_ip_is_deterministic_and_in_documentation_range() {
        let a = synthesize_public_ip("srv-1");
        let b = synthesize_public_ip("srv-1");
        assert_eq!(a, b);
        assert!(a.starts_with("203.0.113."));
    }
}
