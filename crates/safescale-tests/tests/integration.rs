//! End-to-end scenarios spanning provider, metadata, network, host, feature,
//! and VIP services wired together the same way `safescaled::context` wires
//! them, against the in-memory `MockProvider`/`MockSshTransport` test
//! doubles rather than a live cloud.

use safescale_blobstore::InMemoryBlobStore;
use safescale_config::TenantConfig;
use safescale_error::ErrorKind;
use safescale_feature::{parse_feature, Action, FeatureContext, FeatureService, Method, ProceedSettings};
use safescale_host::{CreateHostRequest, HostService};
use safescale_metadata::{MetadataCore, PropertyRegistry};
use safescale_network::{NetworkService, VipService};
use safescale_provider::providers::mock::MockProvider;
use safescale_provider::{Capabilities, Provider};
use safescale_ssh::{MockSshTransport, SshTransport};
use safescale_types::{Ref, ResourceKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Everything a scenario needs, wired the way `safescaled::context::build`
/// wires a tenant's daemon-side services.
struct Stack {
    provider: Arc<MockProvider>,
    ssh: Arc<MockSshTransport>,
    hosts: Arc<HostService>,
    network: Arc<NetworkService>,
    features: Arc<FeatureService>,
    vips: VipService,
}

fn registry() -> Arc<PropertyRegistry> {
    let mut registry = PropertyRegistry::new();
    safescale_host::register_host_properties(&mut registry);
    safescale_network::register_network_properties(&mut registry);
    safescale_network::register_vip_properties(&mut registry);
    Arc::new(registry)
}

fn stack(caps: Capabilities) -> Stack {
    let blobs: Arc<dyn safescale_blobstore::BlobStore> = Arc::new(InMemoryBlobStore::new());
    let registry = registry();

    let mock = Arc::new(MockProvider::new("mock", caps));
    let provider: Arc<dyn Provider> = mock.clone();

    let networks = Arc::new(MetadataCore::new(ResourceKind::Network, blobs.clone(), registry.clone()));
    let subnets = Arc::new(MetadataCore::new(ResourceKind::Subnet, blobs.clone(), registry.clone()));
    let network = Arc::new(NetworkService::new(provider.clone(), networks, subnets));

    let host_rows = Arc::new(MetadataCore::new(ResourceKind::Host, blobs.clone(), registry.clone()));
    let tenant = TenantConfig::new("acme", "mock");
    let ssh = Arc::new(MockSshTransport::new());
    let ssh_transport: Arc<dyn SshTransport> = ssh.clone();
    let hosts = Arc::new(HostService::new(provider.clone(), host_rows, network.clone(), tenant, ssh_transport));

    let features = Arc::new(FeatureService::new(hosts.clone()));

    let vip_rows = Arc::new(MetadataCore::new(ResourceKind::VirtualIp, blobs, registry));
    let vips = VipService::new(provider.clone(), vip_rows);

    Stack { provider: mock, ssh, hosts, network, features, vips }
}

fn host_request(name: &str) -> CreateHostRequest {
    let mut req = CreateHostRequest::new(name.to_string());
    req.image_name = Some("ubuntu-20.04".to_string());
    req.template_id = Some("cpu4-ram8".to_string());
    req.public_ip = true;
    req
}

fn access_ip(stack: &Stack, host_id: &str) -> String {
    let networking: safescale_types::HostNetworking = stack
        .hosts
        .inspect(&Ref::Id(host_id.to_string()), safescale_host::HOST_NETWORKING_MODULE, |v: &safescale_types::HostNetworking| v.clone())
        .unwrap();
    networking.access_ip().unwrap().to_string()
}

/// S1: single-host fast path with the default-subnet fallback.
#[tokio::test]
async fn s1_single_host_fast_path_creates_fallback_subnet_and_binds_host() {
    let stack = stack(Capabilities::default());

    let host = stack.hosts.create(host_request("h1")).await.unwrap();

    // Fallback subnet `net-safescale`/10.0.0.0/17 was created on demand.
    let fallback_network = stack.provider.inspect_network_by_name("net-safescale").await.unwrap();
    assert_eq!(fallback_network.cidr, "10.0.0.0/17");
    let fallback_subnets = stack.provider.list_subnets(&fallback_network.id).await.unwrap();
    assert_eq!(fallback_subnets.len(), 1);

    // accessIP == publicIP per invariant 3, and the metadata row is present.
    let row = stack.hosts.read(&Ref::Name("h1".to_string())).unwrap();
    assert_eq!(row.id, host.id);
    let networking: safescale_types::HostNetworking = stack
        .hosts
        .inspect(&Ref::Id(host.id.clone()), safescale_host::HOST_NETWORKING_MODULE, |v: &safescale_types::HostNetworking| v.clone())
        .unwrap();
    assert!(networking.access_ip().is_some());
    assert_eq!(networking.access_ip(), networking.public_ip.as_deref());
    assert_eq!(networking.subnets, vec![fallback_subnets[0].id.clone()]);

    // The host is linked into the subnet's attached-hosts bookkeeping.
    let attached = stack.network.attached_hosts(&Ref::Id(fallback_subnets[0].id.clone())).unwrap();
    assert_eq!(attached, vec![host.id.clone()]);
}

/// S2: rollback on phase-1 (SSH readiness) timeout — no metadata row, no
/// provider host, no orphan keypair survive a failed create.
#[tokio::test(start_paused = true)]
async fn s2_rollback_on_phase1_timeout_leaves_no_trace() {
    let stack = stack(Capabilities::default());
    stack.ssh.never_ready.store(true, Ordering::SeqCst);

    let err = stack.hosts.create(host_request("h2")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);

    assert!(stack.hosts.read(&Ref::Name("h2".to_string())).is_err());
    assert!(stack.provider.list_hosts().await.unwrap().iter().all(|h| h.name != "h2"));
    assert!(stack.provider.list_keypairs().await.unwrap().is_empty());
}

const DOCKER_FEATURE: &str = r#"
feature:
  name: docker
  suitableFor:
    cluster: true
  install:
    bash:
      check:
        pace: "present"
        steps:
          present:
            targets: { nodes: "all" }
            run: "test -f /usr/bin/docker"
      add:
        pace: "install"
        steps:
          install:
            targets: { nodes: "*" }
            run: "curl -fsSL https://get.docker.com | sh"
"#;

/// S3: parallel feature install on a 3-node cluster with one node already
/// compliant — Check identifies the other two as concerned, and the install
/// pace step only runs against that concerned subset.
#[tokio::test]
async fn s3_parallel_feature_install_on_three_node_cluster() {
    let stack = stack(Capabilities::default());
    let mut ids = Vec::new();
    for n in ["n1", "n2", "n3"] {
        let host = stack.hosts.create(host_request(n)).await.unwrap();
        ids.push(host.id);
    }

    // n1 is already compliant: its check command succeeds. n2 and n3 are
    // not: their next `run` call (the check probe) fails once.
    stack.ssh.fail_next_run_on(access_ip(&stack, &ids[1]));
    stack.ssh.fail_next_run_on(access_ip(&stack, &ids[2]));

    let parsed = parse_feature(DOCKER_FEATURE).unwrap();
    let ctx = FeatureContext { nodes: vec!["n1".to_string(), "n2".to_string(), "n3".to_string()], ..Default::default() };

    let concerned = stack.features.check(&parsed.feature, Method::Bash, &ctx).await.unwrap();
    assert_eq!(concerned, ["n2".to_string(), "n3".to_string()].into_iter().collect());

    // Re-arm the same two failing probes so Add's own internal Check pass
    // (re-run before Add proceeds) sees the identical concerned set.
    stack.ssh.fail_next_run_on(access_ip(&stack, &ids[1]));
    stack.ssh.fail_next_run_on(access_ip(&stack, &ids[2]));

    let outcomes = stack
        .features
        .proceed(&parsed.feature, Method::Bash, Action::Add, &ctx, &Default::default(), &ProceedSettings::default())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].step, "install");
    assert_eq!(outcomes[0].results.len(), 2);
    assert!(outcomes[0].results.contains_key("n2"));
    assert!(outcomes[0].results.contains_key("n3"));
    assert!(!outcomes[0].results.contains_key("n1"));
    assert!(outcomes[0].all_succeeded());
}

/// S4: VIP create → bind two hosts → unbind one → delete.
#[tokio::test]
async fn s4_vip_bind_unbind_delete() {
    let stack = stack(Capabilities::default());
    let h1 = stack.hosts.create(host_request("h1")).await.unwrap();
    let h2 = stack.hosts.create(host_request("h2")).await.unwrap();

    let network = stack.provider.inspect_network_by_name("net-safescale").await.unwrap();
    let vip = stack.vips.create(&"v1".to_string(), &network.id).await.unwrap();
    let r = Ref::Id(vip.id.clone());

    stack.vips.bind(&r, &h1.id).await.unwrap();
    stack.vips.bind(&r, &h2.id).await.unwrap();
    assert_eq!(stack.vips.read(&r).unwrap().bound_host_ids, vec![h1.id.clone(), h2.id.clone()]);

    stack.vips.unbind(&r, &h1.id).await.unwrap();
    assert_eq!(stack.vips.read(&r).unwrap().bound_host_ids, vec![h2.id.clone()]);

    stack.vips.delete(&r).await.unwrap();
    assert!(stack.vips.read(&r).is_err());
}

/// S5: registering every crate's property modules into one shared registry
/// — the composition `safescaled::context` performs at daemon startup —
/// does not collide on module names, and a custom versioned module still
/// upgrades transparently on reload.
#[test]
fn s5_combined_registry_upgrades_a_custom_module_on_reload() {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
    struct NetworkingV1 {
        default_network_id: String,
    }
    #[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
    struct NetworkingV2 {
        default_subnet_id: String,
        subnets_by_id: Vec<String>,
    }

    let mut reg = PropertyRegistry::new();
    safescale_host::register_host_properties(&mut reg);
    safescale_network::register_network_properties(&mut reg);
    safescale_network::register_vip_properties(&mut reg);
    reg.register_zero("custom_networking", 1, &NetworkingV1::default());
    reg.register_zero("custom_networking", 2, &NetworkingV2::default());
    reg.register_upgrade("custom_networking", 1, |old| {
        let v1: NetworkingV1 = serde_json::from_value(old.clone()).unwrap();
        serde_json::to_value(NetworkingV2 { default_subnet_id: v1.default_network_id.clone(), subnets_by_id: vec![v1.default_network_id] }).unwrap()
    });
    let reg = Arc::new(reg);

    let blobs: Arc<dyn safescale_blobstore::BlobStore> = Arc::new(InMemoryBlobStore::new());
    let core = MetadataCore::new(ResourceKind::Host, blobs, reg);
    core.carry("id-1", "h1", "custom_networking", 1, &NetworkingV1 { default_network_id: "net-1".to_string() }).unwrap();

    core.reload(&Ref::Id("id-1".to_string())).unwrap();
    let upgraded: NetworkingV2 = core.inspect(&Ref::Id("id-1".to_string()), "custom_networking", |v: &NetworkingV2| v.clone()).unwrap();
    assert_eq!(upgraded, NetworkingV2 { default_subnet_id: "net-1".to_string(), subnets_by_id: vec!["net-1".to_string()] });
}

/// S6: the retry engine surfaces Timeout after the bounded number of
/// attempts a fixed 5-second delay policy allows within a 30-second
/// deadline — ceil(30/5) = 6.
#[tokio::test(start_paused = true)]
async fn s6_retry_surfaces_timeout_after_bounded_attempts() {
    use safescale_error::SafeScaleError;
    use safescale_retry::{retry, DelayPolicy};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    let attempts = AtomicU32::new(0);
    let result: safescale_error::Result<()> = retry(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(SafeScaleError::not_available("provider returned HTTP 500")) }
        },
        DelayPolicy::Fixed5s,
        Duration::from_secs(30),
        None::<fn(safescale_retry::Verdict, u32)>,
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
}
