//! CreateGateway (spec §4.9): launch a host with `PublicIP=true`,
//! `IsGateway=true`, bound to both the subnet's gateway-SG and internal-SG,
//! which then runs phases 2-5 explicitly rather than the abbreviated
//! gateway-only phase sequence a regular host follows.
//!
//! `safescale-host` owns the actual host creation pipeline (step ordering,
//! rollback stack, phase execution); `safescale-network` cannot depend on it
//! without an import cycle (`safescale-host` already depends on
//! `safescale-network` for the single-host fallback subnet). [`HostLauncher`]
//! is the seam: the daemon wires a `safescale-host` implementation of this
//! trait into the network service at startup, the same inversion
//! `safescale-metadata` uses for property registration.

use async_trait::async_trait;
use safescale_error::Result;
use safescale_types::{Host, Subnet};

/// Host-launching capability injected into the network lifecycle so this
/// crate never depends on `safescale-host` directly.
#[async_trait]
pub trait HostLauncher: Send + Sync {
    /// Launch a gateway host for `subnet`. The implementation is
    /// responsible for marking the host `IsGateway=true`, binding the
    /// gateway-SG and internal-SG, and running the full PHASE2-PHASE5
    /// sequence (gateways skip phases 3-4 only when acting as a plain
    /// member host, never when acting as the gateway itself).
    async fn launch_gateway(&self, subnet: &Subnet) -> Result<Host>;
}

/// Launches a gateway for `subnet` via `launcher`. A thin pass-through, kept
/// as a free function rather than a method on `NetworkService` so call
/// sites read the same way the spec phrases the operation ("CreateGateway"),
/// without implying `NetworkService` itself knows how to provision a host.
pub async fn create_gateway(launcher: &dyn HostLauncher, subnet: &Subnet) -> Result<Host> {
    launcher.launch_gateway(subnet).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_types::HostState;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeLauncher {
        called: AtomicBool,
    }

    #[async_trait]
    impl HostLauncher for FakeLauncher {
        async fn launch_gateway(&self, subnet: &Subnet) -> Result<Host> {
            self.called.store(true, Ordering::SeqCst);
            Ok(Host {
                id: format!("gw-{}", subnet.id),
                name: format!("gw-{}", subnet.name),
                state: HostState::Started,
                private_key: String::new(),
                password: String::new(),
                is_gateway: true,
            })
        }
    }

    #[tokio::test]
    async fn create_gateway_delegates_to_the_injected_launcher() {
        let launcher = FakeLauncher { called: AtomicBool::new(false) };
        let subnet = Subnet {
            id: "subnet-1".into(),
            name: "s1".into(),
            cidr: "10.0.0.0/24".into(),
            network_id: "net-1".into(),
            gateway_sg_id: "sg-gw".into(),
            internal_sg_id: "sg-int".into(),
        };
        let host = create_gateway(&launcher, &subnet).await.unwrap();
        assert!(launcher.called.load(Ordering::SeqCst));
        assert!(host.is_gateway);
        assert_eq!(host.id, "gw-subnet-1");
    }
}
