//! Core resource data model for SafeScale.
//!
//! Defines the resource kinds, identifiers, and enums shared by every other
//! crate in the workspace: hosts, networks, subnets, security groups,
//! volumes, virtual IPs, and feature bindings. Nothing here talks to a
//! provider or to disk — this crate is pure data.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Identifiers ──────────────────────────────────────────────────────────────

/// Tenant-unique, human-assigned name. Uniqueness is enforced per resource
/// kind by the metadata store, not by this type.
pub type Name = String;

/// Provider-assigned opaque identifier.
pub type ProviderId = String;

/// A reference to a resource: either by ID or by Name. Most lookup
/// operations across the core accept this rather than forcing callers to
/// know which they have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ref {
    Id(String),
    Name(String),
}

impl Ref {
    pub fn as_str(&self) -> &str {
        match self {
            Ref::Id(s) | Ref::Name(s) => s,
        }
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Ref {
    fn from(s: &str) -> Self {
        Ref::Name(s.to_string())
    }
}

/// Resource kinds, used as the metadata store's partition key and as the
/// top-level folder name in the persisted layout (`hosts/`, `networks/`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Host,
    Network,
    Subnet,
    SecurityGroup,
    Volume,
    VirtualIp,
    Feature,
    Cluster,
}

impl ResourceKind {
    /// The folder name this kind is stored under in the blob store.
    pub fn folder(self) -> &'static str {
        match self {
            ResourceKind::Host => "hosts",
            ResourceKind::Network => "networks",
            ResourceKind::Subnet => "subnets",
            ResourceKind::SecurityGroup => "security-groups",
            ResourceKind::Volume => "volumes",
            ResourceKind::VirtualIp => "virtual-ips",
            ResourceKind::Feature => "features",
            ResourceKind::Cluster => "clusters",
        }
    }
}

// ─── Host ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostState {
    #[default]
    Unknown,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
}

/// Core abstract Host value (the part the provider hands back), as distinct
/// from the property bags that are attached under metadata-store locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: ProviderId,
    pub name: Name,
    pub state: HostState,
    pub private_key: String,
    pub password: String,
    pub is_gateway: bool,
}

/// Sizing actually allocated vs. what was requested — a host property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSizing {
    pub requested_cpus: u32,
    pub requested_ram_mb: u32,
    pub requested_disk_gb: u32,
    pub allocated_cpus: u32,
    pub allocated_ram_mb: u32,
    pub allocated_disk_gb: u32,
    pub gpu_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescription {
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub tenant: String,
}

/// Networking property: the default subnet is always index 0.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostNetworking {
    pub subnets: Vec<ProviderId>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub is_gateway: bool,
}

impl HostNetworking {
    pub fn default_subnet(&self) -> Option<&ProviderId> {
        self.subnets.first()
    }

    /// Invariant 3: accessIP = publicIP if present, else privateIP.
    pub fn access_ip(&self) -> Option<&str> {
        self.public_ip
            .as_deref()
            .or(self.private_ip.as_deref())
    }

    /// Invariant 1: a host must have a subnet or a public IP, never neither.
    pub fn is_valid(&self) -> bool {
        !self.subnets.is_empty() || self.public_ip.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostSystem {
    pub os_type: String,
    pub os_flavor: String,
    pub image_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostSecurityGroups {
    pub bound: Vec<ProviderId>,
    pub default_sg: Option<ProviderId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostFeatures {
    pub installed: Vec<FeatureBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostVolumes {
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostShares {
    pub exported: Vec<String>,
    pub mounted: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostClusterMembership {
    pub cluster_id: Option<String>,
}

/// A feature name and the dependency list it was installed with — attached
/// to either a Host or a Cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBinding {
    pub feature_name: String,
    pub requires: Vec<String>,
    pub installed_at: DateTime<Utc>,
}

// ─── Network / Subnet ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: ProviderId,
    pub name: Name,
    pub cidr: String,
    pub ip_version: IpVersion,
    pub gateway_id: Option<ProviderId>,
    pub secondary_gateway_id: Option<ProviderId>,
    pub vip: Option<ProviderId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: ProviderId,
    pub name: Name,
    pub cidr: String,
    pub network_id: ProviderId,
    pub gateway_sg_id: ProviderId,
    pub internal_sg_id: ProviderId,
}

/// Hosts attached to a subnet — a subnet property bag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubnetHosts {
    pub host_ids: Vec<ProviderId>,
}

/// CIDR reserved for the single-host fallback network (spec §4.8 step 4).
pub const SINGLE_HOST_NETWORK_NAME: &str = "net-safescale";
pub const SINGLE_HOST_NETWORK_CIDR: &str = "10.0.0.0/17";

/// First N addresses of a subnet's pool reserved for static allocation + VIP.
pub const RESERVED_POOL_ADDRESSES: u8 = 11;

// ─── Security Group ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgDirection {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SgProtocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub direction: SgDirection,
    pub protocol: SgProtocol,
    pub port_from: Option<u16>,
    pub port_to: Option<u16>,
    pub cidr: Option<String>,
    pub peer_security_group_id: Option<ProviderId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: ProviderId,
    pub name: Name,
    pub description: String,
    pub rules: Vec<SecurityGroupRule>,
}

// ─── Volume ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeSpeed {
    Hdd,
    Ssd,
    Cold,
}

/// Volume lifecycle state. `Other` preserves the raw provider string rather
/// than asserting an error has occurred (Open Question 3, SPEC_FULL.md §9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeState {
    Creating,
    Available,
    Attaching,
    Detaching,
    Used,
    Deleting,
    Error,
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: ProviderId,
    pub name: Name,
    pub size_gb: u32,
    pub speed: VolumeSpeed,
    pub state: VolumeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub id: ProviderId,
    pub server_id: ProviderId,
    pub volume_id: ProviderId,
    pub device: String,
}

// ─── Virtual IP ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualIp {
    pub id: ProviderId,
    pub name: Name,
    pub network_id: ProviderId,
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub bound_host_ids: Vec<ProviderId>,
}

// ─── Sizing request ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingRequest {
    pub min_cpus: u32,
    pub min_ram_mb: u32,
    pub min_disk_gb: u32,
    pub gpu_count: u32,
    pub min_cpu_freq_ghz: Option<f32>,
}

impl Default for SizingRequest {
    fn default() -> Self {
        Self {
            min_cpus: 1,
            min_ram_mb: 1024,
            min_disk_gb: 10,
            gpu_count: 0,
            min_cpu_freq_ghz: None,
        }
    }
}

// ─── Validation helpers ───────────────────────────────────────────────────────

/// Names are tenant-unique across a kind; keep them filesystem- and
/// provider-API safe.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("h1"));
        assert!(validate_name("net-safescale"));
        assert!(!validate_name(""));
        assert!(!validate_name("invalid name"));
    }

    #[test]
    fn test_host_networking_access_ip_prefers_public() {
        let mut net = HostNetworking {
            subnets: vec!["s1".into()],
            public_ip: Some("1.2.3.4".into()),
            private_ip: Some("10.0.0.5".into()),
            is_gateway: false,
        };
        assert_eq!(net.access_ip(), Some("1.2.3.4"));
        net.public_ip = None;
        assert_eq!(net.access_ip(), Some("10.0.0.5"));
    }

    #[test]
    fn test_host_networking_invariant_rejects_neither() {
        let net = HostNetworking::default();
        assert!(!net.is_valid());
    }

    #[test]
    fn test_host_networking_invariant_accepts_public_ip_only() {
        let net = HostNetworking {
            subnets: vec![],
            public_ip: Some("1.2.3.4".into()),
            private_ip: None,
            is_gateway: false,
        };
        assert!(net.is_valid());
    }

    #[test]
    fn test_resource_kind_folder() {
        assert_eq!(ResourceKind::Host.folder(), "hosts");
        assert_eq!(ResourceKind::SecurityGroup.folder(), "security-groups");
    }

    #[test]
    fn test_ref_display() {
        let r = Ref::Name("h1".to_string());
        assert_eq!(r.to_string(), "h1");
        assert_eq!(r.as_str(), "h1");
    }

    #[test]
    fn test_volume_state_other_roundtrip() {
        let s = VolumeState::Other("weird-provider-state".to_string());
        let json = serde_json::to_string(&s).expect("serialize");
        let back: VolumeState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, s);
    }
}
