//! Request/response shapes for [`crate::Provider`] operations that aren't
//! already resource types in `safescale-types` (spec §4.5).

use safescale_types::{IpVersion, Name, ProviderId, VolumeSpeed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TenantParameters = HashMap<String, String>;
pub type AuthOptions = HashMap<String, String>;
pub type ConfigurationOptions = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: ProviderId,
    pub name: String,
}

/// A sizing template (aka "flavor"). `gpu_count`/`cpu_freq_ghz` let the host
/// creation pipeline (spec §4.8 step 3) prefer the scanner database when
/// GPU or CPU-frequency constraints are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: ProviderId,
    pub name: String,
    pub cpus: u32,
    pub ram_mb: u32,
    pub disk_gb: u32,
    pub gpu_count: u32,
    pub cpu_freq_ghz: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub name: String,
    pub public_key: String,
    /// Present only immediately after `create_keypair`/`import_keypair` —
    /// the private key is never persisted by the provider itself.
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: Name,
    pub cidr: String,
    pub ip_version: IpVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubnetRequest {
    pub name: Name,
    pub cidr: String,
    pub network_id: ProviderId,
    pub dhcp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateHostRequest {
    pub name: Name,
    pub template_id: ProviderId,
    pub image_id: ProviderId,
    pub subnet_ids: Vec<ProviderId>,
    pub public_ip: bool,
    pub keypair_name: Option<String>,
    pub user_data: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: Name,
    pub size_gb: u32,
    pub speed: VolumeSpeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeAttachmentRequest {
    pub server_id: ProviderId,
    pub volume_id: ProviderId,
    pub device: String,
}
