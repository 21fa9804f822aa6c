//! The single data-driven interceptor the REDESIGN FLAGS call for, in place
//! of four hand-written decorator layers (validator, error-tracer, logger,
//! each repeating all ~40 method signatures).
//!
//! [`invoke`] is called once per [`InterceptedProvider`] method with a
//! precondition closure (argument validation), the inner provider call, and
//! a postcondition closure (sanity-checking the response, e.g. a returned
//! host missing an id). It logs at `debug`/`warn` and converts a captured
//! panic into a `Runtime`-kind error so it never escapes the provider call,
//! the same boundary `safescale-task` draws for Task actions.
//!
//! Composition order is fixed: inner-provider -> validator -> error-tracer
//! -> logger (spec §4.5); `InterceptedProvider` folds all three wrapper
//! concerns into this one pass rather than nesting three structs.

use crate::*;
use futures_util::FutureExt;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_types::{Host, HostState, SecurityGroup, SecurityGroupRule, Subnet, VirtualIp, Volume, VolumeAttachment};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Run `call` with a `pre` validation pass and a `post` sanity pass, logging
/// and converting panics as described above. Panic capture is delegated to
/// `futures_util::FutureExt::catch_unwind` (the crate stays `unsafe`-free
/// itself; the unsafety lives in `futures-util`, already in the workspace's
/// dependency stack).
pub async fn invoke<T, Fut>(
    op: &'static str,
    pre: impl FnOnce() -> Result<()>,
    post: impl FnOnce(&T) -> Result<()>,
    call: impl FnOnce() -> Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    pre()?;
    let started = Instant::now();
    let outcome = AssertUnwindSafe(call()).catch_unwind().await;
    match outcome {
        Ok(Ok(value)) => {
            if let Err(e) = post(&value) {
                warn!(op, error = %e, "provider response failed a postcondition check");
            }
            debug!(op, elapsed_ms = started.elapsed().as_millis(), "provider op ok");
            Ok(value)
        }
        Ok(Err(e)) => {
            warn!(op, error = %e, "provider op failed");
            Err(e)
        }
        Err(_panic) => {
            let msg = format!("provider op {op} panicked");
            warn!("{msg}");
            Err(SafeScaleError::new(ErrorKind::Runtime, msg))
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(SafeScaleError::invalid_request(format!(
            "{field} must not be empty"
        )))
    } else {
        Ok(())
    }
}

fn ok<T>(_: &T) -> Result<()> {
    Ok(())
}

fn non_empty_id<T>(get_id: impl Fn(&T) -> &str) -> impl Fn(&T) -> Result<()> {
    move |value: &T| require_non_empty("response id", get_id(value))
}

/// Wraps an inner `Arc<dyn Provider>`, applying [`invoke`] on every call.
/// Adds no per-instance mutable state, so the same `InterceptedProvider`
/// remains safe to share across concurrently-running Tasks (spec §5).
#[derive(Debug, Clone)]
pub struct InterceptedProvider {
    inner: Arc<dyn Provider>,
}

impl InterceptedProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Arc<dyn Provider> {
        Arc::new(Self { inner })
    }
}

#[async_trait::async_trait]
impl Provider for InterceptedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tenant_parameters(&self) -> TenantParameters {
        self.inner.tenant_parameters()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn auth_options(&self) -> AuthOptions {
        self.inner.auth_options()
    }

    fn configuration_options(&self) -> ConfigurationOptions {
        self.inner.configuration_options()
    }

    async fn list_regions(&self) -> Result<Vec<Region>> {
        invoke("list_regions", || Ok(()), ok, || self.inner.list_regions()).await
    }

    async fn list_availability_zones(&self, region_id: &str) -> Result<Vec<AvailabilityZone>> {
        let region_id = region_id.to_string();
        invoke(
            "list_availability_zones",
            || require_non_empty("region_id", &region_id),
            ok,
            || self.inner.list_availability_zones(&region_id),
        )
        .await
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        invoke("list_images", || Ok(()), ok, || self.inner.list_images()).await
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        invoke("list_templates", || Ok(()), ok, || self.inner.list_templates()).await
    }

    async fn inspect_template(&self, id: &str) -> Result<Template> {
        let id = id.to_string();
        invoke(
            "inspect_template",
            || require_non_empty("id", &id),
            non_empty_id(|t: &Template| t.id.as_str()),
            || self.inner.inspect_template(&id),
        )
        .await
    }

    async fn create_keypair(&self, name: &str) -> Result<KeyPair> {
        let name = name.to_string();
        invoke(
            "create_keypair",
            || require_non_empty("name", &name),
            non_empty_id(|k: &KeyPair| k.name.as_str()),
            || self.inner.create_keypair(&name),
        )
        .await
    }

    async fn import_keypair(&self, name: &str, public_key: &str) -> Result<KeyPair> {
        let (name, public_key) = (name.to_string(), public_key.to_string());
        invoke(
            "import_keypair",
            || {
                require_non_empty("name", &name)?;
                require_non_empty("public_key", &public_key)
            },
            ok,
            || self.inner.import_keypair(&name, &public_key),
        )
        .await
    }

    async fn inspect_keypair(&self, name: &str) -> Result<KeyPair> {
        let name = name.to_string();
        invoke(
            "inspect_keypair",
            || require_non_empty("name", &name),
            ok,
            || self.inner.inspect_keypair(&name),
        )
        .await
    }

    async fn list_keypairs(&self) -> Result<Vec<KeyPair>> {
        invoke("list_keypairs", || Ok(()), ok, || self.inner.list_keypairs()).await
    }

    async fn delete_keypair(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        invoke(
            "delete_keypair",
            || require_non_empty("name", &name),
            ok,
            || self.inner.delete_keypair(&name),
        )
        .await
    }

    async fn create_network(&self, req: &CreateNetworkRequest) -> Result<safescale_types::Network> {
        let req = req.clone();
        invoke(
            "create_network",
            || require_non_empty("name", &req.name),
            non_empty_id(|n: &safescale_types::Network| n.id.as_str()),
            || self.inner.create_network(&req),
        )
        .await
    }

    async fn create_subnet(&self, req: &CreateSubnetRequest) -> Result<Subnet> {
        let req = req.clone();
        invoke(
            "create_subnet",
            || {
                require_non_empty("name", &req.name)?;
                require_non_empty("network_id", &req.network_id)
            },
            non_empty_id(|s: &Subnet| s.id.as_str()),
            || self.inner.create_subnet(&req),
        )
        .await
    }

    async fn inspect_network(&self, id: &str) -> Result<safescale_types::Network> {
        let id = id.to_string();
        invoke(
            "inspect_network",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_network(&id),
        )
        .await
    }

    async fn inspect_network_by_name(&self, name: &str) -> Result<safescale_types::Network> {
        let name = name.to_string();
        invoke(
            "inspect_network_by_name",
            || require_non_empty("name", &name),
            ok,
            || self.inner.inspect_network_by_name(&name),
        )
        .await
    }

    async fn inspect_subnet(&self, id: &str) -> Result<Subnet> {
        let id = id.to_string();
        invoke(
            "inspect_subnet",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_subnet(&id),
        )
        .await
    }

    async fn inspect_subnet_by_name(&self, network_id: &str, name: &str) -> Result<Subnet> {
        let (network_id, name) = (network_id.to_string(), name.to_string());
        invoke(
            "inspect_subnet_by_name",
            || {
                require_non_empty("network_id", &network_id)?;
                require_non_empty("name", &name)
            },
            ok,
            || self.inner.inspect_subnet_by_name(&network_id, &name),
        )
        .await
    }

    async fn list_networks(&self) -> Result<Vec<safescale_types::Network>> {
        invoke("list_networks", || Ok(()), ok, || self.inner.list_networks()).await
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>> {
        let network_id = network_id.to_string();
        invoke(
            "list_subnets",
            || require_non_empty("network_id", &network_id),
            ok,
            || self.inner.list_subnets(&network_id),
        )
        .await
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_network",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_network(&id),
        )
        .await
    }

    async fn delete_subnet(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_subnet",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_subnet(&id),
        )
        .await
    }

    async fn create_host(&self, req: &CreateHostRequest) -> Result<Host> {
        let req = req.clone();
        invoke(
            "create_host",
            || {
                require_non_empty("name", &req.name)?;
                if req.subnet_ids.is_empty() && !req.public_ip {
                    // Invariant 1: never neither a subnet nor a public IP.
                    return Err(SafeScaleError::invalid_request(
                        "host must have at least one subnet or a public IP",
                    ));
                }
                Ok(())
            },
            non_empty_id(|h: &Host| h.id.as_str()),
            || self.inner.create_host(&req),
        )
        .await
    }

    async fn inspect_host(&self, id: &str) -> Result<Host> {
        let id = id.to_string();
        invoke(
            "inspect_host",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_host(&id),
        )
        .await
    }

    async fn inspect_host_by_name(&self, name: &str) -> Result<Host> {
        let name = name.to_string();
        invoke(
            "inspect_host_by_name",
            || require_non_empty("name", &name),
            ok,
            || self.inner.inspect_host_by_name(&name),
        )
        .await
    }

    async fn get_host_state(&self, id: &str) -> Result<HostState> {
        let id = id.to_string();
        invoke(
            "get_host_state",
            || require_non_empty("id", &id),
            ok,
            || self.inner.get_host_state(&id),
        )
        .await
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        invoke("list_hosts", || Ok(()), ok, || self.inner.list_hosts()).await
    }

    async fn delete_host(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_host",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_host(&id),
        )
        .await
    }

    async fn start_host(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke("start_host", || require_non_empty("id", &id), ok, || {
            self.inner.start_host(&id)
        })
        .await
    }

    async fn stop_host(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke("stop_host", || require_non_empty("id", &id), ok, || {
            self.inner.stop_host(&id)
        })
        .await
    }

    async fn reboot_host(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke("reboot_host", || require_non_empty("id", &id), ok, || {
            self.inner.reboot_host(&id)
        })
        .await
    }

    async fn resize_host(&self, id: &str, template_id: &str) -> Result<()> {
        let (id, template_id) = (id.to_string(), template_id.to_string());
        invoke(
            "resize_host",
            || {
                require_non_empty("id", &id)?;
                require_non_empty("template_id", &template_id)
            },
            ok,
            || self.inner.resize_host(&id, &template_id),
        )
        .await
    }

    async fn wait_host_ready(&self, id: &str, timeout: std::time::Duration) -> Result<HostState> {
        let id = id.to_string();
        invoke(
            "wait_host_ready",
            || require_non_empty("id", &id),
            ok,
            || self.inner.wait_host_ready(&id, timeout),
        )
        .await
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        let req = req.clone();
        invoke(
            "create_volume",
            || require_non_empty("name", &req.name),
            non_empty_id(|v: &Volume| v.id.as_str()),
            || self.inner.create_volume(&req),
        )
        .await
    }

    async fn inspect_volume(&self, id: &str) -> Result<Volume> {
        let id = id.to_string();
        invoke(
            "inspect_volume",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_volume(&id),
        )
        .await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        invoke("list_volumes", || Ok(()), ok, || self.inner.list_volumes()).await
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_volume",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_volume(&id),
        )
        .await
    }

    async fn create_volume_attachment(
        &self,
        req: &CreateVolumeAttachmentRequest,
    ) -> Result<VolumeAttachment> {
        let req = req.clone();
        invoke(
            "create_volume_attachment",
            || {
                require_non_empty("server_id", &req.server_id)?;
                require_non_empty("volume_id", &req.volume_id)
            },
            non_empty_id(|a: &VolumeAttachment| a.id.as_str()),
            || self.inner.create_volume_attachment(&req),
        )
        .await
    }

    async fn inspect_volume_attachment(&self, id: &str) -> Result<VolumeAttachment> {
        let id = id.to_string();
        invoke(
            "inspect_volume_attachment",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_volume_attachment(&id),
        )
        .await
    }

    async fn list_volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        let server_id = server_id.to_string();
        invoke(
            "list_volume_attachments",
            || require_non_empty("server_id", &server_id),
            ok,
            || self.inner.list_volume_attachments(&server_id),
        )
        .await
    }

    async fn delete_volume_attachment(&self, server_id: &str, id: &str) -> Result<()> {
        let (server_id, id) = (server_id.to_string(), id.to_string());
        invoke(
            "delete_volume_attachment",
            || {
                require_non_empty("server_id", &server_id)?;
                require_non_empty("id", &id)
            },
            ok,
            || self.inner.delete_volume_attachment(&server_id, &id),
        )
        .await
    }

    async fn create_vip(&self, name: &safescale_types::Name, network_id: &str) -> Result<VirtualIp> {
        let (name, network_id) = (name.clone(), network_id.to_string());
        invoke(
            "create_vip",
            || {
                require_non_empty("name", &name)?;
                require_non_empty("network_id", &network_id)
            },
            non_empty_id(|v: &VirtualIp| v.id.as_str()),
            || self.inner.create_vip(&name, &network_id),
        )
        .await
    }

    async fn add_public_ip_to_vip(&self, vip_id: &str) -> Result<VirtualIp> {
        let vip_id = vip_id.to_string();
        invoke(
            "add_public_ip_to_vip",
            || require_non_empty("vip_id", &vip_id),
            ok,
            || self.inner.add_public_ip_to_vip(&vip_id),
        )
        .await
    }

    async fn bind_host_to_vip(&self, vip_id: &str, host_id: &str) -> Result<()> {
        let (vip_id, host_id) = (vip_id.to_string(), host_id.to_string());
        invoke(
            "bind_host_to_vip",
            || {
                require_non_empty("vip_id", &vip_id)?;
                require_non_empty("host_id", &host_id)
            },
            ok,
            || self.inner.bind_host_to_vip(&vip_id, &host_id),
        )
        .await
    }

    async fn unbind_host_from_vip(&self, vip_id: &str, host_id: &str) -> Result<()> {
        let (vip_id, host_id) = (vip_id.to_string(), host_id.to_string());
        invoke(
            "unbind_host_from_vip",
            || {
                require_non_empty("vip_id", &vip_id)?;
                require_non_empty("host_id", &host_id)
            },
            ok,
            || self.inner.unbind_host_from_vip(&vip_id, &host_id),
        )
        .await
    }

    async fn delete_vip(&self, vip_id: &str) -> Result<()> {
        let vip_id = vip_id.to_string();
        invoke(
            "delete_vip",
            || require_non_empty("vip_id", &vip_id),
            ok,
            || self.inner.delete_vip(&vip_id),
        )
        .await
    }

    async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        invoke("list_security_groups", || Ok(()), ok, || {
            self.inner.list_security_groups()
        })
        .await
    }

    async fn create_security_group(
        &self,
        name: &safescale_types::Name,
        description: &str,
    ) -> Result<SecurityGroup> {
        let (name, description) = (name.clone(), description.to_string());
        invoke(
            "create_security_group",
            || require_non_empty("name", &name),
            non_empty_id(|sg: &SecurityGroup| sg.id.as_str()),
            || self.inner.create_security_group(&name, &description),
        )
        .await
    }

    async fn inspect_security_group(&self, id: &str) -> Result<SecurityGroup> {
        let id = id.to_string();
        invoke(
            "inspect_security_group",
            || require_non_empty("id", &id),
            ok,
            || self.inner.inspect_security_group(&id),
        )
        .await
    }

    async fn clear_security_group(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "clear_security_group",
            || require_non_empty("id", &id),
            ok,
            || self.inner.clear_security_group(&id),
        )
        .await
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_security_group",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_security_group(&id),
        )
        .await
    }

    async fn add_security_group_rule(&self, id: &str, rule: SecurityGroupRule) -> Result<()> {
        let id = id.to_string();
        let rule_clone = rule.clone();
        invoke(
            "add_security_group_rule",
            || require_non_empty("id", &id),
            ok,
            || self.inner.add_security_group_rule(&id, rule_clone),
        )
        .await
    }

    async fn delete_security_group_rule(&self, id: &str, rule_index: usize) -> Result<()> {
        let id = id.to_string();
        invoke(
            "delete_security_group_rule",
            || require_non_empty("id", &id),
            ok,
            || self.inner.delete_security_group_rule(&id, rule_index),
        )
        .await
    }

    async fn bind_security_group_to_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let (sg_id, host_id) = (sg_id.to_string(), host_id.to_string());
        invoke(
            "bind_security_group_to_host",
            || {
                require_non_empty("sg_id", &sg_id)?;
                require_non_empty("host_id", &host_id)
            },
            ok,
            || self.inner.bind_security_group_to_host(&sg_id, &host_id),
        )
        .await
    }

    async fn unbind_security_group_from_host(&self, sg_id: &str, host_id: &str) -> Result<()> {
        let (sg_id, host_id) = (sg_id.to_string(), host_id.to_string());
        invoke(
            "unbind_security_group_from_host",
            || {
                require_non_empty("sg_id", &sg_id)?;
                require_non_empty("host_id", &host_id)
            },
            ok,
            || self.inner.unbind_security_group_from_host(&sg_id, &host_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn rejects_empty_name_before_reaching_inner_provider() {
        let inner: Arc<dyn Provider> = Arc::new(MockProvider::new("m1", Capabilities::default()));
        let wrapped = InterceptedProvider::new(inner);
        let err = wrapped.create_keypair("").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn rejects_host_with_neither_subnet_nor_public_ip() {
        let inner: Arc<dyn Provider> = Arc::new(MockProvider::new("m1", Capabilities::default()));
        let wrapped = InterceptedProvider::new(inner);
        let req = CreateHostRequest {
            name: "h1".into(),
            template_id: "t1".into(),
            image_id: "i1".into(),
            subnet_ids: vec![],
            public_ip: false,
            keypair_name: None,
            user_data: String::new(),
            password: None,
        };
        let err = wrapped.create_host(&req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn valid_calls_pass_through_to_the_inner_provider() {
        let inner: Arc<dyn Provider> = Arc::new(MockProvider::new("m1", Capabilities::default()));
        let wrapped = InterceptedProvider::new(inner);
        let req = CreateHostRequest {
            name: "h1".into(),
            template_id: "t1".into(),
            image_id: "i1".into(),
            subnet_ids: vec![],
            public_ip: true,
            keypair_name: None,
            user_data: String::new(),
            password: None,
        };
        let host = wrapped.create_host(&req).await.unwrap();
        assert_eq!(host.name, "h1");
    }
}
