//! `safescaled host ...` — the Create/Delete/Start/Stop/Reboot/Run
//! subcommands standing in for the RPC handlers spec §6a names.

use crate::context::Context;
use anyhow::Result;
use safescale_host::CreateHostRequest;
use safescale_types::{Ref, SizingRequest};
use serde_json::{json, Value};

fn parse_ref(s: &str) -> Ref {
    // Provider-assigned IDs in this workspace are opaque strings with no
    // fixed shape, so a leading `id:` is how the CLI disambiguates a literal
    // ID from a tenant-unique name, the same split `clawnode`'s `Exec`
    // subcommand uses for its free-form `--params` escape hatch.
    match s.strip_prefix("id:") {
        Some(id) => Ref::Id(id.to_string()),
        None => Ref::Name(s.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    ctx: &Context,
    name: &str,
    image_name: Option<String>,
    template_id: Option<String>,
    subnets: &[String],
    public_ip: bool,
    gateway: bool,
    min_cpus: u32,
    min_ram_mb: u32,
    min_disk_gb: u32,
    password: Option<String>,
) -> Result<Value> {
    let mut req = CreateHostRequest::new(name.to_string());
    req.image_name = image_name;
    req.template_id = template_id;
    req.subnets = subnets.iter().map(|s| parse_ref(s)).collect();
    req.public_ip = public_ip;
    req.is_gateway = gateway;
    req.password = password;
    req.sizing = SizingRequest { min_cpus, min_ram_mb, min_disk_gb, ..SizingRequest::default() };

    let host = ctx.hosts.create(req).await?;
    Ok(json!({
        "ok": true,
        "id": host.id,
        "name": host.name,
        "state": format!("{:?}", host.state),
        "is_gateway": host.is_gateway,
    }))
}

pub async fn delete(ctx: &Context, r: &str) -> Result<Value> {
    ctx.hosts.delete(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "host": r}))
}

pub async fn list(ctx: &Context) -> Result<Value> {
    let hosts = ctx.provider.list_hosts().await?;
    let rows: Vec<_> = hosts
        .into_iter()
        .map(|h| json!({"id": h.id, "name": h.name, "state": format!("{:?}", h.state), "is_gateway": h.is_gateway}))
        .collect();
    Ok(json!({"ok": true, "hosts": rows}))
}

pub fn inspect(ctx: &Context, r: &str) -> Result<Value> {
    let cached = ctx.registry.load(&parse_ref(r))?;
    Ok(json!({
        "ok": true,
        "id": cached.id,
        "name": cached.name,
        "private_ip": cached.private_ip,
        "public_ip": cached.public_ip,
        "access_ip": cached.access_ip,
        "is_gateway": cached.is_gateway,
        "gateway_hops": cached.ssh.chain_depth() - 1,
    }))
}

pub async fn start(ctx: &Context, r: &str) -> Result<Value> {
    ctx.hosts.start(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "host": r, "action": "start"}))
}

pub async fn stop(ctx: &Context, r: &str) -> Result<Value> {
    ctx.hosts.stop(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "host": r, "action": "stop"}))
}

pub async fn reboot(ctx: &Context, r: &str) -> Result<Value> {
    ctx.hosts.reboot(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "host": r, "action": "reboot"}))
}

pub async fn run(ctx: &Context, r: &str, command: &str, timeout_secs: u64) -> Result<Value> {
    let outcome = ctx
        .hosts
        .run(&parse_ref(r), command, Some(std::time::Duration::from_secs(timeout_secs)))
        .await?;
    Ok(json!({
        "ok": outcome.success(),
        "exit_code": outcome.exit_code,
        "stdout": outcome.stdout,
        "stderr": outcome.stderr,
    }))
}
