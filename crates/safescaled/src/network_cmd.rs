//! `safescaled network ...` — network/subnet create/delete (spec §4.9).

use crate::context::Context;
use anyhow::Result;
use safescale_types::{IpVersion, Ref};
use serde_json::{json, Value};

fn parse_ref(s: &str) -> Ref {
    match s.strip_prefix("id:") {
        Some(id) => Ref::Id(id.to_string()),
        None => Ref::Name(s.to_string()),
    }
}

pub async fn create_network(ctx: &Context, name: &str, cidr: &str) -> Result<Value> {
    let network = ctx.network.create_network(&name.to_string(), cidr, IpVersion::V4).await?;
    Ok(json!({"ok": true, "id": network.id, "name": network.name, "cidr": network.cidr}))
}

pub async fn create_subnet(ctx: &Context, network: &str, name: &str, cidr: &str) -> Result<Value> {
    let subnet = ctx.network.create_subnet(&parse_ref(network), &name.to_string(), cidr, true).await?;
    Ok(json!({"ok": true, "id": subnet.id, "name": subnet.name, "cidr": subnet.cidr, "network_id": subnet.network_id}))
}

pub async fn delete_subnet(ctx: &Context, r: &str) -> Result<Value> {
    ctx.network.delete_subnet(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "subnet": r}))
}

pub async fn delete_network(ctx: &Context, r: &str) -> Result<Value> {
    ctx.network.delete_network(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "network": r}))
}

pub async fn list(ctx: &Context) -> Result<Value> {
    let networks = ctx.network.provider().list_networks().await?;
    let rows: Vec<_> = networks.into_iter().map(|n| json!({"id": n.id, "name": n.name, "cidr": n.cidr})).collect();
    Ok(json!({"ok": true, "networks": rows}))
}

pub async fn ensure_single_host_subnet(ctx: &Context) -> Result<Value> {
    let subnet = ctx.network.ensure_single_host_subnet().await?;
    Ok(json!({"ok": true, "id": subnet.id, "name": subnet.name, "cidr": subnet.cidr}))
}
