//! `safescaled vip ...` — virtual IP create/bind/unbind/delete (spec §4.9,
//! scenario S4).

use crate::context::Context;
use anyhow::Result;
use safescale_types::Ref;
use serde_json::{json, Value};

fn parse_ref(s: &str) -> Ref {
    match s.strip_prefix("id:") {
        Some(id) => Ref::Id(id.to_string()),
        None => Ref::Name(s.to_string()),
    }
}

pub async fn create(ctx: &Context, name: &str, network: &str) -> Result<Value> {
    let vip = ctx.vips.create(&name.to_string(), &network.to_string()).await?;
    Ok(json!({"ok": true, "id": vip.id, "name": vip.name, "private_ip": vip.private_ip}))
}

pub async fn add_public_ip(ctx: &Context, r: &str) -> Result<Value> {
    let vip = ctx.vips.add_public_ip(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "id": vip.id, "public_ip": vip.public_ip}))
}

pub async fn bind(ctx: &Context, r: &str, host_id: &str) -> Result<Value> {
    ctx.vips.bind(&parse_ref(r), &host_id.to_string()).await?;
    Ok(json!({"ok": true, "vip": r, "host": host_id, "action": "bind"}))
}

pub async fn unbind(ctx: &Context, r: &str, host_id: &str) -> Result<Value> {
    ctx.vips.unbind(&parse_ref(r), &host_id.to_string()).await?;
    Ok(json!({"ok": true, "vip": r, "host": host_id, "action": "unbind"}))
}

pub fn show(ctx: &Context, r: &str) -> Result<Value> {
    let vip = ctx.vips.read(&parse_ref(r))?;
    Ok(json!({
        "ok": true,
        "id": vip.id,
        "name": vip.name,
        "private_ip": vip.private_ip,
        "public_ip": vip.public_ip,
        "bound_host_ids": vip.bound_host_ids,
    }))
}

pub async fn delete(ctx: &Context, r: &str) -> Result<Value> {
    ctx.vips.delete(&parse_ref(r)).await?;
    Ok(json!({"ok": true, "vip": r}))
}
