//! `safescaled tenant ...` — CRUD over [`safescale_config::TenantConfig`],
//! the daemon's only persisted, non-resource state.

use crate::context::Daemon;
use anyhow::Result;
use safescale_config::TenantConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

pub fn create(daemon: &Daemon, name: &str, provider: &str, region: Option<String>, set: &[String]) -> Result<Value> {
    let mut settings = HashMap::new();
    for kv in set {
        let (k, v) = kv.split_once('=').ok_or_else(|| anyhow::anyhow!("--set expects key=value, got '{kv}'"))?;
        settings.insert(k.to_string(), v.to_string());
    }

    let mut tenant = TenantConfig::new(name, provider);
    tenant.region = region;
    tenant.settings = settings;

    let mut store = daemon.config_store();
    store.create(tenant)?;
    info!(tenant = %name, provider, "tenant created");
    Ok(json!({"ok": true, "tenant": name, "provider": provider}))
}

pub fn list(daemon: &Daemon) -> Result<Value> {
    let store = daemon.config_store();
    let tenants: Vec<_> = store
        .list()
        .into_iter()
        .map(|t| json!({"name": t.name, "provider": t.provider, "region": t.region}))
        .collect();
    Ok(json!({"ok": true, "tenants": tenants}))
}

pub fn show(daemon: &Daemon, name: &str) -> Result<Value> {
    let store = daemon.config_store();
    let tenant = store.get(name).ok_or_else(|| anyhow::anyhow!("tenant '{name}' not found"))?;
    Ok(serde_json::to_value(tenant)?)
}

pub fn delete(daemon: &Daemon, name: &str) -> Result<Value> {
    let mut store = daemon.config_store();
    store.delete(name)?;
    info!(tenant = %name, "tenant deleted");
    Ok(json!({"ok": true, "tenant": name}))
}
