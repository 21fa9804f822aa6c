//! `safescaled feature ...` — Check/Add/Remove over a YAML feature file
//! (spec §4.10).

use crate::context::Context;
use anyhow::{Context as _, Result};
use safescale_feature::{parse_feature, Action, FeatureContext, Method, ProceedSettings};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

fn load_context(hosts: &[String], masters: &[String], nodes: &[String], gateways: &[String]) -> FeatureContext {
    FeatureContext {
        hosts: hosts.to_vec(),
        masters: masters.to_vec(),
        nodes: nodes.to_vec(),
        gateways: gateways.to_vec(),
        ..Default::default()
    }
}

fn parse_method(s: &str) -> Result<Method> {
    match s {
        "bash" => Ok(Method::Bash),
        "apt" => Ok(Method::Apt),
        "yum" => Ok(Method::Yum),
        "dnf" => Ok(Method::Dnf),
        "helm" => Ok(Method::Helm),
        other => anyhow::bail!("unknown install method '{other}' (expected bash, apt, yum, dnf, or helm)"),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn check(
    ctx: &Context,
    file: &Path,
    method: &str,
    hosts: &[String],
    masters: &[String],
    nodes: &[String],
    gateways: &[String],
) -> Result<Value> {
    let yaml = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let parsed = parse_feature(&yaml)?;
    let fctx = load_context(hosts, masters, nodes, gateways);
    let concerned = ctx.features.check(&parsed.feature, parse_method(method)?, &fctx).await?;
    Ok(json!({"ok": true, "feature": parsed.feature.name, "concerned": concerned}))
}

#[allow(clippy::too_many_arguments)]
pub async fn add(
    ctx: &Context,
    file: &Path,
    method: &str,
    hosts: &[String],
    masters: &[String],
    nodes: &[String],
    gateways: &[String],
    vars: &[String],
    skip_proxy: bool,
) -> Result<Value> {
    run_proceed(ctx, file, method, hosts, masters, nodes, gateways, vars, Action::Add, skip_proxy).await
}

#[allow(clippy::too_many_arguments)]
pub async fn remove(
    ctx: &Context,
    file: &Path,
    method: &str,
    hosts: &[String],
    masters: &[String],
    nodes: &[String],
    gateways: &[String],
    vars: &[String],
) -> Result<Value> {
    run_proceed(ctx, file, method, hosts, masters, nodes, gateways, vars, Action::Remove, false).await
}

#[allow(clippy::too_many_arguments)]
async fn run_proceed(
    ctx: &Context,
    file: &Path,
    method: &str,
    hosts: &[String],
    masters: &[String],
    nodes: &[String],
    gateways: &[String],
    vars: &[String],
    action: Action,
    skip_proxy: bool,
) -> Result<Value> {
    let yaml = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let parsed = parse_feature(&yaml)?;
    let fctx = load_context(hosts, masters, nodes, gateways);

    let mut var_map = BTreeMap::new();
    for kv in vars {
        let (k, v) = kv.split_once('=').ok_or_else(|| anyhow::anyhow!("--var expects key=value, got '{kv}'"))?;
        var_map.insert(k.to_string(), v.to_string());
    }

    let settings = ProceedSettings { skip_proxy };
    let outcomes = ctx.features.proceed(&parsed.feature, parse_method(method)?, action, &fctx, &var_map, &settings).await?;

    let steps: Vec<_> = outcomes
        .iter()
        .map(|o| {
            let results: BTreeMap<_, _> = o
                .results
                .iter()
                .map(|(target, result)| (target.clone(), json!(result.is_ok())))
                .collect();
            json!({"step": o.step, "all_succeeded": o.all_succeeded(), "results": results})
        })
        .collect();

    Ok(json!({"ok": true, "feature": parsed.feature.name, "steps": steps}))
}
