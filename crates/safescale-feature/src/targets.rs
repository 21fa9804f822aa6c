//! Target-selector resolution (spec §4.10): `targets` maps
//! `{hosts, masters, nodes, gateways}` to `{"1", "*", "all"}`.

use crate::schema::TargetSpec;
use std::collections::BTreeSet;

/// The members a feature can be installed against, grouped by cluster role.
/// A bare host install populates only `hosts` with the single target.
#[derive(Debug, Clone, Default)]
pub struct FeatureContext {
    pub hosts: Vec<String>,
    pub masters: Vec<String>,
    pub nodes: Vec<String>,
    pub gateways: Vec<String>,
    /// `small`/`normal`/`large`, used for `StepSpec::resolved_for`. `None`
    /// for a plain host install — complexity only applies to clusters.
    pub complexity: Option<String>,
}

impl FeatureContext {
    pub fn for_host(host_name: impl Into<String>) -> Self {
        Self { hosts: vec![host_name.into()], ..Default::default() }
    }

    fn role(&self, role: &str) -> &[String] {
        match role {
            "hosts" => &self.hosts,
            "masters" => &self.masters,
            "nodes" => &self.nodes,
            "gateways" => &self.gateways,
            _ => &[],
        }
    }
}

/// Resolves one role's selector against the full role membership and,
/// optionally, the subset already known to be "concerned" (spec's `Check`
/// output). `concerned: None` means every member counts as concerned — the
/// case for `Check` itself, which has nothing to filter against yet.
fn resolve_role(members: &[String], selector: &str, concerned: Option<&BTreeSet<String>>) -> Vec<String> {
    let eligible: Vec<String> = match concerned {
        Some(set) => members.iter().filter(|m| set.contains(*m)).cloned().collect(),
        None => members.to_vec(),
    };
    match selector {
        "all" => members.to_vec(),
        "1" => eligible.into_iter().take(1).collect(),
        // "*" and anything unrecognized fall through to "all concerned".
        _ => eligible,
    }
}

/// Resolve every role named in `spec` against `ctx`, unioning the results in
/// a stable order (hosts, masters, nodes, gateways) with duplicates removed.
pub fn resolve_targets(spec: &TargetSpec, ctx: &FeatureContext, concerned: Option<&BTreeSet<String>>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for (role, selector) in [
        ("hosts", spec.hosts.as_deref()),
        ("masters", spec.masters.as_deref()),
        ("nodes", spec.nodes.as_deref()),
        ("gateways", spec.gateways.as_deref()),
    ] {
        let Some(selector) = selector else { continue };
        for target in resolve_role(ctx.role(role), selector, concerned) {
            if seen.insert(target.clone()) {
                out.push(target);
            }
        }
    }
    out
}
