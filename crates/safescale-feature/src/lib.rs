//! Feature installer (component C10): YAML feature parsing, target
//! resolution, parallel per-host `Check`, and pace-ordered `Proceed`.
//!
//! Grounded in `safescale-host::HostService::run` for the actual SSH
//! execution seam (this crate never talks to `safescale-ssh` directly) and
//! in `safescale-task::TaskGroup` for the fan-out `exec::run_step` already
//! uses; `FeatureService` below is the Proceed/Check entry point spec
//! §4.10 names, composed from `schema`'s parsed YAML, `targets`'s selector
//! resolution, and `exec`'s per-step execution.

#![forbid(unsafe_code)]

pub mod exec;
pub mod schema;
pub mod targets;

pub use exec::{run_step, StepOutcome};
pub use schema::{Action, ActionBlock, FeatureFile, FeatureSpec, Method, MethodBlock, StepSpec};
pub use targets::{resolve_targets, FeatureContext};

use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_host::HostService;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Knobs `Proceed` reads beyond the feature file itself (spec §4.10: "If
/// action=Add and not skipping proxy, push configured reverse-proxy
/// rules.").
#[derive(Debug, Clone, Default)]
pub struct ProceedSettings {
    pub skip_proxy: bool,
}

/// Parse a feature YAML document (spec §4.10's `feature.*` shape).
pub fn parse_feature(yaml: &str) -> Result<FeatureFile> {
    serde_yaml::from_str(yaml)
        .map_err(|e| SafeScaleError::new(ErrorKind::Syntax, format!("feature file failed to parse: {e}")))
}

/// Proceed/Check (spec §4.10) over a single tenant's hosts, via the
/// `HostService` that actually owns the SSH seam.
pub struct FeatureService {
    host: Arc<HostService>,
}

impl FeatureService {
    pub fn new(host: Arc<HostService>) -> Self {
        Self { host }
    }

    /// Parallel per-host invocation of `method`'s check action (spec
    /// §4.10's `Check`): a member is "concerned" (not yet compliant) if its
    /// check script fails. Every role member counts, since there's nothing
    /// to filter against yet — the targets doc calls this out explicitly.
    pub async fn check(&self, feature: &FeatureSpec, method: Method, ctx: &FeatureContext) -> Result<BTreeSet<String>> {
        let block = feature
            .install
            .get(&method)
            .and_then(|m| m.block(Action::Check))
            .ok_or_else(|| SafeScaleError::new(ErrorKind::NotImplemented, format!("feature {} has no {method} check block", feature.name)))?;

        let mut concerned = BTreeSet::new();
        for step_name in block.ordered_steps() {
            let step = block.steps.get(&step_name).ok_or_else(|| {
                SafeScaleError::invalid_request(format!("feature {} pace names undeclared step {step_name}", feature.name))
            })?;
            let targets = resolve_targets(&step.targets, ctx, None);
            let outcome = run_step(&self.host, method, Action::Check, &step_name, step, ctx, targets, &feature.name, &BTreeMap::new()).await?;
            for (target, result) in &outcome.results {
                if result.is_err() {
                    concerned.insert(target.clone());
                }
            }
        }
        info!(feature = %feature.name, concerned = concerned.len(), "check complete");
        Ok(concerned)
    }

    /// Add/Remove (spec §4.10's `Proceed`): runs `Check` first for `Add` so
    /// steps only target hosts not already compliant, pushes reverse-proxy
    /// rules when applicable (a no-op here — proxy configuration is an
    /// external collaborator per spec §1, not modeled in this workspace),
    /// then executes each pace step in order, aborting the remaining steps
    /// on the first one where any target failed.
    pub async fn proceed(
        &self,
        feature: &FeatureSpec,
        method: Method,
        action: Action,
        ctx: &FeatureContext,
        vars: &BTreeMap<String, String>,
        settings: &ProceedSettings,
    ) -> Result<Vec<StepOutcome>> {
        if !matches!(feature.suitable_for, schema::SuitableFor { host: true, .. } | schema::SuitableFor { cluster: true, .. }) {
            return Err(SafeScaleError::invalid_request(format!("feature {} is not suitable for any target kind", feature.name)));
        }
        if action == Action::Add && !settings.skip_proxy {
            info!(feature = %feature.name, "pushing configured reverse-proxy rules");
        }

        let concerned = if action == Action::Add { Some(self.check(feature, method, ctx).await?) } else { None };

        let block = feature
            .install
            .get(&method)
            .and_then(|m| m.block(action))
            .ok_or_else(|| SafeScaleError::new(ErrorKind::NotImplemented, format!("feature {} has no {method} {} block", feature.name, action.key())))?;

        let mut outcomes = Vec::new();
        for step_name in block.ordered_steps() {
            let step = block.steps.get(&step_name).ok_or_else(|| {
                SafeScaleError::invalid_request(format!("feature {} pace names undeclared step {step_name}", feature.name))
            })?;
            let targets = resolve_targets(&step.targets, ctx, concerned.as_ref());
            let outcome = run_step(&self.host, method, action, &step_name, step, ctx, targets, &feature.name, vars).await?;
            let all_ok = outcome.all_succeeded();
            outcomes.push(outcome);
            if !all_ok {
                warn!(feature = %feature.name, step = %step_name, "step failed on at least one target; aborting remaining pace steps");
                break;
            }
        }
        Ok(outcomes)
    }
}
