//! Step execution: target resolution already done, this turns a
//! [`StepSpec`] into rendered commands run over SSH, in parallel or
//! sequentially per spec §4.10 step 5.

use crate::schema::{Action, Method, StepSpec};
use crate::targets::FeatureContext;
use handlebars::Handlebars;
use safescale_error::{ErrorKind, Result, SafeScaleError};
use safescale_host::HostService;
use safescale_ssh::ExecOutcome;
use safescale_task::TaskGroup;
use safescale_types::Ref;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved Handlebars vars every step template can reference (spec
/// §4.10 step 3), plus whatever the caller passed through `vars`.
#[derive(Debug, Clone, Serialize)]
struct StepVars {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Content")]
    content: String,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Step")]
    step: String,
    #[serde(flatten)]
    vars: BTreeMap<String, String>,
}

/// Per-target outcome of one pace step. Errors are kept individually rather
/// than collapsed into an aggregate `List` so a caller can tell which
/// targets need attention (spec S3: "Results contain exactly 3 entries
/// keyed by node name").
pub struct StepOutcome {
    pub step: String,
    pub results: BTreeMap<String, Result<ExecOutcome>>,
}

impl StepOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

fn render(template: &str, vars: &StepVars) -> Result<String> {
    let mut hb = Handlebars::new();
    // Shell commands routinely contain `&&`, quotes, and redirects; the
    // default HTML escaping would mangle all of them.
    hb.register_escape_fn(handlebars::no_escape);
    hb.render_template(template, vars)
        .map_err(|e| SafeScaleError::new(ErrorKind::Syntax, format!("feature step template failed to render: {e}")))
}

/// Extract the step's `run`/`package` content (a `package` entry is first
/// turned into the method's install command) and render it as a Handlebars
/// template against the reserved vars `{Name, Content, Action, Step}` plus
/// the caller's own `vars` (spec §4.10 steps 2-3). `Content` is the
/// pre-render text itself, in case a step wants to reference its own body.
fn rendered_command(
    method: Method,
    action: Action,
    step_name: &str,
    run: Option<&str>,
    package: Option<&str>,
    feature_name: &str,
    extra_vars: &BTreeMap<String, String>,
) -> Result<String> {
    let template = match (run, package) {
        (Some(run), _) => run.to_string(),
        (None, Some(pkg)) => package_install_command(method, pkg),
        (None, None) => {
            return Err(SafeScaleError::invalid_request(format!(
                "feature {feature_name} step {step_name} declares neither run nor package"
            )))
        }
    };
    let vars = StepVars {
        name: feature_name.to_string(),
        content: template.clone(),
        action: action.key().to_string(),
        step: step_name.to_string(),
        vars: extra_vars.clone(),
    };
    render(&template, &vars)
}

fn package_install_command(method: Method, package: &str) -> String {
    match method {
        Method::Apt => format!("apt-get install -y {package}"),
        Method::Yum => format!("yum install -y {package}"),
        Method::Dnf => format!("dnf install -y {package}"),
        Method::Helm => format!("helm install {package} {package}"),
        Method::Bash => package.to_string(),
    }
}

/// Run one pace step against `targets`: parallel via a `TaskGroup` unless
/// `spec.is_serialized()`, in which case targets run one at a time.
pub async fn run_step(
    host: &Arc<HostService>,
    method: Method,
    action: Action,
    step_name: &str,
    spec: &StepSpec,
    ctx: &FeatureContext,
    targets: Vec<String>,
    feature_name: &str,
    extra_vars: &BTreeMap<String, String>,
) -> Result<StepOutcome> {
    let (run, package, timeout) = spec.resolved_for(ctx.complexity.as_deref());
    let command = rendered_command(method, action, step_name, run.as_deref(), package.as_deref(), feature_name, extra_vars)?;

    let mut results = BTreeMap::new();
    if spec.is_serialized() {
        for target in targets {
            debug!(feature = feature_name, step = step_name, target = %target, "running step sequentially");
            let outcome = host.run(&Ref::Name(target.clone()), &command, Some(timeout)).await;
            results.insert(target, outcome);
        }
    } else {
        let mut group: TaskGroup<ExecOutcome> = TaskGroup::new(format!("feature-{feature_name}-{step_name}"), None);
        let mut order = Vec::with_capacity(targets.len());
        for target in targets {
            order.push(target.clone());
            let host = host.clone();
            let command = command.clone();
            group.spawn(move |_cancel| async move { host.run(&Ref::Name(target), &command, Some(timeout)).await });
        }
        for (target, child) in order.into_iter().zip(group.children()) {
            results.insert(target, child.wait().await);
        }
    }

    for (target, outcome) in &results {
        if let Err(e) = outcome {
            warn!(feature = feature_name, step = step_name, target = %target, error = %e, "step failed on target");
        }
    }

    Ok(StepOutcome { step: step_name.to_string(), results })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_install_command_uses_the_method_specific_manager() {
        assert_eq!(package_install_command(Method::Apt, "docker.io"), "apt-get install -y docker.io");
        assert_eq!(package_install_command(Method::Yum, "docker"), "yum install -y docker");
        assert_eq!(package_install_command(Method::Bash, "echo hi"), "echo hi");
    }

    #[test]
    fn rendered_command_substitutes_reserved_vars_via_content() {
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "us-east".to_string());
        let rendered = rendered_command(Method::Bash, Action::Add, "install", Some("echo {{region}}"), None, "docker", &vars);
        // run content is itself the Handlebars template: reserved vars and
        // the caller's extra vars are both in scope when it's expanded.
        assert_eq!(rendered.unwrap(), "echo us-east");
    }

    #[test]
    fn missing_run_and_package_is_rejected() {
        let vars = BTreeMap::new();
        let err = rendered_command(Method::Bash, Action::Add, "install", None, None, "docker", &vars).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }
}
