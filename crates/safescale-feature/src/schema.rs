//! Feature YAML shape (spec §4.10): `feature.suitableFor`,
//! `feature.requirements`, `feature.install.<method>.<action>`.
//!
//! Deserialized with `serde_yaml` straight off the wire, the same way
//! `safescale_config::TenantConfig` is loaded through `safescale-blobstore`
//! rather than hand-parsed.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFile {
    pub feature: FeatureSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default, rename = "suitableFor")]
    pub suitable_for: SuitableFor,
    #[serde(default)]
    pub requirements: Requirements,
    pub install: BTreeMap<Method, MethodBlock>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SuitableFor {
    #[serde(default)]
    pub host: bool,
    #[serde(default)]
    pub cluster: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub features: Vec<String>,
    /// Keyed by cluster complexity (small/normal/large); values are loosely
    /// typed since the spec leaves the sizing-minima shape to the caller.
    #[serde(default, rename = "clusterSizing")]
    pub cluster_sizing: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Bash,
    Apt,
    Yum,
    Dnf,
    Helm,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::Bash => "bash",
            Method::Apt => "apt",
            Method::Yum => "yum",
            Method::Dnf => "dnf",
            Method::Helm => "helm",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Check,
    Remove,
}

impl Action {
    pub fn key(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Check => "check",
            Action::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MethodBlock {
    pub add: Option<ActionBlock>,
    pub check: Option<ActionBlock>,
    pub remove: Option<ActionBlock>,
}

impl MethodBlock {
    pub fn block(&self, action: Action) -> Option<&ActionBlock> {
        match action {
            Action::Add => self.add.as_ref(),
            Action::Check => self.check.as_ref(),
            Action::Remove => self.remove.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionBlock {
    /// Comma-separated step order, e.g. `"install,configure,enable"`.
    pub pace: String,
    pub steps: BTreeMap<String, StepSpec>,
}

impl ActionBlock {
    /// `pace` split and trimmed, in declaration order. A step name in
    /// `pace` with no matching entry under `steps` is a feature-file error
    /// the caller surfaces rather than silently skipping.
    pub fn ordered_steps(&self) -> Vec<String> {
        self.pace.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetSpec {
    pub hosts: Option<String>,
    pub masters: Option<String>,
    pub nodes: Option<String>,
    pub gateways: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepOverride {
    pub run: Option<String>,
    pub package: Option<String>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub targets: TargetSpec,
    pub run: Option<String>,
    pub package: Option<String>,
    /// Keyed by cluster complexity (small/normal/large); falls through to
    /// the base `run`/`package`/`timeout` for any field it leaves unset.
    #[serde(default)]
    pub options: BTreeMap<String, StepOverride>,
    pub timeout: Option<u64>,
    /// Anything but a literal YAML `true` means "run in parallel" — an
    /// absent field, `false`, or a stray string all fall through to the
    /// parallel default (spec §4.10 step 4).
    #[serde(default)]
    pub serialized: Option<serde_yaml::Value>,
}

impl StepSpec {
    pub fn is_serialized(&self) -> bool {
        matches!(self.serialized, Some(serde_yaml::Value::Bool(true)))
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout.unwrap_or(300))
    }

    /// Resolve `run`/`package` for `complexity`, falling through to the
    /// step's base values for anything the complexity override leaves unset.
    pub fn resolved_for(&self, complexity: Option<&str>) -> (Option<String>, Option<String>, std::time::Duration) {
        let over = complexity.and_then(|c| self.options.get(c));
        let run = over.and_then(|o| o.run.clone()).or_else(|| self.run.clone());
        let package = over.and_then(|o| o.package.clone()).or_else(|| self.package.clone());
        let timeout = over
            .and_then(|o| o.timeout)
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.timeout());
        (run, package, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
feature:
  name: docker
  suitableFor:
    host: true
    cluster: true
  requirements:
    features: [docker-repo]
  install:
    bash:
      add:
        pace: install,enable
        steps:
          install:
            targets: { nodes: "*" }
            run: "apt-get install -y docker.io"
            timeout: 120
            serialized: false
          enable:
            targets: { nodes: "*" }
            run: "systemctl enable --now docker"
      check:
        pace: check
        steps:
          check:
            targets: { nodes: "all" }
            run: "systemctl is-active docker"
"#;

    #[test]
    fn parses_method_and_action_blocks() {
        let file: FeatureFile = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(file.feature.name, "docker");
        assert!(file.feature.suitable_for.host);
        assert!(file.feature.suitable_for.cluster);
        assert_eq!(file.feature.requirements.features, vec!["docker-repo".to_string()]);

        let bash = &file.feature.install[&Method::Bash];
        let add = bash.block(Action::Add).unwrap();
        assert_eq!(add.ordered_steps(), vec!["install".to_string(), "enable".to_string()]);
        assert!(!add.steps["install"].is_serialized());
    }

    #[test]
    fn serialized_requires_literal_true() {
        let yaml = r#"
targets: {}
run: "true"
serialized: "yes"
"#;
        let step: StepSpec = serde_yaml::from_str(yaml).unwrap();
        assert!(!step.is_serialized());
    }

    #[test]
    fn options_fall_through_to_base_values() {
        let yaml = r#"
targets: {}
run: "base-run"
timeout: 60
options:
  small:
    timeout: 30
"#;
        let step: StepSpec = serde_yaml::from_str(yaml).unwrap();
        let (run, _pkg, timeout) = step.resolved_for(Some("small"));
        assert_eq!(run.as_deref(), Some("base-run"));
        assert_eq!(timeout, std::time::Duration::from_secs(30));

        let (_run, _pkg, timeout_normal) = step.resolved_for(Some("normal"));
        assert_eq!(timeout_normal, std::time::Duration::from_secs(60));
    }
}
