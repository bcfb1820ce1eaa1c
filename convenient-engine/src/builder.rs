//! Running a rule's build steps

use crate::error::{EngineError, EngineResult};
use crate::rule::RuleSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// What a local build reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Inputs the build actually read, when it records them
    pub used_inputs: Option<Vec<PathBuf>>,
}

/// Runs the steps of one rule under the project root
#[async_trait]
pub trait RuleBuilder: Send + Sync {
    /// Build `rule`, writing its outputs under `root`
    ///
    /// # Errors
    ///
    /// `BuildFailed` when a step fails
    async fn build(&self, rule: &RuleSpec, root: &Path) -> EngineResult<BuildReport>;
}

const STDERR_TAIL: usize = 2000;

/// Runs each step with `sh -c` in the project root
///
/// Steps see `BITZEL_TARGET` and `BITZEL_ROOT` in their environment. Parent
/// directories of declared outputs exist before the first step runs.
#[derive(Debug, Clone)]
pub struct ShellRuleBuilder {
    shell: String,
}

impl Default for ShellRuleBuilder {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellRuleBuilder {
    /// Builder using `sh`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder using another shell
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn failed(rule: &RuleSpec, reason: impl Into<String>) -> EngineError {
        EngineError::BuildFailed {
            rule: rule.name.clone(),
            reason: reason.into(),
        }
    }

    async fn read_dep_file(rule: &RuleSpec, path: &Path) -> EngineResult<Vec<PathBuf>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Self::failed(rule, format!("dep file {}: {e}", path.display())))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

#[async_trait]
impl RuleBuilder for ShellRuleBuilder {
    async fn build(&self, rule: &RuleSpec, root: &Path) -> EngineResult<BuildReport> {
        for output in rule.outputs.iter().chain(&rule.dep_file) {
            if let Some(parent) = root.join(output).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("building {} ({} steps)", rule.name, rule.steps.len());
        for (index, step) in rule.steps.iter().enumerate() {
            debug!("{} step {}: {}", rule.name, index + 1, step);
            let output = Command::new(&self.shell)
                .arg("-c")
                .arg(step)
                .current_dir(root)
                .env("BITZEL_TARGET", rule.name.as_str())
                .env("BITZEL_ROOT", root)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Self::failed(rule, format!("cannot run {}: {e}", self.shell)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let start = stderr
                    .char_indices()
                    .rev()
                    .nth(STDERR_TAIL)
                    .map_or(0, |(i, _)| i);
                return Err(Self::failed(
                    rule,
                    format!(
                        "step {} exited with {}: {}",
                        index + 1,
                        output.status,
                        stderr[start..].trim()
                    ),
                ));
            }
        }

        let used_inputs = match &rule.dep_file {
            Some(dep_file) => Some(Self::read_dep_file(rule, &root.join(dep_file)).await?),
            None => None,
        };
        Ok(BuildReport { used_inputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_steps_run_in_root() {
        let temp = TempDir::new().unwrap();
        let mut rule = RuleSpec::new("//app:gen");
        rule.outputs = vec![PathBuf::from("out/gen.txt")];
        rule.steps = vec!["echo \"$BITZEL_TARGET\" > out/gen.txt".to_string()];

        let report = ShellRuleBuilder::new().build(&rule, temp.path()).await.unwrap();

        assert_eq!(report, BuildReport::default());
        let content = std::fs::read_to_string(temp.path().join("out/gen.txt")).unwrap();
        assert_eq!(content.trim(), "//app:gen");
    }

    #[tokio::test]
    async fn test_failing_step_reports_stderr() {
        let temp = TempDir::new().unwrap();
        let mut rule = RuleSpec::new("//app:broken");
        rule.steps = vec!["echo boom >&2; exit 3".to_string(), "touch never".to_string()];

        let err = ShellRuleBuilder::new()
            .build(&rule, temp.path())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::BuildFailed { .. }));
        assert!(err.to_string().contains("boom"));
        assert!(!temp.path().join("never").exists());
    }

    #[tokio::test]
    async fn test_dep_file_lines_become_used_inputs() {
        let temp = TempDir::new().unwrap();
        let mut rule = RuleSpec::new("//app:cc");
        rule.dep_file = Some(PathBuf::from("out/cc.d"));
        rule.steps = vec!["printf 'a.h\\n\\nb.h\\n' > out/cc.d".to_string()];

        let report = ShellRuleBuilder::new().build(&rule, temp.path()).await.unwrap();

        assert_eq!(
            report.used_inputs,
            Some(vec![PathBuf::from("a.h"), PathBuf::from("b.h")])
        );
    }

    #[tokio::test]
    async fn test_missing_dep_file_fails_build() {
        let temp = TempDir::new().unwrap();
        let mut rule = RuleSpec::new("//app:cc");
        rule.dep_file = Some(PathBuf::from("out/cc.d"));
        rule.steps = vec!["true".to_string()];

        let result = ShellRuleBuilder::new().build(&rule, temp.path()).await;
        assert!(matches!(result, Err(EngineError::BuildFailed { .. })));
    }
}
