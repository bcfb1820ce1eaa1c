//! Build rules and the rule graph

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Fully qualified rule name such as `//app:main`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Wrap a name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One build rule. Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Rule name
    pub name: RuleId,
    /// Rule type, e.g. `genrule`
    #[serde(default = "default_rule_type")]
    pub rule_type: String,
    /// Free-form configuration that affects the output
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Inputs always read by the build
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Inputs the build may or may not read; only those recorded in the dep
    /// file count towards the dep-file key
    #[serde(default)]
    pub dep_file_inputs: Vec<PathBuf>,
    /// Rules whose outputs this rule consumes
    #[serde(default)]
    pub deps: Vec<RuleId>,
    /// Files or directories the build produces
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    /// Shell steps
    #[serde(default)]
    pub steps: Vec<String>,
    /// Where the build writes the inputs it read, one per line
    #[serde(default)]
    pub dep_file: Option<PathBuf>,
    /// Enable the input-based tiers
    #[serde(default)]
    pub supports_input_based: bool,
    /// Enable the dep-file and manifest tiers
    #[serde(default)]
    pub supports_dep_file: bool,
}

fn default_rule_type() -> String {
    "genrule".to_string()
}

impl RuleSpec {
    /// Rule with no inputs, outputs or steps
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RuleId::new(name),
            rule_type: default_rule_type(),
            config: BTreeMap::new(),
            inputs: Vec::new(),
            dep_file_inputs: Vec::new(),
            deps: Vec::new(),
            outputs: Vec::new(),
            steps: Vec::new(),
            dep_file: None,
            supports_input_based: false,
            supports_dep_file: false,
        }
    }

    /// Every declared input, mandatory ones first
    pub fn declared_inputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().chain(&self.dep_file_inputs)
    }
}

/// Validated, acyclic set of rules
#[derive(Debug, Clone, Default)]
pub struct RuleGraph {
    rules: BTreeMap<RuleId, Arc<RuleSpec>>,
}

impl RuleGraph {
    /// Build and validate a graph
    ///
    /// # Errors
    ///
    /// `UnknownDependency` for dangling edges, `DependencyCycle` for cycles
    pub fn new(rules: impl IntoIterator<Item = RuleSpec>) -> EngineResult<Self> {
        let rules: BTreeMap<_, _> = rules
            .into_iter()
            .map(|rule| (rule.name.clone(), Arc::new(rule)))
            .collect();
        let graph = Self { rules };
        graph.validate()?;
        Ok(graph)
    }

    /// Rule by name
    #[must_use]
    pub fn get(&self, id: &RuleId) -> Option<&Arc<RuleSpec>> {
        self.rules.get(id)
    }

    /// All rules, sorted by name
    pub fn rules(&self) -> impl Iterator<Item = &Arc<RuleSpec>> {
        self.rules.values()
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn validate(&self) -> EngineResult<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &RuleGraph,
            id: &RuleId,
            marks: &mut HashMap<RuleId, Mark>,
        ) -> EngineResult<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(EngineError::DependencyCycle(id.clone())),
                None => {}
            }
            let _ = marks.insert(id.clone(), Mark::Visiting);
            if let Some(rule) = graph.rules.get(id) {
                for dep in &rule.deps {
                    if !graph.rules.contains_key(dep) {
                        return Err(EngineError::UnknownDependency {
                            rule: id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    visit(graph, dep, marks)?;
                }
            }
            let _ = marks.insert(id.clone(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for id in self.rules.keys() {
            visit(self, id, &mut marks)?;
        }
        Ok(())
    }
}
