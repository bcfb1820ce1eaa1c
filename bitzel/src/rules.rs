//! Rule files
//!
//! ```yaml
//! rules:
//!   - name: //lib:gen
//!     inputs: [lib/gen.sh]
//!     outputs: [out/lib/gen.txt]
//!     steps: ["sh lib/gen.sh > out/lib/gen.txt"]
//!   - name: //app:main
//!     deps: ["//lib:gen"]
//!     inputs: [app/main.c]
//!     dep_file_inputs: [include/a.h, include/b.h]
//!     dep_file: out/app/main.d
//!     supports_dep_file: true
//!     outputs: [out/app/main]
//!     steps: ["cc -MD -MF out/app/main.d -o out/app/main app/main.c"]
//! ```

use crate::config::ConfigError;
use convenient_engine::{RuleGraph, RuleSpec};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    rules: Vec<RuleSpec>,
}

/// Parse and validate rule YAML
///
/// # Errors
///
/// `ParseError` for bad YAML, `Invalid` for dangling dependencies, cycles
/// and paths escaping the project root
pub fn parse_rules(yaml: &str, origin: &Path) -> Result<RuleGraph, ConfigError> {
    let file: RuleFile = serde_yaml::from_str(yaml)
        .map_err(|e| ConfigError::ParseError(origin.to_path_buf(), e.to_string()))?;

    for rule in &file.rules {
        let paths = rule
            .declared_inputs()
            .chain(&rule.outputs)
            .chain(&rule.dep_file);
        for path in paths {
            if path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
                return Err(ConfigError::Invalid(format!(
                    "{}: path {} must stay inside the project",
                    rule.name,
                    path.display()
                )));
            }
        }
    }

    RuleGraph::new(file.rules).map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Load a rule file
///
/// # Errors
///
/// `IoError` when the file cannot be read, otherwise as [`parse_rules`]
pub async fn load_rules(path: impl AsRef<Path>) -> Result<RuleGraph, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
    parse_rules(&content, path)
}
