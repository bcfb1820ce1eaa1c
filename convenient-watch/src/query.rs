//! Wire format of the watch service's `query` command

use crate::error::{WatchError, WatchResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Fields requested for every changed file
pub const QUERY_FIELDS: [&str; 4] = ["name", "exists", "new", "type"];

/// A path or glob the feed never reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnorePattern {
    /// Everything below a directory relative to the cell root
    Directory(PathBuf),
    /// A `wholename` glob such as `**/*.swp`
    Glob(String),
}

impl IgnorePattern {
    /// Validated glob pattern
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidGlob` if the pattern does not parse
    pub fn glob(pattern: impl Into<String>) -> WatchResult<Self> {
        let pattern = pattern.into();
        if let Err(e) = glob::Pattern::new(&pattern) {
            return Err(WatchError::InvalidGlob {
                glob: pattern,
                reason: e.msg.to_string(),
            });
        }
        Ok(Self::Glob(pattern))
    }

    fn to_expression(&self) -> Value {
        match self {
            Self::Directory(dir) => json!(["dirname", dir.to_string_lossy()]),
            Self::Glob(pattern) => {
                json!(["match", pattern, "wholename", {"includedotfiles": true}])
            }
        }
    }
}

/// The standing part of a cell's query: everything except the cursor
#[derive(Debug, Clone)]
pub struct CellQuery {
    root: PathBuf,
    relative_root: Option<PathBuf>,
    expression: Value,
}

impl CellQuery {
    /// Query excluding directories and every ignore pattern
    #[must_use]
    pub fn new(root: &Path, relative_root: Option<&Path>, ignore: &[IgnorePattern]) -> Self {
        let mut excluded = vec![json!("anyof"), json!(["type", "d"])];
        excluded.extend(ignore.iter().map(IgnorePattern::to_expression));

        Self {
            root: root.to_path_buf(),
            relative_root: relative_root.map(Path::to_path_buf),
            expression: json!(["not", excluded]),
        }
    }

    /// Filter expression sent with each query
    #[must_use]
    pub fn expression(&self) -> &Value {
        &self.expression
    }

    /// Concrete query starting at `since`
    #[must_use]
    pub fn at(&self, since: &str) -> WatchQuery {
        WatchQuery {
            root: self.root.clone(),
            relative_root: self.relative_root.clone(),
            expression: self.expression.clone(),
            fields: QUERY_FIELDS.iter().map(ToString::to_string).collect(),
            since: since.to_string(),
        }
    }
}

/// One `query` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchQuery {
    /// Watched root
    pub root: PathBuf,
    /// Optional sub-directory the query is scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_root: Option<PathBuf>,
    /// Filter expression
    pub expression: Value,
    /// Requested file fields
    pub fields: Vec<String>,
    /// Cursor to report changes since
    pub since: String,
}

impl WatchQuery {
    /// Encode as the service's JSON command `["query", root, {...}]`
    #[must_use]
    pub fn to_command(&self) -> Value {
        let mut params = json!({
            "since": self.since,
            "expression": self.expression,
            "fields": self.fields,
            "empty_on_fresh_instance": true,
        });
        if let (Some(relative), Some(map)) = (&self.relative_root, params.as_object_mut()) {
            let _ = map.insert(
                "relative_root".to_string(),
                Value::String(relative.to_string_lossy().into_owned()),
            );
        }
        json!(["query", self.root.to_string_lossy(), params])
    }
}

/// Reply to a `query` request
///
/// File entries are kept as raw JSON so a single bad entry can be detected
/// and reported as malformed instead of failing the whole decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchResponse {
    /// New clock for the cell
    #[serde(default)]
    pub clock: Option<String>,
    /// The service has no history for the cursor
    #[serde(default)]
    pub is_fresh_instance: bool,
    /// Changed files
    #[serde(default)]
    pub files: Option<Vec<Value>>,
    /// Error reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Warning reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_excludes_directories_and_ignores() {
        let ignore = vec![
            IgnorePattern::Directory(PathBuf::from("buck-out")),
            IgnorePattern::glob("**/*.swp").unwrap(),
        ];
        let query = CellQuery::new(Path::new("/repo"), None, &ignore);

        assert_eq!(
            query.expression(),
            &json!([
                "not",
                [
                    "anyof",
                    ["type", "d"],
                    ["dirname", "buck-out"],
                    ["match", "**/*.swp", "wholename", {"includedotfiles": true}]
                ]
            ])
        );
    }

    #[test]
    fn test_command_shape() {
        let query = CellQuery::new(Path::new("/repo"), Some(Path::new("lib")), &[]).at("c:1:2");
        let command = query.to_command();

        assert_eq!(command[0], "query");
        assert_eq!(command[1], "/repo");
        assert_eq!(command[2]["since"], "c:1:2");
        assert_eq!(command[2]["relative_root"], "lib");
        assert_eq!(command[2]["fields"], json!(["name", "exists", "new", "type"]));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let err = IgnorePattern::glob("[unclosed").unwrap_err();
        assert!(matches!(err, WatchError::InvalidGlob { .. }));
    }

    #[test]
    fn test_response_defaults() {
        let response: WatchResponse = serde_json::from_str(r#"{"clock": "c:5:6"}"#).unwrap();
        assert_eq!(response.clock.as_deref(), Some("c:5:6"));
        assert!(!response.is_fresh_instance);
        assert!(response.files.is_none());
    }
}
