//! Loading user-supplied action descriptors from JSON files.
//!
//! A plugin file is a single JSON document:
//!
//! ```text
//! {
//!   "comment": "optional free text",
//!   "type": "Integrated" | "Singleton",
//!   "action": { ... }
//! }
//! ```
//!
//! Integrated actions require `prompt` and `args` and may carry `extension`
//! (a string, or a two-element `[c, c++]` list), `outopt` (default `-o`), and
//! `tool` (a string applied to both languages, or an object with `c` and
//! `c++`). Singleton actions require `prompt`, `tool`, and `args`; when
//! `extension` is present, `source` must name the captured stream (`stdout`
//! or `stderr`).
//!
//! Any structural error is fatal: the run must not start with a partial
//! action set. The literal `/path/to/output` inside `args` tokens is replaced
//! with the configured output root at execution time, not here.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use super::{
    ActionDescriptor, CaptureStream, IntegratedAction, OutputExt, SingletonAction, ToolPair,
};

/// Errors validating or reading a plugin file. All of them abort the run.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The file could not be read.
    #[error("cannot read plugin {path}: {source}")]
    Io {
        /// Plugin path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("plugin {path} is not valid JSON: {source}")]
    Parse {
        /// Plugin path that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The document does not have the required shape.
    #[error("plugin {path}: {reason}")]
    Shape {
        /// Plugin path with the structural problem.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },
}

/// Load action descriptors from `paths`, deduplicating repeated paths.
///
/// # Errors
///
/// Returns [`PluginError`] for unreadable files, invalid JSON, or documents
/// that do not match either descriptor shape. Plugin errors are fatal.
pub fn load_plugins(paths: &[PathBuf]) -> Result<Vec<ActionDescriptor>, PluginError> {
    let mut seen = HashSet::new();
    let mut actions = Vec::new();
    for path in paths {
        if !seen.insert(path.clone()) {
            continue;
        }
        actions.push(load_one(path)?);
    }
    Ok(actions)
}

fn load_one(path: &Path) -> Result<ActionDescriptor, PluginError> {
    let text = fs::read_to_string(path).map_err(|source| PluginError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_str(&text).map_err(|source| PluginError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let shape = |reason: String| PluginError::Shape {
        path: path.to_path_buf(),
        reason,
    };

    let kind = document
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| shape("missing string field `type`".to_string()))?;
    let action = document
        .get("action")
        .and_then(Value::as_object)
        .ok_or_else(|| shape("missing object field `action`".to_string()))?;

    let require_str = |key: &str| {
        action
            .get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| shape(format!("action requires string field `{key}`")))
    };
    let require_args = || -> Result<Vec<String>, PluginError> {
        let list = action
            .get("args")
            .and_then(Value::as_array)
            .ok_or_else(|| shape("action requires array field `args`".to_string()))?;
        list.iter()
            .map(|item| {
                item.as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| shape("`args` must contain only strings".to_string()))
            })
            .collect()
    };

    match kind {
        "Integrated" => {
            let prompt = require_str("prompt")?;
            let extra_args = require_args()?;
            let output_ext = match action.get("extension") {
                None => None,
                Some(Value::String(ext)) => Some(OutputExt::Same(ext.clone())),
                Some(Value::Array(items)) => match items.as_slice() {
                    [Value::String(c), Value::String(cxx)] => Some(OutputExt::PerLanguage {
                        c: c.clone(),
                        cxx: cxx.clone(),
                    }),
                    _ => {
                        return Err(shape(
                            "`extension` list must hold exactly two strings".to_string(),
                        ))
                    },
                },
                Some(_) => {
                    return Err(shape(
                        "`extension` must be a string or a two-string list".to_string(),
                    ))
                },
            };
            let output_opt = if output_ext.is_some() {
                Some(match action.get("outopt") {
                    None => "-o".to_string(),
                    Some(Value::String(opt)) => opt.clone(),
                    Some(_) => return Err(shape("`outopt` must be a string".to_string())),
                })
            } else {
                None
            };
            let tool = match action.get("tool") {
                None => None,
                Some(Value::String(binary)) => Some(ToolPair {
                    c: binary.clone(),
                    cxx: binary.clone(),
                }),
                Some(Value::Object(map)) => {
                    let pick = |key: &str| {
                        map.get(key)
                            .and_then(Value::as_str)
                            .map(ToString::to_string)
                            .ok_or_else(|| {
                                shape(format!("`tool` object requires string field `{key}`"))
                            })
                    };
                    Some(ToolPair {
                        c: pick("c")?,
                        cxx: pick("c++")?,
                    })
                },
                Some(_) => {
                    return Err(shape(
                        "`tool` must be a string or an object with `c` and `c++`".to_string(),
                    ))
                },
            };
            Ok(ActionDescriptor::Integrated(IntegratedAction {
                prompt,
                extra_args,
                output_opt,
                output_ext,
                tool,
            }))
        },
        "Singleton" => {
            let prompt = require_str("prompt")?;
            let tool = require_str("tool")?;
            let extra_args = require_args()?;
            let (output_ext, capture) = match action.get("extension") {
                None => (None, None),
                Some(Value::String(ext)) => {
                    let capture = match require_str("source")?.as_str() {
                        "stdout" => CaptureStream::Stdout,
                        "stderr" => CaptureStream::Stderr,
                        other => {
                            return Err(shape(format!(
                                "`source` must be `stdout` or `stderr`, not `{other}`"
                            )))
                        },
                    };
                    (Some(ext.clone()), Some(capture))
                },
                Some(_) => return Err(shape("`extension` must be a string".to_string())),
            };
            Ok(ActionDescriptor::Singleton(SingletonAction {
                prompt,
                tool,
                extra_args,
                output_ext,
                capture,
            }))
        },
        other => Err(shape(format!(
            "`type` must be `Integrated` or `Singleton`, not `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn write_plugin(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_integrated_plugin_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "ast.json",
            r#"{"type": "Integrated",
                "action": {"prompt": "emit AST", "args": ["-emit-ast"],
                           "extension": ".ast"}}"#,
        );
        let actions = load_plugins(&[path]).unwrap();
        let [ActionDescriptor::Integrated(action)] = actions.as_slice() else {
            panic!("expected one integrated action");
        };
        assert_eq!(action.prompt, "emit AST");
        assert_eq!(action.output_opt.as_deref(), Some("-o"));
        assert_eq!(action.output_ext, Some(OutputExt::Same(".ast".to_string())));
        assert!(action.tool.is_none());
    }

    #[test]
    fn test_integrated_extension_pair_and_tool_object() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "pp.json",
            r#"{"type": "Integrated",
                "action": {"prompt": "preprocess", "args": ["-E"],
                           "extension": [".i", ".ii"],
                           "outopt": "-o",
                           "tool": {"c": "gcc", "c++": "g++"}}}"#,
        );
        let actions = load_plugins(&[path]).unwrap();
        let [ActionDescriptor::Integrated(action)] = actions.as_slice() else {
            panic!("expected one integrated action");
        };
        assert_eq!(
            action.output_ext,
            Some(OutputExt::PerLanguage {
                c: ".i".to_string(),
                cxx: ".ii".to_string(),
            })
        );
        let tool = action.tool.as_ref().unwrap();
        assert_eq!(tool.c, "gcc");
        assert_eq!(tool.cxx, "g++");
    }

    #[test]
    fn test_singleton_plugin_with_capture() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "query.json",
            r#"{"type": "Singleton",
                "action": {"prompt": "match gotos", "tool": "clang-query",
                           "args": ["-c", "match gotoStmt()"],
                           "extension": ".q", "source": "stdout"}}"#,
        );
        let actions = load_plugins(&[path]).unwrap();
        let [ActionDescriptor::Singleton(action)] = actions.as_slice() else {
            panic!("expected one singleton action");
        };
        assert_eq!(action.tool, "clang-query");
        assert_eq!(action.output_ext.as_deref(), Some(".q"));
        assert_eq!(action.capture, Some(CaptureStream::Stdout));
    }

    #[test]
    fn test_singleton_extension_requires_source() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "bad.json",
            r#"{"type": "Singleton",
                "action": {"prompt": "x", "tool": "t", "args": [],
                           "extension": ".out"}}"#,
        );
        let error = load_plugins(&[path]).unwrap_err();
        assert!(matches!(error, PluginError::Shape { .. }), "{error}");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "bad.json",
            r#"{"type": "Builtin", "action": {"prompt": "x", "args": []}}"#,
        );
        assert!(load_plugins(&[path]).is_err());
    }

    #[test]
    fn test_duplicate_paths_load_once() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            &dir,
            "one.json",
            r#"{"type": "Integrated", "action": {"prompt": "p", "args": []}}"#,
        );
        let actions = load_plugins(&[path.clone(), path]).unwrap();
        assert_eq!(actions.len(), 1);
    }
}
