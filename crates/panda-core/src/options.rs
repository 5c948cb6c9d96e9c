//! The immutable configuration record driving a run.
//!
//! `Options` is assembled once by the CLI (or a test harness) and treated as
//! read-only by every worker. Action descriptors that depend on resolved
//! paths are built from it after parsing and frozen.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::action::ActionDescriptor;
use crate::cdb::Language;
use crate::estimator::SizeMetric;
use crate::worklist::SchedulerStrategy;

/// How the external-definition map is consumed by later CTU analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtdefStyle {
    /// On-demand parsing: map values are source paths.
    Source,
    /// AST loading: map values are rewritten to `.ast` files under the
    /// output root.
    LoadingAst,
}

/// Which built-in actions and reducers are enabled.
#[derive(Debug, Clone, Default)]
pub struct BuiltinToggles {
    /// Syntax-only check.
    pub syntax: bool,
    /// Object generation.
    pub compile: bool,
    /// Preprocessed output.
    pub preprocess: bool,
    /// AST emission.
    pub ast: bool,
    /// Bitcode emission.
    pub bitcode: bool,
    /// LLVM IR emission.
    pub llvm_ir: bool,
    /// Assembly emission.
    pub asm: bool,
    /// Dependency-file emission.
    pub dep: bool,
    /// Static analyzer.
    pub analyze: bool,
    /// External-definition mapping, and the form its values take.
    pub extdef: Option<ExtdefStyle>,
    /// Invocation-list reducer.
    pub invocation_list: bool,
    /// Input-file-list reducer.
    pub input_list: bool,
    /// Source-file-list reducer.
    pub source_list: bool,
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Absolute path of the compilation database.
    pub database: PathBuf,
    /// Absolute output root; per-unit outputs mirror source paths below it.
    pub output: PathBuf,
    /// Worker count, at least 1.
    pub jobs: usize,
    /// C compiler used for replay.
    pub cc: String,
    /// C++ compiler used for replay.
    pub cxx: String,
    /// External-definition mapper binary.
    pub extdef_mapper: String,
    /// File name of the merged external-definition map.
    pub extdef_map_name: String,
    /// File name of the invocation list.
    pub invocation_list_name: String,
    /// File name of the input-file list.
    pub input_list_name: String,
    /// File name of the source-file list.
    pub source_list_name: String,
    /// Keep only source-list entries starting with this prefix.
    pub source_list_prefix: Option<String>,
    /// When set, only these units (absolute paths) are processed.
    pub unit_filter: Option<HashSet<PathBuf>>,
    /// Work-ordering strategy.
    pub strategy: SchedulerStrategy,
    /// Job-size metric for the priority strategies.
    pub metric: SizeMetric,
    /// Enabled built-in actions and reducers.
    pub builtins: BuiltinToggles,
    /// User-supplied actions, already validated.
    pub plugins: Vec<ActionDescriptor>,
    /// Verbose output: echo argvs and the enabled-action summary.
    pub verbose: bool,
}

impl Options {
    /// The configured replay compiler for `language`, if it has one.
    #[must_use]
    pub fn compiler_for(&self, language: Language) -> Option<&str> {
        match language {
            Language::C => Some(&self.cc),
            Language::Cxx => Some(&self.cxx),
            Language::Unknown => None,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./compile_commands.json"),
            output: PathBuf::from("./panda-output"),
            jobs: 1,
            cc: "clang".to_string(),
            cxx: "clang++".to_string(),
            extdef_mapper: "clang-extdef-mapping".to_string(),
            extdef_map_name: "externalDefMap.txt".to_string(),
            invocation_list_name: "invocations.yaml".to_string(),
            input_list_name: "inputs.ifl".to_string(),
            source_list_name: "source-files.txt".to_string(),
            source_list_prefix: None,
            unit_filter: None,
            strategy: SchedulerStrategy::LongestFirst,
            metric: SizeMetric::Semicolon,
            builtins: BuiltinToggles::default(),
            plugins: Vec::new(),
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_selection_by_language() {
        let opts = Options::default();
        assert_eq!(opts.compiler_for(Language::C), Some("clang"));
        assert_eq!(opts.compiler_for(Language::Cxx), Some("clang++"));
        assert_eq!(opts.compiler_for(Language::Unknown), None);
    }
}
