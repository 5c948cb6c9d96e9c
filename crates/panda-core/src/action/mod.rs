//! Action descriptors and the built-in catalog.
//!
//! An action describes one piece of per-unit work. *Integrated* actions
//! replay the unit's compilation with extra flags; *singleton* actions run a
//! standalone tool that receives the unit's argv after a `--` separator.
//! Descriptors are frozen after options are parsed and shared across workers.

pub mod plugin;

use std::path::Path;
use std::sync::Arc;

use crate::cdb::Language;
use crate::options::Options;

/// Which stream of a singleton tool is captured to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStream {
    /// Capture standard output.
    Stdout,
    /// Capture standard error.
    Stderr,
}

/// Output extension of an integrated action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputExt {
    /// One extension for both languages.
    Same(String),
    /// Distinct extensions for C and C++ units.
    PerLanguage {
        /// Extension appended for C units.
        c: String,
        /// Extension appended for C++ units.
        cxx: String,
    },
}

impl OutputExt {
    /// The extension to append for a unit of `language`.
    #[must_use]
    pub fn for_language(&self, language: Language) -> &str {
        match self {
            Self::Same(ext) => ext,
            Self::PerLanguage { c, cxx } => match language {
                Language::Cxx => cxx,
                Language::C | Language::Unknown => c,
            },
        }
    }
}

/// Per-language tool binaries overriding the configured compilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPair {
    /// Binary used for C units.
    pub c: String,
    /// Binary used for C++ units.
    pub cxx: String,
}

impl ToolPair {
    /// The binary to use for a unit of `language`.
    #[must_use]
    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::Cxx => &self.cxx,
            Language::C | Language::Unknown => &self.c,
        }
    }
}

/// A compiler-driven per-unit action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegratedAction {
    /// Human-readable banner.
    pub prompt: String,
    /// argv fragment appended to the replay command.
    pub extra_args: Vec<String>,
    /// Flag preceding the output path; present iff the action writes a file.
    pub output_opt: Option<String>,
    /// Extension of the produced file, when one is produced.
    pub output_ext: Option<OutputExt>,
    /// Per-language binary override; the configured compilers otherwise.
    pub tool: Option<ToolPair>,
}

/// A standalone tool driven once per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingletonAction {
    /// Human-readable banner.
    pub prompt: String,
    /// Binary to invoke.
    pub tool: String,
    /// argv fragment placed after the source file, before the `--` separator.
    pub extra_args: Vec<String>,
    /// Extension of the captured-output file; capture happens iff set.
    pub output_ext: Option<String>,
    /// The stream captured when `output_ext` is set.
    pub capture: Option<CaptureStream>,
}

/// A per-unit action of either shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDescriptor {
    /// Replayed compilation with extra flags.
    Integrated(IntegratedAction),
    /// Standalone tool invocation.
    Singleton(SingletonAction),
}

impl ActionDescriptor {
    /// The action's banner.
    #[must_use]
    pub fn prompt(&self) -> &str {
        match self {
            Self::Integrated(action) => &action.prompt,
            Self::Singleton(action) => &action.prompt,
        }
    }
}

fn args(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(ToString::to_string).collect()
}

fn integrated(
    prompt: &str,
    extra: &[&str],
    output_opt: Option<&str>,
    output_ext: Option<OutputExt>,
) -> ActionDescriptor {
    ActionDescriptor::Integrated(IntegratedAction {
        prompt: prompt.to_string(),
        extra_args: args(extra),
        output_opt: output_opt.map(ToString::to_string),
        output_ext,
        tool: None,
    })
}

/// `-fsyntax-only` check; produces no file.
#[must_use]
pub fn syntax() -> ActionDescriptor {
    integrated("check syntax", &["-fsyntax-only", "-Wall"], None, None)
}

/// Object-file generation.
#[must_use]
pub fn compile() -> ActionDescriptor {
    integrated(
        "generate object",
        &["-c", "-w"],
        Some("-o"),
        Some(OutputExt::Same(".o".to_string())),
    )
}

/// Preprocessed output, `.i` for C and `.ii` for C++.
#[must_use]
pub fn preprocess() -> ActionDescriptor {
    integrated(
        "preprocess",
        &["-E"],
        Some("-o"),
        Some(OutputExt::PerLanguage {
            c: ".i".to_string(),
            cxx: ".ii".to_string(),
        }),
    )
}

/// Serialized AST emission.
#[must_use]
pub fn ast() -> ActionDescriptor {
    integrated(
        "emit AST",
        &["-emit-ast", "-w"],
        Some("-o"),
        Some(OutputExt::Same(".ast".to_string())),
    )
}

/// LLVM bitcode emission.
#[must_use]
pub fn bitcode() -> ActionDescriptor {
    integrated(
        "emit bitcode",
        &["-c", "-emit-llvm", "-w"],
        Some("-o"),
        Some(OutputExt::Same(".bc".to_string())),
    )
}

/// Textual LLVM IR emission.
#[must_use]
pub fn llvm_ir() -> ActionDescriptor {
    integrated(
        "emit LLVM IR",
        &["-c", "-emit-llvm", "-S", "-w"],
        Some("-o"),
        Some(OutputExt::Same(".ll".to_string())),
    )
}

/// Assembly emission.
#[must_use]
pub fn asm() -> ActionDescriptor {
    integrated(
        "emit assembly",
        &["-S", "-w"],
        Some("-o"),
        Some(OutputExt::Same(".s".to_string())),
    )
}

/// Dependency-file emission via `-M`, written through `-MF`.
#[must_use]
pub fn dep() -> ActionDescriptor {
    integrated(
        "emit dependency",
        &["-fsyntax-only", "-w", "-M"],
        Some("-MF"),
        Some(OutputExt::Same(".d".to_string())),
    )
}

/// Clang static analyzer with HTML reports under `<output>/csa-reports`.
///
/// The argv is assembled once, after options are parsed; the descriptor is
/// immutable afterwards.
#[must_use]
pub fn analyze(output_root: &Path, verbose: bool) -> ActionDescriptor {
    let reports = output_root.join("csa-reports");
    let mut extra = args(&[
        "--analyze",
        "-Xanalyzer",
        "-analyzer-output=html",
        "-Xanalyzer",
        "-analyzer-disable-checker=deadcode",
        "-o",
    ]);
    extra.push(reports.to_string_lossy().into_owned());
    if verbose {
        extra.extend(args(&["-Xanalyzer", "-analyzer-display-progress"]));
    }
    ActionDescriptor::Integrated(IntegratedAction {
        prompt: "run static analyzer".to_string(),
        extra_args: extra,
        output_opt: None,
        output_ext: None,
        tool: None,
    })
}

/// External-definition mapping, capturing the mapper's stdout per unit.
#[must_use]
pub fn extdef_map(mapper: &str) -> ActionDescriptor {
    ActionDescriptor::Singleton(SingletonAction {
        prompt: "map external definitions".to_string(),
        tool: mapper.to_string(),
        extra_args: Vec::new(),
        output_ext: Some(".extdef".to_string()),
        capture: Some(CaptureStream::Stdout),
    })
}

/// The enabled per-unit actions for this run: built-ins first, then plugins.
#[must_use]
pub fn enabled_actions(opts: &Options) -> Vec<Arc<ActionDescriptor>> {
    let toggles = &opts.builtins;
    let mut actions = Vec::new();
    if toggles.syntax {
        actions.push(syntax());
    }
    if toggles.compile {
        actions.push(compile());
    }
    if toggles.preprocess {
        actions.push(preprocess());
    }
    if toggles.ast {
        actions.push(ast());
    }
    if toggles.bitcode {
        actions.push(bitcode());
    }
    if toggles.llvm_ir {
        actions.push(llvm_ir());
    }
    if toggles.asm {
        actions.push(asm());
    }
    if toggles.dep {
        actions.push(dep());
    }
    if toggles.analyze {
        actions.push(analyze(&opts.output, opts.verbose));
    }
    if toggles.extdef.is_some() {
        actions.push(extdef_map(&opts.extdef_mapper));
    }
    actions.extend(opts.plugins.iter().cloned());
    actions.into_iter().map(Arc::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_extension_tracks_language() {
        let ActionDescriptor::Integrated(action) = preprocess() else {
            panic!("preprocess is integrated");
        };
        let ext = action.output_ext.unwrap();
        assert_eq!(ext.for_language(Language::C), ".i");
        assert_eq!(ext.for_language(Language::Cxx), ".ii");
    }

    #[test]
    fn test_dep_writes_through_mf() {
        let ActionDescriptor::Integrated(action) = dep() else {
            panic!("dep is integrated");
        };
        assert_eq!(action.extra_args, ["-fsyntax-only", "-w", "-M"]);
        assert_eq!(action.output_opt.as_deref(), Some("-MF"));
    }

    #[test]
    fn test_analyzer_argv_frozen_from_options() {
        let quiet = analyze(Path::new("/out"), false);
        let ActionDescriptor::Integrated(action) = &quiet else {
            panic!("analyze is integrated");
        };
        assert!(action
            .extra_args
            .windows(2)
            .any(|w| w == ["-o", "/out/csa-reports"]));
        assert!(!action
            .extra_args
            .iter()
            .any(|a| a == "-analyzer-display-progress"));

        let ActionDescriptor::Integrated(verbose) = analyze(Path::new("/out"), true) else {
            panic!("analyze is integrated");
        };
        assert!(verbose
            .extra_args
            .iter()
            .any(|a| a == "-analyzer-display-progress"));
    }

    #[test]
    fn test_extdef_map_captures_stdout() {
        let ActionDescriptor::Singleton(action) = extdef_map("clang-extdef-mapping") else {
            panic!("extdef-map is singleton");
        };
        assert_eq!(action.output_ext.as_deref(), Some(".extdef"));
        assert_eq!(action.capture, Some(CaptureStream::Stdout));
        assert!(action.extra_args.is_empty());
    }
}
