//! Compilation-database loading and per-unit normalization.
//!
//! A compilation database (CDB) is a JSON array of per-unit compile
//! descriptors. Each entry is normalized into a [`CompileCommand`]: paths are
//! absolutized, the source language is inferred, and build-specific flags
//! that would interfere with replaying the compilation are pruned from the
//! argument vector.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Source language of a translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Plain C.
    C,
    /// C++.
    Cxx,
    /// Anything the extension table does not cover; such units are skipped.
    Unknown,
}

impl Language {
    /// Infer the language from a file extension.
    ///
    /// Matching is case-sensitive: `.c` is C while `.C` is C++.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Self::Unknown;
        };
        match ext {
            "c" => Self::C,
            "C" | "cc" | "CC" | "cp" | "cpp" | "CPP" | "cxx" | "CXX" | "c++" | "C++" => Self::Cxx,
            _ => Self::Unknown,
        }
    }

    /// Map an explicit `-x` language name. Unrecognized names are `Unknown`.
    #[must_use]
    pub fn from_flag(name: &str) -> Self {
        match name {
            "c" => Self::C,
            "c++" => Self::Cxx,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::C => write!(f, "c"),
            Self::Cxx => write!(f, "c++"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One raw CDB entry, as found on disk.
///
/// Unknown fields (e.g. `output`) are tolerated and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    /// Primary source file, possibly relative to `directory`.
    pub file: Option<String>,
    /// Working directory the compiler was launched in.
    pub directory: Option<String>,
    /// Shell-quoted command string (older CDB producers).
    pub command: Option<String>,
    /// Pre-split argument vector including argv[0].
    pub arguments: Option<Vec<String>>,
}

/// A normalized, replay-ready compile command for one translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommand {
    /// Absolute working directory used to launch the compiler.
    pub directory: PathBuf,
    /// Absolute path to the primary source file.
    pub file: PathBuf,
    /// Inferred (or `-x`-overridden) source language.
    pub language: Language,
    /// argv[0] of the original command, retained for invocation-list output.
    pub compiler: String,
    /// Pruned argv tail, excluding argv[0].
    pub arguments: Vec<String>,
}

/// Errors loading a compilation database. These are fatal: no work starts.
#[derive(Debug, Error)]
pub enum CdbError {
    /// The database file could not be opened or read.
    #[error("cannot open compilation database {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The database is not a JSON array of entry objects.
    #[error("malformed compilation database {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Errors normalizing a single entry. These skip the unit, never the run.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A required field is absent.
    #[error("entry is missing required field `{0}`")]
    MissingField(&'static str),

    /// The `command` string is not splittable under POSIX shell rules.
    #[error("cannot split command string: {0}")]
    BadCommand(#[from] shell_words::ParseError),

    /// The argument vector is empty, so there is no argv[0].
    #[error("entry has an empty argument vector")]
    EmptyArgv,
}

/// Load all entries of the database at `path`.
///
/// # Errors
///
/// Returns [`CdbError`] when the file cannot be opened or is not a JSON
/// array of entry objects.
pub fn load(path: &Path) -> Result<Vec<RawEntry>, CdbError> {
    let file = File::open(path).map_err(|source| CdbError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| CdbError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Normalize one raw entry into a replay-ready [`CompileCommand`].
///
/// # Errors
///
/// Returns [`NormalizeError`] for entries missing required fields, with an
/// unsplittable `command` string, or with an empty argv. The caller is
/// expected to warn and skip the unit.
pub fn normalize(entry: RawEntry) -> Result<CompileCommand, NormalizeError> {
    let file = entry.file.ok_or(NormalizeError::MissingField("file"))?;
    let directory = entry
        .directory
        .ok_or(NormalizeError::MissingField("directory"))?;
    let argv = match (entry.arguments, entry.command) {
        (Some(arguments), _) => arguments,
        (None, Some(command)) => shell_words::split(&command)?,
        (None, None) => return Err(NormalizeError::MissingField("arguments")),
    };
    let (compiler, tail) = argv.split_first().ok_or(NormalizeError::EmptyArgv)?;

    let directory = absolutize(Path::new(&directory));
    let file = absolutize(&directory.join(&file));

    let mut language = Language::from_path(&file);
    let (arguments, language_override) = prune_arguments(tail);
    if let Some(explicit) = language_override {
        language = explicit;
    }

    Ok(CompileCommand {
        directory,
        file,
        language,
        compiler: compiler.clone(),
        arguments,
    })
}

/// Tokens dropped on their own.
const DROP_SINGLE: [&str; 3] = ["-c", "-fsyntax-only", "-save-temps"];

/// Tokens dropped together with the token that follows them.
const DROP_WITH_VALUE: [&str; 5] = ["-o", "-MF", "-MT", "-MQ", "-MJ"];

/// Two-character prefixes whose whole token is dropped.
const DROP_PREFIXES: [&[u8]; 3] = [b"-M", b"-W", b"-g"];

fn has_dropped_prefix(token: &str) -> bool {
    token.len() >= 2 && DROP_PREFIXES.contains(&&token.as_bytes()[..2])
}

/// Prune build-specific flags from an argv tail.
///
/// Returns the pruned arguments and, when an explicit `-x LANG` / `-xLANG`
/// was seen, the language it selects (the last occurrence wins). Pruning is
/// idempotent: the kept tokens never match any drop rule.
#[must_use]
pub fn prune_arguments(args: &[String]) -> (Vec<String>, Option<Language>) {
    let mut kept = Vec::with_capacity(args.len());
    let mut language = None;
    let mut index = 0;
    while index < args.len() {
        let token = args[index].as_str();
        if DROP_SINGLE.contains(&token) {
            index += 1;
            continue;
        }
        if DROP_WITH_VALUE.contains(&token) {
            index += 2;
            continue;
        }
        if token.starts_with("-o=") {
            index += 1;
            continue;
        }
        if has_dropped_prefix(token) {
            index += 1;
            continue;
        }
        if token == "-x" {
            if let Some(name) = args.get(index + 1) {
                language = Some(Language::from_flag(name));
            }
        } else if let Some(name) = token.strip_prefix("-x") {
            language = Some(Language::from_flag(name));
        }
        kept.push(token.to_string());
        index += 1;
    }
    (kept, language)
}

/// Make `path` absolute and fold `.` / `..` components lexically.
///
/// Relative paths resolve against the process working directory. No symlink
/// resolution and no filesystem access happen here.
#[must_use]
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(ToString::to_string).collect()
    }

    fn entry(file: &str, directory: &str, command: &str) -> RawEntry {
        RawEntry {
            file: Some(file.to_string()),
            directory: Some(directory.to_string()),
            command: Some(command.to_string()),
            arguments: None,
        }
    }

    #[test]
    fn test_language_from_extension_table() {
        assert_eq!(Language::from_path(Path::new("a.c")), Language::C);
        for ext in [
            "C", "cc", "CC", "cp", "cpp", "CPP", "cxx", "CXX", "c++", "C++",
        ] {
            let name = format!("a.{ext}");
            assert_eq!(Language::from_path(Path::new(&name)), Language::Cxx, "{ext}");
        }
        assert_eq!(Language::from_path(Path::new("a.rs")), Language::Unknown);
        assert_eq!(Language::from_path(Path::new("noext")), Language::Unknown);
    }

    #[test]
    fn test_prune_drops_listed_flags() {
        let args = strings(&[
            "-O2",
            "-c",
            "a.c",
            "-o",
            "a.o",
            "-MD",
            "-MF",
            "a.d",
            "-Wall",
            "-g3",
            "-fsyntax-only",
            "-save-temps",
            "-o=dir",
            "-I/usr/include",
        ]);
        let (kept, language) = prune_arguments(&args);
        assert_eq!(kept, strings(&["-O2", "a.c", "-I/usr/include"]));
        assert!(language.is_none());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let args = strings(&["-O2", "-c", "a.c", "-o", "a.o", "-MT", "t", "-Wextra"]);
        let (once, _) = prune_arguments(&args);
        let (twice, _) = prune_arguments(&once);
        assert_eq!(once, twice);
        for token in &once {
            assert!(!DROP_SINGLE.contains(&token.as_str()));
            assert!(!DROP_WITH_VALUE.contains(&token.as_str()));
            assert!(!token.starts_with("-o="));
            assert!(!has_dropped_prefix(token));
        }
    }

    #[test]
    fn test_prune_drops_trailing_paired_flag() {
        let args = strings(&["-O1", "-o"]);
        let (kept, _) = prune_arguments(&args);
        assert_eq!(kept, strings(&["-O1"]));
    }

    #[test]
    fn test_language_override_spaced_and_joined() {
        let (kept, language) = prune_arguments(&strings(&["-x", "c++", "a.c"]));
        assert_eq!(language, Some(Language::Cxx));
        assert_eq!(kept, strings(&["-x", "c++", "a.c"]));

        let (_, language) = prune_arguments(&strings(&["-xc", "a.cpp"]));
        assert_eq!(language, Some(Language::C));

        let (_, language) = prune_arguments(&strings(&["-x", "assembler"]));
        assert_eq!(language, Some(Language::Unknown));
    }

    #[test]
    fn test_normalize_splits_command_and_absolutizes() {
        let cc = normalize(entry("a.c", "/proj", "gcc -O2 -c a.c -o a.o")).unwrap();
        assert_eq!(cc.directory, PathBuf::from("/proj"));
        assert_eq!(cc.file, PathBuf::from("/proj/a.c"));
        assert_eq!(cc.language, Language::C);
        assert_eq!(cc.compiler, "gcc");
        assert_eq!(cc.arguments, strings(&["-O2", "a.c"]));
    }

    #[test]
    fn test_normalize_honors_shell_quoting() {
        let cc = normalize(entry("a.c", "/p", r#"cc "-DNAME=\"v 1\"" a.c"#)).unwrap();
        assert_eq!(cc.arguments, strings(&[r#"-DNAME="v 1""#, "a.c"]));
    }

    #[test]
    fn test_normalize_prefers_arguments_over_command() {
        let raw = RawEntry {
            file: Some("a.c".to_string()),
            directory: Some("/p".to_string()),
            command: Some("ignored".to_string()),
            arguments: Some(strings(&["clang", "-O1", "a.c"])),
        };
        let cc = normalize(raw).unwrap();
        assert_eq!(cc.compiler, "clang");
        assert_eq!(cc.arguments, strings(&["-O1", "a.c"]));
    }

    #[test]
    fn test_normalize_rejects_incomplete_entries() {
        let missing_file = RawEntry {
            file: None,
            directory: Some("/p".to_string()),
            command: Some("cc a.c".to_string()),
            arguments: None,
        };
        assert!(matches!(
            normalize(missing_file),
            Err(NormalizeError::MissingField("file"))
        ));

        let missing_argv = RawEntry {
            file: Some("a.c".to_string()),
            directory: Some("/p".to_string()),
            command: None,
            arguments: None,
        };
        assert!(matches!(
            normalize(missing_argv),
            Err(NormalizeError::MissingField("arguments"))
        ));

        let empty = RawEntry {
            file: Some("a.c".to_string()),
            directory: Some("/p".to_string()),
            command: Some(String::new()),
            arguments: None,
        };
        assert!(matches!(normalize(empty), Err(NormalizeError::EmptyArgv)));
    }

    #[test]
    fn test_absolutize_folds_dot_components() {
        assert_eq!(
            absolutize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        let rel = absolutize(Path::new("x/y"));
        assert!(rel.is_absolute());
        assert!(rel.ends_with("x/y"));
    }
}
