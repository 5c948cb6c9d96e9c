//! Whole-database reducers.
//!
//! Reducers aggregate per-unit results into project-level artifacts. The
//! invocation list and the input-file list depend only on the normalized
//! units, so the driver schedules them as ordinary pool tasks. The
//! external-definition map and the source-file list consume files the
//! per-unit actions wrote, so they run on the main thread after the pool has
//! joined. Reducer parsing is partial-tolerant: malformed lines are skipped
//! and whatever parsed is still emitted.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::warn;

use crate::cdb::{absolutize, CompileCommand};
use crate::exec::unit_output_path;
use crate::options::{ExtdefStyle, Options};

/// Errors producing a project-level artifact.
#[derive(Debug, Error)]
pub enum ReduceError {
    /// An output file could not be created or written.
    #[error("cannot write {path}: {source}")]
    Io {
        /// The artifact that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn create_artifact(opts: &Options, name: &str) -> Result<(PathBuf, BufWriter<File>), ReduceError> {
    let path = opts.output.join(name);
    let io_error = |source| ReduceError::Io {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(&opts.output).map_err(io_error)?;
    let file = File::create(&path).map_err(io_error)?;
    Ok((path, BufWriter::new(file)))
}

/// Parse one line of an external-definition map.
///
/// The preferred form is length-prefixed, `<len>:<usr><sep><path>`, where
/// `<len>` is the byte length of the USR and `<sep>` is any single byte. The
/// legacy form is `<usr> <path>`, split on the first space. Returns `None`
/// for anything else.
#[must_use]
pub fn parse_extdef_line(line: &str) -> Option<(String, String)> {
    if let Some((length_text, rest)) = line.split_once(':') {
        if let Ok(length) = length_text.parse::<usize>() {
            let bytes = rest.as_bytes();
            if bytes.len() > length.saturating_add(1) {
                let usr = std::str::from_utf8(&bytes[..length]);
                let path = std::str::from_utf8(&bytes[length + 1..]);
                if let (Ok(usr), Ok(path)) = (usr, path) {
                    return Some((usr.to_string(), path.to_string()));
                }
            }
        }
    }
    let (usr, path) = line.split_once(' ')?;
    if usr.is_empty() || path.is_empty() {
        return None;
    }
    Some((usr.to_string(), path.to_string()))
}

/// Read and parse one unit's `.extdef` output. `None` when the file is
/// missing or unreadable.
fn read_extdef(opts: &Options, unit: &CompileCommand) -> Option<Vec<(String, String)>> {
    let path = unit_output_path(&opts.output, &unit.file, ".extdef");
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(error) => {
            warn!(path = %path.display(), %error, "missing external-definition output; skipping unit");
            return None;
        },
    };
    Some(
        text.lines()
            .filter(|line| !line.is_empty())
            .filter_map(parse_extdef_line)
            .collect(),
    )
}

/// Parse every unit's `.extdef` file, fanning the reads out over at most
/// `opts.jobs` threads while keeping results in database order.
fn read_all_extdefs(
    opts: &Options,
    units: &[Arc<CompileCommand>],
) -> Vec<Option<Vec<(String, String)>>> {
    let mut results: Vec<Option<Vec<(String, String)>>> = vec![None; units.len()];
    if units.is_empty() {
        return results;
    }
    let chunk = units.len().div_ceil(opts.jobs.max(1));
    thread::scope(|scope| {
        for (unit_chunk, result_chunk) in units.chunks(chunk).zip(results.chunks_mut(chunk)) {
            scope.spawn(move || {
                for (unit, slot) in unit_chunk.iter().zip(result_chunk.iter_mut()) {
                    *slot = read_extdef(opts, unit);
                }
            });
        }
    });
    results
}

/// Merge per-unit external-definition maps into one file.
///
/// Entries are emitted in first-insertion order; a USR seen again takes the
/// later unit's value, so database order decides collisions. Under the
/// AST-loading style every value is rewritten to the unit's serialized AST
/// below the output root.
///
/// # Errors
///
/// Returns [`ReduceError`] only when the merged map itself cannot be
/// written; missing or malformed inputs are skipped.
pub fn merge_extdef_maps(
    opts: &Options,
    units: &[Arc<CompileCommand>],
) -> Result<(), ReduceError> {
    let parsed = read_all_extdefs(opts, units);

    let mut order = Vec::new();
    let mut merged: HashMap<String, String> = HashMap::new();
    for entries in parsed.into_iter().flatten() {
        for (usr, path) in entries {
            let value = match opts.builtins.extdef {
                Some(ExtdefStyle::LoadingAst) => {
                    let mut rewritten = opts.output.to_string_lossy().into_owned();
                    rewritten.push_str(&path);
                    rewritten.push_str(".ast");
                    rewritten
                },
                _ => path,
            };
            if merged.insert(usr.clone(), value).is_none() {
                order.push(usr);
            }
        }
    }

    let (path, mut out) = create_artifact(opts, &opts.extdef_map_name)?;
    let io_error = |source| ReduceError::Io {
        path: path.clone(),
        source,
    };
    for usr in &order {
        writeln!(out, "{usr} {}", merged[usr]).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

/// Aggregate the dependency outputs into a sorted list of project sources.
///
/// # Errors
///
/// Returns [`ReduceError`] only when the list itself cannot be written;
/// units without a dependency output are warned about and skipped.
pub fn write_source_file_list(
    opts: &Options,
    units: &[Arc<CompileCommand>],
) -> Result<(), ReduceError> {
    let mut files = BTreeSet::new();
    for unit in units {
        let dep = unit_output_path(&opts.output, &unit.file, ".d");
        let text = match fs::read_to_string(&dep) {
            Ok(text) => text,
            Err(error) => {
                warn!(path = %dep.display(), %error,
                      "missing dependency output; re-run with dependency generation enabled");
                continue;
            },
        };
        for token in text.split_whitespace() {
            if token == "\\" || token.ends_with(':') {
                continue;
            }
            let resolved = absolutize(&unit.directory.join(token));
            if fs::metadata(&resolved).map(|meta| meta.is_file()).unwrap_or(false) {
                files.insert(resolved.to_string_lossy().into_owned());
            }
        }
    }

    let (path, mut out) = create_artifact(opts, &opts.source_list_name)?;
    let io_error = |source| ReduceError::Io {
        path: path.clone(),
        source,
    };
    for file in &files {
        if let Some(prefix) = &opts.source_list_prefix {
            if !file.starts_with(prefix.as_str()) {
                continue;
            }
        }
        writeln!(out, "{file}").map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

/// Ask the configured C compiler for its resource directory.
#[must_use]
pub fn clang_resource_dir(compiler: &str) -> Option<String> {
    let output = Command::new(compiler)
        .arg("-print-resource-dir")
        .stdin(Stdio::null())
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(%compiler, status = %output.status, "resource-dir probe failed");
            return None;
        },
        Err(error) => {
            warn!(%compiler, %error, "resource-dir probe failed");
            return None;
        },
    };
    let dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if dir.is_empty() {
        None
    } else {
        Some(dir)
    }
}

/// Write the invocation list: one bare JSON object per line, mapping each
/// unit's absolute path to its replay argv.
///
/// # Errors
///
/// Returns [`ReduceError`] when the list cannot be written.
pub fn write_invocation_list(
    opts: &Options,
    units: &[Arc<CompileCommand>],
    resource_dir: Option<&str>,
) -> Result<(), ReduceError> {
    let (path, mut out) = create_artifact(opts, &opts.invocation_list_name)?;
    let io_error = |source| ReduceError::Io {
        path: path.clone(),
        source,
    };
    for unit in units {
        let mut argv = Vec::with_capacity(unit.arguments.len() + 4);
        argv.push(unit.compiler.clone());
        argv.extend(unit.arguments.iter().cloned());
        argv.push("-c".to_string());
        argv.push(format!("-working-directory={}", unit.directory.display()));
        if let Some(dir) = resource_dir {
            argv.push(format!("-resource-dir={dir}"));
        }
        let mut object = serde_json::Map::new();
        object.insert(
            unit.file.to_string_lossy().into_owned(),
            serde_json::Value::from(argv),
        );
        writeln!(out, "{}", serde_json::Value::Object(object)).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

/// Write one absolute unit path per line, in database order.
///
/// # Errors
///
/// Returns [`ReduceError`] when the list cannot be written.
pub fn write_input_file_list(
    opts: &Options,
    units: &[Arc<CompileCommand>],
) -> Result<(), ReduceError> {
    let (path, mut out) = create_artifact(opts, &opts.input_list_name)?;
    let io_error = |source| ReduceError::Io {
        path: path.clone(),
        source,
    };
    for unit in units {
        writeln!(out, "{}", unit.file.display()).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cdb::Language;

    fn unit(file: PathBuf, directory: PathBuf) -> Arc<CompileCommand> {
        Arc::new(CompileCommand {
            directory,
            file,
            language: Language::C,
            compiler: "cc".to_string(),
            arguments: vec!["-O2".to_string(), "a.c".to_string()],
        })
    }

    fn options_in(dir: &TempDir) -> Options {
        Options {
            output: dir.path().join("out"),
            ..Options::default()
        }
    }

    #[test]
    fn test_parse_extdef_line_both_formats() {
        assert_eq!(
            parse_extdef_line("9:c:@F@foo# /src/foo.c"),
            Some(("c:@F@foo#".to_string(), "/src/foo.c".to_string()))
        );
        assert_eq!(
            parse_extdef_line("c:@F@foo# /src/foo.c"),
            Some(("c:@F@foo#".to_string(), "/src/foo.c".to_string()))
        );
    }

    #[test]
    fn test_parse_extdef_line_accepts_any_separator_byte() {
        assert_eq!(
            parse_extdef_line("9:c:@F@foo#\t/src/foo.c"),
            Some(("c:@F@foo#".to_string(), "/src/foo.c".to_string()))
        );
    }

    #[test]
    fn test_parse_extdef_line_rejects_garbage() {
        assert_eq!(parse_extdef_line("lonelytoken"), None);
        assert_eq!(parse_extdef_line("999:lengthtoolong"), None);
        assert_eq!(parse_extdef_line(" path-only"), None);
    }

    #[test]
    fn test_parse_extdef_line_bad_length_falls_back_to_legacy() {
        assert_eq!(
            parse_extdef_line("999:short rest"),
            Some(("999:short".to_string(), "rest".to_string()))
        );
    }

    fn write_extdef(opts: &Options, unit: &CompileCommand, lines: &str) {
        let path = unit_output_path(&opts.output, &unit.file, ".extdef");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, lines).unwrap();
    }

    #[test]
    fn test_merge_later_unit_wins_and_order_is_preserved() {
        let dir = TempDir::new().unwrap();
        let mut opts = options_in(&dir);
        opts.builtins.extdef = Some(ExtdefStyle::Source);
        let first = unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj"));
        let second = unit(PathBuf::from("/proj/b.c"), PathBuf::from("/proj"));
        write_extdef(&opts, &first, "c:@F@dup# /proj/a.c\nc:@F@only_a# /proj/a.c\n");
        write_extdef(&opts, &second, "c:@F@dup# /proj/b.c\n");

        merge_extdef_maps(&opts, &[first, second]).unwrap();

        let merged = fs::read_to_string(opts.output.join(&opts.extdef_map_name)).unwrap();
        assert_eq!(
            merged,
            "c:@F@dup# /proj/b.c\nc:@F@only_a# /proj/a.c\n"
        );
    }

    #[test]
    fn test_merge_rewrites_values_for_ast_loading() {
        let dir = TempDir::new().unwrap();
        let mut opts = options_in(&dir);
        opts.builtins.extdef = Some(ExtdefStyle::LoadingAst);
        let only = unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj"));
        write_extdef(&opts, &only, "c:@F@foo# /proj/a.c\n");

        merge_extdef_maps(&opts, &[only]).unwrap();

        let merged = fs::read_to_string(opts.output.join(&opts.extdef_map_name)).unwrap();
        let expected = format!(
            "c:@F@foo# {}/proj/a.c.ast\n",
            opts.output.to_string_lossy()
        );
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_skips_units_without_extdef_output() {
        let dir = TempDir::new().unwrap();
        let mut opts = options_in(&dir);
        opts.builtins.extdef = Some(ExtdefStyle::Source);
        let present = unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj"));
        let absent = unit(PathBuf::from("/proj/missing.c"), PathBuf::from("/proj"));
        write_extdef(&opts, &present, "c:@F@foo# /proj/a.c\n");

        merge_extdef_maps(&opts, &[present, absent]).unwrap();

        let merged = fs::read_to_string(opts.output.join(&opts.extdef_map_name)).unwrap();
        assert_eq!(merged, "c:@F@foo# /proj/a.c\n");
    }

    #[test]
    fn test_source_list_filters_sorts_and_keeps_existing_files() {
        let dir = TempDir::new().unwrap();
        let mut opts = options_in(&dir);
        let project = dir.path().join("proj");
        let lib = project.join("lib");
        fs::create_dir_all(&lib).unwrap();
        let main_c = project.join("main.c");
        let util_h = lib.join("util.h");
        fs::write(&main_c, "int main;\n").unwrap();
        fs::write(&util_h, "#pragma once\n").unwrap();

        let one = unit(main_c.clone(), project.clone());
        let dep = unit_output_path(&opts.output, &one.file, ".d");
        fs::create_dir_all(dep.parent().unwrap()).unwrap();
        fs::write(
            &dep,
            format!(
                "main.o: {} \\\n  {} missing.h\n",
                main_c.display(),
                util_h.display()
            ),
        )
        .unwrap();

        write_source_file_list(&opts, &[one.clone()]).unwrap();
        let listed = fs::read_to_string(opts.output.join(&opts.source_list_name)).unwrap();
        let expected = format!("{}\n{}\n", util_h.display(), main_c.display());
        assert_eq!(listed, expected);

        opts.source_list_prefix = Some(lib.to_string_lossy().into_owned());
        write_source_file_list(&opts, &[one]).unwrap();
        let listed = fs::read_to_string(opts.output.join(&opts.source_list_name)).unwrap();
        assert_eq!(listed, format!("{}\n", util_h.display()));
    }

    #[test]
    fn test_invocation_list_emits_one_object_per_line() {
        let dir = TempDir::new().unwrap();
        let opts = options_in(&dir);
        let units = [
            unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj")),
            unit(PathBuf::from("/proj/b.c"), PathBuf::from("/proj")),
        ];
        write_invocation_list(&opts, &units, Some("/usr/lib/clang/17")).unwrap();

        let text = fs::read_to_string(opts.output.join(&opts.invocation_list_name)).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let argv = first.get("/proj/a.c").unwrap().as_array().unwrap();
        let argv: Vec<_> = argv.iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(
            argv,
            [
                "cc",
                "-O2",
                "a.c",
                "-c",
                "-working-directory=/proj",
                "-resource-dir=/usr/lib/clang/17",
            ]
        );
    }

    #[test]
    fn test_invocation_list_omits_resource_dir_when_probe_failed() {
        let dir = TempDir::new().unwrap();
        let opts = options_in(&dir);
        let units = [unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj"))];
        write_invocation_list(&opts, &units, None).unwrap();
        let text = fs::read_to_string(opts.output.join(&opts.invocation_list_name)).unwrap();
        assert!(!text.contains("-resource-dir"));
    }

    #[test]
    fn test_input_list_preserves_database_order() {
        let dir = TempDir::new().unwrap();
        let opts = options_in(&dir);
        let units = [
            unit(PathBuf::from("/proj/z.c"), PathBuf::from("/proj")),
            unit(PathBuf::from("/proj/a.c"), PathBuf::from("/proj")),
        ];
        write_input_file_list(&opts, &units).unwrap();
        let text = fs::read_to_string(opts.output.join(&opts.input_list_name)).unwrap();
        assert_eq!(text, "/proj/z.c\n/proj/a.c\n");
    }
}
