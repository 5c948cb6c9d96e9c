//! Subprocess assembly and launch for per-unit actions.
//!
//! This is the command-rewriting layer: it turns a normalized
//! [`CompileCommand`] plus an [`ActionDescriptor`] into a concrete argv,
//! computes the on-disk output path when the action produces a file, and
//! launches the subprocess in the unit's original working directory. Task
//! failures are logged and isolated; they never stop the pool.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

use crate::action::{
    ActionDescriptor, CaptureStream, IntegratedAction, SingletonAction,
};
use crate::cdb::CompileCommand;
use crate::options::Options;

/// Placeholder replaced with the output root inside plugin argv fragments.
pub const OUTPUT_PLACEHOLDER: &str = "/path/to/output";

/// Errors launching or finishing one action. Logged, never propagated
/// across tasks.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The unit has no usable language, so no compiler can be chosen.
    #[error("no compiler for unit {file} of unknown language")]
    UnknownLanguage {
        /// The unit's source file.
        file: PathBuf,
    },

    /// The subprocess could not be spawned or waited on.
    #[error("cannot run `{program}`: {source}")]
    Process {
        /// argv[0] that failed.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Creating an output directory or writing captured output failed.
    #[error("cannot write {path}: {source}")]
    Output {
        /// The path that could not be produced.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// An argv ready to launch, plus the file it will produce, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInvocation {
    /// argv[0].
    pub program: String,
    /// argv tail.
    pub args: Vec<String>,
    /// Output file written by the action (via its output flag, or by stream
    /// capture for singleton tools).
    pub output: Option<PathBuf>,
}

/// Map a source file to its per-action output path.
///
/// The output root is string-concatenated with the absolute source path, so
/// the source tree is mirrored below the root:
/// `/out` + `/src/a/b.c` + `.ast` = `/out/src/a/b.c.ast`.
#[must_use]
pub fn unit_output_path(output_root: &Path, source: &Path, ext: &str) -> PathBuf {
    let mut joined = output_root.as_os_str().to_os_string();
    joined.push(source.as_os_str());
    joined.push(ext);
    PathBuf::from(joined)
}

/// Replace the output-root placeholder in an argv fragment.
#[must_use]
pub fn substitute(args: &[String], output_root: &Path) -> Vec<String> {
    let root = output_root.to_string_lossy();
    args.iter()
        .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &root))
        .collect()
}

/// Assemble the replay argv for an integrated action.
///
/// # Errors
///
/// Returns [`ExecError::UnknownLanguage`] when the unit's language selects
/// no compiler.
pub fn prepare_compiler(
    opts: &Options,
    cc: &CompileCommand,
    action: &IntegratedAction,
) -> Result<PreparedInvocation, ExecError> {
    let program = match &action.tool {
        Some(pair) => pair.for_language(cc.language).to_string(),
        None => opts
            .compiler_for(cc.language)
            .ok_or_else(|| ExecError::UnknownLanguage {
                file: cc.file.clone(),
            })?
            .to_string(),
    };
    let mut args = cc.arguments.clone();
    args.extend(substitute(&action.extra_args, &opts.output));
    let output = match (&action.output_opt, &action.output_ext) {
        (Some(opt), Some(ext)) => {
            let path = unit_output_path(&opts.output, &cc.file, ext.for_language(cc.language));
            args.push(opt.clone());
            args.push(path.to_string_lossy().into_owned());
            Some(path)
        },
        _ => None,
    };
    Ok(PreparedInvocation {
        program,
        args,
        output,
    })
}

/// Assemble the argv for a singleton action: the tool sees the source file
/// and its own arguments first, then the unit's compile arguments behind a
/// literal `--`.
#[must_use]
pub fn prepare_tool(
    opts: &Options,
    cc: &CompileCommand,
    action: &SingletonAction,
) -> PreparedInvocation {
    let mut args = vec![cc.file.to_string_lossy().into_owned()];
    args.extend(substitute(&action.extra_args, &opts.output));
    args.push("--".to_string());
    args.push("-w".to_string());
    args.extend(cc.arguments.iter().cloned());
    let output = action
        .output_ext
        .as_deref()
        .map(|ext| unit_output_path(&opts.output, &cc.file, ext));
    PreparedInvocation {
        program: action.tool.clone(),
        args,
        output,
    }
}

fn ensure_parent(path: &Path) -> Result<(), ExecError> {
    if let Some(parent) = path.parent() {
        // Tolerates the already-exists race between workers.
        fs::create_dir_all(parent).map_err(|source| ExecError::Output {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Replay the unit's compilation with the action's extra flags.
///
/// # Errors
///
/// Returns [`ExecError`] when the compiler cannot be resolved or launched,
/// or when the output directory cannot be created.
pub fn run_compiler_action(
    opts: &Options,
    cc: &CompileCommand,
    action: &IntegratedAction,
) -> Result<ExitStatus, ExecError> {
    let invocation = prepare_compiler(opts, cc, action)?;
    if let Some(output) = &invocation.output {
        ensure_parent(output)?;
    }
    debug!(program = %invocation.program, args = ?invocation.args,
           directory = %cc.directory.display(), "launching compiler");
    Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&cc.directory)
        .stdin(Stdio::null())
        .status()
        .map_err(|source| ExecError::Process {
            program: invocation.program.clone(),
            source,
        })
}

/// Run a standalone tool over the unit, optionally capturing one stream.
///
/// # Errors
///
/// Returns [`ExecError`] when the tool cannot be launched or the captured
/// output cannot be written.
pub fn run_tool_action(
    opts: &Options,
    cc: &CompileCommand,
    action: &SingletonAction,
) -> Result<ExitStatus, ExecError> {
    let invocation = prepare_tool(opts, cc, action);
    debug!(program = %invocation.program, args = ?invocation.args,
           directory = %cc.directory.display(), "launching tool");
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&cc.directory)
        .stdin(Stdio::null());
    match action.capture {
        Some(CaptureStream::Stdout) => {
            command.stdout(Stdio::piped());
        },
        Some(CaptureStream::Stderr) => {
            command.stderr(Stdio::piped());
        },
        None => {},
    }

    let process_error = |source| ExecError::Process {
        program: invocation.program.clone(),
        source,
    };
    let mut child = command.spawn().map_err(process_error)?;

    // Only one stream is ever piped, so a plain read cannot deadlock.
    let mut captured = Vec::new();
    match action.capture {
        Some(CaptureStream::Stdout) => {
            if let Some(stream) = child.stdout.take() {
                read_stream(stream, &mut captured);
            }
        },
        Some(CaptureStream::Stderr) => {
            if let Some(stream) = child.stderr.take() {
                read_stream(stream, &mut captured);
            }
        },
        None => {},
    }
    let status = child.wait().map_err(process_error)?;

    if let Some(output) = &invocation.output {
        ensure_parent(output)?;
        let text = String::from_utf8_lossy(&captured);
        fs::write(output, text.as_bytes()).map_err(|source| ExecError::Output {
            path: output.clone(),
            source,
        })?;
    }
    Ok(status)
}

fn read_stream(mut stream: impl Read, buffer: &mut Vec<u8>) {
    if let Err(error) = stream.read_to_end(buffer) {
        warn!(%error, "reading captured stream failed");
    }
}

/// Run one action against one unit, logging instead of propagating failure.
///
/// This is the body of every per-unit pool task.
pub fn execute(opts: &Options, cc: &CompileCommand, action: &ActionDescriptor) {
    println!("panda: {} \"{}\"", action.prompt(), cc.file.display());
    let result = match action {
        ActionDescriptor::Integrated(integrated) => run_compiler_action(opts, cc, integrated),
        ActionDescriptor::Singleton(singleton) => run_tool_action(opts, cc, singleton),
    };
    match result {
        Ok(status) if !status.success() => {
            warn!(file = %cc.file.display(), action = action.prompt(), %status,
                  "action exited with failure");
        },
        Ok(_) => {},
        Err(error) => {
            warn!(file = %cc.file.display(), action = action.prompt(), %error,
                  "action failed");
        },
    }
}

/// Check that `tool` can be launched at all by running `<tool> --version`.
///
/// The exit status is irrelevant; only spawn failure matters.
///
/// # Errors
///
/// Returns the spawn error when the binary cannot be launched at all.
pub fn probe_tool(tool: &str) -> std::io::Result<()> {
    Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
}
