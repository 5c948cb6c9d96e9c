//! panda - run compiler-based tools across a compilation database.
//!
//! The CLI translates flags into an immutable [`panda_core::Options`]
//! record, verifies that the required tool binaries can be launched, and
//! hands over to the scheduler in `panda-core`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use panda_core::action::plugin;
use panda_core::action::ActionDescriptor;
use panda_core::cdb::absolutize;
use panda_core::options::{BuiltinToggles, ExtdefStyle, Options};
use panda_core::{driver, exec};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Process exit codes.
pub mod exit_codes {
    /// Normal termination, including runs with failed per-unit actions.
    pub const SUCCESS: u8 = 0;
    /// Fatal misconfiguration detected before any work ran.
    pub const CONFIG_ERROR: u8 = 1;
}

/// Execute compilation-database dependent commands.
///
/// panda replays the compilations recorded in a compilation database to run
/// per-unit actions (syntax checks, preprocessed output, ASTs, bitcode,
/// external-definition mapping, the static analyzer, user plugins) in
/// parallel, then merges per-unit outputs into project-level artifacts.
#[derive(Parser, Debug)]
#[command(name = "panda")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the compilation database
    #[arg(
        short = 'f',
        long = "compilation-database",
        default_value = "./compile_commands.json"
    )]
    database: PathBuf,

    /// Number of parallel jobs
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Output directory; per-unit outputs mirror absolute source paths
    #[arg(short = 'o', long, default_value = "./panda-output")]
    output: PathBuf,

    /// Check syntax only
    #[arg(short = 'X', long)]
    syntax: bool,

    /// Generate object files
    #[arg(short = 'C', long)]
    compile: bool,

    /// Generate preprocessed files (.i / .ii)
    #[arg(short = 'E', long)]
    preprocess: bool,

    /// Generate serialized AST files (.ast)
    #[arg(short = 'A', long)]
    ast: bool,

    /// Generate LLVM bitcode files (.bc)
    #[arg(short = 'B', long)]
    bitcode: bool,

    /// Generate LLVM IR files (.ll)
    #[arg(short = 'R', long)]
    llvm_ir: bool,

    /// Generate assembly files (.s)
    #[arg(short = 'S', long)]
    asm: bool,

    /// Generate dependency files (.d)
    #[arg(short = 'D', long)]
    dep: bool,

    /// Generate the external-definition map from source files
    #[arg(short = 'M', long = "extdef-map")]
    extdef_map: bool,

    /// Generate the external-definition map against AST files
    #[arg(short = 'P', long = "extdef-map-ast")]
    extdef_map_ast: bool,

    /// Generate the invocation list
    #[arg(short = 'Y', long)]
    invocation_list: bool,

    /// Generate the input-file list
    #[arg(short = 'L', long)]
    input_file_list: bool,

    /// Generate the source-file list from dependency outputs
    #[arg(short = 'F', long)]
    source_file_list: bool,

    /// Run the clang static analyzer
    #[arg(long)]
    analyze: bool,

    /// Prepare CTU analysis with on-demand parsing (same as -M -Y -L)
    #[arg(long)]
    ctu_on_demand_parsing: bool,

    /// Prepare CTU analysis with AST loading (same as -A -P -L)
    #[arg(long)]
    ctu_loading_ast_files: bool,

    /// Load an action descriptor from a plugin file (repeatable)
    #[arg(long = "plugin", value_name = "PATH")]
    plugins: Vec<PathBuf>,

    /// C compiler used to replay compilations
    #[arg(long, default_value = "clang")]
    cc: String,

    /// C++ compiler used to replay compilations
    #[arg(long, default_value = "clang++")]
    cxx: String,

    /// External-definition mapper binary
    #[arg(long, default_value = "clang-extdef-mapping")]
    efmer: String,

    /// Directory searched for the compiler binaries; absolute settings win
    #[arg(short = 'p', long = "clang-path", value_name = "DIR")]
    clang_path: Option<PathBuf>,

    /// File name of the merged external-definition map
    #[arg(long, default_value = "externalDefMap.txt")]
    efm: String,

    /// File name of the invocation list
    #[arg(long, default_value = "invocations.yaml")]
    ivcl: String,

    /// File name of the input-file list
    #[arg(long, default_value = "inputs.ifl")]
    ifl: String,

    /// File name of the source-file list
    #[arg(long, default_value = "source-files.txt")]
    sfl: String,

    /// Keep only source-list entries starting with this prefix
    #[arg(long = "sfl-prefix", value_name = "PREFIX")]
    sfl_prefix: Option<String>,

    /// Process only the units listed in this file (one path per line)
    #[arg(long = "file-list", value_name = "PATH")]
    file_list: Option<PathBuf>,

    /// Process only these units
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Order in which queued jobs are served
    #[arg(
        long,
        default_value = "ljf",
        value_parser = ["fifo", "ljf", "sjf"]
    )]
    scheduler_strategy: String,

    /// Job-size measure used by the priority strategies
    #[arg(
        long,
        default_value = "semicolon",
        value_parser = ["loc", "semicolon", "comma"]
    )]
    measure_job_size_with: String,

    /// Verbose output: echo launched commands and enabled actions
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(error) => {
            eprintln!("panda: error: {error:#}");
            ExitCode::from(exit_codes::CONFIG_ERROR)
        },
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let opts = build_options(cli)?;
    preflight(&opts)?;
    driver::run(&Arc::new(opts))?;
    Ok(())
}

/// Prefix `tool` with the search directory, if one was given.
///
/// `Path::join` keeps absolute tool settings untouched, matching the
/// "absolute settings win" contract of `--clang-path`.
fn resolve_tool(clang_path: Option<&Path>, tool: &str) -> String {
    match clang_path {
        Some(dir) => absolutize(&dir.join(tool)).to_string_lossy().into_owned(),
        None => tool.to_string(),
    }
}

fn build_options(cli: Cli) -> Result<Options> {
    if cli.jobs == 0 {
        bail!("--jobs must be at least 1");
    }

    let extdef_source = cli.extdef_map || cli.ctu_on_demand_parsing;
    let extdef_ast = cli.extdef_map_ast || cli.ctu_loading_ast_files;
    if extdef_source && extdef_ast {
        bail!("-M and -P request conflicting external-definition map forms; pick one");
    }
    let extdef = if extdef_source {
        Some(ExtdefStyle::Source)
    } else if extdef_ast {
        Some(ExtdefStyle::LoadingAst)
    } else {
        None
    };

    let builtins = BuiltinToggles {
        syntax: cli.syntax,
        compile: cli.compile,
        preprocess: cli.preprocess,
        ast: cli.ast || cli.ctu_loading_ast_files,
        bitcode: cli.bitcode,
        llvm_ir: cli.llvm_ir,
        asm: cli.asm,
        dep: cli.dep,
        analyze: cli.analyze,
        extdef,
        invocation_list: cli.invocation_list || cli.ctu_on_demand_parsing,
        input_list: cli.input_file_list
            || cli.ctu_on_demand_parsing
            || cli.ctu_loading_ast_files,
        source_list: cli.source_file_list,
    };

    let plugins = plugin::load_plugins(&cli.plugins)?;

    let mut selected: HashSet<PathBuf> = cli.files.iter().map(|p| absolutize(p)).collect();
    if let Some(list) = &cli.file_list {
        let text = fs::read_to_string(list)
            .with_context(|| format!("cannot read file list {}", list.display()))?;
        selected.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| absolutize(Path::new(line))),
        );
    }
    let unit_filter = if selected.is_empty() {
        None
    } else {
        Some(selected)
    };

    let clang_path = cli.clang_path.as_deref();
    Ok(Options {
        database: absolutize(&cli.database),
        output: absolutize(&cli.output),
        jobs: cli.jobs,
        cc: resolve_tool(clang_path, &cli.cc),
        cxx: resolve_tool(clang_path, &cli.cxx),
        extdef_mapper: resolve_tool(clang_path, &cli.efmer),
        extdef_map_name: cli.efm,
        invocation_list_name: cli.ivcl,
        input_list_name: cli.ifl,
        source_list_name: cli.sfl,
        source_list_prefix: cli.sfl_prefix,
        unit_filter,
        strategy: cli.scheduler_strategy.parse().ok().with_context(|| {
            format!("unknown scheduler strategy `{}`", cli.scheduler_strategy)
        })?,
        metric: cli.measure_job_size_with.parse().ok().with_context(|| {
            format!("unknown job-size metric `{}`", cli.measure_job_size_with)
        })?,
        builtins,
        plugins,
        verbose: cli.verbose,
    })
}

/// Check that every tool the enabled actions will launch actually launches.
fn preflight(opts: &Options) -> Result<()> {
    let toggles = &opts.builtins;
    let integrated_builtin = toggles.syntax
        || toggles.compile
        || toggles.preprocess
        || toggles.ast
        || toggles.bitcode
        || toggles.llvm_ir
        || toggles.asm
        || toggles.dep
        || toggles.analyze;
    let integrated_plugin = opts
        .plugins
        .iter()
        .any(|act| matches!(act, ActionDescriptor::Integrated(a) if a.tool.is_none()));

    if integrated_builtin || integrated_plugin {
        for (tool, flag) in [(&opts.cc, "--cc"), (&opts.cxx, "--cxx")] {
            exec::probe_tool(tool).with_context(|| {
                format!("required tool `{tool}` is not available; check {flag} or --clang-path")
            })?;
        }
    }
    if toggles.extdef.is_some() {
        exec::probe_tool(&opts.extdef_mapper).with_context(|| {
            format!(
                "required tool `{}` is not available; check --efmer or --clang-path",
                opts.extdef_mapper
            )
        })?;
    }
    Ok(())
}
