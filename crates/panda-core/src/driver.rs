//! End-to-end orchestration of one run.
//!
//! The driver wires the pieces together in two phases. Phase one streams the
//! database through the normalizer and fans one task per enabled action per
//! unit into the worker pool, then appends the reducers that depend only on
//! the normalized units. Phase two, after the pool has joined, runs the
//! reducers that consume per-unit outputs. Total wall time is reported at
//! the end.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cdb::{self, CdbError, Language};
use crate::options::Options;
use crate::pool::TaskPool;
use crate::{action, exec, reducer, worklist};

/// Fatal errors aborting the run before or during setup.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The compilation database could not be loaded.
    #[error(transparent)]
    Cdb(#[from] CdbError),

    /// A worker thread could not be spawned.
    #[error("cannot start worker pool: {0}")]
    Pool(std::io::Error),

    /// The output root could not be created.
    #[error("cannot create output directory {path}: {source}")]
    Output {
        /// The directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Execute every enabled action across the database, then the reducers.
///
/// Individual task failures are logged and do not fail the run.
///
/// # Errors
///
/// Returns [`DriverError`] only for setup problems: an unreadable database,
/// an unusable output root, or a pool that cannot be spawned.
pub fn run(opts: &Arc<Options>) -> Result<(), DriverError> {
    let actions = action::enabled_actions(opts);
    if opts.verbose {
        for act in &actions {
            info!(action = act.prompt(), "action enabled");
        }
    }

    let started = Instant::now();

    fs::create_dir_all(&opts.output).map_err(|source| DriverError::Output {
        path: opts.output.clone(),
        source,
    })?;
    if opts.builtins.analyze {
        let reports = opts.output.join("csa-reports");
        fs::create_dir_all(&reports).map_err(|source| DriverError::Output {
            path: reports,
            source,
        })?;
    }

    let worklist = worklist::for_strategy(opts.strategy, opts.metric);
    let pool = TaskPool::new(opts.jobs, worklist).map_err(DriverError::Pool)?;

    let mut units = Vec::new();
    for (index, entry) in cdb::load(&opts.database)?.into_iter().enumerate() {
        let unit = match cdb::normalize(entry) {
            Ok(unit) => unit,
            Err(reason) => {
                warn!(index, %reason, "skipping invalid database entry");
                continue;
            },
        };
        if unit.language == Language::Unknown {
            warn!(file = %unit.file.display(), "skipping unit of unknown language");
            continue;
        }
        if let Some(filter) = &opts.unit_filter {
            if !filter.contains(&unit.file) {
                debug!(file = %unit.file.display(), "unit not selected");
                continue;
            }
        }
        let unit = Arc::new(unit);
        for act in &actions {
            let opts = Arc::clone(opts);
            let unit = Arc::clone(&unit);
            let act = Arc::clone(act);
            pool.add_task(
                Some(unit.file.clone()),
                Box::new(move || exec::execute(&opts, &unit, &act)),
            );
        }
        units.push(unit);
    }
    let units = Arc::new(units);

    // These reducers need only the normalized units, so they ride the pool
    // alongside the per-unit work.
    if opts.builtins.invocation_list {
        let resource_dir = reducer::clang_resource_dir(&opts.cc);
        let opts = Arc::clone(opts);
        let units = Arc::clone(&units);
        pool.add_task(
            None,
            Box::new(move || {
                if let Err(reason) =
                    reducer::write_invocation_list(&opts, &units, resource_dir.as_deref())
                {
                    warn!(%reason, "invocation-list reducer failed");
                }
            }),
        );
    }
    if opts.builtins.input_list {
        let opts = Arc::clone(opts);
        let units = Arc::clone(&units);
        pool.add_task(
            None,
            Box::new(move || {
                if let Err(reason) = reducer::write_input_file_list(&opts, &units) {
                    warn!(%reason, "input-file-list reducer failed");
                }
            }),
        );
    }

    pool.join();

    if opts.builtins.extdef.is_some() {
        if let Err(reason) = reducer::merge_extdef_maps(opts, &units) {
            error!(%reason, "external-definition map merge failed");
        }
    }
    if opts.builtins.source_list {
        if let Err(reason) = reducer::write_source_file_list(opts, &units) {
            error!(%reason, "source-file-list reducer failed");
        }
    }

    println!(
        "panda: total elapsed {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
