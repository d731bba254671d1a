#![doc = include_str!("../README.md")]
#![deny(clippy::all)]

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use mdao::{
    comm::{ThreadComm, ThreadGroup},
    DenseBackend, Problem, ProcessGroup as _, SegmentedBackend,
};

use model::SystemDescription;
use options::{Backend, CheckOptions, Format};

pub mod model;
pub mod options;
mod report;

pub use report::{LayoutRow, RankReport, Tables};

pub fn entrypoint() -> anyhow::Result<()> {
    entrypoint_from(std::env::args_os())
}

pub fn entrypoint_from<I, T>(args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let options = CheckOptions::parse_from(args);

    flexi_logger::Logger::try_with_env_or_str(options.verbose.log_level_filter().as_str())?
        .set_palette("b1;3;2;4;6".to_string())
        .start()?;

    let reports = check(&options)?;
    match options.format {
        Format::Table => print!(
            "{}",
            Tables {
                reports: &reports,
                rank: options.rank,
            }
        ),
        Format::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    Ok(())
}

/// Set up the model of `options` on every rank and collect what each rank built.
pub fn check(options: &CheckOptions) -> anyhow::Result<Vec<RankReport>> {
    let procs = usize::from(options.procs);
    if let Some(rank) = options.rank {
        anyhow::ensure!(
            rank < procs,
            "Rank {rank} is out of range for {procs} processes"
        );
    }

    let desc = SystemDescription::from_path(&options.model)?;
    log::info!(
        "Setting up `{}` on {procs} processes with {:?} vectors",
        desc.name,
        options.backend
    );

    let results = ThreadGroup::run(procs, |comm| setup_rank(&desc, options, comm));

    let mut reports = Vec::with_capacity(procs);
    let mut failures = Vec::new();
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => failures.push((rank, err)),
        }
    }

    // A rank that stops inside a collective leaves its peers with an aggregation error.
    failures.sort_by_key(|(_, err)| matches!(err, mdao::Error::Aggregation(_)));
    if let Some((rank, err)) = failures.into_iter().next() {
        return Err(err).with_context(|| format!("Setup failed on rank {rank}"));
    }

    Ok(reports)
}

fn setup_rank(
    desc: &SystemDescription,
    options: &CheckOptions,
    comm: ThreadComm,
) -> Result<RankReport, mdao::Error> {
    let rank = comm.rank();
    let tree = desc.build_tree()?;

    let problem = Problem::new(tree, comm);
    let mut problem = match options.backend {
        Backend::Dense => problem.with_backend(DenseBackend),
        Backend::Segmented => problem.with_backend(SegmentedBackend),
    };
    problem.setup()?;

    for name in &options.vectors {
        problem.setup_vector(Some(name), options.backend.vector_backend())?;
    }

    RankReport::new(rank, &problem)
}
