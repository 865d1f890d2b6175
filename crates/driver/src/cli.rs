//! CLI wiring for the kerneltune binary.

use crate::config::TuneConfig;
use crate::report::TuneReport;
use crate::session::{JournalSummary, Target, TuneSession};
use anyhow::Result;
use clap::{Parser, Subcommand};
use kerneltune_autotune::Metric;
use kerneltune_backend_cpu::HostDevice;
use kerneltune_backend_gpu::GpuDevice;
use kerneltune_journal::RunJournal;
use kerneltune_kernels::{Device, MatmulProblem, RhsLayout};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kerneltune", about = "Crash-resilient kernel autotuner")]
pub struct Cli {
    #[arg(long, value_enum, default_value = "cpu", global = true)]
    pub target: TargetArg,

    /// Run journal path; overrides $KERNELTUNE_JOURNAL and the config file.
    #[arg(long, global = true)]
    pub journal: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum TargetArg {
    Cpu,
    Gpu,
}

impl From<TargetArg> for Target {
    fn from(value: TargetArg) -> Target {
        match value {
            TargetArg::Cpu => Target::Cpu,
            TargetArg::Gpu => Target::Gpu,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum MetricArg {
    Time,
    Throughput,
}

impl From<MetricArg> for Metric {
    fn from(value: MetricArg) -> Metric {
        match value {
            MetricArg::Time => Metric::AccumulatedTime,
            MetricArg::Throughput => Metric::AverageThroughput,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search for the fastest tiled matmul configuration.
    Tune {
        #[arg(long, default_value_t = 256)]
        m: usize,
        #[arg(long, default_value_t = 256)]
        n: usize,
        #[arg(long, default_value_t = 256)]
        k: usize,
        /// Store the right-hand matrix transposed.
        #[arg(long, default_value_t = false)]
        transposed: bool,
        /// JSON tuning config; missing file means defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        trials: Option<usize>,
        #[arg(long)]
        top_n: Option<usize>,
        /// Keep every candidate after each round.
        #[arg(long, default_value_t = false)]
        no_prune: bool,
        #[arg(long)]
        prune_by: Option<MetricArg>,
        /// Measure every valid candidate instead of the two-phase search.
        #[arg(long, default_value_t = false)]
        exhaustive: bool,
        /// Skip output validation.
        #[arg(long, default_value_t = false)]
        trust_output: bool,
        #[arg(long, default_value_t = false)]
        include_transfer_cost: bool,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long)]
        initial_extra: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rewrite the journal keeping one lifecycle record per key.
    Compact {
        /// Also drop recorded timings.
        #[arg(long, default_value_t = false)]
        drop_timings: bool,
    },
    /// Summarise the journal.
    Inspect,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        target,
        journal,
        command,
    } = cli;

    match command {
        Command::Tune {
            m,
            n,
            k,
            transposed,
            config,
            trials,
            top_n,
            no_prune,
            prune_by,
            exhaustive,
            trust_output,
            include_transfer_cost,
            max_iterations,
            initial_extra,
            output,
        } => {
            let mut config = match config {
                Some(path) => TuneConfig::load_from_file(&path)?,
                None => TuneConfig::default(),
            };
            config.resolve_journal(journal);

            let options = &mut config.options;
            if let Some(trials) = trials {
                options.trials = trials;
            }
            if no_prune {
                options.top_n = None;
            } else if top_n.is_some() {
                options.top_n = top_n;
            }
            if let Some(metric) = prune_by {
                options.prune_by = metric.into();
            }
            if let Some(max_iterations) = max_iterations {
                options.max_iterations = max_iterations;
            }
            if let Some(initial_extra) = initial_extra {
                options.initial_extra = initial_extra;
            }
            options.two_phase &= !exhaustive;
            options.paranoid &= !trust_output;
            options.include_transfer_cost |= include_transfer_cost;

            let layout = if transposed {
                RhsLayout::Transposed
            } else {
                RhsLayout::RowMajor
            };
            let problem = MatmulProblem::new(m, n, k).with_rhs_layout(layout);

            let target = Target::from(target);
            let report = match target {
                Target::Cpu => tune(target, HostDevice::new(), config, problem)?,
                Target::Gpu => tune(target, GpuDevice::new()?, config, problem)?,
            };
            print_report(&report);

            if let Some(path) = output {
                report.save_to_file(&path)?;
                info!(path = %path.display(), "report written");
            }
        }
        Command::Compact { drop_timings } => {
            let path = journal_path(journal);
            let mut run_journal = RunJournal::load(&path)?;
            let before = run_journal.len();
            let bad = run_journal.compact(drop_timings)?;
            println!(
                "compacted {}: keys={} bad={} timings_dropped={}",
                path.display(),
                before,
                bad,
                drop_timings
            );
        }
        Command::Inspect => {
            let path = journal_path(journal);
            let summary = JournalSummary::of(&RunJournal::load(&path)?, path);
            println!(
                "journal={}, keys={}, good={}, bad={}",
                summary.path.display(),
                summary.keys,
                summary.good,
                summary.bad
            );
            for entry in &summary.dangling {
                println!("- dangling {} at {}", entry.key, entry.state);
            }
        }
    }
    Ok(())
}

fn tune<D: Device>(
    target: Target,
    device: D,
    config: TuneConfig,
    problem: MatmulProblem,
) -> Result<TuneReport> {
    let mut session = TuneSession::new(target, device, config)?;
    session.tune_matmul(problem)
}

fn journal_path(flag: Option<PathBuf>) -> PathBuf {
    let mut config = TuneConfig::default();
    config.resolve_journal(flag);
    config.journal_path
}

fn print_report(report: &TuneReport) {
    println!(
        "target={}, device={}, problem={}, generated_at={}",
        report.target, report.device, report.problem, report.generated_at_unix_ms
    );
    println!(
        "winner={} {} gflops={:.3} std_dev={:.3} rounds={} iterations={} converged={}",
        report.winner,
        report.extra,
        report.mean_gflops,
        report.std_dev_gflops,
        report.rounds,
        report.iterations,
        report.converged
    );
    for row in &report.survivors {
        println!(
            "- {}: time_us={} gflops={:.3} std_dev={:.3}",
            row.candidate, row.accumulated_time_micros, row.average_throughput, row.std_dev
        );
    }
}
