// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use memfs_core::{FsConfig, FsCore, FsError, FsStats, NodeKind, path};
use memfs_logging::CliLoggingArgs;
use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng, seq::SliceRandom};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Names are drawn from a small pool so collisions actually happen.
const NAME_POOL: &[&str] = &["a", "b", "c", "data", "dir", "link", "notes.txt", "x"];
const MAX_WRITE_LEN: usize = 256;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            args.logging.clone().init("memfs-stress")?;
            let report = run_workload(&args)?;
            if let Some(path) = &args.json_output {
                let file = File::create(path)
                    .with_context(|| format!("failed to create report {}", path.display()))?;
                serde_json::to_writer_pretty(file, &report)?;
            }
            write_json_to_stdout(&report)?;
            if let Some(violation) = &report.violation {
                bail!(
                    "invariant violation after {} operations: {}",
                    report.completed_ops,
                    violation
                );
            }
        }
    }
    Ok(())
}

fn write_json_to_stdout<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    out.flush()?;
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about = "memfs randomized workload runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Seed for the operation generator (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of operations to issue
    #[arg(long, default_value_t = 10_000)]
    ops: u64,

    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optional path for writing the JSON report
    #[arg(long)]
    json_output: Option<PathBuf>,

    /// Check tree invariants every N operations (0 checks only at the end)
    #[arg(long, default_value_t = 100)]
    verify_every: u64,

    /// Bias towards deletion once the tree holds this many nodes
    #[arg(long, default_value_t = 512)]
    max_nodes: u64,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    CreateDirectory,
    CreateFile,
    Write,
    Append,
    Hardlink,
    Symlink,
    Delete,
    Copy,
    Move,
    Read,
    ChangeDir,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::CreateDirectory => "create_directory",
            Operation::CreateFile => "create_file",
            Operation::Write => "write",
            Operation::Append => "append",
            Operation::Hardlink => "hardlink",
            Operation::Symlink => "symlink",
            Operation::Delete => "delete",
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::Read => "read",
            Operation::ChangeDir => "change_dir",
        }
    }
}

#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
struct OperationTally {
    ok: u64,
    errors: BTreeMap<String, u64>,
}

impl OperationTally {
    fn record(&mut self, result: &Result<(), FsError>) {
        match result {
            Ok(()) => self.ok += 1,
            Err(err) => *self.errors.entry(format!("{err:?}")).or_insert(0) += 1,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
struct RunReport {
    seed: u64,
    requested_ops: u64,
    completed_ops: u64,
    operations: BTreeMap<&'static str, OperationTally>,
    verify_runs: u64,
    faults_injected: u64,
    final_stats: FsStats,
    nodes_freed_on_shutdown: usize,
    violation: Option<String>,
    status: String,
}

struct Workload {
    fs: FsCore,
    rng: SmallRng,
    max_nodes: u64,
}

fn run_workload(args: &RunArgs) -> Result<RunReport> {
    let config = match &args.config {
        Some(path) => FsConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FsConfig::default(),
    };
    let seed = args.seed.unwrap_or_else(seed_from_clock);
    info!(seed, ops = args.ops, verify_every = args.verify_every, "starting memfs workload");

    let fs = FsCore::new(config).context("failed to initialize filesystem")?;
    let mut workload = Workload {
        fs,
        rng: SmallRng::seed_from_u64(seed),
        max_nodes: args.max_nodes,
    };

    let mut operations: BTreeMap<&'static str, OperationTally> = BTreeMap::new();
    let mut verify_runs = 0;
    let mut violation = None;
    let mut completed_ops = 0;

    while completed_ops < args.ops {
        let op = workload.pick_operation();
        let result = workload.apply(op);
        operations.entry(op.label()).or_default().record(&result);
        completed_ops += 1;

        if args.verify_every > 0 && completed_ops % args.verify_every == 0 {
            verify_runs += 1;
            if let Err(err) = workload.fs.verify() {
                warn!(op = op.label(), completed_ops, "invariant violation: {}", err);
                violation = Some(err.to_string());
                break;
            }
        }
    }

    if violation.is_none() {
        verify_runs += 1;
        if let Err(err) = workload.fs.verify() {
            warn!(completed_ops, "invariant violation at end of run: {}", err);
            violation = Some(err.to_string());
        }
    }

    let final_stats = workload.fs.stats();
    let faults_injected = workload.fs.faults_injected();
    let nodes_freed_on_shutdown = workload.fs.shutdown();
    let status = if violation.is_none() { "passed" } else { "failed" };
    info!(completed_ops, verify_runs, status, "workload finished");

    Ok(RunReport {
        seed,
        requested_ops: args.ops,
        completed_ops,
        operations,
        verify_runs,
        faults_injected,
        final_stats,
        nodes_freed_on_shutdown,
        violation,
        status: status.to_string(),
    })
}

fn seed_from_clock() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ ((std::process::id() as u64) << 32)
}

impl Workload {
    fn pick_operation(&mut self) -> Operation {
        if self.fs.stats().nodes >= self.max_nodes && self.rng.gen_bool(0.5) {
            return Operation::Delete;
        }
        let bucket = self.rng.gen_range(0..100);
        match bucket {
            0..=11 => Operation::CreateDirectory,
            12..=26 => Operation::CreateFile,
            27..=38 => Operation::Write,
            39..=45 => Operation::Append,
            46..=52 => Operation::Hardlink,
            53..=58 => Operation::Symlink,
            59..=70 => Operation::Delete,
            71..=77 => Operation::Copy,
            78..=85 => Operation::Move,
            86..=95 => Operation::Read,
            _ => Operation::ChangeDir,
        }
    }

    fn apply(&mut self, op: Operation) -> Result<(), FsError> {
        let tree = self.fs.walk("/")?;
        let result = match op {
            Operation::CreateDirectory => {
                let dest = self.fresh_path(&tree);
                self.fs.create_directory(&dest)
            }
            Operation::CreateFile => {
                let dest = self.fresh_path(&tree);
                self.fs.create_file(&dest)
            }
            Operation::Write => {
                let target = self.pick(&tree, NodeKind::Regular);
                let bytes = self.payload();
                self.fs.write(&target, &bytes)
            }
            Operation::Append => {
                let target = self.pick(&tree, NodeKind::Regular);
                let bytes = self.payload();
                self.fs.append(&target, &bytes)
            }
            Operation::Hardlink => {
                let target = self.pick(&tree, NodeKind::Regular);
                let dest = self.fresh_path(&tree);
                self.fs.create_hardlink(&dest, &target)
            }
            Operation::Symlink => {
                let text = self.pick_any(&tree);
                let dest = self.fresh_path(&tree);
                self.fs.create_symlink(&dest, &text)
            }
            Operation::Delete => {
                let target = self.pick_any(&tree);
                self.fs.delete(&target)
            }
            Operation::Copy => {
                let src = self.pick_any(&tree);
                let dest = self.fresh_path(&tree);
                self.fs.copy(&src, &dest)
            }
            Operation::Move => {
                let src = self.pick_any(&tree);
                let dest = self.fresh_path(&tree);
                self.fs.rename(&src, &dest)
            }
            Operation::Read => {
                let target = self.pick(&tree, NodeKind::Regular);
                self.fs.read(&target).map(|_| ())
            }
            Operation::ChangeDir => {
                let target = self.pick(&tree, NodeKind::Directory);
                self.fs.set_current_dir(&target)
            }
        };
        if let Err(err) = &result {
            debug!(op = op.label(), "operation failed: {}", err);
        }
        result
    }

    /// A path under a random existing directory; one in ten is relative to the cwd.
    fn fresh_path(&mut self, tree: &[(String, NodeKind)]) -> String {
        let name = NAME_POOL.choose(&mut self.rng).copied().unwrap_or("x");
        if self.rng.gen_ratio(1, 10) {
            return name.to_string();
        }
        let parent = self.pick(tree, NodeKind::Directory);
        path::join(&parent, name)
    }

    /// Mostly a path of the wanted kind, sometimes anything at all.
    fn pick(&mut self, tree: &[(String, NodeKind)], kind: NodeKind) -> String {
        if self.rng.gen_ratio(4, 5) {
            let matching: Vec<&String> =
                tree.iter().filter(|(_, k)| *k == kind).map(|(p, _)| p).collect();
            if let Some(path) = matching.choose(&mut self.rng) {
                return (*path).clone();
            }
        }
        self.pick_any(tree)
    }

    fn pick_any(&mut self, tree: &[(String, NodeKind)]) -> String {
        tree.choose(&mut self.rng)
            .map(|(p, _)| p.clone())
            .unwrap_or_else(|| path::SEPARATOR.to_string())
    }

    fn payload(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(1..=MAX_WRITE_LEN);
        let mut bytes = vec![0u8; len];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }
}
