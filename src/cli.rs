//! # Command-Line Interface / 命令行接口
//!
//! Builds the `clap` command tree, initializes logging from the verbosity
//! flags and dispatches to the subcommands. Every subcommand reports a process
//! exit code: 0 for a passing verdict, 1 for a failing one and 2 for
//! configuration or usage errors.
//!
//! 构建 `clap` 命令树，根据详细程度参数初始化日志，并分发到各子命令。
//! 每个子命令都返回进程退出码：结论通过为 0，失败为 1，配置或用法错误为 2。

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::core::config::DEFAULT_MATRIX_FILE;
use crate::core::error::ConfigError;
use crate::core::models::Backend;

pub mod commands;

use commands::run::RunArgs;
use commands::list::ListArgs;

/// Exit code for configuration and usage errors.
pub const EXIT_CONFIG_ERROR: u8 = 2;

fn matrix_arg() -> Arg {
    Arg::new("matrix")
        .short('m')
        .long("matrix")
        .help("Matrix file, or a directory of .toml/.json matrix files")
        .value_name("PATH")
        .default_value(DEFAULT_MATRIX_FILE)
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn selection_args() -> [Arg; 3] {
    [
        Arg::new("backends")
            .short('b')
            .long("backends")
            .help("Only run these simulators (comma separated: icarus,verilator,cvc,vcs)")
            .value_name("BACKENDS")
            .value_delimiter(',')
            .action(ArgAction::Append),
        Arg::new("filter")
            .long("filter")
            .help("Only run tests whose name matches this glob (repeatable)")
            .value_name("GLOB")
            .action(ArgAction::Append),
        Arg::new("tag")
            .long("tag")
            .help("Only run tests carrying this tag (repeatable)")
            .value_name("TAG")
            .action(ArgAction::Append),
    ]
}

fn sharding_args() -> [Arg; 2] {
    [
        Arg::new("total-runners")
            .long("total-runners")
            .help("Total number of CI runners the matrix is split across")
            .value_name("TOTAL_RUNNERS")
            .value_parser(clap::value_parser!(usize))
            .action(ArgAction::Set)
            .requires("runner-index"),
        Arg::new("runner-index")
            .long("runner-index")
            .help("Zero-based index of this runner")
            .value_name("RUNNER_INDEX")
            .value_parser(clap::value_parser!(usize))
            .action(ArgAction::Set)
            .requires("total-runners"),
    ]
}

pub fn build_cli() -> Command {
    Command::new("verif-matrix")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs a verification test matrix across HDL simulators and gates on one verdict")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More log output (-v debug, -vv trace)")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors")
                .global(true)
                .conflicts_with("verbose")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about("Expand the matrix, run every job and report the verdict")
                .arg(matrix_arg())
                .args(selection_args())
                .arg(
                    Arg::new("concurrency")
                        .short('j')
                        .long("concurrency")
                        .help("Maximum number of simulations running at once")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .help("Default per-job timeout in seconds")
                        .value_name("SECS")
                        .value_parser(clap::value_parser!(u64).range(1..))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("retries")
                        .long("retries")
                        .help("Retries for jobs that time out")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .help("Directory that receives one subdirectory per run")
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("project-dir")
                        .long("project-dir")
                        .help("Working directory for simulator commands")
                        .value_name("PROJECT_DIR")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .help("Where to write the JSON report (default: <run dir>/report.json)")
                        .value_name("PATH")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help("Also write a standalone HTML report")
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Random seed passed to every simulation")
                        .value_name("SEED")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .args(sharding_args()),
        )
        .subcommand(
            Command::new("list")
                .about("Print the expanded job list without running anything")
                .arg(matrix_arg())
                .args(selection_args())
                .args(sharding_args()),
        )
        .subcommand(
            Command::new("init")
                .about("Write a commented sample matrix file")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .help("Where to write the sample matrix")
                        .value_name("PATH")
                        .default_value(DEFAULT_MATRIX_FILE)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing file")
                        .action(ArgAction::SetTrue),
                ),
        )
}

/// Installs the `tracing` subscriber. `RUST_LOG` takes precedence over the
/// verbosity flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect())
        .unwrap_or_default()
}

fn backends(matches: &ArgMatches) -> Result<Vec<Backend>, ConfigError> {
    strings(matches, "backends")
        .iter()
        .map(|name| Backend::from_str(name))
        .collect()
}

fn path(matches: &ArgMatches, id: &str) -> Option<PathBuf> {
    matches.get_one::<PathBuf>(id).cloned()
}

fn run_args(matches: &ArgMatches) -> Result<RunArgs> {
    Ok(RunArgs {
        matrix: path(matches, "matrix").unwrap_or_else(|| PathBuf::from(DEFAULT_MATRIX_FILE)),
        backends: backends(matches)?,
        filters: strings(matches, "filter"),
        tags: strings(matches, "tag"),
        concurrency: matches.get_one::<usize>("concurrency").copied(),
        timeout_secs: matches.get_one::<u64>("timeout").copied(),
        retries: matches.get_one::<u32>("retries").copied(),
        output_dir: path(matches, "output-dir"),
        project_dir: path(matches, "project-dir").unwrap_or_else(|| PathBuf::from(".")),
        report: path(matches, "report"),
        html: path(matches, "html"),
        seed: matches.get_one::<u64>("seed").copied(),
        total_runners: matches.get_one::<usize>("total-runners").copied(),
        runner_index: matches.get_one::<usize>("runner-index").copied(),
    })
}

fn list_args(matches: &ArgMatches) -> Result<ListArgs> {
    Ok(ListArgs {
        matrix: path(matches, "matrix").unwrap_or_else(|| PathBuf::from(DEFAULT_MATRIX_FILE)),
        backends: backends(matches)?,
        filters: strings(matches, "filter"),
        tags: strings(matches, "tag"),
        total_runners: matches.get_one::<usize>("total-runners").copied(),
        runner_index: matches.get_one::<usize>("runner-index").copied(),
    })
}

/// Dispatches already parsed arguments and returns the process exit code.
pub async fn process_command(matches: ArgMatches) -> u8 {
    init_logging(matches.get_count("verbose"), matches.get_flag("quiet"));

    let outcome = match matches.subcommand() {
        Some(("run", run_matches)) => match run_args(run_matches) {
            Ok(args) => commands::run::execute(args).await,
            Err(e) => Err(e),
        },
        Some(("list", list_matches)) => list_args(list_matches).and_then(commands::list::execute),
        Some(("init", init_matches)) => {
            let path = path(init_matches, "path").unwrap_or_else(|| PathBuf::from(DEFAULT_MATRIX_FILE));
            commands::init::execute(&path, init_matches.get_flag("force")).map(|_| 0)
        }
        // `subcommand_required` makes clap print help and exit before this.
        _ => Ok(EXIT_CONFIG_ERROR),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            EXIT_CONFIG_ERROR
        }
    }
}

/// Parses the process arguments and runs the selected command.
pub async fn run() -> u8 {
    process_command(build_cli().get_matches()).await
}
