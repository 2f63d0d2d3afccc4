//! Quarry command line arguments parser.

use clap::{Arg, ArgGroup, Command};

use crate::BIN_NAME;

/// Subcommand `run`.
pub const CMD_RUN: &str = "run";
/// Subcommand `exec` (hidden; the orchestrator spawns it as the executor).
pub const CMD_EXEC: &str = "exec";

/// Command line argument `--script`.
pub const ARG_SCRIPT: &str = "script";
/// Command line argument `--run-id`.
pub const ARG_RUN_ID: &str = "run-id";
/// Command line argument `--attempt`.
pub const ARG_ATTEMPT: &str = "attempt";
/// Command line argument `--job-id`.
pub const ARG_JOB_ID: &str = "job-id";
/// Command line argument `--parent-run-id`.
pub const ARG_PARENT_RUN_ID: &str = "parent-run-id";
/// Command line argument `--job`.
pub const ARG_JOB: &str = "job";
/// Command line argument `--job-json`.
pub const ARG_JOB_JSON: &str = "job-json";
/// Command line argument `--executor`.
pub const ARG_EXECUTOR: &str = "executor";
/// Command line argument `--source`.
pub const ARG_SOURCE: &str = "source";
/// Command line argument `--category`.
pub const ARG_CATEGORY: &str = "category";
/// Command line argument `--dataset`.
pub const ARG_DATASET: &str = "dataset";
/// Command line argument `--policy`.
pub const ARG_POLICY: &str = "policy";
/// Command line argument `--flush-mode`.
pub const ARG_FLUSH_MODE: &str = "flush-mode";
/// Command line argument `--buffer-events`.
pub const ARG_BUFFER_EVENTS: &str = "buffer-events";
/// Command line argument `--buffer-bytes`.
pub const ARG_BUFFER_BYTES: &str = "buffer-bytes";
/// Command line argument `--flush-count`.
pub const ARG_FLUSH_COUNT: &str = "flush-count";
/// Command line argument `--flush-interval`.
pub const ARG_FLUSH_INTERVAL: &str = "flush-interval";
/// Command line argument `--storage-backend`.
pub const ARG_STORAGE_BACKEND: &str = "storage-backend";
/// Command line argument `--storage-path`.
pub const ARG_STORAGE_PATH: &str = "storage-path";
/// Command line argument `--storage-region`.
pub const ARG_STORAGE_REGION: &str = "storage-region";
/// Command line argument `--storage-endpoint`.
pub const ARG_STORAGE_ENDPOINT: &str = "storage-endpoint";
/// Command line argument `--storage-s3-path-style`.
pub const ARG_STORAGE_S3_PATH_STYLE: &str = "storage-s3-path-style";
/// Command line argument `--depth`.
pub const ARG_DEPTH: &str = "depth";
/// Command line argument `--max-runs`.
pub const ARG_MAX_RUNS: &str = "max-runs";
/// Command line argument `--parallel`.
pub const ARG_PARALLEL: &str = "parallel";
/// Command line argument `--proxy-config`.
pub const ARG_PROXY_CONFIG: &str = "proxy-config";
/// Command line argument `--proxy-pool`.
pub const ARG_PROXY_POOL: &str = "proxy-pool";
/// Command line argument `--browser-ws-endpoint`.
pub const ARG_BROWSER_WS_ENDPOINT: &str = "browser-ws-endpoint";

/// Command line arguments group for the job payload.
const GROUP_JOB: &str = "job-payload";

/// Returns the root clap command.
pub fn basic_app() -> Command {
    Command::new(BIN_NAME)
        .author("Pithecene Core Dev <dev@pithecene.io>")
        .about("Quarry - runs extraction scripts and persists their output")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .term_width(110)
        .subcommand(run())
        .subcommand(exec())
}

fn run() -> Command {
    Command::new(CMD_RUN)
        .about("Run an extraction script as an isolated child process")
        .arg(
            Arg::new(ARG_SCRIPT)
                .long(ARG_SCRIPT)
                .value_name("path")
                .required(true)
                .action(clap::ArgAction::Set)
                .help("Path of the extraction script the executor loads"),
        )
        .arg(
            Arg::new(ARG_RUN_ID)
                .long(ARG_RUN_ID)
                .value_name("id")
                .required(true)
                .action(clap::ArgAction::Set)
                .help("Unique id of this run"),
        )
        .arg(
            Arg::new(ARG_SOURCE)
                .long(ARG_SOURCE)
                .value_name("name")
                .required(true)
                .action(clap::ArgAction::Set)
                .help("Source partition key of the dataset"),
        )
        .arg(
            Arg::new(ARG_CATEGORY)
                .long(ARG_CATEGORY)
                .value_name("name")
                .default_value("default")
                .action(clap::ArgAction::Set)
                .help("Category partition key of the dataset"),
        )
        .arg(
            Arg::new(ARG_DATASET)
                .long(ARG_DATASET)
                .value_name("name")
                .default_value("quarry")
                .action(clap::ArgAction::Set)
                .help("Dataset name at the root of the storage layout"),
        )
        .arg(
            Arg::new(ARG_ATTEMPT)
                .long(ARG_ATTEMPT)
                .value_name("n")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..))
                .help("Attempt number; retries require --parent-run-id"),
        )
        .arg(
            Arg::new(ARG_JOB_ID)
                .long(ARG_JOB_ID)
                .value_name("id")
                .action(clap::ArgAction::Set)
                .help("Job id this run belongs to"),
        )
        .arg(
            Arg::new(ARG_PARENT_RUN_ID)
                .long(ARG_PARENT_RUN_ID)
                .value_name("id")
                .action(clap::ArgAction::Set)
                .help("Run id of the previous attempt"),
        )
        .arg(
            Arg::new(ARG_JOB)
                .long(ARG_JOB)
                .value_name("json")
                .action(clap::ArgAction::Set)
                .help("Inline job payload; must be a JSON object"),
        )
        .arg(
            Arg::new(ARG_JOB_JSON)
                .long(ARG_JOB_JSON)
                .value_name("path")
                .action(clap::ArgAction::Set)
                .help("File with the job payload; must hold a JSON object"),
        )
        .group(ArgGroup::new(GROUP_JOB).args([ARG_JOB, ARG_JOB_JSON]))
        .arg(
            Arg::new(ARG_EXECUTOR)
                .long(ARG_EXECUTOR)
                .value_name("path")
                .action(clap::ArgAction::Set)
                .help("Executor binary; defaults to this binary's `exec` subcommand"),
        )
        .arg(
            Arg::new(ARG_POLICY)
                .long(ARG_POLICY)
                .value_parser(["strict", "buffered", "streaming"])
                .default_value("strict")
                .help("Ingestion policy"),
        )
        .arg(
            Arg::new(ARG_FLUSH_MODE)
                .long(ARG_FLUSH_MODE)
                .value_parser(["at_least_once", "chunks_first", "two_phase"])
                .default_value("at_least_once")
                .help("Flush mode of the buffered policy"),
        )
        .arg(
            Arg::new(ARG_BUFFER_EVENTS)
                .long(ARG_BUFFER_EVENTS)
                .value_name("n")
                .value_parser(clap::value_parser!(u64))
                .help("Event-count bound of the buffered policy"),
        )
        .arg(
            Arg::new(ARG_BUFFER_BYTES)
                .long(ARG_BUFFER_BYTES)
                .value_name("n")
                .value_parser(clap::value_parser!(u64))
                .help("Byte bound of the buffered policy; required to buffer chunks"),
        )
        .arg(
            Arg::new(ARG_FLUSH_COUNT)
                .long(ARG_FLUSH_COUNT)
                .value_name("n")
                .value_parser(clap::value_parser!(u64))
                .help("Record-count flush trigger of the streaming policy"),
        )
        .arg(
            Arg::new(ARG_FLUSH_INTERVAL)
                .long(ARG_FLUSH_INTERVAL)
                .value_name("seconds")
                .value_parser(clap::value_parser!(u64))
                .help("Interval flush trigger of the streaming policy, in seconds"),
        )
        .arg(
            Arg::new(ARG_STORAGE_BACKEND)
                .long(ARG_STORAGE_BACKEND)
                .value_parser(["fs", "s3"])
                .required(true)
                .help("Storage backend hosting the dataset"),
        )
        .arg(
            Arg::new(ARG_STORAGE_PATH)
                .long(ARG_STORAGE_PATH)
                .value_name("path")
                .required(true)
                .action(clap::ArgAction::Set)
                .help("Filesystem root (fs) or bucket[/prefix] (s3)"),
        )
        .arg(
            Arg::new(ARG_STORAGE_REGION)
                .long(ARG_STORAGE_REGION)
                .value_name("region")
                .action(clap::ArgAction::Set)
                .help("S3 region"),
        )
        .arg(
            Arg::new(ARG_STORAGE_ENDPOINT)
                .long(ARG_STORAGE_ENDPOINT)
                .value_name("url")
                .action(clap::ArgAction::Set)
                .help("Custom S3-compatible endpoint"),
        )
        .arg(
            Arg::new(ARG_STORAGE_S3_PATH_STYLE)
                .long(ARG_STORAGE_S3_PATH_STYLE)
                .action(clap::ArgAction::SetTrue)
                .help("Use path-style addressing for S3-compatible providers"),
        )
        .arg(
            Arg::new(ARG_DEPTH)
                .long(ARG_DEPTH)
                .value_name("n")
                .default_value("0")
                .value_parser(clap::value_parser!(u32))
                .help("Maximum fan-out depth; 0 disables child runs"),
        )
        .arg(
            Arg::new(ARG_MAX_RUNS)
                .long(ARG_MAX_RUNS)
                .value_name("n")
                .value_parser(clap::value_parser!(u64))
                .help("Total child-run budget; required when --depth > 0"),
        )
        .arg(
            Arg::new(ARG_PARALLEL)
                .long(ARG_PARALLEL)
                .value_name("n")
                .default_value("1")
                .value_parser(clap::value_parser!(u64).range(1..))
                .help("Concurrent child runs"),
        )
        .arg(
            Arg::new(ARG_PROXY_CONFIG)
                .long(ARG_PROXY_CONFIG)
                .value_name("path")
                .action(clap::ArgAction::Set)
                .help("JSON file with proxy pools"),
        )
        .arg(
            Arg::new(ARG_PROXY_POOL)
                .long(ARG_PROXY_POOL)
                .value_name("name")
                .default_value("default")
                .action(clap::ArgAction::Set)
                .help("Pool to pick proxies from"),
        )
        .arg(
            Arg::new(ARG_BROWSER_WS_ENDPOINT)
                .long(ARG_BROWSER_WS_ENDPOINT)
                .value_name("url")
                .action(clap::ArgAction::Set)
                .help("Shared browser endpoint executors connect to"),
        )
}

fn exec() -> Command {
    Command::new(CMD_EXEC)
        .about("Executor harness entry; spawned by `quarry run`")
        .hide(true)
        .arg(
            Arg::new(ARG_SCRIPT)
                .long(ARG_SCRIPT)
                .value_name("path")
                .required(true)
                .action(clap::ArgAction::Set)
                .help("Path of the extraction script to load"),
        )
}
