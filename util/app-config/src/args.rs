use std::path::PathBuf;
use std::time::Duration;

use clap::ArgMatches;

use quarry_fanout::FanoutConfig;
use quarry_policy::{BufferedConfig, FlushMode, PolicyConfig, StreamingConfig};
use quarry_store::{BackendConfig, BackendKind};
use quarry_types::{JsonMap, ProxySpec, RunMeta};

use crate::cli::*;
use crate::exit_code::ExitCode;
use crate::proxy_pool::ProxyPool;
use crate::BIN_NAME;

/// Everything `quarry run` needs, parsed and validated.
#[derive(Debug)]
pub struct RunArgs {
    pub meta: RunMeta,
    pub script: PathBuf,
    /// Executor binary override; `None` means this binary's `exec`
    /// subcommand.
    pub executor: Option<PathBuf>,
    pub job: JsonMap,
    pub dataset: String,
    pub source: String,
    pub category: String,
    pub backend: BackendConfig,
    pub policy: PolicyConfig,
    pub fanout: FanoutConfig,
    pub proxy: Option<ProxySpec>,
    pub browser_ws_endpoint: Option<String>,
}

/// Arguments of the hidden `exec` subcommand.
pub struct ExecArgs {
    pub script: PathBuf,
}

impl RunArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<RunArgs, ExitCode> {
        let meta = RunMeta {
            run_id: require_string(matches, ARG_RUN_ID)?,
            attempt: *matches.get_one::<u32>(ARG_ATTEMPT).unwrap_or(&1),
            job_id: matches.get_one::<String>(ARG_JOB_ID).cloned(),
            parent_run_id: matches.get_one::<String>(ARG_PARENT_RUN_ID).cloned(),
        };
        if let Err(reason) = meta.validate() {
            eprintln!(
                "Config Error: {reason}; e.g. {BIN_NAME} run --run-id r2 --attempt 2 \
                 --parent-run-id r1 ..."
            );
            return Err(ExitCode::Config);
        }

        let job = parse_job(matches)?;
        let backend = parse_backend(matches)?;
        let policy = parse_policy(matches)?;
        let fanout = parse_fanout(matches)?;
        let proxy = parse_proxy(matches)?;

        Ok(RunArgs {
            meta,
            script: PathBuf::from(require_string(matches, ARG_SCRIPT)?),
            executor: matches.get_one::<String>(ARG_EXECUTOR).map(PathBuf::from),
            job,
            dataset: require_string(matches, ARG_DATASET)?,
            source: require_string(matches, ARG_SOURCE)?,
            category: require_string(matches, ARG_CATEGORY)?,
            backend,
            policy,
            fanout,
            proxy,
            browser_ws_endpoint: matches.get_one::<String>(ARG_BROWSER_WS_ENDPOINT).cloned(),
        })
    }
}

impl ExecArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<ExecArgs, ExitCode> {
        Ok(ExecArgs {
            script: PathBuf::from(require_string(matches, ARG_SCRIPT)?),
        })
    }
}

fn require_string(matches: &ArgMatches, name: &str) -> Result<String, ExitCode> {
    matches.get_one::<String>(name).cloned().ok_or_else(|| {
        eprintln!("Config Error: --{name} is required");
        ExitCode::Config
    })
}

fn parse_job(matches: &ArgMatches) -> Result<JsonMap, ExitCode> {
    let raw = if let Some(inline) = matches.get_one::<String>(ARG_JOB) {
        inline.clone()
    } else if let Some(path) = matches.get_one::<String>(ARG_JOB_JSON) {
        std::fs::read_to_string(path).map_err(|err| {
            eprintln!(
                "Config Error: cannot read --{ARG_JOB_JSON} {path:?}: {err}; \
                 e.g. {BIN_NAME} run --job-json ./job.json ..."
            );
            ExitCode::Config
        })?
    } else {
        return Ok(JsonMap::new());
    };

    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
        eprintln!(
            "Config Error: job payload is not valid JSON ({err}); got {raw:?}; \
             e.g. {BIN_NAME} run --job '{{\"url\": \"https://example.com\"}}' ..."
        );
        ExitCode::Config
    })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => {
            eprintln!(
                "Config Error: job payload must be a top-level JSON object, \
                 got {other}; arrays, primitives and null are rejected; \
                 e.g. {BIN_NAME} run --job '{{\"url\": \"https://example.com\"}}' ..."
            );
            Err(ExitCode::Config)
        }
    }
}

fn parse_backend(matches: &ArgMatches) -> Result<BackendConfig, ExitCode> {
    let raw = require_string(matches, ARG_STORAGE_BACKEND)?;
    let kind: BackendKind = raw.parse().map_err(|err: String| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;
    Ok(BackendConfig {
        kind,
        path: require_string(matches, ARG_STORAGE_PATH)?,
        region: matches.get_one::<String>(ARG_STORAGE_REGION).cloned(),
        endpoint: matches.get_one::<String>(ARG_STORAGE_ENDPOINT).cloned(),
        s3_path_style: matches.get_flag(ARG_STORAGE_S3_PATH_STYLE),
    })
}

fn parse_policy(matches: &ArgMatches) -> Result<PolicyConfig, ExitCode> {
    let policy = matches
        .get_one::<String>(ARG_POLICY)
        .map(String::as_str)
        .unwrap_or("strict");
    let config = match policy {
        "strict" => PolicyConfig::Strict,
        "buffered" => {
            let flush_mode: FlushMode = matches
                .get_one::<String>(ARG_FLUSH_MODE)
                .map(String::as_str)
                .unwrap_or("at_least_once")
                .parse()
                .map_err(|err: String| {
                    eprintln!("Config Error: {err}");
                    ExitCode::Config
                })?;
            let buffered = BufferedConfig {
                max_events: matches
                    .get_one::<u64>(ARG_BUFFER_EVENTS)
                    .copied()
                    .unwrap_or(0) as usize,
                max_bytes: matches
                    .get_one::<u64>(ARG_BUFFER_BYTES)
                    .copied()
                    .unwrap_or(0) as usize,
                flush_mode,
            };
            if let Err(err) = buffered.validate() {
                eprintln!(
                    "Config Error: {err}; e.g. {BIN_NAME} run --policy buffered \
                     --buffer-events 500 --buffer-bytes 8388608 ..."
                );
                return Err(ExitCode::Config);
            }
            PolicyConfig::Buffered(buffered)
        }
        "streaming" => {
            let streaming = StreamingConfig {
                flush_count: matches
                    .get_one::<u64>(ARG_FLUSH_COUNT)
                    .map(|count| *count as usize),
                flush_interval: matches
                    .get_one::<u64>(ARG_FLUSH_INTERVAL)
                    .map(|seconds| Duration::from_secs(*seconds)),
            };
            if let Err(err) = streaming.validate() {
                eprintln!(
                    "Config Error: {err}; e.g. {BIN_NAME} run --policy streaming \
                     --flush-count 100 --flush-interval 5 ..."
                );
                return Err(ExitCode::Config);
            }
            PolicyConfig::Streaming(streaming)
        }
        other => {
            eprintln!(
                "Config Error: unknown policy {other:?}; valid policies are \
                 \"strict\", \"buffered\" and \"streaming\"; \
                 e.g. {BIN_NAME} run --policy strict ..."
            );
            return Err(ExitCode::Config);
        }
    };
    Ok(config)
}

fn parse_fanout(matches: &ArgMatches) -> Result<FanoutConfig, ExitCode> {
    let config = FanoutConfig {
        max_depth: *matches.get_one::<u32>(ARG_DEPTH).unwrap_or(&0),
        max_runs: matches.get_one::<u64>(ARG_MAX_RUNS).copied(),
        parallel: *matches.get_one::<u64>(ARG_PARALLEL).unwrap_or(&1) as usize,
    };
    if let Err(err) = config.validate() {
        eprintln!("Config Error: {err}");
        return Err(ExitCode::Config);
    }
    Ok(config)
}

fn parse_proxy(matches: &ArgMatches) -> Result<Option<ProxySpec>, ExitCode> {
    let Some(config_path) = matches.get_one::<String>(ARG_PROXY_CONFIG) else {
        return Ok(None);
    };
    let pool_name = matches
        .get_one::<String>(ARG_PROXY_POOL)
        .map(String::as_str)
        .unwrap_or("default");
    let pool = ProxyPool::load(std::path::Path::new(config_path), pool_name).map_err(|err| {
        eprintln!("Config Error: {err}");
        ExitCode::Config
    })?;
    Ok(Some(pool.next()))
}
