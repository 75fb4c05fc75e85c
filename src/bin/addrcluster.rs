//! Batch address clustering.
//!
//! Reads every edge file under the input directory, clusters the addresses
//! and replaces the `address_clusters` table in the output database.
//!
//! Usage:
//! ```bash
//! addrcluster --config addrcluster.toml \
//!   --input /data/edges \
//!   --checkpoint-dir /data/checkpoints \
//!   --database /data/clusters.sqlite \
//!   --log /tmp/addrcluster.log
//! ```
//!
//! Rerunning after a crash resumes from the last checkpointed file.

use std::path::PathBuf;

use addrcluster::config::{CheckpointOverrides, InputOverrides, OutputOverrides};
use addrcluster::{ClusterConfig, ClusterPipeline, ConfigOverrides, LabelPolicy, Profile, SqliteClusterStore};
use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    database: Option<PathBuf>,
    label_policy: Option<LabelPolicy>,
    profile: Option<Profile>,
    log_file: Option<PathBuf>,
    clear_checkpoints: bool,
}

impl CliArgs {
    fn overrides(&self) -> ConfigOverrides {
        let input = self.input.clone().map(|dir| InputOverrides { dir: Some(dir) });
        let checkpoint = (self.checkpoint_dir.is_some() || self.clear_checkpoints).then(|| {
            CheckpointOverrides {
                dir: self.checkpoint_dir.clone(),
                clear_on_success: self.clear_checkpoints.then_some(true),
            }
        });
        let output = (self.database.is_some() || self.label_policy.is_some()).then(|| {
            OutputOverrides {
                database: self.database.clone(),
                label_policy: self.label_policy,
            }
        });
        ConfigOverrides {
            profile: self.profile,
            input,
            checkpoint,
            output,
        }
    }
}

fn parse_args() -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| anyhow!("{arg} expects a value"))
        };
        match arg.as_str() {
            "--config" | "-c" => cli.config = Some(PathBuf::from(value()?)),
            "--input" | "-i" => cli.input = Some(PathBuf::from(value()?)),
            "--checkpoint-dir" => cli.checkpoint_dir = Some(PathBuf::from(value()?)),
            "--database" | "-d" => cli.database = Some(PathBuf::from(value()?)),
            "--label-policy" => {
                cli.label_policy = Some(value()?.parse().map_err(|err: String| anyhow!(err))?);
            }
            "--profile" => {
                cli.profile = Some(value()?.parse().map_err(|err: String| anyhow!(err))?);
            }
            "--log" | "--log-file" => cli.log_file = Some(PathBuf::from(value()?)),
            "--clear-checkpoints" => cli.clear_checkpoints = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?} (see --help)"),
        }
    }

    if cli.config.is_none() {
        cli.config = std::env::var_os("ADDRCLUSTER_CONFIG").map(PathBuf::from);
    }
    Ok(cli)
}

fn print_help() {
    println!(
        r#"addrcluster - cluster blockchain addresses from address-pair edges

USAGE:
    addrcluster [OPTIONS]

OPTIONS:
    -c, --config <PATH>          TOML config file (or ADDRCLUSTER_CONFIG)
    -i, --input <DIR>            Directory of edge files (.parquet, .csv, .tsv, .txt)
    --checkpoint-dir <DIR>       Directory for per-phase checkpoints
    -d, --database <PATH>        SQLite database receiving address_clusters
    --label-policy <POLICY>      root | smallest-address (default: root)
    --profile <NAME>             balanced | memory-saver | high-throughput
    --log <PATH>                 Log file path (logs to file only)
    --clear-checkpoints          Remove checkpoints after a successful run
    -h, --help                   Print help

ENVIRONMENT:
    RUST_LOG                     Log filter (default: info)
    ADDRCLUSTER_*                Config keys, nested with __ (e.g. ADDRCLUSTER_READER__BATCH_ROWS)

EXAMPLES:
    # Cluster a directory of Parquet edges into the default database
    addrcluster --input /data/edges

    # Small batches, stable labels, log to a file
    addrcluster -i /data/edges --profile memory-saver --label-policy smallest-address --log /tmp/ac.log
"#
    );
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = parse_args()?;
    init_logging(cli.log_file.as_ref())?;

    let config = ClusterConfig::load(cli.config.as_deref(), cli.overrides())?;
    let database = config.output.database.clone();
    let mut store = SqliteClusterStore::open(&database)
        .with_context(|| format!("opening output database {}", database.display()))?;

    let pipeline = ClusterPipeline::new(config)?;
    let summary = pipeline.run(&mut store)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
