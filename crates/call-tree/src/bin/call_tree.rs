use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::Parser;
use ethereum_types::Address;
use ethrex_call_tree::{
    CallTreeBuilder, CallTreeConfig, FilterMode, SourceLineConverter, StaticCompilerOutput,
    Trace, TraceEntry, TraceStep,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber, filter::Directive};

#[derive(Parser)]
#[command(name = "call-tree", about = "Source-level call tree of an EVM struct-log trace")]
struct Cli {
    /// Path to a `debug_traceTransaction` result (or a bare struct-log array)
    #[arg(long)]
    trace: PathBuf,

    /// Path to a JSON object mapping code addresses to compilation results
    #[arg(long)]
    compilation: PathBuf,

    /// Address whose code the transaction enters (the created address for deployments)
    #[arg(long)]
    address: Address,

    /// The transaction deploys a contract
    #[arg(long)]
    creation: bool,

    /// Transaction input, hex encoded
    #[arg(long, default_value = "")]
    calldata: String,

    /// Export view: all, call or nojump
    #[arg(long, default_value = "all")]
    filter: String,

    /// Dotted path of the scope to export from (default: the root scope)
    #[arg(long)]
    root: Option<String>,

    /// Skip variable binding
    #[arg(long)]
    no_locals: bool,

    /// Deepest scope nesting accepted
    #[arg(long, default_value_t = ethrex_call_tree::config::DEFAULT_MAX_SCOPE_DEPTH)]
    max_depth: usize,

    /// Output JSON file path (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Result {
        #[serde(rename = "structLogs")]
        struct_logs: Vec<TraceStep>,
    },
    Steps(Vec<TraceStep>),
}

impl TraceFile {
    fn into_steps(self) -> Vec<TraceStep> {
        match self {
            TraceFile::Result { struct_logs } => struct_logs,
            TraceFile::Steps(steps) => steps,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Directive::from_str("info")?)
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let Ok(filter) = FilterMode::from_str(&cli.filter) else {
        bail!("Unknown filter `{}`, expected all, call or nojump", cli.filter);
    };

    let raw_trace = tokio::fs::read(&cli.trace)
        .await
        .with_context(|| format!("reading {}", cli.trace.display()))?;
    let steps = serde_json::from_slice::<TraceFile>(&raw_trace)
        .context("decoding trace")?
        .into_steps();
    let raw_compilation = tokio::fs::read(&cli.compilation)
        .await
        .with_context(|| format!("reading {}", cli.compilation.display()))?;
    let compiler: StaticCompilerOutput =
        serde_json::from_slice(&raw_compilation).context("decoding compilation results")?;

    let call_data =
        hex::decode(cli.calldata.trim_start_matches("0x")).context("decoding calldata")?;
    let trace = Trace::new(
        steps,
        TraceEntry {
            address: cli.address,
            is_creation: cli.creation,
            call_data: Bytes::from(call_data),
        },
    );
    info!(steps = trace.len(), "Loaded trace");

    let config = CallTreeConfig {
        include_local_variables: !cli.no_locals,
        max_scope_depth: cli.max_depth,
        ..Default::default()
    };
    let lines = SourceLineConverter::new();
    let tree = match CallTreeBuilder::new(&compiler, &lines)
        .with_config(config)
        .build(&trace)
        .await
    {
        Ok(tree) => tree,
        Err(err) if !err.is_build_failure() => {
            warn!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err).context("building call tree"),
    };
    info!(
        scopes = tree.scopes().count(),
        warnings = tree.warnings().len(),
        "Call tree ready"
    );

    let nested = tree.get_scopes_as_nested_json(filter, cli.root.as_deref())?;
    let json = serde_json::to_string_pretty(&nested)?;
    match cli.output {
        Some(path) => tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
