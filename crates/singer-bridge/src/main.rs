use clap::Parser;
use flow_cli_common::{init_logging, LogArgs};
use singer_bridge::run_spec::RunSpecDoc;
use singer_bridge::Runner;
use std::path::PathBuf;

/// Runs one Singer tap/target extract-load pipeline to completion.
///
/// This is deliberately not an interactive front-end: it reads one
/// run-specification file, runs once, and exits. Module loading, prompting,
/// and orchestrator integrations live outside the core.
#[derive(Parser, Debug)]
#[clap(about = "Runs a Singer tap/target pipeline from a run-specification file.")]
struct Args {
    /// Path to the JSON run-specification file (tap, target, and state backend).
    #[clap(long)]
    spec: PathBuf,

    /// Restrict the run to these streams (by tap_stream_id or safe_name).
    /// Omit to run with the tap's own construction-time selection.
    #[clap(long = "stream")]
    streams: Vec<String>,

    #[clap(flatten)]
    log_args: LogArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_args);

    let (tap, target, state_store) = RunSpecDoc::from_path(&args.spec)?.build()?;
    let runner = Runner::new(tap, target, state_store);

    let streams = if args.streams.is_empty() {
        None
    } else {
        Some(args.streams.as_slice())
    };

    let result = runner.run(streams, None).await;

    let counts = runner.record_counts().await;
    tracing::info!(state_file = %runner.state_file_name(), ?counts, "pipeline run finished");

    result?;
    Ok(())
}
