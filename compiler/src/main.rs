use clap::Parser;
use std::path::PathBuf;

use ltp::diag::TransformError;
use ltp::pass::PassId;
use ltp::pipeline::{TransformOptions, TransformState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Physical,
    LogicalDump,
    PhysicalDump,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "ltp",
    version,
    about = "Logical-to-physical transformer: expands parallel regions and groups operators into PEs"
)]
struct Cli {
    /// Input application description (JSON)
    input: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Physical)]
    emit: EmitStage,

    /// Log passes and timing
    #[arg(long)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(e: &TransformError) -> ! {
    eprintln!("ltp: error: {}", e);
    if let TransformError::Config {
        code, substitution, ..
    } = e
    {
        eprintln!("ltp: code: {} ({})", code, substitution);
    }
    std::process::exit(1);
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> String {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match text {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ltp: error: cannot serialize output: {}", e);
            std::process::exit(2);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::debug!(input = %cli.input.display(), emit = ?cli.emit, "starting");

    // ── Read and decode input ──
    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ltp: error: {}: {}", cli.input.display(), e);
            std::process::exit(2);
        }
    };
    let app: ltp::adl::Application = match serde_json::from_str(&source) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("ltp: error: {}: {}", cli.input.display(), e);
            std::process::exit(2);
        }
    };

    let options = TransformOptions::from_env();
    let text = match cli.emit {
        EmitStage::Physical | EmitStage::BuildInfo => {
            let physical = ltp::pipeline::transform(&app, options).unwrap_or_else(|e| fail(&e));
            let json = to_json(&physical, cli.pretty);
            if cli.emit == EmitStage::BuildInfo {
                ltp::pipeline::compute_provenance(&source, &json)
                    .to_json()
                    .unwrap_or_else(|e| fail(&e))
            } else {
                json
            }
        }
        EmitStage::LogicalDump | EmitStage::PhysicalDump => {
            let terminal = if cli.emit == EmitStage::LogicalDump {
                PassId::CcRegions
            } else {
                PassId::StaticConnections
            };
            let mut state = TransformState::new(&app);
            let dumped = ltp::pipeline::run_pipeline(&mut state, terminal, options, |_, _| {})
                .and_then(|()| match cli.emit {
                    EmitStage::LogicalDump => ltp::dump::logical_model(state.logical()?),
                    _ => ltp::dump::physical_model(state.physical()?),
                });
            dumped.unwrap_or_else(|e| fail(&e))
        }
    };

    // ── Write output ──
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &text) {
                eprintln!("ltp: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
