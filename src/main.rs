use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use roadcall::domain::ports::{GatewayRef, NotifierRef, StoreRef};
use roadcall::infrastructure::gateway::SimulatedGateway;
use roadcall::infrastructure::in_memory::InMemoryStore;
use roadcall::infrastructure::notify::TracingNotifier;
use roadcall::interfaces::script::command_reader::CommandReader;
use roadcall::interfaces::script::runner::ScenarioRunner;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file: one JSON command per line
    scenario: PathBuf,

    /// Path to persistent database (optional). Requires the
    /// storage-rocksdb feature.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Enable debug-level engine logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roadcall=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roadcall=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store: StoreRef = match cli.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(db_path) => Arc::new(
            roadcall::infrastructure::rocksdb::RocksDbStore::open(db_path).into_diagnostic()?,
        ),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            return Err(miette::miette!(
                "this build has no persistent storage; rebuild with --features storage-rocksdb"
            ));
        }
        None => Arc::new(InMemoryStore::new()),
    };
    let gateway: GatewayRef = Arc::new(SimulatedGateway::new());
    let notifier: NotifierRef = Arc::new(TracingNotifier);
    let mut runner = ScenarioRunner::new(store, gateway, notifier);

    let file = File::open(&cli.scenario).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.apply(command).await {
                    eprintln!("Error applying command: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {e}");
            }
        }
    }

    let requests = runner.summary().await.into_diagnostic()?;
    let stdout = io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &requests).into_diagnostic()?;
    println!();

    Ok(())
}
