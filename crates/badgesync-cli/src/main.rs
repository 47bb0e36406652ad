use badgesync_core::{run_sync, Config, Scheduler, SyncContext};
use badgesync_server::serve;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "badgesync",
    about = "Synchronize badge-access events from the portal into the destination store",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recurring scheduler and the control API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3100", env = "PORT")]
        port: u16,
    },

    /// Run a single synchronization and print the result as JSON
    Sync {
        /// Include a verbose per-step trace in the result
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { port } => run_serve(port).await,
        Commands::Sync { debug } => run_once(debug).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_serve(port: u16) -> anyhow::Result<()> {
    let config = Config::from_env();
    let ctx = SyncContext::new(config)?;
    serve(Scheduler::new(ctx), port).await
}

async fn run_once(debug: bool) -> anyhow::Result<()> {
    let config = Config::from_env();
    let ctx = SyncContext::new(config)?;

    let result = run_sync(&ctx, debug).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!("sync failed");
    }
    Ok(())
}
