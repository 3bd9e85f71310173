use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use shellql::{create_router, MemoryStore, QueryService, RunRegistry, ServerConfig};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shellql")]
#[command(about = "ShellQL - Sandboxed read-only shell queries over a document store", long_about = None)]
struct Cli {
    /// Directory holding shellql.toml and .env
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// JSON seed file for the in-memory store
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the query API over HTTP
    Serve(ServeArgs),
    /// Run a single query and stream its result to stdout
    Run {
        /// The shell query, e.g. db.orders.find({status: "open"}).limit(2)
        query: String,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shellql=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ServerConfig::load(&cli.config_dir)?;
    if let Some(seed) = cli.seed {
        config.seed_path = Some(seed);
    }

    let store = match &config.seed_path {
        Some(path) => {
            let store = MemoryStore::load_seed(path)?;
            tracing::info!(
                "Loaded seed {} ({} collections)",
                path.display(),
                store.collection_names().len()
            );
            store
        }
        None => MemoryStore::new(),
    };

    match cli.command {
        Command::Serve(args) => {
            if let Some(host) = args.host {
                config.host = host;
            }
            if let Some(port) = args.port {
                config.port = port;
            }
            serve(config, store).await
        }
        Command::Run { query } => run_once(config, store, &query).await,
    }
}

fn build_service(config: &ServerConfig, store: MemoryStore) -> QueryService {
    QueryService::new(Arc::new(store), RunRegistry::new(config.run_ttl()))
        .with_max_query_len(config.max_query_len)
}

async fn serve(config: ServerConfig, store: MemoryStore) -> anyhow::Result<()> {
    let app = create_router(build_service(&config, store));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_once(config: ServerConfig, store: MemoryStore, query: &str) -> anyhow::Result<()> {
    let service = build_service(&config, store);
    let run_id = service.prepare(query)?;
    let mut stream = service.open_stream(&run_id)?;

    let mut stdout = std::io::stdout().lock();
    while let Some(frame) = stream.next().await {
        write!(stdout, "{}", frame)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
