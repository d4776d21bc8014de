use anyhow::Result;
use clap::Parser;
use tracing::info;

use conveyor_api::{AppState, Server};
use conveyor_core::{
    create_pool, Broker, CronScheduler, HandlerRegistry, JobStore, Migrator, Settings,
    StatusCache, WorkerRuntime,
};

#[derive(Parser)]
#[command(
    name = "conveyor",
    about = "Conveyor - a distributed job queue with priority dispatch, bounded retry, and cron scheduling",
    version
)]
struct Cli {
    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the REST API server
    Server {
        #[arg(long, help = "Bind address (overrides API_HOST)")]
        host: Option<String>,

        #[arg(long, help = "Bind port (overrides API_PORT)")]
        port: Option<u16>,
    },

    /// Start a worker process
    Worker {
        #[arg(long, help = "Worker identifier (overrides WORKER_ID)")]
        worker_id: Option<String>,
    },

    /// Start the cron scheduler
    Scheduler,

    /// Manage database schema
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
}

#[derive(clap::Subcommand)]
enum MigrateCommand {
    /// Run pending migrations
    Run,

    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::from_env()?;
    init_tracing(&settings, cli.verbose);

    info!("Starting conveyor v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Server { host, port }) => {
            let mut settings = settings;
            if let Some(host) = host {
                settings.api_host = host;
            }
            if let Some(port) = port {
                settings.api_port = port;
            }
            run_server(settings).await?;
        }

        Some(Commands::Worker { worker_id }) => {
            let mut settings = settings;
            if let Some(worker_id) = worker_id {
                settings.worker_id = worker_id;
            }
            run_worker(settings).await?;
        }

        Some(Commands::Scheduler) => {
            run_scheduler(settings).await?;
        }

        Some(Commands::Migrate { command }) => {
            run_migrations(settings, command).await?;
        }

        None => {
            info!("No command specified, starting server...");
            run_server(settings).await?;
        }
    }

    Ok(())
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let directive = if verbose {
        "conveyor=debug,tower_http=debug,lapin=info,sqlx=warn".to_string()
    } else {
        format!("conveyor={level},conveyor_core={level},conveyor_api={level},tower_http=warn,lapin=warn,sqlx=error",
            level = settings.log_level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(directive)
        .with_target(false)
        .init();
}

async fn run_server(settings: Settings) -> Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    Migrator::new(pool.clone()).migrate().await?;

    let store = JobStore::new(pool);
    let broker = Broker::connect(&settings.broker_url).await?;
    let cache = StatusCache::connect(&settings.cache_url).await?;

    let addr = format!("{}:{}", settings.api_host, settings.api_port).parse()?;
    let state = AppState::new(store, broker, cache, settings);

    Server::new(state).run(addr).await?;

    Ok(())
}

async fn run_worker(settings: Settings) -> Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    let store = JobStore::new(pool);
    let broker = Broker::connect(&settings.broker_url).await?;
    let cache = StatusCache::connect(&settings.cache_url).await?;

    let runtime = WorkerRuntime::new(
        store,
        broker,
        cache,
        HandlerRegistry::builtin(),
        settings.worker_id.clone(),
        settings.worker_concurrency,
        settings.worker_prefetch_count,
    );

    tokio::select! {
        result = runtime.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping worker");
        }
    }

    Ok(())
}

async fn run_scheduler(settings: Settings) -> Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    let store = JobStore::new(pool);
    let broker = Broker::connect(&settings.broker_url).await?;

    let scheduler = CronScheduler::new(store, broker, settings.poll_interval());

    tokio::select! {
        _ = scheduler.run() => {},
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping scheduler");
        }
    }

    Ok(())
}

async fn run_migrations(settings: Settings, command: MigrateCommand) -> Result<()> {
    let pool = create_pool(&settings.database_url).await?;
    let migrator = Migrator::new(pool);

    match command {
        MigrateCommand::Run => {
            migrator.migrate().await?;
            info!("Migrations completed successfully");
        }
        MigrateCommand::Status => {
            let applied = migrator.applied().await?;
            for migration in &applied {
                println!(
                    "{}\t{}\t{}",
                    migration.version, migration.name, migration.applied_at
                );
            }
            println!("{} migrations applied", applied.len());
        }
    }

    Ok(())
}
