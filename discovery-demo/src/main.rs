mod provider;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use discovery_core::args::DiscoveryArgs;
use discovery_core::{
    DiscoveryConfig, FindServiceRuntime, IdString, QueryField, ServiceContainer,
    ServiceDiscovery, ServiceQuery, SharedRegistry, UnblockHandle,
};
use log::{error, info};
use provider::Provider;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "discovery-demo")]
#[command(about = "Demonstrates polling, blocking and callback service discovery")]
struct Cli {
    #[command(flatten)]
    discovery: DiscoveryArgs,

    /// Milliseconds between two camera offer/withdraw toggles of the provider
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

/// A (service, instance, event) query with `*` wildcards.
#[derive(Args, Clone)]
struct QueryArgs {
    #[arg(long, default_value = "*")]
    service: String,

    #[arg(long, default_value = "*")]
    instance: String,

    #[arg(long, default_value = "*")]
    event: String,
}

impl QueryArgs {
    fn to_query(&self) -> Result<ServiceQuery> {
        ServiceQuery::parse(&self.service, &self.instance, &self.event)
            .context("Invalid service query")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the registry once per period and print the matches
    Find {
        #[command(flatten)]
        query: QueryArgs,

        /// Number of polls
        #[arg(long, default_value_t = 5)]
        rounds: u32,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Block until a matching service appears (Ctrl-C gives up)
    Wait {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print the matches from a change callback until Ctrl-C or the timeout
    Callback {
        #[command(flatten)]
        query: QueryArgs,

        /// Seconds to run
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Watch services with edge-triggered find-service handlers
    Watch {
        /// Services to watch (any instance)
        #[arg(long, num_args = 1.., default_values = ["Camera", "Radar"])]
        services: Vec<String>,

        /// Seconds to run
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

fn init_logging(args: &DiscoveryArgs) {
    match args.get_log_level() {
        Some(filter) => env_logger::Builder::new().parse_filters(filter).init(),
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.discovery);

    let config = cli
        .discovery
        .resolve_config()
        .context("Failed to load discovery config")?;
    info!("=== Discovery Demo Starting ===");

    let registry = Arc::new(SharedRegistry::from_config(&config));
    let discovery = ServiceDiscovery::with_config(registry.clone(), config.clone())?;
    let period = Duration::from_millis(cli.period_ms);
    let _provider = Provider::start(registry, period / 2, period)?;

    spawn_ctrl_c_unblock(discovery.unblock_handle());

    match cli.command {
        Commands::Find {
            query,
            rounds,
            json,
        } => run_find(&discovery, &query.to_query()?, rounds, json, period).await?,
        Commands::Wait { query } => run_wait(discovery, query.to_query()?).await?,
        Commands::Callback { query, seconds } => {
            run_callback(&discovery, query.to_query()?, seconds).await?
        }
        Commands::Watch { services, seconds } => {
            run_watch(discovery, &config, &services, seconds).await?
        }
    }

    info!("=== Discovery Demo Finished ===");
    Ok(())
}

/// Unblocks every wait on the facade once Ctrl-C arrives.
fn spawn_ctrl_c_unblock(handle: UnblockHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, unblocking discovery");
                handle.unblock();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

/// Resolves once Ctrl-C was received or `seconds` elapsed.
async fn run_for(discovery: &ServiceDiscovery, seconds: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    while discovery.is_blocking() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn run_find(
    discovery: &ServiceDiscovery,
    query: &ServiceQuery,
    rounds: u32,
    json: bool,
    period: Duration,
) -> Result<()> {
    for round in 1..=rounds {
        if !discovery.is_blocking() {
            break;
        }
        let found = discovery.find_service(query);
        if json {
            println!("{}", serde_json::to_string_pretty(&found)?);
        } else {
            print_container(&format!("Round {} [{}]", round, query), &found);
        }
        tokio::time::sleep(period).await;
    }
    Ok(())
}

async fn run_wait(discovery: ServiceDiscovery, query: ServiceQuery) -> Result<()> {
    info!("Waiting for {}", query);
    let waiter = discovery.clone();
    let waited_query = query.clone();
    let found = tokio::task::spawn_blocking(move || {
        waiter.wait_until(|| !waiter.find_service(&waited_query).is_empty())
    })
    .await
    .context("Wait task failed")?;

    if found {
        print_container(&format!("Found [{}]", query), &discovery.find_service(&query));
    } else {
        println!("Gave up waiting for {}", query);
    }
    Ok(())
}

async fn run_callback(discovery: &ServiceDiscovery, query: ServiceQuery, seconds: u64) -> Result<()> {
    discovery.register_callback(move |discovery| {
        let found = discovery.find_service(&query);
        print_container(&format!("Changed [{}]", query), &found);
    })?;

    run_for(discovery, seconds).await;
    discovery.deregister_callback();
    Ok(())
}

async fn run_watch(
    discovery: ServiceDiscovery,
    config: &DiscoveryConfig,
    services: &[String],
    seconds: u64,
) -> Result<()> {
    let runtime = FindServiceRuntime::new(discovery.clone(), config)?;
    for service in services {
        let id = IdString::new(service).with_context(|| format!("Invalid service '{}'", service))?;
        let handle = runtime.start_find_service(id, QueryField::Wildcard, |found, handle| {
            print_container(&format!("Handler {}", handle), found);
        })?;
        info!("Watching {}", handle);
    }

    run_for(&discovery, seconds).await;
    drop(runtime);
    Ok(())
}

fn print_container(title: &str, found: &ServiceContainer) {
    println!("{} ({} match(es))", title, found.len());
    for descriptor in found {
        println!("  {}", descriptor);
    }
}
