use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use qtrix::config::{QtrixConfig, DEFAULT_STORE_PATH};
use qtrix::dashboard::{run_dashboard, DashboardState};
use qtrix::scheduler::{OverrideRecord, Row, StoredWeights};
use qtrix::shutdown::install_shutdown_handler;
use qtrix::store::FileStore;
use qtrix::{Coordinator, Namespace, Namespacing};

type FileCoordinator = Coordinator<FileStore, StoredWeights<FileStore>>;

#[derive(Parser, Debug)]
#[command(name = "qtrix")]
#[command(version)]
#[command(about = "Assign queues to worker slots across a fleet of hosts")]
#[command(propagate_version = true)]
struct Args {
    /// Path of the shared store file
    #[arg(long, global = true, env = "QTRIX_STORE", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Prefix for every store key
    #[arg(long, global = true, env = "QTRIX_PREFIX", default_value = "qtrix")]
    prefix: String,

    /// Namespace to operate on ("current" follows the active namespace)
    #[arg(long, global = true, default_value = "current")]
    ns: String,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage queue overrides
    Override {
        #[command(subcommand)]
        command: OverrideCommands,
    },

    /// Manage queue weights
    Queues {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Inspect or forget known hosts
    Hosts {
        #[command(subcommand)]
        command: HostCommands,
    },

    /// Inspect the queue matrix
    Matrix {
        #[command(subcommand)]
        command: MatrixCommands,
    },

    /// Show or switch the active namespace
    Namespace {
        #[command(subcommand)]
        command: NamespaceCommands,
    },

    /// Serve a read-only JSON dashboard
    Dashboard {
        /// Port to listen on [default: 8080]
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind [default: 127.0.0.1]
        #[arg(long)]
        bind: Option<IpAddr>,
    },
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum OverrideCommands {
    /// Pin a queue list to a number of worker slots
    Add {
        /// Comma-separated queues in priority order (e.g. "a,b,c")
        queues: String,
        processes: u32,
    },
    /// Remove capacity from overrides of a queue list
    Remove { queues: String, processes: u32 },
    /// Drop every override in the namespace
    Clear,
    /// List overrides and their claims
    List,
    /// Claim overrides for a host (what a host does at boot)
    Claim { host: String, count: usize },
}

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// Replace the queue weights (e.g. "a=10,b=5")
    Set { weights: String },
    /// List queues and weights
    List,
}

#[derive(clap::Subcommand, Debug)]
enum HostCommands {
    /// List hosts and their slot counts
    List,
    /// Forget a host (its override claims are kept)
    Remove { host: String },
}

#[derive(clap::Subcommand, Debug)]
enum MatrixCommands {
    /// Print the matrix table
    Show,
    /// Fetch the per-slot queue lists for a host
    Fetch { host: String, slots: u32 },
}

#[derive(clap::Subcommand, Debug)]
enum NamespaceCommands {
    /// Print the active namespace
    Current,
    /// Make a namespace the active one
    Use { name: String },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct OverrideOutput {
    id: String,
    queues: Vec<String>,
    processes: u32,
    host: Option<String>,
    claims: Vec<String>,
}

impl From<OverrideRecord> for OverrideOutput {
    fn from(r: OverrideRecord) -> Self {
        Self {
            id: r.id.to_string(),
            host: r.host().map(str::to_string),
            queues: r.queues,
            processes: r.processes,
            claims: r.claims,
        }
    }
}

#[derive(Serialize)]
struct MatrixOutput {
    namespace: String,
    rows: Vec<Row>,
}

#[derive(Serialize)]
struct SlotsOutput {
    host: String,
    slots: Vec<Vec<String>>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_queues(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_weights(raw: &str) -> Result<BTreeMap<String, u64>, Box<dyn std::error::Error>> {
    let mut weights = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((name, weight)) => {
                weights.insert(name.trim().to_string(), weight.trim().parse::<u64>()?);
            }
            None => {
                tracing::warn!(pair, "Invalid weight format, expected name=weight");
                return Err(format!("invalid weight {:?}, expected name=weight", pair).into());
            }
        }
    }
    Ok(weights)
}

fn load_config(args: &Args) -> QtrixConfig {
    QtrixConfig::new(&args.store).with_key_prefix(&args.prefix)
}

fn open_coordinator(config: &QtrixConfig) -> Result<FileCoordinator, Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open(&config.store_path)?);
    let weights = Arc::new(StoredWeights::new(
        store.clone(),
        Namespacing::from_config(config),
    ));
    Ok(Coordinator::from_config(store, weights, config)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_override(
    c: &FileCoordinator,
    ns: Namespace,
    command: OverrideCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        OverrideCommands::Add { queues, processes } => {
            c.overrides.add(ns, &parse_queues(&queues), processes)?;
            println!("Override added.");
        }
        OverrideCommands::Remove { queues, processes } => {
            c.overrides.remove(ns, &parse_queues(&queues), processes)?;
            println!("Override capacity removed.");
        }
        OverrideCommands::Clear => {
            c.overrides.clear(ns)?;
            println!("Overrides cleared.");
        }
        OverrideCommands::List => {
            let records: Vec<OverrideOutput> = c
                .overrides
                .all(ns)?
                .into_iter()
                .map(OverrideOutput::from)
                .collect();
            match output {
                OutputFormat::Json => print_json(&records)?,
                OutputFormat::Table => {
                    if records.is_empty() {
                        println!("No overrides.");
                    } else {
                        println!("{:<38} {:<10} {:<24} QUEUES", "ID", "PROCESSES", "CLAIMED BY");
                        println!("{}", "-".repeat(90));
                        for r in &records {
                            let claimed = if r.claims.is_empty() {
                                "-".to_string()
                            } else {
                                r.claims.join(",")
                            };
                            println!(
                                "{:<38} {:<10} {:<24} {}",
                                r.id,
                                r.processes,
                                claimed,
                                r.queues.join(",")
                            );
                        }
                    }
                }
            }
        }
        OverrideCommands::Claim { host, count } => {
            let sets = c.overrides.overrides_for(ns, &host, count)?;
            match output {
                OutputFormat::Json => print_json(&SlotsOutput { host, slots: sets })?,
                OutputFormat::Table => {
                    if sets.is_empty() {
                        println!("No overrides available for {}.", host);
                    }
                    for (i, set) in sets.iter().enumerate() {
                        println!("{:<4} {}", i, set.join(","));
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_queues(
    c: &FileCoordinator,
    ns: Namespace,
    command: QueueCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        QueueCommands::Set { weights } => {
            c.weights().map_queue_weights(ns, &parse_weights(&weights)?)?;
            println!("Queue weights updated.");
        }
        QueueCommands::List => {
            let queues = c.weights().all_queues(ns)?;
            match output {
                OutputFormat::Json => print_json(&queues)?,
                OutputFormat::Table => {
                    if queues.is_empty() {
                        println!("No queues.");
                    }
                    for q in &queues {
                        println!("{:<24} {}", q.name, q.weight);
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_hosts(
    c: &FileCoordinator,
    ns: Namespace,
    command: HostCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        HostCommands::List => {
            let hosts = c.hosts.all(ns)?;
            match output {
                OutputFormat::Json => print_json(&hosts)?,
                OutputFormat::Table => {
                    if hosts.is_empty() {
                        println!("No hosts.");
                    }
                    for h in &hosts {
                        println!("{:<32} {}", h.hostname, h.slots);
                    }
                }
            }
        }
        HostCommands::Remove { host } => {
            if c.hosts.deregister(ns, &host)? {
                println!("Host {} removed.", host);
            } else {
                println!("Host {} was not known.", host);
            }
        }
    }
    Ok(())
}

fn handle_matrix(
    c: &FileCoordinator,
    ns: Namespace,
    command: MatrixCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let ns = c.namespacing().pin(c.store().as_ref(), &ns)?;
    match command {
        MatrixCommands::Show => {
            let rows = c.matrix.to_table(&ns)?;
            match output {
                OutputFormat::Json => print_json(&MatrixOutput {
                    namespace: ns.to_string(),
                    rows,
                })?,
                OutputFormat::Table => {
                    println!("Matrix ({})", ns);
                    println!("{}", "=".repeat(40));
                    if rows.is_empty() {
                        println!("Empty.");
                    }
                    for row in &rows {
                        println!("{}", row);
                    }
                }
            }
        }
        MatrixCommands::Fetch { host, slots } => {
            let lists = c.fetch_queues(&ns, &host, slots)?;
            match output {
                OutputFormat::Json => print_json(&SlotsOutput { host, slots: lists })?,
                OutputFormat::Table => {
                    println!("{:<6} QUEUES", "SLOT");
                    for (i, list) in lists.iter().enumerate() {
                        println!("{:<6} {}", i, list.join(","));
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_namespace(
    c: &FileCoordinator,
    command: NamespaceCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        NamespaceCommands::Current => {
            println!("{}", c.namespacing().current(c.store().as_ref())?);
        }
        NamespaceCommands::Use { name } => {
            c.namespacing().set_current(c.store().as_ref(), &name)?;
            println!("Current namespace is now {}.", name);
        }
    }
    Ok(())
}

async fn run_dashboard_command(
    c: FileCoordinator,
    config: &QtrixConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.dashboard.listen_addr;
    let shutdown = install_shutdown_handler();
    let state = DashboardState {
        coordinator: Arc::new(c),
    };
    run_dashboard(addr, state, shutdown).await;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = load_config(&args);
    if let Commands::Dashboard { port, bind } = &args.command {
        let mut addr = config.dashboard.listen_addr;
        if let Some(ip) = bind {
            addr.set_ip(*ip);
        }
        if let Some(port) = port {
            addr.set_port(*port);
        }
        config = config.with_dashboard_addr(addr);
    }
    let coordinator = open_coordinator(&config)?;
    let ns = Namespace::from(args.ns.as_str());

    match args.command {
        Commands::Override { command } => {
            handle_override(&coordinator, ns, command, &args.output)?;
        }
        Commands::Queues { command } => {
            handle_queues(&coordinator, ns, command, &args.output)?;
        }
        Commands::Hosts { command } => {
            handle_hosts(&coordinator, ns, command, &args.output)?;
        }
        Commands::Matrix { command } => {
            handle_matrix(&coordinator, ns, command, &args.output)?;
        }
        Commands::Namespace { command } => {
            handle_namespace(&coordinator, command)?;
        }
        Commands::Dashboard { .. } => {
            run_dashboard_command(coordinator, &config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queues() {
        assert_eq!(parse_queues("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_queues("").is_empty());
    }

    #[test]
    fn test_parse_weights() {
        let weights = parse_weights("a=10, b = 5").unwrap();
        assert_eq!(weights.get("a"), Some(&10));
        assert_eq!(weights.get("b"), Some(&5));
        assert!(parse_weights("a").is_err());
        assert!(parse_weights("a=x").is_err());
    }
}
