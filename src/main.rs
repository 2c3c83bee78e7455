use clap::{Parser, Subcommand};
use gw_routes::catalog::{CommandSystemInfo, InterfaceCatalog};
use gw_routes::platform::linux::ShellChannel;
use gw_routes::routing::mirror::replay_lines;
use gw_routes::routing::RouteMirror;
use gw_routes::table::{MutationOutcome, RemovalSummary};
use gw_routes::{Config, RouteEngine, RouteError, RouteForm, RouteState, RoutingTable};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type Table = RoutingTable<CommandSystemInfo<Arc<ShellChannel>>, Arc<ShellChannel>>;

#[derive(Parser)]
#[command(name = "gw-routes")]
#[command(about = "Static IP route management for VoIP gateway appliances")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./gw-routes.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the interfaces a route can be bound to
    Interfaces,
    /// List configured routes
    List,
    /// Add a static route
    Add {
        #[arg(short, long)]
        destination: String,
        #[arg(short, long)]
        mask: String,
        /// Interface label as shown by `interfaces` (default: Lan 1)
        #[arg(short, long)]
        interface: Option<String>,
        #[arg(short, long)]
        gateway: Option<String>,
    },
    /// Change a configured route
    Edit {
        sequence_number: u32,
        #[arg(short, long)]
        destination: Option<String>,
        #[arg(short, long)]
        mask: Option<String>,
        #[arg(short, long)]
        interface: Option<String>,
        #[arg(short, long, conflicts_with = "clear_gateway")]
        gateway: Option<String>,
        /// Drop the explicit gateway
        #[arg(long)]
        clear_gateway: bool,
    },
    /// Delete one or more routes
    Delete {
        #[arg(required = true)]
        sequence_numbers: Vec<u32>,
    },
    /// Delete every route
    Clear,
    /// Re-apply every configured route and rewrite the boot script
    Sync,
    /// Show the routes the boot script will replay
    Mirror,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Init = cli.command {
        let path = cli.config.unwrap_or_else(|| PathBuf::from("gw-routes.toml"));
        Config::default().save(&path)?;
        println!("Created default config: {}", path.display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover()?,
    };

    if let Err(e) = run(cli, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let channel = Arc::new(if cli.dry_run {
        ShellChannel::dry_run()
    } else {
        ShellChannel::new()
    });
    let source = CommandSystemInfo::new(channel.clone(), config.system_info.command.clone());
    let engine = RouteEngine::new(
        channel.clone(),
        config.devices.clone(),
        RouteMirror::new(&config.mirror),
    );
    let rules = RouteState::load(&config.state_path)?
        .map(|state| state.rules)
        .unwrap_or_default();
    let mut table: Table = RoutingTable::new(source, engine).with_rules(rules);

    match cli.command {
        Commands::Interfaces => {
            let catalog = table.refresh_catalog().await;
            print_interfaces(&catalog);
        }
        Commands::List => {
            if table.rules().is_empty() {
                println!("No routes configured");
            }
            for rule in table.rules() {
                println!(
                    "{:>3}  {}/{}  {}{}",
                    rule.sequence_number,
                    rule.destination,
                    rule.subnet_mask,
                    rule.interface_label,
                    rule.gateway
                        .as_deref()
                        .map(|gw| format!("  via {}", gw))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Add {
            destination,
            mask,
            interface,
            gateway,
        } => {
            let mut form = table.open_add_form().await;
            form.destination = destination;
            form.subnet_mask = mask;
            if let Some(label) = interface {
                form.interface_label = label;
            }
            form.gateway = gateway.unwrap_or_default();

            let outcome = table.add(&form).await?;
            warn_persist(table.save_state(&config.state_path).as_ref());
            report_mutation("Added", &outcome);
        }
        Commands::Edit {
            sequence_number,
            destination,
            mask,
            interface,
            gateway,
            clear_gateway,
        } => {
            let mut form: RouteForm = table.open_edit_form(sequence_number).await?;
            if let Some(destination) = destination {
                form.destination = destination;
            }
            if let Some(mask) = mask {
                form.subnet_mask = mask;
            }
            if let Some(label) = interface {
                form.interface_label = label;
            }
            if let Some(gateway) = gateway {
                form.gateway = gateway;
            }
            if clear_gateway {
                form.gateway.clear();
            }

            let outcome = table.update(sequence_number, &form).await?;
            warn_persist(table.save_state(&config.state_path).as_ref());
            report_mutation("Updated", &outcome);
        }
        Commands::Delete { sequence_numbers } => {
            table.refresh_catalog().await;
            let summary = table.delete_many(&sequence_numbers).await?;
            warn_persist(table.save_state(&config.state_path).as_ref());
            report_removal(&summary);
        }
        Commands::Clear => {
            table.refresh_catalog().await;
            let summary = table.clear_all().await?;
            warn_persist(table.save_state(&config.state_path).as_ref());
            report_removal(&summary);
        }
        Commands::Sync => {
            table.refresh_catalog().await;
            let report = table.sync().await?;
            println!(
                "Installed {} routes, {} failed",
                report.installed.len(),
                report.failed.len()
            );
            for (sequence_number, e) in &report.failed {
                println!("  {}: {}", sequence_number, e);
            }
            warn_persist(report.persist_warning.as_ref());
        }
        Commands::Mirror => {
            let content = table.engine().mirror().read(table.engine().channel()).await?;
            for line in replay_lines(&content) {
                println!("{}", line);
            }
        }
        Commands::Init => {}
    }

    Ok(())
}

fn print_interfaces(catalog: &InterfaceCatalog) {
    if catalog.is_degraded() {
        println!("Interface discovery failed; showing LAN ports only");
    }
    for entry in catalog.entries() {
        println!(
            "{:<32} {:<10} {:<5} {}",
            entry.label,
            entry.device_name,
            entry.class,
            entry
                .gateway
                .map(|gw| format!("gateway {}", gw))
                .unwrap_or_default()
        );
    }
}

fn report_mutation(action: &str, outcome: &MutationOutcome) {
    println!(
        "{} route {}: {}",
        action, outcome.rule.sequence_number, outcome.directive
    );
    warn_persist(outcome.persist_warning.as_ref());
}

fn report_removal(summary: &RemovalSummary) {
    println!(
        "Removed {} routes ({} live routes deleted, {} not found)",
        summary.outcomes.len(),
        summary.removed(),
        summary.failed()
    );
    for outcome in summary.outcomes.iter().filter(|o| !o.succeeded()) {
        println!(
            "  {}: {}",
            outcome.sequence_number,
            outcome.error.as_deref().unwrap_or("no matching live route")
        );
    }
    warn_persist(summary.persist_warning.as_ref());
}

fn warn_persist(warning: Option<&RouteError>) {
    if let Some(warning) = warning {
        warn!("{}", warning);
    }
}
